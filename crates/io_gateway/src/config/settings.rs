//! Settings tree of the gateway.

use crate::alias::MappingPolicy;
use crate::whitelist::WhitelistEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

fn default_service_name() -> String {
    "io".to_string()
}

fn default_true() -> bool {
    true
}

/// Top-level gateway settings, usually loaded from TOML.
///
/// ```toml
/// service_name = "io"
/// log_request_params = "debug"
///
/// [namespaces."/".events.call]
/// whitelist = ["math.*", { regex = "^rooms\\." }]
/// aliases = { div = "math.div" }
/// call_options = { timeout = 500 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Name of the service the administrative actions are registered under.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Level at which request params are logged; absent = off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_request_params: Option<LogLevel>,
    /// Also log 4xx failures at error level.
    #[serde(default)]
    pub log_4xx_responses: bool,
    /// Logging setup; absent = leave the global subscriber alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSettings>,
    /// Handler sets keyed by namespace path or by set name.
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceSettings>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_request_params: None,
            log_4xx_responses: false,
            logging: Some(LoggingSettings::default()),
            namespaces: BTreeMap::from([("/".to_string(), NamespaceSettings::with_call_event())]),
        }
    }
}

impl GatewaySettings {
    /// Settings without any namespace.
    pub fn empty() -> Self {
        Self {
            logging: None,
            namespaces: BTreeMap::new(),
            ..Self::default()
        }
    }
}

/// One handler set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSettings {
    #[serde(default)]
    pub authorization: bool,
    /// Attach at start-up. Handler-only sets set this to false and are
    /// attached as dynamic namespaces.
    #[serde(default = "default_true")]
    pub create_namespace: bool,
    #[serde(default)]
    pub events: BTreeMap<String, CallSettings>,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            authorization: false,
            create_namespace: true,
            events: BTreeMap::new(),
        }
    }
}

impl NamespaceSettings {
    /// A set with a single unrestricted `call` event.
    pub fn with_call_event() -> Self {
        Self {
            events: BTreeMap::from([("call".to_string(), CallSettings::default())]),
            ..Self::default()
        }
    }
}

/// Structured event settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSettings {
    #[serde(default)]
    pub whitelist: Vec<WhitelistEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<HashMap<String, String>>,
    #[serde(default)]
    pub mapping_policy: MappingPolicy,
    /// Fixed options merged into every call (e.g. `timeout` in ms).
    #[serde(default)]
    pub call_options: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error), used when
    /// `RUST_LOG` is not set
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

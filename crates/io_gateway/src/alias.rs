//! Client-facing action aliases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether names missing from the alias table pass through literally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingPolicy {
    /// Unmapped names are used as-is.
    #[default]
    All,
    /// Only aliased names are callable.
    Restrict,
}

/// The name could not be resolved under a restrict policy.
///
/// Surfaced to clients as "not found", never as its own error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unmapped;

/// Resolve a client-supplied name to a fully-qualified action name.
pub fn resolve<'a>(
    action: &'a str,
    aliases: Option<&'a HashMap<String, String>>,
    policy: MappingPolicy,
) -> Result<&'a str, Unmapped> {
    match aliases.and_then(|table| table.get(action)) {
        Some(target) => Ok(target.as_str()),
        None if policy == MappingPolicy::Restrict => Err(Unmapped),
        None => Ok(action),
    }
}

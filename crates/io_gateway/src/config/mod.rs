//! Configuration for the gateway.
//!
//! Settings are plain serde types loadable from TOML. Code-only extension
//! points (hooks, middlewares, raw handlers) are attached to the
//! [`NamespaceConfig`](crate::router::NamespaceConfig) built from them.

pub mod settings;

pub use settings::{CallSettings, GatewaySettings, LogLevel, LoggingSettings, NamespaceSettings};

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

/// Load settings from a TOML file.
///
/// A missing file is created with the default settings, which are returned.
///
/// # Errors
/// * file I/O failures
/// * TOML parse failures (also logged)
pub async fn load_config(path: impl AsRef<Path>) -> Result<GatewaySettings> {
    let path = path.as_ref();
    if path.exists() {
        let text = tokio::fs::read_to_string(path).await?;
        match toml::from_str::<GatewaySettings>(&text) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                Err(e.into())
            }
        }
    } else {
        warn!("Configuration file not found: {}, using defaults", path.display());

        let settings = GatewaySettings::default();
        let text = toml::to_string_pretty(&settings)?;
        tokio::fs::write(path, text).await?;
        info!("Created default configuration file: {}", path.display());

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway.toml");

        let settings = load_config(&path).await.unwrap();
        assert_eq!(settings, GatewaySettings::default());
        assert!(path.exists());

        let reloaded = load_config(&path).await.unwrap();
        assert_eq!(reloaded, settings);
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
service_name = "gateway"

[namespaces."/".events.call]
whitelist = ["math.*"]
"#
        )
        .unwrap();

        let settings = load_config(file.path()).await.unwrap();
        assert_eq!(settings.service_name, "gateway");
        assert_eq!(settings.namespaces["/"].events["call"].whitelist.len(), 1);
    }

    #[tokio::test]
    async fn invalid_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "namespaces = 5").unwrap();
        assert!(load_config(file.path()).await.is_err());
    }
}

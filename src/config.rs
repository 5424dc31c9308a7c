use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    pool::DEFAULT_CONCURRENCY,
    session::DEFAULT_CODE_TTL,
};

/// Service configuration. Every field has a default, so a partial document
/// (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub service: ServiceConfig,
    /// Maximum number of grant requests processed concurrently.
    pub concurrency: usize,
    /// When set, issued codes are tagged with this id and the exchange phase
    /// only accepts codes carrying it.
    pub service_id: Option<String>,
    pub session_store: SessionStoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            service_id: None,
            session_store: SessionStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionStoreConfig {
    /// Connection address of an external store. The in-memory store
    /// ignores it.
    pub address: Option<String>,
    pub code_ttl_secs: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            address: None,
            code_ttl_secs: DEFAULT_CODE_TTL.as_secs(),
        }
    }
}

impl SessionStoreConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.session_store.code_ttl_secs == 0 {
            return Err(Error::Config("session code TTL must be positive".into()));
        }
        if let Some(id) = &self.service_id {
            if id.is_empty() || id.contains('.') {
                return Err(Error::Config(format!(
                    "service id '{id}' must be non-empty and must not contain '.'"
                )));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.session_store.code_ttl(), Duration::from_secs(600));
        assert!(config.service_id.is_none());
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_json_str(
            r#"{"service":{"port":9090},"concurrency":8,"serviceId":"flow-a","sessionStore":{"codeTtlSecs":30}}"#,
        )
        .unwrap();
        assert_eq!(config.service.port, 9090);
        assert_eq!(config.service.host, "0.0.0.0");
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.service_id.as_deref(), Some("flow-a"));
        assert_eq!(config.session_store.code_ttl_secs, 30);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::from_json_str(r#"{"concurrency":0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{"serviceId":"a.b"}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str("not json"),
            Err(Error::Config(_))
        ));
    }
}

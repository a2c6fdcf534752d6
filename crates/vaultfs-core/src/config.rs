use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BackendError, Result};

/// Upload unit size for the chunked deposit protocol.
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20; // 1 MiB

/// Backend configuration. Three options are required; the rest tune the
/// deposit engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub username: String,
    pub password: String,
    /// Service URL, expected to end in `/api`. A trailing slash is stripped.
    pub endpoint: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Adopt an existing deposit instead of registering a new one.
    #[serde(default)]
    pub resume_deposit_id: Option<i64>,
    #[serde(default)]
    pub show_deposit_progress: bool,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl VaultConfig {
    /// Build a configuration from a key-value map with case-insensitive
    /// keys, the way a host utility hands options through.
    pub fn from_map(options: &BTreeMap<String, String>) -> Result<Self> {
        let mut lowered = BTreeMap::new();
        for (key, value) in options {
            lowered.insert(key.to_ascii_lowercase(), value.clone());
        }
        let required = |key: &str| -> Result<String> {
            lowered
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| BackendError::Config(format!("option '{key}' is required")))
        };

        let chunk_size = match lowered.get("chunk_size") {
            Some(raw) => raw
                .parse()
                .map_err(|_| BackendError::Config(format!("invalid chunk_size: '{raw}'")))?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let resume_deposit_id = match lowered.get("resume_deposit_id") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                BackendError::Config(format!("invalid resume_deposit_id: '{raw}'"))
            })?),
            None => None,
        };
        let show_deposit_progress = matches!(
            lowered.get("show_deposit_progress").map(String::as_str),
            Some("true") | Some("1") | Some("yes")
        );

        let config = Self {
            username: required("username")?,
            password: required("password")?,
            endpoint: required("endpoint")?,
            chunk_size,
            resume_deposit_id,
            show_deposit_progress,
        };
        config.validated()
    }

    /// Normalize and sanity-check the configuration.
    pub fn validated(mut self) -> Result<Self> {
        if self.username.is_empty() {
            return Err(BackendError::Config("option 'username' is required".into()));
        }
        if self.password.is_empty() {
            return Err(BackendError::Config("option 'password' is required".into()));
        }
        self.endpoint = self.endpoint.trim_end_matches('/').to_string();
        if self.endpoint.is_empty() {
            return Err(BackendError::Config("option 'endpoint' is required".into()));
        }
        Url::parse(&self.endpoint).map_err(|e| {
            BackendError::Config(format!("invalid endpoint URL '{}': {e}", self.endpoint))
        })?;
        if !self.endpoint.ends_with("/api") {
            tracing::warn!(
                "endpoint '{}' does not end in /api; login URL derivation may be off",
                self.endpoint
            );
        }
        if self.chunk_size == 0 {
            return Err(BackendError::Config("chunk_size must be positive".into()));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_map() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("username".to_string(), "admin".to_string());
        m.insert("password".to_string(), "hunter2".to_string());
        m.insert(
            "endpoint".to_string(),
            "http://localhost:8000/api/".to_string(),
        );
        m
    }

    #[test]
    fn from_map_is_case_insensitive() {
        let mut m = BTreeMap::new();
        m.insert("Username".to_string(), "admin".to_string());
        m.insert("PASSWORD".to_string(), "hunter2".to_string());
        m.insert("Endpoint".to_string(), "http://localhost:8000/api".to_string());
        let cfg = VaultConfig::from_map(&m).unwrap();
        assert_eq!(cfg.username, "admin");
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let cfg = VaultConfig::from_map(&base_map()).unwrap();
        assert_eq!(cfg.endpoint, "http://localhost:8000/api");
    }

    #[test]
    fn missing_required_option_fails() {
        let mut m = base_map();
        m.remove("password");
        let err = VaultConfig::from_map(&m).unwrap_err();
        assert!(err.to_string().contains("password"), "got: {err}");
    }

    #[test]
    fn optional_settings_parse() {
        let mut m = base_map();
        m.insert("chunk_size".to_string(), "65536".to_string());
        m.insert("resume_deposit_id".to_string(), "42".to_string());
        m.insert("show_deposit_progress".to_string(), "true".to_string());
        let cfg = VaultConfig::from_map(&m).unwrap();
        assert_eq!(cfg.chunk_size, 65536);
        assert_eq!(cfg.resume_deposit_id, Some(42));
        assert!(cfg.show_deposit_progress);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut m = base_map();
        m.insert("chunk_size".to_string(), "0".to_string());
        assert!(VaultConfig::from_map(&m).is_err());
    }

    #[test]
    fn bad_endpoint_rejected() {
        let mut m = base_map();
        m.insert("endpoint".to_string(), "not a url".to_string());
        assert!(VaultConfig::from_map(&m).is_err());
    }
}

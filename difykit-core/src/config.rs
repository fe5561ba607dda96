use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CoreResult, DifyError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.dify.ai/v1";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for non-streaming requests in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    /// Optional total timeout for event-stream calls (None = no limit)
    #[serde(default)]
    pub stream_timeout_ms: Option<u64>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
            stream_timeout_ms: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// Largest incomplete SSE record kept in the buffer before the stream fails.
    #[serde(default = "default_max_pending_record_bytes")]
    pub max_pending_record_bytes: usize,
    /// Keep reading (and discarding) the body after a terminal event.
    #[serde(default = "default_drain_after_terminal")]
    pub drain_after_terminal: bool,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            max_pending_record_bytes: default_max_pending_record_bytes(),
            drain_after_terminal: default_drain_after_terminal(),
        }
    }
}

fn default_max_pending_record_bytes() -> usize {
    1 << 20
}
fn default_drain_after_terminal() -> bool {
    true
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}
fn default_api_key_env() -> String {
    "API_KEY".to_string()
}

/// On-disk connector configuration. The API key itself never lives in the
/// file; `api_key_env` names the environment variable holding it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectorCfg {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
}

impl Default for ConnectorCfg {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key_env: default_api_key_env(),
            http: HttpCfg::default(),
            stream: StreamCfg::default(),
        }
    }
}

impl ConnectorCfg {
    /// Load from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(DifyError::from)?;
        let shown = path.display();
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| DifyError::Config(format!("{shown} is not UTF-8: {e}")))?;
        let json_err = |e: serde_json::Error| DifyError::Config(format!("invalid JSON in {shown}: {e}"));
        let toml_err = |e: toml::de::Error| DifyError::Config(format!("invalid TOML in {shown}: {e}"));
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s).map_err(json_err)?,
            Some("toml") => toml::from_str::<Self>(s).map_err(toml_err)?,
            _ => serde_json::from_str::<Self>(s)
                .or_else(|_| toml::from_str::<Self>(s))
                .map_err(toml_err)?,
        };
        Ok(cfg)
    }
}

/// Partial configuration applied on top of a resolved [`DifyConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigOverride {
    pub api_base_url: Option<String>,
    pub api_key: Option<SecretString>,
}

/// Resolved, validated client configuration.
#[derive(Debug, Clone)]
pub struct DifyConfig {
    pub api_base_url: String,
    pub api_key: SecretString,
    pub http: HttpCfg,
    pub stream: StreamCfg,
}

impl DifyConfig {
    pub fn new(api_base_url: impl Into<String>, api_key: SecretString) -> CoreResult<Self> {
        Self {
            api_base_url: api_base_url.into(),
            api_key,
            http: HttpCfg::default(),
            stream: StreamCfg::default(),
        }
        .validated()
    }

    /// Read `API_BASE_URL` (optional) and `API_KEY` from the process environment.
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(&ConnectorCfg::default(), |k| std::env::var(k).ok())
    }

    /// Resolve a file configuration, reading the key from `cfg.api_key_env`.
    pub fn from_cfg(cfg: &ConnectorCfg) -> CoreResult<Self> {
        Self::from_lookup(cfg, |k| std::env::var(k).ok())
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::from_cfg(&ConnectorCfg::from_path(path)?)
    }

    /// Resolve with an explicit variable lookup. `API_BASE_URL` in the
    /// lookup wins over the file's base URL.
    pub fn from_lookup<F>(cfg: &ConnectorCfg, lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(&cfg.api_key_env)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                DifyError::Config(format!("API key is required (set {})", cfg.api_key_env))
            })?;
        let api_base_url = lookup("API_BASE_URL")
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| cfg.api_base_url.clone());
        Self {
            api_base_url,
            api_key: SecretString::from(api_key),
            http: cfg.http.clone(),
            stream: cfg.stream.clone(),
        }
        .validated()
    }

    /// Return a copy with the given fields replaced; the result is re-validated.
    pub fn with_overrides(&self, ov: &ConfigOverride) -> CoreResult<Self> {
        let mut next = self.clone();
        if let Some(url) = &ov.api_base_url {
            next.api_base_url = url.clone();
        }
        if let Some(key) = &ov.api_key {
            next.api_key = key.clone();
        }
        next.validated()
    }

    fn validated(mut self) -> CoreResult<Self> {
        let trimmed = self.api_base_url.trim().trim_end_matches('/').to_string();
        let url = reqwest::Url::parse(&trimmed)
            .map_err(|e| DifyError::Config(format!("invalid api base url '{trimmed}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DifyError::Config(format!(
                "api base url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(DifyError::Config("API key is required".into()));
        }
        if self.stream.max_pending_record_bytes == 0 {
            return Err(DifyError::Config(
                "stream.max_pending_record_bytes must be > 0".into(),
            ));
        }
        self.api_base_url = trimmed;
        Ok(self)
    }
}

//! Connection settings for the remote backend, from serde or the environment.

use serde::{Deserialize, Serialize};

use runin_types::{Result, RuninError};

const DEFAULT_BASE_URL: &str = "http://localhost:7890";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for [`HttpBackend`](crate::HttpBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub account: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RemoteConfig {
    pub fn new(account: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            account: account.into(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Read `RUNIN_BASE_URL` (optional), `RUNIN_ACCOUNT` and `RUNIN_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("RUNIN_API_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RuninError::Config("RUNIN_API_KEY is not set".into()))?;
        let account = lookup("RUNIN_ACCOUNT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| RuninError::Config("RUNIN_ACCOUNT is not set".into()))?;
        let mut config = Self::new(account, api_key);
        if let Some(url) = lookup("RUNIN_BASE_URL").filter(|v| !v.is_empty()) {
            config.base_url = url;
        }
        Ok(config)
    }
}

//! Client configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use querious_core::{Error, Result};

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_JOBS_URL: &str = "http://localhost:8288/v1";

/// Configuration for the Querious API client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin; endpoints live under `/api`
    pub api_url: String,
    /// Base of the job runner API used by the polling fallback
    pub jobs_url: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Timeout for ordinary JSON requests (the streaming endpoint has none)
    pub request_timeout: Duration,
    pub poll_timeout: Duration,
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = env::var("QUERIOUS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let jobs_url = env::var("QUERIOUS_JOBS_URL").unwrap_or_else(|_| DEFAULT_JOBS_URL.to_string());

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            jobs_url: jobs_url.trim_end_matches('/').to_string(),
            email: env::var("QUERIOUS_EMAIL").ok(),
            password: env::var("QUERIOUS_PASSWORD").ok(),
            request_timeout: Duration::from_secs(env_number("QUERIOUS_TIMEOUT_SECS", 30)?),
            poll_timeout: Duration::from_secs(env_number("QUERIOUS_POLL_TIMEOUT_SECS", 120)?),
            poll_interval: Duration::from_millis(env_number("QUERIOUS_POLL_INTERVAL_MS", 500)?),
        })
    }

    /// Create configuration with an explicit backend URL and defaults for everything else
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            jobs_url: DEFAULT_JOBS_URL.to_string(),
            email: None,
            password: None,
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_jobs_url(mut self, jobs_url: impl Into<String>) -> Self {
        let jobs_url: String = jobs_url.into();
        self.jobs_url = jobs_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_credentials(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.poll_timeout = timeout;
        self.poll_interval = interval;
        self
    }
}

fn env_number(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            Error::Configuration(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

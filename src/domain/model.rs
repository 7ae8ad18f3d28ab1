use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// Request priority, only consulted while an endpoint is throttled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Per-call options for [`RequestOptimizer::request`].
///
/// Unset `retry_count` / `retry_delay` / `cache_ttl` fall back to the
/// optimizer's configuration.
///
/// [`RequestOptimizer::request`]: crate::application::optimizer::RequestOptimizer::request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub params: BTreeMap<String, Value>,
    pub headers: BTreeMap<String, String>,
    pub cache_ttl: Option<Duration>,
    pub bypass_cache: bool,
    pub retry_count: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub priority: Priority,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

// Outbound request handed to a Transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// Connectivity tri-state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Connectivity::Unknown => None,
            Connectivity::Connected => Some(true),
            Connectivity::Disconnected => Some(false),
        }
    }
}

impl From<bool> for Connectivity {
    fn from(connected: bool) -> Self {
        if connected {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }
}

/// Snapshot of the prober's shared status.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connectivity: Connectivity,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
    pub check_in_progress: bool,
}

/// Counters exposed by the optimizer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizerStats {
    pub requests: u64,
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub deduplicated: u64,
    pub network_calls: u64,
    pub retries: u64,
    pub throttled_rejections: u64,
    pub cached_entries: usize,
    pub pending: usize,
}

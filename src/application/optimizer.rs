//! Request optimizer: TTL cache, in-flight deduplication, burst throttling
//! and bounded retries in front of a [`Transport`].
//!
//! One optimizer owns its cache, pending table and traffic records; clone it
//! freely, clones share the same state.

use crate::application::keys::{build_url, cache_key};
use crate::application::prober::ConnectionProber;
use crate::application::traffic::{TrafficConfig, TrafficTracker};
use crate::domain::error::RequestError;
use crate::domain::model::{HttpRequest, HttpResponse, OptimizerStats, Priority, RequestOptions};
use crate::domain::traits::Transport;
use crate::infrastructure::storage::cache::ResponseCache;
use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};

type SharedResponse = Shared<BoxFuture<'static, Result<Value, RequestError>>>;

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub default_ttl: Duration,
    pub health_ttl: Duration,
    pub collection_ttl: Duration,
    /// Endpoints containing this string get `health_ttl`; endpoints with a
    /// path segment equal to it are health checks.
    pub health_marker: String,
    /// Endpoints containing this string hit the primary resource collection.
    pub primary_collection: String,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub backpressure_pause: Duration,
    pub traffic: TrafficConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            health_ttl: Duration::from_secs(5 * 60),
            collection_ttl: Duration::from_secs(10 * 60),
            health_marker: "health".to_string(),
            primary_collection: "resources".to_string(),
            retry_count: 2,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            backpressure_pause: Duration::from_secs(2),
            traffic: TrafficConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// TTL for a successful GET. An explicit per-call TTL wins; otherwise the
    /// endpoint class decides, falling back to `default_ttl`.
    pub fn effective_ttl(&self, endpoint: &str, requested: Option<Duration>) -> Duration {
        if let Some(ttl) = requested {
            return ttl;
        }
        if !self.health_marker.is_empty() && endpoint.contains(&self.health_marker) {
            self.health_ttl
        } else if !self.primary_collection.is_empty()
            && endpoint.contains(&self.primary_collection)
        {
            self.collection_ttl
        } else {
            self.default_ttl
        }
    }

    /// Does `endpoint` name the health check itself, as opposed to a data
    /// endpoint that merely mentions the marker?
    pub fn is_health_endpoint(&self, endpoint: &str) -> bool {
        let path = endpoint.split(['?', '#']).next().unwrap_or_default();
        !self.health_marker.is_empty()
            && path.split('/').any(|segment| segment == self.health_marker)
    }
}

#[derive(Default)]
struct StatsInner {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    stale_hits: AtomicU64,
    deduplicated: AtomicU64,
    network_calls: AtomicU64,
    retries: AtomicU64,
    throttled_rejections: AtomicU64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: OptimizerConfig,
    cache: ResponseCache,
    pending: Mutex<HashMap<String, SharedResponse>>,
    traffic: TrafficTracker,
    prober: Option<Arc<ConnectionProber>>,
    stats: StatsInner,
}

#[derive(Clone)]
pub struct RequestOptimizer {
    inner: Arc<Inner>,
}

pub struct OptimizerBuilder {
    transport: Arc<dyn Transport>,
    config: OptimizerConfig,
    prober: Option<Arc<ConnectionProber>>,
}

impl OptimizerBuilder {
    pub fn config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Let health-check GETs answer from the prober's cached status.
    pub fn prober(mut self, prober: Arc<ConnectionProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn build(self) -> RequestOptimizer {
        RequestOptimizer {
            inner: Arc::new(Inner {
                transport: self.transport,
                traffic: TrafficTracker::new(self.config.traffic.clone()),
                config: self.config,
                cache: ResponseCache::new(),
                pending: Mutex::new(HashMap::new()),
                prober: self.prober,
                stats: StatsInner::default(),
            }),
        }
    }
}

// Removes the pending entry however the request task ends.
struct PendingGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.lock_pending().remove(&self.key);
    }
}

enum Lookup {
    Cached(Value),
    InFlight(SharedResponse),
}

impl RequestOptimizer {
    pub fn new(transport: Arc<dyn Transport>, config: OptimizerConfig) -> Self {
        Self::builder(transport).config(config).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> OptimizerBuilder {
        OptimizerBuilder {
            transport,
            config: OptimizerConfig::default(),
            prober: None,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.inner.config
    }

    /// Run one request through the cache, throttle, dedup and retry layers.
    ///
    /// Under throttling a non-high-priority call is answered from any cached
    /// value, even an expired one; failing that, low priority is rejected
    /// with [`RequestError::Throttled`] and normal priority waits out the
    /// backpressure pause first.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Value, RequestError> {
        let inner = &self.inner;
        inner.stats.requests.fetch_add(1, Ordering::Relaxed);

        let throttled = inner.traffic.track(endpoint);
        let key = cache_key(
            endpoint,
            &options.method,
            &options.params,
            options.body.as_ref(),
        );
        let use_cache = options.method == Method::GET && !options.bypass_cache;

        if use_cache {
            if let Some(value) = self.health_shortcut(endpoint) {
                return Ok(value);
            }
        }

        if throttled && options.priority != Priority::High {
            if let Some(value) = inner.cache.get_any(&key) {
                inner.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint, "Throttled, serving cached value");
                return Ok(value);
            }
            if options.priority == Priority::Low {
                inner
                    .stats
                    .throttled_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return Err(RequestError::Throttled {
                    endpoint: endpoint.to_string(),
                });
            }
            debug!(
                endpoint,
                pause_ms = inner.config.backpressure_pause.as_millis() as u64,
                "Throttled, pausing before request"
            );
            tokio::time::sleep(inner.config.backpressure_pause).await;
        }

        if use_cache {
            if let Some(value) = inner.cache.get_fresh(&key) {
                inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint, "Cache hit");
                return Ok(value);
            }
        }

        let lookup = {
            let mut pending = inner.lock_pending();
            if let Some(existing) = pending.get(&key) {
                inner.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint, "Joining in-flight request");
                Lookup::InFlight(existing.clone())
            } else if let Some(value) = use_cache.then(|| inner.cache.get_fresh(&key)).flatten()
            {
                // Filled by a request that finished since the first lookup
                inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Cached(value)
            } else {
                let ttl = inner.config.effective_ttl(endpoint, options.cache_ttl);
                let task = tokio::spawn(Inner::execute(
                    Arc::clone(&self.inner),
                    key.clone(),
                    endpoint.to_string(),
                    options,
                    ttl,
                ));
                let shared = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(RequestError::Network(format!(
                            "request task failed: {}",
                            e
                        ))),
                    }
                }
                .boxed()
                .shared();
                pending.insert(key, shared.clone());
                Lookup::InFlight(shared)
            }
        };

        match lookup {
            Lookup::Cached(value) => Ok(value),
            Lookup::InFlight(future) => future.await,
        }
    }

    /// Run every request concurrently; results come back in input order.
    pub async fn batch(
        &self,
        requests: Vec<(String, RequestOptions)>,
    ) -> Vec<Result<Value, RequestError>> {
        join_all(
            requests
                .into_iter()
                .map(|(endpoint, options)| async move { self.request(&endpoint, options).await }),
        )
        .await
    }

    /// Drop cached entries for one endpoint (by key prefix), or everything.
    pub fn invalidate(&self, endpoint: Option<&str>) {
        match endpoint {
            Some(prefix) => {
                let removed = self.inner.cache.invalidate_prefix(prefix);
                debug!(prefix, removed, "Invalidated cache entries");
            }
            None => {
                self.inner.cache.clear();
                debug!("Cleared response cache");
            }
        }
    }

    pub fn is_throttled(&self, endpoint: &str) -> bool {
        self.inner.traffic.is_throttled(endpoint)
    }

    pub fn stats(&self) -> OptimizerStats {
        let s = &self.inner.stats;
        OptimizerStats {
            requests: s.requests.load(Ordering::Relaxed),
            cache_hits: s.cache_hits.load(Ordering::Relaxed),
            stale_hits: s.stale_hits.load(Ordering::Relaxed),
            deduplicated: s.deduplicated.load(Ordering::Relaxed),
            network_calls: s.network_calls.load(Ordering::Relaxed),
            retries: s.retries.load(Ordering::Relaxed),
            throttled_rejections: s.throttled_rejections.load(Ordering::Relaxed),
            cached_entries: self.inner.cache.len(),
            pending: self.inner.lock_pending().len(),
        }
    }

    fn health_shortcut(&self, endpoint: &str) -> Option<Value> {
        if !self.inner.config.is_health_endpoint(endpoint) {
            return None;
        }
        let connected = self.inner.prober.as_ref()?.cached_status()?;
        debug!(endpoint, connected, "Answering health check from probe status");
        Some(json!({
            "status": if connected { "ok" } else { "error" },
            "cached": true,
        }))
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, SharedResponse>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn execute(
        inner: Arc<Inner>,
        key: String,
        endpoint: String,
        options: RequestOptions,
        ttl: Duration,
    ) -> Result<Value, RequestError> {
        let _guard = PendingGuard {
            inner: Arc::clone(&inner),
            key: key.clone(),
        };

        let mut headers = BTreeMap::from([
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        for (name, value) in options.headers {
            headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
            headers.insert(name, value);
        }

        let request = HttpRequest {
            method: options.method.clone(),
            url: build_url(&endpoint, &options.params),
            headers,
            body: options.body.as_ref().map(Value::to_string),
        };
        let retry_count = options.retry_count.unwrap_or(inner.config.retry_count);
        let retry_delay = options.retry_delay.unwrap_or(inner.config.retry_delay);

        let mut attempt: u32 = 0;
        loop {
            match inner.attempt(request.clone()).await {
                Ok(value) => {
                    if options.method == Method::GET {
                        inner.cache.insert(key, value.clone(), ttl);
                    }
                    return Ok(value);
                }
                Err(err) if attempt < retry_count && err.is_retryable() => {
                    let delay = backoff_delay(retry_delay, attempt);
                    warn!(
                        endpoint = %endpoint,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    inner.stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        endpoint = %endpoint,
                        attempts = attempt + 1,
                        error = %err,
                        "Request failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, request: HttpRequest) -> Result<Value, RequestError> {
        self.stats.network_calls.fetch_add(1, Ordering::Relaxed);
        let timeout = self.config.request_timeout;
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| RequestError::Timeout(timeout))??;

        if !response.is_success() {
            return Err(http_error(&response));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| RequestError::Decode(e.to_string()))
    }
}

/// Linear backoff: the n-th retry waits `n * retry_delay`.
fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay.saturating_mul(attempt.saturating_add(1))
}

/// Turn a non-2xx response into an error, keeping whatever the body says.
fn http_error(response: &HttpResponse) -> RequestError {
    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    let field = |name: &str| -> Option<String> {
        match parsed.as_ref()?.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    };

    let message = field("message")
        .or_else(|| field("error"))
        .or_else(|| field("msg"))
        .or_else(|| {
            let text = response.body.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
        .unwrap_or_else(|| {
            StatusCode::from_u16(response.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("request failed")
                .to_string()
        });

    RequestError::Http {
        status: response.status,
        message,
        code: field("code"),
    }
}

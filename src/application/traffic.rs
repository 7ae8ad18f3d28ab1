//! Per-endpoint burst tracking.
//!
//! Every optimized request is recorded against its endpoint. More than
//! `burst_threshold` requests inside `burst_window` marks the endpoint
//! throttled for `throttle_duration`. The mark lapses at the deadline set
//! when it was first raised; later bursts do not push it back.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TrafficConfig {
    pub burst_threshold: usize,
    pub burst_window: Duration,
    /// Minimum gap between two throttle activations of one endpoint.
    pub warn_interval: Duration,
    pub throttle_duration: Duration,
    /// How much request history is retained, and how often it is pruned.
    pub history_window: Duration,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            burst_threshold: 10,
            burst_window: Duration::from_secs(1),
            warn_interval: Duration::from_secs(5),
            throttle_duration: Duration::from_secs(10),
            history_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct EndpointTrafficRecord {
    request_timestamps: VecDeque<Instant>,
    throttled_until: Option<Instant>,
    last_warning_at: Option<Instant>,
}

impl EndpointTrafficRecord {
    fn is_throttled(&self, now: Instant) -> bool {
        self.throttled_until.is_some_and(|until| now < until)
    }

    fn recent(&self, now: Instant, window: Duration) -> usize {
        self.request_timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < window)
            .count()
    }
}

struct TrafficState {
    records: HashMap<String, EndpointTrafficRecord>,
    last_prune: Instant,
}

pub struct TrafficTracker {
    config: TrafficConfig,
    state: Mutex<TrafficState>,
}

impl TrafficTracker {
    pub fn new(config: TrafficConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrafficState {
                records: HashMap::new(),
                last_prune: Instant::now(),
            }),
        }
    }

    /// Record one request to `endpoint` and return its throttle state,
    /// which may have been switched on by this very call.
    pub fn track(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        let mut state = self.lock();

        if now.saturating_duration_since(state.last_prune) > self.config.history_window {
            Self::prune(&mut state, now, &self.config);
        }

        let record = state.records.entry(endpoint.to_string()).or_default();
        record.request_timestamps.push_back(now);

        let recent = record.recent(now, self.config.burst_window);
        let may_warn = record.last_warning_at.map_or(true, |last| {
            now.saturating_duration_since(last) > self.config.warn_interval
        });

        if recent > self.config.burst_threshold && may_warn {
            warn!(
                endpoint,
                recent,
                window_ms = self.config.burst_window.as_millis() as u64,
                "Request burst detected, throttling endpoint"
            );
            if !record.is_throttled(now) {
                record.throttled_until = Some(now + self.config.throttle_duration);
            }
            record.last_warning_at = Some(now);
        }

        record.is_throttled(now)
    }

    pub fn is_throttled(&self, endpoint: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .records
            .get(endpoint)
            .is_some_and(|r| r.is_throttled(now))
    }

    /// Number of requests to `endpoint` still held in history.
    pub fn history_len(&self, endpoint: &str) -> usize {
        self.lock()
            .records
            .get(endpoint)
            .map_or(0, |r| r.request_timestamps.len())
    }

    fn prune(state: &mut TrafficState, now: Instant, config: &TrafficConfig) {
        let window = config.history_window;
        for record in state.records.values_mut() {
            while record
                .request_timestamps
                .front()
                .is_some_and(|&t| now.saturating_duration_since(t) >= window)
            {
                record.request_timestamps.pop_front();
            }
        }
        state
            .records
            .retain(|_, r| !r.request_timestamps.is_empty() || r.is_throttled(now));
        state.last_prune = now;
        debug!(endpoints = state.records.len(), "Pruned request history");
    }

    // Bookkeeping must never take the request path down with it.
    fn lock(&self) -> MutexGuard<'_, TrafficState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Traffic state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for TrafficTracker {
    fn default() -> Self {
        Self::new(TrafficConfig::default())
    }
}

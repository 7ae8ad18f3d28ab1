//! Single-flight, cached connectivity probe.
//!
//! At most one probe runs at a time; callers arriving while it runs await
//! the same result. A definite result is reused for `cache_ttl` unless the
//! caller forces a fresh probe. A probe is never allowed to fail: every
//! error resolves to "disconnected".

use crate::domain::error::ProbeError;
use crate::domain::model::{ConnectionStatus, Connectivity};
use crate::domain::traits::ProbeBackend;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type SharedProbe = Shared<BoxFuture<'static, bool>>;

#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub cache_ttl: Duration,
    /// Backend error codes meaning "the probed relation does not exist".
    pub missing_relation_codes: Vec<String>,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
            missing_relation_codes: vec!["42P01".to_string(), "PGRST205".to_string()],
        }
    }
}

#[derive(Default)]
struct ProbeState {
    connectivity: Connectivity,
    last_checked_at: Option<Instant>,
    last_checked_wall: Option<DateTime<Utc>>,
    in_flight: Option<SharedProbe>,
}

impl ProbeState {
    fn fresh(&self, ttl: Duration) -> Option<bool> {
        let checked = self.last_checked_at?;
        if Instant::now().saturating_duration_since(checked) < ttl {
            self.connectivity.as_bool()
        } else {
            None
        }
    }
}

fn lock(state: &Mutex<ProbeState>) -> MutexGuard<'_, ProbeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Records the outcome and releases the single-flight slot on every exit,
// a panicking backend included (it counts as disconnected).
struct ProbeGuard {
    state: Arc<Mutex<ProbeState>>,
    connected: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.connectivity = Connectivity::from(self.connected);
        state.last_checked_at = Some(Instant::now());
        state.last_checked_wall = Some(Utc::now());
        state.in_flight = None;
    }
}

pub struct ConnectionProber {
    backend: Arc<dyn ProbeBackend>,
    config: ProberConfig,
    state: Arc<Mutex<ProbeState>>,
}

impl ConnectionProber {
    pub fn new(backend: Arc<dyn ProbeBackend>, config: ProberConfig) -> Self {
        Self {
            backend,
            config,
            state: Arc::new(Mutex::new(ProbeState::default())),
        }
    }

    /// Is the backend reachable?
    ///
    /// Joins a running probe if there is one; otherwise returns the cached
    /// result when it is definite and younger than `cache_ttl` (unless
    /// `force_check`), and probes the backend when it is not.
    pub async fn check_connection(&self, force_check: bool) -> bool {
        let probe = {
            let mut state = lock(&self.state);
            if let Some(running) = state.in_flight.as_ref() {
                debug!("Connection check already running, waiting for it");
                running.clone()
            } else {
                if !force_check {
                    if let Some(connected) = state.fresh(self.config.cache_ttl) {
                        debug!(connected, "Using cached connection status");
                        return connected;
                    }
                }
                let probe = self.spawn_probe();
                state.in_flight = Some(probe.clone());
                probe
            }
        };
        probe.await
    }

    /// Definite status from a probe that finished within `cache_ttl`.
    pub fn cached_status(&self) -> Option<bool> {
        lock(&self.state).fresh(self.config.cache_ttl)
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = lock(&self.state);
        ConnectionStatus {
            connectivity: state.connectivity,
            last_checked: state.last_checked_wall,
            check_in_progress: state.in_flight.is_some(),
        }
    }

    // Caller holds the state lock, so the guard cannot clear `in_flight`
    // before it has been set.
    fn spawn_probe(&self) -> SharedProbe {
        let backend = Arc::clone(&self.backend);
        let codes = self.config.missing_relation_codes.clone();
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let mut guard = ProbeGuard {
                state,
                connected: false,
            };
            guard.connected = interpret(backend.probe().await, &codes);
            guard.connected
        });

        async move { handle.await.unwrap_or(false) }.boxed().shared()
    }
}

/// Map a probe outcome to connectivity. A missing relation still proves the
/// backend answered, so it counts as connected.
pub fn interpret(outcome: Result<(), ProbeError>, missing_relation_codes: &[String]) -> bool {
    match outcome {
        Ok(()) => {
            info!("Backend connection verified");
            true
        }
        Err(ProbeError::Backend {
            code: Some(code), ..
        }) if missing_relation_codes.iter().any(|c| *c == code) => {
            info!(code = %code, "Backend reachable, probed relation does not exist yet");
            true
        }
        Err(err) => {
            warn!(error = %err, "Backend connection check failed");
            false
        }
    }
}

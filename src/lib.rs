//! Client-side request optimization: a TTL response cache, deduplication of
//! identical in-flight requests, per-endpoint burst throttling with a
//! stale-cache fallback, bounded retries, and a single-flight connection
//! prober.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod state;

pub use application::optimizer::{OptimizerConfig, RequestOptimizer};
pub use application::prober::{ConnectionProber, ProberConfig};
pub use domain::error::{GateError, ProbeError, RequestError};
pub use domain::model::{Priority, RequestOptions};
pub use domain::traits::{ProbeBackend, Transport};

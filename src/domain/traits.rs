use crate::domain::error::{ProbeError, RequestError};
use crate::domain::model::{HttpRequest, HttpResponse};
use async_trait::async_trait;

/// Fetch-like collaborator the optimizer sends requests through.
///
/// Implementations only move bytes: status handling, decoding, retries and
/// timeouts are the optimizer's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError>;
}

/// Backend capable of answering a minimal connectivity query.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    /// Issue the query. A structured backend error must carry its code so
    /// "relation does not exist" can be told apart from real failures.
    async fn probe(&self) -> Result<(), ProbeError>;
}

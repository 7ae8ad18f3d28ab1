// HTTP transport backed by reqwest
use crate::domain::error::{GateError, RequestError};
use crate::domain::model::{HttpRequest, HttpResponse};
use crate::domain::traits::Transport;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

/// Create a pooled HTTP client with the default 30s timeout
pub fn create_client(user_agent: &str) -> Result<Client, GateError> {
    Ok(Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(30))
        .user_agent(user_agent)
        .build()?)
}

/// [`Transport`] that sends requests with reqwest.
///
/// Relative endpoints are resolved against `base_url`; absolute
/// `http(s)://` endpoints are sent untouched. Default headers sit underneath
/// the per-request ones.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
    default_headers: BTreeMap<String, String>,
}

impl ReqwestTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Supabase-style credentials: `apikey` plus a bearer token.
    pub fn with_api_key(self, api_key: &str) -> Self {
        self.with_header("apikey", api_key)
            .with_header("Authorization", format!("Bearer {}", api_key))
    }

    pub fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        let url = self.resolve(&request.url);
        let mut builder = self.client.request(request.method, url);

        for (name, value) in self.default_headers.iter() {
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

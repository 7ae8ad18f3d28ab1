use crate::domain::error::ProbeError;
use crate::domain::traits::ProbeBackend;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

// PostgREST error body
#[derive(Deserialize, Debug, Default)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    #[allow(dead_code)]
    details: Option<String>,
    hint: Option<String>,
}

/// Connectivity probe against a Supabase / PostgREST backend.
///
/// Asks for at most one row of `table`. Reaching the backend far enough to be
/// told the table is missing still counts as reachable, so the error code is
/// passed through untouched for the prober to judge.
pub struct PostgrestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    table: String,
}

impl PostgrestBackend {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            table: table.into(),
        }
    }

    fn probe_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }
}

#[async_trait]
impl ProbeBackend for PostgrestBackend {
    async fn probe(&self) -> Result<(), ProbeError> {
        let mut request = self
            .client
            .get(self.probe_url())
            .query(&[("select", "*"), ("limit", "1")]);

        if let Some(key) = self.api_key.as_deref() {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let body: PostgrestError = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .map(|m| match body.hint {
                Some(hint) => format!("{} ({})", m, hint),
                None => m,
            })
            .unwrap_or_else(|| format!("{} {}", status.as_u16(), text));

        Err(ProbeError::Backend {
            code: body.code,
            message,
        })
    }
}

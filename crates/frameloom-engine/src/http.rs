use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::capabilities::AuthProvider;

/// JSON-over-HTTPS client shared by the generation and project backends.
#[derive(Clone)]
pub struct ApiClient {
    api_base: String,
    http: Client,
    auth: Arc<dyn AuthProvider>,
}

impl ApiClient {
    pub fn new(api_base: &str, timeout: Duration, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let api_base = api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            bail!("API base URL is empty");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base,
            http,
            auth,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.endpoint(path);
        let request = self.http.get(&url);
        self.send(&format!("GET {path}"), request).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.endpoint(path);
        let request = self.http.post(&url).json(body);
        self.send(&format!("POST {path}"), request).await
    }

    async fn send(&self, label: &str, request: RequestBuilder) -> Result<Value> {
        let request = match self.auth.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        tracing::debug!(request = label, "api call");
        let response = request
            .send()
            .await
            .with_context(|| format!("{label} request failed"))?;
        response_json_or_error(label, response).await
    }
}

async fn response_json_or_error(label: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{label} response body read failed"))?;
    if !status.is_success() {
        bail!("{label} failed ({code}): {}", truncate_text(&body, 512));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).with_context(|| format!("{label} returned invalid JSON payload"))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

//! Thin REST client for the Cloudflare account APIs (Workers AI, Vectorize).
//!
//! All endpoints share the same envelope:
//!
//! ```json
//! { "success": true, "errors": [], "messages": [], "result": { ... } }
//! ```
//!
//! Non-2xx statuses and `success: false` envelopes are both errors. Nothing
//! here retries; every call is attempted exactly once.

use anyhow::{bail, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::CloudflareConfig;

#[derive(Clone)]
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    token: String,
    timeout: Duration,
}

impl CloudflareClient {
    /// Build a client, resolving the API token from config or environment.
    pub fn new(config: &CloudflareConfig) -> Result<Self> {
        let token = config.resolve_token()?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &CloudflareConfig, token: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        // The request timeout is applied per call so streamed bodies are not cut off.
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            token: token.into(),
            timeout,
        })
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/accounts/{}/{}", self.base_url, self.account_id, path)
    }

    /// Run a Workers AI model and return the envelope's `result`.
    pub async fn run_model(&self, model: &str, body: &Value) -> Result<Value> {
        self.post_json(&format!("ai/run/{}", model), body).await
    }

    /// Run a Workers AI model with `stream: true`, returning the raw
    /// `text/event-stream` response once the status line has been checked.
    pub async fn run_model_stream(&self, model: &str, body: &Value) -> Result<reqwest::Response> {
        let url = self.account_url(&format!("ai/run/{}", model));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }

    /// POST a JSON body to an account-scoped path.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.account_url(path))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        let json: Value = check_status(resp).await?.json().await?;
        unwrap_envelope(json)
    }

    /// POST newline-delimited JSON to an account-scoped path.
    pub async fn post_ndjson(&self, path: &str, body: String) -> Result<Value> {
        let resp = self
            .http
            .post(self.account_url(path))
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let json: Value = check_status(resp).await?.json().await?;
        unwrap_envelope(json)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!("Cloudflare API error {}: {}", status, body_text);
}

/// Extract `result` from a response envelope.
pub fn unwrap_envelope(json: Value) -> Result<Value> {
    if json.get("success").and_then(Value::as_bool) == Some(false) {
        let errors = json.get("errors").cloned().unwrap_or(Value::Null);
        bail!("Cloudflare API reported failure: {}", errors);
    }
    match json {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| anyhow::anyhow!("Invalid Cloudflare response: missing result")),
        _ => bail!("Invalid Cloudflare response: expected a JSON object"),
    }
}

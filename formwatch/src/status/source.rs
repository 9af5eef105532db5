//! Where status responses come from.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{FetchError, RawStatus};

/// A form-status endpoint.
///
/// Implementations report what the endpoint said; they do not interpret
/// it. Timeouts are imposed by the caller.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, slot_id: &str) -> Result<RawStatus, FetchError>;
}

/// Status endpoint reached over HTTP: `GET {base}/api/status?slot=<id>`.
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    /// Create a source for the service at `base_url`.
    ///
    /// `timeout` caps the whole request at the transport level; the
    /// poller applies its own, tighter deadline on top.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("formwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self, slot_id: &str) -> Result<RawStatus, FetchError> {
        let response = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .query(&[("slot", slot_id)])
            .send()
            .await?;

        let http_code = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(RawStatus {
                http_code,
                ..RawStatus::default()
            });
        }

        let body = response.text().await?;
        parse_body(&body, http_code)
    }
}

/// Extract the fields the classifier cares about.
///
/// Only a body that is not a JSON object is a protocol error. Missing or
/// wrongly typed fields come back as `None` and classify as unknown.
fn parse_body(body: &str, http_code: u16) -> Result<RawStatus, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Protocol(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(FetchError::Protocol("expected a JSON object".into()));
    };

    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(RawStatus {
        status: text("status"),
        is_open: fields.get("is_open").and_then(Value::as_bool),
        http_code,
        message: text("message"),
    })
}

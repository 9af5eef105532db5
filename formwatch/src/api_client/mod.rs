//! HTTP client for the daemon's control API.

pub mod types;

use anyhow::{Context, Result, bail};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::session::Channel;
use types::{
    AcknowledgeRequest, ErrorBody, MonitorState, SetSoundRequest, SlotInfo, SoundState,
    StartRequest,
};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Client for the daemon at its default address.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("connecting to formwatchd at {}", self.base_url))?;
        decode(response).await
    }

    pub async fn get_monitor(&self) -> Result<MonitorState> {
        self.send(self.http.get(self.url("/monitor"))).await
    }

    pub async fn get_slots(&self) -> Result<Vec<SlotInfo>> {
        self.send(self.http.get(self.url("/slots"))).await
    }

    /// Start monitoring `slot` on `channels`, or on both when `None`.
    pub async fn start(&self, slot: &str, channels: Option<Vec<Channel>>) -> Result<MonitorState> {
        let body = StartRequest {
            slot: slot.to_string(),
            channels,
        };
        self.send(self.http.post(self.url("/monitor/start")).json(&body))
            .await
    }

    pub async fn stop(&self) -> Result<MonitorState> {
        self.send(self.http.post(self.url("/monitor/stop"))).await
    }

    pub async fn acknowledge(&self) -> Result<MonitorState> {
        let body = AcknowledgeRequest {
            channel: Some(Channel::Interactive),
        };
        self.send(self.http.post(self.url("/monitor/acknowledge")).json(&body))
            .await
    }

    pub async fn get_sound(&self) -> Result<SoundState> {
        self.send(self.http.get(self.url("/sound"))).await
    }

    pub async fn set_sound(&self, path: &str, name: &str) -> Result<SoundState> {
        let body = SetSoundRequest {
            path: path.to_string(),
            name: name.to_string(),
        };
        self.send(self.http.put(self.url("/sound")).json(&body)).await
    }

    pub async fn clear_sound(&self) -> Result<SoundState> {
        self.send(self.http.delete(self.url("/sound"))).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("decoding response");
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{}: {}", status, body.error),
        Err(_) => bail!("{}: {}", status, text),
    }
}

//! Slack Web API chat client
//!
//! `POST {base_url}/chat.postMessage` with a bearer token. A send succeeds
//! only on HTTP 2xx with `"ok": true`.

use crate::config::{ChatSettings, Secret};
use crate::dispatch::{ChatClient, ChatError};
use crate::render::{Block, RenderedMessage};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: &'a [Block],
}

#[derive(Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

pub struct SlackClient {
    http: reqwest::Client,
    endpoint: String,
    token: Secret,
}

impl SlackClient {
    pub fn new(settings: &ChatSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .context("Failed to build chat HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat.postMessage", settings.base_url.trim_end_matches('/')),
            token: settings.token.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn transport_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::new("timeout", err.to_string())
    } else {
        ChatError::new("transport", err.to_string())
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post(&self, destination_id: &str, message: &RenderedMessage) -> Result<(), ChatError> {
        let request = PostMessageRequest {
            channel: destination_id,
            text: &message.text,
            blocks: &message.blocks,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.token.expose())
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ChatError::new(format!("http_{}", status.as_u16()), body));
        }

        let parsed: PostMessageResponse = serde_json::from_str(&body)
            .map_err(|e| ChatError::new("invalid_response", format!("{}: {}", e, body)))?;

        if !parsed.ok {
            let code = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(ChatError::new(code, body));
        }

        debug!(
            destination = destination_id,
            ts = parsed.ts.as_deref().unwrap_or("-"),
            "Chat API accepted message"
        );
        Ok(())
    }
}

/// Live-event discovery against the remote search API.
///
/// One GET per channel per cycle. The request URL for each channel is built by
/// the reload coordinator ([`build_query`]) so a malformed base URL is caught
/// as a fatal config error rather than a per-cycle failure.
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::Channel;
use crate::event::LiveEvent;

/// Prepared request for one channel.
#[derive(Debug, Clone)]
pub struct ChannelQuery {
    pub channel: Channel,
    pub url: Url,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("cannot read response body: {0}")]
    Read(#[source] reqwest::Error),
    #[error("cannot parse response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Source of live items for a channel.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn search_live(&self, query: &ChannelQuery) -> Result<Vec<LiveItem>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<LiveItem>,
}

/// One entry of the response's `items` array.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveItem {
    pub id: LiveItemId,
    #[serde(default)]
    pub snippet: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveItemId {
    #[serde(rename = "videoId")]
    pub video_id: String,
}

impl LiveItem {
    pub fn into_event(self, channel: &Channel) -> LiveEvent {
        LiveEvent {
            event_id: self.id.video_id,
            channel: channel.clone(),
            metadata: self.snippet,
        }
    }
}

/// Builds the search URL for `channel` on top of `api_url`.
pub fn build_query(api_url: &str, channel: &Channel, api_key: &str) -> anyhow::Result<Url> {
    let url = Url::parse_with_params(
        api_url,
        &[
            ("part", "snippet"),
            ("channelId", channel.id.as_str()),
            ("type", "video"),
            ("eventType", "live"),
            ("key", api_key),
        ],
    )
    .with_context(|| format!("Cannot build discovery request for channel {}", channel.id))?;
    Ok(url)
}

/// Decodes a search response body into its items, in response order.
pub fn parse_response(body: &[u8]) -> Result<Vec<LiveItem>, DiscoveryError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response.items)
}

/// [`Discovery`] over HTTP.
pub struct HttpDiscovery {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpDiscovery {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn search_live(&self, query: &ChannelQuery) -> Result<Vec<LiveItem>, DiscoveryError> {
        let response = self
            .client
            .get(query.url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(DiscoveryError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status(status));
        }

        let body = response.bytes().await.map_err(DiscoveryError::Read)?;
        parse_response(&body)
    }
}

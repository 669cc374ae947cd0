//! Stage status delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{http_client, post_json};
use crate::config::StatusConfig;
use crate::error::{Result, SphinxError};
use crate::flow::{NodeId, UiHint};

/// Notification emitted every time the flow enters a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub node: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_hint: Option<UiHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StatusUpdate {
    /// `"Stage <node> active"` update for `node`.
    pub fn stage_active(node: NodeId) -> Self {
        Self {
            status: format!("Stage {node} active"),
            node,
            identifier: None,
            ui_hint: None,
            data: None,
        }
    }

    pub fn with_identifier(mut self, identifier: Option<String>) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_ui_hint(mut self, hint: Option<UiHint>) -> Self {
        self.ui_hint = hint;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Receives stage updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// # Errors
    ///
    /// `SphinxError::Transport` or `SphinxError::Channel` when delivery
    /// failed. Callers treat this as non-fatal.
    async fn deliver(&self, update: &StatusUpdate) -> Result<()>;
}

/// Discards every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

#[async_trait]
impl StatusSink for NullStatusSink {
    async fn deliver(&self, _update: &StatusUpdate) -> Result<()> {
        Ok(())
    }
}

/// Fans updates out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastStatusSink {
    tx: broadcast::Sender<StatusUpdate>,
}

impl BroadcastStatusSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StatusSink for BroadcastStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> Result<()> {
        if self.tx.send(update.clone()).is_err() {
            tracing::debug!(node = %update.node, "no status subscribers");
        }
        Ok(())
    }
}

/// POSTs each update as JSON to a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStatusSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| SphinxError::Config(format!("status endpoint `{endpoint}`: {e}")))?;
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &StatusConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, Duration::from_millis(config.timeout_ms)))
            .transpose()
    }
}

#[async_trait]
impl StatusSink for HttpStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> Result<()> {
        post_json(&self.client, &self.endpoint, update).await
    }
}

/// Delivers to every inner sink; reports the first failure after trying all.
#[derive(Clone, Default)]
pub struct CompositeStatusSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl CompositeStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl StatusSink for CompositeStatusSink {
    async fn deliver(&self, update: &StatusUpdate) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(update).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

//! Video trigger and guide help requests.
//!
//! Both talk to the same installation service: `/trigger_video` starts the
//! participant's destiny video at the end of the flow, `/needs_help` lights
//! the guide's help indicator for a stage.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{http_client, join_url, post_json};
use crate::config::VideoConfig;
use crate::emotion::EmotionScore;
use crate::error::{Result, SphinxError};
use crate::flow::SessionState;

/// Payload of the completion trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoRequest {
    pub name: String,
    pub challenge_point: String,
    pub envi_state: String,
    pub emotions: BTreeMap<String, f32>,
}

impl VideoRequest {
    /// Built from a completed session.
    ///
    /// # Errors
    ///
    /// `SphinxError::StateInvariant` if the challenge or empowered state was
    /// never captured.
    pub fn from_state(state: &SessionState) -> Result<Self> {
        let challenge_point = state.challenge.clone().ok_or_else(|| {
            SphinxError::StateInvariant("video trigger without a challenge".into())
        })?;
        let envi_state = state.empowered_state.clone().ok_or_else(|| {
            SphinxError::StateInvariant("video trigger without an empowered state".into())
        })?;
        Ok(Self {
            name: state.user_name.clone().unwrap_or_default(),
            challenge_point,
            envi_state,
            emotions: emotion_map(state.combined_emotions()),
        })
    }
}

fn emotion_map(scores: &[EmotionScore]) -> BTreeMap<String, f32> {
    scores.iter().map(|s| (s.name.clone(), s.score)).collect()
}

#[derive(Debug, Serialize)]
struct HelpRequest<'a> {
    user: &'a str,
    needs_help: bool,
}

/// Starts the completion video.
#[async_trait]
pub trait VideoTrigger: Send + Sync {
    /// # Errors
    ///
    /// `SphinxError::Transport` on delivery failure.
    async fn trigger(&self, request: &VideoRequest) -> Result<()>;
}

/// Raises or clears a guide's help request for a stage.
#[async_trait]
pub trait GuideNotifier: Send + Sync {
    /// # Errors
    ///
    /// `SphinxError::Transport` on delivery failure.
    async fn request_help(&self, stage: &str, needs_help: bool) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullVideoTrigger;

#[async_trait]
impl VideoTrigger for NullVideoTrigger {
    async fn trigger(&self, _request: &VideoRequest) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullGuideNotifier;

#[async_trait]
impl GuideNotifier for NullGuideNotifier {
    async fn request_help(&self, _stage: &str, _needs_help: bool) -> Result<()> {
        Ok(())
    }
}

/// HTTP client for the installation's video service.
#[derive(Debug, Clone)]
pub struct VideoTriggerClient {
    client: reqwest::Client,
    base: String,
}

impl VideoTriggerClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = base.into();
        url::Url::parse(&base)
            .map_err(|e| SphinxError::Config(format!("video endpoint `{base}`: {e}")))?;
        Ok(Self {
            client: http_client(timeout)?,
            base,
        })
    }

    /// `None` when no endpoint is configured.
    pub fn from_config(config: &VideoConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|base| Self::new(base, Duration::from_millis(config.timeout_ms)))
            .transpose()
    }
}

#[async_trait]
impl VideoTrigger for VideoTriggerClient {
    async fn trigger(&self, request: &VideoRequest) -> Result<()> {
        tracing::info!(
            challenge = %request.challenge_point,
            empowered_state = %request.envi_state,
            "triggering video"
        );
        post_json(&self.client, &join_url(&self.base, "trigger_video"), request).await
    }
}

#[async_trait]
impl GuideNotifier for VideoTriggerClient {
    async fn request_help(&self, stage: &str, needs_help: bool) -> Result<()> {
        let body = HelpRequest {
            user: stage,
            needs_help,
        };
        post_json(&self.client, &join_url(&self.base, "needs_help"), &body).await
    }
}

//! Configuration types for the sphinx dialogue engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SphinxError;

/// Top-level configuration for a sphinx installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SphinxConfig {
    /// Streaming emotion inference settings.
    pub emotion: EmotionConfig,
    /// Conversation flow settings.
    pub flow: FlowConfig,
    /// Stage status delivery.
    pub status: StatusConfig,
    /// Video-trigger collaborator (also serves guide help requests).
    pub video: VideoConfig,
}

/// Streaming emotion inference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Whether emotion inference runs at all. When disabled, utterances are
    /// still marked fully processed (with an empty summary).
    pub enabled: bool,
    /// WebSocket endpoint of the streaming inference service.
    pub endpoint: String,
    /// Environment variable that holds the API key.
    pub api_key_env: String,
    /// Inline API key (takes precedence over `api_key_env`).
    pub api_key: Option<String>,
    /// Input audio sample rate in Hz (mono, 16-bit PCM).
    pub sample_rate: u32,
    /// Audio accumulated before a segment is submitted, in ms.
    pub buffer_threshold_ms: u32,
    /// Exponential smoothing constant in (0, 1]: weight of the newest sample.
    pub alpha: f32,
    /// Multiplier applied to labels reported by only one modality.
    pub single_source_penalty: f32,
    /// Number of top-ranked labels included in the summary.
    pub summary_top_n: usize,
    /// Per-request response timeout in ms.
    pub response_timeout_ms: u64,
    /// Bounded wait on the data-available signal per buffer check, in ms.
    pub buffer_poll_ms: u64,
    /// How long fusion waits for the second modality after the prosody
    /// flush before proceeding with one, in ms.
    pub modality_wait_ms: u64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "wss://api.hume.ai/v0/stream/models".to_owned(),
            api_key_env: "HUME_API_KEY".to_owned(),
            api_key: None,
            sample_rate: 16_000,
            buffer_threshold_ms: 500,
            alpha: 0.7,
            single_source_penalty: 0.7,
            summary_top_n: 3,
            response_timeout_ms: 3_000,
            buffer_poll_ms: 300,
            modality_wait_ms: 4_000,
        }
    }
}

impl EmotionConfig {
    /// Bytes of 16-bit mono PCM that make up one submission segment.
    pub fn buffer_threshold_bytes(&self) -> usize {
        (self.sample_rate as usize * self.buffer_threshold_ms as usize / 1000) * 2
    }

    /// Per-request response timeout.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Bounded wait per buffer check.
    pub fn buffer_poll(&self) -> Duration {
        Duration::from_millis(self.buffer_poll_ms)
    }

    /// Wait for the second modality before fusing with one.
    pub fn modality_wait(&self) -> Duration {
        Duration::from_millis(self.modality_wait_ms)
    }

    /// Resolve the API key from the inline value or the configured
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns `SphinxError::Config` if neither is set.
    pub fn resolve_api_key(&self) -> crate::error::Result<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_owned());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SphinxError::Config(format!(
                    "emotion API key not set (checked `emotion.api_key` and ${})",
                    self.api_key_env
                ))
            })
    }
}

/// Conversation flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Failed recognitions at a node before control escalates to a guide.
    pub escalation_threshold: u32,
    /// Cap on the wait for emotions to be fully processed, in seconds.
    pub emotion_wait_cap_secs: u64,
    /// Name the assistant uses for itself in role prompts.
    pub assistant_name: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 2,
            emotion_wait_cap_secs: 60,
            assistant_name: "Sphinx".to_owned(),
        }
    }
}

impl FlowConfig {
    /// Cap on the emotion wait as a [`Duration`].
    pub fn emotion_wait_cap(&self) -> Duration {
        Duration::from_secs(self.emotion_wait_cap_secs)
    }
}

/// Stage status delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// HTTP endpoint receiving status updates (None = in-process only).
    pub endpoint: Option<String>,
    /// Bot identifier included with each update.
    pub identifier: Option<String>,
    /// Station label of this installation.
    pub station_name: String,
    /// Delivery timeout in ms.
    pub timeout_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            identifier: None,
            station_name: "Unknown Station".to_owned(),
            timeout_ms: 2_000,
        }
    }
}

/// Video-trigger collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Base URL of the video-trigger service, e.g. `http://localhost:8000`.
    pub endpoint: Option<String>,
    /// Request timeout in ms.
    pub timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5_000,
        }
    }
}

impl SphinxConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| SphinxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SphinxError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/sphinx/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/sphinx-config"))
            .join("sphinx")
            .join("config.toml")
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `SphinxError::Config` describing the first invalid field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let e = &self.emotion;
        if !(e.alpha > 0.0 && e.alpha <= 1.0) {
            return Err(SphinxError::Config(format!(
                "emotion.alpha must be in (0, 1], got {}",
                e.alpha
            )));
        }
        if !(0.0..=1.0).contains(&e.single_source_penalty) {
            return Err(SphinxError::Config(format!(
                "emotion.single_source_penalty must be in [0, 1], got {}",
                e.single_source_penalty
            )));
        }
        if e.sample_rate == 0 || e.buffer_threshold_ms == 0 {
            return Err(SphinxError::Config(
                "emotion.sample_rate and emotion.buffer_threshold_ms must be non-zero".into(),
            ));
        }
        if e.summary_top_n == 0 {
            return Err(SphinxError::Config(
                "emotion.summary_top_n must be at least 1".into(),
            ));
        }
        if self.flow.escalation_threshold == 0 {
            return Err(SphinxError::Config(
                "flow.escalation_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

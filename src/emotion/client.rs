//! WebSocket client for the streaming emotion-inference service.
//!
//! One connection per modality. Each submission is a strict
//! request/response exchange guarded by a timeout; a connection that timed
//! out or failed is discarded and re-opened on the next submission, so a
//! late frame is never read as the answer to a newer request.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::{audio_request, parse_response, text_request};
use super::wav::encode_segment;
use super::{EmotionScore, Modality};
use crate::config::EmotionConfig;
use crate::error::{Result, SphinxError};

/// Header carrying the service API key.
const API_KEY_HEADER: &str = "X-Hume-Api-Key";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Scoring backend used by the emotion observer.
///
/// The observer task owns its model exclusively and calls it sequentially,
/// hence `&mut self`.
#[async_trait]
pub trait EmotionModel: Send + Sync {
    /// Score one raw PCM segment for prosody. Returns one batch per
    /// prediction, in the order the service reported them.
    async fn submit_audio_segment(&mut self, pcm: &[u8]) -> Result<Vec<Vec<EmotionScore>>>;

    /// Score a complete transcribed passage for language emotion.
    async fn submit_text(&mut self, text: &str) -> Result<Vec<EmotionScore>>;

    /// Close any open connections. Further submissions may reconnect.
    async fn close(&mut self);
}

/// Production [`EmotionModel`] backed by two WebSocket connections.
pub struct EmotionStreamClient {
    prosody: ModelConnection,
    language: ModelConnection,
    sample_rate: u32,
}

impl EmotionStreamClient {
    /// Open both model connections.
    ///
    /// # Errors
    ///
    /// Returns `SphinxError::Config` for a missing key or invalid endpoint,
    /// and `SphinxError::Transport` if either connection cannot be opened.
    pub async fn connect(config: &EmotionConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let endpoint = url::Url::parse(&config.endpoint)
            .map_err(|e| SphinxError::Config(format!("emotion.endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(SphinxError::Config(format!(
                "emotion.endpoint must be ws:// or wss://, got {endpoint}"
            )));
        }

        let mut prosody = ModelConnection::new(
            Modality::Prosody,
            endpoint.to_string(),
            api_key.clone(),
            config.response_timeout(),
        );
        let mut language = ModelConnection::new(
            Modality::Language,
            endpoint.to_string(),
            api_key,
            config.response_timeout(),
        );
        prosody.ensure_open().await?;
        language.ensure_open().await?;
        tracing::info!(endpoint = %endpoint, "emotion service connected");

        Ok(Self {
            prosody,
            language,
            sample_rate: config.sample_rate,
        })
    }
}

#[async_trait]
impl EmotionModel for EmotionStreamClient {
    async fn submit_audio_segment(&mut self, pcm: &[u8]) -> Result<Vec<Vec<EmotionScore>>> {
        if pcm.len() < 2 {
            return Ok(Vec::new());
        }
        let payload = audio_request(&encode_segment(pcm, self.sample_rate)?)?;
        let frame = self.prosody.request(payload).await?;
        parse_response(&frame, Modality::Prosody)
    }

    async fn submit_text(&mut self, text: &str) -> Result<Vec<EmotionScore>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let frame = self.language.request(text_request(text)?).await?;
        Ok(parse_response(&frame, Modality::Language)?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn close(&mut self) {
        self.prosody.close().await;
        self.language.close().await;
    }
}

// ---------------------------------------------------------------------------
// Single-model connection
// ---------------------------------------------------------------------------

struct ModelConnection {
    modality: Modality,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    stream: Option<WsStream>,
}

impl ModelConnection {
    fn new(modality: Modality, endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self {
            modality,
            endpoint,
            api_key,
            timeout,
            stream: None,
        }
    }

    async fn ensure_open(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.open().await?);
        }
        Ok(())
    }

    async fn open(&self) -> Result<WsStream> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SphinxError::Config(format!("emotion.endpoint: {e}")))?;
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| SphinxError::Config(format!("emotion API key: {e}")))?;
        request.headers_mut().insert(API_KEY_HEADER, key);

        let (stream, _) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| {
                SphinxError::Transport(format!("{} connect timed out", self.modality.model_key()))
            })?
            .map_err(|e| {
                SphinxError::Transport(format!("{} connect: {e}", self.modality.model_key()))
            })?;
        tracing::debug!(modality = ?self.modality, "emotion model connection opened");
        Ok(stream)
    }

    async fn request(&mut self, payload: String) -> Result<String> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        match tokio::time::timeout(self.timeout, exchange(&mut stream, payload)).await {
            Ok(Ok(frame)) => {
                self.stream = Some(stream);
                Ok(frame)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SphinxError::Transport(format!(
                "{} response timed out after {:?}",
                self.modality.model_key(),
                self.timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take()
            && let Err(e) = stream.close(None).await
        {
            tracing::debug!(
                modality = ?self.modality,
                error = %e,
                "emotion connection close failed"
            );
        }
    }
}

/// Send one request frame and wait for the next text frame.
async fn exchange(stream: &mut WsStream, payload: String) -> Result<String> {
    stream
        .send(Message::Text(payload))
        .await
        .map_err(|e| SphinxError::Transport(format!("send: {e}")))?;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SphinxError::Transport("connection closed by server".into()));
            }
            Some(Err(e)) => return Err(SphinxError::Transport(format!("read: {e}"))),
            _ => {} // Binary, Ping/Pong frames handled by tungstenite.
        }
    }
}

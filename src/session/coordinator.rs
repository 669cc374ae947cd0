//! Session driver: wires the flow manager, the emotion observer and the
//! outbound sinks, and consumes host commands until the session ends.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::messages::{SessionCommand, SessionEvent, SessionExit, SessionReport};
use crate::config::SphinxConfig;
use crate::emotion::{
    EmotionGate, EmotionModel, EmotionObserver, EmotionObserverHandle, EmotionStreamClient,
};
use crate::error::{Result, SphinxError};
use crate::flow::{FlowManager, sphinx_registry};
use crate::sinks::{
    CompositeStatusSink, GuideNotifier, HttpStatusSink, NullGuideNotifier, NullVideoTrigger,
    StatusSink, VideoRequest, VideoTrigger, VideoTriggerClient,
};

const EVENT_CAPACITY: usize = 64;

/// One participant's conversation.
pub struct Session {
    id: Uuid,
    config: SphinxConfig,
    status: CompositeStatusSink,
    guide: Arc<dyn GuideNotifier>,
    video: Arc<dyn VideoTrigger>,
    model: Option<Box<dyn EmotionModel>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl Session {
    /// A session with no outbound sinks. Emotion inference connects on
    /// [`run`](Self::run) when enabled in `config`.
    pub fn new(config: SphinxConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            config,
            status: CompositeStatusSink::new(),
            guide: Arc::new(NullGuideNotifier),
            video: Arc::new(NullVideoTrigger),
            model: None,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// A session with the HTTP collaborators named in `config`.
    ///
    /// # Errors
    ///
    /// `SphinxError::Config` for malformed endpoints.
    pub fn from_config(config: SphinxConfig) -> Result<Self> {
        let http_status = HttpStatusSink::from_config(&config.status)?;
        let video = VideoTriggerClient::from_config(&config.video)?;
        let mut session = Self::new(config);
        if let Some(sink) = http_status {
            session = session.with_status_sink(Arc::new(sink));
        }
        if let Some(client) = video {
            let client = Arc::new(client);
            session = session
                .with_guide_notifier(client.clone())
                .with_video_trigger(client);
        }
        Ok(session)
    }

    /// Add a status sink. Every sink receives every update.
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = self.status.with(sink);
        self
    }

    pub fn with_guide_notifier(mut self, guide: Arc<dyn GuideNotifier>) -> Self {
        self.guide = guide;
        self
    }

    pub fn with_video_trigger(mut self, video: Arc<dyn VideoTrigger>) -> Self {
        self.video = video;
        self
    }

    /// Use `model` instead of connecting to the configured endpoint.
    pub fn with_emotion_model(mut self, model: Box<dyn EmotionModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Cancelling this token ends the session with the normal teardown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn start_observer(&mut self) -> Option<EmotionObserverHandle> {
        let emotion = &self.config.emotion;
        if let Some(model) = self.model.take() {
            return Some(EmotionObserver::spawn(model, emotion));
        }
        if !emotion.enabled {
            tracing::info!("emotion inference disabled");
            return None;
        }
        match EmotionStreamClient::connect(emotion).await {
            Ok(client) => Some(EmotionObserver::spawn(Box::new(client), emotion)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "emotion service unavailable; continuing without emotions"
                );
                None
            }
        }
    }

    /// Drive the session until the flow completes, an `end` command
    /// arrives, the command channel closes, or the session is cancelled.
    ///
    /// Every exit runs the same teardown: the emotion observer is stopped
    /// and its queues discarded, while the flow state is kept for the
    /// report.
    ///
    /// # Errors
    ///
    /// Genuine faults only (a failing handler or broken script wiring).
    pub async fn run(self, commands: mpsc::Receiver<SessionCommand>) -> Result<SessionReport> {
        let span = tracing::info_span!("session", id = %self.id);
        self.run_inner(commands).instrument(span).await
    }

    async fn run_inner(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Result<SessionReport> {
        let started_at = Utc::now();
        let observer = self.start_observer().await;
        let gate = observer
            .as_ref()
            .map_or_else(EmotionGate::ready, EmotionObserverHandle::gate);

        let registry = sphinx_registry(&self.config.flow);
        let mut flow = FlowManager::new(registry, self.config.flow.clone())
            .with_emotions(gate)
            .with_status_sink(Arc::new(self.status.clone()))
            .with_guide_notifier(Arc::clone(&self.guide))
            .with_identifier(
                self.config
                    .status
                    .identifier
                    .clone()
                    .or_else(|| Some(self.config.status.station_name.clone())),
            );

        let driven = self.drive(&mut flow, observer.as_ref(), &mut commands).await;

        if let Some(observer) = &observer {
            observer.stop().await;
        }
        commands.close();

        let exit = match driven {
            Ok(exit) => exit,
            Err(e) if e.is_termination() => SessionExit::Cancelled,
            Err(e) => {
                tracing::error!(error = %e, "session fault");
                return Err(e);
            }
        };

        let completed = flow.is_finished();
        if completed {
            self.trigger_video(&flow);
        }
        let report = SessionReport {
            session_id: self.id,
            started_at,
            finished_at: Utc::now(),
            exit,
            final_node: flow.current_node().ok().map(|n| n.id),
            completed,
            state: flow.into_state(),
        };
        tracing::info!(exit = ?report.exit, completed, "session finished");
        self.emit(SessionEvent::Finished(report.clone()));
        Ok(report)
    }

    async fn drive(
        &self,
        flow: &mut FlowManager,
        observer: Option<&EmotionObserverHandle>,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Result<SessionExit> {
        flow.initialize().await?;
        self.emit(SessionEvent::Turn(flow.dialogue_turn()?));

        let mut queued: VecDeque<(String, Value)> = VecDeque::new();
        let mut disconnected = false;

        loop {
            if flow.is_finished() {
                return Ok(SessionExit::Completed);
            }

            let (name, arguments) = match queued.pop_front() {
                Some(intent) => intent,
                None if disconnected => return Ok(SessionExit::Disconnected),
                None => {
                    let command = tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(SphinxError::SessionTerminated),
                        command = commands.recv() => command,
                    };
                    match command {
                        None => return Ok(SessionExit::Disconnected),
                        Some(SessionCommand::End) => return Ok(SessionExit::Ended),
                        Some(SessionCommand::Intent { name, arguments }) => (name, arguments),
                        Some(other) => {
                            forward(observer, other).await;
                            continue;
                        }
                    }
                }
            };

            // Audio and speech markers keep flowing to the observer while a
            // handler waits on emotions. Intents arriving meanwhile queue up.
            let outcome = {
                let turn = flow.handle_intent(&name, arguments);
                tokio::pin!(turn);
                loop {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(SphinxError::SessionTerminated),
                        outcome = &mut turn => break outcome?,
                        command = commands.recv(), if !disconnected => match command {
                            None => disconnected = true,
                            Some(SessionCommand::End) => return Ok(SessionExit::Ended),
                            Some(SessionCommand::Intent { name, arguments }) => {
                                queued.push_back((name, arguments));
                            }
                            Some(other) => forward(observer, other).await,
                        },
                    }
                }
            };

            self.emit(SessionEvent::Outcome(outcome));
            self.emit(SessionEvent::Turn(flow.dialogue_turn()?));
        }
    }

    fn trigger_video(&self, flow: &FlowManager) {
        let request = match VideoRequest::from_state(flow.state()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "video not triggered");
                return;
            }
        };
        let video = Arc::clone(&self.video);
        tokio::spawn(async move {
            if let Err(e) = video.trigger(&request).await {
                tracing::warn!(error = %e, "video trigger failed");
            }
        });
    }
}

async fn forward(observer: Option<&EmotionObserverHandle>, command: SessionCommand) {
    let Some(observer) = observer else {
        return;
    };
    match command {
        SessionCommand::StartedSpeaking => observer.user_started_speaking().await,
        SessionCommand::StoppedSpeaking => observer.user_stopped_speaking().await,
        SessionCommand::Audio { base64 } => match BASE64.decode(base64.as_bytes()) {
            Ok(pcm) => observer.push_audio(pcm).await,
            Err(e) => tracing::warn!(error = %e, "dropping undecodable audio"),
        },
        SessionCommand::Transcript { text } => observer.push_transcript(text).await,
        SessionCommand::BotSpeaking { active: true } => observer.bot_started_speaking(),
        SessionCommand::BotSpeaking { active: false } => observer.bot_stopped_speaking(),
        SessionCommand::Intent { .. } | SessionCommand::End => {}
    }
}

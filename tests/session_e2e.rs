#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end sessions: commands in, emotions scored by a scripted model,
//! report and video trigger out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use sphinx::emotion::{EmotionModel, EmotionScore};
use sphinx::session::SessionExit;
use sphinx::sinks::{VideoRequest, VideoTrigger};
use sphinx::{NodeId, Result, Session, SessionCommand, SessionEvent, SphinxConfig, SphinxError};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Calls {
    audio: AtomicUsize,
    text: AtomicUsize,
    closed: AtomicUsize,
}

/// Scores every segment as Joy then Fear and every passage as Joy and Calm.
struct ScriptedModel {
    calls: Arc<Calls>,
    hang_on_text: bool,
}

#[async_trait]
impl EmotionModel for ScriptedModel {
    async fn submit_audio_segment(&mut self, _pcm: &[u8]) -> Result<Vec<Vec<EmotionScore>>> {
        self.calls.audio.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            vec![EmotionScore::new("Joy", 0.9)],
            vec![EmotionScore::new("Fear", 0.1)],
        ])
    }

    async fn submit_text(&mut self, _text: &str) -> Result<Vec<EmotionScore>> {
        self.calls.text.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_text {
            std::future::pending::<()>().await;
        }
        Ok(vec![
            EmotionScore::new("Joy", 0.5),
            EmotionScore::new("Calm", 0.4),
        ])
    }

    async fn close(&mut self) {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ChannelVideo(mpsc::UnboundedSender<VideoRequest>);

#[async_trait]
impl VideoTrigger for ChannelVideo {
    async fn trigger(&self, request: &VideoRequest) -> Result<()> {
        let _ = self.0.send(request.clone());
        Ok(())
    }
}

fn intent(name: &str, arguments: serde_json::Value) -> SessionCommand {
    SessionCommand::Intent {
        name: name.to_owned(),
        arguments,
    }
}

fn speech(transcript: &str) -> Vec<SessionCommand> {
    // One second of silence at 16 kHz: exactly one segment.
    let pcm = vec![0_u8; 32_000];
    vec![
        SessionCommand::StartedSpeaking,
        SessionCommand::Audio {
            base64: BASE64.encode(&pcm),
        },
        SessionCommand::Transcript {
            text: transcript.to_owned(),
        },
        SessionCommand::StoppedSpeaking,
    ]
}

fn script_until_in_depth() -> Vec<SessionCommand> {
    let mut commands = vec![
        intent("check_for_ready", json!({"user_ready": "ready"})),
        intent("collect_name", json!({"user_name": "Ada"})),
        intent("check_for_ready", json!({"user_ready": "yes"})),
        intent("select_challenge", json!({"challenge": "I'm anxious all the time"})),
        intent("confirm_challenge", json!({"user_input": "yes"})),
    ];
    commands.extend(speech("I am scared that I will fail"));
    commands.push(intent(
        "record_challenge_in_depth",
        json!({"user_challenge_in_depth": "I am scared that I will fail"}),
    ));
    commands
}

fn config() -> SphinxConfig {
    let mut config = SphinxConfig::default();
    config.emotion.buffer_poll_ms = 20;
    config
}

async fn send_all(tx: &mpsc::Sender<SessionCommand>, commands: Vec<SessionCommand>) {
    for command in commands {
        tx.send(command).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_fuses_emotions_and_triggers_video() {
    let calls = Arc::new(Calls::default());
    let (video_tx, mut video_rx) = mpsc::unbounded_channel();
    let session = Session::new(config())
        .with_emotion_model(Box::new(ScriptedModel {
            calls: Arc::clone(&calls),
            hang_on_text: false,
        }))
        .with_video_trigger(Arc::new(ChannelVideo(video_tx)));
    let mut events = session.subscribe();

    let (tx, rx) = mpsc::channel(64);
    let run = tokio::spawn(session.run(rx));

    let mut commands = script_until_in_depth();
    commands.extend([
        intent("confirm_emotions", json!({"user_input": "yes"})),
        intent("select_empowered_state", json!({"empowered_state": "Leadership"})),
        intent("confirm_empowered_state", json!({"user_input": "yeah"})),
    ]);
    send_all(&tx, commands).await;

    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, SessionExit::Completed);
    assert!(report.completed);
    assert_eq!(report.final_node, Some(NodeId::Goodbye));
    assert_eq!(report.state.emotions_summary, "Joy, Calm and Fear");
    assert!(report.state.emotions_fully_processed);

    let combined = report.state.combined_emotions();
    assert_eq!(combined.len(), 3);
    assert!((combined[0].score - 0.45_f32.sqrt()).abs() < 1e-4);

    assert_eq!(calls.audio.load(Ordering::SeqCst), 1);
    assert_eq!(calls.text.load(Ordering::SeqCst), 1);
    assert_eq!(calls.closed.load(Ordering::SeqCst), 1);

    let video = tokio::time::timeout(Duration::from_secs(5), video_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(video.name, "Ada");
    assert_eq!(video.challenge_point, "Fearful / Anxious");
    assert_eq!(video.envi_state, "Leadership");
    assert!(video.emotions.contains_key("Calm"));

    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Finished(r) = event {
            assert_eq!(r.session_id, report.session_id);
            saw_finished = true;
        }
    }
    assert!(saw_finished);
}

#[tokio::test]
async fn speech_during_the_emotion_wait_is_still_scored() {
    let calls = Arc::new(Calls::default());
    let session = Session::new(config()).with_emotion_model(Box::new(ScriptedModel {
        calls: Arc::clone(&calls),
        hang_on_text: false,
    }));
    let (tx, rx) = mpsc::channel(64);
    let run = tokio::spawn(session.run(rx));

    // The in-depth intent arrives first; its handler waits on the speech
    // that follows, and the remaining intents queue up behind it.
    let mut commands = vec![
        intent("check_for_ready", json!({"user_ready": "ready"})),
        intent("collect_name", json!({"user_name": "Ada"})),
        intent("check_for_ready", json!({"user_ready": "yes"})),
        intent("select_challenge", json!({"challenge": "I feel so alone and left out"})),
        intent("confirm_challenge", json!({"user_input": "yes"})),
        intent(
            "record_challenge_in_depth",
            json!({"user_challenge_in_depth": "Nobody asks me along"}),
        ),
        intent("confirm_emotions", json!({"user_input": "yes"})),
        intent("select_empowered_state", json!({"empowered_state": "trusting others"})),
    ];
    commands.extend(speech("Nobody asks me along"));
    commands.push(intent("confirm_empowered_state", json!({"user_input": "yes"})));
    send_all(&tx, commands).await;

    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, SessionExit::Completed);
    assert_eq!(report.state.challenge.as_deref(), Some("Excluded"));
    assert_eq!(report.state.empowered_state.as_deref(), Some("Trusting Others"));
    assert_eq!(report.state.emotions_summary, "Joy, Calm and Fear");
    assert!(report.state.emotions_fully_processed);
    assert_eq!(calls.audio.load(Ordering::SeqCst), 1);
    assert_eq!(calls.text.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_language_model_does_not_stall_the_flow() {
    let calls = Arc::new(Calls::default());
    let mut config = config();
    config.flow.emotion_wait_cap_secs = 3;
    config.emotion.modality_wait_ms = 60_000;
    let session = Session::new(config).with_emotion_model(Box::new(ScriptedModel {
        calls: Arc::clone(&calls),
        hang_on_text: true,
    }));

    let mut events = session.subscribe();

    let (tx, rx) = mpsc::channel(64);
    let run = tokio::spawn(session.run(rx));
    send_all(&tx, script_until_in_depth()).await;
    loop {
        if let SessionEvent::Turn(turn) = events.recv().await.unwrap()
            && turn.node == NodeId::ConfirmEmotions
        {
            break;
        }
    }
    send_all(&tx, vec![SessionCommand::End]).await;

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit, SessionExit::Ended);
    assert_eq!(report.final_node, Some(NodeId::ConfirmEmotions));
    assert_eq!(
        report.state.challenge_in_depth.as_deref(),
        Some("I am scared that I will fail")
    );
    assert!(!report.state.emotions_fully_processed);
    // Teardown closed the model even though a request was outstanding.
    assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_emotions_still_complete() {
    let mut config = config();
    config.emotion.enabled = false;
    let session = Session::new(config);
    let (tx, rx) = mpsc::channel(64);
    let run = tokio::spawn(session.run(rx));

    let mut commands = script_until_in_depth();
    commands.extend([
        intent("confirm_emotions", json!({"user_input": "true"})),
        intent("select_empowered_state", json!({"empowered_state": "confident"})),
        intent("confirm_empowered_state", json!({"user_input": "yes"})),
    ]);
    send_all(&tx, commands).await;

    let report = run.await.unwrap().unwrap();
    assert!(report.completed);
    assert_eq!(report.state.emotions_summary, "");
    assert!(report.state.combined_emotions().is_empty());
}

#[tokio::test]
async fn closing_the_channel_disconnects() {
    let mut config = config();
    config.emotion.enabled = false;
    let session = Session::new(config);
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(session.run(rx));
    tx.send(intent("check_for_ready", json!({"user_ready": true})))
        .await
        .unwrap();
    drop(tx);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit, SessionExit::Disconnected);
    assert_eq!(report.final_node, Some(NodeId::CollectName));
}

#[tokio::test]
async fn cancellation_runs_teardown() {
    let calls = Arc::new(Calls::default());
    let session = Session::new(config()).with_emotion_model(Box::new(ScriptedModel {
        calls: Arc::clone(&calls),
        hang_on_text: false,
    }));
    let cancel = session.cancel_token();
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(session.run(rx));

    cancel.cancel();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit, SessionExit::Cancelled);
    assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    drop(tx);
}

#[tokio::test]
async fn unreachable_emotion_service_degrades() {
    let mut config = config();
    config.emotion.endpoint = "ws://127.0.0.1:9/v0/stream/models".into();
    config.emotion.api_key = Some("test-key".into());
    let session = Session::new(config);
    let (tx, rx) = mpsc::channel(8);
    let run = tokio::spawn(session.run(rx));
    tx.send(SessionCommand::End).await.unwrap();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.exit, SessionExit::Ended);
}

#[test]
fn fault_errors_are_not_termination() {
    assert!(!SphinxError::Flow("x".into()).is_termination());
}

//! Messages crossing the session boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::flow::{DialogueTurn, NodeId, SessionState, TurnOutcome};

/// Input to a running session, one per host line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionCommand {
    /// Participant started speaking (voice activity began).
    StartedSpeaking,
    /// Participant stopped speaking.
    StoppedSpeaking,
    /// Raw 16-bit mono PCM, base64 encoded.
    Audio { base64: String },
    /// Final transcript of the participant's speech.
    Transcript { text: String },
    /// The assistant's own speech started or stopped.
    BotSpeaking { active: bool },
    /// An intent recognized by the dialogue-generation service.
    Intent {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    /// End the session now.
    End,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionExit {
    /// The flow reached its terminal node.
    Completed,
    /// An `end` command arrived.
    Ended,
    /// The command channel closed.
    Disconnected,
    /// The session's cancellation token fired.
    Cancelled,
}

/// Post-session export.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit: SessionExit,
    pub final_node: Option<NodeId>,
    pub completed: bool,
    pub state: SessionState,
}

/// Output of a running session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Prompts and intents for the next dialogue turn.
    Turn(DialogueTurn),
    /// Result of the last intent.
    Outcome(TurnOutcome),
    Finished(SessionReport),
}

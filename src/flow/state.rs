//! Typed per-session state owned by the flow manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::node::NodeId;
use crate::emotion::{EmotionScore, EmotionSnapshot};
use crate::error::{Result, SphinxError};

/// Mutation produced by a completed intent handler.
///
/// Handlers never touch [`SessionState`] directly; the manager applies
/// these only after the handler returned.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    UserName(String),
    Challenge(String),
    ChallengeInDepth(String),
    EmpoweredState(String),
    Emotions(EmotionSnapshot),
}

/// Shared conversation state of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    current_node_name: String,
    retry_counts: BTreeMap<String, u32>,
    escalated_from: Option<NodeId>,

    pub user_name: Option<String>,
    pub challenge: Option<String>,
    pub challenge_in_depth: Option<String>,
    pub empowered_state: Option<String>,

    pub prosody_emotions: Vec<EmotionScore>,
    pub language_emotions: Vec<EmotionScore>,
    combined_emotions: Option<Vec<EmotionScore>>,
    pub emotions_summary: String,
    pub emotions_fully_processed: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the active node. Written only by the flow manager.
    pub fn current_node_name(&self) -> &str {
        &self.current_node_name
    }

    pub(crate) fn set_current_node_name(&mut self, name: &str) {
        self.current_node_name = name.to_owned();
    }

    /// Consecutive failed recognitions at `node`.
    pub fn retry_count(&self, node: &str) -> u32 {
        self.retry_counts.get(node).copied().unwrap_or(0)
    }

    pub(crate) fn increment_retry(&mut self, node: &str) -> u32 {
        let count = self.retry_counts.entry(node.to_owned()).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn reset_retry(&mut self, node: &str) {
        self.retry_counts.remove(node);
    }

    /// Node that escalated to guide assistance, if assistance is active.
    pub fn escalated_from(&self) -> Option<NodeId> {
        self.escalated_from
    }

    pub(crate) fn set_escalated_from(&mut self, node: Option<NodeId>) {
        self.escalated_from = node;
    }

    /// Fused emotions of the last utterance.
    ///
    /// # Errors
    ///
    /// `SphinxError::StateInvariant` if fusion has not run yet.
    pub fn try_combined_emotions(&self) -> Result<&[EmotionScore]> {
        self.combined_emotions.as_deref().ok_or_else(|| {
            SphinxError::StateInvariant("combined emotions read before fusion ran".into())
        })
    }

    /// Fused emotions, or an empty list (logged) if fusion has not run.
    pub fn combined_emotions(&self) -> &[EmotionScore] {
        match self.try_combined_emotions() {
            Ok(combined) => combined,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    node = %self.current_node_name,
                    "degrading to empty emotions"
                );
                &[]
            }
        }
    }

    /// Mirror an observer snapshot into the state.
    pub fn apply_snapshot(&mut self, snapshot: &EmotionSnapshot) {
        self.prosody_emotions = snapshot.prosody.clone();
        self.language_emotions = snapshot.language.clone();
        self.combined_emotions = snapshot.combined.clone();
        self.emotions_summary = snapshot.summary.clone();
        self.emotions_fully_processed = snapshot.fully_processed;
    }

    pub fn apply(&mut self, update: StateUpdate) {
        match update {
            StateUpdate::UserName(name) => self.user_name = Some(name),
            StateUpdate::Challenge(challenge) => self.challenge = Some(challenge),
            StateUpdate::ChallengeInDepth(text) => self.challenge_in_depth = Some(text),
            StateUpdate::EmpoweredState(state) => self.empowered_state = Some(state),
            StateUpdate::Emotions(snapshot) => self.apply_snapshot(&snapshot),
        }
    }
}

//! The flow state machine.
//!
//! [`FlowManager`] owns the session state and the active node. It is the
//! only writer of either: handlers return results and state updates, the
//! manager applies them and moves to the next node. Dialogue turns are
//! strictly sequential, so `handle_intent` takes `&mut self`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::escalation::{EscalationDecision, GuideEscalationPolicy, assistance_node};
use super::handler::{HandlerContext, IntentArgs, IntentStatus};
use super::node::{ConversationNode, NodeId, UiHint};
use super::registry::NodeRegistry;
use super::state::SessionState;
use crate::config::FlowConfig;
use crate::emotion::EmotionGate;
use crate::error::{Result, SphinxError};
use crate::sinks::{GuideNotifier, NullGuideNotifier, NullStatusSink, StatusSink, StatusUpdate};

/// What a dialogue turn did to the flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The intent succeeded and the flow moved to `to` (possibly the same node).
    Advanced { from: NodeId, to: NodeId, result: Value },
    /// Input was not recognized; the node is presented again, rephrased.
    Retried { node: NodeId, attempt: u32, message: String },
    /// Retries were exhausted; a guide was asked to help.
    Escalated { blocked: NodeId, attempts: u32 },
}

/// What the dialogue-generation collaborator needs for the next turn.
#[derive(Debug, Clone, Serialize)]
pub struct DialogueTurn {
    pub node: NodeId,
    pub system_prompt: String,
    pub task_prompt: String,
    /// Function schemas of the only intents valid this turn.
    pub intents: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hint: Option<UiHint>,
}

pub struct FlowManager {
    registry: NodeRegistry,
    state: SessionState,
    current: Option<ConversationNode>,
    policy: GuideEscalationPolicy,
    config: FlowConfig,
    emotions: EmotionGate,
    status: Arc<dyn StatusSink>,
    guide: Arc<dyn GuideNotifier>,
    identifier: Option<String>,
}

impl FlowManager {
    /// A manager with no emotion pipeline and no outbound sinks.
    pub fn new(registry: NodeRegistry, config: FlowConfig) -> Self {
        Self {
            registry,
            state: SessionState::new(),
            current: None,
            policy: GuideEscalationPolicy::from_config(&config),
            config,
            emotions: EmotionGate::ready(),
            status: Arc::new(NullStatusSink),
            guide: Arc::new(NullGuideNotifier),
            identifier: None,
        }
    }

    pub fn with_emotions(mut self, gate: EmotionGate) -> Self {
        self.emotions = gate;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = sink;
        self
    }

    pub fn with_guide_notifier(mut self, guide: Arc<dyn GuideNotifier>) -> Self {
        self.guide = guide;
        self
    }

    /// Identifier attached to every status update.
    pub fn with_identifier(mut self, identifier: Option<String>) -> Self {
        self.identifier = identifier;
        self
    }

    /// Enter the registry's initial node.
    ///
    /// # Errors
    ///
    /// `SphinxError::Flow` if the initial node has no factory.
    pub async fn initialize(&mut self) -> Result<()> {
        self.enter(self.registry.initial()).await
    }

    /// Make `node` the active node and announce it.
    ///
    /// Its intents become the only recognizable operations. The exported
    /// state carries the latest emotion snapshot. Status delivery failures
    /// are logged and otherwise ignored.
    pub async fn set_node(&mut self, node: ConversationNode) {
        tracing::info!(node = %node.id, intents = node.intents.len(), "entering node");
        self.state.set_current_node_name(node.name());
        self.sync_emotions();

        let mut update = StatusUpdate::stage_active(node.id)
            .with_identifier(self.identifier.clone())
            .with_ui_hint(node.ui_hint.clone());
        match serde_json::to_value(&self.state) {
            Ok(data) => update = update.with_data(data),
            Err(e) => tracing::warn!(error = %e, "could not export state for status update"),
        }
        self.current = Some(node);

        if let Err(e) = self.status.deliver(&update).await {
            tracing::warn!(node = %update.node, error = %e, "status delivery failed");
        }
    }

    /// Mirror the observer's latest snapshot into the state, so a new
    /// utterance reads as not yet processed.
    fn sync_emotions(&mut self) {
        self.state.apply_snapshot(&self.emotions.latest());
    }

    /// Build `id` from the current state and make it active.
    ///
    /// # Errors
    ///
    /// `SphinxError::Flow` if `id` is not registered, or if guide assistance
    /// is requested while nothing is escalated.
    pub async fn enter(&mut self, id: NodeId) -> Result<()> {
        let node = self.build(id)?;
        self.set_node(node).await;
        Ok(())
    }

    fn build(&self, id: NodeId) -> Result<ConversationNode> {
        if id != NodeId::GuideAssistance {
            return self.registry.build(id, &self.state);
        }
        let blocked = self.state.escalated_from().ok_or_else(|| {
            SphinxError::Flow("guide assistance entered without an escalated node".into())
        })?;
        Ok(assistance_node(&self.registry.build(blocked, &self.state)?))
    }

    /// Run one recognized intent against the active node.
    ///
    /// # Errors
    ///
    /// Only genuine faults: a handler `Err`, an unregistered transition
    /// target, a call before [`initialize`](Self::initialize) or after the
    /// flow finished. State is untouched when a handler fails.
    pub async fn handle_intent(&mut self, name: &str, arguments: Value) -> Result<TurnOutcome> {
        let node = self
            .current
            .clone()
            .ok_or_else(|| SphinxError::Flow("flow not initialized".into()))?;
        if node.is_terminal() {
            return Err(SphinxError::Flow(format!(
                "flow finished at `{}`; intent `{name}` ignored",
                node.id
            )));
        }

        let Some(intent) = node.intent(name).cloned() else {
            let message = format!("intent `{name}` is not available at `{}`", node.id);
            return self.on_mismatch(&node, message).await;
        };
        let args = match IntentArgs::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return self.on_mismatch(&node, e.to_string()).await,
        };

        tracing::debug!(node = %node.id, intent = name, "handling intent");
        let mut result = {
            let ctx = HandlerContext {
                state: &self.state,
                emotions: &self.emotions,
                config: &self.config,
            };
            intent.handler.handle(&args, &ctx).await.inspect_err(|e| {
                tracing::error!(
                    node = %node.id,
                    intent = name,
                    error = %e,
                    "intent handler failed"
                );
            })?
        };

        if let IntentStatus::Error { message } = &result.status {
            let message = message.clone();
            return self.on_mismatch(&node, message).await;
        }

        for update in std::mem::take(&mut result.updates) {
            self.state.apply(update);
        }
        self.policy.record_success(&mut self.state, node.id);
        if node.id == NodeId::GuideAssistance
            && let Some(blocked) = self.state.escalated_from()
        {
            tracing::info!(node = %blocked, "guide assistance resolved");
            self.state.set_escalated_from(None);
            self.policy.record_success(&mut self.state, blocked);
            self.notify_guide(blocked, false).await;
        }

        let next = intent.transition.resolve(node.id, &self.state, &result);
        self.enter(next).await?;
        Ok(TurnOutcome::Advanced {
            from: node.id,
            to: next,
            result: result.to_json(),
        })
    }

    async fn on_mismatch(
        &mut self,
        node: &ConversationNode,
        message: String,
    ) -> Result<TurnOutcome> {
        let mismatch = SphinxError::RecognitionMismatch(message.clone());
        tracing::debug!(node = %node.id, error = %mismatch, "recognition failed");

        // Already with a guide: keep asking, never escalate again.
        if node.id == NodeId::GuideAssistance {
            let attempt = self.state.increment_retry(node.name());
            let again = self.build(node.id)?.rephrased(attempt);
            self.set_node(again).await;
            return Ok(TurnOutcome::Retried {
                node: node.id,
                attempt,
                message,
            });
        }

        match self.policy.record_failure(&mut self.state, node.id) {
            EscalationDecision::Retry { attempt } => {
                tracing::info!(node = %node.id, attempt, "re-prompting");
                let again = self.build(node.id)?.rephrased(attempt);
                self.set_node(again).await;
                Ok(TurnOutcome::Retried {
                    node: node.id,
                    attempt,
                    message,
                })
            }
            EscalationDecision::Escalate { attempts } => {
                tracing::warn!(node = %node.id, attempts, "escalating to guide assistance");
                self.state.set_escalated_from(Some(node.id));
                self.notify_guide(node.id, true).await;
                self.enter(NodeId::GuideAssistance).await?;
                Ok(TurnOutcome::Escalated {
                    blocked: node.id,
                    attempts,
                })
            }
        }
    }

    async fn notify_guide(&self, node: NodeId, needs_help: bool) {
        if let Err(e) = self.guide.request_help(node.stage_label(), needs_help).await {
            tracing::warn!(node = %node, needs_help, error = %e, "guide notification failed");
        }
    }

    /// Prompts and intent schemas for the next dialogue turn.
    ///
    /// # Errors
    ///
    /// `SphinxError::Flow` before [`initialize`](Self::initialize).
    pub fn dialogue_turn(&self) -> Result<DialogueTurn> {
        let node = self.current_node()?;
        Ok(DialogueTurn {
            node: node.id,
            system_prompt: node.role_prompt.clone(),
            task_prompt: node.prompt.clone(),
            intents: node.intent_schemas(),
            ui_hint: node.ui_hint.clone(),
        })
    }

    /// # Errors
    ///
    /// `SphinxError::Flow` before [`initialize`](Self::initialize).
    pub fn current_node(&self) -> Result<&ConversationNode> {
        self.current
            .as_ref()
            .ok_or_else(|| SphinxError::Flow("flow not initialized".into()))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The final state, with the latest emotion snapshot mirrored in.
    pub fn into_state(mut self) -> SessionState {
        self.sync_emotions();
        self.state
    }

    /// The active node is terminal.
    pub fn is_finished(&self) -> bool {
        self.current.as_ref().is_some_and(ConversationNode::is_terminal)
    }
}

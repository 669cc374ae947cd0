//! Bounded retries with hand-off to a human guide.
//!
//! Each failed recognition at a node increments that node's retry counter.
//! Once the counter reaches the configured threshold the flow moves to a
//! guide-assistance node built around the blocked node: the guide can let
//! automatic recognition try again, or type the value directly.

use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{HandlerContext, IntentArgs, IntentHandler, IntentResult};
use super::node::{ConversationNode, Intent, NodeId, Transition, UiHint};
use super::state::SessionState;
use crate::config::FlowConfig;
use crate::error::Result;

/// What to do after a failed recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Re-prompt the same node; `attempt` failures so far.
    Retry { attempt: u32 },
    /// Hand the node to a guide after `attempts` failures.
    Escalate { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct GuideEscalationPolicy {
    threshold: u32,
}

impl GuideEscalationPolicy {
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn from_config(config: &FlowConfig) -> Self {
        Self::new(config.escalation_threshold)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_failure(&self, state: &mut SessionState, node: NodeId) -> EscalationDecision {
        let attempts = state.increment_retry(node.as_str());
        if attempts >= self.threshold {
            EscalationDecision::Escalate { attempts }
        } else {
            EscalationDecision::Retry { attempt: attempts }
        }
    }

    pub fn record_success(&self, state: &mut SessionState, node: NodeId) {
        state.reset_retry(node.as_str());
    }
}

impl Default for GuideEscalationPolicy {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Assistance node
// ---------------------------------------------------------------------------

struct RetryRecognitionHandler;

#[async_trait]
impl IntentHandler for RetryRecognitionHandler {
    async fn handle(&self, _args: &IntentArgs, _ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        Ok(IntentResult::success().with_field("retry", true))
    }
}

/// Feeds a guide-supplied value through the blocked node's own handler so
/// the result has the same shape as automatic recognition.
struct GuideOverrideHandler {
    inner: Arc<dyn IntentHandler>,
    param: String,
}

#[async_trait]
impl IntentHandler for GuideOverrideHandler {
    async fn handle(&self, args: &IntentArgs, ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let Some(value) = args.as_map().get("value") else {
            return Ok(IntentResult::error("guide override needs a `value`"));
        };
        let forwarded = IntentArgs::new().with(&self.param, value.clone());
        let result = self.inner.handle(&forwarded, ctx).await?;
        Ok(result.with_field("guide_override", true))
    }
}

/// Build the assistance node for `blocked`.
pub fn assistance_node(blocked: &ConversationNode) -> ConversationNode {
    let stage = blocked.id.stage_label();
    let mut node = ConversationNode::new(
        NodeId::GuideAssistance,
        blocked.role_prompt.clone(),
        format!(
            "The participant is having difficulty at the {stage} step and a guide has been asked \
             to help. Tell the participant, warmly, that a guide is coming to help them. Wait for \
             the guide: they may ask you to try again, or give you the answer directly.\n\n\
             The step was: {}",
            blocked.prompt
        ),
    )
    .with_intent(
        Intent::new(
            "retry_recognition",
            "The guide asks to try the step again automatically",
            Arc::new(RetryRecognitionHandler),
        )
        .transition(Transition::To(blocked.id)),
    );

    let primary = blocked
        .intents
        .iter()
        .find_map(|i| i.primary_param().map(|p| (i, p)));
    if let Some((intent, param)) = primary {
        let transition = match intent.transition {
            Transition::Stay => Transition::To(blocked.id),
            other => other,
        };
        node = node.with_intent(
            Intent::new(
                "guide_override",
                format!("The guide supplies the value for `{}` directly", param.name),
                Arc::new(GuideOverrideHandler {
                    inner: Arc::clone(&intent.handler),
                    param: param.name.clone(),
                }),
            )
            .param("value", param.kind, &param.description)
            .transition(transition),
        );
    }

    let hint = match &blocked.ui_hint {
        Some(UiHint::List { options, .. }) => UiHint::List {
            prompt: format!("Guide: choose for {stage}"),
            options: options.clone(),
        },
        Some(UiHint::Button { action_text, .. }) => UiHint::Button {
            prompt: format!("Guide: continue {stage}"),
            action_text: action_text.clone(),
        },
        _ => UiHint::TextInput {
            prompt: format!("Guide: enter value for {stage}"),
            placeholder: primary
                .map(|(_, p)| p.description.clone())
                .unwrap_or_default(),
            submit_text: "Submit".into(),
        },
    };
    node.with_ui_hint(hint)
}

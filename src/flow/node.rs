//! Immutable descriptors of dialogue stages.
//!
//! A [`ConversationNode`] is rebuilt by its factory every time the flow
//! enters (or re-enters) a stage, so prompt text always reflects the
//! current session state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::handler::{IntentHandler, IntentResult};
use super::state::SessionState;

/// Identifier of every stage of the guided conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Greeting,
    CollectName,
    ConsiderChallenge,
    SelectChallenge,
    ConfirmChallenge,
    RecordChallengeInDepth,
    ConfirmEmotions,
    IdentifyEmpoweredState,
    ConfirmEmpoweredState,
    Goodbye,
    GuideAssistance,
}

impl NodeId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::CollectName => "collect_name",
            Self::ConsiderChallenge => "consider_challenge",
            Self::SelectChallenge => "select_challenge",
            Self::ConfirmChallenge => "confirm_challenge",
            Self::RecordChallengeInDepth => "record_challenge_in_depth",
            Self::ConfirmEmotions => "confirm_emotions",
            Self::IdentifyEmpoweredState => "identify_empowered_state",
            Self::ConfirmEmpoweredState => "confirm_empowered_state",
            Self::Goodbye => "goodbye",
            Self::GuideAssistance => "guide_assistance",
        }
    }

    /// Human label used when asking a guide for help.
    pub const fn stage_label(self) -> &'static str {
        match self {
            Self::Greeting => "Greeting",
            Self::CollectName => "Name collection",
            Self::ConsiderChallenge => "Challenge consideration",
            Self::SelectChallenge => "Challenge selection",
            Self::ConfirmChallenge => "Challenge confirmation",
            Self::RecordChallengeInDepth => "Challenge in depth",
            Self::ConfirmEmotions => "Emotion confirmation",
            Self::IdentifyEmpoweredState => "Empowered state",
            Self::ConfirmEmpoweredState => "Empowered state confirmation",
            Self::Goodbye => "Goodbye",
            Self::GuideAssistance => "Guide assistance",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type of an intent argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Boolean,
    Number,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Number => "number",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

/// Out-of-band rendering directive for the operator control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiHint {
    Button {
        prompt: String,
        action_text: String,
    },
    List {
        prompt: String,
        options: Vec<String>,
    },
    TextInput {
        prompt: String,
        placeholder: String,
        submit_text: String,
    },
}

/// Computes the next node from the state and the handler result.
pub type TransitionFn = fn(&SessionState, &IntentResult) -> NodeId;

/// Where the flow goes after an intent succeeds.
#[derive(Clone, Copy)]
pub enum Transition {
    /// Re-enter the current node.
    Stay,
    /// Static `transition_to`.
    To(NodeId),
    /// Transition callback.
    Dynamic(TransitionFn),
}

impl Transition {
    pub fn resolve(&self, current: NodeId, state: &SessionState, result: &IntentResult) -> NodeId {
        match self {
            Self::Stay => current,
            Self::To(next) => *next,
            Self::Dynamic(f) => f(state, result),
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stay => f.write_str("Stay"),
            Self::To(node) => write!(f, "To({node})"),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// One operation a node permits the dialogue-generation service to invoke.
#[derive(Clone)]
pub struct Intent {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub handler: Arc<dyn IntentHandler>,
    pub transition: Transition,
}

impl Intent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn IntentHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler,
            transition: Transition::Stay,
        }
    }

    pub fn param(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_owned(),
            kind,
            description: description.to_owned(),
            required: true,
        });
        self
    }

    pub fn optional_param(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_owned(),
            kind,
            description: description.to_owned(),
            required: false,
        });
        self
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    /// First required parameter: the value this intent captures.
    pub fn primary_param(&self) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.required)
    }

    /// Function schema in the `{name, description, parameters}` shape.
    pub fn schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.kind.json_type(), "description": p.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        })
    }
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intent")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("transition", &self.transition)
            .finish_non_exhaustive()
    }
}

/// One stage of the guided dialogue.
#[derive(Debug, Clone)]
pub struct ConversationNode {
    pub id: NodeId,
    /// Persona instructions for the dialogue-generation service.
    pub role_prompt: String,
    /// Stage task instructions.
    pub prompt: String,
    pub intents: Vec<Intent>,
    pub ui_hint: Option<UiHint>,
}

impl ConversationNode {
    pub fn new(id: NodeId, role_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id,
            role_prompt: role_prompt.into(),
            prompt: prompt.into(),
            intents: Vec::new(),
            ui_hint: None,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    pub fn with_ui_hint(mut self, hint: UiHint) -> Self {
        self.ui_hint = Some(hint);
        self
    }

    pub fn name(&self) -> &'static str {
        self.id.as_str()
    }

    pub fn intent(&self, name: &str) -> Option<&Intent> {
        self.intents.iter().find(|i| i.name == name)
    }

    /// Terminal nodes expose no intents.
    pub fn is_terminal(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn intent_schemas(&self) -> Vec<Value> {
        self.intents.iter().map(Intent::schema).collect()
    }

    /// Same stage, with instructions to rephrase after a failed attempt.
    pub fn rephrased(mut self, attempt: u32) -> Self {
        self.prompt = format!(
            "The participant's last answer did not fit this step (attempt {attempt}). \
             Acknowledge what they said, then gently ask again in different words.\n\n{}",
            self.prompt
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Result;
    use crate::flow::handler::{HandlerContext, IntentArgs};

    struct Noop;

    #[async_trait]
    impl IntentHandler for Noop {
        async fn handle(&self, _: &IntentArgs, _: &HandlerContext<'_>) -> Result<IntentResult> {
            Ok(IntentResult::success())
        }
    }

    #[test]
    fn schema_lists_properties_and_required() {
        let intent = Intent::new("collect_name", "Record the user's name.", Arc::new(Noop))
            .param("user_name", ParamKind::String, "The user's name")
            .optional_param("spelled", ParamKind::Boolean, "Spelled out");
        let schema = intent.schema();
        assert_eq!(schema["name"], "collect_name");
        assert_eq!(schema["parameters"]["properties"]["user_name"]["type"], "string");
        assert_eq!(schema["parameters"]["properties"]["spelled"]["type"], "boolean");
        assert_eq!(schema["parameters"]["required"], json!(["user_name"]));
        assert_eq!(intent.primary_param().map(|p| p.name.as_str()), Some("user_name"));
    }

    #[test]
    fn ui_hint_serializes_with_type_tag() {
        let hint = UiHint::List {
            prompt: "Is participant confirming?".into(),
            options: vec!["Yes".into(), "No".into()],
        };
        let json = serde_json::to_value(&hint).unwrap_or_default();
        assert_eq!(json["type"], "list");
        assert_eq!(json["options"][1], "No");
    }

    #[test]
    fn transitions_resolve() {
        let state = SessionState::new();
        let result = IntentResult::success().with_field("confirmed", false);
        let back: TransitionFn = |_, r| {
            if r.field_bool("confirmed") {
                NodeId::Goodbye
            } else {
                NodeId::SelectChallenge
            }
        };
        assert_eq!(
            Transition::Stay.resolve(NodeId::Greeting, &state, &result),
            NodeId::Greeting
        );
        assert_eq!(
            Transition::To(NodeId::CollectName).resolve(NodeId::Greeting, &state, &result),
            NodeId::CollectName
        );
        assert_eq!(
            Transition::Dynamic(back).resolve(NodeId::ConfirmChallenge, &state, &result),
            NodeId::SelectChallenge
        );
    }

    #[test]
    fn terminal_node_and_rephrase() {
        let node = ConversationNode::new(NodeId::Goodbye, "role", "Say goodbye.");
        assert!(node.is_terminal());
        assert_eq!(node.name(), "goodbye");
        let again = node.rephrased(1);
        assert!(again.prompt.ends_with("Say goodbye."));
        assert!(again.prompt.contains("ask again"));
    }

    #[test]
    fn node_id_serde_matches_name() {
        let json = serde_json::to_value(NodeId::RecordChallengeInDepth).unwrap_or_default();
        assert_eq!(json, NodeId::RecordChallengeInDepth.as_str());
    }
}

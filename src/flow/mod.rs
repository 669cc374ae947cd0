//! Node-graph conversation engine.
//!
//! A script is a set of [`ConversationNode`] factories held in a
//! [`NodeRegistry`]. The [`FlowManager`] enters nodes, exposes the active
//! node's intents as the only valid operations for a dialogue turn, runs
//! the matching [`IntentHandler`], applies its state updates and follows
//! the intent's transition. Repeated recognition failures hand the node to
//! a guide through the [`GuideEscalationPolicy`].

pub mod escalation;
pub mod handler;
pub mod manager;
pub mod node;
pub mod registry;
pub mod script;
pub mod state;

pub use escalation::{EscalationDecision, GuideEscalationPolicy, assistance_node};
pub use handler::{HandlerContext, IntentArgs, IntentHandler, IntentResult, IntentStatus};
pub use manager::{DialogueTurn, FlowManager, TurnOutcome};
pub use node::{ConversationNode, Intent, NodeId, ParamKind, ParamSpec, Transition, UiHint};
pub use registry::{NodeFactory, NodeRegistry, ScriptContext};
pub use script::sphinx_registry;
pub use state::{SessionState, StateUpdate};

//! Node factory registry.

use std::collections::HashMap;

use super::node::{ConversationNode, NodeId};
use super::state::SessionState;
use crate::config::FlowConfig;
use crate::error::{Result, SphinxError};

/// Script-wide values available to node factories.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub assistant_name: String,
}

impl ScriptContext {
    pub fn from_config(config: &FlowConfig) -> Self {
        Self {
            assistant_name: config.assistant_name.clone(),
        }
    }
}

/// Pure factory producing a node from the current state.
pub type NodeFactory = fn(&SessionState, &ScriptContext) -> ConversationNode;

/// Maps node identifiers to their factories.
pub struct NodeRegistry {
    factories: HashMap<NodeId, NodeFactory>,
    initial: NodeId,
    context: ScriptContext,
}

impl NodeRegistry {
    pub fn new(initial: NodeId, context: ScriptContext) -> Self {
        Self {
            factories: HashMap::new(),
            initial,
            context,
        }
    }

    /// Register a factory. Replaces any existing factory for `id`.
    pub fn register(&mut self, id: NodeId, factory: NodeFactory) {
        self.factories.insert(id, factory);
    }

    pub fn initial(&self) -> NodeId {
        self.initial
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.factories.contains_key(&id)
    }

    /// Build `id` from the current state.
    ///
    /// # Errors
    ///
    /// `SphinxError::Flow` if no factory is registered for `id`.
    pub fn build(&self, id: NodeId, state: &SessionState) -> Result<ConversationNode> {
        let factory = self
            .factories
            .get(&id)
            .ok_or_else(|| SphinxError::Flow(format!("no factory registered for node `{id}`")))?;
        Ok(factory(state, &self.context))
    }
}

//! Sphinx: a guided voice-conversation engine for an interactive
//! installation.
//!
//! The engine walks a participant through a scripted dialogue (greeting,
//! name, a personal challenge, the emotions felt while describing it, and
//! an empowered future state) while an emotion pipeline scores their voice
//! and words in the background.
//!
//! # Architecture
//!
//! - **Flow** ([`flow`]): a node-graph state machine. Each node exposes the
//!   intents the dialogue-generation service may invoke; handlers produce
//!   results, the [`FlowManager`] applies them and transitions. Repeated
//!   recognition failures escalate to a human guide.
//! - **Emotion** ([`emotion`]): streams audio segments and transcripts to
//!   an emotion-inference service over WebSocket, smooths prosody scores
//!   with an exponential moving average and fuses both modalities into a
//!   ranked summary.
//! - **Sinks** ([`sinks`]): stage status updates, guide help requests and
//!   the completion video trigger.
//! - **Session** ([`session`]): consumes host commands and drives one
//!   participant's conversation from greeting to goodbye.
//! - **Host** ([`host`]): a JSON-lines bridge over stdin / stdout used by
//!   the `sphinx-host` binary.

pub mod config;
pub mod emotion;
pub mod error;
pub mod flow;
pub mod host;
pub mod session;
pub mod sinks;

pub use config::SphinxConfig;
pub use emotion::{EmotionGate, EmotionObserver, EmotionScore, EmotionSnapshot};
pub use error::{Result, SphinxError};
pub use flow::{FlowManager, NodeId, SessionState, TurnOutcome};
pub use session::{Session, SessionCommand, SessionEvent, SessionReport};

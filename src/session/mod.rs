//! One participant's session: command intake, flow driving and teardown.

pub mod coordinator;
pub mod messages;

pub use coordinator::Session;
pub use messages::{SessionCommand, SessionEvent, SessionExit, SessionReport};

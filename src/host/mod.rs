//! Host integration: drives a session over a JSON-lines byte stream.

pub mod stdio;

pub use stdio::{run_bridge, run_stdio_bridge};

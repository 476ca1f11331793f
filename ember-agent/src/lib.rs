//! Ember guest agent
//!
//! Runs inside the microVM, accepts control connections from the host and
//! answers `execute`, `list_files` and `get_file` requests. Connections are
//! served one at a time; each one is a strict request/response loop.

mod actions;
mod config;
mod error;
mod server;

pub use actions::{execute, list_files, read_output_file, resolve_output_path};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use server::GuestAgent;

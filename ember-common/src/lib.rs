//! Ember common - types shared by the host executors and the guest agent
//!
//! The host talks to the in-guest agent over a single stream connection using
//! length-prefixed frames (see [`protocol`]). Request and response bodies are
//! defined in [`messages`].

pub mod listing;
pub mod messages;
pub mod output;
pub mod protocol;

pub use messages::*;
pub use listing::list_output_files;
pub use output::{read_capped, truncate_output, wait_capped, CappedOutput};
pub use protocol::{
    read_control, read_frame_len, read_raw, read_raw_body, skip_raw_body, write_control,
    write_raw, ProtocolError, ProtocolResult, FRAME_HEADER_LEN,
};

/// Guest vsock port the agent listens on.
pub const DEFAULT_AGENT_PORT: u32 = 5000;

/// Directory inside the sandbox whose files are harvested after a run.
pub const GUEST_OUTPUT_DIR: &str = "/tmp/output";

/// Default cap on captured stdout/stderr, per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024;

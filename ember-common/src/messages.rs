//! Control messages exchanged with the guest agent

use serde::{Deserialize, Serialize};

/// Request sent by the host, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Run `code` with a wall-clock limit of `timeout` seconds
    Execute { code: String, timeout: u64 },
    /// Enumerate the files the run left in the output directory
    ListFiles { path: String },
    /// Fetch one file; answered with a raw frame
    GetFile { path: String },
}

impl AgentRequest {
    pub fn action(&self) -> &'static str {
        match self {
            AgentRequest::Execute { .. } => "execute",
            AgentRequest::ListFiles { .. } => "list_files",
            AgentRequest::GetFile { .. } => "get_file",
        }
    }
}

/// Reply to [`AgentRequest::Execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Absent when the process never exited on its own
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

/// One regular file in the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Reply to [`AgentRequest::ListFiles`].
///
/// `entries` repeats `files` with sizes so the host can enforce limits
/// before transferring content; older agents omit it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<FileEntry>,
}

impl ListFilesResponse {
    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        Self {
            files: entries.iter().map(|entry| entry.name.clone()).collect(),
            entries,
        }
    }
}

/// Largest body [`ErrorResponse::from_frame`] will treat as a rejection.
pub const MAX_REJECTION_FRAME: usize = 4096;

/// Failure reply for any action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }

    /// Interpret a frame body as a rejection, if it is one.
    ///
    /// `get_file` answers with a raw frame on success and a control frame on
    /// rejection, and the two share one framing. Only bodies up to
    /// [`MAX_REJECTION_FRAME`] bytes are inspected; a smaller output file whose
    /// content is exactly a `{"success":false,"error":...}` document is still
    /// indistinguishable from a rejection.
    pub fn from_frame(body: &[u8]) -> Option<Self> {
        if body.len() > MAX_REJECTION_FRAME || body.first() != Some(&b'{') {
            return None;
        }
        serde_json::from_slice::<ErrorResponse>(body)
            .ok()
            .filter(|response| !response.success)
    }
}

/// Reply to `list_files`, which is either a listing or a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListFilesReply {
    Listing(ListFilesResponse),
    Rejected(ErrorResponse),
}

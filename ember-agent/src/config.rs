//! Agent configuration

use crate::error::{AgentError, AgentResult};
use ember_common::{DEFAULT_MAX_OUTPUT_BYTES, GUEST_OUTPUT_DIR};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Working directory of every run; the only directory served to the host
    pub output_dir: PathBuf,

    /// Interpreter argv; the code is appended as the final argument
    pub interpreter: Vec<String>,

    /// Per-stream cap on returned stdout/stderr
    pub max_output_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(GUEST_OUTPUT_DIR),
            interpreter: vec!["python3".to_string(), "-c".to_string()],
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl AgentConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_interpreter<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.interpreter.is_empty() || self.interpreter[0].trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "interpreter must name a program".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(AgentError::InvalidConfig(
                "output directory must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

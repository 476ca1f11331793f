//! Ember sandbox - isolated code execution with pluggable backends
//!
//! An [`ExecutorFactory`] resolves the configured primary provider and its
//! fallbacks through the [`ExecutorRegistry`], checks their health per
//! request and dispatches to the first one that can serve it. Backends:
//! Firecracker microVMs, Docker and gVisor containers, and plain host
//! processes for development.

mod config;
mod error;
mod execution;
pub mod executor;
mod extractor;
mod factory;
mod limits;
mod registry;
mod service;
mod storage;
mod types;
mod validator;

pub use config::{
    parse_provider_list, DockerSettings, ExecutorSettings, FirecrackerSettings, LimitSettings,
    ProcessSettings, SandboxConfig, StorageSettings,
};
pub use error::{Result, SandboxError};
pub use execution::ExecutionId;
pub use executor::Executor;
pub use extractor::{collect_output_dir, FileExtractor, Published};
pub use factory::{provider_chain, ExecutorFactory};
pub use limits::{is_ignored, FileBudget, FileLimits};
pub use registry::{ExecutorConstructor, ExecutorRegistry};
pub use service::SandboxService;
pub use storage::{ArtifactStore, LocalDirStore};
pub use types::{
    Artifact, AttemptOutcome, DropReason, DroppedFile, ExecutionOutput, ExecutionRequest,
    ExecutionResult, ProviderAttempt, ProviderHealth, ResultMetadata,
};
pub use validator::{CodeValidator, LengthValidator, Validation};

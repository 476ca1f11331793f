//! Name-keyed table of executor constructors
//!
//! Backends register themselves through a `register` function in their own
//! module; the factory resolves names here and never refers to a concrete
//! backend type. The registry is filled once at startup and only read after.

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::executor::Executor;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds one executor from configuration.
pub type ExecutorConstructor = fn(&SandboxConfig) -> Result<Arc<dyn Executor>>;

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    constructors: BTreeMap<String, ExecutorConstructor>,
}

impl ExecutorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every backend compiled into this build.
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "process")]
        crate::executor::process::register(&mut registry);
        #[cfg(feature = "docker")]
        crate::executor::docker::register(&mut registry);
        #[cfg(feature = "firecracker")]
        crate::executor::firecracker::register(&mut registry);
        registry
    }

    /// Add a provider; an existing entry with the same name is replaced.
    pub fn register(&mut self, name: impl Into<String>, constructor: ExecutorConstructor) {
        let name = name.into();
        if self.constructors.insert(name.clone(), constructor).is_some() {
            tracing::warn!(provider = %name, "overwriting executor provider");
        } else {
            tracing::debug!(provider = %name, "registered executor provider");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Result<ExecutorConstructor> {
        self.constructors
            .get(name)
            .copied()
            .ok_or_else(|| SandboxError::UnknownProvider {
                name: name.to_string(),
                available: self.available(),
            })
    }

    /// Construct the named provider.
    pub fn create(&self, name: &str, config: &SandboxConfig) -> Result<Arc<dyn Executor>> {
        let constructor = self.get(name)?;
        constructor(config).map_err(|e| {
            let detail = match e {
                SandboxError::Configuration(message) => message,
                other => other.to_string(),
            };
            SandboxError::Configuration(format!(
                "failed to initialize executor '{}': {}",
                name, detail
            ))
        })
    }

    fn available(&self) -> String {
        if self.constructors.is_empty() {
            "none".to_string()
        } else {
            self.names().join(", ")
        }
    }
}

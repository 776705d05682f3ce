//! Configuration types.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Work queue configuration, supplied by the embedding collaborator.
///
/// The queue itself defines no kinds; every kind-to-executable mapping and
/// the base directory for resolving input references come from here.
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Base directory that work item input references resolve against.
    pub inputs_dir: PathBuf,
    /// Mapping from work item kind to the executable that handles it.
    pub executables: HashMap<String, PathBuf>,
}

impl QueueConfig {
    /// Create a config with the given inputs directory and no registered kinds.
    pub fn new(inputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs_dir: inputs_dir.into(),
            executables: HashMap::new(),
        }
    }

    /// Register an executable for a work kind.
    pub fn with_executable(mut self, kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(kind.into(), path.into());
        self
    }

    /// Resolve an input reference against the inputs directory.
    pub fn resolve_input(&self, input: &str) -> PathBuf {
        self.inputs_dir.join(input)
    }

    /// Look up the executable registered for a kind.
    pub fn executable_for(&self, kind: &str) -> Option<&Path> {
        self.executables.get(kind).map(PathBuf::as_path)
    }
}

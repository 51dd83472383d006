use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{LaunchError, Result};

/// Module running a shell command once per value of a task range.
pub const SIMPLE_SHELL: &str = "simple_shell";

/// Worker modules shipped with the launcher.
pub const DEFAULT_MODULES: &[&str] = &[SIMPLE_SHELL, "sanity", "picalc"];

/// Maps logical worker-module names to executable paths.
///
/// Built once at startup; lookups never touch the filesystem.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    modules: HashMap<String, PathBuf>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`DEFAULT_MODULES`] as `<dir>/<name>.py`.
    pub fn with_defaults(dir: &Path) -> Self {
        let mut registry = Self::new();
        for name in DEFAULT_MODULES {
            registry.register(*name, dir.join(format!("{}.py", name)));
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.modules.insert(name.into(), path.into());
    }

    pub fn lookup(&self, name: &str) -> Result<&Path> {
        self.modules
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| LaunchError::UnknownWorkerModule(name.to_string()))
    }

    /// Resolve the program workers run.
    ///
    /// A script executable (`*.py`) runs as given. Anything else becomes the
    /// first argument of the worker module `module`.
    pub fn resolve_program(
        &self,
        executable: &str,
        args: &[String],
        module: &str,
    ) -> Result<(String, Vec<String>)> {
        if executable.ends_with(".py") {
            return Ok((executable.to_string(), args.to_vec()));
        }
        let path = self.lookup(module)?;
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(executable.to_string());
        full_args.extend_from_slice(args);
        tracing::debug!(module, path = %path.display(), "Resolved worker module");
        Ok((path.to_string_lossy().into_owned(), full_args))
    }
}

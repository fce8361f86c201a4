//! JSON group manifests.
//!
//! A manifest describes a group to run:
//!
//! ```json
//! {
//!   "partition": 2,
//!   "delay_ms": 100,
//!   "timeout_ms": 60000,
//!   "processes": [
//!     { "name": "api", "program": "./api", "args": ["--port", "8080"],
//!       "ready_pattern": "listening on" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::ProcessOptions;

/// Errors loading or compiling a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("process #{index} has an empty program")]
    EmptyProgram { index: usize },

    #[error("invalid ready pattern for {process}: {source}")]
    Pattern {
        process: String,
        #[source]
        source: regex::Error,
    },
}

/// A group of processes as written in a manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Dispatch workers; `0` runs sequentially.
    #[serde(default)]
    pub partition: usize,
    /// Pause after each sequential start.
    pub delay_ms: Option<u64>,
    /// Bound on the sequential wait.
    pub timeout_ms: Option<u64>,
    /// Processes in start order.
    pub processes: Vec<ProcessSpec>,
}

/// One process entry in a [`Manifest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessSpec {
    pub name: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Regex over output lines that marks the process available.
    pub ready_pattern: Option<String>,
    /// Kill the process after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse a manifest from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Compile every entry into spawn options, in order.
    pub fn process_options(&self) -> Result<Vec<ProcessOptions>, ManifestError> {
        self.processes
            .iter()
            .enumerate()
            .map(|(index, spec)| spec.to_options(index))
            .collect()
    }
}

impl ProcessSpec {
    fn to_options(&self, index: usize) -> Result<ProcessOptions, ManifestError> {
        if self.program.trim().is_empty() {
            return Err(ManifestError::EmptyProgram { index });
        }

        let name = self.name.clone().unwrap_or_else(|| format!("{}#{index}", self.program));
        let mut options = ProcessOptions::new(&self.program)
            .name(&name)
            .args(&self.args)
            .envs(&self.env);

        if let Some(ref dir) = self.working_dir {
            options = options.working_dir(dir);
        }
        if let Some(ms) = self.timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        if let Some(ref pattern) = self.ready_pattern {
            let re = Regex::new(pattern).map_err(|source| ManifestError::Pattern { process: name, source })?;
            options = options.ready_when(re);
        }

        Ok(options)
    }
}

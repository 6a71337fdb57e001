//! TOML job manifest.
//!
//! ```toml
//! pool_size = 3
//!
//! [[job]]
//! name = "lint"
//! command = ["cargo", "clippy"]
//! cwd = "."
//! env = { RUST_LOG = "warn" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use parproc_core::{Error, Result};
use serde::Deserialize;

use crate::subprocess::{CommandHandle, CommandSpec};

/// A parsed job manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Pool size override; values below 1 mean unbounded.
    #[serde(default)]
    pub pool_size: Option<i64>,
    /// Jobs, in file order.
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobSpec>,
}

/// One `[[job]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl JobSpec {
    /// Build the command spec. Relative `cwd` values resolve against `base`.
    fn to_command_spec(&self, base: Option<&Path>) -> Option<CommandSpec> {
        let (program, args) = self.command.split_first()?;
        let mut spec = CommandSpec::new(program.as_str()).args(args.iter().cloned());
        if let Some(ref cwd) = self.cwd {
            let dir = match base {
                Some(base) if cwd.is_relative() => base.join(cwd),
                _ => cwd.clone(),
            };
            spec = spec.current_dir(dir);
        }
        for (key, value) in &self.env {
            spec = spec.env(key.as_str(), value.as_str());
        }
        Some(spec)
    }
}

impl Manifest {
    /// Parse and validate manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Manifest(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(Error::Manifest("Job name must not be empty".to_string()));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(Error::Manifest(format!("Duplicate job name '{}'", job.name)));
            }
            if job.command.is_empty() {
                return Err(Error::Manifest(format!(
                    "Job '{}' has an empty command",
                    job.name
                )));
            }
        }
        Ok(())
    }

    /// Turn the jobs into keyed handles, in file order.
    ///
    /// `base` is the directory relative `cwd` entries resolve against,
    /// usually the manifest's own directory.
    pub fn into_handles(self, base: Option<&Path>) -> Vec<(String, CommandHandle)> {
        self.jobs
            .into_iter()
            .filter_map(|job| {
                let spec = job.to_command_spec(base)?;
                Some((job.name, CommandHandle::new(spec)))
            })
            .collect()
    }
}

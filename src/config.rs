//! Compiler Configuration - Immutable Run Constants
//!
//! Everything that would otherwise be a process-wide constant (the single
//! allowed input root, schema strings, file sets) lives in one value handed to
//! the compiler at construction. Two compilers with different configs never
//! interfere.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::path_guard::{validate_file_name, validate_subpath};
use crate::pipeline::CompilerError;
use crate::ENGINE_VERSION;

pub const LEDGER_MANIFEST: &str = "manifest.json";
pub const DAILY_STATUS: &str = "daily-status.json";
pub const SOURCE_SNAPSHOT: &str = "source-snapshot.json";
pub const RO_CRATE_METADATA: &str = "ro-crate-metadata.json";

/// What to do when a ledger manifest declares a checksum that does not match.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Record the mismatch, warn, and publish with `integrity_confirmed = false`.
    #[default]
    Warn,
    /// Abort the run before anything is written.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    #[serde(default = "default_input_subpath")]
    pub input_subpath: PathBuf,
    #[serde(default = "default_output_subpath")]
    pub output_subpath: PathBuf,
    #[serde(default = "default_claim_id")]
    pub claim_id: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default = "default_engine_name")]
    pub engine_name: String,
    #[serde(default = "default_publication_version")]
    pub publication_version: String,
    #[serde(default = "default_engine_min_version")]
    pub engine_min_version: String,
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,
    #[serde(default = "default_required_files")]
    pub required_files: Vec<String>,
    #[serde(default = "default_optional_files")]
    pub optional_files: Vec<String>,
}

fn default_repo_root() -> PathBuf { PathBuf::from(".") }
fn default_input_subpath() -> PathBuf { PathBuf::from("data/publish/3i-atlas") }
fn default_output_subpath() -> PathBuf { PathBuf::from("lab/publication") }
fn default_claim_id() -> String { "claim-001".to_string() }
fn default_schema_version() -> String { "1.0".to_string() }
fn default_engine_name() -> String { "TRIZEL Layer-2 Publication Engine".to_string() }
fn default_publication_version() -> String { "1.0.0".to_string() }
fn default_engine_min_version() -> String { "1.0.0".to_string() }

fn default_required_files() -> Vec<String> {
    vec![
        LEDGER_MANIFEST.to_string(),
        DAILY_STATUS.to_string(),
        SOURCE_SNAPSHOT.to_string(),
    ]
}

fn default_optional_files() -> Vec<String> {
    vec![RO_CRATE_METADATA.to_string()]
}

impl CompilerConfig {
    /// Defaults rooted at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            input_subpath: default_input_subpath(),
            output_subpath: default_output_subpath(),
            claim_id: default_claim_id(),
            schema_version: default_schema_version(),
            engine_name: default_engine_name(),
            publication_version: default_publication_version(),
            engine_min_version: default_engine_min_version(),
            checksum_policy: ChecksumPolicy::default(),
            required_files: default_required_files(),
            optional_files: default_optional_files(),
        }
    }

    /// Load a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, CompilerError> {
        let content = fs::read_to_string(path).map_err(|source| CompilerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content)
            .map_err(|e| CompilerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn with_claim_id(mut self, claim_id: impl Into<String>) -> Self {
        self.claim_id = claim_id.into();
        self
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// Directory holding every claim's date buckets.
    pub fn output_base(&self) -> PathBuf {
        self.repo_root.join(&self.output_subpath)
    }

    /// Check the config is internally consistent and usable by this engine.
    pub fn validate(&self) -> Result<(), CompilerError> {
        validate_subpath(&self.input_subpath)?;
        validate_subpath(&self.output_subpath)?;

        validate_file_name(&self.claim_id)
            .map_err(|_| CompilerError::Config(format!("invalid claim id: {:?}", self.claim_id)))?;
        if self.claim_id.starts_with('.') {
            return Err(CompilerError::Config(format!(
                "claim id must not be hidden: {:?}",
                self.claim_id
            )));
        }

        if self.required_files.is_empty() {
            return Err(CompilerError::Config("required file set is empty".into()));
        }
        for name in self.required_files.iter().chain(&self.optional_files) {
            validate_file_name(name)
                .map_err(|_| CompilerError::Config(format!("invalid ledger file name: {:?}", name)))?;
        }
        if let Some(dup) = self
            .optional_files
            .iter()
            .find(|name| self.required_files.contains(name))
        {
            return Err(CompilerError::Config(format!(
                "{} is listed as both required and optional",
                dup
            )));
        }

        semver::Version::parse(&self.publication_version).map_err(|e| {
            CompilerError::Config(format!(
                "publication version {:?} is not semver: {}",
                self.publication_version, e
            ))
        })?;
        self.check_engine_version()
    }

    fn check_engine_version(&self) -> Result<(), CompilerError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| CompilerError::Config("Invalid engine version".into()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version)
            .map_err(|_| CompilerError::Config("Invalid engine min version".into()))?;

        if engine_ver < min_ver {
            return Err(CompilerError::Config(format!(
                "config requires engine >= {}, current is {}",
                self.engine_min_version, ENGINE_VERSION
            )));
        }

        Ok(())
    }
}

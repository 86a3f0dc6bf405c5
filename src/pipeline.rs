//! Publication Pipeline - Single Entry Point
//!
//! CRITICAL: every run goes through the Path Guard before any ledger read, and
//! through the Ledger Reader before anything is written. No bypass.
//!
//! Run states:
//! `INIT → PATH_VERIFIED → INPUTS_VERIFIED → EXTRACTED → AGGREGATED →
//! PROVENANCE_BUILT → WRITTEN → DONE`, with `NO_DATA_YET` reachable from
//! `INIT` (input directory absent) and `INPUTS_VERIFIED` (required files
//! missing).

use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ChecksumPolicy, CompilerConfig};
use crate::ledger::{read_ledger, VerificationIssue, VerificationResult};
use crate::output::{
    Manifest, NoDataMarker, OutputLayout, PublicationMetadata, DERIVED_DIR, NO_DATA_FILE,
    PROVENANCE_FILE,
};
use crate::path_guard::{GuardOutcome, InputRoot, PathGuard, PathSecurityViolation};
use crate::provenance::{build_provenance, EngineIdentity, RunContext};
use crate::stats::{aggregate, data_flow, observation_metadata, summary};
use crate::tables::extract_tables;

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Path security violation: {0}")]
    PathSecurity(#[from] PathSecurityViolation),

    #[error("Malformed ledger JSON in {file}: {reason}")]
    MalformedLedgerJson { file: String, reason: String },

    #[error("Ledger checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not a completed publication: {}", .0.display())]
    IncompleteOutput(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    PathVerified,
    InputsVerified,
    Extracted,
    Aggregated,
    ProvenanceBuilt,
    Written,
    Done,
    NoDataYet,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::PathVerified => "PATH_VERIFIED",
            RunState::InputsVerified => "INPUTS_VERIFIED",
            RunState::Extracted => "EXTRACTED",
            RunState::Aggregated => "AGGREGATED",
            RunState::ProvenanceBuilt => "PROVENANCE_BUILT",
            RunState::Written => "WRITTEN",
            RunState::Done => "DONE",
            RunState::NoDataYet => "NO_DATA_YET",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::NoDataYet)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Published {
        output_dir: PathBuf,
        manifest: Manifest,
        issues: Vec<VerificationIssue>,
    },
    NoDataYet {
        output_dir: PathBuf,
        marker: NoDataMarker,
    },
}

impl RunOutcome {
    pub fn output_dir(&self) -> &PathBuf {
        match self {
            RunOutcome::Published { output_dir, .. } | RunOutcome::NoDataYet { output_dir, .. } => {
                output_dir
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub claim_id: String,
    pub date: String,
    pub executed_at: String,
    pub trail: Vec<RunState>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        self.trail.last().copied().unwrap_or(RunState::Init)
    }
}

/// Result of checking inputs without publishing.
#[derive(Debug, Clone)]
pub enum InputInspection {
    Absent { expected: PathBuf },
    Read(VerificationResult),
}

/// The publication compiler - owns its configuration, holds no other state
pub struct PublicationCompiler {
    config: CompilerConfig,
}

impl PublicationCompiler {
    pub fn new(config: CompilerConfig) -> Result<Self, CompilerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    fn guard(&self) -> Result<GuardOutcome, CompilerError> {
        let guard = PathGuard::new(&self.config.repo_root, &self.config.input_subpath);
        Ok(guard.verify()?)
    }

    fn read(&self, root: &InputRoot) -> Result<VerificationResult, CompilerError> {
        read_ledger(root, &self.config.required_files, &self.config.optional_files)
    }

    /// Run the guard and reader only.
    pub fn inspect(&self) -> Result<InputInspection, CompilerError> {
        match self.guard()? {
            GuardOutcome::Absent { expected } => Ok(InputInspection::Absent { expected }),
            GuardOutcome::Verified(root) => Ok(InputInspection::Read(self.read(&root)?)),
        }
    }

    /// Compile for `date` (defaults to today, UTC), stamping the current time.
    pub fn run(&self, date: Option<&str>) -> Result<RunReport, CompilerError> {
        let executed_at = Utc::now();
        let date = match date {
            Some(s) => parse_date(s)?,
            None => executed_at.date_naive(),
        };
        self.run_at(date, executed_at)
    }

    /// Compile with an explicit clock reading. Identical inputs, date, and
    /// `executed_at` give byte-identical buckets.
    pub fn run_at(
        &self,
        date: NaiveDate,
        executed_at: DateTime<Utc>,
    ) -> Result<RunReport, CompilerError> {
        let ctx = RunContext::new(self.config.claim_id.clone(), date, executed_at);
        let mut trail = Vec::new();
        advance(&mut trail, RunState::Init, &ctx);

        let root = match self.guard()? {
            GuardOutcome::Verified(root) => root,
            GuardOutcome::Absent { .. } => {
                let message = "No verified ledger found at expected path";
                return self.no_data(ctx, trail, message, self.config.required_files.clone());
            }
        };
        advance(&mut trail, RunState::PathVerified, &ctx);

        let ledger = self.read(&root)?;
        advance(&mut trail, RunState::InputsVerified, &ctx);

        if !ledger.inputs_verified() {
            let message = if ledger.missing_files.len() == self.config.required_files.len() {
                "Verified ledger directory exists but contains no entries"
            } else {
                "Verified ledger is missing required files"
            };
            return self.no_data(ctx, trail, message, ledger.missing_files.clone());
        }

        if !ledger.integrity_confirmed() && self.config.checksum_policy == ChecksumPolicy::Fail {
            let files: Vec<_> = ledger.mismatches().map(|i| i.file().to_string()).collect();
            return Err(CompilerError::ChecksumMismatch(files.join(", ")));
        }

        let tables = extract_tables(&ledger);
        advance(&mut trail, RunState::Extracted, &ctx);

        let stats = aggregate(&ledger);
        let flow = data_flow(&ledger);
        let observation = observation_metadata(&ledger);
        let listed = summary(&ledger, &self.input_path_label());
        advance(&mut trail, RunState::Aggregated, &ctx);

        let layout = OutputLayout::new(&self.config.output_base(), &ctx.claim_id, &ctx.date_str());
        let mut staged = layout.begin()?;
        for table in tables.values() {
            staged.write_table(table)?;
        }
        staged.write_json(&format!("{}/statistics.json", DERIVED_DIR), &stats)?;
        staged.write_json(&format!("{}/data_flow.json", DERIVED_DIR), &flow)?;
        staged.write_json(
            &format!("{}/observation_metadata.json", DERIVED_DIR),
            &observation,
        )?;
        staged.write_json(&format!("{}/summary.json", DERIVED_DIR), &listed)?;

        let provenance = build_provenance(&ctx, &self.config, &ledger, staged.written())?;
        advance(&mut trail, RunState::ProvenanceBuilt, &ctx);
        staged.write_json(PROVENANCE_FILE, &provenance)?;

        let publication = PublicationMetadata {
            claim_id: ctx.claim_id.clone(),
            date: ctx.date_str(),
            version: self.config.publication_version.clone(),
            schema_version: self.config.schema_version.clone(),
            engine: EngineIdentity::from_config(&self.config),
            run_id: provenance.run_id,
        };
        let sealed = staged.seal(publication)?;
        advance(&mut trail, RunState::Written, &ctx);

        tracing::info!(
            output_dir = %sealed.bucket.display(),
            files = sealed.manifest.files.len(),
            verified = ledger.verified(),
            "publication export completed"
        );
        advance(&mut trail, RunState::Done, &ctx);

        Ok(RunReport {
            claim_id: ctx.claim_id.clone(),
            date: ctx.date_str(),
            executed_at: ctx.timestamp_utc(),
            trail,
            outcome: RunOutcome::Published {
                output_dir: sealed.bucket,
                manifest: sealed.manifest,
                issues: ledger.issues,
            },
        })
    }

    /// Input subpath with forward slashes, as recorded in outputs.
    fn input_path_label(&self) -> String {
        self.config.input_subpath.to_string_lossy().replace('\\', "/")
    }

    fn no_data(
        &self,
        ctx: RunContext,
        mut trail: Vec<RunState>,
        message: &str,
        missing_files: Vec<String>,
    ) -> Result<RunReport, CompilerError> {
        tracing::warn!(missing = ?missing_files, "{}", message);

        let marker = NoDataMarker {
            status: RunState::NoDataYet.as_str().to_string(),
            message: message.to_string(),
            expected_path: self.input_path_label(),
            missing_files,
            claim_id: ctx.claim_id.clone(),
            date: ctx.date_str(),
            timestamp_utc: ctx.timestamp_utc(),
        };

        let layout = OutputLayout::new(&self.config.output_base(), &ctx.claim_id, &ctx.date_str());
        let mut staged = layout.begin()?;
        staged.write_json(NO_DATA_FILE, &marker)?;
        let output_dir = staged.commit()?;
        advance(&mut trail, RunState::NoDataYet, &ctx);

        Ok(RunReport {
            claim_id: ctx.claim_id.clone(),
            date: ctx.date_str(),
            executed_at: ctx.timestamp_utc(),
            trail,
            outcome: RunOutcome::NoDataYet { output_dir, marker },
        })
    }
}

fn advance(trail: &mut Vec<RunState>, state: RunState, ctx: &RunContext) {
    tracing::info!(claim_id = %ctx.claim_id, date = %ctx.date, state = %state, "run state");
    trail.push(state);
}

/// Strict `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Result<NaiveDate, CompilerError> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CompilerError::InvalidDate(s.to_string()))?;
    if date.format("%Y-%m-%d").to_string() != s {
        return Err(CompilerError::InvalidDate(s.to_string()));
    }
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_strict() {
        assert_eq!(
            parse_date("2026-01-05").unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
        );
        for bad in ["2026-1-5", "2026-13-01", "05-01-2026", "2026-01-05T00:00", ""] {
            assert!(matches!(parse_date(bad), Err(CompilerError::InvalidDate(_))), "{}", bad);
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::ProvenanceBuilt.to_string(), "PROVENANCE_BUILT");
        assert_eq!(
            serde_json::to_string(&RunState::NoDataYet).unwrap(),
            "\"NO_DATA_YET\""
        );
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::Written.is_terminal());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = CompilerConfig::new("/repo").with_claim_id("a/b");
        assert!(matches!(
            PublicationCompiler::new(config),
            Err(CompilerError::Config(_))
        ));
    }
}

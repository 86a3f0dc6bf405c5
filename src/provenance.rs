//! Provenance - What Was Read, When, and Under Which Constraints
//!
//! The execution timestamp is captured once per run in [`RunContext`] and
//! reused everywhere. The policy block (deterministic, network-free, gate
//! closed, no interpretation, no claims) is asserted by the engine itself and
//! never derived from input data.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CompilerConfig;
use crate::hashing::compute_input_fingerprint;
use crate::ledger::{VerificationIssue, VerificationResult};
use crate::ENGINE_VERSION;

pub const DETERMINISM_STATEMENT: &str = "This output is deterministically generated from verified input ledgers only. No network access, no model calls, no interpretation.";

/// Identity of one run: the output bucket key plus the single clock reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub claim_id: String,
    pub date: NaiveDate,
    pub executed_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(claim_id: impl Into<String>, date: NaiveDate, executed_at: DateTime<Utc>) -> Self {
        Self {
            claim_id: claim_id.into(),
            date,
            executed_at,
        }
    }

    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn timestamp_utc(&self) -> String {
        self.executed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Deterministic run id: UUIDv5 over claim, date and input checksums.
    pub fn run_id(&self, checksums: &BTreeMap<String, String>) -> Result<Uuid, serde_json::Error> {
        let fingerprint = compute_input_fingerprint(&self.claim_id, &self.date_str(), checksums)?;
        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, fingerprint.as_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: String,
    pub version: String,
}

impl EngineIdentity {
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self {
            name: config.engine_name.clone(),
            version: ENGINE_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub timestamp_utc: String,
    pub deterministic: bool,
    pub network_access: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceInputs {
    /// Input directory relative to the repository root.
    pub source: String,
    pub files: Vec<String>,
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceOutputs {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub inputs_verified: bool,
    pub integrity_confirmed: bool,
    pub issues: Vec<VerificationIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    pub gate_6_status: String,
    pub interpretation: bool,
    pub claims: bool,
    pub governance_authority: bool,
}

impl Constraints {
    /// The only constraint block this engine ever emits.
    pub fn closed_gate() -> Self {
        Self {
            gate_6_status: "CLOSED".to_string(),
            interpretation: false,
            claims: false,
            governance_authority: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub schema_version: String,
    pub engine: EngineIdentity,
    pub claim_id: String,
    pub date: String,
    pub run_id: Uuid,
    pub execution: Execution,
    pub inputs: ProvenanceInputs,
    pub outputs: ProvenanceOutputs,
    pub verification: VerificationRecord,
    pub constraints: Constraints,
    pub determinism_statement: String,
}

pub fn build_provenance(
    ctx: &RunContext,
    config: &CompilerConfig,
    ledger: &VerificationResult,
    output_files: &[String],
) -> Result<Provenance, serde_json::Error> {
    Ok(Provenance {
        schema_version: config.schema_version.clone(),
        engine: EngineIdentity::from_config(config),
        claim_id: ctx.claim_id.clone(),
        date: ctx.date_str(),
        run_id: ctx.run_id(&ledger.checksums)?,
        execution: Execution {
            timestamp_utc: ctx.timestamp_utc(),
            deterministic: true,
            network_access: false,
        },
        inputs: ProvenanceInputs {
            source: config.input_subpath.to_string_lossy().replace('\\', "/"),
            files: ledger.files(),
            checksums: ledger.checksums.clone(),
        },
        outputs: ProvenanceOutputs {
            files: output_files.to_vec(),
        },
        verification: VerificationRecord {
            inputs_verified: ledger.inputs_verified(),
            integrity_confirmed: ledger.integrity_confirmed(),
            issues: ledger.issues.clone(),
        },
        constraints: Constraints::closed_gate(),
        determinism_statement: DETERMINISM_STATEMENT.to_string(),
    })
}

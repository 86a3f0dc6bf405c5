//! Derived Statistics - Counting and Pass-Through
//!
//! Aggregates are computed from the typed ledger documents directly, not from
//! the extracted tables, so a change to table flattening cannot change a
//! count. Only tallies, sums, and copied fields appear here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ledger::VerificationResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStats {
    pub platform_counts_by_category: BTreeMap<String, u64>,
    pub total_platforms: u64,
    pub sbdb_total_attempts: u64,
    pub sbdb_successful_attempts: u64,
    pub sbdb_failed_attempts: u64,
}

/// `daily-status.json` fields, copied as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlow {
    pub gate: String,
    pub proof_type: String,
    pub event_id: String,
    pub as_of_utc: String,
    pub classification: String,
    pub source_repository: String,
    pub source_commit: String,
    pub integrity_verified: bool,
}

/// `source-snapshot.json` metadata, copied as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationMetadata {
    pub project: String,
    pub pipeline: String,
    pub query_designation: String,
    pub retrieved_utc: String,
    pub has_sbdb_payload: bool,
    pub has_error: bool,
}

/// What was read, and from where relative to the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_ledger_entries: u64,
    pub entry_files: Vec<String>,
    pub ledger_path: String,
}

pub fn aggregate(ledger: &VerificationResult) -> DerivedStats {
    let mut stats = DerivedStats::default();

    let Some(snapshot) = &ledger.documents.source_snapshot else {
        return stats;
    };

    for category in &snapshot.platforms_registry.categories {
        let count = category.items.len() as u64;
        *stats
            .platform_counts_by_category
            .entry(category.name.clone())
            .or_insert(0) += count;
        stats.total_platforms += count;
    }

    stats.sbdb_total_attempts = snapshot.sbdb_attempts.len() as u64;
    stats.sbdb_successful_attempts = snapshot.sbdb_attempts.iter().filter(|a| a.ok).count() as u64;
    stats.sbdb_failed_attempts = stats.sbdb_total_attempts - stats.sbdb_successful_attempts;

    stats
}

pub fn data_flow(ledger: &VerificationResult) -> DataFlow {
    match &ledger.documents.daily_status {
        Some(status) => DataFlow {
            gate: status.gate.clone(),
            proof_type: status.proof_type.clone(),
            event_id: status.event_id.clone(),
            as_of_utc: status.as_of_utc.clone(),
            classification: status.classification.clone(),
            source_repository: status.source.repository.clone(),
            source_commit: status.source.commit.clone(),
            integrity_verified: status.integrity.checksum_verified,
        },
        None => DataFlow::default(),
    }
}

pub fn observation_metadata(ledger: &VerificationResult) -> ObservationMetadata {
    match &ledger.documents.source_snapshot {
        Some(snapshot) => {
            let meta = &snapshot.metadata;
            ObservationMetadata {
                project: meta.project.clone(),
                pipeline: meta.pipeline.clone(),
                query_designation: meta.query_designation.clone(),
                retrieved_utc: meta.retrieved_utc.clone(),
                has_sbdb_payload: meta.integrity.has_sbdb_payload,
                has_error: meta.integrity.has_error,
            }
        }
        None => ObservationMetadata::default(),
    }
}

/// `ledger_path` is the input subpath, never an absolute location.
pub fn summary(ledger: &VerificationResult, ledger_path: &str) -> LedgerSummary {
    let entry_files = ledger.files();
    LedgerSummary {
        total_ledger_entries: entry_files.len() as u64,
        entry_files,
        ledger_path: ledger_path.to_string(),
    }
}

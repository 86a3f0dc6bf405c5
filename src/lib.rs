//! Publication Core - Deterministic Ledger Publication Compiler
//!
//! # The Three Guarantees (Non-Negotiable)
//! 1. One Input Root: nothing is read outside the guarded ledger directory
//! 2. Deterministic Output: identical inputs give byte-identical artifacts
//! 3. Fail Closed: missing input yields a NO_DATA_YET marker, never a partial bucket

pub mod config;
pub mod hashing;
pub mod path_guard;
pub mod ledger;
pub mod tables;
pub mod stats;
pub mod provenance;
pub mod output;
pub mod pipeline;

pub use config::{ChecksumPolicy, CompilerConfig};
pub use hashing::{canonical_json, canonical_json_pretty, sha256_file, sha256_hex};
pub use path_guard::{GuardOutcome, InputRoot, PathGuard, PathSecurityViolation};
pub use ledger::{read_ledger, LedgerEntry, VerificationIssue, VerificationResult};
pub use tables::{extract_tables, CellValue, Table};
pub use stats::{
    aggregate, data_flow, observation_metadata, summary, DataFlow, DerivedStats, LedgerSummary,
    ObservationMetadata,
};
pub use provenance::{build_provenance, Provenance, RunContext};
pub use output::{verify_output, Manifest, OutputVerification};
pub use pipeline::{
    CompilerError, InputInspection, PublicationCompiler, RunOutcome, RunReport, RunState,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

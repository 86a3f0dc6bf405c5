//! Ledger Reader - Batch Verification of the Input Set
//!
//! Reads every configured ledger file in one pass, recording absences instead
//! of stopping at the first one, then cross-checks the checksums declared by
//! the ledger manifest in a second pass. Malformed JSON and path escapes are
//! fail-fast; everything else becomes a [`VerificationIssue`].

use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::{DAILY_STATUS, LEDGER_MANIFEST, SOURCE_SNAPSHOT};
use crate::hashing::sha256_hex;
use crate::path_guard::{resolve_within, InputRoot};
use crate::pipeline::CompilerError;

/// One ledger file as read from disk.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub filename: String,
    #[serde(skip)]
    pub content: Value,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationIssue {
    MissingRequiredFile {
        file: String,
    },
    ChecksumMismatch {
        file: String,
        declared: String,
        computed: String,
    },
}

impl VerificationIssue {
    pub fn file(&self) -> &str {
        match self {
            Self::MissingRequiredFile { file } | Self::ChecksumMismatch { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub entries: BTreeMap<String, LedgerEntry>,
    pub checksums: BTreeMap<String, String>,
    pub missing_files: Vec<String>,
    pub issues: Vec<VerificationIssue>,
    pub documents: LedgerDocuments,
}

impl VerificationResult {
    /// No missing files and no checksum mismatches.
    pub fn verified(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn inputs_verified(&self) -> bool {
        self.missing_files.is_empty()
    }

    pub fn integrity_confirmed(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| matches!(i, VerificationIssue::ChecksumMismatch { .. }))
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &VerificationIssue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, VerificationIssue::ChecksumMismatch { .. }))
    }

    /// Names of the files actually read, sorted.
    pub fn files(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Typed views of the known ledger files, decoded at the reader boundary.
#[derive(Debug, Clone, Default)]
pub struct LedgerDocuments {
    pub manifest: Option<LedgerManifest>,
    pub daily_status: Option<DailyStatus>,
    pub source_snapshot: Option<SourceSnapshot>,
}

// --- Ledger schemas ---
//
// Every field defaults when absent or null. A present field of the wrong JSON
// type is a decode failure and therefore MalformedLedgerJson.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSnapshot {
    #[serde(deserialize_with = "nullable")]
    pub metadata: SnapshotMetadata,
    #[serde(deserialize_with = "nullable")]
    pub platforms_registry: PlatformsRegistry,
    #[serde(deserialize_with = "nullable")]
    pub sbdb_attempts: Vec<SbdbAttempt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotMetadata {
    #[serde(deserialize_with = "nullable")]
    pub project: String,
    #[serde(deserialize_with = "nullable")]
    pub pipeline: String,
    #[serde(deserialize_with = "nullable")]
    pub query_designation: String,
    #[serde(deserialize_with = "nullable")]
    pub retrieved_utc: String,
    #[serde(deserialize_with = "nullable")]
    pub integrity: SnapshotIntegrity,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotIntegrity {
    #[serde(deserialize_with = "nullable")]
    pub has_sbdb_payload: bool,
    #[serde(deserialize_with = "nullable")]
    pub has_error: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformsRegistry {
    #[serde(deserialize_with = "ordered_categories")]
    pub categories: Vec<PlatformCategory>,
}

/// One `category -> [items]` pair, kept in source order.
#[derive(Debug, Clone, Default)]
pub struct PlatformCategory {
    pub name: String,
    pub items: Vec<PlatformItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformItem {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub role: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SbdbAttempt {
    #[serde(deserialize_with = "nullable")]
    pub designation: String,
    #[serde(deserialize_with = "truthy")]
    pub ok: bool,
    #[serde(deserialize_with = "nullable")]
    pub url: String,
    pub error: Option<AttemptError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttemptError {
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub error_type: String,
    pub http_status: Option<HttpStatus>,
    #[serde(deserialize_with = "nullable")]
    pub message: String,
}

/// Integral numbers (including `404.0`) are codes; other numbers and strings
/// are kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpStatus {
    Code(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for HttpStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => {
                if let Some(code) = n.as_i64() {
                    return Ok(HttpStatus::Code(code));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => {
                        Ok(HttpStatus::Code(f as i64))
                    }
                    _ => Ok(HttpStatus::Text(n.to_string())),
                }
            }
            Value::String(s) => Ok(HttpStatus::Text(s)),
            other => Err(serde::de::Error::custom(format!(
                "http_status must be a number or string, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DailyStatus {
    #[serde(deserialize_with = "nullable")]
    pub gate: String,
    #[serde(deserialize_with = "nullable")]
    pub proof_type: String,
    #[serde(deserialize_with = "nullable")]
    pub event_id: String,
    #[serde(deserialize_with = "nullable")]
    pub as_of_utc: String,
    #[serde(deserialize_with = "nullable")]
    pub classification: String,
    #[serde(deserialize_with = "nullable")]
    pub source: StatusSource,
    #[serde(deserialize_with = "nullable")]
    pub integrity: StatusIntegrity,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusSource {
    #[serde(deserialize_with = "nullable")]
    pub repository: String,
    #[serde(deserialize_with = "nullable")]
    pub commit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusIntegrity {
    #[serde(deserialize_with = "nullable")]
    pub checksum_verified: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerManifest {
    #[serde(deserialize_with = "ordered_declarations")]
    pub files: Vec<DeclaredFile>,
}

#[derive(Debug, Clone, Default)]
pub struct DeclaredFile {
    pub filename: String,
    pub sha256: Option<String>,
}

#[derive(Deserialize)]
struct DeclaredFileBody {
    #[serde(default)]
    sha256: Option<String>,
}

/// `null` decodes as the type's default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn ordered_categories<'de, D>(deserializer: D) -> Result<Vec<PlatformCategory>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    map.into_iter()
        .map(|(name, items)| {
            let items: Vec<PlatformItem> = nullable(items)
                .map_err(|e| serde::de::Error::custom(format!("category {}: {}", name, e)))?;
            Ok(PlatformCategory { name, items })
        })
        .collect()
}

fn ordered_declarations<'de, D>(deserializer: D) -> Result<Vec<DeclaredFile>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    map.into_iter()
        .map(|(filename, body)| {
            let body: Option<DeclaredFileBody> = serde_json::from_value(body)
                .map_err(|e| serde::de::Error::custom(format!("files.{}: {}", filename, e)))?;
            Ok(DeclaredFile {
                filename,
                sha256: body.and_then(|b| b.sha256),
            })
        })
        .collect()
}

/// JSON truthiness: false, null, 0, "" and empty containers are false.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

/// Read and verify the ledger set under a guarded input root.
pub fn read_ledger(
    root: &InputRoot,
    required: &[String],
    optional: &[String],
) -> Result<VerificationResult, CompilerError> {
    let mut result = VerificationResult::default();

    // Pass 1: presence, digests, parsing
    for (filename, is_required) in required
        .iter()
        .map(|f| (f, true))
        .chain(optional.iter().map(|f| (f, false)))
    {
        let Some(path) = resolve_within(root, filename)? else {
            if is_required {
                tracing::warn!(file = %filename, "required ledger file missing");
                result.missing_files.push(filename.clone());
                result.issues.push(VerificationIssue::MissingRequiredFile {
                    file: filename.clone(),
                });
            } else {
                tracing::debug!(file = %filename, "optional ledger file not present");
            }
            continue;
        };

        let bytes = fs::read(&path).map_err(|source| CompilerError::Io {
            path: path.clone(),
            source,
        })?;
        let sha256 = sha256_hex(&bytes);
        let content: Value =
            serde_json::from_slice(&bytes).map_err(|e| CompilerError::MalformedLedgerJson {
                file: filename.clone(),
                reason: e.to_string(),
            })?;

        decode_document(&mut result.documents, filename, &content)?;

        tracing::debug!(file = %filename, sha256 = %sha256, size = bytes.len(), "read ledger file");
        result.checksums.insert(filename.clone(), sha256.clone());
        result.entries.insert(
            filename.clone(),
            LedgerEntry {
                filename: filename.clone(),
                content,
                sha256,
                size_bytes: bytes.len() as u64,
            },
        );
    }

    // Pass 2: declared checksums against computed ones
    let declared = result
        .documents
        .manifest
        .as_ref()
        .map(|m| m.files.clone())
        .unwrap_or_default();
    for decl in declared {
        let Some(expected) = decl.sha256 else { continue };
        if decl.filename == LEDGER_MANIFEST {
            continue;
        }
        let Some(computed) = result.checksums.get(&decl.filename) else {
            continue;
        };
        if !expected.trim().eq_ignore_ascii_case(computed) {
            tracing::warn!(
                file = %decl.filename,
                declared = %expected,
                computed = %computed,
                "ledger checksum mismatch"
            );
            result.issues.push(VerificationIssue::ChecksumMismatch {
                file: decl.filename.clone(),
                declared: expected,
                computed: computed.clone(),
            });
        }
    }

    Ok(result)
}

fn decode_document(
    documents: &mut LedgerDocuments,
    filename: &str,
    content: &Value,
) -> Result<(), CompilerError> {
    let malformed = |e: serde_json::Error| CompilerError::MalformedLedgerJson {
        file: filename.to_string(),
        reason: e.to_string(),
    };

    match filename {
        LEDGER_MANIFEST => {
            documents.manifest = Some(LedgerManifest::deserialize(content).map_err(malformed)?);
        }
        DAILY_STATUS => {
            documents.daily_status = Some(DailyStatus::deserialize(content).map_err(malformed)?);
        }
        SOURCE_SNAPSHOT => {
            documents.source_snapshot =
                Some(SourceSnapshot::deserialize(content).map_err(malformed)?);
        }
        _ => {}
    }
    Ok(())
}

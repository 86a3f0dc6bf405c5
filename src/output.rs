//! Output Writer and Manifest Generator
//!
//! A run writes into a staging directory next to its date bucket. Content
//! files go first, then the two completion markers (`sha256sum.txt`,
//! `manifest.json`) computed over everything already on disk, and only then is
//! staging swapped into place. A run that fails midway never leaves a bucket
//! carrying completion markers for partial content.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing::{canonical_json_pretty, sha256_file};
use crate::path_guard::validate_subpath;
use crate::pipeline::CompilerError;
use crate::provenance::EngineIdentity;
use crate::tables::Table;

pub const TABLES_DIR: &str = "tables";
pub const DERIVED_DIR: &str = "derived";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const PROVENANCE_FILE: &str = "provenance.json";
pub const CHECKSUM_FILE: &str = "sha256sum.txt";
pub const NO_DATA_FILE: &str = "NO_DATA_YET.json";

/// Files that describe the bucket and so cannot appear in its own manifest.
pub const EXCLUDED_FROM_MANIFEST: [&str; 3] = [MANIFEST_FILE, PROVENANCE_FILE, CHECKSUM_FILE];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationMetadata {
    pub claim_id: String,
    pub date: String,
    pub version: String,
    pub schema_version: String,
    pub engine: EngineIdentity,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub publication: PublicationMetadata,
    pub files: BTreeMap<String, FileRecord>,
}

/// Sole artifact of a fail-closed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoDataMarker {
    pub status: String,
    pub message: String,
    pub expected_path: String,
    pub missing_files: Vec<String>,
    pub claim_id: String,
    pub date: String,
    pub timestamp_utc: String,
}

/// Where a (claim, date) bucket and its staging directory live.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    bucket: PathBuf,
    staging: PathBuf,
}

impl OutputLayout {
    pub fn new(output_base: &Path, claim_id: &str, date: &str) -> Self {
        let claim_dir = output_base.join(claim_id);
        Self {
            bucket: claim_dir.join(date),
            staging: claim_dir.join(format!(".{}.staging", date)),
        }
    }

    pub fn bucket(&self) -> &Path {
        &self.bucket
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Start a fresh staging directory, discarding leftovers of an aborted run.
    pub fn begin(&self) -> Result<StagedOutput, CompilerError> {
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging).map_err(|source| io_err(&self.staging, source))?;
        }
        fs::create_dir_all(&self.staging).map_err(|source| io_err(&self.staging, source))?;
        Ok(StagedOutput {
            layout: self.clone(),
            written: Vec::new(),
            committed: false,
        })
    }
}

/// A bucket being assembled. Dropping it without committing removes staging.
#[derive(Debug)]
pub struct StagedOutput {
    layout: OutputLayout,
    written: Vec<String>,
    committed: bool,
}

impl StagedOutput {
    pub fn root(&self) -> &Path {
        &self.layout.staging
    }

    /// Relative paths of content files written so far, in write order.
    pub fn written(&self) -> &[String] {
        &self.written
    }

    /// Write `tables/<name>.csv` and `tables/<name>.json`.
    pub fn write_table(&mut self, table: &Table) -> Result<(), CompilerError> {
        let csv_rel = format!("{}/{}.csv", TABLES_DIR, table.name);
        let json_rel = format!("{}/{}.json", TABLES_DIR, table.name);

        let csv_bytes = render_csv(table).map_err(|e| match e {
            RenderError::Csv(e) => CompilerError::Csv(e),
            RenderError::Io(source) => io_err(&self.root().join(&csv_rel), source),
        })?;
        self.write_bytes(&csv_rel, &csv_bytes)?;
        self.write_json(&json_rel, &table.rows)
    }

    /// Write canonical JSON (sorted keys, fixed indent) to a relative path.
    pub fn write_json<T: Serialize>(&mut self, rel: &str, value: &T) -> Result<(), CompilerError> {
        let content = canonical_json_pretty(value)?;
        self.write_bytes(rel, content.as_bytes())
    }

    fn write_bytes(&mut self, rel: &str, bytes: &[u8]) -> Result<(), CompilerError> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
        }
        fs::write(&path, bytes).map_err(|source| io_err(&path, source))?;
        tracing::debug!(file = %rel, bytes = bytes.len(), "wrote output file");
        self.written.push(rel.to_string());
        Ok(())
    }

    /// Hash everything written so far, write both completion markers, and
    /// move the bucket into place.
    pub fn seal(mut self, publication: PublicationMetadata) -> Result<SealedOutput, CompilerError> {
        let files = hash_tree(self.root())?;

        let mut lines = String::new();
        for (rel, record) in &files {
            lines.push_str(&format!("{}  {}\n", record.sha256, rel));
        }
        fs::write(self.root().join(CHECKSUM_FILE), lines)
            .map_err(|source| io_err(&self.root().join(CHECKSUM_FILE), source))?;

        let manifest = Manifest { publication, files };
        let content = canonical_json_pretty(&manifest)?;
        fs::write(self.root().join(MANIFEST_FILE), content)
            .map_err(|source| io_err(&self.root().join(MANIFEST_FILE), source))?;

        let bucket = self.commit_in_place()?;
        Ok(SealedOutput { bucket, manifest })
    }

    /// Move the staged bucket into place without completion markers.
    pub fn commit(mut self) -> Result<PathBuf, CompilerError> {
        self.commit_in_place()
    }

    fn commit_in_place(&mut self) -> Result<PathBuf, CompilerError> {
        let bucket = self.layout.bucket.clone();
        // Not atomic: between removal and rename the bucket is briefly absent
        if bucket.exists() {
            fs::remove_dir_all(&bucket).map_err(|source| io_err(&bucket, source))?;
        }
        fs::rename(&self.layout.staging, &bucket).map_err(|source| io_err(&bucket, source))?;
        self.committed = true;
        Ok(bucket)
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_dir_all(&self.layout.staging) {
                tracing::warn!(path = %self.layout.staging.display(), error = %e, "could not remove staging directory");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SealedOutput {
    pub bucket: PathBuf,
    pub manifest: Manifest,
}

enum RenderError {
    Csv(csv::Error),
    Io(std::io::Error),
}

fn render_csv(table: &Table) -> Result<Vec<u8>, RenderError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(table.columns).map_err(RenderError::Csv)?;
    for row in &table.rows {
        writer
            .write_record(row.cells().map(|c| c.to_field()))
            .map_err(RenderError::Csv)?;
    }
    writer
        .into_inner()
        .map_err(|e| RenderError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
}

/// Every file under `root` except the top-level completion markers and
/// provenance, keyed by forward-slash relative path.
pub fn hash_tree(root: &Path) -> Result<BTreeMap<String, FileRecord>, CompilerError> {
    let mut paths = Vec::new();
    collect_files(root, root, &mut paths)?;

    let mut files = BTreeMap::new();
    for (rel, path) in paths {
        if EXCLUDED_FROM_MANIFEST.contains(&rel.as_str()) {
            continue;
        }
        let (sha256, size_bytes) = sha256_file(&path).map_err(|source| io_err(&path, source))?;
        files.insert(rel, FileRecord { sha256, size_bytes });
    }
    Ok(files)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), CompilerError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|source| io_err(dir, source))? {
        let entry = entry.map_err(|source| io_err(dir, source))?;
        entries.push(entry);
    }
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| io_err(&path, source))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| path.to_string_lossy().to_string());
            out.push((rel, path));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputVerification {
    pub verified: bool,
    pub checked: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    pub unlisted: Vec<String>,
    pub manifest_consistent: bool,
}

/// Recompute every digest listed in a published bucket.
pub fn verify_output(bucket: &Path) -> Result<OutputVerification, CompilerError> {
    let checksum_path = bucket.join(CHECKSUM_FILE);
    let manifest_path = bucket.join(MANIFEST_FILE);
    if !checksum_path.is_file() || !manifest_path.is_file() {
        return Err(CompilerError::IncompleteOutput(bucket.to_path_buf()));
    }

    let listing = fs::read_to_string(&checksum_path).map_err(|source| io_err(&checksum_path, source))?;
    let mut listed = BTreeMap::new();
    for line in listing.lines().filter(|l| !l.trim().is_empty()) {
        let (digest, rel) = line.split_once("  ").ok_or_else(|| {
            CompilerError::IncompleteOutput(checksum_path.clone())
        })?;
        listed.insert(rel.to_string(), digest.to_string());
    }

    let mut report = OutputVerification::default();
    for (rel, digest) in &listed {
        if validate_subpath(Path::new(rel)).is_err() {
            tracing::warn!(file = %rel, "checksum listing names a path outside the bucket");
            report.mismatched.push(rel.clone());
            continue;
        }
        let path = bucket.join(rel);
        if !path.is_file() {
            report.missing.push(rel.clone());
            continue;
        }
        let (actual, _) = sha256_file(&path).map_err(|source| io_err(&path, source))?;
        report.checked += 1;
        if !actual.eq_ignore_ascii_case(digest) {
            report.mismatched.push(rel.clone());
        }
    }

    let on_disk = hash_tree(bucket)?;
    let listed_names: BTreeSet<_> = listed.keys().collect();
    report.unlisted = on_disk
        .keys()
        .filter(|rel| !listed_names.contains(rel))
        .cloned()
        .collect();

    let manifest_text =
        fs::read_to_string(&manifest_path).map_err(|source| io_err(&manifest_path, source))?;
    let manifest: Manifest = serde_json::from_str(&manifest_text)?;
    report.manifest_consistent = manifest.files.len() == listed.len()
        && manifest.files.iter().all(|(rel, record)| {
            listed.get(rel) == Some(&record.sha256)
                && on_disk.get(rel).map(|f| f.size_bytes) == Some(record.size_bytes)
        });

    report.verified = report.mismatched.is_empty()
        && report.missing.is_empty()
        && report.unlisted.is_empty()
        && report.manifest_consistent;
    Ok(report)
}

fn io_err(path: &Path, source: std::io::Error) -> CompilerError {
    CompilerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256_hex;

    fn metadata() -> PublicationMetadata {
        PublicationMetadata {
            claim_id: "claim-001".into(),
            date: "2026-02-01".into(),
            version: "1.0.0".into(),
            schema_version: "1.0".into(),
            engine: EngineIdentity {
                name: "engine".into(),
                version: "1.0.0".into(),
            },
            run_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_seal_excludes_self_referential_files() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        let mut staged = layout.begin().unwrap();
        staged.write_json("derived/statistics.json", &serde_json::json!({"b": 1, "a": 2})).unwrap();
        staged.write_json(PROVENANCE_FILE, &serde_json::json!({})).unwrap();

        let sealed = staged.seal(metadata()).unwrap();
        assert_eq!(sealed.bucket, layout.bucket());
        assert!(!layout.staging().exists());

        let keys: Vec<_> = sealed.manifest.files.keys().cloned().collect();
        assert_eq!(keys, vec!["derived/statistics.json"]);

        let stats = fs::read(layout.bucket().join("derived/statistics.json")).unwrap();
        assert_eq!(stats, b"{\n  \"a\": 2,\n  \"b\": 1\n}\n");
        let listing = fs::read_to_string(layout.bucket().join(CHECKSUM_FILE)).unwrap();
        assert_eq!(listing, format!("{}  derived/statistics.json\n", sha256_hex(&stats)));
    }

    #[test]
    fn test_dropping_unsealed_output_removes_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        {
            let mut staged = layout.begin().unwrap();
            staged.write_json("derived/statistics.json", &1).unwrap();
            assert!(layout.staging().exists());
        }
        assert!(!layout.staging().exists());
        assert!(!layout.bucket().exists());
    }

    #[test]
    fn test_commit_replaces_previous_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        fs::create_dir_all(layout.bucket().join(TABLES_DIR)).unwrap();
        fs::write(layout.bucket().join("tables/stale.csv"), "old").unwrap();

        let mut staged = layout.begin().unwrap();
        staged.write_json(NO_DATA_FILE, &serde_json::json!({"status": "NO_DATA_YET"})).unwrap();
        staged.commit().unwrap();

        let names: Vec<_> = fs::read_dir(layout.bucket())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![NO_DATA_FILE]);
    }

    #[test]
    fn test_verify_detects_tampering_and_strays() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        let mut staged = layout.begin().unwrap();
        staged.write_json("derived/statistics.json", &1).unwrap();
        staged.write_json("derived/data_flow.json", &2).unwrap();
        staged.seal(metadata()).unwrap();

        let clean = verify_output(layout.bucket()).unwrap();
        assert!(clean.verified);
        assert_eq!(clean.checked, 2);

        fs::write(layout.bucket().join("derived/statistics.json"), "3\n").unwrap();
        fs::write(layout.bucket().join("derived/extra.json"), "{}").unwrap();
        let report = verify_output(layout.bucket()).unwrap();
        assert!(!report.verified);
        assert_eq!(report.mismatched, vec!["derived/statistics.json"]);
        assert_eq!(report.unlisted, vec!["derived/extra.json"]);
        assert!(report.manifest_consistent);
    }

    #[test]
    fn test_verify_refuses_paths_outside_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        let mut staged = layout.begin().unwrap();
        staged.write_json("derived/statistics.json", &1).unwrap();
        staged.seal(metadata()).unwrap();

        let secret = tmp.path().join("claim-001/secret.txt");
        fs::write(&secret, "outside").unwrap();
        let listing_path = layout.bucket().join(CHECKSUM_FILE);
        let mut listing = fs::read_to_string(&listing_path).unwrap();
        listing.push_str(&format!("{}  ../secret.txt\n", sha256_hex(b"outside")));
        fs::write(&listing_path, listing).unwrap();

        let report = verify_output(layout.bucket()).unwrap();
        assert!(!report.verified);
        assert_eq!(report.mismatched, vec!["../secret.txt"]);
        assert_eq!(report.checked, 1);
    }

    #[test]
    fn test_verify_compares_manifest_sizes() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path(), "claim-001", "2026-02-01");
        let mut staged = layout.begin().unwrap();
        staged.write_json("derived/statistics.json", &1).unwrap();
        staged.seal(metadata()).unwrap();

        let manifest_path = layout.bucket().join(MANIFEST_FILE);
        let mut manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest
            .files
            .get_mut("derived/statistics.json")
            .unwrap()
            .size_bytes += 1;
        fs::write(&manifest_path, canonical_json_pretty(&manifest).unwrap()).unwrap();

        let report = verify_output(layout.bucket()).unwrap();
        assert!(report.mismatched.is_empty());
        assert!(!report.manifest_consistent);
        assert!(!report.verified);
    }

    #[test]
    fn test_verify_rejects_unsealed_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_output(tmp.path()),
            Err(CompilerError::IncompleteOutput(_))
        ));
    }
}

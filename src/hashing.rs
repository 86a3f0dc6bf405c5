//! Hashing System - SHA-256 for Ledgers and Outputs
//!
//! Every checksum the compiler reads, declares, or writes goes through here,
//! together with the canonical JSON encoding that makes output bytes stable.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Stream a file through SHA-256, returning the hex digest and byte count
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    serde_json::to_string(&sort_value(&v))
}

/// Canonical JSON for files on disk: sorted keys, two-space indent, trailing newline.
///
/// Every JSON artifact the compiler writes uses this form so that byte-for-byte
/// diffs between runs are meaningful.
pub fn canonical_json_pretty<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let mut out = serde_json::to_string_pretty(&sort_value(&v))?;
    out.push('\n');
    Ok(out)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Fingerprint of a run's inputs
/// fingerprint = sha256(claim_id + date + canonical(checksums))
pub fn compute_input_fingerprint(
    claim_id: &str,
    date: &str,
    checksums: &impl Serialize,
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(checksums)?;
    let combined = format!("{}:{}:{}", claim_id, date, canonical);
    Ok(sha256_hex(combined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_canonical_pretty_sorts_nested_and_ends_with_newline() {
        // preserve_order keeps insertion order in Value, so sorting must be explicit
        let obj = json!({"b": {"y": 1, "x": 2}, "a": [ {"d": 1, "c": 2} ]});
        let pretty = canonical_json_pretty(&obj).unwrap();
        assert!(pretty.ends_with("}\n"));
        let a = pretty.find("\"a\"").unwrap();
        let b = pretty.find("\"b\"").unwrap();
        let c = pretty.find("\"c\"").unwrap();
        let d = pretty.find("\"d\"").unwrap();
        let x = pretty.find("\"x\"").unwrap();
        let y = pretty.find("\"y\"").unwrap();
        assert!(a < b && c < d && x < y);
        assert!(pretty.contains("\n  \"a\""));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data = vec![7u8; 70_000];
        std::fs::write(&path, &data).unwrap();

        let (digest, size) = sha256_file(&path).unwrap();
        assert_eq!(digest, sha256_hex(&data));
        assert_eq!(size, 70_000);
    }

    #[test]
    fn test_fingerprint_stable_across_map_order() {
        let mut a = BTreeMap::new();
        a.insert("x.json", "11");
        a.insert("a.json", "22");
        let h1 = compute_input_fingerprint("claim-001", "2026-01-02", &a).unwrap();
        let h2 = compute_input_fingerprint("claim-001", "2026-01-02", &a).unwrap();
        let h3 = compute_input_fingerprint("claim-001", "2026-01-03", &a).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }
}

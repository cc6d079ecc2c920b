//! Content digests and durable file writes shared by the simrun crates.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Prefix carried by every digest string so records stay self-describing.
pub const DIGEST_ALGORITHM: &str = "sha256";

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{}:{}", DIGEST_ALGORITHM, hex::encode(digest))
}

/// Streams the file through the hasher; traces are routinely several GiB.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::with_capacity(1 << 20, file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!(
        "{}:{}",
        DIGEST_ALGORITHM,
        hex::encode(hasher.finalize())
    ))
}

/// Digest of the compact serialization. Object keys come out sorted, so
/// documents that differ only in key order or whitespace hash the same.
pub fn canonical_json_digest(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    sha256_bytes(&bytes)
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "simrun_core_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp dir");
        root
    }

    #[test]
    fn sha256_bytes_matches_known_vector() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_digest_equals_byte_digest() {
        let root = temp_root("file_digest");
        let path = root.join("trace.bin");
        fs::write(&path, b"some trace payload").expect("write");
        assert_eq!(
            sha256_file(&path).expect("digest"),
            sha256_bytes(b"some trace payload")
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn file_digest_fails_for_missing_file() {
        let root = temp_root("missing");
        let err = sha256_file(&root.join("absent.xz")).expect_err("must fail");
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn canonical_digest_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(canonical_json_digest(&a), canonical_json_digest(&b));
        assert_ne!(
            canonical_json_digest(&a),
            canonical_json_digest(&json!({"b": 2}))
        );
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let root = temp_root("atomic");
        let path = root.join("nested").join("out.json");
        atomic_write_json_pretty(&path, &json!({"k": "v"})).expect("write");
        let v: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["k"], "v");
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        let _ = fs::remove_dir_all(root);
    }
}

//! Write-once provenance records describing how a simulation run was produced.
//!
//! One record lives inside each run directory. Its field names are the
//! reproducibility contract and must only ever grow, never change shape.

use serde::{Deserialize, Serialize};
use simrun_core::sha256_file;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PROVENANCE_FILE: &str = "run_metadata.json";
pub const SCHEMA_VERSION: &str = "run_metadata_v1";

#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    #[error("provenance record already exists (records are write-once): {0}")]
    AlreadyExists(PathBuf),

    #[error("provenance record not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to write provenance record {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("failed to read provenance record: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed provenance record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub schema_version: String,
    /// Shared by every group launched from one invocation.
    pub run_id: String,
    /// Unique to this group.
    pub sim_id: String,
    /// UTC, RFC 3339, second precision.
    pub run_datetime: String,
    pub variant: String,
    pub core_count: usize,
    pub trace_path: Vec<String>,
    /// Parallel to `trace_path`.
    pub trace_checksum: Vec<String>,
    pub config_checksum: String,
    pub binary_checksum: Option<String>,
    pub source_revision: Option<String>,
    pub command: Vec<String>,
    pub command_line: String,
    pub log_path: String,
}

impl ProvenanceRecord {
    pub fn path_in(run_dir: &Path) -> PathBuf {
        run_dir.join(PROVENANCE_FILE)
    }
}

/// Persists `record` into `run_dir`. Refuses to replace an existing record.
///
/// The record is written to a temp file and hard-linked into place, so it
/// appears complete or not at all, and the link fails if a record already
/// exists.
pub fn write_record(run_dir: &Path, record: &ProvenanceRecord) -> Result<PathBuf, ProvenanceError> {
    static TMP_SEQ: AtomicUsize = AtomicUsize::new(0);

    let path = ProvenanceRecord::path_in(run_dir);
    let bytes = serde_json::to_vec_pretty(record)?;
    let tmp = run_dir.join(format!(
        ".{}.tmp.{}.{}",
        PROVENANCE_FILE,
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    let write_err = |e: std::io::Error| ProvenanceError::Write {
        path: ProvenanceRecord::path_in(run_dir),
        message: e.to_string(),
    };

    let written = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    let linked = fs::hard_link(&tmp, &path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(path),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(ProvenanceError::AlreadyExists(path)),
        Err(e) => Err(write_err(e)),
    }
}

pub fn read_record(run_dir: &Path) -> Result<ProvenanceRecord, ProvenanceError> {
    let path = ProvenanceRecord::path_in(run_dir);
    if !path.exists() {
        return Err(ProvenanceError::NotFound(path));
    }
    let record = serde_json::from_slice(&fs::read(&path)?)?;
    Ok(record)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    /// Empty for a recorded checksum that has no trace entry.
    pub trace_path: String,
    pub recorded: String,
    /// `None` when the trace could no longer be read.
    pub actual: Option<String>,
}

/// Recomputes every trace digest and reports the ones that no longer match.
/// Checksums and paths that do not pair up are mismatches too.
pub fn verify_record(record: &ProvenanceRecord) -> Vec<ChecksumMismatch> {
    let mut mismatches = Vec::new();
    for (idx, trace) in record.trace_path.iter().enumerate() {
        let recorded = record
            .trace_checksum
            .get(idx)
            .cloned()
            .unwrap_or_default();
        let actual = sha256_file(Path::new(trace)).ok();
        if actual.as_deref() != Some(recorded.as_str()) {
            mismatches.push(ChecksumMismatch {
                trace_path: trace.clone(),
                recorded,
                actual,
            });
        }
    }
    for extra in record.trace_checksum.iter().skip(record.trace_path.len()) {
        mismatches.push(ChecksumMismatch {
            trace_path: String::new(),
            recorded: extra.clone(),
            actual: None,
        });
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use simrun_core::{ensure_dir, sha256_bytes};

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "simrun_prov_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp dir");
        root
    }

    fn sample(trace: &Path, checksum: String) -> ProvenanceRecord {
        ProvenanceRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: "3f0c".to_string(),
            sim_id: "9a1e".to_string(),
            run_datetime: "2024-05-01T12:34:56Z".to_string(),
            variant: "bimodal-no-next_line-no-no-lru-1c".to_string(),
            core_count: 1,
            trace_path: vec![trace.display().to_string()],
            trace_checksum: vec![checksum],
            config_checksum: sha256_bytes(b"{}"),
            binary_checksum: None,
            source_revision: Some("deadbeef".to_string()),
            command: vec!["bin/sim".to_string(), trace.display().to_string()],
            command_line: format!("bin/sim {}", trace.display()),
            log_path: "sim_output.log".to_string(),
        }
    }

    #[test]
    fn record_round_trips_and_verifies() {
        let root = temp_root("roundtrip");
        let trace = root.join("600.perlbench_s-210B.champsimtrace.xz");
        fs::write(&trace, b"trace bytes").expect("trace");
        let record = sample(&trace, sha256_file(&trace).expect("digest"));

        write_record(&root, &record).expect("write");
        let back = read_record(&root).expect("read");
        assert_eq!(back, record);
        assert!(verify_record(&back).is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn record_is_write_once() {
        let root = temp_root("once");
        let trace = root.join("t.xz");
        fs::write(&trace, b"x").expect("trace");
        let record = sample(&trace, sha256_bytes(b"x"));
        write_record(&root, &record).expect("first write");
        let err = write_record(&root, &record).expect_err("second write must fail");
        assert!(matches!(err, ProvenanceError::AlreadyExists(_)));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn existing_record_is_never_replaced() {
        let root = temp_root("noclobber");
        let trace = root.join("t.xz");
        fs::write(&trace, b"x").expect("trace");
        let path = ProvenanceRecord::path_in(&root);
        fs::write(&path, b"{\"written\": \"elsewhere\"}").expect("foreign record");

        let err = write_record(&root, &sample(&trace, sha256_bytes(b"x")))
            .expect_err("must not replace");
        assert!(matches!(err, ProvenanceError::AlreadyExists(ref p) if *p == path));
        assert_eq!(fs::read(&path).unwrap(), b"{\"written\": \"elsewhere\"}");
        let mut names: Vec<String> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![PROVENANCE_FILE.to_string(), "t.xz".to_string()]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn verify_reports_unpaired_checksums() {
        let root = temp_root("unpaired");
        let trace = root.join("t.xz");
        fs::write(&trace, b"x").expect("trace");
        let mut record = sample(&trace, sha256_bytes(b"x"));
        record.trace_checksum.push(sha256_bytes(b"ghost"));

        let mismatches = verify_record(&record);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].trace_path, "");
        assert_eq!(mismatches[0].recorded, sha256_bytes(b"ghost"));

        record.trace_checksum.clear();
        let mismatches = verify_record(&record);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].recorded, "");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn verify_reports_modified_and_missing_traces() {
        let root = temp_root("verify");
        let trace = root.join("t.xz");
        fs::write(&trace, b"original").expect("trace");
        let record = sample(&trace, sha256_bytes(b"original"));

        fs::write(&trace, b"tampered").expect("rewrite");
        let mismatches = verify_record(&record);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].actual, Some(sha256_bytes(b"tampered")));

        fs::remove_file(&trace).expect("remove");
        let mismatches = verify_record(&record);
        assert_eq!(mismatches[0].actual, None);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn read_missing_record_is_not_found() {
        let root = temp_root("absent");
        assert!(matches!(
            read_record(&root),
            Err(ProvenanceError::NotFound(_))
        ));
        let _ = fs::remove_dir_all(root);
    }
}

//! Run directory naming.
//!
//! A run directory is `<timestamp>_<variant>_<trace identity>` under the
//! output root, where the trace identity covers every trace in the group.
//! Existing paths are never reused.

use crate::error::{Result, RunnerError};
use crate::settings::TraceNaming;
use crate::variant::VariantIdentity;
use chrono::{DateTime, Utc};
use regex::Regex;
use simrun_core::sha256_bytes;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Matches SPEC-style trace names such as `602.gcc_s-734B.champsimtrace.xz`.
const STRUCTURED_PATTERN: &str = r"^(\d+)\.[^-]+-(\d+[KMBG]?)";

const TRACE_EXTENSIONS: &[&str] = &["xz", "gz", "bz2", "zst", "trace", "champsimtrace"];

/// Joined group identities longer than this are shortened to the lead
/// identity plus a digest of the full join.
const MAX_GROUP_IDENTITY_LEN: usize = 120;
const GROUP_DIGEST_CHARS: usize = 12;

/// Derives the short, human-legible name of a trace for directory names.
pub trait TraceIdentity {
    fn identify(&self, trace: &Path) -> String;

    /// A broadcast group keeps the single trace's identity; a mix joins the
    /// per-core identities in core order with `+`.
    fn identify_group(&self, traces: &[PathBuf]) -> String {
        join_identities(traces.iter().map(|t| self.identify(t)).collect())
    }
}

fn join_identities(ids: Vec<String>) -> String {
    let Some(lead) = ids.first() else {
        return String::new();
    };
    if ids.iter().all(|id| id == lead) {
        return lead.clone();
    }
    let joined = ids.join("+");
    if joined.len() <= MAX_GROUP_IDENTITY_LEN {
        return joined;
    }
    let digest = sha256_bytes(joined.as_bytes());
    let hex = digest.rsplit(':').next().unwrap_or(&digest);
    format!("{}+{}", lead, &hex[..GROUP_DIGEST_CHARS.min(hex.len())])
}

/// File name with compression and trace extensions stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasenameFallback;

impl TraceIdentity for BasenameFallback {
    fn identify(&self, trace: &Path) -> String {
        let mut name = trace
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "trace".to_string());
        while let Some((stem, ext)) = name.rsplit_once('.') {
            if stem.is_empty() || !TRACE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                break;
            }
            name = stem.to_string();
        }
        sanitize(&name)
    }
}

/// Capture groups of a filename pattern joined with `-`; names that do not
/// match fall back to [`BasenameFallback`].
#[derive(Debug, Clone)]
pub struct StructuredFilename {
    pattern: Regex,
}

impl StructuredFilename {
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| RunnerError::Config(format!("invalid trace pattern: {}", e)))?;
        if pattern.captures_len() < 2 {
            return Err(RunnerError::Config(
                "trace pattern needs at least one capture group".to_string(),
            ));
        }
        Ok(Self { pattern })
    }
}

impl Default for StructuredFilename {
    fn default() -> Self {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(STRUCTURED_PATTERN).expect("static trace pattern"))
            .clone();
        Self { pattern }
    }
}

impl TraceIdentity for StructuredFilename {
    fn identify(&self, trace: &Path) -> String {
        let name = trace
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.pattern.captures(&name) {
            Some(caps) => {
                let parts: Vec<&str> = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str())
                    .filter(|s| !s.is_empty())
                    .collect();
                if parts.is_empty() {
                    BasenameFallback.identify(trace)
                } else {
                    sanitize(&parts.join("-"))
                }
            }
            None => BasenameFallback.identify(trace),
        }
    }
}

pub fn strategy_for(naming: TraceNaming, pattern: Option<&str>) -> Result<Box<dyn TraceIdentity>> {
    Ok(match naming {
        TraceNaming::Basename => Box::new(BasenameFallback),
        TraceNaming::Structured => match pattern {
            Some(p) => Box::new(StructuredFilename::with_pattern(p)?),
            None => Box::new(StructuredFilename::default()),
        },
    })
}

/// UTC, second precision, no colons, offset written as `Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H%M%SZ").to_string()
}

pub fn run_dir_name(ts: &DateTime<Utc>, variant: &VariantIdentity, trace_identity: &str) -> String {
    format!("{}_{}_{}", format_timestamp(ts), variant, trace_identity)
}

/// Creates and returns a fresh run directory. The output root is created on
/// demand; an existing run directory is a collision, never reused.
pub fn allocate(
    output_root: &Path,
    ts: &DateTime<Utc>,
    variant: &VariantIdentity,
    trace_identity: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_root)
        .map_err(|e| RunnerError::persistence(output_root, e))?;
    let path = output_root.join(run_dir_name(ts, variant, trace_identity));
    match fs::create_dir(&path) {
        Ok(()) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(RunnerError::DirectoryCollision(path))
        }
        Err(e) => Err(RunnerError::persistence(path, e)),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' || c == ':' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

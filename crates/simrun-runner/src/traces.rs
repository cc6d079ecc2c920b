//! Trace batches and broadcast expansion.

use crate::error::{Result, RunnerError};
use std::fs;
use std::path::{Path, PathBuf};

/// Traces for the cores of one run, in core order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceGroup(Vec<PathBuf>);

impl TraceGroup {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self(paths)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The trace that names the run.
    pub fn lead(&self) -> Option<&Path> {
        self.0.first().map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceBatch {
    groups: Vec<TraceGroup>,
}

/// A batch whose every group has exactly one trace per core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedBatch {
    pub core_count: usize,
    pub groups: Vec<TraceGroup>,
}

impl TraceBatch {
    pub fn new(groups: Vec<TraceGroup>) -> Result<Self> {
        if groups.is_empty() {
            return Err(RunnerError::Config("no traces given".to_string()));
        }
        let reference = groups[0].len();
        for (idx, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(RunnerError::shape(
                    format!("group {}", idx + 1),
                    "group has no traces",
                ));
            }
            if group.len() != reference {
                return Err(RunnerError::shape(
                    format!("group {}", idx + 1),
                    format!(
                        "has {} traces but the first group has {}; every group must have the same number of traces",
                        group.len(),
                        reference
                    ),
                ));
            }
        }
        Ok(Self { groups })
    }

    /// Explicitly listed traces form a single run.
    pub fn from_paths(paths: Vec<PathBuf>) -> Result<Self> {
        Self::new(vec![TraceGroup::new(paths)])
    }

    /// One group per non-blank line, entries separated by commas.
    pub fn parse_tracelist(content: &str) -> Result<Self> {
        let mut groups = Vec::new();
        let mut reference: Option<usize> = None;
        for (line_idx, line) in content.lines().enumerate() {
            let trimmed = line.trim_matches(|c: char| c == ',' || c.is_whitespace());
            if trimmed.is_empty() {
                continue;
            }
            let entries: Vec<PathBuf> = trimmed
                .split(',')
                .map(|s| PathBuf::from(s.trim()))
                .collect();
            if entries.iter().any(|p| p.as_os_str().is_empty()) {
                return Err(RunnerError::shape(
                    format!("tracelist line {}", line_idx + 1),
                    "empty trace entry",
                ));
            }
            match reference {
                None => reference = Some(entries.len()),
                Some(n) if n != entries.len() => {
                    return Err(RunnerError::shape(
                        format!("tracelist line {}", line_idx + 1),
                        format!(
                            "has {} traces but the first line has {}; every line must have the same number of traces",
                            entries.len(),
                            n
                        ),
                    ));
                }
                Some(_) => {}
            }
            groups.push(TraceGroup::new(entries));
        }
        Self::new(groups)
    }

    pub fn from_tracelist_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_tracelist(&content)
    }

    pub fn groups(&self) -> &[TraceGroup] {
        &self.groups
    }

    /// Checks every group against the core count and broadcasts single-trace
    /// groups to all cores. Leaves `self` untouched.
    pub fn expand(&self, core_count: usize) -> Result<ExpandedBatch> {
        let mut groups = Vec::with_capacity(self.groups.len());
        for (idx, group) in self.groups.iter().enumerate() {
            let label = format!("group {}", idx + 1);
            if group.len() == core_count {
                groups.push(group.clone());
            } else if group.len() == 1 {
                groups.push(TraceGroup::new(vec![group.0[0].clone(); core_count]));
            } else {
                return Err(RunnerError::shape(
                    label,
                    format!(
                        "has {} traces; the number of traces must equal the core count ({}) or one",
                        group.len(),
                        core_count
                    ),
                ));
            }
        }
        Ok(ExpandedBatch { core_count, groups })
    }
}

use crate::error::{Result, RunnerError};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

pub const LOG_FILE: &str = "sim_output.log";

/// A simulator process that was started and left running. Nothing waits on
/// it during orchestration; the child handle is kept so a caller can poll.
#[derive(Debug)]
pub struct LaunchedRun {
    pub pid: u32,
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Shell-quoted form of the command that was started.
    pub command_line: String,
    child: Child,
}

impl LaunchedRun {
    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait()
    }
}

/// Starts `command` with stdout and stderr appended to one log file in
/// `run_dir` and returns without waiting.
pub fn launch(command: &[String], run_dir: &Path) -> Result<LaunchedRun> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| RunnerError::Config("empty simulator command".to_string()))?;
    let log_path = run_dir.join(LOG_FILE);
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| RunnerError::persistence(&log_path, e))?;
    let log_err = log
        .try_clone()
        .map_err(|e| RunnerError::persistence(&log_path, e))?;

    let started_at = Utc::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|source| RunnerError::Launch {
            program: PathBuf::from(program),
            source,
        })?;
    Ok(LaunchedRun {
        pid: child.id(),
        run_dir: run_dir.to_path_buf(),
        log_path,
        started_at,
        command_line: shell_join(command),
        child,
    })
}

pub fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=+".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

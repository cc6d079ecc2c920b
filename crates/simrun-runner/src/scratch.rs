use crate::error::{Result, RunnerError};
use serde_json::Value;
use simrun_core::atomic_write_json_pretty;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "champsim_config.json";

/// Per-invocation scratch directory. Removed when dropped, whichever way the
/// batch ends.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn acquire(parent: &Path, run_id: &str) -> Result<Self> {
        let parent = if parent.is_absolute() {
            parent.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| RunnerError::Scratch {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?
                .join(parent)
        };
        let path = parent.join(format!("temp_{}", run_id));
        match fs::create_dir(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "scratch directory acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(RunnerError::Scratch {
                path,
                message: "already exists; refusing to share it with another invocation".to_string(),
            }),
            Err(e) => Err(RunnerError::Scratch {
                path,
                message: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the configuration the build step consumes.
    pub fn stage_config(&self, config: &Value) -> Result<PathBuf> {
        let path = self.path.join(CONFIG_FILE);
        atomic_write_json_pretty(&path, config).map_err(|e| RunnerError::Scratch {
            path: path.clone(),
            message: format!("{:#}", e),
        })?;
        Ok(path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

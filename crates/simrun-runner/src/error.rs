use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("trace shape error in {group}: {message}")]
    Shape { group: String, message: String },

    #[error(
        "build failed: `{command}` exited with {status}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    Build {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("run directory already exists: {0}")]
    DirectoryCollision(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist {path}: {message}")]
    Persistence { path: PathBuf, message: String },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scratch directory error at {path}: {message}")]
    Scratch { path: PathBuf, message: String },
}

impl RunnerError {
    /// Fatal errors abort the whole batch; the rest only cost one group.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Config(_)
                | RunnerError::Shape { .. }
                | RunnerError::Build { .. }
                | RunnerError::Scratch { .. }
        )
    }

    /// Short phase name used in logs and JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::Config(_) => "config_error",
            RunnerError::Shape { .. } => "shape_error",
            RunnerError::Build { .. } => "build_error",
            RunnerError::DirectoryCollision(_) => "directory_collision",
            RunnerError::Io { .. } => "io_error",
            RunnerError::Persistence { .. } => "persistence_error",
            RunnerError::Launch { .. } => "launch_error",
            RunnerError::Scratch { .. } => "scratch_error",
        }
    }

    pub(crate) fn shape(group: impl Into<String>, message: impl Into<String>) -> Self {
        RunnerError::Shape {
            group: group.into(),
            message: message.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RunnerError::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

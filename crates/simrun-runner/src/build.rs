use crate::error::{Result, RunnerError};
use crate::settings::{BuildPolicy, RunnerSettings};
use crate::variant::VariantIdentity;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Produces the simulator binary for a variant. The orchestrator calls this
/// at most once per invocation.
pub trait VariantBuilder {
    fn build(&self, identity: &VariantIdentity, config_path: &Path) -> Result<BuildResult>;
}

pub fn binary_path(settings: &RunnerSettings, identity: &VariantIdentity) -> PathBuf {
    settings.bin_path().join(identity.as_str())
}

pub fn needs_build(binary: &Path, policy: BuildPolicy) -> bool {
    match policy {
        BuildPolicy::Force => true,
        BuildPolicy::Skip => false,
        BuildPolicy::Auto => !binary.is_file(),
    }
}

/// Runs the simulator's own configure and build steps in its source tree.
#[derive(Debug, Clone)]
pub struct ExternalBuilder {
    root: PathBuf,
    configure_command: Vec<String>,
    build_command: Vec<String>,
}

impl ExternalBuilder {
    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self {
            root: settings.simulator_root.clone(),
            configure_command: settings.configure_command.clone(),
            build_command: settings.build_command.clone(),
        }
    }
}

impl VariantBuilder for ExternalBuilder {
    fn build(&self, identity: &VariantIdentity, config_path: &Path) -> Result<BuildResult> {
        let mut stdout = String::new();
        let mut stderr = String::new();
        if !self.configure_command.is_empty() {
            let mut configure = self.configure_command.clone();
            configure.push(config_path.display().to_string());
            let step = run_step(&self.root, &configure)?;
            info!(variant = %identity, "simulator configured");
            stdout.push_str(&step.stdout);
            stderr.push_str(&step.stderr);
        }
        let step = run_step(&self.root, &self.build_command)?;
        info!(variant = %identity, "simulator built");
        stdout.push_str(&step.stdout);
        stderr.push_str(&step.stderr);
        Ok(BuildResult {
            success: true,
            stdout,
            stderr,
        })
    }
}

fn run_step(root: &Path, command: &[String]) -> Result<BuildResult> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| RunnerError::Config("empty build step".to_string()))?;
    let program = resolve_program(root, program);
    let command_line = command.join(" ");
    debug!(command = %command_line, root = %root.display(), "running build step");
    let output = Command::new(&program)
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| RunnerError::Build {
            command: command_line.clone(),
            status: "not started".to_string(),
            stdout: String::new(),
            stderr: e.to_string(),
        })?;
    let result = BuildResult {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    if !result.success {
        return Err(RunnerError::Build {
            command: command_line,
            status: output.status.to_string(),
            stdout: result.stdout,
            stderr: result.stderr,
        });
    }
    debug!(command = %command_line, stdout = %result.stdout, stderr = %result.stderr, "build step finished");
    Ok(result)
}

/// Path-like programs are relative to the simulator root, not to our cwd.
fn resolve_program(root: &Path, program: &str) -> PathBuf {
    let candidate = Path::new(program);
    if candidate.is_relative() && program.contains('/') {
        root.join(candidate)
    } else {
        candidate.to_path_buf()
    }
}

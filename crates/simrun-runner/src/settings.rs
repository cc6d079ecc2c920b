use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceNaming {
    #[default]
    Structured,
    Basename,
}

impl TraceNaming {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceNaming::Structured => "structured",
            TraceNaming::Basename => "basename",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Build only when no binary exists for the variant.
    #[default]
    Auto,
    Force,
    Skip,
}

impl BuildPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildPolicy::Auto => "auto",
            BuildPolicy::Force => "force",
            BuildPolicy::Skip => "skip",
        }
    }
}

/// Where the simulator lives and how to drive it. Loaded from YAML; every
/// field has a default matching a stock ChampSim checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    pub simulator_root: PathBuf,
    pub bin_dir: PathBuf,
    pub configure_command: Vec<String>,
    pub build_command: Vec<String>,
    pub output_root: PathBuf,
    pub warmup_instructions: u64,
    pub simulation_instructions: u64,
    pub trace_naming: TraceNaming,
    /// Overrides the structured filename pattern; capture groups are joined
    /// with `-`.
    pub trace_pattern: Option<String>,
    pub build_policy: BuildPolicy,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            simulator_root: PathBuf::from("."),
            bin_dir: PathBuf::from("bin"),
            configure_command: vec!["./config.sh".to_string()],
            build_command: vec!["make".to_string(), "-j".to_string(), "28".to_string()],
            output_root: PathBuf::from("simulation-results"),
            warmup_instructions: 50_000_000,
            simulation_instructions: 200_000_000,
            trace_naming: TraceNaming::Structured,
            trace_pattern: None,
            build_policy: BuildPolicy::Auto,
        }
    }
}

impl RunnerSettings {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let settings: RunnerSettings = serde_yaml::from_str(raw)
            .map_err(|e| RunnerError::Config(format!("invalid runner settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.build_command.is_empty() {
            return Err(RunnerError::Config(
                "build_command must name an executable".to_string(),
            ));
        }
        if self.simulation_instructions == 0 {
            return Err(RunnerError::Config(
                "simulation_instructions must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bin_path(&self) -> PathBuf {
        self.simulator_root.join(&self.bin_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = RunnerSettings::from_yaml("{}").expect("defaults");
        assert_eq!(settings, RunnerSettings::default());
        assert_eq!(settings.bin_path(), PathBuf::from("./bin"));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let yaml = r#"
simulator_root: /opt/champsim
build_command: [make, -j, "4"]
trace_naming: basename
build_policy: force
warmup_instructions: 10
"#;
        let settings = RunnerSettings::from_yaml(yaml).expect("parse");
        assert_eq!(settings.simulator_root, PathBuf::from("/opt/champsim"));
        assert_eq!(settings.build_command, vec!["make", "-j", "4"]);
        assert_eq!(settings.trace_naming, TraceNaming::Basename);
        assert_eq!(settings.build_policy, BuildPolicy::Force);
        assert_eq!(settings.warmup_instructions, 10);
        assert_eq!(settings.simulation_instructions, 200_000_000);
    }

    #[test]
    fn unknown_keys_and_empty_build_command_are_rejected() {
        assert!(RunnerSettings::from_yaml("simulator: x").is_err());
        let err = RunnerSettings::from_yaml("build_command: []").expect_err("empty");
        assert!(err.to_string().contains("build_command"));
    }
}

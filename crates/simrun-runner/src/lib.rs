//! Reproducible batch execution of an externally built simulator.
//!
//! One invocation resolves a build variant from the simulator configuration,
//! builds it when needed, then gives every trace group its own run directory,
//! provenance record and background simulator process.

pub mod build;
pub mod error;
pub mod launch;
pub mod naming;
pub mod scratch;
pub mod settings;
pub mod traces;
pub mod variant;

pub use build::{binary_path, needs_build, BuildResult, ExternalBuilder, VariantBuilder};
pub use error::{Result, RunnerError};
pub use launch::{launch, shell_join, LaunchedRun, LOG_FILE};
pub use naming::{allocate, BasenameFallback, StructuredFilename, TraceIdentity};
pub use scratch::{ScratchDir, CONFIG_FILE};
pub use settings::{BuildPolicy, RunnerSettings, TraceNaming};
pub use traces::{ExpandedBatch, TraceBatch, TraceGroup};
pub use variant::{VariantConfig, VariantIdentity, MAX_CORES};

use chrono::{DateTime, SecondsFormat, Utc};
use simrun_core::sha256_file;
use simrun_provenance::{write_record, ProvenanceRecord, SCHEMA_VERSION};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const RESULTS_FILE: &str = "simulation_results.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceInput {
    /// Explicit traces, one per core, forming a single run.
    Paths(Vec<PathBuf>),
    /// A file with one comma-separated group per line.
    Tracelist(PathBuf),
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub config_path: PathBuf,
    pub traces: TraceInput,
    pub settings: RunnerSettings,
    /// Directory that receives the per-invocation scratch directory.
    pub scratch_parent: PathBuf,
}

/// Everything that can be decided without touching the filesystem beyond
/// reading inputs.
pub struct BatchPlan {
    pub variant_config: VariantConfig,
    pub variant: VariantIdentity,
    pub raw_config: serde_json::Value,
    pub config_checksum: String,
    pub binary: PathBuf,
    pub needs_build: bool,
    pub source: TraceBatch,
    pub batch: ExpandedBatch,
    trace_identity: Box<dyn TraceIdentity>,
}

impl BatchPlan {
    /// Names the group in its run directory; distinct groups of one batch
    /// get distinct identities.
    pub fn group_identity(&self, group: &TraceGroup) -> String {
        self.trace_identity.identify_group(group.paths())
    }
}

#[derive(Debug, Clone)]
pub struct RunDescriptor {
    pub group_index: usize,
    pub traces: TraceGroup,
    pub variant: VariantIdentity,
    pub run_dir: PathBuf,
    pub run_id: String,
    pub sim_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SkippedGroup {
    pub group_index: usize,
    pub lead_trace: PathBuf,
    pub error: RunnerError,
}

#[derive(Debug)]
pub struct BatchReport {
    pub run_id: String,
    pub variant: VariantIdentity,
    pub binary: PathBuf,
    pub built: bool,
    pub launched: Vec<LaunchedRun>,
    pub skipped: Vec<SkippedGroup>,
}

/// Resolves the variant and validates the trace batch. Fails with a config
/// or shape error before anything is created.
pub fn plan_batch(request: &BatchRequest) -> Result<BatchPlan> {
    let settings = &request.settings;
    settings.validate()?;
    let (variant_config, raw_config) = VariantConfig::from_file(&request.config_path)?;
    let config_checksum = sha256_file(&request.config_path).map_err(|e| {
        RunnerError::Config(format!(
            "cannot read {}: {}",
            request.config_path.display(),
            e
        ))
    })?;
    let variant = variant_config.resolve();

    let source = match &request.traces {
        TraceInput::Paths(paths) => TraceBatch::from_paths(paths.clone())?,
        TraceInput::Tracelist(path) => TraceBatch::from_tracelist_file(path)?,
    };
    let batch = source.expand(variant_config.num_cores)?;
    let trace_identity =
        naming::strategy_for(settings.trace_naming, settings.trace_pattern.as_deref())?;

    let binary = absolute(&binary_path(settings, &variant));
    let needs_build = needs_build(&binary, settings.build_policy);
    Ok(BatchPlan {
        variant_config,
        variant,
        raw_config,
        config_checksum,
        binary,
        needs_build,
        source,
        batch,
        trace_identity,
    })
}

/// Builds if needed, then sets up and launches every group in order. Fatal
/// errors abort; per-group errors are logged and the group is skipped.
pub fn run_batch(request: &BatchRequest, builder: &dyn VariantBuilder) -> Result<BatchReport> {
    let plan = plan_batch(request)?;
    let run_id = Uuid::new_v4().simple().to_string();
    let scratch = ScratchDir::acquire(&request.scratch_parent, &run_id)?;
    run_batch_with_scratch(request, &plan, &run_id, &scratch, builder)
}

pub fn run_batch_with_scratch(
    request: &BatchRequest,
    plan: &BatchPlan,
    run_id: &str,
    scratch: &ScratchDir,
    builder: &dyn VariantBuilder,
) -> Result<BatchReport> {
    let settings = &request.settings;
    info!(run_id, variant = %plan.variant, groups = plan.batch.groups.len(), "starting batch");

    if plan.needs_build {
        let build_config = variant::config_for_build(&plan.raw_config, &plan.variant)?;
        let staged = scratch.stage_config(&build_config)?;
        builder.build(&plan.variant, &staged)?;
        if !plan.binary.is_file() {
            warn!(binary = %plan.binary.display(), "build finished but the variant binary is missing");
        }
    } else {
        info!(binary = %plan.binary.display(), policy = settings.build_policy.as_str(), "skipping build");
    }

    let binary_checksum = sha256_file(&plan.binary).ok();
    let source_revision = source_revision(&settings.simulator_root);
    let ctx = GroupContext {
        request,
        plan,
        run_id,
        output_root: absolute(&settings.output_root),
        binary_checksum,
        source_revision,
    };

    let mut launched = Vec::new();
    let mut skipped = Vec::new();
    for (idx, group) in plan.batch.groups.iter().enumerate() {
        let lead_trace = group.lead().map(Path::to_path_buf).unwrap_or_default();
        match ctx.run_group(idx, group) {
            Ok(run) => {
                info!(
                    run_id,
                    group = idx + 1,
                    pid = run.pid,
                    run_dir = %run.run_dir.display(),
                    "simulation launched"
                );
                launched.push(run);
            }
            Err(err) => {
                error!(
                    run_id,
                    group = idx + 1,
                    lead_trace = %lead_trace.display(),
                    code = err.code(),
                    "skipping group: {}",
                    err
                );
                skipped.push(SkippedGroup {
                    group_index: idx,
                    lead_trace,
                    error: err,
                });
            }
        }
    }

    Ok(BatchReport {
        run_id: run_id.to_string(),
        variant: plan.variant.clone(),
        binary: plan.binary.clone(),
        built: plan.needs_build,
        launched,
        skipped,
    })
}

struct GroupContext<'a> {
    request: &'a BatchRequest,
    plan: &'a BatchPlan,
    run_id: &'a str,
    output_root: PathBuf,
    binary_checksum: Option<String>,
    source_revision: Option<String>,
}

impl GroupContext<'_> {
    fn run_group(&self, idx: usize, group: &TraceGroup) -> Result<LaunchedRun> {
        if group.is_empty() {
            return Err(RunnerError::shape(format!("group {}", idx + 1), "group has no traces"));
        }
        let started_at = Utc::now();
        let run_dir = allocate(
            &self.output_root,
            &started_at,
            &self.plan.variant,
            &self.plan.group_identity(group),
        )?;
        let descriptor = RunDescriptor {
            group_index: idx,
            traces: group.clone(),
            variant: self.plan.variant.clone(),
            run_dir,
            run_id: self.run_id.to_string(),
            sim_id: Uuid::new_v4().simple().to_string(),
            started_at,
        };

        let (trace_paths, trace_checksums) = checksum_traces(group)?;

        let config_copy = descriptor.run_dir.join(CONFIG_FILE);
        fs::copy(&self.request.config_path, &config_copy)
            .map_err(|e| RunnerError::persistence(&config_copy, e))?;

        let command = self.simulator_command(&descriptor.run_dir, &trace_paths);
        let record = ProvenanceRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: descriptor.run_id.clone(),
            sim_id: descriptor.sim_id.clone(),
            run_datetime: descriptor
                .started_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            variant: descriptor.variant.to_string(),
            core_count: self.plan.batch.core_count,
            trace_path: trace_paths,
            trace_checksum: trace_checksums,
            config_checksum: self.plan.config_checksum.clone(),
            binary_checksum: self.binary_checksum.clone(),
            source_revision: self.source_revision.clone(),
            command_line: shell_join(&command),
            command: command.clone(),
            log_path: descriptor.run_dir.join(LOG_FILE).display().to_string(),
        };
        write_record(&descriptor.run_dir, &record).map_err(|e| {
            RunnerError::persistence(ProvenanceRecord::path_in(&descriptor.run_dir), e)
        })?;
        info!(
            sim_id = %descriptor.sim_id,
            command = %record.command_line,
            "provenance recorded"
        );

        launch(&command, &descriptor.run_dir)
    }

    fn simulator_command(&self, run_dir: &Path, traces: &[String]) -> Vec<String> {
        let settings = &self.request.settings;
        let mut cmd = vec![
            self.plan.binary.display().to_string(),
            "--warmup-instructions".to_string(),
            settings.warmup_instructions.to_string(),
            "--simulation-instructions".to_string(),
            settings.simulation_instructions.to_string(),
            "--json".to_string(),
            run_dir.join(RESULTS_FILE).display().to_string(),
        ];
        cmd.extend(traces.iter().cloned());
        cmd
    }
}

/// Absolute trace paths and their digests, in core order. A trace broadcast
/// to several cores is read once.
fn checksum_traces(group: &TraceGroup) -> Result<(Vec<String>, Vec<String>)> {
    let mut cache: HashMap<&Path, (String, String)> = HashMap::new();
    let mut paths = Vec::with_capacity(group.len());
    let mut checksums = Vec::with_capacity(group.len());
    for trace in group.paths() {
        let entry = match cache.get(trace.as_path()) {
            Some(hit) => hit.clone(),
            None => {
                let io_err = |source| RunnerError::Io {
                    path: trace.clone(),
                    source,
                };
                let digest = sha256_file(trace).map_err(io_err)?;
                let resolved = fs::canonicalize(trace).map_err(io_err)?;
                let entry = (resolved.display().to_string(), digest);
                cache.insert(trace.as_path(), entry.clone());
                entry
            }
        };
        paths.push(entry.0);
        checksums.push(entry.1);
    }
    Ok((paths, checksums))
}

fn source_revision(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let rev = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!rev.is_empty()).then_some(rev)
        }
        Ok(out) => {
            warn!(
                root = %root.display(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "source revision unavailable"
            );
            None
        }
        Err(e) => {
            warn!(root = %root.display(), error = %e, "source revision unavailable");
            None
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

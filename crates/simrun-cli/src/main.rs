use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use simrun_runner::{
    BatchPlan, BatchReport, BatchRequest, BuildPolicy, ExternalBuilder, RunnerError,
    RunnerSettings, TraceInput, TraceNaming,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "simrun",
    version = "0.3.0",
    about = "Build and launch simulator runs with recorded provenance"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum NamingArg {
    #[value(name = "structured")]
    Structured,
    #[value(name = "basename")]
    Basename,
}

impl From<NamingArg> for TraceNaming {
    fn from(value: NamingArg) -> Self {
        match value {
            NamingArg::Structured => TraceNaming::Structured,
            NamingArg::Basename => TraceNaming::Basename,
        }
    }
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("trace_source").required(true).args(["trace", "tracelist"])))]
struct BatchArgs {
    /// Simulator configuration passed to the build.
    #[arg(long, short = 'c', default_value = "champsim_config.json")]
    config: PathBuf,
    /// Trace file for one core; repeat for multi-core runs.
    #[arg(long)]
    trace: Vec<PathBuf>,
    /// File with one comma-separated trace group per line.
    #[arg(long)]
    tracelist: Option<PathBuf>,
    /// Runner settings (YAML).
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    simulator_root: Option<PathBuf>,
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long = "warmup-instructions", short = 'w')]
    warmup: Option<u64>,
    #[arg(long = "simulation-instructions", short = 's')]
    sim: Option<u64>,
    #[arg(long, value_enum)]
    trace_naming: Option<NamingArg>,
    /// Never build; use whatever binary already exists for the variant.
    #[arg(long, alias = "skip-make", conflicts_with = "force_rebuild")]
    skip_build: bool,
    #[arg(long)]
    force_rebuild: bool,
    /// Where the per-invocation scratch directory is created.
    #[arg(long, default_value = ".")]
    scratch_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the variant if needed and launch one run per trace group.
    Run {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long, short = 'q')]
        quiet: bool,
        #[arg(long)]
        json: bool,
    },
    /// Resolve the variant and trace groups without building or launching.
    Describe {
        #[command(flatten)]
        batch: BatchArgs,
        #[arg(long)]
        json: bool,
    },
    /// Recompute the trace checksums recorded in a run directory.
    Verify {
        run_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(command_quiet(&cli.command));
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<RunnerError>()
                    .map(|e| e.code())
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { batch, quiet, json } => {
            let request = build_request(&batch)?;
            let builder = ExternalBuilder::from_settings(&request.settings);
            let report = simrun_runner::run_batch(&request, &builder)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": report_to_json(&report),
                })));
            }
            print_report(&report, quiet);
        }
        Commands::Describe { batch, json } => {
            let request = build_request(&batch)?;
            let plan = simrun_runner::plan_batch(&request)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "plan": plan_to_json(&plan, &request.settings),
                })));
            }
            print_plan(&plan, &request.settings);
        }
        Commands::Verify { run_dir, json } => {
            let record = simrun_provenance::read_record(&run_dir)?;
            let mismatches = simrun_provenance::verify_record(&record);
            if json {
                let payload = json!({
                    "ok": mismatches.is_empty(),
                    "command": "verify",
                    "run_dir": run_dir.display().to_string(),
                    "sim_id": record.sim_id,
                    "traces": record.trace_path.len(),
                    "mismatches": mismatches.iter().map(|m| json!({
                        "trace_path": m.trace_path,
                        "recorded": m.recorded,
                        "actual": m.actual,
                    })).collect::<Vec<_>>(),
                });
                if !mismatches.is_empty() {
                    emit_json(&payload);
                    std::process::exit(1);
                }
                return Ok(Some(payload));
            }
            if !mismatches.is_empty() {
                for m in &mismatches {
                    let trace = if m.trace_path.is_empty() {
                        "(no trace entry)"
                    } else {
                        m.trace_path.as_str()
                    };
                    eprintln!(
                        "checksum mismatch: {} recorded {} actual {}",
                        trace,
                        m.recorded,
                        m.actual.as_deref().unwrap_or("unreadable")
                    );
                }
                std::process::exit(1);
            }
            println!("ok: {} traces match", record.trace_path.len());
        }
    }
    Ok(None)
}

fn build_request(args: &BatchArgs) -> Result<BatchRequest> {
    let mut settings = match &args.settings {
        Some(path) => RunnerSettings::from_file(path)?,
        None => RunnerSettings::default(),
    };
    if let Some(root) = &args.simulator_root {
        settings.simulator_root = root.clone();
    }
    if let Some(output) = &args.output {
        settings.output_root = output.clone();
    }
    if let Some(warmup) = args.warmup {
        settings.warmup_instructions = warmup;
    }
    if let Some(sim) = args.sim {
        settings.simulation_instructions = sim;
    }
    if let Some(naming) = args.trace_naming {
        settings.trace_naming = naming.into();
    }
    if args.skip_build {
        settings.build_policy = BuildPolicy::Skip;
    } else if args.force_rebuild {
        settings.build_policy = BuildPolicy::Force;
    }
    let traces = match &args.tracelist {
        Some(path) => TraceInput::Tracelist(path.clone()),
        None => TraceInput::Paths(args.trace.clone()),
    };
    Ok(BatchRequest {
        config_path: args.config.clone(),
        traces,
        settings,
        scratch_parent: args.scratch_dir.clone(),
    })
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Verify { json, .. } => *json,
    }
}

fn command_quiet(command: &Commands) -> bool {
    matches!(command, Commands::Run { quiet: true, .. })
}

fn report_to_json(report: &BatchReport) -> Value {
    json!({
        "run_id": report.run_id,
        "variant": report.variant.as_str(),
        "binary": report.binary.display().to_string(),
        "built": report.built,
        "launched": report.launched.iter().map(|r| json!({
            "pid": r.pid,
            "run_dir": r.run_dir.display().to_string(),
            "log_path": r.log_path.display().to_string(),
            "started_at": r.started_at.to_rfc3339(),
            "command_line": r.command_line,
        })).collect::<Vec<_>>(),
        "skipped": report.skipped.iter().map(|s| json!({
            "group": s.group_index + 1,
            "lead_trace": s.lead_trace.display().to_string(),
            "code": s.error.code(),
            "message": s.error.to_string(),
        })).collect::<Vec<_>>(),
    })
}

fn print_report(report: &BatchReport, quiet: bool) {
    if quiet {
        for run in &report.launched {
            println!("PID: {}", run.pid);
        }
        return;
    }
    println!("run_id: {}", report.run_id);
    println!("variant: {}", report.variant);
    println!("binary: {}", report.binary.display());
    println!("built: {}", report.built);
    for run in &report.launched {
        println!("launched: pid {} -> {}", run.pid, run.run_dir.display());
        println!("  command: {}", run.command_line);
    }
    for skipped in &report.skipped {
        println!(
            "skipped: group {} ({}): {}",
            skipped.group_index + 1,
            skipped.lead_trace.display(),
            skipped.error
        );
    }
}

fn plan_to_json(plan: &BatchPlan, settings: &RunnerSettings) -> Value {
    json!({
        "variant": plan.variant.as_str(),
        "headline_prefetcher": plan.variant_config.headline_prefetcher(),
        "core_count": plan.batch.core_count,
        "config_checksum": plan.config_checksum,
        "binary": plan.binary.display().to_string(),
        "needs_build": plan.needs_build,
        "build_policy": settings.build_policy.as_str(),
        "trace_naming": settings.trace_naming.as_str(),
        "output_root": settings.output_root.display().to_string(),
        "groups": plan.batch.groups.iter().map(|g| json!({
            "trace_identity": plan.group_identity(g),
            "traces": g.paths().iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

fn print_plan(plan: &BatchPlan, settings: &RunnerSettings) {
    println!("variant: {}", plan.variant);
    println!("headline_prefetcher: {}", plan.variant_config.headline_prefetcher());
    println!("core_count: {}", plan.batch.core_count);
    println!("config_checksum: {}", plan.config_checksum);
    println!("binary: {}", plan.binary.display());
    println!("needs_build: {}", plan.needs_build);
    println!("build_policy: {}", settings.build_policy.as_str());
    println!("output_root: {}", settings.output_root.display());
    println!("groups: {}", plan.source.groups().len());
    for (idx, group) in plan.batch.groups.iter().enumerate() {
        let identity = plan.group_identity(group);
        let traces: Vec<String> = group.paths().iter().map(|p| p.display().to_string()).collect();
        println!("group {} [{}]: {}", idx + 1, identity, traces.join(","));
    }
}

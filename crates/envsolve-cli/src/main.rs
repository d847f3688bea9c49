//! envsolve CLI
//!
//! The `envsolve` command resolves Python dependencies for a repository by
//! trial installation in disposable sandboxes.
//!
//! ## Commands
//!
//! - `resolve`: resolve one candidate list
//! - `batch`: resolve many independent jobs concurrently
//! - `show`: print a stored report after verifying its digest
//!
//! ## Exit codes
//!
//! `0` succeeded, `1` internal error, `2` unsatisfiable, `3` exhausted,
//! `4` infrastructure failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, Level};

use envsolve_core::{
    read_report, render_dockerfile, write_report, BatchJob, BatchSupervisor, Candidate,
    DockerSandbox, EngineConfig, EnvsolveError, FinalState, HeuristicOracle, HttpOracleConfig,
    HttpPolicyOracle, LocalSandbox, PolicyOracle, ResolutionController, ResolutionReport,
    Sandbox, SandboxBackend, SpecError,
};

#[derive(Parser)]
#[command(name = "envsolve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed dependency resolution for arbitrary repositories", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "ENVSOLVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by `resolve` and `batch`.
#[derive(clap::Args, Debug, Default)]
struct EngineArgs {
    /// Base image for every sandbox
    #[arg(long, env = "ENVSOLVE_IMAGE")]
    image: Option<String>,

    /// Sandbox backend: docker or local
    #[arg(long, env = "ENVSOLVE_BACKEND")]
    backend: Option<SandboxBackend>,

    /// Maximum install attempts per run
    #[arg(long, env = "ENVSOLVE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Wall-clock limit per run, in seconds
    #[arg(long, env = "ENVSOLVE_RUN_TIMEOUT")]
    run_timeout: Option<u64>,

    /// Package download cache directory
    #[arg(long, env = "ENVSOLVE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Command run after installation to verify the environment
    #[arg(long)]
    verify: Option<String>,

    /// Delegate decisions to an HTTP policy oracle
    #[arg(long, env = "ENVSOLVE_ORACLE_URL")]
    oracle_url: Option<String>,

    /// Directory for resolution.json / resolution.digest artifacts
    #[arg(long, env = "ENVSOLVE_REPORT_DIR")]
    report_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one list of candidates
    Resolve {
        /// Requirement such as `numpy>=1.2,<2` (repeatable)
        #[arg(long = "candidate", short = 'p')]
        candidates: Vec<String>,

        /// requirements.txt-style file
        #[arg(long, short = 'r')]
        candidates_file: Option<PathBuf>,

        /// Repository mounted at /workspace (docker backend)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Write a Dockerfile reproducing the environment
        #[arg(long)]
        dockerfile: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Resolve many independent jobs with a bounded worker pool
    Batch {
        /// JSON file: `[{"id": "...", "candidates": ["pkg>=1.0", ...]}, ...]`
        #[arg(long)]
        jobs: PathBuf,

        /// Concurrent jobs
        #[arg(long, env = "ENVSOLVE_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print a stored report after verifying its digest
    Show {
        /// Run ID
        run: String,

        /// Directory containing run artifacts
        #[arg(long, env = "ENVSOLVE_REPORT_DIR", default_value = ".envsolve/reports")]
        report_dir: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct JobSpec {
    id: String,
    candidates: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    envsolve_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let base = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve {
            candidates,
            candidates_file,
            workspace,
            dockerfile,
            engine,
        } => {
            let config = apply_overrides(base, &engine)?;
            let candidates = collect_candidates(&candidates, candidates_file.as_deref())?;
            cmd_resolve(
                config,
                candidates,
                workspace,
                dockerfile.as_deref(),
                engine.report_dir.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Batch {
            jobs,
            max_concurrent,
            engine,
        } => {
            let mut config = apply_overrides(base, &engine)?;
            if let Some(n) = max_concurrent {
                config.max_concurrent = n;
            }
            config.validate()?;
            let jobs = load_jobs(&jobs)?;
            cmd_batch(config, jobs, engine.report_dir.as_deref(), cli.json).await
        }
        Commands::Show { run, report_dir } => cmd_show(&run, &report_dir),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Layer CLI flags and environment variables over the file configuration.
fn apply_overrides(mut config: EngineConfig, args: &EngineArgs) -> Result<EngineConfig> {
    if let Some(image) = &args.image {
        config.base_image = image.clone();
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(n) = args.max_attempts {
        config.max_attempts = n;
    }
    if let Some(secs) = args.run_timeout {
        config.run_timeout_secs = secs;
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = Some(dir.clone());
    }
    if let Some(verify) = &args.verify {
        config.commands.verify_command = Some(verify.clone());
    }
    if let Some(url) = &args.oracle_url {
        config.oracle_endpoint = Some(url.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Parse requirement lines, skipping blanks and comments.
fn parse_requirements(text: &str, origin: &str) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        match Candidate::parse(line) {
            Ok(candidate) => out.push(candidate),
            Err(SpecError::Empty) => continue,
            Err(e) => return Err(e).with_context(|| format!("{origin}:{}", i + 1)),
        }
    }
    Ok(out)
}

fn collect_candidates(specs: &[String], file: Option<&Path>) -> Result<Vec<Candidate>> {
    let mut candidates = parse_requirements(&specs.join("\n"), "--candidate")?;
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        candidates.extend(parse_requirements(&text, &path.display().to_string())?);
    }
    if candidates.is_empty() {
        anyhow::bail!("No candidates given; use --candidate or --candidates-file");
    }
    Ok(candidates)
}

fn load_jobs(path: &Path) -> Result<Vec<BatchJob>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let specs: Vec<JobSpec> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid jobs file {}", path.display()))?;
    specs
        .into_iter()
        .map(|spec| {
            let candidates = parse_requirements(&spec.candidates.join("\n"), &spec.id)?;
            Ok(BatchJob {
                id: spec.id,
                candidates,
            })
        })
        .collect()
}

fn build_oracle(config: &EngineConfig) -> envsolve_core::Result<Box<dyn PolicyOracle>> {
    match &config.oracle_endpoint {
        Some(endpoint) => {
            let mut oracle_config = HttpOracleConfig::from_env();
            oracle_config.endpoint = endpoint.clone();
            oracle_config.timeout_secs = config.oracle_timeout_secs;
            Ok(Box::new(HttpPolicyOracle::new(oracle_config)?))
        }
        None => Ok(Box::new(HeuristicOracle::new(config.substitutions.clone()))),
    }
}

async fn resolve_with<S: Sandbox>(
    sandbox: S,
    config: EngineConfig,
    candidates: Vec<Candidate>,
) -> Result<ResolutionReport> {
    let oracle = build_oracle(&config)?;
    let controller = ResolutionController::new(sandbox, oracle, config);
    Ok(controller.run(candidates).await)
}

async fn cmd_resolve(
    config: EngineConfig,
    candidates: Vec<Candidate>,
    workspace: Option<PathBuf>,
    dockerfile: Option<&Path>,
    report_dir: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    info!(
        candidates = candidates.len(),
        base_image = %config.base_image,
        "resolving"
    );
    let report = match config.backend {
        SandboxBackend::Docker => {
            let sandbox = DockerSandbox::new(config.docker_config(workspace));
            resolve_with(sandbox, config, candidates).await?
        }
        SandboxBackend::Local => {
            let sandbox = LocalSandbox::new(config.local_config());
            resolve_with(sandbox, config, candidates).await?
        }
    };

    if let Some(dir) = report_dir {
        let path = write_report(&report, dir).context("Failed to write report")?;
        info!(path = %path.display(), "report written");
    }
    if let Some(path) = dockerfile {
        std::fs::write(path, render_dockerfile(&report.base_image, &report.environment))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(exit_code(report.final_state))
}

async fn batch_with<S, F>(
    config: &EngineConfig,
    jobs: Vec<BatchJob>,
    make_sandbox: F,
) -> Vec<envsolve_core::BatchOutcome>
where
    S: Sandbox + 'static,
    F: Fn(&EngineConfig) -> S,
{
    let supervisor = BatchSupervisor::from_config(config);
    supervisor
        .run(jobs, |job| {
            let unit = config.for_unit(&job.id);
            let oracle = build_oracle(&unit)?;
            let sandbox = make_sandbox(&unit);
            Ok::<_, EnvsolveError>(ResolutionController::new(sandbox, oracle, unit))
        })
        .await
}

async fn cmd_batch(
    config: EngineConfig,
    jobs: Vec<BatchJob>,
    report_dir: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    info!(jobs = jobs.len(), max_concurrent = config.max_concurrent, "starting batch");
    let outcomes = match config.backend {
        SandboxBackend::Docker => {
            batch_with(&config, jobs, |unit| DockerSandbox::new(unit.docker_config(None))).await
        }
        SandboxBackend::Local => {
            batch_with(&config, jobs, |unit| LocalSandbox::new(unit.local_config())).await
        }
    };

    if let Some(dir) = report_dir {
        for outcome in &outcomes {
            write_report(&outcome.report, dir)
                .with_context(|| format!("Failed to write report for {}", outcome.job_id))?;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!(
                "{:<32} {:<22} {:<34} attempts={}",
                outcome.job_id,
                outcome.report.final_state.to_string(),
                outcome.report.reason.to_string(),
                outcome.report.attempts.len()
            );
        }
    }

    let code = outcomes
        .iter()
        .map(|o| exit_status(o.report.final_state))
        .max()
        .unwrap_or(0);
    Ok(ExitCode::from(code))
}

fn cmd_show(run_id: &str, report_dir: &Path) -> Result<ExitCode> {
    let report = read_report(run_id, report_dir)
        .with_context(|| format!("Failed to read report {run_id}"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(report.final_state))
}

fn print_report(report: &ResolutionReport) {
    println!("Run ID:   {}", report.run_id);
    println!("Result:   {} ({})", report.final_state, report.reason);
    if let Some(detail) = &report.detail {
        println!("Detail:   {detail}");
    }
    println!("Attempts: {}", report.attempts.len());
    println!();

    if !report.environment.is_empty() {
        println!("Environment:");
        for pkg in report.environment.system_packages() {
            println!("  [system] {pkg}");
        }
        for candidate in report.environment.candidates() {
            println!("  {candidate}");
        }
    }
    if !report.unresolved.is_empty() {
        println!("Unresolved:");
        for candidate in &report.unresolved {
            println!("  {candidate}");
        }
    }
    if !report.decisions.is_empty() {
        println!("Decisions:");
        for decision in &report.decisions {
            let mark = if decision.applied { "✓" } else { "·" };
            println!("  {mark} after #{}: {}", decision.after_attempt, decision.action);
        }
    }
    if report.is_success() {
        println!();
        println!("Reproduce with:");
        println!("  {}", report.reproduction_command);
    }
}

fn exit_status(state: FinalState) -> u8 {
    match state {
        FinalState::Succeeded => 0,
        FinalState::Unsatisfiable => 2,
        FinalState::Exhausted => 3,
        FinalState::InfrastructureFailed => 4,
    }
}

fn exit_code(state: FinalState) -> ExitCode {
    ExitCode::from(exit_status(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use envsolve_core::TerminationReason;

    #[test]
    fn test_cli_parses_resolve_flags() {
        let cli = Cli::try_parse_from([
            "envsolve",
            "--json",
            "resolve",
            "-p",
            "numpy>=1.2",
            "--candidate",
            "flask",
            "--backend",
            "local",
            "--max-attempts",
            "5",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Resolve {
                candidates, engine, ..
            } => {
                assert_eq!(candidates, ["numpy>=1.2", "flask"]);
                assert_eq!(engine.backend, Some(SandboxBackend::Local));
                assert_eq!(engine.max_attempts, Some(5));
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_overrides_layer_on_config() {
        let args = EngineArgs {
            image: Some("python:3.12".into()),
            max_attempts: Some(7),
            verify: Some("pytest -q".into()),
            ..EngineArgs::default()
        };
        let config = apply_overrides(EngineConfig::default(), &args).unwrap();
        assert_eq!(config.base_image, "python:3.12");
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.commands.verify_command.as_deref(), Some("pytest -q"));

        let bad = EngineArgs {
            max_attempts: Some(0),
            ..EngineArgs::default()
        };
        assert!(apply_overrides(EngineConfig::default(), &bad).is_err());
    }

    #[test]
    fn test_requirements_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(&path, "# deps\nnumpy>=1.2\n\nrequests[socks]==2.31.0  # http\n").unwrap();

        let candidates = collect_candidates(&[], Some(&path)).unwrap();
        let names: Vec<&str> = candidates.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["numpy", "requests"]);
    }

    #[test]
    fn test_invalid_requirement_reports_line() {
        let err = parse_requirements("numpy\n-e .\n", "reqs.txt").unwrap_err();
        assert!(format!("{err:#}").contains("reqs.txt:2"));
        assert!(collect_candidates(&[], None).is_err());
    }

    #[test]
    fn test_jobs_file_parses_string_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(
            &path,
            r#"[{"id": "org/a", "candidates": ["flask", "numpy==1.26.4"]}, {"id": "org/b", "candidates": []}]"#,
        )
        .unwrap();
        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].candidates[1].to_string(), "numpy==1.26.4");
        assert!(jobs[1].candidates.is_empty());
    }

    #[test]
    fn test_exit_codes_distinguish_outcomes() {
        assert_eq!(exit_status(FinalState::Succeeded), 0);
        assert_eq!(exit_status(FinalState::Unsatisfiable), 2);
        assert_eq!(exit_status(FinalState::Exhausted), 3);
        assert_eq!(exit_status(FinalState::InfrastructureFailed), 4);
    }

    #[test]
    fn test_show_verifies_stored_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = ResolutionReport::aborted(
            "run-show-1",
            "python:3.11-slim",
            Vec::new(),
            FinalState::Exhausted,
            TerminationReason::RunTimedOut,
            chrono::Utc::now(),
        );
        write_report(&report, dir.path()).unwrap();
        assert!(cmd_show("run-show-1", dir.path()).is_ok());
        assert!(cmd_show("run-missing", dir.path()).is_err());
    }
}

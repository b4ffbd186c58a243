//! Rollout - Entry Point
//!
//! Orchestrates Java runtime installations across Linux, Windows and AIX
//! hosts. The bundled executor performs dry runs only; real transports are
//! provided by implementing `RemoteExecutor`.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use tracing::{info, warn};

use rollout::app::options::AppOptions;
use rollout::app::state::Orchestrator;
use rollout::config::source::JsonFileSource;
use rollout::deploy::executor::DryRunExecutor;
use rollout::deploy::runner::StepStatus;
use rollout::filesys::file::File;
use rollout::logs::{init_logging, LogOptions};
use rollout::models::Target;
use rollout::progress::bus::{EventStatus, ProgressEvent};
use rollout::scheduler::{FailurePolicy, JobStatus, SubmitRequest};
use rollout::storage::layout::StorageLayout;
use rollout::storage::settings::Settings;
use rollout::utils::version_info;

const USAGE: &str = "\
Usage:
  rollout --version
  rollout [--base-dir=PATH] --list
  rollout [--base-dir=PATH] --plan --installation=ID --profile=ID
  rollout [--base-dir=PATH] --install --installation=ID --profile=ID --targets=HOST:OS[,HOST:OS...]
          [--policy=strict|continue-on-error] [--existing] [--verify-artifacts]

Options:
  --definitions=PATH   Definitions file (default <base-dir>/definitions.json)";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    if cli_args.contains_key("help") || cli_args.is_empty() {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    match run(&cli_args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: &HashMap<String, String>) -> anyhow::Result<ExitCode> {
    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, falling back to defaults
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("Unable to read {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };

    if settings.log_to_file || settings.audit_log {
        layout
            .setup()
            .await
            .with_context(|| format!("Unable to prepare {}", layout.base_dir.display()))?;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let definitions = match cli_args.get("definitions") {
        Some(path) => File::new(PathBuf::from(path)),
        None => layout.definitions_file(),
    };

    let mut executor = DryRunExecutor::new()
        .with_existing_install(cli_args.contains_key("existing"));
    if cli_args.contains_key("verify-artifacts") {
        executor = executor.with_artifact_root(layout.artifacts_dir().path());
    }

    let options = AppOptions {
        enable_janitor: false,
        ..AppOptions::from_settings(&settings, layout)
    };
    let orchestrator = Orchestrator::init(
        &options,
        Arc::new(JsonFileSource::new(definitions)),
        Arc::new(executor),
    )
    .await?;

    let result = if cli_args.contains_key("list") {
        list(&orchestrator).map(|_| ExitCode::SUCCESS)
    } else if cli_args.contains_key("plan") {
        plan(&orchestrator, cli_args).map(|_| ExitCode::SUCCESS)
    } else if cli_args.contains_key("install") {
        install(&orchestrator, cli_args).await
    } else {
        println!("{}", USAGE);
        Ok(ExitCode::SUCCESS)
    };

    orchestrator.shutdown().await;
    result
}

fn required<'a>(cli_args: &'a HashMap<String, String>, key: &str) -> anyhow::Result<&'a str> {
    cli_args
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("--{}=<value> is required", key))
}

fn list(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    println!("{}", "Installations".bold());
    for installation in orchestrator.config.list_installations() {
        println!(
            "  {:<24} {:<8} {:<10} {}",
            installation.id.cyan(),
            installation.os,
            installation.version,
            installation.friendly_name
        );
    }

    println!("{}", "Profiles".bold());
    for profile in orchestrator.config.list_profiles() {
        let os: Vec<&str> = profile.os_compatibility.iter().map(|o| o.as_str()).collect();
        println!(
            "  {:<24} {:<20} {:<24} {}",
            profile.id.cyan(),
            os.join(","),
            profile.install_path,
            profile.friendly_name
        );
    }
    Ok(())
}

fn plan(orchestrator: &Orchestrator, cli_args: &HashMap<String, String>) -> anyhow::Result<()> {
    let installation_id = required(cli_args, "installation")?;
    let profile_id = required(cli_args, "profile")?;
    let plan = orchestrator.plan(installation_id, profile_id)?;

    println!(
        "{} {} on {} ({})",
        "Plan".bold(),
        installation_id.cyan(),
        profile_id.cyan(),
        plan.os
    );
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {}. {:<18} {}", i + 1, step.kind.name(), step.description);
    }
    Ok(())
}

async fn install(
    orchestrator: &Orchestrator,
    cli_args: &HashMap<String, String>,
) -> anyhow::Result<ExitCode> {
    let installation_id = required(cli_args, "installation")?;
    let profile_id = required(cli_args, "profile")?;
    let targets = required(cli_args, "targets")?
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| Target::parse(s.trim()).map_err(|e| anyhow!(e)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut request = SubmitRequest::new(installation_id, profile_id, targets);
    if let Some(policy) = cli_args.get("policy") {
        request = request.with_failure_policy(parse_policy(policy)?);
    }

    let job_id = orchestrator.submit(request)?;
    info!(job_id = %job_id, "Dry-run installation started");

    let Some(mut subscription) = orchestrator.subscribe(&job_id) else {
        bail!("Job {} has no progress stream", job_id);
    };

    let mut cancel_requested = false;
    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Some(event) => print_event(&event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                warn!(job_id = %job_id, "Interrupted, cancelling job");
                cancel_requested = true;
                orchestrator.cancel(&job_id)?;
            }
        }
    }

    let status = orchestrator.wait(&job_id).await?;
    Ok(match status {
        JobStatus::Succeeded => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn parse_policy(value: &str) -> anyhow::Result<FailurePolicy> {
    match value {
        "strict" => Ok(FailurePolicy::Strict),
        "continue-on-error" => Ok(FailurePolicy::ContinueOnError),
        other => bail!("Unknown failure policy '{}'", other),
    }
}

fn print_event(event: &ProgressEvent) {
    let target = event.target_id.as_deref().unwrap_or("-");
    let detail = event.detail.as_deref().unwrap_or_default();
    match event.status {
        EventStatus::Step(status) => {
            let step = event.step.map(|s| s.name()).unwrap_or("-");
            let label = match status {
                StepStatus::Running => "running".normal(),
                StepStatus::Succeeded => "ok".green(),
                StepStatus::Retrying => "retry".yellow(),
                StepStatus::Failed => "failed".red(),
                StepStatus::Skipped => "skipped".dimmed(),
            };
            println!("[{:>3}] {:<20} {:<18} {:<8} {}", event.seq, target, step, label, detail);
        }
        EventStatus::Target(status) => {
            println!(
                "[{:>3}] {:<20} {} {}",
                event.seq,
                target,
                status.to_string().bold(),
                detail
            );
        }
        EventStatus::JobCompleted { final_status } => {
            let label = match final_status {
                JobStatus::Succeeded => final_status.to_string().green().bold(),
                JobStatus::Partial => final_status.to_string().yellow().bold(),
                _ => final_status.to_string().red().bold(),
            };
            println!("[{:>3}] job {} {}", event.seq, label, detail);
        }
    }
}

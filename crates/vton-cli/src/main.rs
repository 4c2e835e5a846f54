use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use vton_contracts::config::{resolve_config_path, PipelineConfig, CONFIG_PATH_ENV};
use vton_contracts::jobs::{AssetReference, Category};
use vton_engine::{
    check_health, extract, sniff_mime, CancellationToken, PollOutcome, RunInput, RunOutcome,
    TryOnPipeline,
};

#[derive(Debug, Parser)]
#[command(name = "vton-rs", version, about = "Virtual try-on job runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload both images, submit, poll and download the result.
    Run(RunArgs),
    /// Publish one image through the upload fallback chain.
    Upload(UploadArgs),
    /// Poll an already submitted task to completion.
    Poll(PollArgs),
    /// Check the processing endpoint's health URL.
    Health(HealthArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    subject: PathBuf,
    #[arg(long)]
    garment: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Defaults to `<out>/result.png`.
    #[arg(long)]
    dest: Option<PathBuf>,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PollArgs {
    #[arg(long)]
    task_id: String,
    #[arg(long)]
    out: PathBuf,
    /// Download the result here once the task completes.
    #[arg(long)]
    dest: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct HealthArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vton-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::Upload(args) => run_upload(args),
        Command::Poll(args) => run_poll(args),
        Command::Health(args) => run_health(args),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = resolve_config_path(explicit) else {
        bail!("no config given; pass --config or set {CONFIG_PATH_ENV}");
    };
    PipelineConfig::load(&path)
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let pipeline = TryOnPipeline::new(config, &args.out)?;
    let destination = args
        .dest
        .clone()
        .unwrap_or_else(|| args.out.join("result.png"));
    let mut input = RunInput::from_paths(&args.subject, &args.garment, destination)?;
    input.category = args.category;

    match pipeline.run(&input, &CancellationToken::new()) {
        Ok(outcome) => {
            let report = outcome.report();
            println!("Result: {}", report.artifact.path.display());
            println!("Source: {}", report.source);
            match &report.task_id {
                Some(task_id) => println!("Task: {task_id} ({} polls)", report.polls),
                None => println!("Task: immediate result"),
            }
            println!("SHA-256: {}", report.artifact.sha256);
            println!("Receipt: {}", report.receipt_path.display());
            if let RunOutcome::Degraded { reasons, .. } = &outcome {
                for reason in reasons {
                    eprintln!("vton-rs degraded: {reason}");
                }
                return Ok(2);
            }
            Ok(0)
        }
        Err(err) => {
            eprintln!("vton-rs {} failed: {err}", err.stage());
            eprintln!("Events: {}", pipeline.events_path().display());
            Ok(1)
        }
    }
}

fn run_upload(args: UploadArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let pipeline = TryOnPipeline::new(config, &args.out)?;
    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let label = args
        .image
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image")
        .to_string();
    let mime = sniff_mime(&bytes);
    let mut asset = AssetReference::new(label, bytes, mime);
    let events = pipeline.events_for(format!("upload-{}", std::process::id()));
    let resolution = pipeline
        .upload_resolver(Some(events))
        .resolve(&mut asset)?;
    for failure in resolution.failures() {
        eprintln!("vton-rs upload {} failed: {}", failure.provider, failure.reason);
    }
    println!("{}", resolution.url());
    Ok(if resolution.is_placeholder() { 2 } else { 0 })
}

fn run_poll(args: PollArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let pipeline = TryOnPipeline::new(config, &args.out)?;
    let events = pipeline.events_for(format!("poll-{}", args.task_id.trim()));
    let report = pipeline
        .poller(Some(events))
        .poll(&args.task_id, &CancellationToken::new())?;
    println!(
        "Status: {} after {} polls ({:.1}s)",
        report.status.state,
        report.polls,
        report.elapsed.as_secs_f64()
    );
    if let Some(err) = &report.last_error {
        eprintln!("Last error: {err}");
    }
    let payload = match report.outcome {
        PollOutcome::Completed { payload } => payload,
        PollOutcome::Failed { message } => {
            eprintln!("vton-rs poll failed: {message}");
            return Ok(1);
        }
        PollOutcome::TimedOut | PollOutcome::Cancelled => return Ok(1),
    };
    let extracted = extract(&payload)?;
    println!("Result: {}", extracted.artifact);
    if let Some(dest) = &args.dest {
        let persisted = pipeline.downloader().persist(&extracted.artifact, dest)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "path": persisted.path.to_string_lossy(),
                "bytes": persisted.bytes,
                "sha256": persisted.sha256,
                "format": persisted.format,
            }))?
        );
    }
    Ok(0)
}

fn run_health(args: HealthArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let transport = vton_engine::ReqwestTransport::new()?;
    let Some(report) = check_health(&config.processing, &transport)? else {
        println!("No health_url configured for {}", config.processing.name);
        return Ok(0);
    };
    println!("{} -> HTTP {}", report.url, report.status);
    if !report.healthy {
        eprintln!("{}", report.body);
        return Ok(1);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use vton_contracts::jobs::Category;

    use super::{load_config, Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_args_parse_category() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "vton-rs",
            "run",
            "--subject",
            "me.png",
            "--garment",
            "shirt.png",
            "--out",
            "runs/a",
            "--category",
            "lower-body",
        ])?;
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.category, Some(Category::LowerBody));
                assert_eq!(args.dest, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["vton-rs", "run", "--category", "hat"]).is_err());
        Ok(())
    }

    #[test]
    fn explicit_config_is_loaded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("vton.json");
        std::fs::write(
            &path,
            r#"{
                "uploads": {"placeholder_url": "https://p.test/p.png"},
                "processing": {"name": "local", "endpoint": "http://127.0.0.1:9/tryon"}
            }"#,
        )?;
        let config = load_config(Some(&path))?;
        assert_eq!(config.processing.name, "local");
        assert!(load_config(Some(&temp.path().join("missing.json"))).is_err());
        Ok(())
    }
}

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use futures::StreamExt;
use subexec_core::{Config, RunOptions, ToolRunner, resolve_config_path};
use subexec_exec::{ExecError, StreamEvent};

/// Exit status reported when an attempt times out, matching coreutils `timeout`.
const EXIT_TIMEOUT: u8 = 124;
/// Exit status reported when the tool cannot be started.
const EXIT_SPAWN: u8 = 127;

#[derive(Parser)]
#[command(name = "subexec")]
#[command(about = "Run a CLI tool with timeouts, retries and a sanitized environment")]
#[command(version)]
struct Cli {
    /// Config file (default: $SUBEXEC_CONFIG_PATH or config/subexec.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Total attempts, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Working directory for the tool
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Print output as it arrives (single attempt, no retries)
    #[arg(long)]
    stream: bool,

    /// Never fall back to the launcher when the tool is not on PATH
    #[arg(long)]
    no_fallback: bool,

    /// Print what would run and exit
    #[arg(long)]
    dry_run: bool,

    /// Set a variable in the tool's environment (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Remove a variable from the tool's environment (repeatable)
    #[arg(long = "unset", value_name = "KEY")]
    unset: Vec<String>,

    /// Arguments passed to the tool
    #[arg(last = true)]
    args: Vec<String>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_owned(), v.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_subscriber();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let runner = ToolRunner::from_config(&config);
    let options = run_options(&cli);

    if cli.dry_run {
        let plan = runner.plan(&cli.args, &options).await;
        println!("command: {}", plan.command.executable);
        println!("argv: {}", plan.argv.join(" "));
        println!("cwd: {}", plan.working_dir.display());
        for change in &plan.env_changes {
            println!("env: {change}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let outcome = if cli.stream {
        stream(&runner, &cli.args, &options).await
    } else {
        run(&runner, &cli.args, &options).await
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("{e}");
            Ok(ExitCode::from(exit_status(&e)))
        }
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = resolve_config_path(cli.config.as_deref());
    if cli.config.is_some() && !path.exists() {
        bail!("config file not found: {}", path.display());
    }

    let mut config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    if let Some(ms) = cli.timeout_ms {
        config.execution.timeout_ms = ms;
    }
    if let Some(n) = cli.max_attempts {
        config.retry.max_attempts = n;
    }
    if cli.no_fallback {
        config.tool.allow_fallback = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_options(cli: &Cli) -> RunOptions {
    let mut options = RunOptions::default();
    if let Some(dir) = &cli.cwd {
        options = options.working_dir(dir.clone());
    }
    for (k, v) in &cli.env {
        options = options.env(k.clone(), v.clone());
    }
    for k in &cli.unset {
        options = options.unset_env(k.clone());
    }
    options
}

async fn run(runner: &ToolRunner, args: &[String], options: &RunOptions) -> Result<(), ExecError> {
    let result = runner.run(args, options).await?;

    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(result.stdout.as_bytes());
    let _ = stdout.flush();
    if !result.stderr.trim().is_empty() {
        eprint!("{}", result.stderr);
    }
    Ok(())
}

async fn stream(
    runner: &ToolRunner,
    args: &[String],
    options: &RunOptions,
) -> Result<(), ExecError> {
    let mut events = runner.stream(args, options).await?;
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Stdout(line) => println!("{line}"),
            StreamEvent::Stderr(line) => eprintln!("{line}"),
            StreamEvent::Exited { .. } => break,
        }
    }
    Ok(())
}

fn exit_status(err: &ExecError) -> u8 {
    match err.root_cause() {
        ExecError::Timeout { .. } => EXIT_TIMEOUT,
        ExecError::Spawn { .. } => EXIT_SPAWN,
        ExecError::Execution { exit_code, .. } => u8::try_from(*exit_code)
            .ok()
            .filter(|c| *c != 0)
            .unwrap_or(1),
        ExecError::RetriesExhausted { .. } => 1,
    }
}

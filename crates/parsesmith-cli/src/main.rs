//! Parsesmith CLI - generate and test a bank statement parser
//!
//! Usage:
//!   parsesmith --target icici            Generate, test and retry up to 3 times
//!   parsesmith --init                    Write .parsesmith/config.toml with defaults
//!   parsesmith --target sbi -v           Same with debug logging

use anyhow::{Context, Result};
use clap::Parser;
use parsesmith_agent::{ChatClient, CodeGenerator, SyntaxCheck};
use parsesmith_core::{BankId, ParseSmithConfig, CONFIG_FILE};
use parsesmith_orchestrator::{ArtifactWriter, PytestRunner, RetryController, RunReport, StopReason};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "parsesmith")]
#[command(author, version, about = "Generate bank statement parsers with a language model")]
struct Cli {
    /// Bank identifier (e.g. icici); selects data/<bank>/ and names the artifacts
    #[arg(long, required_unless_present = "init")]
    target: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root containing custom_parsers/, tests/ and data/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to <root>/.parsesmith/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the maximum number of generation attempts
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Write the default config file if none exists
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.init {
        cmd_init(&cli.root)?;
    }

    let Some(target) = cli.target.as_deref() else {
        return Ok(ExitCode::SUCCESS);
    };

    let config = load_config(&cli.root, cli.config.as_deref())?;
    let report = cmd_run(&cli.root, target, config, cli.max_attempts).await?;
    print_summary(&report);

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_init(root: &Path) -> Result<()> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        info!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let written = ParseSmithConfig::write_default(root)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Wrote default config to {}", written.display());
    Ok(())
}

fn load_config(root: &Path, explicit: Option<&Path>) -> Result<ParseSmithConfig> {
    match explicit {
        Some(path) => ParseSmithConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => ParseSmithConfig::load_or_default(root).context("Failed to load config"),
    }
}

async fn cmd_run(
    root: &Path,
    target: &str,
    config: ParseSmithConfig,
    max_attempts: Option<usize>,
) -> Result<RunReport> {
    let bank = BankId::new(target).context("Invalid --target")?;
    let max_attempts = max_attempts.unwrap_or_else(|| config.max_attempts());

    let client = ChatClient::from_config(&config.generation).with_context(|| {
        format!(
            "Failed to create generation client (set {} to your API key)",
            config.generation.api_key_env
        )
    })?;
    info!("Using model {} at {}", config.generation.model, config.generation.base_url);

    let layout = config.layout(root);
    if !layout.reference_csv(&bank).exists() && !layout.sample_pdf(&bank).exists() {
        tracing::warn!(
            "No reference data at {}; the generated test will fail",
            layout.bank_data_dir(&bank).display()
        );
    }

    let generator = CodeGenerator::new(client, SyntaxCheck::from_config(&config.syntax_check));
    let controller = RetryController::new(
        generator,
        ArtifactWriter::new(layout),
        PytestRunner::new(&config.test_runner),
        max_attempts,
    )
    .with_feedback(config.generation.feedback)
    .with_activity_logging(root.join(".parsesmith"));

    let report = controller
        .run(&bank)
        .await
        .with_context(|| format!("Parser generation for {} aborted", bank))?;

    if let Some(path) = controller.activity_log_path() {
        info!("Activity log written to {}", path.display());
    }
    Ok(report)
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Bank:      {}", report.bank);
    println!("Attempts:  {}", report.attempts);
    if let Some(path) = &report.parser_path {
        println!("Parser:    {}", path.display());
    }
    if let Some(path) = &report.test_path {
        println!("Test:      {}", path.display());
    }

    match &report.stop_reason {
        StopReason::Succeeded => println!("Result:    ✓ test passed"),
        StopReason::MaxAttempts => {
            println!("Result:    ✗ max attempts reached");
            if !report.mismatches.is_empty() {
                println!("Mismatched columns: {}", report.mismatches.join(", "));
            }
        }
        StopReason::Error(message) => println!("Result:    ✗ {}", message),
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resilient_transcriptor::cli::{Cli, Commands};
use resilient_transcriptor::config::Config;
use resilient_transcriptor::credentials::CredentialSet;
use resilient_transcriptor::models::{ArtifactType, ExtractionRequest, VideoId};
use resilient_transcriptor::output::{self, ResponseEnvelope};
use resilient_transcriptor::{utils, RequestOrchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "resilient_transcriptor=debug"
    } else {
        "resilient_transcriptor=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so stdout stays machine-readable
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Returns whether the command succeeded
async fn run(cli: Cli) -> Result<bool> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    match &cli.command {
        Commands::Extract {
            video,
            metadata,
            lang,
            force_refresh,
            format,
        } => {
            warn_missing_tool(&config).await;

            let video_id = VideoId::parse(video)?;
            let artifact = if *metadata {
                ArtifactType::Metadata
            } else {
                ArtifactType::Transcript
            };
            let request = ExtractionRequest::new(video_id, artifact)
                .with_language(lang.clone())
                .with_force_refresh(*force_refresh);

            let orchestrator = RequestOrchestrator::from_config(&config)?;
            tracing::info!("Extracting {} for {}", artifact, request.video_id);

            let progress = spinner(cli.quiet, format!("Extracting {}...", artifact));
            let outcome = orchestrator.extract(request).await;
            progress.finish_and_clear();

            println!("{}", output::render(&outcome, format)?);
            Ok(outcome.is_ok())
        }
        Commands::Batch { concurrency } => {
            warn_missing_tool(&config).await;
            let orchestrator = RequestOrchestrator::from_config(&config)?;
            run_batch(&orchestrator, (*concurrency).max(1)).await
        }
        Commands::Strategies => {
            let orchestrator = RequestOrchestrator::from_config(&config)?;
            println!(
                "Attempt order (global budget {}s):",
                orchestrator.settings().global_budget.as_secs()
            );
            for (i, descriptor) in orchestrator.descriptors().enumerate() {
                println!(
                    "  {}. {:<18} timeout {:>3}s  proxy {:<3}  credentials {}",
                    i + 1,
                    descriptor.name,
                    descriptor.timeout.as_secs(),
                    if descriptor.use_proxy { "yes" } else { "no" },
                    descriptor.credentials
                );
            }
            Ok(true)
        }
        Commands::Credentials => {
            let Some(path) = &config.credentials.cookie_file else {
                println!("No cookie file configured");
                return Ok(false);
            };
            let set = CredentialSet::load(path)?;
            let now = chrono::Utc::now();
            let class = config.credentials.policy().classify(&set, now);
            let age = set.age_at(now);

            println!("Cookie file: {}", path.display());
            println!("  Entries:        {}", set.entries.len());
            println!("  Skipped lines:  {}", set.skipped_lines);
            println!("  Age:            {}h {}m", age.num_hours(), age.num_minutes() % 60);
            println!(
                "  Expired share:  {:.0}%",
                set.expired_fraction_at(now) * 100.0
            );
            println!("  Classification: {}", class);
            Ok(true)
        }
        Commands::Config { show, init } => {
            if let Some(path) = init {
                config.save(path)?;
                println!("Configuration written to: {}", path.display());
            }
            if *show || init.is_none() {
                config.display();
            }
            Ok(true)
        }
    }
}

/// Process JSON-lines request envelopes, answering in input order
async fn run_batch(orchestrator: &RequestOrchestrator, concurrency: usize) -> Result<bool> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut requests = Vec::new();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        requests.push(ExtractionRequest::from_json_line(&line));
    }
    tracing::info!("Processing {} batch requests", requests.len());

    let envelopes: Vec<ResponseEnvelope> = stream::iter(requests)
        .map(|parsed| async move {
            match parsed {
                Ok(request) => ResponseEnvelope::from_outcome(&orchestrator.extract(request).await),
                Err(e) => ResponseEnvelope::invalid(e.to_string()),
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let mut all_ok = true;
    for envelope in &envelopes {
        all_ok &= envelope.success;
        println!("{}", output::format_as_json_line(envelope)?);
    }
    Ok(all_ok)
}

async fn warn_missing_tool(config: &Config) {
    let missing = utils::check_dependencies(&config.tool.program, &config.tool.base_args).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - other strategies may still succeed)");
    }
}

fn spinner(quiet: bool, message: String) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message(message);
    progress.enable_steady_tick(Duration::from_millis(120));
    progress
}

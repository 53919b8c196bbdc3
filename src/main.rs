use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use release_tracker::config::TrackerConfig;
use release_tracker::detection::{DetectionOrchestrator, DetectionResult, SoftwareRequest};
use release_tracker::logging;

#[derive(Parser)]
#[command(name = "release-tracker")]
#[command(version, about = "Detect the latest released version of software products")]
struct Cli {
    /// Configuration file (defaults to <data dir>/config.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the version of a single product
    Detect {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// Preferred strategy, used when it accepts the URL
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Detect every request in a JSON array file
    Batch {
        file: PathBuf,
        /// Process requests one at a time, in file order
        #[arg(long)]
        sequential: bool,
    },
    /// List registered strategies with their statistics
    Strategies,
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached result
    Clear,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TrackerConfig::load(cli.config.as_deref())?;
    let _guard = logging::init(&config.logging);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, config))
}

async fn run(cli: Cli, config: TrackerConfig) -> anyhow::Result<()> {
    let orchestrator = Arc::new(DetectionOrchestrator::from_config(&config)?);

    match cli.command {
        Command::Detect {
            name,
            url,
            strategy,
        } => {
            let mut request = SoftwareRequest::new(name, url);
            request.strategy = strategy;
            let result = orchestrator.detect_one(&request).await;
            print_results(&[result], cli.json)?;
        }
        Command::Batch { file, sequential } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let requests: Vec<SoftwareRequest> = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", file.display()))?;
            let results = orchestrator.detect_batch(requests, !sequential).await;
            print_results(&results, cli.json)?;
        }
        Command::Strategies => {
            let strategies = orchestrator.strategies();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&strategies)?);
            } else {
                for info in strategies {
                    println!(
                        "{:<10} {:>4} ok {:>4} failed  {}",
                        info.name,
                        info.stats.successes,
                        info.stats.failures,
                        info.supported_software.join(", ")
                    );
                }
            }
        }
        Command::Cache {
            action: CacheAction::Clear,
        } => {
            anyhow::ensure!(orchestrator.clear_cache(), "failed to clear cache");
            println!("Cache cleared");
        }
    }

    Ok(())
}

fn print_results(results: &[DetectionResult], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    for result in results {
        match (&result.version, &result.error) {
            (Some(version), _) => println!(
                "{}: {} ({})",
                result.name,
                version,
                result.download_url.as_deref().unwrap_or("no download URL")
            ),
            (None, error) => println!(
                "{}: failed: {}",
                result.name,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    Ok(())
}

//! Command line runner.
//!
//! Loads a JSON configuration, harvests its input through the configured
//! pipeline and prints the run report. Exits non-zero if any item failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use stac_harvester::{inputs, outputs, Generator, HarvestConfig, MethodRegistry, Output};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "stac-harvester",
    about = "Extract catalog metadata from data files",
    version
)]
struct Cli {
    /// Path to the JSON run configuration
    #[arg(long, short)]
    config: PathBuf,

    /// Override run.concurrency from the configuration
    #[arg(long)]
    concurrency: Option<usize>,

    /// List registered extraction methods and exit
    #[arg(long)]
    list_methods: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Records go to stdout, logs to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let registry = MethodRegistry::builtin();

    if cli.list_methods {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = HarvestConfig::from_path(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(concurrency) = cli.concurrency {
        config = config.with_concurrency(concurrency);
    }

    let input_config = config
        .input
        .as_ref()
        .context("configuration has no `input` section")?;
    let input = inputs::from_config(input_config).context("building input")?;

    let outputs: Vec<Arc<dyn Output>> = if config.outputs.is_empty() {
        vec![Arc::new(outputs::StdoutOutput::new())]
    } else {
        config.outputs.iter().map(outputs::from_config).collect()
    };

    let generator =
        Generator::new(&config, &registry, outputs).context("building generator")?;

    let token = generator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });

    tracing::info!(pipeline = %config.pipeline.name, "Starting STAC harvester");
    let report = generator.run(input.as_ref()).await?;

    eprintln!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        bail!(
            "{} item(s) failed, {} degraded, {} cancelled, {} output flush failure(s)",
            report.failed,
            report.degraded,
            report.cancelled,
            report.flush_failures.len()
        );
    }
    Ok(())
}

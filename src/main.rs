mod batch;
mod brands;
mod cleanup;
mod client;
mod dedupe;
mod error;
mod images;
mod leaf;
mod models;
mod pipeline;
mod settings;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use batch::ProgressObserver;
use client::SiteClient;
use pipeline::{ModelsPipeline, Summary};
use settings::Settings;

#[derive(Parser)]
#[command(name = "autocatalog", about = "Resumable brand → model → generation catalog extractor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Brand list written by `brands`, read by `models`
    #[arg(long, global = true)]
    brands_file: Option<PathBuf>,

    /// Aggregate output, checkpointed after every batch
    #[arg(long, global = true)]
    models_file: Option<PathBuf>,

    /// Where leaf images are saved
    #[arg(long, global = true)]
    images_dir: Option<PathBuf>,

    /// spider.cloud key for rendered page fetches
    #[arg(long, global = true, env = "SPIDER_API_KEY", hide_env_values = true)]
    spider_api_key: Option<String>,
}

#[derive(Args, Clone, Default)]
struct BatchArgs {
    /// Brands processed concurrently per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Re-fetch brands whose previous result is an error
    #[arg(long)]
    retry_errors: bool,

    /// Per-brand deadline in seconds
    #[arg(long)]
    unit_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the brand index and write the brand list
    Brands,
    /// Extract models, generations and images for pending brands (resumable)
    Models {
        #[command(flatten)]
        batch: BatchArgs,
        /// Max brands to process this run (default: all pending)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Remove duplicate models from the aggregate and recount
    Cleanup,
    /// brands + models + cleanup in one go
    Run {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Show aggregate statistics
    Stats,
}

impl Cli {
    fn settings(&self, batch: Option<&BatchArgs>) -> anyhow::Result<Settings> {
        let mut s = Settings::load().context("Failed to load settings")?;
        if let Some(p) = &self.brands_file {
            s.brands_file = p.clone();
        }
        if let Some(p) = &self.models_file {
            s.models_file = p.clone();
        }
        if let Some(p) = &self.images_dir {
            s.images_dir = p.clone();
        }
        if self.spider_api_key.is_some() {
            s.spider_api_key = self.spider_api_key.clone();
        }
        if let Some(b) = batch {
            if let Some(n) = b.batch_size {
                s.batch_size = n;
            }
            if let Some(t) = b.unit_timeout {
                s.unit_timeout_secs = t;
            }
            s.retry_errors |= b.retry_errors;
        }
        s.validate()?;
        Ok(s)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Brands => {
            let settings = cli.settings(None)?;
            run_brands(&settings).await
        }
        Commands::Models { batch, limit } => {
            let settings = cli.settings(Some(batch))?;
            run_models(&settings, *limit).await
        }
        Commands::Cleanup => {
            let settings = cli.settings(None)?;
            run_cleanup(&settings)
        }
        Commands::Run { batch } => {
            let settings = cli.settings(Some(batch))?;
            println!("=== STEP 1: FETCHING CAR BRANDS ===");
            run_brands(&settings).await?;
            println!("\n=== STEP 2: FETCHING CAR MODELS ===");
            run_models(&settings, None).await?;
            println!("\n=== STEP 3: CLEANING UP CAR MODELS DATA ===");
            run_cleanup(&settings)
        }
        Commands::Stats => {
            let settings = cli.settings(None)?;
            let Some(agg) = store::read_aggregate(&settings.models_file)? else {
                println!("No aggregate at {}. Run 'models' first.", settings.models_file.display());
                return Ok(());
            };
            println!("Extracted: {}", agg.extraction_date);
            print_summary(&Summary::of(&agg.brand_models));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_brands(settings: &Settings) -> anyhow::Result<()> {
    let client = SiteClient::new(settings)?;
    let file = brands::discover_brands(&client, settings)
        .await
        .context("Brand discovery failed")?;
    println!(
        "Found {} unique car brands; saved to {}",
        file.total_brands,
        settings.brands_file.display()
    );
    Ok(())
}

async fn run_models(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    let pipeline = ModelsPipeline::open(settings)
        .with_context(|| format!("Cannot start: brand list {} unreadable", settings.brands_file.display()))?
        .limit(limit);
    println!(
        "{} brands to process out of {} total brands",
        pipeline.pending().len(),
        pipeline.total_brands()
    );

    let client = Arc::new(SiteClient::new(settings)?);
    let observer = ProgressObserver::new(pipeline.pending().len());
    let summary = pipeline.run(client, &observer).await;
    observer.finish();

    print_summary(&summary?);
    Ok(())
}

fn run_cleanup(settings: &Settings) -> anyhow::Result<()> {
    match cleanup::clean_file(&settings.models_file)? {
        Some(report) => {
            println!("Cleanup completed: {} duplicate models removed", report.removed());
            println!("- Before: {} total models across {} brands", report.models_before, report.brands);
            println!("- After: {} unique models across {} brands", report.models_after, report.brands);
        }
        None => println!("File {} does not exist. No cleanup needed.", settings.models_file.display()),
    }
    Ok(())
}

fn print_summary(s: &Summary) {
    println!("\nSummary:");
    println!("- Brands processed:              {}", s.brands_processed);
    println!("- Brands with errors:            {}", s.brands_errored);
    println!("- Total car models found:        {}", s.total_models);
    println!("- Generations found:             {}", s.total_generations);
    println!("- Models with downloaded images: {}", s.models_with_images);
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

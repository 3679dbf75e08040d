use clap::Parser;
use dotenvy::dotenv;
use s3_webp_converter::infrastructure::storage;
use s3_webp_converter::services::transcoder::WebpTranscoder;
use s3_webp_converter::{ConfigOverrides, ConversionReport, ConverterConfig, Pipeline};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How many planned conversions a dry run lists before summarizing.
const DRY_RUN_PREVIEW_LIMIT: usize = 10;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert images in an S3 bucket to WebP", long_about = None)]
struct Args {
    /// Show what would be converted without converting anything
    #[arg(long)]
    dry_run: bool,

    /// Override the source prefix from config
    #[arg(long)]
    prefix: Option<String>,

    /// Override WebP quality (0-100) from config
    #[arg(long, allow_negative_numbers = true)]
    quality: Option<i32>,

    /// Override max concurrent workers from config
    #[arg(long)]
    max_workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Convert exactly these keys instead of listing the source prefix
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let loaded = ConverterConfig::from_env();
    let level = if args.verbose {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|c| c.log_level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("s3_webp_converter={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = ConfigOverrides {
        dry_run: args.dry_run,
        prefix: args.prefix.clone(),
        quality: args.quality,
        max_workers: args.max_workers,
    };
    let config = loaded?.with_overrides(&overrides);
    config.validate()?;

    info!("🚀 Starting S3 WebP Converter");
    info!("Bucket: {}", config.bucket);
    info!("Prefix: '{}'", config.source_prefix);
    info!("Destination: '{}'", config.destination_prefix);
    info!("Quality: {}", config.quality);
    info!("Max Workers: {}", config.max_workers);
    info!("Batch Size: {}", config.batch_size);
    info!("Delete Original: {}", config.delete_original);

    let store = storage::setup_storage(&config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let pipeline = Pipeline::new(config, store, Arc::new(WebpTranscoder::new()))?
        .with_shutdown(shutdown_rx);

    let explicit_keys = if args.keys.is_empty() {
        None
    } else {
        Some(args.keys.clone())
    };
    let report = pipeline.convert_images(explicit_keys).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.dry_run {
        print_preview(&report);
    } else {
        print_summary(&report);
    }

    info!("👋 Converter exited cleanly.");
    Ok(())
}

fn print_preview(report: &ConversionReport) {
    println!("DRY RUN - would convert {} images:", report.results.len());
    for result in report.results.iter().take(DRY_RUN_PREVIEW_LIMIT) {
        println!("  {} -> {}", result.source_key, result.destination_key);
    }
    if report.results.len() > DRY_RUN_PREVIEW_LIMIT {
        println!(
            "  ... and {} more",
            report.results.len() - DRY_RUN_PREVIEW_LIMIT
        );
    }
}

fn print_summary(report: &ConversionReport) {
    let stats = &report.stats;
    println!("\n{}", "=".repeat(60));
    println!("CONVERSION SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total files: {}", stats.attempted);
    println!("Successful: {}", stats.successful);
    println!("Failed: {}", stats.failed);
    println!("Skipped: {}", stats.skipped);
    println!("Duration: {:.2} seconds", report.duration_secs());

    if stats.failed > 0 {
        println!("\nFailed conversions:");
        for result in report.failures() {
            if let Some(err) = &result.error {
                println!("  ❌ {}: {}", result.source_key, err);
            }
        }
    }

    let warnings: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| r.warning.as_ref().map(|w| (&r.source_key, w)))
        .collect();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for (key, warning) in warnings {
            println!("  ⚠️  {}: {}", key, warning);
        }
    }

    if let Some(ratio) = stats.compression_ratio() {
        println!("\nTotal size reduction: {:.1}%", ratio);
        println!("Original total: {} bytes", stats.total_original_bytes);
        println!("WebP total: {} bytes", stats.total_webp_bytes);
        println!("Saved: {} bytes", stats.saved_bytes());
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, finishing in-flight conversions...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, finishing in-flight conversions...");
        },
    }
}

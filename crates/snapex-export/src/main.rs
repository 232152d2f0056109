//! Snapex export - main entry point

use anyhow::Context;
use clap::Parser;
use snapex_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use snapex_export::config::ExportConfig;
use snapex_export::discovery::discover_partitions;
use snapex_export::manifest::refresh_manifest;
use snapex_export::publish::{PublishConfig, Publisher};
use snapex_export::store::ElasticStore;
use snapex_export::{dedup, Cli, Commands, Exporter};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("snapex-export")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env().unwrap_or_else(|e| {
        eprintln!("Ignoring invalid logging environment: {}", e);
        LogConfig::default()
    });

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        },
    };

    let code = match execute_command(&cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };

    // Flush file logging before exiting
    drop(guard);
    process::exit(code);
}

/// Returns `Ok(false)` when the command ran but something in it failed
async fn execute_command(cli: &Cli) -> anyhow::Result<bool> {
    let mut config = ExportConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Run {
            entities,
            output,
            workers,
            page_size,
            upload,
        } => {
            if let Some(output) = output {
                config = config.with_output_dir(output);
            }
            if let Some(workers) = workers {
                config = config.with_workers(*workers);
            }
            if let Some(page_size) = page_size {
                config = config.with_page_size(*page_size);
            }
            config.validate()?;
            run_export(config, entities, *upload).await
        },

        Commands::Manifest { output, entities } => {
            let config = config.with_output_dir(output);
            let targets = config.select_entities(entities)?;
            for target in &targets {
                let manifest = refresh_manifest(&config.entity_dir(&target.name), &target.name, &config.remote_base)
                    .with_context(|| format!("Failed to rebuild manifest for {}", target.name))?;
                println!(
                    "{}: {} files, {} records, {} bytes",
                    target.name,
                    manifest.entries.len(),
                    manifest.meta.record_count,
                    manifest.meta.content_length
                );
            }
            Ok(true)
        },

        Commands::Partitions { entity } => {
            let target = config
                .select_entities(std::slice::from_ref(entity))?
                .into_iter()
                .next()
                .context("No entity selected")?;
            let store = ElasticStore::new(&config.store_url, Duration::from_secs(config.request_timeout_secs))?;
            let keys = discover_partitions(&store, &target.name, &target.index, &config.partition_field).await?;
            for key in keys {
                println!("{}", key);
            }
            Ok(true)
        },
    }
}

async fn run_export(config: ExportConfig, entities: &[String], upload: bool) -> anyhow::Result<bool> {
    let targets = config.select_entities(entities)?;
    let output_dir = config.output_dir.clone();

    let store = ElasticStore::new(&config.store_url, Duration::from_secs(config.request_timeout_secs))
        .context("Failed to create search store client")?;
    let dedup = dedup::connect(config.dedup_backend, &config.redis_url)
        .await
        .context("Failed to open dedup store")?;

    let publisher = if upload {
        let publish_config = PublishConfig::from_env().context("Upload requested but S3 is not configured")?;
        publish_config.check_remote_base(&config.remote_base)?;
        Some(Publisher::new(publish_config))
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let mut exporter = Exporter::new(config, Arc::new(store), dedup).with_cancellation(cancel.clone());
    if let Some(publisher) = publisher {
        exporter = exporter.with_publisher(publisher);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing running partitions and stopping");
            cancel.cancel();
        }
    });

    info!(run_id = %exporter.run_id(), "Export run starting");
    let report = exporter.run(&targets).await;
    report.log_summary();

    let path = report
        .write_to(&output_dir)
        .context("Failed to write run report")?;
    info!(path = %path.display(), "Run report written");

    Ok(report.is_success())
}

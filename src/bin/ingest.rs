// src/bin/ingest.rs

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use GraphBlaster::config::cli::Args;
use GraphBlaster::config::{load_batch_config, BatchConfig, ProgressMode};
use GraphBlaster::data_model::{BatchResult, SourceDocument};
use GraphBlaster::error::Result;
use GraphBlaster::orchestrator::BatchOrchestrator;
use GraphBlaster::pipeline::build_processor_from_config;
use GraphBlaster::progress::{LogSink, NoopSink, ProgressBarSink, ProgressSink};
use GraphBlaster::shutdown::ShutdownController;
use GraphBlaster::utils::{init_tracing, setup_prometheus_metrics};

fn load_config(args: &Args) -> Result<BatchConfig> {
    let mut config = match &args.config {
        Some(path) => load_batch_config(path)?,
        None => BatchConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Expands the inputs into documents. Files are taken as given (a missing
/// file is kept so the run reports it); directories contribute their direct
/// children with a matching extension, in name order.
fn collect_documents(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            documents.push(SourceDocument::from_path(input));
            continue;
        }
        let mut children: Vec<PathBuf> = fs::read_dir(input)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && matches_extension(path, extensions))
            .collect();
        children.sort();
        info!(dir = %input.display(), found = children.len(), "Scanned input directory");
        documents.extend(children.into_iter().map(SourceDocument::from_path));
    }
    Ok(documents)
}

fn progress_sink(mode: ProgressMode, total: usize) -> Arc<dyn ProgressSink> {
    match mode {
        ProgressMode::Bar => Arc::new(ProgressBarSink::new(total as u64)),
        ProgressMode::Log => Arc::new(LogSink),
        ProgressMode::Off => Arc::new(NoopSink),
    }
}

/// First Ctrl-C stops admission, the second forces shutdown.
fn spawn_signal_handler(shutdown: Arc<ShutdownController>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Ctrl-C received: finishing running documents. Press Ctrl-C again to stop now.");
        shutdown.request_shutdown();

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Second Ctrl-C received: forcing shutdown.");
        shutdown.force_shutdown().await;
    });
}

fn write_report(path: &Path, result: &BatchResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json)?;
    info!(path = %path.display(), "Wrote batch report");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command-line arguments
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    if args.validate_config {
        info!(
            stages = config.pipeline.len(),
            concurrency = config.concurrency,
            "Configuration is valid."
        );
        return Ok(ExitCode::SUCCESS);
    }

    // Setup Prometheus Metrics Endpoint
    if let Err(e) = setup_prometheus_metrics(config.metrics_port).await {
        error!("Failed to start Prometheus metrics endpoint: {}", e);
    }

    let documents = collect_documents(&args.inputs, &args.extensions)?;
    if documents.is_empty() {
        info!("No documents matched the inputs. Exiting.");
        return Ok(ExitCode::SUCCESS);
    }
    info!(
        documents = documents.len(),
        concurrency = config.concurrency,
        "Ingestion started."
    );

    let pipeline = build_processor_from_config(&config.pipeline)?;
    let orchestrator = BatchOrchestrator::from_config(
        Arc::new(pipeline.processor),
        &config,
        pipeline.cleanup_handlers,
    )
    .with_progress_sink(progress_sink(config.progress, documents.len()));
    spawn_signal_handler(orchestrator.shutdown_handle());

    let result = orchestrator.run(documents, config.concurrency).await?;

    let stats = orchestrator.get_stats();
    info!(
        peak_memory_mb = stats.peak_memory_mb(),
        reclamation_hints = stats.reclamation_hints,
        "Memory summary"
    );
    for task in result.tasks.iter().filter(|t| t.error_message.is_some()) {
        warn!(
            doc_id = %task.id,
            status = %task.status,
            "{}",
            task.error_message.as_deref().unwrap_or_default()
        );
    }

    if let Some(path) = &args.report {
        if let Err(e) = write_report(path, &result) {
            error!("Failed to write batch report: {}", e);
        }
    }

    if result.failed > 0 || result.forced {
        return Ok(ExitCode::FAILURE);
    }
    if result.cancelled > 0 {
        // Interrupted before every document was attempted.
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use syncwire_engine::{
    NamespaceMapper, PipelineOptions, ReplicationPipeline, ReplicationSummary, SyncStatus,
};
use syncwire_runtime::{
    DestinationConfig, DestinationConnector, PipeTransport, SourceConfig, SourceConnector,
};

/// Execute the `run` command: parse, wire up both connectors, replicate.
pub async fn execute(sync_path: &Path) -> Result<()> {
    let config = syncwire_engine::parse_sync(sync_path)
        .with_context(|| format!("Failed to parse sync: {}", sync_path.display()))?;
    let catalog = Arc::new(syncwire_engine::load_catalog(&config.catalog)?);

    let mapper = NamespaceMapper::new(config.namespace.clone(), config.stream_prefix.clone());
    let mapped_catalog = Arc::new(mapper.map_catalog(&catalog));

    tracing::info!(
        source = %config.source.pipe_dir.display(),
        destination = %config.destination.pipe_dir.display(),
        streams = catalog.streams.len(),
        "sync configured"
    );

    // Opening a pipe blocks until the connector opens its end, so both
    // facades come up on blocking threads, in parallel.
    let source_task = {
        let mut facade_config = SourceConfig::default();
        facade_config.decoder.detect_version = config.detect_source_version;
        facade_config.decoder.log_oversized_pks = config.log_oversized_record_pks;
        facade_config.catalog = Some(Arc::clone(&catalog));
        facade_config.termination_timeout = config.timeouts.termination();
        let transport = PipeTransport::open_for_source(config.source.pipe_dir.clone());
        tokio::task::spawn_blocking(move || {
            SourceConnector::start(Box::new(transport), facade_config)
        })
    };
    let destination_task = {
        let mut facade_config = DestinationConfig::default();
        facade_config.catalog = Some(mapped_catalog);
        facade_config.termination_timeout = config.timeouts.termination();
        let transport = PipeTransport::open_for_destination(config.destination.pipe_dir.clone());
        tokio::task::spawn_blocking(move || {
            DestinationConnector::start(Box::new(transport), facade_config)
        })
    };
    let source = source_task.await.context("source startup task failed")??;
    let destination = destination_task
        .await
        .context("destination startup task failed")??;

    let options = PipelineOptions {
        buffers: config.buffers,
        timeouts: config.timeouts,
        liveness_fatal: config.liveness_fatal,
    };
    let pipeline = ReplicationPipeline::new(source, destination, mapper, options);

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = pipeline.run().await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ReplicationSummary) {
    match summary.status {
        SyncStatus::Completed => println!("Sync completed."),
        SyncStatus::Cancelled => println!("Sync cancelled."),
    }
    println!("  Records read:     {}", summary.records_read);
    println!("  Records written:  {}", summary.records_written);
    println!("  States committed: {}", summary.states_committed);
    println!(
        "  Bytes read:       {}",
        format_bytes(summary.source_counters.bytes)
    );
    println!("  Duration:         {:.2}s", summary.duration.as_secs_f64());
    if summary.source_counters.non_protocol_lines > 0 {
        println!(
            "  Non-protocol source lines: {}",
            summary.source_counters.non_protocol_lines
        );
    }
    if summary.source_counters.rejected_messages > 0 {
        println!(
            "  Rejected messages:         {}",
            summary.source_counters.rejected_messages
        );
    }
    let incomplete = summary.incomplete_streams();
    if !incomplete.is_empty() {
        println!("  Incomplete streams:");
        for descriptor in incomplete {
            println!("    {descriptor}");
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

use std::path::Path;

use anyhow::{Context, Result};

use syncwire_protocol::ConnectorRole;
use syncwire_runtime::create_pipe_layout;

/// Execute the `prepare` command: create the pipe layout both connectors
/// attach to before a run.
pub fn execute(sync_path: &Path) -> Result<()> {
    let config = syncwire_engine::parse_sync(sync_path)
        .with_context(|| format!("Failed to parse sync: {}", sync_path.display()))?;

    create_pipe_layout(&config.source.pipe_dir, ConnectorRole::Source).with_context(|| {
        format!(
            "Failed to create source pipe layout in {}",
            config.source.pipe_dir.display()
        )
    })?;
    create_pipe_layout(&config.destination.pipe_dir, ConnectorRole::Destination).with_context(
        || {
            format!(
                "Failed to create destination pipe layout in {}",
                config.destination.pipe_dir.display()
            )
        },
    )?;

    println!("Pipe layout ready:");
    println!("  source:      {}", config.source.pipe_dir.display());
    println!("  destination: {}", config.destination.pipe_dir.display());
    Ok(())
}

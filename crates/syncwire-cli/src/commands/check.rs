use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use syncwire_protocol::message::{CheckStatus, ConnectionStatusMessage};
use syncwire_protocol::{ConnectorMessage, ConnectorRole};
use syncwire_runtime::{PipeTransport, SourceConfig, SourceConnector};

use crate::Endpoint;

/// Execute the `check` command: read one connector's CONNECTION_STATUS.
///
/// A connector in check mode only writes stdout and stderr, so both
/// endpoints are read through the source-shaped transport layout.
pub async fn execute(sync_path: &Path, endpoint: Endpoint) -> Result<()> {
    let config = syncwire_engine::parse_sync(sync_path)
        .with_context(|| format!("Failed to parse sync: {}", sync_path.display()))?;
    let catalog = syncwire_engine::load_catalog(&config.catalog)?;
    println!("Sync config: OK ({} streams)", catalog.streams.len());

    let (dir, role) = match endpoint {
        Endpoint::Source => (config.source.pipe_dir.clone(), ConnectorRole::Source),
        Endpoint::Destination => (
            config.destination.pipe_dir.clone(),
            ConnectorRole::Destination,
        ),
    };
    let termination_timeout = config.timeouts.termination();

    let status = tokio::task::spawn_blocking(move || {
        read_connection_status(dir, role, termination_timeout)
    })
    .await
    .context("check task failed")??;

    match status.status {
        CheckStatus::Succeeded => {
            println!("{role} connection: OK");
            if let Some(message) = status.message {
                println!("  {message}");
            }
            Ok(())
        }
        CheckStatus::Failed => {
            println!("{role} connection: FAILED");
            if let Some(message) = &status.message {
                println!("  {message}");
            }
            anyhow::bail!("connection check failed")
        }
    }
}

fn read_connection_status(
    dir: PathBuf,
    role: ConnectorRole,
    termination_timeout: Duration,
) -> Result<ConnectionStatusMessage> {
    let transport = PipeTransport::open_for_source(dir);
    let mut facade_config = SourceConfig::default();
    facade_config.decoder.origin = role;
    facade_config.decoder.detect_version = false;
    facade_config.termination_timeout = termination_timeout;
    let connector = SourceConnector::start(Box::new(transport), facade_config)?;

    let mut status = None;
    loop {
        match connector.attempt_read()? {
            Some(ConnectorMessage::ConnectionStatus { connection_status }) => {
                status = Some(connection_status);
            }
            Some(_) => {}
            None => {
                if connector.is_finished()? {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    connector.close(false)?;
    status.ok_or_else(|| anyhow::anyhow!("connector exited without a CONNECTION_STATUS message"))
}

//! Source connector facade.
//!
//! Lifecycle: `start` wires the transport (stderr forwarding first, then
//! the decoded stdout stream), `attempt_read`/`is_finished` drive the hot
//! path, and `close` tears the process down exactly once with exit-code
//! verification. Methods take `&self` behind internal locks so a reader
//! stage and a supervising cancel/cleanup path can share the facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use syncwire_protocol::codec::{CodecMetrics, DecoderConfig, MessageDecoder};
use syncwire_protocol::{ConfiguredCatalog, ConnectorMessage, ConnectorRole};

use crate::backoff::Backoff;
use crate::error::ConnectorError;
use crate::shutdown::close_transport;
use crate::stderr::forward_stderr;
use crate::transport::{ProcessTerminator, ProcessTransport};

const ROLE: ConnectorRole = ConnectorRole::Source;

/// Settings fixed at facade construction.
pub struct SourceConfig {
    pub decoder: DecoderConfig,
    pub catalog: Option<Arc<ConfiguredCatalog>>,
    pub startup_backoff: Backoff,
    pub termination_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::for_role(ROLE),
            catalog: None,
            startup_backoff: Backoff::default(),
            termination_timeout: Duration::from_secs(60),
        }
    }
}

struct ReadHalf {
    decoder: MessageDecoder,
    /// One-message lookahead filled by `is_finished`.
    buffered: Option<ConnectorMessage>,
}

/// A running source connector process.
pub struct SourceConnector {
    transport: Mutex<Box<dyn ProcessTransport>>,
    read: Mutex<ReadHalf>,
    metrics: Arc<CodecMetrics>,
    stderr_forwarder: Mutex<Option<JoinHandle<()>>>,
    termination_timeout: Duration,
    closed: AtomicBool,
}

impl SourceConnector {
    /// Wire up a started subprocess. Stream construction retries under the
    /// configured backoff; the error stream comes up before the output
    /// stream so early diagnostics are never lost.
    pub fn start(
        mut transport: Box<dyn ProcessTransport>,
        config: SourceConfig,
    ) -> Result<Self, ConnectorError> {
        let io_err = |source| ConnectorError::Io { role: ROLE, source };
        let stderr = config
            .startup_backoff
            .retry("open source stderr", || transport.stderr())
            .map_err(io_err)?;
        let stderr_forwarder = forward_stderr(ROLE, stderr).map_err(io_err)?;
        let stdout = config
            .startup_backoff
            .retry("open source stdout", || transport.stdout())
            .map_err(io_err)?;
        let decoder = MessageDecoder::new(stdout, config.decoder, config.catalog);
        let metrics = decoder.metrics();
        tracing::info!(connector = %ROLE, "connector facade started");
        Ok(Self {
            transport: Mutex::new(transport),
            read: Mutex::new(ReadHalf {
                decoder,
                buffered: None,
            }),
            metrics,
            stderr_forwarder: Mutex::new(Some(stderr_forwarder)),
            termination_timeout: config.termination_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Next protocol message, or `None` when the stream is currently at
    /// end. Blocks on process I/O.
    pub fn attempt_read(&self) -> Result<Option<ConnectorMessage>, ConnectorError> {
        let mut read = self.read.lock();
        if let Some(message) = read.buffered.take() {
            return Ok(Some(message));
        }
        Ok(read.decoder.next_message()?)
    }

    /// True once no parsed messages remain and the exit-code sentinel
    /// exists. The message check runs first so the hot path never probes
    /// the process while messages are still flowing.
    pub fn is_finished(&self) -> Result<bool, ConnectorError> {
        let mut read = self.read.lock();
        if read.buffered.is_some() {
            return Ok(false);
        }
        match read.decoder.next_message()? {
            Some(message) => {
                read.buffered = Some(message);
                Ok(false)
            }
            None => Ok(self.transport.lock().exit_code_available()),
        }
    }

    pub fn exit_code(&self) -> Result<i32, ConnectorError> {
        self.transport
            .lock()
            .exit_code()
            .map_err(|source| ConnectorError::ExitState { role: ROLE, source })
    }

    /// Decoder counters, shareable with the pipeline's summary.
    #[must_use]
    pub fn metrics(&self) -> Arc<CodecMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Non-blocking termination handle for cancel paths.
    #[must_use]
    pub fn terminator(&self) -> Arc<dyn ProcessTerminator> {
        self.transport.lock().terminator()
    }

    /// Terminate the process and verify its exit code. Idempotent.
    pub fn close(&self, cancelled: bool) -> Result<(), ConnectorError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        close_transport(
            self.transport.lock().as_mut(),
            ROLE,
            self.termination_timeout,
            cancelled,
        )?;
        // Process exit closes its stderr pipe, so the forwarder drains out.
        if let Some(handle) = self.stderr_forwarder.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use syncwire_protocol::MessageKind;

    fn config() -> SourceConfig {
        let mut config = SourceConfig::default();
        config.decoder.detect_version = false;
        config.startup_backoff = Backoff {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_attempts: 2,
        };
        config.termination_timeout = Duration::from_millis(200);
        config
    }

    #[test]
    fn test_reads_until_finished() {
        let transport = ScriptedTransport::with_stdout(concat!(
            r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}"#,
            "\n",
            r#"{"type":"STATE","state":{"data":{"cursor":1}}}"#,
            "\n",
        ))
        .exit_immediately(0);
        let source = SourceConnector::start(Box::new(transport), config()).unwrap();

        assert!(!source.is_finished().unwrap());
        let first = source.attempt_read().unwrap().unwrap();
        assert_eq!(first.kind(), MessageKind::Record);
        let second = source.attempt_read().unwrap().unwrap();
        assert_eq!(second.kind(), MessageKind::State);
        assert!(source.is_finished().unwrap());
        source.close(false).unwrap();
    }

    #[test]
    fn test_not_finished_while_process_alive() {
        // Stream at EOF but no exit-code sentinel yet.
        let transport = ScriptedTransport::with_stdout("");
        let source = SourceConnector::start(Box::new(transport), config()).unwrap();
        assert!(!source.is_finished().unwrap());
    }

    #[test]
    fn test_close_rejects_unexpected_exit_code() {
        let transport = ScriptedTransport::with_stdout("").exit_on_terminate(137);
        let source = SourceConnector::start(Box::new(transport), config()).unwrap();
        let err = source.close(false).unwrap_err();
        assert!(matches!(
            err,
            ConnectorError::UnexpectedExitCode { code: 137, .. }
        ));
    }

    #[test]
    fn test_close_after_cancel_suppresses_exit_code() {
        let transport = ScriptedTransport::with_stdout("").exit_on_terminate(137);
        let source = SourceConnector::start(Box::new(transport), config()).unwrap();
        source.close(true).unwrap();
        // Second close is a no-op.
        source.close(false).unwrap();
    }

    #[test]
    fn test_close_times_out_when_process_never_exits() {
        let transport = ScriptedTransport::with_stdout("").never_exits();
        let source = SourceConnector::start(Box::new(transport), config()).unwrap();
        let err = source.close(false).unwrap_err();
        assert!(matches!(err, ConnectorError::TerminationTimeout { .. }));
    }

    #[test]
    fn test_terminator_unblocks_parked_read() {
        let transport = ScriptedTransport::idle().exit_on_terminate(0);
        let source = Arc::new(SourceConnector::start(Box::new(transport), config()).unwrap());
        let terminator = source.terminator();
        let reader = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || source.attempt_read().unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        terminator.request_termination().unwrap();
        assert!(reader.join().unwrap().is_none());
        source.close(true).unwrap();
    }
}

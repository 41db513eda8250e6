//! Destination connector facade.
//!
//! Besides the read side (destinations echo STATE acknowledgements and
//! TRACE diagnostics back on stdout), the destination owns the write path:
//! `accept` serializes messages onto the process's stdin and
//! `notify_end_of_input` closes that stream so the process can finish.
//! The write and read halves are locked independently, so a writer stage
//! and a reader stage can drive the same facade concurrently; both calls
//! on the write path are bracketed by the timeout monitor so a watchdog
//! can see a stall inside a blocking write.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use syncwire_protocol::codec::{CodecMetrics, DecoderConfig, MessageDecoder};
use syncwire_protocol::{ConfiguredCatalog, ConnectorMessage, ConnectorRole};

use crate::backoff::Backoff;
use crate::error::ConnectorError;
use crate::monitor::DestinationTimeoutMonitor;
use crate::shutdown::close_transport;
use crate::stderr::forward_stderr;
use crate::transport::{ProcessTerminator, ProcessTransport};

const ROLE: ConnectorRole = ConnectorRole::Destination;

pub struct DestinationConfig {
    pub decoder: DecoderConfig,
    pub catalog: Option<Arc<ConfiguredCatalog>>,
    pub startup_backoff: Backoff,
    pub termination_timeout: Duration,
}

impl Default for DestinationConfig {
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
    buffered: Option<ConnectorMessage>,
}

/// A running destination connector process.
pub struct DestinationConnector {
    transport: Mutex<Box<dyn ProcessTransport>>,
    read: Mutex<ReadHalf>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    metrics: Arc<CodecMetrics>,
    monitor: Arc<DestinationTimeoutMonitor>,
    stderr_forwarder: Mutex<Option<JoinHandle<()>>>,
    termination_timeout: Duration,
    closed: AtomicBool,
}

impl DestinationConnector {
    /// Wire up a started subprocess. Streams open in stderr, stdout, stdin
    /// order; opening a connecting pipe can block until the peer opens its
    /// end, and this ordering is the one that cannot deadlock.
    pub fn start(
        mut transport: Box<dyn ProcessTransport>,
        config: DestinationConfig,
    ) -> Result<Self, ConnectorError> {
        let io_err = |source| ConnectorError::Io { role: ROLE, source };
        let stderr = config
            .startup_backoff
            .retry("open destination stderr", || transport.stderr())
            .map_err(io_err)?;
        let stderr_forwarder = forward_stderr(ROLE, stderr).map_err(io_err)?;
        let stdout = config
            .startup_backoff
            .retry("open destination stdout", || transport.stdout())
            .map_err(io_err)?;
        let decoder = MessageDecoder::new(stdout, config.decoder, config.catalog);
        let metrics = decoder.metrics();
        let writer = config
            .startup_backoff
            .retry("open destination stdin", || transport.stdin())
            .map_err(io_err)?;
        tracing::info!(connector = %ROLE, "connector facade started");
        Ok(Self {
            transport: Mutex::new(transport),
            read: Mutex::new(ReadHalf {
                decoder,
                buffered: None,
            }),
            writer: Mutex::new(Some(writer)),
            metrics,
            monitor: Arc::new(DestinationTimeoutMonitor::new()),
            stderr_forwarder: Mutex::new(Some(stderr_forwarder)),
            termination_timeout: config.termination_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// The stall detector bracketing `accept` and `notify_end_of_input`.
    #[must_use]
    pub fn monitor(&self) -> Arc<DestinationTimeoutMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Write one message to the process's stdin.
    pub fn accept(&self, message: &ConnectorMessage) -> Result<(), ConnectorError> {
        self.monitor.start_accept();
        let result = self.write_message(message);
        self.monitor.reset_accept();
        result
    }

    fn write_message(&self, message: &ConnectorMessage) -> Result<(), ConnectorError> {
        let mut writer = self.writer.lock();
        let writer = writer.as_mut().ok_or_else(|| ConnectorError::Io {
            role: ROLE,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"),
        })?;
        let line = serde_json::to_string(message).map_err(|err| ConnectorError::Io {
            role: ROLE,
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|source| ConnectorError::Io { role: ROLE, source })
    }

    /// Flush and close the process's stdin so it can finish its work.
    pub fn notify_end_of_input(&self) -> Result<(), ConnectorError> {
        self.monitor.start_end_of_input();
        let result = match self.writer.lock().take() {
            Some(mut writer) => writer
                .flush()
                .map_err(|source| ConnectorError::Io { role: ROLE, source }),
            None => Ok(()),
        };
        self.monitor.reset_end_of_input();
        result
    }

    /// Next message echoed by the destination, or `None` at end of stream.
    pub fn attempt_read(&self) -> Result<Option<ConnectorMessage>, ConnectorError> {
        let mut read = self.read.lock();
        if let Some(message) = read.buffered.take() {
            return Ok(Some(message));
        }
        Ok(read.decoder.next_message()?)
    }

    /// Same contract as the source side: messages drained, sentinel present.
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

    #[must_use]
    pub fn metrics(&self) -> Arc<CodecMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn terminator(&self) -> Arc<dyn ProcessTerminator> {
        self.transport.lock().terminator()
    }

    /// Terminate the process and verify its exit code. Idempotent.
    pub fn close(&self, cancelled: bool) -> Result<(), ConnectorError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Drop stdin first so the process sees end-of-input even when close
        // happens without a prior notify_end_of_input (cancel path).
        self.writer.lock().take();
        close_transport(
            self.transport.lock().as_mut(),
            ROLE,
            self.termination_timeout,
            cancelled,
        )?;
        if let Some(handle) = self.stderr_forwarder.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

//! The replication pipeline.
//!
//! Four long-lived stages connected by bounded closable queues:
//!
//! ```text
//! source reader -> [source queue] -> processor -> [destination queue] -> writer
//!                                                     destination reader (independent)
//! ```
//!
//! The reader pulls decoded messages off the source facade; the processor
//! beats the heartbeat, rewrites namespaces, and forwards RECORD and STATE
//! traffic; the writer feeds the destination's stdin; the destination
//! reader drains echoed acknowledgements and reverts their descriptors.
//! Stages run on blocking threads; an async watchdog polls the liveness
//! monitors. Cancellation and failure both flip the shared run state,
//! close the queues, and request subprocess termination, which is what
//! unblocks stages parked on pipe reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use syncwire_protocol::{ConnectorMessage, MessageKind};
use syncwire_runtime::monitor::{DestinationTimeoutMonitor, HeartbeatMonitor};
use syncwire_runtime::{DestinationConnector, ProcessTerminator, SourceConnector};

use crate::config::{BufferConfig, TimeoutConfig};
use crate::errors::PipelineError;
use crate::mapper::NamespaceMapper;
use crate::queue::ClosableQueue;
use crate::state::ReplicationState;
use crate::summary::{ReplicationSummary, SyncStatus};

/// How long a stage waits on a queue before re-checking run state.
const QUEUE_POLL: Duration = Duration::from_millis(1000);

/// Backoff when a connector stream is at EOF but the process lives on.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Knobs fixed at pipeline construction.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub buffers: BufferConfig,
    pub timeouts: TimeoutConfig,
    /// When false, liveness violations only log.
    pub liveness_fatal: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            buffers: BufferConfig::default(),
            timeouts: TimeoutConfig::default(),
            liveness_fatal: true,
        }
    }
}

#[derive(Default)]
struct Counters {
    records_read: AtomicU64,
    records_written: AtomicU64,
    states_committed: AtomicU64,
    stream_statuses: Mutex<
        std::collections::HashMap<
            syncwire_protocol::StreamDescriptor,
            syncwire_protocol::message::StreamStatus,
        >,
    >,
}

/// Everything a failing stage or a cancel request must do to bring the
/// pipeline down: remember the first error, flip run state, close queues,
/// and ask both subprocesses to terminate (termination is what unblocks a
/// stage parked inside a pipe read).
struct FailureHub {
    first: Mutex<Option<PipelineError>>,
    state: Arc<ReplicationState>,
    source_queue: Arc<ClosableQueue<ConnectorMessage>>,
    destination_queue: Arc<ClosableQueue<ConnectorMessage>>,
    terminators: Vec<Arc<dyn ProcessTerminator>>,
}

impl FailureHub {
    fn record(&self, err: PipelineError) {
        tracing::error!(error = %err, "pipeline stage failed");
        {
            let mut first = self.first.lock();
            if first.is_none() {
                *first = Some(err);
            }
        }
        self.state.mark_failed();
        self.shutdown_io();
    }

    fn shutdown_io(&self) {
        self.source_queue.close();
        self.destination_queue.close();
        for terminator in &self.terminators {
            if let Err(err) = terminator.request_termination() {
                tracing::warn!(error = %err, "termination request failed");
            }
        }
    }
}

/// Cooperative cancellation handle, safe to fire from a signal handler
/// task while `run` is in flight.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<ReplicationState>,
    hub: Arc<FailureHub>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.state.cancel();
        self.hub.shutdown_io();
    }
}

/// One sync attempt over a started source and destination.
pub struct ReplicationPipeline {
    source: Arc<SourceConnector>,
    destination: Arc<DestinationConnector>,
    mapper: Arc<Mutex<NamespaceMapper>>,
    heartbeat: Arc<HeartbeatMonitor>,
    state: Arc<ReplicationState>,
    source_queue: Arc<ClosableQueue<ConnectorMessage>>,
    destination_queue: Arc<ClosableQueue<ConnectorMessage>>,
    hub: Arc<FailureHub>,
    options: PipelineOptions,
}

impl ReplicationPipeline {
    #[must_use]
    pub fn new(
        source: SourceConnector,
        destination: DestinationConnector,
        mapper: NamespaceMapper,
        options: PipelineOptions,
    ) -> Self {
        let source = Arc::new(source);
        let destination = Arc::new(destination);
        let state = Arc::new(ReplicationState::new());
        let source_queue = Arc::new(ClosableQueue::new(options.buffers.source_capacity));
        let destination_queue = Arc::new(ClosableQueue::new(options.buffers.destination_capacity));
        let hub = Arc::new(FailureHub {
            first: Mutex::new(None),
            state: Arc::clone(&state),
            source_queue: Arc::clone(&source_queue),
            destination_queue: Arc::clone(&destination_queue),
            terminators: vec![source.terminator(), destination.terminator()],
        });
        Self {
            source,
            destination,
            mapper: Arc::new(Mutex::new(mapper)),
            heartbeat: Arc::new(HeartbeatMonitor::new()),
            state,
            source_queue,
            destination_queue,
            hub,
            options,
        }
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
            hub: Arc::clone(&self.hub),
        }
    }

    /// Drive the sync to completion, cancellation, or failure.
    ///
    /// Cancellation wins over errors: a run cancelled mid-failure still
    /// reports [`SyncStatus::Cancelled`] with the error logged, because
    /// cancellation legitimately produces broken pipes and non-zero exits.
    pub async fn run(self) -> Result<ReplicationSummary, PipelineError> {
        let started = Instant::now();
        let counters = Arc::new(Counters::default());
        tracing::info!(
            source_capacity = self.options.buffers.source_capacity,
            destination_capacity = self.options.buffers.destination_capacity,
            "starting replication"
        );

        let shutdown = Arc::new(Notify::new());
        let watchdog = tokio::spawn(monitor_loop(
            Arc::clone(&self.heartbeat),
            self.destination.monitor(),
            self.options.timeouts,
            self.options.liveness_fatal,
            Arc::clone(&self.hub),
            Arc::clone(&shutdown),
        ));

        let read_source = tokio::task::spawn_blocking({
            let source = Arc::clone(&self.source);
            let queue = Arc::clone(&self.source_queue);
            let state = Arc::clone(&self.state);
            let hub = Arc::clone(&self.hub);
            move || read_from_source(&source, &queue, &state, &hub)
        });
        let process = tokio::task::spawn_blocking({
            let source_queue = Arc::clone(&self.source_queue);
            let destination_queue = Arc::clone(&self.destination_queue);
            let mapper = Arc::clone(&self.mapper);
            let heartbeat = Arc::clone(&self.heartbeat);
            let counters = Arc::clone(&counters);
            let state = Arc::clone(&self.state);
            move || {
                process_messages(
                    &source_queue,
                    &destination_queue,
                    &mapper,
                    &heartbeat,
                    &counters,
                    &state,
                )
            }
        });
        let write_destination = tokio::task::spawn_blocking({
            let queue = Arc::clone(&self.destination_queue);
            let destination = Arc::clone(&self.destination);
            let counters = Arc::clone(&counters);
            let state = Arc::clone(&self.state);
            let hub = Arc::clone(&self.hub);
            move || write_to_destination(&queue, &destination, &counters, &state, &hub)
        });
        let read_destination = tokio::task::spawn_blocking({
            let destination = Arc::clone(&self.destination);
            let mapper = Arc::clone(&self.mapper);
            let counters = Arc::clone(&counters);
            let state = Arc::clone(&self.state);
            let hub = Arc::clone(&self.hub);
            move || read_from_destination(&destination, &mapper, &counters, &state, &hub)
        });

        for handle in [read_source, process, write_destination, read_destination] {
            if let Err(join_err) = handle.await {
                self.hub
                    .record(PipelineError::Infrastructure(anyhow::anyhow!(join_err)));
            }
        }
        shutdown.notify_one();
        let _ = watchdog.await;

        let cancelled = self.state.is_cancelled();
        if let Err(err) = self.source.close(cancelled) {
            self.hub.record(err.into());
        }
        if let Err(err) = self.destination.close(cancelled) {
            self.hub.record(err.into());
        }

        let summary = ReplicationSummary {
            status: if cancelled {
                SyncStatus::Cancelled
            } else {
                SyncStatus::Completed
            },
            records_read: counters.records_read.load(Ordering::Relaxed),
            records_written: counters.records_written.load(Ordering::Relaxed),
            states_committed: counters.states_committed.load(Ordering::Relaxed),
            stream_statuses: counters.stream_statuses.lock().clone(),
            source_counters: self.source.metrics().snapshot(),
            destination_counters: self.destination.metrics().snapshot(),
            duration: started.elapsed(),
        };

        let first_error = self.hub.first.lock().take();
        match first_error {
            Some(err) if !cancelled => Err(err),
            Some(err) => {
                tracing::warn!(error = %err, "suppressing failure after cancellation");
                Ok(summary)
            }
            None => {
                tracing::info!(
                    records_read = summary.records_read,
                    records_written = summary.records_written,
                    states_committed = summary.states_committed,
                    duration_secs = summary.duration.as_secs_f64(),
                    "replication finished"
                );
                Ok(summary)
            }
        }
    }
}

async fn monitor_loop(
    heartbeat: Arc<HeartbeatMonitor>,
    destination_monitor: Arc<DestinationTimeoutMonitor>,
    timeouts: TimeoutConfig,
    liveness_fatal: bool,
    hub: Arc<FailureHub>,
    shutdown: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(timeouts.monitor_poll());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat_warned = false;
    let mut destination_warned = false;
    loop {
        tokio::select! {
            () = shutdown.notified() => break,
            _ = interval.tick() => {
                if !heartbeat.is_beating(timeouts.heartbeat()) {
                    if liveness_fatal {
                        hub.record(PipelineError::Heartbeat {
                            threshold: timeouts.heartbeat(),
                        });
                        break;
                    }
                    if !heartbeat_warned {
                        tracing::warn!(threshold = ?timeouts.heartbeat(), "source heartbeat exceeded (non-fatal)");
                        heartbeat_warned = true;
                    }
                }
                if let Some(kind) = destination_monitor.exceeded(timeouts.destination()) {
                    if liveness_fatal {
                        hub.record(PipelineError::DestinationTimeout {
                            kind,
                            threshold: timeouts.destination(),
                        });
                        break;
                    }
                    if !destination_warned {
                        tracing::warn!(?kind, threshold = ?timeouts.destination(), "destination timeout exceeded (non-fatal)");
                        destination_warned = true;
                    }
                }
            }
        }
    }
}

fn read_from_source(
    source: &SourceConnector,
    queue: &ClosableQueue<ConnectorMessage>,
    state: &ReplicationState,
    hub: &FailureHub,
) {
    let result = (|| -> Result<(), PipelineError> {
        loop {
            if state.should_abort() {
                break;
            }
            if source.is_finished()? {
                break;
            }
            match source.attempt_read()? {
                Some(message) => {
                    // Closed queue means shutdown is underway; the item is
                    // intentionally dropped with the rest of the stream.
                    if queue.push(message).is_err() {
                        break;
                    }
                }
                // Stream at EOF but the process has not exited yet.
                None => std::thread::sleep(IDLE_SLEEP),
            }
        }
        Ok(())
    })();
    queue.close();
    if let Err(err) = result {
        hub.record(err);
    }
    tracing::debug!("source reader stage finished");
}

fn process_messages(
    source_queue: &ClosableQueue<ConnectorMessage>,
    destination_queue: &ClosableQueue<ConnectorMessage>,
    mapper: &Mutex<NamespaceMapper>,
    heartbeat: &HeartbeatMonitor,
    counters: &Counters,
    state: &ReplicationState,
) {
    loop {
        if state.should_abort() {
            break;
        }
        let Some(mut message) = source_queue.poll(QUEUE_POLL) else {
            if source_queue.is_done() {
                break;
            }
            continue;
        };
        // Only data traffic proves the source is alive.
        match message.kind() {
            MessageKind::Record | MessageKind::State => heartbeat.beat(),
            _ => {}
        }
        if message.kind() == MessageKind::Record {
            counters.records_read.fetch_add(1, Ordering::Relaxed);
        }
        if let ConnectorMessage::Trace { trace } = &message {
            if let Some(status) = &trace.stream_status {
                counters
                    .stream_statuses
                    .lock()
                    .insert(status.stream_descriptor.clone(), status.status);
            }
        }
        mapper.lock().map_message(&mut message);
        // Only RECORD and STATE go to the destination; diagnostics stop here.
        match message.kind() {
            MessageKind::Record | MessageKind::State => {
                if destination_queue.push(message).is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
    destination_queue.close();
    tracing::debug!("processor stage finished");
}

fn write_to_destination(
    queue: &ClosableQueue<ConnectorMessage>,
    destination: &DestinationConnector,
    counters: &Counters,
    state: &ReplicationState,
    hub: &FailureHub,
) {
    let result = (|| -> Result<(), PipelineError> {
        loop {
            if state.should_abort() {
                return Ok(());
            }
            match queue.poll(QUEUE_POLL) {
                Some(message) => {
                    let is_record = message.kind() == MessageKind::Record;
                    destination.accept(&message)?;
                    if is_record {
                        counters.records_written.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None if queue.is_done() => {
                    destination.notify_end_of_input()?;
                    return Ok(());
                }
                None => {}
            }
        }
    })();
    if let Err(err) = result {
        hub.record(err);
    }
    tracing::debug!("destination writer stage finished");
}

fn read_from_destination(
    destination: &DestinationConnector,
    mapper: &Mutex<NamespaceMapper>,
    counters: &Counters,
    state: &ReplicationState,
    hub: &FailureHub,
) {
    let result = (|| -> Result<(), PipelineError> {
        loop {
            if state.should_abort() {
                break;
            }
            if destination.is_finished()? {
                break;
            }
            match destination.attempt_read()? {
                Some(mut message) => match &message {
                    ConnectorMessage::State { .. } => {
                        // Checkpoints go back to the source's view of the
                        // catalog before anything persists them.
                        mapper.lock().revert_map(&mut message);
                        counters.states_committed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("destination committed a state checkpoint");
                    }
                    ConnectorMessage::Trace { trace } => {
                        if let Some(error) = &trace.error {
                            tracing::warn!(
                                connector = "destination",
                                message = %error.message,
                                "destination reported an error trace"
                            );
                        }
                    }
                    _ => {}
                },
                None => std::thread::sleep(IDLE_SLEEP),
            }
        }
        Ok(())
    })();
    if let Err(err) = result {
        hub.record(err);
    }
    tracing::debug!("destination reader stage finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncwire_protocol::ConnectorRole;
    use syncwire_runtime::testing::ScriptedTransport;
    use syncwire_runtime::{Backoff, DestinationConfig, SourceConfig};

    fn fast_backoff() -> Backoff {
        Backoff {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_attempts: 2,
        }
    }

    fn source_from(transport: ScriptedTransport) -> SourceConnector {
        let mut config = SourceConfig::default();
        config.decoder.detect_version = false;
        config.startup_backoff = fast_backoff();
        config.termination_timeout = Duration::from_millis(200);
        SourceConnector::start(Box::new(transport), config).unwrap()
    }

    fn destination_from(transport: ScriptedTransport) -> DestinationConnector {
        let mut config = DestinationConfig::default();
        config.startup_backoff = fast_backoff();
        config.termination_timeout = Duration::from_millis(200);
        DestinationConnector::start(Box::new(transport), config).unwrap()
    }

    fn options() -> PipelineOptions {
        let mut options = PipelineOptions::default();
        options.buffers.source_capacity = 10;
        options.buffers.destination_capacity = 10;
        options.timeouts.monitor_poll_secs = 3600;
        options
    }

    fn mapper(format: &str) -> NamespaceMapper {
        NamespaceMapper::new(
            crate::mapper::NamespaceDefinition::CustomFormat {
                format: format.to_string(),
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_replication() {
        let source_script = concat!(
            r#"{"type":"TRACE","trace":{"type":"STREAM_STATUS","emitted_at":1.0,"stream_status":{"status":"STARTED","stream_descriptor":{"namespace":"public","name":"users"}}}}"#,
            "\n",
            r#"{"type":"RECORD","record":{"namespace":"public","stream":"users","data":{"id":1},"emitted_at":1}}"#,
            "\n",
            "free-form source noise\n",
            r#"{"type":"RECORD","record":{"namespace":"public","stream":"users","data":{"id":2},"emitted_at":2}}"#,
            "\n",
            r#"{"type":"STATE","state":{"type":"STREAM","stream":{"stream_descriptor":{"namespace":"public","name":"users"},"stream_state":{"cursor":2}}}}"#,
            "\n",
            r#"{"type":"TRACE","trace":{"type":"STREAM_STATUS","emitted_at":2.0,"stream_status":{"status":"COMPLETE","stream_descriptor":{"namespace":"public","name":"users"}}}}"#,
            "\n",
        );
        let destination_script = concat!(
            r#"{"type":"STATE","state":{"type":"STREAM","stream":{"stream_descriptor":{"namespace":"public_copy","name":"users"},"stream_state":{"cursor":2}}}}"#,
            "\n",
        );
        let source_transport = ScriptedTransport::with_stdout(source_script).exit_immediately(0);
        let destination_transport =
            ScriptedTransport::with_stdout(destination_script).exit_immediately(0);
        let written = destination_transport.written();

        let pipeline = ReplicationPipeline::new(
            source_from(source_transport),
            destination_from(destination_transport),
            mapper("${SOURCE_NAMESPACE}_copy"),
            options(),
        );
        let summary = pipeline.run().await.unwrap();

        assert_eq!(summary.status, SyncStatus::Completed);
        assert_eq!(summary.records_read, 2);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.states_committed, 1);
        assert_eq!(summary.source_counters.non_protocol_lines, 1);
        assert!(summary.incomplete_streams().is_empty());

        // Everything the destination received carries the mapped namespace.
        let text = String::from_utf8(written.lock().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert!(line.contains("public_copy"), "unmapped line: {line}");
        }
        // Order within the stream is preserved.
        assert!(lines[0].contains("\"id\":1"));
        assert!(lines[1].contains("\"id\":2"));
        assert!(lines[2].contains("\"STATE\"") || lines[2].contains("\"type\":\"STREAM\""));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_parked_source() {
        let source_transport = ScriptedTransport::idle();
        let destination_transport = ScriptedTransport::with_stdout("");
        let pipeline = ReplicationPipeline::new(
            source_from(source_transport),
            destination_from(destination_transport),
            mapper("${SOURCE_NAMESPACE}"),
            options(),
        );
        let cancel = pipeline.cancel_handle();
        let run = tokio::spawn(pipeline.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.status, SyncStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_catalog_mismatch_fails_the_run() {
        use syncwire_protocol::catalog::{
            ConfiguredCatalog, ConfiguredStream, DestinationSyncMode, SyncMode,
        };
        use syncwire_protocol::message::CatalogStream;

        let mut stream = ConfiguredStream::new(
            CatalogStream::new(Some("public"), "users", serde_json::json!({})),
            SyncMode::Incremental,
            DestinationSyncMode::AppendDedup,
        );
        stream.primary_key = vec![vec!["id".to_string()]];
        let catalog = Arc::new(ConfiguredCatalog {
            streams: vec![stream],
        });

        let script = concat!(
            r#"{"type":"RECORD","record":{"namespace":"public","stream":"users","data":{"id":null},"emitted_at":1}}"#,
            "\n",
        );
        let source_transport = ScriptedTransport::with_stdout(script).exit_immediately(0);
        let destination_transport = ScriptedTransport::with_stdout("").exit_immediately(0);

        let mut source_config = SourceConfig::default();
        source_config.decoder.detect_version = false;
        source_config.decoder.origin = ConnectorRole::Source;
        source_config.catalog = Some(catalog);
        source_config.startup_backoff = fast_backoff();
        source_config.termination_timeout = Duration::from_millis(200);
        let source = SourceConnector::start(Box::new(source_transport), source_config).unwrap();

        let pipeline = ReplicationPipeline::new(
            source,
            destination_from(destination_transport),
            mapper("${SOURCE_NAMESPACE}"),
            options(),
        );
        let err = pipeline.run().await.unwrap_err();
        assert!(err.is_catalog_mismatch(), "unexpected error: {err}");
    }
}

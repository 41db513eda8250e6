//! Line-stream decoding: version detection, per-line processing, metrics.
//!
//! [`MessageDecoder`] is the lazy, finite, one-pass sequence of protocol
//! messages a connector facade iterates. Each raw line goes through
//! deserialize, validate, migrate, in that order; transient failures emit
//! nothing and bump a counter, hard failures abort iteration with a
//! [`CodecError`].

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{CodecError, CodecRegistry, VersionedCodec};
use crate::catalog::ConfiguredCatalog;
use crate::message::{ConnectorMessage, ConnectorRole, LogLevel, MessageKind};
use crate::pk_extractor;
use crate::version::{ProtocolVersion, FALLBACK_PROTOCOL_VERSION};

/// How many lines version detection may peek before giving up.
pub const MESSAGES_LOOK_AHEAD_FOR_DETECTION: usize = 10;

/// Byte budget for the detection lookahead. A connector emitting this much
/// before any SPEC message is misbehaving.
pub const BUFFER_READ_AHEAD_LIMIT: usize = 2 * 1024 * 1024;

/// Default character threshold above which a line is logged as oversized.
pub const DEFAULT_OVERSIZED_THRESHOLD: usize = 20_000_000;

const RECORD_FRAGMENT: &str = r#"{"type":"record","record":"#;

/// Buffered line source with a replay queue, so version detection can peek
/// lines that downstream consumption still receives.
pub struct LineReader {
    inner: Box<dyn BufRead + Send>,
    replay: VecDeque<String>,
}

impl LineReader {
    #[must_use]
    pub fn new(inner: Box<dyn BufRead + Send>) -> Self {
        Self {
            inner,
            replay: VecDeque::new(),
        }
    }

    /// Next line for the consumer: replayed lines first, then the stream.
    /// Returns `None` at end of stream. Trailing newlines are stripped.
    pub fn next_line(&mut self) -> std::io::Result<Option<String>> {
        if let Some(line) = self.replay.pop_front() {
            return Ok(Some(line));
        }
        self.read_raw_line()
    }

    /// Read a line and queue it for replay. Used only by detection.
    fn peek_line(&mut self) -> std::io::Result<Option<String>> {
        match self.read_raw_line()? {
            Some(line) => {
                self.replay.push_back(line.clone());
                Ok(Some(line))
            }
            None => Ok(None),
        }
    }

    fn read_raw_line(&mut self) -> std::io::Result<Option<String>> {
        let mut buf = String::new();
        let n = self.inner.read_line(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }
}

/// Find the protocol version a connector speaks by scanning its first lines
/// for a SPEC message, without consuming anything from the stream.
///
/// Falls back to [`FALLBACK_PROTOCOL_VERSION`] when no SPEC appears within
/// [`MESSAGES_LOOK_AHEAD_FOR_DETECTION`] lines. Exceeding the byte budget
/// first is a hard error.
pub fn detect_version(reader: &mut LineReader) -> Result<ProtocolVersion, CodecError> {
    let mut bytes_seen = 0usize;
    for _ in 0..MESSAGES_LOOK_AHEAD_FOR_DETECTION {
        let Some(line) = reader.peek_line()? else {
            break;
        };
        bytes_seen += line.len();
        if bytes_seen > BUFFER_READ_AHEAD_LIMIT {
            return Err(CodecError::DetectionBudgetExceeded {
                budget: BUFFER_READ_AHEAD_LIMIT,
            });
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let is_spec = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|t| t.eq_ignore_ascii_case("spec"));
        if !is_spec {
            continue;
        }
        match value.pointer("/spec/protocol_version").and_then(serde_json::Value::as_str) {
            Some(raw) => {
                let version: ProtocolVersion = raw.parse()?;
                tracing::info!(%version, "detected connector protocol version");
                return Ok(version);
            }
            // A SPEC without a version predates version advertising.
            None => return Ok(FALLBACK_PROTOCOL_VERSION),
        }
    }
    tracing::info!(
        fallback = %FALLBACK_PROTOCOL_VERSION,
        "no SPEC message within lookahead window, assuming fallback protocol version"
    );
    Ok(FALLBACK_PROTOCOL_VERSION)
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Shared counters the decoder increments as it processes lines.
#[derive(Debug, Default)]
pub struct CodecMetrics {
    bytes: AtomicU64,
    non_protocol_lines: AtomicU64,
    truncated_record_lines: AtomicU64,
    oversized_lines: AtomicU64,
    rejected_messages: AtomicU64,
    migration_failures: AtomicU64,
    by_kind: [AtomicU64; 9],
}

impl CodecMetrics {
    fn record_kind(&self, kind: MessageKind) {
        self.by_kind[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> CodecCounters {
        let mut by_kind = [0u64; 9];
        for (slot, counter) in by_kind.iter_mut().zip(&self.by_kind) {
            *slot = counter.load(Ordering::Relaxed);
        }
        CodecCounters {
            bytes: self.bytes.load(Ordering::Relaxed),
            non_protocol_lines: self.non_protocol_lines.load(Ordering::Relaxed),
            truncated_record_lines: self.truncated_record_lines.load(Ordering::Relaxed),
            oversized_lines: self.oversized_lines.load(Ordering::Relaxed),
            rejected_messages: self.rejected_messages.load(Ordering::Relaxed),
            migration_failures: self.migration_failures.load(Ordering::Relaxed),
            by_kind,
        }
    }
}

/// Immutable snapshot of [`CodecMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecCounters {
    /// Line bytes processed, newline delimiters excluded.
    pub bytes: u64,
    pub non_protocol_lines: u64,
    pub truncated_record_lines: u64,
    pub oversized_lines: u64,
    pub rejected_messages: u64,
    pub migration_failures: u64,
    by_kind: [u64; 9],
}

impl CodecCounters {
    #[must_use]
    pub fn kind_count(&self, kind: MessageKind) -> u64 {
        self.by_kind[kind_index(kind)]
    }

    /// Total protocol messages decoded, LOG lines included.
    #[must_use]
    pub fn total_messages(&self) -> u64 {
        self.by_kind.iter().sum()
    }
}

fn kind_index(kind: MessageKind) -> usize {
    match kind {
        MessageKind::Record => 0,
        MessageKind::State => 1,
        MessageKind::Log => 2,
        MessageKind::Trace => 3,
        MessageKind::Control => 4,
        MessageKind::Spec => 5,
        MessageKind::Catalog => 6,
        MessageKind::DestinationCatalog => 7,
        MessageKind::ConnectionStatus => 8,
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decoder settings, fixed per connector stream.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub origin: ConnectorRole,
    /// Peek for a SPEC message before processing the stream.
    pub detect_version: bool,
    /// Version to assume when detection is off. `None` means current.
    pub declared_version: Option<ProtocolVersion>,
    /// Character count at which a line is logged as oversized.
    pub oversized_threshold: usize,
    /// Include extracted primary-key values in oversized-line logs.
    pub log_oversized_pks: bool,
}

impl DecoderConfig {
    #[must_use]
    pub fn for_role(origin: ConnectorRole) -> Self {
        Self {
            origin,
            detect_version: origin == ConnectorRole::Source,
            declared_version: None,
            oversized_threshold: DEFAULT_OVERSIZED_THRESHOLD,
            log_oversized_pks: false,
        }
    }
}

/// One-pass decoder over a connector's output stream.
pub struct MessageDecoder {
    reader: LineReader,
    codec: VersionedCodec,
    config: DecoderConfig,
    catalog: Option<Arc<ConfiguredCatalog>>,
    metrics: Arc<CodecMetrics>,
    initialized: bool,
}

impl MessageDecoder {
    #[must_use]
    pub fn new(
        stream: Box<dyn BufRead + Send>,
        config: DecoderConfig,
        catalog: Option<Arc<ConfiguredCatalog>>,
    ) -> Self {
        Self {
            reader: LineReader::new(stream),
            codec: VersionedCodec::new(CodecRegistry::standard()),
            config,
            catalog,
            metrics: Arc::new(CodecMetrics::default()),
            initialized: false,
        }
    }

    /// Handle for reading counters while the decoder is owned elsewhere.
    #[must_use]
    pub fn metrics(&self) -> Arc<CodecMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn active_version(&self) -> ProtocolVersion {
        self.codec.active_version()
    }

    /// Pull the next protocol message, skipping noise. `Ok(None)` is end of
    /// stream; `Err` is a fatal codec condition.
    pub fn next_message(&mut self) -> Result<Option<ConnectorMessage>, CodecError> {
        self.ensure_initialized()?;
        loop {
            let Some(line) = self.reader.next_line()? else {
                return Ok(None);
            };
            self.metrics.bytes.fetch_add(line.len() as u64, Ordering::Relaxed);
            match self.process_line(&line)? {
                Some(message) => return Ok(Some(message)),
                None => continue,
            }
        }
    }

    fn ensure_initialized(&mut self) -> Result<(), CodecError> {
        if self.initialized {
            return Ok(());
        }
        if self.config.detect_version {
            let version = detect_version(&mut self.reader)?;
            self.codec.initialize_for_version(version)?;
        } else if let Some(version) = self.config.declared_version {
            self.codec.initialize_for_version(version)?;
        }
        self.initialized = true;
        Ok(())
    }

    fn process_line(&mut self, line: &str) -> Result<Option<ConnectorMessage>, CodecError> {
        // Byte length bounds character count, so short lines skip the scan.
        if line.len() >= self.config.oversized_threshold
            && line.chars().count() >= self.config.oversized_threshold
        {
            self.log_oversized(line);
        }

        let pair = self.codec.active();
        let versioned = match pair.deserializer.deserialize(line) {
            Ok(versioned) => versioned,
            Err(_) => {
                self.classify_malformed(line);
                return Ok(None);
            }
        };

        if let Err(failure) =
            pair.migrator
                .validate(&versioned, self.catalog.as_deref(), self.config.origin)
        {
            match failure {
                crate::validator::ValidationFailure::Mismatch(mismatch) => {
                    return Err(CodecError::CatalogMismatch(mismatch));
                }
                crate::validator::ValidationFailure::Rejected(reason) => {
                    self.metrics.rejected_messages.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        connector = %self.config.origin,
                        %reason,
                        "dropping invalid protocol message"
                    );
                    return Ok(None);
                }
            }
        }

        let message = match pair.migrator.migrate(versioned) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.migration_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connector = %self.config.origin,
                    from = %pair.version,
                    error = %err,
                    "failed to migrate message, skipping"
                );
                return Ok(None);
            }
        };

        self.metrics.record_kind(message.kind());

        // LOG traffic goes to the log sink, never into the pipeline.
        if let ConnectorMessage::Log { log } = &message {
            self.forward_log(log);
            return Ok(None);
        }
        Ok(Some(message))
    }

    fn classify_malformed(&self, line: &str) {
        // Pretty-printed or padded fragments still count as records.
        let normalized: String = line.to_lowercase().split_whitespace().collect();
        if normalized.contains(RECORD_FRAGMENT) {
            self.metrics
                .truncated_record_lines
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                connector = %self.config.origin,
                size = line.len(),
                "line looks like a truncated or garbled RECORD message"
            );
        } else {
            self.metrics.non_protocol_lines.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                connector = %self.config.origin,
                line = truncate_for_log(line),
                "ignoring non-protocol output line"
            );
        }
    }

    fn log_oversized(&self, line: &str) {
        self.metrics.oversized_lines.fetch_add(1, Ordering::Relaxed);
        let primary_key = if self.config.log_oversized_pks {
            self.catalog
                .as_deref()
                .and_then(|catalog| pk_extractor::extract_primary_key(line, catalog))
        } else {
            None
        };
        tracing::warn!(
            connector = %self.config.origin,
            bytes = line.len(),
            primary_key = ?primary_key,
            "oversized protocol line"
        );
    }

    fn forward_log(&self, log: &crate::message::LogMessage) {
        let connector = self.config.origin;
        match log.level {
            LogLevel::Fatal | LogLevel::Error => {
                tracing::error!(%connector, "{}", log.message);
            }
            LogLevel::Warn => tracing::warn!(%connector, "{}", log.message),
            LogLevel::Info => tracing::info!(%connector, "{}", log.message),
            LogLevel::Debug => tracing::debug!(%connector, "{}", log.message),
            LogLevel::Trace => tracing::trace!(%connector, "{}", log.message),
        }
    }
}

impl Iterator for MessageDecoder {
    type Item = Result<ConnectorMessage, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}

fn truncate_for_log(line: &str) -> &str {
    let limit = 256;
    if line.len() <= limit {
        return line;
    }
    let mut end = limit;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DestinationSyncMode, SyncMode};
    use crate::message::MessageKind;
    use std::io::Cursor;

    fn decoder_over(input: &str, config: DecoderConfig) -> MessageDecoder {
        MessageDecoder::new(Box::new(Cursor::new(input.to_string())), config, None)
    }

    fn source_config() -> DecoderConfig {
        DecoderConfig::for_role(ConnectorRole::Source)
    }

    #[test]
    fn test_detection_finds_spec_after_log() {
        let input = concat!(
            r#"{"type":"LOG","log":{"level":"INFO","message":"starting"}}"#,
            "\n",
            r#"{"type":"SPEC","spec":{"protocol_version":"1.2.0","connection_specification":{}}}"#,
            "\n",
            r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}"#,
            "\n",
        );
        let mut decoder = decoder_over(input, source_config());
        let first = decoder.next_message().unwrap().unwrap();
        assert_eq!(decoder.active_version(), ProtocolVersion::new(1, 2, 0));
        // The SPEC consumed by detection is still delivered downstream.
        assert_eq!(first.kind(), MessageKind::Spec);
        let second = decoder.next_message().unwrap().unwrap();
        assert_eq!(second.kind(), MessageKind::Record);
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_detection_falls_back_without_spec() {
        let input = concat!(
            r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}"#,
            "\n",
            r#"{"type":"STATE","state":{"data":{"cursor":1}}}"#,
            "\n",
        );
        let mut decoder = decoder_over(input, source_config());
        let first = decoder.next_message().unwrap().unwrap();
        assert_eq!(decoder.active_version(), FALLBACK_PROTOCOL_VERSION);
        assert_eq!(first.kind(), MessageKind::Record);
        // Legacy state decodes under the fallback version's schema.
        let second = decoder.next_message().unwrap().unwrap();
        assert_eq!(second.kind(), MessageKind::State);
    }

    #[test]
    fn test_non_json_line_counts_as_noise() {
        let input = "not json at all\n";
        let mut decoder = decoder_over(input, source_config());
        assert!(decoder.next_message().unwrap().is_none());
        let counters = decoder.metrics().snapshot();
        assert_eq!(counters.non_protocol_lines, 1);
        assert_eq!(counters.truncated_record_lines, 0);
    }

    #[test]
    fn test_truncated_record_counted_separately() {
        let input = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1"#;
        let mut decoder = decoder_over(&format!("{input}\n"), source_config());
        assert!(decoder.next_message().unwrap().is_none());
        let counters = decoder.metrics().snapshot();
        assert_eq!(counters.truncated_record_lines, 1);
        assert_eq!(counters.non_protocol_lines, 0);
    }

    #[test]
    fn test_truncated_record_with_interior_whitespace() {
        let input = r#"{"type": "Record", "record": {"stream": "users", "data": {"id"#;
        let mut decoder = decoder_over(&format!("{input}\n"), source_config());
        assert!(decoder.next_message().unwrap().is_none());
        let counters = decoder.metrics().snapshot();
        assert_eq!(counters.truncated_record_lines, 1);
        assert_eq!(counters.non_protocol_lines, 0);
    }

    #[test]
    fn test_log_messages_filtered_from_output() {
        let input = concat!(
            r#"{"type":"LOG","log":{"level":"INFO","message":"hello"}}"#,
            "\n",
            r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}"#,
            "\n",
        );
        let mut decoder = decoder_over(input, source_config());
        let first = decoder.next_message().unwrap().unwrap();
        assert_eq!(first.kind(), MessageKind::Record);
        let counters = decoder.metrics().snapshot();
        assert_eq!(counters.kind_count(MessageKind::Log), 1);
        assert_eq!(counters.kind_count(MessageKind::Record), 1);
    }

    #[test]
    fn test_oversized_line_still_processed() {
        let mut config = source_config();
        config.detect_version = false;
        config.oversized_threshold = 32;
        let input = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"},"emitted_at":1}}"#;
        let mut decoder = decoder_over(&format!("{input}\n"), config);
        let msg = decoder.next_message().unwrap().unwrap();
        assert_eq!(msg.kind(), MessageKind::Record);
        assert_eq!(decoder.metrics().snapshot().oversized_lines, 1);
    }

    #[test]
    fn test_detection_budget_exceeded_is_fatal() {
        let big = format!("{{\"padding\":\"{}\"}}\n", "x".repeat(BUFFER_READ_AHEAD_LIMIT));
        let mut decoder = decoder_over(&big, source_config());
        let err = decoder.next_message().unwrap_err();
        assert!(matches!(err, CodecError::DetectionBudgetExceeded { .. }));
    }

    #[test]
    fn test_dedup_null_pk_aborts_iteration() {
        let catalog = Arc::new(ConfiguredCatalog {
            streams: vec![crate::catalog::tests::configured_stream(
                None,
                "users",
                SyncMode::Incremental,
                DestinationSyncMode::AppendDedup,
                vec![vec!["id".to_string()]],
            )],
        });
        let mut config = source_config();
        config.detect_version = false;
        let input = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":null},"emitted_at":1}}"#;
        let mut decoder = MessageDecoder::new(
            Box::new(Cursor::new(format!("{input}\n"))),
            config,
            Some(catalog),
        );
        let err = decoder.next_message().unwrap_err();
        assert!(matches!(err, CodecError::CatalogMismatch(_)));
    }

    #[test]
    fn test_declared_version_selects_codec() {
        let mut config = DecoderConfig::for_role(ConnectorRole::Destination);
        config.declared_version = Some(ProtocolVersion::new(0, 2, 0));
        let input = r#"{"type":"STATE","state":{"data":{"cursor":9}}}"#;
        let mut decoder = decoder_over(&format!("{input}\n"), config);
        let msg = decoder.next_message().unwrap().unwrap();
        assert_eq!(msg.kind(), MessageKind::State);
        assert_eq!(decoder.active_version(), ProtocolVersion::new(0, 2, 0));
    }
}

//! Connector message model at the engine's current protocol version.
//!
//! A [`ConnectorMessage`] is one newline-delimited JSON object on a
//! connector's standard output, discriminated by its `type` field. Messages
//! are immutable once parsed; stages downstream of the codec produce new
//! values rather than mutating shared ones, with the single exception of the
//! namespace mapper which rewrites descriptor fields in place before
//! forwarding.
//!
//! Payload structs reject unknown fields so that exact deserialization under
//! a declared protocol version fails loudly instead of silently accepting a
//! different version's shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::StreamDescriptor;

/// Which side of the sync a process (and its messages) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorRole {
    Source,
    Destination,
}

impl ConnectorRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The nine message kinds of the connector protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Record,
    State,
    Log,
    Trace,
    Control,
    Spec,
    Catalog,
    DestinationCatalog,
    ConnectionStatus,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Record,
        MessageKind::State,
        MessageKind::Log,
        MessageKind::Trace,
        MessageKind::Control,
        MessageKind::Spec,
        MessageKind::Catalog,
        MessageKind::DestinationCatalog,
        MessageKind::ConnectionStatus,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "RECORD",
            Self::State => "STATE",
            Self::Log => "LOG",
            Self::Trace => "TRACE",
            Self::Control => "CONTROL",
            Self::Spec => "SPEC",
            Self::Catalog => "CATALOG",
            Self::DestinationCatalog => "DESTINATION_CATALOG",
            Self::ConnectionStatus => "CONNECTION_STATUS",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single protocol message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorMessage {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Log { log: LogMessage },
    Trace { trace: TraceMessage },
    Control { control: ControlMessage },
    Spec { spec: SpecMessage },
    Catalog { catalog: CatalogMessage },
    DestinationCatalog { destination_catalog: DestinationCatalogMessage },
    ConnectionStatus { connection_status: ConnectionStatusMessage },
}

impl ConnectorMessage {
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Record { .. } => MessageKind::Record,
            Self::State { .. } => MessageKind::State,
            Self::Log { .. } => MessageKind::Log,
            Self::Trace { .. } => MessageKind::Trace,
            Self::Control { .. } => MessageKind::Control,
            Self::Spec { .. } => MessageKind::Spec,
            Self::Catalog { .. } => MessageKind::Catalog,
            Self::DestinationCatalog { .. } => MessageKind::DestinationCatalog,
            Self::ConnectionStatus { .. } => MessageKind::ConnectionStatus,
        }
    }
}

/// One row of data for a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordMessage {
    /// Namespace of the stream this record belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the stream this record belongs to.
    pub stream: String,
    /// Row payload. Must be a non-empty JSON object.
    pub data: serde_json::Value,
    /// Unix epoch milliseconds at which the connector emitted the record.
    pub emitted_at: i64,
}

impl RecordMessage {
    /// The descriptor identifying this record's stream.
    #[must_use]
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            namespace: self.namespace.clone(),
            name: self.stream.clone(),
        }
    }
}

/// Shape of a state checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Stream,
    Global,
    /// Pre-descriptor state: a single opaque blob for the whole sync.
    #[default]
    Legacy,
}

/// Per-stream state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<serde_json::Value>,
}

/// Shared-plus-per-stream state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<serde_json::Value>,
    pub stream_states: Vec<StreamState>,
}

/// Record counts a connector attaches to a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateStats {
    pub record_count: f64,
}

/// A sync-progress checkpoint, replayed on later attempts for resumability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateMessage {
    #[serde(rename = "type", default)]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stats: Option<StateStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_stats: Option<StateStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Free-form log line emitted through the protocol rather than stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceType {
    Error,
    Estimate,
    StreamStatus,
    Analytics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    SystemError,
    ConfigError,
    TransientError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorTraceMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateType {
    Stream,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimateTraceMessage {
    #[serde(rename = "type")]
    pub estimate_type: EstimateType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_estimate: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Started,
    Running,
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamStatusTraceMessage {
    pub status: StreamStatus,
    pub stream_descriptor: StreamDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyticsTraceMessage {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Out-of-band diagnostics: errors, estimates, stream status transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceMessage {
    #[serde(rename = "type")]
    pub trace_type: TraceType,
    /// Unix epoch milliseconds. The protocol historically used a float here.
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTraceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimateTraceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_status: Option<StreamStatusTraceMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsTraceMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    ConnectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfigControl {
    pub config: serde_json::Value,
}

/// Engine-directed message, currently only connector config updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_config: Option<ConnectorConfigControl>,
}

/// Connector self-description, including the protocol version it speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    pub connection_specification: serde_json::Value,
}

/// A stream as discovered by a source connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogStream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub json_schema: serde_json::Value,
    #[serde(default)]
    pub supported_sync_modes: Vec<crate::catalog::SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_defined_cursor: Option<bool>,
    #[serde(default)]
    pub default_cursor_field: Vec<String>,
    #[serde(default)]
    pub source_defined_primary_key: Vec<Vec<String>>,
}

impl CatalogStream {
    /// A stream with the given identity and schema and no discovery extras.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str, json_schema: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            json_schema,
            supported_sync_modes: Vec::new(),
            source_defined_cursor: None,
            default_cursor_field: Vec::new(),
            source_defined_primary_key: Vec::new(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// The full set of streams a source connector can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogMessage {
    pub streams: Vec<CatalogStream>,
}

/// One write target a destination connector can accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationOperation {
    pub object_name: String,
    pub sync_mode: crate::catalog::DestinationSyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_keys: Option<Vec<Vec<String>>>,
    pub json_schema: serde_json::Value,
}

/// The write targets a destination connector advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationCatalogMessage {
    pub operations: Vec<DestinationOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Succeeded,
    Failed,
}

/// Result of a connection check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionStatusMessage {
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_wire_shape() {
        let msg = ConnectorMessage::Record {
            record: RecordMessage {
                namespace: Some("public".into()),
                stream: "users".into(),
                data: json!({"id": 1}),
                emitted_at: 1_700_000_000_000,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "RECORD");
        assert_eq!(value["record"]["stream"], "users");
        assert_eq!(value["record"]["data"]["id"], 1);
    }

    #[test]
    fn test_all_kinds_have_distinct_tags() {
        let mut tags: Vec<&str> = MessageKind::ALL.iter().map(|k| k.as_str()).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), 9);
    }

    #[test]
    fn test_state_type_defaults_to_legacy() {
        let state: StateMessage =
            serde_json::from_value(json!({"data": {"cursor": 5}})).unwrap();
        assert_eq!(state.state_type, StateType::Legacy);
        assert_eq!(state.data, Some(json!({"cursor": 5})));
    }

    #[test]
    fn test_stream_state_wire_shape() {
        let line = r#"{"type":"STATE","state":{"type":"STREAM","stream":{"stream_descriptor":{"namespace":"public","name":"users"},"stream_state":{"cursor":"2026-01-01"}}}}"#;
        let msg: ConnectorMessage = serde_json::from_str(line).unwrap();
        let ConnectorMessage::State { state } = msg else {
            panic!("expected STATE");
        };
        assert_eq!(state.state_type, StateType::Stream);
        let stream = state.stream.unwrap();
        assert_eq!(stream.stream_descriptor.name, "users");
    }

    #[test]
    fn test_unknown_payload_field_rejected() {
        let line = r#"{"type":"RECORD","record":{"stream":"users","data":{},"emitted_at":1,"surprise":true}}"#;
        assert!(serde_json::from_str::<ConnectorMessage>(line).is_err());
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let line = r#"{"type":"TELEMETRY","telemetry":{}}"#;
        assert!(serde_json::from_str::<ConnectorMessage>(line).is_err());
    }

    #[test]
    fn test_trace_stream_status_roundtrip() {
        let msg = ConnectorMessage::Trace {
            trace: TraceMessage {
                trace_type: TraceType::StreamStatus,
                emitted_at: 1.0,
                error: None,
                estimate: None,
                stream_status: Some(StreamStatusTraceMessage {
                    status: StreamStatus::Complete,
                    stream_descriptor: StreamDescriptor {
                        namespace: None,
                        name: "users".into(),
                    },
                }),
                analytics: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"STREAM_STATUS\""));
        let back: ConnectorMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}

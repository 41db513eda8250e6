//! Per-message structural and semantic validation.
//!
//! Deliberately cheaper than JSON-schema validation: each message kind gets
//! a minimum-field check, and source RECORD messages are additionally
//! checked against the configured catalog. Soft rejections mean "drop this
//! message and keep going"; catalog mismatches are hard failures that abort
//! the sync, because they indicate the connector and the catalog disagree
//! about what streams exist.

use thiserror::Error;

use crate::catalog::{ConfiguredCatalog, ConfiguredStream, StreamDescriptor};
use crate::message::{
    ConnectorMessage, ConnectorRole, ControlMessage, ControlType, LogMessage, RecordMessage,
    SpecMessage, StateMessage, StateType, TraceMessage, TraceType,
};
use crate::pk_extractor::resolve_field_path;

/// Why a message was dropped without failing the sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("record has an empty stream name")]
    EmptyStreamName,
    #[error("record data is not a non-empty JSON object")]
    EmptyRecordData,
    #[error("log message text is empty")]
    EmptyLogMessage,
    #[error("state message body does not match its declared type {0:?}")]
    StateShapeMismatch(StateType),
    #[error("trace message lacks the payload for its declared type {0:?}")]
    TraceShapeMismatch(TraceType),
    #[error("trace emitted_at is not a positive timestamp")]
    NonPositiveTraceTimestamp,
    #[error("control message lacks the payload for its declared type {0:?}")]
    ControlShapeMismatch(ControlType),
    #[error("spec connection_specification is not a JSON object")]
    InvalidSpecBody,
}

/// Connector/catalog disagreement. Always fatal to the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogMismatch {
    #[error("record stream {0} is not in the configured catalog")]
    UnknownStream(StreamDescriptor),
    #[error("record for dedup stream {0} resolves no non-null primary-key field-group")]
    MissingPrimaryKey(StreamDescriptor),
}

/// Validation outcome other than acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error(transparent)]
    Rejected(#[from] RejectReason),
    #[error(transparent)]
    Mismatch(#[from] CatalogMismatch),
}

impl ValidationFailure {
    /// Hard failures abort the sync; soft ones only drop the message.
    #[must_use]
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Mismatch(_))
    }
}

/// Validate one message against its kind's minimum shape and, for source
/// records, against the configured catalog.
pub fn validate(
    message: &ConnectorMessage,
    catalog: Option<&ConfiguredCatalog>,
    origin: ConnectorRole,
) -> Result<(), ValidationFailure> {
    match message {
        ConnectorMessage::Record { record } => validate_record(record, catalog, origin),
        ConnectorMessage::State { state } => validate_state(state).map_err(Into::into),
        ConnectorMessage::Log { log } => validate_log(log).map_err(Into::into),
        ConnectorMessage::Trace { trace } => validate_trace(trace).map_err(Into::into),
        ConnectorMessage::Control { control } => validate_control(control).map_err(Into::into),
        ConnectorMessage::Spec { spec } => validate_spec(spec).map_err(Into::into),
        // Deserialization already enforces these bodies' required fields.
        ConnectorMessage::Catalog { .. }
        | ConnectorMessage::DestinationCatalog { .. }
        | ConnectorMessage::ConnectionStatus { .. } => Ok(()),
    }
}

fn validate_record(
    record: &RecordMessage,
    catalog: Option<&ConfiguredCatalog>,
    origin: ConnectorRole,
) -> Result<(), ValidationFailure> {
    if record.stream.is_empty() {
        return Err(RejectReason::EmptyStreamName.into());
    }
    // Destinations echo back minimal acknowledgement records; only source
    // records are held to the catalog's field-level requirements.
    if origin == ConnectorRole::Destination {
        return Ok(());
    }
    let non_empty_object = record
        .data
        .as_object()
        .is_some_and(|obj| !obj.is_empty());
    if !non_empty_object {
        return Err(RejectReason::EmptyRecordData.into());
    }
    if let Some(catalog) = catalog {
        let stream = catalog
            .stream(record.namespace.as_deref(), &record.stream)
            .ok_or_else(|| CatalogMismatch::UnknownStream(record.descriptor()))?;
        if stream.requires_primary_key() && !has_resolvable_primary_key(record, stream) {
            return Err(CatalogMismatch::MissingPrimaryKey(record.descriptor()).into());
        }
    }
    Ok(())
}

/// At least one configured primary-key field-group must resolve to a
/// non-null value inside the record's data payload.
fn has_resolvable_primary_key(record: &RecordMessage, stream: &ConfiguredStream) -> bool {
    stream
        .primary_key
        .iter()
        .any(|path| resolve_field_path(&record.data, path).is_some())
}

pub(crate) fn validate_state(state: &StateMessage) -> Result<(), RejectReason> {
    let ok = match state.state_type {
        StateType::Stream => state.stream.is_some(),
        StateType::Global => state.global.is_some(),
        StateType::Legacy => state.data.is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(RejectReason::StateShapeMismatch(state.state_type))
    }
}

pub(crate) fn validate_log(log: &LogMessage) -> Result<(), RejectReason> {
    if log.message.is_empty() {
        Err(RejectReason::EmptyLogMessage)
    } else {
        Ok(())
    }
}

pub(crate) fn validate_trace(trace: &TraceMessage) -> Result<(), RejectReason> {
    if trace.emitted_at <= 0.0 {
        return Err(RejectReason::NonPositiveTraceTimestamp);
    }
    let ok = match trace.trace_type {
        TraceType::Error => trace.error.is_some(),
        TraceType::Estimate => trace.estimate.is_some(),
        TraceType::StreamStatus => trace.stream_status.is_some(),
        TraceType::Analytics => trace.analytics.is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(RejectReason::TraceShapeMismatch(trace.trace_type))
    }
}

fn validate_control(control: &ControlMessage) -> Result<(), RejectReason> {
    let ok = match control.control_type {
        ControlType::ConnectorConfig => control.connector_config.is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(RejectReason::ControlShapeMismatch(control.control_type))
    }
}

pub(crate) fn validate_spec(spec: &SpecMessage) -> Result<(), RejectReason> {
    if spec.connection_specification.is_object() {
        Ok(())
    } else {
        Err(RejectReason::InvalidSpecBody)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DestinationSyncMode, SyncMode};
    use serde_json::json;

    fn record(namespace: Option<&str>, stream: &str, data: serde_json::Value) -> ConnectorMessage {
        ConnectorMessage::Record {
            record: RecordMessage {
                namespace: namespace.map(str::to_string),
                stream: stream.to_string(),
                data,
                emitted_at: 1,
            },
        }
    }

    fn dedup_catalog() -> ConfiguredCatalog {
        ConfiguredCatalog {
            streams: vec![crate::catalog::tests::configured_stream(
                Some("public"),
                "users",
                SyncMode::Incremental,
                DestinationSyncMode::AppendDedup,
                vec![vec!["id".to_string()]],
            )],
        }
    }

    #[test]
    fn test_record_with_non_null_pk_accepted() {
        let msg = record(Some("public"), "users", json!({"id": 7}));
        assert!(validate(&msg, Some(&dedup_catalog()), ConnectorRole::Source).is_ok());
    }

    #[test]
    fn test_record_with_null_pk_is_hard_failure() {
        let msg = record(Some("public"), "users", json!({"id": null}));
        let err = validate(&msg, Some(&dedup_catalog()), ConnectorRole::Source).unwrap_err();
        assert!(err.is_hard());
        assert_eq!(
            err,
            ValidationFailure::Mismatch(CatalogMismatch::MissingPrimaryKey(
                StreamDescriptor::new(Some("public"), "users")
            ))
        );
    }

    #[test]
    fn test_record_for_unknown_stream_is_hard_failure() {
        let msg = record(None, "orders", json!({"id": 1}));
        let err = validate(&msg, Some(&dedup_catalog()), ConnectorRole::Source).unwrap_err();
        assert_eq!(
            err,
            ValidationFailure::Mismatch(CatalogMismatch::UnknownStream(StreamDescriptor::new(
                None, "orders"
            )))
        );
    }

    #[test]
    fn test_empty_record_data_is_soft_rejection() {
        let msg = record(Some("public"), "users", json!({}));
        let err = validate(&msg, Some(&dedup_catalog()), ConnectorRole::Source).unwrap_err();
        assert!(!err.is_hard());
    }

    #[test]
    fn test_destination_records_skip_field_checks() {
        let msg = record(None, "users_ack", json!({}));
        assert!(validate(&msg, Some(&dedup_catalog()), ConnectorRole::Destination).is_ok());
    }

    #[test]
    fn test_state_shape_must_match_declared_type() {
        let state = StateMessage {
            state_type: StateType::Stream,
            stream: None,
            global: None,
            data: None,
            source_stats: None,
            destination_stats: None,
        };
        assert_eq!(
            validate_state(&state),
            Err(RejectReason::StateShapeMismatch(StateType::Stream))
        );
    }

    #[test]
    fn test_trace_shape_must_match_declared_type() {
        let trace = TraceMessage {
            trace_type: TraceType::Error,
            emitted_at: 1.0,
            error: None,
            estimate: None,
            stream_status: None,
            analytics: None,
        };
        assert_eq!(
            validate_trace(&trace),
            Err(RejectReason::TraceShapeMismatch(TraceType::Error))
        );
    }

    #[test]
    fn test_trace_timestamp_must_be_positive() {
        let trace = TraceMessage {
            trace_type: TraceType::Analytics,
            emitted_at: 0.0,
            error: None,
            estimate: None,
            stream_status: None,
            analytics: Some(crate::message::AnalyticsTraceMessage {
                event: "sync".to_string(),
                value: Some("1".to_string()),
            }),
        };
        assert_eq!(
            validate_trace(&trace),
            Err(RejectReason::NonPositiveTraceTimestamp)
        );
    }
}

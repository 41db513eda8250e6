//! Protocol major version 0.
//!
//! The wire shape connectors spoke before version advertising existed:
//! state is a single opaque blob for the whole sync (no stream/global
//! distinction), and the TRACE, CONTROL, and DESTINATION_CATALOG kinds do
//! not exist yet. Everything else already matches the current payloads, so
//! those structs are shared rather than duplicated here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{CodecPair, MessageDeserializer, MessageMigrator, MigrationError, VersionedMessage};
use crate::catalog::ConfiguredCatalog;
use crate::message::{
    CatalogMessage, ConnectionStatusMessage, ConnectorMessage, ConnectorRole, LogMessage,
    RecordMessage, SpecMessage, StateMessage, StateType,
};
use crate::validator::{self, RejectReason, ValidationFailure};
use crate::version::ProtocolVersion;

/// Whole-sync checkpoint blob, the only state shape version 0 knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyState {
    pub data: serde_json::Value,
}

/// A version-0 protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Record { record: RecordMessage },
    State { state: LegacyState },
    Log { log: LogMessage },
    Spec { spec: SpecMessage },
    Catalog { catalog: CatalogMessage },
    ConnectionStatus { connection_status: ConnectionStatusMessage },
}

pub(super) fn codec_pair(version: ProtocolVersion) -> CodecPair {
    CodecPair {
        version,
        deserializer: Arc::new(V0Deserializer),
        migrator: Arc::new(V0Migrator),
    }
}

struct V0Deserializer;

impl MessageDeserializer for V0Deserializer {
    fn deserialize(&self, line: &str) -> Result<VersionedMessage, serde_json::Error> {
        serde_json::from_str::<Message>(line).map(VersionedMessage::V0)
    }
}

struct V0Migrator;

impl MessageMigrator for V0Migrator {
    fn validate(
        &self,
        message: &VersionedMessage,
        catalog: Option<&ConfiguredCatalog>,
        origin: ConnectorRole,
    ) -> Result<(), ValidationFailure> {
        match message {
            VersionedMessage::V0(msg) => validate(msg, catalog, origin),
            VersionedMessage::V1(msg) => validator::validate(msg, catalog, origin),
        }
    }

    fn migrate(&self, message: VersionedMessage) -> Result<ConnectorMessage, MigrationError> {
        match message {
            VersionedMessage::V0(msg) => migrate(msg),
            VersionedMessage::V1(msg) => Ok(msg),
        }
    }
}

/// Version-0 validation reuses the shared per-kind checks; only the state
/// shape differs (the blob must be present and non-null).
pub(super) fn validate(
    message: &Message,
    catalog: Option<&ConfiguredCatalog>,
    origin: ConnectorRole,
) -> Result<(), ValidationFailure> {
    match message {
        Message::Record { record } => {
            let current = ConnectorMessage::Record {
                record: record.clone(),
            };
            validator::validate(&current, catalog, origin)
        }
        Message::State { state } => {
            if state.data.is_null() {
                Err(RejectReason::StateShapeMismatch(StateType::Legacy).into())
            } else {
                Ok(())
            }
        }
        Message::Log { log } => validator::validate_log(log).map_err(Into::into),
        Message::Spec { spec } => validator::validate_spec(spec).map_err(Into::into),
        Message::Catalog { .. } | Message::ConnectionStatus { .. } => Ok(()),
    }
}

/// Carry a version-0 message to the current version. Record, log, spec,
/// catalog, and status payloads are already current; legacy state becomes
/// a `LEGACY`-typed state message with its blob in `data`.
pub(super) fn migrate(message: Message) -> Result<ConnectorMessage, MigrationError> {
    Ok(match message {
        Message::Record { record } => ConnectorMessage::Record { record },
        Message::State { state } => ConnectorMessage::State {
            state: StateMessage {
                state_type: StateType::Legacy,
                stream: None,
                global: None,
                data: Some(state.data),
                source_stats: None,
                destination_stats: None,
            },
        },
        Message::Log { log } => ConnectorMessage::Log { log },
        Message::Spec { spec } => ConnectorMessage::Spec { spec },
        Message::Catalog { catalog } => ConnectorMessage::Catalog { catalog },
        Message::ConnectionStatus { connection_status } => {
            ConnectorMessage::ConnectionStatus { connection_status }
        }
    })
}

//! Versioned message codec.
//!
//! A connector binary speaks whatever protocol version it shipped with,
//! which may lag the engine. The codec therefore holds exactly one active
//! (deserializer, migrator) pair at a time, selected by the major component
//! of the connector's declared version, and every decoded message is
//! migrated to the engine's current version before anything downstream
//! sees it. Re-initialization swaps the whole pair at once; there is never
//! a deserializer from one version paired with a migrator from another.

mod stream;
pub mod v0;

pub use stream::{CodecCounters, CodecMetrics, DecoderConfig, LineReader, MessageDecoder};

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::ConfiguredCatalog;
use crate::message::{ConnectorMessage, ConnectorRole};
use crate::validator::{self, ValidationFailure};
use crate::version::{ParseVersionError, ProtocolVersion, CURRENT_PROTOCOL_VERSION};

/// A message as deserialized under a specific protocol version, before
/// migration to the engine's current version.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionedMessage {
    V0(v0::Message),
    V1(ConnectorMessage),
}

/// Fatal codec conditions. Transient per-line conditions (malformed lines,
/// migration failures) never surface here; they are counted and logged.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connector stream read failed")]
    Io(#[from] io::Error),
    #[error("no codec registered for protocol version {0}")]
    UnsupportedVersion(ProtocolVersion),
    #[error("version detection exceeded its {budget}-byte lookahead budget before any SPEC message")]
    DetectionBudgetExceeded { budget: usize },
    #[error("SPEC message declares an unparsable protocol version")]
    InvalidSpecVersion(#[from] ParseVersionError),
    #[error(transparent)]
    CatalogMismatch(#[from] crate::validator::CatalogMismatch),
}

/// Turns one raw line into a version-specific message under an exact schema.
pub trait MessageDeserializer: Send + Sync {
    fn deserialize(&self, line: &str) -> Result<VersionedMessage, serde_json::Error>;
}

/// Validates a version-specific message and migrates it to the current
/// version. Validation failures are distinguished from migration failures
/// because the former can be hard (catalog mismatch) while the latter
/// never aborts the sync.
pub trait MessageMigrator: Send + Sync {
    fn validate(
        &self,
        message: &VersionedMessage,
        catalog: Option<&ConfiguredCatalog>,
        origin: ConnectorRole,
    ) -> Result<(), ValidationFailure>;

    fn migrate(&self, message: VersionedMessage) -> Result<ConnectorMessage, MigrationError>;
}

/// A single message could not be carried to the current version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot migrate message to the current protocol version: {0}")]
pub struct MigrationError(pub String);

/// The active (deserializer, migrator) pair for one protocol version.
#[derive(Clone)]
pub struct CodecPair {
    pub version: ProtocolVersion,
    pub deserializer: Arc<dyn MessageDeserializer>,
    pub migrator: Arc<dyn MessageMigrator>,
}

/// Codec pairs keyed by protocol major version.
pub struct CodecRegistry {
    factories: Vec<(u32, fn(ProtocolVersion) -> CodecPair)>,
}

impl CodecRegistry {
    /// Registry covering every protocol version this engine understands.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            factories: vec![(0, v0::codec_pair), (1, current_codec_pair)],
        }
    }

    /// Build the pair for `version`, keyed by its major component.
    pub fn pair_for(&self, version: ProtocolVersion) -> Result<CodecPair, CodecError> {
        self.factories
            .iter()
            .find(|(major, _)| *major == version.major)
            .map(|(_, factory)| factory(version))
            .ok_or(CodecError::UnsupportedVersion(version))
    }
}

fn current_codec_pair(version: ProtocolVersion) -> CodecPair {
    CodecPair {
        version,
        deserializer: Arc::new(CurrentDeserializer),
        migrator: Arc::new(CurrentMigrator),
    }
}

struct CurrentDeserializer;

impl MessageDeserializer for CurrentDeserializer {
    fn deserialize(&self, line: &str) -> Result<VersionedMessage, serde_json::Error> {
        serde_json::from_str::<ConnectorMessage>(line).map(VersionedMessage::V1)
    }
}

struct CurrentMigrator;

impl MessageMigrator for CurrentMigrator {
    fn validate(
        &self,
        message: &VersionedMessage,
        catalog: Option<&ConfiguredCatalog>,
        origin: ConnectorRole,
    ) -> Result<(), ValidationFailure> {
        match message {
            VersionedMessage::V1(msg) => validator::validate(msg, catalog, origin),
            VersionedMessage::V0(msg) => v0::validate(msg, catalog, origin),
        }
    }

    fn migrate(&self, message: VersionedMessage) -> Result<ConnectorMessage, MigrationError> {
        match message {
            // Already current. Re-migration is the identity.
            VersionedMessage::V1(msg) => Ok(msg),
            VersionedMessage::V0(msg) => v0::migrate(msg),
        }
    }
}

/// The codec's mutable core: one active pair, swapped whole.
pub struct VersionedCodec {
    registry: CodecRegistry,
    active: CodecPair,
}

impl VersionedCodec {
    /// Start at the engine's current version.
    #[must_use]
    pub fn new(registry: CodecRegistry) -> Self {
        let active = current_codec_pair(CURRENT_PROTOCOL_VERSION);
        Self { registry, active }
    }

    /// Swap the active pair for `version`'s. On an unsupported version the
    /// previous pair stays active untouched.
    pub fn initialize_for_version(&mut self, version: ProtocolVersion) -> Result<(), CodecError> {
        self.active = self.registry.pair_for(version)?;
        Ok(())
    }

    #[must_use]
    pub fn active_version(&self) -> ProtocolVersion {
        self.active.version
    }

    #[must_use]
    pub fn active(&self) -> &CodecPair {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_by_major() {
        let registry = CodecRegistry::standard();
        let pair = registry.pair_for(ProtocolVersion::new(0, 2, 0)).unwrap();
        assert_eq!(pair.version, ProtocolVersion::new(0, 2, 0));
        let pair = registry.pair_for(ProtocolVersion::new(1, 2, 0)).unwrap();
        assert_eq!(pair.version, ProtocolVersion::new(1, 2, 0));
    }

    #[test]
    fn test_registry_rejects_unknown_major() {
        let registry = CodecRegistry::standard();
        let result = registry.pair_for(ProtocolVersion::new(9, 0, 0));
        assert!(matches!(
            result,
            Err(CodecError::UnsupportedVersion(v)) if v.major == 9
        ));
    }

    #[test]
    fn test_failed_reinit_keeps_previous_pair() {
        let mut codec = VersionedCodec::new(CodecRegistry::standard());
        codec
            .initialize_for_version(ProtocolVersion::new(0, 2, 0))
            .unwrap();
        assert!(codec
            .initialize_for_version(ProtocolVersion::new(9, 0, 0))
            .is_err());
        assert_eq!(codec.active_version(), ProtocolVersion::new(0, 2, 0));
    }

    #[test]
    fn test_migrating_current_version_is_identity() {
        let line = r#"{"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1}}"#;
        let pair = current_codec_pair(CURRENT_PROTOCOL_VERSION);
        let versioned = pair.deserializer.deserialize(line).unwrap();
        let migrated = pair.migrator.migrate(versioned.clone()).unwrap();
        assert_eq!(VersionedMessage::V1(migrated), versioned);
    }
}

//! Connector protocol: message model, versioned codec, and validation.
//!
//! Connectors emit newline-delimited JSON on standard output. This crate
//! owns the typed message model at the engine's current protocol version
//! ([`message`]), the configured catalog the engine validates records
//! against ([`catalog`]), per-message validation ([`validator`]), and the
//! version-detecting, version-migrating line decoder ([`codec`]).

pub mod catalog;
pub mod codec;
pub mod message;
pub mod pk_extractor;
pub mod validator;
pub mod version;

pub use catalog::{ConfiguredCatalog, ConfiguredStream, StreamDescriptor};
pub use codec::{CodecError, DecoderConfig, MessageDecoder};
pub use message::{ConnectorMessage, ConnectorRole, MessageKind};
pub use version::{ProtocolVersion, CURRENT_PROTOCOL_VERSION, FALLBACK_PROTOCOL_VERSION};

//! Namespace and stream-name rewriting between source and destination.
//!
//! A connection decides where source streams land: mirroring the source
//! namespace, deferring to the destination default, or a custom format
//! with a `${SOURCE_NAMESPACE}` substitution token, optionally with a
//! stream-name prefix. Catalog and in-flight messages are rewritten on the
//! way to the destination; STATE messages alone can be reverted, because
//! only state checkpoints are later replayed against the source's view of
//! the catalog.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use syncwire_protocol::catalog::StreamDescriptor;
use syncwire_protocol::message::TraceType;
use syncwire_protocol::{ConfiguredCatalog, ConnectorMessage};

/// Substitution token in custom namespace formats.
pub const SOURCE_NAMESPACE_TOKEN: &str = "${SOURCE_NAMESPACE}";

/// Where mapped streams get their namespace from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NamespaceDefinition {
    /// Mirror the source namespace unchanged.
    Source,
    /// Drop the namespace; the destination applies its default.
    Destination,
    /// Render `format`, substituting [`SOURCE_NAMESPACE_TOKEN`].
    CustomFormat { format: String },
}

/// In-place descriptor rewriter with a revert table for STATE messages.
pub struct NamespaceMapper {
    definition: NamespaceDefinition,
    stream_prefix: Option<String>,
    /// (destination namespace, name) back to (source namespace, name).
    /// Populated only as STATE messages pass through.
    revert: HashMap<StreamDescriptor, StreamDescriptor>,
}

impl NamespaceMapper {
    #[must_use]
    pub fn new(definition: NamespaceDefinition, stream_prefix: Option<String>) -> Self {
        Self {
            definition,
            stream_prefix,
            revert: HashMap::new(),
        }
    }

    fn target_namespace(&self, source_namespace: Option<&str>) -> Option<String> {
        match &self.definition {
            NamespaceDefinition::Source => source_namespace.map(str::to_string),
            NamespaceDefinition::Destination => None,
            NamespaceDefinition::CustomFormat { format } => {
                // A blank source namespace maps to "no namespace" even
                // under a custom format; rendering the format around an
                // empty token would invent a namespace the source never had.
                let source = source_namespace.filter(|ns| !ns.trim().is_empty())?;
                let rendered = format.replace(SOURCE_NAMESPACE_TOKEN, source);
                if rendered.trim().is_empty() {
                    None
                } else {
                    Some(rendered)
                }
            }
        }
    }

    fn target_name(&self, name: &str) -> String {
        match &self.stream_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }

    fn map_descriptor(&self, descriptor: &StreamDescriptor) -> StreamDescriptor {
        StreamDescriptor {
            namespace: self.target_namespace(descriptor.namespace.as_deref()),
            name: self.target_name(&descriptor.name),
        }
    }

    /// Clone `catalog` with every stream's namespace and name rewritten.
    #[must_use]
    pub fn map_catalog(&self, catalog: &ConfiguredCatalog) -> ConfiguredCatalog {
        let mut mapped = catalog.clone();
        for configured in &mut mapped.streams {
            configured.stream.namespace =
                self.target_namespace(configured.stream.namespace.as_deref());
            configured.stream.name = self.target_name(&configured.stream.name);
        }
        mapped
    }

    /// Rewrite `message`'s descriptor fields in place. RECORD, stream-type
    /// STATE, and stream-status TRACE messages carry descriptors; for
    /// STATE the (mapped -> original) pair is remembered for
    /// [`Self::revert_map`]. Every other kind passes through untouched.
    pub fn map_message(&mut self, message: &mut ConnectorMessage) {
        match message {
            ConnectorMessage::Record { record } => {
                record.namespace = self.target_namespace(record.namespace.as_deref());
                record.stream = self.target_name(&record.stream);
            }
            ConnectorMessage::State { state } => {
                if let Some(stream) = &mut state.stream {
                    let original = stream.stream_descriptor.clone();
                    let mapped = self.map_descriptor(&original);
                    self.revert.insert(mapped.clone(), original);
                    stream.stream_descriptor = mapped;
                }
            }
            ConnectorMessage::Trace { trace } => {
                if trace.trace_type == TraceType::StreamStatus {
                    if let Some(status) = &mut trace.stream_status {
                        status.stream_descriptor =
                            self.map_descriptor(&status.stream_descriptor);
                    }
                }
            }
            ConnectorMessage::Log { .. }
            | ConnectorMessage::Control { .. }
            | ConnectorMessage::Spec { .. }
            | ConnectorMessage::Catalog { .. }
            | ConnectorMessage::DestinationCatalog { .. }
            | ConnectorMessage::ConnectionStatus { .. } => {}
        }
    }

    /// Restore a STATE message's original source-side descriptor. A
    /// descriptor with no revert entry passes through unmodified, which
    /// happens when the destination echoes state this mapper never saw.
    pub fn revert_map(&self, message: &mut ConnectorMessage) {
        if let ConnectorMessage::State { state } = message {
            if let Some(stream) = &mut state.stream {
                if let Some(original) = self.revert.get(&stream.stream_descriptor) {
                    stream.stream_descriptor = original.clone();
                }
            }
        }
    }
}

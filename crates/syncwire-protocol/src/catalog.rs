//! Configured catalog: the streams a sync replicates and how.
//!
//! A [`ConfiguredCatalog`] merges what the source discovered with what the
//! user selected: per stream, a sync mode, a destination write mode, primary
//! key and cursor paths, generation identifiers, and an ordered list of
//! field-level mapper configurations. Stream descriptors are unique within a
//! catalog; [`ConfiguredCatalog::validate`] enforces this.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::CatalogStream;

/// The unique key of a logical table/collection within a sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl StreamDescriptor {
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// How the source reads a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    FullRefresh,
    Incremental,
}

/// How the destination writes a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    Append,
    Overwrite,
    AppendDedup,
    OverwriteDedup,
}

impl DestinationSyncMode {
    /// Dedup modes upsert on primary key and therefore require one.
    #[must_use]
    pub fn requires_dedup(self) -> bool {
        match self {
            Self::AppendDedup | Self::OverwriteDedup => true,
            Self::Append | Self::Overwrite => false,
        }
    }
}

/// Field-level transformation kinds applied between source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldMapperKind {
    Hashing,
    FieldRenaming,
    FieldFiltering,
    RowFiltering,
    Encryption,
}

/// One configured field-level mapper. Order within a stream is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapperConfig {
    pub name: FieldMapperKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A discovered stream paired with its user-selected sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredStream {
    pub stream: CatalogStream,
    pub sync_mode: SyncMode,
    pub destination_sync_mode: DestinationSyncMode,
    /// Primary key as field-groups; each group is a path for nested lookup.
    #[serde(default)]
    pub primary_key: Vec<Vec<String>>,
    #[serde(default)]
    pub cursor_field: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_generation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<i64>,
    #[serde(default)]
    pub mappers: Vec<FieldMapperConfig>,
}

impl ConfiguredStream {
    /// Pair a discovered stream with sync modes; everything else defaults.
    #[must_use]
    pub fn new(
        stream: CatalogStream,
        sync_mode: SyncMode,
        destination_sync_mode: DestinationSyncMode,
    ) -> Self {
        Self {
            stream,
            sync_mode,
            destination_sync_mode,
            primary_key: Vec::new(),
            cursor_field: Vec::new(),
            generation_id: None,
            minimum_generation_id: None,
            sync_id: None,
            mappers: Vec::new(),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> StreamDescriptor {
        self.stream.descriptor()
    }

    /// True when records of this stream must carry a resolvable primary key.
    #[must_use]
    pub fn requires_primary_key(&self) -> bool {
        self.sync_mode == SyncMode::Incremental && self.destination_sync_mode.requires_dedup()
    }
}

/// Catalog structural errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("duplicate stream descriptor in configured catalog: {0}")]
    DuplicateStream(StreamDescriptor),
}

/// Ordered collection of configured streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Enforce descriptor uniqueness across the catalog.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        for stream in &self.streams {
            let descriptor = stream.descriptor();
            if !seen.insert(descriptor.clone()) {
                return Err(CatalogError::DuplicateStream(descriptor));
            }
        }
        Ok(())
    }

    /// Resolve the configured stream owning `(namespace, name)`.
    #[must_use]
    pub fn stream(&self, namespace: Option<&str>, name: &str) -> Option<&ConfiguredStream> {
        self.streams
            .iter()
            .find(|s| s.stream.namespace.as_deref() == namespace && s.stream.name == name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn configured_stream(
        namespace: Option<&str>,
        name: &str,
        sync_mode: SyncMode,
        destination_sync_mode: DestinationSyncMode,
        primary_key: Vec<Vec<String>>,
    ) -> ConfiguredStream {
        let mut configured = ConfiguredStream::new(
            CatalogStream::new(namespace, name, json!({"type": "object"})),
            sync_mode,
            destination_sync_mode,
        );
        configured.primary_key = primary_key;
        configured
    }

    #[test]
    fn test_descriptor_display() {
        assert_eq!(
            StreamDescriptor::new(Some("public"), "users").to_string(),
            "public.users"
        );
        assert_eq!(StreamDescriptor::new(None, "users").to_string(), "users");
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let stream = configured_stream(
            Some("public"),
            "users",
            SyncMode::FullRefresh,
            DestinationSyncMode::Append,
            Vec::new(),
        );
        let catalog = ConfiguredCatalog {
            streams: vec![stream.clone(), stream],
        };
        assert_eq!(
            catalog.validate(),
            Err(CatalogError::DuplicateStream(StreamDescriptor::new(
                Some("public"),
                "users"
            )))
        );
    }

    #[test]
    fn test_stream_lookup_distinguishes_namespace() {
        let catalog = ConfiguredCatalog {
            streams: vec![
                configured_stream(
                    Some("public"),
                    "users",
                    SyncMode::FullRefresh,
                    DestinationSyncMode::Append,
                    Vec::new(),
                ),
                configured_stream(
                    None,
                    "users",
                    SyncMode::Incremental,
                    DestinationSyncMode::AppendDedup,
                    vec![vec!["id".to_string()]],
                ),
            ],
        };
        assert!(catalog.validate().is_ok());
        assert_eq!(
            catalog.stream(Some("public"), "users").unwrap().sync_mode,
            SyncMode::FullRefresh
        );
        assert!(catalog.stream(None, "users").unwrap().requires_primary_key());
        assert!(catalog.stream(Some("other"), "users").is_none());
    }

    #[test]
    fn test_mapper_kind_wire_names() {
        let kind: FieldMapperKind = serde_json::from_value(json!("row-filtering")).unwrap();
        assert_eq!(kind, FieldMapperKind::RowFiltering);
        assert_eq!(
            serde_json::to_value(FieldMapperKind::FieldRenaming).unwrap(),
            json!("field-renaming")
        );
    }
}

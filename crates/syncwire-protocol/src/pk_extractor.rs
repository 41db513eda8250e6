//! Best-effort primary-key extraction from raw record lines.
//!
//! Oversized-line diagnostics want the offending record's primary key
//! without committing to full typed deserialization, which may itself be
//! what is failing. This module parses only far enough to pull the key
//! paths out of the record's `data` payload.

use std::collections::HashMap;

use serde_json::Value;

use crate::catalog::ConfiguredCatalog;

/// Resolve a nested field path inside a JSON object.
///
/// Returns `None` when any path component is absent or the value at the
/// leaf is JSON null. An empty path resolves to nothing.
#[must_use]
pub fn resolve_field_path<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = data;
    if path.is_empty() {
        return None;
    }
    for component in path {
        current = current.get(component)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Extract the primary-key values of a raw record line, keyed by the
/// dotted path string. Missing or null components are reported as the
/// string `"[MISSING]"` so the log line shows the full configured key.
///
/// Returns `None` when the line is not parseable JSON, has no resolvable
/// stream, or the stream is not in the catalog.
#[must_use]
pub fn extract_primary_key(line: &str, catalog: &ConfiguredCatalog) -> Option<HashMap<String, String>> {
    let value: Value = serde_json::from_str(line).ok()?;
    let record = value.get("record")?;
    let name = record.get("stream")?.as_str()?;
    let namespace = record.get("namespace").and_then(Value::as_str);
    let stream = catalog.stream(namespace, name)?;

    let data = record.get("data")?;
    let mut out = HashMap::with_capacity(stream.primary_key.len());
    for path in &stream.primary_key {
        let key = path.join(".");
        let rendered = match resolve_field_path(data, path) {
            Some(v) => v.to_string(),
            None => "[MISSING]".to_string(),
        };
        out.insert(key, rendered);
    }
    Some(out)
}

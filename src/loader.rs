//! Source document loading.
//!
//! Loads ARM OpenAPI documents from files, strings, and HTTP URLs, and builds
//! the schema graph from them. `$ref` pointers are resolved into arena edges
//! through a pointer cache, so recursive definitions become cycles in the
//! graph rather than infinite expansions.
//!
//! Note: dereferencing substitutes the `$ref` target wholesale, which drops
//! any sibling keys next to the `$ref` (`readOnly`, `x-ms-mutability`, ...).
//! The writability resolver consults the raw document to recover them.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;
use crate::schema::{Extensions, PrimitiveType, SchemaArena, SchemaId, SchemaNode};

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A loaded source document: the raw, undereferenced JSON plus the schema
/// arena built from it on demand.
#[derive(Debug)]
pub struct SpecDocument {
    raw: Value,
    arena: SchemaArena,
    ref_cache: HashMap<String, SchemaId>,
}

impl SpecDocument {
    pub fn from_value(raw: Value) -> Self {
        Self {
            raw,
            arena: SchemaArena::new(),
            ref_cache: HashMap::new(),
        }
    }

    /// The raw, undereferenced document.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn arena(&self) -> &SchemaArena {
        &self.arena
    }

    /// Split borrow: mutable arena alongside the raw document, for the
    /// writability backfill pass.
    pub fn parts_mut(&mut self) -> (&mut SchemaArena, &Value) {
        (&mut self.arena, &self.raw)
    }

    /// Build (or fetch from cache) the schema node for a `$ref`-style
    /// pointer such as `#/definitions/Account`.
    pub fn schema_at(&mut self, pointer: &str) -> Result<SchemaId, LoadError> {
        self.resolve_ref(pointer)
    }

    /// Build a schema node from an inline schema value (e.g. a parameter
    /// schema embedded in an operation). `origin` is used in diagnostics.
    pub fn schema_from_value(&mut self, value: &Value, origin: &str) -> Result<SchemaId, LoadError> {
        self.build_schema(value, origin)
    }

    fn resolve_ref(&mut self, reference: &str) -> Result<SchemaId, LoadError> {
        if !reference.starts_with('#') {
            return Err(LoadError::UnresolvedRef {
                reference: reference.to_string(),
                message: "external references are not supported; merge the document first"
                    .to_string(),
            });
        }

        let key = reference.to_string();
        if let Some(&id) = self.ref_cache.get(&key) {
            return Ok(id);
        }

        let target =
            navigate_fragment(&self.raw, reference).ok_or_else(|| LoadError::UnresolvedRef {
                reference: reference.to_string(),
                message: "fragment not found".to_string(),
            })?;

        // Pre-register the slot so a definition that reaches itself through
        // its own properties wires up as a cycle instead of recursing forever.
        let id = self.arena.alloc();
        self.ref_cache.insert(key, id);

        let mut node = self.node_from_value(&target, reference)?;
        node.definition = reference.rsplit('/').next().map(String::from);
        self.arena.replace(id, node);
        Ok(id)
    }

    fn build_schema(&mut self, value: &Value, origin: &str) -> Result<SchemaId, LoadError> {
        // A lone $ref substitutes its target entirely; siblings are dropped.
        if let Some(reference) = value.get("$ref").and_then(|v| v.as_str()) {
            let reference = reference.to_string();
            return self.resolve_ref(&reference);
        }

        let id = self.arena.alloc();
        let node = self.node_from_value(value, origin)?;
        self.arena.replace(id, node);
        Ok(id)
    }

    fn node_from_value(&mut self, value: &Value, origin: &str) -> Result<SchemaNode, LoadError> {
        let Some(map) = value.as_object() else {
            // Boolean or other degenerate schemas: treat as an opaque node.
            return Ok(SchemaNode {
                origin: origin.to_string(),
                ..SchemaNode::default()
            });
        };

        let mut node = SchemaNode {
            origin: origin.to_string(),
            ..SchemaNode::default()
        };

        match map.get("type") {
            Some(Value::String(s)) => {
                if let Some(ty) = PrimitiveType::parse(s) {
                    node.types.insert(ty);
                }
            }
            Some(Value::Array(arr)) => {
                for entry in arr {
                    if let Some(ty) = entry.as_str().and_then(PrimitiveType::parse) {
                        node.types.insert(ty);
                    }
                }
            }
            _ => {}
        }

        if let Some(props) = map.get("properties").and_then(|v| v.as_object()) {
            for (name, prop) in props {
                let child_origin = format!("{}/properties/{}", origin, name);
                let child = self.build_schema(prop, &child_origin)?;
                node.properties.insert(name.clone(), child);
            }
        }

        if let Some(required) = map.get("required").and_then(|v| v.as_array()) {
            for entry in required {
                if let Some(name) = entry.as_str() {
                    node.required.insert(name.to_string());
                }
            }
        }

        if let Some(branches) = map.get("allOf").and_then(|v| v.as_array()) {
            for (i, branch) in branches.iter().enumerate() {
                let branch_origin = format!("{}/allOf/{}", origin, i);
                node.all_of.push(self.build_schema(branch, &branch_origin)?);
            }
        }

        if let Some(items) = map.get("items") {
            node.items = Some(self.build_schema(items, &format!("{}/items", origin))?);
        }

        if let Some(additional) = map.get("additionalProperties") {
            // `additionalProperties: true/false` carries no value schema.
            if additional.is_object() {
                node.additional_properties = Some(
                    self.build_schema(additional, &format!("{}/additionalProperties", origin))?,
                );
            }
        }

        node.read_only = map.get("readOnly").and_then(|v| v.as_bool()).unwrap_or(false);
        node.write_only = map
            .get("writeOnly")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        node.format = map.get("format").and_then(|v| v.as_str()).map(String::from);
        node.pattern = map.get("pattern").and_then(|v| v.as_str()).map(String::from);
        node.description = map
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);

        if let Some(values) = map.get("enum").and_then(|v| v.as_array()) {
            node.enum_values = values.clone();
        }

        node.min_length = map.get("minLength").and_then(|v| v.as_u64());
        node.max_length = map.get("maxLength").and_then(|v| v.as_u64());
        node.minimum = map.get("minimum").and_then(|v| v.as_f64());
        node.maximum = map.get("maximum").and_then(|v| v.as_f64());
        node.exclusive_minimum = map
            .get("exclusiveMinimum")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        node.exclusive_maximum = map
            .get("exclusiveMaximum")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        node.multiple_of = map.get("multipleOf").and_then(|v| v.as_f64());
        node.min_items = map.get("minItems").and_then(|v| v.as_u64());
        node.max_items = map.get("maxItems").and_then(|v| v.as_u64());
        node.unique_items = map
            .get("uniqueItems")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        node.extensions = Extensions::parse(map);

        Ok(node)
    }
}

/// Load a document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_document(path: &Path) -> Result<SpecDocument, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), bytes = content.len(), "loaded document");
    load_document_str(&content)
}

/// Load a document from a JSON string.
pub fn load_document_str(content: &str) -> Result<SpecDocument, LoadError> {
    let raw: Value =
        serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })?;
    Ok(SpecDocument::from_value(raw))
}

/// Load a document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
pub fn load_document_url(url: &str) -> Result<SpecDocument, LoadError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let response = client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|source| LoadError::NetworkError {
            url: url.to_string(),
            source,
        })?;

    let raw: Value = response.json().map_err(|source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    })?;

    debug!(url, "fetched document");
    Ok(SpecDocument::from_value(raw))
}

/// Load a document from a file path or URL, auto-detected.
pub fn load_document_auto(source: &str) -> Result<SpecDocument, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_document_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_document(Path::new(source))
    }
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Navigate a JSON Pointer fragment (e.g. `#/definitions/Account`).
///
/// Returns `None` when the fragment does not resolve.
pub fn navigate_fragment(root: &Value, fragment: &str) -> Option<Value> {
    let path = fragment.trim_start_matches('#').trim_start_matches('/');
    if path.is_empty() {
        return Some(root.clone());
    }

    let mut current = root;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = part.replace("~1", "/").replace("~0", "~");
        current = current.get(&key)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_document_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"swagger": "2.0", "definitions": {{}}}}"#).unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.raw()["swagger"], "2.0");
    }

    #[test]
    fn load_document_file_not_found() {
        let result = load_document(Path::new("/nonexistent/spec.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_document_invalid_json() {
        let result = load_document_str("not valid json");
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/spec.json"));
        assert!(is_url("http://example.com/spec.json"));
        assert!(!is_url("/path/to/spec.json"));
        assert!(!is_url("spec.json"));
    }

    #[test]
    fn navigate_fragment_paths() {
        let doc = json!({
            "definitions": {
                "Account": { "type": "object" },
                "a/b": { "type": "string" }
            }
        });
        let target = navigate_fragment(&doc, "#/definitions/Account").unwrap();
        assert_eq!(target["type"], "object");

        // JSON Pointer escaping
        let target = navigate_fragment(&doc, "#/definitions/a~1b").unwrap();
        assert_eq!(target["type"], "string");

        assert!(navigate_fragment(&doc, "#/definitions/Missing").is_none());
    }

    #[test]
    fn ref_resolution_shares_nodes() {
        let raw = json!({
            "definitions": {
                "Sku": { "type": "object", "properties": { "name": { "type": "string" } } },
                "Account": {
                    "type": "object",
                    "properties": {
                        "primary": { "$ref": "#/definitions/Sku" },
                        "secondary": { "$ref": "#/definitions/Sku" }
                    }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let account = doc.schema_at("#/definitions/Account").unwrap();
        let node = doc.arena().get(account);
        let primary = node.properties["primary"];
        let secondary = node.properties["secondary"];
        // Same $ref target, same arena slot.
        assert_eq!(primary, secondary);
    }

    #[test]
    fn ref_resolution_handles_cycles() {
        let raw = json!({
            "definitions": {
                "ErrorDetail": {
                    "type": "object",
                    "properties": {
                        "message": { "type": "string" },
                        "details": {
                            "type": "array",
                            "items": { "$ref": "#/definitions/ErrorDetail" }
                        }
                    }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let id = doc.schema_at("#/definitions/ErrorDetail").unwrap();
        let node = doc.arena().get(id);
        let details = node.properties["details"];
        let items = doc.arena().get(details).items.unwrap();
        // The items edge points back to the definition itself.
        assert_eq!(items, id);
    }

    #[test]
    fn ref_siblings_are_dropped() {
        // Sibling readOnly next to $ref is lost during substitution; the
        // writability resolver recovers it from the raw document.
        let raw = json!({
            "definitions": {
                "Sku": { "type": "string" },
                "Account": {
                    "type": "object",
                    "properties": {
                        "sku": { "$ref": "#/definitions/Sku", "readOnly": true }
                    }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let account = doc.schema_at("#/definitions/Account").unwrap();
        let sku = doc.arena().get(account).properties["sku"];
        assert!(!doc.arena().get(sku).read_only);
    }

    #[test]
    fn external_refs_are_rejected() {
        let raw = json!({
            "definitions": {
                "Account": {
                    "properties": {
                        "sku": { "$ref": "common.json#/definitions/Sku" }
                    }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let result = doc.schema_at("#/definitions/Account");
        assert!(matches!(result, Err(LoadError::UnresolvedRef { .. })));
    }

    #[test]
    fn extension_bag_is_populated() {
        let raw = json!({
            "definitions": {
                "Props": {
                    "type": "object",
                    "properties": {
                        "adminPassword": { "type": "string", "x-ms-secret": true }
                    }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let id = doc.schema_at("#/definitions/Props").unwrap();
        let pw = doc.arena().get(id).properties["adminPassword"];
        assert!(doc.arena().get(pw).extensions.secret);
    }
}

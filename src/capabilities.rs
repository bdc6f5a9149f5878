//! Capability detection.
//!
//! Pure predicates over the resolved schema and raw document answering
//! whether a resource supports tags, location, managed identity, private
//! endpoints, diagnostics, and customer-managed keys. Predicates never fail:
//! absence of evidence (including a flattening failure during probing) reads
//! as "not supported", so optional wiring is under-generated rather than
//! over-generated.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::flatten::Flattener;
use crate::schema::{SchemaArena, SchemaId};

/// Schema-derived facts about a resource type, computed once per generation
/// run and consumed by both type lowering and the emitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_tags: bool,
    pub supports_location: bool,
    pub supports_managed_identity: bool,
    pub supports_private_endpoints: bool,
    pub supports_diagnostics: bool,
    pub supports_customer_managed_key: bool,
}

/// Detect capabilities for a request-body schema within its document.
pub fn detect(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    body: SchemaId,
    raw: &Value,
    resource_type: &str,
) -> Capabilities {
    let Ok(effective) = flattener.effective(body) else {
        return Capabilities::default();
    };

    let supports_tags = writable_top_level(arena, &effective.properties, "tags");
    let supports_location = writable_top_level(arena, &effective.properties, "location");

    let mut visited = HashSet::new();
    let supports_managed_identity =
        has_property_named(arena, flattener, body, "identity", &mut visited);

    let mut visited = HashSet::new();
    let supports_customer_managed_key =
        has_encryption_shape(arena, flattener, body, &mut visited);

    let supports_private_endpoints = private_link_evidence(raw, resource_type);

    Capabilities {
        supports_tags,
        supports_location,
        supports_managed_identity,
        supports_private_endpoints,
        // Diagnostics cannot be soundly inferred from a single resource's
        // schema; the flag exists so downstream emission has one decision
        // point to change later.
        supports_diagnostics: false,
        supports_customer_managed_key,
    }
}

fn writable_top_level(
    arena: &SchemaArena,
    properties: &std::collections::BTreeMap<String, SchemaId>,
    name: &str,
) -> bool {
    properties.get(name).is_some_and(|&id| {
        let node = arena.get(id);
        !node.read_only && node.extensions.mutability_writable().unwrap_or(true)
    })
}

/// Search the effective schema graph for a property with the given name.
fn has_property_named(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    name: &str,
    visited: &mut HashSet<SchemaId>,
) -> bool {
    if !visited.insert(id) {
        return false;
    }

    let Ok(effective) = flattener.effective(id) else {
        return false;
    };
    if effective
        .properties
        .keys()
        .any(|k| k.eq_ignore_ascii_case(name))
    {
        return true;
    }
    for &child in effective.properties.values() {
        if has_property_named(arena, flattener, child, name, visited) {
            return true;
        }
    }

    let node = arena.get(id);
    if let Some(items) = node.items {
        if has_property_named(arena, flattener, items, name, visited) {
            return true;
        }
    }
    if let Some(additional) = node.additional_properties {
        if has_property_named(arena, flattener, additional, name, visited) {
            return true;
        }
    }
    false
}

/// Recursive probe for an encryption / customer-managed-key shaped property.
fn has_encryption_shape(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    visited: &mut HashSet<SchemaId>,
) -> bool {
    if !visited.insert(id) {
        return false;
    }

    let Ok(effective) = flattener.effective(id) else {
        return false;
    };
    for (name, &child) in &effective.properties {
        let folded: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if folded.contains("encryption") || folded == "customermanagedkey" {
            return true;
        }
        if has_encryption_shape(arena, flattener, child, visited) {
            return true;
        }
    }

    let node = arena.get(id);
    if let Some(items) = node.items {
        if has_encryption_shape(arena, flattener, items, visited) {
            return true;
        }
    }
    if let Some(additional) = node.additional_properties {
        if has_encryption_shape(arena, flattener, additional, visited) {
            return true;
        }
    }
    false
}

/// Private-link evidence: a sibling path for private endpoint connections or
/// private link resources scoped to this resource type, or a matching
/// definition name.
fn private_link_evidence(raw: &Value, resource_type: &str) -> bool {
    let segment = resource_type
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    if let Some(paths) = raw.get("paths").and_then(|v| v.as_object()) {
        for path in paths.keys() {
            let lower = path.to_lowercase();
            let marker = lower.contains("privateendpointconnections")
                || lower.contains("privatelinkresources");
            if marker && (segment.is_empty() || lower.contains(&segment)) {
                return true;
            }
        }
    }

    if let Some(definitions) = raw.get("definitions").and_then(|v| v.as_object()) {
        for name in definitions.keys() {
            let lower = name.to_lowercase();
            if lower.contains("privateendpointconnection") || lower.contains("privatelinkresource")
            {
                return true;
            }
        }
    }

    false
}

//! Writability resolution from the raw, undereferenced document.
//!
//! ARM documents routinely attach `readOnly` or `x-ms-mutability` as siblings
//! of a property's `$ref`. Dereferencing substitutes the target and silently
//! drops those siblings, making read-only fields look writable. This module
//! re-reads the raw JSON to recover a definitive verdict where one exists,
//! and applies it copy-on-write so shared nodes are never mutated in place.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::schema::{SchemaArena, SchemaId};

/// Verdict for a single container/property pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writability {
    Writable,
    ReadOnly,
    /// No raw sibling metadata exists; callers fall back to the
    /// dereferenced schema's own read-only flag.
    Unknown,
}

/// Looks up raw sibling metadata for named container schemas.
pub struct WritabilityResolver<'a> {
    raw: &'a Value,
}

impl<'a> WritabilityResolver<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self { raw }
    }

    /// Inspect the raw JSON object for `definitions.<container>.properties.
    /// <property>` and return a verdict when a marker exists.
    ///
    /// A `readOnly` flag decides directly. An `x-ms-mutability` list marks
    /// the property writable only when it contains `create` or `update`;
    /// any other non-empty list (e.g. read-only-after-create) is
    /// non-writable. Anything unreadable degrades to `Unknown`.
    pub fn is_writable(&self, container: &str, property: &str) -> Writability {
        let Some(prop) = self
            .raw
            .get("definitions")
            .and_then(|defs| defs.get(container))
            .and_then(|def| def.get("properties"))
            .and_then(|props| props.get(property))
            .and_then(|p| p.as_object())
        else {
            return Writability::Unknown;
        };

        if let Some(read_only) = prop.get("readOnly").and_then(|v| v.as_bool()) {
            return if read_only {
                Writability::ReadOnly
            } else {
                Writability::Writable
            };
        }

        if let Some(phases) = prop.get("x-ms-mutability").and_then(|v| v.as_array()) {
            let writable = phases
                .iter()
                .filter_map(|v| v.as_str())
                .any(|p| p.eq_ignore_ascii_case("create") || p.eq_ignore_ascii_case("update"));
            return if writable {
                Writability::Writable
            } else {
                Writability::ReadOnly
            };
        }

        Writability::Unknown
    }
}

/// Backfill writability overrides across the graph reachable from `root`.
///
/// Returns the (possibly new) root id. Every node whose read-only flag had
/// to change is cloned first; parents along the changed path are cloned too,
/// so other referrers of the original nodes see no difference.
pub fn apply_overrides(arena: &mut SchemaArena, raw: &Value, root: SchemaId) -> SchemaId {
    let resolver = WritabilityResolver::new(raw);
    let mut memo: HashMap<SchemaId, Option<SchemaId>> = HashMap::new();
    rewrite(arena, &resolver, root, &mut memo)
}

fn rewrite(
    arena: &mut SchemaArena,
    resolver: &WritabilityResolver,
    id: SchemaId,
    memo: &mut HashMap<SchemaId, Option<SchemaId>>,
) -> SchemaId {
    match memo.get(&id) {
        Some(Some(new_id)) => return *new_id,
        // Back edge of a cycle: keep pointing at the original node.
        Some(None) => return id,
        None => {}
    }
    memo.insert(id, None);

    let container = arena.get(id).definition.clone();
    let properties: Vec<(String, SchemaId)> = arena
        .get(id)
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    let mut changed = false;
    let mut new_properties = Vec::with_capacity(properties.len());

    for (name, child) in properties {
        let mut new_child = rewrite(arena, resolver, child, memo);

        if let Some(def) = &container {
            let verdict = resolver.is_writable(def, &name);
            let current = arena.get(new_child).read_only;
            let target = match verdict {
                Writability::ReadOnly => Some(true),
                Writability::Writable => Some(false),
                Writability::Unknown => None,
            };
            if let Some(read_only) = target {
                if read_only != current {
                    debug!(container = def, property = name, read_only, "writability override");
                    let cloned = arena.clone_node(new_child);
                    arena.get_mut(cloned).read_only = read_only;
                    new_child = cloned;
                }
            }
        }

        if new_child != child {
            changed = true;
        }
        new_properties.push((name, new_child));
    }

    let items = arena.get(id).items;
    let new_items = items.map(|i| rewrite(arena, resolver, i, memo));
    if new_items != items {
        changed = true;
    }

    let additional = arena.get(id).additional_properties;
    let new_additional = additional.map(|a| rewrite(arena, resolver, a, memo));
    if new_additional != additional {
        changed = true;
    }

    let all_of = arena.get(id).all_of.clone();
    let new_all_of: Vec<SchemaId> = all_of
        .iter()
        .map(|&b| rewrite(arena, resolver, b, memo))
        .collect();
    if new_all_of != all_of {
        changed = true;
    }

    let new_id = if changed {
        let cloned = arena.clone_node(id);
        let node = arena.get_mut(cloned);
        node.properties = new_properties.into_iter().collect();
        node.items = new_items;
        node.additional_properties = new_additional;
        node.all_of = new_all_of;
        cloned
    } else {
        id
    };

    memo.insert(id, Some(new_id));
    new_id
}

//! Schema flattening engine.
//!
//! Computes the effective (properties, required) view of a schema node with
//! `allOf` composition resolved. Traversal is three-state (unvisited /
//! in-progress / resolved) and memoized by node identity: revisiting an
//! in-progress node through a composition edge is a cycle, while revisiting
//! it through a property or items edge is benign sharing and resolves quietly.
//!
//! The merge here is a conflict-checked union: two branches may contribute
//! the same property only when their schemas are structurally equivalent.
//! This is deliberately a separate algorithm from the scalar constraint
//! consolidation in `lower`, which intersects bounds instead.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::FlattenError;
use crate::schema::{SchemaArena, SchemaId};

use std::collections::BTreeMap;

/// Flattened view of a schema node: composition resolved, properties and
/// requirements merged.
#[derive(Debug, Clone, Default)]
pub struct EffectiveSchema {
    pub properties: BTreeMap<String, SchemaId>,
    pub required: BTreeSet<String>,
    /// True when the node or any composition branch is read-only.
    pub read_only: bool,
    /// True when the node or any composition branch is write-only.
    pub write_only: bool,
}

enum Visit {
    InProgress,
    Done(EffectiveSchema),
}

/// Memoizing flattener. Caches are scoped to one instance; give each
/// generation run its own.
pub struct Flattener<'a> {
    arena: &'a SchemaArena,
    cache: HashMap<SchemaId, Visit>,
}

impl<'a> Flattener<'a> {
    pub fn new(arena: &'a SchemaArena) -> Self {
        Self {
            arena,
            cache: HashMap::new(),
        }
    }

    /// Compute the effective schema for `id`.
    ///
    /// # Errors
    ///
    /// `CycleDetected` when `allOf` composition is cyclic;
    /// `ConflictingPropertyDefinition` when two branches declare
    /// structurally different schemas for the same property.
    pub fn effective(&mut self, id: SchemaId) -> Result<EffectiveSchema, FlattenError> {
        match self.visit(id, true)? {
            Some(effective) => Ok(effective),
            // Only reachable when the public entry races its own cache,
            // which a fresh in-progress marker prevents.
            None => Err(FlattenError::CycleDetected {
                origin: self.arena.get(id).origin.clone(),
            }),
        }
    }

    /// Three-state traversal step. `via_composition` is true when this node
    /// was reached through an `allOf` edge; only those revisits are cycles.
    fn visit(
        &mut self,
        id: SchemaId,
        via_composition: bool,
    ) -> Result<Option<EffectiveSchema>, FlattenError> {
        match self.cache.get(&id) {
            Some(Visit::Done(effective)) => return Ok(Some(effective.clone())),
            Some(Visit::InProgress) => {
                if via_composition {
                    return Err(FlattenError::CycleDetected {
                        origin: self.arena.get(id).origin.clone(),
                    });
                }
                // Benign re-entrant sharing: the node resolves at its own
                // level; nothing to contribute here.
                return Ok(None);
            }
            None => {}
        }

        self.cache.insert(id, Visit::InProgress);
        let result = self.compute(id);
        match result {
            Ok(effective) => {
                self.cache.insert(id, Visit::Done(effective.clone()));
                Ok(Some(effective))
            }
            Err(e) => {
                self.cache.remove(&id);
                Err(e)
            }
        }
    }

    fn compute(&mut self, id: SchemaId) -> Result<EffectiveSchema, FlattenError> {
        let node = self.arena.get(id);

        let mut effective = EffectiveSchema {
            properties: node.properties.clone(),
            required: node.required.clone(),
            read_only: node.read_only,
            write_only: node.write_only,
        };

        // Normalize children so nested composition is flattened too. Their
        // results land in the cache; the children themselves are unchanged.
        for &child in node.properties.values() {
            self.visit(child, false)?;
        }
        if let Some(items) = node.items {
            self.visit(items, false)?;
        }
        if let Some(additional) = node.additional_properties {
            self.visit(additional, false)?;
        }

        // Merge composition branches left to right.
        let branches = node.all_of.clone();
        for branch in branches {
            let Some(branch_effective) = self.visit(branch, true)? else {
                continue;
            };
            self.merge_branch(id, branch, &mut effective, &branch_effective)?;
        }

        Ok(effective)
    }

    /// Conflict-checked union of a branch into the accumulated view.
    fn merge_branch(
        &mut self,
        _node: SchemaId,
        _branch: SchemaId,
        into: &mut EffectiveSchema,
        branch: &EffectiveSchema,
    ) -> Result<(), FlattenError> {
        for (name, &contributed) in &branch.properties {
            match into.properties.get(name) {
                Some(&existing) if existing == contributed => {}
                Some(&existing) => {
                    if !structurally_equivalent(self.arena, existing, contributed) {
                        let first = self.arena.get(existing);
                        let second = self.arena.get(contributed);
                        return Err(FlattenError::ConflictingPropertyDefinition {
                            property: name.clone(),
                            first_origin: first.origin.clone(),
                            first_shape: first.shape_summary(),
                            second_origin: second.origin.clone(),
                            second_shape: second.shape_summary(),
                        });
                    }
                    // Equivalent contribution; keep the first one.
                }
                None => {
                    into.properties.insert(name.clone(), contributed);
                }
            }
        }

        // Required sets are unioned, not intersected.
        into.required
            .extend(branch.required.iter().cloned());
        into.read_only |= branch.read_only;
        into.write_only |= branch.write_only;
        Ok(())
    }
}

/// Structural equivalence of two schema nodes.
///
/// Compares type sets, read-only/write-only flags, format, enum sets, and
/// numeric/length/array bounds; objects and arrays compare recursively.
/// Descriptions are documentation, not shape, and are ignored.
pub fn structurally_equivalent(arena: &SchemaArena, a: SchemaId, b: SchemaId) -> bool {
    equivalent_inner(arena, a, b, &mut HashSet::new())
}

fn equivalent_inner(
    arena: &SchemaArena,
    a: SchemaId,
    b: SchemaId,
    visited: &mut HashSet<(SchemaId, SchemaId)>,
) -> bool {
    if a == b {
        return true;
    }
    // Re-entering the same pair means the difference, if any, was already
    // found elsewhere on the cycle.
    if !visited.insert((a, b)) {
        return true;
    }

    let na = arena.get(a);
    let nb = arena.get(b);

    if na.types != nb.types
        || na.read_only != nb.read_only
        || na.write_only != nb.write_only
        || na.format != nb.format
        || na.min_length != nb.min_length
        || na.max_length != nb.max_length
        || na.minimum != nb.minimum
        || na.maximum != nb.maximum
        || na.exclusive_minimum != nb.exclusive_minimum
        || na.exclusive_maximum != nb.exclusive_maximum
        || na.multiple_of != nb.multiple_of
        || na.min_items != nb.min_items
        || na.max_items != nb.max_items
        || na.unique_items != nb.unique_items
    {
        return false;
    }

    let enums_a: BTreeSet<String> = na.enum_list().iter().map(|v| v.to_string()).collect();
    let enums_b: BTreeSet<String> = nb.enum_list().iter().map(|v| v.to_string()).collect();
    if enums_a != enums_b {
        return false;
    }

    match (na.items, nb.items) {
        (None, None) => {}
        (Some(ia), Some(ib)) => {
            if !equivalent_inner(arena, ia, ib, visited) {
                return false;
            }
        }
        _ => return false,
    }

    match (na.additional_properties, nb.additional_properties) {
        (None, None) => {}
        (Some(aa), Some(ab)) => {
            if !equivalent_inner(arena, aa, ab, visited) {
                return false;
            }
        }
        _ => return false,
    }

    if na.properties.len() != nb.properties.len() {
        return false;
    }
    for (name, &child_a) in &na.properties {
        match nb.properties.get(name) {
            Some(&child_b) if equivalent_inner(arena, child_a, child_b, visited) => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PrimitiveType, SchemaNode};
    use serde_json::json;

    fn leaf(arena: &mut SchemaArena, ty: PrimitiveType, origin: &str) -> SchemaId {
        let id = arena.alloc();
        let mut node = SchemaNode {
            origin: origin.to_string(),
            ..SchemaNode::default()
        };
        node.types.insert(ty);
        arena.replace(id, node);
        id
    }

    fn object(
        arena: &mut SchemaArena,
        props: Vec<(&str, SchemaId)>,
        required: Vec<&str>,
        all_of: Vec<SchemaId>,
        origin: &str,
    ) -> SchemaId {
        let id = arena.alloc();
        let mut node = SchemaNode {
            origin: origin.to_string(),
            ..SchemaNode::default()
        };
        node.types.insert(PrimitiveType::Object);
        for (name, child) in props {
            node.properties.insert(name.to_string(), child);
        }
        for name in required {
            node.required.insert(name.to_string());
        }
        node.all_of = all_of;
        arena.replace(id, node);
        id
    }

    #[test]
    fn no_composition_yields_own_properties() {
        let mut arena = SchemaArena::new();
        let name = leaf(&mut arena, PrimitiveType::String, "#/name");
        let root = object(&mut arena, vec![("name", name)], vec!["name"], vec![], "#");

        let effective = Flattener::new(&arena).effective(root).unwrap();
        assert_eq!(effective.properties.len(), 1);
        assert!(effective.required.contains("name"));
    }

    #[test]
    fn composition_unions_properties_and_required() {
        let mut arena = SchemaArena::new();
        let f1 = leaf(&mut arena, PrimitiveType::String, "#/f1");
        let f2 = leaf(&mut arena, PrimitiveType::String, "#/f2");
        let f3 = leaf(&mut arena, PrimitiveType::String, "#/f3");
        let a = object(&mut arena, vec![("field1", f1)], vec!["field1"], vec![], "#/A");
        let b = object(
            &mut arena,
            vec![("field2", f2), ("field3", f3)],
            vec!["field2", "field3"],
            vec![],
            "#/B",
        );
        let root = object(&mut arena, vec![], vec![], vec![a, b], "#");

        let effective = Flattener::new(&arena).effective(root).unwrap();
        assert_eq!(effective.properties.len(), 3);
        let required: Vec<&str> = effective.required.iter().map(String::as_str).collect();
        assert_eq!(required, vec!["field1", "field2", "field3"]);
    }

    #[test]
    fn conflicting_types_rejected_with_origins() {
        let mut arena = SchemaArena::new();
        let int_count = leaf(&mut arena, PrimitiveType::Integer, "#/A/count");
        let str_count = leaf(&mut arena, PrimitiveType::String, "#/B/count");
        let a = object(&mut arena, vec![("count", int_count)], vec![], vec![], "#/A");
        let b = object(&mut arena, vec![("count", str_count)], vec![], vec![], "#/B");
        let root = object(&mut arena, vec![], vec![], vec![a, b], "#");

        let err = Flattener::new(&arena).effective(root).unwrap_err();
        match err {
            FlattenError::ConflictingPropertyDefinition {
                property,
                first_origin,
                second_origin,
                ..
            } => {
                assert_eq!(property, "count");
                assert_eq!(first_origin, "#/A/count");
                assert_eq!(second_origin, "#/B/count");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn description_differences_are_not_conflicts() {
        let mut arena = SchemaArena::new();
        let c1 = leaf(&mut arena, PrimitiveType::String, "#/A/tier");
        let c2 = leaf(&mut arena, PrimitiveType::String, "#/B/tier");
        arena.get_mut(c1).description = Some("first wording".into());
        arena.get_mut(c2).description = Some("second wording".into());
        let a = object(&mut arena, vec![("tier", c1)], vec![], vec![], "#/A");
        let b = object(&mut arena, vec![("tier", c2)], vec![], vec![], "#/B");
        let root = object(&mut arena, vec![], vec![], vec![a, b], "#");

        let effective = Flattener::new(&arena).effective(root).unwrap();
        // First contribution wins.
        assert_eq!(effective.properties["tier"], c1);
    }

    #[test]
    fn benign_shared_subobject_is_not_a_cycle() {
        let mut arena = SchemaArena::new();
        let inner = leaf(&mut arena, PrimitiveType::String, "#/Sku/name");
        let sku = object(&mut arena, vec![("name", inner)], vec![], vec![], "#/Sku");
        let root = object(
            &mut arena,
            vec![("primary", sku), ("secondary", sku)],
            vec![],
            vec![],
            "#",
        );

        let effective = Flattener::new(&arena).effective(root).unwrap();
        assert_eq!(effective.properties.len(), 2);
    }

    #[test]
    fn self_referential_items_resolve() {
        let mut arena = SchemaArena::new();
        let message = leaf(&mut arena, PrimitiveType::String, "#/Err/message");
        let err_obj = object(&mut arena, vec![("message", message)], vec![], vec![], "#/Err");
        let details = arena.alloc();
        let mut details_node = SchemaNode {
            origin: "#/Err/details".to_string(),
            ..SchemaNode::default()
        };
        details_node.types.insert(PrimitiveType::Array);
        details_node.items = Some(err_obj);
        arena.replace(details, details_node);
        arena
            .get_mut(err_obj)
            .properties
            .insert("details".to_string(), details);

        let effective = Flattener::new(&arena).effective(err_obj).unwrap();
        assert_eq!(effective.properties.len(), 2);
        assert!(effective.properties.contains_key("message"));
        assert!(effective.properties.contains_key("details"));
    }

    #[test]
    fn composition_cycle_is_detected() {
        let mut arena = SchemaArena::new();
        let a = arena.alloc();
        let b = arena.alloc();
        let mut node_a = SchemaNode {
            origin: "#/A".to_string(),
            ..SchemaNode::default()
        };
        node_a.all_of.push(b);
        arena.replace(a, node_a);
        let mut node_b = SchemaNode {
            origin: "#/B".to_string(),
            ..SchemaNode::default()
        };
        node_b.all_of.push(a);
        arena.replace(b, node_b);

        let err = Flattener::new(&arena).effective(a).unwrap_err();
        assert!(matches!(err, FlattenError::CycleDetected { .. }));
    }

    #[test]
    fn nested_composition_is_normalized() {
        // root -> allOf [mid], mid -> allOf [base]; base's property surfaces.
        let mut arena = SchemaArena::new();
        let field = leaf(&mut arena, PrimitiveType::Boolean, "#/base/flag");
        let base = object(&mut arena, vec![("flag", field)], vec![], vec![], "#/base");
        let mid = object(&mut arena, vec![], vec![], vec![base], "#/mid");
        let root = object(&mut arena, vec![], vec![], vec![mid], "#");

        let effective = Flattener::new(&arena).effective(root).unwrap();
        assert!(effective.properties.contains_key("flag"));
    }

    #[test]
    fn equivalence_ignores_enum_ordering() {
        let mut arena = SchemaArena::new();
        let e1 = leaf(&mut arena, PrimitiveType::String, "#/A/tier");
        let e2 = leaf(&mut arena, PrimitiveType::String, "#/B/tier");
        arena.get_mut(e1).enum_values = vec![json!("Free"), json!("Basic")];
        arena.get_mut(e2).enum_values = vec![json!("Basic"), json!("Free")];
        assert!(structurally_equivalent(&arena, e1, e2));

        arena.get_mut(e2).enum_values.push(json!("Premium"));
        assert!(!structurally_equivalent(&arena, e1, e2));
    }

    #[test]
    fn flattening_is_idempotent() {
        let mut arena = SchemaArena::new();
        let f1 = leaf(&mut arena, PrimitiveType::String, "#/f1");
        let a = object(&mut arena, vec![("field1", f1)], vec!["field1"], vec![], "#/A");
        let root = object(&mut arena, vec![], vec![], vec![a], "#");

        let first = Flattener::new(&arena).effective(root).unwrap();
        let second = Flattener::new(&arena).effective(root).unwrap();
        assert_eq!(first.properties, second.properties);
        assert_eq!(first.required, second.required);
    }
}

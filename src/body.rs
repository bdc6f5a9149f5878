//! Request-body expression building.
//!
//! Builds the nested HCL literal that assembles the create/update payload
//! from the flat input variables, honoring properties-bag flattening, secret
//! and identity exclusions, and null guards on non-root composite nodes.
//! Also derives the `sensitive_body` mapping for secret fields and the
//! read-only response-export path list.

use std::collections::HashSet;

use crate::capabilities::Capabilities;
use crate::emit::hcl_key;
use crate::error::GenerateError;
use crate::flatten::Flattener;
use crate::lower::{consolidate, is_secret, node_writable, safe_name};
use crate::schema::{PrimitiveType, SchemaArena, SchemaId};

/// Name suffixes that mark server-managed timestamps, excluded from exports.
const TIMESTAMP_SUFFIXES: &[&str] = &[
    "timestamp",
    "createdat",
    "lastmodified",
    "modifiedat",
    "createdon",
    "modifiedon",
];

/// Path segments whose subtree never exports (matched as sub-segments too).
const BLOCKED_SEGMENTS: &[&str] = &["status", "provisioningerror"];

/// Build the root request-body literal.
///
/// Every writable effective top-level property becomes a field, except the
/// identity property when identity scaffolding is generated, secret
/// properties (delivered through `sensitive_body`), and non-writable
/// properties. A concrete top-level `properties` bag is flattened: its
/// children read from top-level variables but are reconstructed nested.
pub fn build_body(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    body: SchemaId,
    caps: &Capabilities,
) -> Result<String, GenerateError> {
    let effective = flattener.effective(body)?;

    let mut lines: Vec<(String, String)> = Vec::new();
    for (name, &child) in &effective.properties {
        if caps.supports_managed_identity && name.eq_ignore_ascii_case("identity") {
            continue;
        }
        if !node_writable(arena, child) {
            continue;
        }
        if is_secret(name, arena.get(child)) {
            continue;
        }

        if name == "properties" && is_concrete_object(arena, flattener, child) {
            let nested = flatten_properties_bag(arena, flattener, child, caps)?;
            lines.push((name.clone(), nested));
            continue;
        }

        let var_ref = format!("var.{}", safe_name(name));
        let mut stack = HashSet::new();
        let value = lower_value(arena, flattener, child, &var_ref, false, 2, &mut stack)?;
        lines.push((name.clone(), value));
    }

    Ok(render_object(&lines, 1))
}

/// True when the node resolves to an object with declared properties.
pub fn is_concrete_object(arena: &SchemaArena, flattener: &mut Flattener, id: SchemaId) -> bool {
    if !arena.get(id).is_object() {
        return false;
    }
    flattener
        .effective(id)
        .map(|e| !e.properties.is_empty())
        .unwrap_or(false)
}

/// Reconstruct the `properties` bag from flattened top-level variables. The
/// identity property is excluded here too: detection may find it inside the
/// bag, and the dedicated scaffolding covers it wherever it lives.
fn flatten_properties_bag(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    bag: SchemaId,
    caps: &Capabilities,
) -> Result<String, GenerateError> {
    let effective = flattener.effective(bag)?;
    let mut lines: Vec<(String, String)> = Vec::new();
    for (name, &child) in &effective.properties {
        if caps.supports_managed_identity && name.eq_ignore_ascii_case("identity") {
            continue;
        }
        if !node_writable(arena, child) {
            continue;
        }
        if is_secret(name, arena.get(child)) {
            continue;
        }
        let var_ref = format!("var.{}", safe_name(name));
        let mut stack = HashSet::new();
        let value = lower_value(arena, flattener, child, &var_ref, false, 3, &mut stack)?;
        lines.push((name.clone(), value));
    }
    Ok(render_object(&lines, 2))
}

/// Recursive value construction for one schema node.
///
/// `source` is the HCL expression referencing the input value; `guarded`
/// composite nodes collapse to `null` when the source is absent. The root
/// object and scalars pass through without a guard.
fn lower_value(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    source: &str,
    at_root: bool,
    indent: usize,
    stack: &mut HashSet<SchemaId>,
) -> Result<String, GenerateError> {
    // A node reached through its own construction is passed through opaquely;
    // the payload shape at that depth mirrors the input.
    if !stack.insert(id) {
        return Ok(source.to_string());
    }
    let result = lower_value_shape(arena, flattener, id, source, at_root, indent, stack);
    stack.remove(&id);
    result
}

fn lower_value_shape(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    source: &str,
    at_root: bool,
    indent: usize,
    stack: &mut HashSet<SchemaId>,
) -> Result<String, GenerateError> {
    let node = arena.get(id);

    if node.is_array() {
        let inner = match node.items {
            Some(items) => {
                let item_var = format!("v{}", indent);
                lower_value(arena, flattener, items, &item_var, false, indent + 1, stack)?
            }
            None => format!("v{}", indent),
        };
        let expr = format!("[for v{} in {} : {}]", indent, source, inner);
        return Ok(null_guard(source, &expr, at_root));
    }

    if node.is_object() {
        let effective = flattener.effective(id)?;
        if !effective.properties.is_empty() {
            let mut lines: Vec<(String, String)> = Vec::new();
            for (name, &child) in &effective.properties {
                if !node_writable(arena, child) {
                    continue;
                }
                if is_secret(name, arena.get(child)) {
                    continue;
                }
                let child_source = format!("{}.{}", source, safe_name(name));
                let value =
                    lower_value(arena, flattener, child, &child_source, false, indent + 1, stack)?;
                lines.push((name.clone(), value));
            }
            let expr = render_object(&lines, indent);
            return Ok(null_guard(source, &expr, at_root));
        }

        if let Some(additional) = node.additional_properties {
            let value_var = format!("v{}", indent);
            let inner =
                lower_value(arena, flattener, additional, &value_var, false, indent + 1, stack)?;
            let expr = format!("{{ for k{0}, v{0} in {1} : k{0} => {2} }}", indent, source, inner);
            return Ok(null_guard(source, &expr, at_root));
        }

        // No declared properties and no value schema: opaque passthrough.
        return Ok(source.to_string());
    }

    // Scalars pass through unchanged.
    Ok(source.to_string())
}

fn null_guard(source: &str, expr: &str, at_root: bool) -> String {
    if at_root {
        expr.to_string()
    } else {
        format!("{} == null ? null : {}", source, expr)
    }
}

fn render_object(lines: &[(String, String)], indent: usize) -> String {
    if lines.is_empty() {
        return "{}".to_string();
    }
    let pad = "  ".repeat(indent + 1);
    let close = "  ".repeat(indent);
    let width = lines.iter().map(|(k, _)| hcl_key(k).len()).max().unwrap_or(0);
    let mut out = String::from("{\n");
    for (key, value) in lines {
        out.push_str(&format!(
            "{}{:<width$} = {}\n",
            pad,
            hcl_key(key),
            value,
            width = width
        ));
    }
    out.push_str(&format!("{}}}", close));
    out
}

/// A secret field surfaced through the sensitive channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretField {
    /// Dotted source path within the request body (e.g.
    /// `properties.adminPassword`).
    pub path: String,
    /// Original property name.
    pub original: String,
    /// Target-safe variable name.
    pub variable: String,
}

/// Collect secret fields at the root and inside a flattened properties bag.
/// Each gets a dedicated ephemeral variable and a `sensitive_body` entry
/// keyed by its source path.
pub fn secret_fields(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    body: SchemaId,
) -> Result<Vec<SecretField>, GenerateError> {
    let effective = flattener.effective(body)?;
    let mut secrets = Vec::new();

    for (name, &child) in &effective.properties {
        if !node_writable(arena, child) {
            continue;
        }
        if is_secret(name, arena.get(child)) {
            secrets.push(SecretField {
                path: name.clone(),
                original: name.clone(),
                variable: safe_name(name),
            });
            continue;
        }
        if name == "properties" && is_concrete_object(arena, flattener, child) {
            let bag = flattener.effective(child)?;
            for (bag_name, &bag_child) in &bag.properties {
                if node_writable(arena, bag_child) && is_secret(bag_name, arena.get(bag_child)) {
                    secrets.push(SecretField {
                        path: format!("properties.{}", bag_name),
                        original: bag_name.clone(),
                        variable: safe_name(bag_name),
                    });
                }
            }
        }
    }

    Ok(secrets)
}

/// Collect the response-export path list: every read-only leaf scalar path,
/// minus array subtrees, blocked segments, etag fields, and timestamp
/// fields. Sorted for deterministic output.
pub fn response_exports(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    body: SchemaId,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut stack = HashSet::new();
    collect_exports(arena, flattener, body, "", &mut out, &mut stack);
    out.sort();
    out.dedup();
    out
}

fn collect_exports(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    prefix: &str,
    out: &mut Vec<String>,
    stack: &mut HashSet<SchemaId>,
) {
    if !stack.insert(id) {
        return;
    }
    let Ok(effective) = flattener.effective(id) else {
        stack.remove(&id);
        return;
    };

    for (name, &child) in &effective.properties {
        if segment_blocked(name) {
            continue;
        }
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };

        let node = arena.get(child);
        let cons = consolidate(arena, child);

        let scalar = cons.types.iter().any(|t| {
            matches!(
                t,
                PrimitiveType::String
                    | PrimitiveType::Number
                    | PrimitiveType::Integer
                    | PrimitiveType::Boolean
            )
        });
        if scalar {
            if (node.read_only || cons.read_only) && !field_blocked(name) {
                out.push(path);
            }
            continue;
        }

        // Paths through arrays would contain indices; prune.
        if node.is_array() || cons.types.contains(&PrimitiveType::Array) {
            continue;
        }

        collect_exports(arena, flattener, child, &path, out, stack);
    }

    stack.remove(&id);
}

fn segment_blocked(segment: &str) -> bool {
    let lower = segment.to_lowercase();
    BLOCKED_SEGMENTS.iter().any(|b| lower.contains(b))
}

fn field_blocked(name: &str) -> bool {
    let lower = name.to_lowercase();
    if lower.ends_with("etag") {
        return true;
    }
    TIMESTAMP_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

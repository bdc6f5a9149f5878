//! Type and validation lowering.
//!
//! Maps effective schemas to Terraform type expressions and derives
//! validation rules (enum membership, length/pattern, array bounds and
//! uniqueness, numeric bounds, multiple-of). Composed scalar leaves go
//! through constraint consolidation first: unlike the structural union in
//! `flatten`, composition on a single scalar is a logical AND, so bounds are
//! intersected (largest lower bound, smallest upper bound) and enumerations
//! intersected across branches.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::emit::{hcl_literal, hcl_quote};
use crate::error::GenerateError;
use crate::flatten::Flattener;
use crate::schema::{PrimitiveType, SchemaArena, SchemaId, SchemaNode};

/// Fixed expression for UUID-formatted strings; used instead of the general
/// pattern path when a schema declares `format: uuid`.
pub const UUID_PATTERN: &str =
    "^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

/// Tolerance for the floating-remainder multiple-of test.
const MULTIPLE_OF_EPSILON: &str = "0.00000001";

/// A Terraform type expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetType {
    String,
    Number,
    Bool,
    List(Box<TargetType>),
    Map(Box<TargetType>),
    Object(Vec<ObjectField>),
    /// Untyped: list items without a schema, or a recursion cut point.
    Any,
}

/// One field of a structural object type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectField {
    pub name: String,
    pub ty: TargetType,
    pub optional: bool,
}

impl TargetType {
    /// Render as an HCL type expression. `indent` is the nesting depth of
    /// the surrounding context, two spaces per level.
    pub fn render(&self, indent: usize) -> String {
        match self {
            TargetType::String => "string".to_string(),
            TargetType::Number => "number".to_string(),
            TargetType::Bool => "bool".to_string(),
            TargetType::Any => "any".to_string(),
            TargetType::List(inner) => format!("list({})", inner.render(indent)),
            TargetType::Map(inner) => format!("map({})", inner.render(indent)),
            TargetType::Object(fields) => {
                if fields.is_empty() {
                    return "object({})".to_string();
                }
                let pad = "  ".repeat(indent + 1);
                let close = "  ".repeat(indent);
                let width = fields.iter().map(|f| f.name.len()).max().unwrap_or(0);
                let mut out = String::from("object({\n");
                for field in fields {
                    let rendered = field.ty.render(indent + 1);
                    let rendered = if field.optional {
                        format!("optional({})", rendered)
                    } else {
                        rendered
                    };
                    out.push_str(&format!(
                        "{}{:<width$} = {}\n",
                        pad,
                        field.name,
                        rendered,
                        width = width
                    ));
                }
                out.push_str(&format!("{}}})", close));
                out
            }
        }
    }
}

/// A generated validation predicate with its error message.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub condition: String,
    pub error_message: String,
}

/// Consolidated constraints of a scalar leaf, after intersecting its
/// composition branches.
#[derive(Debug, Clone, Default)]
pub struct Consolidated {
    pub types: BTreeSet<PrimitiveType>,
    pub format: Option<String>,
    pub pattern: Option<String>,
    /// `None` when no branch declares an enumeration.
    pub enum_values: Option<Vec<Value>>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    /// (bound, exclusive)
    pub minimum: Option<(f64, bool)>,
    pub maximum: Option<(f64, bool)>,
    pub multiple_of: Option<f64>,
    pub unique_items: bool,
    pub read_only: bool,
    pub write_only: bool,
}

/// Intersect the constraints contributed by a leaf and its composition
/// branches: most restrictive bound wins; type, format, pattern, and
/// multiple-of take the first non-empty contribution (no intersection is
/// attempted for those); enumerations are intersected.
pub fn consolidate(arena: &SchemaArena, id: SchemaId) -> Consolidated {
    let mut out = Consolidated::default();
    let mut visited = HashSet::new();
    consolidate_into(arena, id, &mut out, &mut visited);
    out
}

fn consolidate_into(
    arena: &SchemaArena,
    id: SchemaId,
    out: &mut Consolidated,
    visited: &mut HashSet<SchemaId>,
) {
    if !visited.insert(id) {
        return;
    }
    let node = arena.get(id);

    if out.types.is_empty() && !node.types.is_empty() {
        out.types = node.types.clone();
    }
    if out.format.is_none() {
        out.format = node.format.clone();
    }
    if out.pattern.is_none() {
        out.pattern = node.pattern.clone();
    }
    if out.multiple_of.is_none() {
        out.multiple_of = node.multiple_of;
    }

    let enums = node.enum_list();
    if !enums.is_empty() {
        out.enum_values = Some(match out.enum_values.take() {
            None => enums.to_vec(),
            Some(existing) => existing
                .into_iter()
                .filter(|v| enums.contains(v))
                .collect(),
        });
    }

    out.min_length = max_lower(out.min_length, node.min_length);
    out.min_items = max_lower(out.min_items, node.min_items);
    out.max_length = min_upper(out.max_length, node.max_length);
    out.max_items = min_upper(out.max_items, node.max_items);

    if let Some(min) = node.minimum {
        out.minimum = Some(tighter_minimum(out.minimum, (min, node.exclusive_minimum)));
    }
    if let Some(max) = node.maximum {
        out.maximum = Some(tighter_maximum(out.maximum, (max, node.exclusive_maximum)));
    }

    out.unique_items |= node.unique_items;
    out.read_only |= node.read_only;
    out.write_only |= node.write_only;

    for &branch in &node.all_of {
        consolidate_into(arena, branch, out, visited);
    }
}

fn max_lower(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn min_upper(current: Option<u64>, candidate: Option<u64>) -> Option<u64> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn tighter_minimum(current: Option<(f64, bool)>, candidate: (f64, bool)) -> (f64, bool) {
    match current {
        None => candidate,
        Some(existing) => {
            if candidate.0 > existing.0 {
                candidate
            } else if candidate.0 < existing.0 {
                existing
            } else {
                // Equal bounds: the exclusive variant is stricter.
                (existing.0, existing.1 || candidate.1)
            }
        }
    }
}

fn tighter_maximum(current: Option<(f64, bool)>, candidate: (f64, bool)) -> (f64, bool) {
    match current {
        None => candidate,
        Some(existing) => {
            if candidate.0 < existing.0 {
                candidate
            } else if candidate.0 > existing.0 {
                existing
            } else {
                (existing.0, existing.1 || candidate.1)
            }
        }
    }
}

/// Whether a property schema may appear in a create/update payload.
pub fn node_writable(arena: &SchemaArena, id: SchemaId) -> bool {
    let node = arena.get(id);
    if node.read_only || consolidate(arena, id).read_only {
        return false;
    }
    node.extensions.mutability_writable().unwrap_or(true)
}

/// Secret detection: `x-ms-secret`, or a string property whose final word is
/// a secret-bearing noun.
pub fn is_secret(name: &str, node: &SchemaNode) -> bool {
    if node.extensions.secret {
        return true;
    }
    if !node.has_type(PrimitiveType::String) {
        return false;
    }
    matches!(
        words(name).last().map(String::as_str),
        Some("password" | "secret" | "key")
    )
}

/// Derive the target-safe snake_case name for a source property name.
///
/// Deterministic case-fold/word-split transliteration; identical inputs
/// always produce identical outputs. Leading digits get an underscore
/// prefix so the result is a valid identifier.
pub fn safe_name(original: &str) -> String {
    let words = words(original);
    let mut name = words.join("_");
    if name.is_empty() {
        name = "_".to_string();
    } else if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Split an identifier into lowercase words on case boundaries and
/// non-alphanumeric separators. Acronym runs stay together: `primaryAPIKey`
/// splits into `primary`, `api`, `key`.
pub fn words(original: &str) -> Vec<String> {
    let chars: Vec<char> = original.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let prev = if i > 0 { Some(chars[i - 1]) } else { None };
        let next = chars.get(i + 1).copied();
        let boundary = match prev {
            Some(p) if p.is_ascii_lowercase() && c.is_ascii_uppercase() => true,
            Some(p)
                if p.is_ascii_uppercase()
                    && c.is_ascii_uppercase()
                    && next.is_some_and(|n| n.is_ascii_lowercase()) =>
            {
                true
            }
            _ => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Tracks target-safe names within one declaration scope. A collision is a
/// hard failure, never a silent rename.
#[derive(Debug, Default)]
pub struct NameScope {
    used: std::collections::BTreeMap<String, String>,
}

impl NameScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, original: &str) -> Result<String, GenerateError> {
        let target = safe_name(original);
        if let Some(first) = self.used.get(&target) {
            return Err(GenerateError::NameCollision {
                first: first.clone(),
                second: original.to_string(),
                target,
            });
        }
        self.used.insert(target.clone(), original.to_string());
        Ok(target)
    }

    /// Reserve a fixed name (e.g. `name`, `location`) without an original.
    pub fn reserve(&mut self, target: &str) {
        self.used
            .insert(target.to_string(), target.to_string());
    }
}

/// Lower an effective schema to a Terraform type.
///
/// Objects are built from writable effective properties only, each optional
/// unless effectively required. Recursion through a cycle is cut with `any`.
pub fn lower_type(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
) -> Result<TargetType, GenerateError> {
    let mut stack = HashSet::new();
    lower_type_inner(arena, flattener, id, &mut stack)
}

fn lower_type_inner(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    stack: &mut HashSet<SchemaId>,
) -> Result<TargetType, GenerateError> {
    if !stack.insert(id) {
        // Terraform types cannot be recursive; cut the cycle.
        return Ok(TargetType::Any);
    }
    let result = lower_type_shape(arena, flattener, id, stack);
    stack.remove(&id);
    result
}

fn lower_type_shape(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    id: SchemaId,
    stack: &mut HashSet<SchemaId>,
) -> Result<TargetType, GenerateError> {
    let cons = consolidate(arena, id);

    if cons.types.contains(&PrimitiveType::Array) {
        let node = arena.get(id);
        let inner = match node.items {
            Some(items) => lower_type_inner(arena, flattener, items, stack)?,
            None => TargetType::Any,
        };
        return Ok(TargetType::List(Box::new(inner)));
    }

    let scalar = cons
        .types
        .iter()
        .find(|t| !matches!(t, PrimitiveType::Null | PrimitiveType::Object));
    if let Some(scalar) = scalar {
        return Ok(match scalar {
            PrimitiveType::String => TargetType::String,
            PrimitiveType::Number | PrimitiveType::Integer => TargetType::Number,
            PrimitiveType::Boolean => TargetType::Bool,
            _ => unreachable!(),
        });
    }

    // Object (declared or implied) or untyped.
    let effective = flattener.effective(id)?;
    if !effective.properties.is_empty() {
        let mut scope = NameScope::new();
        let mut fields = Vec::new();
        for (name, &child) in &effective.properties {
            if !node_writable(arena, child) {
                continue;
            }
            let field_name = scope.claim(name)?;
            let ty = lower_type_inner(arena, flattener, child, stack)?;
            fields.push(ObjectField {
                name: field_name,
                ty,
                optional: !effective.required.contains(name),
            });
        }
        return Ok(TargetType::Object(fields));
    }

    let node = arena.get(id);
    if let Some(additional) = node.additional_properties {
        let inner = lower_type_inner(arena, flattener, additional, stack)?;
        return Ok(TargetType::Map(Box::new(inner)));
    }

    // No declared properties, no value schema: opaque string map.
    Ok(TargetType::Map(Box::new(TargetType::String)))
}

/// Generate validation rules for a scalar or array leaf.
///
/// `value_ref` is the HCL expression referencing the value (e.g.
/// `var.sku_name`); `display` is the name used in error messages. Each rule
/// condition is disjoined with the given `guards` (absence checks for the
/// value itself and, for nested fields, for the parent), so it only applies
/// when the value is present.
pub fn scalar_rules(
    arena: &SchemaArena,
    id: SchemaId,
    value_ref: &str,
    display: &str,
    guards: &[String],
) -> Vec<ValidationRule> {
    let cons = consolidate(arena, id);
    let mut rules = Vec::new();
    let mut push = |condition: String, message: String| {
        let condition = if guards.is_empty() {
            condition
        } else {
            format!("{} || ({})", guards.join(" || "), condition)
        };
        rules.push(ValidationRule {
            condition,
            error_message: message,
        });
    };

    if let Some(values) = &cons.enum_values {
        // Sorted purely for deterministic, diffable output.
        let mut rendered: Vec<String> = values.iter().map(hcl_literal).collect();
        rendered.sort();
        rendered.dedup();
        let list = format!("[{}]", rendered.join(", "));
        push(
            format!("contains({}, {})", list, value_ref),
            format!("{} must be one of {}.", display, list),
        );
    }

    if let Some(min) = cons.min_length {
        push(
            format!("length({}) >= {}", value_ref, min),
            format!("{} must be at least {} characters long.", display, min),
        );
    }
    if let Some(max) = cons.max_length {
        push(
            format!("length({}) <= {}", value_ref, max),
            format!("{} must be at most {} characters long.", display, max),
        );
    }

    if cons.format.as_deref() == Some("uuid") {
        push(
            format!("can(regex({}, {}))", hcl_quote(UUID_PATTERN), value_ref),
            format!("{} must be a valid UUID.", display),
        );
    } else if let Some(pattern) = &cons.pattern {
        push(
            format!("can(regex({}, {}))", hcl_quote(pattern), value_ref),
            format!("{} must match the pattern \"{}\".", display, pattern),
        );
    }

    if let Some(min) = cons.min_items {
        push(
            format!("length({}) >= {}", value_ref, min),
            format!("{} must contain at least {} items.", display, min),
        );
    }
    if let Some(max) = cons.max_items {
        push(
            format!("length({}) <= {}", value_ref, max),
            format!("{} must contain at most {} items.", display, max),
        );
    }
    if cons.unique_items {
        push(
            format!("length({}) == length(distinct({}))", value_ref, value_ref),
            format!("{} must not contain duplicate items.", display),
        );
    }

    if let Some((min, exclusive)) = cons.minimum {
        let op = if exclusive { ">" } else { ">=" };
        push(
            format!("{} {} {}", value_ref, op, format_number(min)),
            format!("{} must be {} {}.", display, op, format_number(min)),
        );
    }
    if let Some((max, exclusive)) = cons.maximum {
        let op = if exclusive { "<" } else { "<=" };
        push(
            format!("{} {} {}", value_ref, op, format_number(max)),
            format!("{} must be {} {}.", display, op, format_number(max)),
        );
    }
    if let Some(multiple) = cons.multiple_of {
        let m = format_number(multiple);
        // Floating remainder with an epsilon; exact equality is unreliable.
        push(
            format!(
                "abs({} - {} * floor({} / {})) < {}",
                value_ref, m, value_ref, m, MULTIPLE_OF_EPSILON
            ),
            format!("{} must be a multiple of {}.", display, m),
        );
    }

    rules
}

/// Render a float without a trailing `.0` for whole numbers.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

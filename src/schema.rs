//! Core schema graph model.
//!
//! Schema nodes live in an arena and reference each other by [`SchemaId`], so
//! shared sub-schemas and cyclic definitions are edges to the same slot rather
//! than clones. Provider annotations (`x-ms-*`) are parsed once at the loading
//! boundary into a typed [`Extensions`] bag; unrecognized extensions are kept
//! opaquely and never interpreted.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

/// Stable identity of a schema node within its [`SchemaArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub(crate) usize);

/// Arena storage for schema nodes.
///
/// Slots are allocated before their content is built so that `$ref` cycles
/// can be wired as ordinary edges during loading.
#[derive(Debug, Default)]
pub struct SchemaArena {
    nodes: Vec<SchemaNode>,
}

impl SchemaArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty slot, returning its id. The caller fills it with
    /// [`SchemaArena::replace`] once the node is built.
    pub fn alloc(&mut self) -> SchemaId {
        let id = SchemaId(self.nodes.len());
        self.nodes.push(SchemaNode::default());
        id
    }

    pub fn replace(&mut self, id: SchemaId, node: SchemaNode) {
        self.nodes[id.0] = node;
    }

    pub fn get(&self, id: SchemaId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: SchemaId) -> &mut SchemaNode {
        &mut self.nodes[id.0]
    }

    /// Copy-on-write clone: allocates a fresh slot holding a copy of `id`.
    /// Referrers of the original are unaffected.
    pub fn clone_node(&mut self, id: SchemaId) -> SchemaId {
        let copy = self.nodes[id.0].clone();
        let new_id = SchemaId(self.nodes.len());
        self.nodes.push(copy);
        new_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// JSON-Schema primitive type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimitiveType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl PrimitiveType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }
}

/// Typed view of recognized `x-ms-*` annotations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extensions {
    /// `x-ms-enum`: enumeration with metadata.
    pub enum_meta: Option<EnumMeta>,
    /// `x-ms-mutability`: lifecycle phases during which the property may be set.
    pub mutability: Option<Vec<String>>,
    /// `x-ms-secret`: the value must not be persisted in plain form.
    pub secret: bool,
    /// `x-ms-client-flatten`: clients present the children as top-level fields.
    pub client_flatten: bool,
    /// Unrecognized `x-*` siblings, preserved opaquely.
    pub other: Map<String, Value>,
}

/// Parsed `x-ms-enum` annotation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnumMeta {
    pub name: Option<String>,
    pub model_as_string: bool,
    /// Optional per-value metadata; the `value` field overrides the plain
    /// `enum` list when present.
    pub values: Vec<Value>,
}

impl Extensions {
    /// Parse extensions from a raw schema object.
    pub fn parse(map: &Map<String, Value>) -> Self {
        let mut ext = Extensions::default();

        for (key, value) in map {
            match key.as_str() {
                "x-ms-enum" => {
                    if let Value::Object(obj) = value {
                        let values = obj
                            .get("values")
                            .and_then(|v| v.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|entry| entry.get("value").cloned())
                                    .collect()
                            })
                            .unwrap_or_default();
                        ext.enum_meta = Some(EnumMeta {
                            name: obj.get("name").and_then(|v| v.as_str()).map(String::from),
                            model_as_string: obj
                                .get("modelAsString")
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false),
                            values,
                        });
                    }
                }
                "x-ms-mutability" => {
                    if let Value::Array(arr) = value {
                        ext.mutability = Some(
                            arr.iter()
                                .filter_map(|v| v.as_str().map(str::to_lowercase))
                                .collect(),
                        );
                    }
                }
                "x-ms-secret" => {
                    ext.secret = value.as_bool().unwrap_or(false);
                }
                "x-ms-client-flatten" => {
                    ext.client_flatten = value.as_bool().unwrap_or(false);
                }
                _ => {
                    if key.starts_with("x-") {
                        ext.other.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        ext
    }

    /// Writability verdict from the mutability list, if one exists.
    ///
    /// A property is writable only when the list contains `create` or
    /// `update`; any other non-empty list marks it non-writable.
    pub fn mutability_writable(&self) -> Option<bool> {
        self.mutability
            .as_ref()
            .map(|phases| phases.iter().any(|p| p == "create" || p == "update"))
    }
}

/// A single node in the schema graph.
#[derive(Debug, Clone, Default)]
pub struct SchemaNode {
    /// Primitive type tags; multiple entries for nullable types.
    pub types: BTreeSet<PrimitiveType>,
    pub properties: BTreeMap<String, SchemaId>,
    pub required: BTreeSet<String>,
    /// Composition branches to be intersected.
    pub all_of: Vec<SchemaId>,
    pub items: Option<SchemaId>,
    pub additional_properties: Option<SchemaId>,
    pub read_only: bool,
    pub write_only: bool,
    pub format: Option<String>,
    pub pattern: Option<String>,
    pub enum_values: Vec<Value>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<f64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub unique_items: bool,
    pub description: Option<String>,
    pub extensions: Extensions,
    /// Where the node came from, e.g. `#/definitions/Sku`. Used in
    /// diagnostics and for raw-document writability lookups.
    pub origin: String,
    /// Named definition this node was dereferenced from, when any.
    pub definition: Option<String>,
}

impl SchemaNode {
    pub fn has_type(&self, ty: PrimitiveType) -> bool {
        self.types.contains(&ty)
    }

    pub fn is_object(&self) -> bool {
        self.has_type(PrimitiveType::Object)
            || (self.types.is_empty() && (!self.properties.is_empty() || !self.all_of.is_empty()))
    }

    pub fn is_array(&self) -> bool {
        self.has_type(PrimitiveType::Array)
    }

    /// True for string/number/integer/boolean nodes (ignoring a null tag).
    pub fn is_scalar(&self) -> bool {
        let mut non_null = self.types.iter().filter(|t| **t != PrimitiveType::Null);
        match non_null.next() {
            Some(
                PrimitiveType::String
                | PrimitiveType::Number
                | PrimitiveType::Integer
                | PrimitiveType::Boolean,
            ) => non_null.next().is_none(),
            _ => false,
        }
    }

    /// Effective enum list: `x-ms-enum` value metadata wins over the plain
    /// `enum` keyword when both are present.
    pub fn enum_list(&self) -> &[Value] {
        match &self.extensions.enum_meta {
            Some(meta) if !meta.values.is_empty() => &meta.values,
            _ => &self.enum_values,
        }
    }

    /// Short human-readable shape description for conflict diagnostics.
    pub fn shape_summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.types.is_empty() {
            parts.push("untyped".to_string());
        } else {
            parts.push(
                self.types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
            );
        }
        if let Some(format) = &self.format {
            parts.push(format!("format: {}", format));
        }
        if self.read_only {
            parts.push("readOnly".to_string());
        }
        if self.write_only {
            parts.push("writeOnly".to_string());
        }
        if !self.enum_values.is_empty() {
            parts.push(format!("enum[{}]", self.enum_values.len()));
        }
        parts.join(", ")
    }
}

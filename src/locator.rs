//! Resource location within a source document.
//!
//! Finds the PUT create/update operation for a resource type, its request
//! body schema, and the path parameter naming the resource instance.

use serde_json::Value;
use tracing::debug;

use crate::error::GenerateError;
use crate::loader::{navigate_fragment, SpecDocument};
use crate::schema::SchemaId;

/// Everything generation needs from the document for one resource type.
#[derive(Debug)]
pub struct ResourceSchemas {
    pub resource_type: String,
    pub api_version: String,
    /// The matched PUT path template.
    pub path: String,
    /// Request body schema id.
    pub body: SchemaId,
    /// Schema of the resource-name path parameter, when declared.
    pub name_schema: Option<SchemaId>,
}

/// Find the PUT operation addressing an instance of `resource_type`
/// (`Microsoft.Something/things` or a nested `.../things/subthings`).
pub fn locate(
    doc: &mut SpecDocument,
    resource_type: &str,
) -> Result<ResourceSchemas, GenerateError> {
    let api_version = doc
        .raw()
        .get("info")
        .and_then(|i| i.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let mut matched: Option<(String, Value)> = None;
    if let Some(paths) = doc.raw().get("paths").and_then(|v| v.as_object()) {
        for (path, item) in paths {
            if item.get("put").is_none() {
                continue;
            }
            let Some(candidate) = path_resource_type(path) else {
                continue;
            };
            if candidate.eq_ignore_ascii_case(resource_type) {
                matched = Some((path.clone(), item.clone()));
                break;
            }
        }
    }

    let Some((path, item)) = matched else {
        return Err(GenerateError::ResourceNotFound {
            resource_type: resource_type.to_string(),
        });
    };
    debug!(resource_type, path, "located PUT operation");

    let put = item.get("put").cloned().unwrap_or(Value::Null);
    let parameters = collect_parameters(doc.raw(), &item, &put);

    let body_value = parameters
        .iter()
        .find(|p| p.get("in").and_then(|v| v.as_str()) == Some("body"))
        .and_then(|p| p.get("schema"))
        .cloned()
        .ok_or_else(|| GenerateError::MissingBodySchema { path: path.clone() })?;
    let body = doc.schema_from_value(&body_value, &format!("{}/put/body", path))?;

    let name_schema = match name_parameter(&path, &parameters) {
        Some(param) => Some(doc.schema_from_value(&param, &format!("{}/put/name", path))?),
        None => None,
    };

    Ok(ResourceSchemas {
        resource_type: resource_type.to_string(),
        api_version,
        path,
        body,
        name_schema,
    })
}

/// Derive the resource type addressed by a path template: the provider
/// namespace after the last `/providers/` segment, followed by every
/// collection segment (templated instance segments skipped). Returns `None`
/// for paths that do not address a provider resource instance.
pub fn path_resource_type(path: &str) -> Option<String> {
    let tail = path.rsplit("/providers/").next()?;
    if tail.len() == path.len() {
        // No /providers/ segment at all.
        return None;
    }

    let mut segments = tail.split('/').filter(|s| !s.is_empty());
    let namespace = segments.next()?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() || !rest.last().is_some_and(|s| is_template(s)) {
        // Collection (list) paths and action paths are not instances.
        return None;
    }

    let mut parts = vec![namespace.to_string()];
    for pair in rest.chunks(2) {
        match pair {
            [collection, instance] if !is_template(collection) && is_template(instance) => {
                parts.push((*collection).to_string());
            }
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

fn is_template(segment: &str) -> bool {
    segment.starts_with('{') && segment.ends_with('}')
}

/// Merge path-item and operation parameters, dereferencing `$ref` entries
/// against the document's `parameters` section. Operation parameters come
/// last so they shadow path-item ones in later lookups.
fn collect_parameters(raw: &Value, item: &Value, put: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    for source in [item.get("parameters"), put.get("parameters")] {
        let Some(list) = source.and_then(|v| v.as_array()) else {
            continue;
        };
        for param in list {
            if let Some(reference) = param.get("$ref").and_then(|v| v.as_str()) {
                if let Some(target) = navigate_fragment(raw, reference) {
                    out.push(target);
                }
            } else {
                out.push(param.clone());
            }
        }
    }
    out
}

/// The path parameter bound to the final template segment of the path.
/// Swagger 2.0 path parameters carry their constraints inline, so the
/// parameter object itself doubles as the schema value.
fn name_parameter(path: &str, parameters: &[Value]) -> Option<Value> {
    let last = path.rsplit('/').find(|s| !s.is_empty())?;
    if !is_template(last) {
        return None;
    }
    let name = &last[1..last.len() - 1];

    parameters
        .iter()
        .rev()
        .find(|p| {
            p.get("in").and_then(|v| v.as_str()) == Some("path")
                && p.get("name").and_then(|v| v.as_str()) == Some(name)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> SpecDocument {
        let raw = json!({
            "swagger": "2.0",
            "info": { "title": "Widgets", "version": "2024-05-01" },
            "paths": {
                "/subscriptions/{subscriptionId}/providers/Microsoft.Test/widgets": {
                    "get": {}
                },
                "/subscriptions/{subscriptionId}/resourceGroups/{rg}/providers/Microsoft.Test/widgets/{widgetName}": {
                    "parameters": [
                        { "$ref": "#/parameters/WidgetNameParameter" }
                    ],
                    "put": {
                        "parameters": [
                            {
                                "name": "parameters",
                                "in": "body",
                                "required": true,
                                "schema": { "$ref": "#/definitions/Widget" }
                            }
                        ]
                    },
                    "get": {}
                }
            },
            "parameters": {
                "WidgetNameParameter": {
                    "name": "widgetName",
                    "in": "path",
                    "required": true,
                    "type": "string",
                    "pattern": "^[a-z][a-z0-9-]{2,23}$",
                    "maxLength": 24
                }
            },
            "definitions": {
                "Widget": {
                    "type": "object",
                    "properties": {
                        "location": { "type": "string" }
                    }
                }
            }
        });
        SpecDocument::from_value(raw)
    }

    #[test]
    fn path_resource_type_derivation() {
        assert_eq!(
            path_resource_type(
                "/subscriptions/{s}/resourceGroups/{rg}/providers/Microsoft.Test/widgets/{name}"
            ),
            Some("Microsoft.Test/widgets".to_string())
        );
        assert_eq!(
            path_resource_type(
                "/subscriptions/{s}/providers/Microsoft.Test/widgets/{w}/flanges/{f}"
            ),
            Some("Microsoft.Test/widgets/flanges".to_string())
        );
        // Collection path: no instance segment.
        assert_eq!(
            path_resource_type("/subscriptions/{s}/providers/Microsoft.Test/widgets"),
            None
        );
        // Action path: trailing verb segment.
        assert_eq!(
            path_resource_type(
                "/subscriptions/{s}/providers/Microsoft.Test/widgets/{w}/restart"
            ),
            None
        );
        assert_eq!(path_resource_type("/subscriptions/{s}/tagNames/{t}"), None);
    }

    #[test]
    fn locate_finds_put_body_and_name_parameter() {
        let mut doc = sample_doc();
        let located = locate(&mut doc, "Microsoft.Test/widgets").unwrap();
        assert_eq!(located.api_version, "2024-05-01");
        assert!(located.path.ends_with("/widgets/{widgetName}"));

        let body = doc.arena().get(located.body);
        assert!(body.properties.contains_key("location"));

        let name = doc.arena().get(located.name_schema.unwrap());
        assert_eq!(name.pattern.as_deref(), Some("^[a-z][a-z0-9-]{2,23}$"));
        assert_eq!(name.max_length, Some(24));
    }

    #[test]
    fn locate_is_case_insensitive() {
        let mut doc = sample_doc();
        assert!(locate(&mut doc, "microsoft.test/WIDGETS").is_ok());
    }

    #[test]
    fn locate_unknown_type_fails() {
        let mut doc = sample_doc();
        let err = locate(&mut doc, "Microsoft.Test/gadgets").unwrap_err();
        assert!(matches!(err, GenerateError::ResourceNotFound { .. }));
    }

    #[test]
    fn locate_requires_body_schema() {
        let raw = json!({
            "info": { "version": "2024-05-01" },
            "paths": {
                "/providers/Microsoft.Test/widgets/{name}": {
                    "put": { "parameters": [] }
                }
            }
        });
        let mut doc = SpecDocument::from_value(raw);
        let err = locate(&mut doc, "Microsoft.Test/widgets").unwrap_err();
        assert!(matches!(err, GenerateError::MissingBodySchema { .. }));
    }
}

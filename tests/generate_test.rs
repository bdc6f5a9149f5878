//! End-to-end generation tests over in-memory documents.

use armgen::{generate_module, FlattenError, GenerateError, SpecDocument};
use serde_json::{json, Value};

/// Wrap a set of definitions in a minimal document with one PUT path for
/// `Microsoft.Test/widgets`, whose body is `#/definitions/Widget`.
fn document(definitions: Value) -> SpecDocument {
    SpecDocument::from_value(json!({
        "swagger": "2.0",
        "info": { "title": "Widgets", "version": "2024-05-01" },
        "paths": {
            "/subscriptions/{subscriptionId}/resourceGroups/{rg}/providers/Microsoft.Test/widgets/{widgetName}": {
                "put": {
                    "parameters": [
                        {
                            "name": "widgetName",
                            "in": "path",
                            "required": true,
                            "type": "string",
                            "maxLength": 24
                        },
                        {
                            "name": "parameters",
                            "in": "body",
                            "required": true,
                            "schema": { "$ref": "#/definitions/Widget" }
                        }
                    ]
                }
            }
        },
        "definitions": definitions
    }))
}

const RESOURCE: &str = "Microsoft.Test/widgets";

mod determinism {
    use super::*;

    #[test]
    fn repeated_runs_are_byte_identical() {
        let definitions = json!({
            "Widget": {
                "type": "object",
                "required": ["location"],
                "properties": {
                    "location": { "type": "string" },
                    "tags": { "type": "object", "additionalProperties": { "type": "string" } },
                    "sku": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "enum": ["Standard", "Basic"] }
                        }
                    }
                }
            }
        });
        let first = generate_module(&mut document(definitions.clone()), RESOURCE).unwrap();
        let second = generate_module(&mut document(definitions.clone()), RESOURCE).unwrap();
        let third = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
    }
}

mod composition {
    use super::*;

    #[test]
    fn required_sets_union_across_branches() {
        let definitions = json!({
            "Base": {
                "type": "object",
                "required": ["location"],
                "properties": { "location": { "type": "string" } }
            },
            "Widget": {
                "type": "object",
                "allOf": [{ "$ref": "#/definitions/Base" }],
                "required": ["kind"],
                "properties": { "kind": { "type": "string" } }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        // Neither inherited-required nor own-required field gets a default.
        let kind_block = variable_block(&module.variables_tf, "kind");
        assert!(!kind_block.contains("default"));
        assert!(module.variables_tf.contains("variable \"location\""));
    }

    #[test]
    fn conflicting_property_shapes_are_fatal() {
        let definitions = json!({
            "A": {
                "type": "object",
                "properties": { "count": { "type": "integer" } }
            },
            "B": {
                "type": "object",
                "properties": { "count": { "type": "string" } }
            },
            "Widget": {
                "type": "object",
                "allOf": [
                    { "$ref": "#/definitions/A" },
                    { "$ref": "#/definitions/B" }
                ]
            }
        });
        let err = generate_module(&mut document(definitions), RESOURCE).unwrap_err();
        match err {
            GenerateError::Flatten(FlattenError::ConflictingPropertyDefinition {
                property,
                ..
            }) => assert_eq!(property, "count"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn description_differences_are_not_conflicts() {
        let definitions = json!({
            "A": {
                "type": "object",
                "properties": { "count": { "type": "integer", "description": "From A." } }
            },
            "B": {
                "type": "object",
                "properties": { "count": { "type": "integer", "description": "From B." } }
            },
            "Widget": {
                "type": "object",
                "allOf": [
                    { "$ref": "#/definitions/A" },
                    { "$ref": "#/definitions/B" }
                ]
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(module.variables_tf.contains("variable \"count\""));
    }

    #[test]
    fn composition_cycle_is_fatal() {
        let definitions = json!({
            "A": {
                "type": "object",
                "allOf": [{ "$ref": "#/definitions/B" }]
            },
            "B": {
                "type": "object",
                "allOf": [{ "$ref": "#/definitions/A" }]
            },
            "Widget": {
                "type": "object",
                "allOf": [{ "$ref": "#/definitions/A" }]
            }
        });
        let err = generate_module(&mut document(definitions), RESOURCE).unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Flatten(FlattenError::CycleDetected { .. })
        ));
    }

    #[test]
    fn recursive_property_reference_generates() {
        // Self-reference through a property edge is sharing, not a cycle;
        // the lowered type cuts the recursion.
        let definitions = json!({
            "Widget": {
                "type": "object",
                "properties": {
                    "error": { "$ref": "#/definitions/ErrorDetail" }
                }
            },
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
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(module.variables_tf.contains("details = optional(list(any))"));
    }

    /// Composition on a scalar leaf intersects constraints; composition on
    /// objects unions properties. The same document exercises both.
    #[test]
    fn scalar_consolidation_and_object_union_coexist() {
        let definitions = json!({
            "CapacityBase": { "minimum": 1, "maximum": 100 },
            "Widget": {
                "type": "object",
                "allOf": [
                    {
                        "type": "object",
                        "properties": { "kind": { "type": "string" } }
                    }
                ],
                "properties": {
                    "capacity": {
                        "type": "integer",
                        "allOf": [{ "$ref": "#/definitions/CapacityBase" }],
                        "minimum": 5
                    }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        // Union: both the branch property and the own property exist.
        assert!(module.variables_tf.contains("variable \"kind\""));
        assert!(module.variables_tf.contains("variable \"capacity\""));
        // Intersection: the larger lower bound wins.
        let capacity = variable_block(&module.variables_tf, "capacity");
        assert!(capacity.contains("var.capacity >= 5"));
        assert!(!capacity.contains(">= 1)"));
        assert!(capacity.contains("var.capacity <= 100"));
    }
}

mod writability {
    use super::*;

    #[test]
    fn ref_sibling_read_only_is_recovered() {
        let definitions = json!({
            "Sku": {
                "type": "object",
                "properties": { "name": { "type": "string" } }
            },
            "Widget": {
                "type": "object",
                "properties": {
                    "activeSku": { "$ref": "#/definitions/Sku", "readOnly": true },
                    "requestedSku": { "$ref": "#/definitions/Sku" }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(!module.variables_tf.contains("variable \"active_sku\""));
        assert!(module.variables_tf.contains("variable \"requested_sku\""));
        assert!(!module.main_tf.contains("activeSku"));
        assert!(module.main_tf.contains("requestedSku = var.requested_sku"));
    }

    #[test]
    fn mutability_read_excludes_property() {
        let definitions = json!({
            "Widget": {
                "type": "object",
                "properties": {
                    "frozen": { "type": "string", "x-ms-mutability": ["read"] },
                    "settable": { "type": "string", "x-ms-mutability": ["create", "update", "read"] }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(!module.variables_tf.contains("variable \"frozen\""));
        assert!(module.variables_tf.contains("variable \"settable\""));
    }
}

mod validation {
    use super::*;

    #[test]
    fn enum_values_render_sorted() {
        let definitions = json!({
            "Widget": {
                "type": "object",
                "properties": {
                    "sku": {
                        "type": "string",
                        "enum": ["Premium", "Basic", "Standard", "Free"]
                    }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(module
            .variables_tf
            .contains(r#"["Basic", "Free", "Premium", "Standard"]"#));
    }

    #[test]
    fn optional_scalar_rules_are_null_guarded() {
        let definitions = json!({
            "Widget": {
                "type": "object",
                "properties": {
                    "label": { "type": "string", "minLength": 3, "maxLength": 12 }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(module
            .variables_tf
            .contains("var.label == null || (length(var.label) >= 3)"));
        assert!(module
            .variables_tf
            .contains("var.label == null || (length(var.label) <= 12)"));
    }

    #[test]
    fn name_parameter_constraints_apply_to_name() {
        let definitions = json!({
            "Widget": { "type": "object", "properties": {} }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        let name = variable_block(&module.variables_tf, "name");
        assert!(name.contains("length(var.name) <= 24"));
    }
}

mod exports {
    use super::*;

    #[test]
    fn export_list_is_filtered_and_sorted() {
        let definitions = json!({
            "Widget": {
                "type": "object",
                "properties": {
                    "type": { "type": "string", "readOnly": true },
                    "name": { "type": "string", "readOnly": true },
                    "id": { "type": "string", "readOnly": true },
                    "etag": { "type": "string", "readOnly": true },
                    "properties": {
                        "type": "object",
                        "properties": {
                            "status": {
                                "type": "object",
                                "properties": {
                                    "phase": { "type": "string", "readOnly": true }
                                }
                            },
                            "lastModified": { "type": "string", "readOnly": true },
                            "members": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "id": { "type": "string", "readOnly": true }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
        let module = generate_module(&mut document(definitions), RESOURCE).unwrap();
        assert!(module
            .main_tf
            .contains("response_export_values = [\"id\", \"name\", \"type\"]"));
    }
}

/// Extract one `variable "<name>" { ... }` block from rendered variables.
fn variable_block(variables_tf: &str, name: &str) -> String {
    let header = format!("variable \"{}\" {{", name);
    let start = variables_tf
        .find(&header)
        .unwrap_or_else(|| panic!("no variable {name} in:\n{variables_tf}"));
    let rest = &variables_tf[start..];
    let end = rest.find("\n}\n").map(|i| i + 3).unwrap_or(rest.len());
    rest[..end].to_string()
}

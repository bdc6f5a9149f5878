//! Module generation orchestration.
//!
//! Drives the full pipeline for one resource type: locate the PUT operation,
//! backfill writability from the raw document, flatten, detect capabilities,
//! lower types and validations, build the body expression, and render the
//! three module files. Deterministic: the same document and resource type
//! always produce byte-identical output.

use tracing::debug;

use crate::body::{build_body, is_concrete_object, response_exports, secret_fields, SecretField};
use crate::capabilities::{detect, Capabilities};
use crate::emit::{hcl_quote, render_file, render_locals, GeneratedModule, Output, Variable};
use crate::error::GenerateError;
use crate::flatten::Flattener;
use crate::loader::SpecDocument;
use crate::locator::{locate, ResourceSchemas};
use crate::lower::{
    is_secret, lower_type, node_writable, scalar_rules, NameScope, TargetType, ValidationRule,
};
use crate::schema::{SchemaArena, SchemaId};
use crate::writability::apply_overrides;

/// Generate the Terraform module for one resource type.
pub fn generate_module(
    doc: &mut SpecDocument,
    resource_type: &str,
) -> Result<GeneratedModule, GenerateError> {
    let located = locate(doc, resource_type)?;
    let body = {
        let (arena, raw) = doc.parts_mut();
        apply_overrides(arena, raw, located.body)
    };
    debug!(
        resource_type,
        api_version = located.api_version,
        "generating module"
    );

    let arena = doc.arena();
    let raw = doc.raw();
    let mut flattener = Flattener::new(arena);
    let caps = detect(arena, &mut flattener, body, raw, resource_type);

    let secrets = secret_fields(arena, &mut flattener, body)?;
    let variables = build_variables(arena, &mut flattener, &located, body, &caps, &secrets)?;
    let variables_tf = render_file(&variables.iter().map(Variable::render).collect::<Vec<_>>());

    let main_tf = build_main(arena, &mut flattener, &located, body, &caps, &secrets)?;
    let outputs_tf = build_outputs();

    Ok(GeneratedModule {
        variables_tf,
        main_tf,
        outputs_tf,
    })
}

/// Locate the resource and report its detected capabilities.
pub fn resource_capabilities(
    doc: &mut SpecDocument,
    resource_type: &str,
) -> Result<Capabilities, GenerateError> {
    let located = locate(doc, resource_type)?;
    let body = {
        let (arena, raw) = doc.parts_mut();
        apply_overrides(arena, raw, located.body)
    };
    let arena = doc.arena();
    let mut flattener = Flattener::new(arena);
    Ok(detect(arena, &mut flattener, body, doc.raw(), resource_type))
}

fn build_variables(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    located: &ResourceSchemas,
    body: SchemaId,
    caps: &Capabilities,
    secrets: &[SecretField],
) -> Result<Vec<Variable>, GenerateError> {
    let mut scope = NameScope::new();
    scope.reserve("name");
    scope.reserve("parent_id");
    if caps.supports_location {
        scope.reserve("location");
    }
    if caps.supports_managed_identity {
        scope.reserve("managed_identities");
    }
    if caps.supports_private_endpoints {
        scope.reserve("private_endpoints");
    }
    if caps.supports_customer_managed_key {
        scope.reserve("customer_managed_key");
    }
    if caps.supports_diagnostics {
        scope.reserve("diagnostic_settings");
    }

    let mut variables = vec![
        Variable {
            name: "name".into(),
            type_expr: "string".into(),
            description: Some("The name of this resource.".into()),
            validations: located
                .name_schema
                .map(|id| scalar_rules(arena, id, "var.name", "name", &[]))
                .unwrap_or_default(),
            ..Variable::default()
        },
        Variable {
            name: "parent_id".into(),
            type_expr: "string".into(),
            description: Some(
                "The ID of the resource this resource is deployed under.".into(),
            ),
            ..Variable::default()
        },
    ];
    if caps.supports_location {
        variables.push(Variable {
            name: "location".into(),
            type_expr: "string".into(),
            description: Some("The Azure region where this resource is deployed.".into()),
            ..Variable::default()
        });
    }

    // Schema-derived variables, sorted by target name; a secret's version
    // companion stays adjacent to it.
    let mut derived: Vec<(String, Vec<Variable>)> = Vec::new();
    let effective = flattener.effective(body)?;
    for (name, &child) in &effective.properties {
        if caps.supports_managed_identity && name.eq_ignore_ascii_case("identity") {
            continue;
        }
        if caps.supports_location && name == "location" {
            continue;
        }
        if !node_writable(arena, child) {
            continue;
        }

        if name == "tags" && caps.supports_tags {
            let target = scope.claim(name)?;
            derived.push((
                target.clone(),
                vec![Variable {
                    name: target,
                    type_expr: "map(string)".into(),
                    description: Some("Tags to apply to the resource.".into()),
                    default: Some("null".into()),
                    ..Variable::default()
                }],
            ));
            continue;
        }

        if name == "properties" && is_concrete_object(arena, flattener, child) {
            let bag = flattener.effective(child)?;
            for (bag_name, &bag_child) in &bag.properties {
                if caps.supports_managed_identity && bag_name.eq_ignore_ascii_case("identity") {
                    continue;
                }
                if !node_writable(arena, bag_child) {
                    continue;
                }
                let required = bag.required.contains(bag_name);
                derived.push(field_variables(
                    arena, flattener, &mut scope, bag_name, bag_child, required, secrets,
                )?);
            }
            continue;
        }

        let required = effective.required.contains(name);
        derived.push(field_variables(
            arena, flattener, &mut scope, name, child, required, secrets,
        )?);
    }
    derived.sort_by(|a, b| a.0.cmp(&b.0));
    variables.extend(derived.into_iter().flat_map(|(_, vars)| vars));

    variables.extend(capability_variables(caps));
    Ok(variables)
}

/// Variables for one writable field: the variable itself, plus a version
/// companion when the field is a secret.
fn field_variables(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    scope: &mut NameScope,
    name: &str,
    id: SchemaId,
    required: bool,
    secrets: &[SecretField],
) -> Result<(String, Vec<Variable>), GenerateError> {
    let target = scope.claim(name)?;
    let node = arena.get(id);
    let description = node.description.clone();
    let secret = is_secret(name, node) && secrets.iter().any(|s| s.variable == target);

    if secret {
        let version_name = format!("{}_version", target);
        scope.reserve(&version_name);
        let vars = vec![
            Variable {
                name: target.clone(),
                type_expr: "string".into(),
                description,
                default: (!required).then(|| "null".to_string()),
                sensitive: true,
                ephemeral: true,
                ..Variable::default()
            },
            Variable {
                name: version_name.clone(),
                type_expr: "string".into(),
                description: Some(format!(
                    "Opaque version marker for {}; change it to push a new value.",
                    target
                )),
                default: Some("null".into()),
                validations: vec![ValidationRule {
                    condition: format!(
                        "var.{} == null || var.{} != null",
                        target, version_name
                    ),
                    error_message: format!(
                        "{} must be set whenever {} is set.",
                        version_name, target
                    ),
                }],
                ..Variable::default()
            },
        ];
        return Ok((target, vars));
    }

    let ty = lower_type(arena, flattener, id)?;
    let value_ref = format!("var.{}", target);
    let mut validations = if required {
        scalar_rules(arena, id, &value_ref, &target, &[])
    } else {
        let guards = vec![format!("{} == null", value_ref)];
        scalar_rules(arena, id, &value_ref, &target, &guards)
    };
    validations.extend(nested_rules(arena, flattener, &ty, &target, id)?);

    let variable = Variable {
        name: target.clone(),
        type_expr: ty.render(1),
        description,
        default: (!required).then(|| "null".to_string()),
        validations,
        ..Variable::default()
    };
    Ok((target, vec![variable]))
}

/// One level of validation for the fields of an object-typed variable, each
/// rule guarded by the presence of the variable and of the field itself.
/// Deliberately shallow: only scalar and array fields directly below the
/// object get rules, keeping the emitted predicates linear in schema size.
fn nested_rules(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    ty: &TargetType,
    target: &str,
    id: SchemaId,
) -> Result<Vec<ValidationRule>, GenerateError> {
    if !matches!(ty, TargetType::Object(_)) {
        return Ok(Vec::new());
    }

    let effective = flattener.effective(id)?;
    let mut rules = Vec::new();
    let mut scope = NameScope::new();
    for (name, &child) in &effective.properties {
        if !node_writable(arena, child) {
            continue;
        }
        let field = scope.claim(name)?;
        let child_node = arena.get(child);
        if !child_node.is_scalar() && !child_node.is_array() {
            continue;
        }
        let value_ref = format!("var.{}.{}", target, field);
        let display = format!("{}.{}", target, field);
        let mut guards = vec![format!("var.{} == null", target)];
        if !effective.required.contains(name) {
            guards.push(format!("{} == null", value_ref));
        }
        rules.extend(scalar_rules(arena, child, &value_ref, &display, &guards));
    }
    Ok(rules)
}

fn capability_variables(caps: &Capabilities) -> Vec<Variable> {
    let mut out = Vec::new();
    if caps.supports_managed_identity {
        out.push(Variable {
            name: "managed_identities".into(),
            type_expr: "object({\n    system_assigned            = optional(bool, false)\n    user_assigned_resource_ids = optional(set(string), [])\n  })".into(),
            description: Some("Managed identities to assign to the resource.".into()),
            default: Some("{}".into()),
            ..Variable::default()
        });
    }
    if caps.supports_private_endpoints {
        out.push(Variable {
            name: "private_endpoints".into(),
            type_expr: "map(object({\n    name                          = optional(string)\n    subnet_resource_id            = string\n    subresource_name              = optional(string)\n    private_dns_zone_resource_ids = optional(set(string), [])\n  }))".into(),
            description: Some("Private endpoints to create for the resource, keyed by an arbitrary map key.".into()),
            default: Some("{}".into()),
            ..Variable::default()
        });
    }
    if caps.supports_customer_managed_key {
        out.push(Variable {
            name: "customer_managed_key".into(),
            type_expr: "object({\n    key_vault_resource_id              = string\n    key_name                           = string\n    key_version                        = optional(string)\n    user_assigned_identity_resource_id = optional(string)\n  })".into(),
            description: Some("Customer-managed key to use for encryption at rest.".into()),
            default: Some("null".into()),
            ..Variable::default()
        });
    }
    if caps.supports_diagnostics {
        out.push(Variable {
            name: "diagnostic_settings".into(),
            type_expr: "map(object({\n    name                       = optional(string)\n    workspace_resource_id      = optional(string)\n    storage_account_resource_id = optional(string)\n  }))".into(),
            description: Some("Diagnostic settings to create on the resource.".into()),
            default: Some("{}".into()),
            ..Variable::default()
        });
    }
    out
}

fn build_main(
    arena: &SchemaArena,
    flattener: &mut Flattener,
    located: &ResourceSchemas,
    body: SchemaId,
    caps: &Capabilities,
    secrets: &[SecretField],
) -> Result<String, GenerateError> {
    let body_expr = build_body(arena, flattener, body, caps)?;

    let mut locals: Vec<(String, String)> = vec![("body".into(), body_expr)];
    if caps.supports_managed_identity {
        locals.push(("identity".into(), identity_local()));
    }
    if caps.supports_private_endpoints {
        let default_subresource = located
            .resource_type
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        locals.push((
            "private_endpoints".into(),
            format!(
                "{{\n    for key, value in var.private_endpoints : key => merge(value, {{\n      subresource_name = coalesce(value.subresource_name, {})\n    }})\n  }}",
                hcl_quote(&default_subresource)
            ),
        ));
    }

    let exports = response_exports(arena, flattener, body);

    let mut resource = String::from("resource \"azapi_resource\" \"this\" {\n");
    resource.push_str(&format!(
        "  type      = {}\n",
        hcl_quote(&format!(
            "{}@{}",
            located.resource_type, located.api_version
        ))
    ));
    resource.push_str("  name      = var.name\n");
    resource.push_str("  parent_id = var.parent_id\n");
    if caps.supports_location {
        resource.push_str("  location  = var.location\n");
    }
    resource.push_str("  body      = local.body\n");

    if !secrets.is_empty() {
        resource.push_str("\n  sensitive_body = {\n");
        for secret in secrets {
            resource.push_str(&format!(
                "    {} = var.{}\n",
                hcl_quote(&secret.path),
                secret.variable
            ));
        }
        resource.push_str("  }\n");
        resource.push_str("  sensitive_body_version = {\n");
        for secret in secrets {
            resource.push_str(&format!(
                "    {} = var.{}_version\n",
                hcl_quote(&secret.path),
                secret.variable
            ));
        }
        resource.push_str("  }\n");
    }

    if !exports.is_empty() {
        let rendered: Vec<String> = exports.iter().map(|p| hcl_quote(p)).collect();
        resource.push_str(&format!(
            "\n  response_export_values = [{}]\n",
            rendered.join(", ")
        ));
    }

    if caps.supports_managed_identity {
        resource.push_str(
            "\n  dynamic \"identity\" {\n    for_each = local.identity == null ? [] : [local.identity]\n\n    content {\n      type         = identity.value.type\n      identity_ids = identity.value.identity_ids\n    }\n  }\n",
        );
    }
    resource.push_str("}\n");

    Ok(render_file(&[render_locals(&locals), resource]))
}

/// Identity shape computed from the `managed_identities` variable; `null`
/// when neither kind is requested.
fn identity_local() -> String {
    "(var.managed_identities.system_assigned || length(var.managed_identities.user_assigned_resource_ids) > 0) ? {\n    type = var.managed_identities.system_assigned && length(var.managed_identities.user_assigned_resource_ids) > 0 ? \"SystemAssigned, UserAssigned\" : (var.managed_identities.system_assigned ? \"SystemAssigned\" : \"UserAssigned\")\n    identity_ids = var.managed_identities.user_assigned_resource_ids\n  } : null"
        .to_string()
}

fn build_outputs() -> String {
    let outputs = [
        Output {
            name: "resource_id".into(),
            value: "azapi_resource.this.id".into(),
            description: Some("The ID of the created resource.".into()),
            sensitive: false,
        },
        Output {
            name: "name".into(),
            value: "azapi_resource.this.name".into(),
            description: Some("The name of the created resource.".into()),
            sensitive: false,
        },
    ];
    render_file(&outputs.iter().map(Output::render).collect::<Vec<_>>())
}

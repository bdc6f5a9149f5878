//! HCL emission.
//!
//! Renders variables, locals, resource attributes, and outputs as Terraform
//! source text. All collections are rendered in the order given; callers are
//! responsible for sorting, so identical inputs always produce identical
//! bytes.

use serde_json::Value;

use crate::lower::{format_number, ValidationRule};

/// Quote a string as an HCL string literal. Template introducers are
/// escaped so user-supplied text (patterns in particular) is never
/// interpolated.
pub fn hcl_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a JSON value as an HCL literal expression.
pub fn hcl_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => format_number(f),
            None => n.to_string(),
        },
        Value::String(s) => hcl_quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(hcl_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{} = {}", hcl_key(k), hcl_literal(v)))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
    }
}

/// Render an object key: bare when it is a valid identifier, quoted
/// otherwise.
pub fn hcl_key(key: &str) -> String {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        key.to_string()
    } else {
        hcl_quote(key)
    }
}

/// An input variable declaration.
#[derive(Debug, Clone, Default)]
pub struct Variable {
    pub name: String,
    /// Rendered type expression (top-level indent).
    pub type_expr: String,
    pub description: Option<String>,
    /// Rendered default expression; `None` means required.
    pub default: Option<String>,
    pub sensitive: bool,
    pub ephemeral: bool,
    pub validations: Vec<ValidationRule>,
}

impl Variable {
    pub fn render(&self) -> String {
        let mut out = format!("variable \"{}\" {{\n", self.name);
        out.push_str(&format!("  type = {}\n", self.type_expr));
        if let Some(description) = &self.description {
            out.push_str(&format!("  description = {}\n", hcl_quote(description)));
        }
        if let Some(default) = &self.default {
            out.push_str(&format!("  default = {}\n", default));
        }
        if self.sensitive {
            out.push_str("  sensitive = true\n");
        }
        if self.ephemeral {
            out.push_str("  ephemeral = true\n");
        }
        for rule in &self.validations {
            out.push_str("\n  validation {\n");
            out.push_str(&format!("    condition     = {}\n", rule.condition));
            out.push_str(&format!(
                "    error_message = {}\n",
                hcl_quote(&rule.error_message)
            ));
            out.push_str("  }\n");
        }
        out.push_str("}\n");
        out
    }
}

/// An output declaration.
#[derive(Debug, Clone)]
pub struct Output {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
    pub sensitive: bool,
}

impl Output {
    pub fn render(&self) -> String {
        let mut out = format!("output \"{}\" {{\n", self.name);
        if let Some(description) = &self.description {
            out.push_str(&format!("  description = {}\n", hcl_quote(description)));
        }
        out.push_str(&format!("  value = {}\n", self.value));
        if self.sensitive {
            out.push_str("  sensitive = true\n");
        }
        out.push_str("}\n");
        out
    }
}

/// Render a `locals` block with aligned assignments.
pub fn render_locals(entries: &[(String, String)]) -> String {
    let mut out = String::from("locals {\n");
    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (name, expr) in entries {
        out.push_str(&format!("  {:<width$} = {}\n", name, expr, width = width));
    }
    out.push_str("}\n");
    out
}

/// Render a sequence of declarations separated by blank lines.
pub fn render_file(sections: &[String]) -> String {
    sections.join("\n")
}

/// The three rendered module files.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModule {
    pub variables_tf: String,
    pub main_tf: String,
    pub outputs_tf: String,
}

impl GeneratedModule {
    /// File name / content pairs, in a fixed order.
    pub fn files(&self) -> [(&'static str, &str); 3] {
        [
            ("variables.tf", &self.variables_tf),
            ("main.tf", &self.main_tf),
            ("outputs.tf", &self.outputs_tf),
        ]
    }
}

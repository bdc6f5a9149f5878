//! Terraform module generation from ARM-flavored OpenAPI documents.
//!
//! Takes a Swagger 2.0 document for an Azure resource provider, resolves the
//! `allOf`/`$ref` composition of the request-body schema into an effective
//! view, recovers writability metadata dropped during dereferencing, and
//! renders a module: typed input variables with validation blocks, a nested
//! request-body local, an `azapi_resource` declaration, and fixed outputs.
//! Output is deterministic; the same document and resource type always
//! produce byte-identical files.
//!
//! # Example
//!
//! ```no_run
//! use armgen::{generate_module, load_document};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), armgen::GenerateError> {
//! let mut doc = load_document(Path::new("widgets.json"))?;
//! let module = generate_module(&mut doc, "Microsoft.Test/widgets")?;
//! print!("{}", module.variables_tf);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod capabilities;
pub mod emit;
pub mod error;
pub mod flatten;
pub mod generator;
pub mod loader;
pub mod locator;
pub mod lower;
pub mod schema;
pub mod writability;

pub use capabilities::Capabilities;
pub use emit::GeneratedModule;
pub use error::{FlattenError, GenerateError, LoadError};
pub use flatten::{EffectiveSchema, Flattener};
pub use generator::{generate_module, resource_capabilities};
pub use loader::{load_document, load_document_auto, load_document_str, SpecDocument};
pub use locator::{locate, ResourceSchemas};
pub use schema::{SchemaArena, SchemaId, SchemaNode};

#[cfg(feature = "remote")]
pub use loader::load_document_url;

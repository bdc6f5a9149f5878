//! armgen CLI
//!
//! Command-line interface for generating Terraform modules from ARM OpenAPI
//! documents.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use armgen::{generate_module, load_document_auto, resource_capabilities};

#[derive(Parser)]
#[command(name = "armgen")]
#[command(about = "Generate Terraform modules from Azure ARM OpenAPI resource schemas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the module for a resource type
    Generate {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Resource type, e.g. Microsoft.Storage/storageAccounts
        #[arg(long, short)]
        resource_type: String,

        /// Directory to write variables.tf, main.tf, and outputs.tf into
        /// (stdout concatenation if not specified)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Report the detected capabilities of a resource type
    Capabilities {
        /// Document source: file path or URL (http:// or https://)
        document: String,

        /// Resource type, e.g. Microsoft.Storage/storageAccounts
        #[arg(long, short)]
        resource_type: String,

        /// Output as JSON (for automation)
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate {
            document,
            resource_type,
            output_dir,
        } => run_generate(&document, &resource_type, output_dir),

        Commands::Capabilities {
            document,
            resource_type,
            json,
        } => run_capabilities(&document, &resource_type, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_generate(
    document: &str,
    resource_type: &str,
    output_dir: Option<PathBuf>,
) -> Result<(), u8> {
    let mut doc = load_document_auto(document).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let module = generate_module(&mut doc, resource_type).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    match output_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir).map_err(|e| {
                eprintln!("Error creating {}: {}", dir.display(), e);
                3u8
            })?;
            for (name, content) in module.files() {
                let path = dir.join(name);
                std::fs::write(&path, content).map_err(|e| {
                    eprintln!("Error writing to {}: {}", path.display(), e);
                    3u8
                })?;
            }
        }
        None => {
            for (name, content) in module.files() {
                println!("# {}", name);
                print!("{}", content);
                println!();
            }
        }
    }

    Ok(())
}

fn run_capabilities(document: &str, resource_type: &str, json: bool) -> Result<(), u8> {
    let mut doc = load_document_auto(document).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let caps = resource_capabilities(&mut doc, resource_type).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&caps).unwrap());
    } else {
        println!("{}:", resource_type);
        println!("  tags:                  {}", caps.supports_tags);
        println!("  location:              {}", caps.supports_location);
        println!("  managed identity:      {}", caps.supports_managed_identity);
        println!("  private endpoints:     {}", caps.supports_private_endpoints);
        println!("  diagnostics:           {}", caps.supports_diagnostics);
        println!("  customer-managed key:  {}", caps.supports_customer_managed_key);
    }

    Ok(())
}

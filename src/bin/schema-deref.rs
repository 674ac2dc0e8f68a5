//! Schema Deref CLI
//!
//! Command-line interface for dereferencing, resolving and linting schemas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use schema_deref::{
    file_uri, is_url, lint, load_schema, ChainRetriever, DerefError, DerefOptions, DocumentId,
    FileRetriever, FileStatus, RetrieveError, SchemaIndex, ScopePath, Severity, Store,
};

#[derive(Parser)]
#[command(name = "schema-deref")]
#[command(about = "Resolve and dereference JSON Schema references")]
#[command(version)]
struct Cli {
    /// Log progress to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dereference a schema and print the resulting graph as JSON
    Deref {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        source: SourceArgs,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the schema a reference node resolves to
    Resolve {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// URI of the reference node (e.g., urn:x#/properties/a)
        reference: String,

        /// Dynamic scope: path steps from the root to the reference
        #[arg(long, num_args = 1.., value_name = "STEP")]
        scope: Vec<String>,

        #[command(flatten)]
        source: SourceArgs,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Lint schema files for errors (syntax, broken refs, ambiguous identities)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Base URI for the root schema (default: its file or URL location)
    #[arg(long)]
    base_uri: Option<String>,

    /// Serve URIs starting with PREFIX from files under DIR
    #[arg(long = "map", value_name = "PREFIX=DIR", value_parser = parse_mapping)]
    mappings: Vec<(String, PathBuf)>,

    /// Never fetch http:// or https:// documents
    #[arg(long)]
    no_remote: bool,
}

fn parse_mapping(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((prefix, dir)) if !prefix.is_empty() && !dir.is_empty() => {
            Ok((prefix.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!("expected PREFIX=DIR, got {raw:?}")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Deref {
            schema,
            source,
            output,
            pretty,
        } => run_deref(&schema, &source, output, pretty),

        Commands::Resolve {
            schema,
            reference,
            scope,
            source,
            pretty,
        } => run_resolve(&schema, &reference, scope, &source, pretty),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_deref(
    schema_source: &str,
    source: &SourceArgs,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<(), u8> {
    let (index, root) = open_session(schema_source, source)?;
    let graph = index.dereference(root).map_err(report_deref)?;
    write_json(&graph.to_value(), output.as_deref(), pretty)
}

fn run_resolve(
    schema_source: &str,
    reference: &str,
    scope: Vec<String>,
    source: &SourceArgs,
    pretty: bool,
) -> Result<(), u8> {
    let (index, root) = open_session(schema_source, source)?;

    let Some(location) = index.location_of(reference).cloned() else {
        eprintln!("Error: no schema node at {}", reference);
        return Err(2);
    };

    let target = if scope.is_empty() {
        index.resolve_reference(&location)
    } else {
        let root_uri = index
            .document_uri(root)
            .map(|u| u.to_string())
            .unwrap_or_default();
        let mut path = ScopePath::new(root_uri);
        for step in scope {
            path.push(step);
        }
        index.resolve_dynamic_reference(&location, &path)
    }
    .map_err(report_deref)?;

    let out = json!({
        "uri": target.uri.as_str(),
        "schema": target.value,
    });
    write_json(&out, None, pretty)
}

/// Load the root schema and index everything it references.
fn open_session(schema_source: &str, source: &SourceArgs) -> Result<(SchemaIndex, DocumentId), u8> {
    let (document, location) = load_root(schema_source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let mut options = DerefOptions::new();
    if let Some(base) = &source.base_uri {
        options = options.base_uri(base.clone());
    }
    let base = source.base_uri.clone().unwrap_or(location);

    let store = Arc::new(Store::new(build_retriever(source)));
    let mut index = SchemaIndex::new(store, options);
    let root = index
        .add_root_schema(document, Some(&base))
        .map_err(report_deref)?;
    Ok((index, root))
}

/// Root document and the URI it was found at.
fn load_root(schema_source: &str) -> Result<(Value, String), RetrieveError> {
    if is_url(schema_source) {
        let document = load_url(schema_source)?;
        return Ok((document, schema_source.to_string()));
    }
    let path = Path::new(schema_source);
    let document = load_schema(path)?;
    Ok((document, file_uri(path)?.to_string()))
}

#[cfg(feature = "remote")]
fn load_url(url: &str) -> Result<Value, RetrieveError> {
    schema_deref::load_schema_url(url)
}

#[cfg(not(feature = "remote"))]
fn load_url(url: &str) -> Result<Value, RetrieveError> {
    Err(RetrieveError::Unsupported {
        uri: url.to_string(),
    })
}

fn build_retriever(source: &SourceArgs) -> ChainRetriever {
    let mut files = FileRetriever::new();
    for (prefix, dir) in &source.mappings {
        files = files.map_prefix(prefix.clone(), dir.clone());
    }
    let chain = ChainRetriever::new().push(files);
    if source.no_remote {
        return chain;
    }
    with_http(chain)
}

#[cfg(feature = "remote")]
fn with_http(chain: ChainRetriever) -> ChainRetriever {
    chain.push(schema_deref::HttpRetriever)
}

#[cfg(not(feature = "remote"))]
fn with_http(chain: ChainRetriever) -> ChainRetriever {
    chain
}

fn report_deref(e: DerefError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn write_json(value: &Value, output: Option<&Path>, pretty: bool) -> Result<(), u8> {
    let json_output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(3);
    }

    let result = lint(path, strict);

    if format == "json" {
        let text = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", text);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}

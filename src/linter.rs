//! Schema linting - static analysis of schema files.
//!
//! Each file is indexed together with every document it references and
//! checked for:
//! - JSON syntax errors
//! - References that resolve to nothing
//! - URIs claimed by two different schemas
//! - Referenced documents that cannot be retrieved
//! - Reference cycles that cannot be dereferenced
//! - `$dynamicRef` targets without a matching `$dynamicAnchor`

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::DerefError;
use crate::index::SchemaIndex;
use crate::indexer::Reference;
use crate::loader::{file_uri, load_schema, FileRetriever};
use crate::types::{RefKeyword, DYNAMIC_ANCHOR, ID};
use crate::uri;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON Pointer to the offending node (e.g., "/properties/id")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, warnings are treated as errors.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let results: Vec<FileResult> = files.iter().map(|file| lint_file(file, path)).collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single schema file.
///
/// References are resolved against the file's `$id` when it has one, with
/// the `$id` directory mapped onto the file's directory, so sibling files
/// are found locally. Without `$id` the file's own `file://` URI is used.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let mut diagnostics = Vec::new();

    match load_schema(file) {
        Ok(schema) => check_schema(file, schema, &mut diagnostics),
        Err(e) => diagnostics.push(diagnostic(
            Severity::Error,
            "E001",
            file,
            "/",
            format!("syntax error: {}", e),
        )),
    }

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics,
    }
}

fn check_schema(file: &Path, schema: Value, diagnostics: &mut Vec<Diagnostic>) {
    let base = match file_uri(file) {
        Ok(base) => base,
        Err(e) => {
            diagnostics.push(diagnostic(Severity::Error, "E004", file, "/", e.to_string()));
            return;
        }
    };

    let mut retriever = FileRetriever::new();
    if let Some(id_dir) = id_directory(&schema) {
        let file_dir = file.parent().unwrap_or(Path::new("."));
        retriever = retriever.map_prefix(id_dir.as_str(), file_dir);
    }

    let mut index = SchemaIndex::with_retriever(retriever);
    let root = match index.add_root_schema(schema, Some(base.as_str())) {
        Ok(root) => root,
        Err(e) => {
            diagnostics.push(from_error(file, "/", &e));
            return;
        }
    };

    let mut references: Vec<&Reference> = index
        .references()
        .filter(|r| r.location.document == root)
        .collect();
    references.sort_by(|a, b| a.location.pointer.cmp(&b.location.pointer));

    let mut broken = false;
    for reference in references {
        let path = pointer_or_root(&reference.location.pointer);
        match index.resolve_reference(&reference.location) {
            Ok(target) => {
                if reference.keyword == RefKeyword::DynamicRef
                    && !uri::is_pointer_fragment(reference.target.fragment().unwrap_or_default())
                    && target.value.get(DYNAMIC_ANCHOR).is_none()
                {
                    diagnostics.push(diagnostic(
                        Severity::Warning,
                        "W001",
                        file,
                        path,
                        format!(
                            "{} {} targets {}, which declares no {}",
                            RefKeyword::DynamicRef.as_str(),
                            reference.raw,
                            target.uri,
                            DYNAMIC_ANCHOR
                        ),
                    ));
                }
            }
            Err(e) => {
                broken = true;
                diagnostics.push(from_error(file, path, &e));
            }
        }
    }

    // Dereferencing only adds information once every reference resolves.
    if !broken {
        if let Err(e) = index.dereference(root) {
            diagnostics.push(from_error(file, "/", &e));
        }
    }
}

/// Directory part of the schema's absolute `$id`, if it has one.
fn id_directory(schema: &Value) -> Option<Url> {
    let id = schema.get(ID)?.as_str()?;
    let url = Url::parse(id).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    url.join(".").ok()
}

fn pointer_or_root(pointer: &str) -> &str {
    if pointer.is_empty() {
        "/"
    } else {
        pointer
    }
}

fn from_error(file: &Path, path: &str, error: &DerefError) -> Diagnostic {
    let code = match error {
        DerefError::InvalidJson { .. } => "E001",
        DerefError::UnresolvedReference { .. } | DerefError::InvalidUri { .. } => "E002",
        DerefError::AmbiguousIdentity { .. } => "E003",
        DerefError::Retrieval { .. } => "E004",
        DerefError::IndirectCycle { .. } | DerefError::ReferenceCycle { .. } => "E005",
    };
    diagnostic(Severity::Error, code, file, path, error.to_string())
}

fn diagnostic(
    severity: Severity,
    code: &str,
    file: &Path,
    path: &str,
    message: String,
) -> Diagnostic {
    Diagnostic {
        severity,
        code: code.to_string(),
        file: file.to_path_buf(),
        path: path.to_string(),
        message,
    }
}

/// Collect all .json files in a path (file or directory).
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}

//! CLI integration tests for schema-deref binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("schema-deref"))
}

// Helper to create a temp schema file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn stdout_json(assert: assert_cmd::assert::Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).unwrap()
}

mod deref_command {
    use super::*;

    #[test]
    fn basic_deref() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r##"{
                "type": "object",
                "properties": {
                    "id": { "$ref": "#/$defs/id" }
                },
                "$defs": { "id": { "type": "string", "minLength": 1 } }
            }"##,
        );

        let out = stdout_json(
            cmd()
                .args(["deref", schema.to_str().unwrap()])
                .assert()
                .success(),
        );
        assert_eq!(
            out["properties"]["id"],
            json!({ "type": "string", "minLength": 1 })
        );
    }

    #[test]
    fn deref_with_pretty() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{"type":"object"}"#);

        cmd()
            .args(["deref", schema.to_str().unwrap(), "--pretty"])
            .assert()
            .success()
            // Pretty output has newlines and indentation
            .stdout(predicate::str::contains("{\n"));
    }

    #[test]
    fn deref_with_output_file() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{"type":"object"}"#);
        let output = dir.path().join("out.json");

        cmd()
            .args([
                "deref",
                schema.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_empty());

        let written: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written, json!({ "type": "object" }));
    }

    #[test]
    fn deref_self_reference_prints_back_reference() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "tree.json",
            r##"{ "type": "object", "properties": { "child": { "$ref": "#" } } }"##,
        );

        cmd()
            .args(["deref", schema.to_str().unwrap(), "--base-uri", "urn:tree"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r##""child":{"$ref":"urn:tree#"}"##));
    }

    #[test]
    fn deref_sibling_file() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "types.json",
            r#"{ "$defs": { "price": { "type": "integer", "minimum": 0 } } }"#,
        );
        let schema = write_temp_file(
            &dir,
            "order.json",
            r##"{ "properties": { "total": { "$ref": "types.json#/$defs/price" } } }"##,
        );

        let out = stdout_json(
            cmd()
                .args(["deref", schema.to_str().unwrap(), "--no-remote"])
                .assert()
                .success(),
        );
        assert_eq!(
            out["properties"]["total"],
            json!({ "type": "integer", "minimum": 0 })
        );
    }

    #[test]
    fn deref_maps_prefix_to_directory() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "types.json",
            r#"{ "$id": "https://schemas.example.com/types.json", "$defs": { "sku": { "type": "string" } } }"#,
        );
        let schema = write_temp_file(
            &dir,
            "order.json",
            r##"{
                "$id": "https://schemas.example.com/order.json",
                "properties": { "sku": { "$ref": "types.json#/$defs/sku", "description": "Stock unit" } }
            }"##,
        );
        let mapping = format!("https://schemas.example.com/={}", dir.path().display());

        let out = stdout_json(
            cmd()
                .args([
                    "deref",
                    schema.to_str().unwrap(),
                    "--map",
                    &mapping,
                    "--no-remote",
                ])
                .assert()
                .success(),
        );
        assert_eq!(
            out["properties"]["sku"],
            json!({ "description": "Stock unit", "type": "string" })
        );
    }

    #[test]
    fn unmapped_remote_reference_fails_offline() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{ "items": { "$ref": "https://schemas.example.com/missing.json" } }"#,
        );

        cmd()
            .args(["deref", schema.to_str().unwrap(), "--no-remote"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("https://schemas.example.com/missing.json"));
    }

    #[test]
    fn preserves_data_keywords() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r##"{ "const": { "$ref": "#/nowhere" }, "default": { "$ref": "#/nowhere" } }"##,
        );

        let out = stdout_json(
            cmd()
                .args(["deref", schema.to_str().unwrap()])
                .assert()
                .success(),
        );
        assert_eq!(out["const"], json!({ "$ref": "#/nowhere" }));
        assert_eq!(out["default"], json!({ "$ref": "#/nowhere" }));
    }
}

mod resolve_command {
    use super::*;

    fn tree_fixture(dir: &TempDir) -> std::path::PathBuf {
        write_temp_file(
            dir,
            "tree.json",
            r##"{
                "$id": "https://example.com/tree.json",
                "$dynamicAnchor": "node",
                "type": "object",
                "properties": {
                    "children": { "type": "array", "items": { "$dynamicRef": "#node" } }
                }
            }"##,
        );
        write_temp_file(
            dir,
            "strict-tree.json",
            r##"{
                "$id": "https://example.com/strict-tree.json",
                "$dynamicAnchor": "node",
                "required": ["data"],
                "properties": { "tree": { "$ref": "tree.json" } }
            }"##,
        )
    }

    #[test]
    fn static_resolution() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r##"{
                "properties": { "a": { "$ref": "#/$defs/a" } },
                "$defs": { "a": { "type": "null" } }
            }"##,
        );

        let out = stdout_json(
            cmd()
                .args([
                    "resolve",
                    schema.to_str().unwrap(),
                    "urn:x#/properties/a",
                    "--base-uri",
                    "urn:x",
                ])
                .assert()
                .success(),
        );
        assert_eq!(out["uri"], "urn:x#/$defs/a");
        assert_eq!(out["schema"], json!({ "type": "null" }));
    }

    #[test]
    fn dynamic_reference_without_scope_is_static() {
        let dir = TempDir::new().unwrap();
        let schema = tree_fixture(&dir);
        let mapping = format!("https://example.com/={}", dir.path().display());

        let out = stdout_json(
            cmd()
                .args([
                    "resolve",
                    schema.to_str().unwrap(),
                    "https://example.com/tree.json#/properties/children/items",
                    "--map",
                    &mapping,
                    "--no-remote",
                ])
                .assert()
                .success(),
        );
        assert_eq!(out["uri"], "https://example.com/tree.json#");
    }

    #[test]
    fn dynamic_reference_follows_scope() {
        let dir = TempDir::new().unwrap();
        let schema = tree_fixture(&dir);
        let mapping = format!("https://example.com/={}", dir.path().display());

        let out = stdout_json(
            cmd()
                .args([
                    "resolve",
                    schema.to_str().unwrap(),
                    "https://example.com/tree.json#/properties/children/items",
                    "--map",
                    &mapping,
                    "--no-remote",
                    "--scope",
                    "properties",
                    "tree",
                    "properties",
                    "children",
                    "items",
                ])
                .assert()
                .success(),
        );
        assert!(out["uri"].as_str().unwrap().ends_with("strict-tree.json#"));
        assert_eq!(out["schema"]["required"], json!(["data"]));
    }

    #[test]
    fn unknown_reference_uri() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{"type":"object"}"#);

        cmd()
            .args([
                "resolve",
                schema.to_str().unwrap(),
                "urn:x#/properties/missing",
                "--base-uri",
                "urn:x",
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("no schema node"));
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn file_not_found() {
        cmd()
            .args(["deref", "/nonexistent/schema.json"])
            .assert()
            .code(3)
            .stderr(
                predicate::str::contains("not found").or(predicate::str::contains("No such file")),
            );
    }

    #[test]
    fn invalid_json_schema() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "bad.json", r#"{ not valid json"#);

        cmd()
            .args(["deref", schema.to_str().unwrap()])
            .assert()
            .code(2);
    }

    #[test]
    fn unresolved_reference() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r##"{ "items": { "$ref": "#/$defs/gone" } }"##,
        );

        cmd()
            .args(["deref", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unresolved reference"))
            .stderr(predicate::str::contains("#/$defs/gone"));
    }

    #[test]
    fn duplicate_id() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{ "$defs": { "a": { "$id": "urn:dup" }, "b": { "$id": "urn:dup" } } }"#,
        );

        cmd()
            .args(["deref", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("ambiguous identity"))
            .stderr(predicate::str::contains("urn:dup"));
    }

    #[test]
    fn indirect_cycle() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r##"{
                "$defs": {
                    "a": { "$ref": "#/$defs/b", "title": "a" },
                    "b": { "$ref": "#/$defs/a", "title": "b" }
                }
            }"##,
        );

        cmd()
            .args(["deref", schema.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("indirect reference cycle"));
    }

    #[test]
    fn invalid_mapping_flag() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", r#"{}"#);

        cmd()
            .args(["deref", schema.to_str().unwrap(), "--map", "no-equals-sign"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("PREFIX=DIR"));
    }
}

mod lint_command {
    use super::*;

    #[test]
    fn clean_directory_passes() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "a.json", r#"{"type": "object"}"#);
        write_temp_file(&dir, "b.json", r#"{"items": {"$ref": "a.json"}}"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 files checked, all passed"));
    }

    #[test]
    fn broken_reference_fails() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "schema.json",
            r##"{"properties": {"a": {"$ref": "#/$defs/missing"}}}"##,
        );

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("E002"));
    }

    #[test]
    fn json_format() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "bad.json", "{ nope");

        let assert = cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--format", "json"])
            .assert()
            .code(1);
        let out = stdout_json(assert);
        assert_eq!(out["files_checked"], 1);
        assert_eq!(out["results"][0]["status"], "error");
        assert_eq!(out["results"][0]["diagnostics"][0]["code"], "E001");
    }

    #[test]
    fn strict_fails_on_warnings() {
        let dir = TempDir::new().unwrap();
        write_temp_file(
            &dir,
            "schema.json",
            r##"{"$defs": {"n": {"$anchor": "n"}}, "items": {"$dynamicRef": "#n"}}"##,
        );

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .success();
        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--strict"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("W001"));
    }

    #[test]
    fn quiet_hides_passing_files() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "fine.json", r#"{"type": "string"}"#);

        cmd()
            .args(["lint", dir.path().to_str().unwrap(), "--quiet"])
            .assert()
            .success()
            .stdout(predicate::str::contains("fine.json").not());
    }

    #[test]
    fn missing_path() {
        cmd()
            .args(["lint", "/nonexistent/schemas"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("path not found"));
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("dereference JSON Schema references"));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("schema-deref"));
    }

    #[test]
    fn deref_help() {
        cmd()
            .args(["deref", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--base-uri"))
            .stdout(predicate::str::contains("--map"))
            .stdout(predicate::str::contains("--no-remote"));
    }

    #[test]
    fn missing_schema_path() {
        cmd().arg("deref").assert().failure();
    }
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;

    #[test]
    fn deref_fetches_http_reference() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/types.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"$defs": {"email": {"type": "string", "format": "email"}}}"#)
            .expect(1)
            .create();

        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            &format!(
                r#"{{"properties": {{
                    "from": {{"$ref": "{url}/types.json#/$defs/email"}},
                    "to": {{"$ref": "{url}/types.json#/$defs/email"}}
                }}}}"#,
                url = server.url()
            ),
        );

        let out = stdout_json(
            cmd()
                .args(["deref", schema.to_str().unwrap()])
                .assert()
                .success(),
        );
        assert_eq!(out["properties"]["from"]["format"], "email");
        assert_eq!(out["properties"]["to"]["format"], "email");
        mock.assert();
    }

    #[test]
    fn deref_root_from_url() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/root.json")
            .with_status(200)
            .with_body(r##"{"items": {"$ref": "#/$defs/x"}, "$defs": {"x": {"type": "null"}}}"##)
            .create();

        let out = stdout_json(
            cmd()
                .args(["deref", &format!("{}/root.json", server.url())])
                .assert()
                .success(),
        );
        assert_eq!(out["items"], json!({ "type": "null" }));
    }

    #[test]
    fn http_404_is_io_error() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/gone.json").with_status(404).create();

        cmd()
            .args(["deref", &format!("{}/gone.json", server.url())])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("failed to fetch"));
    }

    #[test]
    fn no_remote_skips_http() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/types.json").expect(0).create();

        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            &format!(r#"{{"items": {{"$ref": "{}/types.json"}}}}"#, server.url()),
        );

        cmd()
            .args(["deref", schema.to_str().unwrap(), "--no-remote"])
            .assert()
            .code(3);
        mock.assert();
    }
}

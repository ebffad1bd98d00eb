mod common;

use common::{zip_bytes, CommandOutput, TestContext};
use httpmock::prelude::*;
use serde_json::json;

fn against(ctx: &TestContext, server: &MockServer, args: &[&str]) -> CommandOutput {
    ctx.cmd()
        .env("MODCTL_MARKETPLACE_URL", server.base_url())
        .env("MODCTL_API_TOKEN", "test-token")
        .args(args)
        .output()
        .expect("Failed to run modctl")
        .into()
}

#[test]
fn test_list_merges_installed_state() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/marketplace/modules")
            .header("authorization", "Bearer test-token");
        then.status(200).json_body(json!({
            "modules": [
                {"id": 1, "name": "Payments", "version": "2.0.0", "description": "Online payments"},
                {"id": 2, "name": "Reports", "version": "1.0.0"}
            ]
        }));
    });
    std::fs::write(
        &ctx.config_path,
        json!({
            "modules": {
                "Payments": {
                    "name": "Payments",
                    "version": "1.0.0",
                    "installed": true,
                    "enabled": true,
                    "installed_at": "2024-01-01T00:00:00Z",
                    "updated_at": "2024-01-01T00:00:00Z"
                }
            }
        })
        .to_string(),
    )
    .expect("Failed to write config");

    let output = against(&ctx, &server, &["list", "--json"]);
    output.assert_success();
    let listings: serde_json::Value =
        serde_json::from_str(&output.stdout).expect("Output was not valid JSON");
    assert_eq!(listings[0]["name"], "Payments");
    assert_eq!(listings[0]["update_available"], true);
    assert_eq!(listings[1]["installed"], false);

    against(&ctx, &server, &["list"])
        .assert_success()
        .assert_stdout_contains("Payments (v2.0.0) [installed v1.0.0, update available]");
}

#[test]
fn test_list_reports_rejected_token() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules");
        then.status(401).json_body(json!({"error": "invalid_token"}));
    });

    against(&ctx, &server, &["list"])
        .assert_failure()
        .assert_stderr_contains("invalid_token");
}

#[test]
#[cfg(unix)]
fn test_install_downloads_and_enables_module() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/Payments");
        then.status(200).json_body(json!({
            "name": "Payments",
            "version": "2.0.0",
            "extensions": {"curl": true},
            "deleted_files": []
        }));
    });
    let download = server.mock(|when, then| {
        when.method(GET)
            .path("/api/marketplace/modules/file/Payments")
            .query_param("version", "2.0.0");
        then.status(200)
            .body(zip_bytes(&[("Payments/module.json", r#"{"version": "2.0.0"}"#)]));
    });

    against(&ctx, &server, &["install", "Payments", "--yes"])
        .assert_success()
        .assert_stdout_contains("✅ curl")
        .assert_stdout_contains("Payments v2.0.0 installed and enabled");

    download.assert();
    assert!(ctx.module_dir("Payments").join("module.json").is_file());
    assert_eq!(ctx.read_config()["modules"]["Payments"]["version"], "2.0.0");

    // Second run finds nothing newer
    against(&ctx, &server, &["install", "Payments", "--yes"])
        .assert_success()
        .assert_stdout_contains("Payments is up to date");
    download.assert_hits(1);
}

#[test]
fn test_install_withheld_for_missing_extension() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/Payments");
        then.status(200).json_body(json!({
            "name": "Payments",
            "version": "2.0.0",
            "extensions": {"curl": true, "imagick": false}
        }));
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/file/Payments");
        then.status(200).body("unused");
    });

    let output = against(&ctx, &server, &["install", "Payments", "--yes"]);
    output
        .assert_failure()
        .assert_stdout_contains("❌ imagick")
        .assert_stderr_contains("imagick");

    download.assert_hits(0);
    assert!(!ctx.module_dir("Payments").exists());
}

#[test]
fn test_install_halts_when_download_is_refused() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/Payments");
        then.status(200)
            .json_body(json!({"name": "Payments", "version": "2.0.0"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/file/Payments");
        then.status(404)
            .json_body(json!({"message": "Not Found", "code": 404}));
    });

    against(&ctx, &server, &["install", "Payments", "--yes"])
        .assert_failure()
        .assert_stderr_contains("failed while downloading")
        .assert_stderr_contains("Not Found");
    assert!(!ctx.config_path.exists());
}

#[test]
fn test_install_halts_when_metadata_is_rejected() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/Payments");
        then.status(401).json_body(json!({"error": "invalid_token"}));
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/api/marketplace/modules/file/Payments");
        then.status(200).body("unused");
    });

    against(&ctx, &server, &["install", "Payments", "--yes"])
        .assert_failure()
        .assert_stderr_contains("failed while fetching metadata")
        .assert_stderr_contains("invalid_token");
    download.assert_hits(0);
    assert!(!ctx.config_path.exists());
}

#[test]
fn test_install_halts_when_marketplace_is_unreachable() {
    let ctx = TestContext::new();

    let output: CommandOutput = ctx
        .cmd()
        .env("MODCTL_MARKETPLACE_URL", "http://127.0.0.1:9")
        .env("MODCTL_API_TOKEN", "test-token")
        .args(["install", "Payments", "--yes"])
        .output()
        .expect("Failed to run modctl")
        .into();

    output
        .assert_failure()
        .assert_stderr_contains("failed while fetching metadata");
    assert!(!ctx.module_dir("Payments").exists());
}

#[test]
fn test_token_set_validates_before_saving() {
    let ctx = TestContext::new();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/marketplace/ping")
            .header("authorization", "Bearer good-token");
        then.status(200).json_body(json!({"success": true}));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/api/marketplace/ping")
            .header("authorization", "Bearer bad-token");
        then.status(401).json_body(json!({"error": "invalid_token"}));
    });

    against(&ctx, &server, &["token", "set", "bad-token"])
        .assert_failure()
        .assert_stderr_contains("invalid_token");
    assert!(!ctx.config_path.exists());

    against(&ctx, &server, &["token", "set", "good-token"])
        .assert_success()
        .assert_stdout_contains("Token saved");
    assert_eq!(ctx.read_config()["settings"]["api_token"], "good-token");

    against(&ctx, &server, &["token", "check", "good-token"])
        .assert_success()
        .assert_stdout_contains("Token is valid");
}

use std::process::{Child, Command};
use std::time::Duration;

/// Helper to find a free port
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Helper to wait for the service to be ready
fn wait_for_service(base_url: &str, timeout: Duration) -> bool {
    let client = reqwest::blocking::Client::new();
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if client.get(format!("{}/status", base_url)).send().is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}

/// Start the service against a warehouse address nothing listens on.
fn spawn_service(port: u16, environment: &str) -> Child {
    let dead_warehouse = format!("http://127.0.0.1:{}", free_port());
    Command::new(env!("CARGO_BIN_EXE_velocity-service"))
        .args(["--port", &port.to_string()])
        .env("BIGQUERY_PROJECT_ID", "acme-test")
        .env("BIGQUERY_ACCESS_TOKEN", "test-token")
        .env("BIGQUERY_API_BASE", dead_warehouse)
        .env("VELOCITY_ENV", environment)
        .env_remove("BIGQUERY_SERVICE_ACCOUNT_KEY")
        .spawn()
        .expect("Failed to start velocity-service")
}

#[test]
fn test_unreachable_warehouse_without_cache() {
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{}", port);
    let mut service = spawn_service(port, "production");

    assert!(
        wait_for_service(&base_url, Duration::from_secs(5)),
        "Service failed to start"
    );

    let client = reqwest::blocking::Client::new();

    // 1. Status before any traffic
    let status: serde_json::Value = client
        .get(format!("{}/status", base_url))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(status["table"], "acme-test.hubspot.company");
    assert_eq!(status["cache"]["populated"], false);

    // 2. Metrics fail with nothing cached
    let resp = client.get(format!("{}/metrics", base_url)).send().unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Data source error"));
    assert!(body.get("details").is_none());

    // 3. Raw mode fails the same way
    let resp = client
        .get(format!("{}/metrics?raw=true", base_url))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);

    service.kill().ok();
}

#[test]
fn test_development_mode_exposes_details() {
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{}", port);
    let mut service = spawn_service(port, "development");

    assert!(
        wait_for_service(&base_url, Duration::from_secs(5)),
        "Service failed to start"
    );

    let resp = reqwest::blocking::get(format!("{}/metrics?refresh=true", base_url)).unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let body: serde_json::Value = resp.json().unwrap();
    assert!(body["details"].as_str().is_some());

    service.kill().ok();
}

#[test]
fn test_startup_fails_without_project() {
    let output = Command::new(env!("CARGO_BIN_EXE_velocity-service"))
        .args(["--port", &free_port().to_string()])
        .env_remove("BIGQUERY_PROJECT_ID")
        .env_remove("VELOCITY_CONFIG")
        .env("BIGQUERY_ACCESS_TOKEN", "test-token")
        .output()
        .expect("Failed to run velocity-service");
    assert!(!output.status.success());
}

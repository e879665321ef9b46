//! HTTP server tests.
//!
//! Each test starts `run_server` on a free port against a fresh database
//! and talks to it with `reqwest`.

use serde_json::Value;
use singularity::config::Config;
use singularity::server::run_server;
use tempfile::TempDir;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server(tmp: &TempDir) -> String {
    let port = find_free_port();
    let mut cfg = Config::minimal(tmp.path().join("sng.sqlite"));
    cfg.server.bind = format!("127.0.0.1:{}", port);

    tokio::spawn(async move {
        run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

fn report(host: &str, status: &str) -> String {
    format!(
        "--- !ruby/object:Puppet::Transaction::Report
  host: {host}
  time: 2024-03-01 10:00:00 +00:00
  status: {status}
  metrics:
    resources: !ruby/object:Puppet::Util::Metric
      values:
        - - total
          - Total
          - 4
        - - changed
          - Changed
          - 2
"
    )
}

async fn upload(client: &reqwest::Client, base: &str, body: String) -> reqwest::Response {
    client
        .post(format!("{}/upload", base))
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_schema_version() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["schema_version"], 3);
}

#[tokio::test]
async fn test_upload_then_counts_and_reports() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base, report("web01.example.com", "unchanged")).await;
    assert_eq!(resp.status(), 200);
    let first: Value = resp.json().await.unwrap();
    assert_eq!(first["host"], "web01.example.com");
    assert_eq!(first["status"], "unchanged");
    assert_eq!(first["new_report"], true);
    assert_eq!(first["new_node"], true);

    let resp = upload(&client, &base, report("web01.example.com", "unchanged")).await;
    let second: Value = resp.json().await.unwrap();
    assert_eq!(second["new_report"], false);
    assert_eq!(second["file_handle"], first["report_id"]);

    upload(&client, &base, report("db01.example.com", "failed")).await;

    let counts: Value = client
        .get(format!("{}/counts", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(counts["all"], 2);
    assert_eq!(counts["unchanged"], 1);
    assert_eq!(counts["failed"], 1);
    assert_eq!(counts["changed"], 0);

    let listing: Value = client
        .get(format!("{}/reports?host=web01.example.com", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["reports"].as_array().unwrap().len(), 2);

    let listing: Value = client
        .get(format!("{}/reports?status=failed", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rows = listing["reports"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["host"], "db01.example.com");
}

#[tokio::test]
async fn test_fetch_report() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let stored: Value = upload(&client, &base, report("web01.example.com", "changed"))
        .await
        .json()
        .await
        .unwrap();

    let resp = client
        .get(format!("{}/reports/{}", base, stored["report_id"]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["host"], "web01.example.com");
    assert_eq!(body["status"], "changed");
    assert_eq!(body["resources_total"], 4);
    assert_eq!(body["payload_encoding"], "zstd+base64");
    assert_eq!(body["payload_sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_malformed_upload_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = upload(&client, &base, "--- \n  status: changed\n".to_string()).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "malformed_report");

    let counts: Value = client
        .get(format!("{}/counts", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(counts["all"], 0);
}

#[tokio::test]
async fn test_missing_report_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let resp = reqwest::get(format!("{}/reports/42", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

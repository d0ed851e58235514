//! HTTP surface tests over an in-memory router.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::util::ServiceExt;

use gavel_core::crypto::{LedgerSigner, SignerConfig};
use gavel_core::ledger::{EntryDraft, Ledger, LedgerOptions};
use gavel_daemon::{router, AppState};

fn seeded_ledger(dir: &Path, entries: usize) {
    let signer = LedgerSigner::open(dir.join("keys"), &SignerConfig::default()).unwrap();
    let ledger = Ledger::open(dir.join("ledger"), signer, &LedgerOptions::default()).unwrap();
    for i in 0..entries {
        ledger
            .append(EntryDraft::new(
                "s-1",
                "Strategist",
                format!("action_{i}"),
                "ab".repeat(32),
                "sha256:cfg",
            ))
            .unwrap();
    }
}

fn state(dir: &Path) -> Arc<AppState> {
    Arc::new(AppState {
        ledger_dir: dir.join("ledger"),
        reports_dir: dir.join("reports"),
        orchestrator: None,
    })
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn health_reports_paths() {
    let dir = TempDir::new().unwrap();
    seeded_ledger(dir.path(), 1);

    let (status, body) = get_json(router(state(dir.path())), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["ledger_path"].as_str().unwrap().contains("ledger"));
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn verify_endpoint_walks_ledger_and_writes_report() {
    let dir = TempDir::new().unwrap();
    seeded_ledger(dir.path(), 3);

    let (status, body) = get_json(router(state(dir.path())), "/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["entries"], 3);

    // The report landed in the daemon's own reports directory.
    let reports: Vec<_> = std::fs::read_dir(dir.path().join("reports"))
        .unwrap()
        .collect();
    assert_eq!(reports.len(), 1);

    let (_, listed) = get_json(router(state(dir.path())), "/reports").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["verified"], true);
}

#[tokio::test]
async fn verify_flags_tampered_entry() {
    let dir = TempDir::new().unwrap();
    seeded_ledger(dir.path(), 3);

    let path = dir.path().join("ledger/audit.jsonl");
    let tampered = std::fs::read_to_string(&path)
        .unwrap()
        .replace(&"ab".repeat(32), &"ba".repeat(32));
    std::fs::write(&path, tampered).unwrap();

    let (status, body) = get_json(router(state(dir.path())), "/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], false);
    let details = body["details"].as_array().unwrap();
    assert!(!details.is_empty());
    assert!(details
        .iter()
        .any(|d| d["error"] == "sig_invalid" || d["error"] == "hash_mismatch"));
}

#[tokio::test]
async fn domains_lists_closed_set() {
    let dir = TempDir::new().unwrap();
    let (status, body) = get_json(router(state(dir.path())), "/domains").await;
    assert_eq!(status, StatusCode::OK);
    let labels: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(labels.len(), 9);
    assert!(labels.contains(&"marketing"));
    assert!(labels.contains(&"finance"));
}

#[tokio::test]
async fn run_with_orchestrator_returns_chain_result() {
    use gavel_core::chain::{ChainOptions, Orchestrator};
    use gavel_core::llm::MockLlm;

    let dir = TempDir::new().unwrap();

    // Minimal base: coupling config plus marketing role prompts.
    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    std::fs::write(
        dir.path().join("config/governance_coupling.json"),
        r#"{"signals": {"D13": {"mode": "hard", "iv_max": 0.62, "ird_min": 0.65}}}"#,
    )
    .unwrap();
    let roles = dir.path().join("roles/marketing");
    std::fs::create_dir_all(&roles).unwrap();
    for stem in ["strategist", "analyst", "producer", "courier", "critic"] {
        std::fs::write(roles.join(format!("{stem}_stable.txt")), format!("Role: {stem}."))
            .unwrap();
    }

    let strategist = r#"```S
[{"s_id": "S-1", "title": "Proof first", "audience": "Homeowners",
  "hooks": ["Photos"], "three_step_plan": ["Post", "Reply", "Book"],
  "acceptance_tests": ["3 requests by Day 4"]}]
```"#;
    let analyst = r#"```A
[{"a_id": "A-1", "s_refs": ["S-1"],
  "kpi_table": [{"metric": "booked_jobs", "target": 5, "unit": "count"}],
  "falsifications": ["Under 3 requests by Day 4 means the hook is wrong"], "risks": []}]
```"#;
    let producer = r#"```P
[{"p_id": "P-1", "a_refs": ["A-1"], "spec_type": "copy_block", "body": "Same-week estimates."}]
```"#;
    let courier = r#"```C
[{"day": "D1", "time": "09:00", "channel": "nextdoor", "p_id": "P-1",
  "kpi_target": "3 requests", "owner_action": "Post the thread"}]
```"#;
    let critic = r#"```X
[{"x_id": "X-1", "refs": {"s": ["S-1"], "a": ["A-1"], "p": ["P-1"]},
  "issue": "No weekend owner", "fix": "Assign the crew lead", "severity": "low",
  "proof_scores": {"compliance": 80, "clarity": 85, "proof": 70, "cta": 75, "tone": 82}}]
```"#;
    let llm = MockLlm::from_responses([
        strategist, analyst, "NONE", producer, "NONE", courier, critic,
    ]);
    let orchestrator =
        Orchestrator::new(Box::new(llm), ChainOptions::rooted(dir.path().to_path_buf())).unwrap();

    let state = Arc::new(AppState {
        ledger_dir: dir.path().join("logs/ledger"),
        reports_dir: dir.path().join("reports"),
        orchestrator: Some(Arc::new(orchestrator)),
    });

    let request = Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"objective": "Book 5 local jobs in 7 days", "domain": "marketing"}"#,
        ))
        .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["strategist"].as_str().unwrap().contains("S-1"));
    assert!(body["results"]["config_hash"].as_str().unwrap().starts_with("sha256:"));
    assert_eq!(body["results"]["errors"].as_array().unwrap().len(), 0);

    // The same daemon can then verify the ledger it just grew.
    let (_, verify_body) = get_json(router(state), "/verify").await;
    assert_eq!(verify_body["verified"], true);
}

#[tokio::test]
async fn run_without_orchestrator_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"objective": "Book 5 jobs"}"#))
        .unwrap();

    let response = router(state(dir.path())).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

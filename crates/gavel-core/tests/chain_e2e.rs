//! End-to-end chain scenarios over a scripted model.
//!
//! Each test builds a throwaway base directory (coupling config, role
//! shapes, directive files, role prompts), scripts the model responses in
//! call order, runs the chain, and checks the registry, governance, and
//! ledger effects.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use gavel_core::artifact::SpecType;
use gavel_core::chain::{ChainOptions, ChainResult, Orchestrator};
use gavel_core::config::compute_config_hash;
use gavel_core::ledger::LedgerEntry;
use gavel_core::llm::MockLlm;
use gavel_core::verify::{Verifier, VerifyReason};

const COUPLING_JSON: &str = r#"{
    "signals": {
        "D3":  {"mode": "hard", "iv_max": 0.68, "ird_min": 0.55},
        "D13": {"mode": "hard", "iv_max": 0.62, "ird_min": 0.65},
        "D2":  {"mode": "soft"},
        "D20-24": {"mode": "soft"},
        "SECRETS": {"mode": "soft"},
        "FABRICATION": {"mode": "soft"},
        "DOMAIN_MISROUTING": {"mode": "soft"},
        "OBSERVABILITY_GAP": {"mode": "soft"},
        "REDUNDANCY": {"mode": "soft"}
    }
}"#;

const ROLE_SHAPES_JSON: &str = r#"{
    "Producer": {"banned": ["deployment calendar"]},
    "Courier": {"banned": ["new asset draft"]}
}"#;

/// Builds the conventional base directory with configs, protocol files,
/// and marketing role prompts.
fn setup_base(dir: &Path) {
    std::fs::create_dir_all(dir.join("config")).unwrap();
    std::fs::write(dir.join("config/governance_coupling.json"), COUPLING_JSON).unwrap();
    std::fs::write(dir.join("config/role_shapes.json"), ROLE_SHAPES_JSON).unwrap();

    std::fs::create_dir_all(dir.join("protocol")).unwrap();
    for (name, body) in [
        ("00_change_control.md", "Record every kernel change."),
        ("01_core_directives.md", "Truth discipline over style."),
        ("02_execution_addendum.md", "Ground every artifact in the objective."),
        ("03_authority_layer.md", "The operator holds final authority."),
        ("04_taes_evaluation.md", "Weigh logical, practical, probable."),
        ("05_redteam_layer.md", "Attempt to falsify your own output."),
    ] {
        std::fs::write(dir.join("protocol").join(name), body).unwrap();
    }

    let roles = dir.join("roles/marketing");
    std::fs::create_dir_all(&roles).unwrap();
    for (stem, text) in [
        ("strategist", "Role: Strategist. Define positioning, audiences, hooks, a three-step plan."),
        ("analyst", "Role: Analyst. Pressure-test assumptions with numeric KPIs and falsifications."),
        ("producer", "Role: Producer. Create deployable assets tied to analysis ids."),
        ("courier", "Role: Courier. Schedule the declared assets; create nothing new."),
        ("critic", "Role: Critic. Audit with cross-kind references and proof scores."),
    ] {
        std::fs::write(roles.join(format!("{stem}_stable.txt")), text).unwrap();
    }
}

fn orchestrator(base: &Path, responses: Vec<&str>) -> Orchestrator {
    let llm = MockLlm::from_responses(responses);
    Orchestrator::new(Box::new(llm), ChainOptions::rooted(base.to_path_buf())).unwrap()
}

fn ledger_dir(base: &Path) -> PathBuf {
    base.join("logs/ledger")
}

const STRATEGIST_OK: &str = r#"Positioning work below.
```S
[
  {"s_id": "S-1", "title": "Storm-season proof", "audience": "Homeowners within 10 miles",
   "hooks": ["Before and after photos from this week"],
   "three_step_plan": ["Post proof photos", "Reply to every comment within 2 hours", "Offer a same-week estimate"],
   "acceptance_tests": ["3 estimate requests by Day 4"]},
  {"s_id": "S-2", "title": "Neighbor referral loop", "audience": "Past customers on the block",
   "hooks": ["A referral thank-you credit"],
   "three_step_plan": ["Text past customers", "Ask for one tag each", "Track tags in the sheet"],
   "acceptance_tests": ["2 tagged referrals by Day 5"]},
  {"s_id": "S-3", "title": "Same-week urgency", "audience": "Storm-affected streets",
   "hooks": ["Crew on your street this week"],
   "three_step_plan": ["Map affected streets", "Post street-level offers", "Hold two slots for walk-ins"],
   "acceptance_tests": ["Both held slots booked by Day 6"]}
]
```"#;

const ANALYST_OK: &str = r#"```A
[
  {"a_id": "A-1", "s_refs": ["S-1", "S-2", "S-3"],
   "kpi_table": [
     {"metric": "booked_jobs", "target": 5, "unit": "count"},
     {"metric": "estimate_requests", "target": 9, "unit": "count"}
   ],
   "falsifications": ["If estimate requests stay under 3 by Day 4, the proof hook is wrong"],
   "risks": ["Weather clears and urgency drops"]}
]
```"#;

const PRODUCER_OK: &str = r#"```P
[
  {"p_id": "P-1", "a_refs": ["A-1"], "spec_type": "copy_block",
   "body": "Tree down after the storm? We cleared 4 yards on Maple St this week. Same-week estimates, licensed and insured. Send a photo for a fast quote."},
  {"p_id": "P-2", "a_refs": ["A-1"], "spec_type": "api",
   "body": "POST /leads {name, street, photo_url} -> {estimate_slot}; source field tags the channel."}
]
```"#;

const COURIER_OK: &str = r#"```C
[
  {"day": "D1", "time": "08:30", "channel": "nextdoor", "p_id": "P-1", "kpi_target": "3 estimate requests", "owner_action": "Post and pin the thread"},
  {"day": "D2", "time": "09:00", "channel": "facebook", "p_id": "P-1", "kpi_target": "2 shares", "owner_action": "Post to the town group"},
  {"day": "D3", "time": "12:15", "channel": "craigslist", "p_id": "P-1", "kpi_target": "2 calls", "owner_action": "Renew the listing"},
  {"day": "D4", "time": "08:30", "channel": "nextdoor", "p_id": "P-2", "kpi_target": "4 lead submissions", "owner_action": "Link the intake form"},
  {"day": "D5", "time": "10:00", "channel": "facebook", "p_id": "P-2", "kpi_target": "3 lead submissions", "owner_action": "Boost the intake post"},
  {"day": "D6", "time": "09:30", "channel": "nextdoor", "p_id": "P-1", "kpi_target": "2 estimate requests", "owner_action": "Reply to every open comment"},
  {"day": "D7", "time": "11:00", "channel": "facebook", "p_id": "P-2", "kpi_target": "2 booked jobs", "owner_action": "Close out the week with results"}
]
```"#;

const CRITIC_OK: &str = r#"```X
[
  {"x_id": "X-1",
   "refs": {"s": ["S-1"], "a": ["A-1"], "p": ["P-2"], "c": ["P-1"]},
   "issue": "The lead endpoint has no spam screen",
   "fix": "Require a photo upload before booking an estimate slot",
   "severity": "med",
   "proof_scores": {"compliance": 82, "clarity": 88, "proof": 74, "cta": 80, "tone": 86}}
]
```"#;

fn happy_script() -> Vec<&'static str> {
    vec![
        STRATEGIST_OK,
        ANALYST_OK,
        "NONE", // Q&A-1: Producer needs nothing from Analyst.
        PRODUCER_OK,
        "NONE", // Q&A-2: Courier needs nothing from Producer.
        COURIER_OK,
        CRITIC_OK,
    ]
}

fn run_happy(base: &Path) -> (Orchestrator, ChainResult) {
    setup_base(base);
    let orch = orchestrator(base, happy_script());
    let result = orch
        .run_chain(
            "Book 5 local jobs in 7 days for a tree service",
            Some("marketing"),
            None,
        )
        .unwrap();
    (orch, result)
}

#[test]
fn happy_path_marketing() {
    let dir = TempDir::new().unwrap();
    let (orch, result) = run_happy(dir.path());
    let registry = &result.results.registry;

    assert!(result.results.errors.is_empty(), "{:?}", result.results.errors);
    assert!(registry.strategies.len() >= 3);

    // Analyst references every S id.
    let referenced: std::collections::BTreeSet<_> =
        registry.analyses[0].s_refs.iter().cloned().collect();
    assert_eq!(referenced, registry.s_ids());

    // Producer emitted at least two distinct spec types.
    let spec_types: std::collections::BTreeSet<_> = registry
        .productions
        .iter()
        .map(|p| format!("{:?}", p.spec_type))
        .collect();
    assert!(spec_types.len() >= 2);
    assert!(registry.productions.iter().any(|p| p.spec_type == SpecType::CopyBlock));

    // Courier: 7 rows D1-D7, each with a p_id and kpi_target.
    assert_eq!(registry.courier_rows.len(), 7);
    for (index, row) in registry.courier_rows.iter().enumerate() {
        assert_eq!(row.day, format!("D{}", index + 1));
        assert!(registry.p_ids().contains(&row.p_id));
        assert!(!row.kpi_target.is_empty());
    }

    // Critic spans at least 3 kinds.
    assert!(registry.critiques[0].refs.kinds_spanned() >= 3);

    // The frozen fingerprint matches a fresh computation on the same files.
    assert_eq!(result.results.config_hash, compute_config_hash(dir.path()));

    // One ledger entry per role plus the composer.
    let entries = orch.ledger().read_all().unwrap();
    assert_eq!(entries.len(), 6);
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "generate_strategy",
            "validate_strategy",
            "generate_assets",
            "create_schedule",
            "final_review",
            "compose_report",
        ]
    );

    // Every entry of the session carries the same config hash.
    assert!(entries.iter().all(|e| e.config_hash == result.results.config_hash));

    // Independent verification passes.
    let report = Verifier::new(ledger_dir(dir.path())).verify().unwrap();
    assert!(report.verified, "{:?}", report.details);
}

#[test]
fn finance_domain_uses_high_logical_weights() {
    let dir = TempDir::new().unwrap();
    setup_base(dir.path());

    let analyst = r#"```A
[
  {"a_id": "A-1", "s_refs": ["S-1", "S-2", "S-3"],
   "kpi_table": [
     {"metric": "NPV", "target": 82000, "unit": "USD"},
     {"metric": "IRR", "target": 18, "unit": "%"}
   ],
   "falsifications": ["If the discount rate above 12 points turns NPV negative, the round is mispriced"],
   "risks": ["Runway assumptions slip by a quarter"]}
]
```"#;

    let script = vec![
        STRATEGIST_OK,
        analyst,
        "NONE",
        PRODUCER_OK,
        "NONE",
        COURIER_OK,
        CRITIC_OK,
    ];
    let orch = orchestrator(dir.path(), script);
    // Role prompts for finance fall back to the default domain's files.
    let result = orch
        .run_chain("Model $50k seed round ROI with NPV and IRR", Some("finance"), None)
        .unwrap();

    let kpis = &result.results.registry.analyses[0].kpi_table;
    assert!(kpis.iter().any(|k| k.metric == "NPV" && k.unit == "USD"));
    assert!(kpis.iter().any(|k| k.metric == "IRR" && k.unit == "%"));

    let analyst_taes = &result.results.taes["Analyst"];
    assert!((analyst_taes.weights.logical - 0.50).abs() < 1e-9);
    assert!((analyst_taes.weights.practical - 0.35).abs() < 1e-9);
    assert!((analyst_taes.weights.probable - 0.15).abs() < 1e-9);
    assert!(analyst_taes.ird <= 0.5, "ird={}", analyst_taes.ird);
}

#[test]
fn sycophancy_triggers_hard_gate() {
    let dir = TempDir::new().unwrap();
    setup_base(dir.path());

    let flattering = format!(
        "Great question, you're absolutely right to focus here.\n{STRATEGIST_OK}"
    );
    let script = vec![
        flattering.as_str(),
        ANALYST_OK,
        "NONE",
        PRODUCER_OK,
        "NONE",
        COURIER_OK,
        CRITIC_OK,
    ];
    let orch = orchestrator(dir.path(), script);
    let result = orch
        .run_chain("Book 5 local jobs in 7 days", Some("marketing"), None)
        .unwrap();

    let taes = &result.results.taes["Strategist"];
    assert!((taes.iv - 0.62).abs() < 1e-9, "iv={}", taes.iv);
    assert!((taes.ird - 0.65).abs() < 1e-9, "ird={}", taes.ird);

    let governance = &result.results.governance["Strategist"];
    assert_eq!(governance.hard_actions, vec!["D13"]);

    let entries = orch.ledger().read_all().unwrap();
    let strategist_entry = entries
        .iter()
        .find(|e| e.role == "Strategist")
        .expect("strategist entry");
    assert_eq!(
        strategist_entry.hard_actions.as_deref(),
        Some(&["D13".to_string()][..])
    );
}

#[test]
fn courier_undeclared_asset_fails_but_critic_runs() {
    let dir = TempDir::new().unwrap();
    setup_base(dir.path());

    let producer_three = r#"```P
[
  {"p_id": "P-1", "a_refs": ["A-1"], "spec_type": "copy_block", "body": "Proof-first yard cleanup copy for the town board."},
  {"p_id": "P-2", "a_refs": ["A-1"], "spec_type": "api", "body": "POST /leads intake contract for street-level offers."},
  {"p_id": "P-3", "a_refs": ["A-1"], "spec_type": "config", "body": "channel | cadence | owner table for the week."}
]
```"#;
    let courier_bad = r#"```C
[
  {"day": "D1", "time": "08:30", "channel": "nextdoor", "p_id": "P-4", "kpi_target": "3 estimate requests", "owner_action": "Post the thread"}
]
```"#;
    let critic_three_kinds = r#"```X
[
  {"x_id": "X-1",
   "refs": {"s": ["S-1"], "a": ["A-1"], "p": ["P-3"]},
   "issue": "The config table has no owner for the weekend",
   "fix": "Assign the weekend rows to the crew lead",
   "severity": "high",
   "proof_scores": {"compliance": 78, "clarity": 84, "proof": 70, "cta": 76, "tone": 82}}
]
```"#;

    let script = vec![
        STRATEGIST_OK,
        ANALYST_OK,
        "NONE",
        producer_three,
        "NONE",
        courier_bad,
        courier_bad, // strict retry repeats the violation
        critic_three_kinds,
    ];
    let orch = orchestrator(dir.path(), script);
    let result = orch
        .run_chain("Book 5 local jobs in 7 days", Some("marketing"), None)
        .unwrap();

    let courier_error = result
        .results
        .errors
        .iter()
        .find(|e| e.role == "Courier")
        .expect("courier error recorded");
    assert_eq!(courier_error.kind, "role_failure");
    assert!(
        courier_error.message.contains("{P-4}"),
        "message must carry the set-difference: {}",
        courier_error.message
    );

    // The Courier slice stays empty; the Critic still ran.
    assert!(result.results.registry.courier_rows.is_empty());
    assert_eq!(result.results.registry.critiques.len(), 1);

    let entries = orch.ledger().read_all().unwrap();
    assert!(entries
        .iter()
        .any(|e| e.role == "Courier" && e.action == "role_failure"));
    assert!(entries.iter().any(|e| e.action == "final_review"));
}

#[test]
fn modified_entry_fails_verification() {
    let dir = TempDir::new().unwrap();
    let (_orch, _result) = run_happy(dir.path());

    let path = ledger_dir(dir.path()).join("audit.jsonl");
    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = text.lines().map(ToString::to_string).collect();

    // Flip one character inside the stored payload_hash of entry 2.
    let entry: LedgerEntry = serde_json::from_str(&lines[2]).unwrap();
    let tampered_hash = flip_first_char(&entry.payload_hash);
    lines[2] = lines[2].replace(&entry.payload_hash, &tampered_hash);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let report = Verifier::new(ledger_dir(dir.path())).verify().unwrap();
    assert!(!report.verified);
    assert!(report.details.iter().any(|d| d.seq == 2
        && matches!(d.error, VerifyReason::SigInvalid | VerifyReason::HashMismatch)));
}

#[test]
fn forged_append_fails_verification() {
    let dir = TempDir::new().unwrap();
    let (orch, _result) = run_happy(dir.path());
    let entries = orch.ledger().read_all().unwrap();
    let tip = entries.last().unwrap();

    // An attacker with their own key appends a correctly chained entry.
    let attacker_dir = TempDir::new().unwrap();
    let attacker = gavel_core::crypto::LedgerSigner::open(
        attacker_dir.path().join("keys"),
        &gavel_core::crypto::SignerConfig::default(),
    )
    .unwrap();

    let mut forged = tip.clone();
    forged.seq = tip.seq + 1;
    forged.prev_hash = tip.this_hash.clone();
    forged.action = "generate_strategy".to_string();
    forged.signature = attacker.sign(&forged.canonical_bytes());
    forged.this_hash = forged.computed_this_hash();
    forged.signer_key_id = "ed25519:deadbeefdeadbeef".to_string();

    let path = ledger_dir(dir.path()).join("audit.jsonl");
    let mut text = std::fs::read_to_string(&path).unwrap();
    text.push_str(&serde_json::to_string(&forged).unwrap());
    text.push('\n');
    std::fs::write(&path, text).unwrap();

    let report = Verifier::new(ledger_dir(dir.path())).verify().unwrap();
    assert!(!report.verified);
    assert!(report
        .details
        .iter()
        .any(|d| d.seq == forged.seq && d.error == VerifyReason::SigInvalid));
}

#[test]
fn session_artifact_written() {
    let dir = TempDir::new().unwrap();
    let (_orch, result) = run_happy(dir.path());

    let artifact = dir
        .path()
        .join("logs/sessions")
        .join(format!("{}.json", result.results.session_id));
    assert!(artifact.exists());

    let ird_log = dir.path().join("logs/ird_log.csv");
    assert!(ird_log.exists());
    let rows = std::fs::read_to_string(ird_log).unwrap();
    // Header plus one row per graded role.
    assert_eq!(rows.lines().count(), 6);
}

fn flip_first_char(hash: &str) -> String {
    let mut chars: Vec<char> = hash.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::mpsc;
use pocscan::config::HttpConfig;
use pocscan::http::HttpStepExecutor;
use pocscan::interpreter::Interpreter;
use pocscan::models::{ScanSummary, ScanVerdict, Target};
use pocscan::oob::OobCorrelator;
use pocscan::progress::ProgressStore;
use pocscan::rules::load_rules;
use pocscan::scheduler::Scheduler;
use pocscan::sink::{ChannelSink, ResultSink};

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_rule(dir: &Path, name: &str, yaml: &str) {
    std::fs::write(dir.join(name), yaml).unwrap();
}

struct Harness {
    rules_dir: TempDir,
    progress_dir: TempDir,
    correlator: Arc<OobCorrelator>,
    oob_timeout: Duration,
}

impl Harness {
    fn new() -> Self {
        Self {
            rules_dir: TempDir::new().unwrap(),
            progress_dir: TempDir::new().unwrap(),
            correlator: Arc::new(OobCorrelator::new(Some("oob.test".into()))),
            oob_timeout: Duration::from_secs(20),
        }
    }

    async fn run(&self, targets: &[&str], resume_id: &str) -> (ScanSummary, Vec<ScanVerdict>) {
        let http = HttpConfig { retries: 0, timeout_secs: 5, ..Default::default() };
        let executor = Arc::new(HttpStepExecutor::new(&http).unwrap());
        let interpreter = Interpreter::new(executor, self.correlator.clone(), self.oob_timeout);
        let progress = ProgressStore::load(self.progress_dir.path(), resume_id).await.unwrap();
        let scheduler = Scheduler::new(Arc::new(interpreter), Arc::new(progress), 4);

        let rules = load_rules(&[self.rules_dir.path().to_path_buf()]).unwrap();
        let targets: Vec<Target> = targets.iter().map(|t| Target::new(*t)).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn ResultSink> = Arc::new(ChannelSink::new(tx));

        let summary = scheduler.run(&targets, &rules.rules, sink).await.unwrap();
        let mut verdicts = Vec::new();
        while let Ok(v) = rx.try_recv() {
            verdicts.push(v);
        }
        (summary, verdicts)
    }
}

const ADMIN_TOKEN_RULE: &str = r#"
id: admin-token-exposure
info:
  name: Admin token exposed
  severity: high
stages:
  - steps:
      - path: /admin
    condition: status == 200 && body contains "admin_token"
"#;

#[tokio::test]
async fn test_vulnerable_target_yields_single_evidence() {
    let base = spawn_server(Router::new().route("/admin", get(|| async { "welcome admin_token=abc" }))).await;
    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "admin.yaml", ADMIN_TOKEN_RULE);

    let (summary, verdicts) = harness.run(&[&base], "vuln").await;
    assert_eq!(summary.vulnerable, 1);
    assert_eq!(verdicts.len(), 1);
    let verdict = &verdicts[0];
    assert!(verdict.vulnerable);
    assert!(verdict.error.is_none());
    assert_eq!(verdict.evidence.len(), 1);
    assert_eq!(verdict.evidence[0].status, 200);
    assert!(verdict.evidence[0].request.starts_with(&format!("GET {}/admin", base)));
    assert!(verdict.evidence[0].response.contains("admin_token"));
}

#[tokio::test]
async fn test_login_failed_is_not_vulnerable() {
    let base = spawn_server(Router::new().route("/admin", get(|| async { "login failed" }))).await;
    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "admin.yaml", ADMIN_TOKEN_RULE);

    let (summary, verdicts) = harness.run(&[&base], "safe").await;
    assert_eq!(summary.not_vulnerable, 1);
    assert!(!verdicts[0].vulnerable);
    assert!(verdicts[0].error.is_none());
}

#[tokio::test]
async fn test_unreachable_target_is_error_verdict() {
    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "admin.yaml", ADMIN_TOKEN_RULE);

    let (summary, verdicts) = harness.run(&["http://127.0.0.1:1"], "down").await;
    assert_eq!(summary.errors, 1);
    assert!(!verdicts[0].vulnerable);
    assert!(verdicts[0].error.is_some());
}

const OOB_RULE: &str = r#"
id: blind-ssrf
info:
  name: Blind SSRF
  severity: critical
oob_timeout: 2
stages:
  - oob: true
    steps:
      - path: /fetch?host={{oob_host}}
    condition: oob()
"#;

#[tokio::test]
async fn test_oob_never_delivered_resolves_false_at_deadline() {
    let base = spawn_server(Router::new().route("/fetch", get(|| async { "ignored" }))).await;
    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "ssrf.yaml", OOB_RULE);

    let started = Instant::now();
    let (_, verdicts) = harness.run(&[&base], "oob-miss").await;
    let elapsed = started.elapsed();

    assert!(!verdicts[0].vulnerable);
    assert!(verdicts[0].error.is_none());
    assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "{:?}", elapsed);
    assert_eq!(harness.correlator.pending_count(), 0);
}

#[cfg(feature = "listener")]
#[tokio::test]
async fn test_oob_callback_through_listener_confirms() {
    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "ssrf.yaml", OOB_RULE);

    let oob_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let oob_addr = oob_listener.local_addr().unwrap().to_string();
    let cancel = tokio_util::sync::CancellationToken::new();
    let listener_task = pocscan::oob::listener::serve_on(oob_listener, harness.correlator.clone(), cancel.clone());

    // The vulnerable target makes a server-side request to whatever host it is given
    let target = Router::new()
        .route(
            "/fetch",
            get(|State(oob_addr): State<String>, Query(q): Query<HashMap<String, String>>| async move {
                let host = q.get("host").cloned().unwrap_or_default();
                let _ = reqwest::Client::new()
                    .get(format!("http://{}/", oob_addr))
                    .header("host", host)
                    .send()
                    .await;
                "fetched"
            }),
        )
        .with_state(oob_addr);
    let base = spawn_server(target).await;

    let (summary, verdicts) = harness.run(&[&base], "oob-hit").await;
    assert_eq!(summary.vulnerable, 1);
    assert!(verdicts[0].oob_confirmed);
    assert_eq!(verdicts[0].evidence.len(), 2);

    cancel.cancel();
    listener_task.await.unwrap();
}

#[tokio::test]
async fn test_resume_never_reprobes_completed_items() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/admin",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "admin_token"
            }),
        )
        .with_state(hits.clone());
    let base_a = spawn_server(router.clone()).await;
    let base_b = spawn_server(router).await;

    let harness = Harness::new();
    write_rule(harness.rules_dir.path(), "admin.yaml", ADMIN_TOKEN_RULE);
    write_rule(
        harness.rules_dir.path(),
        "admin2.yml",
        &ADMIN_TOKEN_RULE.replace("id: admin-token-exposure", "id: admin-token-exposure-2"),
    );

    // An interrupted run that only got through the first target
    let (_, first) = harness.run(&[&base_a], "resume").await;
    assert_eq!(first.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let (summary, second) = harness.run(&[&base_a, &base_b], "resume").await;
    assert_eq!(summary.skipped, 2);
    assert_eq!(second.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    let keys: BTreeSet<String> = first.iter().chain(second.iter()).map(|v| v.key.clone()).collect();
    assert_eq!(keys.len(), 4);

    // Third run: everything is done
    let (summary, third) = harness.run(&[&base_a, &base_b], "resume").await;
    assert_eq!(summary.skipped, 4);
    assert!(third.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_defective_rule_reports_without_network() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .fallback(|State(hits): State<Arc<AtomicUsize>>| async move {
            hits.fetch_add(1, Ordering::SeqCst);
            "ok"
        })
        .with_state(hits.clone());
    let base = spawn_server(router).await;

    let harness = Harness::new();
    write_rule(
        harness.rules_dir.path(),
        "broken.yaml",
        "id: broken\ninfo: { name: Broken }\nstages:\n  - steps: [{ path: /x }]\n    condition: body contains\n",
    );

    let (summary, verdicts) = harness.run(&[&base], "broken").await;
    assert_eq!(summary.errors, 1);
    assert!(verdicts[0].error.is_some());
    assert_eq!(verdicts[0].rule_id, "broken");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use warden_audit::audit_log::{FileAuditLog, MemoryAuditLog};
use warden_audit::oracle::{Oracle, OracleError, OracleRequest};
use warden_audit::pipeline::AuditPipeline;
use warden_audit::prompt;
use warden_audit::source::{Document, DocumentSource, Task};
use warden_audit::stage::{RetryPolicy, Sampling, Stage};
use warden_core::{Category, Outcome};

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    Fail(OracleError),
    Hang,
}

/// Oracle answering from per-document scripts.
///
/// Scripts are keyed by a string the document text contains. Once a script
/// runs dry the stage's fallback reply is used.
struct Scripted {
    proposer: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    validator: Mutex<HashMap<&'static str, VecDeque<Reply>>>,
    fallback_proposer: Reply,
    fallback_validator: Reply,
    latency: Duration,
    proposer_calls: AtomicUsize,
    validator_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Scripted {
    fn new() -> Self {
        Self {
            proposer: Mutex::new(HashMap::new()),
            validator: Mutex::new(HashMap::new()),
            fallback_proposer: Reply::Text("Issue found.#END#"),
            fallback_validator: Reply::Text("NO"),
            latency: Duration::ZERO,
            proposer_calls: AtomicUsize::new(0),
            validator_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn proposer(self, key: &'static str, replies: Vec<Reply>) -> Self {
        self.proposer.lock().unwrap().insert(key, replies.into());
        self
    }

    fn validator(self, key: &'static str, replies: Vec<Reply>) -> Self {
        self.validator.lock().unwrap().insert(key, replies.into());
        self
    }

    fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn next_reply(&self, request: &OracleRequest<'_>) -> Reply {
        let (scripts, fallback, calls) = if request.system == prompt::validator_system_prompt() {
            (&self.validator, &self.fallback_validator, &self.validator_calls)
        } else {
            (&self.proposer, &self.fallback_proposer, &self.proposer_calls)
        };
        calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|(key, _)| request.prompt.contains(**key))
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| fallback.clone())
    }
}

#[async_trait]
impl Oracle for Scripted {
    async fn call(&self, request: OracleRequest<'_>) -> Result<String, OracleError> {
        let reply = self.next_reply(&request);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        match reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff_unit: Duration::from_millis(100),
        call_timeout: Duration::from_secs(2),
    }
}

fn pipeline(oracle: &Arc<Scripted>, log: &Arc<MemoryAuditLog>, max_attempts: u32) -> AuditPipeline {
    AuditPipeline::new(
        oracle.clone(),
        log.clone(),
        policy(max_attempts),
        Sampling::default(),
    )
}

fn task(name: &str) -> Task {
    Task::new(name, Category::Common, format!("contract {name} {{}}"))
}

fn transport() -> Reply {
    Reply::Fail(OracleError::Transport("connection reset".into()))
}

#[tokio::test(start_paused = true)]
async fn confirmed_issue_is_validated_and_logged() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Vault", vec![Reply::Text("Reentrancy bug found.#END#")])
            .validator("Vault", vec![Reply::Text("Looks correct. YES")]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let report = pipeline(&oracle, &log, 5).run(vec![task("Vault")]).await;

    assert_eq!(report.stats.validated, 1);
    assert_eq!(report.stats.rejected, 0);
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert!(finding.validated);
    assert_eq!(finding.narrative, "Reentrancy bug found.");

    let records = log.records().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].stage, Stage::Proposer);
    assert_eq!(records[0].response, "Reentrancy bug found.");
    assert_eq!(records[1].stage, Stage::Validator);
    assert!(records[1].prompt.contains("Reentrancy bug found."));
}

#[tokio::test(start_paused = true)]
async fn exhausted_proposer_yields_one_error_finding() {
    let oracle = Arc::new(Scripted::new().proposer(
        "Vault",
        vec![Reply::Text("I think there is a bug"); 5],
    ));
    let log = Arc::new(MemoryAuditLog::new());

    let report = pipeline(&oracle, &log, 5).run(vec![task("Vault")]).await;

    assert_eq!(report.stats.tasks, 1);
    assert_eq!(report.stats.validated, 0);
    assert_eq!(report.stats.rejected, 0);
    assert_eq!(report.stats.total, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].outcome(), Outcome::Error);
    assert!(report.findings.is_empty());

    assert_eq!(oracle.proposer_calls.load(Ordering::SeqCst), 5);
    assert_eq!(oracle.validator_calls.load(Ordering::SeqCst), 0);
    assert!(log.records().await.is_empty(), "failed attempts are not logged");
}

#[tokio::test(start_paused = true)]
async fn concurrency_ceiling_holds_and_no_task_is_lost() {
    let oracle = Arc::new(Scripted::new().latency(Duration::from_millis(50)));
    let log = Arc::new(MemoryAuditLog::new());

    let tasks: Vec<Task> = (0..5).map(|i| task(&format!("C{i}"))).collect();
    let report = pipeline(&oracle, &log, 5)
        .with_concurrency(2)
        .run(tasks)
        .await;

    assert_eq!(report.stats.tasks, 5);
    assert_eq!(report.findings.len() + report.errors.len(), 5);
    assert!(oracle.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(oracle.peak.load(Ordering::SeqCst), 2);

    let mut ids: Vec<&str> = report.findings.iter().map(|f| f.reference_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["C0", "C1", "C2", "C3", "C4"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer(
                "Vault",
                vec![transport(), transport(), transport(), Reply::Text("Bug.#END#")],
            )
            .validator("Vault", vec![Reply::Text("YES")]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let start = Instant::now();
    let finding = pipeline(&oracle, &log, 5).process(task("Vault")).await;
    let elapsed = start.elapsed();

    assert!(finding.validated);
    // 100ms + 200ms + 400ms of backoff before the fourth attempt.
    assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    assert_eq!(oracle.proposer_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn oracle_errors_and_bad_shapes_share_one_budget() {
    let oracle = Arc::new(Scripted::new().proposer(
        "Vault",
        vec![
            transport(),
            Reply::Text("missing marker"),
            Reply::Fail(OracleError::RateLimited("429".into())),
            Reply::Text("Too late.#END#"),
        ],
    ));
    let log = Arc::new(MemoryAuditLog::new());

    let finding = pipeline(&oracle, &log, 3).process(task("Vault")).await;

    assert!(finding.is_sentinel());
    assert!(finding.narrative.contains("rate limited"), "{}", finding.narrative);
    assert_eq!(oracle.proposer_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn hanging_call_times_out_and_is_retried() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Vault", vec![Reply::Hang, Reply::Text("Bug.#END#")])
            .validator("Vault", vec![Reply::Text("NO")]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let start = Instant::now();
    let finding = pipeline(&oracle, &log, 5).process(task("Vault")).await;

    assert_eq!(finding.outcome(), Outcome::Rejected);
    assert!(start.elapsed() >= Duration::from_millis(2100));
    assert_eq!(oracle.proposer_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_verdict_is_retried_until_well_formed() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Vault", vec![Reply::Text("Bug.#END#")])
            .validator(
                "Vault",
                vec![
                    Reply::Text("It depends on the caller."),
                    Reply::Text("The answer is yes."),
                    Reply::Text("Confirmed.\nYES\n"),
                ],
            ),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let finding = pipeline(&oracle, &log, 5).process(task("Vault")).await;

    assert!(finding.validated);
    assert_eq!(finding.verdict.as_deref(), Some("Confirmed.\nYES"));
    assert_eq!(oracle.validator_calls.load(Ordering::SeqCst), 3);
    let critic: Vec<_> = log
        .records()
        .await
        .into_iter()
        .filter(|r| r.stage == Stage::Validator)
        .collect();
    assert_eq!(critic.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_validator_yields_error_finding() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Vault", vec![Reply::Text("Bug.#END#")])
            .validator("Vault", vec![Reply::Text("maybe"); 5]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let finding = pipeline(&oracle, &log, 5).process(task("Vault")).await;

    assert!(finding.is_sentinel());
    assert!(finding.narrative.contains("validator failed after 5 attempts"));
    let records = log.records().await;
    assert_eq!(records.len(), 1, "only the accepted proposer response is logged");
    assert_eq!(records[0].stage, Stage::Proposer);
}

#[tokio::test(start_paused = true)]
async fn report_orders_validated_first_and_counts_errors_apart() {
    let oracle = Arc::new(
        Scripted::new()
            .validator("Alpha", vec![Reply::Text("NO")])
            .validator("Beta", vec![Reply::Text("YES")])
            .validator("Delta", vec![Reply::Text("YES")])
            .proposer("Gamma", vec![Reply::Text("no marker"); 2]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let tasks = vec![task("Alpha"), task("Beta"), task("Gamma"), task("Delta")];
    let report = pipeline(&oracle, &log, 2)
        .with_concurrency(1)
        .run(tasks)
        .await;

    let ids: Vec<&str> = report.findings.iter().map(|f| f.reference_id.as_str()).collect();
    assert_eq!(ids, vec!["Beta", "Delta", "Alpha"]);
    assert_eq!(report.stats.validated, 2);
    assert_eq!(report.stats.rejected, 1);
    assert_eq!(report.stats.total, 3);
    assert_eq!(report.stats.errors, 1);
    assert_eq!(report.errors[0].reference_id, "Gamma");
}

#[tokio::test(start_paused = true)]
async fn one_failing_document_does_not_affect_the_others() {
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Broken", vec![transport(); 5])
            .validator("Fine", vec![Reply::Text("YES")]),
    );
    let log = Arc::new(MemoryAuditLog::new());

    let source = DocumentSource::from_documents(
        vec![
            Document {
                reference_id: "Broken".into(),
                text: "contract Broken {}".into(),
            },
            Document {
                reference_id: "Fine".into(),
                text: "contract Fine {}".into(),
            },
        ],
        vec![Category::Common],
    );
    let report = pipeline(&oracle, &log, 5).run(source).await;

    assert_eq!(report.stats.tasks, 2);
    assert_eq!(report.stats.validated, 1);
    assert_eq!(report.findings[0].reference_id, "Fine");
    assert_eq!(report.errors[0].reference_id, "Broken");
}

#[tokio::test]
async fn file_audit_log_receives_accepted_exchanges() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Arc::new(
        Scripted::new()
            .proposer("Vault", vec![Reply::Text("  Reentrancy.#END#\n")])
            .validator("Vault", vec![Reply::Text("Yes it is. YES")]),
    );
    let log = Arc::new(FileAuditLog::new(dir.path()));
    let pipeline = AuditPipeline::new(oracle, log.clone(), policy(5), Sampling::default());

    let finding = pipeline.process(task("Vault")).await;
    assert!(finding.validated);

    let analysis = std::fs::read_to_string(log.path_for("Vault", Stage::Proposer)).unwrap();
    assert!(analysis.starts_with("Request prompt:\n"));
    assert!(analysis.contains("contract Vault {}"));
    assert!(analysis.contains("Response:\nReentrancy.\n\n"));
    assert!(!analysis.contains("#END#\n\n-------------------"));

    let critic = std::fs::read_to_string(log.path_for("Vault", Stage::Validator)).unwrap();
    assert!(critic.contains("Response:\nYes it is. YES\n"));
}

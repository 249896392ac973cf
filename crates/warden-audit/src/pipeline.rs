//! Per-task proposer/validator composition and the run driver.
//!
//! [`AuditPipeline::process`] is the isolation boundary: whatever goes wrong
//! inside one task ends up as an error [`Finding`], never as a panic or an
//! `Err` seen by the scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info};
use warden_core::{Finding, WardenConfig};

use crate::audit_log::AuditLog;
use crate::oracle::Oracle;
use crate::report::AuditReport;
use crate::scheduler::BoundedScheduler;
use crate::source::Task;
use crate::stage::{self, RetryPolicy, Sampling, StageContext, StageError};

/// Characters of document text copied into a finding's excerpt.
const EXCERPT_CHARS: usize = 400;

/// Why a task ended without a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// A stage exhausted its attempts.
    #[error(transparent)]
    Stage(#[from] StageError),
    /// The task ran past its wall-clock deadline.
    #[error("task deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

/// Runs tasks through proposer then validator and collects findings.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use warden_audit::audit_log::NullAuditLog;
/// use warden_audit::oracle::{Oracle, OracleError, OracleRequest};
/// use warden_audit::pipeline::AuditPipeline;
/// use warden_audit::source::Task;
/// use warden_audit::stage::{RetryPolicy, Sampling};
/// use warden_core::Category;
///
/// struct Agreeable;
///
/// #[async_trait]
/// impl Oracle for Agreeable {
///     async fn call(&self, request: OracleRequest<'_>) -> Result<String, OracleError> {
///         if request.system == warden_audit::prompt::validator_system_prompt() {
///             Ok("Confirmed. YES".into())
///         } else {
///             Ok("Unchecked call.#END#".into())
///         }
///     }
///     fn model(&self) -> &str { "agreeable" }
/// }
///
/// let pipeline = AuditPipeline::new(
///     Arc::new(Agreeable),
///     Arc::new(NullAuditLog),
///     RetryPolicy::default(),
///     Sampling::default(),
/// );
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let report = rt.block_on(pipeline.run(vec![Task::new("A", Category::Common, "code")]));
/// assert_eq!(report.stats.tasks, 1);
/// assert_eq!(report.stats.validated, 1);
/// ```
#[derive(Clone)]
pub struct AuditPipeline {
    ctx: StageContext,
    task_deadline: Option<Duration>,
    concurrency: usize,
}

impl AuditPipeline {
    /// Create a pipeline with the default concurrency and no task deadline.
    pub fn new(
        oracle: Arc<dyn Oracle>,
        audit_log: Arc<dyn AuditLog>,
        policy: RetryPolicy,
        sampling: Sampling,
    ) -> Self {
        Self {
            ctx: StageContext {
                oracle,
                audit_log,
                policy,
                sampling,
            },
            task_deadline: None,
            concurrency: crate::scheduler::DEFAULT_CONCURRENCY,
        }
    }

    /// Create a pipeline from configuration.
    pub fn from_config(
        config: &WardenConfig,
        oracle: Arc<dyn Oracle>,
        audit_log: Arc<dyn AuditLog>,
    ) -> Self {
        Self::new(
            oracle,
            audit_log,
            RetryPolicy::from_config(&config.pipeline, &config.oracle),
            Sampling::from_config(&config.oracle),
        )
        .with_concurrency(config.pipeline.concurrency)
        .with_task_deadline(config.pipeline.task_deadline())
    }

    /// Set the admission window size.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Bound each task's total wall-clock time.
    pub fn with_task_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.task_deadline = deadline;
        self
    }

    /// Admission window size used by [`run`](Self::run).
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Audit one task. Always yields exactly one finding.
    pub async fn process(&self, task: Task) -> Finding {
        let started = Instant::now();
        debug!(
            reference_id = %task.reference_id,
            category = %task.category,
            "task started"
        );

        let outcome = match self.task_deadline {
            Some(limit) => tokio::time::timeout(limit, self.review(&task))
                .await
                .unwrap_or(Err(PipelineError::DeadlineExceeded(limit))),
            None => self.review(&task).await,
        };

        let excerpt = excerpt(&task.input);
        match outcome {
            Ok((narrative, decision)) => {
                let validated = decision.verdict.is_affirmative();
                info!(
                    reference_id = %task.reference_id,
                    category = %task.category,
                    validated,
                    elapsed_ms = millis(started.elapsed()),
                    "task finished"
                );
                Finding::reviewed(
                    task.reference_id,
                    task.category,
                    narrative,
                    decision.text,
                    excerpt,
                    validated,
                )
            }
            Err(e) => {
                error!(
                    reference_id = %task.reference_id,
                    category = %task.category,
                    error = %e,
                    "task failed, recording error finding"
                );
                Finding::sentinel(task.reference_id, task.category, e, excerpt)
            }
        }
    }

    async fn review(&self, task: &Task) -> Result<(String, stage::Decision), PipelineError> {
        let narrative = stage::propose(&self.ctx, task).await?;
        let decision = stage::validate(&self.ctx, task, &narrative).await?;
        Ok((narrative, decision))
    }

    /// Audit every task under the configured concurrency ceiling.
    pub async fn run<I>(&self, tasks: I) -> AuditReport
    where
        I: IntoIterator<Item = Task>,
    {
        let started_at = Utc::now();
        let clock = Instant::now();
        let scheduler = BoundedScheduler::new(self.concurrency);
        info!(
            concurrency = scheduler.limit(),
            model = self.ctx.oracle.model(),
            "audit run started"
        );

        let findings = scheduler.run(tasks, |task| self.process(task)).await;

        let elapsed_ms = millis(clock.elapsed());
        let report =
            AuditReport::from_findings(findings, self.ctx.oracle.model(), started_at, elapsed_ms);
        info!(
            tasks = report.stats.tasks,
            validated = report.stats.validated,
            rejected = report.stats.rejected,
            errors = report.stats.errors,
            elapsed_ms,
            "audit run finished"
        );
        report
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn excerpt(input: &str) -> String {
    match input.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &input[..cut]),
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_log::MemoryAuditLog;
    use crate::oracle::{OracleError, OracleRequest};
    use async_trait::async_trait;
    use warden_core::{Category, Outcome};

    /// Answers proposer prompts and validator prompts with fixed text.
    struct Fixed {
        proposer: &'static str,
        validator: &'static str,
    }

    #[async_trait]
    impl Oracle for Fixed {
        async fn call(&self, request: OracleRequest<'_>) -> Result<String, OracleError> {
            if request.system == crate::prompt::validator_system_prompt() {
                Ok(self.validator.to_string())
            } else {
                Ok(self.proposer.to_string())
            }
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    struct Hang;

    #[async_trait]
    impl Oracle for Hang {
        async fn call(&self, _: OracleRequest<'_>) -> Result<String, OracleError> {
            std::future::pending().await
        }

        fn model(&self) -> &str {
            "hang"
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(10),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn pipeline(oracle: impl Oracle + 'static) -> AuditPipeline {
        AuditPipeline::new(
            Arc::new(oracle),
            Arc::new(MemoryAuditLog::new()),
            fast_policy(),
            Sampling::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn affirmative_verdict_validates() {
        let p = pipeline(Fixed {
            proposer: "Reentrancy bug found.#END#",
            validator: "Looks correct. YES",
        });
        let finding = p.process(Task::new("Vault", Category::Common, "code")).await;
        assert_eq!(finding.outcome(), Outcome::Validated);
        assert_eq!(finding.narrative, "Reentrancy bug found.");
        assert_eq!(finding.verdict.as_deref(), Some("Looks correct. YES"));
    }

    #[tokio::test(start_paused = true)]
    async fn negative_verdict_rejects() {
        let p = pipeline(Fixed {
            proposer: "Overflow.#END#",
            validator: "Compiler checks this. NO",
        });
        let finding = p.process(Task::new("Token", Category::Common, "code")).await;
        assert_eq!(finding.outcome(), Outcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_proposer_becomes_sentinel() {
        let p = pipeline(Fixed {
            proposer: "no marker here",
            validator: "YES",
        });
        let finding = p.process(Task::new("Vault", Category::Common, "code")).await;
        assert!(finding.is_sentinel());
        assert!(!finding.validated);
        assert!(finding.narrative.contains("proposer failed after 3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_forces_sentinel() {
        let p = pipeline(Hang).with_task_deadline(Some(Duration::from_secs(1)));
        let finding = p.process(Task::new("Slow", Category::Common, "code")).await;
        assert!(finding.is_sentinel());
        assert!(finding.narrative.contains("deadline"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_yields_one_finding_per_task() {
        let p = pipeline(Fixed {
            proposer: "Issue.#END#",
            validator: "NO",
        })
        .with_concurrency(2);
        let tasks = (0..5).map(|i| Task::new(format!("doc{i}"), Category::Common, "code"));
        let report = p.run(tasks).await;
        assert_eq!(report.stats.tasks, 5);
        assert_eq!(report.stats.rejected, 5);
        assert_eq!(report.stats.model_used, "fixed");
    }

    #[test]
    fn from_config_reads_pipeline_settings() {
        let mut config = WardenConfig::default();
        config.pipeline.concurrency = 3;
        config.pipeline.task_deadline_secs = Some(60);
        let p = AuditPipeline::from_config(
            &config,
            Arc::new(Hang),
            Arc::new(crate::audit_log::NullAuditLog),
        );
        assert_eq!(p.concurrency(), 3);
        assert_eq!(p.task_deadline, Some(Duration::from_secs(60)));
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
        assert_eq!(excerpt("short"), "short");
    }
}

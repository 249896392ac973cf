//! Proposer and validator stages.
//!
//! Both stages share one executor: call the oracle under a time bound,
//! check the response against the stage's terminal-token contract, and on
//! any failure back off `2^attempt` units before asking again. Every
//! invocation owns its attempt counter and timers, so stages for different
//! tasks run side by side without sharing retry state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use warden_core::{OracleConfig, PipelineConfig};

use crate::audit_log::AuditLog;
use crate::oracle::{Oracle, OracleError, OracleRequest};
use crate::prompt::{self, ContractViolation, Verdict};
use crate::source::Task;

/// Which of the two oracle passes is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// First pass: find an issue.
    Proposer,
    /// Second pass: confirm or reject the proposer's issue.
    Validator,
}

impl Stage {
    /// Suffix of the audit log file for this stage.
    pub fn log_suffix(self) -> &'static str {
        match self {
            Stage::Proposer => "analysis",
            Stage::Validator => "critic",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Proposer => write!(f, "proposer"),
            Stage::Validator => write!(f, "validator"),
        }
    }
}

/// Attempt budget, backoff unit and per-call time bound for a stage.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use warden_audit::stage::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 5);
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// One backoff time unit.
    pub backoff_unit: Duration,
    /// Upper bound for a single oracle call.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Build the policy from the pipeline and oracle configuration.
    pub fn from_config(pipeline: &PipelineConfig, oracle: &OracleConfig) -> Self {
        Self {
            max_attempts: pipeline.max_retries,
            backoff_unit: pipeline.backoff_unit(),
            call_timeout: oracle.timeout(),
        }
    }

    /// Delay after failed attempt `attempt` (0-indexed): `2^attempt` units.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Sampling temperatures per stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    /// Proposer temperature.
    pub proposer: f32,
    /// Validator temperature.
    pub validator: f32,
}

impl Sampling {
    /// Read temperatures from the oracle configuration.
    pub fn from_config(oracle: &OracleConfig) -> Self {
        Self {
            proposer: oracle.proposer_temperature,
            validator: oracle.validator_temperature,
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            proposer: 0.7,
            validator: 0.4,
        }
    }
}

/// Why one attempt failed.
///
/// Oracle failures and contract violations consume the same attempt budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFailure {
    /// The oracle call itself failed.
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// The oracle answered but broke the stage's response contract.
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl AttemptFailure {
    /// Returns `true` when the oracle answered but in the wrong shape.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, AttemptFailure::Contract(_))
    }
}

/// A stage ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed after {attempts} attempts: {last}")]
pub struct StageError {
    /// Stage that gave up.
    pub stage: Stage,
    /// Attempts made.
    pub attempts: u32,
    /// Cause of the final failed attempt.
    pub last: AttemptFailure,
}

/// Collaborators shared by every stage invocation.
///
/// Cloning is cheap; the oracle and log are reference counted.
#[derive(Clone)]
pub struct StageContext {
    /// Oracle answering both passes.
    pub oracle: Arc<dyn Oracle>,
    /// Receives one record per accepted response.
    pub audit_log: Arc<dyn AuditLog>,
    /// Retry and timeout policy.
    pub policy: RetryPolicy,
    /// Temperatures per stage.
    pub sampling: Sampling,
}

/// Validator output: the decision plus the text it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Parsed verdict.
    pub verdict: Verdict,
    /// Trimmed validator response.
    pub text: String,
}

struct StageCall<'a> {
    stage: Stage,
    reference_id: &'a str,
    system: &'a str,
    prompt: &'a str,
    temperature: f32,
}

/// Run the proposer pass for `task` and return the narrative.
///
/// # Errors
///
/// Returns [`StageError`] once every attempt has failed.
pub async fn propose(ctx: &StageContext, task: &Task) -> Result<String, StageError> {
    let rendered = prompt::render_proposer_prompt(task.template, &task.input);
    let call = StageCall {
        stage: Stage::Proposer,
        reference_id: &task.reference_id,
        system: prompt::proposer_system_prompt(),
        prompt: &rendered,
        temperature: ctx.sampling.proposer,
    };
    execute(ctx, call, |response| {
        let narrative = prompt::parse_narrative(response)?;
        Ok((narrative.clone(), narrative))
    })
    .await
}

/// Run the validator pass on `narrative` for `task`.
///
/// # Errors
///
/// Returns [`StageError`] once every attempt has failed.
pub async fn validate(
    ctx: &StageContext,
    task: &Task,
    narrative: &str,
) -> Result<Decision, StageError> {
    let rendered = prompt::render_validator_prompt(&task.input, narrative);
    let call = StageCall {
        stage: Stage::Validator,
        reference_id: &task.reference_id,
        system: prompt::validator_system_prompt(),
        prompt: &rendered,
        temperature: ctx.sampling.validator,
    };
    execute(ctx, call, |response| {
        let verdict = prompt::parse_verdict(response)?;
        let text = response.trim().to_string();
        Ok((
            Decision {
                verdict,
                text: text.clone(),
            },
            text,
        ))
    })
    .await
}

/// `accept` checks a response and returns the stage value together with
/// the text recorded in the audit log.
async fn execute<T>(
    ctx: &StageContext,
    call: StageCall<'_>,
    accept: impl Fn(&str) -> Result<(T, String), ContractViolation>,
) -> Result<T, StageError> {
    let max_attempts = ctx.policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match attempt_once(ctx, &call, &accept).await {
            Ok((value, record)) => {
                if let Err(e) = ctx
                    .audit_log
                    .append(call.reference_id, call.stage, call.prompt, &record)
                    .await
                {
                    warn!(
                        reference_id = call.reference_id,
                        stage = %call.stage,
                        error = %e,
                        "failed to append audit record"
                    );
                }
                debug!(
                    reference_id = call.reference_id,
                    stage = %call.stage,
                    attempt = attempt + 1,
                    "stage accepted response"
                );
                return Ok(value);
            }
            Err(failure) => {
                attempt += 1;
                warn!(
                    reference_id = call.reference_id,
                    stage = %call.stage,
                    attempt,
                    max_attempts,
                    contract_violation = failure.is_contract_violation(),
                    error = %failure,
                    "stage attempt failed"
                );
                if attempt >= max_attempts {
                    return Err(StageError {
                        stage: call.stage,
                        attempts: attempt,
                        last: failure,
                    });
                }
                let delay = ctx.policy.delay_for(attempt - 1);
                debug!(
                    reference_id = call.reference_id,
                    stage = %call.stage,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn attempt_once<T>(
    ctx: &StageContext,
    call: &StageCall<'_>,
    accept: &impl Fn(&str) -> Result<(T, String), ContractViolation>,
) -> Result<(T, String), AttemptFailure> {
    let request = OracleRequest {
        system: call.system,
        prompt: call.prompt,
        temperature: call.temperature,
    };
    let response = tokio::time::timeout(ctx.policy.call_timeout, ctx.oracle.call(request))
        .await
        .map_err(|_| OracleError::Timeout(ctx.policy.call_timeout))??;
    Ok(accept(&response)?)
}

//! Two-pass audit pipeline for Warden.
//!
//! Every task goes through a proposer call that must end with `#END#` and a
//! validator call that must end with `YES` or `NO`. Both stages retry with
//! exponential backoff and record accepted exchanges in an [`audit_log`].
//! The [`scheduler`] keeps at most K tasks in flight and the [`report`]
//! module orders the findings validated-first.
//!
//! - [`oracle`]: the [`Oracle`](oracle::Oracle) trait and an OpenAI-compatible client
//! - [`prompt`]: templates and response contracts
//! - [`stage`]: the shared retrying stage executor
//! - [`source`]: documents and tasks
//! - [`pipeline`]: per-task composition and the run driver
//! - [`scheduler`]: the bounded admission window
//! - [`report`]: aggregation and rendering

pub mod audit_log;
pub mod oracle;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod stage;

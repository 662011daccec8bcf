//! Failure classification for completed-but-failed jobs.
//!
//! The remedy for a failed job depends on what the provider reports at the
//! time of the failure, not only on the job's remaining retry budget.

use crate::status::ProcessorStatus;

use super::{CREATE_JOB, DESTROY_JOB};

/// What to do about a failed job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureAction {
    /// Nothing to do; the failure does not matter.
    Ignore,
    /// Submit the job again with one fewer retry.
    Retry,
    /// The instance disappeared; recreate it and replay its jobs.
    Reset,
    /// Give up on the job.
    Fatal,
}

/// Facts the classifier needs about one failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FailureContext<'a> {
    /// Failed job.
    pub job: &'a str,
    /// Provider-reported status at classification time.
    pub status: ProcessorStatus,
    /// Retries the failed process had left.
    pub retries_remaining: u32,
    /// Whether a destroy job is currently registered.
    pub destroy_tracked: bool,
    /// Whether the error text says the resource already exists.
    pub already_exists: bool,
}

/// Decides the remedy for a failed job.
#[must_use]
pub fn classify_failure(ctx: &FailureContext<'_>) -> FailureAction {
    let is_create = ctx.job == CREATE_JOB;
    let is_destroy = ctx.job == DESTROY_JOB;
    let has_retries = ctx.retries_remaining > 0;

    match ctx.status {
        ProcessorStatus::Available => {
            if is_create {
                // A create that "failed" while the instance is up raced with
                // the provider; only a name clash is a real failure.
                if ctx.already_exists {
                    FailureAction::Fatal
                } else {
                    FailureAction::Ignore
                }
            } else if has_retries {
                FailureAction::Retry
            } else {
                FailureAction::Fatal
            }
        }
        ProcessorStatus::Creating => {
            if is_destroy && has_retries {
                FailureAction::Retry
            } else {
                FailureAction::Fatal
            }
        }
        ProcessorStatus::Destroying => {
            if is_destroy && has_retries {
                FailureAction::Retry
            } else if !ctx.destroy_tracked && !is_create && !is_destroy {
                FailureAction::Reset
            } else {
                FailureAction::Fatal
            }
        }
        ProcessorStatus::Off => {
            if is_destroy {
                FailureAction::Ignore
            } else if ctx.destroy_tracked {
                FailureAction::Fatal
            } else if is_create && has_retries {
                FailureAction::Retry
            } else {
                FailureAction::Reset
            }
        }
    }
}

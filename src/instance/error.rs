//! Errors surfaced by the instance lifecycle engine.

use thiserror::Error;

use crate::provider::ProviderFailure;
use crate::status::ProcessorStatus;

fn code_label(code: Option<&i32>) -> String {
    code.map_or_else(|| String::from("no exit status"), |value| format!("exit status {value}"))
}

/// Fatal outcomes of instance operations.
///
/// Everything the engine can recover from (retries, resets, throttling,
/// idempotent destroys, quiet failures) is handled internally; only the
/// conditions below reach the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// The instance is frozen and refused new work.
    #[error("instance {instance} is locked; refusing job {job}")]
    Locked {
        /// Instance name.
        instance: String,
        /// Job that was refused.
        job: String,
    },
    /// The instance was frozen while waiting for startup.
    #[error("instance {instance} was locked while waiting for startup")]
    LockedDuringCreation {
        /// Instance name.
        instance: String,
    },
    /// The instance never reported startup completion.
    #[error("instance {instance} never became available after {resets} creation resets")]
    NeverAvailable {
        /// Instance name.
        instance: String,
        /// Creation resets spent.
        resets: u32,
    },
    /// A job failed and every retry and reset avenue was exhausted.
    #[error("job {job} failed on instance {instance} with {}: {stderr}", code_label(.return_code.as_ref()))]
    CommandFailed {
        /// Instance name.
        instance: String,
        /// Job name.
        job: String,
        /// Exit status of the final attempt, when one was reported.
        return_code: Option<i32>,
        /// Error text of the final attempt.
        stderr: String,
    },
    /// The requested operation is not allowed from the current status.
    #[error("cannot {operation} instance {instance} while it is {from}")]
    InvalidTransition {
        /// Instance name.
        instance: String,
        /// Status at the time of the request.
        from: ProcessorStatus,
        /// Requested operation.
        operation: &'static str,
    },
    /// The provider could not report the instance status.
    #[error("could not read status of instance {instance}: {source}")]
    StatusUnavailable {
        /// Instance name.
        instance: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderFailure,
    },
    /// Shutdown was requested while the instance was waiting.
    #[error("instance {instance} was cancelled")]
    Cancelled {
        /// Instance name.
        instance: String,
    },
    /// No process is registered under the job name.
    #[error("instance {instance} has no job named {job}")]
    UnknownJob {
        /// Instance name.
        instance: String,
        /// Job name.
        job: String,
    },
}

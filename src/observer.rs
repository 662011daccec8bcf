//! Observability hooks for the lifecycle engine.
//!
//! The engine reports what it is doing through [`LifecycleEvent`]s handed to
//! a [`LifecycleObserver`]; it never writes logs itself. [`TracingObserver`]
//! turns events into structured `tracing` records.

use std::fmt;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, error, info, warn};

use crate::status::ProcessorStatus;

/// Why a reset was started.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResetCause {
    /// The provider destroyed the incarnation without being asked.
    Preemption,
    /// The incarnation never reported startup completion.
    CreationTimeout,
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preemption => "preemption",
            Self::CreationTimeout => "creation timeout",
        })
    }
}

/// Why an instance stopped being preemptible.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PromotionReason {
    /// The reset ceiling was reached.
    ResetLimit,
    /// A single incarnation ran past the provider's preemptible lifetime.
    RuntimeLimit,
}

impl fmt::Display for PromotionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResetLimit => "reset limit reached",
            Self::RuntimeLimit => "runtime limit reached",
        })
    }
}

/// Something notable the engine did or observed.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// The locally tracked status moved.
    StatusChanged {
        /// Previous status.
        from: ProcessorStatus,
        /// New status.
        to: ProcessorStatus,
    },
    /// A process was recorded and handed off for execution.
    ProcessSubmitted {
        /// Job name.
        job: String,
        /// Command text.
        command: String,
    },
    /// A process finished with exit status zero.
    ProcessCompleted {
        /// Job name.
        job: String,
    },
    /// A process finished with a non-zero or missing exit status.
    ProcessFailed {
        /// Job name.
        job: String,
        /// Exit status, when one was reported.
        return_code: Option<i32>,
        /// Captured error text.
        stderr: String,
    },
    /// The connection to the instance dropped; the engine is cooling down.
    ConnectionLost {
        /// Job name.
        job: String,
        /// Length of the cool-down.
        cooldown: Duration,
    },
    /// The provider throttled a request; the engine is backing off.
    RateLimited {
        /// Job name.
        job: String,
        /// Back-off delay.
        delay: Duration,
    },
    /// A failed job will be submitted again.
    RetryScheduled {
        /// Job name.
        job: String,
        /// Retries left after this attempt.
        retries_remaining: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// A create failed but the provider reports the instance as available.
    BenignFailure {
        /// Job name.
        job: String,
    },
    /// A quiet process failed and the failure was recorded only.
    FailureAbsorbed {
        /// Job name.
        job: String,
        /// Exit status, when one was reported.
        return_code: Option<i32>,
    },
    /// A job failed beyond recovery.
    FatalFailure {
        /// Job name.
        job: String,
        /// Exit status, when one was reported.
        return_code: Option<i32>,
    },
    /// One readiness poll found the instance still booting.
    StartupPending {
        /// Poll number, starting at one.
        cycle: u32,
        /// Total polls allowed.
        of: u32,
    },
    /// One readiness poll could not be answered by the provider.
    StartupCheckFailed {
        /// Poll number, starting at one.
        cycle: u32,
        /// Total polls allowed.
        of: u32,
        /// Error text reported by the provider.
        error: String,
    },
    /// A reset began.
    ResetStarted {
        /// Reset count after this reset was counted.
        reset_count: u32,
        /// Trigger.
        cause: ResetCause,
    },
    /// A reset recreated the instance and replayed its jobs.
    ResetFinished {
        /// Reset count.
        reset_count: u32,
        /// Number of jobs replayed.
        replayed: usize,
    },
    /// The instance stopped being preemptible for good.
    Promoted {
        /// Trigger.
        reason: PromotionReason,
    },
    /// An incarnation was archived into the cost history.
    CostRecorded {
        /// Hourly price of the archived incarnation.
        price: f64,
        /// Runtime of the archived incarnation.
        runtime: TimeDelta,
    },
}

/// Receives lifecycle events from instances.
pub trait LifecycleObserver: Send + Sync {
    /// Handles one event emitted by `instance`.
    fn on_event(&self, instance: &str, event: &LifecycleEvent);
}

/// Observer that discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {
    fn on_event(&self, _instance: &str, _event: &LifecycleEvent) {}
}

/// Observer that forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl LifecycleObserver for TracingObserver {
    fn on_event(&self, instance: &str, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::StatusChanged { from, to } => {
                info!(instance, %from, %to, "status changed");
            }
            LifecycleEvent::ProcessSubmitted { job, command } => {
                debug!(instance, job = %job, command = %command, "process submitted");
            }
            LifecycleEvent::ProcessCompleted { job } => {
                debug!(instance, job = %job, "process completed");
            }
            LifecycleEvent::ProcessFailed {
                job,
                return_code,
                stderr,
            } => {
                warn!(instance, job = %job, ?return_code, stderr = %stderr, "process failed");
            }
            LifecycleEvent::ConnectionLost { job, cooldown } => {
                warn!(instance, job = %job, ?cooldown, "connection lost; cooling down");
            }
            LifecycleEvent::RateLimited { job, delay } => {
                warn!(instance, job = %job, ?delay, "provider rate limit hit; backing off");
            }
            LifecycleEvent::RetryScheduled {
                job,
                retries_remaining,
                delay,
            } => {
                info!(instance, job = %job, retries_remaining, ?delay, "retrying job");
            }
            LifecycleEvent::BenignFailure { job } => {
                info!(instance, job = %job, "create reported failure but instance is available");
            }
            LifecycleEvent::FailureAbsorbed { job, return_code } => {
                info!(instance, job = %job, ?return_code, "quiet job failed; continuing");
            }
            LifecycleEvent::FatalFailure { job, return_code } => {
                error!(instance, job = %job, ?return_code, "job failed");
            }
            LifecycleEvent::StartupPending { cycle, of } => {
                debug!(instance, cycle, of, "waiting for startup to complete");
            }
            LifecycleEvent::StartupCheckFailed { cycle, of, error } => {
                warn!(instance, cycle, of, error = %error, "startup check failed");
            }
            LifecycleEvent::ResetStarted { reset_count, cause } => {
                warn!(instance, reset_count, %cause, "resetting instance");
            }
            LifecycleEvent::ResetFinished {
                reset_count,
                replayed,
            } => {
                info!(instance, reset_count, replayed, "reset finished");
            }
            LifecycleEvent::Promoted { reason } => {
                warn!(instance, %reason, "instance is no longer preemptible");
            }
            LifecycleEvent::CostRecorded { price, runtime } => {
                debug!(
                    instance,
                    price,
                    runtime_secs = runtime.num_seconds(),
                    "incarnation archived"
                );
            }
        }
    }
}

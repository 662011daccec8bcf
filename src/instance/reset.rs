//! Preemption state and the reset protocol.

use chrono::TimeDelta;

use crate::observer::{LifecycleEvent, PromotionReason, ResetCause};
use crate::provider::Provider;

use super::{CREATE_JOB, CostRecord, DESTROY_JOB, Instance, InstanceFuture, live_runtime};

/// Reset bookkeeping for an instance.
///
/// `is_preemptible` only ever moves from `true` to `false`, `reset_count`
/// only grows, and `cost_history` is append-only.
#[derive(Clone, Debug, PartialEq)]
pub struct Preemption {
    is_preemptible: bool,
    max_resets: u32,
    reset_count: u32,
    creation_resets: u32,
    cost_history: Vec<CostRecord>,
}

impl Preemption {
    /// Creates fresh bookkeeping.
    #[must_use]
    pub const fn new(is_preemptible: bool, max_resets: u32) -> Self {
        Self {
            is_preemptible,
            max_resets,
            reset_count: 0,
            creation_resets: 0,
            cost_history: Vec::new(),
        }
    }

    /// Whether preemption resets are still allowed.
    #[must_use]
    pub const fn is_preemptible(&self) -> bool {
        self.is_preemptible
    }

    /// Resets performed so far.
    #[must_use]
    pub const fn reset_count(&self) -> u32 {
        self.reset_count
    }

    /// Resets performed because an incarnation never became ready.
    #[must_use]
    pub const fn creation_resets(&self) -> u32 {
        self.creation_resets
    }

    /// Archived incarnations, oldest first.
    #[must_use]
    pub fn cost_history(&self) -> &[CostRecord] {
        &self.cost_history
    }

    pub(super) const fn record_creation_reset(&mut self) {
        self.creation_resets = self.creation_resets.saturating_add(1);
    }

    /// Counts a reset and returns the reasons the instance stopped being
    /// preemptible, if it did.
    fn count_reset(&mut self, live: TimeDelta, runtime_limit: TimeDelta) -> Vec<PromotionReason> {
        let mut promotions = Vec::new();
        if self.is_preemptible && live >= runtime_limit {
            self.is_preemptible = false;
            promotions.push(PromotionReason::RuntimeLimit);
        }
        self.reset_count = self.reset_count.saturating_add(1);
        if self.is_preemptible && self.reset_count >= self.max_resets {
            self.is_preemptible = false;
            promotions.push(PromotionReason::ResetLimit);
        }
        promotions
    }
}

impl<P: Provider + 'static> Instance<P> {
    /// Whether preemption resets are still allowed.
    #[must_use]
    pub const fn is_preemptible(&self) -> bool {
        self.preemption.is_preemptible()
    }

    /// Resets performed so far.
    #[must_use]
    pub const fn reset_count(&self) -> u32 {
        self.preemption.reset_count()
    }

    /// Resets performed because an incarnation never became ready.
    #[must_use]
    pub const fn creation_resets(&self) -> u32 {
        self.preemption.creation_resets()
    }

    /// Archived incarnations, oldest first.
    #[must_use]
    pub fn cost_history(&self) -> &[CostRecord] {
        self.preemption.cost_history()
    }

    /// Destroys the current incarnation, recreates it, and replays every
    /// registered job in submission order, one at a time.
    ///
    /// Create, destroy and bootstrap jobs are not replayed; the recreate path
    /// issues them afresh. Replayed jobs keep the retry budget they had.
    ///
    /// # Errors
    ///
    /// Returns any fatal outcome of the destroy, the recreate, or a replayed
    /// job.
    pub fn reset(&mut self, cause: ResetCause) -> InstanceFuture<'_, ()> {
        Box::pin(async move {
            let now = self.clock.now();
            let live = live_runtime(self.start_time, self.stop_time, now);
            let promotions = self
                .preemption
                .count_reset(live, self.config.preemptible_runtime_limit());
            for reason in promotions {
                self.emit(LifecycleEvent::Promoted { reason });
            }
            let reset_count = self.preemption.reset_count();
            self.emit(LifecycleEvent::ResetStarted { reset_count, cause });

            let price = self.price;
            let start = self.start_time;
            self.abort_in_flight();
            if self.status.can_destroy() {
                self.destroy().await?;
            }
            // An incarnation that never started has no span to bill.
            let stop = start.map(|_| self.stop_time.unwrap_or_else(|| self.clock.now()));
            let record = CostRecord { price, start, stop };
            self.preemption.cost_history.push(record);
            self.emit(LifecycleEvent::CostRecorded {
                price,
                runtime: record.runtime(),
            });
            self.start_time = None;
            self.stop_time = None;

            self.processes.pop(CREATE_JOB);
            self.processes.pop(DESTROY_JOB);
            for bootstrap in &self.bootstrap {
                self.processes.pop(&bootstrap.job_name);
            }
            let queue = self.processes.drain();

            self.create().await?;

            let replayed = queue.len();
            for process in queue {
                self.run(
                    process.job_name(),
                    process.command(),
                    process.options().clone(),
                )?;
                self.wait_process(process.job_name()).await?;
            }
            self.emit(LifecycleEvent::ResetFinished {
                reset_count,
                replayed,
            });
            Ok(())
        })
    }
}

//! Instance lifecycle engine.
//!
//! An [`Instance`] owns one named remote resource, the registry of jobs issued
//! against it, and the state machine that moves it through
//! `Off → Creating → Available → Destroying → Off`. Jobs run as tokio tasks;
//! [`Instance::wait_process`] collects their results and routes failures
//! through the classifier in [`failure`], which may retry the job, reset the
//! instance, or give up.
//!
//! Preemptible instances recover from unannounced termination by destroying
//! and recreating the resource and replaying every outstanding job in its
//! original order (see [`Instance::reset`]).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::LifecycleConfig;
use crate::observer::{LifecycleEvent, LifecycleObserver, ResetCause, TracingObserver};
use crate::process::{Process, ProcessRegistry, RunOptions};
use crate::provider::{
    ExecRequest, InstanceHandle, InstanceSpec, Provider, mentions_already_exists,
    mentions_rate_limit,
};
use crate::remote::{CONNECTION_LOST_EXIT_CODE, CommandOutput};
use crate::status::{InstanceLock, ProcessorStatus};
use crate::throttle::RateLimitThrottle;

mod accounting;
mod error;
pub mod failure;
mod reset;

pub use accounting::{CostRecord, cost_of, history_cost, history_runtime, live_runtime};
pub use error::InstanceError;
pub use failure::{FailureAction, FailureContext, classify_failure};
pub use reset::Preemption;

/// Job name of the provider create call.
pub const CREATE_JOB: &str = "create";

/// Job name of the provider destroy call.
pub const DESTROY_JOB: &str = "destroy";

/// Future returned by engine operations that may recurse through failure
/// handling and resets.
pub type InstanceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, InstanceError>> + Send + 'a>>;

/// A command run on every fresh incarnation once it is ready.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapCommand {
    /// Job name the command is tracked under.
    pub job_name: String,
    /// Command text.
    pub command: String,
}

impl BootstrapCommand {
    /// Creates a bootstrap command.
    #[must_use]
    pub fn new(job_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            command: command.into(),
        }
    }
}

/// Result of one spawned job.
#[derive(Debug)]
struct Execution {
    output: CommandOutput,
    handle: Option<InstanceHandle>,
}

impl Execution {
    const fn output(output: CommandOutput) -> Self {
        Self {
            output,
            handle: None,
        }
    }
}

/// A named remote resource and the jobs issued against it.
///
/// Operations take `&mut self`; one worker owns an instance at a time. The
/// [`InstanceLock`] returned by [`Instance::lock_handle`] can be shared with a
/// supervisor to freeze the instance from outside.
pub struct Instance<P: Provider + 'static> {
    spec: InstanceSpec,
    config: LifecycleConfig,
    provider: Arc<P>,
    observer: Arc<dyn LifecycleObserver>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    lock: InstanceLock,
    handle: InstanceHandle,
    status: ProcessorStatus,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    price: f64,
    processes: ProcessRegistry,
    in_flight: HashMap<String, JoinHandle<Execution>>,
    bootstrap: Vec<BootstrapCommand>,
    preemption: Preemption,
    throttle: RateLimitThrottle,
    incarnation: u64,
}

impl<P: Provider + 'static> Instance<P> {
    /// Creates an instance in the `Off` state. Nothing is provisioned until
    /// [`Instance::create`] is called.
    #[must_use]
    pub fn new(spec: InstanceSpec, config: LifecycleConfig, provider: Arc<P>) -> Self {
        let handle = spec.handle();
        let preemption = Preemption::new(spec.preemptible, config.max_resets);
        let throttle = RateLimitThrottle::new(config.rate_limit_base(), config.rate_limit_max());
        Self {
            spec,
            config,
            provider,
            observer: Arc::new(TracingObserver),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            lock: InstanceLock::new(),
            handle,
            status: ProcessorStatus::Off,
            start_time: None,
            stop_time: None,
            price: 0.0,
            processes: ProcessRegistry::new(),
            in_flight: HashMap::new(),
            bootstrap: Vec::new(),
            preemption,
            throttle,
            incarnation: 0,
        }
    }

    /// Replaces the observer that receives lifecycle events.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replaces the clock used for incarnation timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `token` to abort waits when the process shuts down.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Shares an externally owned lock flag.
    #[must_use]
    pub fn with_lock(mut self, lock: InstanceLock) -> Self {
        self.lock = lock;
        self
    }

    /// Sets the commands run on every fresh incarnation.
    #[must_use]
    pub fn with_bootstrap(mut self, commands: Vec<BootstrapCommand>) -> Self {
        self.bootstrap = commands;
        self
    }

    /// Disables rate-limit jitter so back-off delays are exact.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.throttle = self.throttle.without_jitter();
        self
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Resource requirements the instance was created with.
    #[must_use]
    pub const fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    /// Provider address of the current incarnation.
    #[must_use]
    pub const fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    /// Locally tracked status.
    #[must_use]
    pub const fn status(&self) -> ProcessorStatus {
        self.status
    }

    /// Shared lock flag for this instance.
    #[must_use]
    pub fn lock_handle(&self) -> InstanceLock {
        self.lock.clone()
    }

    /// Returns `true` while the instance is frozen.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// When the current incarnation became available.
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// When the current incarnation was released.
    #[must_use]
    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    /// Hourly price of the current incarnation.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Retry budget used for commands submitted by the engine itself.
    #[must_use]
    pub const fn default_options(&self) -> RunOptions {
        RunOptions::with_retries(self.config.default_num_cmd_retries)
    }

    /// Current process record for `job_name`.
    #[must_use]
    pub fn process(&self, job_name: &str) -> Option<&Process> {
        self.processes.get(job_name)
    }

    /// Registered job names in submission order.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.processes.job_names().map(ToOwned::to_owned).collect()
    }

    /// Whether a destroy job is registered.
    #[must_use]
    pub fn destroy_tracked(&self) -> bool {
        self.processes.contains(DESTROY_JOB)
    }

    /// Total runtime across the live incarnation and every archived one.
    #[must_use]
    pub fn runtime(&self) -> TimeDelta {
        live_runtime(self.start_time, self.stop_time, self.clock.now())
            + history_runtime(self.preemption.cost_history())
    }

    /// Total cost across the live incarnation and every archived one.
    #[must_use]
    #[expect(clippy::float_arithmetic, reason = "costs are fractional prices")]
    pub fn compute_cost(&self) -> f64 {
        let live = live_runtime(self.start_time, self.stop_time, self.clock.now());
        cost_of(live, self.price) + history_cost(self.preemption.cost_history())
    }

    /// Provisions a new incarnation and waits until it is ready.
    ///
    /// Runs the bootstrap commands once the provider reports startup
    /// completion. A failing create goes through failure handling like any
    /// other job.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::InvalidTransition`] unless the instance is
    /// `Off`, [`InstanceError::Locked`] when frozen, and any fatal outcome of
    /// the create, readiness wait, or bootstrap.
    pub fn create(&mut self) -> InstanceFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_unlocked(CREATE_JOB)?;
            self.ensure_status(&[ProcessorStatus::Off], "create")?;
            self.incarnation = self.incarnation.saturating_add(1);
            let incarnation = self.incarnation;

            let command = format!("create {}", self.spec.name);
            self.submit(Process::new(CREATE_JOB, command, self.default_options()));
            self.wait_process(CREATE_JOB).await?;
            if self.incarnation != incarnation {
                return Ok(());
            }

            self.set_status(ProcessorStatus::Creating);
            self.wait_until_ready().await?;
            if self.incarnation != incarnation {
                return Ok(());
            }

            self.set_status(ProcessorStatus::Available);
            self.start_time = Some(self.clock.now());
            self.stop_time = None;
            self.price = self.spec.hourly_price;
            self.run_bootstrap(incarnation).await
        })
    }

    /// Releases the current incarnation.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::InvalidTransition`] when the instance is
    /// already `Off`, and any fatal outcome of the destroy job.
    pub fn destroy(&mut self) -> InstanceFuture<'_, ()> {
        Box::pin(async move {
            if !self.status.can_destroy() {
                return Err(self.invalid_transition("destroy"));
            }
            self.release().await
        })
    }

    /// Releases whatever the instance may still hold after a run, including
    /// a create that was interrupted by shutdown.
    ///
    /// An in-flight create is awaited rather than aborted so the resource it
    /// provisions is known to the provider, then destroyed. Other in-flight
    /// jobs are aborted. Teardown ignores the shutdown token and runs to
    /// completion. Does nothing when no resource can exist.
    ///
    /// # Errors
    ///
    /// Returns any fatal outcome of the destroy job.
    pub fn teardown(&mut self) -> InstanceFuture<'_, ()> {
        Box::pin(async move {
            self.shutdown = CancellationToken::new();
            let pending_create = self.in_flight.remove(CREATE_JOB);
            self.abort_in_flight();

            let create_was_pending = pending_create.is_some();
            if let Some(task) = pending_create {
                if let Ok(execution) = task.await {
                    if let Some(handle) = execution.handle {
                        self.handle = handle;
                    }
                    self.processes.complete(CREATE_JOB, execution.output);
                }
            }

            if self.status.can_destroy() || create_was_pending {
                self.release().await?;
            }
            Ok(())
        })
    }

    /// Submits `command` under `job_name` and starts it.
    ///
    /// Any existing process under the same job name is replaced. Use
    /// [`Instance::wait_process`] to collect the result.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Locked`] when frozen and
    /// [`InstanceError::InvalidTransition`] unless the instance is
    /// `Available`.
    pub fn run(
        &mut self,
        job_name: &str,
        command: &str,
        options: RunOptions,
    ) -> Result<(), InstanceError> {
        self.ensure_unlocked(job_name)?;
        self.ensure_status(&[ProcessorStatus::Available], "run a job on")?;
        self.submit(Process::new(job_name, command, options));
        Ok(())
    }

    /// Waits for `job_name` to finish and handles its failure.
    ///
    /// Returns once the job succeeded or its failure was recovered from or
    /// absorbed. On shutdown the job is left in flight for
    /// [`Instance::teardown`].
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::UnknownJob`] for unregistered jobs,
    /// [`InstanceError::Cancelled`] on shutdown, and any fatal outcome of
    /// failure handling.
    pub fn wait_process(&mut self, job_name: &str) -> InstanceFuture<'_, ()> {
        let job = job_name.to_owned();
        Box::pin(async move {
            let Some(mut task) = self.in_flight.remove(&job) else {
                return if self.processes.contains(&job) {
                    Ok(())
                } else {
                    Err(InstanceError::UnknownJob {
                        instance: self.spec.name.clone(),
                        job,
                    })
                };
            };

            let joined = tokio::select! {
                () = self.shutdown.cancelled() => {
                    // Left running; `teardown` collects it.
                    self.in_flight.insert(job, task);
                    return Err(self.cancelled());
                }
                joined = &mut task => joined,
            };
            let execution = joined.unwrap_or_else(|err| {
                Execution::output(CommandOutput::failure(None, format!("job task ended: {err}")))
            });

            if let Some(handle) = execution.handle {
                self.handle = handle;
            }
            let output = execution.output;
            self.processes.complete(&job, output.clone());
            if output.is_success() {
                self.throttle.reset();
                self.emit(LifecycleEvent::ProcessCompleted { job });
                return Ok(());
            }

            self.emit(LifecycleEvent::ProcessFailed {
                job: job.clone(),
                return_code: output.code,
                stderr: output.stderr,
            });
            self.handle_failure(&job).await
        })
    }

    /// Waits for every in-flight job in submission order.
    ///
    /// # Errors
    ///
    /// Returns the first fatal outcome.
    pub async fn wait_all(&mut self) -> Result<(), InstanceError> {
        let pending: Vec<String> = self
            .processes
            .job_names()
            .filter(|job| self.in_flight.contains_key(*job))
            .map(ToOwned::to_owned)
            .collect();
        for job in pending {
            if self.in_flight.contains_key(&job) {
                self.wait_process(&job).await?;
            }
        }
        Ok(())
    }

    /// Polls the provider until the incarnation reports startup completion.
    ///
    /// Sleeps one poll interval before each poll. When every poll comes back
    /// negative the instance is reset, up to the configured number of
    /// creation resets. A poll the provider could not answer counts as
    /// negative and is reported as [`LifecycleEvent::StartupCheckFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::LockedDuringCreation`] when the instance is
    /// frozen mid-wait and [`InstanceError::NeverAvailable`] once creation
    /// resets are exhausted.
    pub fn wait_until_ready(&mut self) -> InstanceFuture<'_, ()> {
        Box::pin(async move {
            let cycles = self.config.startup_poll_cycles;
            for cycle in 1..=cycles {
                self.pause(self.config.startup_poll_interval()).await?;
                if self.lock.is_locked() {
                    return Err(InstanceError::LockedDuringCreation {
                        instance: self.spec.name.clone(),
                    });
                }
                match self.provider.poll_startup_complete(&self.handle).await {
                    Ok(true) => return Ok(()),
                    Ok(false) => self.emit(LifecycleEvent::StartupPending { cycle, of: cycles }),
                    Err(failure) => self.emit(LifecycleEvent::StartupCheckFailed {
                        cycle,
                        of: cycles,
                        error: failure.stderr,
                    }),
                }
            }

            if self.preemption.creation_resets() < self.config.creation_resets_limit {
                self.preemption.record_creation_reset();
                return self.reset(ResetCause::CreationTimeout).await;
            }
            Err(InstanceError::NeverAvailable {
                instance: self.spec.name.clone(),
                resets: self.preemption.creation_resets(),
            })
        })
    }

    /// Decides and applies the remedy for a failed job.
    ///
    /// Recoverable outcomes return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Locked`] when the instance is frozen and the
    /// job is neither a destroy nor quiet,
    /// [`InstanceError::StatusUnavailable`] when the provider cannot report
    /// status, and [`InstanceError::CommandFailed`] when the job cannot be
    /// recovered and is not quiet.
    pub fn handle_failure(&mut self, job_name: &str) -> InstanceFuture<'_, ()> {
        let job = job_name.to_owned();
        Box::pin(async move {
            let Some(process) = self.processes.get(&job).cloned() else {
                return Err(InstanceError::UnknownJob {
                    instance: self.spec.name.clone(),
                    job,
                });
            };

            if process.return_code() == Some(CONNECTION_LOST_EXIT_CODE) {
                let cooldown = self.config.connection_lost_cooldown();
                self.emit(LifecycleEvent::ConnectionLost {
                    job: job.clone(),
                    cooldown,
                });
                self.pause(cooldown).await?;
            }
            if self.locked_out(&job) {
                return self.refuse_locked(&process);
            }

            if mentions_rate_limit(process.stderr_text()) {
                let delay = self.throttle.next_delay();
                self.emit(LifecycleEvent::RateLimited {
                    job: job.clone(),
                    delay,
                });
                self.pause(delay).await?;
            }
            if self.locked_out(&job) {
                return self.refuse_locked(&process);
            }

            let status = self
                .provider
                .poll_status(&self.handle)
                .await
                .map_err(|source| InstanceError::StatusUnavailable {
                    instance: self.spec.name.clone(),
                    source,
                })?;
            let action = classify_failure(&FailureContext {
                job: &job,
                status,
                retries_remaining: process.retries_remaining(),
                destroy_tracked: self.destroy_tracked(),
                already_exists: mentions_already_exists(process.stderr_text()),
            });

            match action {
                FailureAction::Ignore => {
                    if job == CREATE_JOB {
                        self.emit(LifecycleEvent::BenignFailure { job });
                    }
                    Ok(())
                }
                FailureAction::Reset if self.preemption.is_preemptible() => {
                    self.reset(ResetCause::Preemption).await
                }
                FailureAction::Retry => self.retry(&process).await,
                FailureAction::Reset | FailureAction::Fatal => self.escalate(&process),
            }
        })
    }

    /// Resubmits a failed job with one fewer retry.
    async fn retry(&mut self, process: &Process) -> Result<(), InstanceError> {
        let next = process.retried();
        let delay = self.config.retry_delay();
        self.emit(LifecycleEvent::RetryScheduled {
            job: next.job_name().to_owned(),
            retries_remaining: next.retries_remaining(),
            delay,
        });
        self.pause(delay).await?;

        let job = next.job_name().to_owned();
        if job == CREATE_JOB || job == DESTROY_JOB {
            self.submit(next);
        } else {
            self.run(&job, next.command(), next.options().clone())?;
        }
        self.wait_process(&job).await
    }

    fn escalate(&self, process: &Process) -> Result<(), InstanceError> {
        let job = process.job_name().to_owned();
        if process.is_quiet() {
            self.emit(LifecycleEvent::FailureAbsorbed {
                job,
                return_code: process.return_code(),
            });
            return Ok(());
        }
        self.emit(LifecycleEvent::FatalFailure {
            job: job.clone(),
            return_code: process.return_code(),
        });
        Err(InstanceError::CommandFailed {
            instance: self.spec.name.clone(),
            job,
            return_code: process.return_code(),
            stderr: process.stderr_text().to_owned(),
        })
    }

    async fn release(&mut self) -> Result<(), InstanceError> {
        let command = format!("destroy {}", self.spec.name);
        self.submit(Process::new(DESTROY_JOB, command, self.default_options()));
        self.set_status(ProcessorStatus::Destroying);
        self.wait_process(DESTROY_JOB).await?;
        self.set_status(ProcessorStatus::Off);
        self.stop_time = Some(self.clock.now());
        Ok(())
    }

    async fn run_bootstrap(&mut self, incarnation: u64) -> Result<(), InstanceError> {
        let commands = self.bootstrap.clone();
        for bootstrap in commands {
            self.run(
                &bootstrap.job_name,
                &bootstrap.command,
                self.default_options(),
            )?;
            self.wait_process(&bootstrap.job_name).await?;
            if self.incarnation != incarnation {
                break;
            }
        }
        Ok(())
    }

    /// Records `process` and starts it as a tokio task.
    fn submit(&mut self, process: Process) {
        let job = process.job_name().to_owned();
        self.emit(LifecycleEvent::ProcessSubmitted {
            job: job.clone(),
            command: process.command().to_owned(),
        });
        let task = self.launch(&process);
        self.processes.submit(process);
        if let Some(previous) = self.in_flight.insert(job, task) {
            previous.abort();
        }
    }

    fn launch(&self, process: &Process) -> JoinHandle<Execution> {
        let provider = Arc::clone(&self.provider);
        match process.job_name() {
            CREATE_JOB => {
                let spec = self.spec.clone();
                tokio::spawn(async move {
                    match provider.create(&spec).await {
                        Ok(handle) => Execution {
                            output: CommandOutput::success(),
                            handle: Some(handle),
                        },
                        Err(failure) => Execution::output(failure.into_output()),
                    }
                })
            }
            DESTROY_JOB => {
                let handle = self.handle.clone();
                tokio::spawn(async move {
                    Execution::output(
                        provider
                            .destroy(&handle)
                            .await
                            .map_or_else(|failure| failure.into_output(), |()| CommandOutput::success()),
                    )
                })
            }
            _ => {
                let handle = self.handle.clone();
                let request = ExecRequest {
                    command: process.command().to_owned(),
                    sandbox_image: process.sandbox_image().map(ToOwned::to_owned),
                };
                tokio::spawn(async move {
                    Execution::output(
                        provider
                            .execute(&handle, &request)
                            .await
                            .unwrap_or_else(|failure| failure.into_output()),
                    )
                })
            }
        }
    }

    /// Aborts every running job task.
    fn abort_in_flight(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
    }

    async fn pause(&self, delay: Duration) -> Result<(), InstanceError> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(self.cancelled()),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn set_status(&mut self, next: ProcessorStatus) {
        if self.status == next {
            return;
        }
        let from = self.status;
        self.status = next;
        self.emit(LifecycleEvent::StatusChanged { from, to: next });
    }

    fn emit(&self, event: LifecycleEvent) {
        self.observer.on_event(&self.spec.name, &event);
    }

    fn ensure_unlocked(&self, job: &str) -> Result<(), InstanceError> {
        if self.lock.is_locked() {
            return Err(InstanceError::Locked {
                instance: self.spec.name.clone(),
                job: job.to_owned(),
            });
        }
        Ok(())
    }

    fn locked_out(&self, job: &str) -> bool {
        job != DESTROY_JOB && self.lock.is_locked()
    }

    /// Refuses recovery on a frozen instance. Quiet jobs are absorbed.
    fn refuse_locked(&self, process: &Process) -> Result<(), InstanceError> {
        let job = process.job_name().to_owned();
        if process.is_quiet() {
            self.emit(LifecycleEvent::FailureAbsorbed {
                job,
                return_code: process.return_code(),
            });
            return Ok(());
        }
        Err(InstanceError::Locked {
            instance: self.spec.name.clone(),
            job,
        })
    }

    fn ensure_status(
        &self,
        allowed: &[ProcessorStatus],
        operation: &'static str,
    ) -> Result<(), InstanceError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        Err(self.invalid_transition(operation))
    }

    fn invalid_transition(&self, operation: &'static str) -> InstanceError {
        InstanceError::InvalidTransition {
            instance: self.spec.name.clone(),
            from: self.status,
            operation,
        }
    }

    fn cancelled(&self) -> InstanceError {
        InstanceError::Cancelled {
            instance: self.spec.name.clone(),
        }
    }
}

impl<P: Provider + 'static> Drop for Instance<P> {
    fn drop(&mut self) {
        self.abort_in_flight();
    }
}

//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::clock::Clock;
use crate::observer::{LifecycleEvent, LifecycleObserver};
use crate::provider::{
    ExecRequest, InstanceHandle, InstanceSpec, Provider, ProviderFailure, ProviderFuture,
};
use crate::remote::{CommandOutput, CommandRunner, RemoteError};
use crate::status::ProcessorStatus;

fn guard<T>(mutex: &Mutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        guard(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        guard(&self.responses).push_back(CommandOutput::success());
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        guard(&self.responses)
            .push_back(CommandOutput::failure(Some(code), "simulated failure"));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        guard(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        guard(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        guard(&self.responses)
            .pop_front()
            .ok_or_else(|| RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// A call received by [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `create` for the named instance.
    Create(String),
    /// `destroy` for the named instance.
    Destroy(String),
    /// `poll_status`.
    PollStatus,
    /// `poll_startup_complete`.
    PollStartup,
    /// `execute` with the given request.
    Execute(ExecRequest),
}

#[derive(Clone, Debug)]
struct ScriptedExec {
    output: CommandOutput,
    status_after: Option<ProcessorStatus>,
}

#[derive(Debug, Default)]
struct ProviderState {
    status: ProcessorStatus,
    status_script: VecDeque<ProcessorStatus>,
    startup_script: VecDeque<bool>,
    startup_failures: VecDeque<ProviderFailure>,
    never_ready: bool,
    create_delay: Duration,
    exec_script: HashMap<String, VecDeque<ScriptedExec>>,
    create_failures: VecDeque<ProviderFailure>,
    destroy_failures: VecDeque<ProviderFailure>,
    calls: Vec<ProviderCall>,
}

/// In-memory [`Provider`] driven by scripted outcomes.
///
/// Creates succeed and mark the instance `Available`; destroys succeed and
/// mark it `Off`; startup polls report ready; commands succeed. Each of these
/// can be overridden per call. Clones share state, so a test can keep one
/// handle while the instance owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl ScriptedProvider {
    /// Creates a provider with nothing provisioned.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provider-side status directly.
    pub fn set_status(&self, status: ProcessorStatus) {
        guard(&self.state).status = status;
    }

    /// Provider-side status as currently held.
    #[must_use]
    pub fn current_status(&self) -> ProcessorStatus {
        guard(&self.state).status
    }

    /// Queues a status to report from the next status poll instead of the
    /// current one.
    pub fn push_status(&self, status: ProcessorStatus) {
        guard(&self.state).status_script.push_back(status);
    }

    /// Queues the result of the next startup poll.
    pub fn push_startup(&self, ready: bool) {
        guard(&self.state).startup_script.push_back(ready);
    }

    /// Fails the next startup poll with `failure`.
    pub fn fail_next_startup(&self, failure: ProviderFailure) {
        guard(&self.state).startup_failures.push_back(failure);
    }

    /// Makes every create take `delay` before the resource exists.
    pub fn delay_create(&self, delay: Duration) {
        guard(&self.state).create_delay = delay;
    }

    /// Makes unscripted startup polls report the instance as still booting.
    pub fn never_ready(&self) {
        guard(&self.state).never_ready = true;
    }

    /// Queues the output of the next execution of `command`.
    pub fn push_exec(&self, command: impl Into<String>, output: CommandOutput) {
        self.queue_exec(command.into(), output, None);
    }

    /// Queues the output of the next execution of `command` and moves the
    /// provider-side status to `status_after` when it runs, as a preemption
    /// would.
    pub fn push_exec_then(
        &self,
        command: impl Into<String>,
        output: CommandOutput,
        status_after: ProcessorStatus,
    ) {
        self.queue_exec(command.into(), output, Some(status_after));
    }

    fn queue_exec(
        &self,
        command: String,
        output: CommandOutput,
        status_after: Option<ProcessorStatus>,
    ) {
        guard(&self.state)
            .exec_script
            .entry(command)
            .or_default()
            .push_back(ScriptedExec {
                output,
                status_after,
            });
    }

    /// Fails the next create with `failure`.
    pub fn fail_next_create(&self, failure: ProviderFailure) {
        guard(&self.state).create_failures.push_back(failure);
    }

    /// Fails the next destroy with `failure`.
    pub fn fail_next_destroy(&self, failure: ProviderFailure) {
        guard(&self.state).destroy_failures.push_back(failure);
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        guard(&self.state).calls.clone()
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn executed_commands(&self) -> Vec<String> {
        guard(&self.state)
            .calls
            .iter()
            .filter_map(|call| match call {
                ProviderCall::Execute(request) => Some(request.command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of create calls received.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::Create(_)))
    }

    /// Number of destroy calls received.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::Destroy(_)))
    }

    /// Number of startup polls received.
    #[must_use]
    pub fn startup_polls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::PollStartup))
    }

    fn count(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        guard(&self.state)
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }
}

impl Provider for ScriptedProvider {
    fn create<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, InstanceHandle> {
        Box::pin(async move {
            let delay = {
                let mut state = guard(&self.state);
                state.calls.push(ProviderCall::Create(spec.name.clone()));
                state.create_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = guard(&self.state);
            if let Some(failure) = state.create_failures.pop_front() {
                return Err(failure);
            }
            state.status = ProcessorStatus::Available;
            Ok(spec.handle())
        })
    }

    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = guard(&self.state);
            state.calls.push(ProviderCall::Destroy(handle.name.clone()));
            if let Some(failure) = state.destroy_failures.pop_front() {
                return Err(failure);
            }
            state.status = ProcessorStatus::Off;
            Ok(())
        })
    }

    fn poll_status<'a>(
        &'a self,
        _handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, ProcessorStatus> {
        Box::pin(async move {
            let mut state = guard(&self.state);
            state.calls.push(ProviderCall::PollStatus);
            let current = state.status;
            Ok(state.status_script.pop_front().unwrap_or(current))
        })
    }

    fn poll_startup_complete<'a>(&'a self, _handle: &'a InstanceHandle) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let mut state = guard(&self.state);
            state.calls.push(ProviderCall::PollStartup);
            if let Some(failure) = state.startup_failures.pop_front() {
                return Err(failure);
            }
            let fallback = !state.never_ready;
            Ok(state.startup_script.pop_front().unwrap_or(fallback))
        })
    }

    fn execute<'a>(
        &'a self,
        _handle: &'a InstanceHandle,
        request: &'a ExecRequest,
    ) -> ProviderFuture<'a, CommandOutput> {
        Box::pin(async move {
            let mut state = guard(&self.state);
            state.calls.push(ProviderCall::Execute(request.clone()));
            let scripted = state
                .exec_script
                .get_mut(&request.command)
                .and_then(VecDeque::pop_front);
            let Some(exec) = scripted else {
                return Ok(CommandOutput::success());
            };
            if let Some(status) = exec.status_after {
                state.status = status;
            }
            Ok(exec.output)
        })
    }
}

/// [`Clock`] that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = guard(&self.now);
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::UNIX_EPOCH + TimeDelta::days(20_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *guard(&self.now)
    }
}

/// Observer that keeps every event for later assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        guard(&self.events).clone()
    }

    /// Number of events matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        guard(&self.events)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_event(&self, _instance: &str, event: &LifecycleEvent) {
        guard(&self.events).push(event.clone());
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let lock = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: lock,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

//! BDD step definitions for preemption recovery.

use respawn::{CommandOutput, InstanceError, ProcessorStatus};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{PreemptionContext, PreemptionTestError, RunOutcome, run_jobs};

/// Exit status a reclaimed instance reports for the interrupted command.
const PREEMPTED_EXIT_CODE: i32 = 143;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] PreemptionTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a preemptible instance")]
fn preemptible_instance(mut preemption_context: PreemptionContext) -> PreemptionContext {
    preemption_context.preemptible = true;
    preemption_context
}

#[given("a preemptible instance allowing \"{limit}\" resets")]
fn preemptible_instance_with_limit(
    mut preemption_context: PreemptionContext,
    limit: u32,
) -> PreemptionContext {
    preemption_context.preemptible = true;
    preemption_context.config.max_resets = limit;
    preemption_context
}

#[given("a standard instance")]
fn standard_instance(mut preemption_context: PreemptionContext) -> PreemptionContext {
    preemption_context.preemptible = false;
    preemption_context
}

#[given("\"{command}\" is preempted \"{times}\" times")]
fn command_preempted(
    preemption_context: PreemptionContext,
    command: String,
    times: u32,
) -> PreemptionContext {
    for _ in 0..times {
        preemption_context.provider.push_exec_then(
            command.as_str(),
            CommandOutput::failure(Some(PREEMPTED_EXIT_CODE), "Connection closed by remote host"),
            ProcessorStatus::Off,
        );
    }
    preemption_context
}

#[given("\"{command}\" fails once with exit code \"{code}\"")]
fn command_fails_once(
    preemption_context: PreemptionContext,
    command: String,
    code: i32,
) -> PreemptionContext {
    preemption_context
        .provider
        .push_exec(command, CommandOutput::failure(Some(code), "transient error"));
    preemption_context
}

#[given("the instance never finishes booting")]
fn never_boots(preemption_context: PreemptionContext) -> PreemptionContext {
    preemption_context.provider.never_ready();
    preemption_context
}

#[when("I run the job \"{command}\"")]
fn run_single(
    mut preemption_context: PreemptionContext,
    command: String,
) -> Result<PreemptionContext, StepError> {
    let outcome = run_jobs(&preemption_context, &[command])?;
    preemption_context.outcome = Some(outcome);
    Ok(preemption_context)
}

#[when("I run the jobs \"{first}\" and \"{second}\"")]
fn run_pair(
    mut preemption_context: PreemptionContext,
    first: String,
    second: String,
) -> Result<PreemptionContext, StepError> {
    let outcome = run_jobs(&preemption_context, &[first, second])?;
    preemption_context.outcome = Some(outcome);
    Ok(preemption_context)
}

fn outcome(preemption_context: &PreemptionContext) -> Result<&RunOutcome, StepError> {
    preemption_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the run succeeds")]
fn run_succeeds(preemption_context: &PreemptionContext) -> Result<(), StepError> {
    let outcome = outcome(preemption_context)?;
    match &outcome.result {
        Ok(()) if outcome.status == ProcessorStatus::Available => Ok(()),
        Ok(()) => Err(StepError::Assertion(format!(
            "expected an available instance, got {}",
            outcome.status
        ))),
        Err(err) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
    }
}

#[then("the run fails with a fatal command error")]
fn run_fails_fatally(preemption_context: &PreemptionContext) -> Result<(), StepError> {
    match &outcome(preemption_context)?.result {
        Err(InstanceError::CommandFailed {
            return_code: Some(PREEMPTED_EXIT_CODE),
            ..
        }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a fatal command failure, got {other:?}"
        ))),
    }
}

#[then("the run fails because the instance never became available")]
fn run_never_available(preemption_context: &PreemptionContext) -> Result<(), StepError> {
    match &outcome(preemption_context)?.result {
        Err(InstanceError::NeverAvailable { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the instance to never become available, got {other:?}"
        ))),
    }
}

#[then("the instance was reset \"{count}\" times")]
fn reset_count(preemption_context: &PreemptionContext, count: u32) -> Result<(), StepError> {
    let actual = outcome(preemption_context)?.reset_count;
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} resets, got {actual}"
        )))
    }
}

#[then("the executed commands are \"{commands}\"")]
fn executed_commands(
    preemption_context: &PreemptionContext,
    commands: String,
) -> Result<(), StepError> {
    let expected: Vec<String> = commands.split(',').map(str::to_owned).collect();
    let actual = preemption_context.provider.executed_commands();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected commands {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the instance is still preemptible")]
fn still_preemptible(preemption_context: &PreemptionContext) -> Result<(), StepError> {
    if outcome(preemption_context)?.is_preemptible {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "instance should still be preemptible",
        )))
    }
}

#[then("the instance is no longer preemptible")]
fn no_longer_preemptible(preemption_context: &PreemptionContext) -> Result<(), StepError> {
    if outcome(preemption_context)?.is_preemptible {
        Err(StepError::Assertion(String::from(
            "instance should have been promoted to standard",
        )))
    } else {
        Ok(())
    }
}

#[then("\"{count}\" cost records were archived")]
fn cost_records(preemption_context: &PreemptionContext, count: usize) -> Result<(), StepError> {
    let actual = outcome(preemption_context)?.archived;
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} archived incarnations, got {actual}"
        )))
    }
}

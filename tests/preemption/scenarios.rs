//! BDD scenarios for preemption recovery.

use rstest_bdd_macros::scenario;

use super::test_helpers::{PreemptionContext, preemption_context};

#[scenario(
    path = "tests/features/preemption.feature",
    name = "Replay registered jobs after a preemption"
)]
fn scenario_replay_after_preemption(preemption_context: PreemptionContext) {
    let _ = preemption_context;
}

#[scenario(
    path = "tests/features/preemption.feature",
    name = "Promote to a standard instance after exhausting resets"
)]
fn scenario_promote_after_reset_limit(preemption_context: PreemptionContext) {
    let _ = preemption_context;
}

#[scenario(
    path = "tests/features/preemption.feature",
    name = "Standard instances surface preemption as a failure"
)]
fn scenario_standard_instances_fail(preemption_context: PreemptionContext) {
    let _ = preemption_context;
}

#[scenario(
    path = "tests/features/preemption.feature",
    name = "Retry a transient failure on a live instance"
)]
fn scenario_retry_transient_failure(preemption_context: PreemptionContext) {
    let _ = preemption_context;
}

#[scenario(
    path = "tests/features/preemption.feature",
    name = "Give up on an instance that never finishes booting"
)]
fn scenario_never_boots(preemption_context: PreemptionContext) {
    let _ = preemption_context;
}

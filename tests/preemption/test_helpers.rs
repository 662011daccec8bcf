//! Shared fixtures for preemption BDD scenarios.

use std::sync::Arc;

use respawn::test_support::{RecordingObserver, ScriptedProvider};
use respawn::{Instance, InstanceError, InstanceSpec, LifecycleConfig, ProcessorStatus};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Builder;

#[derive(Clone, Debug)]
pub struct PreemptionContext {
    pub provider: ScriptedProvider,
    pub observer: RecordingObserver,
    pub config: LifecycleConfig,
    pub preemptible: bool,
    pub outcome: Option<RunOutcome>,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub result: Result<(), InstanceError>,
    pub reset_count: u32,
    pub is_preemptible: bool,
    pub archived: usize,
    pub status: ProcessorStatus,
}

#[derive(Debug, Error)]
pub enum PreemptionTestError {
    #[error("runtime setup failed: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("invalid fixture: {0}")]
    Fixture(String),
}

#[fixture]
pub fn preemption_context() -> PreemptionContext {
    PreemptionContext {
        provider: ScriptedProvider::new(),
        observer: RecordingObserver::new(),
        config: LifecycleConfig::default(),
        preemptible: false,
        outcome: None,
    }
}

fn spec(preemptible: bool) -> Result<InstanceSpec, PreemptionTestError> {
    InstanceSpec::builder()
        .name("aligner")
        .resources(8, 32, 200)
        .zone("fr-par-2")
        .instance_type("POP2-8C-32G")
        .image_label("ubuntu_noble")
        .project_id("genomics")
        .architecture("x86_64")
        .preemptible(preemptible)
        .hourly_price(0.3)
        .build()
        .map_err(|err| PreemptionTestError::Fixture(err.to_string()))
}

/// Creates an instance and runs `commands` one after another on it, each
/// under its own job name, on a paused clock.
pub fn run_jobs(
    context: &PreemptionContext,
    commands: &[String],
) -> Result<RunOutcome, PreemptionTestError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()?;
    let mut instance = Instance::new(
        spec(context.preemptible)?,
        context.config.clone(),
        Arc::new(context.provider.clone()),
    )
    .with_observer(Arc::new(context.observer.clone()))
    .without_jitter();

    let result = runtime.block_on(async {
        instance.create().await?;
        for (index, command) in commands.iter().enumerate() {
            let job = format!("job-{index}");
            let options = instance.default_options();
            instance.run(&job, command, options)?;
            instance.wait_process(&job).await?;
        }
        Ok::<(), InstanceError>(())
    });

    Ok(RunOutcome {
        result,
        reset_count: instance.reset_count(),
        is_preemptible: instance.is_preemptible(),
        archived: instance.cost_history().len(),
        status: instance.status(),
    })
}

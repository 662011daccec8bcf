//! Lifecycle and preemption recovery for pipeline compute instances.
//!
//! An [`Instance`] drives one remote virtual machine through
//! `Off → Creating → Available → Destroying → Off`, runs named commands on
//! it, classifies their failures against the provider-reported status, and
//! transparently recreates preemptible instances that were reclaimed, replaying
//! the jobs that were registered on the lost incarnation. Cost is tracked per
//! incarnation so the total bill survives resets.
//!
//! Providers plug in through the [`Provider`] trait; [`ScalewayProvider`] is
//! the bundled implementation, reaching instances over SSH via
//! [`RemoteShell`].

pub mod clock;
pub mod config;
pub mod instance;
pub mod observer;
pub mod process;
pub mod provider;
pub mod remote;
pub mod scaleway;
pub mod status;
pub mod test_support;
pub mod throttle;

pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, InstanceOverrides, LifecycleConfig, ScalewayConfig};
pub use instance::{
    BootstrapCommand, CREATE_JOB, CostRecord, DESTROY_JOB, FailureAction, Instance, InstanceError,
};
pub use observer::{
    LifecycleEvent, LifecycleObserver, NoopObserver, PromotionReason, ResetCause, TracingObserver,
};
pub use process::{Process, ProcessRegistry, RunOptions};
pub use provider::{
    BuildError, ExecRequest, InstanceHandle, InstanceSpec, InstanceSpecBuilder, Provider,
    ProviderFailure,
};
pub use remote::{
    CONNECTION_LOST_EXIT_CODE, CommandOutput, CommandRunner, ProcessCommandRunner, RemoteError,
    RemoteShell, SshConfig,
};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use status::{InstanceLock, ProcessorStatus};
pub use throttle::RateLimitThrottle;

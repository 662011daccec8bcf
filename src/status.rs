//! Observed lifecycle state of a remote resource and the shared lock flag
//! that freezes an instance against further work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle state of a remote instance as reported by the provider.
///
/// Transitions follow `Off → Creating → Available → Destroying → Off`. The
/// provider may also move an `Available` or `Creating` instance straight to
/// `Destroying` or `Off` without being asked (preemption, manual deletion).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ProcessorStatus {
    /// No remote resource exists.
    #[default]
    Off,
    /// The resource exists but has not finished booting.
    Creating,
    /// The resource is up and accepts commands.
    Available,
    /// The resource is being torn down.
    Destroying,
}

impl ProcessorStatus {
    /// Returns a lowercase label suitable for logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Destroying => "destroying",
        }
    }

    /// Returns `true` when `destroy()` may be issued from this state.
    #[must_use]
    pub const fn can_destroy(self) -> bool {
        matches!(self, Self::Creating | Self::Available | Self::Destroying)
    }
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared freeze flag for an instance.
///
/// Cloning yields another handle onto the same flag, so a supervisor can lock
/// an instance while its owning worker is parked in a cool-down or a
/// readiness poll.
#[derive(Clone, Debug, Default)]
pub struct InstanceLock {
    locked: Arc<AtomicBool>,
}

impl InstanceLock {
    /// Creates an unlocked flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes the instance.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// Releases the freeze.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    /// Returns `true` while the instance is frozen.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

//! Records of remote command invocations issued against an instance.
//!
//! A [`Process`] is created when a command is submitted and completed exactly
//! once when its execution finishes. The [`ProcessRegistry`] keeps them keyed
//! by job name in submission order, which the reset protocol relies on when
//! replaying work onto a recreated instance.

mod registry;

pub use registry::ProcessRegistry;

use crate::remote::CommandOutput;

/// Per-submission options carried by a [`Process`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Number of retries still available for this job.
    pub retries: u32,
    /// Container image the command runs inside, when sandboxed.
    pub sandbox_image: Option<String>,
    /// Absorb failures instead of escalating them to a fatal error.
    pub quiet: bool,
}

impl RunOptions {
    /// Creates options with the given retry budget.
    #[must_use]
    pub const fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            sandbox_image: None,
            quiet: false,
        }
    }

    /// Runs the command inside `image`.
    #[must_use]
    pub fn sandbox_image(mut self, image: impl Into<String>) -> Self {
        self.sandbox_image = Some(image.into());
        self
    }

    /// Marks the command as quiet.
    #[must_use]
    pub const fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

/// Completion state of a [`Process`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessState {
    /// Submitted and not yet finished.
    Pending,
    /// Finished with the captured output.
    Completed(CommandOutput),
}

/// One remote command invocation and, once finished, its result.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Process {
    job_name: String,
    command: String,
    options: RunOptions,
    state: ProcessState,
}

impl Process {
    /// Creates a pending process.
    #[must_use]
    pub fn new(job_name: impl Into<String>, command: impl Into<String>, options: RunOptions) -> Self {
        Self {
            job_name: job_name.into(),
            command: command.into(),
            options,
            state: ProcessState::Pending,
        }
    }

    /// Job name keying this process within its instance.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Command text handed to the provider.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Submission options.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Retries still available.
    #[must_use]
    pub const fn retries_remaining(&self) -> u32 {
        self.options.retries
    }

    /// Sandbox image, if any.
    #[must_use]
    pub fn sandbox_image(&self) -> Option<&str> {
        self.options.sandbox_image.as_deref()
    }

    /// Whether failures are absorbed.
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        self.options.quiet
    }

    /// Current completion state.
    #[must_use]
    pub const fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Returns `true` once the process has completed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.state, ProcessState::Completed(_))
    }

    /// Return code, once completed and if the execution reported one.
    #[must_use]
    pub const fn return_code(&self) -> Option<i32> {
        match &self.state {
            ProcessState::Completed(output) => output.code,
            ProcessState::Pending => None,
        }
    }

    /// Captured standard output, empty while pending.
    #[must_use]
    pub fn stdout_text(&self) -> &str {
        match &self.state {
            ProcessState::Completed(output) => &output.stdout,
            ProcessState::Pending => "",
        }
    }

    /// Captured standard error, empty while pending.
    #[must_use]
    pub fn stderr_text(&self) -> &str {
        match &self.state {
            ProcessState::Completed(output) => &output.stderr,
            ProcessState::Pending => "",
        }
    }

    /// Returns `true` when the process completed with exit code zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.return_code(), Some(0))
    }

    /// Records the result. A completed process is never overwritten; the
    /// return value reports whether the output was applied.
    pub fn complete(&mut self, output: CommandOutput) -> bool {
        if self.is_complete() {
            return false;
        }
        self.state = ProcessState::Completed(output);
        true
    }

    /// Builds a fresh pending process for the same job and command with one
    /// fewer retry.
    #[must_use]
    pub fn retried(&self) -> Self {
        Self {
            job_name: self.job_name.clone(),
            command: self.command.clone(),
            options: RunOptions {
                retries: self.options.retries.saturating_sub(1),
                ..self.options.clone()
            },
            state: ProcessState::Pending,
        }
    }
}

//! Provider adapter contract for creating, destroying, polling, and running
//! commands on cloud instances.
//!
//! Adapters report failures as [`ProviderFailure`], which carries the return
//! code and error text the failure classifier pattern-matches on.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::remote::CommandOutput;
use crate::status::ProcessorStatus;

/// Error text fragment providers use to signal throttling.
pub const RATE_LIMIT_MARKER: &str = "Rate Limit Exceeded";

/// Error text fragment providers use when a resource name is taken.
pub const ALREADY_EXISTS_MARKER: &str = "already exists";

/// Returns `true` when `text` reports provider throttling.
#[must_use]
pub fn mentions_rate_limit(text: &str) -> bool {
    text.to_ascii_lowercase()
        .contains(&RATE_LIMIT_MARKER.to_ascii_lowercase())
}

/// Returns `true` when `text` reports that the resource already exists.
#[must_use]
pub fn mentions_already_exists(text: &str) -> bool {
    text.to_ascii_lowercase()
        .contains(&ALREADY_EXISTS_MARKER.to_ascii_lowercase())
}

/// Resource requirements and placement for one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceSpec {
    /// Unique instance name; also the provider-side resource name.
    pub name: String,
    /// Number of virtual CPUs requested.
    pub nr_cpus: u32,
    /// Memory in gigabytes.
    pub mem_gb: u32,
    /// Boot disk size in gigabytes.
    pub disk_space_gb: u32,
    /// Target availability zone (for example `fr-par-1`).
    pub zone: String,
    /// Provider machine type already resolved for the cpu/memory request.
    pub instance_type: String,
    /// Human readable image label resolved by the provider.
    pub image_label: String,
    /// Project identifier used for billing and ownership.
    pub project_id: String,
    /// Optional organisation identifier when the provider requires one.
    pub organisation_id: Option<String>,
    /// CPU architecture requested for the instance.
    pub architecture: String,
    /// Whether to request reclaimable (preemptible/spot) capacity.
    pub preemptible: bool,
    /// Cost per hour of one incarnation.
    pub hourly_price: f64,
}

impl InstanceSpec {
    /// Starts a builder for an [`InstanceSpec`].
    #[must_use]
    pub fn builder() -> InstanceSpecBuilder {
        InstanceSpecBuilder::new()
    }

    /// Validates the spec, returning a descriptive error when a required
    /// field is missing or out of range.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), BuildError> {
        for (value, field) in [
            (&self.name, "name"),
            (&self.zone, "zone"),
            (&self.instance_type, "instance_type"),
            (&self.image_label, "image_label"),
            (&self.project_id, "project_id"),
            (&self.architecture, "architecture"),
        ] {
            if value.is_empty() {
                return Err(BuildError::Validation(field.to_owned()));
            }
        }
        if self.nr_cpus == 0 {
            return Err(BuildError::Validation(String::from("nr_cpus")));
        }
        if !self.hourly_price.is_finite() || self.hourly_price.is_sign_negative() {
            return Err(BuildError::Validation(String::from("hourly_price")));
        }
        Ok(())
    }

    /// Handle addressing this instance before the provider has returned one.
    #[must_use]
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle {
            name: self.name.clone(),
            zone: self.zone.clone(),
        }
    }
}

/// Builder for [`InstanceSpec`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceSpecBuilder {
    name: String,
    nr_cpus: u32,
    mem_gb: u32,
    disk_space_gb: u32,
    zone: String,
    instance_type: String,
    image_label: String,
    project_id: String,
    organisation_id: Option<String>,
    architecture: String,
    preemptible: bool,
    hourly_price: f64,
}

impl InstanceSpecBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the cpu, memory (GB) and disk (GB) requirements.
    #[must_use]
    pub const fn resources(mut self, nr_cpus: u32, mem_gb: u32, disk_space_gb: u32) -> Self {
        self.nr_cpus = nr_cpus;
        self.mem_gb = mem_gb;
        self.disk_space_gb = disk_space_gb;
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the machine type.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the image label.
    #[must_use]
    pub fn image_label(mut self, value: impl Into<String>) -> Self {
        self.image_label = value.into();
        self
    }

    /// Sets the project identifier.
    #[must_use]
    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.project_id = value.into();
        self
    }

    /// Sets the optional organisation identifier.
    #[must_use]
    pub fn organisation_id(mut self, value: Option<String>) -> Self {
        self.organisation_id = value;
        self
    }

    /// Sets the architecture.
    #[must_use]
    pub fn architecture(mut self, value: impl Into<String>) -> Self {
        self.architecture = value.into();
        self
    }

    /// Requests reclaimable capacity.
    #[must_use]
    pub const fn preemptible(mut self, value: bool) -> Self {
        self.preemptible = value;
        self
    }

    /// Sets the cost per hour.
    #[must_use]
    pub const fn hourly_price(mut self, value: f64) -> Self {
        self.hourly_price = value;
        self
    }

    /// Builds and validates the [`InstanceSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceSpec, BuildError> {
        let spec = InstanceSpec {
            name: self.name.trim().to_owned(),
            nr_cpus: self.nr_cpus,
            mem_gb: self.mem_gb,
            disk_space_gb: self.disk_space_gb,
            zone: self.zone.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            image_label: self.image_label.trim().to_owned(),
            project_id: self.project_id.trim().to_owned(),
            organisation_id: self.organisation_id.map(|value| value.trim().to_owned()),
            architecture: self.architecture.trim().to_owned(),
            preemptible: self.preemptible,
            hourly_price: self.hourly_price,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while building an [`InstanceSpec`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// Raised when a required field is missing or out of range.
    #[error("missing or invalid field: {0}")]
    Validation(String),
}

/// Provider-side address of an instance.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstanceHandle {
    /// Resource name.
    pub name: String,
    /// Zone the resource lives in.
    pub zone: String,
}

/// A command to execute on an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecRequest {
    /// Command text.
    pub command: String,
    /// Container image to run the command in.
    pub sandbox_image: Option<String>,
}

/// Failure reported by a provider operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("provider operation failed with {}: {stderr}", code_label(.return_code.as_ref()))]
pub struct ProviderFailure {
    /// Return code of the underlying operation, when one exists.
    pub return_code: Option<i32>,
    /// Error text captured from the operation.
    pub stderr: String,
}

fn code_label(code: Option<&i32>) -> String {
    code.map_or_else(|| String::from("no exit status"), |value| format!("status {value}"))
}

impl ProviderFailure {
    /// Creates a failure with the given return code and error text.
    #[must_use]
    pub fn new(return_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            return_code,
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the provider throttled the request.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        mentions_rate_limit(&self.stderr)
    }

    /// Returns `true` when the resource already existed.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        mentions_already_exists(&self.stderr)
    }

    /// Converts the failure into the output recorded on a process.
    #[must_use]
    pub fn into_output(self) -> CommandOutput {
        CommandOutput::failure(self.return_code.or(Some(1)), self.stderr)
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderFailure>> + Send + 'a>>;

/// Interface implemented by cloud provider adapters.
///
/// Adapters are shared process-wide and must be safe to call from several
/// instance workers at once.
pub trait Provider: Send + Sync {
    /// Creates the remote resource described by `spec`.
    fn create<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, InstanceHandle>;

    /// Destroys the remote resource.
    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, ()>;

    /// Reports the provider's current view of the resource.
    fn poll_status<'a>(&'a self, handle: &'a InstanceHandle)
    -> ProviderFuture<'a, ProcessorStatus>;

    /// Reports whether the instance finished its startup sequence.
    fn poll_startup_complete<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, bool>;

    /// Runs a command on the instance. A non-zero exit is reported through the
    /// returned output rather than as an error.
    fn execute<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        request: &'a ExecRequest,
    ) -> ProviderFuture<'a, CommandOutput>;
}

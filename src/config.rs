//! Configuration loading via `ortho-config`.
//!
//! [`LifecycleConfig`] carries the engine's retry, reset and timing knobs;
//! [`ScalewayConfig`] carries provider credentials and instance defaults.
//! Both merge defaults, `respawn.toml`, environment variables and CLI flags
//! in that order of precedence.

use std::ffi::OsString;
use std::time::Duration;

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::InstanceSpec;

/// Tunables for instance creation, failure handling and resets.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "RESPAWN",
    discovery(
        app_name = "respawn",
        env_var = "RESPAWN_CONFIG_PATH",
        config_file_name = "respawn.toml",
        dotfile_name = ".respawn.toml",
        project_file_name = "respawn.toml"
    )
)]
pub struct LifecycleConfig {
    /// Resets allowed before a preemptible instance is promoted to a
    /// standard one.
    #[ortho_config(default = 6)]
    pub max_resets: u32,
    /// Retry budget given to commands submitted without an explicit one.
    #[ortho_config(default = 3)]
    pub default_num_cmd_retries: u32,
    /// Resets allowed for incarnations that never finish booting.
    #[ortho_config(default = 3)]
    pub creation_resets_limit: u32,
    /// Number of startup polls before an incarnation is declared stuck.
    #[ortho_config(default = 10)]
    pub startup_poll_cycles: u32,
    /// Seconds between startup polls.
    #[ortho_config(default = 60)]
    pub startup_poll_interval_secs: u64,
    /// Seconds to wait after a command loses its connection.
    #[ortho_config(default = 60)]
    pub connection_lost_cooldown_secs: u64,
    /// Seconds to wait before resubmitting a failed command.
    #[ortho_config(default = 3)]
    pub retry_delay_secs: u64,
    /// First rate-limit back-off in seconds.
    #[ortho_config(default = 10)]
    pub rate_limit_base_secs: u64,
    /// Ceiling for the rate-limit back-off in seconds.
    #[ortho_config(default = 300)]
    pub rate_limit_max_secs: u64,
    /// Hours a single incarnation may run before it stops being treated as
    /// preemptible.
    #[ortho_config(default = 24)]
    pub preemptible_runtime_limit_hours: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_resets: 6,
            default_num_cmd_retries: 3,
            creation_resets_limit: 3,
            startup_poll_cycles: 10,
            startup_poll_interval_secs: 60,
            connection_lost_cooldown_secs: 60,
            retry_delay_secs: 3,
            rate_limit_base_secs: 10,
            rate_limit_max_secs: 300,
            preemptible_runtime_limit_hours: 24,
        }
    }
}

impl LifecycleConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, or a validation
    /// error when the merged values are inconsistent.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([OsString::from("respawn")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values are usable together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_poll_cycles == 0 {
            return Err(ConfigError::Invalid(String::from(
                "startup_poll_cycles must be at least 1 (RESPAWN_STARTUP_POLL_CYCLES)",
            )));
        }
        if self.max_resets == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_resets must be at least 1 (RESPAWN_MAX_RESETS)",
            )));
        }
        if self.rate_limit_max_secs < self.rate_limit_base_secs {
            return Err(ConfigError::Invalid(format!(
                "rate_limit_max_secs ({}) must not be below rate_limit_base_secs ({})",
                self.rate_limit_max_secs, self.rate_limit_base_secs
            )));
        }
        Ok(())
    }

    /// Delay between startup polls.
    #[must_use]
    pub const fn startup_poll_interval(&self) -> Duration {
        Duration::from_secs(self.startup_poll_interval_secs)
    }

    /// Cool-down after a lost connection.
    #[must_use]
    pub const fn connection_lost_cooldown(&self) -> Duration {
        Duration::from_secs(self.connection_lost_cooldown_secs)
    }

    /// Delay before a retry.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// First rate-limit back-off.
    #[must_use]
    pub const fn rate_limit_base(&self) -> Duration {
        Duration::from_secs(self.rate_limit_base_secs)
    }

    /// Rate-limit back-off ceiling.
    #[must_use]
    pub const fn rate_limit_max(&self) -> Duration {
        Duration::from_secs(self.rate_limit_max_secs)
    }

    /// Runtime after which an incarnation is no longer preemptible.
    #[must_use]
    pub fn preemptible_runtime_limit(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.preemptible_runtime_limit_hours))
    }
}

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

/// Per-instance values supplied by the caller on top of the configured
/// provider defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceOverrides {
    /// Instance name.
    pub name: String,
    /// Virtual CPUs.
    pub nr_cpus: u32,
    /// Memory in gigabytes.
    pub mem_gb: u32,
    /// Disk in gigabytes.
    pub disk_space_gb: u32,
    /// Whether to request reclaimable capacity.
    pub preemptible: bool,
    /// Cost per hour.
    pub hourly_price: f64,
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [scaleway] in respawn.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("respawn")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds an [`InstanceSpec`] from the configured defaults and the
    /// caller's per-instance values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn instance_spec(&self, overrides: &InstanceOverrides) -> Result<InstanceSpec, ConfigError> {
        self.validate()?;
        InstanceSpec::builder()
            .name(&overrides.name)
            .resources(overrides.nr_cpus, overrides.mem_gb, overrides.disk_space_gb)
            .image_label(&self.default_image)
            .instance_type(&self.default_instance_type)
            .zone(&self.default_zone)
            .project_id(&self.default_project_id)
            .organisation_id(self.default_organization_id.clone())
            .architecture(&self.default_architecture)
            .preemptible(overrides.preemptible)
            .hourly_price(overrides.hourly_price)
            .build()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.secret_key,
                FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
            ),
            (
                &self.default_project_id,
                FieldMetadata::new(
                    "Scaleway project ID",
                    "SCW_DEFAULT_PROJECT_ID",
                    "default_project_id",
                ),
            ),
            (
                &self.default_image,
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image"),
            ),
            (
                &self.default_instance_type,
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "default_instance_type",
                ),
            ),
            (
                &self.default_zone,
                FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "default_zone"),
            ),
            (
                &self.default_architecture,
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "default_architecture",
                ),
            ),
        ];
        for (value, metadata) in &fields {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates values that are present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

//! Error types for the Scaleway provider.

use crate::config::ConfigError;
use crate::remote::RemoteError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayProviderError {
    /// Raised when the provider configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested image label cannot be resolved.
    #[error("image '{label}' (arch {arch}) not found in zone {zone}")]
    ImageNotFound {
        /// Image label requested by the instance spec.
        label: String,
        /// Architecture requested by the instance spec.
        arch: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the server type is not offered in the selected zone.
    #[error("instance type '{instance_type}' not available in zone {zone}")]
    InstanceTypeUnavailable {
        /// Requested commercial type.
        instance_type: String,
        /// Target zone.
        zone: String,
    },
    /// Raised when a server with the same name is already provisioned.
    #[error("instance {name} already exists")]
    AlreadyExists {
        /// Name that clashed.
        name: String,
    },
    /// Raised when the API throttles the account.
    #[error("Rate Limit Exceeded: {message}")]
    RateLimited {
        /// Body returned alongside the throttling status.
        message: String,
    },
    /// Raised when the server never exposes a public address.
    #[error("instance {instance} has no public IPv4 address")]
    MissingPublicIp {
        /// Instance name.
        instance: String,
    },
    /// Raised when teardown leaves a server visible in the API.
    #[error("server {instance_id} still present after teardown")]
    ResidualResource {
        /// Provider server identifier.
        instance_id: String,
    },
    /// Raised when a server cannot be powered on.
    #[error("server {instance_id} in state {state} cannot be powered on")]
    PowerOnNotAllowed {
        /// Provider server identifier.
        instance_id: String,
        /// State reported by the provider.
        state: String,
    },
    /// Wrapper for SDK, transport and SSH failures.
    #[error("provider error: {message}")]
    Provider {
        /// Underlying message.
        message: String,
    },
}

impl From<ScalewayError> for ScalewayProviderError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayProviderError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<RemoteError> for ScalewayProviderError {
    fn from(value: RemoteError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

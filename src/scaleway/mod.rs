//! Scaleway implementation of the [`Provider`] contract.
//!
//! Instances are created through the Instances API, addressed by name, and
//! reached over SSH for startup checks and command execution.

mod error;
mod lifecycle;
mod types;

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use scaleway_rs::ScalewayApi;

use crate::config::ScalewayConfig;
use crate::provider::{
    ExecRequest, InstanceHandle, InstanceSpec, Provider, ProviderFailure, ProviderFuture,
};
use crate::remote::{CONNECTION_LOST_EXIT_CODE, CommandOutput, CommandRunner, RemoteShell};
use crate::status::ProcessorStatus;
use lifecycle::InstanceSnapshot;
use types::{InstanceId, Zone};

pub use error::ScalewayProviderError;
pub use types::status_from_state;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Marker file cloud-init writes once first boot has finished.
pub const BOOT_FINISHED_MARKER: &str = "/var/lib/cloud/instance/boot-finished";

/// Provider that provisions instances through the Scaleway Instances API.
pub struct ScalewayProvider<R: CommandRunner> {
    api: ScalewayApi,
    config: ScalewayConfig,
    shell: RemoteShell<R>,
    servers: Mutex<HashMap<String, InstanceId>>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl<R> ScalewayProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    /// Constructs a provider from configuration and an SSH shell.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the provided
    /// configuration fails validation.
    pub fn new(config: ScalewayConfig, shell: RemoteShell<R>) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            shell,
            servers: Mutex::new(HashMap::new()),
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    /// Configuration the provider was built with.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }

    fn remember(&self, name: &str, id: InstanceId) {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), id);
    }

    fn server_id(&self, name: &str) -> Option<InstanceId> {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn forget(&self, name: &str) {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    async fn snapshot(
        &self,
        handle: &InstanceHandle,
    ) -> Result<Option<InstanceSnapshot>, ScalewayProviderError> {
        let Some(id) = self.server_id(&handle.name) else {
            return Ok(None);
        };
        self.fetch_instance(&Zone::from(handle.zone.as_str()), &id)
            .await
    }

    async fn public_address(&self, handle: &InstanceHandle) -> Result<IpAddr, ScalewayProviderError> {
        let snapshot = self.snapshot(handle).await?;
        snapshot
            .as_ref()
            .and_then(|server| server.public_ip.as_deref())
            .and_then(|ip| IpAddr::from_str(ip).ok())
            .ok_or_else(|| ScalewayProviderError::MissingPublicIp {
                instance: handle.name.clone(),
            })
    }

    async fn run_remote(
        &self,
        host: IpAddr,
        command: String,
        sandbox_image: Option<String>,
    ) -> Result<CommandOutput, ScalewayProviderError> {
        let shell = self.shell.clone();
        let target = shell.target(host);
        tokio::task::spawn_blocking(move || {
            shell.execute(target, &command, sandbox_image.as_deref())
        })
        .await
        .map_err(|err| ScalewayProviderError::Provider {
            message: err.to_string(),
        })?
        .map_err(ScalewayProviderError::from)
    }
}

impl<R> Provider for ScalewayProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    fn create<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, InstanceHandle> {
        Box::pin(async move {
            let image_id = self.resolve_image_id(spec).await?;
            let server = self.create_instance_stopped(spec, &image_id).await?;
            let snapshot = InstanceSnapshot::from(server);
            self.remember(&spec.name, snapshot.id.clone());
            self.power_on_if_needed(&Zone::from(spec.zone.as_str()), &snapshot)
                .await?;
            Ok(spec.handle())
        })
    }

    fn destroy<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let Some(id) = self.server_id(&handle.name) else {
                return Ok(());
            };
            let zone = Zone::from(handle.zone.as_str());
            self.api
                .delete_instance_async(zone.as_str(), id.as_str())
                .await
                .map_err(ScalewayProviderError::from)?;
            self.wait_until_gone(&zone, &id).await?;
            self.forget(&handle.name);
            Ok(())
        })
    }

    fn poll_status<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, ProcessorStatus> {
        Box::pin(async move {
            let snapshot = self.snapshot(handle).await?;
            Ok(snapshot.map_or(ProcessorStatus::Off, |server| {
                status_from_state(&server.state)
            }))
        })
    }

    fn poll_startup_complete<'a>(&'a self, handle: &'a InstanceHandle) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let snapshot = self.snapshot(handle).await?;
            let Some(server) = snapshot else {
                return Ok(false);
            };
            if status_from_state(&server.state) != ProcessorStatus::Available {
                return Ok(false);
            }
            let Some(host) = server
                .public_ip
                .as_deref()
                .and_then(|ip| IpAddr::from_str(ip).ok())
            else {
                return Ok(false);
            };
            let probe = format!("sudo test -f {BOOT_FINISHED_MARKER}");
            let output = self.run_remote(host, probe, None).await?;
            Ok(output.is_success())
        })
    }

    fn execute<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        request: &'a ExecRequest,
    ) -> ProviderFuture<'a, CommandOutput> {
        Box::pin(async move {
            let host = match self.public_address(handle).await {
                Ok(host) => host,
                Err(err) => {
                    return Ok(CommandOutput::failure(
                        Some(CONNECTION_LOST_EXIT_CODE),
                        err.to_string(),
                    ));
                }
            };
            let output = self
                .run_remote(host, request.command.clone(), request.sandbox_image.clone())
                .await?;
            Ok(output)
        })
    }
}

impl From<ScalewayProviderError> for ProviderFailure {
    fn from(value: ScalewayProviderError) -> Self {
        Self::new(Some(1), value.to_string())
    }
}

//! Server lookup and teardown wait helpers for the Scaleway provider.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use crate::remote::CommandRunner;
use crate::scaleway::types::{InstanceId, Zone};

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::InstanceSnapshot;

impl<R> ScalewayProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        zone: &Zone,
        id: &InstanceId,
    ) -> Result<Option<InstanceSnapshot>, ScalewayProviderError> {
        let mut servers = self
            .api
            .list_instances(zone.as_str())
            .servers(id.as_str())
            .per_page(1)
            .run_async()
            .await?;
        Ok(servers.pop().map(InstanceSnapshot::from))
    }

    pub(in crate::scaleway) async fn wait_until_gone(
        &self,
        zone: &Zone,
        id: &InstanceId,
    ) -> Result<(), ScalewayProviderError> {
        poll_until_gone(id, self.poll_interval, self.wait_timeout, move || {
            self.fetch_instance(zone, id)
        })
        .await
    }
}

/// Polls `fetch` until the server disappears or `wait_timeout` elapses.
pub(in crate::scaleway) async fn poll_until_gone<F, Fut>(
    id: &InstanceId,
    poll_interval: Duration,
    wait_timeout: Duration,
    mut fetch: F,
) -> Result<(), ScalewayProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayProviderError>>,
{
    let deadline = Instant::now() + wait_timeout;
    while Instant::now() <= deadline {
        if fetch().await?.is_none() {
            return Ok(());
        }
        sleep(poll_interval).await;
    }
    Err(ScalewayProviderError::ResidualResource {
        instance_id: id.as_str().to_owned(),
    })
}

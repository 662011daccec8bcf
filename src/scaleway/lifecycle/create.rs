//! Server creation helpers for the Scaleway provider.
//!
//! Servers are created stopped and powered on afterwards, which lets the
//! provider record the server identifier before the first boot starts.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::provider::InstanceSpec;
use crate::remote::CommandRunner;
use crate::scaleway::types::Zone;

use super::super::{ScalewayProvider, ScalewayProviderError};
use super::InstanceSnapshot;

const TAG: &str = "respawn";

#[derive(Serialize)]
struct CreateServerRequest {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

#[derive(Deserialize)]
struct CreateServerResponse {
    server: scaleway_rs::ScalewayInstance,
}

pub(in crate::scaleway) fn instance_tags(spec: &InstanceSpec) -> Vec<String> {
    let tier = if spec.preemptible {
        "preemptible"
    } else {
        "standard"
    };
    vec![TAG.to_owned(), tier.to_owned()]
}

pub(in crate::scaleway) fn is_instance_type_error(
    api_err: &scaleway_rs::ScalewayApiError,
    spec: &InstanceSpec,
) -> bool {
    matches!(api_err.resource.as_deref(), Some("commercial_type"))
        || api_err
            .resource_id
            .as_deref()
            .is_some_and(|id| id == spec.instance_type)
}

/// Translates a rejected creation request into a provider error.
pub(in crate::scaleway) fn creation_error(
    status: StatusCode,
    body: &[u8],
    spec: &InstanceSpec,
) -> ScalewayProviderError {
    let message = String::from_utf8_lossy(body).into_owned();
    if status == StatusCode::CONFLICT {
        return ScalewayProviderError::AlreadyExists {
            name: spec.name.clone(),
        };
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ScalewayProviderError::RateLimited { message };
    }
    if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(body)
        && is_instance_type_error(&api_err, spec)
    {
        return ScalewayProviderError::InstanceTypeUnavailable {
            instance_type: spec.instance_type.clone(),
            zone: spec.zone.clone(),
        };
    }
    ScalewayProviderError::Provider { message }
}

impl<R> ScalewayProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &Zone,
        snapshot: &InstanceSnapshot,
    ) -> Result<(), ScalewayProviderError> {
        if snapshot.state.as_str() == "running" {
            return Ok(());
        }

        if snapshot
            .allowed_actions
            .iter()
            .any(|action| action.as_str() == "poweron")
        {
            self.api
                .perform_instance_action_async(zone.as_str(), snapshot.id.as_str(), "poweron")
                .await?;
            return Ok(());
        }

        Err(ScalewayProviderError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.as_str().to_owned(),
        })
    }

    /// Creates a stopped server named after the instance spec.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::AlreadyExists`] on a name clash,
    /// [`ScalewayProviderError::RateLimited`] when throttled, and
    /// [`ScalewayProviderError::InstanceTypeUnavailable`] when the zone does
    /// not offer the requested type.
    pub(in crate::scaleway) async fn create_instance_stopped(
        &self,
        spec: &InstanceSpec,
        image_id: &str,
    ) -> Result<scaleway_rs::ScalewayInstance, ScalewayProviderError> {
        let url = format!(
            "{}/zones/{}/servers",
            super::SCALEWAY_INSTANCE_API_BASE,
            spec.zone
        );
        let payload = CreateServerRequest {
            name: spec.name.clone(),
            commercial_type: spec.instance_type.clone(),
            image: image_id.to_owned(),
            project: spec.project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: instance_tags(spec),
            stopped: true,
            organization: spec.organisation_id.clone(),
        };

        let response = super::HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ScalewayProviderError::Provider {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayProviderError::Provider {
                message: err.to_string(),
            })?;

        if status.is_success() {
            let parsed: CreateServerResponse =
                serde_json::from_slice(&body).map_err(|err| ScalewayProviderError::Provider {
                    message: err.to_string(),
                })?;
            return Ok(parsed.server);
        }

        Err(creation_error(status, &body, spec))
    }
}

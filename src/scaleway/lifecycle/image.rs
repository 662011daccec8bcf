//! Image resolution helpers for the Scaleway provider.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::provider::InstanceSpec;
use crate::remote::CommandRunner;

use super::super::{ScalewayProvider, ScalewayProviderError};

impl<R> ScalewayProvider<R>
where
    R: CommandRunner + Clone + Send + Sync + 'static,
{
    #[expect(
        clippy::excessive_nesting,
        reason = "organisation scoping requires nested builder updates before execution"
    )]
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        spec: &InstanceSpec,
    ) -> Result<String, ScalewayProviderError> {
        resolve_image_id_with(
            spec,
            || async move {
                if spec.project_id.is_empty() {
                    Ok(Vec::new())
                } else {
                    let mut scoped =
                        ScalewayListInstanceImagesBuilder::new(self.api.clone(), &spec.zone)
                            .public(true)
                            .project(&spec.project_id)
                            .name(&spec.image_label)
                            .arch(&spec.architecture);
                    if let Some(org) = &spec.organisation_id {
                        scoped = scoped.organization(org);
                    }
                    scoped.run_async().await.map_err(ScalewayProviderError::from)
                }
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(self.api.clone(), &spec.zone)
                    .public(true)
                    .name(&spec.image_label)
                    .arch(&spec.architecture)
                    .run_async()
                    .await
                    .map_err(ScalewayProviderError::from)
            },
        )
        .await
    }
}

/// Looks up project images first and falls back to public ones.
pub(in crate::scaleway) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
    spec: &InstanceSpec,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ScalewayProviderError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayProviderError>>,
{
    let project_images = filter_images(project_fetch().await?, spec);
    let candidates = if project_images.is_empty() {
        filter_images(public_fetch().await?, spec)
    } else {
        project_images
    };
    select_image_id(candidates, spec)
}

/// Picks the most recently created candidate.
pub(in crate::scaleway) fn select_image_id(
    candidates: Vec<ScalewayImage>,
    spec: &InstanceSpec,
) -> Result<String, ScalewayProviderError> {
    candidates
        .into_iter()
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
        .ok_or_else(|| ScalewayProviderError::ImageNotFound {
            label: spec.image_label.clone(),
            arch: spec.architecture.clone(),
            zone: spec.zone.clone(),
        })
}

pub(in crate::scaleway) fn filter_images(
    images: Vec<ScalewayImage>,
    spec: &InstanceSpec,
) -> Vec<ScalewayImage> {
    images
        .into_iter()
        .filter(|image| image.arch == spec.architecture)
        .filter(|image| image.state == "available")
        .collect()
}

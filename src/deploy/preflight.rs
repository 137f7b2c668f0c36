// ABOUTME: Pre-flight check that every template a run may deploy exists in the bucket.
// ABOUTME: Runs before any mutation so a missing artifact never leaves stacks half-updated.

use futures::future::try_join_all;
use snafu::{ResultExt, ensure};
use std::collections::BTreeSet;

use crate::cloud::ArtifactOps;

use super::error::{PreflightArtifactMissingSnafu, PreflightCheckSnafu, RunError};
use super::step::DeploymentSequence;

/// Check every forward and backward template of `sequence` in `bucket`.
///
/// Each distinct path is checked once, concurrently. Every missing path is
/// reported, not only the first.
pub async fn verify_templates<S>(
    store: &S,
    bucket: &str,
    sequence: &DeploymentSequence,
) -> Result<(), RunError>
where
    S: ArtifactOps + ?Sized,
{
    let paths: BTreeSet<&str> = sequence
        .iter()
        .flat_map(|step| [step.forward(), step.backward()])
        .map(|operation| operation.template().path())
        .collect();

    tracing::debug!(bucket, templates = paths.len(), "checking templates");

    let found = try_join_all(paths.iter().map(|path| async move {
        store
            .object_exists(bucket, path)
            .await
            .map(|exists| (*path, exists))
    }))
    .await
    .context(PreflightCheckSnafu { bucket })?;

    let missing: Vec<String> = found
        .into_iter()
        .filter(|(_, exists)| !exists)
        .map(|(path, _)| path.to_string())
        .collect();

    ensure!(
        missing.is_empty(),
        PreflightArtifactMissingSnafu { bucket, missing }
    );
    Ok(())
}

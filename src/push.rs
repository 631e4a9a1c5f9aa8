//! The push pipeline: decode output in, manifest digest out.
//!
//! Blobs are deduplicated by digest and fanned out under a bounded
//! semaphore owned by the single push; the manifest PUT happens strictly
//! after every blob has landed. The first blob failure aborts the
//! remaining transfers and the manifest is never published.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::blob::{self, BlobPayload};
use crate::digest::Digest;
use crate::error::{RegistryError, Result};
use crate::image::{BlobRef, ImageBundle};
use crate::manifest::{self, ManifestV2};
use crate::reference::{split_repo_tag, validate_reference, validate_repository, validate_tag};
use crate::retry::send_with_retry;
use crate::RegistryClient;

/// One published `repo:tag` and the manifest digest it now points at.
#[derive(Debug, Clone)]
pub struct TaggedManifest {
    pub repo_tag: String,
    pub digest: Digest,
}

pub(crate) async fn push_bundle(
    client: &RegistryClient,
    bundle: &ImageBundle,
    repository: &str,
    reference: &str,
) -> Result<Digest> {
    validate_repository(repository)?;
    validate_reference(reference)?;

    ensure_v2(client).await?;
    upload_blobs(client, bundle, repository).await?;

    let manifest = ManifestV2::from_bundle(bundle);
    let digest =
        manifest::put_manifest(&client.session, &client.retry, repository, reference, &manifest)
            .await?;
    log::debug!("pushed {repository}:{reference} as {digest}");
    Ok(digest)
}

pub(crate) async fn push_with_first_original_tag(
    client: &RegistryClient,
    bundle: &ImageBundle,
) -> Result<TaggedManifest> {
    let repo_tag = bundle
        .original_tags
        .first()
        .ok_or(RegistryError::NoOriginalTag)?;
    let (repository, tag) = split_repo_tag(repo_tag);
    let digest = push_bundle(client, bundle, &repository, &tag).await?;
    Ok(TaggedManifest {
        repo_tag: format!("{repository}:{tag}"),
        digest,
    })
}

/// Publish every original tag. Blobs transfer once per distinct repository
/// (once, in the common single-repository case); each tag then only costs
/// a manifest PUT. Per-tag failures are collected, not short-circuited.
pub(crate) async fn push_with_all_original_tags(
    client: &RegistryClient,
    bundle: &ImageBundle,
) -> Result<Vec<TaggedManifest>> {
    if bundle.original_tags.is_empty() {
        return Err(RegistryError::NoOriginalTag);
    }

    let targets: Vec<(String, String, String)> = bundle
        .original_tags
        .iter()
        .map(|repo_tag| {
            let (repository, tag) = split_repo_tag(repo_tag);
            (repo_tag.clone(), repository, tag)
        })
        .collect();

    // all names must be valid before the first byte goes out
    for (_, repository, tag) in &targets {
        validate_repository(repository)?;
        validate_tag(tag)?;
    }

    ensure_v2(client).await?;

    let mut repositories_seen = Vec::new();
    for (_, repository, _) in &targets {
        if !repositories_seen.contains(repository) {
            repositories_seen.push(repository.clone());
        }
    }
    for repository in &repositories_seen {
        upload_blobs(client, bundle, repository).await?;
    }

    let manifest = ManifestV2::from_bundle(bundle);
    let outcomes = join_all(targets.iter().map(|(repo_tag, repository, tag)| {
        let manifest = &manifest;
        async move {
            let result =
                manifest::put_manifest(&client.session, &client.retry, repository, tag, manifest)
                    .await;
            (repo_tag.clone(), result)
        }
    }))
    .await;

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (repo_tag, result) in outcomes {
        match result {
            Ok(digest) => succeeded.push(TaggedManifest { repo_tag, digest }),
            Err(err) => failed.push((repo_tag, err)),
        }
    }

    if failed.is_empty() {
        Ok(succeeded)
    } else {
        Err(RegistryError::MultiTagPush {
            succeeded: succeeded
                .into_iter()
                .map(|t| (t.repo_tag, t.digest))
                .collect(),
            failed,
        })
    }
}

/// Pre-push probe: the endpoint must speak the v2 API.
async fn ensure_v2(client: &RegistryClient) -> Result<()> {
    let url = client.session.v2_url("");
    let response = send_with_retry(&client.retry, "version probe", || {
        client.session.client().get(&url).send()
    })
    .await?;

    if response.status() == StatusCode::OK {
        Ok(())
    } else {
        Err(RegistryError::protocol(
            response.status(),
            "registry does not support the v2 API",
        ))
    }
}

/// Transfer every unique blob of the bundle, bounded by the configured
/// per-push concurrency. The first failure aborts the siblings.
async fn upload_blobs(
    client: &RegistryClient,
    bundle: &ImageBundle,
    repository: &str,
) -> Result<()> {
    let blobs = unique_blobs(bundle);
    log::debug!(
        "transferring {} unique blobs to {repository} (concurrency {})",
        blobs.len(),
        client.push.max_concurrent_blobs
    );

    let semaphore = Arc::new(Semaphore::new(client.push.max_concurrent_blobs.max(1)));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for (blob, payload) in blobs {
        let session = Arc::clone(&client.session);
        let retry = client.retry.clone();
        let push = client.push.clone();
        let repository = repository.to_string();
        let semaphore = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| RegistryError::Cancelled)?;
            blob::upload_blob(&session, &retry, &push, &repository, &blob, &payload).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tasks.abort_all();
                return Err(err);
            }
            Err(join_err) => {
                tasks.abort_all();
                if join_err.is_cancelled() {
                    return Err(RegistryError::Cancelled);
                }
                std::panic::resume_unwind(join_err.into_panic());
            }
        }
    }
    Ok(())
}

/// Config first, then layers in manifest order, one entry per digest. A
/// layer shared across positions transfers once; the manifest still lists
/// it at every position.
fn unique_blobs(bundle: &ImageBundle) -> Vec<(BlobRef, BlobPayload)> {
    let mut seen: HashSet<Digest> = HashSet::new();
    let mut blobs = Vec::with_capacity(bundle.layers.len() + 1);

    if seen.insert(bundle.config.digest.clone()) {
        blobs.push((
            bundle.config.clone(),
            BlobPayload::Memory(bundle.config_bytes.clone()),
        ));
    }
    for layer in &bundle.layers {
        if seen.insert(layer.blob.digest.clone()) {
            blobs.push((
                layer.blob.clone(),
                BlobPayload::Layer(bundle.layer_source(layer)),
            ));
        }
    }
    blobs
}

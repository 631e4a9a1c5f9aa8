//! Push `docker save` tar archives into an unauthenticated Docker Registry
//! HTTP API v2 endpoint.
//!
//! The heart of the crate is the push pipeline: a tar archive is decoded
//! into its content-addressed parts, every blob is transferred under a
//! bounded fan-out with skip-if-present semantics, and a schema-2 manifest
//! referencing exactly what was uploaded is published last. Around that
//! core sit the read and delete operations that share the same HTTP
//! session and digest discipline: blob existence and fetch, manifest
//! get/put/delete, repository and tag listing.
//!
//! ```no_run
//! use regpush::{ImageBundle, RegistryClient, RegistryEndpoint};
//!
//! # async fn run() -> regpush::Result<()> {
//! let client = RegistryClient::new(RegistryEndpoint::new("http://localhost:5000"))?;
//! let bundle = ImageBundle::from_tar("app.tar").await?;
//! let digest = client.push(&bundle, "app", "latest").await?;
//! println!("pushed as {digest}");
//! # Ok(())
//! # }
//! ```
//!
//! Registries that require authentication are out of scope; the target is
//! a plain `registry:2` deployment.

mod blob;
mod catalog;
pub mod config;
pub mod digest;
pub mod error;
mod http;
pub mod image;
pub mod manifest;
mod push;
pub mod reference;
mod retry;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

pub use config::{PushConfig, RegistryEndpoint, RetryConfig};
pub use digest::Digest;
pub use error::{RegistryError, Result, UploadPhase};
pub use image::{BlobRef, ImageBundle, LayerRef};
pub use manifest::{BlobDescriptor, FetchedManifest, ManifestV2};
pub use push::TaggedManifest;

use http::HttpSession;

/// Client for one registry endpoint. Cheap to clone; all clones share the
/// same connection pool.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    pub(crate) session: Arc<HttpSession>,
    pub(crate) push: PushConfig,
    pub(crate) retry: RetryConfig,
}

impl RegistryClient {
    pub fn new(endpoint: RegistryEndpoint) -> Result<Self> {
        Ok(RegistryClient {
            session: Arc::new(HttpSession::new(&endpoint)?),
            push: PushConfig::default(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_push_config(mut self, push: PushConfig) -> Self {
        self.push = push;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `GET /v2/`: whether the endpoint speaks the v2 API.
    pub async fn check_api(&self) -> Result<bool> {
        self.session.check_api().await
    }

    /// Push a decoded bundle to `repository` under `reference` (a tag or a
    /// digest). Returns the manifest digest the registry now serves.
    pub async fn push(
        &self,
        bundle: &ImageBundle,
        repository: &str,
        reference: &str,
    ) -> Result<Digest> {
        push::push_bundle(self, bundle, repository, reference).await
    }

    /// Decode `tar_path` and push it in one call.
    pub async fn push_tar(
        &self,
        tar_path: impl AsRef<Path>,
        repository: &str,
        reference: &str,
    ) -> Result<Digest> {
        let bundle = ImageBundle::from_tar(tar_path).await?;
        self.push(&bundle, repository, reference).await
    }

    /// Push under the first `repo:tag` recorded in the archive.
    pub async fn push_with_first_original_tag(
        &self,
        bundle: &ImageBundle,
    ) -> Result<TaggedManifest> {
        push::push_with_first_original_tag(self, bundle).await
    }

    /// Push once, then publish the manifest under every original tag the
    /// archive carries. Blobs are never transferred twice.
    pub async fn push_with_all_original_tags(
        &self,
        bundle: &ImageBundle,
    ) -> Result<Vec<TaggedManifest>> {
        push::push_with_all_original_tags(self, bundle).await
    }

    /// `HEAD /v2/{repository}/blobs/{digest}`.
    pub async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        reference::validate_repository(repository)?;
        blob::blob_exists(&self.session, &self.retry, repository, digest).await
    }

    /// `GET /v2/{repository}/blobs/{digest}` into memory.
    pub async fn fetch_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes> {
        reference::validate_repository(repository)?;
        blob::fetch_blob(&self.session, &self.retry, repository, digest).await
    }

    /// Fetch a manifest by tag or digest.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<FetchedManifest> {
        reference::validate_repository(repository)?;
        reference::validate_reference(reference)?;
        manifest::get_manifest(&self.session, &self.retry, repository, reference).await
    }

    /// Publish a manifest under a tag or digest reference, returning the
    /// verified manifest digest.
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: &ManifestV2,
    ) -> Result<Digest> {
        reference::validate_repository(repository)?;
        reference::validate_reference(reference)?;
        manifest::put_manifest(&self.session, &self.retry, repository, reference, manifest).await
    }

    /// Delete the manifest addressed by `digest`.
    pub async fn delete_manifest(&self, repository: &str, digest: &Digest) -> Result<()> {
        reference::validate_repository(repository)?;
        manifest::delete_manifest(&self.session, &self.retry, repository, digest).await
    }

    /// Delete a tag's manifest: resolve the tag to its digest, then delete
    /// by digest. Returns the digest that was removed.
    pub async fn delete_manifest_by_tag(&self, repository: &str, tag: &str) -> Result<Digest> {
        reference::validate_repository(repository)?;
        reference::validate_tag(tag)?;
        manifest::delete_manifest_by_tag(&self.session, &self.retry, repository, tag).await
    }

    /// `GET /v2/_catalog`.
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        catalog::list_repositories(&self.session, &self.retry).await
    }

    /// `GET /v2/{repository}/tags/list`.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        reference::validate_repository(repository)?;
        catalog::list_tags(&self.session, &self.retry, repository).await
    }
}

//! Schema-2 manifests: the wire model, canonical serialization, and the
//! manifest endpoints.
//!
//! The manifest digest is the sha256 of its exact serialized bytes, so
//! there is exactly one serialization path: [`ManifestV2::canonical_bytes`]
//! produces both the PUT body and the bytes that get hashed. Field order in
//! the structs below is the wire order; do not reorder.

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::digest::Digest;
use crate::error::{transport_error, RegistryError, Result};
use crate::http::{content_digest_header, unexpected_status, HttpSession};
use crate::image::{BlobRef, ImageBundle};
use crate::retry::send_with_retry;

pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// One blob reference inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: Digest,
}

impl From<&BlobRef> for BlobDescriptor {
    fn from(blob: &BlobRef) -> Self {
        BlobDescriptor {
            media_type: blob.media_type.clone(),
            size: blob.size,
            digest: blob.digest.clone(),
        }
    }
}

/// `application/vnd.docker.distribution.manifest.v2+json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestV2 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: BlobDescriptor,
    pub layers: Vec<BlobDescriptor>,
}

impl ManifestV2 {
    /// Assemble the manifest for a decoded bundle, layers in the bundle's
    /// (pre-deduplication) order.
    pub fn from_bundle(bundle: &ImageBundle) -> Self {
        ManifestV2 {
            schema_version: 2,
            media_type: MANIFEST_V2_MEDIA_TYPE.to_string(),
            config: BlobDescriptor::from(&bundle.config),
            layers: bundle
                .layers
                .iter()
                .map(|layer| BlobDescriptor::from(&layer.blob))
                .collect(),
        }
    }

    /// The exact bytes that go on the wire and under the hash.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| {
            // only reachable if a map key ever becomes non-string
            RegistryError::InvalidImageTar(format!("manifest serialization failed: {err}"))
        })
    }

    /// Digest of the canonical serialization.
    pub fn digest(&self) -> Result<Digest> {
        Ok(Digest::sha256(&self.canonical_bytes()?))
    }
}

/// A manifest fetched from the registry, with the bytes it was parsed from
/// and the digest of those bytes.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub manifest: ManifestV2,
    pub digest: Digest,
    pub raw: Bytes,
}

/// `GET /v2/{name}/manifests/{reference}`.
pub(crate) async fn get_manifest(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    reference: &str,
) -> Result<FetchedManifest> {
    let url = session.v2_url(&format!("{repository}/manifests/{reference}"));
    let response = send_with_retry(retry, "manifest GET", || {
        session
            .client()
            .get(&url)
            .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE)
            .send()
    })
    .await?;

    match response.status() {
        StatusCode::OK => {
            let raw = response
                .bytes()
                .await
                .map_err(|err| transport_error("manifest GET body", err))?;
            let manifest: ManifestV2 = serde_json::from_slice(&raw).map_err(|err| {
                RegistryError::protocol(StatusCode::OK, &format!("malformed manifest body: {err}"))
            })?;
            let digest = Digest::sha256(&raw);
            Ok(FetchedManifest {
                manifest,
                digest,
                raw,
            })
        }
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(format!(
            "{repository}:{reference}"
        ))),
        _ => Err(unexpected_status(response).await),
    }
}

/// `PUT /v2/{name}/manifests/{reference}`, returning the verified digest.
pub(crate) async fn put_manifest(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    reference: &str,
    manifest: &ManifestV2,
) -> Result<Digest> {
    let body = Bytes::from(manifest.canonical_bytes()?);
    let computed = Digest::sha256(&body);
    let url = session.v2_url(&format!("{repository}/manifests/{reference}"));

    let response = send_with_retry(retry, "manifest PUT", || {
        session
            .client()
            .put(&url)
            .header(CONTENT_TYPE, MANIFEST_V2_MEDIA_TYPE)
            .header(CONTENT_LENGTH, body.len())
            .body(body.clone())
            .send()
    })
    .await?;

    if response.status() != StatusCode::CREATED {
        return Err(unexpected_status(response).await);
    }

    match content_digest_header(&response) {
        Some(echoed) if echoed != computed.to_string() => Err(RegistryError::DigestMismatch {
            expected: computed.to_string(),
            got: echoed.to_string(),
        }),
        Some(_) => {
            log::debug!("manifest {repository}:{reference} digest confirmed by registry");
            Ok(computed)
        }
        None => {
            log::debug!(
                "registry omitted Docker-Content-Digest for {repository}:{reference}, \
                 using locally computed digest"
            );
            Ok(computed)
        }
    }
}

/// `DELETE /v2/{name}/manifests/{digest}`. A 405 means the registry was
/// deployed without delete support.
pub(crate) async fn delete_manifest(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    digest: &Digest,
) -> Result<()> {
    let url = session.v2_url(&format!("{repository}/manifests/{digest}"));
    let response = send_with_retry(retry, "manifest DELETE", || {
        session.client().delete(&url).send()
    })
    .await?;

    match response.status() {
        StatusCode::ACCEPTED => Ok(()),
        StatusCode::METHOD_NOT_ALLOWED => Err(RegistryError::DeletionDisabled),
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(format!("{repository}@{digest}"))),
        _ => Err(unexpected_status(response).await),
    }
}

/// Deleting by tag is a digest lookup followed by a delete by digest.
/// Returns the digest that was deleted.
pub(crate) async fn delete_manifest_by_tag(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    tag: &str,
) -> Result<Digest> {
    let fetched = get_manifest(session, retry, repository, tag).await?;
    delete_manifest(session, retry, repository, &fetched.digest).await?;
    Ok(fetched.digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE_GZIP};

    fn sample_manifest() -> ManifestV2 {
        ManifestV2 {
            schema_version: 2,
            media_type: MANIFEST_V2_MEDIA_TYPE.to_string(),
            config: BlobDescriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                size: 38,
                digest: Digest::sha256(b"config"),
            },
            layers: vec![BlobDescriptor {
                media_type: LAYER_MEDIA_TYPE_GZIP.to_string(),
                size: 17,
                digest: Digest::sha256(b"layer"),
            }],
        }
    }

    #[test]
    fn canonical_bytes_match_wire_form() {
        let manifest = sample_manifest();
        let bytes = manifest.canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let expected = format!(
            "{{\"schemaVersion\":2,\
             \"mediaType\":\"application/vnd.docker.distribution.manifest.v2+json\",\
             \"config\":{{\"mediaType\":\"application/vnd.docker.container.image.v1+json\",\
             \"size\":38,\"digest\":\"{}\"}},\
             \"layers\":[{{\"mediaType\":\"application/vnd.docker.image.rootfs.diff.tar.gzip\",\
             \"size\":17,\"digest\":\"{}\"}}]}}",
            Digest::sha256(b"config"),
            Digest::sha256(b"layer"),
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn digest_is_over_canonical_bytes() {
        let manifest = sample_manifest();
        let digest = manifest.digest().unwrap();
        assert_eq!(
            digest,
            Digest::sha256(&manifest.canonical_bytes().unwrap())
        );
    }

    #[test]
    fn serialization_round_trips() {
        let manifest = sample_manifest();
        let bytes = manifest.canonical_bytes().unwrap();
        let back: ManifestV2 = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn parses_registry_manifest_with_unknown_fields() {
        // registries are free to add fields; parsing must not choke
        let raw = format!(
            r#"{{"schemaVersion":2,"mediaType":"{MANIFEST_V2_MEDIA_TYPE}",
                "config":{{"mediaType":"{CONFIG_MEDIA_TYPE}","size":2,
                           "digest":"{}","urls":[]}},
                "layers":[]}}"#,
            Digest::sha256(b"{}")
        );
        let manifest: ManifestV2 = serde_json::from_str(&raw).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert!(manifest.layers.is_empty());
    }
}

//! Blob transfer protocol: existence checks, chunked uploads, and the
//! single-PUT fast path for small blobs.
//!
//! Every upload starts with a HEAD; a blob the registry already holds is
//! never sent again. Within one upload the chunks are strictly ordered,
//! and each sub-step retries on transient failures independently.

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::config::{PushConfig, RetryConfig};
use crate::digest::Digest;
use crate::error::{RegistryError, Result, UploadPhase};
use crate::http::{
    content_digest_header, location_header, unexpected_status, HttpSession,
};
use crate::image::{BlobRef, LayerSource};
use crate::retry::send_with_retry;

const OCTET_STREAM: &str = "application/octet-stream";

/// Where a blob's bytes come from. Config blobs live in memory; layers are
/// replayed out of the tar on demand.
#[derive(Debug, Clone)]
pub(crate) enum BlobPayload {
    Memory(Bytes),
    Layer(LayerSource),
}

impl BlobPayload {
    fn open_stream(&self, chunk_size: usize) -> BoxStream<'static, std::io::Result<Bytes>> {
        match self {
            BlobPayload::Memory(bytes) => {
                let bytes = bytes.clone();
                let chunks: Vec<std::io::Result<Bytes>> = (0..bytes.len())
                    .step_by(chunk_size.max(1))
                    .map(|start| {
                        let end = (start + chunk_size).min(bytes.len());
                        Ok(bytes.slice(start..end))
                    })
                    .collect();
                stream::iter(chunks).boxed()
            }
            BlobPayload::Layer(source) => source.open(chunk_size).boxed(),
        }
    }

    async fn read_all(&self) -> Result<Bytes> {
        match self {
            BlobPayload::Memory(bytes) => Ok(bytes.clone()),
            BlobPayload::Layer(source) => source
                .read_all()
                .await
                .map_err(RegistryError::TarReadError),
        }
    }
}

/// `HEAD /v2/{name}/blobs/{digest}`: 200 means present, 404 means absent.
pub(crate) async fn blob_exists(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    digest: &Digest,
) -> Result<bool> {
    let url = session.v2_url(&format!("{repository}/blobs/{digest}"));
    let response = send_with_retry(retry, "blob HEAD", || {
        session.client().head(&url).send()
    })
    .await?;

    match response.status() {
        StatusCode::OK => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        _ => Err(unexpected_status(response).await),
    }
}

/// `GET /v2/{name}/blobs/{digest}` into memory.
pub(crate) async fn fetch_blob(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    digest: &Digest,
) -> Result<Bytes> {
    let url = session.v2_url(&format!("{repository}/blobs/{digest}"));
    let response = send_with_retry(retry, "blob GET", || {
        session.client().get(&url).send()
    })
    .await?;

    match response.status() {
        StatusCode::OK => response
            .bytes()
            .await
            .map_err(|err| crate::error::transport_error("blob GET body", err)),
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(digest.to_string())),
        _ => Err(unexpected_status(response).await),
    }
}

/// Land one blob in the registry, skipping the transfer when it is already
/// there. Failures carry the blob digest and the sub-step that died.
pub(crate) async fn upload_blob(
    session: &HttpSession,
    retry: &RetryConfig,
    push: &PushConfig,
    repository: &str,
    blob: &BlobRef,
    payload: &BlobPayload,
) -> Result<()> {
    let exists = blob_exists(session, retry, repository, &blob.digest)
        .await
        .map_err(|err| RegistryError::upload(&blob.digest, UploadPhase::Head, err))?;
    if exists {
        log::debug!("blob {} already present in {repository}, skipping", blob.digest);
        return Ok(());
    }

    if blob.size < push.monolithic_threshold {
        monolithic_upload(session, retry, repository, blob, payload).await
    } else {
        chunked_upload(session, retry, push, repository, blob, payload).await
    }
}

/// `PUT /v2/{name}/blobs/uploads/?digest=…` with the entire body in one
/// request. Only used below the monolithic threshold, so buffering the
/// blob is bounded.
async fn monolithic_upload(
    session: &HttpSession,
    retry: &RetryConfig,
    repository: &str,
    blob: &BlobRef,
    payload: &BlobPayload,
) -> Result<()> {
    let data = payload.read_all().await?;
    let url = session.v2_url(&format!(
        "{repository}/blobs/uploads/?digest={}",
        blob.digest
    ));

    log::debug!(
        "uploading blob {} to {repository} monolithically ({} bytes)",
        blob.digest,
        data.len()
    );

    let response = send_with_retry(retry, "blob monolithic PUT", || {
        session
            .client()
            .put(&url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_LENGTH, data.len())
            .body(data.clone())
            .send()
    })
    .await
    .map_err(|err| RegistryError::upload(&blob.digest, UploadPhase::Finalize, err))?;

    if response.status() != StatusCode::CREATED {
        let err = unexpected_status(response).await;
        return Err(RegistryError::upload(&blob.digest, UploadPhase::Finalize, err));
    }
    verify_content_digest(&response, &blob.digest)
}

/// The staged upload: POST opens a session, ordered PATCHes stream the
/// bytes, a bodiless PUT with `digest=` closes it.
async fn chunked_upload(
    session: &HttpSession,
    retry: &RetryConfig,
    push: &PushConfig,
    repository: &str,
    blob: &BlobRef,
    payload: &BlobPayload,
) -> Result<()> {
    let chunk_size = push.effective_chunk_size();
    let open_url = session.v2_url(&format!("{repository}/blobs/uploads/"));

    log::debug!(
        "uploading blob {} to {repository} in {chunk_size}-byte chunks",
        blob.digest
    );

    let response = send_with_retry(retry, "blob upload open", || {
        session
            .client()
            .post(&open_url)
            .header(CONTENT_LENGTH, "0")
            .send()
    })
    .await
    .map_err(|err| RegistryError::upload(&blob.digest, UploadPhase::OpenSession, err))?;

    if response.status() != StatusCode::ACCEPTED {
        let err = unexpected_status(response).await;
        return Err(RegistryError::upload(
            &blob.digest,
            UploadPhase::OpenSession,
            err,
        ));
    }

    let location = location_header(&response)?.ok_or_else(|| {
        RegistryError::upload(
            &blob.digest,
            UploadPhase::OpenSession,
            RegistryError::protocol(StatusCode::ACCEPTED, "upload opened without Location header"),
        )
    })?;
    let mut session_url = session.resolve_location(&location);

    let mut chunks = payload.open_stream(chunk_size);
    let mut offset: u64 = 0;

    while let Some(chunk) = chunks.next().await {
        let phase = UploadPhase::Chunk { offset };
        let chunk = chunk.map_err(|err| {
            RegistryError::upload(&blob.digest, phase, RegistryError::TarReadError(err))
        })?;
        if chunk.is_empty() {
            continue;
        }

        let response = send_with_retry(retry, "blob chunk PATCH", || {
            session
                .client()
                .patch(&session_url)
                .header(CONTENT_TYPE, OCTET_STREAM)
                .header(CONTENT_LENGTH, chunk.len())
                .body(chunk.clone())
                .send()
        })
        .await
        .map_err(|err| RegistryError::upload(&blob.digest, phase, err))?;

        if response.status() != StatusCode::ACCEPTED {
            let err = unexpected_status(response).await;
            return Err(RegistryError::upload(&blob.digest, phase, err));
        }

        // the registry moves the session URL along with every chunk
        if let Some(location) = location_header(&response)? {
            session_url = session.resolve_location(&location);
        }
        offset += chunk.len() as u64;
    }

    finalize_upload(session, retry, &session_url, &blob.digest).await
}

async fn finalize_upload(
    session: &HttpSession,
    retry: &RetryConfig,
    session_url: &str,
    digest: &Digest,
) -> Result<()> {
    // the session URL usually already carries `_state`
    let separator = if session_url.contains('?') { '&' } else { '?' };
    let url = format!("{session_url}{separator}digest={digest}");

    let response = send_with_retry(retry, "blob finalize", || {
        session
            .client()
            .put(&url)
            .header(CONTENT_LENGTH, "0")
            .send()
    })
    .await
    .map_err(|err| RegistryError::upload(digest, UploadPhase::Finalize, err))?;

    if response.status() != StatusCode::CREATED {
        let err = unexpected_status(response).await;
        return Err(RegistryError::upload(digest, UploadPhase::Finalize, err));
    }
    verify_content_digest(&response, digest)
}

/// Compare the registry's `Docker-Content-Digest` echo against what was
/// sent. Absence is tolerated; disagreement is not.
fn verify_content_digest(response: &reqwest::Response, expected: &Digest) -> Result<()> {
    match content_digest_header(response) {
        Some(got) if got != expected.to_string() => Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            log::debug!("registry omitted Docker-Content-Digest for blob {expected}");
            Ok(())
        }
    }
}

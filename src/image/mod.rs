//! Decoded `docker save` archives.
//!
//! [`ImageBundle`] is the decoder's output: a config blob held in memory,
//! an ordered list of layer references whose bytes stay in the tar until
//! upload time, and the archive's original `repo:tag` names.

mod source;
mod tar;

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::digest::Digest;
use crate::error::Result;

pub(crate) use source::LayerSource;

pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const LAYER_MEDIA_TYPE_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const LAYER_MEDIA_TYPE_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Identity of one content-addressed blob: what the registry needs to know
/// about it before a single byte is transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub digest: Digest,
    pub size: u64,
    pub media_type: String,
}

/// Byte range of one entry's data within the archive file. Recorded during
/// the decode scan so layer bytes can be re-read without parsing tar
/// headers again.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryLocator {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// A layer blob plus where to find its bytes inside the tar.
#[derive(Debug, Clone)]
pub struct LayerRef {
    pub blob: BlobRef,
    /// Entry path inside the archive, as named by `manifest.json`.
    pub entry_path: String,
    pub(crate) locator: EntryLocator,
}

/// Everything the push pipeline needs from one `docker save` archive.
///
/// Layer bytes are not held here; each [`LayerRef`] points back into the
/// tar file, which must stay in place until the push completes.
#[derive(Debug)]
pub struct ImageBundle {
    tar_path: PathBuf,
    pub config: BlobRef,
    pub config_bytes: Bytes,
    /// Manifest layer order; a layer shared across positions appears at
    /// each of them.
    pub layers: Vec<LayerRef>,
    /// `RepoTags` across all archive entries, first occurrence kept.
    pub original_tags: Vec<String>,
}

impl ImageBundle {
    /// Decode a `docker save` tar. Blocking tar and digest work runs on
    /// the blocking pool so concurrent uploads are never stalled by it.
    pub async fn from_tar(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || tar::decode(&path))
            .await
            .map_err(|err| {
                crate::error::RegistryError::TarReadError(std::io::Error::other(err))
            })?
    }

    pub fn tar_path(&self) -> &Path {
        &self.tar_path
    }

    pub(crate) fn layer_source(&self, layer: &LayerRef) -> LayerSource {
        LayerSource::new(self.tar_path.clone(), layer.locator)
    }
}

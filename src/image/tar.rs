//! Decoder for `docker save` archives.
//!
//! One sequential scan records the byte range of every entry and captures
//! `manifest.json` (and the legacy `repositories` file). Config and layer
//! bytes are then read straight from the recorded ranges, layers hashed in
//! bounded windows so a multi-gigabyte layer never sits in memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use serde::Deserialize;

use super::{
    BlobRef, EntryLocator, ImageBundle, LayerRef, CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE_GZIP,
    LAYER_MEDIA_TYPE_TAR,
};
use crate::digest::{Digest, DigestHasher};
use crate::error::{RegistryError, Result};

const MANIFEST_ENTRY: &str = "manifest.json";
const REPOSITORIES_ENTRY: &str = "repositories";
const HASH_WINDOW: usize = 5 * 1024 * 1024;

/// One element of the `manifest.json` array inside a `docker save` tar.
#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

pub(super) fn decode(path: &Path) -> Result<ImageBundle> {
    let scan = scan_archive(path)?;

    let manifest_bytes = scan
        .manifest
        .ok_or_else(|| RegistryError::InvalidImageTar("manifest.json missing".to_string()))?;
    let entries: Vec<ManifestEntry> = serde_json::from_slice(&manifest_bytes).map_err(|err| {
        RegistryError::InvalidImageTar(format!("unparseable manifest.json: {err}"))
    })?;
    if entries.is_empty() {
        return Err(RegistryError::InvalidImageTar(
            "manifest.json must be a non-empty array".to_string(),
        ));
    }

    // Multiple entries mean multiple images in one tar; the first one is
    // the image that gets pushed.
    let primary = &entries[0];

    let config_locator = *scan.locators.get(primary.config.as_str()).ok_or_else(|| {
        RegistryError::InvalidImageTar(format!("config entry missing: {}", primary.config))
    })?;
    let config_bytes = read_range(path, config_locator)?;
    let config = BlobRef {
        digest: Digest::sha256(&config_bytes),
        size: config_bytes.len() as u64,
        media_type: CONFIG_MEDIA_TYPE.to_string(),
    };

    let mut layers = Vec::with_capacity(primary.layers.len());
    for layer_path in &primary.layers {
        let locator = *scan.locators.get(layer_path.as_str()).ok_or_else(|| {
            RegistryError::InvalidImageTar(format!("layer entry missing: {layer_path}"))
        })?;
        let (digest, hashed) = hash_range(path, locator, layer_path)?;
        if hashed != locator.size {
            return Err(RegistryError::InvalidImageTar(format!(
                "layer size mismatch: {layer_path} ({hashed} of {} bytes)",
                locator.size
            )));
        }
        layers.push(LayerRef {
            blob: BlobRef {
                digest,
                size: locator.size,
                media_type: layer_media_type(layer_path).to_string(),
            },
            entry_path: layer_path.clone(),
            locator,
        });
    }

    let mut original_tags = collect_repo_tags(&entries);
    if original_tags.is_empty() {
        if let Some(repositories) = &scan.repositories {
            original_tags = tags_from_repositories(repositories);
        }
    }

    Ok(ImageBundle {
        tar_path: path.to_path_buf(),
        config,
        config_bytes: Bytes::from(config_bytes),
        layers,
        original_tags,
    })
}

struct ArchiveScan {
    locators: HashMap<String, EntryLocator>,
    manifest: Option<Vec<u8>>,
    repositories: Option<Vec<u8>>,
}

/// Walk the archive once, recording where each entry's data lives and
/// grabbing the two metadata files inline.
fn scan_archive(path: &Path) -> Result<ArchiveScan> {
    let file = File::open(path).map_err(RegistryError::TarReadError)?;
    let mut archive = tar::Archive::new(file);

    let mut scan = ArchiveScan {
        locators: HashMap::new(),
        manifest: None,
        repositories: None,
    };

    let entries = archive.entries().map_err(RegistryError::TarReadError)?;
    for entry in entries {
        let mut entry = entry.map_err(RegistryError::TarReadError)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = {
            let path = entry.path().map_err(RegistryError::TarReadError)?;
            normalize_entry_name(&path.to_string_lossy())
        };
        let locator = EntryLocator {
            offset: entry.raw_file_position(),
            size: entry.size(),
        };

        match name.as_str() {
            MANIFEST_ENTRY => {
                let mut buf = Vec::with_capacity(locator.size as usize);
                entry
                    .read_to_end(&mut buf)
                    .map_err(RegistryError::TarReadError)?;
                scan.manifest = Some(buf);
            }
            REPOSITORIES_ENTRY => {
                let mut buf = Vec::with_capacity(locator.size as usize);
                entry
                    .read_to_end(&mut buf)
                    .map_err(RegistryError::TarReadError)?;
                scan.repositories = Some(buf);
            }
            _ => {}
        }

        scan.locators.insert(name, locator);
    }

    Ok(scan)
}

fn normalize_entry_name(name: &str) -> String {
    name.strip_prefix("./").unwrap_or(name).to_string()
}

fn layer_media_type(layer_path: &str) -> &'static str {
    if layer_path.ends_with(".tar.gz") || layer_path.ends_with(".tgz") {
        LAYER_MEDIA_TYPE_GZIP
    } else {
        LAYER_MEDIA_TYPE_TAR
    }
}

/// Read one entry's data range fully. Only used for the config blob and
/// metadata files, which are small.
fn read_range(path: &Path, locator: EntryLocator) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(RegistryError::TarReadError)?;
    file.seek(SeekFrom::Start(locator.offset))
        .map_err(RegistryError::TarReadError)?;
    let mut buf = vec![0u8; locator.size as usize];
    file.read_exact(&mut buf).map_err(RegistryError::TarReadError)?;
    Ok(buf)
}

/// Sha256 one entry's data range in bounded windows.
fn hash_range(path: &Path, locator: EntryLocator, layer_path: &str) -> Result<(Digest, u64)> {
    let mut file = File::open(path).map_err(RegistryError::TarReadError)?;
    file.seek(SeekFrom::Start(locator.offset))
        .map_err(RegistryError::TarReadError)?;

    let mut hasher = DigestHasher::new();
    let mut remaining = locator.size;
    let mut window = vec![0u8; HASH_WINDOW.min(locator.size as usize).max(1)];

    while remaining > 0 {
        let take = remaining.min(window.len() as u64) as usize;
        match file.read_exact(&mut window[..take]) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(RegistryError::InvalidImageTar(format!(
                    "layer size mismatch: {layer_path} (archive truncated)"
                )));
            }
            Err(err) => return Err(RegistryError::TarReadError(err)),
        }
        hasher.update(&window[..take]);
        remaining -= take as u64;
    }

    Ok(hasher.finalize())
}

fn collect_repo_tags(entries: &[ManifestEntry]) -> Vec<String> {
    let mut tags = Vec::new();
    for entry in entries {
        for tag in entry.repo_tags.iter().flatten() {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    tags
}

/// Legacy `repositories` file: `{"repo": {"tag": "<layer id>"}}`.
fn tags_from_repositories(raw: &[u8]) -> Vec<String> {
    let parsed: HashMap<String, HashMap<String, serde_json::Value>> =
        match serde_json::from_slice(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("ignoring unparseable repositories file: {err}");
                return Vec::new();
            }
        };

    let mut tags: Vec<String> = parsed
        .iter()
        .flat_map(|(repo, tag_map)| tag_map.keys().map(move |tag| format!("{repo}:{tag}")))
        .collect();
    tags.sort();
    tags
}

//! Repository-name and tag grammar checks, plus `repo:tag` splitting.
//! The registry rejects malformed names with an opaque 400, so these run
//! client-side before any request leaves the process.

use crate::digest::Digest;
use crate::error::{RegistryError, Result};

const TAG_MAX_LEN: usize = 128;

/// A repository name is one or more `/`-separated path components, each
/// matching `[a-z0-9]+(?:[._-][a-z0-9]+)*`.
pub fn validate_repository(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidReference(
            "repository name is empty".to_string(),
        ));
    }
    for component in name.split('/') {
        if !valid_name_component(component) {
            return Err(RegistryError::InvalidReference(format!(
                "bad repository component {component:?} in {name:?}"
            )));
        }
    }
    Ok(())
}

fn valid_name_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    let mut prev_separator = false;
    for &b in bytes {
        match b {
            b'.' | b'_' | b'-' => {
                if prev_separator {
                    return false;
                }
                prev_separator = true;
            }
            b if alnum(b) => prev_separator = false,
            _ => return false,
        }
    }
    true
}

/// A tag matches `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
pub fn validate_tag(tag: &str) -> Result<()> {
    let bytes = tag.as_bytes();
    if bytes.is_empty() || bytes.len() > TAG_MAX_LEN {
        return Err(RegistryError::InvalidReference(format!(
            "tag must be 1-{TAG_MAX_LEN} characters, got {} in {tag:?}",
            bytes.len()
        )));
    }
    let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    if !word(bytes[0]) {
        return Err(RegistryError::InvalidReference(format!(
            "tag may not start with {:?}",
            bytes[0] as char
        )));
    }
    if !bytes.iter().all(|&b| word(b) || b == b'.' || b == b'-') {
        return Err(RegistryError::InvalidReference(format!("bad tag {tag:?}")));
    }
    Ok(())
}

/// A manifest reference is either a tag or a digest.
pub fn validate_reference(reference: &str) -> Result<()> {
    if reference.contains(':') {
        reference.parse::<Digest>().map(|_| ())
    } else {
        validate_tag(reference)
    }
}

/// Split a `repo:tag` string on the last colon, defaulting the tag to
/// `latest`. A colon inside the final path component is the tag separator;
/// one before a `/` belongs to a registry host port (`localhost:5000/app`).
pub fn split_repo_tag(repo_tag: &str) -> (String, String) {
    if let Some((repository, tag)) = repo_tag.rsplit_once(':') {
        if !tag.is_empty() && !tag.contains('/') {
            return (repository.to_string(), tag.to_string());
        }
        if tag.is_empty() {
            return (repository.to_string(), "latest".to_string());
        }
    }
    (repo_tag.to_string(), "latest".to_string())
}

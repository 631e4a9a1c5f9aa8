#![allow(dead_code)]

use std::io::Write;

use regpush::digest::Digest;
use tempfile::NamedTempFile;

/// Config JSON used across the suites.
pub const CONFIG: &[u8] = br#"{"architecture":"amd64","os":"linux"}"#;
/// A 17-byte layer payload.
pub const LAYER: &[u8] = b"test layer bytes\n";

pub fn config_digest() -> Digest {
    Digest::sha256(CONFIG)
}

pub fn layer_digest() -> Digest {
    Digest::sha256(LAYER)
}

/// Write a `docker save`-shaped archive with one config, one layer, and
/// the given `RepoTags`.
pub fn write_image_tar(repo_tags: &[&str]) -> NamedTempFile {
    let tags = repo_tags
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(",");
    let manifest = format!(
        r#"[{{"Config":"abc.json","RepoTags":[{tags}],"Layers":["layer0/layer.tar"]}}]"#
    );

    write_tar(&[
        ("abc.json", CONFIG),
        ("layer0/layer.tar", LAYER),
        ("manifest.json", manifest.as_bytes()),
    ])
}

/// Write an arbitrary tar archive to a temp file.
pub fn write_tar(entries: &[(&str, &[u8])]) -> NamedTempFile {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let bytes = builder.into_inner().unwrap();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}

/// A digest string differing from `digest` in its final hex character.
pub fn corrupt_digest(digest: &Digest) -> String {
    let text = digest.to_string();
    let flipped = if text.ends_with('0') { "1" } else { "0" };
    format!("{}{}", &text[..text.len() - 1], flipped)
}

/// Retry timing suitable for tests.
pub fn fast_retry() -> regpush::RetryConfig {
    regpush::RetryConfig {
        max_attempts: 3,
        base_backoff: std::time::Duration::from_millis(1),
    }
}

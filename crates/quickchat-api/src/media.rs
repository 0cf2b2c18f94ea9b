//! Image object storage used for message attachments.

use std::path::{Path, PathBuf};

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use futures_util::future::BoxFuture;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

use quickchat_db::ChatError;

/// Stores an image and returns the public reference URL for it.
pub trait MediaStore: Send + Sync {
    fn store<'a>(&'a self, bytes: Vec<u8>, extension: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Content-addressed files at `{dir}/{sha256}.{ext}`, served under `public_prefix`.
pub struct DiskMediaStore {
    dir: PathBuf,
    public_prefix: String,
}

impl DiskMediaStore {
    pub fn new(dir: PathBuf, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        Self { dir, public_prefix }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MediaStore for DiskMediaStore {
    fn store<'a>(&'a self, bytes: Vec<u8>, extension: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let name = format!("{}.{}", hex::encode(Sha256::digest(&bytes)), extension);
            let path = self.dir.join(&name);

            fs::create_dir_all(&self.dir).await?;
            if fs::try_exists(&path).await? {
                info!("Image {} already stored", name);
            } else {
                fs::write(&path, &bytes).await?;
                info!("Stored image {} ({} bytes)", name, bytes.len());
            }

            Ok(format!("{}/{}", self.public_prefix, name))
        })
    }
}

/// Decode a base64 image, optionally given as a `data:<mime>;base64,` URL.
/// Returns the bytes and the file extension to store them under.
pub fn decode_image(raw: &str, max_bytes: usize) -> Result<(Vec<u8>, &'static str), ChatError> {
    let (mime, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| ChatError::validation("Malformed image data URL."))?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| {
                ChatError::validation("Image data URL must be base64 encoded.")
            })?;
            (Some(mime), data)
        }
        None => (None, raw),
    };

    let bytes = B64
        .decode(payload.trim())
        .map_err(|_| ChatError::validation("Image is not valid base64."))?;
    if bytes.is_empty() {
        return Err(ChatError::validation("Image is empty."));
    }
    if bytes.len() > max_bytes {
        return Err(ChatError::validation(format!(
            "Image exceeds the {} byte limit.",
            max_bytes
        )));
    }

    let extension = match mime {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "bin",
    };
    Ok((bytes, extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let encoded = B64.encode(b"fake png bytes");

        let (bytes, ext) = decode_image(&encoded, 1024).unwrap();
        assert_eq!(bytes, b"fake png bytes");
        assert_eq!(ext, "bin");

        let url = format!("data:image/png;base64,{}", encoded);
        let (bytes, ext) = decode_image(&url, 1024).unwrap();
        assert_eq!(bytes, b"fake png bytes");
        assert_eq!(ext, "png");
    }

    #[test]
    fn rejects_bad_images() {
        assert!(matches!(decode_image("not base64!", 1024), Err(ChatError::Validation(_))));
        assert!(matches!(decode_image("", 1024), Err(ChatError::Validation(_))));
        assert!(matches!(
            decode_image("data:image/png,abcd", 1024),
            Err(ChatError::Validation(_))
        ));

        let big = B64.encode(vec![0u8; 33]);
        assert!(matches!(decode_image(&big, 32), Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn disk_store_is_content_addressed() {
        let dir = std::env::temp_dir().join(format!("quickchat-media-{}", uuid::Uuid::new_v4()));
        let store = DiskMediaStore::new(dir.clone(), "/media/");

        let first = store.store(b"abc".to_vec(), "png").await.unwrap();
        let second = store.store(b"abc".to_vec(), "png").await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("/media/"));
        assert!(first.ends_with(".png"));

        let name = first.trim_start_matches("/media/");
        assert_eq!(std::fs::read(dir.join(name)).unwrap(), b"abc");
        let _ = std::fs::remove_dir_all(dir);
    }
}

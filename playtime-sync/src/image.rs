//! Content-addressed cover images.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use playtime_core::config::images_dir_at;
use playtime_core::GameId;

use crate::error::{io_err, SyncError};
use crate::object_store::ObjectStore;
use crate::remote::thumbnail_key;

/// Bytes of a local image plus what the store needs to know about them.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub ext: String,
}

impl ImagePayload {
    pub fn from_bytes(bytes: Vec<u8>, source_ext: Option<&str>) -> Self {
        let content_type = content_type_for(source_ext, &bytes);
        let ext = normalize_image_ext(source_ext, content_type);
        Self {
            bytes,
            content_type,
            ext,
        }
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn key_for(&self, game_id: &GameId) -> String {
        thumbnail_key(game_id, &self.sha256_hex(), &self.ext)
    }
}

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REMOTE_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

/// Read a local image, or download it when `path` is an `http(s)` URL.
pub fn load_image(path: &str) -> std::io::Result<ImagePayload> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return fetch_image(path);
    }
    let bytes = std::fs::read(path)?;
    let ext = Path::new(path).extension().and_then(|e| e.to_str());
    Ok(ImagePayload::from_bytes(bytes, ext))
}

/// The extension comes from the response `Content-Type`, then from the URL
/// path, then from the bytes themselves.
fn fetch_image(url: &str) -> std::io::Result<ImagePayload> {
    let agent = ureq::AgentBuilder::new().timeout(FETCH_TIMEOUT).build();
    let response = agent
        .get(url)
        .call()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let ext = ext_for_content_type(response.content_type())
        .or_else(|| url_ext(url))
        .map(str::to_string);

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_REMOTE_IMAGE_BYTES + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_REMOTE_IMAGE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{url} is larger than {MAX_REMOTE_IMAGE_BYTES} bytes"),
        ));
    }
    tracing::debug!(url, bytes = bytes.len(), ext = ext.as_deref(), "fetched remote image");
    Ok(ImagePayload::from_bytes(bytes, ext.as_deref()))
}

fn ext_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

fn url_ext(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let (_, after_scheme) = path.split_once("://")?;
    let (_, path) = after_scheme.split_once('/')?;
    let (_, ext) = path.rsplit('/').next()?.rsplit_once('.')?;
    Some(ext).filter(|e| !e.is_empty() && e.len() <= 5)
}

fn content_type_for(ext: Option<&str>, bytes: &[u8]) -> &'static str {
    match ext.map(str::to_ascii_lowercase).as_deref() {
        Some("png") => return "image/png",
        Some("jpg" | "jpeg") => return "image/jpeg",
        Some("gif") => return "image/gif",
        Some("webp") => return "image/webp",
        Some("bmp") => return "image/bmp",
        _ => {}
    }
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

/// Lowercased source extension with a leading dot; otherwise derived from
/// the content type, falling back to `.png`.
pub fn normalize_image_ext(source_ext: Option<&str>, content_type: &str) -> String {
    if let Some(ext) = source_ext.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        return format!(".{}", ext.to_ascii_lowercase());
    }
    match content_type {
        "image/gif" => ".gif",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/webp" => ".webp",
        _ => ".png",
    }
    .to_string()
}

/// Result of [`upload_image_if_needed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub key: String,
    pub uploaded: bool,
}

/// Upload unless the remote record already points at the same content key.
pub fn upload_image_if_needed(
    store: &dyn ObjectStore,
    game_id: &GameId,
    image: &ImagePayload,
    existing_key: Option<&str>,
) -> Result<ImageUpload, SyncError> {
    let key = image.key_for(game_id);
    if existing_key == Some(key.as_str()) {
        return Ok(ImageUpload {
            key,
            uploaded: false,
        });
    }
    store.put_object(&key, &image.bytes, image.content_type)?;
    tracing::debug!(game_id = %game_id, key, "uploaded image");
    Ok(ImageUpload {
        key,
        uploaded: true,
    })
}

/// Fetch `key` into `<data_dir>/images/<game id>/<basename>` unless a file
/// with that name is already there. Returns the local path and whether a
/// download happened.
pub fn download_image_if_needed(
    store: &dyn ObjectStore,
    data_dir: &Path,
    game_id: &GameId,
    key: &str,
) -> Result<(PathBuf, bool), SyncError> {
    let basename = key.rsplit('/').next().unwrap_or_default();
    if basename.is_empty() || basename == "." || basename == ".." {
        return Err(SyncError::InvalidArgument(format!("bad image key '{key}'")));
    }
    let dir = images_dir_at(data_dir, game_id.as_str());
    let target = dir.join(basename);
    if target.exists() {
        return Ok((target, false));
    }
    let bytes = store.get_object(key)?;
    create_private_dir(&dir)?;
    let tmp = target.with_extension("tmp");
    std::fs::write(&tmp, &bytes).map_err(|e| io_err(&tmp, e))?;
    set_private_file(&tmp)?;
    std::fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;
    tracing::debug!(game_id = %game_id, key, path = %target.display(), "downloaded image");
    Ok((target, true))
}

pub(crate) fn create_private_dir(dir: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| io_err(dir, e))?;
    }
    Ok(())
}

pub(crate) fn set_private_file(path: &Path) -> Result<(), SyncError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| io_err(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

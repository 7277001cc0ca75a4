use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// URL prefix under which `actix-files` serves `MEDIA_PATH`.
pub const MEDIA_URL_PREFIX: &str = "/media";
const FEATURED_DIR: &str = "featured";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported image type '{0}'. Upload a JPEG, PNG, GIF or WebP file.")]
    UnsupportedType(String),
    #[error("Image is too large. Maximum size is {0} bytes.")]
    TooLarge(usize),
    #[error("Refusing to touch media path '{0}'.")]
    InvalidPath(String),
}

/// Where featured images live. The write path only ever sees public paths
/// (`/media/...`), never filesystem locations.
pub trait MediaStore: Send + Sync {
    /// Persists the bytes and returns the public path to store on the post.
    fn store(&self, bytes: &[u8], mime_type: &str) -> Result<String, MediaError>;

    /// Removes a previously stored file. Deleting a missing file succeeds.
    fn delete(&self, public_path: &str) -> Result<(), MediaError>;

    /// Upload cap in bytes, enforced while the request body streams in.
    fn max_bytes(&self) -> usize;
}

/// Maps an accepted image MIME type to the extension it is saved under.
/// The extension never comes from the client's file name.
pub fn mime_to_safe_extension(mime_type: &str) -> Option<&'static str> {
    let map: BTreeMap<&str, &str> = [
        ("image/gif", "gif"),
        ("image/jpeg", "jpg"),
        ("image/png", "png"),
        ("image/webp", "webp"),
    ]
    .iter()
    .cloned()
    .collect();

    map.get(mime_type.trim().to_ascii_lowercase().as_str()).cloned()
}

/// Stores images under `<root>/featured/<aa>/<bb>/<uuid>.<ext>`.
pub struct LocalMediaStore {
    root: PathBuf,
    max_bytes: usize,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        LocalMediaStore { root: root.into(), max_bytes }
    }

    /// Resolves a public path back to a file under the featured folder,
    /// rejecting anything that could step outside it.
    fn resolve(&self, public_path: &str) -> Result<PathBuf, MediaError> {
        let prefix = format!("{}/{}/", MEDIA_URL_PREFIX, FEATURED_DIR);
        let relative = public_path
            .strip_prefix(&prefix)
            .ok_or_else(|| MediaError::InvalidPath(public_path.to_string()))?;

        let relative = Path::new(relative);
        if relative.as_os_str().is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(MediaError::InvalidPath(public_path.to_string()));
        }
        Ok(self.root.join(FEATURED_DIR).join(relative))
    }
}

impl MediaStore for LocalMediaStore {
    fn store(&self, bytes: &[u8], mime_type: &str) -> Result<String, MediaError> {
        let ext = mime_to_safe_extension(mime_type)
            .ok_or_else(|| MediaError::UnsupportedType(mime_type.to_string()))?;
        if bytes.len() > self.max_bytes {
            return Err(MediaError::TooLarge(self.max_bytes));
        }

        let file_id = Uuid::new_v4().to_string();
        let dir1 = &file_id[0..2];
        let dir2 = &file_id[2..4];
        let dir = self.root.join(FEATURED_DIR).join(dir1).join(dir2);
        fs::create_dir_all(&dir)?;

        let file_name = format!("{}.{}", file_id, ext);
        fs::write(dir.join(&file_name), bytes)?;

        log::info!("Stored featured image {} ({} bytes).", file_name, bytes.len());
        Ok(format!("{}/{}/{}/{}/{}", MEDIA_URL_PREFIX, FEATURED_DIR, dir1, dir2, file_name))
    }

    fn delete(&self, public_path: &str) -> Result<(), MediaError> {
        let path = self.resolve(public_path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Media file {} was already gone.", public_path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

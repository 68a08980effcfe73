//! Guest runtime image loading.
//!
//! The guest runtime image is the WASI command module the sandbox runs (by
//! default a Python interpreter compiled to WebAssembly). The default image is
//! read from disk once per process and shared by every session afterwards.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::error::{Result, SandboxError};

/// Environment variable overriding the location of the default image.
pub const IMAGE_PATH_ENV: &str = "EXECR_RUNTIME_IMAGE";

/// File name of the packaged guest runtime image.
pub const DEFAULT_IMAGE_FILE: &str = "python-3.12.0.wasm";

/// An immutable guest runtime image.
///
/// Cloning is cheap; the bytes are shared. The fingerprint identifies the
/// image in the module cache without rehashing the bytes on every session.
#[derive(Clone)]
pub struct GuestImage {
    bytes: Arc<[u8]>,
    fingerprint: u64,
}

impl GuestImage {
    /// Wrap raw module bytes (binary Wasm or WAT text).
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Self {
            fingerprint: hasher.finish(),
            bytes,
        }
    }

    /// Read an image from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::ImageMissing(path.display().to_string())
            } else {
                SandboxError::Io(e)
            }
        })?;
        tracing::debug!(path = %path.display(), len = bytes.len(), "loaded guest runtime image");
        Ok(Self::from_bytes(bytes))
    }

    /// The raw module bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A shared handle to the module bytes.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Content fingerprint, stable for the lifetime of the process.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Size of the image in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the image is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for GuestImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestImage")
            .field("len", &self.bytes.len())
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .finish()
    }
}

/// A once-initialized image slot.
///
/// Loading is serialized so concurrent first callers read the file once; a
/// failed load leaves the slot empty so a later call can retry.
pub(crate) struct ImageCell {
    image: OnceLock<GuestImage>,
    loading: Mutex<()>,
}

impl ImageCell {
    pub(crate) const fn new() -> Self {
        Self {
            image: OnceLock::new(),
            loading: Mutex::new(()),
        }
    }

    pub(crate) fn get_or_load(
        &self,
        load: impl FnOnce() -> Result<GuestImage>,
    ) -> Result<GuestImage> {
        if let Some(image) = self.image.get() {
            return Ok(image.clone());
        }

        let _guard = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(image) = self.image.get() {
            return Ok(image.clone());
        }

        let image = load()?;
        Ok(self.image.get_or_init(|| image).clone())
    }
}

static DEFAULT_IMAGE: ImageCell = ImageCell::new();

/// Location of the default guest runtime image.
///
/// Uses `EXECR_RUNTIME_IMAGE` when set, otherwise the packaged
/// `assets/python-3.12.0.wasm` next to the crate manifest.
pub fn default_image_path() -> PathBuf {
    match std::env::var_os(IMAGE_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("assets")
            .join(DEFAULT_IMAGE_FILE),
    }
}

/// The process-wide default guest runtime image, loaded on first use.
pub fn default_image() -> Result<GuestImage> {
    DEFAULT_IMAGE.get_or_load(|| GuestImage::from_file(default_image_path()))
}

/// Bytes of the default guest runtime image.
///
/// Every call after the first returns the same shared buffer.
pub fn image_bytes() -> Result<Arc<[u8]>> {
    default_image().map(|image| image.shared_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fingerprint_follows_content() {
        let a = GuestImage::from_bytes(b"(module)".to_vec());
        let b = GuestImage::from_bytes(b"(module)".to_vec());
        let c = GuestImage::from_bytes(b"(module (memory 1))".to_vec());

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_missing_file_is_image_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = GuestImage::from_file(dir.path().join("absent.wasm")).unwrap_err();
        assert!(err.is_image_missing());
    }

    #[test]
    fn test_from_file_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guest.wat");
        std::fs::write(&path, "(module)").unwrap();

        let image = GuestImage::from_file(&path).unwrap();
        assert_eq!(image.bytes(), b"(module)");
    }

    #[test]
    fn test_cell_loads_once_across_threads() {
        let cell = ImageCell::new();
        let loads = AtomicUsize::new(0);

        let images: Vec<GuestImage> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        cell.get_or_load(|| {
                            loads.fetch_add(1, Ordering::SeqCst);
                            Ok(GuestImage::from_bytes(b"(module)".to_vec()))
                        })
                        .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for image in &images {
            assert!(Arc::ptr_eq(&image.shared_bytes(), &images[0].shared_bytes()));
        }
    }

    #[test]
    fn test_cell_retries_after_failure() {
        let cell = ImageCell::new();
        let err = cell
            .get_or_load(|| Err(SandboxError::ImageMissing("gone".to_string())))
            .unwrap_err();
        assert!(err.is_image_missing());

        let image = cell
            .get_or_load(|| Ok(GuestImage::from_bytes(b"(module)".to_vec())))
            .unwrap();
        assert_eq!(image.bytes(), b"(module)");
    }

    #[test]
    #[ignore = "requires python-3.12.0.wasm"]
    fn test_image_bytes_are_cached() {
        let first = image_bytes().unwrap();
        let second = image_bytes().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*first, &*second);
    }
}

//! Immutable, reference-counted image snapshot, per spec.md §4.6.

use crate::geometry::PixelFormat;
use crate::pixmap::Pixmap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_image_id() -> u64 {
    NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runs a destructor (releasing a GPU texture, typically) when the last
/// clone drops. Shared between every holder of a GPU-backed `Image`, per
/// spec.md §3's "Ownership" paragraph.
#[derive(Clone)]
pub struct ReleaseToken(Arc<dyn Fn() + Send + Sync>);

impl ReleaseToken {
    pub fn new(release: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(release))
    }

    /// A token that does nothing on release, for images with no backing
    /// GPU resource to free.
    pub fn noop() -> Self {
        Self::new(|| {})
    }
}

impl std::fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReleaseToken(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

enum Storage {
    CpuPixmap(Pixmap),
    GpuTexture { opaque_handle: u64, release: ReleaseToken },
}

/// An immutable snapshot. Shared by reference count between clients, the
/// image table of whatever `Recording` last referenced it, and any
/// backend texture cache that has uploaded it.
pub struct Image {
    id: u64,
    info: ImageInfo,
    storage: Storage,
}

impl Image {
    /// Deep-copies `src`'s pixels into a fresh owned pixmap.
    pub fn from_pixmap(src: &Pixmap) -> Arc<Image> {
        let mut owned = Pixmap::alloc(src.width(), src.height(), src.format());
        owned.as_bytes_mut().copy_from_slice(src.as_bytes());
        let info = ImageInfo {
            width: owned.width(),
            height: owned.height(),
            stride: owned.stride_bytes(),
            format: owned.format(),
        };
        Arc::new(Image { id: next_image_id(), info, storage: Storage::CpuPixmap(owned) })
    }

    /// Takes ownership of `pixmap` (which may itself be borrowing
    /// caller memory) without copying pixels.
    pub fn wrap_pixmap(pixmap: Pixmap) -> Arc<Image> {
        let info = ImageInfo {
            width: pixmap.width(),
            height: pixmap.height(),
            stride: pixmap.stride_bytes(),
            format: pixmap.format(),
        };
        Arc::new(Image { id: next_image_id(), info, storage: Storage::CpuPixmap(pixmap) })
    }

    /// Adopts a GPU texture handle. `release_token` is invoked when the
    /// last `Arc<Image>` referencing it drops.
    pub fn from_gpu_texture(
        handle: u64,
        width: u32,
        height: u32,
        format: PixelFormat,
        release_token: ReleaseToken,
    ) -> Arc<Image> {
        let info = ImageInfo { width, height, stride: width * format.bytes_per_pixel(), format };
        Arc::new(Image {
            id: next_image_id(),
            info,
            storage: Storage::GpuTexture { opaque_handle: handle, release: release_token },
        })
    }

    pub fn unique_id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn info(&self) -> ImageInfo {
        self.info
    }

    pub fn as_cpu_pixmap(&self) -> Option<&Pixmap> {
        match &self.storage {
            Storage::CpuPixmap(pm) => Some(pm),
            Storage::GpuTexture { .. } => None,
        }
    }

    pub fn gpu_handle(&self) -> Option<u64> {
        match &self.storage {
            Storage::GpuTexture { opaque_handle, .. } => Some(*opaque_handle),
            Storage::CpuPixmap(_) => None,
        }
    }

    pub fn valid(&self) -> bool {
        if self.info.width == 0 || self.info.height == 0 {
            return false;
        }
        match &self.storage {
            Storage::CpuPixmap(_) => true,
            Storage::GpuTexture { opaque_handle, .. } => *opaque_handle != 0,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Storage::GpuTexture { release, .. } = &self.storage {
            (release.0)();
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("info", &self.info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Color;

    #[test]
    fn ids_are_monotonically_increasing() {
        let mut pm_a = Pixmap::alloc(1, 1, PixelFormat::Rgba8888);
        pm_a.clear(Color::WHITE);
        let a = Image::from_pixmap(&pm_a);
        let b = Image::from_pixmap(&pm_a);
        assert!(b.unique_id() > a.unique_id());
    }

    #[test]
    fn from_pixmap_copies_not_aliases() {
        let mut src = Pixmap::alloc(1, 1, PixelFormat::Rgba8888);
        src.clear(Color::rgba(1, 2, 3, 4));
        let img = Image::from_pixmap(&src);
        src.clear(Color::rgba(9, 9, 9, 9));
        assert_eq!(img.as_cpu_pixmap().unwrap().as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn gpu_release_token_runs_once_on_last_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let token = ReleaseToken::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        let img_a = Image::from_gpu_texture(42, 4, 4, PixelFormat::Rgba8888, token);
        let img_b = img_a.clone();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(img_a);
        assert_eq!(count.load(Ordering::SeqCst), 0, "img_b still holds a strong reference");
        drop(img_b);
        assert_eq!(count.load(Ordering::SeqCst), 1, "last reference drop releases the texture");
    }

    #[test]
    fn valid_requires_nonzero_dims_and_handle() {
        let empty = Image::from_gpu_texture(0, 4, 4, PixelFormat::Rgba8888, ReleaseToken::noop());
        assert!(!empty.valid());
        let ok = Image::from_gpu_texture(1, 4, 4, PixelFormat::Rgba8888, ReleaseToken::noop());
        assert!(ok.valid());
    }
}

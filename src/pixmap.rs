//! Owning or borrowed 2D pixel buffer with stride and format, per
//! spec.md §4.5.

use crate::geometry::PixelFormat;

/// Descriptor shared by owning and borrowing pixmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapInfo {
    pub width: u32,
    pub height: u32,
    pub stride_bytes: u32,
    pub format: PixelFormat,
}

impl PixmapInfo {
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride_bytes: width * format.bytes_per_pixel(),
            format,
        }
    }
}

/// Borrowed pixel bytes paired with the layout needed to interpret
/// them, per spec.md §4.12's `peek_pixels() -> Pixmap?`. Carrying
/// `PixmapInfo` alongside the slice means a caller can always tell
/// channel order and row stride apart, instead of assuming a packed
/// RGBA buffer.
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    pub info: PixmapInfo,
    pub bytes: &'a [u8],
}

/// Owned counterpart of [`PixelView`], per spec.md §4.12's
/// `get_pixel_data() -> { ptr, w, h, stride_bytes, format }`.
#[derive(Debug, Clone)]
pub struct PixelData {
    pub info: PixmapInfo,
    pub bytes: Vec<u8>,
}

enum Storage {
    Owned(Box<[u8]>),
    /// Pixels supplied by the caller. The caller is responsible for
    /// keeping the pointed-to memory valid and correctly sized for the
    /// lifetime of this pixmap — spec.md §3 calls this a "borrowing"
    /// pixmap. A raw pointer (rather than a borrowed slice) is used so
    /// that `Pixmap` stays a plain, non-generic, movable value, the
    /// same tradeoff the teacher makes in `CairoSurface::take_external_owned`
    /// when it hands out pixel buffers whose lifetime it cannot express
    /// in the type system either.
    Borrowed(std::ptr::NonNull<u8>),
}

/// A 2D pixel buffer. Moves transfer ownership; there is no `Clone` —
/// copying pixel memory implicitly would hide an expensive operation.
pub struct Pixmap {
    info: PixmapInfo,
    storage: Storage,
}

impl std::fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixmap")
            .field("info", &self.info)
            .field(
                "storage",
                &match &self.storage {
                    Storage::Owned(_) => "Owned",
                    Storage::Borrowed(_) => "Borrowed",
                },
            )
            .finish()
    }
}

impl Pixmap {
    /// Allocates a new owning pixmap with packed stride
    /// (`stride_bytes = 4*width`).
    pub fn alloc(width: u32, height: u32, format: PixelFormat) -> Self {
        let info = PixmapInfo::packed(width, height, format);
        let len = info.stride_bytes as usize * info.height as usize;
        Self {
            info,
            storage: Storage::Owned(vec![0u8; len].into_boxed_slice()),
        }
    }

    /// Wraps caller-owned memory. `ptr` must be valid for
    /// `info.stride_bytes * info.height` bytes for as long as this
    /// `Pixmap` (and anything it is moved into) is alive.
    ///
    /// # Safety
    /// The caller must uphold the lifetime/size contract above.
    pub unsafe fn wrap(info: PixmapInfo, ptr: std::ptr::NonNull<u8>) -> Self {
        debug_assert!(info.stride_bytes >= 4 * info.width);
        Self { info, storage: Storage::Borrowed(ptr) }
    }

    pub fn info(&self) -> PixmapInfo {
        self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn stride_bytes(&self) -> u32 {
        self.info.stride_bytes
    }

    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    fn len_bytes(&self) -> usize {
        self.info.stride_bytes as usize * self.info.height as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(b) => b,
            // SAFETY: contract upheld by whoever constructed this pixmap via `wrap`.
            Storage::Borrowed(ptr) => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), self.len_bytes())
            },
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Owned(b) => b,
            // SAFETY: contract upheld by whoever constructed this pixmap via `wrap`.
            Storage::Borrowed(ptr) => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len_bytes())
            },
        }
    }

    /// Writes `color` packed as this pixmap's native word to every
    /// pixel.
    pub fn clear(&mut self, color: crate::geometry::Color) {
        let word = pack_color(color, self.info.format);
        let stride = self.info.stride_bytes as usize;
        let width = self.info.width as usize;
        let bytes = self.as_bytes_mut();
        for row in 0..(bytes.len() / stride.max(1)) {
            let row_start = row * stride;
            for x in 0..width {
                let px = row_start + x * 4;
                bytes[px..px + 4].copy_from_slice(&word);
            }
        }
    }

    /// Drops old memory and allocates fresh storage of `new_info`.
    /// Existing contents are not preserved, per spec.md §4.5.
    pub fn reallocate(&mut self, width: u32, height: u32, format: PixelFormat) {
        *self = Pixmap::alloc(width, height, format);
    }
}

/// Packs a `Color` into the 4-byte native word for `format`.
pub fn pack_color(c: crate::geometry::Color, format: PixelFormat) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8888 => [c.r, c.g, c.b, c.a],
        PixelFormat::Bgra8888 => [c.b, c.g, c.r, c.a],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Color;

    #[test]
    fn alloc_has_packed_stride() {
        let pm = Pixmap::alloc(4, 4, PixelFormat::Rgba8888);
        assert_eq!(pm.stride_bytes(), 16);
        assert!(pm.is_owned());
    }

    #[test]
    fn clear_writes_every_pixel() {
        let mut pm = Pixmap::alloc(2, 2, PixelFormat::Bgra8888);
        pm.clear(Color::rgba(255, 0, 0, 255));
        let expected = pack_color(Color::rgba(255, 0, 0, 255), PixelFormat::Bgra8888);
        for chunk in pm.as_bytes().chunks_exact(4) {
            assert_eq!(chunk, expected);
        }
    }

    #[test]
    fn reallocate_resets_contents() {
        let mut pm = Pixmap::alloc(2, 2, PixelFormat::Rgba8888);
        pm.clear(Color::WHITE);
        pm.reallocate(3, 3, PixelFormat::Rgba8888);
        assert_eq!(pm.width(), 3);
        assert!(pm.as_bytes().iter().all(|&b| b == 0));
    }
}

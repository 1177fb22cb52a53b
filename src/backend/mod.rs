//! Backend abstraction, per spec.md §4.8. Grounded directly on the
//! teacher's `render::backend::RenderBackend` trait: `begin_frame`
//! /`render`/`resize`/`snapshot` map 1:1 onto this trait's
//! `begin_frame`/`execute`/`resize`/`make_snapshot`.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(feature = "gpu")]
pub mod texture_cache;

use crate::draw_pass::DrawPass;
use crate::geometry::Color;
use crate::glyph_atlas::GlyphAtlas;
use crate::image::Image;
use crate::pixmap::{PixelData, PixelView};
use crate::recording::Recording;
use std::sync::Arc;

/// Implemented by every backend (CPU rasterizer, GPU rasterizer). All
/// operations are infallible in normal use; failures map to the
/// policies in spec.md §7 rather than propagating as `Result`.
pub trait Backend {
    /// Prepares the target and fills it with `clear_color`.
    fn begin_frame(&mut self, clear_color: Color);

    /// Flushes any pending work. No-op on CPU; pipeline flush on GPU.
    fn end_frame(&mut self);

    /// Replays `recording` in `pass` order, honoring clip/color
    /// semantics.
    fn execute(&mut self, recording: &Recording, pass: &DrawPass);

    /// Re-creates target storage at the given size.
    fn resize(&mut self, width: u32, height: u32);

    /// Installs the atlas used for text ops.
    fn set_glyph_atlas(&mut self, atlas: Option<Arc<std::sync::Mutex<GlyphAtlas>>>);

    /// Returns an immutable snapshot of the current target, or `None`
    /// if the target is invalid (spec.md §7, `TargetInvalid`).
    fn make_snapshot(&mut self) -> Option<Arc<Image>>;

    /// Direct read-only access to the target's bytes plus its layout, or
    /// `None` for backends with no host-addressable memory (the GPU
    /// path). Per spec.md §4.12's `peek_pixels`.
    fn peek_pixels(&self) -> Option<PixelView<'_>> {
        None
    }

    /// An owned copy of the current target's pixels and their layout:
    /// `peek_pixels` when available, or a backend-specific readback
    /// otherwise (the GPU path's staging-buffer copy). Per spec.md
    /// §4.12's `get_pixel_data`.
    fn read_pixels(&mut self) -> Option<PixelData> {
        self.peek_pixels().map(|v| PixelData { info: v.info, bytes: v.bytes.to_vec() })
    }
}

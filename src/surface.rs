//! Owner of a render target, its backend, and the Canvas recording
//! into it, per spec.md §4.12. Grounded on the teacher's `Tab`/`Zone`
//! pairing of a render backend with a content recorder, collapsed here
//! into one type since this crate has no tab/zone concept to own it
//! instead.

use crate::canvas::Canvas;
use crate::config::{CanvasConfig, PreferredBackend};
use crate::draw_pass::DrawPass;
use crate::errors::CanvasError;
use crate::geometry::{Color, PixelFormat};
use crate::glyph_atlas::GlyphAtlas;
use crate::image::Image;
use crate::pixmap::{PixelData, PixelView, Pixmap, PixmapInfo};
use std::sync::{Arc, Mutex};

use crate::backend::cpu::CpuBackend;
use crate::backend::Backend;

#[cfg(feature = "gpu")]
use crate::backend::gpu::{GpuBackend, GpuContext};

/// Owns a target, a backend, and the `Canvas` recording commands for
/// the frame in progress. A surface created by [`Surface::make_recording`]
/// has no backend: `flush` then only clears the pending commands, and
/// [`Surface::finish_recording`] is the only way to get them out.
pub struct Surface {
    backend: Option<Box<dyn Backend>>,
    canvas: Canvas,
    width: u32,
    height: u32,
    config: CanvasConfig,
}

impl Surface {
    /// Allocates an owned CPU target and wraps it in a `CpuBackend`.
    pub fn make_raster(width: u32, height: u32, format: PixelFormat) -> Surface {
        let pixmap = Pixmap::alloc(width, height, format);
        let backend = CpuBackend::new(pixmap);
        Surface { backend: Some(Box::new(backend)), canvas: Canvas::new(), width, height, config: CanvasConfig::default() }
    }

    /// Wraps caller-owned pixel memory directly, with no copy, per
    /// spec.md §4.5/§4.12.
    ///
    /// # Safety
    /// `ptr` must be valid for `info.stride_bytes * info.height` bytes
    /// for as long as the returned `Surface` is alive.
    pub unsafe fn make_raster_direct(info: PixmapInfo, ptr: std::ptr::NonNull<u8>) -> Surface {
        let pixmap = Pixmap::wrap(info, ptr);
        let backend = CpuBackend::new(pixmap);
        Surface {
            backend: Some(Box::new(backend)),
            canvas: Canvas::new(),
            width: info.width,
            height: info.height,
            config: CanvasConfig::default(),
        }
    }

    /// Attempts a hardware-backed surface unless `config.preferred_backend`
    /// is `Cpu`, in which case GPU initialization is never attempted at
    /// all; falls back to [`Surface::make_raster`] on any GPU
    /// initialization failure, per spec.md §4.12 and SPEC_FULL.md §2.3 —
    /// this factory never fails and never returns a surface with no
    /// backend.
    #[cfg(feature = "gpu")]
    pub fn make_gpu(ctx: Arc<GpuContext>, width: u32, height: u32, config: CanvasConfig) -> Surface {
        if config.preferred_backend == PreferredBackend::Cpu {
            log::debug!("preferred backend is Cpu; not attempting GPU init");
            return Surface::make_raster(width, height, PixelFormat::Rgba8888).with_config(config);
        }
        match GpuBackend::new(ctx, width, height) {
            Ok(backend) => {
                Surface { backend: Some(Box::new(backend)), canvas: Canvas::new(), width, height, config }
            }
            Err(e) => {
                log::error!("GPU backend init failed ({e}), falling back to CPU raster");
                Surface::make_raster(width, height, PixelFormat::Rgba8888).with_config(config)
            }
        }
    }

    /// Like [`Surface::make_gpu`], but reports GPU initialization
    /// failure to the caller instead of silently falling back to CPU
    /// raster — the strict entry point for callers who want to treat
    /// `GpuInitFailure` as fatal, matching the teacher's own
    /// `render::backend::RenderBackend::render`'s `anyhow::Result`
    /// boundary. Always attempts GPU regardless of `PreferredBackend`:
    /// a caller reaching for this constructor has already decided it
    /// wants GPU or an error, not a silent preference check.
    #[cfg(feature = "gpu")]
    pub fn try_make_gpu(ctx: Arc<GpuContext>, width: u32, height: u32) -> anyhow::Result<Surface> {
        let backend = GpuBackend::new(ctx, width, height)?;
        Ok(Surface {
            backend: Some(Box::new(backend)),
            canvas: Canvas::new(),
            width,
            height,
            config: CanvasConfig::default(),
        })
    }

    /// A backend-less surface that only accumulates commands. `flush`
    /// is a no-op here; use [`Surface::finish_recording`] to retrieve
    /// what was recorded.
    pub fn make_recording(width: u32, height: u32) -> Surface {
        Surface { backend: None, canvas: Canvas::new(), width, height, config: CanvasConfig::default() }
    }

    /// Replaces this surface's configuration, e.g. to set a custom
    /// `default_clear_color` used by a future [`Surface::begin_frame`]
    /// call that omits one.
    pub fn with_config(mut self, config: CanvasConfig) -> Surface {
        self.config = config;
        self
    }

    pub fn canvas(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Clears the target to `clear_color`, or to
    /// `self.config.default_clear_color` when the caller passes `None`,
    /// per SPEC_FULL.md §2.3. No-op on a recording-only surface.
    pub fn begin_frame(&mut self, clear_color: Option<Color>) {
        let color = clear_color.unwrap_or(self.config.default_clear_color);
        if let Some(backend) = &mut self.backend {
            backend.begin_frame(color);
        }
    }

    pub fn end_frame(&mut self) {
        if let Some(backend) = &mut self.backend {
            backend.end_frame();
        }
    }

    /// Sorts and replays the commands recorded since the last flush
    /// against the backend, then resets the canvas's recorder for the
    /// next frame, per spec.md §3's "record, sort, execute" pipeline.
    /// On a recording-only surface, this only resets the recorder —
    /// call [`Surface::finish_recording`] first if the commands are
    /// needed.
    pub fn flush(&mut self) {
        let recorder = std::mem::take(self.canvas.recorder_mut());
        let Some(backend) = &mut self.backend else {
            log::debug!("flush on a backend-less surface discards {} ops", recorder.ops_len());
            return;
        };
        let recording = recorder.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);
    }

    /// Consumes the commands recorded so far into a `Recording`,
    /// leaving the canvas empty, without touching any backend. The
    /// counterpart of [`Surface::flush`] for surfaces built to only
    /// produce command lists.
    pub fn finish_recording(&mut self) -> crate::recording::Recording {
        std::mem::take(self.canvas.recorder_mut()).finish()
    }

    /// Re-creates target storage at the given size, per spec.md §4.12.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        if let Some(backend) = &mut self.backend {
            backend.resize(width, height);
        }
    }

    /// Installs the atlas used to resolve `draw_text` ops on this
    /// surface's backend, per spec.md §4.7/§4.12.
    pub fn set_glyph_cache(&mut self, atlas: Option<Arc<Mutex<GlyphAtlas>>>) {
        if let Some(backend) = &mut self.backend {
            backend.set_glyph_atlas(atlas);
        }
    }

    /// An immutable copy of the current target, or `None` if there is
    /// no backend or the target is zero-sized (spec.md §7,
    /// `TargetInvalid`).
    pub fn make_snapshot(&mut self) -> Option<Arc<Image>> {
        self.backend.as_mut()?.make_snapshot()
    }

    /// Zero-copy read-only access to the CPU target's bytes, paired
    /// with their `PixmapInfo` layout. Always `None` on a GPU-backed or
    /// backend-less surface, per spec.md §4.12 — use
    /// [`Surface::get_pixel_data`] there instead.
    pub fn peek_pixels(&self) -> Option<PixelView<'_>> {
        self.backend.as_ref()?.peek_pixels()
    }

    /// An owned copy of the current target's pixels and their layout,
    /// going through a GPU readback if necessary. Returns `None` on a
    /// backend-less surface (spec.md §7, `TargetInvalid`).
    pub fn get_pixel_data(&mut self) -> Option<PixelData> {
        self.backend.as_mut()?.read_pixels()
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_backend", &self.has_backend())
            .finish()
    }
}

/// Loads a glyph atlas from font bytes, sized by `config.atlas_width`/
/// `atlas_height`, erroring per spec.md §7 instead of panicking on a
/// malformed font file.
pub fn load_glyph_atlas(
    font_bytes: &[u8],
    px_size: f32,
    config: &CanvasConfig,
) -> Result<Arc<Mutex<GlyphAtlas>>, CanvasError> {
    Ok(Arc::new(Mutex::new(GlyphAtlas::new(font_bytes, px_size, config.atlas_width, config.atlas_height)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn make_raster_round_trips_a_fill_through_snapshot() {
        let mut surface = Surface::make_raster(4, 4, PixelFormat::Rgba8888);
        surface.begin_frame(Some(Color::BLACK));
        surface.canvas().fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::rgba(10, 20, 30, 255));
        surface.flush();
        surface.end_frame();

        let snapshot = surface.make_snapshot().unwrap();
        assert_eq!(snapshot.width(), 4);
        assert_eq!(snapshot.as_cpu_pixmap().unwrap().as_bytes()[0..4], [10, 20, 30, 255]);
    }

    #[test]
    fn flush_resets_the_canvas_recorder() {
        let mut surface = Surface::make_raster(2, 2, PixelFormat::Rgba8888);
        surface.canvas().fill_rect(Rect::zero(), Color::WHITE);
        surface.flush();
        assert_eq!(surface.canvas().recorder().ops_len(), 0);
    }

    #[test]
    fn make_recording_surface_has_no_backend_and_never_snapshots() {
        let mut surface = Surface::make_recording(10, 10);
        assert!(!surface.has_backend());
        surface.canvas().fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Color::WHITE);
        let recording = surface.finish_recording();
        assert_eq!(recording.ops().len(), 1);
        assert!(surface.make_snapshot().is_none());
    }

    #[test]
    fn peek_pixels_is_none_on_a_backend_less_surface() {
        let surface = Surface::make_recording(4, 4);
        assert!(surface.peek_pixels().is_none());
    }

    #[test]
    fn peek_pixels_carries_stride_and_format() {
        let mut surface = Surface::make_raster(4, 4, PixelFormat::Bgra8888);
        surface.begin_frame(Some(Color::rgba(9, 8, 7, 255)));
        let view = surface.peek_pixels().unwrap();
        assert_eq!(view.info.stride_bytes, 16);
        assert_eq!(view.info.format, PixelFormat::Bgra8888);
    }

    #[test]
    fn begin_frame_falls_back_to_configured_default_clear_color() {
        let config = CanvasConfig { default_clear_color: Color::rgba(5, 6, 7, 255), ..CanvasConfig::default() };
        let mut surface = Surface::make_raster(2, 2, PixelFormat::Rgba8888).with_config(config);
        surface.begin_frame(None);
        let view = surface.peek_pixels().unwrap();
        assert_eq!(&view.bytes[0..4], &[5, 6, 7, 255]);
    }
}

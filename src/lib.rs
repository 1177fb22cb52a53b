//! A retained-mode 2D rendering core: record draw commands onto a
//! [`Canvas`], sort them into a stable execution order with
//! [`DrawPass`], and replay them against a CPU or GPU [`Backend`],
//! owned end to end by a [`Surface`].
//!
//! ```no_run
//! use canvas2d::{Color, PixelFormat, Point, Rect, Surface};
//!
//! let mut surface = Surface::make_raster(320, 240, PixelFormat::Rgba8888);
//! surface.begin_frame(Some(Color::BLACK));
//! surface.canvas().fill_rect(Rect::new(10.0, 10.0, 100.0, 60.0), Color::rgb(220, 40, 40));
//! surface.canvas().draw_line(Point::new(0.0, 0.0), Point::new(320.0, 240.0), Color::WHITE, 1.0);
//! surface.flush();
//! surface.end_frame();
//!
//! let snapshot = surface.make_snapshot().expect("raster surface always snapshots");
//! assert_eq!(snapshot.width(), 320);
//! ```

pub mod arena;
pub mod backend;
pub mod canvas;
pub mod config;
pub mod draw_pass;
pub mod errors;
pub mod geometry;
pub mod glyph_atlas;
pub mod image;
pub mod pixmap;
pub mod recorder;
pub mod recording;
pub mod surface;

pub use backend::Backend;
pub use canvas::Canvas;
pub use config::{CanvasConfig, PreferredBackend};
pub use draw_pass::DrawPass;
pub use errors::CanvasError;
pub use geometry::{Color, PixelFormat, Point, Rect};
pub use glyph_atlas::GlyphAtlas;
pub use image::Image;
pub use pixmap::{PixelData, PixelView, Pixmap, PixmapInfo};
pub use recorder::Recorder;
pub use recording::{DrawOp, OpVisitor, Recording};
pub use surface::{load_glyph_atlas, Surface};

#[cfg(feature = "gpu")]
pub use backend::gpu::GpuContext;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn end_to_end_raster_cycle_produces_expected_pixel() {
        let mut surface = Surface::make_raster(4, 4, PixelFormat::Rgba8888);
        surface.begin_frame(Some(Color::BLACK));
        surface.canvas().fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::rgb(1, 2, 3));
        surface.flush();
        surface.end_frame();

        let view = surface.peek_pixels().unwrap();
        assert_eq!(&view.bytes[0..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn save_restore_clip_then_draw_stays_within_region() {
        let mut surface = Surface::make_raster(8, 8, PixelFormat::Rgba8888);
        surface.begin_frame(Some(Color::BLACK));
        surface.canvas().save();
        surface.canvas().clip_rect(Rect::new(2.0, 2.0, 2.0, 2.0));
        surface.canvas().fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), Color::rgb(0, 255, 0));
        surface.canvas().restore();
        surface.flush();

        let view = surface.peek_pixels().unwrap();
        let bytes = view.bytes;
        let stride = view.info.stride_bytes as usize;
        let at = |x: usize, y: usize| -> [u8; 4] {
            let off = y * stride + x * 4;
            bytes[off..off + 4].try_into().unwrap()
        };
        assert_eq!(at(2, 2), [0, 255, 0, 255]);
        assert_eq!(at(0, 0), [0, 0, 0, 255]);
    }
}

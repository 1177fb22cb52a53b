//! Builder that appends ops and populates the arena, per spec.md §4.2.

use crate::arena::Arena;
use crate::geometry::{Color, Point, Rect};
use crate::image::Image;
use crate::recording::{DrawOp, Recording};
use std::sync::Arc;

#[derive(Default)]
pub struct Recorder {
    ops: Vec<DrawOp>,
    arena: Arena,
    images: Vec<Arc<Image>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self { ops: Vec::new(), arena: Arena::new(), images: Vec::new() }
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.ops.push(DrawOp::FillRect { rect, color });
    }

    pub fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        self.ops.push(DrawOp::StrokeRect { rect, color, width });
    }

    pub fn line(&mut self, p1: Point, p2: Point, color: Color, width: f32) {
        self.ops.push(DrawOp::Line { p1, p2, color, width });
    }

    pub fn polyline(&mut self, pts: &[Point], color: Color, width: f32) {
        let arena_offset = self.arena.store_points(pts);
        self.ops.push(DrawOp::Polyline { arena_offset, count: pts.len(), color, width });
    }

    pub fn text(&mut self, baseline_pos: Point, text: &str, color: Color) {
        let arena_offset = self.arena.store_string(text);
        self.ops.push(DrawOp::Text { baseline_pos, arena_offset, byte_len: text.len(), color });
    }

    /// Registers `image` in this recording's image table (if not
    /// already the most recently registered image) and pushes a
    /// `DrawImage` op. Images may repeat across multiple draws; the
    /// table is append-only and not deduplicated, mirroring the
    /// teacher's flat `RenderList` being a plain `Vec`.
    pub fn draw_image(&mut self, image: &Arc<Image>, x: f32, y: f32) {
        let image_index = self.images.len() as u32;
        self.images.push(image.clone());
        self.ops.push(DrawOp::DrawImage { x, y, image_index });
    }

    pub fn set_clip(&mut self, rect: Rect) {
        self.ops.push(DrawOp::SetClip { rect });
    }

    pub fn clear_clip(&mut self) {
        self.ops.push(DrawOp::ClearClip);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops_len(&self) -> usize {
        self.ops.len()
    }

    /// Consumes the recorder state, returning an immutable `Recording`.
    pub fn finish(self) -> Recording {
        Recording { ops: self.ops, arena: self.arena, images: self.images }
    }

    /// Resets this recorder in place for reuse by the next frame,
    /// matching `Surface::flush`'s "invokes execute, then resets the
    /// Recorder" lifecycle (spec.md §3).
    pub fn reset(&mut self) {
        self.ops.clear();
        self.arena.reset();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelFormat;
    use crate::pixmap::Pixmap;

    #[test]
    fn finish_produces_recording_with_matching_op_count() {
        let mut rec = Recorder::new();
        rec.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), Color::WHITE);
        rec.set_clip(Rect::new(0.0, 0.0, 1.0, 1.0));
        rec.clear_clip();
        let recording = rec.finish();
        assert_eq!(recording.ops().len(), 3);
    }

    #[test]
    fn draw_image_index_resolves_into_image_table() {
        let pm = Pixmap::alloc(1, 1, PixelFormat::Rgba8888);
        let image = Image::wrap_pixmap(pm);
        let mut rec = Recorder::new();
        rec.draw_image(&image, 5.0, 6.0);
        let recording = rec.finish();
        match recording.ops()[0] {
            DrawOp::DrawImage { image_index, x, y } => {
                assert_eq!(x, 5.0);
                assert_eq!(y, 6.0);
                assert!(Arc::ptr_eq(recording.image(image_index), &image));
            }
            _ => panic!("expected DrawImage"),
        }
    }
}

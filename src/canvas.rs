//! Client-facing API; maintains the clip stack and delegates to a
//! Recorder, per spec.md §4.4 and the Canvas operations of §6.

use crate::geometry::{Color, Point, Rect};
use crate::image::Image;
use crate::recorder::Recorder;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default)]
struct ClipFrame {
    has_clip: bool,
    clip: Rect,
}

pub struct Canvas {
    recorder: Recorder,
    current: ClipFrame,
    stack: Vec<ClipFrame>,
}

impl Canvas {
    pub fn new() -> Self {
        Self { recorder: Recorder::new(), current: ClipFrame::default(), stack: Vec::new() }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.recorder.fill_rect(rect, color);
    }

    pub fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        self.recorder.stroke_rect(rect, color, width);
    }

    pub fn draw_line(&mut self, p1: Point, p2: Point, color: Color, width: f32) {
        self.recorder.line(p1, p2, color, width);
    }

    pub fn draw_polyline(&mut self, pts: &[Point], color: Color, width: f32) {
        self.recorder.polyline(pts, color, width);
    }

    pub fn draw_text(&mut self, baseline_pos: Point, text: &str, color: Color) {
        self.recorder.text(baseline_pos, text, color);
    }

    pub fn draw_image(&mut self, image: &Arc<Image>, x: f32, y: f32) {
        self.recorder.draw_image(image, x, y);
    }

    /// Pushes the current clip frame onto the stack. Emits no op by
    /// itself — only `restore` re-asserts a clip change, per spec.md §8
    /// invariant 6.
    pub fn save(&mut self) {
        self.stack.push(self.current);
    }

    /// Pops the saved frame back into `current`, re-issuing
    /// `SetClip`/`ClearClip` only if the clip actually changed.
    pub fn restore(&mut self) {
        let Some(restored) = self.stack.pop() else { return };
        let changed = restored.has_clip != self.current.has_clip
            || (restored.has_clip && restored.clip != self.current.clip);
        self.current = restored;
        if changed {
            self.emit_current_clip();
        }
    }

    /// Intersects `r` with the current clip (or treats it as the clip if
    /// none is active yet), clamping negative width/height to zero.
    pub fn clip_rect(&mut self, r: Rect) {
        let clamped = Rect::new(r.x, r.y, r.w.max(0.0), r.h.max(0.0));
        let new_clip = if self.current.has_clip { self.current.clip.intersect(&clamped) } else { clamped };
        self.current = ClipFrame { has_clip: true, clip: new_clip };
        self.emit_current_clip();
    }

    fn emit_current_clip(&mut self) {
        if self.current.has_clip {
            self.recorder.set_clip(self.current.clip);
        } else {
            self.recorder.clear_clip();
        }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_rect_intersects_nested_clips() {
        let mut canvas = Canvas::new();
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);
        canvas.clip_rect(a);
        canvas.clip_rect(b);
        assert_eq!(canvas.current.clip, a.intersect(&b));
    }

    #[test]
    fn disjoint_clips_produce_zero_size_clip() {
        let mut canvas = Canvas::new();
        canvas.clip_rect(Rect::new(0.0, 0.0, 2.0, 2.0));
        canvas.clip_rect(Rect::new(10.0, 10.0, 2.0, 2.0));
        assert!(canvas.current.clip.is_empty());
        assert!(canvas.current.has_clip);
    }

    #[test]
    fn save_restore_with_no_intervening_ops_is_idempotent() {
        let mut canvas = Canvas::new();
        canvas.clip_rect(Rect::new(0.0, 0.0, 4.0, 4.0));
        let before = canvas.current;
        canvas.save();
        canvas.restore();
        assert_eq!(canvas.current.has_clip, before.has_clip);
        assert_eq!(canvas.current.clip, before.clip);
        // no extra SetClip/ClearClip beyond the one clip_rect already emitted
        assert_eq!(canvas.recorder().ops_len(), 1);
    }

    #[test]
    fn restore_reissues_clip_when_it_changed() {
        let mut canvas = Canvas::new();
        canvas.save();
        canvas.clip_rect(Rect::new(0.0, 0.0, 4.0, 4.0));
        canvas.restore();
        assert!(!canvas.current.has_clip);
    }
}

//! Compact draw ops, the Recording they live in, and the visitor-based
//! dispatch used by every backend, per spec.md §3 and §4.2.

use crate::arena::Arena;
use crate::draw_pass::DrawPass;
use crate::geometry::{Color, Point, Rect};
use crate::image::Image;
use std::sync::Arc;

/// A single recorded command. Variants stay small and `Copy`-able;
/// variable-length payloads (point lists, text) live in the Recording's
/// arena and are addressed by offset + count/length, per spec.md §9 —
/// this keeps `DrawOp` trivially copyable and lets backends walk the
/// pass without chasing pointers.
#[derive(Clone, Copy, Debug)]
pub enum DrawOp {
    FillRect { rect: Rect, color: Color },
    StrokeRect { rect: Rect, color: Color, width: f32 },
    Line { p1: Point, p2: Point, color: Color, width: f32 },
    Polyline { arena_offset: usize, count: usize, color: Color, width: f32 },
    Text { baseline_pos: Point, arena_offset: usize, byte_len: usize, color: Color },
    DrawImage { x: f32, y: f32, image_index: u32 },
    SetClip { rect: Rect },
    ClearClip,
}

/// The closed set of op "kinds", in the order spec.md §8 (3) requires
/// ops to batch by within a clip group. Declaration order here *is* the
/// batching order `DrawPass` sorts by: `SetClip`/`ClearClip` sort first
/// so they land at the start of the clip group they open (spec.md
/// §4.3's "the backend sees 'change clip, then run this group'"), then
/// drawing ops follow in the order §3 lists them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OpKind {
    SetClip = 0,
    ClearClip = 1,
    FillRect = 2,
    StrokeRect = 3,
    Line = 4,
    Polyline = 5,
    Text = 6,
    DrawImage = 7,
}

impl DrawOp {
    pub fn kind(&self) -> OpKind {
        match self {
            DrawOp::FillRect { .. } => OpKind::FillRect,
            DrawOp::StrokeRect { .. } => OpKind::StrokeRect,
            DrawOp::Line { .. } => OpKind::Line,
            DrawOp::Polyline { .. } => OpKind::Polyline,
            DrawOp::Text { .. } => OpKind::Text,
            DrawOp::DrawImage { .. } => OpKind::DrawImage,
            DrawOp::SetClip { .. } => OpKind::SetClip,
            DrawOp::ClearClip => OpKind::ClearClip,
        }
    }

    /// The color used for sort-key hashing. Ops with no intrinsic color
    /// (clip changes, images) sort as black/opaque so they form a
    /// single batch per clip group.
    pub fn sort_color(&self) -> Color {
        match self {
            DrawOp::FillRect { color, .. }
            | DrawOp::StrokeRect { color, .. }
            | DrawOp::Line { color, .. }
            | DrawOp::Polyline { color, .. }
            | DrawOp::Text { color, .. } => *color,
            DrawOp::DrawImage { .. } | DrawOp::SetClip { .. } | DrawOp::ClearClip => Color::BLACK,
        }
    }
}

/// The immutable result of a Recorder finishing a frame, per spec.md
/// §3/§4.2.
pub struct Recording {
    pub(crate) ops: Vec<DrawOp>,
    pub(crate) arena: Arena,
    pub(crate) images: Vec<Arc<Image>>,
}

impl Recording {
    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn image(&self, index: u32) -> &Arc<Image> {
        &self.images[index as usize]
    }

    /// Iterates ops in insertion order, dispatching each to `visitor`.
    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        for op in &self.ops {
            dispatch_one(self, op, visitor);
        }
    }

    /// Iterates in the order given by `pass.sorted_indices`, dispatching
    /// each to `visitor`. This is the single choke point every backend
    /// uses to replay a sorted Recording.
    pub fn dispatch(&self, visitor: &mut dyn OpVisitor, pass: &DrawPass) {
        for &idx in &pass.sorted_indices {
            let op = &self.ops[idx as usize];
            dispatch_one(self, op, visitor);
        }
    }
}

fn dispatch_one(recording: &Recording, op: &DrawOp, visitor: &mut dyn OpVisitor) {
    match *op {
        DrawOp::FillRect { rect, color } => visitor.fill_rect(rect, color),
        DrawOp::StrokeRect { rect, color, width } => visitor.stroke_rect(rect, color, width),
        DrawOp::Line { p1, p2, color, width } => visitor.line(p1, p2, color, width),
        DrawOp::Polyline { arena_offset, count, color, width } => {
            let pts = recording.arena.get_points(arena_offset, count);
            visitor.polyline(&pts, color, width);
        }
        DrawOp::Text { baseline_pos, arena_offset, byte_len, color } => {
            let text = recording.arena.get_string(arena_offset, byte_len);
            visitor.text(baseline_pos, text, color);
        }
        DrawOp::DrawImage { x, y, image_index } => {
            let image = recording.image(image_index);
            visitor.draw_image(image, x, y);
        }
        DrawOp::SetClip { rect } => visitor.set_clip(rect),
        DrawOp::ClearClip => visitor.clear_clip(),
    }
}

/// Per-op handler implemented by every backend. Polymorphism is by
/// visitor method, not by op subtype, per spec.md §4.2/§9.
pub trait OpVisitor {
    fn fill_rect(&mut self, rect: Rect, color: Color);
    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32);
    fn line(&mut self, p1: Point, p2: Point, color: Color, width: f32);
    fn polyline(&mut self, pts: &[Point], color: Color, width: f32);
    fn text(&mut self, baseline_pos: Point, text: &str, color: Color);
    fn draw_image(&mut self, image: &Arc<Image>, x: f32, y: f32);
    fn set_clip(&mut self, rect: Rect);
    fn clear_clip(&mut self);
}

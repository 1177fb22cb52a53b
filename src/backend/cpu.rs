//! Software rasterizer: fill, stroke, line, polyline, text, image,
//! clip, per spec.md §4.9.
//!
//! Grounded on the teacher's `backends/cairo.rs` `CairoSurface`: an
//! owned pixel buffer with a per-op dispatch loop over a display-item
//! list. Here the Cairo calls are replaced with hand-rolled scanline
//! fill / Bresenham / SRC-OVER blending, since spec.md explicitly
//! excludes antialiasing and this is exactly the primitive-level work
//! the core is meant to contain (spec.md §1).

use super::Backend;
use crate::draw_pass::DrawPass;
use crate::geometry::{Color, PixelFormat, Point, Rect};
use crate::glyph_atlas::GlyphAtlas;
use crate::image::Image;
use crate::pixmap::{pack_color, PixelView, Pixmap};
use crate::recording::{OpVisitor, Recording};
use std::sync::{Arc, Mutex};

pub struct CpuBackend {
    target: Pixmap,
    clip: Option<Rect>,
    atlas: Option<Arc<Mutex<GlyphAtlas>>>,
    warned_missing_atlas_this_frame: bool,
}

impl CpuBackend {
    pub fn new(target: Pixmap) -> Self {
        Self { target, clip: None, atlas: None, warned_missing_atlas_this_frame: false }
    }

    pub fn target(&self) -> &Pixmap {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut Pixmap {
        &mut self.target
    }

    fn effective_clip(&self) -> Rect {
        let full = Rect::new(0.0, 0.0, self.target.width() as f32, self.target.height() as f32);
        match self.clip {
            Some(c) => c.intersect(&full),
            None => full,
        }
    }
}

impl Backend for CpuBackend {
    fn begin_frame(&mut self, clear_color: Color) {
        self.target.clear(clear_color);
        self.warned_missing_atlas_this_frame = false;
    }

    fn end_frame(&mut self) {}

    fn execute(&mut self, recording: &Recording, pass: &DrawPass) {
        recording.dispatch(self, pass);
    }

    fn resize(&mut self, width: u32, height: u32) {
        let format = self.target.format();
        self.target.reallocate(width, height, format);
        self.clip = None;
    }

    fn set_glyph_atlas(&mut self, atlas: Option<Arc<Mutex<GlyphAtlas>>>) {
        self.atlas = atlas;
    }

    fn make_snapshot(&mut self) -> Option<Arc<Image>> {
        if self.target.width() == 0 || self.target.height() == 0 {
            return None;
        }
        Some(Image::from_pixmap(&self.target))
    }

    fn peek_pixels(&self) -> Option<PixelView<'_>> {
        Some(PixelView { info: self.target.info(), bytes: self.target.as_bytes() })
    }
}

/// `out = (src*a + dst*(255-a)) / 255` per channel, output alpha
/// clamped to 255 — this backend never produces translucent
/// destinations, per spec.md §4.9.
pub fn blend_src_over(dst: &mut [u8], src: &[u8; 4], alpha: u8) {
    let a = alpha as u32;
    for i in 0..4 {
        let s = src[i] as u32;
        let d = dst[i] as u32;
        dst[i] = ((s * a + d * (255 - a)) / 255) as u8;
    }
    dst[3] = 255;
}

impl OpVisitor for CpuBackend {
    fn fill_rect(&mut self, rect: Rect, color: Color) {
        let clip = self.effective_clip();
        let r = rect.intersect(&clip);
        if r.is_empty() {
            return;
        }
        let (x0, y0, x1, y1) = r.clamped_pixel_bounds(self.target.width(), self.target.height());
        let format = self.target.format();
        let word = pack_color(color, format);
        let stride = self.target.stride_bytes() as usize;
        let bytes = self.target.as_bytes_mut();
        for y in y0..y1 {
            let row = y as usize * stride;
            for x in x0..x1 {
                let offset = row + x as usize * 4;
                if color.a == 255 {
                    bytes[offset..offset + 4].copy_from_slice(&word);
                } else if color.a > 0 {
                    let dst = &mut bytes[offset..offset + 4];
                    blend_src_over(dst, &word, color.a);
                }
            }
        }
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        let w = if width > 0.0 { width } else { 1.0 };
        let top = Rect::new(rect.x, rect.y, rect.w, w);
        let bottom = Rect::new(rect.x, rect.bottom() - w, rect.w, w);
        let left = Rect::new(rect.x, rect.y, w, rect.h);
        let right = Rect::new(rect.right() - w, rect.y, w, rect.h);
        for edge in [top, bottom, left, right] {
            self.fill_rect(edge, color);
        }
    }

    /// Integer-coordinate Bresenham blending one pixel per step. `width`
    /// is ignored in the CPU path — a known, intentional asymmetry with
    /// the GPU path, per spec.md's "Open questions".
    fn line(&mut self, p1: Point, p2: Point, color: Color, _width: f32) {
        let clip = self.effective_clip();
        let format = self.target.format();
        let word = pack_color(color, format);
        let stride = self.target.stride_bytes() as usize;
        let (tw, th) = (self.target.width() as i32, self.target.height() as i32);
        let (cx0, cy0, cx1, cy1) = clip.clamped_pixel_bounds(self.target.width(), self.target.height());

        let mut x0 = p1.x.round() as i32;
        let mut y0 = p1.y.round() as i32;
        let x1 = p2.x.round() as i32;
        let y1 = p2.y.round() as i32;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let bytes = self.target.as_bytes_mut();
        loop {
            if x0 >= cx0 && x0 < cx1 && y0 >= cy0 && y0 < cy1 && x0 >= 0 && x0 < tw && y0 >= 0 && y0 < th {
                let offset = y0 as usize * stride + x0 as usize * 4;
                if color.a == 255 {
                    bytes[offset..offset + 4].copy_from_slice(&word);
                } else if color.a > 0 {
                    blend_src_over(&mut bytes[offset..offset + 4], &word, color.a);
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn polyline(&mut self, pts: &[Point], color: Color, width: f32) {
        for pair in pts.windows(2) {
            self.line(pair[0], pair[1], color, width);
        }
    }

    fn text(&mut self, baseline_pos: Point, text: &str, color: Color) {
        let Some(atlas) = self.atlas.clone() else {
            if !self.warned_missing_atlas_this_frame {
                log::warn!("draw_text called with no glyph atlas installed; skipping op");
                self.warned_missing_atlas_this_frame = true;
            }
            return;
        };
        let format = self.target.format();
        let stride = self.target.stride_bytes();
        let height = self.target.height();
        let mut atlas = atlas.lock().expect("glyph atlas mutex poisoned");
        atlas.draw_text_cpu(
            self.target.as_bytes_mut(),
            stride,
            height,
            baseline_pos.x,
            baseline_pos.y,
            text,
            color,
            format,
        );
    }

    fn draw_image(&mut self, image: &Arc<Image>, x: f32, y: f32) {
        let Some(src_pixmap) = image.as_cpu_pixmap() else {
            // GPU-backed images are resolved by the GPU backend only.
            return;
        };
        let dest_rect = Rect::new(x, y, image.width() as f32, image.height() as f32);
        let clip = self.effective_clip();
        let r = dest_rect.intersect(&clip);
        if r.is_empty() {
            return;
        }
        let (x0, y0, x1, y1) = r.clamped_pixel_bounds(self.target.width(), self.target.height());

        let src_format = src_pixmap.format();
        let dst_format = self.target.format();
        let swap_channels = src_format != dst_format;
        let src_stride = src_pixmap.stride_bytes() as usize;
        let dst_stride = self.target.stride_bytes() as usize;
        let src_bytes = src_pixmap.as_bytes().to_vec(); // snapshot read; dest may alias a different pixmap
        let dst_bytes = self.target.as_bytes_mut();

        for py in y0..y1 {
            let sy = py - y.round() as i32;
            if sy < 0 || sy as u32 >= src_pixmap.height() {
                continue;
            }
            for px in x0..x1 {
                let sx = px - x.round() as i32;
                if sx < 0 || sx as u32 >= src_pixmap.width() {
                    continue;
                }
                let src_off = sy as usize * src_stride + sx as usize * 4;
                let mut texel = [
                    src_bytes[src_off],
                    src_bytes[src_off + 1],
                    src_bytes[src_off + 2],
                    src_bytes[src_off + 3],
                ];
                if swap_channels {
                    texel.swap(0, 2);
                }
                let a = texel[3];
                if a == 0 {
                    continue;
                }
                let dst_off = py as usize * dst_stride + px as usize * 4;
                if a == 255 {
                    dst_bytes[dst_off..dst_off + 4].copy_from_slice(&texel);
                } else {
                    blend_src_over(&mut dst_bytes[dst_off..dst_off + 4], &texel, a);
                }
            }
        }
    }

    fn set_clip(&mut self, rect: Rect) {
        self.clip = Some(rect);
    }

    fn clear_clip(&mut self) {
        self.clip = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw_pass::DrawPass;
    use crate::recorder::Recorder;

    fn read_pixel(pm: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let stride = pm.stride_bytes() as usize;
        let off = y as usize * stride + x as usize * 4;
        pm.as_bytes()[off..off + 4].try_into().unwrap()
    }

    #[test]
    fn s1_opaque_fill_on_4x4_bgra() {
        let pm = Pixmap::alloc(4, 4, PixelFormat::Bgra8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::BLACK);
        let mut rec = Recorder::new();
        rec.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::rgba(255, 0, 0, 255));
        let recording = rec.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);

        for y in 0..4 {
            for x in 0..4 {
                // BGRA8888 word for red: B=00 G=00 R=FF A=FF
                assert_eq!(read_pixel(backend.target(), x, y), [0x00, 0x00, 0xFF, 0xFF]);
            }
        }
    }

    #[test]
    fn s2_half_alpha_blend_over_black() {
        let pm = Pixmap::alloc(8, 8, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::rgba(0, 0, 0, 255));
        let mut rec = Recorder::new();
        rec.fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), Color::rgba(255, 255, 255, 128));
        let recording = rec.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);

        let px = read_pixel(backend.target(), 3, 3);
        for channel in &px[0..3] {
            assert!((*channel as i32 - 128).abs() <= 1);
        }
    }

    #[test]
    fn s3_clipped_overdraw() {
        let pm = Pixmap::alloc(16, 16, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::BLACK);
        let mut rec = Recorder::new();
        rec.set_clip(Rect::new(4.0, 4.0, 4.0, 4.0));
        rec.fill_rect(Rect::new(0.0, 0.0, 16.0, 16.0), Color::rgb(0, 255, 0));
        rec.clear_clip();
        let recording = rec.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);

        assert_eq!(read_pixel(backend.target(), 5, 5), [0, 255, 0, 255]);
        assert_eq!(read_pixel(backend.target(), 0, 0), [0, 0, 0, 255]);
        assert_eq!(read_pixel(backend.target(), 15, 15), [0, 0, 0, 255]);
    }

    #[test]
    fn s4_polyline_triangle_produces_three_segments_with_endpoint_color() {
        let pm = Pixmap::alloc(300, 200, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::BLACK);
        let pts = [
            Point::new(200.0, 30.0),
            Point::new(260.0, 130.0),
            Point::new(140.0, 130.0),
            Point::new(200.0, 30.0),
        ];
        let color = Color::rgba(255, 200, 0, 255);
        let mut rec = Recorder::new();
        rec.polyline(&pts, color, 1.0);
        let recording = rec.finish();
        // exactly one Polyline op recorded, which expands to 3 segments at execute time
        assert_eq!(recording.ops().len(), 1);
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);

        for p in &pts {
            let (x, y) = (p.x.round() as u32, p.y.round() as u32);
            assert_eq!(read_pixel(backend.target(), x, y), [255, 200, 0, 255]);
        }
    }

    #[test]
    fn alpha_identity_zero_leaves_destination_unchanged() {
        let pm = Pixmap::alloc(2, 2, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::rgba(10, 20, 30, 255));
        let mut rec = Recorder::new();
        rec.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), Color::rgba(255, 255, 255, 0));
        let recording = rec.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);
        assert_eq!(read_pixel(backend.target(), 0, 0), [10, 20, 30, 255]);
    }

    #[test]
    fn peek_pixels_exposes_the_cleared_target() {
        let pm = Pixmap::alloc(2, 2, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::rgba(9, 8, 7, 255));
        let view = backend.peek_pixels().unwrap();
        assert_eq!(view.info.stride_bytes, 8);
        assert_eq!(&view.bytes[0..4], &[9, 8, 7, 255]);
    }

    #[test]
    fn alpha_identity_full_replaces_destination() {
        let pm = Pixmap::alloc(2, 2, PixelFormat::Rgba8888);
        let mut backend = CpuBackend::new(pm);
        backend.begin_frame(Color::rgba(10, 20, 30, 255));
        let mut rec = Recorder::new();
        rec.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), Color::rgba(1, 2, 3, 255));
        let recording = rec.finish();
        let pass = DrawPass::create(&recording);
        backend.execute(&recording, &pass);
        assert_eq!(read_pixel(backend.target(), 0, 0), [1, 2, 3, 255]);
    }
}

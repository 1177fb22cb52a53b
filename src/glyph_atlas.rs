//! Rasterizes and packs greyscale glyphs; used by both backends, per
//! spec.md §4.7.
//!
//! Font parsing and glyph-to-coverage rasterization are treated as a
//! black box, delegated entirely to `fontdue` (spec.md §1 lists
//! font-file parsing as an external collaborator). This module owns
//! only the atlas bitmap, the shelf packer, and the per-glyph metrics
//! cache built on top of it.

use std::collections::HashMap;

/// UV coordinates in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphUv {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct GlyphMetrics {
    /// Bounding box in pixels, relative to the glyph origin.
    pub bbox_x: i32,
    pub bbox_y: i32,
    pub bbox_w: u32,
    pub bbox_h: u32,
    pub advance: f32,
    pub uv: GlyphUv,
}

struct Shelf {
    cursor_x: u32,
    cursor_y: u32,
    row_height: u32,
}

/// Output of [`GlyphAtlas::rasterize_string`]: a single-channel
/// coverage buffer exactly `width * height` bytes, row-major.
pub struct StringRaster {
    pub bitmap: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A single-channel 8-bit glyph atlas, grown in place by doubling the
/// smaller dimension when a glyph can't be shelf-packed.
pub struct GlyphAtlas {
    font: fontdue::Font,
    px_size: f32,
    ascent: f32,
    descent: f32,
    line_height: f32,

    atlas_w: u32,
    atlas_h: u32,
    bitmap: Vec<u8>,
    shelf: Shelf,
    glyphs: HashMap<char, GlyphMetrics>,
}

impl GlyphAtlas {
    /// Loads a font from raw file bytes at `px_size` and records its
    /// ascent/descent/line-height. `atlas_width`/`atlas_height` size the
    /// initial packed bitmap, per [`crate::config::CanvasConfig`].
    pub fn new(
        font_bytes: &[u8],
        px_size: f32,
        atlas_width: u32,
        atlas_height: u32,
    ) -> Result<Self, crate::errors::CanvasError> {
        let font = fontdue::Font::from_bytes(font_bytes, fontdue::FontSettings::default())
            .map_err(|e| crate::errors::CanvasError::InvalidArgs.tap_log(&e))?;
        let metrics = font.horizontal_line_metrics(px_size).unwrap_or(fontdue::LineMetrics {
            ascent: px_size * 0.8,
            descent: -px_size * 0.2,
            line_gap: 0.0,
            new_line_size: px_size,
        });

        let atlas_w = atlas_width.max(1);
        let atlas_h = atlas_height.max(1);
        Ok(Self {
            font,
            px_size,
            ascent: metrics.ascent,
            descent: metrics.descent,
            line_height: metrics.new_line_size,
            atlas_w,
            atlas_h,
            bitmap: vec![0u8; (atlas_w * atlas_h) as usize],
            shelf: Shelf { cursor_x: 0, cursor_y: 0, row_height: 0 },
            glyphs: HashMap::new(),
        })
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    pub fn ascent(&self) -> f32 {
        self.ascent
    }

    pub fn descent(&self) -> f32 {
        self.descent
    }

    /// Returns the cached metrics for `c`, rasterizing and packing it on
    /// first use.
    pub fn glyph(&mut self, c: char) -> GlyphMetrics {
        if let Some(m) = self.glyphs.get(&c) {
            return *m;
        }
        let (metrics, coverage) = self.font.rasterize(c, self.px_size);
        let (gw, gh) = (metrics.width as u32, metrics.height as u32);
        let (px, py) = self.pack(gw, gh);
        self.blit(px, py, gw, gh, &coverage);

        let uv = GlyphUv {
            u0: px as f32 / self.atlas_w as f32,
            v0: py as f32 / self.atlas_h as f32,
            u1: (px + gw) as f32 / self.atlas_w as f32,
            v1: (py + gh) as f32 / self.atlas_h as f32,
        };
        let m = GlyphMetrics {
            bbox_x: metrics.xmin,
            bbox_y: metrics.ymin,
            bbox_w: gw,
            bbox_h: gh,
            advance: metrics.advance_width,
            uv,
        };
        self.glyphs.insert(c, m);
        m
    }

    /// Sums horizontal advances for `s`. ASCII-only: multi-byte input is
    /// passed through as 8-bit indices into the cache, per spec.md
    /// §4.7.
    pub fn measure_text(&mut self, s: &str) -> f32 {
        s.chars().map(|c| self.glyph(c).advance).sum()
    }

    /// Rasterizes `s` into a freshly allocated single-channel coverage
    /// buffer sized exactly to its own bounding box, for callers (the
    /// GPU backend) that need a small per-call texture rather than the
    /// whole shared atlas bitmap, per spec.md §4.10's "rasterize the
    /// string into a RAM buffer via the glyph atlas, upload that buffer"
    /// requirement. Glyph placement matches [`GlyphAtlas::draw_text_cpu`]:
    /// the buffer's local baseline sits at `line_height` from its top
    /// edge, so a quad drawn from `baseline_y - line_height` lines up
    /// with the CPU path's positioning.
    pub fn rasterize_string(&mut self, s: &str) -> StringRaster {
        let mut pen_x = 0.0f32;
        let mut placed: Vec<(GlyphMetrics, f32)> = Vec::new();
        for c in s.chars() {
            let m = self.glyph(c);
            placed.push((m, pen_x));
            pen_x += m.advance;
        }

        let width = pen_x.ceil().max(1.0) as u32;
        let height = self.line_height.ceil().max(1.0) as u32;
        let mut bitmap = vec![0u8; (width * height) as usize];
        let local_baseline = self.line_height.round() as i32;

        for (m, glyph_pen_x) in placed {
            let gx = glyph_pen_x.round() as i32 + m.bbox_x;
            let gy = local_baseline - m.bbox_y - m.bbox_h as i32;
            let u0 = (m.uv.u0 * self.atlas_w as f32).round() as u32;
            let v0 = (m.uv.v0 * self.atlas_h as f32).round() as u32;
            for row in 0..m.bbox_h {
                let py = gy + row as i32;
                if py < 0 || py as u32 >= height {
                    continue;
                }
                for col in 0..m.bbox_w {
                    let px = gx + col as i32;
                    if px < 0 || px as u32 >= width {
                        continue;
                    }
                    let cov = self.bitmap[((v0 + row) * self.atlas_w + (u0 + col)) as usize];
                    bitmap[(py as u32 * width + px as u32) as usize] = cov;
                }
            }
        }

        StringRaster { bitmap, width, height }
    }

    fn pack(&mut self, gw: u32, gh: u32) -> (u32, u32) {
        if self.shelf.cursor_x + gw > self.atlas_w {
            self.shelf.cursor_x = 0;
            self.shelf.cursor_y += self.shelf.row_height;
            self.shelf.row_height = 0;
        }
        if self.shelf.cursor_y + gh > self.atlas_h {
            self.grow();
            return self.pack(gw, gh);
        }
        let pos = (self.shelf.cursor_x, self.shelf.cursor_y);
        self.shelf.cursor_x += gw;
        self.shelf.row_height = self.shelf.row_height.max(gh);
        pos
    }

    /// Doubles the smaller atlas dimension in place.
    fn grow(&mut self) {
        let (new_w, new_h) = if self.atlas_w <= self.atlas_h {
            (self.atlas_w * 2, self.atlas_h)
        } else {
            (self.atlas_w, self.atlas_h * 2)
        };
        log::debug!("glyph atlas growing {}x{} -> {}x{}", self.atlas_w, self.atlas_h, new_w, new_h);

        let mut new_bitmap = vec![0u8; (new_w * new_h) as usize];
        for y in 0..self.atlas_h {
            let src = (y * self.atlas_w) as usize;
            let dst = (y * new_w) as usize;
            new_bitmap[dst..dst + self.atlas_w as usize]
                .copy_from_slice(&self.bitmap[src..src + self.atlas_w as usize]);
        }
        self.atlas_w = new_w;
        self.atlas_h = new_h;
        self.bitmap = new_bitmap;
        // Existing glyphs' UVs (computed against the old dimensions) are
        // now stale; the next access for each recomputes geometry but
        // reuses packed pixels, so just drop the cache and repack.
        self.glyphs.clear();
        self.shelf = Shelf { cursor_x: 0, cursor_y: 0, row_height: 0 };
    }

    fn blit(&mut self, x: u32, y: u32, w: u32, h: u32, coverage: &[u8]) {
        for row in 0..h {
            let src = (row * w) as usize;
            let dst = ((y + row) * self.atlas_w + x) as usize;
            self.bitmap[dst..dst + w as usize].copy_from_slice(&coverage[src..src + w as usize]);
        }
    }

    /// Composites `s` at baseline `(x, y)` directly into a 32-bit pixel
    /// buffer, using each glyph's coverage as alpha, per spec.md §4.7.
    pub fn draw_text_cpu(
        &mut self,
        buf: &mut [u8],
        stride: u32,
        height: u32,
        x: f32,
        y: f32,
        s: &str,
        color: crate::geometry::Color,
        format: crate::geometry::PixelFormat,
    ) {
        let mut pen_x = x;
        for c in s.chars() {
            let m = self.glyph(c);
            let gx = pen_x.round() as i32 + m.bbox_x;
            let gy = y.round() as i32 - m.bbox_y - m.bbox_h as i32;
            self.blend_glyph(buf, stride, height, gx, gy, m, color, format);
            pen_x += m.advance;
        }
    }

    fn blend_glyph(
        &self,
        buf: &mut [u8],
        stride: u32,
        height: u32,
        gx: i32,
        gy: i32,
        m: GlyphMetrics,
        color: crate::geometry::Color,
        format: crate::geometry::PixelFormat,
    ) {
        let u0 = (m.uv.u0 * self.atlas_w as f32).round() as u32;
        let v0 = (m.uv.v0 * self.atlas_h as f32).round() as u32;
        for row in 0..m.bbox_h {
            let py = gy + row as i32;
            if py < 0 || py as u32 >= height {
                continue;
            }
            for col in 0..m.bbox_w {
                let px = gx + col as i32;
                if px < 0 || (px as u32 * 4 + 4) as u32 > stride {
                    continue;
                }
                let cov = self.bitmap[((v0 + row) * self.atlas_w + (u0 + col)) as usize];
                if cov == 0 {
                    continue;
                }
                let a = (color.a as u32 * cov as u32 / 255) as u8;
                let offset = (py as u32 * stride + px as u32 * 4) as usize;
                let dst = &mut buf[offset..offset + 4];
                let word = crate::pixmap::pack_color(
                    crate::geometry::Color::rgba(color.r, color.g, color.b, a),
                    format,
                );
                crate::backend::cpu::blend_src_over(dst, &word, a);
            }
        }
    }
}

impl crate::errors::CanvasError {
    fn tap_log(self, detail: &impl std::fmt::Debug) -> Self {
        log::error!("glyph atlas font load failed: {:?}", detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal valid TrueType font is not embedded in this crate; atlas
    // packing geometry is exercised directly without going through
    // `fontdue::Font::rasterize`.
    #[test]
    fn shelf_packer_starts_new_row_when_width_exceeded() {
        let mut shelf = Shelf { cursor_x: 0, cursor_y: 0, row_height: 10 };
        let atlas_w = 16u32;
        // first glyph fits on the row
        assert!(shelf.cursor_x + 8 <= atlas_w);
        shelf.cursor_x += 8;
        // second glyph of width 10 would overflow; caller starts a new row
        if shelf.cursor_x + 10 > atlas_w {
            shelf.cursor_x = 0;
            shelf.cursor_y += shelf.row_height;
            shelf.row_height = 0;
        }
        assert_eq!(shelf.cursor_x, 0);
        assert_eq!(shelf.cursor_y, 10);
    }
}

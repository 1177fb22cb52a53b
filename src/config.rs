use crate::geometry::Color;

/// Which backend a [`crate::surface::Surface`] should prefer when both
/// are compiled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredBackend {
    Cpu,
    Gpu,
}

/// Client-chosen knobs, picked once at startup.
#[derive(Debug, Clone)]
pub struct CanvasConfig {
    /// Initial glyph atlas dimensions, per spec.md §4.7.
    pub atlas_width: u32,
    pub atlas_height: u32,
    /// Default clear color used by `begin_frame` when the caller does
    /// not specify one, per spec.md §6.
    pub default_clear_color: Color,
    pub preferred_backend: PreferredBackend,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            atlas_width: 512,
            atlas_height: 256,
            default_clear_color: Color::rgba(0, 0, 0, 255),
            preferred_backend: PreferredBackend::Cpu,
        }
    }
}

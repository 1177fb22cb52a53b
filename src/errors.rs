//! Designed error kinds, per spec.md §7. Most of these are not
//! propagated as `Result` at all — each call site follows the policy
//! column of that table (return `None`, silently no-op, fall back to
//! CPU) and only logs or reports through `CanvasError` where a typed
//! value is actually useful to the caller.

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("invalid arguments")]
    InvalidArgs,

    #[error("operation target is invalid or zero-sized")]
    TargetInvalid,

    #[error("no glyph atlas installed")]
    GlyphAtlasMissing,

    #[error("GPU backend initialization failed: {0}")]
    GpuInitFailure(String),

    #[error("GPU texture allocation failed: {0}")]
    GpuTextureAllocFailure(String),

    #[error("GPU pipeline failed to link: {0}")]
    GpuPipelineLinkFailure(String),

    #[error("allocator failure")]
    AllocatorFailure,
}

//! Maps CPU-sourced `Image`s to their uploaded GPU texture + bind
//! group, per spec.md §4.11. Grounded on the teacher's own texture
//! caching inside `backends/vello.rs` (an `id -> wgpu resource` map with
//! upload-on-miss), adapted to this crate's `Image::unique_id` as the
//! cache key instead of Vello's resource handles.

use crate::geometry::PixelFormat;
use crate::pixmap::Pixmap;
use std::collections::HashMap;

struct Entry {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// No eviction within a backend's lifetime, per spec.md §4.11 — an
/// application that churns through many distinct images for the
/// lifetime of one `Surface` is expected to manage that itself (e.g. by
/// reusing `Image`s). Every entry's GPU resources are dropped when the
/// cache itself is dropped.
pub struct TextureCache {
    entries: HashMap<u64, Entry>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the cached bind group for `image_id`, uploading `pixmap`
    /// first on a miss. Channel order is selected from `pixmap.format()`
    /// so BGRA-sourced pixmaps don't come out red/blue swapped.
    pub fn get_or_upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        image_id: u64,
        pixmap: &Pixmap,
    ) -> wgpu::BindGroup {
        if let Some(existing) = self.entries.get(&image_id) {
            if existing.width == pixmap.width() && existing.height == pixmap.height() {
                return existing.bind_group.clone();
            }
            log::debug!("texture cache entry {image_id} changed size, re-uploading");
        }

        let format = gpu_format_for(pixmap.format());
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas2d cached image texture"),
            size: wgpu::Extent3d { width: pixmap.width(), height: pixmap.height(), depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixmap.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(pixmap.stride_bytes()),
                rows_per_image: Some(pixmap.height()),
            },
            wgpu::Extent3d { width: pixmap.width(), height: pixmap.height(), depth_or_array_layers: 1 },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("canvas2d cached image bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
            ],
        });

        self.entries.insert(
            image_id,
            Entry { texture, bind_group: bind_group.clone(), width: pixmap.width(), height: pixmap.height() },
        );
        bind_group
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

fn gpu_format_for(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8888 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8888 => wgpu::TextureFormat::Bgra8Unorm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_has_no_entries() {
        let cache = TextureCache::new();
        assert_eq!(cache.len(), 0);
    }
}

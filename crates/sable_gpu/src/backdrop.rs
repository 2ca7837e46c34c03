//! Sampleable snapshot of a render target.
//!
//! The edge-smoothing pass reads the pixels it is about to blend, which a
//! render pass cannot do from its own attachment. Before that pass runs, the
//! target is copied into this texture and sampled from there.

use tracing::debug;

pub struct Backdrop {
    format: wgpu::TextureFormat,
    texture: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
}

impl Backdrop {
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            texture: None,
            view: None,
            width: 0,
            height: 0,
        }
    }

    /// Snapshot `source` into the backdrop, reallocating if the copy does not
    /// fit. Returns the view to sample from.
    pub fn capture(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Option<&wgpu::TextureView> {
        if self.texture.is_none() || self.width < width || self.height < height {
            let width = width.max(self.width);
            let height = height.max(self.height);
            debug!(width, height, "allocating backdrop");
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Backdrop"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.format,
                usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.texture = Some(texture);
            self.width = width;
            self.height = height;
        }

        let texture = self.texture.as_ref()?;
        encoder.copy_texture_to_texture(
            source.as_image_copy(),
            texture.as_image_copy(),
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.view.as_ref()
    }
}

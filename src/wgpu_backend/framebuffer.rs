//! Offscreen framebuffers and depth buffers.

use std::sync::Arc;

use glam::UVec2;

use crate::gpu::GpuContext;
use crate::render_graph::FramebufferDescriptor;

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// A depth texture and its view.
#[derive(Debug)]
pub(crate) struct DepthBuffer {
    _texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) size: UVec2,
}

impl DepthBuffer {
    pub(crate) fn new(gpu: &GpuContext, label: &str, size: UVec2) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
            size,
        }
    }
}

#[derive(Debug)]
struct FramebufferTextures {
    descriptor: FramebufferDescriptor,
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: Option<DepthBuffer>,
}

/// Handle to an offscreen color texture (in the surface format) with an optional depth buffer.
///
/// Cloning is cheap; clones share the GPU textures.
#[derive(Clone, Debug)]
pub struct WgpuFramebuffer {
    inner: Arc<FramebufferTextures>,
}

impl WgpuFramebuffer {
    pub(crate) fn new(gpu: &GpuContext, descriptor: &FramebufferDescriptor) -> Self {
        let color = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&descriptor.name),
            size: extent(descriptor.size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: gpu.config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = descriptor.depth.then(|| {
            DepthBuffer::new(gpu, &format!("{} depth", descriptor.name), descriptor.size)
        });

        Self {
            inner: Arc::new(FramebufferTextures {
                descriptor: descriptor.clone(),
                _color: color,
                color_view,
                depth,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.descriptor.name
    }

    pub fn size(&self) -> UVec2 {
        self.inner.descriptor.size
    }

    pub fn descriptor(&self) -> &FramebufferDescriptor {
        &self.inner.descriptor
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.inner.color_view
    }

    pub fn depth_view(&self) -> Option<&wgpu::TextureView> {
        self.inner.depth.as_ref().map(|depth| &depth.view)
    }
}

pub(crate) fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

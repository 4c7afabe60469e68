//! A clip-space quad covering the whole target, for image-space passes.

use wgpu::util::DeviceExt;

use crate::render_graph::RenderSource;
use crate::shader_graph::ShaderType;
use crate::wgpu_backend::{VertexLayout, WgpuBackend, WgpuBackendError};

/// Interleaved quad vertex: clip-space position and texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0, 0.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0, 0.0], uv: [1.0, 1.0] },
    QuadVertex { position: [1.0, 1.0, 0.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0, 0.0], uv: [0.0, 0.0] },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Render source drawing a quad over the full viewport with the pass's override program.
///
/// Programs drawn with it must be created against [`FullscreenQuad::layout`], reading a
/// `position: vec3` attribute, a `uv: vec2` attribute, or both.
///
/// ```ignore
/// let quad = FullscreenQuad::new(&backend);
/// let program = backend.create_program("tonemap", &descriptor, &FullscreenQuad::layout())?;
/// graph.add_pass(
///     PassNode::new("tonemap")
///         .input("scene", "hdr")
///         .override_shading(program)
///         .source(quad),
/// )?;
/// ```
pub struct FullscreenQuad {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
}

impl FullscreenQuad {
    pub fn new(backend: &WgpuBackend) -> Self {
        let device = &backend.gpu().device;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Fullscreen Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Fullscreen Quad Index Buffer"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
        }
    }

    /// The vertex layout of [`QuadVertex`].
    pub fn layout() -> VertexLayout {
        VertexLayout::new()
            .field("position", ShaderType::Vec3)
            .field("uv", ShaderType::Vec2)
    }
}

impl RenderSource<WgpuBackend> for FullscreenQuad {
    fn submit(&self, backend: &mut WgpuBackend) -> Result<(), WgpuBackendError> {
        if backend.override_program().is_none() {
            return Err(WgpuBackendError::NoProgram);
        }
        let mut render_pass = backend.render_pass("Fullscreen Quad")?;
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_vertex_struct() {
        let layout = FullscreenQuad::layout();
        assert_eq!(layout.stride(), std::mem::size_of::<QuadVertex>() as u64);
        assert_eq!(layout.stride(), 20);
        assert_eq!(layout.offset_of("uv"), Some(12));
        assert_eq!(bytemuck::cast_slice::<QuadVertex, u8>(&QUAD_VERTICES).len(), 80);
    }

    #[test]
    fn quad_covers_clip_space_with_top_left_uv_origin() {
        for index in QUAD_INDICES {
            assert!((index as usize) < QUAD_VERTICES.len());
        }
        let top_left = QUAD_VERTICES
            .iter()
            .find(|v| v.position[0] < 0.0 && v.position[1] > 0.0)
            .unwrap();
        assert_eq!(top_left.uv, [0.0, 0.0]);
        let bottom_right = QUAD_VERTICES
            .iter()
            .find(|v| v.position[0] > 0.0 && v.position[1] < 0.0)
            .unwrap();
        assert_eq!(bottom_right.uv, [1.0, 1.0]);
    }
}

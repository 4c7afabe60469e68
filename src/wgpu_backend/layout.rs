//! Vertex buffer layouts and viewport clamping.

use glam::UVec2;

use crate::render_graph::Viewport;
use crate::shader_graph::{AttributeDescriptor, ShaderType};
use crate::wgpu_backend::WgpuBackendError;

/// Vertex format of an attribute of type `ty`. Matrices cannot be vertex attributes.
pub fn vertex_format(ty: ShaderType) -> Option<wgpu::VertexFormat> {
    match ty {
        ShaderType::Float => Some(wgpu::VertexFormat::Float32),
        ShaderType::Vec2 => Some(wgpu::VertexFormat::Float32x2),
        ShaderType::Vec3 => Some(wgpu::VertexFormat::Float32x3),
        ShaderType::Vec4 => Some(wgpu::VertexFormat::Float32x4),
        ShaderType::Mat3 | ShaderType::Mat4 => None,
    }
}

/// The fields of one interleaved vertex buffer, in memory order.
///
/// Programs are compiled against a layout: each attribute of the program is matched by name to
/// a field, which fixes its offset. Fields the program does not read are skipped.
///
/// ```
/// use phalanx::{ShaderType, VertexLayout};
///
/// let layout = VertexLayout::new()
///     .field("position", ShaderType::Vec3)
///     .field("normal", ShaderType::Vec3)
///     .field("uv", ShaderType::Vec2);
/// assert_eq!(layout.stride(), 32);
/// assert_eq!(layout.offset_of("uv"), Some(24));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    fields: Vec<(String, ShaderType)>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, ty: ShaderType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    /// Size of one vertex in bytes.
    pub fn stride(&self) -> u64 {
        self.fields.iter().map(|(_, ty)| field_size(*ty)).sum()
    }

    pub fn offset_of(&self, name: &str) -> Option<u64> {
        let mut offset = 0;
        for (field, ty) in &self.fields {
            if field == name {
                return Some(offset);
            }
            offset += field_size(*ty);
        }
        None
    }

    fn field_type(&self, name: &str) -> Option<ShaderType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| *ty)
    }

    /// Vertex attributes feeding `attributes` from this layout.
    pub(crate) fn attributes(
        &self,
        attributes: &[AttributeDescriptor],
    ) -> Result<Vec<wgpu::VertexAttribute>, WgpuBackendError> {
        attributes
            .iter()
            .map(|attribute| {
                let layout_error = |reason: String| WgpuBackendError::VertexLayout {
                    attribute: attribute.name.clone(),
                    reason,
                };
                let (Some(ty), Some(offset)) = (
                    self.field_type(&attribute.name),
                    self.offset_of(&attribute.name),
                ) else {
                    return Err(layout_error("no field of that name in the vertex layout".into()));
                };
                if ty != attribute.ty {
                    return Err(layout_error(format!(
                        "the shader reads {} but the vertex layout holds {ty}",
                        attribute.ty
                    )));
                }
                let format = vertex_format(ty)
                    .ok_or_else(|| layout_error(format!("{ty} cannot be a vertex attribute")))?;
                Ok(wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location: attribute.location,
                })
            })
            .collect()
    }
}

fn field_size(ty: ShaderType) -> u64 {
    match ty {
        ShaderType::Float => 4,
        ShaderType::Vec2 => 8,
        ShaderType::Vec3 => 12,
        ShaderType::Vec4 => 16,
        ShaderType::Mat3 => 36,
        ShaderType::Mat4 => 64,
    }
}

/// `viewport` cut to a target of `size` pixels, or `None` if nothing of it remains.
pub(crate) fn clamp_viewport(viewport: Viewport, size: UVec2) -> Option<Viewport> {
    if viewport.x >= size.x || viewport.y >= size.y {
        return None;
    }
    let width = viewport.width.min(size.x - viewport.x);
    let height = viewport.height.min(size.y - viewport.y);
    (width > 0 && height > 0).then(|| Viewport::new(viewport.x, viewport.y, width, height))
}

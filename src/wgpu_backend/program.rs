//! Shading programs compiled from shader graph output.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use wgpu::util::DeviceExt;

use crate::gpu::GpuContext;
use crate::render_graph::ShadingProgram;
use crate::shader_graph::{InnerUniform, ProgramDescriptor, ShaderValue};
use crate::wgpu_backend::blit::linear_sampler;
use crate::wgpu_backend::framebuffer::DEPTH_FORMAT;
use crate::wgpu_backend::{VertexLayout, WgpuBackendError, WgpuFramebuffer};

struct ProgramResources {
    label: String,
    descriptor: ProgramDescriptor,
    pipeline: wgpu::RenderPipeline,
    depth_pipeline: wgpu::RenderPipeline,
    /// One buffer per entry of `descriptor.uniforms`, same order.
    uniform_buffers: Vec<wgpu::Buffer>,
    uniform_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

/// Everything a compiled program's GPU resources depend on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ProgramKey {
    label: String,
    vertex_source: String,
    fragment_source: String,
    vertex_entry: String,
    fragment_entry: String,
    layout: VertexLayout,
}

impl ProgramKey {
    pub(crate) fn new(label: &str, descriptor: &ProgramDescriptor, layout: &VertexLayout) -> Self {
        Self {
            label: label.to_string(),
            vertex_source: descriptor.vertex_source.clone(),
            fragment_source: descriptor.fragment_source.clone(),
            vertex_entry: descriptor.vertex_entry.clone(),
            fragment_entry: descriptor.fragment_entry.clone(),
            layout: layout.clone(),
        }
    }
}

/// A [`ProgramDescriptor`] turned into wgpu pipelines.
///
/// Two pipeline variants are built, for targets with and without a depth buffer; the backend
/// picks the one matching the bound target. Uniforms start at their declared defaults and can
/// be changed with [`set_uniform`](Self::set_uniform). Engine uniforms are filled by the backend
/// at bind time.
///
/// Clones share GPU resources but not uniform values or texture wiring.
#[derive(Clone)]
pub struct WgpuProgram {
    resources: Arc<ProgramResources>,
    values: IndexMap<String, ShaderValue>,
    texture_inputs: IndexMap<String, String>,
}

impl WgpuProgram {
    pub(crate) fn new(
        gpu: &GpuContext,
        label: &str,
        descriptor: &ProgramDescriptor,
        layout: &VertexLayout,
    ) -> Result<Self, WgpuBackendError> {
        let device = &gpu.device;
        let vertex_attributes = layout.attributes(&descriptor.attributes)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} vertex")),
            source: wgpu::ShaderSource::Wgsl(descriptor.vertex_source.as_str().into()),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} fragment")),
            source: wgpu::ShaderSource::Wgsl(descriptor.fragment_source.as_str().into()),
        });

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = descriptor
            .uniforms
            .iter()
            .map(|uniform| wgpu::BindGroupLayoutEntry {
                binding: uniform.binding,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} uniforms")),
            entries: &uniform_entries,
        });

        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = descriptor
            .textures
            .iter()
            .flat_map(|texture| {
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: texture.binding,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: texture.sampler_binding,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} textures")),
            entries: &texture_entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} pipeline layout")),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: layout.stride(),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &vertex_attributes,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if vertex_attributes.is_empty() {
            &[]
        } else {
            &vertex_buffers
        };

        let create_pipeline = |depth_stencil: Option<wgpu::DepthStencilState>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(descriptor.vertex_entry.as_str()),
                    buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some(descriptor.fragment_entry.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: gpu.config.format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let pipeline = create_pipeline(None);
        let depth_pipeline = create_pipeline(Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }));

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(WgpuBackendError::Shader {
                program: label.to_string(),
                message: error.to_string(),
            });
        }

        let uniform_buffers: Vec<wgpu::Buffer> = descriptor
            .uniforms
            .iter()
            .map(|uniform| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&uniform.name),
                    contents: &uniform.default.to_uniform_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                })
            })
            .collect();
        let uniform_bindings: Vec<wgpu::BindGroupEntry> = descriptor
            .uniforms
            .iter()
            .zip(&uniform_buffers)
            .map(|(uniform, buffer)| wgpu::BindGroupEntry {
                binding: uniform.binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} uniforms")),
            layout: &uniform_layout,
            entries: &uniform_bindings,
        });

        log::info!(
            "compiled program '{label}': {} uniforms, {} textures, {} attributes",
            descriptor.uniforms.len(),
            descriptor.textures.len(),
            descriptor.attributes.len()
        );

        Ok(Self {
            resources: Arc::new(ProgramResources {
                label: label.to_string(),
                descriptor: descriptor.clone(),
                pipeline,
                depth_pipeline,
                uniform_buffers,
                uniform_group,
                texture_layout,
                sampler: linear_sampler(gpu),
            }),
            values: IndexMap::new(),
            texture_inputs: IndexMap::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.resources.label
    }

    /// Whether both programs draw with the same pipelines and uniform buffers.
    pub fn shares_pipelines(&self, other: &WgpuProgram) -> bool {
        Arc::ptr_eq(&self.resources, &other.resources)
    }

    /// A handle on the same GPU resources with default uniform values and no texture wiring.
    pub(crate) fn fresh_instance(&self) -> Self {
        Self {
            resources: Arc::clone(&self.resources),
            values: IndexMap::new(),
            texture_inputs: IndexMap::new(),
        }
    }

    pub fn descriptor(&self) -> &ProgramDescriptor {
        &self.resources.descriptor
    }

    /// Sets the value of a user uniform; it is uploaded the next time the program is bound.
    pub fn set_uniform(
        &mut self,
        name: &str,
        value: impl Into<ShaderValue>,
    ) -> Result<(), WgpuBackendError> {
        let value = value.into();
        let uniform = self
            .descriptor()
            .uniform(name)
            .filter(|uniform| uniform.inner.is_none())
            .ok_or_else(|| WgpuBackendError::UnknownUniform(name.to_string()))?;
        if uniform.ty != value.ty() {
            return Err(WgpuBackendError::UniformType {
                name: name.to_string(),
                expected: uniform.ty,
                found: value.ty(),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Current value of a user uniform.
    pub fn uniform_value(&self, name: &str) -> Option<ShaderValue> {
        self.values
            .get(name)
            .copied()
            .or_else(|| self.descriptor().uniform(name).map(|uniform| uniform.default))
    }

    /// Texture slot to framebuffer name, as wired so far.
    pub fn texture_inputs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.texture_inputs
            .iter()
            .map(|(slot, framebuffer)| (slot.as_str(), framebuffer.as_str()))
    }

    pub(crate) fn has_uniforms(&self) -> bool {
        !self.descriptor().uniforms.is_empty()
    }

    pub(crate) fn pipeline(&self, depth: bool) -> &wgpu::RenderPipeline {
        if depth {
            &self.resources.depth_pipeline
        } else {
            &self.resources.pipeline
        }
    }

    pub(crate) fn uniform_group(&self) -> &wgpu::BindGroup {
        &self.resources.uniform_group
    }

    /// Uploads every uniform; engine uniforms come from `inner`.
    pub(crate) fn write_uniforms(
        &self,
        queue: &wgpu::Queue,
        inner: impl Fn(InnerUniform) -> ShaderValue,
    ) {
        let resources = &self.resources;
        for (uniform, buffer) in resources.descriptor.uniforms.iter().zip(&resources.uniform_buffers) {
            let value = match uniform.inner {
                Some(engine) => inner(engine),
                None => self.values.get(&uniform.name).copied().unwrap_or(uniform.default),
            };
            queue.write_buffer(buffer, 0, &value.to_uniform_bytes());
        }
    }

    /// Bind group holding every texture input, looked up among `framebuffers`.
    pub(crate) fn texture_group(
        &self,
        gpu: &GpuContext,
        framebuffers: &HashMap<String, WgpuFramebuffer>,
    ) -> Result<wgpu::BindGroup, WgpuBackendError> {
        let resources = &self.resources;
        let mut views = Vec::with_capacity(resources.descriptor.textures.len());
        for texture in &resources.descriptor.textures {
            let framebuffer = self.texture_inputs.get(&texture.name).ok_or_else(|| {
                WgpuBackendError::UnboundTexture {
                    program: resources.label.clone(),
                    texture: texture.name.clone(),
                }
            })?;
            let framebuffer = framebuffers
                .get(framebuffer)
                .ok_or_else(|| WgpuBackendError::MissingFramebuffer(framebuffer.clone()))?;
            views.push((texture, framebuffer.color_view()));
        }

        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .flat_map(|(texture, view)| {
                [
                    wgpu::BindGroupEntry {
                        binding: texture.binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: texture.sampler_binding,
                        resource: wgpu::BindingResource::Sampler(&resources.sampler),
                    },
                ]
            })
            .collect();
        Ok(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} textures", resources.label)),
            layout: &resources.texture_layout,
            entries: &entries,
        }))
    }
}

impl ShadingProgram for WgpuProgram {
    fn define_texture_input(&mut self, framebuffer: &str, slot: &str) {
        self.texture_inputs
            .insert(slot.to_string(), framebuffer.to_string());
    }
}

impl std::fmt::Debug for WgpuProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuProgram")
            .field("label", &self.resources.label)
            .field("values", &self.values)
            .field("texture_inputs", &self.texture_inputs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_graph::{ShaderFunctionRegistry, ShaderGraph, ShaderType};

    fn descriptor(fill: f32) -> ProgramDescriptor {
        let mut graph = ShaderGraph::new(Arc::new(ShaderFunctionRegistry::new()));
        let position = graph.attribute("position", ShaderType::Vec3).unwrap();
        let one = graph.constant(1.0).unwrap();
        let clip = graph.vec4(&[position, one]).unwrap();
        graph.set_vertex_root(clip).unwrap();
        let color = graph.constant(glam::Vec4::splat(fill)).unwrap();
        graph.set_fragment_root(color).unwrap();
        graph.compile().unwrap()
    }

    #[test]
    fn identical_programs_share_a_key() {
        let layout = VertexLayout::new().field("position", ShaderType::Vec3);
        let first = ProgramKey::new("fill", &descriptor(0.5), &layout);
        let second = ProgramKey::new("fill", &descriptor(0.5), &layout);
        assert_eq!(first, second);

        let mut cache = HashMap::new();
        cache.insert(first, 1);
        assert_eq!(cache.get(&second), Some(&1));
    }

    #[test]
    fn source_label_and_layout_changes_miss() {
        let layout = VertexLayout::new().field("position", ShaderType::Vec3);
        let key = ProgramKey::new("fill", &descriptor(0.5), &layout);
        assert_ne!(key, ProgramKey::new("fill", &descriptor(0.25), &layout));
        assert_ne!(key, ProgramKey::new("other", &descriptor(0.5), &layout));

        let padded = layout.clone().field("uv", ShaderType::Vec2);
        assert_ne!(key, ProgramKey::new("fill", &descriptor(0.5), &padded));
    }
}

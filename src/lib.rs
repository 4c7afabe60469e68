//! # Phalanx
//!
//! **Shader graphs compiled to WGSL, and a render graph that runs them in order.**
//!
//! - [`ShaderGraph`]: build a vertex + fragment program out of typed nodes, then
//!   [`compile`](ShaderGraph::compile) it into WGSL source plus the uniform, texture, attribute
//!   and varying manifests a backend binds against.
//! - [`RenderGraph`]: register render targets and the passes that draw into them; each pass
//!   names the textures it reads, and the graph rejects passes whose inputs nobody produced.
//! - [`RenderBackend`]: the seam between the two. [`WgpuBackend`] renders with wgpu,
//!   [`HeadlessBackend`] records calls for tests.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use glam::UVec2;
//! use phalanx::*;
//!
//! let mut registry = ShaderFunctionRegistry::new();
//! registry.register(
//!     ShaderFunction::new("grayscale", ShaderType::Vec4)
//!         .input("color", ShaderType::Vec4)
//!         .body("let l = dot(color.rgb, vec3<f32>(0.299, 0.587, 0.114));\nreturn vec4<f32>(l, l, l, color.a);"),
//! )?;
//!
//! let mut shader = ShaderGraph::new(Arc::new(registry));
//! let position = shader.attribute("position", ShaderType::Vec3)?;
//! let one = shader.constant(1.0)?;
//! let clip = shader.vec4(&[position, one])?;
//! let uv = shader.attribute("uv", ShaderType::Vec2)?;
//! shader.set_vertex_root(clip)?.set_vary("v_uv", uv)?;
//! let v_uv = shader.vary("v_uv")?;
//! let scene = shader.texture_fetch("scene", v_uv)?;
//! let gray = shader.call("grayscale")?.input("color", scene)?.finish();
//! shader.set_fragment_root(gray)?;
//! let program = shader.compile()?;
//! assert_eq!(program.textures[0].name, "scene");
//!
//! let mut graph = RenderGraph::<HeadlessBackend>::new();
//! graph.add_target(RenderTargetNode::new("scene"))?;
//! graph
//!     .add_pass(PassNode::new("scene").output("scene").source(HeadlessBackend::draw_source("world")))?
//!     .add_pass(
//!         PassNode::new("grayscale")
//!             .input("scene", "scene")
//!             .override_shading(HeadlessProgram::new("grayscale"))
//!             .source(HeadlessBackend::draw_source("quad")),
//!     )?;
//! let mut graph = graph.build()?;
//! graph.execute(&mut HeadlessBackend::new(UVec2::new(640, 360)), &FrameOptions::default())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! See [`run`] for opening a window and rendering a graph with wgpu.

mod app;
pub mod dag;
mod gpu;
mod render_graph;
mod shader_graph;
mod wgpu_backend;

pub use app::{AppConfig, AppError, SetupError, run};
pub use gpu::{GpuContext, GpuError};
pub use render_graph::{
    BackendCommand, CompiledRenderGraph, DebugViewConfig, FrameOptions, FramebufferDescriptor,
    HeadlessBackend, HeadlessError, HeadlessProgram, PassNode, RenderBackend, RenderGraph,
    RenderGraphError, RenderPass, RenderSource, RenderTargetNode, SCREEN_TARGET, ShadingProgram,
    TargetSize, Viewport, debug_layout,
};
pub use shader_graph::{
    AttributeDescriptor, CodegenOptions, FunctionInput, FunctionNode, FunctionNodeBuilder,
    InnerUniform, NodeId, ProgramDescriptor, ShaderFunction, ShaderFunctionRegistry, ShaderGraph,
    ShaderGraphError, ShaderNode, ShaderType, ShaderValue, Stage, TEXTURE_GROUP, TextureDescriptor,
    UNIFORM_GROUP, UniformDescriptor, VaryingDescriptor, uniform_buffer_size,
};
pub use wgpu_backend::{
    FullscreenQuad, QuadVertex, VertexLayout, WgpuBackend, WgpuBackendError, WgpuFramebuffer,
    WgpuProgram, vertex_format,
};

// Re-export glam math types for convenience
pub use glam::{Mat3, Mat4, UVec2, Vec2, Vec3, Vec4};

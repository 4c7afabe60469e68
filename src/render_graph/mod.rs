//! Dependency-driven render graph for multi-pass rendering.
//!
//! A [`RenderGraph`] holds named render targets and the passes that draw into them. Each pass
//! writes exactly one target and may read the outputs of earlier passes as texture inputs.
//! The graph validates passes as they are added, then [`build`](RenderGraph::build)s into a
//! [`CompiledRenderGraph`] that executes every frame against a [`RenderBackend`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐           ┌─────────────┐           ┌─────────────┐
//! │    scene    │──▶ hdr ──▶│    bloom    │──▶ bloom ─▶│  composite  │──▶ screen
//! │   (pass)    │     │     │   (pass)    │            │   (pass)    │
//! └─────────────┘     │     └─────────────┘            └─────────────┘
//!                     └──────────────────────────────────────▲
//! ```
//!
//! Per pass, execution runs a fixed sequence: bind target and viewport, install the override
//! program, clear, draw sources, restore state, and in debug mode blit the pass's output and
//! inputs into a grid on the screen. See [`RenderPass`].
//!
//! # Backends
//!
//! - [`HeadlessBackend`]: records every call; used for tests and dry runs
//! - [`WgpuBackend`](crate::WgpuBackend): renders with wgpu
//!
//! # Example
//!
//! ```
//! use glam::UVec2;
//! use phalanx::{
//!     FrameOptions, HeadlessBackend, HeadlessProgram, PassNode, RenderGraph, RenderTargetNode,
//! };
//!
//! let mut graph = RenderGraph::<HeadlessBackend>::new();
//! graph.add_target(RenderTargetNode::new("hdr"))?;
//! graph
//!     .add_pass(
//!         PassNode::new("scene")
//!             .output("hdr")
//!             .source(HeadlessBackend::draw_source("meshes")),
//!     )?
//!     .add_pass(
//!         PassNode::new("tonemap")
//!             .input("scene_color", "hdr")
//!             .override_shading(HeadlessProgram::new("tonemap"))
//!             .source(HeadlessBackend::draw_source("fullscreen quad")),
//!     )?;
//!
//! let mut graph = graph.build()?;
//! let mut backend = HeadlessBackend::new(UVec2::new(1280, 720));
//! graph.execute(&mut backend, &FrameOptions::default())?;
//! # Ok::<(), phalanx::RenderGraphError>(())
//! ```

mod backend;
mod debug_view;
mod graph;
mod headless;
mod pass;
mod render_pass;
mod source;
mod target;

pub use backend::{RenderBackend, ShadingProgram};
pub use debug_view::{DebugViewConfig, FrameOptions, layout as debug_layout};
pub use graph::{CompiledRenderGraph, RenderGraph};
pub use headless::{BackendCommand, HeadlessBackend, HeadlessError, HeadlessProgram};
pub use pass::PassNode;
pub use render_pass::RenderPass;
pub use source::RenderSource;
pub use target::{FramebufferDescriptor, RenderTargetNode, SCREEN_TARGET, TargetSize, Viewport};

use thiserror::Error;

use crate::dag::DagError;

/// Errors raised while building or executing a render graph.
#[derive(Debug, Error)]
pub enum RenderGraphError {
    #[error("pass '{pass}' depends on texture '{texture}', which no earlier pass renders")]
    DependencyNotFound { pass: String, texture: String },
    #[error("pass '{pass}' depends on its own output target '{target}'")]
    SelfDependency { pass: String, target: String },
    #[error("pass '{pass}' renders offscreen but has no render sources")]
    EmptyPass { pass: String },
    #[error("pass '{pass}' outputs to unknown target '{target}'")]
    UnknownTarget { pass: String, target: String },
    #[error("a render target named '{target}' already exists")]
    DuplicateTarget { target: String },
    #[error("a pass named '{pass}' already exists")]
    DuplicatePass { pass: String },
    #[error("target '{target}' is already rendered by pass '{producer}', so pass '{pass}' cannot write it")]
    DuplicateProducer {
        target: String,
        producer: String,
        pass: String,
    },
    #[error("render graph cycle through {node}")]
    GraphCycle { node: String },
    #[error("invalid frame graph: {0}")]
    Frame(DagError),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl RenderGraphError {
    pub(crate) fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RenderGraphError::Backend(Box::new(err))
    }
}

//! A backend that records calls instead of rendering.
//!
//! `HeadlessBackend` implements the full [`RenderBackend`] contract without a GPU, which makes it
//! useful for dry-running a frame graph and for asserting on exactly what a frame would do:
//!
//! ```
//! use glam::UVec2;
//! use phalanx::{BackendCommand, FrameOptions, HeadlessBackend, PassNode, RenderGraph};
//!
//! let mut graph = RenderGraph::<HeadlessBackend>::new();
//! graph.add_pass(PassNode::new("final").source(HeadlessBackend::draw_source("triangle")))?;
//! let mut graph = graph.build()?;
//!
//! let mut backend = HeadlessBackend::new(UVec2::new(640, 480));
//! graph.execute(&mut backend, &FrameOptions::default())?;
//! assert!(backend.commands().contains(&BackendCommand::Draw("triangle".into())));
//! # Ok::<(), phalanx::RenderGraphError>(())
//! ```

use std::collections::HashSet;

use glam::{UVec2, Vec4};
use indexmap::IndexMap;
use thiserror::Error;

use crate::render_graph::{FramebufferDescriptor, RenderBackend, ShadingProgram, Viewport};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCommand {
    /// A framebuffer was created or resized.
    AllocateFramebuffer {
        name: String,
        size: UVec2,
        depth: bool,
    },
    SetRenderTargetScreen,
    SetRenderTarget(String),
    SetViewport(Viewport),
    SetFullScreenViewport,
    SetClearColor(Vec4),
    /// Color clear, with the clear color in effect at the time.
    ClearColor(Vec4),
    ClearDepth,
    /// Override installed (with its wiring at that moment) or removed.
    SetOverrideShading(Option<HeadlessProgram>),
    Draw(String),
    RenderFramebuffer {
        framebuffer: String,
        viewport: Viewport,
    },
}

/// A shading program that only remembers its name and texture wiring.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessProgram {
    pub label: String,
    /// Texture input slot → framebuffer name.
    pub texture_inputs: IndexMap<String, String>,
}

impl HeadlessProgram {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            texture_inputs: IndexMap::new(),
        }
    }
}

impl ShadingProgram for HeadlessProgram {
    fn define_texture_input(&mut self, framebuffer: &str, slot: &str) {
        self.texture_inputs
            .insert(slot.to_string(), framebuffer.to_string());
    }
}

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("framebuffer '{0}' could not be allocated")]
    Allocation(String),
    #[error("render source '{0}' failed")]
    Source(String),
}

/// Recording implementation of [`RenderBackend`].
#[derive(Debug)]
pub struct HeadlessBackend {
    size: UVec2,
    clear_color: Vec4,
    framebuffers: IndexMap<String, FramebufferDescriptor>,
    failing_allocations: HashSet<String>,
    commands: Vec<BackendCommand>,
}

impl HeadlessBackend {
    pub const DEFAULT_CLEAR_COLOR: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            clear_color: Self::DEFAULT_CLEAR_COLOR,
            framebuffers: IndexMap::new(),
            failing_allocations: HashSet::new(),
            commands: Vec::new(),
        }
    }

    /// Changes the surface size; framebuffers are resized on their next use.
    pub fn resize(&mut self, size: UVec2) {
        self.size = size;
    }

    /// Makes every allocation of the framebuffer `name` fail.
    pub fn fail_allocation_of(&mut self, name: impl Into<String>) {
        self.failing_allocations.insert(name.into());
    }

    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    /// Returns and forgets the commands recorded so far.
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn framebuffers(&self) -> impl Iterator<Item = &FramebufferDescriptor> {
        self.framebuffers.values()
    }

    /// Records a draw call.
    pub fn draw(&mut self, label: impl Into<String>) {
        self.commands.push(BackendCommand::Draw(label.into()));
    }

    /// A render source that records one draw named `label`.
    pub fn draw_source(
        label: impl Into<String>,
    ) -> impl Fn(&mut HeadlessBackend) -> Result<(), HeadlessError> + 'static {
        let label = label.into();
        move |backend: &mut HeadlessBackend| {
            backend.draw(label.clone());
            Ok(())
        }
    }

    /// A render source that fails without drawing.
    pub fn failing_source(
        label: impl Into<String>,
    ) -> impl Fn(&mut HeadlessBackend) -> Result<(), HeadlessError> + 'static {
        let label = label.into();
        move |_: &mut HeadlessBackend| Err(HeadlessError::Source(label.clone()))
    }
}

impl RenderBackend for HeadlessBackend {
    type Framebuffer = FramebufferDescriptor;
    type Program = HeadlessProgram;
    type Error = HeadlessError;

    fn surface_size(&self) -> UVec2 {
        self.size
    }

    fn set_render_target_screen(&mut self) {
        self.commands.push(BackendCommand::SetRenderTargetScreen);
    }

    fn set_render_target(&mut self, framebuffer: &FramebufferDescriptor) {
        self.commands
            .push(BackendCommand::SetRenderTarget(framebuffer.name.clone()));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.commands.push(BackendCommand::SetViewport(viewport));
    }

    fn set_full_screen_viewport(&mut self) {
        self.commands.push(BackendCommand::SetFullScreenViewport);
    }

    fn clear_color_value(&self) -> Vec4 {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
        self.commands.push(BackendCommand::SetClearColor(color));
    }

    fn clear_color(&mut self) -> Result<(), HeadlessError> {
        self.commands
            .push(BackendCommand::ClearColor(self.clear_color));
        Ok(())
    }

    fn clear_depth(&mut self) -> Result<(), HeadlessError> {
        self.commands.push(BackendCommand::ClearDepth);
        Ok(())
    }

    fn set_override_shading(&mut self, program: Option<&HeadlessProgram>) {
        self.commands
            .push(BackendCommand::SetOverrideShading(program.cloned()));
    }

    fn ensure_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferDescriptor, HeadlessError> {
        if self.failing_allocations.contains(&descriptor.name) {
            return Err(HeadlessError::Allocation(descriptor.name.clone()));
        }
        if self.framebuffers.get(&descriptor.name) != Some(descriptor) {
            self.framebuffers
                .insert(descriptor.name.clone(), descriptor.clone());
            self.commands.push(BackendCommand::AllocateFramebuffer {
                name: descriptor.name.clone(),
                size: descriptor.size,
                depth: descriptor.depth,
            });
        }
        Ok(descriptor.clone())
    }

    fn framebuffer(&self, name: &str) -> Option<FramebufferDescriptor> {
        self.framebuffers.get(name).cloned()
    }

    fn render_framebuffer(
        &mut self,
        framebuffer: &FramebufferDescriptor,
        viewport: Viewport,
    ) -> Result<(), HeadlessError> {
        self.commands.push(BackendCommand::RenderFramebuffer {
            framebuffer: framebuffer.name.clone(),
            viewport,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framebuffers_are_reallocated_only_on_change() {
        let mut backend = HeadlessBackend::new(UVec2::new(100, 100));
        let descriptor = FramebufferDescriptor {
            name: "hdr".into(),
            size: UVec2::new(100, 100),
            depth: true,
        };
        backend.ensure_framebuffer(&descriptor).unwrap();
        backend.ensure_framebuffer(&descriptor).unwrap();
        let resized = FramebufferDescriptor {
            size: UVec2::new(50, 50),
            ..descriptor
        };
        backend.ensure_framebuffer(&resized).unwrap();

        let allocations = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, BackendCommand::AllocateFramebuffer { .. }))
            .count();
        assert_eq!(allocations, 2);
        assert_eq!(backend.framebuffer("hdr"), Some(resized));
    }

    #[test]
    fn failing_allocation_is_reported() {
        let mut backend = HeadlessBackend::new(UVec2::new(100, 100));
        backend.fail_allocation_of("hdr");
        let err = backend
            .ensure_framebuffer(&FramebufferDescriptor {
                name: "hdr".into(),
                size: UVec2::ONE,
                depth: false,
            })
            .unwrap_err();
        assert!(matches!(err, HeadlessError::Allocation(name) if name == "hdr"));
        assert!(backend.framebuffer("hdr").is_none());
    }

    #[test]
    fn clears_record_the_current_color() {
        let mut backend = HeadlessBackend::new(UVec2::new(100, 100));
        backend.set_clear_color(Vec4::ONE);
        backend.clear_color().unwrap();
        assert_eq!(
            backend.take_commands(),
            [
                BackendCommand::SetClearColor(Vec4::ONE),
                BackendCommand::ClearColor(Vec4::ONE),
            ]
        );
        assert!(backend.commands().is_empty());
    }
}

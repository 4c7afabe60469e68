//! [`RenderBackend`] implementation on wgpu.
//!
//! A frame is bracketed by [`WgpuBackend::begin_frame`] and [`WgpuBackend::end_frame`]. In
//! between, every backend call records into one command encoder:
//!
//! - clears are render passes that only load-clear the bound attachments;
//! - render sources open their own pass with [`WgpuBackend::render_pass`], which applies the
//!   current viewport and binds the override program;
//! - debug overlay blits are queued and drawn onto the surface in `end_frame`, after the screen
//!   passes, so that clearing the screen cannot wipe them.
//!
//! Each target has a single producer, so a framebuffer holds the same image at the end of the
//! frame as right after its pass; deferring the blits does not change what they show.
//!
//! ```no_run
//! use std::sync::Arc;
//! use phalanx::{FrameOptions, GpuContext, RenderGraph, WgpuBackend};
//!
//! # fn demo(window: Arc<winit::window::Window>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = WgpuBackend::new(GpuContext::new(window)?);
//! let mut graph = RenderGraph::<WgpuBackend>::new().build()?;
//!
//! backend.begin_frame()?;
//! graph.execute(&mut backend, &FrameOptions::default())?;
//! backend.end_frame()?;
//! # Ok(())
//! # }
//! ```

mod blit;
mod framebuffer;
mod layout;
mod program;
mod quad;

pub use framebuffer::WgpuFramebuffer;
pub use layout::{VertexLayout, vertex_format};
pub use program::WgpuProgram;
pub use quad::{FullscreenQuad, QuadVertex};

use std::collections::HashMap;

use glam::{UVec2, Vec4};
use thiserror::Error;

use crate::gpu::GpuContext;
use crate::render_graph::{FramebufferDescriptor, RenderBackend, Viewport};
use crate::shader_graph::{
    InnerUniform, ProgramDescriptor, ShaderType, ShaderValue, TEXTURE_GROUP, UNIFORM_GROUP,
};
use blit::Blitter;
use framebuffer::DepthBuffer;
use layout::clamp_viewport;
use program::ProgramKey;

/// Errors raised by [`WgpuBackend`].
#[derive(Debug, Error)]
pub enum WgpuBackendError {
    #[error("no frame in progress; call begin_frame first")]
    NoFrame,
    #[error("a frame is already in progress")]
    FrameInProgress,
    #[error("failed to acquire the next surface texture: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("framebuffer '{name}' is {width}x{height}, above the device limit of {limit}")]
    FramebufferTooLarge {
        name: String,
        width: u32,
        height: u32,
        limit: u32,
    },
    #[error("program '{program}' failed to compile: {message}")]
    Shader { program: String, message: String },
    #[error("vertex attribute '{attribute}': {reason}")]
    VertexLayout { attribute: String, reason: String },
    #[error("no override program is installed")]
    NoProgram,
    #[error("program '{program}' samples '{texture}', which is not wired to a framebuffer")]
    UnboundTexture { program: String, texture: String },
    #[error("framebuffer '{0}' has not been allocated")]
    MissingFramebuffer(String),
    #[error("no uniform named '{0}'")]
    UnknownUniform(String),
    #[error("uniform '{name}' has type {expected}, not {found}")]
    UniformType {
        name: String,
        expected: ShaderType,
        found: ShaderType,
    },
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

enum BoundTarget {
    Screen,
    Framebuffer(WgpuFramebuffer),
}

/// wgpu implementation of [`RenderBackend`].
pub struct WgpuBackend {
    gpu: GpuContext,
    frame: Option<Frame>,
    screen_depth: DepthBuffer,
    framebuffers: HashMap<String, WgpuFramebuffer>,
    target: BoundTarget,
    /// `None` covers the whole bound target.
    viewport: Option<Viewport>,
    clear_color: Vec4,
    override_program: Option<WgpuProgram>,
    inner_values: HashMap<InnerUniform, ShaderValue>,
    programs: HashMap<ProgramKey, WgpuProgram>,
    blitter: Blitter,
    pending_blits: Vec<(WgpuFramebuffer, Viewport)>,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext) -> Self {
        let size = UVec2::new(gpu.width(), gpu.height());
        let screen_depth = DepthBuffer::new(&gpu, "Screen Depth", size);
        let blitter = Blitter::new(&gpu);
        log::info!("wgpu backend ready at {}x{}", size.x, size.y);
        Self {
            gpu,
            frame: None,
            screen_depth,
            framebuffers: HashMap::new(),
            target: BoundTarget::Screen,
            viewport: None,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            override_program: None,
            inner_values: HashMap::new(),
            programs: HashMap::new(),
            blitter,
            pending_blits: Vec::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the surface; framebuffers with a relative size follow on their next pass.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    /// Compiles `descriptor` into a program reading vertices laid out as `layout`.
    ///
    /// Compiled programs are cached by label, generated source and vertex layout; asking again
    /// for the same program returns a handle sharing its pipelines, with its own uniform values
    /// and texture wiring.
    pub fn create_program(
        &mut self,
        label: &str,
        descriptor: &ProgramDescriptor,
        layout: &VertexLayout,
    ) -> Result<WgpuProgram, WgpuBackendError> {
        let key = ProgramKey::new(label, descriptor, layout);
        if let Some(program) = self.programs.get(&key) {
            log::debug!("program '{label}' reused from cache");
            return Ok(program.fresh_instance());
        }
        let program = WgpuProgram::new(&self.gpu, label, descriptor, layout)?;
        self.programs.insert(key, program.fresh_instance());
        Ok(program)
    }

    /// Number of distinct programs compiled so far.
    pub fn cached_program_count(&self) -> usize {
        self.programs.len()
    }

    /// Sets an engine uniform for every program bound from now on.
    ///
    /// [`InnerUniform::Resolution`] defaults to the size of the bound target when unset.
    pub fn set_inner_uniform(
        &mut self,
        inner: InnerUniform,
        value: impl Into<ShaderValue>,
    ) -> Result<(), WgpuBackendError> {
        let value = value.into();
        if value.ty() != inner.ty() {
            return Err(WgpuBackendError::UniformType {
                name: inner.name().to_string(),
                expected: inner.ty(),
                found: value.ty(),
            });
        }
        self.inner_values.insert(inner, value);
        Ok(())
    }

    pub fn override_program(&self) -> Option<&WgpuProgram> {
        self.override_program.as_ref()
    }

    /// Acquires the next surface texture and starts recording a frame.
    pub fn begin_frame(&mut self) -> Result<(), WgpuBackendError> {
        if self.frame.is_some() {
            return Err(WgpuBackendError::FrameInProgress);
        }
        let surface_texture = match self.gpu.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost or outdated; reconfiguring");
                self.gpu.reconfigure();
                self.gpu.surface.get_current_texture()?
            }
            Err(err) => return Err(err.into()),
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let size = self.surface_size();
        if self.screen_depth.size != size {
            self.screen_depth = DepthBuffer::new(&self.gpu, "Screen Depth", size);
        }

        let encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.frame = Some(Frame {
            surface_texture,
            view,
            encoder,
        });
        self.target = BoundTarget::Screen;
        self.viewport = None;
        self.override_program = None;
        self.pending_blits.clear();
        Ok(())
    }

    /// Draws queued debug blits, submits the frame and presents it.
    pub fn end_frame(&mut self) -> Result<(), WgpuBackendError> {
        let mut frame = self.frame.take().ok_or(WgpuBackendError::NoFrame)?;
        let blits = std::mem::take(&mut self.pending_blits);

        if !blits.is_empty() {
            let size = self.surface_size();
            let bind_groups: Vec<(wgpu::BindGroup, Viewport)> = blits
                .iter()
                .map(|(framebuffer, viewport)| {
                    let bind_group = self
                        .blitter
                        .create_bind_group(&self.gpu, framebuffer.color_view());
                    (bind_group, *viewport)
                })
                .collect();

            let mut render_pass = begin_pass(
                &mut frame.encoder,
                "Debug View",
                &frame.view,
                None,
                wgpu::LoadOp::Load,
                wgpu::LoadOp::Load,
            );
            for (bind_group, viewport) in &bind_groups {
                let Some(viewport) = clamp_viewport(*viewport, size) else {
                    continue;
                };
                apply_viewport(&mut render_pass, viewport);
                self.blitter.render(&mut render_pass, bind_group);
            }
            log::trace!("drew {} debug view cells", bind_groups.len());
        }

        self.gpu.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.surface_texture.present();
        Ok(())
    }

    /// Opens a render pass on the bound target that keeps its contents.
    ///
    /// The current viewport is applied and, if an override program is installed, its pipeline,
    /// uniforms and texture inputs are bound. This is how render sources draw:
    ///
    /// ```ignore
    /// let mut render_pass = backend.render_pass("terrain")?;
    /// render_pass.set_vertex_buffer(0, vertices.slice(..));
    /// render_pass.draw(0..count, 0..1);
    /// ```
    pub fn render_pass(&mut self, label: &str) -> Result<wgpu::RenderPass<'_>, WgpuBackendError> {
        if self.frame.is_none() {
            return Err(WgpuBackendError::NoFrame);
        }
        let size = self.target_size();
        let program = self.override_program.clone();
        let textures = match &program {
            Some(program) => {
                if program.has_uniforms() {
                    // Queue writes land at the next submit; earlier draws must not see them.
                    self.flush()?;
                    program.write_uniforms(&self.gpu.queue, |inner| self.inner_value(inner, size));
                }
                Some(program.texture_group(&self.gpu, &self.framebuffers)?)
            }
            None => None,
        };

        let frame = self.frame.as_mut().ok_or(WgpuBackendError::NoFrame)?;
        let (color, depth) = attachments(&self.target, &frame.view, &self.screen_depth);
        let has_depth = depth.is_some();
        let mut render_pass = begin_pass(
            &mut frame.encoder,
            label,
            color,
            depth,
            wgpu::LoadOp::Load,
            wgpu::LoadOp::Load,
        );
        if let Some(viewport) = clamp_viewport(self.viewport.unwrap_or(Viewport::full(size)), size)
        {
            apply_viewport(&mut render_pass, viewport);
        }
        if let (Some(program), Some(textures)) = (&program, &textures) {
            render_pass.set_pipeline(program.pipeline(has_depth));
            render_pass.set_bind_group(UNIFORM_GROUP, program.uniform_group(), &[]);
            render_pass.set_bind_group(TEXTURE_GROUP, textures, &[]);
        }
        Ok(render_pass)
    }

    fn target_size(&self) -> UVec2 {
        match &self.target {
            BoundTarget::Screen => self.surface_size(),
            BoundTarget::Framebuffer(framebuffer) => framebuffer.size(),
        }
    }

    fn target_has_depth(&self) -> bool {
        match &self.target {
            BoundTarget::Screen => true,
            BoundTarget::Framebuffer(framebuffer) => framebuffer.depth_view().is_some(),
        }
    }

    fn inner_value(&self, inner: InnerUniform, target_size: UVec2) -> ShaderValue {
        self.inner_values
            .get(&inner)
            .copied()
            .unwrap_or_else(|| default_inner_value(inner, target_size))
    }

    /// Submits everything recorded so far and continues on a fresh encoder.
    fn flush(&mut self) -> Result<(), WgpuBackendError> {
        let frame = self.frame.as_mut().ok_or(WgpuBackendError::NoFrame)?;
        let encoder = std::mem::replace(
            &mut frame.encoder,
            self.gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn clear(
        &mut self,
        label: &str,
        color_load: wgpu::LoadOp<wgpu::Color>,
        depth_load: wgpu::LoadOp<f32>,
    ) -> Result<(), WgpuBackendError> {
        let frame = self.frame.as_mut().ok_or(WgpuBackendError::NoFrame)?;
        let (color, depth) = attachments(&self.target, &frame.view, &self.screen_depth);
        begin_pass(&mut frame.encoder, label, color, depth, color_load, depth_load);
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    type Framebuffer = WgpuFramebuffer;
    type Program = WgpuProgram;
    type Error = WgpuBackendError;

    fn surface_size(&self) -> UVec2 {
        UVec2::new(self.gpu.width(), self.gpu.height())
    }

    fn set_render_target_screen(&mut self) {
        self.target = BoundTarget::Screen;
        self.viewport = None;
    }

    fn set_render_target(&mut self, framebuffer: &WgpuFramebuffer) {
        self.target = BoundTarget::Framebuffer(framebuffer.clone());
        self.viewport = None;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn set_full_screen_viewport(&mut self) {
        self.viewport = None;
    }

    fn clear_color_value(&self) -> Vec4 {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    fn clear_color(&mut self) -> Result<(), WgpuBackendError> {
        let color = to_wgpu_color(self.clear_color);
        self.clear("Clear Color", wgpu::LoadOp::Clear(color), wgpu::LoadOp::Load)
    }

    fn clear_depth(&mut self) -> Result<(), WgpuBackendError> {
        if !self.target_has_depth() {
            return Ok(());
        }
        self.clear("Clear Depth", wgpu::LoadOp::Load, wgpu::LoadOp::Clear(1.0))
    }

    fn set_override_shading(&mut self, program: Option<&WgpuProgram>) {
        self.override_program = program.cloned();
    }

    fn ensure_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<WgpuFramebuffer, WgpuBackendError> {
        if let Some(existing) = self.framebuffers.get(&descriptor.name)
            && existing.descriptor() == descriptor
        {
            return Ok(existing.clone());
        }

        let limit = self.gpu.device.limits().max_texture_dimension_2d;
        if descriptor.size.x > limit || descriptor.size.y > limit {
            return Err(WgpuBackendError::FramebufferTooLarge {
                name: descriptor.name.clone(),
                width: descriptor.size.x,
                height: descriptor.size.y,
                limit,
            });
        }

        let framebuffer = WgpuFramebuffer::new(&self.gpu, descriptor);
        log::debug!(
            "allocated framebuffer '{}' at {}x{} (depth: {})",
            descriptor.name,
            descriptor.size.x,
            descriptor.size.y,
            descriptor.depth
        );
        self.framebuffers
            .insert(descriptor.name.clone(), framebuffer.clone());
        Ok(framebuffer)
    }

    fn framebuffer(&self, name: &str) -> Option<WgpuFramebuffer> {
        self.framebuffers.get(name).cloned()
    }

    fn render_framebuffer(
        &mut self,
        framebuffer: &WgpuFramebuffer,
        viewport: Viewport,
    ) -> Result<(), WgpuBackendError> {
        self.pending_blits.push((framebuffer.clone(), viewport));
        Ok(())
    }
}

fn attachments<'a>(
    target: &'a BoundTarget,
    screen: &'a wgpu::TextureView,
    screen_depth: &'a DepthBuffer,
) -> (&'a wgpu::TextureView, Option<&'a wgpu::TextureView>) {
    match target {
        BoundTarget::Screen => (screen, Some(&screen_depth.view)),
        BoundTarget::Framebuffer(framebuffer) => {
            (framebuffer.color_view(), framebuffer.depth_view())
        }
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    color: &wgpu::TextureView,
    depth: Option<&wgpu::TextureView>,
    color_load: wgpu::LoadOp<wgpu::Color>,
    depth_load: wgpu::LoadOp<f32>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn apply_viewport(render_pass: &mut wgpu::RenderPass<'_>, viewport: Viewport) {
    render_pass.set_viewport(
        viewport.x as f32,
        viewport.y as f32,
        viewport.width as f32,
        viewport.height as f32,
        0.0,
        1.0,
    );
}

fn to_wgpu_color(color: Vec4) -> wgpu::Color {
    wgpu::Color {
        r: color.x as f64,
        g: color.y as f64,
        b: color.z as f64,
        a: color.w as f64,
    }
}

/// Value of an engine uniform nobody has set.
fn default_inner_value(inner: InnerUniform, target_size: UVec2) -> ShaderValue {
    match inner {
        InnerUniform::Resolution => ShaderValue::Vec2(target_size.as_vec2()),
        _ => ShaderValue::default_for(inner.ty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec2};

    #[test]
    fn unset_engine_uniforms_have_neutral_values() {
        let size = UVec2::new(320, 200);
        assert_eq!(
            default_inner_value(InnerUniform::Resolution, size),
            ShaderValue::Vec2(Vec2::new(320.0, 200.0))
        );
        assert_eq!(
            default_inner_value(InnerUniform::ViewProjectionMatrix, size),
            ShaderValue::Mat4(Mat4::IDENTITY)
        );
        assert_eq!(
            default_inner_value(InnerUniform::Time, size),
            ShaderValue::Float(0.0)
        );
        for inner in InnerUniform::ALL {
            assert_eq!(default_inner_value(inner, size).ty(), inner.ty());
        }
    }

    #[test]
    fn clear_colors_convert_channel_by_channel() {
        let color = to_wgpu_color(Vec4::new(0.25, 0.5, 0.75, 1.0));
        assert_eq!((color.r, color.g, color.b, color.a), (0.25, 0.5, 0.75, 1.0));
    }
}

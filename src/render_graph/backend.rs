//! The contract between the render graph and whatever actually issues GPU work.

use glam::{UVec2, Vec4};

use crate::render_graph::{FramebufferDescriptor, Viewport};

/// A shading program that can replace a pass's normal materials.
pub trait ShadingProgram {
    /// Binds the framebuffer named `framebuffer` to the texture input `slot`.
    fn define_texture_input(&mut self, framebuffer: &str, slot: &str);
}

/// Operations the render graph needs from a rendering backend.
///
/// Handles are opaque to the graph: it never inspects a framebuffer or program, it only passes
/// them back to the backend that created them.
///
/// # Example
///
/// A pass executed against a backend issues, in order:
///
/// ```text
/// set_render_target / set_render_target_screen
/// set_viewport / set_full_screen_viewport
/// set_override_shading(Some(program))
/// set_clear_color(pass color), clear_color(), clear_depth()
/// <render sources>
/// set_override_shading(None), set_clear_color(saved)
/// render_framebuffer(..)      // debug overlay only
/// ```
pub trait RenderBackend {
    /// Cheap handle to an allocated offscreen framebuffer.
    type Framebuffer: Clone;
    type Program: ShadingProgram;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Size of the display surface in pixels.
    fn surface_size(&self) -> UVec2;

    fn set_render_target_screen(&mut self);

    fn set_render_target(&mut self, framebuffer: &Self::Framebuffer);

    fn set_viewport(&mut self, viewport: Viewport);

    fn set_full_screen_viewport(&mut self);

    /// The color the next [`clear_color`](Self::clear_color) clears to.
    fn clear_color_value(&self) -> Vec4;

    fn set_clear_color(&mut self, color: Vec4);

    /// Clears the color attachment of the current target.
    fn clear_color(&mut self) -> Result<(), Self::Error>;

    /// Clears the depth attachment of the current target.
    fn clear_depth(&mut self) -> Result<(), Self::Error>;

    /// Installs `program` for subsequent draws, or restores normal materials with `None`.
    fn set_override_shading(&mut self, program: Option<&Self::Program>);

    /// Returns the framebuffer described by `descriptor`, allocating or resizing it as needed.
    fn ensure_framebuffer(
        &mut self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<Self::Framebuffer, Self::Error>;

    fn framebuffer(&self, name: &str) -> Option<Self::Framebuffer>;

    /// Draws the color content of `framebuffer` into `viewport` of the display surface.
    fn render_framebuffer(
        &mut self,
        framebuffer: &Self::Framebuffer,
        viewport: Viewport,
    ) -> Result<(), Self::Error>;
}

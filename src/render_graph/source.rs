//! The draw work a pass submits.

use crate::render_graph::RenderBackend;

/// Something that submits draw calls while a pass is executing.
///
/// Sources run after the pass has bound its target, set its viewport and cleared. They may
/// issue any number of draws but must not change the target binding or the viewport.
///
/// Closures taking the backend implement this trait, which covers most uses:
///
/// ```ignore
/// let pass = PassNode::new("scene")
///     .output("hdr")
///     .source(move |backend: &mut WgpuBackend| {
///         let mut render_pass = backend.render_pass("terrain")?;
///         render_pass.set_vertex_buffer(0, vertices.slice(..));
///         render_pass.draw(0..vertex_count, 0..1);
///         Ok(())
///     });
/// ```
///
/// Implement it directly for sources that own GPU resources:
///
/// ```ignore
/// struct Skybox { /* pipeline, bind groups */ }
///
/// impl RenderSource<WgpuBackend> for Skybox {
///     fn submit(&self, backend: &mut WgpuBackend) -> Result<(), WgpuBackendError> {
///         let mut pass = backend.render_pass("Skybox")?;
///         // ...
///         Ok(())
///     }
/// }
/// ```
pub trait RenderSource<B: RenderBackend> {
    /// Submits this source's draw calls.
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend, with the pass's target, viewport and override already set
    fn submit(&self, backend: &mut B) -> Result<(), B::Error>;
}

impl<B, F> RenderSource<B> for F
where
    B: RenderBackend,
    F: Fn(&mut B) -> Result<(), B::Error>,
{
    fn submit(&self, backend: &mut B) -> Result<(), B::Error> {
        self(backend)
    }
}

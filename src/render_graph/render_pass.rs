//! Execution of a single pass against a backend.

use indexmap::IndexMap;

use crate::render_graph::{
    PassNode, RenderBackend, RenderGraphError, RenderTargetNode, ShadingProgram, Viewport,
};

/// A pass bound to its resolved output target for one execution.
///
/// Execution is strictly sequential:
///
/// 1. **Setup target**: bind the screen or the pass's framebuffer and set the viewport.
/// 2. **Override shading**: wire every dependency into the override program and install it.
/// 3. **Clear**: save the backend clear color, then clear color and depth as enabled.
/// 4. **Draw**: submit every source in order.
/// 5. **Restore**: uninstall the override and restore the saved clear color. This runs even
///    when a clear or a source failed; the failure is returned afterwards.
/// 6. **Debug overlay**: in debug mode, blit the pass's output and each of its dependencies
///    into their debug viewports.
pub struct RenderPass<'a, B: RenderBackend> {
    pass: &'a mut PassNode<B>,
    target: &'a RenderTargetNode,
    targets: &'a IndexMap<String, RenderTargetNode>,
}

impl<'a, B: RenderBackend> RenderPass<'a, B> {
    /// Binds `pass` to the target it outputs to, looked up in `targets`.
    pub fn new(
        pass: &'a mut PassNode<B>,
        targets: &'a IndexMap<String, RenderTargetNode>,
    ) -> Result<Self, RenderGraphError> {
        let target = targets.get(pass.output_target()).ok_or_else(|| {
            RenderGraphError::UnknownTarget {
                pass: pass.name().to_string(),
                target: pass.output_target().to_string(),
            }
        })?;
        Ok(Self {
            pass,
            target,
            targets,
        })
    }

    /// Runs the pass. Validation errors are returned before any backend call.
    pub fn execute(&mut self, backend: &mut B, debug_view: bool) -> Result<(), RenderGraphError> {
        self.pass.validate()?;
        log::debug!(
            "executing pass '{}' -> '{}'",
            self.pass.name(),
            self.target.name()
        );

        self.setup_target(backend, debug_view)?;

        let overridden = self.install_override(backend);
        let saved_clear_color = backend.clear_color_value();
        let result = self.clear_and_draw(backend);

        if overridden {
            backend.set_override_shading(None);
        }
        backend.set_clear_color(saved_clear_color);
        log::trace!("pass '{}' restored backend state", self.pass.name());
        result.map_err(RenderGraphError::backend)?;

        if debug_view && !self.target.is_screen() {
            self.debug_overlay(backend)?;
        }
        Ok(())
    }

    fn setup_target(&self, backend: &mut B, debug_view: bool) -> Result<(), RenderGraphError> {
        if self.target.is_screen() {
            backend.set_render_target_screen();
            match self.target.debug_viewport().filter(|_| debug_view) {
                Some(viewport) => backend.set_viewport(viewport),
                None => backend.set_full_screen_viewport(),
            }
            return Ok(());
        }

        let descriptor = self.target.descriptor(backend.surface_size());
        let framebuffer = backend
            .ensure_framebuffer(&descriptor)
            .map_err(RenderGraphError::backend)?;
        backend.set_render_target(&framebuffer);
        backend.set_viewport(Viewport::full(descriptor.size));
        Ok(())
    }

    fn install_override(&mut self, backend: &mut B) -> bool {
        let dependencies: Vec<(String, String)> = self
            .pass
            .dependencies()
            .map(|(slot, target)| (slot.to_string(), target.to_string()))
            .collect();
        let Some(program) = self.pass.override_program_mut() else {
            return false;
        };
        for (slot, target) in &dependencies {
            program.define_texture_input(target, slot);
        }
        backend.set_override_shading(Some(&*program));
        true
    }

    fn clear_and_draw(&self, backend: &mut B) -> Result<(), B::Error> {
        if self.pass.clears_color() {
            backend.set_clear_color(self.pass.clear_color_value());
            backend.clear_color()?;
        }
        if self.pass.clears_depth() && (self.target.has_depth() || self.target.is_screen()) {
            backend.clear_depth()?;
        }
        for source in self.pass.sources() {
            source.submit(backend)?;
        }
        Ok(())
    }

    fn debug_overlay(&self, backend: &mut B) -> Result<(), RenderGraphError> {
        self.blit(backend, self.target.name())?;
        for (_, target) in self.pass.dependencies() {
            self.blit(backend, target)?;
        }
        Ok(())
    }

    fn blit(&self, backend: &mut B, name: &str) -> Result<(), RenderGraphError> {
        let viewport = self.targets.get(name).and_then(RenderTargetNode::debug_viewport);
        let (Some(viewport), Some(framebuffer)) = (viewport, backend.framebuffer(name)) else {
            log::warn!("debug view: target '{name}' has no framebuffer or viewport; skipped");
            return Ok(());
        };
        backend
            .render_framebuffer(&framebuffer, viewport)
            .map_err(RenderGraphError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::{BackendCommand, HeadlessBackend, HeadlessProgram, SCREEN_TARGET};
    use glam::{UVec2, Vec4};

    fn targets() -> IndexMap<String, RenderTargetNode> {
        let mut targets = IndexMap::new();
        targets.insert(SCREEN_TARGET.to_string(), RenderTargetNode::screen());
        targets.insert("hdr".to_string(), RenderTargetNode::new("hdr"));
        targets.insert(
            "mask".to_string(),
            RenderTargetNode::new("mask").absolute(64, 32).depth(false),
        );
        targets
    }

    #[test]
    fn offscreen_pass_sequence() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        let mut pass: PassNode<HeadlessBackend> = PassNode::new("mask pass")
            .output("mask")
            .clear_color(red)
            .source(HeadlessBackend::draw_source("mask geometry"));

        RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap();

        assert_eq!(
            backend.commands(),
            [
                BackendCommand::AllocateFramebuffer {
                    name: "mask".into(),
                    size: UVec2::new(64, 32),
                    depth: false,
                },
                BackendCommand::SetRenderTarget("mask".into()),
                BackendCommand::SetViewport(Viewport::new(0, 0, 64, 32)),
                BackendCommand::SetClearColor(red),
                BackendCommand::ClearColor(red),
                BackendCommand::Draw("mask geometry".into()),
                BackendCommand::SetClearColor(HeadlessBackend::DEFAULT_CLEAR_COLOR),
            ]
        );
    }

    #[test]
    fn clear_color_is_restored_and_override_removed() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let before = Vec4::new(0.2, 0.3, 0.4, 1.0);
        backend.set_clear_color(before);

        let mut pass: PassNode<HeadlessBackend> = PassNode::new("post")
            .output("hdr")
            .clear_color(Vec4::ONE)
            .override_shading(HeadlessProgram::new("post program"))
            .source(HeadlessBackend::draw_source("quad"));
        RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap();

        assert_eq!(backend.clear_color_value(), before);
        assert_eq!(
            backend.commands().last(),
            Some(&BackendCommand::SetClearColor(before))
        );
        assert!(backend.commands().contains(&BackendCommand::SetOverrideShading(None)));
        assert!(backend.commands().contains(&BackendCommand::ClearDepth));
    }

    #[test]
    fn state_is_restored_when_a_source_fails() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let before = backend.clear_color_value();

        let mut pass: PassNode<HeadlessBackend> = PassNode::new("broken")
            .output("hdr")
            .clear_color(Vec4::new(0.0, 1.0, 0.0, 1.0))
            .override_shading(HeadlessProgram::new("broken program"))
            .source(HeadlessBackend::failing_source("explodes"))
            .source(HeadlessBackend::draw_source("never drawn"));
        let err = RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap_err();

        assert!(matches!(err, RenderGraphError::Backend(_)));
        assert_eq!(backend.clear_color_value(), before);
        assert!(!backend.commands().contains(&BackendCommand::Draw("never drawn".into())));
        let tail = &backend.commands()[backend.commands().len() - 2..];
        assert_eq!(
            tail,
            [
                BackendCommand::SetOverrideShading(None),
                BackendCommand::SetClearColor(before),
            ]
        );
    }

    #[test]
    fn dependencies_are_wired_before_install() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let mut pass: PassNode<HeadlessBackend> = PassNode::new("composite")
            .input("scene_color", "hdr")
            .depends_on("mask")
            .override_shading(HeadlessProgram::new("composite"));
        RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap();

        let installed = backend
            .commands()
            .iter()
            .find_map(|command| match command {
                BackendCommand::SetOverrideShading(Some(program)) => Some(program.clone()),
                _ => None,
            })
            .unwrap();
        let wiring: Vec<_> = installed
            .texture_inputs
            .iter()
            .map(|(slot, framebuffer)| (slot.as_str(), framebuffer.as_str()))
            .collect();
        assert_eq!(wiring, [("scene_color", "hdr"), ("mask", "mask")]);
    }

    #[test]
    fn depth_clear_skipped_without_depth_buffer() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let mut pass: PassNode<HeadlessBackend> = PassNode::new("mask pass")
            .output("mask")
            .disable_color_clear()
            .source(HeadlessBackend::draw_source("mask"));
        RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap();
        assert!(!backend.commands().contains(&BackendCommand::ClearDepth));
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, BackendCommand::ClearColor(_))));
    }

    #[test]
    fn invalid_pass_touches_no_backend_state() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let mut pass: PassNode<HeadlessBackend> = PassNode::new("empty").output("hdr");
        let err = RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap_err();
        assert!(matches!(err, RenderGraphError::EmptyPass { .. }));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn pass_is_bound_to_its_own_output_target() {
        let targets = targets();
        let mut backend = HeadlessBackend::new(UVec2::new(800, 600));
        let mut pass: PassNode<HeadlessBackend> = PassNode::new("mask pass")
            .output("mask")
            .source(HeadlessBackend::draw_source("mask geometry"));
        RenderPass::new(&mut pass, &targets)
            .unwrap()
            .execute(&mut backend, false)
            .unwrap();
        let framebuffers: Vec<_> = backend.framebuffers().map(|f| f.name.clone()).collect();
        assert_eq!(framebuffers, ["mask"]);

        let mut stray: PassNode<HeadlessBackend> = PassNode::new("stray")
            .output("nowhere")
            .source(HeadlessBackend::draw_source("lost"));
        assert!(matches!(
            RenderPass::new(&mut stray, &targets),
            Err(RenderGraphError::UnknownTarget { pass, target }) if pass == "stray" && target == "nowhere"
        ));
    }
}

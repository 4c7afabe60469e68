//! Pass nodes: one unit of draw work writing one target.

use glam::Vec4;
use indexmap::IndexMap;

use crate::render_graph::{RenderBackend, RenderGraphError, RenderSource, SCREEN_TARGET};

/// A render pass as authored: where it draws, what it reads and how it clears.
///
/// Passes are built with a fluent API and then handed to
/// [`RenderGraph::add_pass`](crate::RenderGraph::add_pass):
///
/// ```ignore
/// let composite = PassNode::new("composite")           // outputs to the screen
///     .input("scene_color", "hdr")                      // sample target "hdr" as `scene_color`
///     .depends_on("bloom")                              // sample target "bloom" as `bloom`
///     .override_shading(tonemap_program)
///     .source(FullscreenQuad::new(&backend))
///     .disable_depth_clear();
/// ```
///
/// Both clears are enabled by default, with an opaque black clear color.
pub struct PassNode<B: RenderBackend> {
    name: String,
    output: String,
    sources: Vec<Box<dyn RenderSource<B>>>,
    /// Texture input slot → target name.
    dependencies: IndexMap<String, String>,
    color_clear: bool,
    depth_clear: bool,
    clear_color: Vec4,
    override_shading: Option<B::Program>,
}

impl<B: RenderBackend> PassNode<B> {
    /// Creates a pass rendering to the screen.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: SCREEN_TARGET.to_string(),
            sources: Vec::new(),
            dependencies: IndexMap::new(),
            color_clear: true,
            depth_clear: true,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            override_shading: None,
        }
    }

    /// Sets the target this pass renders into.
    pub fn output(mut self, target: impl Into<String>) -> Self {
        self.output = target.into();
        self
    }

    /// Reads the output of `target` through the texture input `slot`.
    pub fn input(mut self, slot: impl Into<String>, target: impl Into<String>) -> Self {
        self.dependencies.insert(slot.into(), target.into());
        self
    }

    /// Reads the output of `target` through a texture input of the same name.
    pub fn depends_on(self, target: impl Into<String>) -> Self {
        let target = target.into();
        self.input(target.clone(), target)
    }

    /// Appends draw work. Sources run in the order they were added.
    pub fn source<S>(mut self, source: S) -> Self
    where
        S: RenderSource<B> + 'static,
    {
        self.sources.push(Box::new(source));
        self
    }

    pub fn clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn disable_color_clear(mut self) -> Self {
        self.color_clear = false;
        self
    }

    pub fn disable_depth_clear(mut self) -> Self {
        self.depth_clear = false;
        self
    }

    /// Replaces normal materials with `program` while this pass draws. Every dependency is
    /// wired into the program as a texture input before it is installed.
    pub fn override_shading(mut self, program: B::Program) -> Self {
        self.override_shading = Some(program);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_target(&self) -> &str {
        &self.output
    }

    pub fn renders_to_screen(&self) -> bool {
        self.output == SCREEN_TARGET
    }

    /// Dependencies as `(slot, target)` pairs in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependencies
            .iter()
            .map(|(slot, target)| (slot.as_str(), target.as_str()))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn clears_color(&self) -> bool {
        self.color_clear
    }

    pub fn clears_depth(&self) -> bool {
        self.depth_clear
    }

    pub fn clear_color_value(&self) -> Vec4 {
        self.clear_color
    }

    pub fn override_program(&self) -> Option<&B::Program> {
        self.override_shading.as_ref()
    }

    pub(crate) fn override_program_mut(&mut self) -> Option<&mut B::Program> {
        self.override_shading.as_mut()
    }

    pub(crate) fn sources(&self) -> &[Box<dyn RenderSource<B>>] {
        &self.sources
    }

    /// Checks the pass on its own, before it is connected to any target.
    ///
    /// An offscreen pass needs at least one source; screen passes may be compose-only. A pass
    /// may not read the target it writes.
    pub fn validate(&self) -> Result<(), RenderGraphError> {
        if self.sources.is_empty() && !self.renders_to_screen() {
            return Err(RenderGraphError::EmptyPass {
                pass: self.name.clone(),
            });
        }
        if self.dependencies.values().any(|target| *target == self.output) {
            return Err(RenderGraphError::SelfDependency {
                pass: self.name.clone(),
                target: self.output.clone(),
            });
        }
        Ok(())
    }
}

impl<B: RenderBackend> std::fmt::Debug for PassNode<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassNode")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("sources", &self.sources.len())
            .field("dependencies", &self.dependencies)
            .field("color_clear", &self.color_clear)
            .field("depth_clear", &self.depth_clear)
            .field("clear_color", &self.clear_color)
            .field("override_shading", &self.override_shading.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::HeadlessBackend;

    type Pass = PassNode<HeadlessBackend>;

    #[test]
    fn defaults() {
        let pass = Pass::new("final");
        assert!(pass.renders_to_screen());
        assert!(pass.clears_color());
        assert!(pass.clears_depth());
        assert_eq!(pass.clear_color_value(), Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert!(pass.override_program().is_none());
    }

    #[test]
    fn depends_on_uses_the_target_name_as_slot() {
        let pass = Pass::new("composite")
            .depends_on("bloom")
            .input("scene_color", "hdr");
        let deps: Vec<_> = pass.dependencies().collect();
        assert_eq!(deps, [("bloom", "bloom"), ("scene_color", "hdr")]);
    }

    #[test]
    fn empty_offscreen_pass_is_invalid() {
        let pass = Pass::new("scene").output("hdr");
        assert!(matches!(
            pass.validate(),
            Err(RenderGraphError::EmptyPass { pass }) if pass == "scene"
        ));
        assert!(Pass::new("compose").validate().is_ok());
    }

    #[test]
    fn reading_own_output_is_invalid() {
        let pass = Pass::new("blur")
            .output("bloom")
            .input("source", "bloom")
            .source(HeadlessBackend::draw_source("blur"));
        assert!(matches!(
            pass.validate(),
            Err(RenderGraphError::SelfDependency { target, .. }) if target == "bloom"
        ));
    }
}

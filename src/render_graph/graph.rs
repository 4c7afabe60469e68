//! The render graph and its compiled, executable form.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::dag::{Dag, DagError, NodeIndex};
use crate::render_graph::debug_view;
use crate::render_graph::{
    FrameOptions, PassNode, RenderBackend, RenderGraphError, RenderPass, RenderTargetNode,
};

/// A node of the frame graph: passes depend on the targets they read, targets on the pass
/// producing them.
#[derive(Clone, Debug)]
enum FrameNode {
    Target(String),
    Pass(usize),
}

/// Authoring container for passes and targets.
///
/// Passes are validated as they are added, and a pass can only depend on targets that an
/// earlier pass already produces. Execution order is therefore registration order, and a
/// dependency cycle cannot be expressed.
///
/// ```text
///  "scene" ──▶ [hdr] ──▶ "bloom" ──▶ [bloom] ──┐
///                 │                            ▼
///                 └─────────────────────▶ "composite" ──▶ [screen]
/// ```
///
/// # Example
///
/// ```
/// use glam::UVec2;
/// use phalanx::{FrameOptions, HeadlessBackend, PassNode, RenderGraph, RenderTargetNode};
///
/// let mut graph = RenderGraph::<HeadlessBackend>::new();
/// graph.add_target(RenderTargetNode::new("hdr"))?;
/// graph
///     .add_pass(
///         PassNode::new("scene")
///             .output("hdr")
///             .source(HeadlessBackend::draw_source("meshes")),
///     )?
///     .add_pass(PassNode::new("composite").depends_on("hdr"))?;
///
/// let mut compiled = graph.build()?;
/// let mut backend = HeadlessBackend::new(UVec2::new(1280, 720));
/// compiled.execute(&mut backend, &FrameOptions::default().debug_view(true))?;
/// # Ok::<(), phalanx::RenderGraphError>(())
/// ```
pub struct RenderGraph<B: RenderBackend> {
    targets: IndexMap<String, RenderTargetNode>,
    passes: Vec<PassNode<B>>,
    /// Offscreen target name → index of the pass producing it.
    producers: HashMap<String, usize>,
    frame: Dag<FrameNode>,
    target_nodes: HashMap<String, NodeIndex>,
    screen: NodeIndex,
}

impl<B: RenderBackend> RenderGraph<B> {
    /// Creates a graph holding only the screen target.
    pub fn new() -> Self {
        let mut graph = Self {
            targets: IndexMap::new(),
            passes: Vec::new(),
            producers: HashMap::new(),
            frame: Dag::new(),
            target_nodes: HashMap::new(),
            screen: NodeIndex::from(0),
        };
        graph.screen = graph.insert_target(RenderTargetNode::screen());
        graph
    }

    /// Registers an offscreen target.
    pub fn add_target(&mut self, target: RenderTargetNode) -> Result<&mut Self, RenderGraphError> {
        if self.targets.contains_key(target.name()) {
            return Err(RenderGraphError::DuplicateTarget {
                target: target.name().to_string(),
            });
        }
        log::trace!("added render target '{}'", target.name());
        self.insert_target(target);
        Ok(self)
    }

    fn insert_target(&mut self, target: RenderTargetNode) -> NodeIndex {
        let node = self.frame.add(FrameNode::Target(target.name().to_string()));
        self.target_nodes.insert(target.name().to_string(), node);
        self.targets.insert(target.name().to_string(), target);
        node
    }

    pub fn target(&self, name: &str) -> Option<&RenderTargetNode> {
        self.targets.get(name)
    }

    /// The target `name`, if a pass already renders into it. The screen is never a dependency.
    pub fn get_target_dependency(&self, name: &str) -> Option<&RenderTargetNode> {
        self.targets
            .get(name)
            .filter(|target| !target.is_screen() && self.producers.contains_key(name))
    }

    /// Validates `pass`, resolves its output and dependencies, and appends it.
    ///
    /// On error the graph is left unchanged.
    pub fn add_pass(&mut self, pass: PassNode<B>) -> Result<&mut Self, RenderGraphError> {
        if self.passes.iter().any(|p| p.name() == pass.name()) {
            return Err(RenderGraphError::DuplicatePass {
                pass: pass.name().to_string(),
            });
        }
        let Some(&output_node) = self.target_nodes.get(pass.output_target()) else {
            return Err(RenderGraphError::UnknownTarget {
                pass: pass.name().to_string(),
                target: pass.output_target().to_string(),
            });
        };
        pass.validate()?;

        let mut inputs = Vec::new();
        for (_, target) in pass.dependencies() {
            let node = self
                .get_target_dependency(target)
                .and_then(|_| self.target_nodes.get(target));
            let Some(&node) = node else {
                return Err(RenderGraphError::DependencyNotFound {
                    pass: pass.name().to_string(),
                    texture: target.to_string(),
                });
            };
            inputs.push(node);
        }
        if !pass.renders_to_screen() {
            if let Some(&producer) = self.producers.get(pass.output_target()) {
                return Err(RenderGraphError::DuplicateProducer {
                    target: pass.output_target().to_string(),
                    producer: self.passes[producer].name().to_string(),
                    pass: pass.name().to_string(),
                });
            }
        }

        let index = self.passes.len();
        let node = self.frame.add(FrameNode::Pass(index));
        self.frame.set_dependencies(node, inputs);
        self.frame.connect_to(output_node, node);
        if !pass.renders_to_screen() {
            self.producers
                .insert(pass.output_target().to_string(), index);
        }
        log::debug!(
            "added pass '{}' -> '{}' ({} dependencies)",
            pass.name(),
            pass.output_target(),
            pass.dependencies().count()
        );
        self.passes.push(pass);
        Ok(self)
    }

    /// Freezes the graph for execution.
    ///
    /// Walks the frame graph back from the screen and warns about passes whose output never
    /// reaches it. They still execute.
    pub fn build(self) -> Result<CompiledRenderGraph<B>, RenderGraphError> {
        let order = self
            .frame
            .dependency_order(self.screen)
            .map_err(|err| self.traversal_error(err))?;

        let contributing: HashSet<usize> = order
            .iter()
            .filter_map(|&node| match self.frame.get(node) {
                Some(FrameNode::Pass(index)) => Some(*index),
                _ => None,
            })
            .collect();
        if !self.passes.iter().any(PassNode::renders_to_screen) {
            log::warn!("render graph has no pass writing to the screen");
        }
        for (index, pass) in self.passes.iter().enumerate() {
            if !contributing.contains(&index) {
                log::warn!(
                    "pass '{}' does not contribute to the screen output",
                    pass.name()
                );
            }
        }

        log::info!(
            "built render graph: {} passes, {} targets",
            self.passes.len(),
            self.targets.len()
        );
        Ok(CompiledRenderGraph {
            targets: self.targets,
            passes: self.passes,
        })
    }

    fn traversal_error(&self, err: DagError) -> RenderGraphError {
        match err {
            DagError::Cycle { node } => RenderGraphError::GraphCycle {
                node: match self.frame.get(node) {
                    Some(FrameNode::Target(name)) => format!("target '{name}'"),
                    Some(FrameNode::Pass(index)) => format!("pass '{}'", self.passes[*index].name()),
                    None => format!("node {node}"),
                },
            },
            other => RenderGraphError::Frame(other),
        }
    }
}

impl<B: RenderBackend> Default for RenderGraph<B> {
    fn default() -> Self {
        Self::new()
    }
}

/// A validated render graph, ready to execute every frame.
pub struct CompiledRenderGraph<B: RenderBackend> {
    targets: IndexMap<String, RenderTargetNode>,
    passes: Vec<PassNode<B>>,
}

impl<B: RenderBackend> CompiledRenderGraph<B> {
    /// Pass names in execution order.
    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(PassNode::name)
    }

    pub fn target(&self, name: &str) -> Option<&RenderTargetNode> {
        self.targets.get(name)
    }

    pub fn targets(&self) -> impl Iterator<Item = &RenderTargetNode> {
        self.targets.values()
    }

    /// Runs every pass in order against `backend`.
    ///
    /// With [`FrameOptions::debug_view`] set, every target is first assigned a cell of the
    /// debug grid; the screen pass renders into its cell and each offscreen pass blits its output
    /// and dependencies into theirs.
    pub fn execute(&mut self, backend: &mut B, options: &FrameOptions) -> Result<(), RenderGraphError> {
        if options.debug_view {
            debug_view::assign(&mut self.targets, backend.surface_size(), &options.debug);
        } else {
            for target in self.targets.values_mut() {
                target.set_debug_viewport(None);
            }
        }

        for pass in &mut self.passes {
            RenderPass::new(pass, &self.targets)?.execute(backend, options.debug_view)?;
        }
        Ok(())
    }
}

//! The shader graph container and its authoring API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::dag::{Dag, NodeIndex};
use crate::shader_graph::codegen::{self, CodegenOptions};
use crate::shader_graph::function::is_identifier;
use crate::shader_graph::node::{FunctionNode, InnerUniform, NodeId, ShaderNode, swizzle_type};
use crate::shader_graph::{
    ProgramDescriptor, ShaderFunctionRegistry, ShaderGraphError, ShaderType, ShaderValue, Stage,
};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

fn next_graph_id() -> u64 {
    NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)
}

/// One vertex + fragment program described as a DAG of typed nodes.
///
/// Nodes are created through the graph and addressed by [`NodeId`]. Every edge is type checked
/// as it is bound, so a graph that accepted all of its edges only needs structural checks when
/// [`compile`](Self::compile) runs.
pub struct ShaderGraph {
    id: u64,
    registry: Arc<ShaderFunctionRegistry>,
    nodes: Dag<ShaderNode>,
    vertex_root: Option<NodeIndex>,
    fragment_root: Option<NodeIndex>,
    varys: IndexMap<String, NodeIndex>,
    options: CodegenOptions,
}

impl ShaderGraph {
    /// Creates an empty graph whose function nodes resolve against `registry`.
    pub fn new(registry: Arc<ShaderFunctionRegistry>) -> Self {
        Self {
            id: next_graph_id(),
            registry,
            nodes: Dag::new(),
            vertex_root: None,
            fragment_root: None,
            varys: IndexMap::new(),
            options: CodegenOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CodegenOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    pub fn registry(&self) -> &ShaderFunctionRegistry {
        &self.registry
    }

    /// Removes every node, root and vary slot. Ids issued before the reset are rejected.
    pub fn reset(&mut self) -> &mut Self {
        self.id = next_graph_id();
        self.nodes.clear();
        self.vertex_root = None;
        self.fragment_root = None;
        self.varys.clear();
        self
    }

    pub fn node(&self, id: NodeId) -> Option<&ShaderNode> {
        self.resolve(id).ok().and_then(|index| self.nodes.get(index))
    }

    pub fn node_type(&self, id: NodeId) -> Result<ShaderType, ShaderGraphError> {
        Ok(self.get(self.resolve(id)?)?.ty())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn nodes(&self) -> &Dag<ShaderNode> {
        &self.nodes
    }

    /// A per-vertex input. Only valid in the vertex stage.
    pub fn attribute(
        &mut self,
        name: impl Into<String>,
        ty: ShaderType,
    ) -> Result<NodeId, ShaderGraphError> {
        let name = checked_identifier(name.into())?;
        Ok(self.add(ShaderNode::Attribute { name, ty }))
    }

    /// A user uniform; its type is the type of `default`.
    pub fn uniform(
        &mut self,
        name: impl Into<String>,
        default: impl Into<ShaderValue>,
    ) -> Result<NodeId, ShaderGraphError> {
        let name = checked_identifier(name.into())?;
        let default = default.into();
        if !default.is_finite() {
            return Err(ShaderGraphError::NonFiniteValue {
                context: format!("default of uniform '{name}'"),
            });
        }
        Ok(self.add(ShaderNode::Uniform { name, default }))
    }

    /// A uniform provided by the backend, such as the camera matrices.
    pub fn inner_uniform(&mut self, inner: InnerUniform) -> NodeId {
        self.add(ShaderNode::InnerUniform(inner))
    }

    pub fn constant(&mut self, value: impl Into<ShaderValue>) -> Result<NodeId, ShaderGraphError> {
        let value = value.into();
        if !value.is_finite() {
            return Err(ShaderGraphError::NonFiniteValue {
                context: format!("constant {value:?}"),
            });
        }
        Ok(self.add(ShaderNode::Const(value)))
    }

    /// Samples the 2D texture `texture` at a `vec2` coordinate.
    pub fn texture_fetch(
        &mut self,
        texture: impl Into<String>,
        coord: NodeId,
    ) -> Result<NodeId, ShaderGraphError> {
        let texture = checked_identifier(texture.into())?;
        let coord_index = self.resolve(coord)?;
        let found = self.get(coord_index)?.ty();
        if found != ShaderType::Vec2 {
            return Err(ShaderGraphError::TypeMismatch {
                context: format!("coordinate of texture '{texture}'"),
                expected: ShaderType::Vec2,
                found,
            });
        }
        Ok(self.add(ShaderNode::TextureFetch {
            texture,
            coord: coord_index,
        }))
    }

    /// Builds a vector of type `ty` from scalar and vector parts.
    ///
    /// The parts' component counts must add up to the arity of `ty`.
    pub fn combine(&mut self, ty: ShaderType, parts: &[NodeId]) -> Result<NodeId, ShaderGraphError> {
        let Some(arity) = ty.components().filter(|_| ty.is_vector()) else {
            return Err(ShaderGraphError::CombineArity { ty, components: 0 });
        };

        let mut indices = Vec::with_capacity(parts.len());
        let mut components = 0;
        for &part in parts {
            let index = self.resolve(part)?;
            let part_ty = self.get(index)?.ty();
            match part_ty.components() {
                Some(n) => components += n,
                None => {
                    return Err(ShaderGraphError::TypeMismatch {
                        context: format!("{ty} combine part"),
                        expected: ShaderType::Float,
                        found: part_ty,
                    });
                }
            }
            indices.push(index);
        }
        if components != arity {
            return Err(ShaderGraphError::CombineArity { ty, components });
        }

        Ok(self.add(ShaderNode::Combine { ty, parts: indices }))
    }

    pub fn vec2(&mut self, parts: &[NodeId]) -> Result<NodeId, ShaderGraphError> {
        self.combine(ShaderType::Vec2, parts)
    }

    pub fn vec3(&mut self, parts: &[NodeId]) -> Result<NodeId, ShaderGraphError> {
        self.combine(ShaderType::Vec3, parts)
    }

    pub fn vec4(&mut self, parts: &[NodeId]) -> Result<NodeId, ShaderGraphError> {
        self.combine(ShaderType::Vec4, parts)
    }

    /// Selects components of a vector, e.g. `"xyz"` or `"rg"`.
    pub fn swizzle(&mut self, source: NodeId, mask: &str) -> Result<NodeId, ShaderGraphError> {
        let source = self.resolve(source)?;
        let mask = mask.trim();
        let ty = swizzle_type(self.get(source)?.ty(), mask)?;
        Ok(self.add(ShaderNode::Swizzle {
            source,
            mask: mask.to_string(),
            ty,
        }))
    }

    /// Creates a node invoking the registered function `name`.
    pub fn call(&mut self, name: &str) -> Result<FunctionNodeBuilder<'_>, ShaderGraphError> {
        let function = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| ShaderGraphError::UnknownFunction {
                function: name.to_string(),
            })?;
        let id = self.add(ShaderNode::Function(FunctionNode::new(function)));
        Ok(FunctionNodeBuilder { graph: self, id })
    }

    /// Binds `input` to the slot `slot` of the function node `node`.
    ///
    /// The input's type must equal the slot's declared type. Rebinding a slot replaces the
    /// previous edge.
    pub fn bind(&mut self, node: NodeId, slot: &str, input: NodeId) -> Result<(), ShaderGraphError> {
        let node_index = self.resolve(node)?;
        let input_index = self.resolve(input)?;
        let found = self.get(input_index)?.ty();
        let description = self.describe(node_index);

        let Some(ShaderNode::Function(function_node)) = self.nodes.get_mut(node_index) else {
            return Err(ShaderGraphError::UnknownInputSlot {
                function: description,
                slot: slot.to_string(),
            });
        };
        let function = &function_node.function;
        let Some(expected) = function.input_type(slot) else {
            return Err(ShaderGraphError::UnknownInputSlot {
                function: function.name.clone(),
                slot: slot.to_string(),
            });
        };
        if expected != found {
            return Err(ShaderGraphError::TypeMismatch {
                context: format!("input '{slot}' of function '{}'", function.name),
                expected,
                found,
            });
        }

        function_node.inputs.insert(slot.to_string(), input_index);
        let dependencies = function_node.ordered_inputs();
        self.nodes.set_dependencies(node_index, dependencies);
        Ok(())
    }

    /// Gives a function node a human-readable name that shows up in generated source.
    pub fn set_label(&mut self, node: NodeId, label: impl Into<String>) -> Result<(), ShaderGraphError> {
        let index = self.resolve(node)?;
        if let Some(ShaderNode::Function(function_node)) = self.nodes.get_mut(index) {
            function_node.label = Some(label.into());
        }
        Ok(())
    }

    /// Sets the clip-space position output. Must be a `vec4`.
    pub fn set_vertex_root(&mut self, node: NodeId) -> Result<&mut Self, ShaderGraphError> {
        let index = self.checked_root(node, "vertex root")?;
        self.vertex_root = Some(index);
        Ok(self)
    }

    /// Sets the color output. Must be a `vec4`.
    pub fn set_fragment_root(&mut self, node: NodeId) -> Result<&mut Self, ShaderGraphError> {
        let index = self.checked_root(node, "fragment root")?;
        self.fragment_root = Some(index);
        Ok(self)
    }

    /// Declares a value computed in the vertex stage and read in the fragment stage.
    pub fn set_vary(
        &mut self,
        name: impl Into<String>,
        node: NodeId,
    ) -> Result<&mut Self, ShaderGraphError> {
        let name = checked_identifier(name.into())?;
        let index = self.resolve(node)?;
        let ty = self.get(index)?.ty();
        if ty.components().is_none() {
            return Err(ShaderGraphError::TypeMismatch {
                context: format!("vary '{name}'"),
                expected: ShaderType::Vec4,
                found: ty,
            });
        }
        self.varys.insert(name, index);
        Ok(self)
    }

    /// A fragment-stage node reading the vary slot `name`.
    pub fn vary(&mut self, name: &str) -> Result<NodeId, ShaderGraphError> {
        let index = *self
            .varys
            .get(name)
            .ok_or_else(|| ShaderGraphError::UnknownVary {
                name: name.to_string(),
            })?;
        let ty = self.get(index)?.ty();
        Ok(self.add(ShaderNode::Vary {
            name: name.to_string(),
            ty,
        }))
    }

    pub fn vertex_root(&self) -> Option<NodeId> {
        self.vertex_root.map(|index| self.id_of(index))
    }

    pub fn fragment_root(&self) -> Option<NodeId> {
        self.fragment_root.map(|index| self.id_of(index))
    }

    /// Vary slots in declaration order.
    pub fn varys(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.varys
            .iter()
            .map(|(name, index)| (name.as_str(), self.id_of(*index)))
    }

    /// Compiles both stages into a [`ProgramDescriptor`].
    ///
    /// Compiling an unchanged graph always produces identical output.
    pub fn compile(&self) -> Result<ProgramDescriptor, ShaderGraphError> {
        let vertex_root = self.vertex_root.ok_or(ShaderGraphError::MissingRoot {
            stage: Stage::Vertex,
        })?;
        let fragment_root = self.fragment_root.ok_or(ShaderGraphError::MissingRoot {
            stage: Stage::Fragment,
        })?;

        let program = codegen::compile(
            &self.nodes,
            &self.registry,
            &self.options,
            vertex_root,
            &self.varys,
            fragment_root,
        )?;
        log::debug!(
            "compiled shader graph: {} nodes, {} uniforms, {} textures",
            self.nodes.len(),
            program.uniforms.len(),
            program.textures.len()
        );
        Ok(program)
    }

    fn add(&mut self, node: ShaderNode) -> NodeId {
        let dependencies = node.dependencies();
        let index = self.nodes.add(node);
        self.nodes.set_dependencies(index, dependencies);
        self.id_of(index)
    }

    fn id_of(&self, index: NodeIndex) -> NodeId {
        NodeId {
            graph: self.id,
            index,
        }
    }

    fn resolve(&self, id: NodeId) -> Result<NodeIndex, ShaderGraphError> {
        if id.graph != self.id || !self.nodes.contains(id.index) {
            return Err(ShaderGraphError::ForeignNode);
        }
        Ok(id.index)
    }

    fn get(&self, index: NodeIndex) -> Result<&ShaderNode, ShaderGraphError> {
        self.nodes.get(index).ok_or(ShaderGraphError::ForeignNode)
    }

    fn describe(&self, index: NodeIndex) -> String {
        self.nodes
            .get(index)
            .map(ShaderNode::describe)
            .unwrap_or_else(|| format!("node {index}"))
    }

    fn checked_root(&self, node: NodeId, context: &str) -> Result<NodeIndex, ShaderGraphError> {
        let index = self.resolve(node)?;
        let found = self.get(index)?.ty();
        if found != ShaderType::Vec4 {
            return Err(ShaderGraphError::TypeMismatch {
                context: context.to_string(),
                expected: ShaderType::Vec4,
                found,
            });
        }
        Ok(index)
    }
}

fn checked_identifier(name: String) -> Result<String, ShaderGraphError> {
    if is_identifier(&name) {
        Ok(name)
    } else {
        Err(ShaderGraphError::InvalidIdentifier { name })
    }
}

/// Fluent binder returned by [`ShaderGraph::call`].
pub struct FunctionNodeBuilder<'g> {
    graph: &'g mut ShaderGraph,
    id: NodeId,
}

impl FunctionNodeBuilder<'_> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Labels the node; see [`ShaderGraph::set_label`].
    pub fn name(self, label: impl Into<String>) -> Result<Self, ShaderGraphError> {
        self.graph.set_label(self.id, label)?;
        Ok(self)
    }

    /// Binds `node` to the input slot `slot`; see [`ShaderGraph::bind`].
    pub fn input(self, slot: &str, node: NodeId) -> Result<Self, ShaderGraphError> {
        self.graph.bind(self.id, slot, node)?;
        Ok(self)
    }

    pub fn finish(self) -> NodeId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_graph::ShaderFunction;
    use glam::{Vec3, Vec4};

    fn registry() -> Arc<ShaderFunctionRegistry> {
        let mut registry = ShaderFunctionRegistry::new();
        registry
            .register(
                ShaderFunction::new("scale", ShaderType::Float)
                    .input("value", ShaderType::Float)
                    .input("factor", ShaderType::Float)
                    .body("return value * factor;"),
            )
            .unwrap();
        registry
            .register(
                ShaderFunction::new("to_color", ShaderType::Vec4)
                    .input("rgb", ShaderType::Vec3)
                    .body("return vec4<f32>(rgb, 1.0);"),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn binding_a_vector_to_a_scalar_slot_is_rejected() {
        let mut graph = ShaderGraph::new(registry());
        let color = graph.constant(Vec3::ONE).unwrap();
        let err = graph
            .call("scale")
            .unwrap()
            .input("value", color)
            .err()
            .unwrap();
        match err {
            ShaderGraphError::TypeMismatch { expected, found, .. } => {
                assert_eq!(expected, ShaderType::Float);
                assert_eq!(found, ShaderType::Vec3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_slots_and_functions_are_rejected() {
        let mut graph = ShaderGraph::new(registry());
        let one = graph.constant(1.0).unwrap();
        let err = graph.call("scale").unwrap().input("nope", one).err().unwrap();
        assert!(matches!(err, ShaderGraphError::UnknownInputSlot { slot, .. } if slot == "nope"));

        let err = graph.call("missing").err().unwrap();
        assert!(matches!(err, ShaderGraphError::UnknownFunction { function } if function == "missing"));
    }

    #[test]
    fn rebinding_replaces_the_edge() {
        let mut graph = ShaderGraph::new(registry());
        let a = graph.constant(1.0).unwrap();
        let b = graph.constant(2.0).unwrap();
        let factor = graph.constant(3.0).unwrap();
        let node = graph
            .call("scale")
            .unwrap()
            .input("value", a)
            .unwrap()
            .input("factor", factor)
            .unwrap()
            .finish();
        graph.bind(node, "value", b).unwrap();

        let deps = graph.nodes.dependencies(node.index);
        assert_eq!(deps, &[b.index, factor.index]);
    }

    #[test]
    fn swizzle_narrows_type() {
        let mut graph = ShaderGraph::new(registry());
        let color = graph.constant(Vec4::ONE).unwrap();
        let rgb = graph.swizzle(color, "rgb").unwrap();
        let r = graph.swizzle(color, "r").unwrap();
        assert_eq!(graph.node_type(rgb).unwrap(), ShaderType::Vec3);
        assert_eq!(graph.node_type(r).unwrap(), ShaderType::Float);
        assert!(matches!(
            graph.swizzle(color, "xyzwx"),
            Err(ShaderGraphError::InvalidSwizzle { .. })
        ));
    }

    #[test]
    fn combine_checks_component_count() {
        let mut graph = ShaderGraph::new(registry());
        let rgb = graph.constant(Vec3::ONE).unwrap();
        let one = graph.constant(1.0).unwrap();
        assert!(graph.vec4(&[rgb, one]).is_ok());
        assert!(matches!(
            graph.vec4(&[rgb]),
            Err(ShaderGraphError::CombineArity { components: 3, .. })
        ));
        assert!(matches!(
            graph.vec2(&[rgb]),
            Err(ShaderGraphError::CombineArity { components: 3, .. })
        ));
    }

    #[test]
    fn roots_must_be_vec4() {
        let mut graph = ShaderGraph::new(registry());
        let scalar = graph.constant(1.0).unwrap();
        assert!(matches!(
            graph.set_fragment_root(scalar),
            Err(ShaderGraphError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn texture_fetch_needs_vec2_coordinate() {
        let mut graph = ShaderGraph::new(registry());
        let coord = graph.constant(Vec3::ZERO).unwrap();
        assert!(matches!(
            graph.texture_fetch("scene", coord),
            Err(ShaderGraphError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn vary_reads_require_a_declared_slot() {
        let mut graph = ShaderGraph::new(registry());
        assert!(matches!(
            graph.vary("v_uv"),
            Err(ShaderGraphError::UnknownVary { .. })
        ));
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        graph.set_vary("v_uv", uv).unwrap();
        let read = graph.vary("v_uv").unwrap();
        assert_eq!(graph.node_type(read).unwrap(), ShaderType::Vec2);
    }

    #[test]
    fn ids_from_other_graphs_are_rejected() {
        let mut first = ShaderGraph::new(registry());
        let mut second = ShaderGraph::new(registry());
        let foreign = first.constant(1.0).unwrap();
        let _local = second.constant(1.0).unwrap();
        assert!(matches!(
            second.swizzle(foreign, "x"),
            Err(ShaderGraphError::ForeignNode)
        ));
    }

    #[test]
    fn reset_invalidates_old_ids() {
        let mut graph = ShaderGraph::new(registry());
        let old = graph.constant(Vec4::ONE).unwrap();
        graph.reset();
        assert!(graph.is_empty());
        assert!(matches!(
            graph.set_fragment_root(old),
            Err(ShaderGraphError::ForeignNode)
        ));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut graph = ShaderGraph::new(registry());
        assert!(matches!(
            graph.uniform("not valid", 1.0),
            Err(ShaderGraphError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn wgsl_keywords_and_temporary_names_are_rejected() {
        let mut graph = ShaderGraph::new(registry());
        for name in ["let", "fn", "struct", "_t0", "_blur_3"] {
            assert!(
                matches!(
                    graph.uniform(name, 1.0),
                    Err(ShaderGraphError::InvalidIdentifier { name: rejected }) if rejected == name
                ),
                "uniform '{name}' accepted"
            );
        }
        assert!(graph.attribute("loop", ShaderType::Vec3).is_err());
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        assert!(graph.texture_fetch("return", uv).is_err());
        assert!(graph.set_vary("var", uv).is_err());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut graph = ShaderGraph::new(registry());
        assert!(matches!(
            graph.constant(f32::NAN),
            Err(ShaderGraphError::NonFiniteValue { .. })
        ));
        assert!(matches!(
            graph.constant(Vec3::new(1.0, f32::INFINITY, 0.0)),
            Err(ShaderGraphError::NonFiniteValue { .. })
        ));
        let err = graph.uniform("exposure", f32::NEG_INFINITY).unwrap_err();
        assert!(err.to_string().contains("uniform 'exposure'"));
        assert!(graph.is_empty());
    }
}

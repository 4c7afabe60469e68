//! Linear WGSL generation for one pipeline stage.
//!
//! A stage is generated from the dependency-ordered node list of its roots:
//!
//! - every distinct function definition is declared once, first use wins;
//! - every operation node except a terminal output gets `let <var>: <type> = <expr>;`;
//! - each stage output receives its root, directly when nothing else consumes the root.
//!
//! Temporaries are named after the node's arena index (`_t12`, or `_blur_12` for a function
//! node labeled "blur"), so regenerating an unchanged graph yields identical source. User
//! identifiers cannot start with `_`, so temporaries never collide with declared names.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::dag::{Dag, DagError, NodeIndex};
use crate::shader_graph::node::ShaderNode;
use crate::shader_graph::program::{self, ProgramDescriptor};
use crate::shader_graph::{ShaderFunction, ShaderFunctionRegistry, ShaderGraphError, Stage};

/// Names used by the generated entry points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodegenOptions {
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Variable the fragment root is assigned to before being returned.
    pub fragment_output: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            vertex_entry: "vs_main".to_string(),
            fragment_entry: "fs_main".to_string(),
            fragment_output: "frag_color".to_string(),
        }
    }
}

impl CodegenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_entry(mut self, name: impl Into<String>) -> Self {
        self.vertex_entry = name.into();
        self
    }

    pub fn fragment_entry(mut self, name: impl Into<String>) -> Self {
        self.fragment_entry = name.into();
        self
    }

    pub fn fragment_output(mut self, name: impl Into<String>) -> Self {
        self.fragment_output = name.into();
        self
    }
}

/// Indentation-aware line writer.
#[derive(Default)]
pub(crate) struct CodeBuilder {
    output: String,
    indent: usize,
}

impl CodeBuilder {
    const INDENT: &'static str = "    ";

    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write_line(&mut self, line: &str) {
        if line.is_empty() {
            self.output.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.output.push_str(Self::INDENT);
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    /// Writes a multi-line block at the current indentation, keeping its own relative layout.
    pub(crate) fn write_block(&mut self, block: &str) {
        for line in block.trim_matches('\n').lines() {
            self.write_line(line.trim_end());
        }
    }

    pub(crate) fn add_indent(&mut self) {
        self.indent += 1;
    }

    pub(crate) fn reduce_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub(crate) fn output(self) -> String {
        self.output
    }
}

/// Generated pieces of one stage, assembled into a module by [`program`].
pub(crate) struct StageCode {
    pub(crate) order: Vec<NodeIndex>,
    pub(crate) functions: Vec<Arc<ShaderFunction>>,
    pub(crate) statements: Vec<String>,
}

/// Compiles both stages of a graph.
pub(crate) fn compile(
    nodes: &Dag<ShaderNode>,
    registry: &ShaderFunctionRegistry,
    options: &CodegenOptions,
    vertex_root: NodeIndex,
    varys: &IndexMap<String, NodeIndex>,
    fragment_root: NodeIndex,
) -> Result<ProgramDescriptor, ShaderGraphError> {
    let mut vertex_outputs = vec![(
        format!("out.{}", program::CLIP_POSITION_FIELD),
        vertex_root,
    )];
    vertex_outputs.extend(
        varys
            .iter()
            .map(|(name, index)| (format!("out.{name}"), *index)),
    );
    let vertex = generate_stage(nodes, registry, Stage::Vertex, &vertex_outputs)?;

    let fragment_outputs = [(options.fragment_output.clone(), fragment_root)];
    let fragment = generate_stage(nodes, registry, Stage::Fragment, &fragment_outputs)?;

    program::assemble(nodes, options, varys, &vertex, &fragment)
}

/// Generates the function section and body statements of one stage.
///
/// `outputs` pairs an assignment target with the node written to it; their nodes are the
/// traversal roots, in order.
pub(crate) fn generate_stage(
    nodes: &Dag<ShaderNode>,
    registry: &ShaderFunctionRegistry,
    stage: Stage,
    outputs: &[(String, NodeIndex)],
) -> Result<StageCode, ShaderGraphError> {
    let order = nodes
        .dependency_order_from(outputs.iter().map(|(_, index)| *index))
        .map_err(|err| traversal_error(nodes, err))?;

    for &index in &order {
        let node = node_at(nodes, index)?;
        check_node(node, index, stage)?;
    }

    let mut functions: IndexMap<&str, Arc<ShaderFunction>> = IndexMap::new();
    for &index in &order {
        if let ShaderNode::Function(function_node) = node_at(nodes, index)? {
            let name = function_node.function.name.as_str();
            if functions.contains_key(name) {
                continue;
            }
            let definition = registry
                .get(name)
                .ok_or_else(|| ShaderGraphError::UnknownFunction {
                    function: name.to_string(),
                })?;
            functions.insert(name, Arc::clone(definition));
        }
    }

    let mut uses: HashMap<NodeIndex, usize> = HashMap::new();
    for &index in &order {
        for &dependency in nodes.dependencies(index) {
            *uses.entry(dependency).or_default() += 1;
        }
    }
    for (_, index) in outputs {
        *uses.entry(*index).or_default() += 1;
    }

    // Outputs consumed by nothing else are assigned their expression directly.
    let mut direct = HashSet::new();
    for (_, index) in outputs {
        let node = node_at(nodes, *index)?;
        if !node.is_leaf() && uses.get(index).copied() == Some(1) {
            direct.insert(*index);
        }
    }

    let mut names: HashMap<NodeIndex, String> = HashMap::new();
    let mut statements = Vec::new();
    for &index in &order {
        let node = node_at(nodes, index)?;
        if node.is_leaf() || direct.contains(&index) {
            continue;
        }
        let expr = expression(nodes, stage, index, node, &names)?;
        let var = variable_name(index, node);
        statements.push(format!("let {var}: {} = {expr};", node.ty().wgsl()));
        names.insert(index, var);
    }

    for (target, index) in outputs {
        let node = node_at(nodes, *index)?;
        let value = if direct.contains(index) {
            expression(nodes, stage, *index, node, &names)?
        } else {
            reference(nodes, *index, &names, target)?
        };
        statements.push(format!("{target} = {value};"));
    }

    Ok(StageCode {
        order,
        functions: functions.into_values().collect(),
        statements,
    })
}

/// Writes `fn name(params) -> ret { body }`.
pub(crate) fn write_function(builder: &mut CodeBuilder, function: &ShaderFunction) {
    let params: Vec<String> = function
        .inputs
        .iter()
        .map(|input| format!("{}: {}", input.name, input.ty.wgsl()))
        .collect();
    builder.write_line(&format!(
        "fn {}({}) -> {} {{",
        function.name,
        params.join(", "),
        function.return_type.wgsl()
    ));
    builder.add_indent();
    builder.write_block(&function.body);
    builder.reduce_indent();
    builder.write_line("}");
}

/// Generated temporary name of a node.
pub(crate) fn variable_name(index: NodeIndex, node: &ShaderNode) -> String {
    if let ShaderNode::Function(function_node) = node {
        if let Some(label) = function_node.label() {
            return format!("_{}_{}", sanitize_label(label), index.index());
        }
    }
    format!("_t{}", index.index())
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => cleaned.to_string(),
        Some(_) => format!("n{cleaned}"),
        None => "node".to_string(),
    }
}

fn check_node(node: &ShaderNode, index: NodeIndex, stage: Stage) -> Result<(), ShaderGraphError> {
    match node {
        ShaderNode::Attribute { .. } if stage == Stage::Fragment => {
            Err(ShaderGraphError::StageMismatch {
                node: node.describe(),
                stage,
            })
        }
        ShaderNode::Vary { .. } if stage == Stage::Vertex => Err(ShaderGraphError::StageMismatch {
            node: node.describe(),
            stage,
        }),
        ShaderNode::Function(function_node) => {
            for input in &function_node.function.inputs {
                if !function_node.inputs.contains_key(&input.name) {
                    return Err(ShaderGraphError::MissingBinding {
                        node: variable_name(index, node),
                        function: function_node.function.name.clone(),
                        slot: input.name.clone(),
                    });
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn expression(
    nodes: &Dag<ShaderNode>,
    stage: Stage,
    index: NodeIndex,
    node: &ShaderNode,
    names: &HashMap<NodeIndex, String>,
) -> Result<String, ShaderGraphError> {
    let owner = variable_name(index, node);
    let arguments = |indices: &[NodeIndex]| -> Result<String, ShaderGraphError> {
        let refs = indices
            .iter()
            .map(|dependency| reference(nodes, *dependency, names, &owner))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs.join(", "))
    };

    match node {
        ShaderNode::Function(function_node) => {
            let mut args = Vec::with_capacity(function_node.function.inputs.len());
            for input in &function_node.function.inputs {
                let bound = function_node.inputs.get(&input.name).ok_or_else(|| {
                    ShaderGraphError::MissingBinding {
                        node: owner.clone(),
                        function: function_node.function.name.clone(),
                        slot: input.name.clone(),
                    }
                })?;
                args.push(*bound);
            }
            Ok(format!(
                "{}({})",
                function_node.function.name,
                arguments(&args)?
            ))
        }
        ShaderNode::TextureFetch { texture, coord } => {
            let coord = reference(nodes, *coord, names, &owner)?;
            Ok(match stage {
                Stage::Fragment => format!(
                    "textureSample({texture}, {texture}{}, {coord})",
                    program::SAMPLER_SUFFIX
                ),
                Stage::Vertex => format!(
                    "textureSampleLevel({texture}, {texture}{}, {coord}, 0.0)",
                    program::SAMPLER_SUFFIX
                ),
            })
        }
        ShaderNode::Combine { ty, parts } => Ok(format!("{}({})", ty.wgsl(), arguments(parts)?)),
        ShaderNode::Swizzle { source, mask, .. } => {
            Ok(format!("{}.{mask}", reference(nodes, *source, names, &owner)?))
        }
        ShaderNode::Attribute { .. }
        | ShaderNode::Uniform { .. }
        | ShaderNode::InnerUniform(_)
        | ShaderNode::Vary { .. }
        | ShaderNode::Const(_) => reference(nodes, index, names, &owner),
    }
}

/// How another statement refers to `index`: a declared name, a literal, or a temporary.
fn reference(
    nodes: &Dag<ShaderNode>,
    index: NodeIndex,
    names: &HashMap<NodeIndex, String>,
    referenced_by: &str,
) -> Result<String, ShaderGraphError> {
    let dangling = || ShaderGraphError::DanglingReference {
        node: format!("node {index}"),
        referenced_by: referenced_by.to_string(),
    };
    let node = nodes.get(index).ok_or_else(dangling)?;
    match node {
        ShaderNode::Attribute { name, .. }
        | ShaderNode::Uniform { name, .. }
        | ShaderNode::Vary { name, .. } => Ok(name.clone()),
        ShaderNode::InnerUniform(inner) => Ok(inner.name().to_string()),
        ShaderNode::Const(value) => Ok(value.to_wgsl()),
        ShaderNode::Function(_)
        | ShaderNode::TextureFetch { .. }
        | ShaderNode::Combine { .. }
        | ShaderNode::Swizzle { .. } => names.get(&index).cloned().ok_or_else(|| {
            ShaderGraphError::DanglingReference {
                node: variable_name(index, node),
                referenced_by: referenced_by.to_string(),
            }
        }),
    }
}

fn node_at(nodes: &Dag<ShaderNode>, index: NodeIndex) -> Result<&ShaderNode, ShaderGraphError> {
    nodes.get(index).ok_or(ShaderGraphError::DanglingReference {
        node: format!("node {index}"),
        referenced_by: "stage output".to_string(),
    })
}

fn traversal_error(nodes: &Dag<ShaderNode>, err: DagError) -> ShaderGraphError {
    let describe = |index: NodeIndex| match nodes.get(index) {
        Some(node) => format!("{} [{}]", node.describe(), variable_name(index, node)),
        None => format!("node {index}"),
    };
    match err {
        DagError::Cycle { node } => ShaderGraphError::GraphCycle {
            node: describe(node),
        },
        DagError::MissingNode {
            node,
            referenced_by,
        } => ShaderGraphError::DanglingReference {
            node: describe(node),
            referenced_by: describe(referenced_by),
        },
        DagError::MissingRoot { root } => ShaderGraphError::DanglingReference {
            node: describe(root),
            referenced_by: "stage output".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_graph::node::FunctionNode;
    use crate::shader_graph::{ShaderGraph, ShaderType};
    use glam::{Vec2, Vec4};

    fn registry() -> Arc<ShaderFunctionRegistry> {
        let mut registry = ShaderFunctionRegistry::new();
        registry
            .register(
                ShaderFunction::new("add4", ShaderType::Vec4)
                    .input("a", ShaderType::Vec4)
                    .input("b", ShaderType::Vec4)
                    .body("return a + b;"),
            )
            .unwrap();
        registry
            .register(
                ShaderFunction::new("brighten", ShaderType::Vec4)
                    .input("color", ShaderType::Vec4)
                    .input("amount", ShaderType::Float)
                    .body("let scaled = color.rgb * (1.0 + amount);\nreturn vec4<f32>(scaled, color.a);"),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn with_fullscreen_vertex(graph: &mut ShaderGraph) {
        let position = graph.attribute("position", ShaderType::Vec3).unwrap();
        let one = graph.constant(1.0).unwrap();
        let clip = graph.vec4(&[position, one]).unwrap();
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        graph.set_vertex_root(clip).unwrap().set_vary("v_uv", uv).unwrap();
    }

    #[test]
    fn shared_definitions_are_declared_once() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let a = graph.constant(Vec4::ONE).unwrap();
        let b = graph.uniform("tint", Vec4::ZERO).unwrap();
        let first = graph
            .call("add4")
            .unwrap()
            .input("a", a)
            .unwrap()
            .input("b", b)
            .unwrap()
            .finish();
        let second = graph
            .call("add4")
            .unwrap()
            .input("a", first)
            .unwrap()
            .input("b", b)
            .unwrap()
            .finish();
        graph.set_fragment_root(second).unwrap();

        let program = graph.compile().unwrap();
        assert_eq!(program.fragment_source.matches("fn add4(").count(), 1);
        assert_eq!(program.fragment_source.matches("add4(").count(), 3);
    }

    #[test]
    fn body_is_dependency_ordered_with_root_assigned_directly() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let v_uv = graph.vary("v_uv").unwrap();
        let color = graph.texture_fetch("scene", v_uv).unwrap();
        let amount = graph.uniform("amount", 0.25).unwrap();
        let out = graph
            .call("brighten")
            .unwrap()
            .name("final color")
            .unwrap()
            .input("color", color)
            .unwrap()
            .input("amount", amount)
            .unwrap()
            .finish();
        graph.set_fragment_root(out).unwrap();

        let stage = generate_stage(
            graph.nodes(),
            graph.registry(),
            Stage::Fragment,
            &[("frag_color".to_string(), out.index)],
        )
        .unwrap();

        let fetch_var = format!("_t{}", color.index());
        assert_eq!(
            stage.statements,
            vec![
                format!("let {fetch_var}: vec4<f32> = textureSample(scene, scene_sampler, v_uv);"),
                format!("frag_color = brighten({fetch_var}, amount);"),
            ]
        );
    }

    #[test]
    fn labels_name_temporaries() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let a = graph.constant(Vec4::ONE).unwrap();
        let labeled = graph
            .call("add4")
            .unwrap()
            .name("9 lives!")
            .unwrap()
            .input("a", a)
            .unwrap()
            .input("b", a)
            .unwrap()
            .finish();
        let root = graph
            .call("add4")
            .unwrap()
            .input("a", labeled)
            .unwrap()
            .input("b", labeled)
            .unwrap()
            .finish();
        graph.set_fragment_root(root).unwrap();

        let program = graph.compile().unwrap();
        let expected = format!("let _n9_lives_{}: vec4<f32>", labeled.index());
        assert!(program.fragment_source.contains(&expected));
    }

    #[test]
    fn temporaries_never_shadow_declared_names() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let v_uv = graph.vary("v_uv").unwrap();
        let color = graph.texture_fetch("scene", v_uv).unwrap();
        // A user name shaped like a numbered temporary stays its own declaration.
        let tint_name = format!("var{}", color.index());
        let tint = graph.uniform(tint_name.as_str(), Vec4::ONE).unwrap();
        let sum = graph
            .call("add4")
            .unwrap()
            .input("a", color)
            .unwrap()
            .input("b", tint)
            .unwrap()
            .finish();
        graph.set_fragment_root(sum).unwrap();

        let program = graph.compile().unwrap();
        let fetch = format!("_t{}", color.index());
        assert!(program.fragment_source.contains(&format!("var<uniform> {tint_name}: vec4<f32>;")));
        assert!(program.fragment_source.contains(&format!("let {fetch}: vec4<f32> = textureSample(")));
        assert!(program.fragment_source.contains(&format!("frag_color = add4({fetch}, {tint_name});")));
        assert!(!program.fragment_source.contains(&format!("let {tint_name}")));
    }

    #[test]
    fn invalid_entry_point_names_fail_compilation() {
        let mut graph = ShaderGraph::new(registry())
            .with_options(CodegenOptions::new().fragment_output("_t1"));
        with_fullscreen_vertex(&mut graph);
        let root = graph.constant(Vec4::ONE).unwrap();
        graph.set_fragment_root(root).unwrap();
        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::InvalidIdentifier { name }) if name == "_t1"
        ));
    }

    #[test]
    fn compiling_twice_is_byte_identical() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let v_uv = graph.vary("v_uv").unwrap();
        let color = graph.texture_fetch("scene", v_uv).unwrap();
        let amount = graph.uniform("amount", 0.5).unwrap();
        let out = graph
            .call("brighten")
            .unwrap()
            .input("color", color)
            .unwrap()
            .input("amount", amount)
            .unwrap()
            .finish();
        graph.set_fragment_root(out).unwrap();

        let first = graph.compile().unwrap();
        let second = graph.compile().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unbound_slot_is_reported_at_compile() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let a = graph.constant(Vec4::ONE).unwrap();
        let root = graph.call("add4").unwrap().input("a", a).unwrap().finish();
        graph.set_fragment_root(root).unwrap();

        match graph.compile().unwrap_err() {
            ShaderGraphError::MissingBinding { function, slot, .. } => {
                assert_eq!(function, "add4");
                assert_eq!(slot, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn forced_cycle_is_reported_with_node_name() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let seed = graph.constant(Vec4::ONE).unwrap();
        let first = graph
            .call("add4")
            .unwrap()
            .name("first")
            .unwrap()
            .input("a", seed)
            .unwrap()
            .input("b", seed)
            .unwrap()
            .finish();
        let second = graph
            .call("add4")
            .unwrap()
            .input("a", first)
            .unwrap()
            .input("b", seed)
            .unwrap()
            .finish();
        graph.bind(first, "b", second).unwrap();
        graph.set_fragment_root(second).unwrap();

        match graph.compile().unwrap_err() {
            ShaderGraphError::GraphCycle { node } => assert!(node.contains("add4")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn attributes_are_rejected_in_the_fragment_stage() {
        let mut graph = ShaderGraph::new(registry());
        with_fullscreen_vertex(&mut graph);
        let color = graph.attribute("color", ShaderType::Vec4).unwrap();
        graph.set_fragment_root(color).unwrap();
        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::StageMismatch {
                stage: Stage::Fragment,
                ..
            })
        ));
    }

    #[test]
    fn vary_reads_are_rejected_in_the_vertex_stage() {
        let mut graph = ShaderGraph::new(registry());
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        graph.set_vary("v_uv", uv).unwrap();
        let read = graph.vary("v_uv").unwrap();
        let zero = graph.constant(Vec2::ZERO).unwrap();
        let clip = graph.vec4(&[read, zero]).unwrap();
        graph.set_vertex_root(clip).unwrap();
        graph.set_fragment_root(clip).unwrap();
        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::StageMismatch {
                stage: Stage::Vertex,
                ..
            })
        ));
    }

    #[test]
    fn dangling_edges_fail_compilation() {
        let registry = registry();
        let mut nodes = Dag::new();
        let mut function = FunctionNode::new(Arc::clone(registry.get("add4").unwrap()));
        function.inputs.insert("a".into(), NodeIndex::from(7));
        function.inputs.insert("b".into(), NodeIndex::from(8));
        let dependencies = function.ordered_inputs();
        let root = nodes.add(ShaderNode::Function(function));
        nodes.set_dependencies(root, dependencies);

        let err = generate_stage(
            &nodes,
            &registry,
            Stage::Fragment,
            &[("frag_color".to_string(), root)],
        )
        .err()
        .unwrap();
        assert!(matches!(err, ShaderGraphError::DanglingReference { .. }));
    }

    #[test]
    fn code_builder_indents_blocks() {
        let mut builder = CodeBuilder::new();
        builder.write_line("fn f() {");
        builder.add_indent();
        builder.write_block("\nlet a = 1.0;\n\nreturn a;\n");
        builder.reduce_indent();
        builder.write_line("}");
        assert_eq!(
            builder.output(),
            "fn f() {\n    let a = 1.0;\n\n    return a;\n}\n"
        );
    }
}

//! Compiled program: generated WGSL modules plus the manifests a backend binds against.
//!
//! Both modules share one resource layout:
//!
//! | group | binding      | resource                                   |
//! |-------|--------------|--------------------------------------------|
//! | 0     | `i`          | uniform `i`, in first-use order             |
//! | 1     | `2i`, `2i+1` | texture `i` and its filtering sampler       |
//!
//! Uniforms are collected from the vertex stage first, then the fragment stage. Attributes and
//! varyings get consecutive `@location`s in first-use and declaration order respectively.

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::dag::{Dag, NodeIndex};
use crate::shader_graph::codegen::{self, CodeBuilder, CodegenOptions, StageCode};
use crate::shader_graph::function::is_identifier;
use crate::shader_graph::node::{InnerUniform, ShaderNode};
use crate::shader_graph::{ShaderGraphError, ShaderType, ShaderValue};

pub(crate) const CLIP_POSITION_FIELD: &str = "clip_position";
pub(crate) const SAMPLER_SUFFIX: &str = "_sampler";
const VERTEX_OUTPUT_STRUCT: &str = "VertexOutput";
const VERTEX_OUTPUT_VAR: &str = "out";

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub ty: ShaderType,
    pub location: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformDescriptor {
    pub name: String,
    pub ty: ShaderType,
    /// Initial value; engine uniforms start at the zero value of their type.
    pub default: ShaderValue,
    pub binding: u32,
    /// Set for uniforms the backend fills itself.
    pub inner: Option<InnerUniform>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub name: String,
    pub binding: u32,
    pub sampler_binding: u32,
}

impl TextureDescriptor {
    pub fn sampler_name(&self) -> String {
        format!("{}{SAMPLER_SUFFIX}", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaryingDescriptor {
    pub name: String,
    pub ty: ShaderType,
    pub location: u32,
}

/// Output of [`ShaderGraph::compile`](crate::ShaderGraph::compile).
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramDescriptor {
    pub attributes: Vec<AttributeDescriptor>,
    pub uniforms: Vec<UniformDescriptor>,
    pub textures: Vec<TextureDescriptor>,
    pub varyings: Vec<VaryingDescriptor>,
    pub vertex_source: String,
    pub fragment_source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
}

impl ProgramDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformDescriptor> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureDescriptor> {
        self.textures.iter().find(|t| t.name == name)
    }
}

/// Module-scope names, which attributes, varyings and locals must not shadow.
#[derive(Default)]
struct Globals {
    kinds: IndexMap<String, String>,
}

impl Globals {
    fn declare(&mut self, name: &str, kind: String) -> Result<(), ShaderGraphError> {
        match self.kinds.entry(name.to_string()) {
            Entry::Occupied(existing) if *existing.get() != kind => {
                Err(ShaderGraphError::ConflictingDeclaration {
                    name: name.to_string(),
                    first: existing.get().clone(),
                    second: kind,
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(kind);
                Ok(())
            }
        }
    }

    fn check_local(&self, name: &str, kind: &str) -> Result<(), ShaderGraphError> {
        match self.kinds.get(name) {
            Some(existing) => Err(ShaderGraphError::ConflictingDeclaration {
                name: name.to_string(),
                first: existing.clone(),
                second: kind.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Collects manifests for both stages and writes the two WGSL modules.
pub(crate) fn assemble(
    nodes: &Dag<ShaderNode>,
    options: &CodegenOptions,
    varys: &IndexMap<String, NodeIndex>,
    vertex: &StageCode,
    fragment: &StageCode,
) -> Result<ProgramDescriptor, ShaderGraphError> {
    for name in [
        &options.vertex_entry,
        &options.fragment_entry,
        &options.fragment_output,
    ] {
        if !is_identifier(name) {
            return Err(ShaderGraphError::InvalidIdentifier { name: name.clone() });
        }
    }

    let mut globals = Globals::default();
    globals.declare(VERTEX_OUTPUT_STRUCT, "the vertex output struct".into())?;

    let mut uniforms: Vec<UniformDescriptor> = Vec::new();
    let mut textures: Vec<TextureDescriptor> = Vec::new();
    for &index in vertex.order.iter().chain(&fragment.order) {
        match nodes.get(index) {
            Some(ShaderNode::Uniform { name, default }) => {
                add_uniform(&mut globals, &mut uniforms, name, *default, None)?;
            }
            Some(ShaderNode::InnerUniform(inner)) => {
                let default = ShaderValue::default_for(inner.ty());
                add_uniform(&mut globals, &mut uniforms, inner.name(), default, Some(*inner))?;
            }
            Some(ShaderNode::TextureFetch { texture, .. }) => {
                globals.declare(texture, "a texture".into())?;
                globals.declare(&format!("{texture}{SAMPLER_SUFFIX}"), "a sampler".into())?;
                if !textures.iter().any(|t| &t.name == texture) {
                    let slot = textures.len() as u32;
                    textures.push(TextureDescriptor {
                        name: texture.clone(),
                        binding: slot * 2,
                        sampler_binding: slot * 2 + 1,
                    });
                }
            }
            _ => {}
        }
    }
    for function in vertex.functions.iter().chain(&fragment.functions) {
        globals.declare(&function.name, "a function".into())?;
    }

    let mut attributes: Vec<AttributeDescriptor> = Vec::new();
    for &index in &vertex.order {
        if let Some(ShaderNode::Attribute { name, ty }) = nodes.get(index) {
            match attributes.iter().find(|a| &a.name == name) {
                Some(existing) if existing.ty != *ty => {
                    return Err(ShaderGraphError::ConflictingDeclaration {
                        name: name.clone(),
                        first: format!("a {} attribute", existing.ty),
                        second: format!("a {ty} attribute"),
                    });
                }
                Some(_) => {}
                None => {
                    globals.check_local(name, "an attribute")?;
                    if name == VERTEX_OUTPUT_VAR {
                        return Err(reserved(name, "an attribute"));
                    }
                    attributes.push(AttributeDescriptor {
                        name: name.clone(),
                        ty: *ty,
                        location: attributes.len() as u32,
                    });
                }
            }
        }
    }

    let mut varyings = Vec::with_capacity(varys.len());
    for (name, index) in varys {
        globals.check_local(name, "a vary")?;
        if name == CLIP_POSITION_FIELD || name == &options.fragment_output {
            return Err(reserved(name, "a vary"));
        }
        let ty = nodes
            .get(*index)
            .map(ShaderNode::ty)
            .ok_or_else(|| ShaderGraphError::DanglingReference {
                node: format!("node {index}"),
                referenced_by: format!("vary '{name}'"),
            })?;
        varyings.push(VaryingDescriptor {
            name: name.clone(),
            ty,
            location: varyings.len() as u32,
        });
    }
    globals.check_local(&options.fragment_output, "the fragment output")?;

    let vertex_source = vertex_module(options, &attributes, &uniforms, &textures, &varyings, vertex);
    let fragment_source =
        fragment_module(options, &uniforms, &textures, &varyings, fragment);

    Ok(ProgramDescriptor {
        attributes,
        uniforms,
        textures,
        varyings,
        vertex_source,
        fragment_source,
        vertex_entry: options.vertex_entry.clone(),
        fragment_entry: options.fragment_entry.clone(),
    })
}

fn add_uniform(
    globals: &mut Globals,
    uniforms: &mut Vec<UniformDescriptor>,
    name: &str,
    default: ShaderValue,
    inner: Option<InnerUniform>,
) -> Result<(), ShaderGraphError> {
    let ty = default.ty();
    let kind = match inner {
        Some(_) => format!("an engine {ty} uniform"),
        None => format!("a {ty} uniform"),
    };
    globals.declare(name, kind)?;
    if !uniforms.iter().any(|u| u.name == name) {
        uniforms.push(UniformDescriptor {
            name: name.to_string(),
            ty,
            default,
            binding: uniforms.len() as u32,
            inner,
        });
    }
    Ok(())
}

fn reserved(name: &str, kind: &str) -> ShaderGraphError {
    ShaderGraphError::ConflictingDeclaration {
        name: name.to_string(),
        first: "a generated name".to_string(),
        second: kind.to_string(),
    }
}

fn write_declarations(
    builder: &mut CodeBuilder,
    uniforms: &[UniformDescriptor],
    textures: &[TextureDescriptor],
    varyings: &[VaryingDescriptor],
) {
    builder.write_line(&format!("struct {VERTEX_OUTPUT_STRUCT} {{"));
    builder.add_indent();
    builder.write_line(&format!(
        "@builtin(position) {CLIP_POSITION_FIELD}: {},",
        ShaderType::Vec4.wgsl()
    ));
    for varying in varyings {
        builder.write_line(&format!(
            "@location({}) {}: {},",
            varying.location,
            varying.name,
            varying.ty.wgsl()
        ));
    }
    builder.reduce_indent();
    builder.write_line("}");
    builder.write_line("");

    for uniform in uniforms {
        builder.write_line(&format!(
            "@group({UNIFORM_GROUP}) @binding({}) var<uniform> {}: {};",
            uniform.binding,
            uniform.name,
            uniform.ty.wgsl()
        ));
    }
    for texture in textures {
        builder.write_line(&format!(
            "@group({TEXTURE_GROUP}) @binding({}) var {}: texture_2d<f32>;",
            texture.binding, texture.name
        ));
        builder.write_line(&format!(
            "@group({TEXTURE_GROUP}) @binding({}) var {}: sampler;",
            texture.sampler_binding,
            texture.sampler_name()
        ));
    }
    if !uniforms.is_empty() || !textures.is_empty() {
        builder.write_line("");
    }
}

fn write_functions(builder: &mut CodeBuilder, stage: &StageCode) {
    for function in &stage.functions {
        codegen::write_function(builder, function);
        builder.write_line("");
    }
}

fn vertex_module(
    options: &CodegenOptions,
    attributes: &[AttributeDescriptor],
    uniforms: &[UniformDescriptor],
    textures: &[TextureDescriptor],
    varyings: &[VaryingDescriptor],
    stage: &StageCode,
) -> String {
    let mut builder = CodeBuilder::new();
    write_declarations(&mut builder, uniforms, textures, varyings);
    write_functions(&mut builder, stage);

    let params: Vec<String> = attributes
        .iter()
        .map(|a| format!("@location({}) {}: {}", a.location, a.name, a.ty.wgsl()))
        .collect();
    builder.write_line("@vertex");
    builder.write_line(&format!(
        "fn {}({}) -> {VERTEX_OUTPUT_STRUCT} {{",
        options.vertex_entry,
        params.join(", ")
    ));
    builder.add_indent();
    builder.write_line(&format!("var {VERTEX_OUTPUT_VAR}: {VERTEX_OUTPUT_STRUCT};"));
    for statement in &stage.statements {
        builder.write_line(statement);
    }
    builder.write_line(&format!("return {VERTEX_OUTPUT_VAR};"));
    builder.reduce_indent();
    builder.write_line("}");
    builder.output()
}

fn fragment_module(
    options: &CodegenOptions,
    uniforms: &[UniformDescriptor],
    textures: &[TextureDescriptor],
    varyings: &[VaryingDescriptor],
    stage: &StageCode,
) -> String {
    let mut builder = CodeBuilder::new();
    write_declarations(&mut builder, uniforms, textures, varyings);
    write_functions(&mut builder, stage);

    let params: Vec<String> = varyings
        .iter()
        .map(|v| format!("@location({}) {}: {}", v.location, v.name, v.ty.wgsl()))
        .collect();
    let color = ShaderType::Vec4.wgsl();
    builder.write_line("@fragment");
    builder.write_line(&format!(
        "fn {}({}) -> @location(0) {color} {{",
        options.fragment_entry,
        params.join(", ")
    ));
    builder.add_indent();
    builder.write_line(&format!("var {}: {color};", options.fragment_output));
    for statement in &stage.statements {
        builder.write_line(statement);
    }
    builder.write_line(&format!("return {};", options.fragment_output));
    builder.reduce_indent();
    builder.write_line("}");
    builder.output()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{Mat4, Vec3, Vec4};

    use crate::shader_graph::{
        CodegenOptions, InnerUniform, ShaderFunction, ShaderFunctionRegistry, ShaderGraph,
        ShaderGraphError, ShaderType,
    };

    fn registry() -> Arc<ShaderFunctionRegistry> {
        let mut registry = ShaderFunctionRegistry::new();
        registry
            .register(
                ShaderFunction::new("transform", ShaderType::Vec4)
                    .input("matrix", ShaderType::Mat4)
                    .input("position", ShaderType::Vec3)
                    .body("return matrix * vec4<f32>(position, 1.0);"),
            )
            .unwrap();
        registry
            .register(
                ShaderFunction::new("shade", ShaderType::Vec4)
                    .input("base", ShaderType::Vec4)
                    .input("tint", ShaderType::Vec3)
                    .body("return vec4<f32>(base.rgb * tint, base.a);"),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn textured_graph() -> ShaderGraph {
        let mut graph = ShaderGraph::new(registry());
        let position = graph.attribute("position", ShaderType::Vec3).unwrap();
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        let view_projection = graph.inner_uniform(InnerUniform::ViewProjectionMatrix);
        let clip = graph
            .call("transform")
            .unwrap()
            .input("matrix", view_projection)
            .unwrap()
            .input("position", position)
            .unwrap()
            .finish();
        graph.set_vertex_root(clip).unwrap().set_vary("v_uv", uv).unwrap();

        let v_uv = graph.vary("v_uv").unwrap();
        let albedo = graph.texture_fetch("albedo", v_uv).unwrap();
        let tint = graph.uniform("tint", Vec3::ONE).unwrap();
        let color = graph
            .call("shade")
            .unwrap()
            .input("base", albedo)
            .unwrap()
            .input("tint", tint)
            .unwrap()
            .finish();
        graph.set_fragment_root(color).unwrap();
        graph
    }

    #[test]
    fn manifests_follow_first_use_order() {
        let program = textured_graph().compile().unwrap();

        let attributes: Vec<_> = program
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.location))
            .collect();
        assert_eq!(attributes, [("position", 0), ("uv", 1)]);

        let uniforms: Vec<_> = program
            .uniforms
            .iter()
            .map(|u| (u.name.as_str(), u.binding))
            .collect();
        assert_eq!(
            uniforms,
            [("inner_view_projection", 0), ("tint", 1)],
            "unreachable uniforms are not part of the program"
        );
        assert_eq!(
            program.uniform("inner_view_projection").unwrap().inner,
            Some(InnerUniform::ViewProjectionMatrix)
        );

        let albedo = program.texture("albedo").unwrap();
        assert_eq!((albedo.binding, albedo.sampler_binding), (0, 1));
        assert_eq!(program.varyings[0].name, "v_uv");
        assert_eq!(program.varyings[0].ty, ShaderType::Vec2);
    }

    #[test]
    fn modules_declare_layout_and_entry_points() {
        let program = textured_graph().compile().unwrap();

        let vs = &program.vertex_source;
        assert!(vs.contains("@builtin(position) clip_position: vec4<f32>,"));
        assert!(vs.contains("@location(0) v_uv: vec2<f32>,"));
        assert!(vs.contains("@group(0) @binding(0) var<uniform> inner_view_projection: mat4x4<f32>;"));
        assert!(vs.contains(
            "fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {"
        ));
        assert!(vs.contains("out.clip_position = transform(inner_view_projection, position);"));
        assert!(vs.contains("out.v_uv = uv;"));
        assert!(!vs.contains("fn shade("));

        let fs = &program.fragment_source;
        assert!(fs.contains("@group(1) @binding(0) var albedo: texture_2d<f32>;"));
        assert!(fs.contains("@group(1) @binding(1) var albedo_sampler: sampler;"));
        assert!(fs.contains("fn fs_main(@location(0) v_uv: vec2<f32>) -> @location(0) vec4<f32> {"));
        assert!(fs.contains("    return frag_color;\n}"));
        assert!(!fs.contains("fn transform("));
    }

    #[test]
    fn entry_names_are_configurable() {
        let options = CodegenOptions::new()
            .vertex_entry("vertex")
            .fragment_entry("fragment")
            .fragment_output("color_out");
        let mut graph = ShaderGraph::new(registry()).with_options(options);
        let position = graph.attribute("position", ShaderType::Vec4).unwrap();
        graph.set_vertex_root(position).unwrap();
        let red = graph.constant(Vec4::new(1.0, 0.0, 0.0, 1.0)).unwrap();
        graph.set_fragment_root(red).unwrap();

        let program = graph.compile().unwrap();
        assert_eq!(program.vertex_entry, "vertex");
        assert!(program.vertex_source.contains("fn vertex("));
        assert!(program.fragment_source.contains("fn fragment() -> @location(0) vec4<f32> {"));
        assert!(program.fragment_source.contains("color_out = vec4<f32>(1.0, 0.0, 0.0, 1.0);"));
    }

    #[test]
    fn same_name_uniforms_of_different_types_conflict() {
        let mut graph = ShaderGraph::new(registry());
        let position = graph.attribute("position", ShaderType::Vec3).unwrap();
        let tint_matrix = graph.uniform("tint", Mat4::IDENTITY).unwrap();
        let clip = graph
            .call("transform")
            .unwrap()
            .input("matrix", tint_matrix)
            .unwrap()
            .input("position", position)
            .unwrap()
            .finish();
        graph.set_vertex_root(clip).unwrap();
        let tint = graph.uniform("tint", Vec4::ONE).unwrap();
        graph.set_fragment_root(tint).unwrap();

        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::ConflictingDeclaration { name, .. }) if name == "tint"
        ));
    }

    #[test]
    fn uniform_and_texture_names_must_differ() {
        let mut graph = ShaderGraph::new(registry());
        let position = graph.attribute("position", ShaderType::Vec4).unwrap();
        let uv = graph.attribute("uv", ShaderType::Vec2).unwrap();
        graph.set_vertex_root(position).unwrap().set_vary("v_uv", uv).unwrap();
        let v_uv = graph.vary("v_uv").unwrap();
        let fetched = graph.texture_fetch("albedo", v_uv).unwrap();
        let albedo = graph.uniform("albedo", Vec3::ONE).unwrap();
        let shaded = graph
            .call("shade")
            .unwrap()
            .input("base", fetched)
            .unwrap()
            .input("tint", albedo)
            .unwrap()
            .finish();
        graph.set_fragment_root(shaded).unwrap();

        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::ConflictingDeclaration { .. })
        ));
    }

    #[test]
    fn shared_uniform_is_declared_once() {
        let mut graph = ShaderGraph::new(registry());
        let color = graph.uniform("color", Vec4::ONE).unwrap();
        graph.set_vertex_root(color).unwrap();
        let same = graph.uniform("color", Vec4::ONE).unwrap();
        graph.set_fragment_root(same).unwrap();

        let program = graph.compile().unwrap();
        assert_eq!(program.uniforms.len(), 1);
        assert_eq!(program.vertex_source.matches("var<uniform> color").count(), 1);
        assert!(program.fragment_source.contains("frag_color = color;"));
    }

    #[test]
    fn user_uniform_cannot_take_an_engine_uniform_name() {
        let mut graph = ShaderGraph::new(registry());
        let position = graph.attribute("position", ShaderType::Vec4).unwrap();
        graph.set_vertex_root(position).unwrap();
        let time = graph.inner_uniform(InnerUniform::Time);
        let spoof = graph.uniform(InnerUniform::Time.name(), 2.0).unwrap();
        let color = graph.vec4(&[time, spoof, time, spoof]).unwrap();
        graph.set_fragment_root(color).unwrap();

        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::ConflictingDeclaration { name, .. }) if name == "inner_time"
        ));
    }

    #[test]
    fn missing_roots_are_reported_per_stage() {
        let mut graph = ShaderGraph::new(registry());
        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::MissingRoot { stage: crate::shader_graph::Stage::Vertex })
        ));
        let position = graph.attribute("position", ShaderType::Vec4).unwrap();
        graph.set_vertex_root(position).unwrap();
        assert!(matches!(
            graph.compile(),
            Err(ShaderGraphError::MissingRoot { stage: crate::shader_graph::Stage::Fragment })
        ));
    }
}

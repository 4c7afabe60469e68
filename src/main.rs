//! Demo: an animated plasma rendered offscreen, a half-resolution glow extracted from it, and a
//! composite on screen. Press `D` to show every target side by side.

use std::sync::Arc;

use phalanx::{
    AppConfig, FullscreenQuad, InnerUniform, NodeId, PassNode, ProgramDescriptor, RenderGraph,
    RenderTargetNode, ShaderFunctionRegistry, ShaderGraph, ShaderGraphError, ShaderType,
    WgpuBackend,
};

/// Shared vertex stage: pass the quad through and hand its uv to the fragment stage.
fn quad_vertex_stage(graph: &mut ShaderGraph) -> Result<NodeId, ShaderGraphError> {
    let position = graph.attribute("position", ShaderType::Vec3)?;
    let one = graph.constant(1.0)?;
    let clip = graph.vec4(&[position, one])?;
    let uv = graph.attribute("uv", ShaderType::Vec2)?;
    graph.set_vertex_root(clip)?.set_vary("v_uv", uv)?;
    graph.vary("v_uv")
}

fn scene_program(registry: &Arc<ShaderFunctionRegistry>) -> Result<ProgramDescriptor, ShaderGraphError> {
    let mut graph = ShaderGraph::new(registry.clone());
    let uv = quad_vertex_stage(&mut graph)?;
    let time = graph.inner_uniform(InnerUniform::Time);
    let plasma = graph
        .call("plasma")?
        .name("plasma")?
        .input("uv", uv)?
        .input("time", time)?
        .finish();
    graph.set_fragment_root(plasma)?;
    graph.compile()
}

fn glow_program(registry: &Arc<ShaderFunctionRegistry>) -> Result<ProgramDescriptor, ShaderGraphError> {
    let mut graph = ShaderGraph::new(registry.clone());
    let uv = quad_vertex_stage(&mut graph)?;
    let scene = graph.texture_fetch("scene", uv)?;
    let threshold = graph.uniform("threshold", 0.6)?;
    let bright = graph
        .call("bright_pass")?
        .input("color", scene)?
        .input("threshold", threshold)?
        .finish();
    graph.set_fragment_root(bright)?;
    graph.compile()
}

fn composite_program(
    registry: &Arc<ShaderFunctionRegistry>,
) -> Result<ProgramDescriptor, ShaderGraphError> {
    let mut graph = ShaderGraph::new(registry.clone());
    let uv = quad_vertex_stage(&mut graph)?;
    let scene = graph.texture_fetch("scene", uv)?;
    let glow = graph.texture_fetch("glow", uv)?;
    let amount = graph.uniform("glow_amount", 0.8)?;
    let strength = graph.uniform("vignette_strength", 0.6)?;
    let lit = graph
        .call("add_glow")?
        .input("base", scene)?
        .input("glow", glow)?
        .input("amount", amount)?
        .finish();
    let framed = graph
        .call("vignette")?
        .input("color", lit)?
        .input("uv", uv)?
        .input("strength", strength)?
        .finish();
    graph.set_fragment_root(framed)?;
    graph.compile()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = Arc::new(ShaderFunctionRegistry::from_json(include_str!(
        "shaders/library.json"
    ))?);
    let scene = scene_program(&registry)?;
    let glow = glow_program(&registry)?;
    let composite = composite_program(&registry)?;
    log::debug!("composite fragment stage:\n{}", composite.fragment_source);

    phalanx::run(
        AppConfig::new().title("Phalanx").size(1280, 720),
        move |backend: &mut WgpuBackend| {
            let layout = FullscreenQuad::layout();

            let mut graph = RenderGraph::<WgpuBackend>::new();
            graph
                .add_target(RenderTargetNode::new("scene").depth(false))?
                .add_target(RenderTargetNode::new("glow").relative(0.5, 0.5).depth(false))?;
            graph
                .add_pass(
                    PassNode::new("scene")
                        .output("scene")
                        .override_shading(backend.create_program("scene", &scene, &layout)?)
                        .source(FullscreenQuad::new(backend)),
                )?
                .add_pass(
                    PassNode::new("glow")
                        .output("glow")
                        .input("scene", "scene")
                        .override_shading(backend.create_program("glow", &glow, &layout)?)
                        .source(FullscreenQuad::new(backend)),
                )?
                .add_pass(
                    PassNode::new("composite")
                        .input("scene", "scene")
                        .input("glow", "glow")
                        .override_shading(backend.create_program(
                            "composite",
                            &composite,
                            &layout,
                        )?)
                        .source(FullscreenQuad::new(backend)),
                )?;
            Ok(graph.build()?)
        },
    )?;
    Ok(())
}

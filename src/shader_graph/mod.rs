//! Shader graph: a typed DAG of shading operations compiled to WGSL.
//!
//! A [`ShaderGraph`] describes one vertex + fragment program as interconnected nodes instead of
//! hand-written source. Function nodes invoke reusable [`ShaderFunction`]s from an explicit
//! [`ShaderFunctionRegistry`]; leaves feed them attributes, uniforms, constants and values
//! passed between stages.
//!
//! # Compilation
//!
//! ```text
//!  attribute(position) ──▶ vec4(position, 1.0) ──▶ vertex root ──▶ vs_main
//!  attribute(uv) ─────────────────────────────────▶ vary "v_uv"
//!
//!  vary(v_uv) ──▶ fetch(scene) ──▶ tint(color, amount) ──▶ fragment root ──▶ fs_main
//!                       uniform(amount) ──┘
//! ```
//!
//! [`ShaderGraph::compile`] walks each stage in dependency order and emits:
//!
//! 1. one declaration per distinct function definition (deduplicated by name);
//! 2. one `let` temporary per operation node, named after the node's arena index;
//! 3. a final assignment of the stage root to the stage output.
//!
//! Type checking happens when edges are bound, so compilation only has to reject structural
//! problems: unbound slots, cycles, and nodes used in the wrong stage.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use phalanx::{ShaderFunction, ShaderFunctionRegistry, ShaderGraph, ShaderType};
//!
//! let mut registry = ShaderFunctionRegistry::new();
//! registry.register(
//!     ShaderFunction::new("tint", ShaderType::Vec4)
//!         .input("color", ShaderType::Vec4)
//!         .input("amount", ShaderType::Float)
//!         .body("return color * amount;"),
//! )?;
//!
//! let mut graph = ShaderGraph::new(Arc::new(registry));
//! let position = graph.attribute("position", ShaderType::Vec3)?;
//! let one = graph.constant(1.0)?;
//! let clip = graph.vec4(&[position, one])?;
//! let uv = graph.attribute("uv", ShaderType::Vec2)?;
//! graph.set_vertex_root(clip)?.set_vary("v_uv", uv)?;
//!
//! let v_uv = graph.vary("v_uv")?;
//! let color = graph.texture_fetch("scene", v_uv)?;
//! let amount = graph.uniform("amount", 0.5)?;
//! let tinted = graph
//!     .call("tint")?
//!     .input("color", color)?
//!     .input("amount", amount)?
//!     .finish();
//! graph.set_fragment_root(tinted)?;
//!
//! let program = graph.compile()?;
//! assert!(program.fragment_source.contains("frag_color = tint("));
//! # Ok::<(), phalanx::ShaderGraphError>(())
//! ```

mod codegen;
mod function;
mod graph;
mod node;
mod program;
mod types;

pub use codegen::CodegenOptions;
pub use function::{FunctionInput, ShaderFunction, ShaderFunctionRegistry};
pub use graph::{FunctionNodeBuilder, ShaderGraph};
pub use node::{FunctionNode, InnerUniform, NodeId, ShaderNode};
pub use program::{
    AttributeDescriptor, ProgramDescriptor, TEXTURE_GROUP, TextureDescriptor, UNIFORM_GROUP,
    UniformDescriptor, VaryingDescriptor,
};
pub use types::{ShaderType, ShaderValue, uniform_buffer_size};

use thiserror::Error;

/// Pipeline stage a node is generated into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Errors raised while building or compiling a shader graph.
#[derive(Debug, Error)]
pub enum ShaderGraphError {
    #[error("type mismatch for {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: ShaderType,
        found: ShaderType,
    },
    #[error("{node}: input '{slot}' of function '{function}' is not bound")]
    MissingBinding {
        node: String,
        function: String,
        slot: String,
    },
    #[error("dependency cycle through {node}")]
    GraphCycle { node: String },
    #[error("{referenced_by} references {node}, which is not part of the compiled graph")]
    DanglingReference { node: String, referenced_by: String },
    #[error("function '{function}' has no input named '{slot}'")]
    UnknownInputSlot { function: String, slot: String },
    #[error("no shader function named '{function}' is registered")]
    UnknownFunction { function: String },
    #[error("shader function '{function}' is already registered")]
    DuplicateFunction { function: String },
    #[error("invalid shader function '{function}': {reason}")]
    InvalidFunction { function: String, reason: String },
    #[error("'{name}' is not a valid identifier")]
    InvalidIdentifier { name: String },
    #[error("{context} is not finite; WGSL cannot express NaN or infinity")]
    NonFiniteValue { context: String },
    #[error("invalid swizzle '.{mask}': {reason}")]
    InvalidSwizzle { mask: String, reason: String },
    #[error("cannot build {ty} from {components} components")]
    CombineArity { ty: ShaderType, components: usize },
    #[error("no vary slot named '{name}'")]
    UnknownVary { name: String },
    #[error("the {stage} root is not set")]
    MissingRoot { stage: Stage },
    #[error("{node} cannot be used in the {stage} stage")]
    StageMismatch { node: String, stage: Stage },
    #[error("'{name}' is declared as both {first} and {second}")]
    ConflictingDeclaration {
        name: String,
        first: String,
        second: String,
    },
    #[error("node id does not belong to this shader graph")]
    ForeignNode,
    #[error("failed to parse shader function library: {0}")]
    FunctionLibrary(#[from] serde_json::Error),
}

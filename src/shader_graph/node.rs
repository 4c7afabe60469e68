//! Shader node variants.
//!
//! Nodes form a closed set so code generation can match on them exhaustively. Leaves
//! (attributes, uniforms, vary reads and constants) have no dependencies and are referenced by
//! name or as an inlined literal; every other variant produces a temporary.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dag::NodeIndex;
use crate::shader_graph::{ShaderFunction, ShaderGraphError, ShaderType, ShaderValue};

/// Handle to a node in a specific [`ShaderGraph`](crate::ShaderGraph).
///
/// Ids remember which graph (and which reset generation of it) issued them, so a stale or
/// foreign id is rejected instead of silently aliasing another node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) graph: u64,
    pub(crate) index: NodeIndex,
}

impl NodeId {
    /// Arena index; also the suffix of the node's generated variable name.
    pub fn index(self) -> usize {
        self.index.index()
    }
}

/// Engine-provided uniforms the backend fills before each draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InnerUniform {
    ModelMatrix,
    ViewProjectionMatrix,
    InverseViewProjectionMatrix,
    LastViewProjectionMatrix,
    CameraWorldPosition,
    Resolution,
    Time,
}

impl InnerUniform {
    pub const ALL: [InnerUniform; 7] = [
        InnerUniform::ModelMatrix,
        InnerUniform::ViewProjectionMatrix,
        InnerUniform::InverseViewProjectionMatrix,
        InnerUniform::LastViewProjectionMatrix,
        InnerUniform::CameraWorldPosition,
        InnerUniform::Resolution,
        InnerUniform::Time,
    ];

    /// Name of the uniform in generated source.
    pub fn name(self) -> &'static str {
        match self {
            InnerUniform::ModelMatrix => "inner_model_matrix",
            InnerUniform::ViewProjectionMatrix => "inner_view_projection",
            InnerUniform::InverseViewProjectionMatrix => "inner_view_projection_inverse",
            InnerUniform::LastViewProjectionMatrix => "inner_last_view_projection",
            InnerUniform::CameraWorldPosition => "inner_camera_world_position",
            InnerUniform::Resolution => "inner_resolution",
            InnerUniform::Time => "inner_time",
        }
    }

    pub fn ty(self) -> ShaderType {
        match self {
            InnerUniform::ModelMatrix
            | InnerUniform::ViewProjectionMatrix
            | InnerUniform::InverseViewProjectionMatrix
            | InnerUniform::LastViewProjectionMatrix => ShaderType::Mat4,
            InnerUniform::CameraWorldPosition => ShaderType::Vec3,
            InnerUniform::Resolution => ShaderType::Vec2,
            InnerUniform::Time => ShaderType::Float,
        }
    }
}

/// A node invoking a registered [`ShaderFunction`].
#[derive(Clone, Debug)]
pub struct FunctionNode {
    pub(crate) function: Arc<ShaderFunction>,
    pub(crate) inputs: IndexMap<String, NodeIndex>,
    pub(crate) label: Option<String>,
}

impl FunctionNode {
    pub(crate) fn new(function: Arc<ShaderFunction>) -> Self {
        Self {
            function,
            inputs: IndexMap::new(),
            label: None,
        }
    }

    pub fn function(&self) -> &ShaderFunction {
        &self.function
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Bound inputs in the definition's parameter order; unbound slots are skipped.
    pub(crate) fn ordered_inputs(&self) -> Vec<NodeIndex> {
        self.function
            .inputs
            .iter()
            .filter_map(|input| self.inputs.get(&input.name).copied())
            .collect()
    }
}

/// A node of the shader graph.
#[derive(Clone, Debug)]
pub enum ShaderNode {
    Function(FunctionNode),
    Attribute {
        name: String,
        ty: ShaderType,
    },
    Uniform {
        name: String,
        default: ShaderValue,
    },
    InnerUniform(InnerUniform),
    /// Fragment-stage read of a value passed from the vertex stage.
    Vary {
        name: String,
        ty: ShaderType,
    },
    TextureFetch {
        texture: String,
        coord: NodeIndex,
    },
    Const(ShaderValue),
    Combine {
        ty: ShaderType,
        parts: Vec<NodeIndex>,
    },
    Swizzle {
        source: NodeIndex,
        mask: String,
        ty: ShaderType,
    },
}

impl ShaderNode {
    pub fn ty(&self) -> ShaderType {
        match self {
            ShaderNode::Function(node) => node.function.return_type,
            ShaderNode::Attribute { ty, .. } => *ty,
            ShaderNode::Uniform { default, .. } => default.ty(),
            ShaderNode::InnerUniform(inner) => inner.ty(),
            ShaderNode::Vary { ty, .. } => *ty,
            ShaderNode::TextureFetch { .. } => ShaderType::Vec4,
            ShaderNode::Const(value) => value.ty(),
            ShaderNode::Combine { ty, .. } => *ty,
            ShaderNode::Swizzle { ty, .. } => *ty,
        }
    }

    /// Leaves are referenced in place and never get a temporary.
    pub fn is_leaf(&self) -> bool {
        match self {
            ShaderNode::Attribute { .. }
            | ShaderNode::Uniform { .. }
            | ShaderNode::InnerUniform(_)
            | ShaderNode::Vary { .. }
            | ShaderNode::Const(_) => true,
            ShaderNode::Function(_)
            | ShaderNode::TextureFetch { .. }
            | ShaderNode::Combine { .. }
            | ShaderNode::Swizzle { .. } => false,
        }
    }

    /// Outgoing dependency edges in argument order.
    pub(crate) fn dependencies(&self) -> Vec<NodeIndex> {
        match self {
            ShaderNode::Function(node) => node.ordered_inputs(),
            ShaderNode::TextureFetch { coord, .. } => vec![*coord],
            ShaderNode::Combine { parts, .. } => parts.clone(),
            ShaderNode::Swizzle { source, .. } => vec![*source],
            ShaderNode::Attribute { .. }
            | ShaderNode::Uniform { .. }
            | ShaderNode::InnerUniform(_)
            | ShaderNode::Vary { .. }
            | ShaderNode::Const(_) => Vec::new(),
        }
    }

    /// Short description used in error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            ShaderNode::Function(node) => match &node.label {
                Some(label) => format!("function '{}' ({label})", node.function.name),
                None => format!("function '{}'", node.function.name),
            },
            ShaderNode::Attribute { name, .. } => format!("attribute '{name}'"),
            ShaderNode::Uniform { name, .. } => format!("uniform '{name}'"),
            ShaderNode::InnerUniform(inner) => format!("uniform '{}'", inner.name()),
            ShaderNode::Vary { name, .. } => format!("vary '{name}'"),
            ShaderNode::TextureFetch { texture, .. } => format!("fetch of texture '{texture}'"),
            ShaderNode::Const(value) => format!("constant {}", value.to_wgsl()),
            ShaderNode::Combine { ty, .. } => format!("{ty} combine"),
            ShaderNode::Swizzle { mask, .. } => format!("swizzle '.{mask}'"),
        }
    }
}

/// Validates a swizzle mask against a source type and returns the resulting type.
pub(crate) fn swizzle_type(source: ShaderType, mask: &str) -> Result<ShaderType, ShaderGraphError> {
    let invalid = |reason: &str| ShaderGraphError::InvalidSwizzle {
        mask: mask.to_string(),
        reason: reason.to_string(),
    };

    let Some(arity) = source.components().filter(|_| source.is_vector()) else {
        return Err(invalid("only vectors can be swizzled"));
    };
    if mask.is_empty() {
        return Err(invalid("mask is empty"));
    }
    if mask.chars().count() > 4 {
        return Err(invalid("mask is longer than 4 components"));
    }

    const SETS: [&str; 2] = ["xyzw", "rgba"];
    let Some(set) = SETS
        .iter()
        .find(|set| mask.chars().all(|c| set.contains(c)))
    else {
        return Err(invalid("components must all come from xyzw or all from rgba"));
    };
    for c in mask.chars() {
        let component = set.find(c).unwrap_or(usize::MAX);
        if component >= arity {
            return Err(invalid(&format!("component '{c}' is out of range for {source}")));
        }
    }

    ShaderType::with_components(mask.chars().count())
        .ok_or_else(|| invalid("mask is longer than 4 components"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_type_follows_mask_length() {
        assert_eq!(swizzle_type(ShaderType::Vec4, "x").unwrap(), ShaderType::Float);
        assert_eq!(swizzle_type(ShaderType::Vec4, "xy").unwrap(), ShaderType::Vec2);
        assert_eq!(swizzle_type(ShaderType::Vec4, "rgb").unwrap(), ShaderType::Vec3);
        assert_eq!(swizzle_type(ShaderType::Vec2, "yxyx").unwrap(), ShaderType::Vec4);
    }

    #[test]
    fn swizzle_rejects_bad_masks() {
        assert!(swizzle_type(ShaderType::Vec4, "xyzwx").is_err());
        assert!(swizzle_type(ShaderType::Vec4, "").is_err());
        assert!(swizzle_type(ShaderType::Vec4, "xg").is_err());
        assert!(swizzle_type(ShaderType::Vec2, "z").is_err());
        assert!(swizzle_type(ShaderType::Float, "x").is_err());
        assert!(swizzle_type(ShaderType::Mat4, "x").is_err());
    }

    #[test]
    fn inner_uniform_names_are_unique() {
        for (i, a) in InnerUniform::ALL.iter().enumerate() {
            for b in &InnerUniform::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }
}

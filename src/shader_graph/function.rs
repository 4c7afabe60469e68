//! Named, typed shader function definitions and the registry that owns them.
//!
//! A [`ShaderFunction`] is the reusable operation a function node invokes. Its body is opaque
//! WGSL copied verbatim into the generated declaration:
//!
//! ```
//! use phalanx::{ShaderFunction, ShaderFunctionRegistry, ShaderType};
//!
//! let mut registry = ShaderFunctionRegistry::new();
//! registry
//!     .register(
//!         ShaderFunction::new("tint", ShaderType::Vec4)
//!             .input("color", ShaderType::Vec4)
//!             .input("amount", ShaderType::Float)
//!             .body("return color * amount;"),
//!     )
//!     .unwrap();
//! ```
//!
//! Registries are built once at startup and then shared with shader graphs through an `Arc`,
//! which freezes them: nothing can register into a shared registry.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::shader_graph::{ShaderGraphError, ShaderType};

/// A named, typed input parameter of a [`ShaderFunction`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInput {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ShaderType,
}

/// A reusable shading operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderFunction {
    pub name: String,
    #[serde(rename = "returnType")]
    pub return_type: ShaderType,
    #[serde(default)]
    pub inputs: Vec<FunctionInput>,
    pub body: String,
}

impl ShaderFunction {
    pub fn new(name: impl Into<String>, return_type: ShaderType) -> Self {
        Self {
            name: name.into(),
            return_type,
            inputs: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends an input parameter.
    pub fn input(mut self, name: impl Into<String>, ty: ShaderType) -> Self {
        self.inputs.push(FunctionInput {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Declared type of the input named `name`.
    pub fn input_type(&self, name: &str) -> Option<ShaderType> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.ty)
    }

    fn validate(&self) -> Result<(), ShaderGraphError> {
        let invalid = |reason: String| ShaderGraphError::InvalidFunction {
            function: self.name.clone(),
            reason,
        };

        if !is_identifier(&self.name) {
            return Err(invalid("name is not a valid identifier".into()));
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if !is_identifier(&input.name) {
                return Err(invalid(format!(
                    "input '{}' is not a valid identifier",
                    input.name
                )));
            }
            if self.inputs[..i].iter().any(|other| other.name == input.name) {
                return Err(invalid(format!("input '{}' is declared twice", input.name)));
            }
        }
        Ok(())
    }
}

/// Explicit name → definition registry.
#[derive(Clone, Debug, Default)]
pub struct ShaderFunctionRegistry {
    functions: IndexMap<String, Arc<ShaderFunction>>,
}

impl ShaderFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON array of function records:
    /// `[{ "name", "returnType", "inputs": [{ "name", "type" }], "body" }]`.
    pub fn from_json(json: &str) -> Result<Self, ShaderGraphError> {
        let functions: Vec<ShaderFunction> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for function in functions {
            registry.register(function)?;
        }
        Ok(registry)
    }

    /// Adds a definition. Names are unique.
    pub fn register(
        &mut self,
        function: ShaderFunction,
    ) -> Result<Arc<ShaderFunction>, ShaderGraphError> {
        function.validate()?;
        if self.functions.contains_key(&function.name) {
            return Err(ShaderGraphError::DuplicateFunction {
                function: function.name,
            });
        }
        log::trace!("registered shader function '{}'", function.name);
        let function = Arc::new(function);
        self.functions
            .insert(function.name.clone(), Arc::clone(&function));
        Ok(function)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ShaderFunction>> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ShaderFunction>> {
        self.functions.values()
    }
}

/// WGSL keywords and reserved words.
const RESERVED_WORDS: &[&str] = &[
    "alias", "break", "case", "const", "const_assert", "continue", "continuing", "default",
    "diagnostic", "discard", "else", "enable", "false", "fn", "for", "if", "let", "loop",
    "override", "requires", "return", "struct", "switch", "true", "var", "while", "NULL", "Self",
    "abstract", "active", "alignas", "alignof", "as", "asm", "asm_fragment", "async",
    "attribute", "auto", "await", "become", "cast", "catch", "class", "co_await", "co_return",
    "co_yield", "coherent", "column_major", "common", "compile", "compile_fragment", "concept",
    "const_cast", "consteval", "constexpr", "constinit", "crate", "debugger", "decltype",
    "delete", "demote", "demote_to_helper", "do", "dynamic_cast", "enum", "explicit", "export",
    "extends", "extern", "external", "fallthrough", "filter", "final", "finally", "friend",
    "from", "fxgroup", "get", "goto", "groupshared", "highp", "impl", "implements", "import",
    "inline", "instanceof", "interface", "layout", "lowp", "macro", "macro_rules", "match",
    "mediump", "meta", "mod", "module", "move", "mut", "mutable", "namespace", "new", "nil",
    "noexcept", "noinline", "nointerpolation", "non_coherent", "noncoherent", "noperspective",
    "null", "nullptr", "of", "operator", "package", "packoffset", "partition", "pass", "patch",
    "pixelfragment", "precise", "precision", "premerge", "priv", "protected", "pub", "public",
    "readonly", "ref", "regardless", "register", "reinterpret_cast", "require", "resource",
    "restrict", "self", "set", "shared", "sizeof", "smooth", "snorm", "static", "static_assert",
    "static_cast", "std", "subroutine", "super", "target", "template", "this", "thread_local",
    "throw", "trait", "try", "type", "typedef", "typeid", "typename", "typeof", "union",
    "unless", "unorm", "unsafe", "unsized", "use", "using", "varying", "virtual", "volatile",
    "wgsl", "where", "with", "writeonly", "yield",
];

/// Predeclared names the generated modules refer to; a declaration with one of these names
/// would shadow it.
const GENERATED_CODE_NAMES: &[&str] = &[
    "f32", "vec2", "vec3", "vec4", "mat3x3", "mat4x4", "sampler", "texture_2d", "textureSample",
    "textureSampleLevel",
];

/// Whether `name` can name a user declaration in generated WGSL.
///
/// Names start with an ASCII letter; a leading underscore is reserved for generated
/// temporaries.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_WORDS.contains(&name)
        && !GENERATED_CODE_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix() -> ShaderFunction {
        ShaderFunction::new("mix_colors", ShaderType::Vec4)
            .input("a", ShaderType::Vec4)
            .input("b", ShaderType::Vec4)
            .input("t", ShaderType::Float)
            .body("return mix(a, b, t);")
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ShaderFunctionRegistry::new();
        registry.register(mix()).unwrap();
        let function = registry.get("mix_colors").unwrap();
        assert_eq!(function.input_type("t"), Some(ShaderType::Float));
        assert_eq!(function.input_type("missing"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ShaderFunctionRegistry::new();
        registry.register(mix()).unwrap();
        let err = registry.register(mix()).unwrap_err();
        assert!(matches!(err, ShaderGraphError::DuplicateFunction { function } if function == "mix_colors"));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let mut registry = ShaderFunctionRegistry::new();
        let err = registry
            .register(ShaderFunction::new("2bad", ShaderType::Float))
            .unwrap_err();
        assert!(matches!(err, ShaderGraphError::InvalidFunction { .. }));

        let err = registry
            .register(
                ShaderFunction::new("twice", ShaderType::Float)
                    .input("x", ShaderType::Float)
                    .input("x", ShaderType::Float),
            )
            .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn loads_function_library_from_json() {
        let json = r#"[
            {
                "name": "luminance",
                "returnType": "f32",
                "inputs": [{ "name": "color", "type": "vec3" }],
                "body": "return dot(color, vec3<f32>(0.2126, 0.7152, 0.0722));"
            },
            { "name": "one", "returnType": "f32", "body": "return 1.0;" }
        ]"#;
        let registry = ShaderFunctionRegistry::from_json(json).unwrap();
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["luminance", "one"]);
        assert!(registry.get("one").unwrap().inputs.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = ShaderFunctionRegistry::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ShaderGraphError::FunctionLibrary(_)));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("v_uv"));
        assert!(is_identifier("letter"));
        assert!(!is_identifier("_private"));
        assert!(!is_identifier("_"));
        assert!(!is_identifier("__reserved"));
        assert!(!is_identifier("has space"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn wgsl_keywords_and_reserved_words_are_not_identifiers() {
        for name in ["let", "fn", "var", "loop", "struct", "return", "enum", "self"] {
            assert!(!is_identifier(name), "{name} accepted");
        }
        assert!(!is_identifier("vec4"));
        assert!(!is_identifier("textureSample"));

        let mut registry = ShaderFunctionRegistry::new();
        let err = registry
            .register(ShaderFunction::new("loop", ShaderType::Float).body("return 1.0;"))
            .unwrap_err();
        assert!(matches!(err, ShaderGraphError::InvalidFunction { function, .. } if function == "loop"));

        let err = registry
            .register(
                ShaderFunction::new("scale", ShaderType::Float)
                    .input("let", ShaderType::Float)
                    .body("return 2.0;"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("input 'let'"));
    }
}

//! Value types flowing along shader graph edges.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// The type of a value produced by a shader node or expected by a function input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderType {
    #[serde(rename = "f32")]
    Float,
    #[serde(rename = "vec2")]
    Vec2,
    #[serde(rename = "vec3")]
    Vec3,
    #[serde(rename = "vec4")]
    Vec4,
    #[serde(rename = "mat3")]
    Mat3,
    #[serde(rename = "mat4")]
    Mat4,
}

impl ShaderType {
    /// The WGSL spelling of this type.
    pub fn wgsl(self) -> &'static str {
        match self {
            ShaderType::Float => "f32",
            ShaderType::Vec2 => "vec2<f32>",
            ShaderType::Vec3 => "vec3<f32>",
            ShaderType::Vec4 => "vec4<f32>",
            ShaderType::Mat3 => "mat3x3<f32>",
            ShaderType::Mat4 => "mat4x4<f32>",
        }
    }

    /// Number of scalar components for scalars and vectors, `None` for matrices.
    pub fn components(self) -> Option<usize> {
        match self {
            ShaderType::Float => Some(1),
            ShaderType::Vec2 => Some(2),
            ShaderType::Vec3 => Some(3),
            ShaderType::Vec4 => Some(4),
            ShaderType::Mat3 | ShaderType::Mat4 => None,
        }
    }

    /// The scalar or vector type with `components` components.
    pub fn with_components(components: usize) -> Option<Self> {
        match components {
            1 => Some(ShaderType::Float),
            2 => Some(ShaderType::Vec2),
            3 => Some(ShaderType::Vec3),
            4 => Some(ShaderType::Vec4),
            _ => None,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, ShaderType::Vec2 | ShaderType::Vec3 | ShaderType::Vec4)
    }
}

impl std::fmt::Display for ShaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wgsl())
    }
}

/// A literal value: constant node payloads and uniform defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShaderValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl ShaderValue {
    pub fn ty(&self) -> ShaderType {
        match self {
            ShaderValue::Float(_) => ShaderType::Float,
            ShaderValue::Vec2(_) => ShaderType::Vec2,
            ShaderValue::Vec3(_) => ShaderType::Vec3,
            ShaderValue::Vec4(_) => ShaderType::Vec4,
            ShaderValue::Mat3(_) => ShaderType::Mat3,
            ShaderValue::Mat4(_) => ShaderType::Mat4,
        }
    }

    /// The zero value of `ty`, identity for matrices.
    pub fn default_for(ty: ShaderType) -> Self {
        match ty {
            ShaderType::Float => ShaderValue::Float(0.0),
            ShaderType::Vec2 => ShaderValue::Vec2(Vec2::ZERO),
            ShaderType::Vec3 => ShaderValue::Vec3(Vec3::ZERO),
            ShaderType::Vec4 => ShaderValue::Vec4(Vec4::ZERO),
            ShaderType::Mat3 => ShaderValue::Mat3(Mat3::IDENTITY),
            ShaderType::Mat4 => ShaderValue::Mat4(Mat4::IDENTITY),
        }
    }

    /// Scalars in column-major order.
    pub fn scalars(&self) -> Vec<f32> {
        match self {
            ShaderValue::Float(v) => vec![*v],
            ShaderValue::Vec2(v) => v.to_array().to_vec(),
            ShaderValue::Vec3(v) => v.to_array().to_vec(),
            ShaderValue::Vec4(v) => v.to_array().to_vec(),
            ShaderValue::Mat3(m) => m.to_cols_array().to_vec(),
            ShaderValue::Mat4(m) => m.to_cols_array().to_vec(),
        }
    }

    /// WGSL has no literal for NaN or infinity.
    pub fn is_finite(&self) -> bool {
        self.scalars().iter().all(|v| v.is_finite())
    }

    /// Inline WGSL literal, e.g. `vec3<f32>(1.0, 0.5, 0.0)`.
    pub fn to_wgsl(&self) -> String {
        let scalars: Vec<String> = self.scalars().into_iter().map(float_literal).collect();
        match self {
            ShaderValue::Float(_) => scalars.join(""),
            _ => format!("{}({})", self.ty().wgsl(), scalars.join(", ")),
        }
    }

    /// Bytes laid out for a standalone `var<uniform>` of this type.
    ///
    /// Matrix columns are padded to 16 bytes; the result is padded to a multiple of 16.
    pub fn to_uniform_bytes(&self) -> Vec<u8> {
        let mut floats: Vec<f32> = match self {
            ShaderValue::Mat3(m) => m
                .to_cols_array_2d()
                .iter()
                .flat_map(|col| [col[0], col[1], col[2], 0.0])
                .collect(),
            _ => self.scalars(),
        };
        while floats.len() % 4 != 0 {
            floats.push(0.0);
        }
        bytemuck::cast_slice(&floats).to_vec()
    }
}

/// Size in bytes of the uniform buffer backing a value of `ty`.
pub fn uniform_buffer_size(ty: ShaderType) -> u64 {
    match ty {
        ShaderType::Float | ShaderType::Vec2 | ShaderType::Vec3 | ShaderType::Vec4 => 16,
        ShaderType::Mat3 => 48,
        ShaderType::Mat4 => 64,
    }
}

fn float_literal(value: f32) -> String {
    // Debug keeps a decimal point or exponent, which WGSL needs to read a float.
    format!("{value:?}")
}

impl From<f32> for ShaderValue {
    fn from(v: f32) -> Self {
        ShaderValue::Float(v)
    }
}

impl From<Vec2> for ShaderValue {
    fn from(v: Vec2) -> Self {
        ShaderValue::Vec2(v)
    }
}

impl From<Vec3> for ShaderValue {
    fn from(v: Vec3) -> Self {
        ShaderValue::Vec3(v)
    }
}

impl From<Vec4> for ShaderValue {
    fn from(v: Vec4) -> Self {
        ShaderValue::Vec4(v)
    }
}

impl From<Mat3> for ShaderValue {
    fn from(m: Mat3) -> Self {
        ShaderValue::Mat3(m)
    }
}

impl From<Mat4> for ShaderValue {
    fn from(m: Mat4) -> Self {
        ShaderValue::Mat4(m)
    }
}

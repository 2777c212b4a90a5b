//! Parsed-preset interchange object.
//!
//! Grammar parsing is an external collaborator; the engine only consumes its
//! result. A [`ParsedPreset`] is the flattened parameter bag plus the code
//! and shader source blocks, with typed getters that apply Milkdrop-style
//! defaults when a key is absent or malformed.

use std::collections::HashMap;
use std::fmt;

use crate::EngineError;

/// Number of custom waveform blocks in a preset.
pub const CUSTOM_WAVEFORM_COUNT: usize = 4;

/// Number of custom shape blocks in a preset.
pub const CUSTOM_SHAPE_COUNT: usize = 4;

/// Code blocks of one custom waveform.
#[derive(Debug, Default, Clone)]
pub struct WaveBlock {
    pub params: HashMap<String, String>,
    pub init_code: String,
    pub per_frame_code: String,
    pub per_point_code: String,
}

/// Code blocks of one custom shape.
#[derive(Debug, Default, Clone)]
pub struct ShapeBlock {
    pub params: HashMap<String, String>,
    pub init_code: String,
    pub per_frame_code: String,
}

/// A fully parsed preset file.
#[derive(Debug, Default, Clone)]
pub struct ParsedPreset {
    /// Top-level `key=value` parameters.
    pub params: HashMap<String, String>,

    pub per_frame_init_code: String,
    pub per_frame_code: String,
    pub per_pixel_code: String,

    /// Warp shader source, if the preset carries one.
    pub warp_shader: Option<String>,
    /// Composite shader source, if the preset carries one.
    pub composite_shader: Option<String>,

    pub waves: Vec<WaveBlock>,
    pub shapes: Vec<ShapeBlock>,
}

impl ParsedPreset {
    pub fn f64(&self, key: &str, default: f64) -> f64 {
        param_f64(&self.params, key, default)
    }

    pub fn i32(&self, key: &str, default: i32) -> i32 {
        param_i32(&self.params, key, default)
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        param_bool(&self.params, key, default)
    }
}

/// Typed lookup helpers shared by the top-level bag and the per-block bags.
pub fn param_f64(params: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

pub fn param_i32(params: &HashMap<String, String>, key: &str, default: i32) -> i32 {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|v| v as i32)
        .unwrap_or(default)
}

pub fn param_bool(params: &HashMap<String, String>, key: &str, default: bool) -> bool {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|v| v != 0.0)
        .unwrap_or(default)
}

/// The external preset parser.
///
/// `parse` receives the raw file bytes that the CPU worker staged; `load_url`
/// handles every non-`file` protocol the engine passes through verbatim.
/// Implementations run on the render thread and must not touch GL.
pub trait PresetParser: Send + Sync {
    fn parse(&self, path: &str, data: &[u8]) -> Result<ParsedPreset, EngineError>;

    fn load_url(&self, url: &str) -> Result<ParsedPreset, EngineError> {
        Err(EngineError::PresetLoad {
            path: url.to_string(),
            msg: "no stream loader configured for this protocol".to_string(),
        })
    }
}

/// Shader pipeline stage, for transpiler diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Warp,
    Composite,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Warp => write!(f, "warp"),
            ShaderStage::Composite => write!(f, "composite"),
        }
    }
}

/// The external HLSL-to-GLSL transpiler.
///
/// Pure string transformation; the engine calls it on the CPU worker thread.
pub trait ShaderTranspiler: Send + Sync {
    fn transpile(&self, source: &str, stage: ShaderStage) -> Result<String, EngineError>;
}

/// Transpiler for presets authored directly in GLSL: returns the source
/// unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightThroughTranspiler;

impl ShaderTranspiler for StraightThroughTranspiler {
    fn transpile(&self, source: &str, _stage: ShaderStage) -> Result<String, EngineError> {
        Ok(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preset_with(params: &[(&str, &str)]) -> ParsedPreset {
        ParsedPreset {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn typed_getters_apply_defaults() {
        let p = preset_with(&[("zoom", "1.05"), ("nmotionvectorsx", "12"), ("wrap", "0")]);

        assert_eq!(p.f64("zoom", 1.0), 1.05);
        assert_eq!(p.f64("rot", 0.25), 0.25);
        assert_eq!(p.i32("nmotionvectorsx", 64), 12);
        assert!(!p.bool("wrap", true));
        assert!(p.bool("echo_enabled", true));
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let p = preset_with(&[("zoom", "fast"), ("meshx", "")]);
        assert_eq!(p.f64("zoom", 1.0), 1.0);
        assert_eq!(p.i32("meshx", 32), 32);
    }

    #[test]
    fn integer_params_accept_float_notation() {
        let p = preset_with(&[("meshx", "48.0")]);
        assert_eq!(p.i32("meshx", 32), 48);
    }
}

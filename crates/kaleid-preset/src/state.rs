//! Preset state container.
//!
//! Everything that persists across frames and is shared between the preset's
//! sub-renderers: the current audio snapshot, viewport facts, the expression
//! VM's global banks, the blur chain, and the logical "main texture" handle.
//! Mutated on the render thread only.

use kaleid_core::{FrameAudioData, GlobalBanks, ParsedPreset};
use kaleid_render::context::aspect_factors;
use kaleid_render::BlurTextures;

/// Upper bound for the per-pixel mesh resolution.
pub const MAX_MESH: i32 = 300;

#[derive(Debug)]
pub struct PresetState {
    /// The parsed preset parameters; initial values for the per-frame pools.
    pub parsed: ParsedPreset,

    // ---- Per-frame snapshot of the render context ----
    pub audio: FrameAudioData,
    pub viewport_width: i32,
    pub viewport_height: i32,
    pub time: f64,
    pub frame: u64,
    pub fps: f64,
    /// Seconds since this preset became active (written by the engine).
    pub preset_time: f64,
    /// Blend-in progress [0, 1] for smooth transitions.
    pub progress: f64,

    // ---- Expression VM globals (reg00..reg99, gmegabuf) ----
    pub globals: GlobalBanks,

    // ---- GL-side state (created in init phase 0) ----
    pub blur: Option<BlurTextures>,
    /// Non-owning handle to whichever texture currently holds the correct,
    /// y-flipped main image; reseated several times per frame.
    pub main_texture: Option<glow::NativeTexture>,

    // ---- Mesh resolution ----
    pub mesh_x: i32,
    pub mesh_y: i32,
}

impl PresetState {
    pub fn new(parsed: ParsedPreset, default_mesh_x: i32, default_mesh_y: i32) -> Self {
        let mesh_x = parsed.i32("meshx", default_mesh_x).clamp(2, MAX_MESH);
        let mesh_y = parsed.i32("meshy", default_mesh_y).clamp(2, MAX_MESH);

        Self {
            parsed,
            audio: FrameAudioData::default(),
            viewport_width: 0,
            viewport_height: 0,
            time: 0.0,
            frame: 0,
            fps: 0.0,
            preset_time: 0.0,
            progress: 0.0,
            globals: GlobalBanks::default(),
            blur: None,
            main_texture: None,
            mesh_x,
            mesh_y,
        }
    }

    pub fn aspect(&self) -> (f64, f64) {
        aspect_factors(self.viewport_width, self.viewport_height)
    }

    /// Highest blur level any shader of this preset samples (0 = none).
    pub fn max_blur_level(&self) -> usize {
        let mut level = 0;
        for source in [
            self.parsed.warp_shader.as_deref(),
            self.parsed.composite_shader.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if source.contains("blur3") {
                level = level.max(3);
            } else if source.contains("blur2") {
                level = level.max(2);
            } else if source.contains("blur1") {
                level = level.max(1);
            }
        }
        level
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(mut blur) = self.blur.take() {
            blur.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parsed_with(params: &[(&str, &str)]) -> ParsedPreset {
        ParsedPreset {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn mesh_size_comes_from_the_preset_with_engine_fallback() {
        let state = PresetState::new(parsed_with(&[("meshx", "64"), ("meshy", "48")]), 48, 36);
        assert_eq!((state.mesh_x, state.mesh_y), (64, 48));

        let state = PresetState::new(parsed_with(&[]), 48, 36);
        assert_eq!((state.mesh_x, state.mesh_y), (48, 36));
    }

    #[test]
    fn mesh_size_is_clamped() {
        let state = PresetState::new(parsed_with(&[("meshx", "100000"), ("meshy", "1")]), 48, 36);
        assert_eq!((state.mesh_x, state.mesh_y), (MAX_MESH, 2));
    }

    #[test]
    fn blur_level_is_derived_from_shader_sources() {
        let mut parsed = parsed_with(&[]);
        assert_eq!(PresetState::new(parsed.clone(), 48, 36).max_blur_level(), 0);

        parsed.warp_shader = Some("vec3 a = texture(sampler_blur1, uv).rgb;".into());
        assert_eq!(PresetState::new(parsed.clone(), 48, 36).max_blur_level(), 1);

        parsed.composite_shader = Some("texture(sampler_blur3, uv)".into());
        assert_eq!(PresetState::new(parsed, 48, 36).max_blur_level(), 3);
    }
}

//! Per-frame render context and the shared shader cache.

use std::collections::HashMap;

use kaleid_core::EngineError;

use crate::shader::ShaderProgram;
use crate::texture_manager::TextureManager;
use crate::FullscreenTriangle;

/// Programs shared between presets (y-flip, blur passes, default drawables).
///
/// Keyed by a static name; compiled lazily on first use and kept for the
/// engine's lifetime so preset switches never recompile them.
#[derive(Debug, Default)]
pub struct ShaderCache {
    programs: HashMap<&'static str, ShaderProgram>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub unsafe fn get_or_compile(
        &mut self,
        gl: &glow::Context,
        key: &'static str,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<&ShaderProgram, EngineError> {
        if !self.programs.contains_key(key) {
            let mut program = ShaderProgram::new(gl)?;
            program.compile_program(gl, vertex_source, fragment_source)?;
            self.programs.insert(key, program);
        }
        Ok(&self.programs[key])
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        for (_, mut program) in self.programs.drain() {
            program.destroy(gl);
        }
    }
}

/// Everything a preset needs from the engine for one frame.
///
/// The texture manager and shader cache are owned by the engine and outlive
/// every preset that observes them; presets hold no references across frames.
pub struct RenderContext<'a> {
    pub gl: &'a glow::Context,
    pub viewport_width: i32,
    pub viewport_height: i32,
    /// Seconds since the engine started.
    pub time: f64,
    pub frame: u64,
    pub fps: f64,
    pub texture_manager: &'a mut TextureManager,
    pub shader_cache: &'a mut ShaderCache,
    pub fullscreen: &'a FullscreenTriangle,
}

impl RenderContext<'_> {
    /// Milkdrop aspect factors: the shorter axis is 1.0.
    pub fn aspect(&self) -> (f64, f64) {
        aspect_factors(self.viewport_width, self.viewport_height)
    }
}

/// Aspect factors with the shorter axis normalized to 1.0.
pub fn aspect_factors(width: i32, height: i32) -> (f64, f64) {
    let w = width.max(1) as f64;
    let h = height.max(1) as f64;
    if w > h {
        (h / w, 1.0)
    } else {
        (1.0, w / h)
    }
}

impl std::fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("viewport_width", &self.viewport_width)
            .field("viewport_height", &self.viewport_height)
            .field("time", &self.time)
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_normalizes_the_longer_axis() {
        assert_eq!(aspect_factors(1920, 1080), (1080.0 / 1920.0, 1.0));
        assert_eq!(aspect_factors(1080, 1920), (1.0, 1080.0 / 1920.0));
        assert_eq!(aspect_factors(512, 512), (1.0, 1.0));
        assert_eq!(aspect_factors(0, 0), (1.0, 1.0));
    }
}

//! Center darkening.
//!
//! A small translucent fan over the screen center that counteracts the
//! brightness pile-up zooming presets produce there. Drawn only when the
//! per-frame `darken_center` flag is set.

use kaleid_core::EngineError;
use kaleid_render::ShaderCache;

use crate::draw::{Blend, ColorDraw};

/// Center alpha of the darkening fan (3/32, Milkdrop's blend weight).
const CENTER_ALPHA: f32 = 3.0 / 32.0;

/// Half-extent of the fan in screen space.
const EXTENT: f32 = 0.05;

#[derive(Debug, Default)]
pub struct DarkenCenter {
    vertices: Vec<f32>,
}

impl DarkenCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        draw: &ColorDraw,
    ) -> Result<(), EngineError> {
        if self.vertices.is_empty() {
            // Center vertex plus a diamond of fully transparent points.
            self.vertices
                .extend_from_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, CENTER_ALPHA]);
            for (x, y) in [
                (-EXTENT, 0.0),
                (0.0, -EXTENT),
                (EXTENT, 0.0),
                (0.0, EXTENT),
                (-EXTENT, 0.0),
            ] {
                self.vertices.extend_from_slice(&[x, y, 0.0, 0.0, 0.0, 0.0]);
            }
        }

        draw.draw(
            gl,
            cache,
            &self.vertices,
            glow::TRIANGLE_FAN,
            Blend::Alpha,
            1.0,
        )
    }
}

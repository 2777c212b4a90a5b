//! Outer and inner borders.
//!
//! Two concentric frames around the screen edge, sized and colored by the
//! per-frame `ob_*` / `ib_*` parameters. Each frame is four quads emitted as
//! triangles.

use kaleid_core::EngineError;
use kaleid_render::ShaderCache;

use crate::draw::{Blend, ColorDraw};
use crate::per_frame::PerFrameContext;

#[derive(Debug, Default)]
pub struct Border {
    vertices: Vec<f32>,
}

impl Border {
    pub fn new() -> Self {
        Self::default()
    }

    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        draw: &ColorDraw,
        per_frame: &PerFrameContext,
    ) -> Result<(), EngineError> {
        let s = &per_frame.slots;

        let outer_size = per_frame.get(s.ob_size).clamp(0.0, 0.5);
        let outer = [
            per_frame.get(s.ob_r) as f32,
            per_frame.get(s.ob_g) as f32,
            per_frame.get(s.ob_b) as f32,
            per_frame.get(s.ob_a) as f32,
        ];
        let inner_size = per_frame.get(s.ib_size).clamp(0.0, 0.5);
        let inner = [
            per_frame.get(s.ib_r) as f32,
            per_frame.get(s.ib_g) as f32,
            per_frame.get(s.ib_b) as f32,
            per_frame.get(s.ib_a) as f32,
        ];

        self.vertices.clear();
        if outer[3] > 0.0 && outer_size > 0.0 {
            push_frame(&mut self.vertices, 0.0, outer_size, outer);
        }
        if inner[3] > 0.0 && inner_size > 0.0 {
            push_frame(&mut self.vertices, outer_size, inner_size, inner);
        }

        draw.draw(
            gl,
            cache,
            &self.vertices,
            glow::TRIANGLES,
            Blend::Alpha,
            1.0,
        )
    }
}

/// Emits a rectangular frame starting `inset` from the screen edge with the
/// given `thickness`, as 4 quads (24 vertices).
fn push_frame(vertices: &mut Vec<f32>, inset: f64, thickness: f64, color: [f32; 4]) {
    let o = inset; // outer edge offset
    let i = inset + thickness; // inner edge offset

    // (x0, y0, x1, y1) quads in [0,1] space: top, bottom, left, right.
    let quads = [
        (o, o, 1.0 - o, i),
        (o, 1.0 - i, 1.0 - o, 1.0 - o),
        (o, i, i, 1.0 - i),
        (1.0 - i, i, 1.0 - o, 1.0 - i),
    ];

    for (x0, y0, x1, y1) in quads {
        push_quad(vertices, x0, y0, x1, y1, color);
    }
}

fn push_quad(vertices: &mut Vec<f32>, x0: f64, y0: f64, x1: f64, y1: f64, color: [f32; 4]) {
    let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y0), (x1, y1), (x0, y1)];
    for (x, y) in corners {
        vertices.extend_from_slice(&[
            (x * 2.0 - 1.0) as f32,
            (y * 2.0 - 1.0) as f32,
            color[0],
            color[1],
            color[2],
            color[3],
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_is_four_quads() {
        let mut vertices = Vec::new();
        push_frame(&mut vertices, 0.0, 0.05, [1.0, 1.0, 1.0, 1.0]);
        // 4 quads x 6 vertices x 6 floats.
        assert_eq!(vertices.len(), 4 * 6 * 6);
    }
}

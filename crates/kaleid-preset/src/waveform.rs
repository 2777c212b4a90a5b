//! The default (built-in) waveform.
//!
//! One of eight classic drawing modes selected by `wave_mode`, fed from the
//! frame's PCM snapshot and colored by the per-frame wave parameters.

use kaleid_core::EngineError;
use kaleid_render::ShaderCache;

use crate::draw::{Blend, ColorDraw};
use crate::per_frame::PerFrameContext;
use crate::state::PresetState;

/// Samples consumed per frame from the audio waveform.
const WAVE_SAMPLES: usize = 480;

#[derive(Debug, Default)]
pub struct Waveform {
    vertices: Vec<f32>,
}

impl Waveform {
    pub fn new() -> Self {
        Self::default()
    }

    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        draw: &ColorDraw,
        state: &PresetState,
        per_frame: &PerFrameContext,
    ) -> Result<(), EngineError> {
        let s = &per_frame.slots;
        let alpha = per_frame.get(s.wave_a).clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return Ok(());
        }

        let mode = per_frame.get(s.wave_mode) as i32;
        let r = per_frame.get(s.wave_r) as f32;
        let g = per_frame.get(s.wave_g) as f32;
        let b = per_frame.get(s.wave_b) as f32;
        let a = alpha as f32;
        let wave_x = per_frame.get(s.wave_x);
        // Milkdrop's wave_y is inverted relative to screen space.
        let wave_y = 1.0 - per_frame.get(s.wave_y);
        let mystery = per_frame.get(s.wave_mystery);
        let (aspect_x, aspect_y) = state.aspect();

        let left = &state.audio.waveform_left;
        let right = &state.audio.waveform_right;
        let n = WAVE_SAMPLES.min(left.len()).min(right.len());
        if n < 2 {
            return Ok(());
        }

        let sample = |data: &[f32], i: usize| -> f64 { data[i.min(data.len() - 1)] as f64 };

        self.vertices.clear();
        let mut push = |x: f64, y: f64, fade: f32| {
            self.vertices.extend_from_slice(&[
                (x * 2.0 - 1.0) as f32,
                (y * 2.0 - 1.0) as f32,
                r,
                g,
                b,
                a * fade,
            ]);
        };

        match mode {
            // Circular amplitude wave around (wave_x, wave_y).
            0 => {
                for i in 0..=n {
                    let j = i % n;
                    let t = i as f64 / n as f64;
                    let ang = t * std::f64::consts::TAU + state.preset_time * 0.2;
                    let radius = 0.25 + 0.1 * sample(left, j) + 0.03 * mystery;
                    push(
                        wave_x + radius * ang.cos() * aspect_x,
                        wave_y + radius * ang.sin() * aspect_y,
                        1.0,
                    );
                }
            }

            // X-Y oscilloscope from the two channels.
            1 => {
                for i in 0..n {
                    push(
                        wave_x + 0.3 * sample(left, i) * aspect_x,
                        wave_y + 0.3 * sample(right, i) * aspect_y,
                        1.0,
                    );
                }
            }

            // Centered spiro (fading tail).
            2 | 3 => {
                let vol = (state.audio.vol * 0.5).min(1.0);
                let scale = if mode == 3 { 0.4 + 0.4 * vol } else { 0.5 };
                for i in 0..n {
                    let fade = 1.0 - i as f32 / n as f32;
                    push(
                        wave_x + scale * sample(left, i) * aspect_x,
                        wave_y + scale * sample(right, (i + 32) % n) * aspect_y,
                        fade,
                    );
                }
            }

            // Derivative cross-plot.
            5 => {
                for i in 0..n.saturating_sub(1) {
                    let dx = sample(left, i + 1) - sample(left, i);
                    push(
                        wave_x + (0.3 * sample(left, i) + 0.5 * dx) * aspect_x,
                        wave_y + 0.3 * sample(right, i) * aspect_y,
                        1.0,
                    );
                }
            }

            // Angled line wave (mystery controls the tilt).
            6 | 7 => {
                let tilt = mystery * 0.5;
                let offset = if mode == 7 { 0.06 } else { 0.0 };
                let passes = if mode == 7 { 2 } else { 1 };
                for pass in 0..passes {
                    let channel: &[f32] = if pass == 0 { left } else { right };
                    let side = if pass == 0 { -1.0 } else { 1.0 };
                    for i in 0..n {
                        let t = i as f64 / (n - 1) as f64;
                        push(
                            t,
                            wave_y + side * offset + (t - 0.5) * tilt + 0.15 * sample(channel, i),
                            1.0,
                        );
                    }
                }
            }

            // Horizontal line wave (default, mode 4 and anything unknown).
            _ => {
                for i in 0..n {
                    let t = i as f64 / (n - 1) as f64;
                    push(t, wave_y + 0.2 * sample(left, i), 1.0);
                }
            }
        }

        let use_dots = per_frame.get(s.wave_usedots) != 0.0;
        let additive = per_frame.get(s.wave_additive) != 0.0;
        let thick = per_frame.get(s.wave_thick) != 0.0;

        draw.draw(
            gl,
            cache,
            &self.vertices,
            if use_dots {
                glow::POINTS
            } else {
                glow::LINE_STRIP
            },
            if additive { Blend::Additive } else { Blend::Alpha },
            if thick { 2.0 } else { 1.0 },
        )
    }
}

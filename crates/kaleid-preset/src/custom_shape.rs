//! Custom shapes.
//!
//! Up to four scripted n-gons per preset, each drawn `num_inst` times with
//! the `instance` variable exposed to the per-frame code. A shape renders as
//! a triangle fan (optionally textured from the main image) with a gradient
//! from the center color to the edge color, plus an optional border loop.

use kaleid_core::{
    param_bool, param_f64, param_i32, CompiledProgram, EngineError, ExpressionCompiler,
    GlobalBanks, ShapeBlock, Slot, VariablePool,
};
use kaleid_render::ShaderCache;

use crate::draw::{Blend, ColorDraw, TexturedDraw};
use crate::per_frame::{PerFrameContext, Q_COUNT};
use crate::state::PresetState;

use crate::custom_waveform::T_COUNT;

#[derive(Debug, Clone)]
struct ShapeSlots {
    x: Slot,
    y: Slot,
    rad: Slot,
    ang: Slot,
    sides: Slot,
    textured: Slot,
    additive: Slot,
    thick_outline: Slot,
    tex_zoom: Slot,
    tex_ang: Slot,
    r: Slot,
    g: Slot,
    b: Slot,
    a: Slot,
    r2: Slot,
    g2: Slot,
    b2: Slot,
    a2: Slot,
    border_r: Slot,
    border_g: Slot,
    border_b: Slot,
    border_a: Slot,
    instance: Slot,
    num_inst: Slot,
    time: Slot,
    frame: Slot,
    bass: Slot,
    mid: Slot,
    treb: Slot,
    bass_att: Slot,
    mid_att: Slot,
    treb_att: Slot,
    q: [Slot; Q_COUNT],
    t: [Slot; T_COUNT],
}

pub struct CustomShape {
    index: usize,
    enabled: bool,
    num_inst: usize,

    /// Parameter defaults reloaded into the pool every instance.
    defaults: Vec<(Slot, f64)>,

    init_code: String,
    per_frame_code: String,

    pool: VariablePool,
    slots: ShapeSlots,
    t_after_init: [f64; T_COUNT],
    init_program: Option<Box<dyn CompiledProgram>>,
    frame_program: Option<Box<dyn CompiledProgram>>,

    fan_vertices: Vec<f32>,
    textured_vertices: Vec<f32>,
    border_vertices: Vec<f32>,
}

impl std::fmt::Debug for CustomShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomShape")
            .field("index", &self.index)
            .field("enabled", &self.enabled)
            .field("num_inst", &self.num_inst)
            .finish()
    }
}

impl CustomShape {
    pub fn new(index: usize, block: &ShapeBlock) -> Self {
        let mut pool = VariablePool::new();
        let slots = ShapeSlots {
            x: pool.slot("x"),
            y: pool.slot("y"),
            rad: pool.slot("rad"),
            ang: pool.slot("ang"),
            sides: pool.slot("sides"),
            textured: pool.slot("textured"),
            additive: pool.slot("additive"),
            thick_outline: pool.slot("thickoutline"),
            tex_zoom: pool.slot("tex_zoom"),
            tex_ang: pool.slot("tex_ang"),
            r: pool.slot("r"),
            g: pool.slot("g"),
            b: pool.slot("b"),
            a: pool.slot("a"),
            r2: pool.slot("r2"),
            g2: pool.slot("g2"),
            b2: pool.slot("b2"),
            a2: pool.slot("a2"),
            border_r: pool.slot("border_r"),
            border_g: pool.slot("border_g"),
            border_b: pool.slot("border_b"),
            border_a: pool.slot("border_a"),
            instance: pool.slot("instance"),
            num_inst: pool.slot("num_inst"),
            time: pool.slot("time"),
            frame: pool.slot("frame"),
            bass: pool.slot("bass"),
            mid: pool.slot("mid"),
            treb: pool.slot("treb"),
            bass_att: pool.slot("bass_att"),
            mid_att: pool.slot("mid_att"),
            treb_att: pool.slot("treb_att"),
            q: std::array::from_fn(|i| pool.slot(&format!("q{}", i + 1))),
            t: std::array::from_fn(|i| pool.slot(&format!("t{}", i + 1))),
        };

        let params = &block.params;
        let get = |key: &str, default: f64| param_f64(params, key, default);
        let defaults = vec![
            (slots.x, get("x", 0.5)),
            (slots.y, get("y", 0.5)),
            (slots.rad, get("rad", 0.1)),
            (slots.ang, get("ang", 0.0)),
            (slots.sides, param_i32(params, "sides", 4) as f64),
            (slots.textured, get("textured", 0.0)),
            (slots.additive, get("additive", 0.0)),
            (slots.thick_outline, get("thickoutline", 0.0)),
            (slots.tex_zoom, get("tex_zoom", 1.0)),
            (slots.tex_ang, get("tex_ang", 0.0)),
            (slots.r, get("r", 1.0)),
            (slots.g, get("g", 0.0)),
            (slots.b, get("b", 0.0)),
            (slots.a, get("a", 1.0)),
            (slots.r2, get("r2", 0.0)),
            (slots.g2, get("g2", 1.0)),
            (slots.b2, get("b2", 0.0)),
            (slots.a2, get("a2", 0.0)),
            (slots.border_r, get("border_r", 1.0)),
            (slots.border_g, get("border_g", 1.0)),
            (slots.border_b, get("border_b", 1.0)),
            (slots.border_a, get("border_a", 0.1)),
        ];

        Self {
            index,
            enabled: param_bool(params, "enabled", false),
            num_inst: param_i32(params, "num_inst", 1).clamp(1, 1024) as usize,
            defaults,
            init_code: block.init_code.clone(),
            per_frame_code: block.per_frame_code.clone(),
            pool,
            slots,
            t_after_init: [0.0; T_COUNT],
            init_program: None,
            frame_program: None,
            fan_vertices: Vec::new(),
            textured_vertices: Vec::new(),
            border_vertices: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn compile_code_and_run_init(
        &mut self,
        globals: &mut GlobalBanks,
        per_frame: &PerFrameContext,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<(), EngineError> {
        if !self.init_code.is_empty() {
            self.init_program = Some(compiler.compile(&self.init_code, &mut self.pool)?);
        }
        if !self.per_frame_code.is_empty() {
            self.frame_program = Some(compiler.compile(&self.per_frame_code, &mut self.pool)?);
        }

        self.load_instance_inputs(None, per_frame, 0);
        if let Some(init) = &self.init_program {
            init.execute(&mut self.pool, globals);
        }
        for (i, t) in self.slots.t.iter().enumerate() {
            self.t_after_init[i] = self.pool.get(*t);
        }
        Ok(())
    }

    fn load_instance_inputs(
        &mut self,
        state: Option<&PresetState>,
        per_frame: &PerFrameContext,
        instance: usize,
    ) {
        for (slot, value) in &self.defaults {
            self.pool.set(*slot, *value);
        }
        let s = self.slots.clone();
        self.pool.set(s.instance, instance as f64);
        self.pool.set(s.num_inst, self.num_inst as f64);

        if let Some(state) = state {
            self.pool.set(s.time, state.preset_time);
            self.pool.set(s.frame, state.frame as f64);
            self.pool.set(s.bass, state.audio.bass);
            self.pool.set(s.mid, state.audio.mid);
            self.pool.set(s.treb, state.audio.treb);
            self.pool.set(s.bass_att, state.audio.bass_att);
            self.pool.set(s.mid_att, state.audio.mid_att);
            self.pool.set(s.treb_att, state.audio.treb_att);
        }

        let q = per_frame.q_values();
        for (i, slot) in s.q.iter().enumerate() {
            self.pool.set(*slot, q[i]);
        }
        for (i, slot) in s.t.iter().enumerate() {
            self.pool.set(*slot, self.t_after_init[i]);
        }
    }

    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        color_draw: &ColorDraw,
        textured_draw: &TexturedDraw,
        state: &mut PresetState,
        per_frame: &PerFrameContext,
    ) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }

        for instance in 0..self.num_inst {
            self.load_instance_inputs(Some(state), per_frame, instance);
            if let Some(frame_program) = &self.frame_program {
                frame_program.execute(&mut self.pool, &mut state.globals);
            }
            self.draw_instance(gl, cache, color_draw, textured_draw, state)?;
        }
        Ok(())
    }

    unsafe fn draw_instance(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        color_draw: &ColorDraw,
        textured_draw: &TexturedDraw,
        state: &PresetState,
    ) -> Result<(), EngineError> {
        let s = &self.slots;
        let sides = (self.pool.get(s.sides) as i32).clamp(3, 100);
        let x = self.pool.get(s.x);
        let y = 1.0 - self.pool.get(s.y);
        let rad = self.pool.get(s.rad);
        let ang = self.pool.get(s.ang);
        let (aspect_x, aspect_y) = state.aspect();

        let center = [
            self.pool.get(s.r).clamp(0.0, 1.0) as f32,
            self.pool.get(s.g).clamp(0.0, 1.0) as f32,
            self.pool.get(s.b).clamp(0.0, 1.0) as f32,
            self.pool.get(s.a).clamp(0.0, 1.0) as f32,
        ];
        let edge = [
            self.pool.get(s.r2).clamp(0.0, 1.0) as f32,
            self.pool.get(s.g2).clamp(0.0, 1.0) as f32,
            self.pool.get(s.b2).clamp(0.0, 1.0) as f32,
            self.pool.get(s.a2).clamp(0.0, 1.0) as f32,
        ];

        let textured = self.pool.get(s.textured) != 0.0;
        let blend = if self.pool.get(s.additive) != 0.0 {
            Blend::Additive
        } else {
            Blend::Alpha
        };

        let ring = |i: i32, radius_scale: f64| -> (f64, f64) {
            let theta = i as f64 / sides as f64 * std::f64::consts::TAU + ang
                + std::f64::consts::FRAC_PI_4;
            (
                x + radius_scale * theta.cos() * aspect_x,
                y + radius_scale * theta.sin() * aspect_y,
            )
        };

        if textured && state.main_texture.is_some() {
            let tex_zoom = self.pool.get(s.tex_zoom).max(1e-3);
            let tex_ang = self.pool.get(s.tex_ang);
            self.textured_vertices.clear();
            let mut push = |px: f64, py: f64, theta: f64, radial: f64, color: [f32; 4]| {
                // Texture coordinates spin with tex_ang and scale with
                // tex_zoom around the shape center.
                let tu = 0.5 + radial * (theta + tex_ang).cos() / tex_zoom * 0.5;
                let tv = 0.5 + radial * (theta + tex_ang).sin() / tex_zoom * 0.5;
                self.textured_vertices.extend_from_slice(&[
                    (px * 2.0 - 1.0) as f32,
                    (py * 2.0 - 1.0) as f32,
                    tu as f32,
                    tv as f32,
                    color[0],
                    color[1],
                    color[2],
                    color[3],
                ]);
            };

            push(x, y, 0.0, 0.0, center);
            for i in 0..=sides {
                let (px, py) = ring(i, rad);
                let theta = i as f64 / sides as f64 * std::f64::consts::TAU + ang;
                push(px, py, theta, 1.0, edge);
            }

            textured_draw.draw(
                gl,
                cache,
                &self.textured_vertices,
                state.main_texture.expect("checked above"),
                glow::TRIANGLE_FAN,
                blend,
            )?;
        } else {
            self.fan_vertices.clear();
            let mut push = |px: f64, py: f64, color: [f32; 4]| {
                self.fan_vertices.extend_from_slice(&[
                    (px * 2.0 - 1.0) as f32,
                    (py * 2.0 - 1.0) as f32,
                    color[0],
                    color[1],
                    color[2],
                    color[3],
                ]);
            };
            push(x, y, center);
            for i in 0..=sides {
                let (px, py) = ring(i, rad);
                push(px, py, edge);
            }
            color_draw.draw(
                gl,
                cache,
                &self.fan_vertices,
                glow::TRIANGLE_FAN,
                blend,
                1.0,
            )?;
        }

        // Border loop.
        let border = [
            self.pool.get(s.border_r).clamp(0.0, 1.0) as f32,
            self.pool.get(s.border_g).clamp(0.0, 1.0) as f32,
            self.pool.get(s.border_b).clamp(0.0, 1.0) as f32,
            self.pool.get(s.border_a).clamp(0.0, 1.0) as f32,
        ];
        if border[3] > 0.0 {
            self.border_vertices.clear();
            for i in 0..=sides {
                let (px, py) = ring(i, rad);
                self.border_vertices.extend_from_slice(&[
                    (px * 2.0 - 1.0) as f32,
                    (py * 2.0 - 1.0) as f32,
                    border[0],
                    border[1],
                    border[2],
                    border[3],
                ]);
            }
            let thick = self.pool.get(s.thick_outline) != 0.0;
            color_draw.draw(
                gl,
                cache,
                &self.border_vertices,
                glow::LINE_STRIP,
                Blend::Alpha,
                if thick { 2.0 } else { 1.0 },
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn block(params: &[(&str, &str)]) -> ShapeBlock {
        ShapeBlock {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn parameters_parse_with_defaults() {
        let shape = CustomShape::new(0, &block(&[("enabled", "1"), ("sides", "6")]));
        assert!(shape.is_enabled());
        assert_eq!(shape.num_inst, 1);

        let shape = CustomShape::new(1, &block(&[("num_inst", "5")]));
        assert!(!shape.is_enabled());
        assert_eq!(shape.num_inst, 5);
    }

    #[test]
    fn instance_variable_is_seeded_per_instance() {
        let mut shape = CustomShape::new(0, &block(&[("enabled", "1"), ("num_inst", "3")]));
        let per_frame = PerFrameContext::new();

        shape.load_instance_inputs(None, &per_frame, 2);
        assert_eq!(shape.pool.get(shape.slots.instance), 2.0);
        assert_eq!(shape.pool.get(shape.slots.num_inst), 3.0);
    }
}

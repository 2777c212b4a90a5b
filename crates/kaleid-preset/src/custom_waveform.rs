//! Custom waveforms.
//!
//! Each preset carries up to four scripted waveforms. A waveform owns its
//! own expression context with init / per-frame / per-point programs; per
//! point the engine seeds `sample` and the two channel values, runs the
//! program, and reads back position and color. The t bank behaves like the
//! per-frame q bank: written by init code, restored every frame.

use kaleid_core::{
    param_bool, param_f64, param_i32, CompiledProgram, EngineError, ExpressionCompiler,
    GlobalBanks, Slot, VariablePool, WaveBlock,
};

use crate::draw::{Blend, ColorDraw};
use crate::per_frame::{PerFrameContext, Q_COUNT};
use crate::state::PresetState;

use kaleid_render::ShaderCache;

pub const T_COUNT: usize = 8;

#[derive(Debug, Clone)]
struct WaveSlots {
    x: Slot,
    y: Slot,
    r: Slot,
    g: Slot,
    b: Slot,
    a: Slot,
    sample: Slot,
    value1: Slot,
    value2: Slot,
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

pub struct CustomWaveform {
    index: usize,
    enabled: bool,
    samples: usize,
    scaling: f64,
    smoothing: f64,
    spectrum: bool,
    use_dots: bool,
    thick: bool,
    additive: bool,
    sep: usize,
    base_r: f64,
    base_g: f64,
    base_b: f64,
    base_a: f64,

    init_code: String,
    per_frame_code: String,
    per_point_code: String,

    pool: VariablePool,
    slots: WaveSlots,
    t_after_init: [f64; T_COUNT],
    init_program: Option<Box<dyn CompiledProgram>>,
    frame_program: Option<Box<dyn CompiledProgram>>,
    point_program: Option<Box<dyn CompiledProgram>>,

    vertices: Vec<f32>,
}

impl std::fmt::Debug for CustomWaveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomWaveform")
            .field("index", &self.index)
            .field("enabled", &self.enabled)
            .field("samples", &self.samples)
            .finish()
    }
}

impl CustomWaveform {
    pub fn new(index: usize, block: &WaveBlock) -> Self {
        let mut pool = VariablePool::new();
        let slots = WaveSlots {
            x: pool.slot("x"),
            y: pool.slot("y"),
            r: pool.slot("r"),
            g: pool.slot("g"),
            b: pool.slot("b"),
            a: pool.slot("a"),
            sample: pool.slot("sample"),
            value1: pool.slot("value1"),
            value2: pool.slot("value2"),
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
        Self {
            index,
            enabled: param_bool(params, "enabled", false),
            samples: param_i32(params, "samples", 512).clamp(2, 512) as usize,
            scaling: param_f64(params, "scaling", 1.0),
            smoothing: param_f64(params, "smoothing", 0.5).clamp(0.0, 1.0),
            spectrum: param_bool(params, "spectrum", false),
            use_dots: param_bool(params, "usedots", false),
            thick: param_bool(params, "thick", false),
            additive: param_bool(params, "additive", false),
            sep: param_i32(params, "sep", 0).max(0) as usize,
            base_r: param_f64(params, "r", 1.0),
            base_g: param_f64(params, "g", 1.0),
            base_b: param_f64(params, "b", 1.0),
            base_a: param_f64(params, "a", 1.0),
            init_code: block.init_code.clone(),
            per_frame_code: block.per_frame_code.clone(),
            per_point_code: block.per_point_code.clone(),
            pool,
            slots,
            t_after_init: [0.0; T_COUNT],
            init_program: None,
            frame_program: None,
            point_program: None,
            vertices: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compiles all three code blocks and runs init. CPU-only.
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
        if !self.per_point_code.is_empty() {
            self.point_program = Some(compiler.compile(&self.per_point_code, &mut self.pool)?);
        }

        self.load_frame_inputs(None, per_frame);
        if let Some(init) = &self.init_program {
            init.execute(&mut self.pool, globals);
        }
        for (i, t) in self.slots.t.iter().enumerate() {
            self.t_after_init[i] = self.pool.get(*t);
        }
        Ok(())
    }

    fn load_frame_inputs(&mut self, state: Option<&PresetState>, per_frame: &PerFrameContext) {
        let s = self.slots.clone();
        self.pool.set(s.r, self.base_r);
        self.pool.set(s.g, self.base_g);
        self.pool.set(s.b, self.base_b);
        self.pool.set(s.a, self.base_a);

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
        draw: &ColorDraw,
        state: &mut PresetState,
        per_frame: &PerFrameContext,
    ) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }

        self.load_frame_inputs(Some(state), per_frame);
        if let Some(frame_program) = &self.frame_program {
            frame_program.execute(&mut self.pool, &mut state.globals);
        }

        // Channel data, optionally from the spectrum, smoothed and scaled.
        let (data_l, data_r): (&[f32], &[f32]) = if self.spectrum {
            (&state.audio.spectrum_left, &state.audio.spectrum_right)
        } else {
            (&state.audio.waveform_left, &state.audio.waveform_right)
        };

        let count = self.samples.min(data_l.len().saturating_sub(self.sep));
        if count < 2 {
            return Ok(());
        }

        let s = self.slots.clone();
        self.vertices.clear();
        let mut smoothed1 = 0.0f64;
        let mut smoothed2 = 0.0f64;
        for i in 0..count {
            let j = i + self.sep;
            let raw1 = data_l[j.min(data_l.len() - 1)] as f64 * self.scaling;
            let raw2 = data_r[j.min(data_r.len() - 1)] as f64 * self.scaling;
            if i == 0 {
                smoothed1 = raw1;
                smoothed2 = raw2;
            } else {
                smoothed1 = smoothed1 * self.smoothing + raw1 * (1.0 - self.smoothing);
                smoothed2 = smoothed2 * self.smoothing + raw2 * (1.0 - self.smoothing);
            }

            let sample_pos = i as f64 / (count - 1) as f64;
            self.pool.set(s.sample, sample_pos);
            self.pool.set(s.value1, smoothed1);
            self.pool.set(s.value2, smoothed2);
            // Default geometry before the per-point program runs.
            self.pool.set(s.x, sample_pos);
            self.pool.set(s.y, 0.5 + smoothed1 * 0.25);

            if let Some(point_program) = &self.point_program {
                point_program.execute(&mut self.pool, &mut state.globals);
            }

            let x = self.pool.get(s.x);
            // Preset space puts y=0 at the top.
            let y = 1.0 - self.pool.get(s.y);
            self.vertices.extend_from_slice(&[
                (x * 2.0 - 1.0) as f32,
                (y * 2.0 - 1.0) as f32,
                self.pool.get(s.r).clamp(0.0, 1.0) as f32,
                self.pool.get(s.g).clamp(0.0, 1.0) as f32,
                self.pool.get(s.b).clamp(0.0, 1.0) as f32,
                self.pool.get(s.a).clamp(0.0, 1.0) as f32,
            ]);
        }

        draw.draw(
            gl,
            cache,
            &self.vertices,
            if self.use_dots {
                glow::POINTS
            } else {
                glow::LINE_STRIP
            },
            if self.additive {
                Blend::Additive
            } else {
                Blend::Alpha
            },
            if self.thick { 2.0 } else { 1.0 },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn block(params: &[(&str, &str)]) -> WaveBlock {
        WaveBlock {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn parameters_parse_with_defaults() {
        let wave = CustomWaveform::new(0, &block(&[("enabled", "1"), ("samples", "64")]));
        assert!(wave.is_enabled());
        assert_eq!(wave.samples, 64);
        assert!(!wave.spectrum);

        let wave = CustomWaveform::new(1, &block(&[]));
        assert!(!wave.is_enabled());
        assert_eq!(wave.samples, 512);
    }

    #[test]
    fn t_bank_snapshots_after_init() {
        let mut wave = CustomWaveform::new(0, &block(&[("enabled", "1")]));
        wave.init_code = "t3 = 5;".to_string();

        struct InitCompiler;
        impl ExpressionCompiler for InitCompiler {
            fn compile(
                &self,
                source: &str,
                vars: &mut VariablePool,
            ) -> Result<Box<dyn CompiledProgram>, EngineError> {
                let t3 = vars.slot("t3");
                let is_init = source.contains("t3 = 5");
                Ok(Box::new(move |vars: &mut VariablePool, _: &mut GlobalBanks| {
                    if is_init {
                        vars.set(t3, 5.0);
                    }
                }))
            }
        }

        let per_frame = PerFrameContext::new();
        let mut globals = GlobalBanks::default();
        wave.compile_code_and_run_init(&mut globals, &per_frame, &InitCompiler)
            .unwrap();
        assert_eq!(wave.t_after_init[2], 5.0);
    }
}

//! Per-frame expression context.
//!
//! Hosts the variable slots the per-frame program reads and writes. Each
//! frame the slots are reset from the preset's parsed parameters (with the
//! q bank restored to its after-init snapshot), the dynamic inputs (time,
//! audio, viewport) are loaded, the program runs, and the results drive the
//! frame's rendering. This stage touches no GL and is fully testable.

use kaleid_core::{
    CompiledProgram, EngineError, ExpressionCompiler, GlobalBanks, Slot, VariablePool,
};

use crate::state::PresetState;

pub const Q_COUNT: usize = 32;

/// Interned slot handles for every builtin per-frame variable.
#[derive(Debug, Clone)]
pub struct PerFrameSlots {
    pub zoom: Slot,
    pub zoomexp: Slot,
    pub rot: Slot,
    pub warp: Slot,
    pub cx: Slot,
    pub cy: Slot,
    pub dx: Slot,
    pub dy: Slot,
    pub sx: Slot,
    pub sy: Slot,
    pub decay: Slot,
    pub gamma: Slot,
    pub echo_zoom: Slot,
    pub echo_alpha: Slot,
    pub echo_orient: Slot,
    pub darken_center: Slot,
    pub wrap: Slot,
    pub invert: Slot,
    pub brighten: Slot,
    pub darken: Slot,
    pub solarize: Slot,
    pub monitor: Slot,

    pub wave_mode: Slot,
    pub wave_a: Slot,
    pub wave_r: Slot,
    pub wave_g: Slot,
    pub wave_b: Slot,
    pub wave_x: Slot,
    pub wave_y: Slot,
    pub wave_mystery: Slot,
    pub wave_usedots: Slot,
    pub wave_thick: Slot,
    pub wave_additive: Slot,
    pub wave_brighten: Slot,

    pub ob_size: Slot,
    pub ob_r: Slot,
    pub ob_g: Slot,
    pub ob_b: Slot,
    pub ob_a: Slot,
    pub ib_size: Slot,
    pub ib_r: Slot,
    pub ib_g: Slot,
    pub ib_b: Slot,
    pub ib_a: Slot,

    pub mv_x: Slot,
    pub mv_y: Slot,
    pub mv_dx: Slot,
    pub mv_dy: Slot,
    pub mv_l: Slot,
    pub mv_r: Slot,
    pub mv_g: Slot,
    pub mv_b: Slot,
    pub mv_a: Slot,

    pub blur_min: [Slot; 3],
    pub blur_max: [Slot; 3],
    pub blur1_edge_darken: Slot,
    pub warp_speed: Slot,
    pub warp_scale: Slot,

    pub time: Slot,
    pub fps: Slot,
    pub frame: Slot,
    pub progress: Slot,
    pub bass: Slot,
    pub mid: Slot,
    pub treb: Slot,
    pub bass_att: Slot,
    pub mid_att: Slot,
    pub treb_att: Slot,
    pub meshx: Slot,
    pub meshy: Slot,
    pub pixelsx: Slot,
    pub pixelsy: Slot,
    pub aspectx: Slot,
    pub aspecty: Slot,

    pub q: [Slot; Q_COUNT],
}

/// (slot accessor index, preset parameter key, Milkdrop default).
type VarDefault = (Slot, &'static str, f64);

pub struct PerFrameContext {
    pub pool: VariablePool,
    pub slots: PerFrameSlots,
    defaults: Vec<VarDefault>,
    q_after_init: [f64; Q_COUNT],
    init_program: Option<Box<dyn CompiledProgram>>,
    frame_program: Option<Box<dyn CompiledProgram>>,
}

impl std::fmt::Debug for PerFrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerFrameContext")
            .field("variables", &self.pool.len())
            .field("init_compiled", &self.init_program.is_some())
            .field("frame_compiled", &self.frame_program.is_some())
            .finish()
    }
}

impl Default for PerFrameContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PerFrameContext {
    pub fn new() -> Self {
        let mut pool = VariablePool::new();
        let mut defaults = Vec::new();

        let def = |pool: &mut VariablePool,
                   defaults: &mut Vec<VarDefault>,
                   name: &'static str,
                   value: f64| {
            let slot = pool.slot(name);
            defaults.push((slot, name, value));
            slot
        };

        let slots = PerFrameSlots {
            zoom: def(&mut pool, &mut defaults, "zoom", 1.0),
            zoomexp: def(&mut pool, &mut defaults, "zoomexp", 1.0),
            rot: def(&mut pool, &mut defaults, "rot", 0.0),
            warp: def(&mut pool, &mut defaults, "warp", 1.0),
            cx: def(&mut pool, &mut defaults, "cx", 0.5),
            cy: def(&mut pool, &mut defaults, "cy", 0.5),
            dx: def(&mut pool, &mut defaults, "dx", 0.0),
            dy: def(&mut pool, &mut defaults, "dy", 0.0),
            sx: def(&mut pool, &mut defaults, "sx", 1.0),
            sy: def(&mut pool, &mut defaults, "sy", 1.0),
            decay: def(&mut pool, &mut defaults, "decay", 0.98),
            gamma: def(&mut pool, &mut defaults, "gamma", 2.0),
            echo_zoom: def(&mut pool, &mut defaults, "echo_zoom", 2.0),
            echo_alpha: def(&mut pool, &mut defaults, "echo_alpha", 0.0),
            echo_orient: def(&mut pool, &mut defaults, "echo_orient", 0.0),
            darken_center: def(&mut pool, &mut defaults, "darken_center", 0.0),
            wrap: def(&mut pool, &mut defaults, "wrap", 1.0),
            invert: def(&mut pool, &mut defaults, "invert", 0.0),
            brighten: def(&mut pool, &mut defaults, "brighten", 0.0),
            darken: def(&mut pool, &mut defaults, "darken", 0.0),
            solarize: def(&mut pool, &mut defaults, "solarize", 0.0),
            monitor: def(&mut pool, &mut defaults, "monitor", 0.0),

            wave_mode: def(&mut pool, &mut defaults, "wave_mode", 0.0),
            wave_a: def(&mut pool, &mut defaults, "wave_a", 0.8),
            wave_r: def(&mut pool, &mut defaults, "wave_r", 1.0),
            wave_g: def(&mut pool, &mut defaults, "wave_g", 1.0),
            wave_b: def(&mut pool, &mut defaults, "wave_b", 1.0),
            wave_x: def(&mut pool, &mut defaults, "wave_x", 0.5),
            wave_y: def(&mut pool, &mut defaults, "wave_y", 0.5),
            wave_mystery: def(&mut pool, &mut defaults, "wave_mystery", 0.0),
            wave_usedots: def(&mut pool, &mut defaults, "wave_usedots", 0.0),
            wave_thick: def(&mut pool, &mut defaults, "wave_thick", 0.0),
            wave_additive: def(&mut pool, &mut defaults, "wave_additive", 0.0),
            wave_brighten: def(&mut pool, &mut defaults, "wave_brighten", 1.0),

            ob_size: def(&mut pool, &mut defaults, "ob_size", 0.01),
            ob_r: def(&mut pool, &mut defaults, "ob_r", 0.0),
            ob_g: def(&mut pool, &mut defaults, "ob_g", 0.0),
            ob_b: def(&mut pool, &mut defaults, "ob_b", 0.0),
            ob_a: def(&mut pool, &mut defaults, "ob_a", 0.0),
            ib_size: def(&mut pool, &mut defaults, "ib_size", 0.01),
            ib_r: def(&mut pool, &mut defaults, "ib_r", 0.25),
            ib_g: def(&mut pool, &mut defaults, "ib_g", 0.25),
            ib_b: def(&mut pool, &mut defaults, "ib_b", 0.25),
            ib_a: def(&mut pool, &mut defaults, "ib_a", 0.0),

            mv_x: def(&mut pool, &mut defaults, "mv_x", 12.0),
            mv_y: def(&mut pool, &mut defaults, "mv_y", 9.0),
            mv_dx: def(&mut pool, &mut defaults, "mv_dx", 0.0),
            mv_dy: def(&mut pool, &mut defaults, "mv_dy", 0.0),
            mv_l: def(&mut pool, &mut defaults, "mv_l", 0.9),
            mv_r: def(&mut pool, &mut defaults, "mv_r", 1.0),
            mv_g: def(&mut pool, &mut defaults, "mv_g", 1.0),
            mv_b: def(&mut pool, &mut defaults, "mv_b", 1.0),
            mv_a: def(&mut pool, &mut defaults, "mv_a", 1.0),

            blur_min: [
                def(&mut pool, &mut defaults, "blur1_min", 0.0),
                def(&mut pool, &mut defaults, "blur2_min", 0.0),
                def(&mut pool, &mut defaults, "blur3_min", 0.0),
            ],
            blur_max: [
                def(&mut pool, &mut defaults, "blur1_max", 1.0),
                def(&mut pool, &mut defaults, "blur2_max", 1.0),
                def(&mut pool, &mut defaults, "blur3_max", 1.0),
            ],
            blur1_edge_darken: def(&mut pool, &mut defaults, "blur1_edge_darken", 0.25),
            warp_speed: def(&mut pool, &mut defaults, "warp_speed", 1.0),
            warp_scale: def(&mut pool, &mut defaults, "warp_scale", 1.0),

            // Dynamic inputs: interned but not part of the defaults table.
            time: pool.slot("time"),
            fps: pool.slot("fps"),
            frame: pool.slot("frame"),
            progress: pool.slot("progress"),
            bass: pool.slot("bass"),
            mid: pool.slot("mid"),
            treb: pool.slot("treb"),
            bass_att: pool.slot("bass_att"),
            mid_att: pool.slot("mid_att"),
            treb_att: pool.slot("treb_att"),
            meshx: pool.slot("meshx"),
            meshy: pool.slot("meshy"),
            pixelsx: pool.slot("pixelsx"),
            pixelsy: pool.slot("pixelsy"),
            aspectx: pool.slot("aspectx"),
            aspecty: pool.slot("aspecty"),

            q: std::array::from_fn(|i| pool.slot(&format!("q{}", i + 1))),
        };

        Self {
            pool,
            slots,
            defaults,
            q_after_init: [0.0; Q_COUNT],
            init_program: None,
            frame_program: None,
        }
    }

    /// Resets the builtin variables to the preset's parsed values and loads
    /// the frame's dynamic inputs. The q bank is restored to its after-init
    /// snapshot, matching Milkdrop's q-persistence rules.
    pub fn load_state_variables(&mut self, state: &PresetState) {
        for (slot, key, default) in &self.defaults {
            self.pool.set(*slot, state.parsed.f64(key, *default));
        }

        let s = &self.slots;
        self.pool.set(s.time, state.preset_time);
        self.pool.set(s.fps, state.fps);
        self.pool.set(s.frame, state.frame as f64);
        self.pool.set(s.progress, state.progress);

        self.pool.set(s.bass, state.audio.bass);
        self.pool.set(s.mid, state.audio.mid);
        self.pool.set(s.treb, state.audio.treb);
        self.pool.set(s.bass_att, state.audio.bass_att);
        self.pool.set(s.mid_att, state.audio.mid_att);
        self.pool.set(s.treb_att, state.audio.treb_att);

        self.pool.set(s.meshx, state.mesh_x as f64);
        self.pool.set(s.meshy, state.mesh_y as f64);
        self.pool.set(s.pixelsx, state.viewport_width as f64);
        self.pool.set(s.pixelsy, state.viewport_height as f64);
        let (ax, ay) = state.aspect();
        self.pool.set(s.aspectx, ax);
        self.pool.set(s.aspecty, ay);

        for (i, q) in self.slots.q.iter().enumerate() {
            self.pool.set(*q, self.q_after_init[i]);
        }
    }

    /// Compiles and runs the per-frame init code, then snapshots the q bank.
    pub fn evaluate_init_code(
        &mut self,
        state: &mut PresetState,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<(), EngineError> {
        self.load_state_variables(state);

        if !state.parsed.per_frame_init_code.is_empty() {
            let program = compiler.compile(&state.parsed.per_frame_init_code, &mut self.pool)?;
            program.execute(&mut self.pool, &mut state.globals);
            self.init_program = Some(program);
        }

        for (i, q) in self.slots.q.iter().enumerate() {
            self.q_after_init[i] = self.pool.get(*q);
        }
        Ok(())
    }

    pub fn compile_per_frame_code(
        &mut self,
        source: &str,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<(), EngineError> {
        if source.is_empty() {
            self.frame_program = None;
            return Ok(());
        }
        self.frame_program = Some(compiler.compile(source, &mut self.pool)?);
        Ok(())
    }

    pub fn execute_per_frame_code(&mut self, globals: &mut GlobalBanks) {
        if let Some(program) = &self.frame_program {
            program.execute(&mut self.pool, globals);
        }
    }

    /// Post-execution clamps: gamma in [0, 8], echo_zoom in [0.001, 1000].
    pub fn clamp_ranges(&mut self) {
        let gamma = self.pool.get(self.slots.gamma).clamp(0.0, 8.0);
        self.pool.set(self.slots.gamma, gamma);
        let echo_zoom = self.pool.get(self.slots.echo_zoom).clamp(0.001, 1000.0);
        self.pool.set(self.slots.echo_zoom, echo_zoom);
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> f64 {
        self.pool.get(slot)
    }

    /// The per-frame q bank, copied down into the per-pixel and drawable
    /// contexts.
    pub fn q_values(&self) -> [f64; Q_COUNT] {
        std::array::from_fn(|i| self.pool.get(self.slots.q[i]))
    }

    pub fn blur_ranges(&self) -> ([f32; 3], [f32; 3]) {
        let min = std::array::from_fn(|i| self.pool.get(self.slots.blur_min[i]) as f32);
        let max = std::array::from_fn(|i| self.pool.get(self.slots.blur_max[i]) as f32);
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_core::{NoopExpressionCompiler, ParsedPreset};

    struct FnCompiler<F>(F);

    impl<F> ExpressionCompiler for FnCompiler<F>
    where
        F: Fn(&str, &mut VariablePool) -> Box<dyn CompiledProgram> + Send + Sync,
    {
        fn compile(
            &self,
            source: &str,
            vars: &mut VariablePool,
        ) -> Result<Box<dyn CompiledProgram>, EngineError> {
            Ok((self.0)(source, vars))
        }
    }

    fn state_with(params: &[(&str, &str)]) -> PresetState {
        let parsed = ParsedPreset {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        PresetState::new(parsed, 48, 36)
    }

    #[test]
    fn defaults_and_preset_values_load_each_frame() {
        let mut ctx = PerFrameContext::new();
        let state = state_with(&[("zoom", "1.1"), ("decay", "0.5")]);

        ctx.load_state_variables(&state);
        assert_eq!(ctx.get(ctx.slots.zoom), 1.1);
        assert_eq!(ctx.get(ctx.slots.decay), 0.5);
        // Unspecified parameters fall back to the Milkdrop defaults.
        assert_eq!(ctx.get(ctx.slots.gamma), 2.0);
        assert_eq!(ctx.get(ctx.slots.cx), 0.5);
    }

    #[test]
    fn out_of_range_gamma_and_echo_zoom_are_clamped() {
        let mut ctx = PerFrameContext::new();
        let mut state = state_with(&[]);
        state.parsed.per_frame_code = "gamma = -1; echo_zoom = 2000;".to_string();

        let compiler = FnCompiler(|_: &str, vars: &mut VariablePool| {
            let gamma = vars.lookup("gamma").unwrap();
            let echo_zoom = vars.lookup("echo_zoom").unwrap();
            Box::new(move |vars: &mut VariablePool, _: &mut GlobalBanks| {
                vars.set(gamma, -1.0);
                vars.set(echo_zoom, 2000.0);
            }) as Box<dyn CompiledProgram>
        });

        let source = state.parsed.per_frame_code.clone();
        ctx.compile_per_frame_code(&source, &compiler).unwrap();

        ctx.load_state_variables(&state);
        ctx.execute_per_frame_code(&mut state.globals);
        ctx.clamp_ranges();

        assert_eq!(ctx.get(ctx.slots.gamma), 0.0);
        assert_eq!(ctx.get(ctx.slots.echo_zoom), 1000.0);
    }

    #[test]
    fn q_bank_restores_to_after_init_snapshot() {
        let mut ctx = PerFrameContext::new();
        let mut state = state_with(&[]);
        state.parsed.per_frame_init_code = "q1 = 7;".to_string();

        let compiler = FnCompiler(|source: &str, vars: &mut VariablePool| {
            let q1 = vars.lookup("q1").unwrap();
            let is_init = source.contains("q1 = 7");
            Box::new(move |vars: &mut VariablePool, _: &mut GlobalBanks| {
                vars.set(q1, if is_init { 7.0 } else { 99.0 });
            }) as Box<dyn CompiledProgram>
        });

        ctx.evaluate_init_code(&mut state, &compiler).unwrap();
        assert_eq!(ctx.get(ctx.slots.q[0]), 7.0);

        // A frame program scribbles on q1...
        ctx.compile_per_frame_code("q1 = 99;", &compiler).unwrap();
        ctx.load_state_variables(&state);
        ctx.execute_per_frame_code(&mut state.globals);
        assert_eq!(ctx.get(ctx.slots.q[0]), 99.0);

        // ...and the next frame's reset restores the after-init value.
        ctx.load_state_variables(&state);
        assert_eq!(ctx.get(ctx.slots.q[0]), 7.0);
    }

    #[test]
    fn empty_code_compiles_to_nothing() {
        let mut ctx = PerFrameContext::new();
        ctx.compile_per_frame_code("", &NoopExpressionCompiler)
            .unwrap();
        let mut globals = GlobalBanks::default();
        ctx.execute_per_frame_code(&mut globals);
    }
}

//! Per-pixel (per-vertex) expression context.
//!
//! Evaluated once per warp-mesh vertex. Before each frame the read-only
//! inputs and the q bank are copied down from the per-frame context; per
//! vertex, the mesh writes x/y/rad/ang and the warp defaults, runs the
//! program, and reads back the displaced warp parameters.

use kaleid_core::{CompiledProgram, EngineError, ExpressionCompiler, GlobalBanks, Slot, VariablePool};

use crate::per_frame::{PerFrameContext, Q_COUNT};
use crate::state::PresetState;

#[derive(Debug, Clone)]
pub struct PerPixelSlots {
    pub x: Slot,
    pub y: Slot,
    pub rad: Slot,
    pub ang: Slot,

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

pub struct PerPixelContext {
    pub pool: VariablePool,
    pub slots: PerPixelSlots,
    program: Option<Box<dyn CompiledProgram>>,
}

impl std::fmt::Debug for PerPixelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerPixelContext")
            .field("variables", &self.pool.len())
            .field("compiled", &self.program.is_some())
            .finish()
    }
}

impl Default for PerPixelContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PerPixelContext {
    pub fn new() -> Self {
        let mut pool = VariablePool::new();
        let slots = PerPixelSlots {
            x: pool.slot("x"),
            y: pool.slot("y"),
            rad: pool.slot("rad"),
            ang: pool.slot("ang"),
            zoom: pool.slot("zoom"),
            zoomexp: pool.slot("zoomexp"),
            rot: pool.slot("rot"),
            warp: pool.slot("warp"),
            cx: pool.slot("cx"),
            cy: pool.slot("cy"),
            dx: pool.slot("dx"),
            dy: pool.slot("dy"),
            sx: pool.slot("sx"),
            sy: pool.slot("sy"),
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
            program: None,
        }
    }

    pub fn compile_per_pixel_code(
        &mut self,
        source: &str,
        compiler: &dyn ExpressionCompiler,
    ) -> Result<(), EngineError> {
        if source.is_empty() {
            self.program = None;
            return Ok(());
        }
        self.program = Some(compiler.compile(source, &mut self.pool)?);
        Ok(())
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    /// Copies the frame-constant inputs from the per-frame context: dynamic
    /// state, the warp parameter defaults, and the q bank as left behind by
    /// the per-frame code.
    pub fn load_per_frame_values(&mut self, state: &PresetState, per_frame: &PerFrameContext) {
        let s = &self.slots;
        let f = &per_frame.slots;

        for (dst, src) in [
            (s.zoom, f.zoom),
            (s.zoomexp, f.zoomexp),
            (s.rot, f.rot),
            (s.warp, f.warp),
            (s.cx, f.cx),
            (s.cy, f.cy),
            (s.dx, f.dx),
            (s.dy, f.dy),
            (s.sx, f.sx),
            (s.sy, f.sy),
        ] {
            self.pool.set(dst, per_frame.get(src));
        }

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

        let q = per_frame.q_values();
        for (i, slot) in self.slots.q.iter().enumerate() {
            self.pool.set(*slot, q[i]);
        }
    }

    /// Runs the per-pixel program for one mesh vertex. The caller seeds
    /// x/y/rad/ang (and re-seeds the writable warp parameters) beforehand
    /// and reads the displaced values back afterwards.
    pub fn execute(&mut self, globals: &mut GlobalBanks) {
        if let Some(program) = &self.program {
            program.execute(&mut self.pool, globals);
        }
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> f64 {
        self.pool.get(slot)
    }

    #[inline]
    pub fn set(&mut self, slot: Slot, value: f64) {
        self.pool.set(slot, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_core::ParsedPreset;

    #[test]
    fn per_frame_values_copy_down() {
        let state = PresetState::new(ParsedPreset::default(), 48, 36);
        let mut per_frame = PerFrameContext::new();
        per_frame.load_state_variables(&state);
        per_frame.pool.set(per_frame.slots.zoom, 1.25);
        per_frame.pool.set(per_frame.slots.q[4], 3.5);

        let mut per_pixel = PerPixelContext::new();
        per_pixel.load_per_frame_values(&state, &per_frame);

        assert_eq!(per_pixel.get(per_pixel.slots.zoom), 1.25);
        assert_eq!(per_pixel.get(per_pixel.slots.q[4]), 3.5);
        assert_eq!(per_pixel.get(per_pixel.slots.meshx), 48.0);
    }
}

//! The in-flight preset switch record.
//!
//! Thread-safety model:
//! - `cancelled` and `state` are atomic and may be read/written anywhere;
//!   state transitions are forward-only and linearized through
//!   [`SwitchContext::advance_to`] with acquire/release ordering.
//! - `path`, `smooth` and the preloader handle are set once before
//!   submission and read-only after.
//! - `file_data` and the error message are written by the CPU worker before
//!   the state advances to `GlStaging`, then only read.
//! - the preset slot is populated by the render thread in `GlStaging`,
//!   borrowed by the worker during `ExpressionCompiling`, and consumed by
//!   the render thread at activation.
//!
//! At most one non-terminal context exists at a time; submitting a new one
//! cancels its predecessor via the atomic flag.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use kaleid_core::SwitchState;
use kaleid_preset::Preset;
use kaleid_render::TexturePreloader;

#[derive(Debug)]
pub struct SwitchContext {
    /// Path or URL of the preset to load.
    pub path: String,
    /// True = soft transition, false = hard cut.
    pub smooth: bool,

    cancelled: AtomicBool,
    state: AtomicU8,

    /// Raw file contents staged by the CPU worker.
    file_data: Mutex<Vec<u8>>,
    error_message: Mutex<String>,

    /// The preset under construction. Exclusively owned by the render
    /// thread except while the worker compiles expressions.
    preset: Mutex<Option<Box<Preset>>>,

    /// Texture pre-decode staging shared with the worker.
    preloader: Arc<TexturePreloader>,

    /// GL phase bookkeeping; render thread only.
    gl_init_phase: AtomicUsize,
    gl_phase_executed: AtomicBool,
}

impl SwitchContext {
    pub fn new(path: String, smooth: bool, preloader: Arc<TexturePreloader>) -> Self {
        Self {
            path,
            smooth,
            cancelled: AtomicBool::new(false),
            state: AtomicU8::new(SwitchState::Idle as u8),
            file_data: Mutex::new(Vec::new()),
            error_message: Mutex::new(String::new()),
            preset: Mutex::new(None),
            preloader,
            gl_init_phase: AtomicUsize::new(0),
            gl_phase_executed: AtomicBool::new(false),
        }
    }

    // ---- Cancellation ----

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    // ---- State machine ----

    pub fn state(&self) -> SwitchState {
        SwitchState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Forward-only transition. `Failed` is reachable from every
    /// non-terminal state; anything else must strictly progress. Returns
    /// false when the transition was refused.
    pub fn advance_to(&self, next: SwitchState) -> bool {
        loop {
            let current = self.state();
            if current.is_terminal() {
                return false;
            }
            let allowed = next == SwitchState::Failed || next > current;
            if !allowed {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current as u8,
                    next as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Records an error and moves to `Failed`.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(path = self.path.as_str(), error = message.as_str(), "switch failed");
        *self.error_message.lock().unwrap() = message;
        self.advance_to(SwitchState::Failed);
    }

    pub fn error_message(&self) -> String {
        self.error_message.lock().unwrap().clone()
    }

    // ---- Worker-staged data ----

    pub fn set_file_data(&self, data: Vec<u8>) {
        *self.file_data.lock().unwrap() = data;
    }

    pub fn take_file_data(&self) -> Vec<u8> {
        std::mem::take(&mut *self.file_data.lock().unwrap())
    }

    pub fn preloader(&self) -> &Arc<TexturePreloader> {
        &self.preloader
    }

    // ---- Preset hand-off ----

    pub fn store_preset(&self, preset: Box<Preset>) {
        *self.preset.lock().unwrap() = Some(preset);
    }

    pub fn take_preset(&self) -> Option<Box<Preset>> {
        self.preset.lock().unwrap().take()
    }

    /// Runs `f` with exclusive access to the staged preset, if any.
    pub fn with_preset<R>(&self, f: impl FnOnce(&mut Preset) -> R) -> Option<R> {
        self.preset.lock().unwrap().as_mut().map(|p| f(p))
    }

    // ---- GL phase bookkeeping (render thread only) ----

    pub fn gl_init_phase(&self) -> usize {
        self.gl_init_phase.load(Ordering::Relaxed)
    }

    pub fn advance_gl_phase(&self) {
        self.gl_init_phase.fetch_add(1, Ordering::Relaxed);
        self.gl_phase_executed.store(false, Ordering::Relaxed);
    }

    pub fn gl_phase_executed(&self) -> bool {
        self.gl_phase_executed.load(Ordering::Relaxed)
    }

    pub fn set_gl_phase_executed(&self) {
        self.gl_phase_executed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_render::TextureManager;

    fn context() -> SwitchContext {
        let manager = TextureManager::new(Vec::new());
        SwitchContext::new("/presets/a.milk".to_string(), true, manager.preloader())
    }

    #[test]
    fn transitions_only_move_forward() {
        let ctx = context();
        assert_eq!(ctx.state(), SwitchState::Idle);

        assert!(ctx.advance_to(SwitchState::CpuLoading));
        assert!(ctx.advance_to(SwitchState::GlStaging));
        // Backwards is refused.
        assert!(!ctx.advance_to(SwitchState::CpuLoading));
        assert_eq!(ctx.state(), SwitchState::GlStaging);

        assert!(ctx.advance_to(SwitchState::ExpressionCompiling));
        assert!(ctx.advance_to(SwitchState::GlPhases));
        assert!(ctx.advance_to(SwitchState::Activating));
        assert!(ctx.advance_to(SwitchState::Completed));
        assert_eq!(ctx.state(), SwitchState::Completed);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let ctx = context();
        ctx.fail("boom");
        assert_eq!(ctx.state(), SwitchState::Failed);
        assert_eq!(ctx.error_message(), "boom");

        assert!(!ctx.advance_to(SwitchState::Activating));
        assert!(!ctx.advance_to(SwitchState::Completed));
        assert_eq!(ctx.state(), SwitchState::Failed);

        let ctx = context();
        assert!(ctx.advance_to(SwitchState::CpuLoading));
        ctx.advance_to(SwitchState::GlStaging);
        ctx.advance_to(SwitchState::ExpressionCompiling);
        ctx.advance_to(SwitchState::GlPhases);
        ctx.advance_to(SwitchState::Activating);
        ctx.advance_to(SwitchState::Completed);
        // A completed switch cannot fail retroactively.
        ctx.fail("too late");
        assert_eq!(ctx.state(), SwitchState::Completed);
    }

    #[test]
    fn failed_is_reachable_from_any_active_state() {
        for target in [
            SwitchState::Idle,
            SwitchState::CpuLoading,
            SwitchState::GlStaging,
            SwitchState::GlPhases,
        ] {
            let ctx = context();
            if target > SwitchState::Idle {
                ctx.advance_to(target);
            }
            assert!(ctx.advance_to(SwitchState::Failed), "from {target:?}");
        }
    }

    #[test]
    fn gl_phase_bookkeeping_resets_executed_flag() {
        let ctx = context();
        assert_eq!(ctx.gl_init_phase(), 0);
        assert!(!ctx.gl_phase_executed());

        ctx.set_gl_phase_executed();
        assert!(ctx.gl_phase_executed());

        ctx.advance_gl_phase();
        assert_eq!(ctx.gl_init_phase(), 1);
        assert!(!ctx.gl_phase_executed());
    }
}

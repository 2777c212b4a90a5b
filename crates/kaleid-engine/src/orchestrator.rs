//! The preset-switch orchestrator.
//!
//! At most one non-terminal switch exists at a time. `request_switch`
//! constructs a new context, cancels any predecessor through its atomic
//! flag, and hands the new context to the CPU worker. Each frame the render
//! thread calls [`SwitchOrchestrator::drive`], which advances the in-flight
//! switch by exactly one polled step — the render thread never blocks on
//! file I/O, image decode or expression compilation.
//!
//! Failure policy: the active preset never dies because of errors in the
//! next one. A failed switch is discarded and reported; the current preset
//! keeps rendering.

use std::sync::Arc;

use tracing::{debug, info};

use kaleid_core::{
    EngineError, ExpressionCompiler, ParsedPreset, PresetParser, ShaderTranspiler, SwitchState,
};
use kaleid_preset::{Preset, INIT_PHASE_COUNT};
use kaleid_render::{RenderContext, TexturePreloader};

use crate::switch::SwitchContext;
use crate::worker::{split_protocol, CpuWorker};

/// What `drive` did this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    /// No switch in flight.
    Idle,
    /// A switch is progressing; the current preset keeps rendering.
    InProgress(SwitchState),
    /// The new preset was activated this frame.
    Activated,
    /// The switch failed; the current preset is untouched.
    Failed(String),
}

pub struct SwitchOrchestrator {
    worker: CpuWorker,
    current: Option<Arc<SwitchContext>>,

    parser: Arc<dyn PresetParser>,
    compiler: Arc<dyn ExpressionCompiler>,
    transpiler: Arc<dyn ShaderTranspiler>,
    default_mesh: (i32, i32),
}

impl std::fmt::Debug for SwitchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchOrchestrator")
            .field("in_flight", &self.current.as_ref().map(|c| c.state()))
            .finish()
    }
}

impl SwitchOrchestrator {
    pub fn new(
        parser: Arc<dyn PresetParser>,
        compiler: Arc<dyn ExpressionCompiler>,
        transpiler: Arc<dyn ShaderTranspiler>,
        default_mesh: (i32, i32),
    ) -> Self {
        Self {
            worker: CpuWorker::new(),
            current: None,
            parser,
            compiler,
            transpiler,
            default_mesh,
        }
    }

    /// The in-flight switch, if any.
    pub fn current(&self) -> Option<&Arc<SwitchContext>> {
        self.current.as_ref()
    }

    pub fn parser(&self) -> Arc<dyn PresetParser> {
        Arc::clone(&self.parser)
    }

    pub fn compiler(&self) -> Arc<dyn ExpressionCompiler> {
        Arc::clone(&self.compiler)
    }

    pub fn transpiler(&self) -> Arc<dyn ShaderTranspiler> {
        Arc::clone(&self.transpiler)
    }

    /// Starts a new switch, cancelling any predecessor.
    pub fn request_switch(
        &mut self,
        path: impl Into<String>,
        smooth: bool,
        preloader: Arc<TexturePreloader>,
    ) -> Arc<SwitchContext> {
        if let Some(previous) = self.current.take() {
            previous.cancel();
        }

        let ctx = Arc::new(SwitchContext::new(path.into(), smooth, preloader));
        ctx.advance_to(SwitchState::CpuLoading);
        self.worker.start_load(Arc::clone(&ctx));

        debug!(path = ctx.path.as_str(), smooth = ctx.smooth, "switch requested");
        self.current = Some(Arc::clone(&ctx));
        ctx
    }

    /// Advances the in-flight switch by one step. Called once per frame on
    /// the render thread; `active` is the engine's active-preset slot.
    pub unsafe fn drive(
        &mut self,
        render_ctx: &mut RenderContext,
        active: &mut Option<Box<Preset>>,
    ) -> DriveOutcome {
        let Some(ctx) = self.current.clone() else {
            return DriveOutcome::Idle;
        };

        match ctx.state() {
            // CPU worker owns these stages; just wait.
            SwitchState::Idle | SwitchState::CpuLoading | SwitchState::ExpressionCompiling => {
                DriveOutcome::InProgress(ctx.state())
            }

            SwitchState::GlStaging => {
                self.stage_preset(&ctx);
                DriveOutcome::InProgress(ctx.state())
            }

            SwitchState::GlPhases => {
                self.step_gl_phase(&ctx, render_ctx);
                DriveOutcome::InProgress(ctx.state())
            }

            SwitchState::Activating => {
                let outcome = self.activate(&ctx, render_ctx, active);
                self.current = None;
                outcome
            }

            SwitchState::Completed => {
                self.current = None;
                DriveOutcome::Idle
            }

            SwitchState::Failed => {
                let message = ctx.error_message();
                self.current = None;
                DriveOutcome::Failed(message)
            }
        }
    }

    /// GlStaging: construct the preset from the staged bytes (or the stream
    /// protocol for non-file URLs), then hand expression compilation back to
    /// the worker.
    fn stage_preset(&mut self, ctx: &Arc<SwitchContext>) {
        if ctx.is_cancelled() {
            return;
        }

        let parsed = match self.parse_for(ctx) {
            Ok(parsed) => parsed,
            Err(e) => {
                ctx.fail(e.to_string());
                return;
            }
        };

        let filename = ctx
            .path
            .rsplit('/')
            .next()
            .unwrap_or(ctx.path.as_str())
            .to_string();
        let preset = Preset::new(
            filename,
            parsed,
            Arc::clone(&self.compiler),
            Arc::clone(&self.transpiler),
            self.default_mesh,
        );
        // The worker compiles expressions next, so the GL phases must not
        // redo it inline.
        preset.set_expressions_compiled(true);
        ctx.store_preset(Box::new(preset));

        if !ctx.advance_to(SwitchState::ExpressionCompiling) {
            return;
        }
        self.worker.submit_expression_compile(Arc::clone(ctx));
    }

    fn parse_for(&self, ctx: &SwitchContext) -> Result<ParsedPreset, EngineError> {
        let (protocol, _) = split_protocol(&ctx.path);
        if !protocol.is_empty() && protocol != "file" {
            return self.parser.load_url(&ctx.path);
        }
        let data = ctx.take_file_data();
        self.parser.parse(&ctx.path, &data)
    }

    /// GlPhases: execute the next phase, or poll its async work, advancing
    /// the phase index until all phases are done.
    unsafe fn step_gl_phase(&mut self, ctx: &Arc<SwitchContext>, render_ctx: &mut RenderContext) {
        if ctx.is_cancelled() {
            ctx.fail("switch cancelled");
            return;
        }

        let phase = ctx.gl_init_phase();
        if phase >= INIT_PHASE_COUNT {
            ctx.advance_to(SwitchState::Activating);
            return;
        }

        if !ctx.gl_phase_executed() {
            let result =
                ctx.with_preset(|preset| unsafe { preset.initialize_phase(render_ctx, phase) });
            match result {
                Some(Err(e)) => {
                    // Fatal for the new preset only.
                    ctx.fail(e.to_string());
                    return;
                }
                Some(Ok(())) => ctx.set_gl_phase_executed(),
                None => {
                    ctx.fail("switch context lost its preset before the GL phases");
                    return;
                }
            }
            return;
        }

        let complete = ctx
            .with_preset(|preset| unsafe { preset.is_phase_complete(render_ctx.gl, phase) })
            .unwrap_or(true);
        if complete {
            ctx.advance_gl_phase();
            if ctx.gl_init_phase() >= INIT_PHASE_COUNT {
                ctx.advance_to(SwitchState::Activating);
            }
        }
    }

    /// Activating: atomically replace the active preset and release the old
    /// one so its GL objects die on the render thread.
    unsafe fn activate(
        &mut self,
        ctx: &Arc<SwitchContext>,
        render_ctx: &mut RenderContext,
        active: &mut Option<Box<Preset>>,
    ) -> DriveOutcome {
        let Some(mut preset) = ctx.take_preset() else {
            ctx.fail("switch context lost its preset before activation");
            return DriveOutcome::Failed(ctx.error_message());
        };

        if ctx.smooth {
            if let Some(previous_output) = active.as_ref().and_then(|p| p.output_texture()) {
                if let Err(e) = preset.draw_initial_image(previous_output, render_ctx) {
                    debug!("initial-image copy failed (continuing with hard cut): {e}");
                }
            }
        }

        if let Some(mut old) = active.replace(preset) {
            old.destroy(render_ctx.gl);
        }
        ctx.advance_to(SwitchState::Completed);

        info!(path = ctx.path.as_str(), "preset activated");
        DriveOutcome::Activated
    }
}

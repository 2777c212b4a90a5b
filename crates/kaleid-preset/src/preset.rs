//! The preset object.
//!
//! Owns the ping-pong framebuffer, the expression contexts, the warp mesh,
//! the secondary drawables and the final composite, and drives them through
//! the per-frame pipeline. Initialization is split into three phases so the
//! switch orchestrator can spread GL work across frames:
//!
//! - phase 0: state, framebuffers, mesh buffers (plus inline expression
//!   compilation when the CPU worker has not already done it);
//! - phase 1: submit the warp and composite shaders for async compilation;
//! - phase 2: finalize compilation, resolve samplers, mark initialized.
//!
//! `compile_expressions` is pure CPU and safe to run on the worker thread
//! before phase 0 executes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use glow::HasContext;
use tracing::{debug, info};

use kaleid_core::{
    EngineError, ExpressionCompiler, FrameAudioData, ParsedPreset, ShaderTranspiler,
    CUSTOM_SHAPE_COUNT, CUSTOM_WAVEFORM_COUNT,
};
use kaleid_render::{
    BlurTextures, FlipTexture, Framebuffer, RenderContext, Texture, TexturePreloader,
};

use crate::border::Border;
use crate::composite::FinalComposite;
use crate::custom_shape::CustomShape;
use crate::custom_waveform::CustomWaveform;
use crate::darken_center::DarkenCenter;
use crate::draw::{ColorDraw, TexturedDraw};
use crate::mesh::PerPixelMesh;
use crate::motion_vectors::MotionVectors;
use crate::per_frame::PerFrameContext;
use crate::per_pixel::PerPixelContext;
use crate::state::PresetState;
use crate::waveform::Waveform;

pub const INIT_PHASE_COUNT: usize = 3;

pub struct Preset {
    filename: String,

    state: PresetState,
    per_frame: PerFrameContext,
    per_pixel: PerPixelContext,

    mesh: PerPixelMesh,
    motion_vectors: MotionVectors,
    waveform: Waveform,
    custom_waveforms: Vec<CustomWaveform>,
    custom_shapes: Vec<CustomShape>,
    darken_center: DarkenCenter,
    border: Border,
    composite: FinalComposite,

    framebuffer: Option<Framebuffer>,
    flip: Option<FlipTexture>,
    uv_map: Option<Texture>,
    color_draw: Option<ColorDraw>,
    textured_draw: Option<TexturedDraw>,

    current_index: usize,
    previous_index: usize,
    is_first_frame: bool,
    start_time: Option<f64>,
    initialized: bool,

    expressions_compiled: AtomicBool,
    shaders_transpiled: AtomicBool,

    compiler: Arc<dyn ExpressionCompiler>,
    transpiler: Arc<dyn ShaderTranspiler>,
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preset")
            .field("filename", &self.filename)
            .field("initialized", &self.initialized)
            .field(
                "expressions_compiled",
                &self.expressions_compiled.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl Preset {
    /// Builds a preset from a parsed file. No GL; runs on the render thread
    /// so the constructed object can be handed to the CPU worker for
    /// expression compilation before any GL phase executes.
    pub fn new(
        filename: String,
        parsed: ParsedPreset,
        compiler: Arc<dyn ExpressionCompiler>,
        transpiler: Arc<dyn ShaderTranspiler>,
        default_mesh: (i32, i32),
    ) -> Self {
        let state = PresetState::new(parsed, default_mesh.0, default_mesh.1);

        let custom_waveforms = (0..CUSTOM_WAVEFORM_COUNT)
            .map(|i| {
                let block = state.parsed.waves.get(i).cloned().unwrap_or_default();
                CustomWaveform::new(i, &block)
            })
            .collect();
        let custom_shapes = (0..CUSTOM_SHAPE_COUNT)
            .map(|i| {
                let block = state.parsed.shapes.get(i).cloned().unwrap_or_default();
                CustomShape::new(i, &block)
            })
            .collect();

        let mut mesh = PerPixelMesh::new();
        mesh.load_warp_shader(&state);
        let mut composite = FinalComposite::new();
        composite.load_composite_shader(&state);

        Self {
            filename,
            state,
            per_frame: PerFrameContext::new(),
            per_pixel: PerPixelContext::new(),
            mesh,
            motion_vectors: MotionVectors::new(),
            waveform: Waveform::new(),
            custom_waveforms,
            custom_shapes,
            darken_center: DarkenCenter::new(),
            border: Border::new(),
            composite,
            framebuffer: None,
            flip: None,
            uv_map: None,
            color_draw: None,
            textured_draw: None,
            current_index: 0,
            previous_index: 1,
            is_first_frame: true,
            start_time: None,
            initialized: false,
            expressions_compiled: AtomicBool::new(false),
            shaders_transpiled: AtomicBool::new(false),
            compiler,
            transpiler,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> &PresetState {
        &self.state
    }

    /// Blend-in progress for smooth transitions, written by the engine.
    pub fn set_progress(&mut self, progress: f64) {
        self.state.progress = progress.clamp(0.0, 1.0);
    }

    // ---- CPU-side compilation (worker thread) ----

    /// Transpiles shaders and compiles expression bytecode. Pure CPU; if it
    /// already ran, the GL phases skip the inline path.
    pub fn compile_expressions(&mut self) -> Result<(), EngineError> {
        if !self.shaders_transpiled.load(Ordering::Acquire) {
            self.mesh.transpile_warp_shader(self.transpiler.as_ref())?;
            self.composite
                .transpile_composite_shader(self.transpiler.as_ref())?;
            self.shaders_transpiled.store(true, Ordering::Release);
        }

        self.compile_code_and_run_init()?;
        self.expressions_compiled.store(true, Ordering::Release);
        Ok(())
    }

    /// Marks expression compilation as done (or to be skipped), so phase 0
    /// does not redundantly compile inline.
    pub fn set_expressions_compiled(&self, compiled: bool) {
        self.expressions_compiled.store(compiled, Ordering::Release);
    }

    fn compile_code_and_run_init(&mut self) -> Result<(), EngineError> {
        let compiler = Arc::clone(&self.compiler);

        self.per_frame
            .evaluate_init_code(&mut self.state, compiler.as_ref())?;
        self.per_frame
            .compile_per_frame_code(&self.state.parsed.per_frame_code, compiler.as_ref())?;
        self.per_pixel
            .compile_per_pixel_code(&self.state.parsed.per_pixel_code, compiler.as_ref())?;

        for wave in &mut self.custom_waveforms {
            wave.compile_code_and_run_init(
                &mut self.state.globals,
                &self.per_frame,
                compiler.as_ref(),
            )?;
        }
        for shape in &mut self.custom_shapes {
            shape.compile_code_and_run_init(
                &mut self.state.globals,
                &self.per_frame,
                compiler.as_ref(),
            )?;
        }
        Ok(())
    }

    /// Asks the texture manager's preloader to pre-decode every image the
    /// warp and composite shaders reference. Any thread.
    pub fn preload_textures(&self, preloader: &TexturePreloader) {
        let mut names: std::collections::HashSet<String> = std::collections::HashSet::new();
        names.extend(self.mesh.warp_sampler_names().iter().cloned());
        names.extend(self.composite.composite_sampler_names().iter().cloned());
        if !names.is_empty() {
            preloader.preload_for_samplers(&names);
        }
    }

    // ---- Initialization (render thread) ----

    /// Monolithic initialization: all phases synchronously.
    pub unsafe fn initialize(&mut self, ctx: &mut RenderContext) -> Result<(), EngineError> {
        let t0 = Instant::now();
        self.initialize_phase(ctx, 0)?;
        let t1 = Instant::now();

        self.mesh.compile_warp_shader(ctx.gl, ctx.texture_manager)?;
        let t2 = Instant::now();
        self.composite
            .compile_composite_shader(ctx.gl, ctx.texture_manager)?;
        let t3 = Instant::now();

        self.initialized = true;

        debug!(
            setup_ms = (t1 - t0).as_secs_f64() * 1e3,
            warp_ms = (t2 - t1).as_secs_f64() * 1e3,
            composite_ms = (t3 - t2).as_secs_f64() * 1e3,
            total_ms = (t3 - t0).as_secs_f64() * 1e3,
            preset = self.filename.as_str(),
            "preset initialized"
        );
        Ok(())
    }

    pub fn initialize_phase_count(&self) -> usize {
        INIT_PHASE_COUNT
    }

    /// Executes one initialization phase on the render thread.
    pub unsafe fn initialize_phase(
        &mut self,
        ctx: &mut RenderContext,
        phase: usize,
    ) -> Result<(), EngineError> {
        let gl = ctx.gl;
        match phase {
            0 => {
                if self.state.blur.is_none() {
                    self.state.blur = Some(BlurTextures::new(gl)?);
                }

                if self.framebuffer.is_none() {
                    let mut framebuffer = Framebuffer::new(gl, 2)?;
                    for index in 0..2 {
                        framebuffer.create_color_attachment(
                            gl,
                            index,
                            0,
                            glow::RGBA8,
                            glow::RGBA,
                            glow::UNSIGNED_BYTE,
                        )?;
                    }
                    self.framebuffer = Some(framebuffer);
                    self.uv_map = Some(Texture::new_2d(gl, glow::RG16F, glow::RG, glow::FLOAT)?);
                    self.flip = Some(FlipTexture::new(gl)?);
                    self.color_draw = Some(ColorDraw::new(gl)?);
                    self.textured_draw = Some(TexturedDraw::new(gl)?);
                    Framebuffer::unbind(gl);
                }

                self.mesh.create_mesh(gl, &self.state)?;

                // Inline path when the CPU worker didn't get here first.
                if !self.expressions_compiled.load(Ordering::Acquire) {
                    self.compile_expressions()?;
                } else if !self.shaders_transpiled.load(Ordering::Acquire) {
                    self.mesh.transpile_warp_shader(self.transpiler.as_ref())?;
                    self.composite
                        .transpile_composite_shader(self.transpiler.as_ref())?;
                    self.shaders_transpiled.store(true, Ordering::Release);
                }

                if let Some(framebuffer) = self.framebuffer.as_mut() {
                    framebuffer.set_size(gl, ctx.viewport_width, ctx.viewport_height);
                }
                if let Some(uv_map) = self.uv_map.as_mut() {
                    uv_map.set_size(gl, ctx.viewport_width, ctx.viewport_height);
                }
                if self.state.main_texture.is_none() {
                    self.state.main_texture = self
                        .framebuffer
                        .as_ref()
                        .and_then(|f| f.texture(self.previous_index, 0));
                }
            }

            // Submit both shaders in the same frame; with the parallel
            // compile extension the driver works on them concurrently.
            1 => {
                self.mesh.compile_warp_shader_async(gl)?;
                self.composite.compile_composite_shader_async(gl)?;
            }

            2 => {
                self.mesh
                    .finalize_warp_shader_compile(gl, ctx.texture_manager)?;
                self.composite
                    .finalize_composite_shader_compile(gl, ctx.texture_manager)?;
                self.initialized = true;
                info!(preset = self.filename.as_str(), "preset ready");
            }

            _ => {}
        }
        Ok(())
    }

    /// Polls the current phase's async work without blocking.
    pub unsafe fn is_phase_complete(&mut self, gl: &glow::Context, phase: usize) -> bool {
        match phase {
            1 => {
                self.mesh.is_warp_shader_compile_complete(gl)
                    && self.composite.is_composite_shader_compile_complete(gl)
            }
            _ => true,
        }
    }

    // ---- Per-frame rendering ----

    pub unsafe fn render_frame(
        &mut self,
        audio: &FrameAudioData,
        ctx: &mut RenderContext,
    ) -> Result<(), EngineError> {
        if self.framebuffer.is_none() || self.flip.is_none() || self.uv_map.is_none() {
            return Ok(());
        }
        let gl = ctx.gl;
        let width = ctx.viewport_width;
        let height = ctx.viewport_height;

        // 1. Snapshot audio + render context into the state.
        self.state.audio = audio.clone();
        self.state.viewport_width = width;
        self.state.viewport_height = height;
        self.state.time = ctx.time;
        self.state.frame = ctx.frame;
        self.state.fps = ctx.fps;
        let start = *self.start_time.get_or_insert(ctx.time);
        self.state.preset_time = ctx.time - start;

        // 2. Track viewport changes.
        {
            let framebuffer = self.framebuffer.as_mut().expect("checked above");
            if framebuffer.set_size(gl, width, height) {
                if let Some(uv_map) = self.uv_map.as_mut() {
                    uv_map.set_size(gl, width, height);
                }
                self.is_first_frame = true;
            }
        }

        // 3. Seat main on the previous frame and run per-frame code.
        self.state.main_texture = self
            .framebuffer
            .as_ref()
            .and_then(|f| f.texture(self.previous_index, 0));
        self.per_frame_update();

        gl.viewport(0, 0, width, height);

        // 4. Motion vectors onto the previous frame, then y-flip it and make
        //    the flipped copy the logical main texture.
        let framebuffer = self.framebuffer.as_mut().expect("checked above");
        framebuffer.bind(gl, self.previous_index);
        if !self.is_first_frame {
            let uv_handle = self.uv_map.as_ref().expect("checked above").handle;
            self.motion_vectors.draw(
                gl,
                ctx.shader_cache,
                &self.state,
                &self.per_frame,
                uv_handle,
            )?;
        }

        let previous_color = framebuffer
            .texture(self.previous_index, 0)
            .ok_or_else(|| EngineError::other("ping-pong framebuffer has no color attachment"))?;
        let flip = self.flip.as_mut().expect("checked above");
        let flipped = flip.draw(
            gl,
            ctx.shader_cache,
            ctx.fullscreen,
            previous_color,
            width,
            height,
            true,
            false,
        )?;
        self.state.main_texture = Some(flipped);

        // 5. Warp the previous frame into the current one, writing the
        //    motion-vector UV map through attachment slot 1.
        let uv_handle = self.uv_map.as_ref().expect("checked above").handle;
        framebuffer.bind(gl, self.current_index);
        framebuffer.set_attachment(gl, self.current_index, 1, uv_handle);
        self.mesh
            .draw(gl, &mut self.state, &self.per_frame, &mut self.per_pixel);
        let framebuffer = self.framebuffer.as_mut().expect("checked above");
        framebuffer.remove_color_attachment(gl, self.current_index, 1);

        // 6. Rebuild the blur chain from the warped image.
        let warped = framebuffer
            .texture(self.current_index, 0)
            .ok_or_else(|| EngineError::other("ping-pong framebuffer has no color attachment"))?;
        let (blur_min, blur_max) = self.per_frame.blur_ranges();
        if let Some(blur) = self.state.blur.as_mut() {
            blur.update(
                gl,
                ctx.shader_cache,
                ctx.fullscreen,
                warped,
                width,
                height,
                blur_min,
                blur_max,
            )?;
        }

        // 7. Layer the drawables over the warped image.
        let framebuffer = self.framebuffer.as_mut().expect("checked above");
        framebuffer.bind(gl, self.current_index);
        gl.viewport(0, 0, width, height);

        let color_draw = self.color_draw.as_ref().expect("created in phase 0");
        let textured_draw = self.textured_draw.as_ref().expect("created in phase 0");

        for shape in &mut self.custom_shapes {
            shape.draw(
                gl,
                ctx.shader_cache,
                color_draw,
                textured_draw,
                &mut self.state,
                &self.per_frame,
            )?;
        }
        for wave in &mut self.custom_waveforms {
            wave.draw(gl, ctx.shader_cache, color_draw, &mut self.state, &self.per_frame)?;
        }
        self.waveform
            .draw(gl, ctx.shader_cache, color_draw, &self.state, &self.per_frame)?;

        if self.per_frame.get(self.per_frame.slots.darken_center) > 0.0 {
            self.darken_center.draw(gl, ctx.shader_cache, color_draw)?;
        }
        self.border
            .draw(gl, ctx.shader_cache, color_draw, &self.per_frame)?;

        // 8. Y-flip again for compositing.
        let framebuffer = self.framebuffer.as_mut().expect("checked above");
        let current_color = framebuffer
            .texture(self.current_index, 0)
            .ok_or_else(|| EngineError::other("ping-pong framebuffer has no color attachment"))?;
        let flip = self.flip.as_mut().expect("checked above");
        let flipped = flip.draw(
            gl,
            ctx.shader_cache,
            ctx.fullscreen,
            current_color,
            width,
            height,
            true,
            false,
        )?;
        self.state.main_texture = Some(flipped);

        // 9. Composite into the no-longer-needed previous frame.
        framebuffer.bind_read(gl, self.current_index);
        framebuffer.bind_draw(gl, self.previous_index);
        self.composite.draw(
            gl,
            ctx.shader_cache,
            ctx.fullscreen,
            &self.state,
            &self.per_frame,
        )?;

        if !self.composite.has_composite_shader() {
            // Legacy effects land upside down; flip the result in place so
            // orientation stays consistent with the shader path.
            let framebuffer = self.framebuffer.as_mut().expect("checked above");
            let composited = framebuffer
                .texture(self.previous_index, 0)
                .ok_or_else(|| EngineError::other("ping-pong framebuffer has no color attachment"))?;
            let target_fbo = framebuffer.fbo(self.previous_index);
            let flip = self.flip.as_mut().expect("checked above");
            flip.draw_in_place(
                gl,
                ctx.shader_cache,
                ctx.fullscreen,
                composited,
                target_fbo,
                width,
                height,
                true,
                false,
            )?;
        }

        // 10. Swap ping-pong ids for the next frame.
        std::mem::swap(&mut self.current_index, &mut self.previous_index);
        self.is_first_frame = false;
        Framebuffer::unbind(gl);

        debug_assert!(
            !self
                .framebuffer
                .as_ref()
                .map(|f| f.has_external_attachment(1))
                .unwrap_or(false),
            "motion-vector UV map must not stay attached after a frame"
        );

        Ok(())
    }

    fn per_frame_update(&mut self) {
        self.per_frame.load_state_variables(&self.state);
        self.per_pixel
            .load_per_frame_values(&self.state, &self.per_frame);

        self.per_frame.execute_per_frame_code(&mut self.state.globals);
        self.per_frame.clamp_ranges();

        self.per_pixel
            .load_per_frame_values(&self.state, &self.per_frame);
    }

    // ---- Output / host hooks ----

    /// The composited image; always in the "current" surface after a frame.
    pub fn output_texture(&self) -> Option<glow::NativeTexture> {
        self.framebuffer
            .as_ref()
            .and_then(|f| f.texture(self.current_index, 0))
    }

    /// Copies a caller-provided image (e.g. the previous preset's last
    /// frame) into the feedback loop so the first frame blends from it.
    pub unsafe fn draw_initial_image(
        &mut self,
        image: glow::NativeTexture,
        ctx: &mut RenderContext,
    ) -> Result<(), EngineError> {
        let gl = ctx.gl;
        let Some(framebuffer) = self.framebuffer.as_mut() else {
            return Ok(());
        };
        framebuffer.set_size(gl, ctx.viewport_width, ctx.viewport_height);
        if let Some(uv_map) = self.uv_map.as_mut() {
            uv_map.set_size(gl, ctx.viewport_width, ctx.viewport_height);
        }

        let framebuffer = self.framebuffer.as_mut().expect("checked above");
        let target_fbo = framebuffer.fbo(self.previous_index);
        if let Some(flip) = self.flip.as_mut() {
            flip.draw_in_place(
                gl,
                ctx.shader_cache,
                ctx.fullscreen,
                image,
                target_fbo,
                ctx.viewport_width,
                ctx.viewport_height,
                false,
                false,
            )?;
        }
        Ok(())
    }

    /// Binds the previous-frame draw framebuffer so hosts can stamp extra
    /// content into the feedback loop. No-op before the first sizing.
    pub unsafe fn bind_framebuffer(&self, gl: &glow::Context) {
        if let Some(framebuffer) = self.framebuffer.as_ref() {
            if framebuffer.width() > 0 && framebuffer.height() > 0 {
                framebuffer.bind_draw(gl, self.previous_index);
            }
        }
    }

    /// Frees every GL object. Must run on the render thread before drop.
    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(mut framebuffer) = self.framebuffer.take() {
            framebuffer.destroy(gl);
        }
        if let Some(mut flip) = self.flip.take() {
            flip.destroy(gl);
        }
        if let Some(uv_map) = self.uv_map.take() {
            uv_map.destroy(gl);
        }
        if let Some(mut color_draw) = self.color_draw.take() {
            color_draw.destroy(gl);
        }
        if let Some(mut textured_draw) = self.textured_draw.take() {
            textured_draw.destroy(gl);
        }
        self.mesh.destroy(gl);
        self.motion_vectors.destroy(gl);
        self.composite.destroy(gl);
        self.state.destroy(gl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_core::{
        CompiledProgram, GlobalBanks, NoopExpressionCompiler, StraightThroughTranspiler,
        VariablePool,
    };

    fn assert_send<T: Send>() {}

    #[test]
    fn presets_cross_to_the_worker_thread() {
        assert_send::<Preset>();
    }

    struct ClampTestCompiler;

    impl ExpressionCompiler for ClampTestCompiler {
        fn compile(
            &self,
            source: &str,
            vars: &mut VariablePool,
        ) -> Result<Box<dyn CompiledProgram>, EngineError> {
            if !source.contains("gamma") {
                return NoopExpressionCompiler.compile(source, vars);
            }
            let gamma = vars.slot("gamma");
            let echo_zoom = vars.slot("echo_zoom");
            Ok(Box::new(move |vars: &mut VariablePool, _: &mut GlobalBanks| {
                vars.set(gamma, -1.0);
                vars.set(echo_zoom, 2000.0);
            }))
        }
    }

    #[test]
    fn per_frame_update_clamps_gamma_and_echo_zoom() {
        let parsed = ParsedPreset {
            per_frame_code: "gamma = -1; echo_zoom = 2000;".to_string(),
            ..Default::default()
        };
        let mut preset = Preset::new(
            "clamp.milk".to_string(),
            parsed,
            Arc::new(ClampTestCompiler),
            Arc::new(StraightThroughTranspiler),
            (48, 36),
        );

        preset.compile_expressions().unwrap();
        preset.per_frame_update();

        assert_eq!(preset.per_frame.get(preset.per_frame.slots.gamma), 0.0);
        assert_eq!(
            preset.per_frame.get(preset.per_frame.slots.echo_zoom),
            1000.0
        );
    }

    #[test]
    fn compile_expressions_is_tracked() {
        let mut preset = Preset::new(
            "plain.milk".to_string(),
            ParsedPreset::default(),
            Arc::new(NoopExpressionCompiler),
            Arc::new(StraightThroughTranspiler),
            (48, 36),
        );
        assert!(!preset.expressions_compiled.load(Ordering::Acquire));
        preset.compile_expressions().unwrap();
        assert!(preset.expressions_compiled.load(Ordering::Acquire));
        assert!(preset.shaders_transpiled.load(Ordering::Acquire));
    }
}

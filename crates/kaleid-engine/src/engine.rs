//! The engine facade.
//!
//! Owns everything with engine lifetime — the GL function table handle, the
//! texture manager, the shared shader cache, the fullscreen triangle, the
//! active preset and the switch orchestrator — and exposes the per-frame
//! entry point hosts call from the render thread.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use glow::HasContext;
use tracing::info;

use kaleid_core::{
    EngineError, EngineSettings, ExpressionCompiler, FrameAudioData, PresetParser,
    ShaderTranspiler,
};
use kaleid_glctx::{GlLoader, GlResolver, ParallelShaderProbe};
use kaleid_preset::Preset;
use kaleid_render::{FullscreenTriangle, RenderContext, ShaderCache, TextureManager};

use crate::orchestrator::{DriveOutcome, SwitchOrchestrator};
use crate::worker::{split_protocol, MAX_PRESET_FILE_SIZE};

pub struct Engine {
    gl: Arc<glow::Context>,
    settings: EngineSettings,

    texture_manager: TextureManager,
    shader_cache: ShaderCache,
    fullscreen: FullscreenTriangle,

    active: Option<Box<Preset>>,
    orchestrator: SwitchOrchestrator,

    start: Instant,
    last_time: f64,
    frame: u64,
    fps: f64,

    /// When set, presets report blend progress over this many seconds.
    preset_duration: Option<f64>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("frame", &self.frame)
            .field("active", &self.active.as_ref().map(|p| p.filename()))
            .finish()
    }
}

impl Engine {
    /// Builds an engine on an already-loaded GL function table.
    pub unsafe fn new(
        gl: Arc<glow::Context>,
        settings: EngineSettings,
        parser: Arc<dyn PresetParser>,
        compiler: Arc<dyn ExpressionCompiler>,
        transpiler: Arc<dyn ShaderTranspiler>,
    ) -> Result<Self, EngineError> {
        ParallelShaderProbe::instance().probe(&gl);

        let fullscreen = FullscreenTriangle::new(&gl)?;
        let texture_manager = TextureManager::new(settings.texture_search_paths.clone());
        let default_mesh = (settings.mesh_x as i32, settings.mesh_y as i32);

        Ok(Self {
            gl,
            settings,
            texture_manager,
            shader_cache: ShaderCache::new(),
            fullscreen,
            active: None,
            orchestrator: SwitchOrchestrator::new(parser, compiler, transpiler, default_mesh),
            start: Instant::now(),
            last_time: 0.0,
            frame: 0,
            fps: 0.0,
            preset_duration: None,
        })
    }

    /// Full cold start: initializes the resolver against the context current
    /// on this thread, gates on the engine's GL requirements, loads the
    /// function table, then builds the engine.
    pub unsafe fn with_current_context(
        settings: EngineSettings,
        parser: Arc<dyn PresetParser>,
        compiler: Arc<dyn ExpressionCompiler>,
        transpiler: Arc<dyn ShaderTranspiler>,
    ) -> Result<Self, EngineError> {
        if !GlResolver::instance().initialize(None) {
            return Err(EngineError::GlContext(
                "no current GL context detected on this thread".to_string(),
            ));
        }
        let gl = GlLoader::instance().load()?;
        Self::new(gl, settings, parser, compiler, transpiler)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn active_preset(&self) -> Option<&Preset> {
        self.active.as_deref()
    }

    /// Optional preset display duration used to derive blend progress.
    pub fn set_preset_duration(&mut self, seconds: Option<f64>) {
        self.preset_duration = seconds.filter(|s| *s > 0.0);
    }

    /// Requests an asynchronous switch. Returns immediately; the switch
    /// advances one polled step per `render_frame`.
    pub fn request_preset(&mut self, path: impl Into<String>, smooth: Option<bool>) {
        let path = path.into();
        let smooth = smooth.unwrap_or(self.settings.smooth_transitions);

        // Lookups during the upcoming load also search the preset's own
        // directory.
        let (_, local) = split_protocol(&path);
        self.texture_manager
            .set_current_preset_path(Some(Path::new(local)));

        self.orchestrator
            .request_switch(path, smooth, self.texture_manager.preloader());
    }

    /// Renders one frame with the active preset while driving any in-flight
    /// switch. Returns what the switch machinery did this frame.
    pub unsafe fn render_frame(
        &mut self,
        audio: &FrameAudioData,
        width: i32,
        height: i32,
    ) -> Result<DriveOutcome, EngineError> {
        let time = self.start.elapsed().as_secs_f64();
        let dt = (time - self.last_time).max(1e-6);
        self.last_time = time;
        // Smoothed frame-rate estimate for the `fps` expression variable.
        self.fps = if self.fps == 0.0 {
            1.0 / dt
        } else {
            self.fps * 0.95 + (1.0 / dt) * 0.05
        };

        let gl = Arc::clone(&self.gl);
        let mut ctx = RenderContext {
            gl: &gl,
            viewport_width: width,
            viewport_height: height,
            time,
            frame: self.frame,
            fps: self.fps,
            texture_manager: &mut self.texture_manager,
            shader_cache: &mut self.shader_cache,
            fullscreen: &self.fullscreen,
        };

        let outcome = self.orchestrator.drive(&mut ctx, &mut self.active);
        if outcome == DriveOutcome::Activated {
            // Exactly once per preset load: age the texture cache and force
            // a rescan on the next lookup.
            ctx.texture_manager.purge_textures(ctx.gl);
        }

        if let Some(preset) = self.active.as_mut() {
            if preset.is_initialized() {
                if let Some(duration) = self.preset_duration {
                    let progress = preset.state().preset_time / duration;
                    preset.set_progress(progress);
                }
                preset.render_frame(audio, &mut ctx)?;
            }
        }

        self.frame += 1;
        Ok(outcome)
    }

    /// Synchronous load path: reads, parses, compiles and initializes the
    /// preset in one call on the render thread. Useful for hosts that load
    /// a first preset before entering the frame loop.
    pub unsafe fn load_preset_blocking(
        &mut self,
        path: &str,
        width: i32,
        height: i32,
    ) -> Result<(), EngineError> {
        let (protocol, local) = split_protocol(path);

        let parsed = if !protocol.is_empty() && protocol != "file" {
            self.orchestrator_parser().load_url(path)?
        } else {
            let metadata = std::fs::metadata(local).map_err(|source| EngineError::Io {
                path: Path::new(local).to_path_buf(),
                source,
            })?;
            if metadata.len() == 0 || metadata.len() > MAX_PRESET_FILE_SIZE {
                return Err(EngineError::PresetFileSize {
                    path: path.to_string(),
                    size: metadata.len(),
                });
            }
            let data = std::fs::read(local).map_err(|source| EngineError::Io {
                path: Path::new(local).to_path_buf(),
                source,
            })?;
            self.orchestrator_parser().parse(path, &data)?
        };

        self.texture_manager
            .set_current_preset_path(Some(Path::new(local)));

        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut preset = Box::new(Preset::new(
            filename,
            parsed,
            self.orchestrator_compiler(),
            self.orchestrator_transpiler(),
            (self.settings.mesh_x as i32, self.settings.mesh_y as i32),
        ));
        preset.compile_expressions()?;

        let gl = Arc::clone(&self.gl);
        let mut ctx = RenderContext {
            gl: &gl,
            viewport_width: width,
            viewport_height: height,
            time: self.start.elapsed().as_secs_f64(),
            frame: self.frame,
            fps: self.fps,
            texture_manager: &mut self.texture_manager,
            shader_cache: &mut self.shader_cache,
            fullscreen: &self.fullscreen,
        };
        preset.initialize(&mut ctx)?;
        ctx.texture_manager.purge_textures(ctx.gl);

        if let Some(mut old) = self.active.replace(preset) {
            old.destroy(&gl);
        }
        info!(path, "preset loaded (blocking)");
        Ok(())
    }

    /// The active preset's composited output for this frame.
    pub fn output_texture(&self) -> Option<glow::NativeTexture> {
        self.active.as_ref().and_then(|p| p.output_texture())
    }

    /// Frees all GL resources. Must run on the render thread.
    pub unsafe fn destroy(&mut self) {
        if let Some(mut preset) = self.active.take() {
            preset.destroy(&self.gl);
        }
        self.shader_cache.destroy(&self.gl);
        self.texture_manager.destroy(&self.gl);
        self.fullscreen.destroy(&self.gl);
        self.gl.flush();
    }

    fn orchestrator_parser(&self) -> Arc<dyn PresetParser> {
        self.orchestrator.parser()
    }

    fn orchestrator_compiler(&self) -> Arc<dyn ExpressionCompiler> {
        self.orchestrator.compiler()
    }

    fn orchestrator_transpiler(&self) -> Arc<dyn ShaderTranspiler> {
        self.orchestrator.transpiler()
    }
}

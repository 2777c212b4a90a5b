//! Preset-authored shader (warp or composite stage).
//!
//! Wraps the raw source from the preset file, its transpiled GLSL form, the
//! GL program, and the resolved sampler bindings. The expensive transpile
//! step runs on the CPU worker; program creation, compilation and sampler
//! resolution stay on the render thread.

use std::collections::BTreeSet;

use glow::HasContext;
use tracing::debug;

use kaleid_core::{EngineError, ShaderStage, ShaderTranspiler};
use kaleid_render::{ShaderProgram, TextureManager, TextureSamplerDescriptor};

use crate::state::PresetState;

/// Extracts the names referenced as `sampler_<name>` from shader source.
pub fn referenced_sampler_names(source: &str) -> BTreeSet<String> {
    const TAG: &str = "sampler_";
    let mut names = BTreeSet::new();
    let mut rest = source;
    while let Some(pos) = rest.find(TAG) {
        let after = &rest[pos + TAG.len()..];
        let end = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if end > 0 {
            names.insert(after[..end].to_string());
        }
        rest = &after[end..];
    }
    names
}

#[derive(Debug)]
enum SamplerBinding {
    /// The logical main texture, reseated every frame.
    Main { unit: u32, uniform: String },
    /// One of the preset's blur chain levels (1-based).
    Blur {
        unit: u32,
        level: usize,
        uniform: String,
    },
    /// A manager-resolved texture (file, noise, random pick).
    Resolved {
        unit: u32,
        uniform: String,
        descriptor: TextureSamplerDescriptor,
    },
}

#[derive(Debug)]
pub struct PresetShader {
    stage: ShaderStage,
    raw_source: Option<String>,
    translated: Option<String>,
    sampler_names: BTreeSet<String>,
    program: Option<ShaderProgram>,
    bindings: Vec<SamplerBinding>,
}

impl PresetShader {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            raw_source: None,
            translated: None,
            sampler_names: BTreeSet::new(),
            program: None,
            bindings: Vec::new(),
        }
    }

    /// Stores the raw preset source and records the samplers it references.
    pub fn load_source(&mut self, source: &str) {
        self.sampler_names = referenced_sampler_names(source);
        // The stage's own input is always bound even when the source only
        // uses helper functions that sample it implicitly.
        self.sampler_names.insert("main".to_string());
        self.raw_source = Some(source.to_string());
    }

    /// Installs an engine-built GLSL fallback that needs no transpilation.
    pub fn load_builtin(&mut self, source: &str) {
        self.sampler_names = referenced_sampler_names(source);
        self.sampler_names.insert("main".to_string());
        self.raw_source = Some(source.to_string());
        self.translated = Some(source.to_string());
    }

    pub fn has_source(&self) -> bool {
        self.raw_source.is_some()
    }

    pub fn is_translated(&self) -> bool {
        self.translated.is_some()
    }

    pub fn sampler_names(&self) -> &BTreeSet<String> {
        &self.sampler_names
    }

    /// Pure CPU string transformation; safe to run on the worker thread.
    pub fn transpile(&mut self, transpiler: &dyn ShaderTranspiler) -> Result<(), EngineError> {
        let Some(raw) = &self.raw_source else {
            return Ok(());
        };
        if self.translated.is_none() {
            self.translated = Some(transpiler.transpile(raw, self.stage)?);
        }
        Ok(())
    }

    fn fragment_source(&self) -> Result<&str, EngineError> {
        self.translated.as_deref().ok_or_else(|| {
            EngineError::other(format!(
                "{} shader compile requested before transpilation",
                self.stage
            ))
        })
    }

    /// Blocking compile + link against the stage's vertex shader.
    pub unsafe fn compile(
        &mut self,
        gl: &glow::Context,
        vertex_source: &str,
    ) -> Result<(), EngineError> {
        if !self.has_source() {
            return Ok(());
        }
        let fragment = self.fragment_source()?.to_string();
        let mut program = ShaderProgram::new(gl)?;
        program.compile_program(gl, vertex_source, &fragment)?;
        self.program = Some(program);
        Ok(())
    }

    /// Submits compile work without blocking; poll with
    /// [`PresetShader::is_compile_complete`].
    pub unsafe fn submit_compile_async(
        &mut self,
        gl: &glow::Context,
        vertex_source: &str,
    ) -> Result<(), EngineError> {
        if !self.has_source() {
            return Ok(());
        }
        let fragment = self.fragment_source()?.to_string();
        let mut program = ShaderProgram::new(gl)?;
        program.submit_compile_async(gl, vertex_source, &fragment);
        self.program = Some(program);
        Ok(())
    }

    pub unsafe fn is_compile_complete(&mut self, gl: &glow::Context) -> bool {
        match &mut self.program {
            Some(program) => program.is_compile_complete(gl),
            None => true,
        }
    }

    /// Checks compile results (raising shader errors with the driver log)
    /// and resolves the sampler bindings through the texture manager.
    pub unsafe fn finalize_compile(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) -> Result<(), EngineError> {
        let Some(program) = &mut self.program else {
            return Ok(());
        };
        program.finalize_compile(gl)?;
        self.resolve_samplers(gl, texture_manager);
        Ok(())
    }

    /// Maps each referenced sampler name to a texture unit. `main` and the
    /// blur levels resolve at bind time from the preset state; everything
    /// else is resolved through the manager now.
    pub unsafe fn resolve_samplers(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) {
        self.bindings.clear();
        let names: Vec<String> = self.sampler_names.iter().cloned().collect();
        for (i, name) in names.iter().enumerate() {
            let unit = i as u32;
            let uniform = format!("sampler_{name}");
            let binding = if name == "main" {
                SamplerBinding::Main { unit, uniform }
            } else if let Some(level) = name
                .strip_prefix("blur")
                .and_then(|l| l.parse::<usize>().ok())
                .filter(|l| (1..=3).contains(l))
            {
                SamplerBinding::Blur {
                    unit,
                    level,
                    uniform,
                }
            } else {
                let descriptor = texture_manager.get_texture(gl, name);
                SamplerBinding::Resolved {
                    unit,
                    uniform,
                    descriptor,
                }
            };
            self.bindings.push(binding);
        }
        debug!(stage = %self.stage, samplers = self.bindings.len(), "sampler bindings resolved");
    }

    /// Binds the program and every sampler for drawing.
    pub unsafe fn bind(&self, gl: &glow::Context, state: &PresetState) {
        let Some(program) = &self.program else {
            return;
        };
        program.bind(gl);

        for binding in &self.bindings {
            match binding {
                SamplerBinding::Main { unit, uniform } => {
                    gl.active_texture(glow::TEXTURE0 + unit);
                    gl.bind_texture(glow::TEXTURE_2D, state.main_texture);
                    gl.bind_sampler(*unit, None);
                    program.set_uniform_i32(gl, uniform, *unit as i32);
                }
                SamplerBinding::Blur {
                    unit,
                    level,
                    uniform,
                } => {
                    let texture = state.blur.as_ref().and_then(|b| b.texture(*level));
                    gl.active_texture(glow::TEXTURE0 + unit);
                    gl.bind_texture(glow::TEXTURE_2D, texture);
                    gl.bind_sampler(*unit, None);
                    program.set_uniform_i32(gl, uniform, *unit as i32);
                }
                SamplerBinding::Resolved {
                    unit,
                    uniform,
                    descriptor,
                } => {
                    gl.active_texture(glow::TEXTURE0 + unit);
                    gl.bind_texture(descriptor.target, descriptor.texture);
                    gl.bind_sampler(*unit, descriptor.sampler);
                    program.set_uniform_i32(gl, uniform, *unit as i32);
                }
            }
        }
        gl.active_texture(glow::TEXTURE0);
    }

    pub unsafe fn unbind(&self, gl: &glow::Context) {
        for binding in &self.bindings {
            let unit = match binding {
                SamplerBinding::Main { unit, .. }
                | SamplerBinding::Blur { unit, .. }
                | SamplerBinding::Resolved { unit, .. } => *unit,
            };
            gl.active_texture(glow::TEXTURE0 + unit);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.bind_sampler(unit, None);
        }
        gl.active_texture(glow::TEXTURE0);
        gl.use_program(None);
    }

    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(mut program) = self.program.take() {
            program.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_core::StraightThroughTranspiler;

    #[test]
    fn sampler_names_are_extracted_from_source() {
        let source = "\
vec3 a = texture(sampler_main, uv).rgb;\n\
vec3 b = texture(sampler_blur1, uv).rgb;\n\
vec3 c = texture(sampler_pc_rock, uv2).rgb + texture(sampler_main, uv).rgb;\n";
        let names = referenced_sampler_names(source);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["blur1", "main", "pc_rock"]
        );
    }

    #[test]
    fn sampler_extraction_ignores_bare_tag() {
        assert!(referenced_sampler_names("no samplers here").is_empty());
        assert!(referenced_sampler_names("sampler_").is_empty());
    }

    #[test]
    fn load_source_always_includes_main() {
        let mut shader = PresetShader::new(ShaderStage::Warp);
        shader.load_source("float x = 1.0;");
        assert!(shader.sampler_names().contains("main"));
    }

    #[test]
    fn transpile_is_idempotent_and_skips_empty_shaders() {
        let mut shader = PresetShader::new(ShaderStage::Composite);
        shader.transpile(&StraightThroughTranspiler).unwrap();
        assert!(!shader.is_translated());

        shader.load_source("vec4 c = texture(sampler_main, uv);");
        shader.transpile(&StraightThroughTranspiler).unwrap();
        assert!(shader.is_translated());
    }
}

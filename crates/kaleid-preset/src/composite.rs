//! Final composite.
//!
//! Runs the preset's composite shader against the warped-and-decorated
//! frame, or, for presets without one, the legacy fixed-function look: video
//! echo, gamma adjustment, and the brighten / darken / solarize / invert
//! filter flags, expressed as one built-in fullscreen pass.

use glow::HasContext;

use kaleid_core::{EngineError, ShaderStage, ShaderTranspiler};
use kaleid_render::shader::glsl_version_header;
use kaleid_render::{FullscreenTriangle, ShaderCache, TextureManager};

use crate::per_frame::PerFrameContext;
use crate::preset_shader::PresetShader;
use crate::state::PresetState;

const LEGACY_KEY: &str = "legacy_composite";

pub fn composite_vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_pos;\n\
layout (location = 1) in vec2 a_uv;\n\
out vec2 v_uv;\n\
void main() {{\n\
    v_uv = a_uv;\n\
    gl_Position = vec4(a_pos, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn legacy_fragment_source() -> String {
    format!(
        "{}\
in vec2 v_uv;\n\
out vec4 o_color;\n\
uniform sampler2D sampler_main;\n\
uniform float u_gamma;\n\
uniform float u_echo_zoom;\n\
uniform float u_echo_alpha;\n\
uniform int u_echo_orient;\n\
uniform int u_invert;\n\
uniform int u_brighten;\n\
uniform int u_darken;\n\
uniform int u_solarize;\n\
void main() {{\n\
    vec3 base = texture(sampler_main, v_uv).rgb;\n\
\n\
    vec2 echo_uv = (v_uv - 0.5) / u_echo_zoom + 0.5;\n\
    if (u_echo_orient == 1 || u_echo_orient == 3) {{ echo_uv.x = 1.0 - echo_uv.x; }}\n\
    if (u_echo_orient == 2 || u_echo_orient == 3) {{ echo_uv.y = 1.0 - echo_uv.y; }}\n\
    vec3 echo = texture(sampler_main, echo_uv).rgb;\n\
\n\
    vec3 color = mix(base, echo, clamp(u_echo_alpha, 0.0, 1.0));\n\
    color *= u_gamma;\n\
\n\
    if (u_brighten == 1) {{ color = sqrt(max(color, 0.0)); }}\n\
    if (u_darken == 1) {{ color = color * color; }}\n\
    if (u_solarize == 1) {{ color = color * (1.0 - color) * 4.0; }}\n\
    if (u_invert == 1) {{ color = 1.0 - color; }}\n\
\n\
    o_color = vec4(color, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

#[derive(Debug)]
pub struct FinalComposite {
    shader: PresetShader,
}

impl Default for FinalComposite {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalComposite {
    pub fn new() -> Self {
        Self {
            shader: PresetShader::new(ShaderStage::Composite),
        }
    }

    /// Captures the composite shader source, if the preset has one. No GL.
    pub fn load_composite_shader(&mut self, state: &PresetState) {
        if let Some(source) = &state.parsed.composite_shader {
            self.shader.load_source(source);
        }
    }

    pub fn has_composite_shader(&self) -> bool {
        self.shader.has_source()
    }

    pub fn transpile_composite_shader(
        &mut self,
        transpiler: &dyn ShaderTranspiler,
    ) -> Result<(), EngineError> {
        self.shader.transpile(transpiler)
    }

    pub fn composite_sampler_names(&self) -> &std::collections::BTreeSet<String> {
        self.shader.sampler_names()
    }

    pub unsafe fn compile_composite_shader(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) -> Result<(), EngineError> {
        self.shader.compile(gl, &composite_vertex_source())?;
        self.shader.resolve_samplers(gl, texture_manager);
        Ok(())
    }

    pub unsafe fn compile_composite_shader_async(
        &mut self,
        gl: &glow::Context,
    ) -> Result<(), EngineError> {
        self.shader.submit_compile_async(gl, &composite_vertex_source())
    }

    pub unsafe fn is_composite_shader_compile_complete(&mut self, gl: &glow::Context) -> bool {
        self.shader.is_compile_complete(gl)
    }

    pub unsafe fn finalize_composite_shader_compile(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) -> Result<(), EngineError> {
        self.shader.finalize_compile(gl, texture_manager)
    }

    /// Draws the composite into the currently bound draw framebuffer.
    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        fullscreen: &FullscreenTriangle,
        state: &PresetState,
        per_frame: &PerFrameContext,
    ) -> Result<(), EngineError> {
        gl.viewport(0, 0, state.viewport_width, state.viewport_height);
        gl.disable(glow::BLEND);

        if self.has_composite_shader() {
            self.shader.bind(gl, state);
            if let Some(program) = self.shader.program() {
                program.set_uniform_f32(gl, "u_time", state.preset_time as f32);
                program.set_uniform_f32(gl, "u_frame", state.frame as f32);
                program.set_uniform_vec2(
                    gl,
                    "u_resolution",
                    [state.viewport_width as f32, state.viewport_height as f32],
                );
                program
                    .set_uniform_f32(gl, "u_gamma", per_frame.get(per_frame.slots.gamma) as f32);
                let q = per_frame.q_values();
                for (i, value) in q.iter().enumerate() {
                    program.set_uniform_f32(gl, &format!("q{}", i + 1), *value as f32);
                }
            }
            fullscreen.draw(gl);
            self.shader.unbind(gl);
            return Ok(());
        }

        let s = &per_frame.slots;
        let program = cache.get_or_compile(
            gl,
            LEGACY_KEY,
            &composite_vertex_source(),
            &legacy_fragment_source(),
        )?;
        program.bind(gl);
        program.set_uniform_i32(gl, "sampler_main", 0);
        program.set_uniform_f32(gl, "u_gamma", per_frame.get(s.gamma) as f32);
        program.set_uniform_f32(gl, "u_echo_zoom", per_frame.get(s.echo_zoom) as f32);
        program.set_uniform_f32(gl, "u_echo_alpha", per_frame.get(s.echo_alpha) as f32);
        program.set_uniform_i32(gl, "u_echo_orient", per_frame.get(s.echo_orient) as i32);
        program.set_uniform_i32(gl, "u_invert", per_frame.get(s.invert) as i32);
        program.set_uniform_i32(gl, "u_brighten", per_frame.get(s.brighten) as i32);
        program.set_uniform_i32(gl, "u_darken", per_frame.get(s.darken) as i32);
        program.set_uniform_i32(gl, "u_solarize", per_frame.get(s.solarize) as i32);

        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture(glow::TEXTURE_2D, state.main_texture);
        fullscreen.draw(gl);
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.use_program(None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        self.shader.destroy(gl);
    }
}

//! Blur texture chain.
//!
//! Three successively blurred, successively downsampled copies of the main
//! texture, exposed to preset shaders as `blur1`..`blur3`. Each level runs a
//! separable gaussian (horizontal then vertical pass); the per-frame
//! `blurN_min` / `blurN_max` parameters remap the output range the way
//! Milkdrop shaders expect to sample it.

use glow::HasContext;

use kaleid_core::EngineError;

use crate::context::ShaderCache;
use crate::shader::glsl_version_header;
use crate::texture::Texture;
use crate::FullscreenTriangle;

pub const BLUR_LEVELS: usize = 3;

const PASS_VERT_KEY: &str = "blur_pass";

fn blur_vertex_source() -> String {
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

fn blur_fragment_source() -> String {
    format!(
        "{}\
in vec2 v_uv;\n\
out vec4 o_color;\n\
uniform sampler2D u_source;\n\
uniform vec2 u_direction;\n\
uniform float u_scale;\n\
uniform float u_bias;\n\
const float w[5] = float[](0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);\n\
void main() {{\n\
    vec2 texel = u_direction / vec2(textureSize(u_source, 0));\n\
    vec4 sum = texture(u_source, v_uv) * w[0];\n\
    for (int i = 1; i < 5; ++i) {{\n\
        sum += texture(u_source, v_uv + texel * float(i)) * w[i];\n\
        sum += texture(u_source, v_uv - texel * float(i)) * w[i];\n\
    }}\n\
    o_color = vec4(sum.rgb * u_scale + vec3(u_bias), sum.a);\n\
}}\n",
        glsl_version_header()
    )
}

#[derive(Debug)]
struct BlurLevel {
    texture: Texture,
    intermediate: Texture,
    width: i32,
    height: i32,
}

/// The three persistent blur textures owned by the preset state.
#[derive(Debug)]
pub struct BlurTextures {
    fbo: glow::NativeFramebuffer,
    levels: Vec<BlurLevel>,
    base_width: i32,
    base_height: i32,
}

impl BlurTextures {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let fbo = gl
            .create_framebuffer()
            .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;

        let mut levels = Vec::with_capacity(BLUR_LEVELS);
        for _ in 0..BLUR_LEVELS {
            levels.push(BlurLevel {
                texture: Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)?,
                intermediate: Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)?,
                width: 0,
                height: 0,
            });
        }

        Ok(Self {
            fbo,
            levels,
            base_width: 0,
            base_height: 0,
        })
    }

    /// Texture for `blur1`..`blur3` (1-based level).
    pub fn texture(&self, level: usize) -> Option<glow::NativeTexture> {
        self.levels
            .get(level.checked_sub(1)?)
            .filter(|l| l.width > 0)
            .map(|l| l.texture.handle)
    }

    unsafe fn ensure_size(&mut self, gl: &glow::Context, width: i32, height: i32) {
        if self.base_width == width && self.base_height == height {
            return;
        }
        self.base_width = width;
        self.base_height = height;

        let mut w = width;
        let mut h = height;
        for level in &mut self.levels {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            level.width = w;
            level.height = h;
            level.texture.set_size(gl, w, h);
            level.intermediate.set_size(gl, w, h);
        }
    }

    /// Re-blurs the chain from `source` (the freshly warped frame).
    ///
    /// `min` / `max` are the per-frame `blurN_min` / `blurN_max` values; each
    /// level's output is remapped so that `[min, max]` spans `[0, 1]`.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn update(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        fullscreen: &FullscreenTriangle,
        source: glow::NativeTexture,
        viewport_width: i32,
        viewport_height: i32,
        min: [f32; BLUR_LEVELS],
        max: [f32; BLUR_LEVELS],
    ) -> Result<(), EngineError> {
        if viewport_width <= 0 || viewport_height <= 0 {
            return Ok(());
        }
        self.ensure_size(gl, viewport_width, viewport_height);

        let program = cache.get_or_compile(
            gl,
            PASS_VERT_KEY,
            &blur_vertex_source(),
            &blur_fragment_source(),
        )?;
        let program_raw = program.raw();

        gl.disable(glow::BLEND);
        gl.active_texture(glow::TEXTURE0);
        gl.use_program(Some(program_raw));

        let mut input = source;
        for (i, level) in self.levels.iter().enumerate() {
            let range = (max[i] - min[i]).max(1.0 / 255.0);
            let scale = 1.0 / range;
            let bias = -min[i] * scale;

            gl.viewport(0, 0, level.width, level.height);

            // Horizontal into the intermediate.
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(level.intermediate.handle),
                0,
            );
            gl.bind_texture(glow::TEXTURE_2D, Some(input));
            set_pass_uniforms(gl, program_raw, [1.0, 0.0], 1.0, 0.0);
            fullscreen.draw(gl);

            // Vertical into the level texture, applying the range remap.
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(level.texture.handle),
                0,
            );
            gl.bind_texture(glow::TEXTURE_2D, Some(level.intermediate.handle));
            set_pass_uniforms(gl, program_raw, [0.0, 1.0], scale, bias);
            fullscreen.draw(gl);

            input = level.texture.handle;
        }

        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.use_program(None);
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        for level in self.levels.drain(..) {
            level.texture.destroy(gl);
            level.intermediate.destroy(gl);
        }
        gl.delete_framebuffer(self.fbo);
    }
}

unsafe fn set_pass_uniforms(
    gl: &glow::Context,
    program: glow::NativeProgram,
    direction: [f32; 2],
    scale: f32,
    bias: f32,
) {
    if let Some(loc) = gl.get_uniform_location(program, "u_source") {
        gl.uniform_1_i32(Some(&loc), 0);
    }
    if let Some(loc) = gl.get_uniform_location(program, "u_direction") {
        gl.uniform_2_f32(Some(&loc), direction[0], direction[1]);
    }
    if let Some(loc) = gl.get_uniform_location(program, "u_scale") {
        gl.uniform_1_f32(Some(&loc), scale);
    }
    if let Some(loc) = gl.get_uniform_location(program, "u_bias") {
        gl.uniform_1_f32(Some(&loc), bias);
    }
}

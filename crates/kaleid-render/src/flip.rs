//! Y-flip copy pass.
//!
//! Milkdrop's warp and composite stages disagree about which way is up, so
//! the frame is flipped into an auxiliary texture at two points of the frame
//! and once more for the legacy composite path. The auxiliary texture also
//! doubles as the "logical main texture" between those points.

use glow::HasContext;

use kaleid_core::EngineError;

use crate::context::ShaderCache;
use crate::shader::glsl_version_header;
use crate::texture::Texture;
use crate::FullscreenTriangle;

const FLIP_KEY: &str = "copy_flip";

fn flip_vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_pos;\n\
layout (location = 1) in vec2 a_uv;\n\
uniform vec2 u_flip;\n\
out vec2 v_uv;\n\
void main() {{\n\
    v_uv = mix(a_uv, vec2(1.0) - a_uv, u_flip);\n\
    gl_Position = vec4(a_pos, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn flip_fragment_source() -> String {
    format!(
        "{}\
in vec2 v_uv;\n\
out vec4 o_color;\n\
uniform sampler2D u_source;\n\
void main() {{\n\
    o_color = texture(u_source, v_uv);\n\
}}\n",
        glsl_version_header()
    )
}

/// Owns the auxiliary flip target and renders flipped copies into it or into
/// a caller-provided framebuffer.
#[derive(Debug)]
pub struct FlipTexture {
    fbo: glow::NativeFramebuffer,
    texture: Texture,
}

impl FlipTexture {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let fbo = gl
            .create_framebuffer()
            .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
        let texture = Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)?;
        Ok(Self { fbo, texture })
    }

    /// The auxiliary texture holding the result of the last flip.
    pub fn texture(&self) -> glow::NativeTexture {
        self.texture.handle
    }

    /// Renders `source` into the auxiliary texture, optionally mirrored.
    ///
    /// Returns the auxiliary texture handle so the caller can reseat its
    /// logical main-texture reference.
    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        fullscreen: &FullscreenTriangle,
        source: glow::NativeTexture,
        width: i32,
        height: i32,
        flip_y: bool,
        flip_x: bool,
    ) -> Result<glow::NativeTexture, EngineError> {
        if self.texture.set_size(gl, width, height) {
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(self.texture.handle),
                0,
            );
        }

        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.fbo));
        gl.viewport(0, 0, width, height);
        self.draw_pass(gl, cache, fullscreen, source, flip_y, flip_x)?;
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);

        Ok(self.texture.handle)
    }

    /// Flips a framebuffer's own color attachment in place: copies it into
    /// the auxiliary texture flipped, then draws that straight back.
    pub unsafe fn draw_in_place(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        fullscreen: &FullscreenTriangle,
        source: glow::NativeTexture,
        target_fbo: glow::NativeFramebuffer,
        width: i32,
        height: i32,
        flip_y: bool,
        flip_x: bool,
    ) -> Result<(), EngineError> {
        self.draw(gl, cache, fullscreen, source, width, height, flip_y, flip_x)?;

        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(target_fbo));
        gl.viewport(0, 0, width, height);
        self.draw_pass(gl, cache, fullscreen, self.texture.handle, false, false)?;
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Ok(())
    }

    unsafe fn draw_pass(
        &self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        fullscreen: &FullscreenTriangle,
        source: glow::NativeTexture,
        flip_y: bool,
        flip_x: bool,
    ) -> Result<(), EngineError> {
        let program = cache.get_or_compile(
            gl,
            FLIP_KEY,
            &flip_vertex_source(),
            &flip_fragment_source(),
        )?;

        program.bind(gl);
        program.set_uniform_vec2(
            gl,
            "u_flip",
            [if flip_x { 1.0 } else { 0.0 }, if flip_y { 1.0 } else { 0.0 }],
        );
        program.set_uniform_i32(gl, "u_source", 0);

        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture(glow::TEXTURE_2D, Some(source));
        gl.disable(glow::BLEND);

        fullscreen.draw(gl);

        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.use_program(None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_framebuffer(self.fbo);
        gl.delete_texture(self.texture.handle);
    }
}

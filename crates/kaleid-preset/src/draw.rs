//! Shared primitive-drawing plumbing for the secondary drawables.
//!
//! Waveforms, shapes, borders and motion vectors all emit small dynamic
//! vertex batches into the currently bound framebuffer. Two layouts cover
//! them: position+color, and position+uv+color for textured shapes.

use glow::HasContext;

use kaleid_core::EngineError;
use kaleid_render::shader::glsl_version_header;
use kaleid_render::ShaderCache;

const COLOR_KEY: &str = "preset_color";
const TEXTURED_KEY: &str = "preset_textured";

fn color_vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_pos;\n\
layout (location = 1) in vec4 a_color;\n\
out vec4 v_color;\n\
void main() {{\n\
    v_color = a_color;\n\
    gl_Position = vec4(a_pos, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn color_fragment_source() -> String {
    format!(
        "{}\
in vec4 v_color;\n\
out vec4 o_color;\n\
void main() {{\n\
    o_color = v_color;\n\
}}\n",
        glsl_version_header()
    )
}

fn textured_vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_pos;\n\
layout (location = 1) in vec2 a_uv;\n\
layout (location = 2) in vec4 a_color;\n\
out vec2 v_uv;\n\
out vec4 v_color;\n\
void main() {{\n\
    v_uv = a_uv;\n\
    v_color = a_color;\n\
    gl_Position = vec4(a_pos, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn textured_fragment_source() -> String {
    format!(
        "{}\
in vec2 v_uv;\n\
in vec4 v_color;\n\
out vec4 o_color;\n\
uniform sampler2D u_texture;\n\
void main() {{\n\
    o_color = texture(u_texture, v_uv) * v_color;\n\
}}\n",
        glsl_version_header()
    )
}

/// Alpha-blending mode for a primitive batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    Off,
    Alpha,
    Additive,
}

unsafe fn apply_blend(gl: &glow::Context, blend: Blend) {
    match blend {
        Blend::Off => gl.disable(glow::BLEND),
        Blend::Alpha => {
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        }
        Blend::Additive => {
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE);
        }
    }
}

/// Dynamic batch of `[x, y, r, g, b, a]` vertices.
#[derive(Debug)]
pub struct ColorDraw {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl ColorDraw {
    pub const FLOATS_PER_VERTEX: usize = 6;

    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        let stride = (Self::FLOATS_PER_VERTEX * 4) as i32;
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 4, glow::FLOAT, false, stride, 2 * 4);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    /// Uploads and draws one batch. `line_width` only applies to line modes.
    pub unsafe fn draw(
        &self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        vertices: &[f32],
        mode: u32,
        blend: Blend,
        line_width: f32,
    ) -> Result<(), EngineError> {
        if vertices.is_empty() {
            return Ok(());
        }
        debug_assert_eq!(vertices.len() % Self::FLOATS_PER_VERTEX, 0);

        let program =
            cache.get_or_compile(gl, COLOR_KEY, &color_vertex_source(), &color_fragment_source())?;
        program.bind(gl);

        gl.bind_vertex_array(Some(self.vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
        let bytes = core::slice::from_raw_parts(
            vertices.as_ptr() as *const u8,
            vertices.len() * core::mem::size_of::<f32>(),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);

        apply_blend(gl, blend);
        gl.line_width(line_width.max(1.0));
        gl.draw_arrays(mode, 0, (vertices.len() / Self::FLOATS_PER_VERTEX) as i32);

        gl.line_width(1.0);
        gl.disable(glow::BLEND);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);
        gl.use_program(None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

/// Dynamic batch of `[x, y, u, v, r, g, b, a]` vertices sampling a texture.
#[derive(Debug)]
pub struct TexturedDraw {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl TexturedDraw {
    pub const FLOATS_PER_VERTEX: usize = 8;

    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        let stride = (Self::FLOATS_PER_VERTEX * 4) as i32;
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 2 * 4);
        gl.enable_vertex_attrib_array(2);
        gl.vertex_attrib_pointer_f32(2, 4, glow::FLOAT, false, stride, 4 * 4);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    pub unsafe fn draw(
        &self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        vertices: &[f32],
        texture: glow::NativeTexture,
        mode: u32,
        blend: Blend,
    ) -> Result<(), EngineError> {
        if vertices.is_empty() {
            return Ok(());
        }
        debug_assert_eq!(vertices.len() % Self::FLOATS_PER_VERTEX, 0);

        let program = cache.get_or_compile(
            gl,
            TEXTURED_KEY,
            &textured_vertex_source(),
            &textured_fragment_source(),
        )?;
        program.bind(gl);
        program.set_uniform_i32(gl, "u_texture", 0);

        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));

        gl.bind_vertex_array(Some(self.vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vbo));
        let bytes = core::slice::from_raw_parts(
            vertices.as_ptr() as *const u8,
            vertices.len() * core::mem::size_of::<f32>(),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);

        apply_blend(gl, blend);
        gl.draw_arrays(mode, 0, (vertices.len() / Self::FLOATS_PER_VERTEX) as i32);

        gl.disable(glow::BLEND);
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);
        gl.use_program(None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

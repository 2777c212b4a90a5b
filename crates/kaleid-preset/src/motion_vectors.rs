//! Motion vector grid.
//!
//! A field of short lines drawn onto the previous frame before it is warped.
//! Each line starts at a grid point and extends toward where that point came
//! from, read back from the UV map the warp pass wrote last frame (reverse
//! propagation). Skipped on the first frame after init or resize, when the
//! UV map has no content yet.

use glow::HasContext;

use kaleid_core::EngineError;
use kaleid_render::shader::glsl_version_header;
use kaleid_render::ShaderCache;

use crate::per_frame::PerFrameContext;
use crate::state::PresetState;

const SHADER_KEY: &str = "motion_vectors";

fn vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_point;\n\
layout (location = 1) in float a_tip;\n\
uniform sampler2D u_uv_map;\n\
uniform float u_length;\n\
void main() {{\n\
    vec2 warped = texture(u_uv_map, a_point).xy;\n\
    vec2 dir = a_point - warped;\n\
    vec2 pos = a_point + dir * u_length * a_tip;\n\
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn fragment_source() -> String {
    format!(
        "{}\
uniform vec4 u_color;\n\
out vec4 o_color;\n\
void main() {{\n\
    o_color = u_color;\n\
}}\n",
        glsl_version_header()
    )
}

#[derive(Debug)]
pub struct MotionVectors {
    vao: Option<glow::NativeVertexArray>,
    vbo: Option<glow::NativeBuffer>,
    vertex_data: Vec<f32>,
}

impl Default for MotionVectors {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionVectors {
    pub fn new() -> Self {
        Self {
            vao: None,
            vbo: None,
            vertex_data: Vec::new(),
        }
    }

    unsafe fn ensure_buffers(&mut self, gl: &glow::Context) -> Result<(), EngineError> {
        if self.vao.is_some() {
            return Ok(());
        }
        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 3 * 4, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 1, glow::FLOAT, false, 3 * 4, 2 * 4);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        self.vao = Some(vao);
        self.vbo = Some(vbo);
        Ok(())
    }

    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        cache: &mut ShaderCache,
        state: &PresetState,
        per_frame: &PerFrameContext,
        uv_map: glow::NativeTexture,
    ) -> Result<(), EngineError> {
        let s = &per_frame.slots;
        let alpha = per_frame.get(s.mv_a);
        if alpha <= 0.0 {
            return Ok(());
        }

        let count_x = per_frame.get(s.mv_x).clamp(0.0, 64.0) as i32;
        let count_y = per_frame.get(s.mv_y).clamp(0.0, 48.0) as i32;
        if count_x == 0 || count_y == 0 {
            return Ok(());
        }

        self.ensure_buffers(gl)?;

        let offset_x = per_frame.get(s.mv_dx);
        let offset_y = per_frame.get(s.mv_dy);

        self.vertex_data.clear();
        for gy in 0..count_y {
            let y = (gy as f64 + 0.25) / (count_y as f64 + 0.25 + offset_y);
            for gx in 0..count_x {
                let x = (gx as f64 + 0.25) / (count_x as f64 + 0.25 + offset_x);
                // Tail and head of one line.
                self.vertex_data
                    .extend_from_slice(&[x as f32, y as f32, 0.0]);
                self.vertex_data
                    .extend_from_slice(&[x as f32, y as f32, 1.0]);
            }
        }

        let program = cache.get_or_compile(gl, SHADER_KEY, &vertex_source(), &fragment_source())?;
        program.bind(gl);
        program.set_uniform_i32(gl, "u_uv_map", 0);
        program.set_uniform_f32(gl, "u_length", per_frame.get(s.mv_l) as f32);
        program.set_uniform_vec4(
            gl,
            "u_color",
            [
                per_frame.get(s.mv_r) as f32,
                per_frame.get(s.mv_g) as f32,
                per_frame.get(s.mv_b) as f32,
                alpha as f32,
            ],
        );

        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture(glow::TEXTURE_2D, Some(uv_map));

        gl.viewport(0, 0, state.viewport_width, state.viewport_height);
        gl.enable(glow::BLEND);
        gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);

        gl.bind_vertex_array(self.vao);
        gl.bind_buffer(glow::ARRAY_BUFFER, self.vbo);
        let bytes = core::slice::from_raw_parts(
            self.vertex_data.as_ptr() as *const u8,
            self.vertex_data.len() * core::mem::size_of::<f32>(),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);
        gl.draw_arrays(glow::LINES, 0, (self.vertex_data.len() / 3) as i32);

        gl.disable(glow::BLEND);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.use_program(None);
        Ok(())
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(vao) = self.vao.take() {
            gl.delete_vertex_array(vao);
        }
        if let Some(vbo) = self.vbo.take() {
            gl.delete_buffer(vbo);
        }
    }
}

//! Per-pixel warp mesh.
//!
//! A regular grid whose vertices carry UV coordinates displaced by the warp
//! math and the preset's per-pixel code. Each frame the CPU evaluates the
//! expression at every vertex, uploads the new UVs, and draws the previous
//! frame through the warp shader. The fragment stage writes two outputs:
//! the warped color (attachment 0) and the UV field used by the motion
//! vectors next frame (attachment 1).

use glow::HasContext;

use kaleid_core::{EngineError, ShaderStage, ShaderTranspiler};
use kaleid_render::shader::glsl_version_header;
use kaleid_render::TextureManager;

use crate::per_frame::PerFrameContext;
use crate::per_pixel::PerPixelContext;
use crate::preset_shader::PresetShader;
use crate::state::PresetState;

pub fn warp_vertex_source() -> String {
    format!(
        "{}\
layout (location = 0) in vec2 a_pos;\n\
layout (location = 1) in vec2 a_uv;\n\
out vec2 v_uv;\n\
out vec2 v_uv_orig;\n\
void main() {{\n\
    v_uv = a_uv;\n\
    v_uv_orig = a_pos * 0.5 + 0.5;\n\
    gl_Position = vec4(a_pos, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

fn default_warp_fragment_source() -> String {
    format!(
        "{}\
in vec2 v_uv;\n\
in vec2 v_uv_orig;\n\
layout (location = 0) out vec4 o_color;\n\
layout (location = 1) out vec4 o_uv;\n\
uniform sampler2D sampler_main;\n\
uniform float u_decay;\n\
void main() {{\n\
    o_color = vec4(texture(sampler_main, v_uv).rgb * u_decay, 1.0);\n\
    o_uv = vec4(v_uv, 0.0, 1.0);\n\
}}\n",
        glsl_version_header()
    )
}

#[derive(Debug)]
struct MeshBuffers {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
    ibo: glow::NativeBuffer,
    index_count: i32,
}

#[derive(Debug)]
pub struct PerPixelMesh {
    grid_x: i32,
    grid_y: i32,
    buffers: Option<MeshBuffers>,
    /// Interleaved [ndc_x, ndc_y, u, v] per vertex, rebuilt every frame.
    vertex_data: Vec<f32>,
    warp_shader: PresetShader,
}

impl Default for PerPixelMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl PerPixelMesh {
    pub fn new() -> Self {
        Self {
            grid_x: 0,
            grid_y: 0,
            buffers: None,
            vertex_data: Vec::new(),
            warp_shader: PresetShader::new(ShaderStage::Warp),
        }
    }

    /// Captures the warp shader source (or the built-in fallback). Runs in
    /// the preset constructor; no GL.
    pub fn load_warp_shader(&mut self, state: &PresetState) {
        match &state.parsed.warp_shader {
            Some(source) => self.warp_shader.load_source(source),
            None => self.warp_shader.load_builtin(&default_warp_fragment_source()),
        }
    }

    /// HLSL-to-GLSL transpile; pure CPU, worker-thread safe.
    pub fn transpile_warp_shader(
        &mut self,
        transpiler: &dyn ShaderTranspiler,
    ) -> Result<(), EngineError> {
        self.warp_shader.transpile(transpiler)
    }

    pub fn warp_sampler_names(&self) -> &std::collections::BTreeSet<String> {
        self.warp_shader.sampler_names()
    }

    /// Allocates the grid buffers; phase-0 work on the render thread.
    pub unsafe fn create_mesh(
        &mut self,
        gl: &glow::Context,
        state: &PresetState,
    ) -> Result<(), EngineError> {
        if self.buffers.is_some() && self.grid_x == state.mesh_x && self.grid_y == state.mesh_y {
            return Ok(());
        }
        if let Some(mut old) = self.buffers.take() {
            destroy_buffers(gl, &mut old);
        }

        self.grid_x = state.mesh_x;
        self.grid_y = state.mesh_y;

        let vertex_count = ((self.grid_x + 1) * (self.grid_y + 1)) as usize;
        self.vertex_data = vec![0.0; vertex_count * 4];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;
        let ibo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        // Static triangle indices over the grid.
        let mut indices: Vec<u32> = Vec::with_capacity((self.grid_x * self.grid_y * 6) as usize);
        let stride = (self.grid_x + 1) as u32;
        for gy in 0..self.grid_y as u32 {
            for gx in 0..self.grid_x as u32 {
                let i0 = gy * stride + gx;
                let i1 = i0 + 1;
                let i2 = i0 + stride;
                let i3 = i2 + 1;
                indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
            }
        }

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_size(
            glow::ARRAY_BUFFER,
            (self.vertex_data.len() * 4) as i32,
            glow::STREAM_DRAW,
        );
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ibo));
        let index_bytes = core::slice::from_raw_parts(
            indices.as_ptr() as *const u8,
            indices.len() * core::mem::size_of::<u32>(),
        );
        gl.buffer_data_u8_slice(glow::ELEMENT_ARRAY_BUFFER, index_bytes, glow::STATIC_DRAW);

        gl.bind_vertex_array(None);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, None);

        self.buffers = Some(MeshBuffers {
            vao,
            vbo,
            ibo,
            index_count: indices.len() as i32,
        });
        Ok(())
    }

    // ---- Warp shader compilation (sync + async) ----

    pub unsafe fn compile_warp_shader(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) -> Result<(), EngineError> {
        self.warp_shader.compile(gl, &warp_vertex_source())?;
        self.warp_shader.resolve_samplers(gl, texture_manager);
        Ok(())
    }

    pub unsafe fn compile_warp_shader_async(&mut self, gl: &glow::Context) -> Result<(), EngineError> {
        self.warp_shader.submit_compile_async(gl, &warp_vertex_source())
    }

    pub unsafe fn is_warp_shader_compile_complete(&mut self, gl: &glow::Context) -> bool {
        self.warp_shader.is_compile_complete(gl)
    }

    pub unsafe fn finalize_warp_shader_compile(
        &mut self,
        gl: &glow::Context,
        texture_manager: &mut TextureManager,
    ) -> Result<(), EngineError> {
        self.warp_shader.finalize_compile(gl, texture_manager)
    }

    /// Evaluates the per-pixel expression over the grid, uploads the new
    /// UVs, and draws the warped previous frame.
    pub unsafe fn draw(
        &mut self,
        gl: &glow::Context,
        state: &mut PresetState,
        per_frame: &PerFrameContext,
        per_pixel: &mut PerPixelContext,
    ) {
        if self.buffers.is_none() {
            return;
        }
        self.compute_vertices(state, per_frame, per_pixel);
        let Some(buffers) = &self.buffers else {
            return;
        };

        gl.viewport(0, 0, state.viewport_width, state.viewport_height);
        gl.disable(glow::BLEND);

        self.warp_shader.bind(gl, state);
        if let Some(program) = self.warp_shader.program() {
            program.set_uniform_f32(gl, "u_decay", per_frame.get(per_frame.slots.decay) as f32);
            program.set_uniform_f32(gl, "u_time", state.preset_time as f32);
            program.set_uniform_f32(gl, "u_frame", state.frame as f32);
            program.set_uniform_vec2(
                gl,
                "u_resolution",
                [state.viewport_width as f32, state.viewport_height as f32],
            );
            let q = per_frame.q_values();
            for (i, value) in q.iter().enumerate() {
                program.set_uniform_f32(gl, &format!("q{}", i + 1), *value as f32);
            }
        }

        gl.bind_vertex_array(Some(buffers.vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffers.vbo));
        let bytes = core::slice::from_raw_parts(
            self.vertex_data.as_ptr() as *const u8,
            self.vertex_data.len() * core::mem::size_of::<f32>(),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);

        gl.draw_elements(glow::TRIANGLES, buffers.index_count, glow::UNSIGNED_INT, 0);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);
        self.warp_shader.unbind(gl);
    }

    /// The classic warp transform: zoom scaled by a radius-dependent
    /// exponent, four traveling sine wobbles, stretch around the center,
    /// rotation, then translation. The per-pixel program may displace any
    /// of the inputs per vertex.
    fn compute_vertices(
        &mut self,
        state: &mut PresetState,
        per_frame: &PerFrameContext,
        per_pixel: &mut PerPixelContext,
    ) {
        let (aspect_x, aspect_y) = state.aspect();
        let warp_time = state.preset_time * per_frame.get(per_frame.slots.warp_speed);
        let warp_scale_inv = 1.0 / per_frame.get(per_frame.slots.warp_scale).max(1e-6);

        let f0 = 11.68 + 4.0 * (warp_time * 1.413 + 10.0).cos();
        let f1 = 8.77 + 3.0 * (warp_time * 1.113 + 7.0).cos();
        let f2 = 10.54 + 3.0 * (warp_time * 1.233 + 3.0).cos();
        let f3 = 11.49 + 4.0 * (warp_time * 0.933 + 5.0).cos();

        let s = per_pixel.slots.clone();
        let has_program = per_pixel.has_program();

        let mut index = 0;
        for gy in 0..=self.grid_y {
            let y = gy as f64 / self.grid_y as f64;
            for gx in 0..=self.grid_x {
                let x = gx as f64 / self.grid_x as f64;

                let dx_c = (x * 2.0 - 1.0) * aspect_x;
                let dy_c = (y * 2.0 - 1.0) * aspect_y;
                let rad = (dx_c * dx_c + dy_c * dy_c).sqrt();
                let ang = if rad < 1e-9 { 0.0 } else { dy_c.atan2(dx_c) };

                // Seed the per-vertex inputs; the writable warp parameters
                // are re-seeded from the per-frame values every vertex.
                per_pixel.set(s.x, x);
                per_pixel.set(s.y, y);
                per_pixel.set(s.rad, rad);
                per_pixel.set(s.ang, ang);
                if has_program {
                    for (dst, src) in [
                        (s.zoom, per_frame.slots.zoom),
                        (s.zoomexp, per_frame.slots.zoomexp),
                        (s.rot, per_frame.slots.rot),
                        (s.warp, per_frame.slots.warp),
                        (s.cx, per_frame.slots.cx),
                        (s.cy, per_frame.slots.cy),
                        (s.dx, per_frame.slots.dx),
                        (s.dy, per_frame.slots.dy),
                        (s.sx, per_frame.slots.sx),
                        (s.sy, per_frame.slots.sy),
                    ] {
                        per_pixel.set(dst, per_frame.get(src));
                    }
                    per_pixel.execute(&mut state.globals);
                }

                let zoom = per_pixel.get(s.zoom);
                let zoomexp = per_pixel.get(s.zoomexp);
                let rot = per_pixel.get(s.rot);
                let warp = per_pixel.get(s.warp);
                let cx = per_pixel.get(s.cx);
                let cy = per_pixel.get(s.cy);
                let dx = per_pixel.get(s.dx);
                let dy = per_pixel.get(s.dy);
                let sx = per_pixel.get(s.sx).max(1e-6);
                let sy = per_pixel.get(s.sy).max(1e-6);

                let zoom2 = zoom.powf(zoomexp.powf(rad * 2.0 - 1.0));
                let zoom2_inv = 1.0 / zoom2.max(1e-6);

                let mut u = (x - 0.5) * zoom2_inv + 0.5;
                let mut v = (y - 0.5) * zoom2_inv + 0.5;

                u = (u - cx) / sx + cx;
                v = (v - cy) / sy + cy;

                if warp.abs() > 1e-9 {
                    let ox = x - 0.5;
                    let oy = y - 0.5;
                    let w = warp * 0.0035;
                    u += w * (warp_time * 0.333 + warp_scale_inv * (ox * f0 - oy * f3)).sin();
                    v += w * (warp_time * 0.375 - warp_scale_inv * (ox * f2 + oy * f1)).cos();
                    u += w * (warp_time * 0.753 - warp_scale_inv * (ox * f1 - oy * f2)).cos();
                    v += w * (warp_time * 0.825 + warp_scale_inv * (ox * f0 + oy * f3)).sin();
                }

                let u2 = u - cx;
                let v2 = v - cy;
                let (sin_rot, cos_rot) = rot.sin_cos();
                u = u2 * cos_rot - v2 * sin_rot + cx;
                v = u2 * sin_rot + v2 * cos_rot + cy;

                u -= dx;
                v -= dy;

                self.vertex_data[index] = (x * 2.0 - 1.0) as f32;
                self.vertex_data[index + 1] = (y * 2.0 - 1.0) as f32;
                self.vertex_data[index + 2] = u as f32;
                self.vertex_data[index + 3] = v as f32;
                index += 4;
            }
        }
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(mut buffers) = self.buffers.take() {
            destroy_buffers(gl, &mut buffers);
        }
        self.warp_shader.destroy(gl);
    }
}

unsafe fn destroy_buffers(gl: &glow::Context, buffers: &mut MeshBuffers) {
    gl.delete_vertex_array(buffers.vao);
    gl.delete_buffer(buffers.vbo);
    gl.delete_buffer(buffers.ibo);
}

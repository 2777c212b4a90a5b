//! kaleid rendering toolkit (glow/OpenGL backend)
//
// This crate contains the GL-level building blocks the preset runtime is
// assembled from:
// - shader program wrapper with async (parallel) compilation
// - ping-pong framebuffer with indexed attachment slots
// - y-flip copy pass
// - blur texture chain
// - texture manager with CPU-side pre-decode staging
//
// It does NOT contain preset semantics, windowing, or file-format policy.
#![allow(clippy::missing_safety_doc)]

pub mod blur;
pub mod context;
pub mod flip;
pub mod framebuffer;
pub mod noise;
pub mod sampler;
pub mod shader;
pub mod texture;
pub mod texture_manager;

pub use blur::BlurTextures;
pub use context::{RenderContext, ShaderCache};
pub use flip::FlipTexture;
pub use framebuffer::Framebuffer;
pub use kaleid_core::EngineError;
pub use sampler::{FilterMode, WrapMode};
pub use shader::{glsl_version_header, ShaderProgram};
pub use texture::Texture;
pub use texture_manager::{TextureManager, TexturePreloader, TextureSamplerDescriptor};

use glow::HasContext;

/// Fullscreen triangle used by every screen-space pass.
#[derive(Debug)]
pub struct FullscreenTriangle {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl FullscreenTriangle {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let verts: [f32; 12] = [
            -1.0, -1.0, 0.0, 0.0, 3.0, -1.0, 2.0, 0.0, -1.0, 3.0, 0.0, 2.0,
        ];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));

        let bytes = core::slice::from_raw_parts(
            verts.as_ptr() as *const u8,
            verts.len() * core::mem::size_of::<f32>(),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW);

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);

        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    pub unsafe fn draw(&self, gl: &glow::Context) {
        gl.bind_vertex_array(Some(self.vao));
        gl.draw_arrays(glow::TRIANGLES, 0, 3);
        gl.bind_vertex_array(None);
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

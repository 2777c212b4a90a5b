//! GPU texture wrapper.

use glow::HasContext;

use kaleid_core::EngineError;

/// One GL texture plus the allocation parameters needed to resize it.
#[derive(Debug, Clone, Copy)]
pub struct Texture {
    pub handle: glow::NativeTexture,
    pub target: u32,
    pub internal_format: u32,
    pub format: u32,
    pub ty: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

impl Texture {
    /// Creates an unallocated 2D texture with the given formats.
    pub unsafe fn new_2d(
        gl: &glow::Context,
        internal_format: u32,
        format: u32,
        ty: u32,
    ) -> Result<Self, EngineError> {
        let handle = gl
            .create_texture()
            .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;

        gl.bind_texture(glow::TEXTURE_2D, Some(handle));
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MIN_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_MAG_FILTER,
            glow::LINEAR as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_S,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.tex_parameter_i32(
            glow::TEXTURE_2D,
            glow::TEXTURE_WRAP_T,
            glow::CLAMP_TO_EDGE as i32,
        );
        gl.bind_texture(glow::TEXTURE_2D, None);

        Ok(Self {
            handle,
            target: glow::TEXTURE_2D,
            internal_format,
            format,
            ty,
            width: 0,
            height: 0,
            depth: 0,
        })
    }

    /// (Re)allocates storage. Returns true if the size changed.
    pub unsafe fn set_size(&mut self, gl: &glow::Context, width: i32, height: i32) -> bool {
        let width = width.max(0);
        let height = height.max(0);
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        if width == 0 || height == 0 {
            return true;
        }

        gl.bind_texture(glow::TEXTURE_2D, Some(self.handle));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            self.internal_format as i32,
            width,
            height,
            0,
            self.format,
            self.ty,
            glow::PixelUnpackData::Slice(None),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
        true
    }

    /// Uploads RGBA8 pixel data, allocating at the given size.
    pub unsafe fn upload_rgba8(
        &mut self,
        gl: &glow::Context,
        width: i32,
        height: i32,
        pixels: &[u8],
    ) {
        self.width = width;
        self.height = height;
        gl.bind_texture(glow::TEXTURE_2D, Some(self.handle));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width,
            height,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(Some(pixels)),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
    }

    /// In-memory size estimate, for the texture manager's usage stats.
    pub fn size_bytes(&self) -> u32 {
        let texel = match self.internal_format {
            f if f == glow::RG16F => 4,
            f if f == glow::RGBA16F => 8,
            _ => 4,
        };
        (self.width.max(0) as u32)
            .saturating_mul(self.height.max(0) as u32)
            .saturating_mul(self.depth.max(1) as u32)
            .saturating_mul(texel)
    }

    pub unsafe fn destroy(self, gl: &glow::Context) {
        gl.delete_texture(self.handle);
    }
}

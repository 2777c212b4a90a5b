//! Multi-surface framebuffer with indexed color attachments.
//!
//! A preset owns one of these with two surfaces, used as a ping-pong pair:
//! an "active" index drawn into and a "previous" index sampled from, swapped
//! at the end of every frame. Slot 1 of the active surface temporarily hosts
//! the motion-vector UV map during the warp draw.

use std::collections::BTreeMap;

use glow::HasContext;

use kaleid_core::EngineError;

use crate::texture::Texture;

#[derive(Debug)]
struct Surface {
    fbo: glow::NativeFramebuffer,
    /// Attachments owned by this framebuffer, keyed by slot.
    owned: BTreeMap<u32, Texture>,
    /// Transient attachments owned by someone else, keyed by slot.
    external: BTreeMap<u32, glow::NativeTexture>,
}

#[derive(Debug)]
pub struct Framebuffer {
    surfaces: Vec<Surface>,
    width: i32,
    height: i32,
}

impl Framebuffer {
    pub unsafe fn new(gl: &glow::Context, surface_count: usize) -> Result<Self, EngineError> {
        let mut surfaces = Vec::with_capacity(surface_count);
        for _ in 0..surface_count {
            let fbo = gl
                .create_framebuffer()
                .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
            surfaces.push(Surface {
                fbo,
                owned: BTreeMap::new(),
                external: BTreeMap::new(),
            });
        }
        Ok(Self {
            surfaces,
            width: 0,
            height: 0,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Creates an owned color attachment for `slot` on surface `index`.
    /// Storage is allocated on the next `set_size`.
    pub unsafe fn create_color_attachment(
        &mut self,
        gl: &glow::Context,
        index: usize,
        slot: u32,
        internal_format: u32,
        format: u32,
        ty: u32,
    ) -> Result<(), EngineError> {
        let texture = Texture::new_2d(gl, internal_format, format, ty)?;
        self.surfaces[index].owned.insert(slot, texture);
        Ok(())
    }

    /// Resizes every owned attachment. Returns true when the size changed;
    /// freshly allocated surfaces are cleared to black so the first feedback
    /// sample is defined.
    pub unsafe fn set_size(&mut self, gl: &glow::Context, width: i32, height: i32) -> bool {
        if width <= 0 || height <= 0 || (self.width == width && self.height == height) {
            return false;
        }
        self.width = width;
        self.height = height;

        for surface in &mut self.surfaces {
            for (&slot, texture) in surface.owned.iter_mut() {
                texture.set_size(gl, width, height);
                gl.bind_framebuffer(glow::FRAMEBUFFER, Some(surface.fbo));
                gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::COLOR_ATTACHMENT0 + slot,
                    glow::TEXTURE_2D,
                    Some(texture.handle),
                    0,
                );
            }
            apply_draw_buffers(gl, surface);
            gl.viewport(0, 0, width, height);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        true
    }

    pub unsafe fn bind(&self, gl: &glow::Context, index: usize) {
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.surfaces[index].fbo));
    }

    pub unsafe fn bind_read(&self, gl: &glow::Context, index: usize) {
        gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(self.surfaces[index].fbo));
    }

    pub unsafe fn bind_draw(&self, gl: &glow::Context, index: usize) {
        gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, Some(self.surfaces[index].fbo));
    }

    pub unsafe fn unbind(gl: &glow::Context) {
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    }

    pub fn fbo(&self, index: usize) -> glow::NativeFramebuffer {
        self.surfaces[index].fbo
    }

    /// Color attachment texture at `slot`, owned or external.
    pub fn texture(&self, index: usize, slot: u32) -> Option<glow::NativeTexture> {
        let surface = &self.surfaces[index];
        surface
            .owned
            .get(&slot)
            .map(|t| t.handle)
            .or_else(|| surface.external.get(&slot).copied())
    }

    /// Temporarily attaches an externally owned texture at `slot`.
    pub unsafe fn set_attachment(
        &mut self,
        gl: &glow::Context,
        index: usize,
        slot: u32,
        texture: glow::NativeTexture,
    ) {
        let surface = &mut self.surfaces[index];
        surface.external.insert(slot, texture);
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(surface.fbo));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0 + slot,
            glow::TEXTURE_2D,
            Some(texture),
            0,
        );
        apply_draw_buffers(gl, surface);
    }

    /// Detaches `slot`; only external attachments may be removed.
    pub unsafe fn remove_color_attachment(&mut self, gl: &glow::Context, index: usize, slot: u32) {
        let surface = &mut self.surfaces[index];
        if surface.external.remove(&slot).is_none() {
            return;
        }
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(surface.fbo));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0 + slot,
            glow::TEXTURE_2D,
            None,
            0,
        );
        apply_draw_buffers(gl, surface);
    }

    /// True when no surface currently carries an external attachment at
    /// `slot` (render-frame postcondition for the motion-vector map).
    pub fn has_external_attachment(&self, slot: u32) -> bool {
        self.surfaces.iter().any(|s| s.external.contains_key(&slot))
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        for surface in self.surfaces.drain(..) {
            for (_, texture) in surface.owned {
                texture.destroy(gl);
            }
            gl.delete_framebuffer(surface.fbo);
        }
    }
}

unsafe fn apply_draw_buffers(gl: &glow::Context, surface: &Surface) {
    let mut slots: Vec<u32> = surface
        .owned
        .keys()
        .chain(surface.external.keys())
        .copied()
        .collect();
    slots.sort_unstable();
    slots.dedup();
    let buffers: Vec<u32> = slots.iter().map(|s| glow::COLOR_ATTACHMENT0 + s).collect();
    gl.draw_buffers(&buffers);
}

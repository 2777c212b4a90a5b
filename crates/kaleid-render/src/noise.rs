//! Built-in noise textures.
//!
//! Presets sample deterministic pseudo-random noise under well-known names
//! (`noise_lq`, `noisevol_hq`, ...). The pixel data is generated once per
//! texture from a fixed-seed xorshift stream so every run sees the same
//! noise.

use glow::HasContext;

use kaleid_core::EngineError;

use crate::texture::Texture;

/// 2D noise names with their edge length.
pub const NOISE_2D: [(&str, i32); 4] = [
    ("noise_lq_lite", 32),
    ("noise_lq", 256),
    ("noise_mq", 256),
    ("noise_hq", 256),
];

/// 3D noise volume names with their edge length.
pub const NOISE_3D: [(&str, i32); 2] = [("noisevol_lq", 32), ("noisevol_hq", 32)];

pub fn is_noise_name(name: &str) -> bool {
    NOISE_2D.iter().any(|(n, _)| *n == name) || NOISE_3D.iter().any(|(n, _)| *n == name)
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn noise_bytes(count: usize, seed: u64) -> Vec<u8> {
    let mut rng = XorShift(seed | 1);
    let mut bytes = Vec::with_capacity(count);
    while bytes.len() < count {
        let word = rng.next();
        for shift in [0u32, 8, 16, 24, 32, 40, 48, 56] {
            if bytes.len() == count {
                break;
            }
            bytes.push((word >> shift) as u8);
        }
    }
    bytes
}

/// Creates one of the built-in noise textures, or None for other names.
pub unsafe fn create_noise_texture(
    gl: &glow::Context,
    name: &str,
) -> Result<Option<Texture>, EngineError> {
    if let Some((_, size)) = NOISE_2D.iter().find(|(n, _)| *n == name) {
        let size = *size;
        let pixels = noise_bytes((size * size * 4) as usize, seed_for(name));
        let mut texture = Texture::new_2d(gl, glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE)?;
        texture.upload_rgba8(gl, size, size, &pixels);
        // Noise tiles; wrap instead of clamping.
        gl.bind_texture(glow::TEXTURE_2D, Some(texture.handle));
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
        gl.bind_texture(glow::TEXTURE_2D, None);
        return Ok(Some(texture));
    }

    if let Some((_, size)) = NOISE_3D.iter().find(|(n, _)| *n == name) {
        let size = *size;
        let pixels = noise_bytes((size * size * size * 4) as usize, seed_for(name));

        let handle = gl
            .create_texture()
            .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;
        gl.bind_texture(glow::TEXTURE_3D, Some(handle));
        gl.tex_parameter_i32(glow::TEXTURE_3D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_3D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_3D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
        gl.tex_parameter_i32(glow::TEXTURE_3D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
        gl.tex_parameter_i32(glow::TEXTURE_3D, glow::TEXTURE_WRAP_R, glow::REPEAT as i32);
        gl.tex_image_3d(
            glow::TEXTURE_3D,
            0,
            glow::RGBA8 as i32,
            size,
            size,
            size,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(Some(&pixels)),
        );
        gl.bind_texture(glow::TEXTURE_3D, None);

        return Ok(Some(Texture {
            handle,
            target: glow::TEXTURE_3D,
            internal_format: glow::RGBA8,
            format: glow::RGBA,
            ty: glow::UNSIGNED_BYTE,
            width: size,
            height: size,
            depth: size,
        }));
    }

    Ok(None)
}

fn seed_for(name: &str) -> u64 {
    // FNV-1a over the name keeps each texture's stream distinct but stable.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in name.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_names_are_recognized() {
        assert!(is_noise_name("noise_lq"));
        assert!(is_noise_name("noise_hq"));
        assert!(is_noise_name("noisevol_lq"));
        assert!(!is_noise_name("noise_xl"));
        assert!(!is_noise_name("rock"));
    }

    #[test]
    fn noise_streams_are_deterministic_and_distinct() {
        let a = noise_bytes(64, seed_for("noise_lq"));
        let b = noise_bytes(64, seed_for("noise_lq"));
        let c = noise_bytes(64, seed_for("noise_hq"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

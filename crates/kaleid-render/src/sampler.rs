//! Sampler-prefix parsing and GL sampler objects.
//!
//! Preset shaders address textures with qualified names such as
//! `sampler_pc_rock` where a two-letter prefix picks the sampling mode:
//! first letter `f` (bilinear) or `p` (point), second letter `w` (wrap) or
//! `c` (clamp). Names without a recognized prefix default to wrap + linear.

use glow::HasContext;

use kaleid_core::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Linear,
    Nearest,
}

impl WrapMode {
    pub fn gl(self) -> i32 {
        match self {
            WrapMode::Repeat => glow::REPEAT as i32,
            WrapMode::Clamp => glow::CLAMP_TO_EDGE as i32,
        }
    }
}

impl FilterMode {
    pub fn gl(self) -> i32 {
        match self {
            FilterMode::Linear => glow::LINEAR as i32,
            FilterMode::Nearest => glow::NEAREST as i32,
        }
    }
}

pub const DEFAULT_WRAP: WrapMode = WrapMode::Repeat;
pub const DEFAULT_FILTER: FilterMode = FilterMode::Linear;

/// Splits a qualified texture name into (wrap, filter, bare name).
pub fn parse_qualified_name(full_name: &str) -> (WrapMode, FilterMode, &str) {
    let bytes = full_name.as_bytes();
    if bytes.len() > 3 && bytes[2] == b'_' {
        let filter = match bytes[0].to_ascii_lowercase() {
            b'f' => Some(FilterMode::Linear),
            b'p' => Some(FilterMode::Nearest),
            _ => None,
        };
        let wrap = match bytes[1].to_ascii_lowercase() {
            b'w' => Some(WrapMode::Repeat),
            b'c' => Some(WrapMode::Clamp),
            _ => None,
        };
        if let (Some(filter), Some(wrap)) = (filter, wrap) {
            return (wrap, filter, &full_name[3..]);
        }
    }
    (DEFAULT_WRAP, DEFAULT_FILTER, full_name)
}

/// Splits a `randNN` / `randNN_prefix` name. Returns the basename filter
/// (empty when any file may match), or None when the name is not a
/// random-texture request.
pub fn parse_random_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("rand")?;
    let bytes = rest.as_bytes();
    if bytes.len() < 2 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
        return None;
    }
    match &rest[2..] {
        "" => Some(""),
        tail => tail.strip_prefix('_'),
    }
}

/// Creates the GL sampler object for one wrap/filter combination.
pub unsafe fn create_sampler(
    gl: &glow::Context,
    wrap: WrapMode,
    filter: FilterMode,
) -> Result<glow::NativeSampler, EngineError> {
    let sampler = gl
        .create_sampler()
        .map_err(|e| EngineError::GlCreate(format!("create_sampler failed: {e:?}")))?;
    gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_S, wrap.gl());
    gl.sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_T, wrap.gl());
    gl.sampler_parameter_i32(sampler, glow::TEXTURE_MIN_FILTER, filter.gl());
    gl.sampler_parameter_i32(sampler, glow::TEXTURE_MAG_FILTER, filter.gl());
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_prefixes_map_to_modes() {
        assert_eq!(
            parse_qualified_name("fw_tex"),
            (WrapMode::Repeat, FilterMode::Linear, "tex")
        );
        assert_eq!(
            parse_qualified_name("fc_tex"),
            (WrapMode::Clamp, FilterMode::Linear, "tex")
        );
        assert_eq!(
            parse_qualified_name("pw_tex"),
            (WrapMode::Repeat, FilterMode::Nearest, "tex")
        );
        assert_eq!(
            parse_qualified_name("PC_tex"),
            (WrapMode::Clamp, FilterMode::Nearest, "tex")
        );
    }

    #[test]
    fn unprefixed_names_use_defaults() {
        assert_eq!(
            parse_qualified_name("rock"),
            (WrapMode::Repeat, FilterMode::Linear, "rock")
        );
        // A prefix-looking name that isn't one stays whole.
        assert_eq!(
            parse_qualified_name("xy_tex"),
            (WrapMode::Repeat, FilterMode::Linear, "xy_tex")
        );
        // Too short for a prefix.
        assert_eq!(
            parse_qualified_name("fw_"),
            (WrapMode::Repeat, FilterMode::Linear, "fw_")
        );
    }

    #[test]
    fn random_names_parse() {
        assert_eq!(parse_random_name("rand00"), Some(""));
        assert_eq!(parse_random_name("rand13_smalltiled"), Some("smalltiled"));
        assert_eq!(parse_random_name("rand7"), None);
        assert_eq!(parse_random_name("random"), None);
        assert_eq!(parse_random_name("rand12x"), None);
        assert_eq!(parse_random_name("rock"), None);
    }
}

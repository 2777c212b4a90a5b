//! Pure resolver policy helpers.
//!
//! These functions encode which provider entry point may be consulted for
//! which symbol name, independent of any live GL state, so they are unit
//! tested without a context.

/// Common vendor / standards-body suffixes of GL-family extension entry
/// points.
const EXTENSION_SUFFIXES: [&str; 32] = [
    "ARB", "EXT", "KHR", "OES", "NV", "NVX", "AMD", "APPLE", "ANGLE", "INTEL", "MESA", "QCOM",
    "IMG", "ARM", "ATI", "IBM", "SUN", "SGI", "SGIX", "OML", "GREMEDY", "HP", "3DFX", "S3", "PVR",
    "VIV", "OVR", "NOK", "MSFT", "SEC", "DMP", "FJ",
];

/// Heuristic: does this symbol name look like an extension entry point?
///
/// Comparison is case-sensitive against the conventional uppercase suffixes.
pub fn is_likely_extension_name(name: &str) -> bool {
    EXTENSION_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// EGL policy: without `EGL_KHR_get_all_proc_addresses` the provider entry
/// point is only consulted for extension-looking names.
pub fn should_use_egl_get_proc_address(name: &str) -> bool {
    is_likely_extension_name(name)
}

/// GLX policy: some implementations return non-null for unknown names, so
/// `glXGetProcAddress*` is only consulted for GLX entry points and
/// extension-looking names. Core symbols go through direct exports.
pub fn should_use_glx_get_proc_address(name: &str) -> bool {
    if name.starts_with("glX") {
        return true;
    }
    is_likely_extension_name(name)
}

/// While the documentation says `wglGetProcAddress` returns NULL on failure,
/// implementations in the wild return small-integer or near-`usize::MAX`
/// sentinels for unsupported symbols.
pub fn is_invalid_wgl_proc_value(raw: usize) -> bool {
    raw == 0
        || raw == 1
        || raw == 2
        || raw == 3
        || raw == usize::MAX
        || raw == usize::MAX - 1
        || raw == usize::MAX - 2
}

/// Whole-token search in a space-separated extension list.
///
/// Matches complete tokens only, so `"FOO"` does not match `"FOOBAR"`.
pub fn has_space_separated_token(list: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    list.split(' ').any(|t| t == token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_suffixes_are_recognized() {
        assert!(is_likely_extension_name("glMaxShaderCompilerThreadsKHR"));
        assert!(is_likely_extension_name("glDebugMessageCallbackARB"));
        assert!(is_likely_extension_name("eglCreateImageKHR"));
        assert!(is_likely_extension_name("glTextureFoo3DFX"));

        assert!(!is_likely_extension_name("glDrawArrays"));
        assert!(!is_likely_extension_name("glClear"));
        // Lowercase suffixes are not extension tags.
        assert!(!is_likely_extension_name("glSomethingext"));
    }

    #[test]
    fn glx_entry_points_always_use_the_provider() {
        assert!(should_use_glx_get_proc_address("glXCreateContextAttribsARB"));
        assert!(should_use_glx_get_proc_address("glXSwapIntervalMESA"));
        assert!(should_use_glx_get_proc_address("glXGetCurrentContext"));
        assert!(!should_use_glx_get_proc_address("glDrawArrays"));
    }

    #[test]
    fn wgl_sentinels_cover_the_documented_set() {
        for raw in [0usize, 1, 2, 3, usize::MAX, usize::MAX - 1, usize::MAX - 2] {
            assert!(is_invalid_wgl_proc_value(raw), "raw={raw:#x}");
        }
        assert!(!is_invalid_wgl_proc_value(0x7f00_1000));
        assert!(!is_invalid_wgl_proc_value(4));
    }

    #[test]
    fn token_search_matches_whole_tokens_only() {
        let list = "EGL_KHR_client_get_all_proc_addresses EGL_EXT_platform_base";
        assert!(has_space_separated_token(
            list,
            "EGL_KHR_client_get_all_proc_addresses"
        ));
        assert!(has_space_separated_token(list, "EGL_EXT_platform_base"));
        assert!(!has_space_separated_token(list, "EGL_EXT_platform"));
        assert!(!has_space_separated_token(list, ""));
        assert!(!has_space_separated_token("", "EGL_EXT_platform_base"));
    }

    #[test]
    fn token_search_tolerates_extra_spaces() {
        assert!(has_space_separated_token("  A  B ", "A"));
        assert!(has_space_separated_token("  A  B ", "B"));
        assert!(!has_space_separated_token("  A  B ", "C"));
    }
}

//! GL context information and minimum-requirement checks.
//!
//! The probe talks to the driver exclusively through entry points obtained
//! from [`GlResolver`], so it works before any function table is loaded.
//! The requirement evaluation itself is pure and unit-tested.

use std::ffi::{c_char, CStr};

use crate::dynlib::symbol_to_function;
use crate::resolver::GlResolver;

const GL_NO_ERROR: u32 = 0;
const GL_VENDOR: u32 = 0x1F00;
const GL_RENDERER: u32 = 0x1F01;
const GL_VERSION: u32 = 0x1F02;
const GL_SHADING_LANGUAGE_VERSION: u32 = 0x8B8C;
const GL_MAJOR_VERSION: u32 = 0x821B;
const GL_MINOR_VERSION: u32 = 0x821C;
const GL_CONTEXT_FLAGS: u32 = 0x821E;
const GL_CONTEXT_PROFILE_MASK: u32 = 0x9126;

const GL_CONTEXT_CORE_PROFILE_BIT: i32 = 0x0000_0001;
const GL_CONTEXT_COMPATIBILITY_PROFILE_BIT: i32 = 0x0000_0002;
const GL_CONTEXT_FLAG_FORWARD_COMPATIBLE_BIT: i32 = 0x0000_0001;
const GL_CONTEXT_FLAG_DEBUG_BIT: i32 = 0x0000_0002;
const GL_CONTEXT_FLAG_ROBUST_ACCESS_BIT: i32 = 0x0000_0004;

type GetStringFn = unsafe extern "system" fn(u32) -> *const c_char;
type GetErrorFn = unsafe extern "system" fn() -> u32;
type GetIntegervFn = unsafe extern "system" fn(u32, *mut i32);

/// Which GL-family API the context implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlApi {
    #[default]
    Any,
    OpenGl,
    OpenGlEs,
}

impl GlApi {
    pub fn as_str(self) -> &'static str {
        match self {
            GlApi::Any => "Any",
            GlApi::OpenGl => "GL",
            GlApi::OpenGlEs => "GLES",
        }
    }
}

/// Queried facts about the current context.
#[derive(Debug, Default, Clone)]
pub struct GlInfo {
    pub api: GlApi,
    pub major: i32,
    pub minor: i32,
    pub version_str: String,
    pub glsl_str: String,
    pub vendor: String,
    pub renderer: String,
    pub profile: String,
    pub flags: String,
}

/// Minimum-version requirement, builder style.
#[derive(Debug, Clone, Copy)]
pub struct GlRequirements {
    pub api: GlApi,
    pub min_major: i32,
    pub min_minor: i32,
    pub min_glsl_major: i32,
    pub min_glsl_minor: i32,
    pub require_core_profile: bool,
}

impl Default for GlRequirements {
    fn default() -> Self {
        Self {
            api: GlApi::Any,
            min_major: 0,
            min_minor: 0,
            min_glsl_major: 0,
            min_glsl_minor: 0,
            require_core_profile: false,
        }
    }
}

#[derive(Debug)]
pub struct GlProbeResult {
    pub success: bool,
    pub reason: String,
    pub info: GlInfo,
    pub requirements: GlRequirements,
}

impl GlRequirements {
    pub fn with_api(mut self, api: GlApi) -> Self {
        self.api = api;
        self
    }

    pub fn with_minimum_version(mut self, major: i32, minor: i32) -> Self {
        self.min_major = major;
        self.min_minor = minor;
        self
    }

    pub fn with_minimum_shader_language_version(mut self, major: i32, minor: i32) -> Self {
        self.min_glsl_major = major;
        self.min_glsl_minor = minor;
        self
    }

    pub fn with_require_core_profile(mut self, required: bool) -> Self {
        self.require_core_profile = required;
        self
    }

    /// Queries the current context and evaluates this requirement set.
    pub fn check(self) -> GlProbeResult {
        match query_info() {
            Ok(info) => {
                let (success, reason) = match evaluate(&info, &self) {
                    Ok(()) => (true, String::new()),
                    Err(reason) => (false, reason),
                };
                GlProbeResult {
                    success,
                    reason,
                    info,
                    requirements: self,
                }
            }
            Err(reason) => GlProbeResult {
                success: false,
                reason,
                info: GlInfo::default(),
                requirements: self,
            },
        }
    }
}

/// Pure requirement evaluation against already-queried facts.
pub(crate) fn evaluate(info: &GlInfo, req: &GlRequirements) -> Result<(), String> {
    if req.api != GlApi::Any && info.api != req.api {
        return Err(format!("wrong API: {}", info.api.as_str()));
    }

    if !version_at_least(info.major, info.minor, req.min_major, req.min_minor) {
        return Err(format!("version too low: {}.{}", info.major, info.minor));
    }

    if req.min_glsl_major > 0 || req.min_glsl_minor > 0 {
        if info.glsl_str.is_empty() {
            return Err("no shading language version reported".to_string());
        }
        let is_gles = info.api == GlApi::OpenGlEs;
        let Some((glsl_major, glsl_minor)) = parse_version_string(&info.glsl_str, is_gles) else {
            return Err(format!(
                "unable to parse shading language version: {}",
                info.glsl_str
            ));
        };
        if !version_at_least(glsl_major, glsl_minor, req.min_glsl_major, req.min_glsl_minor) {
            return Err(format!(
                "shading language version too low: {glsl_major}.{glsl_minor}"
            ));
        }
    }

    if req.require_core_profile && info.api == GlApi::OpenGl && info.profile != "core" {
        return Err("core profile required".to_string());
    }

    Ok(())
}

/// Parses "major.minor" out of a GL version string, skipping vendor prefixes
/// such as "OpenGL ES 3.2 Mesa" or "OpenGL ES GLSL ES 3.00".
pub fn parse_version_string(s: &str, is_gles: bool) -> Option<(i32, i32)> {
    let mut rest = s;
    if is_gles {
        if let Some(pos) = rest.find("OpenGL ES") {
            rest = &rest[pos + "OpenGL ES".len()..];
        }
    }

    let start = rest.find(|c: char| c.is_ascii_digit())?;
    let rest = &rest[start..];

    let mut parts = rest.split(|c: char| !c.is_ascii_digit());
    let major: i32 = parts.next()?.parse().ok()?;
    let minor: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    if major <= 0 {
        return None;
    }
    Some((major, minor))
}

pub fn version_at_least(major: i32, minor: i32, req_major: i32, req_minor: i32) -> bool {
    if major != req_major {
        return major > req_major;
    }
    minor >= req_minor
}

/// WebGL reports "WebGL 2.0 ..." which parses as 2.0; for minimum-version
/// checks a WebGL 2 context maps to a GLES 3.0-class API surface.
pub(crate) fn lift_webgl_version(info: &mut GlInfo) {
    if info.version_str.contains("WebGL 2") && info.major < 3 {
        info.major = 3;
        info.minor = 0;
    }
}

fn sanitize(s: &str) -> String {
    s.replace(['\n', '\r', '\t'], " ")
}

struct ResolvedGlFunctions {
    get_string: GetStringFn,
    get_error: GetErrorFn,
    get_integerv: Option<GetIntegervFn>,
}

fn resolve_gl_functions() -> Result<ResolvedGlFunctions, String> {
    let resolver = GlResolver::instance();
    if !resolver.is_loaded() {
        return Err("GL entry points not configured and the resolver is not loaded".to_string());
    }

    let get_string = unsafe {
        symbol_to_function::<GetStringFn>(resolver.get_proc_address("glGetString"))
    };
    let get_error =
        unsafe { symbol_to_function::<GetErrorFn>(resolver.get_proc_address("glGetError")) };
    // Optional: GL_VERSION string parsing covers contexts without it.
    let get_integerv = unsafe {
        symbol_to_function::<GetIntegervFn>(resolver.get_proc_address("glGetIntegerv"))
    };

    match (get_string, get_error) {
        (Some(get_string), Some(get_error)) => Ok(ResolvedGlFunctions {
            get_string,
            get_error,
            get_integerv,
        }),
        _ => Err("GL entry points not available".to_string()),
    }
}

fn clear_gl_errors(gl: &ResolvedGlFunctions) {
    for _ in 0..32 {
        if unsafe { (gl.get_error)() } == GL_NO_ERROR {
            break;
        }
    }
}

fn get_string(gl: &ResolvedGlFunctions, name: u32) -> String {
    let ptr = unsafe { (gl.get_string)(name) };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn query_integer(gl: &ResolvedGlFunctions, name: u32) -> Option<i32> {
    let get_integerv = gl.get_integerv?;
    clear_gl_errors(gl);
    let mut value = 0i32;
    unsafe { get_integerv(name, &mut value) };
    if unsafe { (gl.get_error)() } != GL_NO_ERROR {
        return None;
    }
    Some(value)
}

fn profile_string(gl: &ResolvedGlFunctions) -> String {
    match query_integer(gl, GL_CONTEXT_PROFILE_MASK) {
        Some(mask) if mask & GL_CONTEXT_CORE_PROFILE_BIT != 0 => "core".to_string(),
        Some(mask) if mask & GL_CONTEXT_COMPATIBILITY_PROFILE_BIT != 0 => "compat".to_string(),
        Some(_) => "unknown".to_string(),
        None => "n/a".to_string(),
    }
}

fn flags_string(gl: &ResolvedGlFunctions) -> String {
    let Some(flags) = query_integer(gl, GL_CONTEXT_FLAGS) else {
        return "n/a".to_string();
    };

    let mut bits = Vec::new();
    if flags & GL_CONTEXT_FLAG_DEBUG_BIT != 0 {
        bits.push("debug");
    }
    if flags & GL_CONTEXT_FLAG_FORWARD_COMPATIBLE_BIT != 0 {
        bits.push("fwd");
    }
    if flags & GL_CONTEXT_FLAG_ROBUST_ACCESS_BIT != 0 {
        bits.push("robust");
    }
    if bits.is_empty() {
        return "none".to_string();
    }
    bits.join(",")
}

/// Queries the current context into a [`GlInfo`].
pub fn query_info() -> Result<GlInfo, String> {
    let gl = resolve_gl_functions()?;

    clear_gl_errors(&gl);

    let version = get_string(&gl, GL_VERSION);
    if version.is_empty() {
        return Err("no current GL context (glGetString(GL_VERSION) returned null/empty)".into());
    }

    let is_gles = version.contains("OpenGL ES") || version.contains("WebGL");

    let mut info = GlInfo {
        api: if is_gles { GlApi::OpenGlEs } else { GlApi::OpenGl },
        version_str: sanitize(&version),
        vendor: sanitize(&get_string(&gl, GL_VENDOR)),
        renderer: sanitize(&get_string(&gl, GL_RENDERER)),
        glsl_str: sanitize(&get_string(&gl, GL_SHADING_LANGUAGE_VERSION)),
        ..GlInfo::default()
    };

    let queried = match (
        query_integer(&gl, GL_MAJOR_VERSION),
        query_integer(&gl, GL_MINOR_VERSION),
    ) {
        (Some(major), Some(minor)) if major > 0 => {
            info.major = major;
            info.minor = minor;
            true
        }
        _ => false,
    };

    if !queried {
        let Some((major, minor)) = parse_version_string(&version, is_gles) else {
            return Err(format!(
                "unable to determine GL version from GL_VERSION=\"{}\"",
                sanitize(&version)
            ));
        };
        info.major = major;
        info.minor = minor;
    }

    lift_webgl_version(&mut info);

    info.profile = profile_string(&gl);
    info.flags = flags_string(&gl);

    Ok(info)
}

/// One-line summary for diagnostics.
pub fn format_compact_line(info: &GlInfo) -> String {
    let mut line = format!(
        "api=\"{}\" ver=\"{}.{}\" profile=\"{}\" flags=\"{}\"",
        info.api.as_str(),
        info.major,
        info.minor,
        info.profile,
        info.flags
    );
    if !info.glsl_str.is_empty() {
        line.push_str(&format!(" glsl=\"{}\"", info.glsl_str));
    }
    if !info.vendor.is_empty() {
        line.push_str(&format!(" vendor=\"{}\"", info.vendor));
    }
    if !info.renderer.is_empty() {
        line.push_str(&format!(" renderer=\"{}\"", info.renderer));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_version_strings_parse() {
        assert_eq!(parse_version_string("3.3.0 NVIDIA 545.29.06", false), Some((3, 3)));
        assert_eq!(parse_version_string("4.6 (Core Profile) Mesa 23.1", false), Some((4, 6)));
        assert_eq!(parse_version_string("", false), None);
        assert_eq!(parse_version_string("Mesa", false), None);
    }

    #[test]
    fn gles_version_strings_skip_the_prefix() {
        assert_eq!(parse_version_string("OpenGL ES 3.2 Mesa 23.1", true), Some((3, 2)));
        assert_eq!(
            parse_version_string("OpenGL ES GLSL ES 3.00 build 1.2", true),
            Some((3, 0))
        );
    }

    #[test]
    fn version_comparison_is_lexicographic() {
        assert!(version_at_least(3, 3, 3, 3));
        assert!(version_at_least(4, 0, 3, 3));
        assert!(version_at_least(4, 1, 4, 0));
        assert!(!version_at_least(3, 2, 3, 3));
        assert!(!version_at_least(2, 9, 3, 0));
    }

    #[test]
    fn webgl2_lifts_to_gles30_for_requirement_checks() {
        let mut info = GlInfo {
            version_str: "WebGL 2.0 (OpenGL ES 3.0 Chromium)".to_string(),
            major: 2,
            minor: 0,
            api: GlApi::OpenGlEs,
            ..GlInfo::default()
        };
        lift_webgl_version(&mut info);
        assert_eq!((info.major, info.minor), (3, 0));

        // A WebGL 1 string stays put.
        let mut info1 = GlInfo {
            version_str: "WebGL 1.0".to_string(),
            major: 1,
            minor: 0,
            ..GlInfo::default()
        };
        lift_webgl_version(&mut info1);
        assert_eq!((info1.major, info1.minor), (1, 0));
    }

    fn desktop_info(major: i32, minor: i32, glsl: &str, profile: &str) -> GlInfo {
        GlInfo {
            api: GlApi::OpenGl,
            major,
            minor,
            glsl_str: glsl.to_string(),
            profile: profile.to_string(),
            ..GlInfo::default()
        }
    }

    #[test]
    fn requirement_evaluation_accepts_matching_contexts() {
        let req = GlRequirements::default()
            .with_api(GlApi::OpenGl)
            .with_minimum_version(3, 3)
            .with_minimum_shader_language_version(3, 30);

        assert!(evaluate(&desktop_info(3, 3, "3.30", "core"), &req).is_ok());
        assert!(evaluate(&desktop_info(4, 6, "4.60 NVIDIA", "compat"), &req).is_ok());
    }

    #[test]
    fn requirement_evaluation_rejects_mismatches() {
        let req = GlRequirements::default()
            .with_api(GlApi::OpenGl)
            .with_minimum_version(3, 3)
            .with_minimum_shader_language_version(3, 30);

        let err = evaluate(&desktop_info(3, 1, "1.40", "compat"), &req).unwrap_err();
        assert!(err.contains("version too low"), "{err}");

        let mut gles = desktop_info(3, 3, "3.30", "core");
        gles.api = GlApi::OpenGlEs;
        let err = evaluate(&gles, &req).unwrap_err();
        assert!(err.contains("wrong API"), "{err}");

        let err = evaluate(&desktop_info(3, 3, "", "core"), &req).unwrap_err();
        assert!(err.contains("no shading language"), "{err}");
    }

    #[test]
    fn core_profile_requirement_only_applies_to_desktop_gl() {
        let req = GlRequirements::default()
            .with_api(GlApi::OpenGl)
            .with_minimum_version(3, 3)
            .with_require_core_profile(true);

        let err = evaluate(&desktop_info(3, 3, "", "compat"), &req).unwrap_err();
        assert!(err.contains("core profile"), "{err}");
        assert!(evaluate(&desktop_info(3, 3, "", "core"), &req).is_ok());
    }
}

//! Cross-platform GL proc-address resolver.
//!
//! One process-wide singleton. After the host makes a GL-family context
//! current, [`GlResolver::initialize`] probes which platform API owns it and
//! publishes an immutable snapshot of the chosen backend plus every provider
//! entry point. Each [`GlResolver::get_proc_address`] call re-probes the
//! current context cheaply, gates on the recorded backend, then walks a fixed
//! priority chain on the snapshot:
//!
//! 1. the user-supplied resolver, if configured;
//! 2. the backend provider entry point, constrained by per-backend policy
//!    (see [`crate::policy`]);
//! 3. the process-wide global symbol scope;
//! 4. explicit exports from the libraries the resolver itself opened;
//! 5. opt-in provider fallbacks for core names (off by default).

use std::ffi::{c_char, c_void, CString};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use tracing::{debug, error};

use crate::dynlib::{symbol_to_function, DynamicLibrary};
use crate::policy::{
    has_space_separated_token, is_invalid_wgl_proc_value, should_use_egl_get_proc_address,
    should_use_glx_get_proc_address,
};

/// Which platform API owns the current GL context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    None,
    Egl,
    Glx,
    Wgl,
    Cgl,
    WebGl,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::None => "none",
            Backend::Egl => "EGL",
            Backend::Glx => "GLX",
            Backend::Wgl => "WGL",
            Backend::Cgl => "CGL",
            Backend::WebGl => "WebGL",
        }
    }
}

/// Host-supplied primary resolver, consulted before anything else.
pub type UserResolver = Arc<dyn Fn(&str) -> *mut c_void + Send + Sync>;

// Provider entry points. `extern "system"` yields stdcall on 32-bit Windows
// (EGLAPIENTRY / WINAPI) and the C convention everywhere else.
type GetProcAddressByNameFn = unsafe extern "system" fn(*const c_char) -> *mut c_void;
type GetCurrentContextFn = unsafe extern "system" fn() -> *mut c_void;
type GlxGetProcAddressFn = unsafe extern "C" fn(*const u8) -> *mut c_void;
type EglQueryStringFn = unsafe extern "system" fn(*mut c_void, i32) -> *const c_char;
type EglGetErrorFn = unsafe extern "system" fn() -> i32;

const EGL_EXTENSIONS: i32 = 0x3055;
const EGL_SUCCESS: i32 = 0x3000;
const EGL_BAD_DISPLAY: i32 = 0x3008;

/// Result of probing which context APIs are live on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentContextProbe {
    pub egl_available: bool,
    pub egl_current: bool,
    pub glx_available: bool,
    pub glx_current: bool,
    pub wgl_available: bool,
    pub wgl_current: bool,
    pub cgl_available: bool,
    pub cgl_current: bool,
    pub webgl_available: bool,
    pub webgl_current: bool,
}

/// Immutable snapshot published once initialization succeeds.
pub struct ResolverState {
    backend: Backend,
    user_resolver: Option<UserResolver>,

    egl_lib: Option<DynamicLibrary>,
    gl_lib: Option<DynamicLibrary>,
    glx_lib: Option<DynamicLibrary>,

    egl_get_proc_address: Option<GetProcAddressByNameFn>,
    egl_get_current_context: Option<GetCurrentContextFn>,
    /// EGL_KHR_get_all_proc_addresses or the client variant is advertised, so
    /// eglGetProcAddress may be used for core entry points too.
    egl_all_proc_addresses: bool,

    glx_get_proc_address: Option<GlxGetProcAddressFn>,
    glx_get_current_context: Option<GetCurrentContextFn>,

    wgl_get_proc_address: Option<GetProcAddressByNameFn>,
    wgl_get_current_context: Option<GetCurrentContextFn>,

    cgl_get_current_context: Option<GetCurrentContextFn>,
}

impl Default for ResolverState {
    fn default() -> Self {
        Self {
            backend: Backend::None,
            user_resolver: None,
            egl_lib: None,
            gl_lib: None,
            glx_lib: None,
            egl_get_proc_address: None,
            egl_get_current_context: None,
            egl_all_proc_addresses: false,
            glx_get_proc_address: None,
            glx_get_current_context: None,
            wgl_get_proc_address: None,
            wgl_get_current_context: None,
            cgl_get_current_context: None,
        }
    }
}

impl std::fmt::Debug for ResolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverState")
            .field("backend", &self.backend)
            .field("user_resolver", &self.user_resolver.is_some())
            .field("egl_all_proc_addresses", &self.egl_all_proc_addresses)
            .finish()
    }
}

impl ResolverState {
    pub fn backend(&self) -> Backend {
        self.backend
    }
}

// ---------------------------------------------------------------------------
// Platform library candidate lists (ordered).
// ---------------------------------------------------------------------------

#[cfg(windows)]
const EGL_CANDIDATES: &[&str] = &["libEGL.dll", "EGL.dll"];
#[cfg(target_os = "macos")]
const EGL_CANDIDATES: &[&str] = &[
    // ANGLE and other portability layers usually ship bundled dylibs.
    "@rpath/libEGL.dylib",
    "@rpath/libEGL.1.dylib",
    "libEGL.dylib",
    "libEGL.1.dylib",
    "EGL",
];
#[cfg(target_os = "android")]
const EGL_CANDIDATES: &[&str] = &["libEGL.so"];
#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(target_os = "android"),
    not(target_os = "emscripten")
))]
const EGL_CANDIDATES: &[&str] = &["libEGL.so.1", "libEGL.so"];
#[cfg(target_os = "emscripten")]
const EGL_CANDIDATES: &[&str] = &[];

#[cfg(all(windows, not(feature = "gles")))]
const GL_CANDIDATES: &[&str] = &["opengl32.dll"];
#[cfg(all(windows, feature = "gles"))]
const GL_CANDIDATES: &[&str] = &["libGLESv3.dll", "GLESv3.dll", "libGLESv2.dll", "GLESv2.dll"];

#[cfg(all(target_os = "macos", not(feature = "gles")))]
const GL_CANDIDATES: &[&str] = &["/System/Library/Frameworks/OpenGL.framework/OpenGL"];
#[cfg(all(target_os = "macos", feature = "gles"))]
const GL_CANDIDATES: &[&str] = &[
    "@rpath/libGLESv3.dylib",
    "@rpath/libGLESv2.dylib",
    "libGLESv3.dylib",
    "libGLESv2.dylib",
];

#[cfg(target_os = "android")]
const GL_CANDIDATES: &[&str] = &["libGLESv3.so", "libGLESv2.so"];

#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(target_os = "android"),
    not(target_os = "emscripten"),
    not(feature = "gles")
))]
const GL_CANDIDATES: &[&str] = &[
    "libGL.so.1",
    "libGL.so.0",
    "libOpenGL.so.1", // GLVND OpenGL dispatcher
    "libOpenGL.so.0",
    "libGL.so",
];
#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(target_os = "android"),
    not(target_os = "emscripten"),
    feature = "gles"
))]
const GL_CANDIDATES: &[&str] = &[
    "libGLESv3.so.3",
    "libGLESv3.so",
    "libGLESv2.so.2",
    "libGLESv2.so.1",
    "libGLESv2.so",
];
#[cfg(target_os = "emscripten")]
const GL_CANDIDATES: &[&str] = &[];

/// GLVND splits GLX dispatch out of libGL; prefer the dedicated dispatcher.
#[cfg(all(
    unix,
    not(target_os = "macos"),
    not(target_os = "android"),
    not(target_os = "emscripten")
))]
const GLX_CANDIDATES: &[&str] = &["libGLX.so.1", "libGLX.so.0"];

// ---------------------------------------------------------------------------
// Singleton
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    loaded: bool,
    initializing: bool,
    state: Option<Arc<ResolverState>>,
}

/// The process-wide resolver singleton.
pub struct GlResolver {
    mutex: Mutex<Inner>,
    init_cv: Condvar,
}

impl GlResolver {
    pub fn instance() -> &'static GlResolver {
        static INSTANCE: OnceLock<GlResolver> = OnceLock::new();
        INSTANCE.get_or_init(|| GlResolver {
            mutex: Mutex::new(Inner::default()),
            init_cv: Condvar::new(),
        })
    }

    /// One-time initialization. Idempotent and thread-safe: parallel callers
    /// block until the first one publishes, then observe its result. Returns
    /// false when no current context is detectable; nothing is published in
    /// that case and a later call may retry.
    pub fn initialize(&self, user_resolver: Option<UserResolver>) -> bool {
        let mut lock = self.mutex.lock().unwrap();
        if lock.loaded {
            return true;
        }
        while lock.initializing {
            lock = self.init_cv.wait(lock).unwrap();
        }
        if lock.loaded {
            return true;
        }
        lock.initializing = true;
        drop(lock);

        let mut state = ResolverState {
            user_resolver,
            ..ResolverState::default()
        };

        open_native_libraries(&mut state);
        resolve_provider_functions(&mut state);

        let probe = probe_current_context(&state);
        debug!(
            egl_current = probe.egl_current,
            glx_current = probe.glx_current,
            wgl_current = probe.wgl_current,
            cgl_current = probe.cgl_current,
            webgl_current = probe.webgl_current,
            "current-context probe"
        );

        if !has_current_context(&probe) {
            let mut lock = self.mutex.lock().unwrap();
            lock.initializing = false;
            self.init_cv.notify_all();
            drop(lock);
            error!(
                reason = %no_context_reason(&probe),
                "no current GL context present"
            );
            return false;
        }

        state.backend = detect_backend(&state, &probe);

        debug!(
            backend = state.backend.as_str(),
            egl = state
                .egl_lib
                .as_ref()
                .map(|l| l.loaded_name())
                .unwrap_or(""),
            gl = state.gl_lib.as_ref().map(|l| l.loaded_name()).unwrap_or(""),
            glx = state
                .glx_lib
                .as_ref()
                .map(|l| l.loaded_name())
                .unwrap_or(""),
            egl_get_proc = state.egl_get_proc_address.is_some(),
            egl_all_proc = state.egl_all_proc_addresses,
            user_resolver = state.user_resolver.is_some(),
            "resolver policy"
        );

        if state.backend == Backend::None {
            let mut lock = self.mutex.lock().unwrap();
            lock.initializing = false;
            self.init_cv.notify_all();
            drop(lock);
            error!("failed to detect an active GL backend for the current context");
            return false;
        }

        let mut lock = self.mutex.lock().unwrap();
        lock.state = Some(Arc::new(state));
        lock.initializing = false;
        lock.loaded = true;
        self.init_cv.notify_all();
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.mutex.lock().unwrap().loaded
    }

    pub fn current_backend(&self) -> Backend {
        self.mutex
            .lock()
            .unwrap()
            .state
            .as_ref()
            .map(|s| s.backend)
            .unwrap_or(Backend::None)
    }

    pub fn has_user_resolver(&self) -> bool {
        self.mutex
            .lock()
            .unwrap()
            .state
            .as_ref()
            .map(|s| s.user_resolver.is_some())
            .unwrap_or(false)
    }

    /// Resolves a GL entry point through the priority chain.
    ///
    /// The internal mutex is only held to snapshot the state; driver code and
    /// the user callback run lock-free on the snapshot.
    pub fn get_proc_address(&self, name: &str) -> *mut c_void {
        let state = {
            let mut lock = self.mutex.lock().unwrap();
            while lock.initializing {
                debug!("get_proc_address called while initialization is in flight; waiting");
                lock = self.init_cv.wait(lock).unwrap();
            }
            if !lock.loaded {
                error!("get_proc_address called without initialization");
                return std::ptr::null_mut();
            }
            match &lock.state {
                Some(state) => Arc::clone(state),
                None => return std::ptr::null_mut(),
            }
        };

        // Gate on the recorded backend still being current.
        let probe = probe_current_context(&state);
        if !verify_backend_is_current(state.backend, &probe) {
            if !cfg!(feature = "relaxed-context-gate") {
                error!(
                    backend = state.backend.as_str(),
                    "context for detected backend is not current"
                );
                return std::ptr::null_mut();
            }
            debug!(
                backend = state.backend.as_str(),
                "strict context gate disabled; continuing despite backend mismatch"
            );
        }

        resolve_proc_address(&state, name)
    }
}

// ---------------------------------------------------------------------------
// Library + provider setup
// ---------------------------------------------------------------------------

fn open_optional(names: &[&str], what: &str) -> Option<DynamicLibrary> {
    if names.is_empty() {
        return None;
    }
    match DynamicLibrary::open(names) {
        Ok(lib) => Some(lib),
        Err(e) => {
            debug!("failed to open {what} library: {e}");
            None
        }
    }
}

fn open_native_libraries(state: &mut ResolverState) {
    #[cfg(all(
        unix,
        not(target_os = "macos"),
        not(target_os = "android"),
        not(target_os = "emscripten")
    ))]
    {
        state.glx_lib = open_optional(GLX_CANDIDATES, "GLX");
    }

    state.egl_lib = open_optional(EGL_CANDIDATES, "EGL");
    state.gl_lib = open_optional(GL_CANDIDATES, "GL");
}

fn lib_or_global_symbol(lib: Option<&DynamicLibrary>, name: &str) -> *mut c_void {
    if let Some(lib) = lib {
        let sym = lib.symbol(name);
        if !sym.is_null() {
            return sym;
        }
    }
    DynamicLibrary::find_global_symbol(name)
}

fn resolve_provider_functions(state: &mut ResolverState) {
    // EGL: canonical for extensions; core entry points only when the
    // all-proc-addresses extension is advertised (detected below).
    let sym = lib_or_global_symbol(state.egl_lib.as_ref(), "eglGetProcAddress");
    state.egl_get_proc_address = unsafe { symbol_to_function::<GetProcAddressByNameFn>(sym) };
    if state.egl_get_proc_address.is_none() && state.egl_lib.is_some() {
        debug!("eglGetProcAddress not found (EGL loaded but missing symbol)");
    }

    let sym = lib_or_global_symbol(state.egl_lib.as_ref(), "eglGetCurrentContext");
    state.egl_get_current_context = unsafe { symbol_to_function::<GetCurrentContextFn>(sym) };

    detect_egl_all_proc_addresses(state);

    #[cfg(windows)]
    {
        let sym = lib_or_global_symbol(state.gl_lib.as_ref(), "wglGetProcAddress");
        state.wgl_get_proc_address = unsafe { symbol_to_function::<GetProcAddressByNameFn>(sym) };

        let sym = lib_or_global_symbol(state.gl_lib.as_ref(), "wglGetCurrentContext");
        state.wgl_get_current_context = unsafe { symbol_to_function::<GetCurrentContextFn>(sym) };
    }

    #[cfg(target_os = "macos")]
    {
        let sym = lib_or_global_symbol(state.gl_lib.as_ref(), "CGLGetCurrentContext");
        state.cgl_get_current_context = unsafe { symbol_to_function::<GetCurrentContextFn>(sym) };
    }

    #[cfg(all(
        unix,
        not(target_os = "macos"),
        not(target_os = "android"),
        not(target_os = "emscripten")
    ))]
    {
        let mut sym = std::ptr::null_mut();
        for lib in [state.glx_lib.as_ref(), state.gl_lib.as_ref()]
            .into_iter()
            .flatten()
        {
            sym = lib.symbol("glXGetProcAddressARB");
            if sym.is_null() {
                sym = lib.symbol("glXGetProcAddress");
            }
            if !sym.is_null() {
                break;
            }
        }
        if sym.is_null() {
            sym = DynamicLibrary::find_global_symbol("glXGetProcAddressARB");
            if sym.is_null() {
                sym = DynamicLibrary::find_global_symbol("glXGetProcAddress");
            }
        }
        state.glx_get_proc_address = unsafe { symbol_to_function::<GlxGetProcAddressFn>(sym) };

        let mut sym = std::ptr::null_mut();
        for lib in [state.glx_lib.as_ref(), state.gl_lib.as_ref()]
            .into_iter()
            .flatten()
        {
            sym = lib.symbol("glXGetCurrentContext");
            if !sym.is_null() {
                break;
            }
        }
        if sym.is_null() {
            // GLVND hosts often already have GLX linked into the process.
            sym = DynamicLibrary::find_global_symbol("glXGetCurrentContext");
        }
        state.glx_get_current_context = unsafe { symbol_to_function::<GetCurrentContextFn>(sym) };
    }
}

/// Detects EGL_KHR_get_all_proc_addresses / EGL_KHR_client_get_all_proc_addresses.
///
/// The client extension is queried at EGL_NO_DISPLAY (requires
/// EGL_EXT_client_extensions), the display extension at the current display.
fn detect_egl_all_proc_addresses(state: &mut ResolverState) {
    state.egl_all_proc_addresses = false;

    let sym = lib_or_global_symbol(state.egl_lib.as_ref(), "eglQueryString");
    let Some(query_string) = (unsafe { symbol_to_function::<EglQueryStringFn>(sym) }) else {
        return;
    };

    let client_ext = unsafe { query_string(std::ptr::null_mut(), EGL_EXTENSIONS) };
    if !client_ext.is_null() {
        let list = unsafe { std::ffi::CStr::from_ptr(client_ext) }.to_string_lossy();
        if has_space_separated_token(&list, "EGL_KHR_client_get_all_proc_addresses") {
            state.egl_all_proc_addresses = true;
        }
    } else {
        // Expected failure when EGL_EXT_client_extensions is unsupported;
        // drain eglGetError for deterministic logs.
        let sym = lib_or_global_symbol(state.egl_lib.as_ref(), "eglGetError");
        if let Some(get_error) = unsafe { symbol_to_function::<EglGetErrorFn>(sym) } {
            let err = unsafe { get_error() };
            if err != EGL_SUCCESS && err != EGL_BAD_DISPLAY {
                debug!("eglQueryString(EGL_NO_DISPLAY, EGL_EXTENSIONS) failed with 0x{err:x}");
            }
        }
    }

    let sym = lib_or_global_symbol(state.egl_lib.as_ref(), "eglGetCurrentDisplay");
    if let Some(get_display) = unsafe { symbol_to_function::<GetCurrentContextFn>(sym) } {
        let display = unsafe { get_display() };
        if !display.is_null() {
            let display_ext = unsafe { query_string(display, EGL_EXTENSIONS) };
            if !display_ext.is_null() {
                let list = unsafe { std::ffi::CStr::from_ptr(display_ext) }.to_string_lossy();
                if has_space_separated_token(&list, "EGL_KHR_get_all_proc_addresses") {
                    state.egl_all_proc_addresses = true;
                }
            }
        }
    }

    debug!(
        all_proc_addresses = state.egl_all_proc_addresses,
        "EGL proc-address policy"
    );
}

// ---------------------------------------------------------------------------
// Current-context probing and backend detection
// ---------------------------------------------------------------------------

#[cfg(target_os = "emscripten")]
extern "C" {
    fn emscripten_webgl_get_current_context() -> isize;
    fn emscripten_webgl_get_proc_address(name: *const c_char) -> *mut c_void;
    fn emscripten_webgl2_get_proc_address(name: *const c_char) -> *mut c_void;
}

#[cfg_attr(target_os = "emscripten", allow(unreachable_code))]
fn probe_current_context(state: &ResolverState) -> CurrentContextProbe {
    let mut probe = CurrentContextProbe::default();

    #[cfg(target_os = "emscripten")]
    {
        probe.webgl_available = true;
        probe.webgl_current = unsafe { emscripten_webgl_get_current_context() } != 0;
        return probe;
    }

    if let Some(get_current) = state.egl_get_current_context {
        probe.egl_available = true;
        probe.egl_current = !unsafe { get_current() }.is_null();
    }
    if let Some(get_current) = state.glx_get_current_context {
        probe.glx_available = true;
        probe.glx_current = !unsafe { get_current() }.is_null();
    }
    if let Some(get_current) = state.wgl_get_current_context {
        probe.wgl_available = true;
        probe.wgl_current = !unsafe { get_current() }.is_null();
    }
    if let Some(get_current) = state.cgl_get_current_context {
        probe.cgl_available = true;
        probe.cgl_current = !unsafe { get_current() }.is_null();
    }
    probe
}

fn has_current_context(probe: &CurrentContextProbe) -> bool {
    probe.egl_current
        || probe.glx_current
        || probe.wgl_current
        || probe.cgl_current
        || probe.webgl_current
}

fn no_context_reason(probe: &CurrentContextProbe) -> String {
    let mut parts = Vec::new();
    for (available, what) in [
        (probe.egl_available, "EGL"),
        (probe.glx_available, "GLX"),
        (probe.wgl_available, "WGL"),
        (probe.cgl_available, "CGL"),
        (probe.webgl_available, "WebGL"),
    ] {
        if available {
            parts.push(format!("{what}: no current context"));
        }
    }
    if parts.is_empty() {
        return "no platform current-context query available (libraries not loaded?)".to_string();
    }
    parts.join("; ")
}

/// Tie-break policy when multiple context APIs appear current.
pub(crate) fn detect_backend(state: &ResolverState, probe: &CurrentContextProbe) -> Backend {
    if probe.webgl_current {
        return Backend::WebGl;
    }

    // macOS can host both native CGL and EGL (ANGLE) contexts. CGL wins when
    // it is current and EGL cannot serve proc addresses anyway; the
    // prefer-egl-on-macos feature disables the early preference entirely.
    if cfg!(target_os = "macos")
        && !cfg!(feature = "prefer-egl-on-macos")
        && probe.cgl_current
        && (state.egl_get_proc_address.is_none() || !probe.egl_current)
    {
        return Backend::Cgl;
    }

    if probe.egl_current {
        return Backend::Egl;
    }
    if probe.wgl_current {
        return Backend::Wgl;
    }
    if probe.cgl_current {
        return Backend::Cgl;
    }
    if probe.glx_current {
        return Backend::Glx;
    }
    Backend::None
}

pub(crate) fn verify_backend_is_current(backend: Backend, probe: &CurrentContextProbe) -> bool {
    match backend {
        Backend::Egl => probe.egl_current,
        Backend::Glx => probe.glx_current,
        Backend::Wgl => probe.wgl_current,
        Backend::Cgl => probe.cgl_current,
        Backend::WebGl => probe.webgl_current,
        Backend::None => false,
    }
}

// ---------------------------------------------------------------------------
// The lookup chain
// ---------------------------------------------------------------------------

#[cfg_attr(target_os = "emscripten", allow(unreachable_code))]
fn resolve_proc_address(state: &ResolverState, name: &str) -> *mut c_void {
    // 1) User resolver always wins.
    if let Some(user) = &state.user_resolver {
        let ptr = user(name);
        if !ptr.is_null() {
            return ptr;
        }
    }

    let cname = match CString::new(name) {
        Ok(c) => c,
        Err(_) => return std::ptr::null_mut(),
    };

    #[cfg(target_os = "emscripten")]
    {
        // WebGL 2 first; fall through to the WebGL 1 query.
        let ptr = unsafe { emscripten_webgl2_get_proc_address(cname.as_ptr()) };
        if !ptr.is_null() {
            return ptr;
        }
        return unsafe { emscripten_webgl_get_proc_address(cname.as_ptr()) };
    }

    // 2) Backend provider entry point, per policy.
    if matches!(state.backend, Backend::Egl | Backend::None) {
        if let Some(egl_get_proc) = state.egl_get_proc_address {
            if state.egl_all_proc_addresses || should_use_egl_get_proc_address(name) {
                let ptr = unsafe { egl_get_proc(cname.as_ptr()) };
                if !ptr.is_null() {
                    return ptr;
                }
            }
        }
    }

    if matches!(state.backend, Backend::Glx | Backend::None) {
        if let Some(glx_get_proc) = state.glx_get_proc_address {
            // Core symbols come from direct exports; the provider is only
            // trusted for GLX/extension names (some implementations return
            // non-null for unknown symbols).
            if should_use_glx_get_proc_address(name) {
                let ptr = unsafe { glx_get_proc(cname.as_ptr().cast()) };
                if !ptr.is_null() {
                    return ptr;
                }
            }
        }
    }

    if matches!(state.backend, Backend::Wgl | Backend::None) {
        if let Some(wgl_get_proc) = state.wgl_get_proc_address {
            let ptr = unsafe { wgl_get_proc(cname.as_ptr()) };
            if !is_invalid_wgl_proc_value(ptr as usize) {
                // Prefer opengl32 exports for core OpenGL 1.1 entry points;
                // wglGetProcAddress has been seen returning non-callable
                // pointers for some of them.
                let export = DynamicLibrary::find_global_symbol(name);
                if !export.is_null() {
                    return export;
                }
                return ptr;
            }
        }
    }

    // 3) Process-wide global symbol scope.
    let global = DynamicLibrary::find_global_symbol(name);
    if !global.is_null() {
        return global;
    }

    // 4) Explicit exports from the libraries we opened ourselves.
    for lib in [
        state.egl_lib.as_ref(),
        state.gl_lib.as_ref(),
        state.glx_lib.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        let ptr = lib.symbol(name);
        if !ptr.is_null() {
            return ptr;
        }
    }

    // 5) Opt-in provider fallbacks for non-extension names.
    #[cfg(feature = "glx-core-fallback")]
    if matches!(state.backend, Backend::Glx | Backend::None) {
        if let Some(glx_get_proc) = state.glx_get_proc_address {
            if !should_use_glx_get_proc_address(name) {
                let ptr = unsafe { glx_get_proc(cname.as_ptr().cast()) };
                if !ptr.is_null() {
                    return ptr;
                }
            }
        }
    }

    #[cfg(feature = "egl-core-fallback")]
    if matches!(state.backend, Backend::Egl | Backend::None) {
        if let Some(egl_get_proc) = state.egl_get_proc_address {
            if !state.egl_all_proc_addresses && !should_use_egl_get_proc_address(name) {
                let ptr = unsafe { egl_get_proc(cname.as_ptr()) };
                if !ptr.is_null() {
                    return ptr;
                }
            }
        }
    }

    std::ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with(f: impl FnOnce(&mut CurrentContextProbe)) -> CurrentContextProbe {
        let mut probe = CurrentContextProbe::default();
        f(&mut probe);
        probe
    }

    #[test]
    fn backend_detection_prefers_egl() {
        let state = ResolverState::default();
        let probe = probe_with(|p| {
            p.egl_current = true;
            p.glx_current = true;
        });
        assert_eq!(detect_backend(&state, &probe), Backend::Egl);
    }

    #[test]
    fn backend_detection_falls_back_in_priority_order() {
        let state = ResolverState::default();

        let probe = probe_with(|p| p.glx_current = true);
        assert_eq!(detect_backend(&state, &probe), Backend::Glx);

        let probe = probe_with(|p| p.wgl_current = true);
        assert_eq!(detect_backend(&state, &probe), Backend::Wgl);

        let probe = probe_with(|p| p.webgl_current = true);
        assert_eq!(detect_backend(&state, &probe), Backend::WebGl);

        assert_eq!(
            detect_backend(&state, &CurrentContextProbe::default()),
            Backend::None
        );
    }

    #[test]
    fn backend_gate_requires_matching_current_context() {
        let probe = probe_with(|p| p.egl_current = true);
        assert!(verify_backend_is_current(Backend::Egl, &probe));
        assert!(!verify_backend_is_current(Backend::Glx, &probe));
        assert!(!verify_backend_is_current(Backend::None, &probe));
    }

    #[test]
    fn user_resolver_is_consulted_first() {
        const MARKER: usize = 0xBEEF;
        let state = ResolverState {
            user_resolver: Some(Arc::new(|name: &str| {
                if name == "glCustomEntryPoint" {
                    MARKER as *mut c_void
                } else {
                    std::ptr::null_mut()
                }
            })),
            ..ResolverState::default()
        };

        assert_eq!(
            resolve_proc_address(&state, "glCustomEntryPoint") as usize,
            MARKER
        );
    }

    #[test]
    fn unknown_names_resolve_to_null() {
        let state = ResolverState::default();
        assert!(resolve_proc_address(&state, "glKaleidDefinitelyNotAnEntryPoint").is_null());
    }

    #[test]
    fn no_context_reason_names_available_apis() {
        let probe = probe_with(|p| {
            p.egl_available = true;
            p.glx_available = true;
        });
        let reason = no_context_reason(&probe);
        assert!(reason.contains("EGL"), "{reason}");
        assert!(reason.contains("GLX"), "{reason}");
    }
}

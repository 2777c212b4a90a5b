//! Driver-side parallel shader compilation probe.
//!
//! Detects `GL_KHR_parallel_shader_compile` (or the ARB variant, or core
//! 4.6), requests the implementation-maximum compiler thread count, and
//! exposes the `COMPLETION_STATUS` polling queries the async shader path
//! needs. When unavailable, shader compilation falls back to the one-frame
//! deferred synchronous path.

use std::sync::{Mutex, OnceLock};

use glow::HasContext;
use tracing::{debug, info};

use crate::dynlib::symbol_to_function;
use crate::resolver::GlResolver;

/// GL_COMPLETION_STATUS_KHR (same value as the ARB alias).
pub const GL_COMPLETION_STATUS: u32 = 0x91B1;

const GL_TRUE: i32 = 1;

type MaxShaderCompilerThreadsFn = unsafe extern "system" fn(u32);
type GetObjectIvFn = unsafe extern "system" fn(u32, u32, *mut i32);

#[derive(Default)]
struct Inner {
    probed: bool,
    available: bool,
    get_shader_iv: Option<GetObjectIvFn>,
    get_program_iv: Option<GetObjectIvFn>,
}

pub struct ParallelShaderProbe {
    inner: Mutex<Inner>,
}

impl ParallelShaderProbe {
    pub fn instance() -> &'static ParallelShaderProbe {
        static INSTANCE: OnceLock<ParallelShaderProbe> = OnceLock::new();
        INSTANCE.get_or_init(|| ParallelShaderProbe {
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Probes once per process; later calls are no-ops.
    pub fn probe(&self, gl: &glow::Context) {
        let mut inner = self.inner.lock().unwrap();
        if inner.probed {
            return;
        }
        inner.probed = true;

        if cfg!(target_os = "emscripten") {
            // Browsers advertise the extension through ANGLE, but the GL
            // wrapper does not reliably flip COMPLETION_STATUS, which would
            // make the preset switch state machine spin forever. The
            // deferred synchronous fallback already gives the browser's
            // background compiler one frame to work.
            info!("parallel shader compile disabled on this target (COMPLETION_STATUS polling unreliable)");
            return;
        }

        let extensions = gl.supported_extensions();
        let has_khr = extensions.contains("GL_KHR_parallel_shader_compile");
        let has_arb = extensions.contains("GL_ARB_parallel_shader_compile");

        let version = gl.version();
        let core_46 = !version.is_embedded && (version.major, version.minor) >= (4, 6);

        if !has_khr && !has_arb && !core_46 {
            info!(
                major = version.major,
                minor = version.minor,
                "parallel shader compile not available"
            );
            return;
        }

        let resolver = GlResolver::instance();

        // The async path needs raw object-parameter queries for the
        // COMPLETION_STATUS poll; glow does not surface them.
        inner.get_shader_iv = unsafe {
            symbol_to_function::<GetObjectIvFn>(resolver.get_proc_address("glGetShaderiv"))
        };
        inner.get_program_iv = unsafe {
            symbol_to_function::<GetObjectIvFn>(resolver.get_proc_address("glGetProgramiv"))
        };
        if inner.get_shader_iv.is_none() || inner.get_program_iv.is_none() {
            debug!("could not resolve glGetShaderiv/glGetProgramiv; disabling parallel compile");
            inner.get_shader_iv = None;
            inner.get_program_iv = None;
            return;
        }

        // Core (4.6) name first, then the extension variants.
        let mut resolved_name = None;
        let mut max_threads = None;
        for name in [
            "glMaxShaderCompilerThreads",
            "glMaxShaderCompilerThreadsKHR",
            "glMaxShaderCompilerThreadsARB",
        ] {
            max_threads = unsafe {
                symbol_to_function::<MaxShaderCompilerThreadsFn>(resolver.get_proc_address(name))
            };
            if max_threads.is_some() {
                resolved_name = Some(name);
                break;
            }
        }

        let Some(max_threads) = max_threads else {
            // Extension advertised but the setter is missing. The
            // COMPLETION_STATUS queries may still work; some drivers enable
            // parallelism by default when the extension is present.
            inner.available = true;
            info!("parallel shader compile enabled (no thread-count setter; relying on driver default)");
            return;
        };

        // 0xFFFFFFFF means "use the implementation maximum".
        unsafe { max_threads(0xFFFF_FFFF) };

        // Some drivers accept the extension string but error on the call.
        let err = unsafe { gl.get_error() };
        if err != glow::NO_ERROR {
            debug!(
                entry_point = resolved_name.unwrap_or("?"),
                gl_error = %format!("{err:#06x}"),
                "thread-count setter produced a GL error; disabling parallel compile"
            );
            inner.get_shader_iv = None;
            inner.get_program_iv = None;
            return;
        }

        inner.available = true;
        info!(
            entry_point = resolved_name.unwrap_or("?"),
            khr = has_khr,
            arb = has_arb,
            core46 = core_46,
            "parallel shader compile enabled"
        );
    }

    pub fn is_available(&self) -> bool {
        self.inner.lock().unwrap().available
    }

    /// Polls COMPLETION_STATUS on a shader object without blocking.
    ///
    /// Returns true when compilation has finished (successfully or not), or
    /// when the query is unavailable (so callers never spin on a poll that
    /// can't progress).
    pub fn shader_completion_status(&self, gl: &glow::Context, shader: glow::NativeShader) -> bool {
        let _ = gl; // Caller guarantees a current context.
        let query = self.inner.lock().unwrap().get_shader_iv;
        let Some(get_shader_iv) = query else {
            return true;
        };
        let mut done = 0i32;
        unsafe { get_shader_iv(shader.0.get(), GL_COMPLETION_STATUS, &mut done) };
        done == GL_TRUE
    }

    /// Polls COMPLETION_STATUS on a program's link without blocking.
    pub fn program_completion_status(
        &self,
        gl: &glow::Context,
        program: glow::NativeProgram,
    ) -> bool {
        let _ = gl;
        let query = self.inner.lock().unwrap().get_program_iv;
        let Some(get_program_iv) = query else {
            return true;
        };
        let mut done = 0i32;
        unsafe { get_program_iv(program.0.get(), GL_COMPLETION_STATUS, &mut done) };
        done == GL_TRUE
    }
}

//! Process-wide GL function table.
//!
//! The loader asserts the engine's minimum GL/GLSL requirements against the
//! current context, then builds one [`glow::Context`] with the resolver as
//! the sole name-lookup source. After a successful load the table is stable
//! for process lifetime.

use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, error, info};

use kaleid_core::EngineError;

use crate::probe::{format_compact_line, GlApi, GlInfo, GlRequirements};
use crate::resolver::GlResolver;

pub struct GlLoader {
    context: Mutex<Option<Arc<glow::Context>>>,
}

// glow::Context is not Send/Sync because of an unused debug-callback raw
// pointer slot; this loader never installs a debug callback and only ever
// exposes the context through the Mutex above.
unsafe impl Send for GlLoader {}
unsafe impl Sync for GlLoader {}

impl GlLoader {
    pub fn instance() -> &'static GlLoader {
        static INSTANCE: OnceLock<GlLoader> = OnceLock::new();
        INSTANCE.get_or_init(|| GlLoader {
            context: Mutex::new(None),
        })
    }

    /// This engine's context requirements: desktop GL 3.3 / GLSL 3.30, or
    /// GLES 3.0 / ESSL 3.00 with the `gles` feature. A 3.3+ compatibility
    /// context is a valid configuration on many stacks, so the core profile
    /// is not required.
    pub fn requirements() -> GlRequirements {
        if cfg!(feature = "gles") {
            GlRequirements::default()
                .with_api(GlApi::OpenGlEs)
                .with_minimum_version(3, 0)
                .with_minimum_shader_language_version(3, 0)
                .with_require_core_profile(false)
        } else {
            GlRequirements::default()
                .with_api(GlApi::OpenGl)
                .with_minimum_version(3, 3)
                .with_minimum_shader_language_version(3, 30)
                .with_require_core_profile(false)
        }
    }

    /// Validates the current context against [`GlLoader::requirements`].
    pub fn check_requirements() -> Result<GlInfo, EngineError> {
        if cfg!(target_os = "emscripten") {
            // The browser guarantees the WebGL 2 surface the build targets.
            return Ok(GlInfo::default());
        }

        let result = Self::requirements().check();

        info!(
            gl = %format_compact_line(&result.info),
            backend = GlResolver::instance().current_backend().as_str(),
            user_resolver = GlResolver::instance().has_user_resolver(),
            "GL info"
        );

        if !result.success {
            error!(reason = %result.reason, "GL requirements check failed");
            return Err(EngineError::GlContext(result.reason));
        }
        Ok(result.info)
    }

    /// Returns the process-wide GL function table, building it on first call.
    ///
    /// Requires a successfully initialized [`GlResolver`] and a current
    /// context matching [`GlLoader::requirements`].
    pub fn load(&self) -> Result<Arc<glow::Context>, EngineError> {
        let mut slot = self.context.lock().unwrap();
        if let Some(gl) = slot.as_ref() {
            return Ok(Arc::clone(gl));
        }

        if !GlResolver::instance().is_loaded() {
            error!("cannot load GL function table: resolver is not initialized");
            return Err(EngineError::GlContext(
                "GL resolver is not initialized".to_string(),
            ));
        }

        Self::check_requirements()?;

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                GlResolver::instance().get_proc_address(name).cast_const()
            })
        };

        debug!("GL function table loaded");
        let gl = Arc::new(gl);
        *slot = Some(Arc::clone(&gl));
        Ok(gl)
    }

    /// The loaded table, if [`GlLoader::load`] has succeeded.
    pub fn context(&self) -> Option<Arc<glow::Context>> {
        self.context.lock().unwrap().clone()
    }
}

//! Shader program wrapper.
//!
//! Two compile modes: the blocking [`ShaderProgram::compile_program`], and an
//! async submit / poll / finalize dance built on the parallel-compile probe.
//! The async state machine spreads the expensive steps across frames so the
//! render loop never stalls on the driver's compiler:
//!
//! `None -> CompilingShaders -> ReadyToLink -> LinkingProgram -> Complete`
//!
//! Compilation status is only *read* (and errors surfaced) in
//! [`ShaderProgram::finalize_compile`]; the polls before that are pure
//! COMPLETION_STATUS queries that cannot block.

use glow::HasContext;
use tracing::debug;

use kaleid_core::EngineError;
use kaleid_glctx::ParallelShaderProbe;

/// `#version` line matching the build's target shading language.
pub fn glsl_version_header() -> &'static str {
    if cfg!(feature = "gles") {
        "#version 300 es\nprecision highp float;\nprecision mediump sampler3D;\n"
    } else {
        "#version 330 core\n"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsyncState {
    None,
    CompilingShaders,
    ReadyToLink,
    LinkingProgram,
    Complete,
}

#[derive(Debug)]
pub struct ShaderProgram {
    program: glow::NativeProgram,

    async_state: AsyncState,
    async_parallel: bool,
    async_vertex: Option<glow::NativeShader>,
    async_fragment: Option<glow::NativeShader>,
    async_vertex_source: String,
    async_fragment_source: String,
}

impl ShaderProgram {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let program = gl
            .create_program()
            .map_err(|e| EngineError::GlCreate(format!("create_program failed: {e:?}")))?;
        Ok(Self {
            program,
            async_state: AsyncState::None,
            async_parallel: false,
            async_vertex: None,
            async_fragment: None,
            async_vertex_source: String::new(),
            async_fragment_source: String::new(),
        })
    }

    pub fn raw(&self) -> glow::NativeProgram {
        self.program
    }

    /// Blocking compile + link. Errors carry the driver's info log.
    pub unsafe fn compile_program(
        &mut self,
        gl: &glow::Context,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<(), EngineError> {
        let vs = compile_shader(gl, glow::VERTEX_SHADER, vertex_source)?;
        let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, fragment_source) {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        gl.attach_shader(self.program, vs);
        gl.attach_shader(self.program, fs);
        gl.link_program(self.program);

        // Shader objects are no longer needed after linking.
        gl.detach_shader(self.program, vs);
        gl.detach_shader(self.program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.get_program_link_status(self.program) {
            let log = gl.get_program_info_log(self.program);
            return Err(EngineError::Link(log));
        }
        Ok(())
    }

    /// Submits both shader objects for compilation and returns without
    /// waiting. With the parallel-compile extension the driver works on its
    /// own threads; without it, many drivers still compile in the background,
    /// so the blocking status check is deferred by one frame via a flush.
    pub unsafe fn submit_compile_async(
        &mut self,
        gl: &glow::Context,
        vertex_source: &str,
        fragment_source: &str,
    ) {
        self.async_parallel = ParallelShaderProbe::instance().is_available();

        self.async_vertex = Some(submit_shader(gl, glow::VERTEX_SHADER, vertex_source));
        self.async_fragment = Some(submit_shader(gl, glow::FRAGMENT_SHADER, fragment_source));
        self.async_vertex_source = vertex_source.to_string();
        self.async_fragment_source = fragment_source.to_string();
        self.async_state = AsyncState::CompilingShaders;

        if !self.async_parallel {
            // Hint to the driver to start compiling now; the deferred status
            // check happens on the next poll.
            gl.flush();
        }
    }

    /// Polls the async compile without blocking (except on the no-extension
    /// fallback path, which performs the deferred link exactly once).
    pub unsafe fn is_compile_complete(&mut self, gl: &glow::Context) -> bool {
        match self.async_state {
            AsyncState::None | AsyncState::Complete => true,

            AsyncState::CompilingShaders => {
                if !self.async_parallel {
                    // The submit already gave the driver one frame; link now.
                    self.advance_to_linking(gl);
                    self.async_state = AsyncState::Complete;
                    return true;
                }

                let probe = ParallelShaderProbe::instance();
                let vertex_done = self
                    .async_vertex
                    .map(|s| probe.shader_completion_status(gl, s))
                    .unwrap_or(true);
                let fragment_done = self
                    .async_fragment
                    .map(|s| probe.shader_completion_status(gl, s))
                    .unwrap_or(true);

                if vertex_done && fragment_done {
                    // Both compiled. Yield this frame; linking here could
                    // block on some drivers.
                    self.async_state = AsyncState::ReadyToLink;
                }
                false
            }

            AsyncState::ReadyToLink => {
                self.advance_to_linking(gl);
                gl.flush();
                // Give the link at least one frame.
                false
            }

            AsyncState::LinkingProgram => {
                if ParallelShaderProbe::instance().program_completion_status(gl, self.program) {
                    self.async_state = AsyncState::Complete;
                    return true;
                }
                false
            }
        }
    }

    /// Reads compile/link results, throws on failure, frees shader objects.
    pub unsafe fn finalize_compile(&mut self, gl: &glow::Context) -> Result<(), EngineError> {
        if self.async_state == AsyncState::None {
            return Ok(());
        }

        let result = (|| {
            if let Some(vs) = self.async_vertex {
                if !gl.get_shader_compile_status(vs) {
                    return Err(EngineError::VertexCompile(gl.get_shader_info_log(vs)));
                }
            }
            if let Some(fs) = self.async_fragment {
                if !gl.get_shader_compile_status(fs) {
                    return Err(EngineError::FragmentCompile(gl.get_shader_info_log(fs)));
                }
            }
            if !gl.get_program_link_status(self.program) {
                return Err(EngineError::Link(gl.get_program_info_log(self.program)));
            }
            Ok(())
        })();

        if let Err(e) = &result {
            debug!(
                vertex_source = self.async_vertex_source.as_str(),
                fragment_source = self.async_fragment_source.as_str(),
                "async shader compile failed: {e}"
            );
        }

        if let Some(vs) = self.async_vertex.take() {
            gl.detach_shader(self.program, vs);
            gl.delete_shader(vs);
        }
        if let Some(fs) = self.async_fragment.take() {
            gl.detach_shader(self.program, fs);
            gl.delete_shader(fs);
        }
        self.async_vertex_source = String::new();
        self.async_fragment_source = String::new();
        self.async_state = AsyncState::None;

        result
    }

    /// glAttachShader + glLinkProgram. With the extension, link returns
    /// immediately and completion is polled; without it this blocks.
    unsafe fn advance_to_linking(&mut self, gl: &glow::Context) {
        if let Some(vs) = self.async_vertex {
            gl.attach_shader(self.program, vs);
        }
        if let Some(fs) = self.async_fragment {
            gl.attach_shader(self.program, fs);
        }
        gl.link_program(self.program);
        self.async_state = AsyncState::LinkingProgram;
    }

    /// Driver-side program validation, for diagnostics.
    pub unsafe fn validate(&self, gl: &glow::Context) -> (bool, String) {
        gl.validate_program(self.program);
        let ok = gl.get_program_parameter_i32(self.program, glow::VALIDATE_STATUS) != 0;
        (ok, gl.get_program_info_log(self.program))
    }

    pub unsafe fn bind(&self, gl: &glow::Context) {
        gl.use_program(Some(self.program));
    }

    pub unsafe fn unbind(gl: &glow::Context) {
        gl.use_program(None);
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        if let Some(vs) = self.async_vertex.take() {
            gl.delete_shader(vs);
        }
        if let Some(fs) = self.async_fragment.take() {
            gl.delete_shader(fs);
        }
        gl.delete_program(self.program);
    }

    // ---- Uniform setters (silently skip inactive locations) ----

    pub unsafe fn set_uniform_f32(&self, gl: &glow::Context, name: &str, value: f32) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_1_f32(Some(&loc), value);
        }
    }

    pub unsafe fn set_uniform_i32(&self, gl: &glow::Context, name: &str, value: i32) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_1_i32(Some(&loc), value);
        }
    }

    pub unsafe fn set_uniform_vec2(&self, gl: &glow::Context, name: &str, v: [f32; 2]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_2_f32(Some(&loc), v[0], v[1]);
        }
    }

    pub unsafe fn set_uniform_vec3(&self, gl: &glow::Context, name: &str, v: [f32; 3]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_3_f32(Some(&loc), v[0], v[1], v[2]);
        }
    }

    pub unsafe fn set_uniform_vec4(&self, gl: &glow::Context, name: &str, v: [f32; 4]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_4_f32(Some(&loc), v[0], v[1], v[2], v[3]);
        }
    }

    pub unsafe fn set_uniform_ivec2(&self, gl: &glow::Context, name: &str, v: [i32; 2]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_2_i32(Some(&loc), v[0], v[1]);
        }
    }

    pub unsafe fn set_uniform_ivec3(&self, gl: &glow::Context, name: &str, v: [i32; 3]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_3_i32(Some(&loc), v[0], v[1], v[2]);
        }
    }

    pub unsafe fn set_uniform_ivec4(&self, gl: &glow::Context, name: &str, v: [i32; 4]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_4_i32(Some(&loc), v[0], v[1], v[2], v[3]);
        }
    }

    pub unsafe fn set_uniform_mat3x4(&self, gl: &glow::Context, name: &str, m: &[f32; 12]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_matrix_3x4_f32_slice(Some(&loc), false, m);
        }
    }

    pub unsafe fn set_uniform_mat4(&self, gl: &glow::Context, name: &str, m: &[f32; 16]) {
        if let Some(loc) = gl.get_uniform_location(self.program, name) {
            gl.uniform_matrix_4_f32_slice(Some(&loc), false, m);
        }
    }
}

unsafe fn submit_shader(gl: &glow::Context, kind: u32, source: &str) -> glow::NativeShader {
    let shader = gl.create_shader(kind).expect("create_shader");
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    shader
}

unsafe fn compile_shader(
    gl: &glow::Context,
    kind: u32,
    source: &str,
) -> Result<glow::NativeShader, EngineError> {
    let shader = gl
        .create_shader(kind)
        .map_err(|e| EngineError::GlCreate(format!("create_shader failed: {e:?}")))?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(if kind == glow::VERTEX_SHADER {
            EngineError::VertexCompile(log)
        } else {
            EngineError::FragmentCompile(log)
        });
    }
    Ok(shader)
}

/// Parses `GL_SHADING_LANGUAGE_VERSION` into (major, minor), tolerating
/// vendor prefixes such as "OpenGL ES GLSL ES 3.00".
pub unsafe fn shading_language_version(gl: &glow::Context) -> Option<(i32, i32)> {
    let version = gl.get_parameter_string(glow::SHADING_LANGUAGE_VERSION);
    kaleid_glctx::probe::parse_version_string(&version, version.contains("ES"))
}

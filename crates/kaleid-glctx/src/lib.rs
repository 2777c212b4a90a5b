//! GL platform layer.
//!
//! Everything here assumes the host has made **exactly one** GL-family
//! context current on the calling thread. The resolver figures out which
//! platform API owns that context (EGL / GLX / WGL / CGL / WebGL) and then
//! answers "give me a function pointer for name X" through a fixed priority
//! chain. The loader builds the process-wide [`glow::Context`] on top of the
//! resolver after gating on minimum GL / GLSL versions.
//
// This crate contains the only dlopen/dlsym and raw-function-pointer code in
// the workspace; the rendering crates stay on safe glow calls plus the two
// completion-status queries exposed by the parallel-compile probe.
#![allow(clippy::missing_safety_doc)]

pub mod dynlib;
pub mod loader;
pub mod parallel;
pub mod policy;
pub mod probe;
pub mod resolver;

pub use dynlib::{function_to_integer, symbol_to_function, DynamicLibrary};
pub use loader::GlLoader;
pub use parallel::ParallelShaderProbe;
pub use probe::{GlApi, GlInfo, GlProbeResult, GlRequirements};
pub use resolver::{Backend, GlResolver, UserResolver};

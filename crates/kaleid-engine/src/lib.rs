//! Engine orchestration.
//!
//! Owns the render-thread resources (texture manager, shader cache, active
//! preset) and the asynchronous preset-switch machinery: one CPU worker
//! thread for file reads, expression compilation and texture pre-decode,
//! and a per-frame `drive` that steps the in-flight switch through its GL
//! phases without ever blocking the render loop.
#![allow(clippy::missing_safety_doc)]

pub mod engine;
pub mod orchestrator;
pub mod switch;
pub mod worker;

pub use engine::Engine;
pub use kaleid_core::{EngineError, SwitchState};
pub use orchestrator::{DriveOutcome, SwitchOrchestrator};
pub use switch::SwitchContext;
pub use worker::CpuWorker;

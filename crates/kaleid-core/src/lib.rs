#![forbid(unsafe_code)]

//! kaleid contract vocabulary.
//!
//! This crate is **contract-only**: no GL handles, no threads, no OS policy.
//! It defines the error currency, the audio-frame record, the parsed-preset
//! interchange object, and the traits behind which the external collaborators
//! (preset parser, expression bytecode compiler, shader transpiler) live.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod audio;
pub mod error;
pub mod expr;
pub mod preset_file;
pub mod settings;
pub mod switch;

// ---- Stable re-exports ----
pub use audio::FrameAudioData;
pub use error::EngineError;
pub use expr::{
    CompiledProgram, ExpressionCompiler, GlobalBanks, NoopExpressionCompiler, Slot, VariablePool,
};
pub use preset_file::{
    param_bool, param_f64, param_i32, ParsedPreset, PresetParser, ShaderStage, ShaderTranspiler,
    ShapeBlock, StraightThroughTranspiler, WaveBlock, CUSTOM_SHAPE_COUNT, CUSTOM_WAVEFORM_COUNT,
};
pub use settings::EngineSettings;
pub use switch::SwitchState;

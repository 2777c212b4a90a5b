//! The preset runtime.
//!
//! A preset is a declarative bundle of expression code, shader source, and
//! numeric parameters. Each frame the runtime feeds the previous frame back
//! through a per-pixel warp mesh, rebuilds the blur chain, layers waveforms,
//! shapes and borders on top, and composites the result — all driven by the
//! per-frame and per-pixel expression programs.
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

pub mod border;
pub mod composite;
pub mod custom_shape;
pub mod custom_waveform;
pub mod darken_center;
pub mod draw;
pub mod mesh;
pub mod motion_vectors;
pub mod per_frame;
pub mod per_pixel;
pub mod preset;
pub mod preset_shader;
pub mod state;
pub mod waveform;

pub use preset::{Preset, INIT_PHASE_COUNT};
pub use state::PresetState;

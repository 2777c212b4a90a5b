//! CPU-side preset switch pipeline contract.
//!
//! Exercises the worker/render-thread handoff exactly the way the
//! orchestrator drives it, with a toy parser standing in for the external
//! grammar collaborator. Only the GL phases are out of reach here.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kaleid_core::{
    EngineError, NoopExpressionCompiler, ParsedPreset, PresetParser, StraightThroughTranspiler,
    SwitchState,
};
use kaleid_engine::{CpuWorker, SwitchContext};
use kaleid_preset::Preset;
use kaleid_render::TextureManager;

const MINIMAL_PRESET: &str = include_str!("../fixtures/minimal_preset.milk");

/// Toy stand-in for the external preset parser: flat `key=value` lines with
/// the `per_frame_N` / `per_pixel_N` code-line convention.
struct LineParser;

impl PresetParser for LineParser {
    fn parse(&self, path: &str, data: &[u8]) -> Result<ParsedPreset, EngineError> {
        let text = std::str::from_utf8(data).map_err(|_| EngineError::PresetLoad {
            path: path.to_string(),
            msg: "preset is not valid UTF-8".to_string(),
        })?;

        let mut params = HashMap::new();
        let mut per_frame = String::new();
        let mut per_pixel = String::new();
        let mut per_frame_init = String::new();

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.starts_with("per_frame_init_") {
                per_frame_init.push_str(value);
                per_frame_init.push('\n');
            } else if key.starts_with("per_frame_") {
                per_frame.push_str(value);
                per_frame.push('\n');
            } else if key.starts_with("per_pixel_") {
                per_pixel.push_str(value);
                per_pixel.push('\n');
            } else {
                params.insert(key.to_string(), value.trim().to_string());
            }
        }

        Ok(ParsedPreset {
            params,
            per_frame_init_code: per_frame_init,
            per_frame_code: per_frame,
            per_pixel_code: per_pixel,
            ..Default::default()
        })
    }
}

fn write_temp_preset(name: &str, contents: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    p.push(format!("kaleid_contract_switch_{name}_{ts}.milk"));
    fs::write(&p, contents).expect("write preset fixture");
    p
}

fn wait_for(ctx: &SwitchContext, state: SwitchState, observed: &mut Vec<SwitchState>) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let current = ctx.state();
        if observed.last() != Some(&current) {
            observed.push(current);
        }
        if current == state {
            return true;
        }
        if current == SwitchState::Failed {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn switch_pipeline_advances_in_order_without_render_thread_blocking() {
    let path = write_temp_preset("pipeline", MINIMAL_PRESET);
    let manager = TextureManager::new(Vec::new());
    let worker = CpuWorker::new();

    let ctx = Arc::new(SwitchContext::new(
        path.to_string_lossy().into_owned(),
        true,
        manager.preloader(),
    ));
    let mut observed = vec![ctx.state()];

    // Request: the orchestrator advances to CpuLoading and submits.
    assert!(ctx.advance_to(SwitchState::CpuLoading));
    worker.start_load(Arc::clone(&ctx));
    assert!(
        wait_for(&ctx, SwitchState::GlStaging, &mut observed),
        "file read never completed: {}",
        ctx.error_message()
    );

    // GlStaging: the render thread constructs the preset from staged bytes
    // and hands expression compilation back to the worker.
    let data = ctx.take_file_data();
    let parsed = LineParser.parse(&ctx.path, &data).expect("parse fixture");
    assert_eq!(parsed.f64("zoom", 0.0), 1.046);
    assert!(parsed.per_frame_code.contains("bass_att"));

    let preset = Preset::new(
        "pipeline.milk".to_string(),
        parsed,
        Arc::new(NoopExpressionCompiler),
        Arc::new(StraightThroughTranspiler),
        (48, 36),
    );
    preset.set_expressions_compiled(true);
    ctx.store_preset(Box::new(preset));
    assert!(ctx.advance_to(SwitchState::ExpressionCompiling));
    worker.submit_expression_compile(Arc::clone(&ctx));

    assert!(
        wait_for(&ctx, SwitchState::GlPhases, &mut observed),
        "expression compile never completed: {}",
        ctx.error_message()
    );

    // Observed states are exactly a forward walk of the machine.
    let mut previous = observed[0];
    for state in &observed[1..] {
        assert!(
            *state > previous,
            "state went backwards: {previous:?} -> {state:?} (observed {observed:?})"
        );
        previous = *state;
    }
    assert_eq!(*observed.first().unwrap(), SwitchState::Idle);
    assert_eq!(*observed.last().unwrap(), SwitchState::GlPhases);

    let _ = fs::remove_file(path);
}

#[test]
fn replacing_a_switch_cancels_its_predecessor() {
    let path_b = write_temp_preset("b", MINIMAL_PRESET);
    let path_c = write_temp_preset("c", MINIMAL_PRESET);
    let manager = TextureManager::new(Vec::new());
    let worker = CpuWorker::new();

    let ctx_b = Arc::new(SwitchContext::new(
        path_b.to_string_lossy().into_owned(),
        true,
        manager.preloader(),
    ));
    ctx_b.advance_to(SwitchState::CpuLoading);
    worker.start_load(Arc::clone(&ctx_b));

    // Immediately supersede B with C, the way request_switch does.
    ctx_b.cancel();
    let ctx_c = Arc::new(SwitchContext::new(
        path_c.to_string_lossy().into_owned(),
        true,
        manager.preloader(),
    ));
    ctx_c.advance_to(SwitchState::CpuLoading);
    worker.start_load(Arc::clone(&ctx_c));

    let mut observed = Vec::new();
    assert!(
        wait_for(&ctx_c, SwitchState::GlStaging, &mut observed),
        "C never completed"
    );

    // B is cancelled and parked at a checkpoint (or had already finished
    // its stage before the flag was observed); it never fails the machine.
    assert!(ctx_b.is_cancelled());
    assert!(
        matches!(
            ctx_b.state(),
            SwitchState::CpuLoading | SwitchState::GlStaging
        ),
        "B in unexpected state {:?}",
        ctx_b.state()
    );

    let _ = fs::remove_file(path_b);
    let _ = fs::remove_file(path_c);
}

#[test]
fn preset_file_size_ceiling_is_enforced_end_to_end() {
    let path = write_temp_preset("huge", &"x".repeat(0x10_0001));
    let manager = TextureManager::new(Vec::new());
    let worker = CpuWorker::new();

    let ctx = Arc::new(SwitchContext::new(
        path.to_string_lossy().into_owned(),
        false,
        manager.preloader(),
    ));
    ctx.advance_to(SwitchState::CpuLoading);
    worker.start_load(Arc::clone(&ctx));

    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.state() != SwitchState::Failed && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(ctx.state(), SwitchState::Failed);
    assert!(
        ctx.error_message().contains("invalid size"),
        "unexpected error: {}",
        ctx.error_message()
    );

    let _ = fs::remove_file(path);
}

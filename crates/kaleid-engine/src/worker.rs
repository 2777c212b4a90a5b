//! The CPU worker thread.
//!
//! One background thread blocked on a condition variable, with two
//! submission slots: "file read" and "expression compile". Submitting a new
//! item cancels any pending item in the same slot. In-flight work is
//! cancelled cooperatively; the checkpoints are before start, after file
//! I/O, after expression compile, and after texture pre-decode. The
//! destructor flags every held context (pending and in-flight) as
//! cancelled and joins the thread.
//!
//! Never touches GL.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error};

use kaleid_core::SwitchState;

use crate::switch::SwitchContext;

/// Preset source files above this size are rejected.
pub const MAX_PRESET_FILE_SIZE: u64 = 0x10_0000;

/// Splits `proto://rest` into `("proto", "rest")`; bare paths yield an
/// empty protocol.
pub fn split_protocol(url: &str) -> (&str, &str) {
    match url.find("://") {
        Some(pos) => (&url[..pos], &url[pos + 3..]),
        None => ("", url),
    }
}

#[derive(Default)]
struct Queue {
    stopping: bool,
    pending_load: Option<Arc<SwitchContext>>,
    pending_expr: Option<Arc<SwitchContext>>,
    /// In-flight copies, kept so the destructor can cancel work the loop is
    /// currently executing.
    active_load: Option<Arc<SwitchContext>>,
    active_expr: Option<Arc<SwitchContext>>,
}

struct Shared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

pub struct CpuWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CpuWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuWorker")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl Default for CpuWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuWorker {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            cv: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("kaleid-preset-cpu".to_string())
            .spawn(move || thread_loop(thread_shared))
            .expect("spawn preset cpu worker");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Submits a file-read request, cancelling any pending load and any
    /// pending expression compile (they belong to an older switch).
    pub fn start_load(&self, ctx: Arc<SwitchContext>) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if let Some(old) = queue.pending_load.take() {
                old.cancel();
            }
            if let Some(old) = queue.pending_expr.take() {
                old.cancel();
            }
            queue.pending_load = Some(ctx);
        }
        self.shared.cv.notify_one();
    }

    /// Submits expression compilation for a context whose preset has been
    /// constructed on the render thread.
    pub fn submit_expression_compile(&self, ctx: Arc<SwitchContext>) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if let Some(old) = queue.pending_expr.take() {
                old.cancel();
            }
            queue.pending_expr = Some(ctx);
        }
        self.shared.cv.notify_one();
    }
}

impl Drop for CpuWorker {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stopping = true;
            for ctx in [
                queue.pending_load.take(),
                queue.pending_expr.take(),
                queue.active_load.clone(),
                queue.active_expr.clone(),
            ]
            .into_iter()
            .flatten()
            {
                ctx.cancel();
            }
        }
        self.shared.cv.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn thread_loop(shared: Arc<Shared>) {
    loop {
        let (load_ctx, expr_ctx) = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.stopping {
                    return;
                }
                if queue.pending_load.is_some() || queue.pending_expr.is_some() {
                    break;
                }
                queue = shared.cv.wait(queue).unwrap();
            }
            let load_ctx = queue.pending_load.take();
            let expr_ctx = queue.pending_expr.take();
            // Keep in-flight references reachable from the destructor.
            queue.active_load = load_ctx.clone();
            queue.active_expr = expr_ctx.clone();
            (load_ctx, expr_ctx)
        };

        if let Some(ctx) = expr_ctx {
            do_expression_compile(&ctx);
        }
        if let Some(ctx) = load_ctx {
            do_file_read(&ctx);
        }

        let mut queue = shared.queue.lock().unwrap();
        queue.active_load = None;
        queue.active_expr = None;
    }
}

/// File read stage: resolve the protocol, enforce the size ceiling, stage
/// the bytes, advance to `GlStaging`.
pub(crate) fn do_file_read(ctx: &SwitchContext) {
    if ctx.is_cancelled() {
        return;
    }

    let (protocol, path) = split_protocol(&ctx.path);
    if !protocol.is_empty() && protocol != "file" {
        // Non-file protocols skip local I/O; the render thread hands the
        // URL to the factory's stream loader.
        ctx.advance_to(SwitchState::GlStaging);
        return;
    }

    if ctx.is_cancelled() {
        return;
    }

    let path = Path::new(path);
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(_) => {
            ctx.fail(format!(
                "Could not open preset file: \"{}\".",
                path.display()
            ));
            return;
        }
    };
    if size == 0 || size > MAX_PRESET_FILE_SIZE {
        ctx.fail(format!(
            "Preset file has invalid size: \"{}\".",
            path.display()
        ));
        return;
    }

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(_) => {
            ctx.fail(format!(
                "Failed to read preset file: \"{}\".",
                path.display()
            ));
            return;
        }
    };

    if ctx.is_cancelled() {
        return;
    }

    debug!(path = ctx.path.as_str(), bytes = data.len(), "preset file staged");
    ctx.set_file_data(data);
    ctx.advance_to(SwitchState::GlStaging);
}

/// Expression compile stage: compile bytecode, pre-decode referenced
/// textures, advance to `GlPhases`.
pub(crate) fn do_expression_compile(ctx: &SwitchContext) {
    if ctx.is_cancelled() {
        return;
    }

    let result = ctx.with_preset(|preset| preset.compile_expressions());
    match result {
        Some(Err(e)) => {
            error!("expression compilation failed: {e}");
            ctx.fail(e.to_string());
            return;
        }
        Some(Ok(())) | None => {}
    }

    if ctx.is_cancelled() {
        return;
    }

    // Pre-decode texture files referenced by the shaders so the GL phases
    // upload without synchronous disk I/O.
    ctx.with_preset(|preset| preset.preload_textures(ctx.preloader()));

    if ctx.is_cancelled() {
        return;
    }

    ctx.advance_to(SwitchState::GlPhases);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaleid_render::TextureManager;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn context_for(path: &str) -> Arc<SwitchContext> {
        let manager = TextureManager::new(Vec::new());
        Arc::new(SwitchContext::new(
            path.to_string(),
            true,
            manager.preloader(),
        ))
    }

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("kaleid_worker_{name}_{ts}.milk"));
        fs::write(&p, contents).unwrap();
        p
    }

    fn wait_for(ctx: &SwitchContext, state: SwitchState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if ctx.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn protocols_split_cleanly() {
        assert_eq!(split_protocol("file:///p/a.milk"), ("file", "/p/a.milk"));
        assert_eq!(split_protocol("idle://next"), ("idle", "next"));
        assert_eq!(split_protocol("/p/a.milk"), ("", "/p/a.milk"));
        assert_eq!(split_protocol("a.milk"), ("", "a.milk"));
    }

    #[test]
    fn file_read_stages_bytes_and_advances() {
        let path = temp_file("ok", b"[preset00]\nzoom=1.05\n");
        let ctx = context_for(path.to_str().unwrap());
        ctx.advance_to(SwitchState::CpuLoading);

        do_file_read(&ctx);

        assert_eq!(ctx.state(), SwitchState::GlStaging);
        assert_eq!(ctx.take_file_data(), b"[preset00]\nzoom=1.05\n".to_vec());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn oversized_files_fail_with_invalid_size() {
        let path = temp_file("big", &vec![b'x'; 2 * 1024 * 1024]);
        let ctx = context_for(path.to_str().unwrap());
        ctx.advance_to(SwitchState::CpuLoading);

        do_file_read(&ctx);

        assert_eq!(ctx.state(), SwitchState::Failed);
        assert!(
            ctx.error_message().contains("invalid size"),
            "unexpected: {}",
            ctx.error_message()
        );
        let _ = fs::remove_file(path);
    }

    #[test]
    fn empty_files_fail_with_invalid_size() {
        let path = temp_file("empty", b"");
        let ctx = context_for(path.to_str().unwrap());
        ctx.advance_to(SwitchState::CpuLoading);

        do_file_read(&ctx);

        assert_eq!(ctx.state(), SwitchState::Failed);
        assert!(ctx.error_message().contains("invalid size"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_files_fail_with_open_error() {
        let ctx = context_for("/nonexistent/kaleid/preset.milk");
        ctx.advance_to(SwitchState::CpuLoading);

        do_file_read(&ctx);

        assert_eq!(ctx.state(), SwitchState::Failed);
        assert!(ctx.error_message().contains("Could not open"));
    }

    #[test]
    fn non_file_protocols_skip_local_io() {
        let ctx = context_for("idle://builtin");
        ctx.advance_to(SwitchState::CpuLoading);

        do_file_read(&ctx);

        assert_eq!(ctx.state(), SwitchState::GlStaging);
        assert!(ctx.take_file_data().is_empty());
    }

    #[test]
    fn cancelled_work_never_advances() {
        let path = temp_file("cancel", b"data");
        let ctx = context_for(path.to_str().unwrap());
        ctx.advance_to(SwitchState::CpuLoading);
        ctx.cancel();

        do_file_read(&ctx);

        // Still parked at its checkpoint; the worker exited early.
        assert_eq!(ctx.state(), SwitchState::CpuLoading);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn worker_thread_processes_submissions() {
        let path = temp_file("threaded", b"threaded preset");
        let worker = CpuWorker::new();
        let ctx = context_for(path.to_str().unwrap());
        ctx.advance_to(SwitchState::CpuLoading);

        worker.start_load(Arc::clone(&ctx));
        assert!(wait_for(&ctx, SwitchState::GlStaging), "load never finished");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn new_submission_cancels_the_previous_one() {
        let path_b = temp_file("b", b"preset b");
        let path_c = temp_file("c", b"preset c");
        let worker = CpuWorker::new();

        let ctx_b = context_for(path_b.to_str().unwrap());
        ctx_b.advance_to(SwitchState::CpuLoading);
        let ctx_c = context_for(path_c.to_str().unwrap());
        ctx_c.advance_to(SwitchState::CpuLoading);

        worker.start_load(Arc::clone(&ctx_b));
        worker.start_load(Arc::clone(&ctx_c));

        assert!(wait_for(&ctx_c, SwitchState::GlStaging), "C never finished");
        // B was either cancelled while still pending, or the worker had
        // already picked it up and finished its stage before C arrived.
        // Either way it never advances after C superseded it.
        assert!(
            ctx_b.is_cancelled() || ctx_b.state() == SwitchState::GlStaging,
            "B in unexpected state {:?}",
            ctx_b.state()
        );

        let _ = fs::remove_file(path_b);
        let _ = fs::remove_file(path_c);
    }

    #[test]
    fn dropping_the_worker_cancels_held_contexts_and_joins() {
        let worker = CpuWorker::new();
        let ctx = context_for("/nonexistent/never-started.milk");
        {
            let mut queue = worker.shared.queue.lock().unwrap();
            queue.pending_load = Some(Arc::clone(&ctx));
        }
        drop(worker);
        assert!(ctx.is_cancelled());
    }
}

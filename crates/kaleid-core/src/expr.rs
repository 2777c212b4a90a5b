//! Host-side state for the expression bytecode VM.
//!
//! The compiler and interpreter for the preset expression language are an
//! external collaborator. This module defines the two things the engine and
//! that collaborator agree on: a slot-addressed variable pool (each builtin
//! or user variable is one `f64` slot, interned by name) and the global
//! memory/register banks shared between the per-frame and per-pixel programs.

use std::collections::HashMap;
use std::fmt;

use crate::EngineError;

/// Handle to one interned variable in a [`VariablePool`].
///
/// Slots are stable for the lifetime of the pool, so contexts resolve their
/// builtin variables once at registration time and use the handles on the
/// per-frame / per-vertex hot paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

/// Named `f64` variable bank backing one expression context.
#[derive(Debug, Default, Clone)]
pub struct VariablePool {
    values: Vec<f64>,
    names: HashMap<String, usize>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, creating a zero-initialized slot on first use.
    pub fn slot(&mut self, name: &str) -> Slot {
        if let Some(&idx) = self.names.get(name) {
            return Slot(idx);
        }
        let idx = self.values.len();
        self.values.push(0.0);
        self.names.insert(name.to_string(), idx);
        Slot(idx)
    }

    /// Looks up an already-interned variable.
    pub fn lookup(&self, name: &str) -> Option<Slot> {
        self.names.get(name).map(|&idx| Slot(idx))
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> f64 {
        self.values[slot.0]
    }

    #[inline]
    pub fn set(&mut self, slot: Slot, value: f64) {
        self.values[slot.0] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Register count of the `reg00`..`reg99` bank.
pub const REGISTER_COUNT: usize = 100;

/// Global state shared by every expression program of one preset.
///
/// `megabuf` grows on demand; index space matches the VM's global memory
/// addressing. Both banks persist across frames and survive preset-internal
/// context switches (per-frame code writing, per-pixel code reading).
#[derive(Clone)]
pub struct GlobalBanks {
    pub regs: [f64; REGISTER_COUNT],
    pub megabuf: Vec<f64>,
}

impl fmt::Debug for GlobalBanks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalBanks")
            .field("regs", &"[f64; 100]")
            .field("megabuf_len", &self.megabuf.len())
            .finish()
    }
}

impl Default for GlobalBanks {
    fn default() -> Self {
        Self {
            regs: [0.0; REGISTER_COUNT],
            megabuf: Vec::new(),
        }
    }
}

impl GlobalBanks {
    /// Reads a megabuf cell, treating unwritten cells as zero.
    pub fn megabuf_get(&self, index: usize) -> f64 {
        self.megabuf.get(index).copied().unwrap_or(0.0)
    }

    /// Writes a megabuf cell, growing the buffer as needed.
    pub fn megabuf_set(&mut self, index: usize, value: f64) {
        if index >= self.megabuf.len() {
            self.megabuf.resize(index + 1, 0.0);
        }
        self.megabuf[index] = value;
    }
}

/// A compiled expression program, ready to execute against a pool.
pub trait CompiledProgram: Send {
    fn execute(&self, vars: &mut VariablePool, globals: &mut GlobalBanks);
}

impl<F> CompiledProgram for F
where
    F: Fn(&mut VariablePool, &mut GlobalBanks) + Send,
{
    fn execute(&self, vars: &mut VariablePool, globals: &mut GlobalBanks) {
        self(vars, globals)
    }
}

/// The external bytecode compiler.
///
/// `compile` may intern additional (user) variables into the pool; the engine
/// calls it on the CPU worker thread, so implementations must be `Send + Sync`
/// and must not touch GL.
pub trait ExpressionCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        vars: &mut VariablePool,
    ) -> Result<Box<dyn CompiledProgram>, EngineError>;
}

/// Compiler for presets without executable code: every source compiles to a
/// program that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExpressionCompiler;

impl ExpressionCompiler for NoopExpressionCompiler {
    fn compile(
        &self,
        _source: &str,
        _vars: &mut VariablePool,
    ) -> Result<Box<dyn CompiledProgram>, EngineError> {
        Ok(Box::new(|_: &mut VariablePool, _: &mut GlobalBanks| {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_stable_and_deduplicated() {
        let mut pool = VariablePool::new();
        let a = pool.slot("zoom");
        let b = pool.slot("rot");
        let a2 = pool.slot("zoom");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);

        pool.set(a, 1.25);
        assert_eq!(pool.get(a), 1.25);
        assert_eq!(pool.get(b), 0.0);
        assert_eq!(pool.lookup("zoom"), Some(a));
        assert_eq!(pool.lookup("nope"), None);
    }

    #[test]
    fn megabuf_grows_on_write_and_zero_fills() {
        let mut banks = GlobalBanks::default();
        assert_eq!(banks.megabuf_get(1000), 0.0);
        banks.megabuf_set(10, 3.5);
        assert_eq!(banks.megabuf_get(10), 3.5);
        assert_eq!(banks.megabuf_get(9), 0.0);
        assert_eq!(banks.megabuf.len(), 11);
    }

    #[test]
    fn closures_run_as_compiled_programs() {
        let mut pool = VariablePool::new();
        let x = pool.slot("x");
        let mut banks = GlobalBanks::default();

        let program: Box<dyn CompiledProgram> =
            Box::new(move |vars: &mut VariablePool, globals: &mut GlobalBanks| {
                vars.set(x, vars.get(x) + 1.0);
                globals.regs[3] = 7.0;
            });

        program.execute(&mut pool, &mut banks);
        program.execute(&mut pool, &mut banks);
        assert_eq!(pool.get(x), 2.0);
        assert_eq!(banks.regs[3], 7.0);
    }
}

//! Scratch-register allocation.
//!
//! A flat free-pool over the target's scratch registers. The expression
//! lowerer allocates and releases around each expression tree; the return
//! lowering additionally `request`s the return register by name. State is
//! per lowering pass and single-threaded.

use crate::target::{Reg, TargetConfig};

pub struct RegisterFile {
    /// Scratch registers in allocation-preference order.
    pool: Vec<Reg>,
    /// Taken flags, indexed by register number.
    taken: Vec<bool>,
}

impl RegisterFile {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            pool: target.scratch_regs.clone(),
            taken: vec![false; target.reg_names.len()],
        }
    }

    /// Allocate any free scratch register, or `None` when the pool is dry.
    pub fn alloc(&mut self) -> Option<Reg> {
        let reg = self
            .pool
            .iter()
            .copied()
            .find(|r| !self.taken[r.0 as usize])?;
        self.taken[reg.0 as usize] = true;
        Some(reg)
    }

    /// Request a specific register. Fails if it is already taken.
    pub fn request(&mut self, reg: Reg) -> bool {
        if self.taken[reg.0 as usize] {
            return false;
        }
        self.taken[reg.0 as usize] = true;
        true
    }

    pub fn release(&mut self, reg: Reg) {
        debug_assert!(self.taken[reg.0 as usize], "releasing a free register");
        self.taken[reg.0 as usize] = false;
    }

    pub fn is_taken(&self, reg: Reg) -> bool {
        self.taken[reg.0 as usize]
    }

    /// Currently-taken registers in pool order. Used to save caller-owned
    /// values across a call.
    pub fn in_use(&self) -> Vec<Reg> {
        self.pool
            .iter()
            .copied()
            .filter(|r| self.taken[r.0 as usize])
            .collect()
    }
}

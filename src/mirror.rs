//! The front-panel state mirror: a plain, serializable snapshot of
//! everything the network protocol pushes when dirty (spec §6, §9).
//!
//! The mirror is mutated only by the executor flow and read/serialized by
//! the front-panel flow; the `dirty` flag is the only thing touched from
//! both sides, so it is the only field that needs to be atomic.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::interrupt::InterruptEngine;
use crate::registers::Registers;

/// Scalar snapshot of the machine, serialized on demand for the
/// front-panel protocol. Does not include PWM indicator-persistence
/// arrays or the network framing — those belong to the front-panel
/// collaborator, out of this core's scope (spec §1).
#[derive(Debug, Serialize)]
pub struct StateMirror {
    pub a: u16,
    pub b: u16,
    pub x: u16,
    pub pc: u16,
    pub ir: u16,
    pub t: u16,
    pub sr: u16,
    pub vbr: u16,
    pub cf: bool,
    pub xp: bool,
    pub ovf: bool,
    pub int_group: u8,
    pub int_level: u8,
    pub io_hold: bool,
    pub halted: bool,
    #[serde(skip)]
    dirty: AtomicBool,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMirror {
    #[must_use]
    pub fn new() -> Self {
        Self {
            a: 0,
            b: 0,
            x: 0,
            pc: 0,
            ir: 0,
            t: 0,
            sr: 0,
            vbr: 0,
            cf: false,
            xp: false,
            ovf: false,
            int_group: crate::interrupt::NO_GROUP,
            int_level: 0,
            io_hold: false,
            halted: true,
            dirty: AtomicBool::new(true),
        }
    }

    pub(crate) fn refresh(
        &mut self,
        regs: &Registers,
        interrupts: &InterruptEngine,
        io_hold: bool,
        halted: bool,
    ) {
        self.a = regs.a;
        self.b = regs.b;
        self.x = regs.x;
        self.pc = regs.pc;
        self.ir = regs.ir;
        self.t = regs.t;
        self.sr = regs.sr;
        self.vbr = regs.vbr;
        self.cf = regs.cf;
        self.xp = regs.xp;
        self.ovf = regs.ovf;
        self.int_group = interrupts.int_group;
        self.int_level = interrupts.int_level;
        self.io_hold = io_hold;
        self.halted = halted;
        self.dirty.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Serialize the current snapshot and clear the dirty flag. The
    /// front-panel flow calls this on its own 200ms cadence, never from
    /// the executor.
    pub fn to_json(&self) -> serde_json::Result<String> {
        self.dirty.store(false, Ordering::Release);
        serde_json::to_string(self)
    }
}

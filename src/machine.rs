//! The assembled machine: register file, memory, interrupt engine,
//! peripheral table, and I/O timing, tied together by the run-loop
//! controller (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{trace, warn};

use crate::cpu;
use crate::cpu::mnemonic::mnemonic;
use crate::interrupt::InterruptEngine;
use crate::io::{IoControl, IoTiming};
use crate::memory::{BreakpointStore, Memory, RegKind};
use crate::mirror::StateMirror;
use crate::peripheral::{AttachError, Peripheral, PeripheralTable};
use crate::registers::Registers;

/// Owns every piece of machine state and exposes the run-loop surface
/// (spec §4.5). A single executor flow is expected to drive `step`;
/// `halted`/`step_armed`/`io.is_held` are safe to observe from other
/// flows.
pub struct Machine {
    pub regs: Registers,
    pub memory: Memory,
    pub breakpoints: BreakpointStore,
    pub interrupts: InterruptEngine,
    pub peripherals: PeripheralTable,
    pub io_timing: IoTiming,
    pub io: IoControl,
    pub mirror: StateMirror,
    halted: AtomicBool,
    step_armed: AtomicBool,
    interrupt_indicator: AtomicBool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    #[must_use]
    pub fn new() -> Self {
        let mut m = Self {
            regs: Registers::new(),
            memory: Memory::new(),
            breakpoints: BreakpointStore::new(),
            interrupts: InterruptEngine::new(),
            peripherals: PeripheralTable::new(),
            io_timing: IoTiming::default(),
            io: IoControl::new(),
            mirror: StateMirror::new(),
            halted: AtomicBool::new(true),
            step_armed: AtomicBool::new(false),
            interrupt_indicator: AtomicBool::new(false),
        };
        m.prefetch();
        let (held, halted) = (m.io.is_held(), m.is_halted());
        m.mirror.refresh(&m.regs, &m.interrupts, held, halted);
        m
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    /// Clear the `Halt` latch and arm exactly one `Step`, per the run-loop
    /// controller's `Step` operation (spec §4.5).
    pub fn arm_step(&self) {
        self.halted.store(false, Ordering::Release);
        self.step_armed.store(true, Ordering::Release);
    }

    /// Clear `Halt` and let the loop run indefinitely (`Run`).
    pub fn run(&self) {
        self.halted.store(false, Ordering::Release);
        self.step_armed.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn interrupt_indicator(&self) -> bool {
        self.interrupt_indicator.load(Ordering::Acquire)
    }

    /// Zero the registers MasterClear covers, clear every breakpoint and
    /// pending interrupt, and re-establish the prefetch invariant.
    /// Idempotent: a second call in a row is a no-op beyond re-deriving
    /// the same state (spec §8 round-trip property).
    pub fn master_clear(&mut self) {
        self.regs.master_clear();
        self.breakpoints.clear_all();
        self.interrupts = InterruptEngine::new();
        self.interrupt_indicator.store(false, Ordering::Release);
        self.io.release();
        self.prefetch();
        self.refresh_mirror();
    }

    pub fn attach(&self, unit: u8, device: Box<dyn Peripheral>) -> Result<(), AttachError> {
        self.peripherals.attach(unit, device)
    }

    pub fn detach(&self, unit: u8) {
        self.peripherals.detach(unit);
    }

    pub fn release_io_hold(&self) {
        self.io.release();
    }

    /// Set `PC` directly and re-establish the prefetch invariant. Used by
    /// debugger-style "set PC" actions and by test/harness setup; normal
    /// instruction flow never needs this (it maintains the invariant
    /// itself after every step).
    pub fn goto(&mut self, pc: u16) {
        self.set_pc(pc);
        self.prefetch();
        self.refresh_mirror();
    }

    /// Run exactly one CPU step followed by one interrupt step; the
    /// conventional unit of work behind both `Step` and the inner loop of
    /// `Run` (spec §4.5).
    pub fn step(&mut self) {
        if self.is_halted() {
            return;
        }
        cpu::execute_one(self);
        if self.step_armed.swap(false, Ordering::AcqRel) {
            self.halted.store(true, Ordering::Release);
        }
        self.refresh_mirror();
    }

    /// Re-read `IR`/`T` from `PC`, checking the read breakpoint exactly as
    /// a normal fetch would. Called at construction, after MasterClear,
    /// and as the last step of every instruction (the prefetch
    /// invariant, spec §3).
    pub(crate) fn prefetch(&mut self) {
        let word = self.mem_read(self.regs.pc);
        self.regs.t = word;
        self.set_ir(word);
    }

    pub(crate) fn mem_read(&mut self, addr: u16) -> u16 {
        let value = self.memory.read(addr);
        if self.breakpoints.check_read(addr) {
            self.fire_breakpoint("read", addr);
        }
        value
    }

    pub(crate) fn mem_write(&mut self, addr: u16, value: u16) {
        self.memory.write(addr, value);
        if self.breakpoints.check_write(addr) {
            self.fire_breakpoint("write", addr);
        }
    }

    pub(crate) fn set_a(&mut self, value: u16) {
        self.regs.a = value;
        if self.breakpoints.check_value(RegKind::A, value) {
            self.fire_breakpoint("value-A", value);
        }
    }

    pub(crate) fn set_b(&mut self, value: u16) {
        self.regs.b = value;
        if self.breakpoints.check_value(RegKind::B, value) {
            self.fire_breakpoint("value-B", value);
        }
    }

    pub(crate) fn set_ir(&mut self, value: u16) {
        self.regs.ir = value;
        if self.breakpoints.check_value(RegKind::Ir, value) {
            self.fire_breakpoint("value-IR", value);
        }
    }

    pub(crate) fn set_pc(&mut self, value: u16) {
        self.regs.pc = Registers::pc_mask(value);
        if self.breakpoints.check_value(RegKind::Pc, self.regs.pc) {
            self.fire_breakpoint("value-PC", self.regs.pc);
        }
    }

    /// Run the interrupt engine once: aggregate pending peripheral lines,
    /// then poll for preemption and vector through the interrupt table if
    /// one wins (spec §4.4). Called after every instruction, always after
    /// the prefetch that closes it out.
    pub(crate) fn poll_interrupts(&mut self) {
        let lines = self.peripherals.collect_interrupt_lines();
        self.interrupts.aggregate(lines.iter());
        if let Some(selected) = self.interrupts.poll() {
            let vector = crate::interrupt::vector_address(selected.group, selected.level);
            let target = self.mem_read(vector) & 0x7FFF;
            let return_pc = self.regs.pc;
            self.mem_write(target, return_pc);
            self.set_pc(target.wrapping_add(1));
            self.prefetch();
            self.interrupts.block_one_step();
            self.interrupt_indicator.store(true, Ordering::Release);
        } else if self.interrupts.int_group == crate::interrupt::NO_GROUP {
            self.interrupt_indicator.store(false, Ordering::Release);
        }
    }

    fn fire_breakpoint(&self, category: &str, subject: u16) {
        self.halted.store(true, Ordering::Release);
        warn!(
            category,
            subject,
            pc = self.regs.pc,
            ir = self.regs.ir,
            mnemonic = mnemonic(self.regs.ir),
            "breakpoint fired"
        );
    }

    pub(crate) fn dismiss_toi_if_pending(&mut self, dismiss: bool) {
        if dismiss && self.interrupts.toi {
            self.interrupts.toi = false;
            let still_active = self.interrupts.dismiss();
            self.interrupt_indicator.store(still_active, Ordering::Release);
            trace!(still_active, "TOI dismissal");
        }
    }

    fn refresh_mirror(&mut self) {
        let (held, halted) = (self.io.is_held(), self.is_halted());
        self.mirror.refresh(&self.regs, &self.interrupts, held, halted);
    }
}

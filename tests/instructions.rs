//! End-to-end instruction and run-loop tests, driven through the public
//! `Machine` surface exactly as a front-panel/runner binary would use it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sel810a_core::interrupt::{IntLines, NO_GROUP, vector_address};
use sel810a_core::io::IoTiming;
use sel810a_core::machine::Machine;
use sel810a_core::peripheral::Peripheral;

/// A minimal device that becomes ready after a fixed wall-clock delay, so
/// this suite can drive the real SKIP/WAIT/IOHOLD timing (spec §8
/// scenario 6) rather than faking readiness.
struct DelayedPeripheral {
    ready_at: Instant,
    inbox: VecDeque<u16>,
}

impl DelayedPeripheral {
    fn ready_after(delay: Duration) -> Self {
        Self { ready_at: Instant::now() + delay, inbox: VecDeque::new() }
    }

    fn ready(&self) -> bool {
        Instant::now() >= self.ready_at
    }
}

impl Peripheral for DelayedPeripheral {
    fn test_ready(&self, _cmd: u16) -> bool {
        self.ready()
    }
    fn test(&mut self, _cmd: u16) -> bool {
        self.ready()
    }
    fn command_ready(&self) -> bool {
        self.ready()
    }
    fn command(&mut self, _cmd: u16) -> bool {
        self.ready()
    }
    fn read_ready(&self) -> bool {
        self.ready() && !self.inbox.is_empty()
    }
    fn read(&mut self) -> (bool, u16) {
        if self.ready() {
            if let Some(word) = self.inbox.pop_front() {
                return (true, word);
            }
        }
        (false, 0)
    }
    fn write_ready(&self) -> bool {
        self.ready()
    }
    fn write(&mut self, _word: u16) -> bool {
        self.ready()
    }
    fn interrupts(&self) -> Option<IntLines> {
        None
    }
    fn exit(&mut self) {}
}

/// Build a memory-reference word: opcode in 15-12, X/I/M flags, 9-bit
/// displacement.
fn mref(op: u16, x: bool, i: bool, m: bool, disp: u16) -> u16 {
    (op << 12) | (u16::from(x) << 11) | (u16::from(i) << 10) | (u16::from(m) << 9) | (disp & 0x1FF)
}

/// Build an augmented-00 word: shift count in 9-6, sub-op in 5-0.
fn aug00(subop: u16, shift: u16) -> u16 {
    ((shift & 0xF) << 6) | (subop & 0x3F)
}

/// Build an augmented-13 (control I/O & priority interrupt) word.
fn aug13(subop: u16, unit: u16) -> u16 {
    (11 << 12) | ((subop & 0x7) << 6) | (unit & 0x3F)
}

/// Build an augmented-17 (data I/O) word.
fn aug17(subop: u16, unit: u16, r: bool) -> u16 {
    (15 << 12) | (u16::from(r) << 11) | ((subop & 0x7) << 6) | (unit & 0x3F)
}

/// Write one instruction at `pc`, point the machine at it, and run exactly
/// one step (matching the run-loop controller's `Step` operation).
fn run_one(m: &mut Machine, pc: u16, word: u16) {
    m.memory.write(pc, word);
    m.goto(pc);
    m.arm_step();
    m.step();
}

#[test]
fn cma_skips_once_when_accumulator_equals_operand() {
    let mut m = Machine::new();
    m.memory.write(0x10, 3);
    m.regs.a = 3;
    run_one(&mut m, 0, mref(13, false, false, false, 0x10));
    assert_eq!(m.regs.pc, 2, "A >= M[EA] but not strictly greater: skip once");
}

#[test]
fn cma_skips_twice_when_accumulator_exceeds_operand() {
    let mut m = Machine::new();
    m.memory.write(0x10, 3);
    m.regs.a = 5;
    run_one(&mut m, 0, mref(13, false, false, false, 0x10));
    assert_eq!(m.regs.pc, 3, "A > M[EA]: skip twice");
}

#[test]
fn cma_does_not_skip_when_accumulator_is_less() {
    let mut m = Machine::new();
    m.memory.write(0x10, 5);
    m.regs.a = 3;
    run_one(&mut m, 0, mref(13, false, false, false, 0x10));
    assert_eq!(m.regs.pc, 1, "A < M[EA]: no skip");
}

#[test]
fn ims_wraps_and_skips_at_the_top_of_the_word() {
    let mut m = Machine::new();
    let ea = 0x0010u16;
    m.memory.write(ea, 0xFFFF);
    run_one(&mut m, 0x200, mref(12, false, false, false, ea));
    assert_eq!(m.memory.read(ea), 0, "IMS wraps 0xFFFF to 0");
    assert_eq!(m.regs.pc, 0x202, "IMS skips on wrap-to-zero");
}

#[test]
fn mpy_boundary_case_from_spec() {
    let mut m = Machine::new();
    let ea = 0x20u16;
    m.memory.write(ea, 0x8000); // -32768
    m.regs.a = 0;
    m.regs.b = 0x8000; // -32768
    run_one(&mut m, 0x100, mref(7, false, false, false, ea));
    assert!(m.regs.ovf, "both operands at -32768 sets OVF");
    assert_eq!(m.regs.b, 0, "product's low half is 0");
    assert_eq!(m.regs.a, 0x4000, "product's high half matches the documented split");
}

#[test]
fn neg_of_minimum_value_sets_overflow_and_preserves_bit_pattern() {
    let mut m = Machine::new();
    m.regs.a = 0x8000; // -32768
    run_one(&mut m, 0, aug00(2, 0)); // NEG
    assert!(m.regs.ovf);
    assert_eq!(m.regs.a, 0x8000);
}

#[test]
fn add_with_carry_in_at_the_boundary_sets_overflow() {
    let mut m = Machine::new();
    m.memory.write(0x30, 0);
    m.regs.a = 0x7FFF;
    m.regs.cf = true;
    run_one(&mut m, 0, mref(5, false, false, false, 0x30)); // AMA
    assert!(m.regs.ovf);
    assert_eq!(m.regs.a, 0x8000);
    assert!(!m.regs.cf, "CF is cleared at the end of every non-MPY step");
}

#[test]
fn csb_sets_carry_and_the_next_instruction_consumes_it() {
    let mut m = Machine::new();
    m.regs.b = 0x8000; // negative: CSB should set CF
    m.memory.write(0x30, 0);
    m.regs.a = 0x7FFF;

    run_one(&mut m, 0, aug00(3, 0)); // CSB
    assert!(m.regs.cf, "CSB set CF from B's sign and survives its own end-of-step clear");

    let pc = m.regs.pc;
    run_one(&mut m, pc, mref(5, false, false, false, 0x30)); // AMA
    assert!(m.regs.ovf, "AMA's carry-in came from CSB, not from a directly-poked CF");
    assert_eq!(m.regs.a, 0x8000);
    assert!(!m.regs.cf, "CF is cleared at the end of every non-MPY, non-CSB step");
}

#[test]
fn shift_count_zero_is_a_no_op() {
    let mut m = Machine::new();
    m.regs.a = 0x1234;
    run_one(&mut m, 0, aug00(24, 0)); // SHA, shift count 0
    assert_eq!(m.regs.a, 0x1234);
}

#[test]
fn tab_then_tba_round_trips_through_b() {
    let mut m = Machine::new();
    m.regs.a = 5;
    m.regs.b = 9;
    run_one(&mut m, 0, aug00(12, 0)); // TAB: B <- A
    assert_eq!(m.regs.b, 5);
    let pc = m.regs.pc;
    run_one(&mut m, pc, aug00(13, 0)); // TBA: A <- B
    assert_eq!(m.regs.a, 5);
}

#[test]
fn iab_twice_restores_a_and_b() {
    let mut m = Machine::new();
    m.regs.a = 5;
    m.regs.b = 9;
    run_one(&mut m, 0, aug00(14, 0)); // IAB: swap
    assert_eq!((m.regs.a, m.regs.b), (9, 5));
    let pc = m.regs.pc;
    run_one(&mut m, pc, aug00(14, 0));
    assert_eq!((m.regs.a, m.regs.b), (5, 9));
}

#[test]
fn pie_then_pid_leaves_enabled_unchanged() {
    let mut m = Machine::new();
    let original = m.interrupts.enabled[2];
    m.regs.a = (2 << 12) | 0x080; // group 2, mask bit 7
    run_one(&mut m, 0, aug13(6, 0)); // PIE (unit 0)
    assert_ne!(m.interrupts.enabled[2], original);
    let pc = m.regs.pc;
    run_one(&mut m, pc, aug13(6, 1)); // PID (unit != 0)
    assert_eq!(m.interrupts.enabled[2], original);
}

#[test]
fn master_clear_twice_is_the_same_as_once() {
    let mut m = Machine::new();
    m.regs.a = 0x1234;
    m.regs.b = 0x5678;
    m.master_clear();
    let once = (m.regs.a, m.regs.b, m.regs.pc, m.regs.ovf, m.regs.cf);
    m.master_clear();
    let twice = (m.regs.a, m.regs.b, m.regs.pc, m.regs.ovf, m.regs.cf);
    assert_eq!(once, twice);
}

#[test]
fn load_then_read_reproduces_the_stored_word() {
    let mut m = Machine::new();
    m.memory.write(1234, 0xBEEF);
    assert_eq!(m.memory.read(1234), 0xBEEF);
}

#[test]
fn prefetch_invariant_holds_after_a_step() {
    let mut m = Machine::new();
    run_one(&mut m, 0, aug00(12, 0)); // TAB, a non-branching instruction
    assert_eq!(m.regs.ir, m.memory.read(m.regs.pc));
}

#[test]
fn interrupt_dispatch_vectors_through_the_interrupt_table() {
    let mut m = Machine::new();
    m.interrupts.enabled[3] = 0x800;
    m.interrupts.request[3] = 0x800;

    let vector = vector_address(3, 1);
    assert_eq!(vector, 578);
    let target = 700u16;
    m.memory.write(vector, target);

    run_one(&mut m, 100, aug00(12, 0)); // any ordinary instruction

    assert_eq!(m.regs.pc, target.wrapping_add(1));
    assert_eq!(m.memory.read(target), 101, "the pre-dispatch PC was stored at the vector target");
    assert_eq!(m.interrupts.int_group, 3);
    assert_eq!(m.interrupts.int_mask, 0x800);
    assert_eq!(m.interrupts.active[3], 0x800);
}

#[test]
fn bru_with_indirect_flag_dismisses_pending_toi() {
    let mut m = Machine::new();
    m.interrupts.toi = true;
    m.interrupts.enabled[3] = 0x800;
    m.interrupts.active[3] = 0x800;
    m.interrupts.int_group = 3;
    m.interrupts.int_mask = 0x800;
    m.interrupts.int_level = 1;

    // Indirect pointer word at 0x10 resolves straight to address 64.
    m.memory.write(0x10, 64);
    run_one(&mut m, 0, mref(9, false, true, false, 0x10)); // BRU, I=1

    assert_eq!(m.regs.pc, 64);
    assert!(!m.interrupts.toi, "TOI was dismissed");
    assert_eq!(m.interrupts.int_group, NO_GROUP, "no other level was active to restore");
}

#[test]
fn indirect_chain_through_a_clear_i_bit_terminates_after_one_read() {
    let mut m = Machine::new();
    // Pointer at 0x10 has its own top two bits clear: one read resolves it.
    m.memory.write(0x10, 0x0040);
    m.regs.a = 0;
    run_one(&mut m, 0, mref(1, false, true, false, 0x10)); // LAA, indirect
    m.memory.write(0x0040, 0x7777);
    // Re-run now that the target word exists, confirming EA == 0x40.
    let pc = m.regs.pc;
    run_one(&mut m, pc, mref(1, false, true, false, 0x10));
    assert_eq!(m.regs.a, 0x7777);
}

#[test]
fn aip_wait_completes_after_io_hold_recovers() {
    let mut m = Machine::new();
    m.io_timing = IoTiming {
        indicator_lag: Duration::from_millis(20),
        poll_wait: Duration::from_millis(2),
        poll_hold_rw: Duration::from_millis(5),
        poll_hold_other: Duration::from_millis(5),
    };
    let mut device = DelayedPeripheral::ready_after(Duration::from_millis(40));
    device.inbox.push_back(0x1234);
    m.attach(3, Box::new(device)).expect("unit 3 is in range");

    run_one(&mut m, 0, aug17(3, 3, false)); // AIP-wait, unit 3

    assert_eq!(m.regs.a, 0x1234, "AIP-wait completed once the device became ready");
    assert!(!m.io.is_held(), "IOHOLD is cleared on exit");
}

#[test]
fn missing_peripheral_reference_is_a_silent_no_op() {
    let mut m = Machine::new();
    run_one(&mut m, 0, aug17(0, 63, false)); // AOP-skip on an unattached unit
    assert_eq!(m.regs.pc, 1, "skip did not fire: the write never succeeded");
}

#[test]
fn read_breakpoint_halts_the_run_loop() {
    // Exercises the same `tracing::warn!` path a front-panel binary would
    // subscribe to for the breakpoint diagnostic (spec §4.1, §10.1).
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut m = Machine::new();
    m.breakpoints.set_read(0x50, -1); // fires on every match, never decrements
    m.memory.write(0x50, 0);
    run_one(&mut m, 0, mref(1, false, false, false, 0x50)); // LAA from 0x50

    assert!(m.is_halted(), "the read breakpoint should halt the run loop");
}

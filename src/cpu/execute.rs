//! Per-opcode-class execution. Each function mutates `Machine` in place
//! and reports its `PC_inc` through the out-parameter; opcode dispatch
//! and the shared post-step bookkeeping (CF clear, prefetch, interrupt
//! poll) live in the parent module.

use super::{alu, compute_ea};
use crate::io::{self, IoMode};
use crate::machine::Machine;

pub(super) fn memory_reference(m: &mut Machine, op: u16, ir: u16, pc_inc: &mut u16) {
    let ea = compute_ea(m, ir);
    match op {
        1 => {
            let v = m.mem_read(ea);
            m.set_a(v);
        }
        2 => {
            let v = m.mem_read(ea);
            m.set_b(v);
        }
        3 => {
            let a = m.regs.a;
            m.mem_write(ea, a);
        }
        4 => {
            let b = m.regs.b;
            m.mem_write(ea, b);
        }
        5 => {
            let operand = m.mem_read(ea);
            let (result, ovf) = alu::add_with_carry(m.regs.a, operand, m.regs.cf);
            m.regs.ovf = ovf;
            m.set_a(result);
        }
        6 => {
            let operand = m.mem_read(ea);
            let (result, ovf) = alu::sub_with_borrow(m.regs.a, operand, m.regs.cf);
            m.regs.ovf = ovf;
            m.set_a(result);
        }
        7 => {
            let operand = m.mem_read(ea);
            let (a, b, ovf) = alu::multiply(m.regs.b, operand);
            m.regs.ovf = ovf;
            m.set_a(a);
            m.set_b(b);
        }
        8 => {
            let operand = m.mem_read(ea);
            let (quotient, remainder, ovf) = alu::divide(m.regs.a, m.regs.b, operand);
            m.regs.ovf = ovf;
            m.set_a(quotient);
            m.set_b(remainder);
        }
        9 => {
            let dismiss = ir & 0x0400 != 0;
            m.set_pc(ea);
            *pc_inc = 0;
            m.dismiss_toi_if_pending(dismiss);
        }
        10 => {
            let ret = m.regs.pc.wrapping_add(1) & 0x3FFF;
            m.mem_write(ea, ret);
            m.set_pc(ea);
            *pc_inc = 0;
            m.interrupts.block_one_step();
        }
        12 => {
            let incremented = m.mem_read(ea).wrapping_add(1);
            m.mem_write(ea, incremented);
            if incremented == 0 {
                *pc_inc = 2;
            }
        }
        13 => {
            let operand = m.mem_read(ea) as i16;
            let a = m.regs.a as i16;
            if a > operand {
                *pc_inc = 3;
            } else if a >= operand {
                *pc_inc = 2;
            }
        }
        14 => {
            let operand = m.mem_read(ea);
            let (result, ovf) = alu::add_with_carry(m.regs.b, operand, m.regs.cf);
            m.regs.ovf = ovf;
            m.set_b(result);
        }
        _ => {}
    }
}

pub(super) fn augmented_00(m: &mut Machine, ir: u16, pc_inc: &mut u16) {
    let subop = ir & 0x3F;
    let shift_count = (ir >> 6) & 0xF;

    match subop {
        0 => {
            m.halt();
            *pc_inc = 0;
        }
        1 => {
            let round_up = m.regs.b & 0x4000 != 0;
            let (result, _) = alu::add_with_carry(m.regs.a, 0, round_up);
            m.regs.ovf = m.regs.a == 0xFFFF && result == 0;
            m.set_a(result);
        }
        2 => {
            let (result, ovf) = alu::sub_with_borrow(0, m.regs.a, m.regs.cf);
            m.regs.ovf = ovf;
            m.set_a(result);
        }
        3 => {
            m.regs.cf = m.regs.b & 0x8000 != 0;
            m.interrupts.block_one_step();
        }
        4 => {
            let result = alu::sign_magnitude_to_twos_complement(m.regs.a);
            m.set_a(result);
        }
        5 => {
            if m.regs.ovf {
                *pc_inc = 2;
            }
            m.regs.ovf = false;
        }
        6 => skip_if(m.regs.a == 0, pc_inc),
        7 => skip_if(m.regs.a & 0x8000 != 0, pc_inc),
        8 => skip_if(m.regs.a & 0x8000 == 0, pc_inc),
        9 => skip_if(m.regs.b == 0, pc_inc),
        10 => skip_if(m.regs.b & 0x8000 != 0, pc_inc),
        11 => skip_if(m.regs.b & 0x8000 == 0, pc_inc),
        12 => {
            let a = m.regs.a;
            m.set_b(a);
        }
        13 => {
            let b = m.regs.b;
            m.set_a(b);
        }
        14 => {
            let (a, b) = (m.regs.a, m.regs.b);
            m.set_a(b);
            m.set_b(a);
        }
        15 => m.regs.x = m.regs.a,
        16 => {
            let x = m.regs.x;
            m.set_a(x);
        }
        17 => m.regs.ppr = m.regs.a,
        18 => {
            let ppr = m.regs.ppr;
            m.set_a(ppr);
        }
        19 => m.regs.xp = true,
        20 => m.regs.xp = false,
        21 => m.regs.x = m.regs.x.wrapping_add(1),
        22 => m.regs.x = m.regs.x.wrapping_sub(1),
        24 => {
            let result = m.regs.a.wrapping_shl(shift_count);
            m.set_a(result);
        }
        25 => {
            let result = ((m.regs.a as i16) >> shift_count) as u16;
            m.set_a(result);
        }
        26 => double_shift_left(m, shift_count),
        27 => double_shift_right(m, shift_count),
        28 => full_rotate_left(m, shift_count),
        29 => {
            let operand_addr = m.regs.pc.wrapping_add(1);
            let target = m.mem_read(operand_addr) & 0x7FFF;
            m.set_pc(target);
            *pc_inc = 0;
            m.dismiss_toi_if_pending(true);
        }
        30 => {
            m.interrupts.toi = true;
            m.interrupts.block_one_step();
        }
        _ => {
            tracing::trace!(subop, "undefined augmented-00 sub-op, treated as no-op");
        }
    }
}

fn skip_if(condition: bool, pc_inc: &mut u16) {
    if condition {
        *pc_inc = 2;
    }
}

/// Left shift of the 31-bit `A:B` double accumulator (A's 16 bits plus
/// B's low 15), holding B's sign bit fixed across the shift.
fn double_shift_left(m: &mut Machine, shift_count: u16) {
    let sign_b = m.regs.b & 0x8000;
    let combined = (u32::from(m.regs.a) << 15) | u32::from(m.regs.b & 0x7FFF);
    let shifted = combined.wrapping_shl(u32::from(shift_count)) & 0x7FFF_FFFF;
    m.set_a((shifted >> 15) as u16);
    m.set_b(sign_b | (shifted & 0x7FFF) as u16);
}

fn double_shift_right(m: &mut Machine, shift_count: u16) {
    let sign_b = m.regs.b & 0x8000;
    let combined = (i64::from(m.regs.a as i16) << 15) | i64::from(m.regs.b & 0x7FFF);
    let shifted = combined >> shift_count;
    m.set_a(((shifted >> 15) & 0xFFFF) as u16);
    m.set_b(sign_b | (shifted & 0x7FFF) as u16);
}

fn full_rotate_left(m: &mut Machine, shift_count: u16) {
    let combined = (u32::from(m.regs.a) << 16) | u32::from(m.regs.b);
    let rotated = combined.rotate_left(u32::from(shift_count));
    m.set_a((rotated >> 16) as u16);
    m.set_b((rotated & 0xFFFF) as u16);
}

pub(super) fn augmented_13(m: &mut Machine, ir: u16, pc_inc: &mut u16) {
    let subop = (ir >> 6) & 0x7;
    let unit = (ir & 0x3F) as u8;

    match subop {
        0 => io_command(m, unit, IoMode::Skip, pc_inc),
        1 => io_command(m, unit, IoMode::Wait, pc_inc),
        2 => {
            let mode = if ir & 0x0200 != 0 { IoMode::Wait } else { IoMode::Skip };
            io_test(m, unit, mode, pc_inc);
        }
        4 => {
            let bit = unit & 0xF;
            let clear = m.regs.sr & (1 << bit) == 0;
            skip_if(clear, pc_inc);
        }
        6 => {
            let group = usize::from((m.regs.a >> 12) & 0x7);
            let mask = m.regs.a & 0xFFF;
            if unit == 0 {
                m.interrupts.enabled[group] |= mask;
            } else {
                m.interrupts.enabled[group] &= !mask;
            }
            m.interrupts.block_one_step();
        }
        _ => {
            tracing::trace!(subop, "undefined augmented-13 sub-op, treated as no-op");
        }
    }
}

fn io_command(m: &mut Machine, unit: u8, mode: IoMode, pc_inc: &mut u16) {
    let cmd = m.regs.a;
    let timing = m.io_timing;
    let ctl = &m.io;
    let success = m.peripherals.with(unit, false, |p| {
        if io::arbitrate(mode, &timing, ctl, false, || p.command_ready()) {
            p.command(cmd)
        } else {
            false
        }
    });
    skip_if(mode == IoMode::Skip && success, pc_inc);
}

fn io_test(m: &mut Machine, unit: u8, mode: IoMode, pc_inc: &mut u16) {
    let cmd = m.regs.a;
    let timing = m.io_timing;
    let ctl = &m.io;
    let success = m.peripherals.with(unit, false, |p| {
        if io::arbitrate(mode, &timing, ctl, false, || p.test_ready(cmd)) {
            p.test(cmd)
        } else {
            false
        }
    });
    skip_if(mode == IoMode::Skip && success, pc_inc);
}

pub(super) fn augmented_17(m: &mut Machine, ir: u16, pc_inc: &mut u16) {
    let subop = (ir >> 6) & 0x7;
    let unit = (ir & 0x3F) as u8;
    let accumulate = ir & 0x0800 != 0;

    match subop {
        0 => io_aop(m, unit, IoMode::Skip, pc_inc),
        1 => io_aop(m, unit, IoMode::Wait, pc_inc),
        2 => io_aip(m, unit, IoMode::Skip, accumulate, pc_inc),
        3 => io_aip(m, unit, IoMode::Wait, accumulate, pc_inc),
        4 => io_mop(m, unit, IoMode::Skip, pc_inc),
        5 => io_mop(m, unit, IoMode::Wait, pc_inc),
        6 => io_mip(m, unit, IoMode::Skip, accumulate, pc_inc),
        7 => io_mip(m, unit, IoMode::Wait, accumulate, pc_inc),
        _ => unreachable!("3-bit sub-op field covers all 8 cases"),
    }
}

fn io_aop(m: &mut Machine, unit: u8, mode: IoMode, pc_inc: &mut u16) {
    let word = m.regs.a;
    let timing = m.io_timing;
    let ctl = &m.io;
    let success = m.peripherals.with(unit, false, |p| {
        if io::arbitrate(mode, &timing, ctl, true, || p.write_ready()) {
            p.write(word)
        } else {
            false
        }
    });
    skip_if(mode == IoMode::Skip && success, pc_inc);
}

fn io_aip(m: &mut Machine, unit: u8, mode: IoMode, accumulate: bool, pc_inc: &mut u16) {
    let timing = m.io_timing;
    let ctl = &m.io;
    let (success, word) = m.peripherals.with(unit, (false, 0u16), |p| {
        if io::arbitrate(mode, &timing, ctl, true, || p.read_ready()) {
            p.read()
        } else {
            (false, 0)
        }
    });
    if success {
        let result = if accumulate { m.regs.a.wrapping_add(word) } else { word };
        m.set_a(result);
        skip_if(mode == IoMode::Skip, pc_inc);
    }
}

/// MOP/MIP's effective address is not carried in `IR` itself (there is no
/// room left in the augmented-17 word): the core reads one extra
/// descriptor word immediately after `PC`, in the same X/I/M/displacement
/// shape as a memory-reference instruction, and consumes it as part of
/// `PC_inc`.
fn mop_mip_ea(m: &mut Machine) -> u16 {
    let descriptor_addr = m.regs.pc.wrapping_add(1);
    let descriptor = m.mem_read(descriptor_addr);
    compute_ea(m, descriptor)
}

fn io_mop(m: &mut Machine, unit: u8, mode: IoMode, pc_inc: &mut u16) {
    let ea = mop_mip_ea(m);
    let word = m.mem_read(ea);
    let timing = m.io_timing;
    let ctl = &m.io;
    let success = m.peripherals.with(unit, false, |p| {
        if io::arbitrate(mode, &timing, ctl, true, || p.write_ready()) {
            p.write(word)
        } else {
            false
        }
    });
    *pc_inc = 2 + u16::from(mode == IoMode::Skip && success);
}

fn io_mip(m: &mut Machine, unit: u8, mode: IoMode, accumulate: bool, pc_inc: &mut u16) {
    let ea = mop_mip_ea(m);
    let timing = m.io_timing;
    let ctl = &m.io;
    let (success, word) = m.peripherals.with(unit, (false, 0u16), |p| {
        if io::arbitrate(mode, &timing, ctl, true, || p.read_ready()) {
            p.read()
        } else {
            (false, 0)
        }
    });
    let mut inc = 2;
    if success {
        let current = m.mem_read(ea);
        let result = if accumulate { current.wrapping_add(word) } else { word };
        m.mem_write(ea, result);
        if mode == IoMode::Skip {
            inc = 3;
        }
    }
    *pc_inc = inc;
}

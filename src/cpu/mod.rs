//! Instruction decode, effective-address computation, and the per-step
//! driver (spec §4.2).

pub mod alu;
pub mod execute;
pub mod mnemonic;

use crate::machine::Machine;

/// Decode the opcode class out of bits 15-12 of an instruction word.
#[must_use]
pub const fn opcode(ir: u16) -> u16 {
    (ir >> 12) & 0xF
}

/// Effective-address computation for a memory-reference-shaped word: `X`
/// in bit 11, `I` in bit 10, `M` in bit 9, a 9-bit displacement in bits
/// 8-0. Shared by the memory-reference opcode table and by MOP/MIP, which
/// read their descriptor word from the instruction stream rather than
/// from `IR` itself.
pub(crate) fn compute_ea(m: &mut Machine, word: u16) -> u16 {
    let indexed = word & 0x0800 != 0;
    let indirect = word & 0x0400 != 0;
    let page_relative = word & 0x0200 != 0;
    let disp = word & 0x01FF;

    let mut ea = if page_relative {
        disp | (m.regs.pc & 0x7E00)
    } else if !indexed {
        disp | (m.regs.vbr & 0x7E00)
    } else {
        disp
    };
    if indexed {
        ea = ea.wrapping_add(index_register(m));
    }

    let mut chasing = indirect;
    while chasing {
        let fetched = m.mem_read(ea);
        let next_indexed = fetched & 0x8000 != 0;
        let next_indirect = fetched & 0x4000 != 0;
        let mut next_ea = (m.regs.pc & 0x4000) | (fetched & 0x3FFF);
        if next_indexed {
            next_ea = next_ea.wrapping_add(index_register(m));
        }
        ea = next_ea;
        chasing = next_indirect;
    }
    ea
}

fn index_register(m: &Machine) -> u16 {
    if m.regs.xp { m.regs.x } else { m.regs.b }
}

/// `true` for the augmented-00 CSB sub-op (bits 5-0 == 3): the only
/// instruction that *sets* `CF` (spec §9 "Carry flag oddity"). Its own
/// step must not immediately clear the flag it just computed.
const fn is_csb(op: u16, ir: u16) -> bool {
    op == 0 && (ir & 0x3F) == 3
}

/// Execute the instruction already latched in `IR`, apply `PC_inc`, clear
/// `CF` unless the opcode was MPY or CSB, prefetch the next `IR`, and run
/// one interrupt-engine step. This is the full per-instruction data flow
/// described in spec §2.
pub(crate) fn execute_one(m: &mut Machine) {
    let ir = m.regs.ir;
    let op = opcode(ir);
    let mut pc_inc: u16 = 1;

    match op {
        0 => execute::augmented_00(m, ir, &mut pc_inc),
        11 => execute::augmented_13(m, ir, &mut pc_inc),
        15 => execute::augmented_17(m, ir, &mut pc_inc),
        _ => execute::memory_reference(m, op, ir, &mut pc_inc),
    }

    if op != 7 && !is_csb(op, ir) {
        m.regs.cf = false;
    }
    m.set_pc(m.regs.pc.wrapping_add(pc_inc));
    m.prefetch();
    m.poll_interrupts();
}

//! Generic state-query surface for the debugger facility (spec §1), used
//! by point lookups ("what's in B right now?") without committing the
//! core to any particular serialization shape — that's [`crate::mirror`]'s
//! job. Grounded in `emu-core::observable::{Observable, Value}`.

/// A dynamically-typed value returned by an [`Observable`] query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
}

/// Implemented by state-holding structs that want to expose named fields
/// to a debugger without the caller needing a concrete type per field.
pub trait Observable {
    /// The field names this implementor answers `observe` for.
    fn fields(&self) -> &'static [&'static str];

    /// Look up one field by name. `None` for an unrecognized name, never
    /// a panic — the debugger's field list may be stale relative to a
    /// newer build.
    fn observe(&self, field: &str) -> Option<Value>;
}

impl Observable for crate::registers::Registers {
    fn fields(&self) -> &'static [&'static str] {
        &["a", "b", "x", "pc", "ir", "t", "sr", "vbr", "ppr", "cf", "xp", "ovf"]
    }

    fn observe(&self, field: &str) -> Option<Value> {
        Some(match field {
            "a" => Value::U16(self.a),
            "b" => Value::U16(self.b),
            "x" => Value::U16(self.x),
            "pc" => Value::U16(self.pc),
            "ir" => Value::U16(self.ir),
            "t" => Value::U16(self.t),
            "sr" => Value::U16(self.sr),
            "vbr" => Value::U16(self.vbr),
            "ppr" => Value::U16(self.ppr),
            "cf" => Value::Bool(self.cf),
            "xp" => Value::Bool(self.xp),
            "ovf" => Value::Bool(self.ovf),
            _ => return None,
        })
    }
}

impl Observable for crate::interrupt::InterruptEngine {
    fn fields(&self) -> &'static [&'static str] {
        &["int_group", "int_level", "int_blocked", "toi"]
    }

    fn observe(&self, field: &str) -> Option<Value> {
        Some(match field {
            "int_group" => Value::U8(self.int_group),
            "int_level" => Value::U8(self.int_level),
            "int_blocked" => Value::Bool(self.int_blocked),
            "toi" => Value::Bool(self.toi),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptEngine;
    use crate::registers::Registers;

    #[test]
    fn observes_known_register_fields() {
        let mut regs = Registers::new();
        regs.a = 0x1234;
        regs.cf = true;
        assert_eq!(regs.observe("a"), Some(Value::U16(0x1234)));
        assert_eq!(regs.observe("cf"), Some(Value::Bool(true)));
    }

    #[test]
    fn unknown_field_returns_none() {
        let regs = Registers::new();
        assert_eq!(regs.observe("nonexistent"), None);
    }

    #[test]
    fn observes_interrupt_group_sentinel() {
        let engine = InterruptEngine::new();
        assert_eq!(engine.observe("int_group"), Some(Value::U8(crate::interrupt::NO_GROUP)));
    }
}

//! Peripheral capability set and the attached-device table (spec §6).
//!
//! Every attached device — teletype, paper-tape reader/punch, a
//! TCP-attached transport — implements the same fixed surface. The core
//! never depends on a concrete device; it only ever holds `dyn
//! Peripheral`s behind the table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::interrupt::IntLines;

/// Highest valid peripheral unit id.
pub const MAX_UNIT: u8 = 63;

/// Capability set implemented by every attached device (spec §6).
pub trait Peripheral: Send {
    fn test_ready(&self, cmd: u16) -> bool;
    fn test(&mut self, cmd: u16) -> bool;

    fn command_ready(&self) -> bool;
    fn command(&mut self, cmd: u16) -> bool;

    fn read_ready(&self) -> bool;
    fn read(&mut self) -> (bool, u16);

    fn write_ready(&self) -> bool;
    fn write(&mut self, word: u16) -> bool;

    /// `None` if the device never interrupts.
    fn interrupts(&self) -> Option<IntLines>;

    /// Release all resources held by the device. Called exactly once, on
    /// detach or teardown.
    fn exit(&mut self);
}

/// Failure to attach a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// Unit ids run 0-63 (spec §3); anything past that is a caller bug,
    /// not a hardware condition, so it is rejected rather than silently
    /// dropped.
    UnitOutOfRange(u8),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnitOutOfRange(unit) => {
                write!(f, "peripheral unit {unit} is out of range (0-{MAX_UNIT})")
            }
        }
    }
}

impl std::error::Error for AttachError {}

/// The indexed sparse map from unit id to peripheral handle, behind a
/// single coarse lock (spec §5: "table entries are swapped wholesale on
/// attach/detach").
#[derive(Default)]
pub struct PeripheralTable {
    units: Mutex<HashMap<u8, Box<dyn Peripheral>>>,
}

impl PeripheralTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Attach `device` at `unit`, replacing and releasing any previous
    /// occupant of that slot exactly once.
    pub fn attach(&self, unit: u8, device: Box<dyn Peripheral>) -> Result<(), AttachError> {
        if unit > MAX_UNIT {
            return Err(AttachError::UnitOutOfRange(unit));
        }
        let mut units = self.units.lock().expect("peripheral table lock poisoned");
        if let Some(mut old) = units.insert(unit, device) {
            old.exit();
        }
        Ok(())
    }

    /// Detach the device at `unit`, if any, releasing it exactly once.
    pub fn detach(&self, unit: u8) {
        let mut units = self.units.lock().expect("peripheral table lock poisoned");
        if let Some(mut old) = units.remove(&unit) {
            old.exit();
        }
    }

    /// Run `f` against the peripheral at `unit` while holding the table
    /// lock for the duration of the call, returning `default` if no
    /// peripheral is attached there (spec §7a: invalid peripheral
    /// reference is a silent no-op, never a crash).
    pub fn with<T>(&self, unit: u8, default: T, f: impl FnOnce(&mut dyn Peripheral) -> T) -> T {
        let mut units = self.units.lock().expect("peripheral table lock poisoned");
        match units.get_mut(&unit) {
            Some(device) => f(device.as_mut()),
            None => default,
        }
    }

    /// Snapshot every attached device's interrupt line, for the interrupt
    /// engine to aggregate. Skips devices that never interrupt.
    #[must_use]
    pub fn collect_interrupt_lines(&self) -> Vec<IntLines> {
        let units = self.units.lock().expect("peripheral table lock poisoned");
        units.values().filter_map(|d| d.interrupts()).collect()
    }

    /// Release every attached device exactly once, for teardown.
    pub fn exit_all(&self) {
        let mut units = self.units.lock().expect("peripheral table lock poisoned");
        for device in units.values_mut() {
            device.exit();
        }
        units.clear();
    }
}

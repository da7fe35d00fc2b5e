//! I/O arbitration: SKIP/WAIT semantics over device readiness, including
//! the IOHOLD stall (spec §4.3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// SKIP returns immediately with a boolean; WAIT blocks until ready,
/// possibly via IOHOLD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    Skip,
    Wait,
}

/// The real-time constants from spec §4.3, pulled out of the arbitration
/// code so a host can run at hardware-accurate timing while this crate's
/// own tests run at a scaled-down, still-exercising-the-same-state-machine
/// timing.
#[derive(Debug, Clone, Copy)]
pub struct IoTiming {
    /// How long to spin-poll before entering IOHOLD.
    pub indicator_lag: Duration,
    /// Poll interval while spinning before IOHOLD.
    pub poll_wait: Duration,
    /// IOHOLD poll interval for AOP/AIP/MOP/MIP (read/write flavors).
    pub poll_hold_rw: Duration,
    /// IOHOLD poll interval for CEU/TEU (command/test flavors).
    pub poll_hold_other: Duration,
}

impl Default for IoTiming {
    fn default() -> Self {
        Self {
            indicator_lag: Duration::from_millis(200),
            poll_wait: Duration::from_millis(10),
            poll_hold_rw: Duration::from_millis(20),
            poll_hold_other: Duration::from_millis(50),
        }
    }
}

/// Shared, cross-flow stall signaling: `io_hold` is advertised to the
/// front panel while the executor is stalled; `release_requested` lets an
/// external caller abandon the current wait (spec §5 "Cancellation").
#[derive(Default)]
pub struct IoControl {
    io_hold: AtomicBool,
    release_requested: AtomicBool,
}

impl IoControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.io_hold.load(Ordering::Acquire)
    }

    /// Abandon the current IOHOLD wait, if any; the in-flight I/O call
    /// re-checks readiness once more and then proceeds regardless.
    pub fn release(&self) {
        self.release_requested.store(true, Ordering::Release);
    }

    fn take_release_request(&self) -> bool {
        self.release_requested.swap(false, Ordering::AcqRel)
    }

    fn set_hold(&self, held: bool) {
        self.io_hold.store(held, Ordering::Release);
    }
}

/// Run the SKIP/WAIT/IOHOLD state machine against a readiness predicate,
/// returning `true` once the device is ready (or ready enough to proceed
/// after a forced release), `false` if SKIP found it not ready.
///
/// `is_rw` selects the IOHOLD poll interval (20ms for read/write flavors,
/// 50ms for command/test flavors per spec §4.3).
pub fn arbitrate(
    mode: IoMode,
    timing: &IoTiming,
    ctl: &IoControl,
    is_rw: bool,
    mut ready: impl FnMut() -> bool,
) -> bool {
    if ready() {
        return true;
    }
    if mode == IoMode::Skip {
        return false;
    }

    let start = Instant::now();
    while start.elapsed() < timing.indicator_lag {
        thread::sleep(timing.poll_wait);
        if ready() {
            return true;
        }
    }

    tracing::warn!("IOHOLD entered");
    ctl.set_hold(true);
    let poll_interval = if is_rw {
        timing.poll_hold_rw
    } else {
        timing.poll_hold_other
    };
    let result = loop {
        if ready() {
            break true;
        }
        if ctl.take_release_request() {
            break ready();
        }
        thread::sleep(poll_interval);
    };
    ctl.set_hold(false);
    tracing::warn!(ready = result, "IOHOLD cleared");
    result
}

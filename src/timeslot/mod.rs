//! Timeslot session, arbitration, and signal delivery.
//!
//! The application opens a session with a [`TimeslotHandler`], submits
//! [`Request`]s, and receives [`Signal`]s when slots start, when its
//! peripherals interrupt, and when requests are blocked or cancelled. While
//! a slot is active the application has exclusive access to the radio,
//! the free-running timer, and the crypto/address-resolution peripherals;
//! outside it the built-in stack owns them.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::clock::ClockControl;
use crate::demand::InternalDemand;

pub(crate) mod dispatch;
pub(crate) mod scheduler;
pub(crate) mod types;
pub(crate) mod validate;

pub use dispatch::TimeslotHandler;
pub use scheduler::{Grant, TimeslotScheduler};
pub use types::{
    Error, HfclkConfig, Priority, RejectReason, Request, SessionState, Signal, SignalAction,
};

// Documented timing limits. These are contract values, not tunables.

/// The shortest allowed timeslot, in microseconds.
pub const LENGTH_MIN_US: u32 = 100;

/// The longest allowed timeslot, in microseconds.
pub const LENGTH_MAX_US: u32 = 100_000;

/// The longest allowed distance for a [`Request::Normal`], in microseconds.
pub const DISTANCE_MAX_US: u32 = 128_000_000 - 1;

/// The longest allowed timeout for a [`Request::Earliest`], in microseconds.
pub const EARLIEST_TIMEOUT_MAX_US: u32 = 128_000_000 - 1;

/// Maximum deviation of the hardware slot start from the nominal requested
/// start, in microseconds (plus or minus).
pub const START_JITTER_US: u32 = 2;

/// The minimum allowed slot extension, in microseconds.
pub const EXTENSION_TIME_MIN_US: u32 = 200;

/// Maximum processing time for the owner's extension decision, in
/// microseconds.
pub const EXTENSION_PROCESSING_TIME_MAX_US: u32 = 17;

/// Latest point before the slot end at which an extension may still be
/// requested, in microseconds.
pub const EXTENSION_MARGIN_MIN_US: u32 = 79;

/// Interrupt-safe handle to a [`TimeslotScheduler`].
///
/// The scheduler itself is single-context; the port's high-priority
/// (RADIO/TIMER0) and low-priority (deferred notification) handlers both
/// funnel through this mutex so all transitions stay serialized.
pub struct SharedScheduler<'a, D: InternalDemand, C: ClockControl> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<TimeslotScheduler<'a, D, C>>>,
}

impl<'a, D: InternalDemand, C: ClockControl> SharedScheduler<'a, D, C> {
    pub const fn new(scheduler: TimeslotScheduler<'a, D, C>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(scheduler)),
        }
    }

    /// Run `f` with exclusive access to the scheduler.
    pub fn with<R>(&self, f: impl FnOnce(&mut TimeslotScheduler<'a, D, C>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

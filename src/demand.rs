//! Competing internal radio demand.
//!
//! The built-in protocol stack has its own periodic radio time needs. The
//! scheduler treats them as a first-class competitor: granted timeslots are
//! placed into the gaps between the stack's reserved windows, never on top
//! of them.

use crate::timeslot::Priority;

/// One reserved radio window of the built-in stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReservedWindow {
    /// Window start, free-running timer microseconds.
    pub start_us: u64,
    /// Window length in microseconds.
    pub length_us: u32,
    /// Arbitration priority of this window.
    pub priority: Priority,
}

impl ReservedWindow {
    /// One past the last microsecond of the window.
    pub fn end_us(&self) -> u64 {
        self.start_us + self.length_us as u64
    }

    /// Whether the window overlaps the half-open interval `[start, end)`.
    pub(crate) fn overlaps(&self, start_us: u64, end_us: u64) -> bool {
        self.start_us < end_us && start_us < self.end_us()
    }
}

/// Query interface for the built-in stack's reserved radio windows.
///
/// A pure query with no side effects, used only for conflict computation.
pub trait InternalDemand {
    /// The first reserved window that ends strictly after `after_us`.
    ///
    /// A window already in progress at `after_us` must be returned.
    /// Implementations must never return a window ending at or before
    /// `after_us`; the scheduler's gap search relies on that to terminate.
    fn next_reserved_window(&self, after_us: u64) -> Option<ReservedWindow>;
}

/// No internal demand: the radio is free whenever the application wants it.
pub struct NoDemand;

impl InternalDemand for NoDemand {
    fn next_reserved_window(&self, _after_us: u64) -> Option<ReservedWindow> {
        None
    }
}

/// Periodic reservation model of the built-in stack.
///
/// Stands in for the link layer's connection-event cadence: one window of
/// `length_us` every `interval_us`, anchored at `anchor_us`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeriodicDemand {
    anchor_us: u64,
    interval_us: u32,
    length_us: u32,
    priority: Priority,
}

impl PeriodicDemand {
    /// `interval_us` must be non-zero and at least `length_us`.
    pub const fn new(anchor_us: u64, interval_us: u32, length_us: u32, priority: Priority) -> Self {
        core::assert!(interval_us > 0 && interval_us >= length_us);
        Self {
            anchor_us,
            interval_us,
            length_us,
            priority,
        }
    }
}

impl InternalDemand for PeriodicDemand {
    fn next_reserved_window(&self, after_us: u64) -> Option<ReservedWindow> {
        let length = self.length_us as u64;
        let interval = self.interval_us as u64;
        let index = if after_us < self.anchor_us + length {
            0
        } else {
            (after_us - self.anchor_us - length) / interval + 1
        };
        Some(ReservedWindow {
            start_us: self.anchor_us + index * interval,
            length_us: self.length_us,
            priority: self.priority,
        })
    }
}

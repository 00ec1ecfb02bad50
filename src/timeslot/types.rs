//! Timeslot request, signal, action, and error types.

/// High-frequency clock guarantee requested for a timeslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HfclkConfig {
    /// The crystal is guaranteed for the whole duration of the timeslot.
    ///
    /// Preferred for slots that use the radio or need high timing accuracy.
    /// The crystal is requested at grant admission and released at grant end.
    XtalGuaranteed,
    /// No guarantee: the RC oscillator may be the clock source for part or
    /// all of the slot. Allows earlier and tighter scheduling, but the owner
    /// must itself ensure the crystal is running and stable before relying
    /// on radio transmission accuracy.
    NoGuarantee,
}

/// Timeslot arbitration priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    High,
    Normal,
}

/// A request for future radio access.
///
/// Never mutated once submitted; a new request replaces rather than edits.
/// The first request of a session must be [`Request::Earliest`] since there
/// is no previous slot to measure a distance from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Request a timeslot as early as possible within `timeout_us`.
    Earliest {
        hfclk: HfclkConfig,
        priority: Priority,
        /// Slot length, `LENGTH_MIN_US..=LENGTH_MAX_US`.
        length_us: u32,
        /// Longest acceptable delay until slot start, up to
        /// `EARLIEST_TIMEOUT_MAX_US`.
        timeout_us: u32,
    },
    /// Request a timeslot at a fixed distance from the previous one.
    Normal {
        hfclk: HfclkConfig,
        priority: Priority,
        /// Distance from the start of the previous timeslot, up to
        /// `DISTANCE_MAX_US`.
        distance_us: u32,
        /// Slot length, `LENGTH_MIN_US..=LENGTH_MAX_US`.
        length_us: u32,
    },
}

impl Request {
    pub fn length_us(&self) -> u32 {
        match *self {
            Request::Earliest { length_us, .. } | Request::Normal { length_us, .. } => length_us,
        }
    }

    pub fn hfclk(&self) -> HfclkConfig {
        match *self {
            Request::Earliest { hfclk, .. } | Request::Normal { hfclk, .. } => hfclk,
        }
    }

    pub fn priority(&self) -> Priority {
        match *self {
            Request::Earliest { priority, .. } | Request::Normal { priority, .. } => priority,
        }
    }
}

/// Signals delivered to the session owner.
///
/// `Start`, `Timer0`, `Radio` and the two extension outcomes are dispatched
/// synchronously in the triggering interrupt context. `Blocked` and
/// `SessionIdle` are deferred to the low-priority tier and delivered from
/// [`process_low_prio`](super::TimeslotScheduler::process_low_prio).
/// `Cancelled` is dispatched synchronously during session close, before the
/// handler is dropped. `InvalidReturn` follows the signal whose return value
/// was invalid, in the same execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    /// The timeslot has started. The owner now has the radio hardware.
    Start,
    /// TIMER0 interrupt inside an active slot.
    Timer0,
    /// RADIO interrupt inside an active slot.
    Radio,
    /// The requested extension was not applied.
    ExtendFailed,
    /// The requested extension was applied; the grant is longer now.
    ExtendSucceeded,
    /// No conflict-free window existed for the previous request.
    Blocked,
    /// The previous request was cancelled (session closed while pending).
    Cancelled,
    /// The session has no active grant and no pending request.
    SessionIdle,
    /// The previous signal's return value was invalid; if a grant was
    /// active it has been force-ended.
    InvalidReturn,
}

/// Action returned by the session owner from a signal callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalAction {
    /// Return without action.
    None,
    /// Extend the current slot by `length_us` (at least
    /// `EXTENSION_TIME_MIN_US`). Only valid from within an active slot, at
    /// least `EXTENSION_MARGIN_MIN_US` before its end.
    Extend { length_us: u32 },
    /// End the current slot. Only valid from within an active slot.
    End,
    /// Request the next timeslot. From within an active slot this ends the
    /// current slot first; an embedded `Earliest` request is not permitted
    /// there.
    Request(Request),
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No session is open.
    Closed,
    /// Session open, no request outstanding.
    Idle,
    /// A request was admitted; its grant has not started yet.
    Pending,
    /// A grant is running; the owner holds the radio hardware.
    Active,
}

/// Reason a request was rejected at submission. No state is changed by a
/// rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectReason {
    /// A timing field is outside its documented limits.
    OutOfRange,
    /// A `Normal` request was submitted with no prior grant in the session.
    MustBeEarliestFirst,
    /// The session is not idle: closed, or a request is already outstanding.
    Busy,
}

/// Errors returned by the session boundary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// `session_open` while a session is already open.
    AlreadyOpen,
    /// `session_close` while no session is open.
    AlreadyClosed,
    /// The request failed validation.
    Rejected(RejectReason),
}

impl From<RejectReason> for Error {
    fn from(reason: RejectReason) -> Self {
        Self::Rejected(reason)
    }
}

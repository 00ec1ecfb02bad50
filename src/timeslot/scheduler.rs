//! Core timeslot arbitration state machine.
//!
//! Owns the single session, the single pending request slot, and the active
//! grant. All transitions run on one logical execution context shared with
//! the hardware interrupt handlers; the port serializes access (see
//! [`SharedScheduler`](super::SharedScheduler)) and feeds in abstract
//! hardware events plus the current free-running timer value.

use crate::clock::ClockControl;
use crate::demand::InternalDemand;

use super::dispatch::{Dispatcher, TimeslotHandler};
use super::types::{
    Error, HfclkConfig, Priority, RejectReason, Request, SessionState, Signal, SignalAction,
};
use super::validate::validate;
use super::{EXTENSION_MARGIN_MIN_US, EXTENSION_TIME_MIN_US, START_JITTER_US};

/// An admitted timeslot: the hardware-owned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Grant {
    /// Nominal start, free-running timer microseconds. The hardware start
    /// deviates from this by at most [`START_JITTER_US`].
    pub start_us: u64,
    /// Current length. Grows on successful extension, never shrinks.
    pub length_us: u32,
    pub hfclk: HfclkConfig,
    pub priority: Priority,
}

impl Grant {
    /// One past the last microsecond of the slot.
    pub fn end_us(&self) -> u64 {
        self.start_us + self.length_us as u64
    }
}

/// The timeslot arbiter.
///
/// Exactly one session can be open at a time, holding at most one
/// outstanding request. `D` models the built-in stack's competing radio
/// demand, `C` the precision clock arbitration.
pub struct TimeslotScheduler<'a, D: InternalDemand, C: ClockControl> {
    state: SessionState,
    dispatcher: Dispatcher<'a>,
    /// Capacity-one request slot: the admitted grant waiting to start.
    scheduled: Option<Grant>,
    active: Option<Grant>,
    /// Start of the most recent grant; anchor for `Normal` distances.
    last_grant_start: Option<u64>,
    idle_notified: bool,
    demand: D,
    clock: C,
}

impl<'a, D: InternalDemand, C: ClockControl> TimeslotScheduler<'a, D, C> {
    pub fn new(demand: D, clock: C) -> Self {
        Self {
            state: SessionState::Closed,
            dispatcher: Dispatcher::new(),
            scheduled: None,
            active: None,
            last_grant_start: None,
            idle_notified: true,
            demand,
            clock,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The running grant, if any.
    pub fn active_grant(&self) -> Option<&Grant> {
        self.active.as_ref()
    }

    /// The admitted grant waiting to start, if any.
    pub fn scheduled_grant(&self) -> Option<&Grant> {
        self.scheduled.as_ref()
    }

    /// Next instant the port must arm the free-running timer for: the
    /// scheduled start while `Pending`, the grant end while `Active`.
    pub fn next_deadline(&self) -> Option<u64> {
        match self.state {
            SessionState::Pending => self.scheduled.map(|g| g.start_us),
            SessionState::Active => self.active.map(|g| g.end_us()),
            _ => None,
        }
    }

    /// Clock source manager access, for forwarding port clock events.
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Internal demand model access.
    pub fn demand_mut(&mut self) -> &mut D {
        &mut self.demand
    }

    /// Open a session for timeslot requests. Only one can be open at a time.
    pub fn session_open(&mut self, handler: &'a mut dyn TimeslotHandler) -> Result<(), Error> {
        if self.state != SessionState::Closed {
            return Err(Error::AlreadyOpen);
        }
        self.dispatcher.register(handler);
        self.last_grant_start = None;
        self.idle_notified = true;
        self.state = SessionState::Idle;
        debug!("timeslot session opened");
        Ok(())
    }

    /// Close the session.
    ///
    /// An active grant is force-ended synchronously with no signal beyond
    /// the close itself; a scheduled grant is cancelled with
    /// [`Signal::Cancelled`] delivered before the handler is dropped.
    pub fn session_close(&mut self) -> Result<(), Error> {
        match self.state {
            SessionState::Closed => return Err(Error::AlreadyClosed),
            SessionState::Active => {
                if let Some(grant) = self.active.take() {
                    self.release_clock_for(grant.hfclk);
                    debug!("grant force-ended by session close");
                }
            }
            SessionState::Pending => {
                if let Some(grant) = self.scheduled.take() {
                    self.release_clock_for(grant.hfclk);
                }
                // The session is going away; any response is moot.
                let _ = self.dispatcher.dispatch(Signal::Cancelled);
            }
            SessionState::Idle => {}
        }
        self.dispatcher.unregister();
        self.state = SessionState::Closed;
        info!("timeslot session closed");
        Ok(())
    }

    /// Submit a request for a future timeslot.
    ///
    /// Validation failures are returned synchronously with no state change.
    /// An admitted request moves the session to `Pending`; if no
    /// conflict-free window exists, [`Signal::Blocked`] is delivered through
    /// the low-priority tier and the session returns to `Idle`. Until those
    /// notifications are drained the session counts as busy and further
    /// submissions are rejected.
    pub fn request(&mut self, request: Request, now_us: u64) -> Result<(), Error> {
        validate(&request, self.state, self.last_grant_start.is_some())?;
        if self.dispatcher.has_pending() {
            return Err(RejectReason::Busy.into());
        }
        self.evaluate(request, now_us);
        self.note_idle();
        Ok(())
    }

    /// TIMER0 interrupt: starts a due grant, expires a finished one, or
    /// forwards the interrupt to the owner mid-slot.
    pub fn on_timer0_irq(&mut self, now_us: u64) {
        match self.state {
            SessionState::Pending => {
                let due = self
                    .scheduled
                    .map_or(false, |g| now_us + START_JITTER_US as u64 >= g.start_us);
                if due {
                    self.start_grant(now_us);
                }
            }
            SessionState::Active => {
                let expired = self.active.map_or(false, |g| now_us >= g.end_us());
                if expired {
                    trace!("grant expired at {}", now_us);
                    self.end_active_grant();
                } else {
                    let action = self.dispatcher.dispatch(Signal::Timer0);
                    self.apply_action(action, now_us);
                }
            }
            _ => trace!("timer0 irq with nothing scheduled"),
        }
        self.note_idle();
    }

    /// RADIO interrupt: forwarded to the owner mid-slot, ignored otherwise.
    pub fn on_radio_irq(&mut self, now_us: u64) {
        if self.state == SessionState::Active {
            let action = self.dispatcher.dispatch(Signal::Radio);
            self.apply_action(action, now_us);
            self.note_idle();
        } else {
            // The owner cannot hold the radio without an active grant, so
            // this is unreachable in a correct port; tolerate it.
            trace!("radio irq with no active grant");
        }
    }

    /// Drain deferred session-level notifications.
    ///
    /// Called by the port outside the interrupt path (software interrupt or
    /// thread level). Each deferred signal is delivered exactly once, in the
    /// order its triggering event occurred.
    pub fn process_low_prio(&mut self, now_us: u64) {
        while let Some(signal) = self.dispatcher.pop_deferred() {
            let action = self.dispatcher.dispatch(signal);
            self.apply_action(action, now_us);
        }
        self.note_idle();
    }

    /// Evaluate the global timing graph for a validated request: this
    /// request's window against the internal stack's reserved windows and
    /// the clock-readiness constraint.
    fn evaluate(&mut self, request: Request, now_us: u64) {
        self.idle_notified = false;

        let needs_xtal = request.hfclk() == HfclkConfig::XtalGuaranteed;
        if needs_xtal && !self.clock.request_precision() {
            self.clock.release_precision();
            warn!("request blocked: precision clock not ready");
            self.block();
            return;
        }

        let length_us = request.length_us();
        let start_us = match request {
            Request::Earliest { timeout_us, .. } => {
                self.find_gap(now_us, now_us.saturating_add(timeout_us as u64), length_us)
            }
            Request::Normal { distance_us, .. } => {
                let Some(previous_start) = self.last_grant_start else {
                    // Validation admits Normal only after a prior grant.
                    panic!("normal request without prior grant");
                };
                let nominal = previous_start + distance_us as u64;
                let free = !self.overlaps_reserved(nominal, nominal + length_us as u64);
                (nominal >= now_us && free).then_some(nominal)
            }
        };

        match start_us {
            Some(start_us) => {
                self.scheduled = Some(Grant {
                    start_us,
                    length_us,
                    hfclk: request.hfclk(),
                    priority: request.priority(),
                });
                self.state = SessionState::Pending;
                trace!("grant scheduled: start={} len={}", start_us, length_us);
            }
            None => {
                if needs_xtal {
                    self.clock.release_precision();
                }
                warn!("request blocked: no conflict-free window");
                self.block();
            }
        }
    }

    fn block(&mut self) {
        self.dispatcher.defer(Signal::Blocked);
        self.state = SessionState::Idle;
    }

    /// First conflict-free start in `[earliest, latest]` for a slot of
    /// `length_us`, skipping past the internal stack's reserved windows.
    /// Competition at equal priority resolves into the next free gap rather
    /// than preemption; granted slots never overlap reserved windows.
    fn find_gap(&self, earliest_us: u64, latest_start_us: u64, length_us: u32) -> Option<u64> {
        let mut start_us = earliest_us;
        while start_us <= latest_start_us {
            match self.demand.next_reserved_window(start_us) {
                Some(w) if w.overlaps(start_us, start_us + length_us as u64) => {
                    start_us = w.end_us();
                }
                _ => return Some(start_us),
            }
        }
        None
    }

    /// Whether `[start, end)` overlaps any reserved window. Windows are
    /// time-ordered, so only the first one ending after `start` matters.
    fn overlaps_reserved(&self, start_us: u64, end_us: u64) -> bool {
        self.demand
            .next_reserved_window(start_us)
            .is_some_and(|w| w.overlaps(start_us, end_us))
    }

    fn start_grant(&mut self, now_us: u64) {
        let Some(grant) = self.scheduled.take() else {
            panic!("pending state without a scheduled grant");
        };
        if self.active.is_some() {
            // A double grant would corrupt shared hardware state; halt
            // rather than continue with a violated timing invariant.
            panic!("grant start while another grant is active");
        }
        if now_us > grant.start_us + START_JITTER_US as u64 {
            warn!("late grant start: nominal={} actual={}", grant.start_us, now_us);
        }
        self.last_grant_start = Some(grant.start_us);
        self.active = Some(grant);
        self.state = SessionState::Active;
        trace!("grant started: start={} len={}", grant.start_us, grant.length_us);

        let action = self.dispatcher.dispatch(Signal::Start);
        self.apply_action(action, now_us);
    }

    fn end_active_grant(&mut self) {
        if let Some(grant) = self.active.take() {
            self.release_clock_for(grant.hfclk);
        }
        self.state = SessionState::Idle;
    }

    fn release_clock_for(&mut self, hfclk: HfclkConfig) {
        if hfclk == HfclkConfig::XtalGuaranteed {
            self.clock.release_precision();
        }
    }

    /// Interpret an owner response. Extension outcomes and invalid-return
    /// recovery dispatch follow-up signals synchronously in the same pass,
    /// so this loops until the owner returns a terminal action.
    fn apply_action(&mut self, mut action: Option<SignalAction>, now_us: u64) {
        loop {
            let Some(current) = action else { return };
            match current {
                SignalAction::None => return,
                SignalAction::End => {
                    if self.state != SessionState::Active {
                        action = self.invalid_return();
                        continue;
                    }
                    trace!("grant ended by owner");
                    self.end_active_grant();
                    return;
                }
                SignalAction::Extend { length_us } => {
                    if self.state != SessionState::Active {
                        action = self.invalid_return();
                        continue;
                    }
                    action = self.extend(length_us, now_us);
                }
                SignalAction::Request(next) => {
                    let Some(next_action) = self.request_from_signal(next, now_us) else {
                        return;
                    };
                    action = next_action;
                }
            }
        }
    }

    /// Apply an extension to the active grant, or refuse it. The outcome
    /// signal is dispatched synchronously within the same signal-handling
    /// pass, never as a separate later callback.
    fn extend(&mut self, length_us: u32, now_us: u64) -> Option<SignalAction> {
        let accepted = match self.active.as_ref() {
            Some(grant) => {
                let end_us = grant.end_us();
                length_us >= EXTENSION_TIME_MIN_US
                    && end_us >= now_us + EXTENSION_MARGIN_MIN_US as u64
                    && !self.overlaps_reserved(end_us, end_us + length_us as u64)
            }
            None => false,
        };
        if accepted {
            if let Some(grant) = self.active.as_mut() {
                grant.length_us = grant.length_us.saturating_add(length_us);
                trace!("grant extended by {}", length_us);
            }
            self.dispatcher.dispatch(Signal::ExtendSucceeded)
        } else {
            warn!("extension refused: len={}", length_us);
            self.dispatcher.dispatch(Signal::ExtendFailed)
        }
    }

    /// Handle `SignalAction::Request`. Returns a follow-up owner response
    /// when the embedded request was invalid, `None` when it was consumed.
    fn request_from_signal(
        &mut self,
        next: Request,
        now_us: u64,
    ) -> Option<Option<SignalAction>> {
        if self.state == SessionState::Active {
            // An earliest-type request is not permitted from within a slot.
            if matches!(next, Request::Earliest { .. }) {
                return Some(self.invalid_return());
            }
            if validate(&next, SessionState::Idle, self.last_grant_start.is_some()).is_err() {
                return Some(self.invalid_return());
            }
            // Requesting from within a slot closes the current slot.
            self.end_active_grant();
            self.evaluate(next, now_us);
            None
        } else {
            match validate(&next, self.state, self.last_grant_start.is_some()) {
                Ok(()) => {
                    self.evaluate(next, now_us);
                    None
                }
                Err(_) => Some(self.invalid_return()),
            }
        }
    }

    /// Invalid owner response: force-end any active grant, then deliver
    /// [`Signal::InvalidReturn`] in the same execution context. Repeated
    /// invalid returns keep this loop alive; there is deliberately no retry
    /// cap, matching the documented callback contract.
    fn invalid_return(&mut self) -> Option<SignalAction> {
        warn!("invalid signal return from session owner");
        if self.state == SessionState::Active {
            self.end_active_grant();
        }
        self.dispatcher.dispatch(Signal::InvalidReturn)
    }

    /// One `SessionIdle` per transition back to `Idle` with nothing queued.
    fn note_idle(&mut self) {
        if self.state == SessionState::Idle && !self.idle_notified {
            self.dispatcher.defer(Signal::SessionIdle);
            self.idle_notified = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HfclkManager;
    use crate::demand::{NoDemand, PeriodicDemand};
    use crate::timeslot::types::RejectReason;

    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec::Vec;

    struct FnHandler<F: FnMut(Signal) -> SignalAction>(F);

    impl<F: FnMut(Signal) -> SignalAction> TimeslotHandler for FnHandler<F> {
        fn on_signal(&mut self, signal: Signal) -> SignalAction {
            (self.0)(signal)
        }
    }

    struct ReadyClock;

    impl ClockControl for ReadyClock {
        fn request_precision(&mut self) -> bool {
            true
        }
        fn release_precision(&mut self) {}
    }

    type Log = Rc<RefCell<Vec<Signal>>>;

    fn new_log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn recorder(log: &Log) -> FnHandler<impl FnMut(Signal) -> SignalAction> {
        let log = Rc::clone(log);
        FnHandler(move |signal| {
            log.borrow_mut().push(signal);
            SignalAction::None
        })
    }

    fn earliest(length_us: u32, timeout_us: u32) -> Request {
        Request::Earliest {
            hfclk: HfclkConfig::NoGuarantee,
            priority: Priority::Normal,
            length_us,
            timeout_us,
        }
    }

    fn normal(distance_us: u32, length_us: u32) -> Request {
        Request::Normal {
            hfclk: HfclkConfig::NoGuarantee,
            priority: Priority::Normal,
            distance_us,
            length_us,
        }
    }

    #[test]
    fn open_while_open_fails() {
        let log = new_log();
        let mut first = recorder(&log);
        let mut second = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);

        assert_eq!(ts.session_open(&mut first), Ok(()));
        assert_eq!(ts.session_open(&mut second), Err(Error::AlreadyOpen));
    }

    #[test]
    fn close_while_closed_fails() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);

        assert_eq!(ts.session_close(), Err(Error::AlreadyClosed));
        ts.session_open(&mut handler).unwrap();
        assert_eq!(ts.session_close(), Ok(()));
        assert_eq!(ts.session_close(), Err(Error::AlreadyClosed));
    }

    #[test]
    fn earliest_request_starts_within_timeout() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(1000, 50_000), 0).unwrap();
        assert_eq!(ts.state(), SessionState::Pending);
        let start = ts.next_deadline().unwrap();
        assert!(start <= 50_000);

        ts.on_timer0_irq(start);
        assert_eq!(ts.state(), SessionState::Active);
        let grant = ts.active_grant().unwrap();
        assert_eq!(grant.start_us, start);
        assert_eq!(grant.length_us, 1000);
        assert_eq!(*log.borrow(), [Signal::Start]);
    }

    #[test]
    fn granted_slot_avoids_reserved_windows() {
        // The internal stack reserves 100us every 1000us starting at t=0.
        let demand = PeriodicDemand::new(0, 1000, 100, Priority::High);
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(demand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(500, 10_000), 0).unwrap();
        // [100, 600) is the first gap that fits; [0, 500) would overlap.
        assert_eq!(ts.next_deadline(), Some(100));
    }

    #[test]
    fn blocked_when_no_gap_fits_before_timeout() {
        // 900us reserved every 1000us: every gap is 100us, too small.
        let demand = PeriodicDemand::new(0, 1000, 900, Priority::High);
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(demand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(500, 3_000), 0).unwrap();
        assert_eq!(ts.state(), SessionState::Idle);
        // Nothing delivered from the submission path itself.
        assert!(log.borrow().is_empty());

        ts.process_low_prio(0);
        assert_eq!(*log.borrow(), [Signal::Blocked, Signal::SessionIdle]);
    }

    #[test]
    fn submissions_stay_busy_until_notifications_drained() {
        // Back-to-back reserved windows leave no gap at all.
        let demand = PeriodicDemand::new(0, 1000, 1000, Priority::High);
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(demand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(500, 3_000), 0).unwrap();
        assert_eq!(ts.state(), SessionState::Idle);

        // The blocked/idle notifications are still queued; resubmitting any
        // number of times is rejected rather than piling up signals.
        for _ in 0..8 {
            assert_eq!(
                ts.request(earliest(500, 3_000), 0),
                Err(Error::Rejected(RejectReason::Busy))
            );
        }

        ts.process_low_prio(0);
        assert_eq!(*log.borrow(), [Signal::Blocked, Signal::SessionIdle]);

        ts.request(earliest(500, 3_000), 10).unwrap();
    }

    #[test]
    fn pending_grant_starts_within_start_jitter_of_nominal() {
        // Reserved window [0, 100) pushes the grant to a nonzero start.
        let demand = PeriodicDemand::new(0, 100_000, 100, Priority::High);
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(demand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(500, 10_000), 0).unwrap();
        assert_eq!(ts.next_deadline(), Some(100));

        // One microsecond outside the jitter window: not due yet.
        ts.on_timer0_irq(97);
        assert_eq!(ts.state(), SessionState::Pending);
        assert!(log.borrow().is_empty());

        // 98 + 2 reaches the nominal start; the grant starts and keeps its
        // nominal timing.
        ts.on_timer0_irq(98);
        assert_eq!(ts.state(), SessionState::Active);
        assert_eq!(ts.active_grant().unwrap().start_us, 100);
        assert_eq!(*log.borrow(), [Signal::Start]);
    }

    #[test]
    fn second_request_is_busy_regardless_of_validity() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(1000, 50_000), 0).unwrap();
        assert_eq!(
            ts.request(earliest(1000, 50_000), 0),
            Err(Error::Rejected(RejectReason::Busy))
        );

        ts.on_timer0_irq(0);
        assert_eq!(ts.state(), SessionState::Active);
        assert_eq!(
            ts.request(earliest(1000, 50_000), 10),
            Err(Error::Rejected(RejectReason::Busy))
        );
    }

    #[test]
    fn first_normal_request_is_rejected() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        assert_eq!(
            ts.request(normal(200, 500), 0),
            Err(Error::Rejected(RejectReason::MustBeEarliestFirst))
        );
        assert_eq!(ts.state(), SessionState::Idle);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn normal_start_is_distance_from_previous_start() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(100, 1000), 0).unwrap();
        ts.on_timer0_irq(0); // start at t=0
        ts.on_timer0_irq(100); // natural expiry
        assert_eq!(ts.state(), SessionState::Idle);
        ts.process_low_prio(120);

        ts.request(normal(200, 500), 150).unwrap();
        assert_eq!(ts.next_deadline(), Some(200));
        ts.on_timer0_irq(200);
        assert_eq!(ts.active_grant().unwrap().start_us, 200);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::SessionIdle, Signal::Start]
        );
    }

    #[test]
    fn normal_with_unreachable_start_is_blocked() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(100, 1000), 0).unwrap();
        ts.on_timer0_irq(0);
        ts.on_timer0_irq(100);
        ts.process_low_prio(120);

        // Nominal start would be t=200, already in the past at t=400.
        ts.request(normal(200, 500), 400).unwrap();
        assert_eq!(ts.state(), SessionState::Idle);
        ts.process_low_prio(400);
        assert!(log.borrow().contains(&Signal::Blocked));
    }

    fn start_slot<'a, D: InternalDemand, C: ClockControl>(
        ts: &mut TimeslotScheduler<'a, D, C>,
        length_us: u32,
    ) {
        ts.request(earliest(length_us, 10_000), 0).unwrap();
        ts.on_timer0_irq(0);
        assert_eq!(ts.state(), SessionState::Active);
    }

    #[test]
    fn extend_below_minimum_fails_without_corrupting_grant() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Extend { length_us: 50 },
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        ts.on_radio_irq(100);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::ExtendFailed]
        );
        assert_eq!(ts.active_grant().unwrap().length_us, 1000);
    }

    #[test]
    fn extend_inside_margin_fails() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Extend { length_us: 200 },
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        // 50us left before the slot end: under the 79us margin.
        ts.on_radio_irq(950);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::ExtendFailed]
        );
        assert_eq!(ts.active_grant().unwrap().length_us, 1000);
    }

    #[test]
    fn extend_at_exact_margin_succeeds() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Extend { length_us: 200 },
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        // Exactly 79us left: still allowed.
        ts.on_radio_irq(921);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::ExtendSucceeded]
        );
        assert_eq!(ts.active_grant().unwrap().length_us, 1200);
        assert_eq!(ts.next_deadline(), Some(1200));
    }

    #[test]
    fn extend_colliding_with_reserved_window_fails() {
        // Reserved window at [1200, 1500).
        let demand = PeriodicDemand::new(1200, 100_000, 300, Priority::High);
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Extend { length_us: 500 },
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(demand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        // [1000, 1500) would run into the reserved window.
        ts.on_radio_irq(100);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::ExtendFailed]
        );
        assert_eq!(ts.active_grant().unwrap().length_us, 1000);
    }

    #[test]
    fn invalid_return_forces_end_then_signals() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    // Earliest from within a slot is not a recognized return.
                    Signal::Radio => SignalAction::Request(earliest(1000, 1000)),
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        ts.on_radio_irq(100);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::InvalidReturn]
        );
        assert_eq!(ts.state(), SessionState::Idle);
        assert!(ts.active_grant().is_none());
    }

    #[test]
    fn malformed_embedded_request_is_invalid_return() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Request(normal(0, 300)),
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        ts.on_radio_irq(100);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::InvalidReturn]
        );
        assert_eq!(ts.state(), SessionState::Idle);
    }

    #[test]
    fn end_action_idles_with_exactly_one_session_idle() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::End,
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        ts.on_radio_irq(100);
        assert_eq!(ts.state(), SessionState::Idle);

        ts.process_low_prio(150);
        ts.process_low_prio(200);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::Radio, Signal::SessionIdle]
        );
    }

    #[test]
    fn end_outside_a_slot_is_invalid_return() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::SessionIdle => SignalAction::End,
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);
        ts.on_timer0_irq(1000); // natural expiry

        ts.process_low_prio(1100);
        assert_eq!(
            *log.borrow(),
            [Signal::Start, Signal::SessionIdle, Signal::InvalidReturn]
        );
    }

    #[test]
    fn close_during_active_grant_is_a_single_silent_end() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        assert_eq!(ts.session_close(), Ok(()));
        assert_eq!(ts.state(), SessionState::Closed);
        // No blocked/cancelled signal for the forced grant.
        assert_eq!(*log.borrow(), [Signal::Start]);
        assert_eq!(ts.session_close(), Err(Error::AlreadyClosed));
    }

    #[test]
    fn close_during_pending_cancels() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();

        ts.request(earliest(1000, 50_000), 0).unwrap();
        assert_eq!(ts.state(), SessionState::Pending);

        assert_eq!(ts.session_close(), Ok(()));
        assert_eq!(*log.borrow(), [Signal::Cancelled]);
        assert_eq!(ts.state(), SessionState::Closed);
    }

    #[test]
    fn in_slot_request_schedules_successor() {
        let log = new_log();
        let mut handler = {
            let log = Rc::clone(&log);
            FnHandler(move |signal| {
                log.borrow_mut().push(signal);
                match signal {
                    Signal::Radio => SignalAction::Request(normal(2000, 300)),
                    _ => SignalAction::None,
                }
            })
        };
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.session_open(&mut handler).unwrap();
        start_slot(&mut ts, 1000);

        ts.on_radio_irq(100);
        // The current slot is closed and the next grant sits 2000us after
        // the previous slot's start.
        assert!(ts.active_grant().is_none());
        assert_eq!(ts.state(), SessionState::Pending);
        assert_eq!(ts.next_deadline(), Some(2000));
        assert_eq!(*log.borrow(), [Signal::Start, Signal::Radio]);
    }

    #[test]
    fn xtal_guaranteed_blocked_until_crystal_ready() {
        let log = new_log();
        let mut handler = recorder(&log);
        let mut ts = TimeslotScheduler::new(NoDemand, HfclkManager::new());
        ts.session_open(&mut handler).unwrap();

        let req = Request::Earliest {
            hfclk: HfclkConfig::XtalGuaranteed,
            priority: Priority::Normal,
            length_us: 1000,
            timeout_us: 50_000,
        };
        ts.request(req, 0).unwrap();
        assert_eq!(ts.state(), SessionState::Idle);
        ts.process_low_prio(0);
        assert_eq!(*log.borrow(), [Signal::Blocked, Signal::SessionIdle]);

        ts.clock_mut().on_hfclk_started();
        ts.request(req, 100).unwrap();
        assert_eq!(ts.state(), SessionState::Pending);
    }

    #[test]
    fn hardware_events_without_a_session_are_ignored() {
        let mut ts = TimeslotScheduler::new(NoDemand, ReadyClock);
        ts.on_radio_irq(0);
        ts.on_timer0_irq(0);
        ts.process_low_prio(0);
        assert_eq!(ts.state(), SessionState::Closed);
    }
}

//! Signal dispatch to the session owner.
//!
//! Two delivery tiers. High-priority signals (slot start, TIMER0/RADIO
//! forwarding, extension outcomes) are dispatched synchronously in the
//! triggering interrupt context, with no queuing or buffering. Session-level
//! notifications (blocked, idle) go through a bounded single-producer
//! single-consumer queue and are drained outside the interrupt path,
//! exactly once per triggering event, in order.

use heapless::spsc::Queue;

use super::types::{Signal, SignalAction};

// A submission cycle defers at most a blocked notification and an idle
// notification, new submissions are refused until those are drained, and
// draining never grows the queue by more than one; 8 slots give comfortable
// headroom.
const DEFERRED_QUEUE_LEN: usize = 8;

/// Session owner callback.
///
/// High-priority signals run in interrupt context; the handler must return
/// promptly. An extension decision in particular must complete within
/// [`EXTENSION_PROCESSING_TIME_MAX_US`](super::EXTENSION_PROCESSING_TIME_MAX_US)
/// of being triggered. A handler that does not return is an external fault
/// outside the arbiter's recovery scope.
pub trait TimeslotHandler {
    /// Handle a timeslot signal and return the requested follow-up action.
    fn on_signal(&mut self, signal: Signal) -> SignalAction;
}

/// Owns the registered handler and the deferred low-priority signal queue.
pub(crate) struct Dispatcher<'a> {
    handler: Option<&'a mut dyn TimeslotHandler>,
    deferred: Queue<Signal, DEFERRED_QUEUE_LEN>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new() -> Self {
        Self {
            handler: None,
            deferred: Queue::new(),
        }
    }

    pub(crate) fn register(&mut self, handler: &'a mut dyn TimeslotHandler) {
        self.handler = Some(handler);
    }

    /// Drop the handler reference and any undelivered deferred signals.
    pub(crate) fn unregister(&mut self) {
        self.handler = None;
        while self.deferred.dequeue().is_some() {}
    }

    /// Invoke the handler synchronously.
    ///
    /// With no session open this is a no-op returning `None`: a hardware
    /// event cannot legally produce a signal without an open session, so the
    /// event is simply not dispatched.
    pub(crate) fn dispatch(&mut self, signal: Signal) -> Option<SignalAction> {
        match self.handler.as_mut() {
            Some(handler) => Some(handler.on_signal(signal)),
            None => {
                trace!("signal with no open session, not dispatched");
                None
            }
        }
    }

    /// Whether deferred signals are still awaiting delivery.
    pub(crate) fn has_pending(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Queue a low-priority signal for delivery outside interrupt context.
    pub(crate) fn defer(&mut self, signal: Signal) {
        if self.deferred.enqueue(signal).is_err() {
            // Submissions are gated on an empty queue, so occupancy never
            // approaches the capacity; running out of slots means the
            // arbiter state machine is broken.
            panic!("deferred signal queue overflow");
        }
    }

    pub(crate) fn pop_deferred(&mut self) -> Option<Signal> {
        self.deferred.dequeue()
    }
}

#![cfg_attr(not(test), no_std)]
#![doc = "Radio timeslot arbiter."]
#![doc = ""]
#![doc = "Multiplexes exclusive hardware-level access to a shared radio subsystem"]
#![doc = "(radio transceiver, free-running timer, crypto/address-resolution"]
#![doc = "peripherals) between a built-in protocol stack and one external,"]
#![doc = "application-defined radio protocol. While a timeslot is granted, the"]
#![doc = "application has the blocked peripherals to itself; the arbiter guarantees"]
#![doc = "handoff with microsecond-level timing and recovers from missed deadlines"]
#![doc = "and misbehaving owners."]
#![doc = ""]
#![doc = "Hardware access itself is out of scope: the port layer forwards abstract"]
#![doc = "\"interrupt occurred\" and \"clock ready\" events into the scheduler and arms"]
#![doc = "the free-running timer from [`timeslot::TimeslotScheduler::next_deadline`]."]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod clock;
pub mod demand;
pub mod timeslot;

//! Clock source management.
//!
//! Tracks which oscillator drives the high-frequency clock domain and answers
//! the scheduler's "is the precision clock stable" query at grant evaluation
//! time. Electrical configuration of the clock sources is the port layer's
//! business; it reports stability through [`HfclkManager::on_hfclk_started`].

/// Precision clock arbitration seen by the scheduler.
///
/// A grant that requires guaranteed high-precision timing is only admitted
/// when [`request_precision`](ClockControl::request_precision) returns `true`.
/// Readiness is polled at grant evaluation only; there are no retries.
pub trait ClockControl {
    /// Request the precision (crystal) clock source.
    ///
    /// Returns whether the crystal is stable right now. The request stays
    /// recorded either way so the port can see that a ramp-up is wanted.
    fn request_precision(&mut self) -> bool;

    /// Release the precision clock source.
    fn release_precision(&mut self);
}

/// Active high-frequency clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Internal RC oscillator. Cheap to run, poor accuracy.
    RcOscillator,
    /// External crystal. Required for radio transmission accuracy.
    Crystal,
}

/// Default accuracy class of the RC oscillator, in ppm.
pub const RC_ACCURACY_PPM: u16 = 500;

/// Default accuracy class of the crystal, in ppm.
pub const CRYSTAL_ACCURACY_PPM: u16 = 50;

/// High-frequency clock source manager.
///
/// Models crystal ramp-up: requests made before the port has reported
/// "crystal stable" answer not-ready, and the scheduler reacts by blocking
/// the request rather than waiting.
pub struct HfclkManager {
    source: ClockSource,
    crystal_stable: bool,
    requested: bool,
    rc_accuracy_ppm: u16,
    crystal_accuracy_ppm: u16,
}

impl HfclkManager {
    pub const fn new() -> Self {
        Self {
            source: ClockSource::RcOscillator,
            crystal_stable: false,
            requested: false,
            rc_accuracy_ppm: RC_ACCURACY_PPM,
            crystal_accuracy_ppm: CRYSTAL_ACCURACY_PPM,
        }
    }

    /// Override the accuracy classes reported for each source.
    pub const fn with_accuracy(mut self, rc_ppm: u16, crystal_ppm: u16) -> Self {
        self.rc_accuracy_ppm = rc_ppm;
        self.crystal_accuracy_ppm = crystal_ppm;
        self
    }

    /// Port event: the crystal oscillator has started and is stable.
    pub fn on_hfclk_started(&mut self) {
        self.crystal_stable = true;
        if self.requested {
            self.source = ClockSource::Crystal;
        }
        debug!("hfclk crystal stable");
    }

    /// Port event: the crystal oscillator was stopped.
    pub fn on_hfclk_stopped(&mut self) {
        self.crystal_stable = false;
        self.source = ClockSource::RcOscillator;
    }

    /// The oscillator currently driving the high-frequency domain.
    pub fn source(&self) -> ClockSource {
        self.source
    }

    /// Accuracy class of the active source, in ppm.
    pub fn accuracy_ppm(&self) -> u16 {
        match self.source {
            ClockSource::RcOscillator => self.rc_accuracy_ppm,
            ClockSource::Crystal => self.crystal_accuracy_ppm,
        }
    }

    /// Whether a precision request would be admitted right now.
    pub fn is_precision_ready(&self) -> bool {
        self.crystal_stable
    }
}

impl Default for HfclkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl for HfclkManager {
    fn request_precision(&mut self) -> bool {
        self.requested = true;
        if self.crystal_stable {
            self.source = ClockSource::Crystal;
        } else {
            trace!("precision clock requested before crystal stable");
        }
        self.crystal_stable
    }

    fn release_precision(&mut self) {
        self.requested = false;
        self.source = ClockSource::RcOscillator;
    }
}

//! Request validation against the documented timing limits.

use super::types::{RejectReason, Request, SessionState};
use super::{DISTANCE_MAX_US, EARLIEST_TIMEOUT_MAX_US, LENGTH_MAX_US, LENGTH_MIN_US};

/// Check a request's fields against the hard timing bounds.
///
/// Rules are evaluated in order; the first failure wins. Rejection has no
/// side effects, the scheduler state is untouched.
pub(crate) fn validate(
    request: &Request,
    state: SessionState,
    has_prior_grant: bool,
) -> Result<(), RejectReason> {
    let length_us = request.length_us();
    if !(LENGTH_MIN_US..=LENGTH_MAX_US).contains(&length_us) {
        return Err(RejectReason::OutOfRange);
    }

    match *request {
        Request::Earliest { timeout_us, .. } => {
            if timeout_us == 0 || timeout_us > EARLIEST_TIMEOUT_MAX_US {
                return Err(RejectReason::OutOfRange);
            }
        }
        Request::Normal { distance_us, .. } => {
            if distance_us == 0 || distance_us > DISTANCE_MAX_US {
                return Err(RejectReason::OutOfRange);
            }
            if !has_prior_grant {
                return Err(RejectReason::MustBeEarliestFirst);
            }
        }
    }

    if state != SessionState::Idle {
        return Err(RejectReason::Busy);
    }

    Ok(())
}

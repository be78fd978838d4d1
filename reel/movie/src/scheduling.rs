/*!
    Thread scheduling hints for the reader thread.
*/

use std::time::Duration;

use reel_types::{Error, Result};

/**
    Requested scheduling policy for a pipeline thread.

    `Realtime` maps to a time-constraint policy on hosts that have one;
    elsewhere the request is best-effort and callers continue with default
    scheduling when it is refused.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingHint {
    Default,
    UserInitiated,
    Realtime {
        computation: Duration,
        period: Duration,
        constraint: Duration,
    },
}

impl SchedulingHint {
    /**
        The realtime policy the decode loop requests: 5 ms of computation
        within a 5 ms constraint, no fixed period.
    */
    pub const fn realtime_decode() -> Self {
        Self::Realtime {
            computation: Duration::from_millis(5),
            period: Duration::ZERO,
            constraint: Duration::from_millis(5),
        }
    }

    /**
        Apply the hint to the calling thread.

        `Default` and `UserInitiated` always succeed (the host scheduler
        already provides them). `Realtime` fails on hosts without a
        time-constraint primitive; the caller logs and keeps going.
    */
    pub fn apply_to_current_thread(&self) -> Result<()> {
        match self {
            Self::Default | Self::UserInitiated => Ok(()),
            Self::Realtime { .. } => Err(Error::RealtimeSchedulingUnavailable(
                "no time-constraint scheduling primitive on this host".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_realtime_hints_apply() {
        assert!(SchedulingHint::Default.apply_to_current_thread().is_ok());
        assert!(
            SchedulingHint::UserInitiated
                .apply_to_current_thread()
                .is_ok()
        );
    }

    #[test]
    fn realtime_is_best_effort() {
        let result = SchedulingHint::realtime_decode().apply_to_current_thread();
        assert!(matches!(
            result,
            Err(Error::RealtimeSchedulingUnavailable(_))
        ));
    }
}

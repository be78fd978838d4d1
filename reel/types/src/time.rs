/*!
    Rational presentation time.
*/

use std::cmp::Ordering;

/**
    Validity and rounding flags carried alongside a timestamp.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TimeFlags {
    /// The timestamp holds a meaningful value.
    pub valid: bool,
    /// The value was rounded while rescaling between timescales.
    pub has_been_rounded: bool,
}

impl TimeFlags {
    pub const VALID: TimeFlags = TimeFlags {
        valid: true,
        has_been_rounded: false,
    };
}

/**
    Monotonic rational time: `value / timescale` seconds within an epoch.

    Equality compares all fields; two timestamps representing the same
    instant in different timescales are *not* equal. Ordering of the
    represented instants goes through [`compare`](Self::compare), which uses
    exact rational arithmetic. The two relations intentionally differ, so
    neither `Ord` nor `PartialOrd` is implemented.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Numerator.
    pub value: i64,
    /// Ticks per second.
    pub timescale: i32,
    /// Validity and rounding flags.
    pub flags: TimeFlags,
    /// Discontinuity epoch; timestamps in a later epoch sort after all
    /// timestamps of an earlier one.
    pub epoch: i64,
}

impl Timestamp {
    pub const fn new(value: i64, timescale: i32) -> Self {
        Self {
            value,
            timescale,
            flags: TimeFlags::VALID,
            epoch: 0,
        }
    }

    /**
        The zero instant in a 1000 Hz timescale.
    */
    pub const fn zero() -> Self {
        Self::new(0, 1000)
    }

    /**
        An invalid timestamp. Comparing against one is a caller bug;
        [`seconds`](Self::seconds) returns 0.
    */
    pub const fn invalid() -> Self {
        Self {
            value: 0,
            timescale: 0,
            flags: TimeFlags {
                valid: false,
                has_been_rounded: false,
            },
            epoch: 0,
        }
    }

    /**
        Build a timestamp from seconds at the given timescale, rounding to
        the nearest tick.
    */
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        let exact = seconds * f64::from(timescale);
        let value = exact.round() as i64;
        Self {
            value,
            timescale,
            flags: TimeFlags {
                valid: true,
                has_been_rounded: (value as f64 - exact).abs() > f64::EPSILON,
            },
            epoch: 0,
        }
    }

    pub const fn is_valid(&self) -> bool {
        self.flags.valid && self.timescale != 0
    }

    pub fn seconds(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.value as f64 / f64::from(self.timescale)
    }

    /**
        Exact rational comparison of the represented instants.

        Epochs order first; within an epoch the cross-multiplied numerators
        are compared in 128-bit arithmetic so no precision is lost.
    */
    pub fn compare(&self, other: &Timestamp) -> Ordering {
        if self.epoch != other.epoch {
            return self.epoch.cmp(&other.epoch);
        }
        let lhs = i128::from(self.value) * i128::from(other.timescale);
        let rhs = i128::from(other.value) * i128::from(self.timescale);
        lhs.cmp(&rhs)
    }

    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.compare(other) == Ordering::Less
    }

    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.compare(other) == Ordering::Greater
    }

    /**
        `self + other`, expressed in `self`'s timescale.
    */
    pub fn adding(&self, other: &Timestamp) -> Timestamp {
        let (value, rounded) = rescale(other.value, other.timescale, self.timescale);
        Timestamp {
            value: self.value + value,
            timescale: self.timescale,
            flags: TimeFlags {
                valid: self.is_valid() && other.is_valid(),
                has_been_rounded: self.flags.has_been_rounded
                    || other.flags.has_been_rounded
                    || rounded,
            },
            epoch: self.epoch,
        }
    }

    /**
        `self - other`, expressed in `self`'s timescale.
    */
    pub fn subtracting(&self, other: &Timestamp) -> Timestamp {
        let (value, rounded) = rescale(other.value, other.timescale, self.timescale);
        Timestamp {
            value: self.value - value,
            timescale: self.timescale,
            flags: TimeFlags {
                valid: self.is_valid() && other.is_valid(),
                has_been_rounded: self.flags.has_been_rounded
                    || other.flags.has_been_rounded
                    || rounded,
            },
            epoch: self.epoch,
        }
    }

    /**
        Seconds elapsed from `earlier` to `self`. Negative if `self` is the
        earlier instant.
    */
    pub fn seconds_since(&self, earlier: &Timestamp) -> f64 {
        self.seconds() - earlier.seconds()
    }
}

/**
    Rescale `value` ticks from one timescale to another, rounding to
    nearest. Returns the rescaled value and whether rounding occurred.
*/
fn rescale(value: i64, from: i32, to: i32) -> (i64, bool) {
    if from == to || from == 0 {
        return (value, false);
    }
    let num = i128::from(value) * i128::from(to);
    let den = i128::from(from);
    let quotient = num.div_euclid(den);
    let remainder = num.rem_euclid(den);
    if remainder == 0 {
        (quotient as i64, false)
    } else if remainder * 2 >= den {
        ((quotient + 1) as i64, true)
    } else {
        (quotient as i64, true)
    }
}

/**
    Half-open span of presentation time.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: Timestamp,
    pub duration: Timestamp,
}

impl TimeRange {
    pub const fn new(start: Timestamp, duration: Timestamp) -> Self {
        Self { start, duration }
    }

    pub fn end(&self) -> Timestamp {
        self.start.adding(&self.duration)
    }

    /**
        True if `time` lies in `[start, end)`.
    */
    pub fn contains(&self, time: &Timestamp) -> bool {
        !time.is_before(&self.start) && time.is_before(&self.end())
    }
}

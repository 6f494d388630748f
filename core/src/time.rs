//! # Time Primitives
//!
//! Nanosecond-resolution time values and the comparisons the schedulers are
//! built on. Absolute values (deadlines) and relative values (periods,
//! remaining time) share one representation.

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;
/// Microseconds per second.
pub const USEC_PER_SEC: i64 = 1_000_000;
/// Nanoseconds per microsecond.
pub const NSEC_PER_USEC: i64 = 1_000;

/// A second/nanosecond pair.
///
/// The zero value conventionally means "no value"; absolute deadlines never
/// have zero seconds unless both members are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSpec {
    /// Whole seconds.
    pub sec: i64,
    /// Nanoseconds, normalized into `0..NSEC_PER_SEC` for in-range values.
    pub nsec: i64,
}

impl TimeSpec {
    /// The zero time value.
    pub const ZERO: Self = Self { sec: 0, nsec: 0 };

    /// Build from seconds and nanoseconds.
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Build from a microsecond count.
    pub fn from_usecs(us: u64) -> Self {
        let us = us as i64;
        Self {
            sec: us / USEC_PER_SEC,
            nsec: (us % USEC_PER_SEC) * NSEC_PER_USEC,
        }
    }

    /// Build from a millisecond count.
    pub fn from_millis(ms: u64) -> Self {
        Self::from_usecs(ms * 1_000)
    }

    /// Value in whole microseconds.
    pub fn as_usecs(self) -> i64 {
        self.sec * USEC_PER_SEC + self.nsec / NSEC_PER_USEC
    }

    /// Whether both members are zero.
    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// `self + other`, normalizing a nanosecond carry.
    pub fn add(self, other: Self) -> Self {
        let mut sec = self.sec + other.sec;
        let mut nsec = self.nsec + other.nsec;
        if nsec >= NSEC_PER_SEC {
            sec += 1;
            nsec -= NSEC_PER_SEC;
        }
        Self { sec, nsec }
    }

    /// `self - other` with standard borrow semantics.
    ///
    /// On nanosecond underflow the borrow is taken from the seconds member
    /// (`sec -= 1; nsec += NSEC_PER_SEC`). The result may be negative.
    pub fn sub(self, other: Self) -> Self {
        let mut sec = self.sec - other.sec;
        let mut nsec = self.nsec - other.nsec;
        if nsec < 0 {
            sec -= 1;
            nsec += NSEC_PER_SEC;
        }
        Self { sec, nsec }
    }

    /// Strictly-earlier comparison; equal values compare false.
    pub fn earlier_than(self, other: Self) -> bool {
        self.sec < other.sec || (self.sec == other.sec && self.nsec < other.nsec)
    }
}

/// An earlier deadline outranks a later one.
#[inline]
pub fn earlier_deadline(a: TimeSpec, b: TimeSpec) -> bool {
    a.earlier_than(b)
}

/// A lower period outranks a higher one (rate-monotonic order).
#[inline]
pub fn lower_period(a: TimeSpec, b: TimeSpec) -> bool {
    a.earlier_than(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_carries_nanoseconds() {
        let a = TimeSpec::new(1, 600_000_000);
        let b = TimeSpec::new(0, 500_000_000);
        assert_eq!(a.add(b), TimeSpec::new(2, 100_000_000));
    }

    #[test]
    fn sub_borrows_on_underflow() {
        let a = TimeSpec::new(2, 100_000_000);
        let b = TimeSpec::new(1, 600_000_000);
        assert_eq!(a.sub(b), TimeSpec::new(0, 500_000_000));
    }

    #[test]
    fn sub_may_go_negative() {
        let a = TimeSpec::new(0, 0);
        let b = TimeSpec::new(0, 1);
        let d = a.sub(b);
        assert_eq!(d, TimeSpec::new(-1, NSEC_PER_SEC - 1));
        assert!(d.earlier_than(TimeSpec::ZERO));
    }

    #[test]
    fn usec_round_trip() {
        let t = TimeSpec::from_usecs(1_234_567);
        assert_eq!(t, TimeSpec::new(1, 234_567_000));
        assert_eq!(t.as_usecs(), 1_234_567);
    }

    #[test]
    fn comparisons_are_strict() {
        let t = TimeSpec::new(5, 5);
        assert!(!t.earlier_than(t));
        assert!(earlier_deadline(TimeSpec::new(5, 4), t));
        assert!(lower_period(TimeSpec::new(4, 999_999_999), t));
    }
}

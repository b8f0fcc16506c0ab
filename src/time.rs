/// Simulated time for the routing core.
///
/// A logical timestamp with no dependency on `std::time`. Time advances
/// only when the run loop pops a queued delivery, never from wall-clock
/// observation.

/// A logical tick in simulation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The zero-point of simulation time.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a new `VirtualTime` from a raw tick value.
    #[inline]
    pub fn new(ticks: u64) -> Self {
        VirtualTime(ticks)
    }

    /// Return the raw tick value.
    #[inline]
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// Advance time by `delta` ticks. Returns `None` on overflow.
    #[inline]
    pub fn advance(self, delta: u64) -> Option<VirtualTime> {
        self.0.checked_add(delta).map(VirtualTime)
    }

    /// The instant `delay` ticks after `self`.
    ///
    /// Returns `None` for a negative delay or on overflow; callers map the
    /// two cases to distinct errors before getting here.
    #[inline]
    pub fn plus(self, delay: i64) -> Option<VirtualTime> {
        u64::try_from(delay).ok().and_then(|d| self.advance(d))
    }
}

impl std::fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero() {
        assert_eq!(VirtualTime::ZERO.ticks(), 0);
        assert_eq!(VirtualTime::default(), VirtualTime::ZERO);
    }

    #[test]
    fn test_ordering() {
        let t1 = VirtualTime::new(10);
        let t2 = VirtualTime::new(20);
        assert!(t1 < t2);
    }

    #[test]
    fn test_plus_signed_delay() {
        let t = VirtualTime::new(100);
        assert_eq!(t.plus(3), Some(VirtualTime::new(103)));
        assert_eq!(t.plus(0), Some(t));
        assert_eq!(t.plus(-1), None);
    }

    #[test]
    fn test_advance_overflow() {
        assert!(VirtualTime::new(u64::MAX).advance(1).is_none());
        assert!(VirtualTime::new(u64::MAX).plus(1).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", VirtualTime::new(42)), "T=42");
    }
}

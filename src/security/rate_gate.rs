use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of monotonic time for window bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Ceilings for [`RateGate`]. A count equal to the ceiling denies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_minute: usize,
    pub per_day: usize,
    pub per_identity_daily: usize,
}

impl From<&RateLimitConfig> for RateLimits {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            per_minute: config.per_minute,
            per_day: config.per_day,
            per_identity_daily: config.per_identity_daily,
        }
    }
}

/// Drop timestamps that are no longer younger than `horizon`.
fn trim(window: &mut VecDeque<Instant>, now: Instant, horizon: Duration) {
    while window
        .front()
        .is_some_and(|&t| now.duration_since(t) >= horizon)
    {
        window.pop_front();
    }
}

/// Sliding-window admission control.
///
/// Global volume is tracked over a one-minute and a one-day window; each
/// identity gets its own one-day window. Windows are trimmed lazily before
/// every admission check. Checking never records: callers record only after
/// the guarded work succeeded, so a failed call costs nothing.
pub struct RateGate {
    limits: RateLimits,
    clock: Box<dyn Clock>,
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
    identities: HashMap<String, VecDeque<Instant>>,
}

impl RateGate {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, SystemClock)
    }

    pub fn with_clock(limits: RateLimits, clock: impl Clock + 'static) -> Self {
        Self {
            limits,
            clock: Box::new(clock),
            minute: VecDeque::new(),
            day: VecDeque::new(),
            identities: HashMap::new(),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn admit_global(&mut self) -> bool {
        let now = self.clock.now();
        trim(&mut self.minute, now, MINUTE);
        trim(&mut self.day, now, DAY);
        self.minute.len() < self.limits.per_minute && self.day.len() < self.limits.per_day
    }

    pub fn record_global(&mut self) {
        let now = self.clock.now();
        self.minute.push_back(now);
        self.day.push_back(now);
    }

    pub fn admit_identity(&mut self, identity: &str) -> bool {
        let now = self.clock.now();
        let Some(window) = self.identities.get_mut(identity) else {
            return self.limits.per_identity_daily > 0;
        };
        trim(window, now, DAY);
        let count = window.len();
        if count == 0 {
            self.identities.remove(identity);
        }
        count < self.limits.per_identity_daily
    }

    pub fn record_identity(&mut self, identity: &str) {
        let now = self.clock.now();
        self.identities
            .entry(identity.to_string())
            .or_default()
            .push_back(now);
    }

    /// Usage inside the current windows: (minute, day, identity).
    pub fn usage(&mut self, identity: &str) -> (usize, usize, usize) {
        let now = self.clock.now();
        trim(&mut self.minute, now, MINUTE);
        trim(&mut self.day, now, DAY);
        let per_identity = self.identities.get_mut(identity).map_or(0, |w| {
            trim(w, now, DAY);
            w.len()
        });
        (self.minute.len(), self.day.len(), per_identity)
    }

    /// Drop every expired timestamp and every identity left with none.
    pub fn cleanup(&mut self) {
        let now = self.clock.now();
        trim(&mut self.minute, now, MINUTE);
        trim(&mut self.day, now, DAY);
        self.identities.retain(|_, window| {
            trim(window, now, DAY);
            !window.is_empty()
        });
    }

    pub fn tracked_identities(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_minute: usize, per_day: usize, per_identity_daily: usize) -> RateLimits {
        RateLimits {
            per_minute,
            per_day,
            per_identity_daily,
        }
    }

    fn gate(l: RateLimits) -> (RateGate, ManualClock) {
        let clock = ManualClock::new();
        (RateGate::with_clock(l, clock.clone()), clock)
    }

    #[test]
    fn under_limit_admits() {
        let (mut gate, _) = gate(limits(3, 100, 10));
        for _ in 0..2 {
            assert!(gate.admit_global());
            gate.record_global();
        }
        assert!(gate.admit_global());
    }

    #[test]
    fn exactly_at_ceiling_denies() {
        let (mut gate, _) = gate(limits(2, 100, 10));
        gate.record_global();
        gate.record_global();
        assert!(!gate.admit_global());
    }

    #[test]
    fn admission_does_not_record() {
        let (mut gate, _) = gate(limits(1, 1, 1));
        for _ in 0..5 {
            assert!(gate.admit_global());
            assert!(gate.admit_identity("alice"));
        }
        assert_eq!(gate.usage("alice"), (0, 0, 0));
    }

    #[test]
    fn minute_window_expires() {
        let (mut gate, clock) = gate(limits(1, 100, 10));
        gate.record_global();
        assert!(!gate.admit_global());

        clock.advance(Duration::from_secs(59));
        assert!(!gate.admit_global());

        // A timestamp exactly one horizon old is no longer "younger than" it.
        clock.advance(Duration::from_secs(1));
        assert!(gate.admit_global());
    }

    #[test]
    fn day_window_outlives_minute_window() {
        let (mut gate, clock) = gate(limits(100, 2, 10));
        gate.record_global();
        gate.record_global();
        clock.advance(Duration::from_secs(3600));
        assert!(!gate.admit_global());
        clock.advance(DAY);
        assert!(gate.admit_global());
    }

    #[test]
    fn identity_quota_is_per_identity() {
        let (mut gate, _) = gate(limits(100, 100, 2));
        gate.record_identity("alice");
        gate.record_identity("alice");
        assert!(!gate.admit_identity("alice"));
        assert!(gate.admit_identity("bob"));
    }

    #[test]
    fn identity_quota_resets_after_a_day() {
        let (mut gate, clock) = gate(limits(100, 100, 1));
        gate.record_identity("alice");
        assert!(!gate.admit_identity("alice"));
        clock.advance(DAY);
        assert!(gate.admit_identity("alice"));
        assert_eq!(gate.tracked_identities(), 0);
    }

    #[test]
    fn zero_identity_ceiling_denies_everyone() {
        let (mut gate, _) = gate(limits(100, 100, 0));
        assert!(!gate.admit_identity("new"));
    }

    #[test]
    fn cleanup_drops_expired_identities() {
        let (mut gate, clock) = gate(limits(100, 100, 5));
        gate.record_identity("alice");
        clock.advance(Duration::from_secs(3600));
        gate.record_identity("bob");
        clock.advance(DAY - Duration::from_secs(60));
        gate.cleanup();
        assert_eq!(gate.tracked_identities(), 1);
        assert_eq!(gate.usage("bob").2, 1);
    }

    #[test]
    fn limits_from_config() {
        let l = RateLimits::from(&RateLimitConfig::default());
        assert_eq!(l, limits(10, 1000, 50));
    }
}

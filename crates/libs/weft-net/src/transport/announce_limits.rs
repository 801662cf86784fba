use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use weft_core::hash::AddressHash;

#[derive(Debug, Clone)]
pub struct AnnounceRateLimit {
    /// Shortest allowed spacing between announces from one destination.
    pub target: Duration,
    /// Violations tolerated before blocking kicks in.
    pub grace: u32,
    /// Extra block time stacked on top of the target.
    pub penalty: Duration,
}

impl Default for AnnounceRateLimit {
    fn default() -> Self {
        Self {
            target: Duration::from_secs(3600),
            grace: 10,
            penalty: Duration::from_secs(7200),
        }
    }
}

struct LimitEntry {
    violations: u32,
    last_announce: Instant,
    blocked_until: Instant,
}

/// Per-destination announce rate limiting. Destinations that keep
/// announcing faster than the target burn through a grace budget and are
/// then blocked, with the block extending while they keep pushing.
pub struct AnnounceLimits {
    limit: AnnounceRateLimit,
    entries: BTreeMap<AddressHash, LimitEntry>,
}

impl AnnounceLimits {
    pub fn new(limit: AnnounceRateLimit) -> Self {
        Self { limit, entries: BTreeMap::new() }
    }

    /// Records an announce observation. `Some(remaining)` means the
    /// destination is blocked for that long and the announce is dropped.
    pub fn check(&mut self, destination: &AddressHash, now: Instant) -> Option<Duration> {
        let Some(entry) = self.entries.get_mut(destination) else {
            self.entries.insert(
                *destination,
                LimitEntry { violations: 0, last_announce: now, blocked_until: now },
            );
            return None;
        };

        let mut blocked = false;

        if now < entry.blocked_until {
            // Announcing while blocked extends the block
            entry.blocked_until = now + self.limit.target + self.limit.penalty;
            blocked = true;
        } else if now < entry.last_announce + self.limit.target {
            entry.violations += 1;
            if entry.violations >= self.limit.grace {
                entry.violations = 0;
                entry.blocked_until = now + self.limit.target;
                blocked = true;
            }
        }

        entry.last_announce = now;

        blocked.then(|| entry.blocked_until - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::hash::truncated_hash;

    fn limit() -> AnnounceRateLimit {
        AnnounceRateLimit {
            target: Duration::from_secs(60),
            grace: 3,
            penalty: Duration::from_secs(120),
        }
    }

    #[test]
    fn spaced_announces_pass() {
        let mut limits = AnnounceLimits::new(limit());
        let destination = truncated_hash(b"dest");
        let start = Instant::now();

        assert!(limits.check(&destination, start).is_none());
        assert!(limits.check(&destination, start + Duration::from_secs(61)).is_none());
        assert!(limits.check(&destination, start + Duration::from_secs(122)).is_none());
    }

    #[test]
    fn grace_budget_then_block() {
        let mut limits = AnnounceLimits::new(limit());
        let destination = truncated_hash(b"dest");
        let start = Instant::now();

        limits.check(&destination, start);
        // Three rapid violations exhaust the grace of 3
        assert!(limits.check(&destination, start + Duration::from_secs(1)).is_none());
        assert!(limits.check(&destination, start + Duration::from_secs(2)).is_none());
        let blocked = limits.check(&destination, start + Duration::from_secs(3));
        assert!(blocked.is_some());
    }

    #[test]
    fn announcing_while_blocked_extends_the_block() {
        let mut limits = AnnounceLimits::new(limit());
        let destination = truncated_hash(b"dest");
        let start = Instant::now();

        limits.check(&destination, start);
        for offset in 1..=3 {
            limits.check(&destination, start + Duration::from_secs(offset));
        }

        let extended = limits
            .check(&destination, start + Duration::from_secs(10))
            .expect("still blocked");
        assert!(extended > Duration::from_secs(60));
    }

    #[test]
    fn destinations_are_limited_independently() {
        let mut limits = AnnounceLimits::new(limit());
        let noisy = truncated_hash(b"noisy");
        let quiet = truncated_hash(b"quiet");
        let start = Instant::now();

        for offset in 0..=3 {
            limits.check(&noisy, start + Duration::from_secs(offset));
        }

        assert!(limits.check(&quiet, start + Duration::from_secs(4)).is_none());
    }
}

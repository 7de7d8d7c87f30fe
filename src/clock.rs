use std::time::{SystemTime, UNIX_EPOCH};

/// Source of `received_at` timestamps, in nanoseconds since the UNIX epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_ns(&self) -> u64;
}

/// Plain `SystemTime` readings. Subject to NTP steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        wall_ns()
    }
}

/// Wall-clock timestamps that never go backwards.
///
/// Reads the wall clock once at startup and advances on the CPU's monotonic
/// counter (via `quanta`) from there, so an NTP step cannot make a later
/// datagram appear older than an earlier one.
#[derive(Debug, Clone)]
pub struct TscClock {
    inner: quanta::Clock,
    anchor: quanta::Instant,
    anchor_wall_ns: u64,
}

impl TscClock {
    pub fn new() -> Self {
        let inner = quanta::Clock::new();
        let anchor = inner.now();
        Self {
            inner,
            anchor,
            anchor_wall_ns: wall_ns(),
        }
    }
}

impl Default for TscClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TscClock {
    fn now_ns(&self) -> u64 {
        let elapsed = self.inner.now().duration_since(self.anchor);
        self.anchor_wall_ns + elapsed.as_nanos() as u64
    }
}

fn wall_ns() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch");
    u64::try_from(since_epoch.as_nanos()).expect("system time exceeds timestamp range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsc_clock_is_non_decreasing() {
        let clock = TscClock::new();
        let mut prev = clock.now_ns();
        for _ in 0..1000 {
            let now = clock.now_ns();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn tsc_clock_stays_near_wall_time() {
        let clock = TscClock::new();
        let skew = clock.now_ns().abs_diff(SystemClock.now_ns());
        assert!(skew < 1_000_000_000, "clock skew {skew}ns");
    }
}

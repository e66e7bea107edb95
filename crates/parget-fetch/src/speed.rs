use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const MIN_WINDOW: Duration = Duration::from_secs(1);
const COALESCE: Duration = Duration::from_millis(100);
const CACHE: Duration = Duration::from_millis(100);

/// Sliding-window byte rate.
///
/// Writes are recorded as `(instant, bytes)` samples; the rate is the sum of
/// samples still inside the window divided by the time since the oldest one.
#[derive(Debug, Clone)]
pub struct Throughput {
    window:  Duration,
    samples: VecDeque<(Instant, u64)>,
    cached:  Option<(Instant, u64)>,
}

impl Default for Throughput {
    fn default() -> Self { Self::new(DEFAULT_WINDOW) }
}

impl Throughput {
    /// Windows shorter than one second fall back to the default of five.
    pub fn new(window: Duration) -> Self {
        Self {
            window:  if window < MIN_WINDOW { DEFAULT_WINDOW } else { window },
            samples: VecDeque::new(),
            cached:  None,
        }
    }

    pub fn window(&self) -> Duration { self.window }

    pub fn push(&mut self, n: u64) { self.push_at(Instant::now(), n) }

    pub fn push_at(&mut self, now: Instant, n: u64) {
        self.evict(now);
        if n == 0 {
            return;
        }
        match self.samples.back_mut() {
            Some((at, bytes)) if *at + COALESCE > now => *bytes += n,
            _ => self.samples.push_back((now, n)),
        }
    }

    /// Bytes per second.
    pub fn speed(&mut self) -> u64 { self.speed_at(Instant::now()) }

    pub fn speed_at(&mut self, now: Instant) -> u64 {
        if let Some((at, speed)) = self.cached {
            if at + CACHE > now {
                return speed;
            }
        }
        let Some(&(begin, _)) = self.samples.front() else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(begin).as_nanos();
        if elapsed == 0 {
            return 0;
        }
        let total: u128 = self.samples.iter().map(|&(_, n)| n as u128).sum();
        let speed = (total * 1_000_000_000 / elapsed).min(u64::MAX as u128) as u64;
        self.cached = Some((now, speed));
        speed
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.cached = None;
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.samples.front() {
            if at + self.window > now {
                break;
            }
            self.samples.pop_front();
        }
    }
}

/// Remaining time at `speed` bytes per second; `None` when stalled or done.
pub fn eta(remaining: u64, speed: u64) -> Option<Duration> {
    if speed == 0 || remaining == 0 {
        return None;
    }
    Some(Duration::from_secs(remaining / speed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    #[test]
    fn short_window_uses_default() {
        assert_eq!(Throughput::new(ms(200)).window(), DEFAULT_WINDOW);
        assert_eq!(Throughput::new(Duration::from_secs(2)).window(), Duration::from_secs(2));
    }

    #[test]
    fn rate_over_elapsed_time() {
        let start = Instant::now();
        let mut t = Throughput::default();
        t.push_at(start, 1000);
        t.push_at(start + ms(500), 1000);
        assert_eq!(t.speed_at(start + ms(1000)), 2000);
    }

    #[test]
    fn close_pushes_are_coalesced() {
        let start = Instant::now();
        let mut t = Throughput::default();
        t.push_at(start, 100);
        t.push_at(start + ms(50), 100);
        assert_eq!(t.samples.len(), 1);
        t.push_at(start + ms(150), 100);
        assert_eq!(t.samples.len(), 2);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let start = Instant::now();
        let mut t = Throughput::new(Duration::from_secs(1));
        t.push_at(start, 5000);
        t.push_at(start + ms(1500), 1000);
        assert_eq!(t.samples.len(), 1);
        assert_eq!(t.speed_at(start + ms(2500)), 1000);
    }

    #[test]
    fn reads_are_cached_briefly() {
        let start = Instant::now();
        let mut t = Throughput::default();
        t.push_at(start, 1000);
        let first = t.speed_at(start + ms(1000));
        t.push_at(start + ms(1010), 100_000);
        assert_eq!(t.speed_at(start + ms(1050)), first);
        assert!(t.speed_at(start + ms(1200)) > first);
    }

    #[test]
    fn eta_needs_a_rate() {
        assert_eq!(eta(100, 0), None);
        assert_eq!(eta(0, 10), None);
        assert_eq!(eta(100, 10), Some(Duration::from_secs(10)));
    }
}

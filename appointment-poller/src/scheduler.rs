//! Poll pacing: the interval, the wall-clock gate and the cool-down.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Timelike};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INTERVAL_MINUTES: [u64; 3] = [1, 2, 3];
const COOLDOWN_MINUTES: [u64; 3] = [30, 45, 60];

/// Timing parameters, drawn once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub interval: Duration,
    /// Earliest second within a gate minute at which polling may start
    pub second_threshold: u32,
    pub cooldown: Duration,
}

impl Pacing {
    pub fn new(interval: Duration, second_threshold: u32, cooldown: Duration) -> Self {
        Self {
            interval,
            second_threshold,
            cooldown,
        }
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let interval_minutes = *INTERVAL_MINUTES.choose(&mut rng).unwrap_or(&2);
        let cooldown_minutes = *COOLDOWN_MINUTES.choose(&mut rng).unwrap_or(&45);
        Self::new(
            Duration::from_secs(interval_minutes * 60),
            rng.gen_range(25..=30),
            Duration::from_secs(cooldown_minutes * 60),
        )
    }

    /// Whole minutes of the interval, at least one.
    pub fn interval_minutes(&self) -> u32 {
        (self.interval.as_secs() / 60).clamp(1, 60) as u32
    }

    /// The minute is a multiple of the interval and the threshold second has passed.
    pub fn gate_open(&self, now: &NaiveDateTime) -> bool {
        now.minute() % self.interval_minutes() == 0 && now.second() >= self.second_threshold
    }

    /// Time from `now` until the gate next opens; zero while it is open.
    pub fn until_open(&self, now: NaiveDateTime) -> Duration {
        if self.gate_open(&now) {
            return Duration::ZERO;
        }

        let interval_minutes = self.interval_minutes();
        let offset = now.minute() % interval_minutes;
        let minutes_ahead = if offset == 0 {
            0
        } else {
            interval_minutes - offset
        };
        let minute_start = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        let opens = minute_start
            + ChronoDuration::minutes(i64::from(minutes_ahead))
            + ChronoDuration::seconds(i64::from(self.second_threshold));

        (opens - now).to_std().unwrap_or_default()
    }
}

/// Sleep for `duration` unless `shutdown` fires first. Returns `false` when
/// interrupted.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn pacing(interval_minutes: u64, second_threshold: u32) -> Pacing {
        Pacing::new(
            Duration::from_secs(interval_minutes * 60),
            second_threshold,
            Duration::from_secs(30 * 60),
        )
    }

    #[test]
    fn test_random_within_bounds() {
        for _ in 0..50 {
            let p = Pacing::random();
            assert!((1..=3).contains(&p.interval_minutes()));
            assert!((25..=30).contains(&p.second_threshold));
            assert!(COOLDOWN_MINUTES.contains(&(p.cooldown.as_secs() / 60)));
        }
    }

    #[test]
    fn test_sub_minute_interval_gates_every_minute() {
        let p = Pacing::new(Duration::from_millis(10), 0, Duration::ZERO);
        assert_eq!(p.interval_minutes(), 1);
        assert_eq!(p.until_open(at("2024-01-01 10:03:00")), Duration::ZERO);
        assert_eq!(p.until_open(at("2024-01-01 10:07:41")), Duration::ZERO);
    }

    #[test]
    fn test_gate() {
        let p = pacing(2, 25);
        assert!(p.gate_open(&at("2024-01-01 10:02:25")));
        assert!(p.gate_open(&at("2024-01-01 10:00:59")));
        assert!(!p.gate_open(&at("2024-01-01 10:02:24")));
        assert!(!p.gate_open(&at("2024-01-01 10:03:30")));
    }

    #[test]
    fn test_until_open() {
        let p = pacing(2, 25);
        assert_eq!(p.until_open(at("2024-01-01 10:01:40")), Duration::from_secs(45));
        assert_eq!(p.until_open(at("2024-01-01 10:02:10")), Duration::from_secs(15));
        assert_eq!(p.until_open(at("2024-01-01 10:02:30")), Duration::ZERO);

        let p = pacing(3, 30);
        assert_eq!(p.until_open(at("2024-01-01 10:59:00")), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &token).await);
        assert!(sleep_or_cancel(Duration::ZERO, &CancellationToken::new()).await);
    }
}

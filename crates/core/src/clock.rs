//! Wall-clock sources for the trading session.

use crate::traits::Clock;
use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;

/// Real time in the exchange's timezone.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    #[must_use]
    pub const fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(chrono_tz::Asia::Kolkata)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 10, 19)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .unwrap()
    }

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let clock = FixedClock::new(at(9, 15));
        assert_eq!(clock.now(), at(9, 15));
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), at(9, 20));
        clock.set(at(15, 1));
        assert_eq!(clock.now(), at(15, 1));
    }

    #[test]
    fn system_clock_is_ahead_of_utc_in_kolkata() {
        let clock = SystemClock::default();
        let local = clock.now();
        let utc = Utc::now().naive_utc();
        let offset = local - utc;
        // IST is UTC+05:30; allow for the two reads not being simultaneous.
        assert!(offset > chrono::Duration::minutes(329));
        assert!(offset < chrono::Duration::minutes(331));
    }
}

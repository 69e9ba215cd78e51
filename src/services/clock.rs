use std::sync::RwLock;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// All "tomorrow" and "24 hours" decisions are made in this zone,
/// whatever the server locale is.
pub const BUSINESS_TZ: Tz = chrono_tz::Pacific::Auckland;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant, for tests.
#[derive(Debug)]
pub struct FixedClock {
    time: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: RwLock::new(time),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        let mut guard = self.time.write().unwrap_or_else(|e| e.into_inner());
        *guard = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.time.write().unwrap_or_else(|e| e.into_inner());
        *guard = *guard + by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Calendar date in the business timezone at `now`.
pub fn business_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&BUSINESS_TZ).date_naive()
}

/// The date reminders are sent for.
pub fn business_tomorrow(now: DateTime<Utc>) -> NaiveDate {
    let today = business_today(now);
    today.succ_opt().unwrap_or(today)
}

/// Resolves a business-local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside
/// the spring-forward gap move to the first valid instant after it.
pub fn business_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let local = NaiveDateTime::new(date, time);
    match BUSINESS_TZ.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Auckland's gap is one hour; step out of it in minute increments.
            let mut probe = local;
            for _ in 0..=120 {
                probe = probe + Duration::minutes(1);
                if let LocalResult::Single(dt) = BUSINESS_TZ.from_local_datetime(&probe) {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&local)
        }
    }
}

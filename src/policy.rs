//! Calendar-based token expiry.
//!
//! Broker access tokens expire at a fixed local time-of-day (03:30 IST by
//! default) rather than after a fixed lifetime. A token fetched at or after
//! the rollover lives until the next day's rollover; a token fetched before
//! it dies at that same morning's rollover.

use crate::ledger::{LoginState, StatusRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Exchange-local daily rollover.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpiryPolicy {
    rollover: NaiveTime,
    timezone: Tz,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            rollover: NaiveTime::from_hms_opt(3, 30, 0).unwrap_or(NaiveTime::MIN),
            timezone: chrono_tz::Asia::Kolkata,
        }
    }
}

impl ExpiryPolicy {
    pub fn new(rollover: NaiveTime, timezone: Tz) -> Self {
        Self { rollover, timezone }
    }

    /// Builds a policy from config strings, e.g. `"03:30:00"` and `"Asia/Kolkata"`.
    pub fn parse(rollover: &str, timezone: &str) -> Result<Self> {
        let rollover = NaiveTime::parse_from_str(rollover, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(rollover, "%H:%M"))
            .with_context(|| format!("Invalid rollover time '{}' (expected HH:MM[:SS])", rollover))?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' is not a valid IANA timezone", timezone))?;
        Ok(Self::new(rollover, timezone))
    }

    pub fn rollover(&self) -> NaiveTime {
        self.rollover
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The instant a token fetched at `fetched_at` stops being valid.
    pub fn expires_at(&self, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
        let local = fetched_at.with_timezone(&self.timezone);
        let date = if local.time() >= self.rollover {
            local.date_naive() + Duration::days(1)
        } else {
            local.date_naive()
        };

        self.resolve_local(date.and_time(self.rollover))
    }

    /// Whether the token recorded by `record` may still be used at `now`.
    pub fn is_valid(&self, record: &StatusRecord, now: DateTime<Utc>) -> bool {
        if record.state != LoginState::Success {
            return false;
        }
        let Some(fetched_at) = record.fetched_at else {
            return false;
        };

        now < self.expires_at(fetched_at)
    }

    /// Maps a local wall-clock time to an instant.
    ///
    /// Ambiguous times (DST fall-back) take the earlier instant. Times inside
    /// a DST gap move forward to the first minute that exists.
    fn resolve_local(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let mut candidate = naive;
                for _ in 0..(24 * 60) {
                    candidate += Duration::minutes(1);
                    if let Some(t) = self.timezone.from_local_datetime(&candidate).earliest() {
                        return t.with_timezone(&Utc);
                    }
                }
                Utc.from_utc_datetime(&naive)
            }
        }
    }
}

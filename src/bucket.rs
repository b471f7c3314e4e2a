//! Day bucket resolution under one fixed reference timezone
//!
//! The resolver is the single source of truth for which calendar day an
//! event timestamp belongs to. All callers share one configured UTC offset
//! and day-start hour; changing either after data exists is a breaking
//! migration, not a runtime option.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar-day identifier a timestamp is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayBucket(pub NaiveDate);

impl DayBucket {
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The following day bucket
    pub fn next(&self) -> DayBucket {
        DayBucket(self.0.succ_opt().unwrap_or(NaiveDate::MAX))
    }

    /// The preceding day bucket
    pub fn prev(&self) -> DayBucket {
        DayBucket(self.0.pred_opt().unwrap_or(NaiveDate::MIN))
    }
}

impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayBucket {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DayBucket(NaiveDate::parse_from_str(s, "%Y-%m-%d")?))
    }
}

/// Maps timestamps to day buckets and decides when a day is complete
#[derive(Debug, Clone)]
pub struct BucketResolver {
    offset: FixedOffset,
    day_start: NaiveTime,
    grace: Duration,
}

impl BucketResolver {
    /// Create a resolver. `day_start_hour` must be below 24 and `grace`
    /// non-negative; both are validated by the config layer before this is
    /// called, so invalid input falls back to midnight / zero grace.
    pub fn new(offset: FixedOffset, day_start_hour: u32, grace: std::time::Duration) -> Self {
        Self {
            offset,
            day_start: NaiveTime::from_hms_opt(day_start_hour, 0, 0)
                .unwrap_or(NaiveTime::MIN),
            grace: Duration::from_std(grace).unwrap_or_else(|_| Duration::zero()),
        }
    }

    fn offset_seconds(&self) -> i64 {
        self.offset.local_minus_utc() as i64
    }

    fn start_seconds(&self) -> i64 {
        (self.day_start - NaiveTime::MIN).num_seconds()
    }

    /// The day bucket a timestamp belongs to
    pub fn bucket_for(&self, ts: DateTime<Utc>) -> DayBucket {
        let local = ts.naive_utc() + Duration::seconds(self.offset_seconds());
        let shifted = local - Duration::seconds(self.start_seconds());
        DayBucket(shifted.date())
    }

    /// Instant at which the bucket begins, in UTC
    pub fn start_of(&self, day: DayBucket) -> DateTime<Utc> {
        let local = day.0.and_time(self.day_start);
        let utc = local - Duration::seconds(self.offset_seconds());
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }

    /// Instant at which the bucket ends, in UTC
    pub fn end_of(&self, day: DayBucket) -> DateTime<Utc> {
        self.start_of(day.next())
    }

    /// Earliest instant at which the bucket is eligible for aggregation:
    /// its end boundary plus the grace period that absorbs clock skew
    /// between event ingestion and the scheduler.
    pub fn complete_at(&self, day: DayBucket) -> DateTime<Utc> {
        self.end_of(day) + self.grace
    }

    /// Whether the bucket is eligible for aggregation at `now`
    pub fn is_complete(&self, day: DayBucket, now: DateTime<Utc>) -> bool {
        now >= self.complete_at(day)
    }

    pub fn today(&self, now: DateTime<Utc>) -> DayBucket {
        self.bucket_for(now)
    }

    pub fn yesterday(&self, now: DateTime<Utc>) -> DayBucket {
        self.today(now).prev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc_resolver(grace_secs: u64) -> BucketResolver {
        BucketResolver::new(
            FixedOffset::east_opt(0).expect("zero offset"),
            0,
            std::time::Duration::from_secs(grace_secs),
        )
    }

    fn day(s: &str) -> DayBucket {
        s.parse().expect("valid day")
    }

    #[test]
    fn bucket_for_assigns_utc_calendar_day() {
        let resolver = utc_resolver(0);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap();
        assert_eq!(resolver.bucket_for(ts), day("2024-03-01"));

        let ts = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(resolver.bucket_for(ts), day("2024-03-02"));
    }

    #[test]
    fn bucket_for_respects_reference_offset() {
        // UTC+05:30: 20:00 UTC on Mar 1 is already 01:30 on Mar 2 locally
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let resolver = BucketResolver::new(offset, 0, std::time::Duration::ZERO);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(resolver.bucket_for(ts), day("2024-03-02"));
    }

    #[test]
    fn bucket_for_respects_day_start_hour() {
        // Days start at 04:00: 03:59 still belongs to the previous bucket
        let resolver = BucketResolver::new(
            FixedOffset::east_opt(0).unwrap(),
            4,
            std::time::Duration::ZERO,
        );
        let ts = Utc.with_ymd_and_hms(2024, 3, 2, 3, 59, 0).unwrap();
        assert_eq!(resolver.bucket_for(ts), day("2024-03-01"));
        let ts = Utc.with_ymd_and_hms(2024, 3, 2, 4, 0, 0).unwrap();
        assert_eq!(resolver.bucket_for(ts), day("2024-03-02"));
    }

    #[test]
    fn is_complete_waits_for_grace_period() {
        let resolver = utc_resolver(300);
        let target = day("2024-03-01");

        let at_boundary = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        assert!(!resolver.is_complete(target, at_boundary));

        let within_grace = Utc.with_ymd_and_hms(2024, 3, 2, 0, 4, 59).unwrap();
        assert!(!resolver.is_complete(target, within_grace));

        let past_grace = Utc.with_ymd_and_hms(2024, 3, 2, 0, 5, 0).unwrap();
        assert!(resolver.is_complete(target, past_grace));
    }

    #[test]
    fn yesterday_is_previous_bucket() {
        let resolver = utc_resolver(0);
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
        assert_eq!(resolver.yesterday(now), day("2024-03-01"));
    }

    #[test]
    fn day_bucket_round_trips_through_display() {
        let d = day("2024-12-31");
        assert_eq!(d.to_string(), "2024-12-31");
        assert_eq!(d.to_string().parse::<DayBucket>().unwrap(), d);
    }
}

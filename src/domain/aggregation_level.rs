// Aggregation level: a calendar granularity plus its bucketing rules
use super::time_bucket::TimeBucket;
use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Timelike,
    Utc,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LevelError {
    #[error("aggregation amount must be positive")]
    ZeroAmount,
    #[error("aggregation {field} is already set to a different value")]
    AlreadySet { field: &'static str },
    #[error("aggregation {field} is missing")]
    Missing { field: &'static str },
    #[error("aggregation duration exceeds 1000 years")]
    TooLong,
    #[error("not an aggregation level: {0:?}")]
    Malformed(String),
}

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;
const YEAR_SECS: i64 = 31_556_952;
const MONTH_SECS: i64 = YEAR_SECS / 12;
const MAX_YEARS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

/// Local boundary that fixed-length steps are counted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Minute,
    Hour,
    Day,
    Year,
    /// 1970-01-01 local; steps are never cut.
    Epoch,
}

impl Anchor {
    /// The finest anchor whose period is longer than `duration_secs`.
    fn for_duration(duration_secs: i64) -> Anchor {
        [
            (Anchor::Minute, MINUTE_SECS),
            (Anchor::Hour, HOUR_SECS),
            (Anchor::Day, DAY_SECS),
            (Anchor::Year, YEAR_SECS),
        ]
        .into_iter()
        .find(|(_, period)| duration_secs < *period)
        .map_or(Anchor::Epoch, |(anchor, _)| anchor)
    }

    /// Start of the anchor period holding `local`, and the start of the next
    /// one when steps are cut there.
    fn bounds(self, local: NaiveDateTime) -> (NaiveDateTime, Option<NaiveDateTime>) {
        let date = local.date();
        match self {
            Anchor::Minute => {
                let start = local
                    .with_nanosecond(0)
                    .and_then(|t| t.with_second(0))
                    .unwrap_or(local);
                (start, Some(start + TimeDelta::minutes(1)))
            }
            Anchor::Hour => {
                let start = local
                    .with_nanosecond(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_minute(0))
                    .unwrap_or(local);
                (start, Some(start + TimeDelta::hours(1)))
            }
            Anchor::Day => {
                let start = date.and_time(NaiveTime::MIN);
                (start, Some(start + TimeDelta::days(1)))
            }
            Anchor::Year => (
                year_start(date).and_time(NaiveTime::MIN),
                next_year_start(date).map(|d| d.and_time(NaiveTime::MIN)),
            ),
            Anchor::Epoch => (epoch_date().and_time(NaiveTime::MIN), None),
        }
    }
}

/// How buckets of a level are laid out. Chosen from the duration alone, so
/// equal levels always produce the same buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grid {
    Steps(Anchor),
    /// Whole local days.
    Days(i64),
    /// Whole calendar months.
    Months(i64),
}

impl AggregationUnit {
    pub const ALL: [AggregationUnit; 7] = [
        AggregationUnit::Seconds,
        AggregationUnit::Minutes,
        AggregationUnit::Hours,
        AggregationUnit::Days,
        AggregationUnit::Weeks,
        AggregationUnit::Months,
        AggregationUnit::Years,
    ];

    /// Length of one unit in seconds. Months and years use the average
    /// Gregorian lengths.
    pub fn base_seconds(self) -> i64 {
        match self {
            AggregationUnit::Seconds => 1,
            AggregationUnit::Minutes => MINUTE_SECS,
            AggregationUnit::Hours => HOUR_SECS,
            AggregationUnit::Days => DAY_SECS,
            AggregationUnit::Weeks => 7 * DAY_SECS,
            AggregationUnit::Months => MONTH_SECS,
            AggregationUnit::Years => YEAR_SECS,
        }
    }

    /// Name stored in the `aggregateUnit` property.
    pub fn name(self) -> &'static str {
        match self {
            AggregationUnit::Seconds => "SECONDS",
            AggregationUnit::Minutes => "MINUTES",
            AggregationUnit::Hours => "HOURS",
            AggregationUnit::Days => "DAYS",
            AggregationUnit::Weeks => "WEEKS",
            AggregationUnit::Months => "MONTHS",
            AggregationUnit::Years => "YEARS",
        }
    }

    fn singular(self) -> &'static str {
        match self {
            AggregationUnit::Seconds => "second",
            AggregationUnit::Minutes => "minute",
            AggregationUnit::Hours => "hour",
            AggregationUnit::Days => "day",
            AggregationUnit::Weeks => "week",
            AggregationUnit::Months => "month",
            AggregationUnit::Years => "year",
        }
    }

    /// Accepts singular or plural names in any case.
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.trim().to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        Self::ALL.into_iter().find(|unit| unit.singular() == singular)
    }
}

/// Collects unit and amount; each may be assigned once.
#[derive(Debug, Clone, Default)]
pub struct LevelBuilder {
    unit: Option<AggregationUnit>,
    amount: Option<u32>,
}

impl LevelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(&mut self, unit: AggregationUnit) -> Result<&mut Self, LevelError> {
        match self.unit {
            Some(existing) if existing != unit => Err(LevelError::AlreadySet { field: "unit" }),
            _ => {
                self.unit = Some(unit);
                Ok(self)
            }
        }
    }

    pub fn amount(&mut self, amount: u32) -> Result<&mut Self, LevelError> {
        if amount == 0 {
            return Err(LevelError::ZeroAmount);
        }
        match self.amount {
            Some(existing) if existing != amount => {
                Err(LevelError::AlreadySet { field: "amount" })
            }
            _ => {
                self.amount = Some(amount);
                Ok(self)
            }
        }
    }

    pub fn build(&self) -> Result<AggregationLevel, LevelError> {
        let unit = self.unit.ok_or(LevelError::Missing { field: "unit" })?;
        let amount = self.amount.ok_or(LevelError::Missing { field: "amount" })?;
        let duration_secs = unit
            .base_seconds()
            .checked_mul(i64::from(amount))
            .filter(|secs| *secs <= MAX_YEARS * YEAR_SECS)
            .ok_or(LevelError::TooLong)?;
        Ok(AggregationLevel {
            unit,
            amount,
            duration_secs,
        })
    }
}

/// A time granularity. Levels compare, order and hash by duration, so
/// `60 minutes` and `1 hour` are the same level.
#[derive(Debug, Clone, Copy)]
pub struct AggregationLevel {
    unit: AggregationUnit,
    amount: u32,
    duration_secs: i64,
}

impl AggregationLevel {
    pub fn new(unit: AggregationUnit, amount: u32) -> Result<Self, LevelError> {
        LevelBuilder::new().unit(unit)?.amount(amount)?.build()
    }

    pub fn unit(&self) -> AggregationUnit {
        self.unit
    }

    pub fn amount(&self) -> u32 {
        self.amount
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.duration_secs)
    }

    /// Parses `"N unit"`, optionally wrapped in brackets. Returns `None`
    /// for anything that is not a level.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let inner = match trimmed.strip_prefix('[') {
            Some(rest) => rest.strip_suffix(']')?,
            None => trimmed,
        };
        let mut parts = inner.split_whitespace();
        let amount = parts.next()?.parse::<u32>().ok()?;
        let unit = AggregationUnit::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Self::new(unit, amount).ok()
    }

    pub fn to_postfix(&self) -> String {
        format!("[{}]", self)
    }

    /// True when this level's duration is a whole multiple of `smaller`.
    pub fn is_multiple_of(&self, smaller: &AggregationLevel) -> bool {
        smaller.duration_secs > 0 && self.duration_secs % smaller.duration_secs == 0
    }

    pub fn bucket_start<Tz: TimeZone>(&self, instant: DateTime<Utc>, zone: &Tz) -> DateTime<Utc> {
        self.bucket_containing(instant, zone).start
    }

    /// The bucket of this level containing `instant`, aligned in `zone`.
    ///
    /// Whole months and whole days follow the local calendar. Other
    /// durations step from the finest anchor (minute, hour, day, year) whose
    /// period is longer than the duration, and the last bucket before the
    /// next anchor is cut short. Buckets of a year or more count from 1970.
    pub fn bucket_containing<Tz: TimeZone>(&self, instant: DateTime<Utc>, zone: &Tz) -> TimeBucket {
        let local = instant.with_timezone(zone).naive_local();
        let (start, end) = match self.grid() {
            Grid::Steps(anchor) => return self.stepped_bucket(instant, local, anchor, zone),
            Grid::Days(days) => day_bounds(local.date(), days),
            Grid::Months(months) => month_bounds(local.date(), months),
        };
        TimeBucket::new(local_to_utc(zone, start), local_to_utc(zone, end))
    }

    /// Ordered buckets whose union covers `[start, end]`. Always yields at
    /// least one bucket, also for an instant.
    pub fn buckets_covering<Tz: TimeZone>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        zone: &Tz,
    ) -> Vec<TimeBucket> {
        let mut bucket = self.bucket_containing(start, zone);
        let mut buckets = vec![bucket];
        while bucket.end < end {
            let next = self.bucket_containing(bucket.end, zone);
            if next.end <= bucket.end {
                break;
            }
            buckets.push(next);
            bucket = next;
        }
        buckets
    }

    fn grid(&self) -> Grid {
        let secs = self.duration_secs;
        if secs % MONTH_SECS == 0 {
            Grid::Months(secs / MONTH_SECS)
        } else if secs % DAY_SECS == 0 {
            Grid::Days(secs / DAY_SECS)
        } else {
            Grid::Steps(Anchor::for_duration(secs))
        }
    }

    fn stepped_bucket<Tz: TimeZone>(
        &self,
        instant: DateTime<Utc>,
        local: NaiveDateTime,
        anchor: Anchor,
        zone: &Tz,
    ) -> TimeBucket {
        let (anchor_local, next_local) = anchor.bounds(local);
        let origin = local_to_utc(zone, anchor_local);
        let step_ms = self.duration_secs * 1_000;
        let periods = (instant - origin).num_milliseconds().div_euclid(step_ms);
        let start = origin + TimeDelta::milliseconds(periods * step_ms);
        let end = start + self.duration();
        let end = match next_local {
            Some(next) => end.min(local_to_utc(zone, next)),
            None => end,
        };
        TimeBucket::new(start, end)
    }
}

fn epoch_date() -> NaiveDate {
    DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

fn year_start(date: NaiveDate) -> NaiveDate {
    date.with_ordinal(1).unwrap_or(date)
}

fn next_year_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
}

/// Runs of `days` local days from January 1, cut at the next January 1.
/// Runs of a year or more count from 1970 instead.
fn day_bounds(date: NaiveDate, days: i64) -> (NaiveDateTime, NaiveDateTime) {
    let (origin, cut) = if days * DAY_SECS < YEAR_SECS {
        (year_start(date), next_year_start(date))
    } else {
        (epoch_date(), None)
    };
    let start = origin + TimeDelta::days((date - origin).num_days().div_euclid(days) * days);
    let end = start + TimeDelta::days(days);
    let end = cut.map_or(end, |cut| end.min(cut));
    (start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
}

/// Same layout as `day_bounds`, in calendar months.
fn month_bounds(date: NaiveDate, months: i64) -> (NaiveDateTime, NaiveDateTime) {
    let year_first = i64::from(date.year()) * 12;
    let index = year_first + i64::from(date.month0());
    let (start, end) = if months < 12 {
        let start = year_first + (index - year_first).div_euclid(months) * months;
        (start, (start + months).min(year_first + 12))
    } else {
        let epoch = 1970 * 12;
        let start = epoch + (index - epoch).div_euclid(months) * months;
        (start, start + months)
    };
    (month_start(start, date), month_start(end, date))
}

fn month_start(index: i64, fallback: NaiveDate) -> NaiveDateTime {
    let month = index.rem_euclid(12) as u32 + 1;
    i32::try_from(index.div_euclid(12))
        .ok()
        .and_then(|year| NaiveDate::from_ymd_opt(year, month, 1))
        .unwrap_or(fallback)
        .and_time(NaiveTime::MIN)
}

fn local_to_utc<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match zone.from_local_datetime(&local).earliest() {
        Some(resolved) => resolved.with_timezone(&Utc),
        None => {
            // Skipped local time: apply the offset in effect at that UTC wall time.
            let offset = zone.offset_from_utc_datetime(&local).fix();
            Utc.from_utc_datetime(&local)
                - TimeDelta::seconds(i64::from(offset.local_minus_utc()))
        }
    }
}

impl PartialEq for AggregationLevel {
    fn eq(&self, other: &Self) -> bool {
        self.duration_secs == other.duration_secs
    }
}

impl Eq for AggregationLevel {}

impl Hash for AggregationLevel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.duration_secs.hash(state);
    }
}

impl PartialOrd for AggregationLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AggregationLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.duration_secs.cmp(&other.duration_secs)
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.unit.singular();
        if self.amount == 1 {
            write!(f, "1 {}", unit)
        } else {
            write!(f, "{} {}s", self.amount, unit)
        }
    }
}

impl FromStr for AggregationLevel {
    type Err = LevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| LevelError::Malformed(s.to_string()))
    }
}

impl Serialize for AggregationLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AggregationLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use std::collections::hash_map::DefaultHasher;

    fn level(unit: AggregationUnit, amount: u32) -> AggregationLevel {
        AggregationLevel::new(unit, amount).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn hash_of(level: &AggregationLevel) -> u64 {
        let mut hasher = DefaultHasher::new();
        level.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_parse_accepts_brackets_and_plurals() {
        assert_eq!(AggregationLevel::parse("[1 hour]"), Some(level(AggregationUnit::Hours, 1)));
        assert_eq!(AggregationLevel::parse("1 Hours"), Some(level(AggregationUnit::Hours, 1)));
        assert_eq!(AggregationLevel::parse(" 15 MINUTES "), Some(level(AggregationUnit::Minutes, 15)));
        assert_eq!(AggregationLevel::parse("[2 days]"), Some(level(AggregationUnit::Days, 2)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "hour", "1", "0 hours", "-1 hour", "1 fortnight", "[1 hour", "1 hour extra", "x hours"] {
            assert_eq!(AggregationLevel::parse(text), None, "{text}");
        }
        assert!(matches!("nope".parse::<AggregationLevel>(), Err(LevelError::Malformed(_))));
    }

    #[test]
    fn test_postfix_round_trip() {
        for unit in AggregationUnit::ALL {
            for amount in [1, 2, 4, 7, 15, 90] {
                let l = level(unit, amount);
                let parsed = AggregationLevel::parse(&l.to_postfix()).unwrap();
                assert_eq!(parsed, l);
                assert_eq!(parsed.unit(), unit);
                assert_eq!(parsed.amount(), amount);
            }
        }
        assert_eq!(level(AggregationUnit::Hours, 4).to_postfix(), "[4 hours]");
        assert_eq!(level(AggregationUnit::Days, 1).to_postfix(), "[1 day]");
    }

    #[test]
    fn test_equal_duration_means_equal_level() {
        let sixty_minutes = level(AggregationUnit::Minutes, 60);
        let one_hour = level(AggregationUnit::Hours, 1);
        assert_eq!(sixty_minutes, one_hour);
        assert_eq!(hash_of(&sixty_minutes), hash_of(&one_hour));
        assert!(level(AggregationUnit::Hours, 23) < level(AggregationUnit::Days, 1));
    }

    #[test]
    fn test_builder_fields_are_write_once() {
        let mut builder = LevelBuilder::new();
        builder.unit(AggregationUnit::Hours).unwrap();
        builder.unit(AggregationUnit::Hours).unwrap();
        assert_eq!(
            builder.unit(AggregationUnit::Days).unwrap_err(),
            LevelError::AlreadySet { field: "unit" }
        );
        assert_eq!(builder.build().unwrap_err(), LevelError::Missing { field: "amount" });
        builder.amount(3).unwrap();
        assert_eq!(builder.amount(4).unwrap_err(), LevelError::AlreadySet { field: "amount" });
        assert_eq!(builder.amount(0).unwrap_err(), LevelError::ZeroAmount);
        assert_eq!(builder.build().unwrap(), level(AggregationUnit::Hours, 3));
    }

    #[test]
    fn test_multiples() {
        let hour = level(AggregationUnit::Hours, 1);
        assert!(level(AggregationUnit::Days, 1).is_multiple_of(&hour));
        assert!(level(AggregationUnit::Hours, 4).is_multiple_of(&hour));
        assert!(!level(AggregationUnit::Minutes, 90).is_multiple_of(&hour));
    }

    #[test]
    fn test_hourly_buckets_align_to_local_hour() {
        let zone = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let hour = level(AggregationUnit::Hours, 1);
        let bucket = hour.bucket_containing(utc(2024, 5, 10, 12, 10, 0), &zone);
        assert_eq!(bucket.start, utc(2024, 5, 10, 11, 30, 0));
        assert_eq!(bucket.end, utc(2024, 5, 10, 12, 30, 0));
    }

    #[test]
    fn test_daily_buckets_align_to_local_midnight() {
        let zone = FixedOffset::east_opt(2 * 3600).unwrap();
        let day = level(AggregationUnit::Days, 1);
        assert_eq!(day.bucket_start(utc(2024, 5, 10, 23, 0, 0), &zone), utc(2024, 5, 10, 22, 0, 0));
        assert_eq!(day.bucket_start(utc(2024, 5, 10, 21, 59, 59), &zone), utc(2024, 5, 9, 22, 0, 0));
    }

    #[test]
    fn test_non_divisor_amount_is_cut_at_midnight() {
        let seven = level(AggregationUnit::Hours, 7);
        let starts: Vec<_> = seven
            .buckets_covering(utc(2024, 1, 2, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0), &Utc)
            .into_iter()
            .map(|b| (b.start, b.end))
            .collect();
        assert_eq!(
            starts,
            vec![
                (utc(2024, 1, 2, 0, 0, 0), utc(2024, 1, 2, 7, 0, 0)),
                (utc(2024, 1, 2, 7, 0, 0), utc(2024, 1, 2, 14, 0, 0)),
                (utc(2024, 1, 2, 14, 0, 0), utc(2024, 1, 2, 21, 0, 0)),
                (utc(2024, 1, 2, 21, 0, 0), utc(2024, 1, 3, 0, 0, 0)),
            ]
        );
        assert_eq!(seven.bucket_start(utc(2024, 1, 3, 1, 0, 0), &Utc), utc(2024, 1, 3, 0, 0, 0));
    }

    #[test]
    fn test_anchor_follows_duration() {
        let ninety = level(AggregationUnit::Minutes, 90);
        let bucket = ninety.bucket_containing(utc(2024, 5, 10, 10, 10, 0), &Utc);
        assert_eq!((bucket.start, bucket.end), (utc(2024, 5, 10, 9, 0, 0), utc(2024, 5, 10, 10, 30, 0)));

        let thirty_six = level(AggregationUnit::Hours, 36);
        let bucket = thirty_six.bucket_containing(utc(2024, 1, 2, 12, 0, 0), &Utc);
        assert_eq!((bucket.start, bucket.end), (utc(2024, 1, 2, 12, 0, 0), utc(2024, 1, 4, 0, 0, 0)));
    }

    #[test]
    fn test_equal_levels_bucket_alike() {
        let pairs = [
            (level(AggregationUnit::Minutes, 120), level(AggregationUnit::Hours, 2)),
            (level(AggregationUnit::Hours, 48), level(AggregationUnit::Days, 2)),
            (level(AggregationUnit::Days, 7), level(AggregationUnit::Weeks, 1)),
            (level(AggregationUnit::Months, 24), level(AggregationUnit::Years, 2)),
        ];
        let zone = FixedOffset::east_opt(3600).unwrap();
        for (a, b) in pairs {
            for t in [utc(2024, 5, 10, 10, 10, 0), utc(2024, 5, 10, 23, 59, 0), utc(2024, 12, 31, 23, 30, 0)] {
                assert_eq!(a.bucket_containing(t, &zone), b.bucket_containing(t, &zone), "{a} vs {b} at {t}");
            }
        }
    }

    #[test]
    fn test_month_and_year_buckets_follow_calendar() {
        let span = |l: AggregationLevel, t| {
            let b = l.bucket_containing(t, &Utc);
            (b.start, b.end)
        };
        assert_eq!(
            span(level(AggregationUnit::Months, 1), utc(2024, 2, 29, 13, 0, 0)),
            (utc(2024, 2, 1, 0, 0, 0), utc(2024, 3, 1, 0, 0, 0))
        );
        assert_eq!(
            span(level(AggregationUnit::Months, 3), utc(2024, 5, 10, 0, 0, 0)),
            (utc(2024, 4, 1, 0, 0, 0), utc(2024, 7, 1, 0, 0, 0))
        );
        assert_eq!(
            span(level(AggregationUnit::Months, 5), utc(2024, 12, 15, 0, 0, 0)),
            (utc(2024, 11, 1, 0, 0, 0), utc(2025, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            span(level(AggregationUnit::Years, 1), utc(2024, 6, 1, 0, 0, 0)),
            (utc(2024, 1, 1, 0, 0, 0), utc(2025, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            span(level(AggregationUnit::Years, 10), utc(2024, 6, 1, 0, 0, 0)),
            (utc(2020, 1, 1, 0, 0, 0), utc(2030, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_daily_buckets_follow_dst_in_named_zone() {
        let berlin = chrono_tz::Europe::Berlin;
        let day = level(AggregationUnit::Days, 1);
        let short = day.bucket_containing(utc(2024, 3, 31, 12, 0, 0), &berlin);
        assert_eq!((short.start, short.end), (utc(2024, 3, 30, 23, 0, 0), utc(2024, 3, 31, 22, 0, 0)));
        assert_eq!(day.bucket_containing(short.start, &berlin), short);

        let next = day.bucket_containing(short.end, &berlin);
        assert_eq!(next.start, short.end);
        assert_eq!(next.end - next.start, TimeDelta::hours(24));
    }

    #[test]
    fn test_rejects_durations_beyond_a_millennium() {
        assert_eq!(AggregationLevel::parse("[1000000 years]"), None);
        assert_eq!(
            AggregationLevel::new(AggregationUnit::Years, 1_000_000).unwrap_err(),
            LevelError::TooLong
        );
        let millennium = level(AggregationUnit::Years, 1_000);
        let t = utc(2024, 6, 1, 0, 0, 0);
        assert!(millennium.bucket_containing(t, &Utc).contains(t));
    }

    #[test]
    fn test_bucket_start_is_idempotent() {
        let zone = FixedOffset::west_opt(3 * 3600).unwrap();
        let instants = [
            utc(2024, 1, 1, 0, 0, 0),
            utc(2024, 2, 29, 13, 47, 11),
            utc(2023, 12, 31, 23, 59, 59),
            utc(2024, 7, 4, 6, 30, 0),
        ];
        for unit in AggregationUnit::ALL {
            for amount in [1, 5, 7, 13] {
                let l = level(unit, amount);
                for t in instants {
                    let once = l.bucket_start(t, &zone);
                    assert_eq!(l.bucket_start(once, &zone), once, "{l} at {t}");
                    assert!(l.bucket_containing(t, &zone).contains(t), "{l} at {t}");
                }
            }
        }
    }

    #[test]
    fn test_unit_amount_boundary_is_its_own_start() {
        let t = utc(2024, 6, 1, 0, 0, 0);
        for unit in [AggregationUnit::Seconds, AggregationUnit::Minutes, AggregationUnit::Hours, AggregationUnit::Days] {
            assert_eq!(level(unit, 1).bucket_start(t, &Utc), t);
        }
    }

    #[test]
    fn test_zero_width_span_yields_one_bucket() {
        let t = utc(2024, 6, 1, 10, 20, 30);
        for unit in AggregationUnit::ALL {
            let buckets = level(unit, 3).buckets_covering(t, t, &Utc);
            assert_eq!(buckets.len(), 1);
            assert!(buckets[0].contains(t));
        }
    }

    #[test]
    fn test_covering_span_is_minimal() {
        let hour = level(AggregationUnit::Hours, 1);
        let buckets = hour.buckets_covering(utc(2024, 6, 1, 10, 20, 0), utc(2024, 6, 1, 12, 0, 0), &Utc);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].start, utc(2024, 6, 1, 10, 0, 0));
        assert_eq!(buckets[1].end, utc(2024, 6, 1, 12, 0, 0));
    }

    #[test]
    fn test_serde_uses_human_form() {
        let l = level(AggregationUnit::Minutes, 15);
        assert_eq!(serde_json::to_string(&l).unwrap(), "\"15 minutes\"");
        let back: AggregationLevel = serde_json::from_str("\"[15 minutes]\"").unwrap();
        assert_eq!(back, l);
    }
}

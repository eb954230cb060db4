// Aggregate edge: one source -> target link at a single aggregation level
use super::aggregation_level::AggregationLevel;
use super::series::Series;
use super::time_bucket::{TimeBucket, TimeSpan};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::OnceLock;

/// Zone an edge's buckets are aligned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl EdgeZone {
    pub fn utc() -> Self {
        EdgeZone::Fixed(Utc.fix())
    }

    /// Offset from UTC in effect at `instant`.
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            EdgeZone::Named(tz) => tz.offset_from_utc_datetime(&instant.naive_utc()).fix(),
            EdgeZone::Fixed(offset) => *offset,
        }
    }

    pub fn buckets_covering(
        &self,
        level: &AggregationLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TimeBucket> {
        match self {
            EdgeZone::Named(tz) => level.buckets_covering(start, end, tz),
            EdgeZone::Fixed(offset) => level.buckets_covering(start, end, offset),
        }
    }
}

/// Debounce state for the bucket currently receiving observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BucketTracker {
    #[default]
    Unset,
    Active(TimeBucket),
}

impl BucketTracker {
    /// Moves to `bucket`. Returns the previous bucket when it just closed.
    pub fn advance(&mut self, bucket: TimeBucket) -> Option<TimeBucket> {
        match std::mem::replace(self, BucketTracker::Active(bucket)) {
            BucketTracker::Active(previous) if previous != bucket => Some(previous),
            _ => None,
        }
    }

    /// Resets to `Unset`. Returns the tracked bucket unless it is `bucket`
    /// itself, which the caller already handles.
    pub fn close(&mut self, bucket: &TimeBucket) -> Option<TimeBucket> {
        match std::mem::take(self) {
            BucketTracker::Active(previous) if previous != *bucket => Some(previous),
            _ => None,
        }
    }

    /// Closes with no successor bucket.
    pub fn flush(&mut self) -> Option<TimeBucket> {
        match std::mem::take(self) {
            BucketTracker::Active(previous) => Some(previous),
            BucketTracker::Unset => None,
        }
    }

    pub fn current(&self) -> Option<&TimeBucket> {
        match self {
            BucketTracker::Active(bucket) => Some(bucket),
            BucketTracker::Unset => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "type", content = "series")]
pub enum SourceRef {
    #[default]
    None,
    Direct(Series),
    Aggregate(Series),
}

impl SourceRef {
    pub fn series(&self) -> Option<&Series> {
        match self {
            SourceRef::Direct(series) | SourceRef::Aggregate(series) => Some(series),
            SourceRef::None => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SourceRef::None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateEdge {
    base_name: String,
    level: AggregationLevel,
    target: Series,
    source: SourceRef,
    source_is_chained: bool,
    source_is_collection: bool,
    #[serde(skip)]
    zone_hint: Option<String>,
    #[serde(skip)]
    zone: OnceLock<EdgeZone>,
    #[serde(skip)]
    tracker: BucketTracker,
}

impl AggregateEdge {
    pub fn new(base_name: impl Into<String>, level: AggregationLevel, target: Series) -> Self {
        Self {
            base_name: base_name.into(),
            level,
            target,
            source: SourceRef::None,
            source_is_chained: false,
            source_is_collection: false,
            zone_hint: None,
            zone: OnceLock::new(),
            tracker: BucketTracker::Unset,
        }
    }

    pub fn with_zone_hint(mut self, hint: impl Into<String>) -> Self {
        self.zone_hint = Some(hint.into());
        self
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn level(&self) -> &AggregationLevel {
        &self.level
    }

    pub fn target(&self) -> &Series {
        &self.target
    }

    pub(crate) fn target_mut(&mut self) -> &mut Series {
        &mut self.target
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn source_is_chained(&self) -> bool {
        self.source_is_chained
    }

    pub fn source_is_collection(&self) -> bool {
        self.source_is_collection
    }

    pub fn set_chained_source(&mut self, source: Series) {
        self.source = SourceRef::Aggregate(source);
        self.source_is_chained = true;
        self.source_is_collection = false;
    }

    pub fn set_direct_source(&mut self, source: Series, collection: bool) {
        self.source = SourceRef::Direct(source);
        self.source_is_chained = false;
        self.source_is_collection = collection;
    }

    pub fn set_aggregate_source(&mut self, source: Series) {
        self.source = SourceRef::Aggregate(source);
        self.source_is_chained = false;
        self.source_is_collection = false;
    }

    pub fn clear_source(&mut self) {
        self.source = SourceRef::None;
        self.source_is_chained = false;
        self.source_is_collection = false;
    }

    /// Index key of the upstream observation feed.
    pub fn source_locator(&self) -> Option<String> {
        self.source.series().map(Series::locator)
    }

    /// Zone used for bucket alignment, resolved once from the hint.
    pub fn zone(&self) -> EdgeZone {
        *self.zone.get_or_init(|| {
            let hint = self.zone_hint.as_deref().unwrap_or("UTC");
            parse_zone(hint).unwrap_or_else(|| {
                tracing::warn!(series = %self.target.name, zone = hint, "Unknown time zone, using UTC");
                EdgeZone::utc()
            })
        })
    }

    pub fn buckets_covering(&self, span: TimeSpan) -> Vec<TimeBucket> {
        self.zone().buckets_covering(&self.level, span.start, span.end)
    }

    pub fn advance(&mut self, bucket: TimeBucket) -> Option<TimeBucket> {
        self.tracker.advance(bucket)
    }

    pub fn close(&mut self, bucket: &TimeBucket) -> Option<TimeBucket> {
        self.tracker.close(bucket)
    }

    pub fn flush(&mut self) -> Option<TimeBucket> {
        self.tracker.flush()
    }

    pub fn current_bucket(&self) -> Option<&TimeBucket> {
        self.tracker.current()
    }

    /// Buckets of this edge's target that must be recomputed after an
    /// observation with the given phenomenon time arrived.
    pub fn calculate_buckets(&mut self, span: TimeSpan) -> Vec<TimeBucket> {
        let buckets = self.buckets_covering(span);
        if span.is_instant() {
            return buckets
                .first()
                .and_then(|bucket| self.tracker.advance(*bucket))
                .into_iter()
                .collect();
        }
        let mut triggers: Vec<TimeBucket> = buckets
            .first()
            .and_then(|bucket| self.tracker.close(bucket))
            .into_iter()
            .collect();
        triggers.extend(buckets);
        triggers
    }
}

/// Accepts `UTC`, `Z`, `GMT`, IANA names such as `Europe/Berlin`, and
/// numeric offsets such as `+02:00`.
pub fn parse_zone(text: &str) -> Option<EdgeZone> {
    let trimmed = text.trim();
    if ["UTC", "Z", "GMT"].iter().any(|name| trimmed.eq_ignore_ascii_case(name)) {
        return Some(EdgeZone::utc());
    }
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Some(EdgeZone::Named(tz));
    }
    trimmed.parse::<FixedOffset>().ok().map(EdgeZone::Fixed)
}

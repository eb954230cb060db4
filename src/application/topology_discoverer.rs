// Topology discovery - finds aggregate series, resolves their sources and repairs metadata
use crate::application::entity_store::{EntityStore, Expand, Filter, Page, Query, StoreError};
use crate::application::progress::{NoProgress, ProgressSink, ProgressWindow};
use crate::domain::aggregate_edge::AggregateEdge;
use crate::domain::aggregation_level::AggregationLevel;
use crate::domain::cross_reference::CrossReference;
use crate::domain::naming::{split_postfix, Postfix};
use crate::domain::series::{EntityId, Series, SeriesKind, Thing};
use crate::domain::topology::{EdgeKey, Topology};
use async_stream::try_stream;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const SERIES_FIELDS: &[&str] = &["id", "name", "properties", "unitOfMeasurement"];
const THING_FIELDS: &[&str] = &["id", "name", "properties"];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery cancelled")]
    Cancelled,
    #[error("discovery gathered no data: {0}")]
    Unavailable(#[source] StoreError),
}

/// Upper bounds of the setup, base-scan and target-scan phases; source
/// resolution and metadata repair fill the rest up to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseBounds {
    pub setup: f64,
    pub base_scan: f64,
    pub target_scan: f64,
}

impl Default for PhaseBounds {
    fn default() -> Self {
        Self {
            setup: 0.1,
            base_scan: 0.3,
            target_scan: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryOptions {
    pub default_time_zone: String,
    pub write_back: bool,
    pub write_concurrency: usize,
    pub page_size: usize,
    pub phases: PhaseBounds,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            default_time_zone: "UTC".to_string(),
            write_back: true,
            write_concurrency: 4,
            page_size: 100,
            phases: PhaseBounds::default(),
        }
    }
}

/// Data-quality findings collected while discovering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscoveryIssue {
    AmbiguousMatch { resource: &'static str, name: String, matches: usize },
    SourceNotFound { target: String },
    LevelCollision { base_name: String, level: AggregationLevel, kept: String, dropped: String },
    ServiceFailure { phase: &'static str, message: String },
    RepairFailed { target: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairSummary {
    pub corrected: usize,
    pub written: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub topology: Topology,
    pub issues: Vec<DiscoveryIssue>,
    pub repairs: RepairSummary,
}

#[derive(Default)]
struct Run {
    topology: Topology,
    issues: Vec<DiscoveryIssue>,
    gathered: usize,
}

pub struct TopologyDiscoverer {
    store: Arc<dyn EntityStore>,
    options: DiscoveryOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl TopologyDiscoverer {
    pub fn new(store: Arc<dyn EntityStore>, options: DiscoveryOptions) -> Self {
        Self {
            store,
            options,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds a fresh topology. The result is only returned once every
    /// phase finished; a cancelled run yields nothing.
    pub async fn discover(&self) -> Result<DiscoveryReport, DiscoveryError> {
        let phases = self.options.phases;
        let mut run = Run::default();
        self.progress.report(0.0);
        self.progress.report(phases.setup);

        self.scan_base_series(&mut run, ProgressWindow::new(phases.setup, phases.base_scan))
            .await?;
        self.scan_targets(&mut run, ProgressWindow::new(phases.base_scan, phases.target_scan))
            .await?;

        let tail = ProgressWindow::new(phases.target_scan, 1.0);
        self.resolve_sources(&mut run, tail.narrow(0.0, 0.5)).await?;
        run.topology.reindex_sources();
        let repairs = self.repair_metadata(&mut run, tail.narrow(0.5, 1.0)).await;
        self.check_cancelled()?;

        self.progress.report(1.0);
        tracing::info!(
            groups = run.topology.groups().len(),
            edges = run.topology.edge_count(),
            issues = run.issues.len(),
            corrected = repairs.corrected,
            written = repairs.written,
            "Discovery finished"
        );
        Ok(DiscoveryReport {
            topology: run.topology,
            issues: run.issues,
            repairs,
        })
    }

    fn check_cancelled(&self) -> Result<(), DiscoveryError> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        Ok(())
    }

    /// Fatal only while nothing has been gathered yet.
    fn service_failure(
        &self,
        run: &mut Run,
        phase: &'static str,
        err: StoreError,
    ) -> Result<(), DiscoveryError> {
        if run.gathered == 0 {
            tracing::error!(phase, error = %err, "Store failed before any data was gathered");
            return Err(DiscoveryError::Unavailable(err));
        }
        tracing::warn!(phase, error = %err, "Store failure, continuing with partial data");
        run.issues.push(DiscoveryIssue::ServiceFailure {
            phase,
            message: err.to_string(),
        });
        Ok(())
    }

    fn series_pages(
        &self,
        kind: SeriesKind,
        query: Query,
    ) -> impl Stream<Item = Result<Page<Series>, StoreError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        try_stream! {
            let mut next: Option<String> = None;
            while !cancel.is_cancelled() {
                let page = store.query_series(kind, &query, next.as_deref()).await?;
                next = page.next.clone();
                yield page;
                if next.is_none() {
                    break;
                }
            }
        }
    }

    fn thing_pages(&self, query: Query) -> impl Stream<Item = Result<Page<Thing>, StoreError>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        try_stream! {
            let mut next: Option<String> = None;
            while !cancel.is_cancelled() {
                let page = store.query_things(&query, next.as_deref()).await?;
                next = page.next.clone();
                yield page;
                if next.is_none() {
                    break;
                }
            }
        }
    }

    /// Phase A: every raw series becomes (or feeds) the base of its group.
    async fn scan_base_series(&self, run: &mut Run, window: ProgressWindow) -> Result<(), DiscoveryError> {
        let query = Query::new()
            .select(SERIES_FIELDS)
            .expand(Expand::SeriesLinks)
            .order_by("id")
            .top(self.options.page_size)
            .with_count();
        let mut pages = pin!(self.series_pages(SeriesKind::Datastream, query));
        let mut seen = 0u64;
        let mut total = None;
        let mut exact: BTreeMap<String, usize> = BTreeMap::new();

        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    self.service_failure(run, "base series", err)?;
                    break;
                }
            };
            total = total.or(page.count);
            for series in page.items {
                seen += 1;
                run.gathered += 1;
                let (base, tagged) = match split_postfix(&series.name) {
                    Postfix::Tagged { base, .. } => (base.to_string(), true),
                    _ => (series.name.trim().to_string(), false),
                };
                let group = run.topology.group_entry(&base);
                if tagged {
                    if group.base_datastream().is_none() {
                        group.set_base_datastream(series);
                    }
                    continue;
                }
                let matches = exact.entry(base).or_default();
                *matches += 1;
                if *matches == 1 {
                    group.set_base_datastream(series);
                }
            }
            window.report(self.progress.as_ref(), seen, total);
        }
        for (name, matches) in exact.into_iter().filter(|(_, matches)| *matches > 1) {
            tracing::warn!(name = %name, matches, "Several raw series share a base name, using the first");
            run.issues.push(DiscoveryIssue::AmbiguousMatch {
                resource: SeriesKind::Datastream.resource(),
                name,
                matches,
            });
        }
        tracing::debug!(series = seen, groups = run.topology.groups().len(), "Base series scanned");
        self.check_cancelled()
    }

    /// Phase B: aggregate series named `<base>[<level>]` become edges.
    async fn scan_targets(&self, run: &mut Run, window: ProgressWindow) -> Result<(), DiscoveryError> {
        let query = Query::new()
            .select(THING_FIELDS)
            .expand(Expand::MultiDatastreams)
            .order_by("id")
            .top(self.options.page_size)
            .with_count();
        let mut pages = pin!(self.thing_pages(query));
        let mut seen = 0u64;
        let mut total = None;

        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    self.service_failure(run, "aggregate targets", err)?;
                    break;
                }
            };
            total = total.or(page.count);
            for thing in page.items {
                seen += 1;
                run.gathered += 1;
                self.register_targets(run, thing);
            }
            window.report(self.progress.as_ref(), seen, total);
        }
        self.check_cancelled()
    }

    fn register_targets(&self, run: &mut Run, thing: Thing) {
        let zone_hint = thing
            .time_zone()
            .unwrap_or(&self.options.default_time_zone)
            .to_string();
        for mut series in thing.multi_datastreams {
            let (base, level) = match split_postfix(&series.name) {
                Postfix::Tagged { base, level } => (base.to_string(), level),
                Postfix::Unparsable { postfix, .. } => {
                    tracing::debug!(series = %series.name, postfix, "Postfix is not an aggregation level");
                    continue;
                }
                Postfix::Untagged => continue,
            };
            if series.thing_id.is_none() {
                series.thing_id = Some(thing.id.clone());
            }
            let edge = AggregateEdge::new(base.clone(), level, series).with_zone_hint(zone_hint.clone());
            edge.zone();

            let group = run.topology.group_entry(&base);
            let kept = edge.target().name.clone();
            if let Some(dropped) = group.insert_edge(edge) {
                tracing::warn!(
                    base = %base,
                    aggregation = %level,
                    kept = %kept,
                    dropped = %dropped.target().name,
                    "Two aggregates for the same level"
                );
                run.issues.push(DiscoveryIssue::LevelCollision {
                    base_name: base,
                    level,
                    kept,
                    dropped: dropped.target().name.clone(),
                });
            }
        }
    }

    /// Phase C: resolve each edge's source, finest levels first.
    async fn resolve_sources(&self, run: &mut Run, window: ProgressWindow) -> Result<(), DiscoveryError> {
        let keys = run.topology.edge_keys();
        let total = keys.len() as u64;
        for (done, key) in keys.iter().enumerate() {
            self.check_cancelled()?;
            self.resolve_source(run, key).await;
            window.report(self.progress.as_ref(), done as u64 + 1, Some(total));
        }
        Ok(())
    }

    async fn resolve_source(&self, run: &mut Run, key: &EdgeKey) {
        let Some(group) = run.topology.group(&key.base_name) else {
            return;
        };

        if let Some(upstream) = group.resolved_chain_source(&key.level) {
            let source = upstream.target().clone();
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_chained_source(source);
            }
            return;
        }

        if let Some(base) = group.base_datastream().cloned() {
            let collection = base.name.trim() != key.base_name;
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_direct_source(base, collection);
            }
            return;
        }

        if let Some(base) = group.base_multi_datastream().cloned() {
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_aggregate_source(base);
            }
            return;
        }

        let exact = Filter::NameEq(key.base_name.clone());
        if let Some(series) = self.find_one(run, SeriesKind::MultiDatastream, exact.clone()).await {
            if let Some(group) = run.topology.group_mut(&key.base_name) {
                group.set_base_multi_datastream(series.clone());
            }
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_aggregate_source(series);
            }
            return;
        }

        if let Some(series) = self.find_one(run, SeriesKind::Datastream, exact).await {
            if let Some(group) = run.topology.group_mut(&key.base_name) {
                group.set_base_datastream(series.clone());
            }
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_direct_source(series, false);
            }
            return;
        }

        if let Some(series) = self.find_collection(run, &key.base_name).await {
            if let Some(group) = run.topology.group_mut(&key.base_name) {
                if group.base_datastream().is_none() {
                    group.set_base_datastream(series.clone());
                }
            }
            if let Some(edge) = run.topology.edge_mut(key) {
                edge.set_direct_source(series, true);
            }
            return;
        }

        let target = run
            .topology
            .edge(key)
            .map(|edge| edge.target().name.clone())
            .unwrap_or_default();
        tracing::warn!(target_series = %target, base = %key.base_name, "No source found for aggregate");
        run.issues.push(DiscoveryIssue::SourceNotFound { target });
    }

    /// Exact-name lookup; the first of several matches wins.
    async fn find_one(&self, run: &mut Run, kind: SeriesKind, filter: Filter) -> Option<Series> {
        let query = Query::new()
            .select(SERIES_FIELDS)
            .expand(Expand::SeriesLinks)
            .filter(filter.clone())
            .order_by("id")
            .top(2);
        let page = match self.store.query_series(kind, &query, None).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %err, "Source lookup failed");
                run.issues.push(DiscoveryIssue::ServiceFailure {
                    phase: "source resolution",
                    message: err.to_string(),
                });
                return None;
            }
        };
        if page.items.len() > 1 {
            let name = match &filter {
                Filter::NameEq(name) | Filter::NameStartsWith(name) => name.clone(),
            };
            tracing::warn!(resource = kind.resource(), name = %name, "More than one series matches, using the first");
            run.issues.push(DiscoveryIssue::AmbiguousMatch {
                resource: kind.resource(),
                name,
                matches: page.items.len(),
            });
        }
        page.items.into_iter().next()
    }

    /// Raw series named `<base><postfix>` that batch several values.
    async fn find_collection(&self, run: &mut Run, base_name: &str) -> Option<Series> {
        let query = Query::new()
            .select(SERIES_FIELDS)
            .expand(Expand::SeriesLinks)
            .filter(Filter::NameStartsWith(base_name.to_string()))
            .order_by("id")
            .top(self.options.page_size);
        let mut pages = pin!(self.series_pages(SeriesKind::Datastream, query));
        while let Some(page) = pages.next().await {
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(error = %err, base = base_name, "Collection lookup failed");
                    run.issues.push(DiscoveryIssue::ServiceFailure {
                        phase: "source resolution",
                        message: err.to_string(),
                    });
                    return None;
                }
            };
            let found = page.items.into_iter().find(|series| {
                series
                    .name
                    .get(base_name.len()..)
                    .and_then(AggregationLevel::parse)
                    .is_some()
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Phase D: bring every target's cross-reference properties in line
    /// with its resolved source. Writes are isolated per target.
    async fn repair_metadata(&self, run: &mut Run, window: ProgressWindow) -> RepairSummary {
        let mut summary = RepairSummary::default();
        let mut pending: Vec<(SeriesKind, EntityId, String, Map<String, Value>)> = Vec::new();

        for group in run.topology.groups_mut() {
            for edge in group.edges_mut() {
                let Some(expected) = CrossReference::expected(edge.level(), edge.source()) else {
                    continue;
                };
                let target = edge.target_mut();
                if expected.apply_to(&mut target.properties) {
                    summary.corrected += 1;
                    tracing::debug!(series = %target.name, "Cross-reference drifted");
                    pending.push((target.kind, target.id.clone(), target.name.clone(), target.properties.clone()));
                }
            }
        }

        if !self.options.write_back || pending.is_empty() {
            window.report(self.progress.as_ref(), 1, Some(1));
            return summary;
        }

        let total = pending.len() as u64;
        let progress = Arc::clone(&self.progress);
        let mut done = 0u64;
        let mut writes = stream::iter(pending)
            .map(|(kind, id, name, properties)| {
                let store = Arc::clone(&self.store);
                async move {
                    let result = store.update_properties(kind, &id, &properties).await;
                    (name, result)
                }
            })
            .buffer_unordered(self.options.write_concurrency.max(1));

        while let Some((name, result)) = writes.next().await {
            done += 1;
            window.report(progress.as_ref(), done, Some(total));
            match result {
                Ok(()) => summary.written += 1,
                Err(err) => {
                    tracing::warn!(series = %name, error = %err, "Could not store repaired properties");
                    summary.failed += 1;
                    run.issues.push(DiscoveryIssue::RepairFailed {
                        target: name,
                        message: err.to_string(),
                    });
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregate_edge::{EdgeZone, SourceRef};
    use crate::domain::aggregation_level::AggregationUnit;
    use chrono::FixedOffset;
    use crate::domain::cross_reference::{AGGREGATE_AMOUNT, AGGREGATE_FOR, AGGREGATE_SOURCE, AGGREGATE_UNIT};
    use crate::infrastructure::memory_store::{InMemoryStore, Write};
    use serde_json::json;
    use tokio::sync::watch;

    fn level(unit: AggregationUnit, amount: u32) -> AggregationLevel {
        AggregationLevel::new(unit, amount).unwrap()
    }

    fn discoverer(store: &Arc<InMemoryStore>) -> TopologyDiscoverer {
        let options = DiscoveryOptions {
            page_size: 2,
            ..DiscoveryOptions::default()
        };
        TopologyDiscoverer::new(store.clone(), options)
    }

    /// Base `Temp` with hourly and daily aggregates on one thing.
    fn temp_store() -> (Arc<InMemoryStore>, Series, Series, Series) {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Weather station", Some("+01:00"));
        let raw = store.add_series(SeriesKind::Datastream, "Temp", &thing);
        let hourly = store.add_series(SeriesKind::MultiDatastream, "Temp[1 hour]", &thing);
        let daily = store.add_series(SeriesKind::MultiDatastream, "Temp[1 day]", &thing);
        (store, raw, hourly, daily)
    }

    #[tokio::test]
    async fn test_end_to_end_temp_topology() {
        let (store, raw, hourly, daily) = temp_store();
        let report = discoverer(&store).discover().await.unwrap();

        let group = report.topology.group("Temp").unwrap();
        assert_eq!(group.edges().count(), 2);
        assert_eq!(group.base_datastream().unwrap().id, raw.id);

        let hour_edge = group.edge(&level(AggregationUnit::Hours, 1)).unwrap();
        assert!(matches!(hour_edge.source(), SourceRef::Direct(s) if s.id == raw.id));
        assert!(!hour_edge.source_is_chained());
        assert_eq!(hour_edge.zone(), EdgeZone::Fixed(FixedOffset::east_opt(3600).unwrap()));

        let day_edge = group.edge(&level(AggregationUnit::Days, 1)).unwrap();
        assert!(matches!(day_edge.source(), SourceRef::Aggregate(s) if s.id == hourly.id));
        assert!(day_edge.source_is_chained());

        let stored_hourly = store.series(SeriesKind::MultiDatastream, &hourly.id).unwrap();
        assert_eq!(stored_hourly.properties[AGGREGATE_FOR], json!(raw.locator()));
        assert_eq!(stored_hourly.properties[AGGREGATE_AMOUNT], json!(1));
        assert_eq!(stored_hourly.properties[AGGREGATE_UNIT], json!("HOURS"));
        assert_eq!(stored_hourly.properties[AGGREGATE_SOURCE], raw.id.to_value());

        let stored_daily = store.series(SeriesKind::MultiDatastream, &daily.id).unwrap();
        assert_eq!(stored_daily.properties[AGGREGATE_FOR], json!(hourly.locator()));
        assert_eq!(stored_daily.properties[AGGREGATE_UNIT], json!("DAYS"));
        assert!(!stored_daily.properties.contains_key(AGGREGATE_SOURCE));

        assert_eq!(report.repairs.written, 2);
        assert!(report.issues.is_empty());

        let routed = report.topology.edges_for_source(&raw.locator());
        assert_eq!(routed.len(), 1);
        assert_eq!(report.topology.edges_for_source(&hourly.locator()).len(), 1);
    }

    #[tokio::test]
    async fn test_repair_is_idempotent() {
        let (store, ..) = temp_store();
        discoverer(&store).discover().await.unwrap();
        store.clear_journal();

        let second = discoverer(&store).discover().await.unwrap();
        assert_eq!(second.repairs, RepairSummary::default());
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_write_back_disabled_corrects_in_memory_only() {
        let (store, raw, hourly, _) = temp_store();
        let options = DiscoveryOptions {
            write_back: false,
            ..DiscoveryOptions::default()
        };
        let report = TopologyDiscoverer::new(store.clone(), options).discover().await.unwrap();
        let edge = report
            .topology
            .group("Temp")
            .and_then(|g| g.edge(&level(AggregationUnit::Hours, 1)))
            .unwrap();
        assert_eq!(edge.target().properties[AGGREGATE_FOR], json!(raw.locator()));
        assert_eq!(report.repairs.corrected, 2);
        assert_eq!(report.repairs.written, 0);
        assert!(store.journal().is_empty());
        assert!(store.series(SeriesKind::MultiDatastream, &hourly.id).unwrap().properties.is_empty());
    }

    #[tokio::test]
    async fn test_chain_prefers_closest_divisor_and_reports_collisions() {
        let (store, _, hourly, _) = temp_store();
        let other = store.add_thing("Backup station", None);
        store.add_series(SeriesKind::MultiDatastream, "Temp[4 hours]", &other);
        store.add_series(SeriesKind::MultiDatastream, "Temp[24 hours]", &other);

        let report = discoverer(&store).discover().await.unwrap();
        let group = report.topology.group("Temp").unwrap();
        assert_eq!(group.edges().count(), 3);

        let four = group.edge(&level(AggregationUnit::Hours, 4)).unwrap();
        assert!(matches!(four.source(), SourceRef::Aggregate(s) if s.id == hourly.id));
        assert_eq!(four.zone(), EdgeZone::utc());

        let day = group.edge(&level(AggregationUnit::Days, 1)).unwrap();
        assert_eq!(day.target().name, "Temp[24 hours]");
        assert!(matches!(day.source(), SourceRef::Aggregate(s) if s.name == "Temp[4 hours]"));
        assert!(report
            .issues
            .iter()
            .any(|issue| matches!(issue, DiscoveryIssue::LevelCollision { dropped, .. } if dropped == "Temp[1 day]")));
    }

    #[tokio::test]
    async fn test_unsourced_and_unparsable_targets() {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Lab", None);
        store.add_series(SeriesKind::MultiDatastream, "Ghost[1 hour]", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Noise[sometimes]", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Plain", &thing);

        let report = discoverer(&store).discover().await.unwrap();
        assert!(report.topology.group("Noise").is_none());
        let ghost = report.topology.group("Ghost").unwrap();
        let edge = ghost.edge(&level(AggregationUnit::Hours, 1)).unwrap();
        assert_eq!(edge.source(), &SourceRef::None);
        assert_eq!(
            report.issues,
            vec![DiscoveryIssue::SourceNotFound { target: "Ghost[1 hour]".to_string() }]
        );
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_unsourced_edge_is_not_a_chain_source() {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Lab", None);
        store.add_series(SeriesKind::MultiDatastream, "Ghost[1 hour]", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Ghost[1 day]", &thing);

        let report = discoverer(&store).discover().await.unwrap();
        let ghost = report.topology.group("Ghost").unwrap();
        for edge in ghost.edges() {
            assert_eq!(edge.source(), &SourceRef::None);
            assert!(!edge.source_is_chained());
        }
        assert_eq!(
            report.issues,
            vec![
                DiscoveryIssue::SourceNotFound { target: "Ghost[1 hour]".to_string() },
                DiscoveryIssue::SourceNotFound { target: "Ghost[1 day]".to_string() },
            ]
        );
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_raw_series_keeps_first_and_reports() {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Lab", None);
        let first = store.add_series(SeriesKind::Datastream, "Temp", &thing);
        store.add_series(SeriesKind::Datastream, "Temp", &thing);
        store.add_series(SeriesKind::Datastream, "Temp ", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Temp[1 hour]", &thing);

        let report = discoverer(&store).discover().await.unwrap();
        let group = report.topology.group("Temp").unwrap();
        assert_eq!(group.base_datastream().unwrap().id, first.id);
        let edge = group.edge(&level(AggregationUnit::Hours, 1)).unwrap();
        assert!(matches!(edge.source(), SourceRef::Direct(s) if s.id == first.id));
        assert_eq!(
            report.issues,
            vec![DiscoveryIssue::AmbiguousMatch {
                resource: "Datastreams",
                name: "Temp".to_string(),
                matches: 3,
            }]
        );
    }

    #[tokio::test]
    async fn test_aggregate_of_collections_source() {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Lab", None);
        let base = store.add_series(SeriesKind::MultiDatastream, "Flow", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Flow[1 hour]", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Flow[90 minutes]", &thing);

        let report = discoverer(&store).discover().await.unwrap();
        let group = report.topology.group("Flow").unwrap();
        assert_eq!(group.base_multi_datastream().unwrap().id, base.id);
        for edge in group.edges() {
            assert!(matches!(edge.source(), SourceRef::Aggregate(s) if s.id == base.id));
            assert!(!edge.source_is_chained());
        }
    }

    #[tokio::test]
    async fn test_collection_datastream_source() {
        let store = Arc::new(InMemoryStore::new());
        let thing = store.add_thing("Lab", None);
        let collection = store.add_series(SeriesKind::Datastream, "Rain[1 minute]", &thing);
        store.add_series(SeriesKind::MultiDatastream, "Rain[1 hour]", &thing);

        let report = discoverer(&store).discover().await.unwrap();
        let edge = report
            .topology
            .group("Rain")
            .and_then(|g| g.edge(&level(AggregationUnit::Hours, 1)))
            .unwrap();
        assert!(matches!(edge.source(), SourceRef::Direct(s) if s.id == collection.id));
        assert!(edge.source_is_collection());
    }

    #[tokio::test]
    async fn test_repair_failure_is_isolated() {
        let (store, _, hourly, daily) = temp_store();
        store.fail_updates_for("Temp[1 hour]");
        let report = discoverer(&store).discover().await.unwrap();

        assert_eq!(report.repairs.written, 1);
        assert_eq!(report.repairs.failed, 1);
        assert!(store.series(SeriesKind::MultiDatastream, &hourly.id).unwrap().properties.is_empty());
        assert!(!store.series(SeriesKind::MultiDatastream, &daily.id).unwrap().properties.is_empty());
        assert_eq!(
            store.journal(),
            vec![Write::Updated {
                kind: SeriesKind::MultiDatastream,
                id: daily.id.clone(),
                properties: store.series(SeriesKind::MultiDatastream, &daily.id).unwrap().properties,
            }]
        );
    }

    #[tokio::test]
    async fn test_failure_before_data_fails_run() {
        let (store, ..) = temp_store();
        store.fail_queries_for("Datastreams");
        let err = discoverer(&store).discover().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_later_failure_keeps_partial_topology() {
        let (store, ..) = temp_store();
        store.fail_queries_for("Things");
        let report = discoverer(&store).discover().await.unwrap();
        assert_eq!(report.topology.edge_count(), 0);
        assert!(report.topology.group("Temp").is_some());
        assert!(matches!(report.issues[0], DiscoveryIssue::ServiceFailure { phase: "aggregate targets", .. }));
    }

    #[tokio::test]
    async fn test_cancelled_run_publishes_nothing() {
        let (store, ..) = temp_store();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = discoverer(&store).with_cancellation(cancel).discover().await;
        assert!(matches!(result, Err(DiscoveryError::Cancelled)));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_progress_reaches_one() {
        let (store, ..) = temp_store();
        let (tx, rx) = watch::channel(0.0);
        discoverer(&store).with_progress(Arc::new(tx)).discover().await.unwrap();
        assert!((*rx.borrow() - 1.0).abs() < f64::EPSILON);
    }
}

// Reconciler - diffs desired against realized levels and applies the change list
use crate::application::entity_store::{EntityStore, StoreError};
use crate::domain::aggregate_edge::{AggregateEdge, SourceRef};
use crate::domain::aggregation_group::AggregationGroup;
use crate::domain::aggregation_level::AggregationLevel;
use crate::domain::cross_reference::CrossReference;
use crate::domain::naming::aggregate_name;
use crate::domain::series::{EntityId, NewSeries, Series, SeriesKind};
use crate::domain::topology::Topology;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Result columns of every aggregate series.
pub const AGGREGATE_COLUMNS: [&str; 4] = ["average", "minimum", "maximum", "deviation"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Directive {
    Delete { base_name: String, level: AggregationLevel },
    Create { base_name: String, level: AggregationLevel },
}

impl Directive {
    pub fn base_name(&self) -> &str {
        match self {
            Directive::Delete { base_name, .. } | Directive::Create { base_name, .. } => base_name,
        }
    }

    pub fn level(&self) -> &AggregationLevel {
        match self {
            Directive::Delete { level, .. } | Directive::Create { level, .. } => level,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("no aggregation group named {0:?}")]
    UnknownGroup(String),
    #[error("group {0:?} has no base series to aggregate")]
    NoBaseSeries(String),
    #[error("no thing to attach the aggregate of {0:?} to")]
    NoThing(String),
    #[error("group {base_name:?} has no aggregate at {level}")]
    MissingEdge { base_name: String, level: AggregationLevel },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectiveOutcome {
    pub directive: Directive,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DirectiveOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Deletes for every level marked unwanted that exists, then creates for
/// every level marked wanted that is missing. Levels the caller did not
/// mention are left alone.
pub fn plan(topology: &Topology) -> Vec<Directive> {
    let mut deletes = Vec::new();
    let mut creates = Vec::new();
    for group in topology.groups() {
        for (level, &wanted) in group.desired_levels() {
            let present = group.has_level(level);
            let base_name = group.base_name().to_string();
            if present && !wanted {
                deletes.push(Directive::Delete { base_name, level: *level });
            } else if wanted && !present {
                creates.push(Directive::Create { base_name, level: *level });
            }
        }
    }
    deletes.extend(creates);
    deletes
}

pub struct Reconciler {
    store: Arc<dyn EntityStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Applies `directives` in order. A failed directive is reported and
    /// does not stop the rest.
    pub async fn apply(&self, topology: &Topology, directives: &[Directive]) -> Vec<DirectiveOutcome> {
        let mut working = topology.clone();
        let mut outcomes = Vec::with_capacity(directives.len());
        for directive in directives {
            let result = match directive {
                Directive::Delete { base_name, level } => {
                    self.delete(&mut working, base_name, level).await.map(|()| None)
                }
                Directive::Create { base_name, level } => {
                    self.create(&mut working, base_name, level).await.map(Some)
                }
            };
            match &result {
                Ok(_) => tracing::info!(base = directive.base_name(), aggregation = %directive.level(), ?directive, "Directive applied"),
                Err(err) => tracing::warn!(base = directive.base_name(), aggregation = %directive.level(), error = %err, "Directive failed"),
            }
            let (created, error) = match result {
                Ok(created) => (created, None),
                Err(err) => (None, Some(err.to_string())),
            };
            outcomes.push(DirectiveOutcome {
                directive: directive.clone(),
                created,
                error,
            });
        }
        outcomes
    }

    async fn delete(
        &self,
        working: &mut Topology,
        base_name: &str,
        level: &AggregationLevel,
    ) -> Result<(), ReconcileError> {
        let group = working
            .group_mut(base_name)
            .ok_or_else(|| ReconcileError::UnknownGroup(base_name.to_string()))?;
        let target = group
            .edge(level)
            .map(|edge| edge.target().clone())
            .ok_or_else(|| ReconcileError::MissingEdge {
                base_name: base_name.to_string(),
                level: *level,
            })?;
        self.store.delete_series(target.kind, &target.id).await?;
        group.remove_edge(level);
        self.rechain(group, &target.locator()).await;
        Ok(())
    }

    /// Points the edges that were fed by the deleted series at their next
    /// source and stores the corrected cross-references. A failed write is
    /// logged; the next discovery run repairs it.
    async fn rechain(&self, group: &mut AggregationGroup, deleted: &str) {
        let orphaned: Vec<AggregationLevel> = group
            .edges()
            .filter(|edge| edge.source_locator().as_deref() == Some(deleted))
            .map(|edge| *edge.level())
            .collect();
        for level in orphaned {
            let source = choose_source(group, &level);
            let Some(edge) = group.edge_mut(&level) else {
                continue;
            };
            let Some(source) = source else {
                tracing::warn!(series = %edge.target().name, "Aggregate lost its only source");
                edge.clear_source();
                continue;
            };
            source.attach(edge);
            let Some(reference) = CrossReference::expected(&level, edge.source()) else {
                continue;
            };
            if !reference.apply_to(&mut edge.target_mut().properties) {
                continue;
            }
            let target = edge.target();
            tracing::debug!(series = %target.name, source = %reference.aggregate_for, "Aggregate rechained");
            if let Err(err) = self.store.update_properties(target.kind, &target.id, &target.properties).await {
                tracing::warn!(series = %target.name, error = %err, "Could not store rechained properties");
            }
        }
    }

    async fn create(
        &self,
        working: &mut Topology,
        base_name: &str,
        level: &AggregationLevel,
    ) -> Result<EntityId, ReconcileError> {
        let group = working
            .group_mut(base_name)
            .ok_or_else(|| ReconcileError::UnknownGroup(base_name.to_string()))?;
        let (new, source) = new_aggregate(group, level)?;
        let id = self.store.create_series(&new).await?;

        let mut target = Series::new(new.kind, id.clone(), new.name.clone());
        target.thing_id = Some(new.thing_id.clone());
        target.properties = new.properties.clone();
        let mut edge = AggregateEdge::new(base_name, *level, target);
        source.attach(&mut edge);
        group.insert_edge(edge);
        Ok(id)
    }
}

enum Source {
    Chained(Series),
    Direct(Series),
    Aggregate(Series),
}

impl Source {
    fn to_ref(&self) -> SourceRef {
        match self {
            Source::Chained(series) | Source::Aggregate(series) => SourceRef::Aggregate(series.clone()),
            Source::Direct(series) => SourceRef::Direct(series.clone()),
        }
    }

    fn attach(self, edge: &mut AggregateEdge) {
        match self {
            Source::Chained(series) => edge.set_chained_source(series),
            Source::Direct(series) => edge.set_direct_source(series, false),
            Source::Aggregate(series) => edge.set_aggregate_source(series),
        }
    }
}

/// Closest dividing aggregate of the group, else its base series.
fn choose_source(group: &AggregationGroup, level: &AggregationLevel) -> Option<Source> {
    if let Some(upstream) = group.preferred_chain_source(level) {
        return Some(Source::Chained(upstream.target().clone()));
    }
    let base = group.base_series()?.clone();
    Some(match base.kind {
        SeriesKind::Datastream => Source::Direct(base),
        SeriesKind::MultiDatastream => Source::Aggregate(base),
    })
}

/// Series payload for a new aggregate of `group` at `level`, mirroring the
/// base series' units and observed properties.
fn new_aggregate(group: &AggregationGroup, level: &AggregationLevel) -> Result<(NewSeries, Source), ReconcileError> {
    let base_name = group.base_name();
    let base = group
        .base_series()
        .ok_or_else(|| ReconcileError::NoBaseSeries(base_name.to_string()))?;

    let source = choose_source(group, level).ok_or_else(|| ReconcileError::NoBaseSeries(base_name.to_string()))?;
    let source_ref = source.to_ref();

    let thing_id = group
        .edges()
        .find_map(|edge| edge.target().thing_id.clone())
        .or_else(|| base.thing_id.clone())
        .ok_or_else(|| ReconcileError::NoThing(base_name.to_string()))?;

    let (units, observed_property_ids) = match base.kind {
        SeriesKind::Datastream => {
            let unit = base.units.first().cloned().unwrap_or_default();
            let units = AGGREGATE_COLUMNS.iter().map(|_| unit.clone()).collect();
            let ops = base
                .observed_property_ids
                .first()
                .map(|op| AGGREGATE_COLUMNS.iter().map(|_| op.clone()).collect())
                .unwrap_or_default();
            (units, ops)
        }
        SeriesKind::MultiDatastream => (base.units.clone(), base.observed_property_ids.clone()),
    };

    let properties = CrossReference::expected(level, &source_ref)
        .map(|reference| reference.to_properties())
        .unwrap_or_default();

    let new = NewSeries {
        kind: SeriesKind::MultiDatastream,
        name: aggregate_name(base_name, level),
        description: format!("Aggregate of {} per {}", base_name, level),
        thing_id,
        sensor_id: base.sensor_id.clone(),
        observed_property_ids,
        units,
        properties,
    };
    Ok((new, source))
}

// Aggregation group: every edge sharing one base name
use super::aggregate_edge::AggregateEdge;
use super::aggregation_level::AggregationLevel;
use super::series::Series;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct AggregationGroup {
    base_name: String,
    base_datastream: Option<Series>,
    base_multi_datastream: Option<Series>,
    /// Ordered by level; at most one edge per level.
    edges: BTreeMap<AggregationLevel, AggregateEdge>,
    desired_levels: BTreeMap<AggregationLevel, bool>,
}

impl AggregationGroup {
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            base_datastream: None,
            base_multi_datastream: None,
            edges: BTreeMap::new(),
            desired_levels: BTreeMap::new(),
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Canonical zero-aggregation source. A raw series wins over an
    /// aggregate-of-collections series.
    pub fn base_series(&self) -> Option<&Series> {
        self.base_datastream.as_ref().or(self.base_multi_datastream.as_ref())
    }

    pub fn base_datastream(&self) -> Option<&Series> {
        self.base_datastream.as_ref()
    }

    pub fn base_multi_datastream(&self) -> Option<&Series> {
        self.base_multi_datastream.as_ref()
    }

    pub fn set_base_datastream(&mut self, series: Series) {
        self.base_datastream = Some(series);
    }

    pub fn set_base_multi_datastream(&mut self, series: Series) {
        self.base_multi_datastream = Some(series);
    }

    /// Inserts `edge`, returning the edge it replaced at the same level.
    pub fn insert_edge(&mut self, edge: AggregateEdge) -> Option<AggregateEdge> {
        self.edges.insert(*edge.level(), edge)
    }

    pub fn remove_edge(&mut self, level: &AggregationLevel) -> Option<AggregateEdge> {
        self.edges.remove(level)
    }

    pub fn edge(&self, level: &AggregationLevel) -> Option<&AggregateEdge> {
        self.edges.get(level)
    }

    pub fn edge_mut(&mut self, level: &AggregationLevel) -> Option<&mut AggregateEdge> {
        self.edges.get_mut(level)
    }

    pub fn edges(&self) -> impl Iterator<Item = &AggregateEdge> {
        self.edges.values()
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut AggregateEdge> {
        self.edges.values_mut()
    }

    pub fn levels(&self) -> impl Iterator<Item = &AggregationLevel> {
        self.edges.keys()
    }

    pub fn has_level(&self, level: &AggregationLevel) -> bool {
        self.edges.contains_key(level)
    }

    /// Closest smaller edge whose level evenly divides `level`.
    pub fn preferred_chain_source(&self, level: &AggregationLevel) -> Option<&AggregateEdge> {
        self.edges
            .range(..*level)
            .rev()
            .find(|(smaller, _)| level.is_multiple_of(smaller))
            .map(|(_, edge)| edge)
    }

    /// Like `preferred_chain_source`, skipping edges that have no source yet.
    pub fn resolved_chain_source(&self, level: &AggregationLevel) -> Option<&AggregateEdge> {
        self.edges
            .range(..*level)
            .rev()
            .find(|(smaller, edge)| level.is_multiple_of(smaller) && edge.source().is_resolved())
            .map(|(_, edge)| edge)
    }

    pub fn desired_levels(&self) -> &BTreeMap<AggregationLevel, bool> {
        &self.desired_levels
    }

    pub fn set_desired(&mut self, level: AggregationLevel, wanted: bool) {
        self.desired_levels.insert(level, wanted);
    }

    pub fn replace_desired(&mut self, desired: BTreeMap<AggregationLevel, bool>) {
        self.desired_levels = desired;
    }
}

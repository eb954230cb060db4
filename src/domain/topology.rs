// Topology: the aggregation groups found by one discovery run
use super::aggregate_edge::AggregateEdge;
use super::aggregation_group::AggregationGroup;
use super::aggregation_level::AggregationLevel;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Caller-supplied wanted/unwanted levels per base name.
pub type DesiredLevels = HashMap<String, BTreeMap<AggregationLevel, bool>>;

/// Non-owning reference to an edge: its group name and level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EdgeKey {
    pub base_name: String,
    pub level: AggregationLevel,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Topology {
    groups: Vec<AggregationGroup>,
    #[serde(skip)]
    groups_by_name: HashMap<String, usize>,
    #[serde(skip)]
    edges_by_source: HashMap<String, Vec<EdgeKey>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &[AggregationGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut AggregationGroup> {
        self.groups.iter_mut()
    }

    pub fn group(&self, base_name: &str) -> Option<&AggregationGroup> {
        self.groups_by_name.get(base_name).map(|&i| &self.groups[i])
    }

    pub fn group_mut(&mut self, base_name: &str) -> Option<&mut AggregationGroup> {
        let index = *self.groups_by_name.get(base_name)?;
        self.groups.get_mut(index)
    }

    /// Group for `base_name`, created on first reference.
    pub fn group_entry(&mut self, base_name: &str) -> &mut AggregationGroup {
        let index = match self.groups_by_name.get(base_name) {
            Some(&index) => index,
            None => {
                self.groups.push(AggregationGroup::new(base_name));
                let index = self.groups.len() - 1;
                self.groups_by_name.insert(base_name.to_string(), index);
                index
            }
        };
        &mut self.groups[index]
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&AggregateEdge> {
        self.group(&key.base_name)?.edge(&key.level)
    }

    pub fn edge_mut(&mut self, key: &EdgeKey) -> Option<&mut AggregateEdge> {
        self.group_mut(&key.base_name)?.edge_mut(&key.level)
    }

    pub fn edge_count(&self) -> usize {
        self.groups.iter().map(|g| g.edges().count()).sum()
    }

    /// Edge keys in group order, levels ascending.
    pub fn edge_keys(&self) -> Vec<EdgeKey> {
        self.groups
            .iter()
            .flat_map(|group| {
                group.levels().map(|level| EdgeKey {
                    base_name: group.base_name().to_string(),
                    level: *level,
                })
            })
            .collect()
    }

    /// Rebuilds the source-locator index from the edges' current sources.
    pub fn reindex_sources(&mut self) {
        let mut index: HashMap<String, Vec<EdgeKey>> = HashMap::new();
        for group in &self.groups {
            for edge in group.edges() {
                if let Some(locator) = edge.source_locator() {
                    index.entry(locator).or_default().push(EdgeKey {
                        base_name: group.base_name().to_string(),
                        level: *edge.level(),
                    });
                }
            }
        }
        self.edges_by_source = index;
    }

    pub fn edges_for_source(&self, locator: &str) -> &[EdgeKey] {
        self.edges_by_source
            .get(locator)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Copies a caller's desired levels onto the matching groups.
    pub fn apply_desired(&mut self, desired: &DesiredLevels) {
        for (base_name, levels) in desired {
            self.group_entry(base_name).replace_desired(levels.clone());
        }
    }
}

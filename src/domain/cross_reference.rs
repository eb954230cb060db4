// Cross-reference properties stored on aggregate series
use super::aggregate_edge::SourceRef;
use super::aggregation_level::AggregationLevel;
use super::series::EntityId;
use serde_json::{Map, Value};

pub const AGGREGATE_FOR: &str = "aggregateFor";
pub const AGGREGATE_AMOUNT: &str = "aggregateAmount";
pub const AGGREGATE_UNIT: &str = "aggregateUnit";
pub const AGGREGATE_SOURCE: &str = "aggregateSource";

/// Properties an aggregate series must carry to point at its source.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossReference {
    pub aggregate_for: String,
    pub amount: u32,
    pub unit: &'static str,
    /// Only set when the source is a raw series.
    pub source_id: Option<EntityId>,
}

impl CrossReference {
    pub fn expected(level: &AggregationLevel, source: &SourceRef) -> Option<Self> {
        let series = source.series()?;
        let source_id = match source {
            SourceRef::Direct(series) => Some(series.id.clone()),
            _ => None,
        };
        Some(Self {
            aggregate_for: series.locator(),
            amount: level.amount(),
            unit: level.unit().name(),
            source_id,
        })
    }

    pub fn to_properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        self.apply_to(&mut properties);
        properties
    }

    /// Corrects drifted fields in place. Returns whether anything changed.
    pub fn apply_to(&self, properties: &mut Map<String, Value>) -> bool {
        let mut changed = false;
        changed |= set_if_drifted(properties, AGGREGATE_FOR, Value::from(self.aggregate_for.clone()));
        changed |= set_if_drifted(properties, AGGREGATE_AMOUNT, Value::from(self.amount));
        changed |= set_if_drifted(properties, AGGREGATE_UNIT, Value::from(self.unit));
        match &self.source_id {
            Some(id) => changed |= set_if_drifted(properties, AGGREGATE_SOURCE, id.to_value()),
            None => changed |= properties.remove(AGGREGATE_SOURCE).is_some(),
        }
        changed
    }
}

fn set_if_drifted(properties: &mut Map<String, Value>, key: &str, expected: Value) -> bool {
    let unchanged = properties
        .get(key)
        .is_some_and(|current| plain_string(current) == plain_string(&expected));
    if !unchanged {
        properties.insert(key.to_string(), expected);
    }
    !unchanged
}

/// Wire values may come back as `"1"` where `1` was written.
fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Entity model for the series and things held by the entity store
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Number(n) => Value::from(*n),
            EntityId::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Number(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_string())
    }
}

/// Raw series hold single observations; aggregate-capable series hold
/// several result columns per observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    Datastream,
    MultiDatastream,
}

impl SeriesKind {
    pub fn resource(self) -> &'static str {
        match self {
            SeriesKind::Datastream => "Datastreams",
            SeriesKind::MultiDatastream => "MultiDatastreams",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub kind: SeriesKind,
    pub id: EntityId,
    pub name: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thing_id: Option<EntityId>,
    #[serde(skip)]
    pub sensor_id: Option<EntityId>,
    #[serde(skip)]
    pub observed_property_ids: Vec<EntityId>,
    #[serde(skip)]
    pub units: Vec<Value>,
}

impl Series {
    pub fn new(kind: SeriesKind, id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            properties: Map::new(),
            thing_id: None,
            sensor_id: None,
            observed_property_ids: Vec::new(),
            units: Vec::new(),
        }
    }

    /// Canonical source-locator, e.g. `/Datastreams(7)`.
    pub fn locator(&self) -> String {
        format!("/{}({})", self.kind.resource(), self.id)
    }
}

/// Container owning aggregate series, with its time-zone hint.
#[derive(Debug, Clone, PartialEq)]
pub struct Thing {
    pub id: EntityId,
    pub name: String,
    pub properties: Map<String, Value>,
    pub multi_datastreams: Vec<Series>,
}

impl Thing {
    pub const TIME_ZONE_KEY: &'static str = "timeZone";

    pub fn time_zone(&self) -> Option<&str> {
        self.properties.get(Self::TIME_ZONE_KEY).and_then(Value::as_str)
    }
}

/// Payload for creating an aggregate series.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSeries {
    pub kind: SeriesKind,
    pub name: String,
    pub description: String,
    pub thing_id: EntityId,
    pub sensor_id: Option<EntityId>,
    pub observed_property_ids: Vec<EntityId>,
    pub units: Vec<Value>,
    pub properties: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_formats_ids() {
        assert_eq!(Series::new(SeriesKind::Datastream, 7_i64, "Temp").locator(), "/Datastreams(7)");
        assert_eq!(
            Series::new(SeriesKind::MultiDatastream, "a'b", "Temp").locator(),
            "/MultiDatastreams('a''b')"
        );
    }

    #[test]
    fn test_entity_id_untagged() {
        let ids: Vec<EntityId> = serde_json::from_str(r#"[3, "x"]"#).unwrap();
        assert_eq!(ids, vec![EntityId::Number(3), EntityId::Text("x".into())]);
    }
}

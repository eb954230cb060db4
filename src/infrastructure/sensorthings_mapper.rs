// SensorThings JSON records - conversion between wire entities and the domain model
use crate::domain::series::{EntityId, NewSeries, Series, SeriesKind, Thing};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const OM_MEASUREMENT: &str = "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Measurement";
const OM_COMPLEX: &str = "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_ComplexObservation";

/// A `{"value": [...]}` collection response.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    pub value: Vec<T>,
    #[serde(rename = "@iot.count", default)]
    pub count: Option<u64>,
    #[serde(rename = "@iot.nextLink", default)]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdRef {
    #[serde(rename = "@iot.id")]
    pub id: EntityId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRecord {
    #[serde(rename = "@iot.id")]
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub unit_of_measurement: Option<Value>,
    #[serde(default)]
    pub unit_of_measurements: Option<Vec<Value>>,
    #[serde(rename = "Thing", default)]
    pub thing: Option<IdRef>,
    #[serde(rename = "Sensor", default)]
    pub sensor: Option<IdRef>,
    #[serde(rename = "ObservedProperty", default)]
    pub observed_property: Option<IdRef>,
    #[serde(rename = "ObservedProperties", default)]
    pub observed_properties: Option<Vec<IdRef>>,
}

impl SeriesRecord {
    pub fn into_series(self, kind: SeriesKind) -> Series {
        let mut series = Series::new(kind, self.id, self.name);
        series.properties = self.properties.unwrap_or_default();
        series.thing_id = self.thing.map(|r| r.id);
        series.sensor_id = self.sensor.map(|r| r.id);
        series.units = match (self.unit_of_measurements, self.unit_of_measurement) {
            (Some(units), _) => units,
            (None, Some(unit)) => vec![unit],
            (None, None) => Vec::new(),
        };
        series.observed_property_ids = match (self.observed_properties, self.observed_property) {
            (Some(refs), _) => refs.into_iter().map(|r| r.id).collect(),
            (None, Some(single)) => vec![single.id],
            (None, None) => Vec::new(),
        };
        series
    }
}

#[derive(Debug, Deserialize)]
pub struct ThingRecord {
    #[serde(rename = "@iot.id")]
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(rename = "MultiDatastreams", default)]
    pub multi_datastreams: Vec<SeriesRecord>,
    /// Set when the server paged the expanded aggregates.
    #[serde(rename = "MultiDatastreams@iot.nextLink", default)]
    pub multi_datastreams_next: Option<String>,
}

impl ThingRecord {
    pub fn into_thing(self) -> Thing {
        let thing_id = self.id;
        let multi_datastreams = self
            .multi_datastreams
            .into_iter()
            .map(|record| {
                let mut series = record.into_series(SeriesKind::MultiDatastream);
                series.thing_id.get_or_insert_with(|| thing_id.clone());
                series
            })
            .collect();
        Thing {
            id: thing_id,
            name: self.name,
            properties: self.properties.unwrap_or_default(),
            multi_datastreams,
        }
    }
}

/// Id returned by a create, read from the response body.
#[derive(Debug, Deserialize)]
pub struct Created {
    #[serde(rename = "@iot.id")]
    pub id: EntityId,
}

fn id_ref(id: &EntityId) -> Value {
    json!({ "@iot.id": id.to_value() })
}

/// POST body for a new series.
pub fn new_series_body(new: &NewSeries) -> Value {
    let mut body = json!({
        "name": new.name,
        "description": new.description,
        "properties": new.properties,
        "Thing": id_ref(&new.thing_id),
    });
    if let Some(sensor) = &new.sensor_id {
        body["Sensor"] = id_ref(sensor);
    }
    match new.kind {
        SeriesKind::Datastream => {
            body["observationType"] = json!(OM_MEASUREMENT);
            body["unitOfMeasurement"] = new.units.first().cloned().unwrap_or_else(|| json!({}));
            if let Some(op) = new.observed_property_ids.first() {
                body["ObservedProperty"] = id_ref(op);
            }
        }
        SeriesKind::MultiDatastream => {
            body["observationType"] = json!(OM_COMPLEX);
            body["unitOfMeasurements"] = json!(new.units);
            body["multiObservationDataTypes"] = json!(vec![OM_MEASUREMENT; new.units.len()]);
            body["ObservedProperties"] = Value::Array(new.observed_property_ids.iter().map(id_ref).collect());
        }
    }
    body
}

// In-memory entity store - same paging and filter semantics as the remote store
use crate::application::entity_store::{EntityStore, Expand, Page, Query, StoreError};
use crate::domain::series::{EntityId, NewSeries, Series, SeriesKind, Thing};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A write applied to the store, in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Created { kind: SeriesKind, id: EntityId, name: String },
    Updated { kind: SeriesKind, id: EntityId, properties: Map<String, Value> },
    Deleted { kind: SeriesKind, id: EntityId },
}

#[derive(Debug, Default)]
struct State {
    things: Vec<Thing>,
    datastreams: Vec<Series>,
    multi_datastreams: Vec<Series>,
    next_id: i64,
    journal: Vec<Write>,
    failing_updates: HashSet<String>,
    failing_resources: HashSet<&'static str>,
}

impl State {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::Number(self.next_id)
    }

    fn series(&self, kind: SeriesKind) -> &Vec<Series> {
        match kind {
            SeriesKind::Datastream => &self.datastreams,
            SeriesKind::MultiDatastream => &self.multi_datastreams,
        }
    }

    fn series_mut(&mut self, kind: SeriesKind) -> &mut Vec<Series> {
        match kind {
            SeriesKind::Datastream => &mut self.datastreams,
            SeriesKind::MultiDatastream => &mut self.multi_datastreams,
        }
    }

    fn check_available(&self, resource: &'static str) -> Result<(), StoreError> {
        if self.failing_resources.contains(resource) {
            return Err(StoreError::service(resource, "injected failure"));
        }
        Ok(())
    }
}

pub struct InMemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_thing(&self, name: &str, time_zone: Option<&str>) -> EntityId {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut properties = Map::new();
        if let Some(zone) = time_zone {
            properties.insert(Thing::TIME_ZONE_KEY.to_string(), Value::from(zone));
        }
        state.things.push(Thing {
            id: id.clone(),
            name: name.to_string(),
            properties,
            multi_datastreams: Vec::new(),
        });
        id
    }

    pub fn add_series(&self, kind: SeriesKind, name: &str, thing_id: &EntityId) -> Series {
        self.add_series_with(kind, name, thing_id, Map::new())
    }

    pub fn add_series_with(
        &self,
        kind: SeriesKind,
        name: &str,
        thing_id: &EntityId,
        properties: Map<String, Value>,
    ) -> Series {
        let mut state = self.lock();
        let id = state.allocate_id();
        let mut series = Series::new(kind, id, name);
        series.thing_id = Some(thing_id.clone());
        series.properties = properties;
        if kind == SeriesKind::Datastream {
            series.units = vec![serde_json::json!({"name": "degree Celsius", "symbol": "°C"})];
            series.observed_property_ids = vec![EntityId::Number(1000)];
            series.sensor_id = Some(EntityId::Number(2000));
        }
        state.series_mut(kind).push(series.clone());
        series
    }

    pub fn series(&self, kind: SeriesKind, id: &EntityId) -> Option<Series> {
        self.lock().series(kind).iter().find(|s| &s.id == id).cloned()
    }

    pub fn series_named(&self, kind: SeriesKind, name: &str) -> Option<Series> {
        self.lock().series(kind).iter().find(|s| s.name == name).cloned()
    }

    pub fn journal(&self) -> Vec<Write> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn fail_updates_for(&self, series_name: &str) {
        self.lock().failing_updates.insert(series_name.to_string());
    }

    pub fn fail_queries_for(&self, resource: &'static str) {
        self.lock().failing_resources.insert(resource);
    }

    fn paginate<T: Clone>(&self, all: Vec<T>, query: &Query, next: Option<&str>) -> Page<T> {
        let total = all.len();
        let offset = next.and_then(|token| token.parse::<usize>().ok()).unwrap_or(0);
        let size = query.top.unwrap_or(self.page_size).max(1);
        let items: Vec<T> = all.into_iter().skip(offset).take(size).collect();
        let consumed = offset + items.len();
        Page {
            items,
            count: query.count.then_some(total as u64),
            next: (consumed < total).then(|| consumed.to_string()),
        }
    }
}

fn matching<'a>(series: impl Iterator<Item = &'a Series>, query: &Query) -> Vec<Series> {
    series
        .filter(|s| query.filter.as_ref().is_none_or(|f| f.matches(&s.name)))
        .cloned()
        .collect()
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn query_series(
        &self,
        kind: SeriesKind,
        query: &Query,
        next: Option<&str>,
    ) -> Result<Page<Series>, StoreError> {
        let all = {
            let state = self.lock();
            state.check_available(kind.resource())?;
            matching(state.series(kind).iter(), query)
        };
        Ok(self.paginate(all, query, next))
    }

    async fn query_things(&self, query: &Query, next: Option<&str>) -> Result<Page<Thing>, StoreError> {
        let all: Vec<Thing> = {
            let state = self.lock();
            state.check_available("Things")?;
            state
                .things
                .iter()
                .map(|thing| {
                    let mut thing = thing.clone();
                    if query.expand == Some(Expand::MultiDatastreams) {
                        thing.multi_datastreams = state
                            .multi_datastreams
                            .iter()
                            .filter(|s| s.thing_id.as_ref() == Some(&thing.id))
                            .cloned()
                            .collect();
                    }
                    thing
                })
                .collect()
        };
        Ok(self.paginate(all, query, next))
    }

    async fn create_series(&self, new: &NewSeries) -> Result<EntityId, StoreError> {
        let mut state = self.lock();
        state.check_available(new.kind.resource())?;
        let id = state.allocate_id();
        let mut series = Series::new(new.kind, id.clone(), new.name.clone());
        series.thing_id = Some(new.thing_id.clone());
        series.sensor_id = new.sensor_id.clone();
        series.observed_property_ids = new.observed_property_ids.clone();
        series.units = new.units.clone();
        series.properties = new.properties.clone();
        state.series_mut(new.kind).push(series);
        state.journal.push(Write::Created {
            kind: new.kind,
            id: id.clone(),
            name: new.name.clone(),
        });
        Ok(id)
    }

    async fn update_properties(
        &self,
        kind: SeriesKind,
        id: &EntityId,
        properties: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let resource = kind.resource();
        let failing = state.failing_updates.clone();
        let series = state
            .series_mut(kind)
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| StoreError::service(resource, format!("no entity with id {}", id)))?;
        if failing.contains(&series.name) {
            return Err(StoreError::service(resource, format!("update of {} rejected", series.name)));
        }
        series.properties = properties.clone();
        state.journal.push(Write::Updated {
            kind,
            id: id.clone(),
            properties: properties.clone(),
        });
        Ok(())
    }

    async fn delete_series(&self, kind: SeriesKind, id: &EntityId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let list = state.series_mut(kind);
        let before = list.len();
        list.retain(|s| &s.id != id);
        if list.len() == before {
            return Err(StoreError::service(kind.resource(), format!("no entity with id {}", id)));
        }
        state.journal.push(Write::Deleted { kind, id: id.clone() });
        Ok(())
    }
}

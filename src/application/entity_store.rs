// Entity store port: paged queries and writes against the series store
use crate::domain::series::{EntityId, NewSeries, Series, SeriesKind, Thing};
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("service failure on {resource}: {message}")]
    ServiceFailure { resource: String, message: String },
}

impl StoreError {
    pub fn service(resource: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::ServiceFailure {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    NameEq(String),
    NameStartsWith(String),
}

impl Filter {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Filter::NameEq(expected) => name == expected,
            Filter::NameStartsWith(prefix) => name.starts_with(prefix.as_str()),
        }
    }
}

/// Related entities to expand inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    /// Thing, Sensor and ObservedProperty ids of a series.
    SeriesLinks,
    /// Aggregate series owned by a thing.
    MultiDatastreams,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub select: Vec<&'static str>,
    pub filter: Option<Filter>,
    pub order_by: Option<&'static str>,
    pub expand: Option<Expand>,
    pub top: Option<usize>,
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, fields: &[&'static str]) -> Self {
        self.select = fields.to_vec();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: &'static str) -> Self {
        self.order_by = Some(field);
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand = Some(expand);
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }
}

/// One page of results; `next` continues the query when present.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: Option<u64>,
    pub next: Option<String>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch a page of series of the given kind
    async fn query_series(
        &self,
        kind: SeriesKind,
        query: &Query,
        next: Option<&str>,
    ) -> Result<Page<Series>, StoreError>;

    /// Fetch a page of things, with their aggregate series expanded
    async fn query_things(&self, query: &Query, next: Option<&str>) -> Result<Page<Thing>, StoreError>;

    async fn create_series(&self, series: &NewSeries) -> Result<EntityId, StoreError>;

    /// Replace the properties of a series, touching no other field
    async fn update_properties(
        &self,
        kind: SeriesKind,
        id: &EntityId,
        properties: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    async fn delete_series(&self, kind: SeriesKind, id: &EntityId) -> Result<(), StoreError>;
}

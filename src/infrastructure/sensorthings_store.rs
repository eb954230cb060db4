// SensorThings API entity store - paged OData-style queries and entity writes over HTTP
use crate::application::entity_store::{EntityStore, Expand, Filter, Page, Query, StoreError};
use crate::domain::series::{EntityId, NewSeries, Series, SeriesKind, Thing};
use crate::infrastructure::sensorthings_mapper::{
    new_series_body, Collection, Created, SeriesRecord, ThingRecord,
};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct SensorThingsStore {
    client: Client,
    base_url: String,
}

impl SensorThingsStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn collection_url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    fn entity_url(&self, kind: SeriesKind, id: &EntityId) -> String {
        format!("{}/{}({})", self.base_url, kind.resource(), id)
    }

    fn query_url(&self, resource: &str, query: &Query, expand: Option<String>) -> String {
        let mut params = Vec::new();
        if !query.select.is_empty() {
            params.push(("$select", query.select.join(",")));
        }
        if let Some(filter) = &query.filter {
            params.push(("$filter", filter_expression(filter)));
        }
        if let Some(expand) = expand {
            params.push(("$expand", expand));
        }
        if let Some(order_by) = query.order_by {
            params.push(("$orderby", order_by.to_string()));
        }
        if let Some(top) = query.top {
            params.push(("$top", top.to_string()));
        }
        if query.count {
            params.push(("$count", "true".to_string()));
        }
        let url = self.collection_url(resource);
        if params.is_empty() {
            return url;
        }
        let encoded: Vec<String> = params
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
            .collect();
        format!("{}?{}", url, encoded.join("&"))
    }

    async fn send(&self, resource: &str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StoreError::service(resource, format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::service(resource, format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        resource: &str,
        url: &str,
    ) -> Result<Collection<T>, StoreError> {
        tracing::debug!(resource, url, "Fetching page");
        let response = self.send(resource, self.client.get(url)).await?;
        response
            .json::<Collection<T>>()
            .await
            .map_err(|e| StoreError::service(resource, format!("unreadable response: {}", e)))
    }
}

/// OData filter text; string literals double their single quotes.
fn filter_expression(filter: &Filter) -> String {
    match filter {
        Filter::NameEq(name) => format!("name eq '{}'", name.replace('\'', "''")),
        Filter::NameStartsWith(prefix) => format!("startswith(name,'{}')", prefix.replace('\'', "''")),
    }
}

fn series_select(kind: SeriesKind, fields: &[&'static str]) -> Vec<&'static str> {
    fields
        .iter()
        .map(|&field| match (kind, field) {
            (SeriesKind::MultiDatastream, "unitOfMeasurement") => "unitOfMeasurements",
            _ => field,
        })
        .collect()
}

fn series_expand(kind: SeriesKind, expand: Option<Expand>) -> Option<String> {
    match (kind, expand?) {
        (SeriesKind::Datastream, Expand::SeriesLinks) => {
            Some("Thing($select=id),Sensor($select=id),ObservedProperty($select=id)".to_string())
        }
        (SeriesKind::MultiDatastream, Expand::SeriesLinks) => {
            Some("Thing($select=id),Sensor($select=id),ObservedProperties($select=id)".to_string())
        }
        (_, Expand::MultiDatastreams) => None,
    }
}

/// Reads the new entity's id from a `Location` such as `.../MultiDatastreams(12)`.
fn id_from_location(location: &str) -> Option<EntityId> {
    let open = location.rfind('(')?;
    let inner = location[open + 1..].strip_suffix(')')?;
    if let Some(text) = inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Some(EntityId::Text(text.replace("''", "'")));
    }
    inner.parse::<i64>().ok().map(EntityId::Number)
}

#[async_trait]
impl EntityStore for SensorThingsStore {
    async fn query_series(
        &self,
        kind: SeriesKind,
        query: &Query,
        next: Option<&str>,
    ) -> Result<Page<Series>, StoreError> {
        let resource = kind.resource();
        let url = match next {
            Some(link) => link.to_string(),
            None => {
                let mut query = query.clone();
                query.select = series_select(kind, &query.select);
                self.query_url(resource, &query, series_expand(kind, query.expand))
            }
        };
        let page: Collection<SeriesRecord> = self.fetch_page(resource, &url).await?;
        Ok(Page {
            items: page.value.into_iter().map(|r| r.into_series(kind)).collect(),
            count: page.count,
            next: page.next_link,
        })
    }

    async fn query_things(&self, query: &Query, next: Option<&str>) -> Result<Page<Thing>, StoreError> {
        let resource = "Things";
        let url = match next {
            Some(link) => link.to_string(),
            None => {
                let expand = (query.expand == Some(Expand::MultiDatastreams)).then(|| {
                    "MultiDatastreams($select=id,name,properties,unitOfMeasurements)".to_string()
                });
                self.query_url(resource, query, expand)
            }
        };
        let page: Collection<ThingRecord> = self.fetch_page(resource, &url).await?;
        let mut items = Vec::with_capacity(page.value.len());
        for mut record in page.value {
            let mut next_expanded = record.multi_datastreams_next.take();
            while let Some(link) = next_expanded {
                let more: Collection<SeriesRecord> = self.fetch_page("MultiDatastreams", &link).await?;
                record.multi_datastreams.extend(more.value);
                next_expanded = more.next_link;
            }
            items.push(record.into_thing());
        }
        Ok(Page {
            items,
            count: page.count,
            next: page.next_link,
        })
    }

    async fn create_series(&self, new: &NewSeries) -> Result<EntityId, StoreError> {
        let resource = new.kind.resource();
        let request = self
            .client
            .post(self.collection_url(resource))
            .json(&new_series_body(new));
        let response = self.send(resource, request).await?;

        let from_header = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(id_from_location);
        if let Some(id) = from_header {
            tracing::debug!(resource, %id, name = %new.name, "Series created");
            return Ok(id);
        }
        let created: Created = response
            .json()
            .await
            .map_err(|e| StoreError::service(resource, format!("no id in create response: {}", e)))?;
        Ok(created.id)
    }

    async fn update_properties(
        &self,
        kind: SeriesKind,
        id: &EntityId,
        properties: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .patch(self.entity_url(kind, id))
            .json(&json!({ "properties": properties }));
        self.send(kind.resource(), request).await?;
        Ok(())
    }

    async fn delete_series(&self, kind: SeriesKind, id: &EntityId) -> Result<(), StoreError> {
        self.send(kind.resource(), self.client.delete(self.entity_url(kind, id)))
            .await?;
        Ok(())
    }
}

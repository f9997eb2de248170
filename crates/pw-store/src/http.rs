//! REST + server-sent-events backend.
//!
//! Tables are served PostgREST-style under `<url>/rest/v1/<table>` with
//! `column=op.value` query filters. Changes stream from
//! `<url>/realtime/v1/<table>` as SSE events whose data is a JSON change
//! notification (`table`, `type`, `record`, `old_record`,
//! `commit_timestamp`).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use pw_core::{Filter, RawChange};

use crate::backend::{Backend, Query, Subscription, SubscriptionSender};
use crate::config::BackendConfig;
use crate::error::{Result, StoreError};

const PREFER: &str = "Prefer";

#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| StoreError::InvalidData(format!("invalid API key: {e}")))?;
            headers.insert("apikey", value);
            let bearer = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| StoreError::InvalidData(format!("invalid API key: {e}")))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            StoreError::InvalidData("no backend url configured (PW_BACKEND_URL)".to_string())
        })?;
        Self::new(url, config.api_key.as_deref())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn realtime_url(&self, table: &str) -> String {
        format!("{}/realtime/v1/{table}", self.base_url)
    }

    async fn rows(request: RequestBuilder) -> Result<Vec<Value>> {
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn single(request: RequestBuilder, what: &str) -> Result<Value> {
        Self::rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidData(format!("{what} returned no row")))
    }
}

/// Query-string pairs for a read or a filtered write.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|f| (f.column.clone(), f.query_value()))
        .collect();
    if let Some(order) = &query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{dir}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Parse the SSE byte stream into change notifications. Keep-alive and
/// non-JSON events are skipped.
fn changes<S, B, E>(bytes: S) -> impl Stream<Item = Result<RawChange>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    async_stream::stream! {
        let events = bytes.eventsource();
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.data.trim().is_empty() => continue,
                Ok(event) => match serde_json::from_str::<RawChange>(&event.data) {
                    Ok(change) => yield Ok(change),
                    Err(e) => warn!(event = %event.event, "skipping malformed change: {e}"),
                },
                Err(e) => {
                    yield Err(StoreError::Subscription(e.to_string()));
                    break;
                }
            }
        }
    }
}

async fn forward<S>(stream: S, tx: SubscriptionSender, table: String)
where
    S: Stream<Item = Result<RawChange>>,
{
    futures_util::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(%table, "change stream released");
                return;
            }
            item = stream.next() => match item {
                Some(event) => {
                    if !tx.send(event) {
                        return;
                    }
                }
                None => {
                    tx.send(Err(StoreError::Subscription("change stream ended".to_string())));
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let request = self
            .client
            .get(self.rest_url(&query.table))
            .query(&[("select", "*")])
            .query(&query_params(query));
        Self::rows(request).await
    }

    async fn subscribe(&self, table: &str, filters: &[Filter]) -> Result<Subscription> {
        let filter_params: Vec<(&str, String)> =
            filters.iter().map(|f| ("filter", f.to_string())).collect();
        let response = self
            .client
            .get(self.realtime_url(table))
            .header(ACCEPT, "text/event-stream")
            .query(&filter_params)
            .send()
            .await?;
        let response = check(response).await?;

        let (sub, tx) = Subscription::channel(table);
        info!(table, id = %sub.id(), "subscribed");
        let stream = changes(response.bytes_stream());
        tokio::spawn(forward(stream, tx, table.to_string()));
        Ok(sub)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let request = self
            .client
            .post(self.rest_url(table))
            .header(PREFER, "return=representation")
            .json(&row);
        Self::single(request, "insert").await
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let request = self
            .client
            .patch(self.rest_url(&query.table))
            .header(PREFER, "return=representation")
            .query(&query_params(query))
            .json(&patch);
        Self::rows(request).await
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> Result<Value> {
        let mut request = self
            .client
            .post(self.rest_url(table))
            .header(PREFER, "resolution=merge-duplicates,return=representation")
            .json(&row);
        if !on_conflict.is_empty() {
            request = request.query(&[("on_conflict", on_conflict.join(","))]);
        }
        Self::single(request, "upsert").await
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        let request = self
            .client
            .delete(self.rest_url(&query.table))
            .header(PREFER, "return=representation")
            .query(&query_params(query));
        Self::rows(request).await
    }
}

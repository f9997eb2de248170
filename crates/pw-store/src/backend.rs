//! The backend data service seam: table queries, writes, and realtime
//! change subscriptions.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use pw_core::{Filter, RawChange};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn eq(self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Remote tables plus their change feed. Implementations are cheap to clone
/// and are handed to whatever needs them; there is no global client.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Start receiving changes for `table` rows matching every filter.
    async fn subscribe(&self, table: &str, filters: &[Filter]) -> Result<Subscription>;

    /// Returns the inserted row as stored.
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Merge `patch` into every matching row; returns the updated rows.
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>>;

    /// Insert, or merge into the row whose `on_conflict` columns match.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> Result<Value>;

    /// Returns the deleted rows.
    async fn delete(&self, query: &Query) -> Result<Vec<Value>>;
}

/// Live handle on a change feed. Delivery stops once it is released or
/// dropped.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    table: String,
    events: mpsc::UnboundedReceiver<Result<RawChange>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Pair a handle with the sender its producer writes to.
    pub fn channel(table: &str) -> (Self, SubscriptionSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();
        let sub = Self {
            id,
            table: table.to_string(),
            events: rx,
            cancel: cancel.clone(),
        };
        (sub, SubscriptionSender { id, tx, cancel })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next change, or an error if the feed failed. `None` once the feed
    /// has closed.
    pub async fn next(&mut self) -> Option<Result<RawChange>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(table = %self.table, id = %self.id, "subscription released");
        }
        self.cancel.cancel();
        self.events.close();
    }
}

/// Producer side of a [`Subscription`].
#[derive(Clone, Debug)]
pub struct SubscriptionSender {
    id: Uuid,
    tx: mpsc::UnboundedSender<Result<RawChange>>,
    cancel: CancellationToken,
}

impl SubscriptionSender {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False once the handle is gone; the producer should stop.
    pub fn send(&self, event: Result<RawChange>) -> bool {
        !self.is_closed() && self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the handle is released.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let q = Query::table("user_progress")
            .eq("user_id", "u1")
            .filter("score=gte.50".parse().unwrap())
            .order_by("updated_at", false)
            .limit(10);
        assert_eq!(q.filters.len(), 2);
        assert!(q.matches(&json!({"user_id": "u1", "score": 70})));
        assert!(!q.matches(&json!({"user_id": "u1", "score": 10})));
        assert_eq!(q.limit, Some(10));
    }

    #[tokio::test]
    async fn test_release_stops_delivery() {
        let (mut sub, tx) = Subscription::channel("achievements");
        assert!(tx.send(Ok(RawChange::insert("achievements", json!({"id": 1})))));
        assert!(sub.next().await.is_some());

        sub.release();
        assert!(tx.is_closed());
        assert!(!tx.send(Ok(RawChange::insert("achievements", json!({"id": 2})))));
        tx.closed().await;
    }

    #[tokio::test]
    async fn test_next_ends_when_producer_gone() {
        let (mut sub, tx) = Subscription::channel("lessons");
        drop(tx);
        assert!(sub.next().await.is_none());
    }
}

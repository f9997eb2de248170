//! In-process backend. Tables are JSON rows in insertion order; every write
//! is broadcast to matching subscriptions, the way the hosted realtime feed
//! behaves.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};

use pw_core::{Filter, RawChange};

use crate::backend::{Backend, Query, Subscription, SubscriptionSender};
use crate::error::{Result, StoreError};

struct Subscriber {
    table: String,
    filters: Vec<Filter>,
    tx: SubscriptionSender,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    subscribers: Vec<Subscriber>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    select_gate: Arc<RwLock<()>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows without emitting change events.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Live subscriptions on `table`.
    pub fn subscriber_count(&self, table: &str) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.iter().filter(|s| s.table == table).count()
    }

    /// Block every `select` until the guard is dropped. Writes and change
    /// events keep flowing, which is how an initial fetch races the feed.
    pub async fn hold_selects(&self) -> OwnedRwLockWriteGuard<()> {
        self.select_gate.clone().write_owned().await
    }

    /// Fail every subscription on `table`, as a dropped connection would.
    pub fn fail_subscriptions(&self, table: &str, reason: &str) {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| {
            if s.table != table {
                return true;
            }
            s.tx.send(Err(StoreError::Subscription(reason.to_string())));
            false
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(inner: &mut Inner, change: RawChange) {
        let row = change
            .record
            .as_ref()
            .or(change.old_record.as_ref())
            .cloned()
            .unwrap_or(Value::Null);
        inner.subscribers.retain(|s| {
            if s.tx.is_closed() {
                return false;
            }
            if s.table == change.table && s.filters.iter().all(|f| f.matches(&row)) {
                return s.tx.send(Ok(change.clone()));
            }
            true
        });
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let _gate = self.select_gate.read().await;
        let mut rows: Vec<Value> = self
            .lock()
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(&a[&order.column], &b[&order.column]);
                if order.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn subscribe(&self, table: &str, filters: &[Filter]) -> Result<Subscription> {
        let (sub, tx) = Subscription::channel(table);
        info!(table, id = %sub.id(), "subscribed");
        self.lock().subscribers.push(Subscriber {
            table: table.to_string(),
            filters: filters.to_vec(),
            tx,
        });
        Ok(sub)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        if !row.is_object() {
            return Err(StoreError::InvalidData(format!("{table} row is not an object")));
        }
        let mut inner = self.lock();
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Self::broadcast(&mut inner, RawChange::insert(table, row.clone()).at(Utc::now()));
        Ok(row)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidData("update patch is not an object".to_string()));
        };
        let mut inner = self.lock();
        let mut changes = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                let old = row.clone();
                merge(row, &patch);
                changes.push((old, row.clone()));
            }
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            let mut change = RawChange::update(&query.table, new.clone()).at(now);
            change.old_record = Some(old);
            Self::broadcast(&mut inner, change);
            updated.push(new);
        }
        debug!(table = %query.table, count = updated.len(), "rows updated");
        Ok(updated)
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &[&str]) -> Result<Value> {
        let Value::Object(fields) = &row else {
            return Err(StoreError::InvalidData(format!("{table} row is not an object")));
        };
        let mut key = Query::table(table);
        for column in on_conflict {
            let value = fields.get(*column).ok_or_else(|| {
                StoreError::InvalidData(format!("upsert row has no `{column}`"))
            })?;
            key = key.filter(Filter::eq(column, scalar(value)));
        }

        let exists = self
            .lock()
            .tables
            .get(table)
            .is_some_and(|rows| rows.iter().any(|r| key.matches(r)));
        if !exists {
            return self.insert(table, row).await;
        }
        let mut updated = self.update(&key, row).await?;
        updated
            .pop()
            .ok_or_else(|| StoreError::InvalidData(format!("{table} row vanished during upsert")))
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.table) {
            rows.retain(|r| {
                if query.matches(r) {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
        }
        let now = Utc::now();
        for old in &removed {
            Self::broadcast(&mut inner, RawChange::delete(&query.table, old.clone()).at(now));
        }
        Ok(removed)
    }
}

fn merge(row: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = row {
        for (k, v) in patch {
            fields.insert(k.clone(), v.clone());
        }
    }
}

/// Filter operand for a JSON scalar; strings go in unquoted.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

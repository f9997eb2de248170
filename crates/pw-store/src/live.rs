//! Live collections: a background task that fetches a table, follows its
//! change feed, and publishes reconciled snapshots.

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pw_core::{
    Achievement, ChangeKind, Filter, PENDING_EVENT_LIMIT, RawChange, Reconciler, Record,
    SyncStatus, UserAchievement,
};

use crate::backend::{Backend, Query, Subscription};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub status: SyncStatus,
}

impl<T> Snapshot<T> {
    fn loading() -> Self {
        Self {
            items: Vec::new(),
            status: SyncStatus::Loading,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status == SyncStatus::Live
    }
}

/// Rows from a second table folded into the collection as patches.
#[derive(Clone, Debug)]
pub struct Join {
    pub table: &'static str,
    pub filters: Vec<Filter>,
    /// Turns a joined-table change into a patch for the collection, or
    /// `None` to skip it.
    pub fold: fn(&RawChange) -> Option<Value>,
}

pub struct LiveCollection<T: Record> {
    snapshots: watch::Receiver<Snapshot<T>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T: Record> LiveCollection<T> {
    /// Start following `T::TABLE` rows matching `filters`.
    pub fn spawn<B: Backend>(backend: B, filters: Vec<Filter>) -> Self {
        Self::spawn_with(backend, filters, None, PENDING_EVENT_LIMIT)
    }

    pub fn spawn_with<B: Backend>(
        backend: B,
        filters: Vec<Filter>,
        join: Option<Join>,
        pending_limit: usize,
    ) -> Self {
        let (tx, rx) = watch::channel(Snapshot::loading());
        let cancel = CancellationToken::new();
        let reconciler = Reconciler::with_pending_limit(pending_limit);
        let task = tokio::spawn(run(backend, filters, join, reconciler, tx, cancel.clone()));
        Self {
            snapshots: rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshots.borrow().clone()
    }

    /// A receiver that wakes on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshots.clone()
    }

    /// Wait until a snapshot satisfies `pred`. Returns it, or `None` if the
    /// collection stopped first.
    pub async fn wait_for(&self, pred: impl FnMut(&Snapshot<T>) -> bool) -> Option<Snapshot<T>> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(pred).await.ok()?;
        Some(snapshot.clone())
    }

    /// Stop the task and release its subscriptions. After this returns no
    /// further snapshots are published.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(table = T::TABLE, "live collection task failed: {e}");
        }
    }
}

impl LiveCollection<Achievement> {
    /// Achievements matching `filters`, with `earned_at` filled from the
    /// user's award rows.
    pub fn achievements<B: Backend>(backend: B, user_id: Uuid, filters: Vec<Filter>) -> Self {
        let join = Join {
            table: UserAchievement::TABLE,
            filters: vec![Filter::eq("user_id", user_id)],
            fold: fold_award,
        };
        Self::spawn_with(backend, filters, Some(join), PENDING_EVENT_LIMIT)
    }
}

impl<T: Record> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Award rows become `earned_at` patches; a removed award clears it.
pub fn fold_award(raw: &RawChange) -> Option<Value> {
    match raw.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let award: UserAchievement = serde_json::from_value(raw.record.clone()?).ok()?;
            Some(award.earned_patch())
        }
        ChangeKind::Delete => {
            let id = raw.old_record.as_ref()?.get("achievement_id")?.clone();
            Some(serde_json::json!({ "id": id, "earned_at": null }))
        }
    }
}

async fn run<T: Record, B: Backend>(
    backend: B,
    filters: Vec<Filter>,
    join: Option<Join>,
    mut reconciler: Reconciler<T>,
    tx: watch::Sender<Snapshot<T>>,
    cancel: CancellationToken,
) {
    let publish = |r: &Reconciler<T>| {
        tx.send_replace(Snapshot {
            items: r.snapshot(),
            status: r.status().clone(),
        });
    };

    // Subscribe before fetching so nothing committed during the fetch is missed
    let mut sub = match backend.subscribe(T::TABLE, &filters).await {
        Ok(sub) => sub,
        Err(e) => {
            reconciler.fail(e.to_string());
            publish(&reconciler);
            return;
        }
    };
    let mut join_sub = match &join {
        Some(j) => match backend.subscribe(j.table, &j.filters).await {
            Ok(s) => Some(s),
            Err(e) => {
                reconciler.fail(e.to_string());
                publish(&reconciler);
                return;
            }
        },
        None => None,
    };

    let fetch = initial_fetch::<T, B>(&backend, &filters, join.as_ref());
    tokio::pin!(fetch);
    let mut fetched = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = &mut fetch, if !fetched => {
                fetched = true;
                match result {
                    Ok((rows, joined)) => {
                        reconciler.initialize(rows);
                        if let Some(j) = &join {
                            for raw in &joined {
                                apply_joined(&mut reconciler, j, raw);
                            }
                        }
                        info!(table = T::TABLE, rows = reconciler.len(), "collection live");
                    }
                    Err(e) => reconciler.fail(e.to_string()),
                }
                publish(&reconciler);
                if sub_closed(&reconciler) {
                    break;
                }
            }
            event = sub.next() => {
                if on_event(&mut reconciler, event, |r, raw| r.apply_raw(raw).changed()) {
                    publish(&reconciler);
                }
                if sub_closed(&reconciler) {
                    break;
                }
            }
            event = next_joined(&mut join_sub) => {
                if let Some(j) = &join {
                    let changed = on_event(&mut reconciler, event, |r, raw| apply_joined(r, j, raw));
                    if changed {
                        publish(&reconciler);
                    }
                }
                if sub_closed(&reconciler) {
                    break;
                }
            }
        }
    }

    sub.release();
    if let Some(s) = join_sub {
        s.release();
    }
    debug!(table = T::TABLE, "live collection stopped");
}

type Fetched<T> = (Vec<T>, Vec<RawChange>);

async fn initial_fetch<T: Record, B: Backend>(
    backend: &B,
    filters: &[Filter],
    join: Option<&Join>,
) -> Result<Fetched<T>> {
    let rows = backend
        .select(&Query::table(T::TABLE).filters(filters.iter().cloned()))
        .await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(record) => records.push(record),
            Err(e) => warn!(table = T::TABLE, "skipping invalid row: {e}"),
        }
    }

    let mut joined = Vec::new();
    if let Some(j) = join {
        let rows = backend
            .select(&Query::table(j.table).filters(j.filters.iter().cloned()))
            .await?;
        joined = rows
            .into_iter()
            .map(|row| RawChange::insert(j.table, row))
            .collect();
    }
    Ok((records, joined))
}

/// Feed one subscription event through `apply`. A feed error or a closed
/// feed freezes the collection; returns whether a snapshot should go out.
fn on_event<T: Record>(
    reconciler: &mut Reconciler<T>,
    event: Option<Result<RawChange>>,
    apply: impl FnOnce(&mut Reconciler<T>, &RawChange) -> bool,
) -> bool {
    match event {
        Some(Ok(raw)) => apply(reconciler, &raw),
        Some(Err(e)) => {
            reconciler.fail(e.to_string());
            true
        }
        None => {
            reconciler.fail("change feed closed");
            true
        }
    }
}

fn apply_joined<T: Record>(reconciler: &mut Reconciler<T>, join: &Join, raw: &RawChange) -> bool {
    let Some(patch) = (join.fold)(raw) else {
        debug!(table = join.table, kind = %raw.kind, "skipping joined change");
        return false;
    };
    reconciler
        .apply_raw(&RawChange::update(T::TABLE, patch))
        .changed()
}

async fn next_joined(sub: &mut Option<Subscription>) -> Option<Result<RawChange>> {
    match sub {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

/// Once failed the feed is done; a fresh collection restarts it.
fn sub_closed<T: Record>(reconciler: &Reconciler<T>) -> bool {
    matches!(reconciler.status(), SyncStatus::Failed(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SubscriptionSender;
    use crate::error::StoreError;
    use crate::memory::MemoryBackend;
    use chrono::{DateTime, Utc};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use pw_core::Criteria;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn achievement(n: u128, title: &str, updated: i64) -> Achievement {
        Achievement {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            description: String::new(),
            criteria: Criteria {
                kind: "total_points".to_string(),
                required_value: 10,
            },
            badge_url: String::new(),
            points: 5,
            created_at: ts(0),
            updated_at: ts(updated),
            earned_at: None,
        }
    }

    fn row(a: &Achievement) -> Value {
        let mut v = serde_json::to_value(a).unwrap();
        v.as_object_mut().unwrap().remove("earned_at");
        v
    }

    fn titles(s: &Snapshot<Achievement>) -> Vec<&str> {
        s.items.iter().map(|a| a.title.as_str()).collect()
    }

    async fn wait_subscribed(backend: &MemoryBackend, table: &str, n: usize) {
        while backend.subscriber_count(table) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_fetch_then_stream() {
        let backend = MemoryBackend::new();
        backend.seed("achievements", [row(&achievement(1, "A", 1))]);

        let live = LiveCollection::<Achievement>::spawn(backend.clone(), Vec::new());
        let snap = live.wait_for(Snapshot::is_live).await.unwrap();
        assert_eq!(titles(&snap), ["A"]);

        backend
            .insert("achievements", row(&achievement(2, "B", 1)))
            .await
            .unwrap();
        let snap = live.wait_for(|s| s.items.len() == 2).await.unwrap();
        assert_eq!(titles(&snap), ["A", "B"]);

        backend
            .update(
                &Query::table("achievements").eq("id", Uuid::from_u128(1)),
                json!({"title": "A2", "updated_at": ts(2)}),
            )
            .await
            .unwrap();
        let snap = live.wait_for(|s| s.items[0].title == "A2").await.unwrap();
        assert_eq!(titles(&snap), ["A2", "B"]);

        live.stop().await;
    }

    #[tokio::test]
    async fn test_events_during_fetch_are_replayed() {
        let backend = MemoryBackend::new();
        backend.seed("achievements", [row(&achievement(1, "A", 1))]);
        let gate = backend.hold_selects().await;

        let live = LiveCollection::<Achievement>::spawn(backend.clone(), Vec::new());
        wait_subscribed(&backend, "achievements", 1).await;
        backend
            .insert("achievements", row(&achievement(2, "B", 1)))
            .await
            .unwrap();
        assert_eq!(live.snapshot().status, SyncStatus::Loading);

        drop(gate);
        let snap = live.wait_for(Snapshot::is_live).await.unwrap();
        // B was committed before the fetch ran, so it is in both: no duplicate
        assert_eq!(titles(&snap), ["A", "B"]);
        live.stop().await;
    }

    #[tokio::test]
    async fn test_failure_freezes_snapshot() {
        let backend = MemoryBackend::new();
        backend.seed("achievements", [row(&achievement(1, "A", 1))]);
        let live = LiveCollection::<Achievement>::spawn(backend.clone(), Vec::new());
        live.wait_for(Snapshot::is_live).await.unwrap();

        backend.fail_subscriptions("achievements", "connection reset");
        let snap = live
            .wait_for(|s| matches!(s.status, SyncStatus::Failed(_)))
            .await
            .unwrap();
        assert_eq!(titles(&snap), ["A"]);
        assert_eq!(
            snap.status,
            SyncStatus::Failed("subscription failed: connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_stop_releases_subscription() {
        let backend = MemoryBackend::new();
        let live = LiveCollection::<Achievement>::spawn(backend.clone(), Vec::new());
        live.wait_for(Snapshot::is_live).await.unwrap();
        let rx = live.watch();
        assert_eq!(backend.subscriber_count("achievements"), 1);

        live.stop().await;
        assert_eq!(backend.subscriber_count("achievements"), 0);

        backend
            .insert("achievements", row(&achievement(1, "late", 1)))
            .await
            .unwrap();
        assert!(rx.borrow().items.is_empty());
        assert!(rx.has_changed().is_err());
    }

    #[tokio::test]
    async fn test_achievement_feed_folds_awards() {
        let backend = MemoryBackend::new();
        let user = Uuid::from_u128(42);
        backend.seed(
            "achievements",
            [row(&achievement(1, "First", 1)), row(&achievement(2, "Second", 1))],
        );
        backend.seed(
            "user_achievements",
            [json!({"user_id": user, "achievement_id": Uuid::from_u128(1), "earned_at": ts(5)})],
        );

        let live = LiveCollection::achievements(backend.clone(), user, Vec::new());
        let snap = live.wait_for(Snapshot::is_live).await.unwrap();
        assert!(snap.items[0].is_earned());
        assert!(!snap.items[1].is_earned());

        wait_subscribed(&backend, "user_achievements", 1).await;
        // Someone else's award is filtered out at the subscription
        backend
            .insert(
                "user_achievements",
                json!({"user_id": Uuid::from_u128(7), "achievement_id": Uuid::from_u128(2), "earned_at": ts(6)}),
            )
            .await
            .unwrap();
        backend
            .insert(
                "user_achievements",
                json!({"user_id": user, "achievement_id": Uuid::from_u128(2), "earned_at": ts(7)}),
            )
            .await
            .unwrap();
        let snap = live.wait_for(|s| s.items[1].is_earned()).await.unwrap();
        assert_eq!(snap.items[1].earned_at, Some(ts(7)));

        backend
            .delete(&Query::table("user_achievements").eq("achievement_id", Uuid::from_u128(1)))
            .await
            .unwrap();
        live.wait_for(|s| !s.items[0].is_earned()).await.unwrap();
        live.stop().await;
    }

    #[tokio::test]
    async fn test_achievement_feed_applies_filters() {
        let backend = MemoryBackend::new();
        let user = Uuid::from_u128(42);
        backend.seed(
            "achievements",
            [row(&achievement(1, "First", 1)), row(&achievement(2, "Second", 1))],
        );
        backend.seed(
            "user_achievements",
            [json!({"user_id": user, "achievement_id": Uuid::from_u128(2), "earned_at": ts(5)})],
        );

        let live =
            LiveCollection::achievements(backend.clone(), user, vec![Filter::eq("title", "Second")]);
        let snap = live.wait_for(Snapshot::is_live).await.unwrap();
        assert_eq!(titles(&snap), ["Second"]);
        assert!(snap.items[0].is_earned());
        live.stop().await;
    }

    #[derive(Clone, Default)]
    struct BrokenSelect {
        senders: Arc<Mutex<Vec<SubscriptionSender>>>,
    }

    #[async_trait::async_trait]
    impl Backend for BrokenSelect {
        async fn select(&self, _query: &Query) -> Result<Vec<Value>> {
            Err(StoreError::InvalidData("select refused".to_string()))
        }

        async fn subscribe(&self, table: &str, _filters: &[Filter]) -> Result<Subscription> {
            let (sub, tx) = Subscription::channel(table);
            self.senders.lock().unwrap().push(tx);
            Ok(sub)
        }

        async fn insert(&self, _table: &str, _row: Value) -> Result<Value> {
            Err(StoreError::InvalidData("read only".to_string()))
        }

        async fn update(&self, _query: &Query, _patch: Value) -> Result<Vec<Value>> {
            Err(StoreError::InvalidData("read only".to_string()))
        }

        async fn upsert(&self, _table: &str, _row: Value, _on_conflict: &[&str]) -> Result<Value> {
            Err(StoreError::InvalidData("read only".to_string()))
        }

        async fn delete(&self, _query: &Query) -> Result<Vec<Value>> {
            Err(StoreError::InvalidData("read only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_subscription() {
        let backend = BrokenSelect::default();
        let senders = backend.senders.clone();
        let live = LiveCollection::<Achievement>::spawn(backend, Vec::new());

        let snap = live
            .wait_for(|s| matches!(s.status, SyncStatus::Failed(_)))
            .await
            .unwrap();
        assert!(snap.items.is_empty());

        // The task gives up on its own; no further event is needed
        let tx = senders.lock().unwrap()[0].clone();
        tokio::time::timeout(Duration::from_secs(5), tx.closed())
            .await
            .unwrap();
        live.stop().await;
    }

    #[test]
    fn test_fold_award_shapes() {
        let insert = RawChange::insert(
            "user_achievements",
            json!({"user_id": Uuid::from_u128(1), "achievement_id": Uuid::from_u128(2), "earned_at": ts(3)}),
        );
        let patch = fold_award(&insert).unwrap();
        assert_eq!(patch["id"], json!(Uuid::from_u128(2)));

        let delete = RawChange::delete(
            "user_achievements",
            json!({"achievement_id": Uuid::from_u128(2)}),
        );
        assert_eq!(fold_award(&delete).unwrap()["earned_at"], Value::Null);

        let junk = RawChange::insert("user_achievements", json!({"user_id": 1}));
        assert!(fold_award(&junk).is_none());
    }
}

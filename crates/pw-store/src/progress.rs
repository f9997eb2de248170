//! Progress writes and achievement awards against the backend.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use pw_core::{
    Achievement, ProgressStatus, Record, UserAchievement, UserProgress, eligible_awards,
};

use crate::backend::{Backend, Query};
use crate::error::{Result, StoreError};

/// Fields to change on a progress row; `None` leaves the stored value.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProgressUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProgressStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Upsert the user's progress row for a lesson, touching `last_accessed`.
pub async fn update_progress<B: Backend>(
    backend: &B,
    user_id: Uuid,
    lesson_id: Uuid,
    update: &ProgressUpdate,
) -> Result<UserProgress> {
    let key = Query::table(UserProgress::TABLE)
        .eq("user_id", user_id)
        .eq("lesson_id", lesson_id)
        .limit(1);
    let exists = !backend.select(&key).await?.is_empty();

    let now = Utc::now();
    let Value::Object(mut row) = serde_json::to_value(update)? else {
        return Err(StoreError::InvalidData("progress update is not an object".to_string()));
    };
    row.insert("user_id".to_string(), json!(user_id));
    row.insert("lesson_id".to_string(), json!(lesson_id));
    row.insert("last_accessed".to_string(), json!(now));
    row.insert("updated_at".to_string(), json!(now));
    if update.status == Some(ProgressStatus::Completed) {
        row.insert("completed_at".to_string(), json!(now));
    }
    if !exists {
        row.insert("id".to_string(), json!(Uuid::new_v4()));
        row.insert("created_at".to_string(), json!(now));
    }

    let stored = backend
        .upsert(UserProgress::TABLE, Value::Object(row), &["user_id", "lesson_id"])
        .await?;
    Ok(serde_json::from_value(stored)?)
}

/// Evaluate every unearned achievement against the user's progress and
/// record the ones now met. Returns the newly awarded achievements.
pub async fn award_achievements<B: Backend>(backend: &B, user_id: Uuid) -> Result<Vec<Achievement>> {
    let progress: Vec<UserProgress> = fetch(
        backend,
        &Query::table(UserProgress::TABLE).eq("user_id", user_id),
    )
    .await?;
    let mut achievements: Vec<Achievement> =
        fetch(backend, &Query::table(Achievement::TABLE)).await?;
    let awards: Vec<UserAchievement> = fetch(
        backend,
        &Query::table(UserAchievement::TABLE).eq("user_id", user_id),
    )
    .await?;

    for award in &awards {
        if let Some(a) = achievements.iter_mut().find(|a| a.id == award.achievement_id) {
            a.earned_at = Some(award.earned_at);
        }
    }

    let now = Utc::now();
    let mut awarded = Vec::new();
    for achievement in eligible_awards(&progress, &achievements) {
        let award = UserAchievement {
            user_id,
            achievement_id: achievement.id,
            earned_at: now,
        };
        backend
            .insert(UserAchievement::TABLE, serde_json::to_value(&award)?)
            .await?;
        let mut earned = achievement.clone();
        earned.earned_at = Some(now);
        awarded.push(earned);
    }

    if !awarded.is_empty() {
        info!(%user_id, count = awarded.len(), "achievements awarded");
    }
    Ok(awarded)
}

async fn fetch<B: Backend, T: DeserializeOwned>(backend: &B, query: &Query) -> Result<Vec<T>> {
    let rows = backend.select(query).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value(row) {
            Ok(v) => out.push(v),
            Err(e) => warn!(table = %query.table, "skipping invalid row: {e}"),
        }
    }
    Ok(out)
}

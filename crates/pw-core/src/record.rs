//! Typed rows for the backend tables the app reads.
//!
//! Payloads arrive as loosely typed JSON; everything past ingress works
//! with these structs.

use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A row kept in a reconciled collection.
pub trait Record:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + DeserializeOwned + Send + Sync + 'static;

    /// Backend table the rows come from.
    const TABLE: &'static str;

    /// Column holding the unique key.
    const KEY: &'static str = "id";

    fn id(&self) -> Self::Id;

    /// Ordering stamp for change events. Rows without one are never
    /// considered stale.
    fn version(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content: Value,
    pub difficulty: Difficulty,
    pub category: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub estimated_duration: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Lesson {
    type Id = Uuid;
    const TABLE: &'static str = "lessons";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for ChapterRecord {
    type Id = Uuid;
    const TABLE: &'static str = "chapters";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Award rule stored as JSON on an achievement, e.g.
/// `{"type": "lessons_completed", "required_value": 5}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required_value: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub criteria: Criteria,
    #[serde(default)]
    pub badge_url: String,
    #[serde(default)]
    pub points: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set from the user's award row, not stored on the achievement itself.
    #[serde(default)]
    pub earned_at: Option<DateTime<Utc>>,
}

impl Achievement {
    pub fn is_earned(&self) -> bool {
        self.earned_at.is_some()
    }
}

impl Record for Achievement {
    type Id = Uuid;
    const TABLE: &'static str = "achievements";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub learning_streak: u32,
    #[serde(default)]
    pub total_points: u32,
    #[serde(default)]
    pub preferences: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Profile {
    type Id = Uuid;
    const TABLE: &'static str = "profiles";
    const KEY: &'static str = "user_id";

    fn id(&self) -> Uuid {
        self.user_id
    }

    fn version(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lesson_id: Uuid,
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for UserProgress {
    type Id = Uuid;
    const TABLE: &'static str = "user_progress";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

/// A user's award row. Not reconciled on its own: it is folded into the
/// matching [`Achievement`] as `earned_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievement {
    pub user_id: Uuid,
    pub achievement_id: Uuid,
    pub earned_at: DateTime<Utc>,
}

impl UserAchievement {
    pub const TABLE: &'static str = "user_achievements";

    /// The award as a partial achievement row, ready to merge.
    pub fn earned_patch(&self) -> Value {
        serde_json::json!({
            "id": self.achievement_id,
            "earned_at": self.earned_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    pub fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    pub fn achievement(n: u128, title: &str, kind: &str, required: u32, updated: i64) -> Achievement {
        Achievement {
            id: id(n),
            title: title.to_string(),
            description: String::new(),
            criteria: Criteria {
                kind: kind.to_string(),
                required_value: required,
            },
            badge_url: String::new(),
            points: 10,
            created_at: ts(0),
            updated_at: ts(updated),
            earned_at: None,
        }
    }
}

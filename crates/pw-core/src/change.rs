//! Realtime change events: the wire shape and its typed form.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::Record;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("change for table {got}, expected {expected}")]
    TableMismatch { expected: &'static str, got: String },
    #[error("{0} change carries no row")]
    MissingRow(ChangeKind),
    #[error("row is not a JSON object")]
    NotAnObject,
    #[error("row has no `{0}` key")]
    MissingKey(&'static str),
    #[error("invalid `{key}`: {source}")]
    InvalidKey {
        key: &'static str,
        source: serde_json::Error,
    },
    #[error("invalid row: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A change notification as the realtime channel delivers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RawChange {
    pub fn insert(table: &str, record: Value) -> Self {
        Self::with_row(table, ChangeKind::Insert, record)
    }

    pub fn update(table: &str, record: Value) -> Self {
        Self::with_row(table, ChangeKind::Update, record)
    }

    pub fn delete(table: &str, old_record: Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(old_record),
            commit_timestamp: None,
        }
    }

    pub fn at(mut self, commit_timestamp: DateTime<Utc>) -> Self {
        self.commit_timestamp = Some(commit_timestamp);
        self
    }

    fn with_row(table: &str, kind: ChangeKind, record: Value) -> Self {
        Self {
            table: table.to_string(),
            kind,
            record: Some(record),
            old_record: None,
            commit_timestamp: None,
        }
    }
}

/// A possibly partial row: the key plus whichever fields the event carried.
#[derive(Clone, Debug)]
pub struct Patch<T: Record> {
    id: T::Id,
    fields: Map<String, Value>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Patch<T> {
    pub fn from_value(value: Value) -> Result<Self, IngressError> {
        let Value::Object(fields) = value else {
            return Err(IngressError::NotAnObject);
        };
        let id = parse_key::<T>(&fields)?;
        Ok(Self {
            id,
            fields,
            _record: PhantomData,
        })
    }

    /// A patch carrying every field of `record`.
    pub fn full(record: &T) -> Result<Self, IngressError> {
        Self::from_value(serde_json::to_value(record)?)
    }

    pub fn id(&self) -> &T::Id {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Shallow merge: fields present in the patch overwrite, absent ones stay.
    pub fn apply_to(&self, current: &T) -> Result<T, IngressError> {
        let mut merged = match serde_json::to_value(current)? {
            Value::Object(map) => map,
            _ => return Err(IngressError::NotAnObject),
        };
        for (key, value) in &self.fields {
            merged.insert(key.clone(), value.clone());
        }
        Ok(serde_json::from_value(Value::Object(merged))?)
    }

    /// The patch as a complete row; fails if required fields are missing.
    pub fn to_record(&self) -> Result<T, IngressError> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

#[derive(Clone, Debug)]
pub enum Change<T: Record> {
    Upsert(Patch<T>),
    Delete {
        id: T::Id,
        at: Option<DateTime<Utc>>,
    },
}

impl<T: Record> Change<T> {
    /// Validate a wire event for table `T::TABLE`.
    pub fn from_raw(raw: &RawChange) -> Result<Self, IngressError> {
        if raw.table != T::TABLE {
            return Err(IngressError::TableMismatch {
                expected: T::TABLE,
                got: raw.table.clone(),
            });
        }
        match raw.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = raw.record.clone().ok_or(IngressError::MissingRow(raw.kind))?;
                Ok(Change::Upsert(Patch::from_value(row)?))
            }
            ChangeKind::Delete => {
                let row = raw
                    .old_record
                    .as_ref()
                    .ok_or(IngressError::MissingRow(raw.kind))?;
                let Value::Object(fields) = row else {
                    return Err(IngressError::NotAnObject);
                };
                Ok(Change::Delete {
                    id: parse_key::<T>(fields)?,
                    at: raw.commit_timestamp,
                })
            }
        }
    }

    pub fn upsert(record: &T) -> Result<Self, IngressError> {
        Ok(Change::Upsert(Patch::full(record)?))
    }

    pub fn id(&self) -> &T::Id {
        match self {
            Change::Upsert(patch) => patch.id(),
            Change::Delete { id, .. } => id,
        }
    }
}

fn parse_key<T: Record>(fields: &Map<String, Value>) -> Result<T::Id, IngressError> {
    let key = fields.get(T::KEY).ok_or(IngressError::MissingKey(T::KEY))?;
    serde_json::from_value(key.clone()).map_err(|source| IngressError::InvalidKey {
        key: T::KEY,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{achievement, id};
    use crate::record::{Achievement, Profile};
    use serde_json::json;

    #[test]
    fn test_raw_change_wire_shape() {
        let raw: RawChange = serde_json::from_value(json!({
            "table": "achievements",
            "type": "UPDATE",
            "record": {"id": "00000000-0000-0000-0000-000000000001", "title": "New"},
            "commit_timestamp": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(raw.kind, ChangeKind::Update);
        assert!(raw.old_record.is_none());
        assert!(raw.commit_timestamp.is_some());
    }

    #[test]
    fn test_upsert_from_partial_row() {
        let raw = RawChange::update(
            "achievements",
            json!({"id": "00000000-0000-0000-0000-000000000001", "title": "Renamed"}),
        );
        let change = Change::<Achievement>::from_raw(&raw).unwrap();
        assert_eq!(change.id(), &id(1));
        let Change::Upsert(patch) = change else {
            panic!("expected upsert");
        };
        assert_eq!(patch.fields().len(), 2);

        let current = achievement(1, "Original", "total_points", 100, 10);
        let merged = patch.apply_to(&current).unwrap();
        assert_eq!(merged.title, "Renamed");
        assert_eq!(merged.criteria, current.criteria);
        assert_eq!(merged.updated_at, current.updated_at);

        // Too partial to stand alone
        assert!(patch.to_record().is_err());
    }

    #[test]
    fn test_delete_uses_old_record_key() {
        let raw = RawChange::delete(
            "achievements",
            json!({"id": "00000000-0000-0000-0000-000000000002"}),
        )
        .at(DateTime::from_timestamp(50, 0).unwrap());
        match Change::<Achievement>::from_raw(&raw).unwrap() {
            Change::Delete { id: got, at } => {
                assert_eq!(got, id(2));
                assert!(at.is_some());
            }
            other => panic!("expected delete, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_key_column() {
        let raw = RawChange::update(
            "profiles",
            json!({"user_id": "00000000-0000-0000-0000-000000000009", "bio": "hi"}),
        );
        let change = Change::<Profile>::from_raw(&raw).unwrap();
        assert_eq!(change.id(), &id(9));
    }

    #[test]
    fn test_ingress_rejections() {
        let wrong_table = RawChange::insert("lessons", json!({"id": id(1)}));
        assert!(matches!(
            Change::<Achievement>::from_raw(&wrong_table),
            Err(IngressError::TableMismatch { .. })
        ));

        let no_key = RawChange::insert("achievements", json!({"title": "x"}));
        assert!(matches!(
            Change::<Achievement>::from_raw(&no_key),
            Err(IngressError::MissingKey("id"))
        ));

        let bad_key = RawChange::insert("achievements", json!({"id": 42}));
        assert!(matches!(
            Change::<Achievement>::from_raw(&bad_key),
            Err(IngressError::InvalidKey { .. })
        ));

        let not_object = RawChange::insert("achievements", json!([1, 2]));
        assert!(matches!(
            Change::<Achievement>::from_raw(&not_object),
            Err(IngressError::NotAnObject)
        ));

        let mut no_row = RawChange::insert("achievements", json!({}));
        no_row.record = None;
        assert!(matches!(
            Change::<Achievement>::from_raw(&no_row),
            Err(IngressError::MissingRow(ChangeKind::Insert))
        ));
    }

    #[test]
    fn test_full_patch_roundtrip() {
        let a = achievement(3, "Full", "lessons_completed", 2, 7);
        let change = Change::upsert(&a).unwrap();
        let Change::Upsert(patch) = change else {
            panic!("expected upsert");
        };
        assert_eq!(patch.to_record().unwrap(), a);
    }

    #[test]
    fn test_invalid_merge_is_rejected() {
        let patch = Patch::<Achievement>::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "points": "lots"
        }))
        .unwrap();
        let current = achievement(1, "A", "total_points", 1, 0);
        assert!(matches!(
            patch.apply_to(&current),
            Err(IngressError::Invalid(_))
        ));
    }
}

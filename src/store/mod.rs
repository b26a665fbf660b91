//! Document storage: JSON documents grouped in collections, addressed by UUID.
//!
//! [`DocumentStore`] is the generic collection API used by every entity service.
//! [`MembershipStore`] holds the enrollment mutations that must touch a student
//! and the class counters as one unit. Both are implemented by [`PgStore`]
//! (JSONB tables) and [`MemoryStore`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_collections, ensure_database_exists, PgStore};

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Multi-class membership field on student documents.
pub const CLASS_IDS: &str = "class_ids";
/// Legacy single-class membership field on student documents.
pub const LEGACY_CLASS_ID: &str = "class_id";
/// Denormalized number of students holding a class.
pub const STUDENT_COUNT: &str = "student_count";
/// Activity flag on classes; absent reads as active.
pub const ACTIVE: &str = "active";

/// Keys owned by the store; never part of a document body.
const RESERVED_KEYS: &[&str] = &["id", "created_at", "updated_at"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Classes,
    Students,
    Materials,
    Flashcards,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Classes,
        Collection::Students,
        Collection::Materials,
        Collection::Flashcards,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Classes => "classes",
            Collection::Students => "students",
            Collection::Materials => "materials",
            Collection::Flashcards => "flashcards",
        }
    }

    /// Top-level fields whose values must be unique across the collection.
    pub fn unique_fields(self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["email"],
            Collection::Students => &["nis", "user_id"],
            _ => &[],
        }
    }

    /// Top-level scalar fields that get a lookup index.
    pub fn lookup_fields(self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["role"],
            Collection::Classes => &["teacher_id"],
            Collection::Students => &[LEGACY_CLASS_ID],
            Collection::Materials | Collection::Flashcards => &["class_id", "teacher_id"],
        }
    }
}

/// A stored document: body plus store-managed identity and timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub body: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Body with `id`, `created_at` and `updated_at` merged in.
    pub fn to_value(&self) -> Value {
        let mut map = self.body.clone();
        map.insert("id".into(), Value::String(self.id.to_string()));
        map.insert("created_at".into(), Value::String(self.created_at.to_rfc3339()));
        map.insert("updated_at".into(), Value::String(self.updated_at.to_rfc3339()));
        Value::Object(map)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.to_value()).map_err(|e| AppError::Decode(format!("document {}: {}", self.id, e)))
    }
}

/// Strip store-managed keys from an incoming body.
pub(crate) fn sanitize_body(mut body: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        body.remove(*key);
    }
    body
}

/// A predicate over a document. Field names are top-level keys.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Field equals the value.
    Eq(&'static str, Value),
    /// Field is an array holding the value.
    Contains(&'static str, Value),
    /// Field is present (a null value counts as present).
    Exists(&'static str),
    Missing(&'static str),
    /// Field is an array of exactly this length.
    Len(&'static str, usize),
    IdIn(Vec<Uuid>),
}

impl Condition {
    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Condition::Eq(field, value.into())
    }

    pub fn eq_id(field: &'static str, id: Uuid) -> Self {
        Condition::Eq(field, Value::String(id.to_string()))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Condition::Eq(field, value) => doc.get(field) == Some(value),
            Condition::Contains(field, value) => match doc.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Condition::Exists(field) => doc.body.contains_key(*field),
            Condition::Missing(field) => !doc.body.contains_key(*field),
            Condition::Len(field, n) => matches!(doc.get(field), Some(Value::Array(items)) if items.len() == *n),
            Condition::IdIn(ids) => ids.contains(&doc.id),
        }
    }
}

/// Filtered listing. Results are ordered newest first.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Top-level field writes applied atomically to one document: unset first, then set.
#[derive(Clone, Debug, Default)]
pub struct Update {
    pub set: Map<String, Value>,
    pub unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    /// Set every field of `fields`.
    pub fn merge(mut self, fields: Map<String, Value>) -> Self {
        self.set.extend(fields);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    pub(crate) fn apply(&self, body: &mut Map<String, Value>) {
        for field in &self.unset {
            body.remove(field);
        }
        for (k, v) in &self.set {
            body.insert(k.clone(), v.clone());
        }
    }
}

/// Outcome of a membership mutation.
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub student: Document,
    /// Classes actually added or removed; empty when the request changed nothing.
    pub changed: Vec<Uuid>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<(), AppError>;

    /// Insert a new document with a fresh id. Unique-field collisions fail with `Conflict`.
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Document, AppError>;

    async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>, AppError>;

    async fn find(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, AppError>;

    async fn count(&self, collection: Collection, conditions: &[Condition]) -> Result<u64, AppError>;

    /// Apply `update` to the document if it exists and matches every guard condition.
    /// Returns `None` when nothing matched.
    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        guard: &[Condition],
        update: &Update,
    ) -> Result<Option<Document>, AppError>;

    /// Delete the document if it exists and matches every guard condition.
    async fn delete(&self, collection: Collection, id: Uuid, guard: &[Condition]) -> Result<Option<Document>, AppError>;

    /// Add `by` to a numeric field on each listed document, never going below zero.
    /// Returns the number of documents touched.
    async fn increment(&self, collection: Collection, ids: &[Uuid], field: &'static str, by: i64) -> Result<u64, AppError>;
}

/// Enrollment writes. Each call changes the student and the affected class
/// counters together. Classes being joined are re-checked with the write: a class that
/// is gone or inactive fails the call with `InvalidReference` and nothing is written.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert a student holding exactly `class_ids` and increment each class's `student_count`.
    async fn create_enrollment(&self, body: Map<String, Value>, class_ids: &[Uuid]) -> Result<Document, AppError>;

    /// Append the classes the student does not hold yet and increment their counters.
    /// `None` when the student does not exist.
    async fn add_memberships(&self, student_id: Uuid, class_ids: &[Uuid]) -> Result<Option<MembershipChange>, AppError>;

    /// Drop one class and decrement its counter. Fails with `InvariantViolation`
    /// when it is the student's last class; `changed` is empty when it was not held.
    async fn remove_membership(&self, student_id: Uuid, class_id: Uuid) -> Result<Option<MembershipChange>, AppError>;

    /// Delete the student and decrement the counter of every class it held.
    async fn delete_student(&self, student_id: Uuid) -> Result<Option<Document>, AppError>;
}

/// Everything the services need from storage.
pub trait Store: DocumentStore + MembershipStore {}

impl<T: DocumentStore + MembershipStore> Store for T {}

/// The membership set of a student body, reading either representation.
/// A present `class_ids` key is authoritative even when empty; `class_id` is read only
/// when `class_ids` is absent, matching the `Missing(CLASS_IDS)` membership queries.
/// Unparseable entries are ignored.
pub fn membership_set(body: &Map<String, Value>) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::new();
    match body.get(CLASS_IDS) {
        Some(Value::Array(items)) => {
            for id in items.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()) {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        Some(_) => {}
        None => {
            if let Some(id) = body.get(LEGACY_CLASS_ID).and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) {
                out.push(id);
            }
        }
    }
    out
}

/// Set union keeping the current order. Returns (merged, newly added).
pub fn merge_memberships(current: &[Uuid], requested: &[Uuid]) -> (Vec<Uuid>, Vec<Uuid>) {
    let mut merged = current.to_vec();
    let mut added = Vec::new();
    for id in requested {
        if !merged.contains(id) {
            merged.push(*id);
            added.push(*id);
        }
    }
    (merged, added)
}

/// Remaining memberships after dropping `class_id`; `None` when it is not held.
pub fn without_membership(current: &[Uuid], class_id: Uuid) -> Result<Option<Vec<Uuid>>, AppError> {
    if !current.contains(&class_id) {
        return Ok(None);
    }
    if current.len() == 1 {
        return Err(AppError::InvariantViolation(format!(
            "class {} is the student's only class; a student must belong to at least one class",
            class_id
        )));
    }
    Ok(Some(current.iter().copied().filter(|id| *id != class_id).collect()))
}

/// Whether a class document accepts enrollments.
pub(crate) fn is_active(doc: &Document) -> bool {
    doc.get(ACTIVE) != Some(&Value::Bool(false))
}

/// `InvalidReference` naming every requested class missing from `usable`.
pub(crate) fn require_classes(requested: &[Uuid], usable: &[Uuid]) -> Result<(), AppError> {
    let missing: Vec<Uuid> = requested.iter().filter(|id| !usable.contains(id)).copied().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid_classes(missing))
    }
}

/// Update that writes `class_ids` and drops the legacy field.
pub(crate) fn membership_update(class_ids: &[Uuid]) -> Update {
    let ids: Vec<Value> = class_ids.iter().map(|id| Value::String(id.to_string())).collect();
    Update::new().set(CLASS_IDS, Value::Array(ids)).unset(LEGACY_CLASS_ID)
}

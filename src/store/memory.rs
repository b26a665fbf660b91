//! In-process store behind one mutex. Used by tests and by `classroom-server --memory`.

use super::{
    is_active, membership_set, membership_update, merge_memberships, require_classes, sanitize_body, without_membership,
    Collection, Condition, Document, DocumentStore, MembershipChange, MembershipStore, Query, Update, STUDENT_COUNT,
};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

struct Stored {
    seq: u64,
    doc: Document,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, Vec<Stored>>,
    seq: u64,
}

impl Inner {
    fn rows(&self, collection: Collection) -> &[Stored] {
        self.collections.get(&collection).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find_mut(&mut self, collection: Collection, id: Uuid) -> Option<&mut Document> {
        self.collections
            .get_mut(&collection)?
            .iter_mut()
            .find(|s| s.doc.id == id)
            .map(|s| &mut s.doc)
    }

    fn get(&self, collection: Collection, id: Uuid) -> Option<&Document> {
        self.rows(collection).iter().map(|s| &s.doc).find(|d| d.id == id)
    }

    /// `InvalidReference` unless every class exists and is active.
    fn require_active_classes(&self, ids: &[Uuid]) -> Result<(), AppError> {
        let usable: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| self.get(Collection::Classes, *id).is_some_and(is_active))
            .collect();
        require_classes(ids, &usable)
    }

    /// `Conflict` when another document already holds one of the collection's unique values.
    fn check_unique(&self, collection: Collection, id: Uuid, body: &Map<String, Value>) -> Result<(), AppError> {
        for field in collection.unique_fields() {
            let Some(value) = body.get(*field).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self
                .rows(collection)
                .iter()
                .any(|s| s.doc.id != id && s.doc.get(field) == Some(value));
            if taken {
                return Err(AppError::Conflict(format!("{} already in use", field)));
            }
        }
        Ok(())
    }

    fn insert(&mut self, collection: Collection, body: Map<String, Value>) -> Result<Document, AppError> {
        let id = Uuid::new_v4();
        self.check_unique(collection, id, &body)?;
        let now = Utc::now();
        let doc = Document {
            id,
            body,
            created_at: now,
            updated_at: now,
        };
        self.seq += 1;
        let seq = self.seq;
        self.collections.entry(collection).or_default().push(Stored {
            seq,
            doc: doc.clone(),
        });
        Ok(doc)
    }

    fn update(&mut self, collection: Collection, id: Uuid, update: &Update) -> Result<Option<Document>, AppError> {
        let Some(current) = self.get(collection, id) else {
            return Ok(None);
        };
        let mut body = current.body.clone();
        update.apply(&mut body);
        self.check_unique(collection, id, &body)?;
        let Some(doc) = self.find_mut(collection, id) else {
            return Ok(None);
        };
        doc.body = body;
        doc.updated_at = Utc::now();
        Ok(Some(doc.clone()))
    }

    fn remove(&mut self, collection: Collection, id: Uuid) -> Option<Document> {
        let rows = self.collections.get_mut(&collection)?;
        let pos = rows.iter().position(|s| s.doc.id == id)?;
        Some(rows.remove(pos).doc)
    }

    fn increment(&mut self, collection: Collection, ids: &[Uuid], field: &str, by: i64) -> u64 {
        let Some(rows) = self.collections.get_mut(&collection) else {
            return 0;
        };
        let mut touched = 0;
        let now = Utc::now();
        for stored in rows.iter_mut().filter(|s| ids.contains(&s.doc.id)) {
            let current = stored.doc.get(field).and_then(Value::as_i64).unwrap_or(0);
            stored.doc.body.insert(field.to_string(), Value::from((current + by).max(0)));
            stored.doc.updated_at = now;
            touched += 1;
        }
        touched
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Document, AppError> {
        self.lock().insert(collection, sanitize_body(body))
    }

    async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self.lock().get(collection, id).cloned())
    }

    async fn find(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, AppError> {
        let inner = self.lock();
        let mut hits: Vec<&Stored> = inner
            .rows(collection)
            .iter()
            .filter(|s| query.conditions.iter().all(|c| c.matches(&s.doc)))
            .collect();
        hits.sort_by(|a, b| (b.doc.created_at, b.seq).cmp(&(a.doc.created_at, a.seq)));
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query
            .limit
            .map(|l| l.min(crate::sql::MAX_LIMIT) as usize)
            .unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.doc.clone())
            .collect())
    }

    async fn count(&self, collection: Collection, conditions: &[Condition]) -> Result<u64, AppError> {
        let inner = self.lock();
        let n = inner
            .rows(collection)
            .iter()
            .filter(|s| conditions.iter().all(|c| c.matches(&s.doc)))
            .count();
        Ok(n as u64)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        guard: &[Condition],
        update: &Update,
    ) -> Result<Option<Document>, AppError> {
        let mut inner = self.lock();
        match inner.get(collection, id) {
            Some(doc) if guard.iter().all(|c| c.matches(doc)) => {}
            _ => return Ok(None),
        }
        inner.update(collection, id, update)
    }

    async fn delete(&self, collection: Collection, id: Uuid, guard: &[Condition]) -> Result<Option<Document>, AppError> {
        let mut inner = self.lock();
        match inner.get(collection, id) {
            Some(doc) if guard.iter().all(|c| c.matches(doc)) => {}
            _ => return Ok(None),
        }
        Ok(inner.remove(collection, id))
    }

    async fn increment(&self, collection: Collection, ids: &[Uuid], field: &'static str, by: i64) -> Result<u64, AppError> {
        Ok(self.lock().increment(collection, ids, field, by))
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn create_enrollment(&self, body: Map<String, Value>, class_ids: &[Uuid]) -> Result<Document, AppError> {
        let mut body = sanitize_body(body);
        membership_update(class_ids).apply(&mut body);
        let mut inner = self.lock();
        inner.require_active_classes(class_ids)?;
        let student = inner.insert(Collection::Students, body)?;
        inner.increment(Collection::Classes, class_ids, STUDENT_COUNT, 1);
        Ok(student)
    }

    async fn add_memberships(&self, student_id: Uuid, class_ids: &[Uuid]) -> Result<Option<MembershipChange>, AppError> {
        let mut inner = self.lock();
        let Some(current) = inner.get(Collection::Students, student_id).cloned() else {
            return Ok(None);
        };
        let (merged, added) = merge_memberships(&membership_set(&current.body), class_ids);
        if added.is_empty() {
            return Ok(Some(MembershipChange {
                student: current,
                changed: added,
            }));
        }
        inner.require_active_classes(&added)?;
        let Some(student) = inner.update(Collection::Students, student_id, &membership_update(&merged))? else {
            return Ok(None);
        };
        inner.increment(Collection::Classes, &added, STUDENT_COUNT, 1);
        Ok(Some(MembershipChange { student, changed: added }))
    }

    async fn remove_membership(&self, student_id: Uuid, class_id: Uuid) -> Result<Option<MembershipChange>, AppError> {
        let mut inner = self.lock();
        let Some(current) = inner.get(Collection::Students, student_id).cloned() else {
            return Ok(None);
        };
        let Some(remaining) = without_membership(&membership_set(&current.body), class_id)? else {
            return Ok(Some(MembershipChange {
                student: current,
                changed: Vec::new(),
            }));
        };
        let Some(student) = inner.update(Collection::Students, student_id, &membership_update(&remaining))? else {
            return Ok(None);
        };
        inner.increment(Collection::Classes, &[class_id], STUDENT_COUNT, -1);
        Ok(Some(MembershipChange {
            student,
            changed: vec![class_id],
        }))
    }

    async fn delete_student(&self, student_id: Uuid) -> Result<Option<Document>, AppError> {
        let mut inner = self.lock();
        let Some(student) = inner.remove(Collection::Students, student_id) else {
            return Ok(None);
        };
        inner.increment(Collection::Classes, &membership_set(&student.body), STUDENT_COUNT, -1);
        Ok(Some(student))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CLASS_IDS, LEGACY_CLASS_ID};
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn unique_fields_conflict_on_insert_and_update() {
        let store = MemoryStore::new();
        store
            .insert(Collection::Students, body(json!({ "nis": "10001", "user_id": "u1" })))
            .await
            .unwrap();
        let err = store
            .insert(Collection::Students, body(json!({ "nis": "10001", "user_id": "u2" })))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "nis already in use"));

        let other = store
            .insert(Collection::Students, body(json!({ "nis": "10002", "user_id": "u2" })))
            .await
            .unwrap();
        let err = store
            .update(Collection::Students, other.id, &[], &Update::new().set("user_id", "u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_orders_newest_first_and_pages() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store.insert(Collection::Users, body(json!({ "n": i }))).await.unwrap();
        }
        let all = store.find(Collection::Users, &Query::new()).await.unwrap();
        let ns: Vec<i64> = all.iter().map(|d| d.get("n").and_then(Value::as_i64).unwrap()).collect();
        assert_eq!(ns, vec![2, 1, 0]);

        let page = store.find(Collection::Users, &Query::new().offset(1).limit(1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn guarded_update_skips_non_matching_documents() {
        let store = MemoryStore::new();
        let d = store
            .insert(Collection::Students, body(json!({ "class_ids": ["a"] })))
            .await
            .unwrap();
        let hit = store
            .update(Collection::Students, d.id, &[Condition::Exists(LEGACY_CLASS_ID)], &Update::new().unset(CLASS_IDS))
            .await
            .unwrap();
        assert!(hit.is_none());
        assert!(store.get(Collection::Students, d.id).await.unwrap().unwrap().body.contains_key(CLASS_IDS));
    }

    #[tokio::test]
    async fn increment_never_goes_negative() {
        let store = MemoryStore::new();
        let c = store
            .insert(Collection::Classes, body(json!({ "student_count": 1 })))
            .await
            .unwrap();
        store.increment(Collection::Classes, &[c.id], STUDENT_COUNT, -3).await.unwrap();
        let c = store.get(Collection::Classes, c.id).await.unwrap().unwrap();
        assert_eq!(c.get(STUDENT_COUNT), Some(&json!(0)));
    }

    #[tokio::test]
    async fn enrollment_into_a_missing_or_inactive_class_writes_nothing() {
        let store = MemoryStore::new();
        let open = store.insert(Collection::Classes, body(json!({ "student_count": 0 }))).await.unwrap();
        let closed = store
            .insert(Collection::Classes, body(json!({ "student_count": 0, "active": false })))
            .await
            .unwrap();
        let gone = Uuid::new_v4();

        let err = store
            .create_enrollment(body(json!({ "nis": "10001" })), &[open.id, gone])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidReference { ref ids, .. } if *ids == vec![gone.to_string()]));
        assert_eq!(store.count(Collection::Students, &[]).await.unwrap(), 0);
        let open_doc = store.get(Collection::Classes, open.id).await.unwrap().unwrap();
        assert_eq!(open_doc.get(STUDENT_COUNT), Some(&json!(0)));

        let s = store
            .create_enrollment(body(json!({ "nis": "10001" })), &[open.id])
            .await
            .unwrap();
        let err = store.add_memberships(s.id, &[closed.id]).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidReference { .. }));
        let s = store.get(Collection::Students, s.id).await.unwrap().unwrap();
        assert_eq!(membership_set(&s.body), vec![open.id]);
        let closed_doc = store.get(Collection::Classes, closed.id).await.unwrap().unwrap();
        assert_eq!(closed_doc.get(STUDENT_COUNT), Some(&json!(0)));
    }

    #[tokio::test]
    async fn delete_student_releases_every_class() {
        let store = MemoryStore::new();
        let a = store.insert(Collection::Classes, body(json!({ "student_count": 0 }))).await.unwrap();
        let b = store.insert(Collection::Classes, body(json!({ "student_count": 0 }))).await.unwrap();
        let s = store
            .create_enrollment(body(json!({ "nis": "10001" })), &[a.id, b.id])
            .await
            .unwrap();
        assert!(s.get(LEGACY_CLASS_ID).is_none());

        store.delete_student(s.id).await.unwrap().unwrap();
        for id in [a.id, b.id] {
            let c = store.get(Collection::Classes, id).await.unwrap().unwrap();
            assert_eq!(c.get(STUDENT_COUNT), Some(&json!(0)));
        }
    }
}

//! Student membership format migration: legacy single `class_id` to the `class_ids` set and
//! back, plus a recount of every class's `student_count`.
//!
//! Records are processed one at a time. Each rewrite is a single update guarded by the
//! selection predicate, so a record edited concurrently fails and is counted instead of
//! being overwritten. Per-record failures are logged and reported; they never abort the run.

use crate::error::AppError;
use crate::store::{
    membership_set, Collection, Condition, Document, Query, Store, Update, CLASS_IDS, LEGACY_CLASS_ID, STUDENT_COUNT,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub struct MembershipMigration;

/// One record the migration could not rewrite.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordFailure {
    pub id: Uuid,
    pub nis: Option<String>,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ForwardReport {
    pub candidates: usize,
    pub migrated: usize,
    pub failed: Vec<RecordFailure>,
    /// Students still carrying `class_id` after the pass.
    pub remaining_legacy: u64,
    /// Students carrying `class_ids` after the pass.
    pub multi_class: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReverseReport {
    pub candidates: usize,
    pub reverted: usize,
    /// Students holding more than one class; left untouched.
    pub skipped: usize,
    pub failed: Vec<RecordFailure>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountDrift {
    pub class_id: Uuid,
    pub stored: u64,
    pub actual: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RecountReport {
    pub classes: usize,
    pub corrected: Vec<CountDrift>,
    pub failed: Vec<RecordFailure>,
}

impl MembershipMigration {
    /// Rewrite every student with `class_id` and no `class_ids` into `class_ids = [class_id]`.
    /// Running it again selects nothing.
    pub async fn forward(store: &dyn Store) -> Result<ForwardReport, AppError> {
        let selection = vec![Condition::Exists(LEGACY_CLASS_ID), Condition::Missing(CLASS_IDS)];
        let candidates = select(store, &selection).await?;
        tracing::info!(candidates = candidates.len(), "forward: legacy students selected");

        let mut report = ForwardReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        for doc in &candidates {
            match forward_one(store, doc, &selection).await {
                Ok(()) => report.migrated += 1,
                Err(reason) => report.failed.push(failure(doc, reason)),
            }
        }

        report.remaining_legacy = store
            .count(Collection::Students, &[Condition::Exists(LEGACY_CLASS_ID)])
            .await?;
        report.multi_class = store
            .count(Collection::Students, &[Condition::Exists(CLASS_IDS)])
            .await?;
        tracing::info!(
            migrated = report.migrated,
            failed = report.failed.len(),
            remaining_legacy = report.remaining_legacy,
            multi_class = report.multi_class,
            "forward: done"
        );
        Ok(report)
    }

    /// Rewrite single-class students back to `class_id`. Students holding several classes
    /// are skipped with a warning and never modified.
    pub async fn reverse(store: &dyn Store) -> Result<ReverseReport, AppError> {
        let selection = vec![Condition::Exists(CLASS_IDS), Condition::Missing(LEGACY_CLASS_ID)];
        let candidates = select(store, &selection).await?;
        tracing::info!(candidates = candidates.len(), "reverse: multi-class students selected");

        let mut report = ReverseReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        for doc in &candidates {
            let held = match doc.get(CLASS_IDS) {
                Some(Value::Array(items)) => items.len(),
                _ => {
                    report.failed.push(failure(doc, "class_ids is not an array".into()));
                    continue;
                }
            };
            if held > 1 {
                tracing::warn!(
                    student_id = %doc.id,
                    nis = %nis(doc).unwrap_or_default(),
                    classes = held,
                    "reverse: student holds several classes; skipped"
                );
                report.skipped += 1;
                continue;
            }
            match reverse_one(store, doc, &selection).await {
                Ok(()) => report.reverted += 1,
                Err(reason) => report.failed.push(failure(doc, reason)),
            }
        }
        tracing::info!(
            reverted = report.reverted,
            skipped = report.skipped,
            failed = report.failed.len(),
            "reverse: done"
        );
        Ok(report)
    }

    /// Recompute every class's `student_count` from the student collection and correct drift.
    pub async fn recount(store: &dyn Store) -> Result<RecountReport, AppError> {
        let mut actual: HashMap<Uuid, u64> = HashMap::new();
        for student in store.find(Collection::Students, &Query::new()).await? {
            for class_id in membership_set(&student.body) {
                *actual.entry(class_id).or_default() += 1;
            }
        }

        let classes = store.find(Collection::Classes, &Query::new()).await?;
        let mut report = RecountReport {
            classes: classes.len(),
            ..Default::default()
        };
        for class in &classes {
            let current = class.get(STUDENT_COUNT).cloned();
            let stored = current.as_ref().and_then(Value::as_u64).unwrap_or(0);
            let expected = actual.get(&class.id).copied().unwrap_or(0);
            if current.is_some() && stored == expected {
                continue;
            }
            let guard = match current {
                Some(value) => Condition::Eq(STUDENT_COUNT, value),
                None => Condition::Missing(STUDENT_COUNT),
            };
            let update = Update::new().set(STUDENT_COUNT, expected);
            match store.update(Collection::Classes, class.id, &[guard], &update).await {
                Ok(Some(_)) => {
                    tracing::info!(class_id = %class.id, stored, actual = expected, "recount: corrected");
                    report.corrected.push(CountDrift {
                        class_id: class.id,
                        stored,
                        actual: expected,
                    });
                }
                Ok(None) => report.failed.push(class_failure(class.id, "class changed since it was read")),
                Err(e) => report.failed.push(class_failure(class.id, &e.to_string())),
            }
        }
        tracing::info!(
            classes = report.classes,
            corrected = report.corrected.len(),
            failed = report.failed.len(),
            "recount: done"
        );
        Ok(report)
    }
}

async fn select(store: &dyn Store, selection: &[Condition]) -> Result<Vec<Document>, AppError> {
    let query = Query {
        conditions: selection.to_vec(),
        ..Default::default()
    };
    store.find(Collection::Students, &query).await
}

async fn forward_one(store: &dyn Store, doc: &Document, selection: &[Condition]) -> Result<(), String> {
    let legacy = match doc.get(LEGACY_CLASS_ID) {
        Some(Value::String(id)) if Uuid::parse_str(id).is_ok() => id.clone(),
        other => return Err(format!("class_id is not a class reference: {}", other.unwrap_or(&Value::Null))),
    };
    let update = Update::new()
        .set(CLASS_IDS, Value::Array(vec![Value::String(legacy)]))
        .unset(LEGACY_CLASS_ID);
    guarded(store, doc.id, selection, &update).await
}

async fn reverse_one(store: &dyn Store, doc: &Document, selection: &[Condition]) -> Result<(), String> {
    let only = match doc.get(CLASS_IDS) {
        Some(Value::Array(items)) => match items.as_slice() {
            [Value::String(id)] => id.clone(),
            [other] => return Err(format!("class_ids holds a non-reference: {}", other)),
            _ => return Err("class_ids is empty".into()),
        },
        _ => return Err("class_ids is not an array".into()),
    };
    let mut guard = selection.to_vec();
    guard.push(Condition::Len(CLASS_IDS, 1));
    let update = Update::new()
        .set(LEGACY_CLASS_ID, Value::String(only))
        .unset(CLASS_IDS);
    guarded(store, doc.id, &guard, &update).await
}

async fn guarded(store: &dyn Store, id: Uuid, guard: &[Condition], update: &Update) -> Result<(), String> {
    match store.update(Collection::Students, id, guard, update).await {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("record changed since it was selected".into()),
        Err(e) => Err(e.to_string()),
    }
}

fn nis(doc: &Document) -> Option<String> {
    doc.get("nis").and_then(Value::as_str).map(str::to_string)
}

fn failure(doc: &Document, reason: String) -> RecordFailure {
    let failure = RecordFailure {
        id: doc.id,
        nis: nis(doc),
        reason,
    };
    tracing::error!(
        student_id = %failure.id,
        nis = failure.nis.as_deref().unwrap_or_default(),
        reason = %failure.reason,
        "migration: record failed"
    );
    failure
}

fn class_failure(id: Uuid, reason: &str) -> RecordFailure {
    tracing::error!(class_id = %id, reason, "recount: class failed");
    RecordFailure {
        id,
        nis: None,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, MemoryStore};
    use serde_json::{json, Map};

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    async fn legacy(store: &MemoryStore, nis: &str, class_id: Uuid) -> Document {
        store
            .insert(
                Collection::Students,
                body(json!({ "nis": nis, "user_id": Uuid::new_v4(), "class_id": class_id.to_string(), "active": true })),
            )
            .await
            .unwrap()
    }

    async fn reload(store: &MemoryStore, id: Uuid) -> Document {
        store.get(Collection::Students, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn forward_is_idempotent() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let s1 = legacy(&store, "10001", a).await;
        let s2 = legacy(&store, "10002", Uuid::new_v4()).await;

        let first = MembershipMigration::forward(&store).await.unwrap();
        assert_eq!(first.candidates, 2);
        assert_eq!(first.migrated, 2);
        assert!(first.failed.is_empty());
        assert_eq!((first.remaining_legacy, first.multi_class), (0, 2));

        let after_first = (reload(&store, s1.id).await.body, reload(&store, s2.id).await.body);
        assert_eq!(after_first.0.get(CLASS_IDS), Some(&json!([a.to_string()])));
        assert!(after_first.0.get(LEGACY_CLASS_ID).is_none());

        let second = MembershipMigration::forward(&store).await.unwrap();
        assert_eq!(second.candidates, 0);
        assert_eq!(second.migrated, 0);
        assert_eq!((second.remaining_legacy, second.multi_class), (0, 2));
        let after_second = (reload(&store, s1.id).await.body, reload(&store, s2.id).await.body);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn forward_then_reverse_restores_the_legacy_form() {
        let store = MemoryStore::new();
        let original = legacy(&store, "10001", Uuid::new_v4()).await;

        MembershipMigration::forward(&store).await.unwrap();
        let report = MembershipMigration::reverse(&store).await.unwrap();
        assert_eq!((report.candidates, report.reverted, report.skipped), (1, 1, 0));
        assert_eq!(reload(&store, original.id).await.body, original.body);
    }

    #[tokio::test]
    async fn reverse_skips_multi_class_students_untouched() {
        let store = MemoryStore::new();
        let multi = store
            .insert(
                Collection::Students,
                body(json!({ "nis": "10001", "class_ids": [Uuid::new_v4().to_string(), Uuid::new_v4().to_string()] })),
            )
            .await
            .unwrap();

        let report = MembershipMigration::reverse(&store).await.unwrap();
        assert_eq!((report.candidates, report.reverted, report.skipped), (1, 0, 1));
        assert!(report.failed.is_empty());
        assert_eq!(reload(&store, multi.id).await, multi);
    }

    #[tokio::test]
    async fn bad_records_fail_without_stopping_the_run() {
        let store = MemoryStore::new();
        let broken = store
            .insert(Collection::Students, body(json!({ "nis": "10009", "class_id": 42 })))
            .await
            .unwrap();
        let fine = legacy(&store, "10001", Uuid::new_v4()).await;

        let report = MembershipMigration::forward(&store).await.unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, broken.id);
        assert_eq!(report.failed[0].nis.as_deref(), Some("10009"));
        assert_eq!(report.remaining_legacy, 1);
        assert!(reload(&store, fine.id).await.get(CLASS_IDS).is_some());
    }

    #[tokio::test]
    async fn recount_corrects_drifted_counters() {
        let store = MemoryStore::new();
        let a = store
            .insert(Collection::Classes, body(json!({ "name": "A", "student_count": 7 })))
            .await
            .unwrap();
        let b = store
            .insert(Collection::Classes, body(json!({ "name": "B", "student_count": 1 })))
            .await
            .unwrap();
        legacy(&store, "10001", a.id).await;
        store
            .insert(
                Collection::Students,
                body(json!({ "nis": "10002", "class_ids": [a.id.to_string(), b.id.to_string()] })),
            )
            .await
            .unwrap();

        let report = MembershipMigration::recount(&store).await.unwrap();
        assert_eq!(report.classes, 2);
        assert_eq!(
            report.corrected,
            vec![CountDrift {
                class_id: a.id,
                stored: 7,
                actual: 2
            }]
        );
        let a = store.get(Collection::Classes, a.id).await.unwrap().unwrap();
        assert_eq!(a.get(STUDENT_COUNT), Some(&json!(2)));
    }
}

//! Student enrollment: membership set on the student, `student_count` on each class.
//!
//! Preconditions (class and user references, uniqueness) are checked here before any write.
//! The write itself goes through [`MembershipStore`](crate::store::MembershipStore), which
//! re-applies the set difference atomically and reports what actually changed.

use super::resolve;
use super::Page;
use crate::error::AppError;
use crate::model::{to_body, Class, EnrollStudent, Gender, Role, Student, StudentDetail, StudentPatch, User};
use crate::store::{membership_set, Collection, Condition, Document, Query, Store, Update, CLASS_IDS, LEGACY_CLASS_ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct EnrollmentService;

/// Result of adding a student to classes.
#[derive(Debug, Serialize)]
pub struct AddedClasses {
    pub student: StudentDetail,
    /// Number of memberships actually created.
    pub added: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StudentFilter {
    pub class_id: Option<Uuid>,
    pub gender: Option<Gender>,
    pub active: Option<bool>,
}

impl EnrollmentService {
    /// Create a student holding every requested class. All classes must exist and be
    /// active; nothing is written otherwise.
    pub async fn enroll(store: &dyn Store, input: EnrollStudent) -> Result<StudentDetail, AppError> {
        let class_ids = input.requested_classes();
        if class_ids.is_empty() {
            return Err(AppError::Validation("class_id or class_ids is required".into()));
        }
        require_active_classes(store, &class_ids).await?;

        let user: User = store
            .get(Collection::Users, input.user_id)
            .await?
            .ok_or_else(|| AppError::invalid_user(input.user_id))?
            .decode()?;
        if user.role != Role::Student {
            return Err(AppError::invalid_user(user.id));
        }
        if store.count(Collection::Students, &[Condition::eq_id("user_id", user.id)]).await? > 0 {
            return Err(AppError::Conflict(format!("user {} is already linked to a student", user.id)));
        }
        let nis = input.nis.trim().to_string();
        if store.count(Collection::Students, &[Condition::eq("nis", nis.as_str())]).await? > 0 {
            return Err(AppError::Conflict(format!("nis {} already in use", nis)));
        }

        let mut body = to_body(&json!({
            "user_id": user.id,
            "nis": nis,
            "gender": input.gender,
            "birth_date": input.birth_date,
            "address": input.address,
            "phone": input.phone,
            "guardian_name": input.guardian_name,
            "active": input.active,
        }))?;
        body.retain(|_, v| !v.is_null());

        let doc = store.create_enrollment(body, &class_ids).await?;
        tracing::info!(student_id = %doc.id, nis = %nis, classes = class_ids.len(), "student enrolled");
        resolve::student_detail(store, Student::from_document(&doc)?, false).await
    }

    /// Add the classes the student does not hold yet. Already-held classes are ignored;
    /// `Conflict` when nothing is left to add.
    pub async fn add_to_classes(store: &dyn Store, student_id: Uuid, class_ids: &[Uuid]) -> Result<AddedClasses, AppError> {
        let mut requested: Vec<Uuid> = Vec::with_capacity(class_ids.len());
        for id in class_ids {
            if !requested.contains(id) {
                requested.push(*id);
            }
        }
        if requested.is_empty() {
            return Err(AppError::Validation("class_ids must contain at least one class".into()));
        }

        let current = store
            .get(Collection::Students, student_id)
            .await?
            .ok_or_else(|| student_not_found(student_id))?;
        require_active_classes(store, &requested).await?;

        let held = membership_set(&current.body);
        let new: Vec<Uuid> = requested.into_iter().filter(|id| !held.contains(id)).collect();
        if new.is_empty() {
            return Err(already_enrolled());
        }

        let change = store
            .add_memberships(student_id, &new)
            .await?
            .ok_or_else(|| student_not_found(student_id))?;
        if change.changed.is_empty() {
            return Err(already_enrolled());
        }
        tracing::info!(student_id = %student_id, added = change.changed.len(), "student added to classes");

        let student = resolve::student_detail(store, Student::from_document(&change.student)?, false).await?;
        Ok(AddedClasses {
            student,
            added: change.changed.len(),
        })
    }

    /// Drop one membership. The last membership cannot be removed.
    pub async fn remove_from_class(store: &dyn Store, student_id: Uuid, class_id: Uuid) -> Result<StudentDetail, AppError> {
        let change = store
            .remove_membership(student_id, class_id)
            .await?
            .ok_or_else(|| student_not_found(student_id))?;
        if change.changed.is_empty() {
            return Err(AppError::NotFound(format!(
                "student {} is not enrolled in class {}",
                student_id, class_id
            )));
        }
        tracing::info!(student_id = %student_id, class_id = %class_id, "student removed from class");
        resolve::student_detail(store, Student::from_document(&change.student)?, false).await
    }

    /// Active students holding the class, with classes resolved down to their teachers.
    pub async fn find_by_class(store: &dyn Store, class_id: Uuid) -> Result<Vec<StudentDetail>, AppError> {
        if store.get(Collection::Classes, class_id).await?.is_none() {
            return Err(AppError::NotFound(format!("class {}", class_id)));
        }
        let students = decode_students(&members_of(store, class_id).await?)?
            .into_iter()
            .filter(|s| s.active)
            .collect();
        resolve::student_details(store, students, true).await
    }

    /// The active student linked to a user.
    pub async fn find_by_user(store: &dyn Store, user_id: Uuid) -> Result<StudentDetail, AppError> {
        let docs = store
            .find(Collection::Students, &Query::new().filter(Condition::eq_id("user_id", user_id)))
            .await?;
        let student = decode_students(&docs)?
            .into_iter()
            .find(|s| s.active)
            .ok_or_else(|| AppError::NotFound(format!("no active student for user {}", user_id)))?;
        resolve::student_detail(store, student, true).await
    }

    pub async fn list(store: &dyn Store, filter: &StudentFilter, page: Page) -> Result<Vec<StudentDetail>, AppError> {
        let students = match filter.class_id {
            Some(class_id) => {
                let matching: Vec<Student> = decode_students(&members_of(store, class_id).await?)?
                    .into_iter()
                    .filter(|s| filter.gender.map_or(true, |g| s.gender == Some(g)))
                    .filter(|s| filter.active.map_or(true, |a| s.active == a))
                    .collect();
                page.slice(matching)
            }
            None => {
                let mut query = Query::new();
                if let Some(gender) = filter.gender {
                    query = query.filter(Condition::eq("gender", json!(gender)));
                }
                if let Some(active) = filter.active {
                    query = query.filter(Condition::eq("active", active));
                }
                decode_students(&store.find(Collection::Students, &page.apply(query)).await?)?
            }
        };
        resolve::student_details(store, students, false).await
    }

    pub async fn get(store: &dyn Store, id: Uuid) -> Result<StudentDetail, AppError> {
        let doc = store
            .get(Collection::Students, id)
            .await?
            .ok_or_else(|| student_not_found(id))?;
        resolve::student_detail(store, Student::from_document(&doc)?, true).await
    }

    /// Profile update; `nis` stays unique.
    pub async fn update(store: &dyn Store, id: Uuid, mut patch: StudentPatch) -> Result<StudentDetail, AppError> {
        if let Some(nis) = patch.nis.as_mut() {
            *nis = nis.trim().to_string();
            let holders = store
                .find(Collection::Students, &Query::new().filter(Condition::eq("nis", nis.as_str())))
                .await?;
            if holders.iter().any(|d| d.id != id) {
                return Err(AppError::Conflict(format!("nis {} already in use", nis)));
            }
        }
        let update = Update::new().merge(to_body(&patch)?);
        let doc = store
            .update(Collection::Students, id, &[], &update)
            .await?
            .ok_or_else(|| student_not_found(id))?;
        resolve::student_detail(store, Student::from_document(&doc)?, false).await
    }

    /// Delete the student and release its memberships.
    pub async fn delete(store: &dyn Store, id: Uuid) -> Result<Student, AppError> {
        let doc = store.delete_student(id).await?.ok_or_else(|| student_not_found(id))?;
        tracing::info!(student_id = %id, "student deleted");
        Student::from_document(&doc)
    }
}

/// Every referenced class must exist and be active.
async fn require_active_classes(store: &dyn Store, ids: &[Uuid]) -> Result<(), AppError> {
    let docs = store
        .find(Collection::Classes, &Query::new().filter(Condition::IdIn(ids.to_vec())))
        .await?;
    let mut active: Vec<Uuid> = Vec::with_capacity(docs.len());
    for doc in &docs {
        let class: Class = doc.decode()?;
        if class.active {
            active.push(class.id);
        }
    }
    let invalid: Vec<Uuid> = ids.iter().filter(|id| !active.contains(id)).copied().collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(AppError::invalid_classes(invalid))
    }
}

/// Students holding the class in either representation, newest first.
async fn members_of(store: &dyn Store, class_id: Uuid) -> Result<Vec<Document>, AppError> {
    let id = Value::String(class_id.to_string());
    let mut docs = store
        .find(Collection::Students, &Query::new().filter(Condition::Contains(CLASS_IDS, id.clone())))
        .await?;
    let legacy = store
        .find(
            Collection::Students,
            &Query::new()
                .filter(Condition::Eq(LEGACY_CLASS_ID, id))
                .filter(Condition::Missing(CLASS_IDS)),
        )
        .await?;
    docs.extend(legacy);
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(docs)
}

/// Number of students holding the class in either representation.
pub(crate) async fn enrolled_count(store: &dyn Store, class_id: Uuid) -> Result<u64, AppError> {
    let id = Value::String(class_id.to_string());
    let multi = store
        .count(Collection::Students, &[Condition::Contains(CLASS_IDS, id.clone())])
        .await?;
    let legacy = store
        .count(
            Collection::Students,
            &[Condition::Eq(LEGACY_CLASS_ID, id), Condition::Missing(CLASS_IDS)],
        )
        .await?;
    Ok(multi + legacy)
}

fn decode_students(docs: &[Document]) -> Result<Vec<Student>, AppError> {
    docs.iter().map(Student::from_document).collect()
}

fn student_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("student {}", id))
}

fn already_enrolled() -> AppError {
    AppError::Conflict("student is already enrolled in all requested classes".into())
}

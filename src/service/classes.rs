//! Class CRUD. `student_count` is owned by the enrollment operations and never written here.

use super::enrollment::enrolled_count;
use super::{resolve, Page};
use crate::error::AppError;
use crate::model::{to_body, Class, ClassDetail, ClassPatch, NewClass, Role, User};
use crate::store::{Collection, Condition, Query, Store, Update, STUDENT_COUNT};
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub struct ClassService;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClassFilter {
    pub teacher_id: Option<Uuid>,
    pub academic_year: Option<String>,
    pub active: Option<bool>,
}

impl ClassService {
    /// The teacher must be an existing user with the teacher role.
    pub async fn create(store: &dyn Store, input: NewClass) -> Result<ClassDetail, AppError> {
        let teacher: User = store
            .get(Collection::Users, input.teacher_id)
            .await?
            .ok_or_else(|| AppError::invalid_user(input.teacher_id))?
            .decode()?;
        if teacher.role != Role::Teacher {
            return Err(AppError::invalid_user(teacher.id));
        }
        let academic_year = input
            .academic_year
            .map(|y| y.trim().to_string())
            .filter(|y| !y.is_empty())
            .unwrap_or_else(|| Utc::now().year().to_string());
        let body = to_body(&json!({
            "name": input.name.trim(),
            "teacher_id": teacher.id,
            "academic_year": academic_year,
            "active": input.active,
            "student_count": 0,
        }))?;
        let class: Class = store.insert(Collection::Classes, body).await?.decode()?;
        tracing::info!(class_id = %class.id, teacher_id = %teacher.id, "class created");
        Ok(ClassDetail {
            class,
            teacher: Some(teacher.summary()),
        })
    }

    pub async fn list(store: &dyn Store, filter: &ClassFilter, page: Page) -> Result<Vec<Class>, AppError> {
        let mut query = Query::new();
        if let Some(teacher_id) = filter.teacher_id {
            query = query.filter(Condition::eq_id("teacher_id", teacher_id));
        }
        if let Some(year) = &filter.academic_year {
            query = query.filter(Condition::eq("academic_year", year.as_str()));
        }
        if let Some(active) = filter.active {
            query = query.filter(Condition::eq("active", active));
        }
        let docs = store.find(Collection::Classes, &page.apply(query)).await?;
        docs.iter().map(|d| d.decode()).collect()
    }

    pub async fn get(store: &dyn Store, id: Uuid) -> Result<ClassDetail, AppError> {
        let class: Class = store
            .get(Collection::Classes, id)
            .await?
            .ok_or_else(|| class_not_found(id))?
            .decode()?;
        let teacher = resolve::user_summary(store, class.teacher_id).await?;
        Ok(ClassDetail { class, teacher })
    }

    pub async fn update(store: &dyn Store, id: Uuid, mut patch: ClassPatch) -> Result<Class, AppError> {
        if let Some(name) = patch.name.as_mut() {
            *name = name.trim().to_string();
        }
        let update = Update::new().merge(to_body(&patch)?);
        store
            .update(Collection::Classes, id, &[], &update)
            .await?
            .ok_or_else(|| class_not_found(id))?
            .decode()
    }

    /// Refused while any student still holds the class.
    pub async fn delete(store: &dyn Store, id: Uuid) -> Result<Class, AppError> {
        if store.get(Collection::Classes, id).await?.is_none() {
            return Err(class_not_found(id));
        }
        let enrolled = enrolled_count(store, id).await?;
        if enrolled > 0 {
            return Err(AppError::Conflict(format!(
                "class {} still has {} enrolled students",
                id, enrolled
            )));
        }
        // student_count moves in the same write as every enrollment.
        let guard = [Condition::eq(STUDENT_COUNT, 0)];
        let Some(doc) = store.delete(Collection::Classes, id, &guard).await? else {
            if store.get(Collection::Classes, id).await?.is_none() {
                return Err(class_not_found(id));
            }
            return Err(AppError::Conflict(format!(
                "class {} has a non-zero student_count; enrollments changed or the counter needs a recount",
                id
            )));
        };
        let class: Class = doc.decode()?;
        tracing::info!(class_id = %id, "class deleted");
        Ok(class)
    }
}

fn class_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("class {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollStudent, NewUser};
    use crate::service::{EnrollmentService, UserService};
    use crate::store::{DocumentStore, MemoryStore};

    async fn user(store: &MemoryStore, email: &str, role: Role) -> Uuid {
        UserService::create(
            store,
            NewUser {
                name: "Pak Andi".into(),
                email: email.into(),
                role,
                active: true,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn new_class(teacher_id: Uuid) -> NewClass {
        NewClass {
            name: "  Matematika 7A ".into(),
            teacher_id,
            academic_year: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn create_requires_a_teacher_and_defaults_the_year() {
        let store = MemoryStore::new();
        let student = user(&store, "s@school.id", Role::Student).await;
        let err = ClassService::create(&store, new_class(student)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidReference { kind: "user", .. }));

        let teacher = user(&store, "t@school.id", Role::Teacher).await;
        let detail = ClassService::create(&store, new_class(teacher)).await.unwrap();
        assert_eq!(detail.class.name, "Matematika 7A");
        assert_eq!(detail.class.academic_year, Utc::now().year().to_string());
        assert_eq!(detail.class.student_count, 0);
        assert_eq!(detail.teacher.map(|t| t.id), Some(teacher));
    }

    #[tokio::test]
    async fn delete_is_refused_while_students_are_enrolled() {
        let store = MemoryStore::new();
        let teacher = user(&store, "t@school.id", Role::Teacher).await;
        let class = ClassService::create(&store, new_class(teacher)).await.unwrap().class;
        let s = user(&store, "s@school.id", Role::Student).await;
        let mut input = EnrollStudent::new(s, "12345");
        input.class_id = Some(class.id);
        let student = EnrollmentService::enroll(&store, input).await.unwrap().student;

        let err = ClassService::delete(&store, class.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        EnrollmentService::delete(&store, student.id).await.unwrap();
        ClassService::delete(&store, class.id).await.unwrap();
        assert!(matches!(ClassService::get(&store, class.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_by_teacher_and_active() {
        let store = MemoryStore::new();
        let t1 = user(&store, "t1@school.id", Role::Teacher).await;
        let t2 = user(&store, "t2@school.id", Role::Teacher).await;
        ClassService::create(&store, new_class(t1)).await.unwrap();
        let closed = ClassService::create(&store, new_class(t2)).await.unwrap().class;
        ClassService::update(&store, closed.id, ClassPatch { active: Some(false), ..Default::default() })
            .await
            .unwrap();

        let filter = ClassFilter {
            teacher_id: Some(t1),
            ..Default::default()
        };
        assert_eq!(ClassService::list(&store, &filter, Page::default()).await.unwrap().len(), 1);
        let filter = ClassFilter {
            active: Some(false),
            ..Default::default()
        };
        let inactive = ClassService::list(&store, &filter, Page::default()).await.unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].id, closed.id);
    }

    #[tokio::test]
    async fn delete_is_refused_while_the_counter_is_not_zero() {
        let store = MemoryStore::new();
        let teacher = user(&store, "t@school.id", Role::Teacher).await;
        let class = ClassService::create(&store, new_class(teacher)).await.unwrap().class;
        store
            .increment(Collection::Classes, &[class.id], STUDENT_COUNT, 1)
            .await
            .unwrap();

        let err = ClassService::delete(&store, class.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("student_count")));
        assert!(ClassService::get(&store, class.id).await.is_ok());
        assert!(matches!(
            ClassService::delete(&store, Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }
}

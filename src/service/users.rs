//! User CRUD. Emails are stored trimmed and lowercased, unique across users.

use super::Page;
use crate::error::AppError;
use crate::model::{to_body, NewUser, Role, Student, User, UserPatch};
use crate::store::{Collection, Condition, Query, Store, Update};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

pub struct UserService;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub active: Option<bool>,
}

impl UserService {
    pub async fn create(store: &dyn Store, input: NewUser) -> Result<User, AppError> {
        let email = normalize_email(&input.email);
        ensure_email_free(store, &email, None).await?;
        let body = to_body(&json!({
            "name": input.name.trim(),
            "email": email,
            "role": input.role,
            "active": input.active,
        }))?;
        let user: User = store.insert(Collection::Users, body).await?.decode()?;
        tracing::info!(user_id = %user.id, role = user.role.as_str(), "user created");
        Ok(user)
    }

    pub async fn list(store: &dyn Store, filter: &UserFilter, page: Page) -> Result<Vec<User>, AppError> {
        let mut query = Query::new();
        if let Some(role) = filter.role {
            query = query.filter(Condition::eq("role", role.as_str()));
        }
        if let Some(active) = filter.active {
            query = query.filter(Condition::eq("active", active));
        }
        let docs = store.find(Collection::Users, &page.apply(query)).await?;
        docs.iter().map(|d| d.decode()).collect()
    }

    pub async fn get(store: &dyn Store, id: Uuid) -> Result<User, AppError> {
        store
            .get(Collection::Users, id)
            .await?
            .ok_or_else(|| user_not_found(id))?
            .decode()
    }

    pub async fn update(store: &dyn Store, id: Uuid, mut patch: UserPatch) -> Result<User, AppError> {
        if let Some(name) = patch.name.as_mut() {
            *name = name.trim().to_string();
        }
        if let Some(email) = patch.email.as_mut() {
            *email = normalize_email(email);
            ensure_email_free(store, email, Some(id)).await?;
        }
        if let Some(role) = patch.role {
            let current = Self::get(store, id).await?;
            if current.role != role {
                ensure_unreferenced(store, id, current.role).await?;
            }
        }
        let update = Update::new().merge(to_body(&patch)?);
        store
            .update(Collection::Users, id, &[], &update)
            .await?
            .ok_or_else(|| user_not_found(id))?
            .decode()
    }

    /// Refused while a student record links to the user or the user owns classes or sets.
    pub async fn delete(store: &dyn Store, id: Uuid) -> Result<User, AppError> {
        let current = Self::get(store, id).await?;
        ensure_unreferenced(store, id, current.role).await?;
        let user: User = store
            .delete(Collection::Users, id, &[])
            .await?
            .ok_or_else(|| user_not_found(id))?
            .decode()?;
        tracing::info!(user_id = %id, "user deleted");
        Ok(user)
    }

    /// Active student-role users that no student record links to yet.
    pub async fn available_students(store: &dyn Store) -> Result<Vec<User>, AppError> {
        let linked: Vec<Uuid> = store
            .find(Collection::Students, &Query::new())
            .await?
            .iter()
            .map(Student::from_document)
            .map(|s| s.map(|s| s.user_id))
            .collect::<Result<_, _>>()?;
        let query = Query::new()
            .filter(Condition::eq("role", Role::Student.as_str()))
            .filter(Condition::eq("active", true));
        let users: Vec<User> = store
            .find(Collection::Users, &query)
            .await?
            .iter()
            .map(|d| d.decode())
            .collect::<Result<_, _>>()?;
        Ok(users.into_iter().filter(|u| !linked.contains(&u.id)).collect())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn ensure_email_free(store: &dyn Store, email: &str, except: Option<Uuid>) -> Result<(), AppError> {
    let holders = store
        .find(Collection::Users, &Query::new().filter(Condition::eq("email", email)))
        .await?;
    if holders.iter().any(|d| Some(d.id) != except) {
        return Err(AppError::Conflict(format!("email {} already in use", email)));
    }
    Ok(())
}

/// `Conflict` while documents still point at the user in its `role`.
async fn ensure_unreferenced(store: &dyn Store, id: Uuid, role: Role) -> Result<(), AppError> {
    match role {
        Role::Student => {
            if store.count(Collection::Students, &[Condition::eq_id("user_id", id)]).await? > 0 {
                return Err(AppError::Conflict(format!("user {} is linked to a student", id)));
            }
        }
        Role::Teacher => {
            let classes = store.count(Collection::Classes, &[Condition::eq_id("teacher_id", id)]).await?;
            let sets = store
                .count(Collection::Flashcards, &[Condition::eq_id("teacher_id", id)])
                .await?;
            if classes + sets > 0 {
                return Err(AppError::Conflict(format!(
                    "user {} still owns {} classes and {} flashcard sets",
                    id, classes, sets
                )));
            }
        }
    }
    Ok(())
}

fn user_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("user {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnrollStudent, NewClass};
    use crate::service::{ClassService, EnrollmentService};
    use crate::store::MemoryStore;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            name: "Siti Aminah".into(),
            email: email.into(),
            role,
            active: true,
        }
    }

    #[tokio::test]
    async fn email_is_lowercased_and_unique() {
        let store = MemoryStore::new();
        let user = UserService::create(&store, new_user(" Siti@School.ID ", Role::Student)).await.unwrap();
        assert_eq!(user.email, "siti@school.id");

        let err = UserService::create(&store, new_user("SITI@school.id", Role::Teacher)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let other = UserService::create(&store, new_user("other@school.id", Role::Student)).await.unwrap();
        let patch = UserPatch {
            email: Some("siti@SCHOOL.id".into()),
            ..Default::default()
        };
        assert!(matches!(UserService::update(&store, other.id, patch).await, Err(AppError::Conflict(_))));

        let patch = UserPatch {
            email: Some("Siti@school.id".into()),
            ..Default::default()
        };
        UserService::update(&store, user.id, patch).await.unwrap();
    }

    #[tokio::test]
    async fn available_students_excludes_linked_users() {
        let store = MemoryStore::new();
        let teacher = UserService::create(&store, new_user("t@school.id", Role::Teacher)).await.unwrap();
        let linked = UserService::create(&store, new_user("a@school.id", Role::Student)).await.unwrap();
        let free = UserService::create(&store, new_user("b@school.id", Role::Student)).await.unwrap();
        let class = ClassService::create(
            &store,
            NewClass {
                name: "IPA 8B".into(),
                teacher_id: teacher.id,
                academic_year: None,
                active: true,
            },
        )
        .await
        .unwrap()
        .class;
        let mut input = EnrollStudent::new(linked.id, "12345");
        input.class_id = Some(class.id);
        EnrollmentService::enroll(&store, input).await.unwrap();

        let available = UserService::available_students(&store).await.unwrap();
        let ids: Vec<Uuid> = available.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![free.id]);
    }

    async fn class_for(store: &MemoryStore, teacher: Uuid) -> Uuid {
        ClassService::create(
            store,
            NewClass {
                name: "IPS 9C".into(),
                teacher_id: teacher,
                academic_year: None,
                active: true,
            },
        )
        .await
        .unwrap()
        .class
        .id
    }

    #[tokio::test]
    async fn delete_is_refused_while_referenced() {
        let store = MemoryStore::new();
        let teacher = UserService::create(&store, new_user("t@school.id", Role::Teacher)).await.unwrap();
        let pupil = UserService::create(&store, new_user("p@school.id", Role::Student)).await.unwrap();
        let class = class_for(&store, teacher.id).await;
        let mut input = EnrollStudent::new(pupil.id, "12345");
        input.class_id = Some(class);
        let student = EnrollmentService::enroll(&store, input).await.unwrap().student;

        let err = UserService::delete(&store, pupil.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("linked to a student")));
        let detail = EnrollmentService::get(&store, student.id).await.unwrap();
        assert_eq!(detail.user.map(|u| u.id), Some(pupil.id));

        let err = UserService::delete(&store, teacher.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("owns 1 classes")));

        EnrollmentService::delete(&store, student.id).await.unwrap();
        UserService::delete(&store, pupil.id).await.unwrap();
        ClassService::delete(&store, class).await.unwrap();
        UserService::delete(&store, teacher.id).await.unwrap();
        assert!(matches!(UserService::get(&store, teacher.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn role_change_is_refused_while_referenced() {
        let store = MemoryStore::new();
        let teacher = UserService::create(&store, new_user("t@school.id", Role::Teacher)).await.unwrap();
        let pupil = UserService::create(&store, new_user("p@school.id", Role::Student)).await.unwrap();
        let class = class_for(&store, teacher.id).await;
        let mut input = EnrollStudent::new(pupil.id, "12345");
        input.class_id = Some(class);
        EnrollmentService::enroll(&store, input).await.unwrap();

        let to_teacher = UserPatch {
            role: Some(Role::Teacher),
            ..Default::default()
        };
        let err = UserService::update(&store, pupil.id, to_teacher).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let to_student = UserPatch {
            role: Some(Role::Student),
            ..Default::default()
        };
        let err = UserService::update(&store, teacher.id, to_student).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(UserService::get(&store, teacher.id).await.unwrap().role, Role::Teacher);

        let same_role = UserPatch {
            role: Some(Role::Teacher),
            name: Some("Pak Budi".into()),
            ..Default::default()
        };
        assert_eq!(UserService::update(&store, teacher.id, same_role).await.unwrap().name, "Pak Budi");

        let free = UserService::create(&store, new_user("f@school.id", Role::Student)).await.unwrap();
        let promote = UserPatch {
            role: Some(Role::Teacher),
            ..Default::default()
        };
        assert_eq!(UserService::update(&store, free.id, promote).await.unwrap().role, Role::Teacher);
    }
}

//! Batch resolution of user and class references into display projections.

use crate::error::AppError;
use crate::model::{Class, ClassSummary, Student, StudentDetail, User, UserSummary};
use crate::store::{Collection, Condition, Query, Store};
use std::collections::HashMap;
use uuid::Uuid;

pub(crate) async fn users_by_id(store: &dyn Store, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let docs = store
        .find(Collection::Users, &Query::new().filter(Condition::IdIn(ids.to_vec())))
        .await?;
    docs.iter()
        .map(|d| d.decode::<User>().map(|u| (u.id, u.summary())))
        .collect()
}

pub(crate) async fn user_summary(store: &dyn Store, id: Uuid) -> Result<Option<UserSummary>, AppError> {
    Ok(users_by_id(store, &[id]).await?.remove(&id))
}

pub(crate) async fn classes_by_id(store: &dyn Store, ids: &[Uuid]) -> Result<HashMap<Uuid, Class>, AppError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let docs = store
        .find(Collection::Classes, &Query::new().filter(Condition::IdIn(ids.to_vec())))
        .await?;
    docs.iter()
        .map(|d| d.decode::<Class>().map(|c| (c.id, c)))
        .collect()
}

/// Resolve students with two lookups in total: classes, then users and teachers together.
/// Dangling references are dropped from `classes` and leave `user` empty.
pub(crate) async fn student_details(
    store: &dyn Store,
    students: Vec<Student>,
    with_teacher: bool,
) -> Result<Vec<StudentDetail>, AppError> {
    let mut class_ids: Vec<Uuid> = Vec::new();
    for id in students.iter().flat_map(|s| s.class_ids.iter()) {
        if !class_ids.contains(id) {
            class_ids.push(*id);
        }
    }
    let classes = classes_by_id(store, &class_ids).await?;

    let mut user_ids: Vec<Uuid> = students.iter().map(|s| s.user_id).collect();
    if with_teacher {
        user_ids.extend(classes.values().map(|c| c.teacher_id));
    }
    user_ids.sort();
    user_ids.dedup();
    let users = users_by_id(store, &user_ids).await?;

    Ok(students
        .into_iter()
        .map(|student| {
            let summaries: Vec<ClassSummary> = student
                .class_ids
                .iter()
                .filter_map(|id| classes.get(id))
                .map(|c| {
                    let teacher = if with_teacher { users.get(&c.teacher_id).cloned() } else { None };
                    c.summary(teacher)
                })
                .collect();
            StudentDetail {
                user: users.get(&student.user_id).cloned(),
                classes: summaries,
                student,
            }
        })
        .collect())
}

pub(crate) async fn student_detail(store: &dyn Store, student: Student, with_teacher: bool) -> Result<StudentDetail, AppError> {
    student_details(store, vec![student], with_teacher)
        .await?
        .pop()
        .ok_or(AppError::Db(sqlx::Error::RowNotFound))
}

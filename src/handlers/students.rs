//! Student handlers: enrollment, membership changes, lookups by class and by user.

use super::{body_to_map, parse_id};
use crate::error::AppError;
use crate::model::{from_body, student, EnrollStudent, StudentPatch};
use crate::response::{success_many, success_one, success_one_ok, success_one_with_meta};
use crate::service::{EnrollmentService, Page, RequestValidator, StudentFilter};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassIds {
    class_ids: Vec<Uuid>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<StudentFilter>,
    Query(page): Query<Page>,
) -> Result<impl IntoResponse, AppError> {
    let students = EnrollmentService::list(state.store(), &filter, page).await?;
    Ok(success_many(students))
}

pub async fn enroll(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, &student::rules())?;
    let input: EnrollStudent = from_body(body)?;
    let student = EnrollmentService::enroll(state.store(), input).await?;
    Ok(success_one(student))
}

pub async fn by_class(State(state): State<AppState>, Path(class_id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let students = EnrollmentService::find_by_class(state.store(), parse_id(&class_id)?).await?;
    Ok(success_many(students))
}

pub async fn by_user(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let student = EnrollmentService::find_by_user(state.store(), parse_id(&user_id)?).await?;
    Ok(success_one_ok(student))
}

pub async fn read(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let student = EnrollmentService::get(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(student))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let body = body_to_map(body)?;
    RequestValidator::validate_partial(&body, &student::rules())?;
    let patch: StudentPatch = from_body(body)?;
    let student = EnrollmentService::update(state.store(), id, patch).await?;
    Ok(success_one_ok(student))
}

pub async fn delete(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    EnrollmentService::delete(state.store(), parse_id(&id_str)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `meta.added` reports how many memberships were created.
pub async fn add_to_classes(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let ClassIds { class_ids } = from_body(body_to_map(body)?)?;
    let added = EnrollmentService::add_to_classes(state.store(), id, &class_ids).await?;
    Ok(success_one_with_meta(added.student, json!({ "added": added.added })))
}

pub async fn remove_from_class(
    State(state): State<AppState>,
    Path((id_str, class_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let student = EnrollmentService::remove_from_class(state.store(), parse_id(&id_str)?, parse_id(&class_id)?).await?;
    Ok(success_one_ok(student))
}

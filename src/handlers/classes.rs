//! Class handlers.

use super::{body_to_map, parse_id};
use crate::error::AppError;
use crate::model::{class, from_body, ClassPatch, NewClass};
use crate::response::{success_many, success_one, success_one_ok};
use crate::service::{ClassFilter, ClassService, Page, RequestValidator};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<ClassFilter>,
    Query(page): Query<Page>,
) -> Result<impl IntoResponse, AppError> {
    let classes = ClassService::list(state.store(), &filter, page).await?;
    Ok(success_many(classes))
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, &class::rules())?;
    let input: NewClass = from_body(body)?;
    let class = ClassService::create(state.store(), input).await?;
    Ok(success_one(class))
}

pub async fn read(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let class = ClassService::get(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(class))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let body = body_to_map(body)?;
    RequestValidator::validate_partial(&body, &class::rules())?;
    let patch: ClassPatch = from_body(body)?;
    let class = ClassService::update(state.store(), id, patch).await?;
    Ok(success_one_ok(class))
}

pub async fn delete(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    ClassService::delete(state.store(), parse_id(&id_str)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

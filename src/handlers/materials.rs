//! Material handlers. Writes carry the acting teacher's id; the service checks ownership.

use super::{body_to_map, parse_id};
use crate::error::AppError;
use crate::model::{from_body, material, MaterialPatch, NewMaterial, Reorder};
use crate::response::{success_many, success_one, success_one_ok};
use crate::service::{MaterialFilter, MaterialService, RequestValidator};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct Caller {
    pub teacher_id: Uuid,
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, &material::rules())?;
    let input: NewMaterial = from_body(body)?;
    let material = MaterialService::create(state.store(), input).await?;
    Ok(success_one(material))
}

pub async fn by_class(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
    Query(filter): Query<MaterialFilter>,
) -> Result<impl IntoResponse, AppError> {
    let materials = MaterialService::list_by_class(state.store(), parse_id(&class_id)?, &filter).await?;
    Ok(success_many(materials))
}

pub async fn read(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let material = MaterialService::get(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(material))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let body = body_to_map(body)?;
    RequestValidator::validate_partial(&body, &material::rules())?;
    let patch: MaterialPatch = from_body(body)?;
    let material = MaterialService::update(state.store(), id, patch).await?;
    Ok(success_one_ok(material))
}

/// Soft delete; `?teacher_id=` names the caller.
pub async fn delete(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Query(caller): Query<Caller>,
) -> Result<impl IntoResponse, AppError> {
    MaterialService::delete(state.store(), parse_id(&id_str)?, caller.teacher_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reorder(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let input: Reorder = from_body(body_to_map(body)?)?;
    let materials = MaterialService::reorder(state.store(), input).await?;
    Ok(success_many(materials))
}

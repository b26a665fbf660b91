//! User handlers.

use super::{body_to_map, parse_id};
use crate::error::AppError;
use crate::model::{from_body, user, NewUser, UserPatch};
use crate::response::{success_many, success_one, success_one_ok};
use crate::service::{Page, RequestValidator, UserFilter, UserService};
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
    Query(filter): Query<UserFilter>,
    Query(page): Query<Page>,
) -> Result<impl IntoResponse, AppError> {
    let users = UserService::list(state.store(), &filter, page).await?;
    Ok(success_many(users))
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, &user::rules())?;
    let input: NewUser = from_body(body)?;
    let user = UserService::create(state.store(), input).await?;
    Ok(success_one(user))
}

pub async fn available_students(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let users = UserService::available_students(state.store()).await?;
    Ok(success_many(users))
}

pub async fn read(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let user = UserService::get(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(user))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let body = body_to_map(body)?;
    RequestValidator::validate_partial(&body, &user::rules())?;
    let patch: UserPatch = from_body(body)?;
    let user = UserService::update(state.store(), id, patch).await?;
    Ok(success_one_ok(user))
}

pub async fn delete(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    UserService::delete(state.store(), parse_id(&id_str)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

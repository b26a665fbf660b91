//! Flashcard set handlers.

use super::{body_to_map, parse_id};
use crate::error::AppError;
use crate::model::{flashcard, from_body, FlashcardPatch, NewFlashcardSet};
use crate::response::{success_many, success_one, success_one_ok};
use crate::service::{FlashcardFilter, FlashcardService, Page, RequestValidator};
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
    Query(filter): Query<FlashcardFilter>,
    Query(page): Query<Page>,
) -> Result<impl IntoResponse, AppError> {
    let sets = FlashcardService::list(state.store(), &filter, page).await?;
    Ok(success_many(sets))
}

pub async fn create(State(state): State<AppState>, Json(body): Json<Value>) -> Result<impl IntoResponse, AppError> {
    let body = body_to_map(body)?;
    RequestValidator::validate(&body, &flashcard::rules())?;
    flashcard::validate_cards(body.get("cards"), false)?;
    let input: NewFlashcardSet = from_body(body)?;
    let set = FlashcardService::create(state.store(), input).await?;
    Ok(success_one(set))
}

pub async fn by_class(State(state): State<AppState>, Path(class_id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let sets = FlashcardService::list_by_class(state.store(), parse_id(&class_id)?).await?;
    Ok(success_many(sets))
}

pub async fn read(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let set = FlashcardService::get(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(set))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id_str): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id_str)?;
    let body = body_to_map(body)?;
    RequestValidator::validate_partial(&body, &flashcard::rules())?;
    flashcard::validate_cards(body.get("cards"), true)?;
    let patch: FlashcardPatch = from_body(body)?;
    let set = FlashcardService::update(state.store(), id, patch).await?;
    Ok(success_one_ok(set))
}

pub async fn delete(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    FlashcardService::delete(state.store(), parse_id(&id_str)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_active(State(state): State<AppState>, Path(id_str): Path<String>) -> Result<impl IntoResponse, AppError> {
    let set = FlashcardService::toggle_active(state.store(), parse_id(&id_str)?).await?;
    Ok(success_one_ok(set))
}

//! HTTP handlers, one per operation. Bodies are validated against the entity's rule table,
//! then deserialized into the typed input the service takes.

pub mod classes;
pub mod flashcards;
pub mod materials;
pub mod students;
pub mod users;

use crate::error::AppError;
use serde_json::{Map, Value};
use uuid::Uuid;

fn parse_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest(format!("invalid uuid: {}", id_str)))
}

fn body_to_map(value: Value) -> Result<Map<String, Value>, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

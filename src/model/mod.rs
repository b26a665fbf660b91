//! Typed views of the stored documents, request inputs, and their rule tables.

pub mod class;
pub mod flashcard;
pub mod material;
pub mod student;
pub mod user;

pub use class::{Class, ClassDetail, ClassSummary, ClassPatch, NewClass};
pub use flashcard::{Card, FlashcardPatch, FlashcardSet, NewCard, NewFlashcardSet};
pub use material::{Material, MaterialKind, MaterialPatch, NewMaterial, Reorder};
pub use student::{EnrollStudent, Gender, Student, StudentDetail, StudentPatch};
pub use user::{NewUser, Role, User, UserPatch, UserSummary};

use crate::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Deserialize a validated request body into its typed input.
pub fn from_body<T: DeserializeOwned>(body: Map<String, Value>) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(body)).map_err(|e| AppError::Validation(e.to_string()))
}

/// Serialize a typed value into a document body.
pub(crate) fn to_body<T: Serialize>(value: &T) -> Result<Map<String, Value>, AppError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AppError::Decode(format!("expected an object, got {}", other))),
        Err(e) => Err(AppError::Decode(e.to_string())),
    }
}

pub(crate) fn default_true() -> bool {
    true
}

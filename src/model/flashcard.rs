//! Flashcard sets attached to a class.

use super::default_true;
use crate::error::AppError;
use crate::service::validation::{RequestValidator, Rules, ValidationRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub question: String,
    pub answer: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub id: Uuid,
    pub title: String,
    pub topic: String,
    pub description: String,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub card_count: u64,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub total_views: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewCard {
    pub question: String,
    pub answer: String,
}

impl NewCard {
    pub fn into_card(self) -> Card {
        Card {
            id: Uuid::new_v4(),
            question: self.question.trim().to_string(),
            answer: self.answer.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewFlashcardSet {
    pub title: String,
    pub topic: String,
    pub description: String,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub cards: Vec<NewCard>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlashcardPatch {
    pub title: Option<String>,
    pub topic: Option<String>,
    pub description: Option<String>,
    pub class_id: Option<Uuid>,
    pub cards: Option<Vec<NewCard>>,
    pub active: Option<bool>,
}

pub fn rules() -> Rules {
    vec![
        ("title", ValidationRule::new().required().length(3, 200)),
        ("topic", ValidationRule::new().required().length(3, 200)),
        ("description", ValidationRule::new().required().length(10, 1000)),
        ("class_id", ValidationRule::new().required().format("uuid")),
        ("teacher_id", ValidationRule::new().required().format("uuid")),
    ]
}

fn card_rules() -> Rules {
    vec![
        ("question", ValidationRule::new().required().length(3, 1000)),
        ("answer", ValidationRule::new().required().length(1, 1000)),
    ]
}

/// `cards` must be a non-empty array of valid cards. Absent is fine when `partial`.
pub fn validate_cards(cards: Option<&Value>, partial: bool) -> Result<(), AppError> {
    let items = match cards {
        None if partial => return Ok(()),
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(AppError::Validation("cards must contain at least one card".into())),
    };
    let rules = card_rules();
    for (i, item) in items.iter().enumerate() {
        let Some(card) = item.as_object() else {
            return Err(AppError::Validation(format!("cards[{}] must be an object", i)));
        };
        RequestValidator::validate(card, &rules).map_err(|e| match e {
            AppError::Validation(msg) => AppError::Validation(format!("cards[{}].{}", i, msg)),
            other => other,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cards_must_be_present_and_valid() {
        assert!(validate_cards(None, false).is_err());
        validate_cards(None, true).unwrap();
        assert!(validate_cards(Some(&json!([])), true).is_err());

        let err = validate_cards(Some(&json!([{ "question": "What is 2+2?", "answer": "4" }, { "question": "?", "answer": "x" }])), false)
            .unwrap_err();
        assert!(err.to_string().contains("cards[1]"));
    }
}

//! Learning materials published by a teacher into one of their classes.

use super::default_true;
use crate::service::validation::{Rules, ValidationRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialKind {
    #[default]
    Text,
    Video,
    Document,
    Link,
    Image,
}

impl MaterialKind {
    pub const NAMES: &'static [&'static str] = &["text", "video", "document", "link", "image"];
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Material {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    #[serde(default)]
    pub kind: MaterialKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub views: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMaterial {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub content: String,
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    #[serde(default)]
    pub kind: MaterialKind,
    #[serde(default)]
    pub file_url: Option<String>,
    /// 0 or absent places the material after the last one in the class.
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Update by the owning teacher; `teacher_id` identifies the caller and is not written.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MaterialPatch {
    #[serde(skip_serializing)]
    pub teacher_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MaterialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// New order for the listed materials of one class: position `i` gets order `i + 1`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reorder {
    pub class_id: Uuid,
    pub teacher_id: Uuid,
    pub material_ids: Vec<Uuid>,
}

pub fn rules() -> Rules {
    vec![
        ("title", ValidationRule::new().required().length(3, 200)),
        ("description", ValidationRule::new().max_length(1000)),
        ("content", ValidationRule::new().required()),
        ("class_id", ValidationRule::new().required().format("uuid")),
        ("teacher_id", ValidationRule::new().required().format("uuid")),
        ("kind", ValidationRule::new().allowed(MaterialKind::NAMES)),
        ("order", ValidationRule::new().minimum(0.0)),
    ]
}

/// Tags trimmed, lowercased, blanks and repeats dropped.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_normalized() {
        let tags = vec![" Algebra ".to_string(), "algebra".into(), "".into(), "Week 1".into()];
        assert_eq!(normalize_tags(&tags), vec!["algebra", "week 1"]);
    }
}

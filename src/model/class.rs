//! Classes and their projections.

use super::{default_true, UserSummary};
use crate::service::validation::{Rules, ValidationRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Class {
    pub id: Uuid,
    pub name: String,
    pub teacher_id: Uuid,
    pub academic_year: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Number of students holding this class.
    #[serde(default)]
    pub student_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Class {
    pub fn summary(&self, teacher: Option<UserSummary>) -> ClassSummary {
        ClassSummary {
            id: self.id,
            name: self.name.clone(),
            academic_year: self.academic_year.clone(),
            teacher,
        }
    }
}

/// Display projection of a class, optionally with its owning teacher.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassSummary {
    pub id: Uuid,
    pub name: String,
    pub academic_year: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher: Option<UserSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub teacher: Option<UserSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewClass {
    pub name: String,
    pub teacher_id: Uuid,
    /// Defaults to the current year.
    pub academic_year: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClassPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

pub fn rules() -> Rules {
    vec![
        ("name", ValidationRule::new().required().length(3, 100)),
        ("teacher_id", ValidationRule::new().required().format("uuid")),
        ("academic_year", ValidationRule::new().length(4, 20)),
    ]
}

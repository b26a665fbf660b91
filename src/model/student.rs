//! Student records. Membership is read through [`membership_set`] so documents still
//! carrying the single `class_id` field decode the same as migrated ones.

use super::{default_true, ClassSummary, UserSummary};
use crate::error::AppError;
use crate::service::validation::{Rules, ValidationRule};
use crate::store::{membership_set, Document};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub user_id: Uuid,
    pub nis: String,
    #[serde(default)]
    pub class_ids: Vec<Uuid>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn from_document(doc: &Document) -> Result<Self, AppError> {
        let mut student: Student = doc.decode()?;
        student.class_ids = membership_set(&doc.body);
        Ok(student)
    }
}

/// A student with its user and classes resolved for display.
#[derive(Clone, Debug, Serialize)]
pub struct StudentDetail {
    #[serde(flatten)]
    pub student: Student,
    pub user: Option<UserSummary>,
    pub classes: Vec<ClassSummary>,
}

/// Enrollment input. `class_ids` wins when non-empty; otherwise `class_id` is used.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrollStudent {
    pub user_id: Uuid,
    pub nis: String,
    #[serde(default)]
    pub class_id: Option<Uuid>,
    #[serde(default)]
    pub class_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub guardian_name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl EnrollStudent {
    pub fn new(user_id: Uuid, nis: impl Into<String>) -> Self {
        EnrollStudent {
            user_id,
            nis: nis.into(),
            class_id: None,
            class_ids: None,
            gender: None,
            birth_date: None,
            address: None,
            phone: None,
            guardian_name: None,
            active: true,
        }
    }

    /// Requested classes with duplicates collapsed, first occurrence kept.
    pub fn requested_classes(&self) -> Vec<Uuid> {
        let requested = match &self.class_ids {
            Some(ids) if !ids.is_empty() => ids.clone(),
            _ => self.class_id.into_iter().collect(),
        };
        let mut out = Vec::with_capacity(requested.len());
        for id in requested {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }
}

/// Profile update. Membership changes go through the enrollment operations.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StudentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

pub fn rules() -> Rules {
    vec![
        ("user_id", ValidationRule::new().required().format("uuid")),
        ("nis", ValidationRule::new().required().length(5, 20)),
        ("gender", ValidationRule::new().required().allowed(&["male", "female"])),
        ("birth_date", ValidationRule::new().required().format("date")),
        ("address", ValidationRule::new().max_length(200)),
        ("phone", ValidationRule::new().pattern(r"^[0-9+\-\s()]+$")),
        ("guardian_name", ValidationRule::new().max_length(100)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn class_ids_win_over_legacy_class_id() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut input = EnrollStudent::new(Uuid::new_v4(), "12345");
        input.class_id = Some(a);
        assert_eq!(input.requested_classes(), vec![a]);

        input.class_ids = Some(vec![b, b]);
        assert_eq!(input.requested_classes(), vec![b]);

        input.class_ids = Some(vec![]);
        assert_eq!(input.requested_classes(), vec![a]);
    }

    #[test]
    fn enrollment_requires_gender_and_birth_date() {
        use crate::service::RequestValidator;

        let mut body = json!({ "user_id": Uuid::new_v4(), "nis": "12345", "gender": "female" })
            .as_object()
            .cloned()
            .unwrap();
        let err = RequestValidator::validate(&body, &rules()).unwrap_err();
        assert_eq!(err.to_string(), "validation: birth_date is required");

        body.insert("birth_date".into(), json!("2011-02-14"));
        RequestValidator::validate(&body, &rules()).unwrap();
        body.remove("gender");
        assert!(RequestValidator::validate(&body, &rules()).is_err());

        let patch = json!({ "address": "Jl. Merdeka 1" }).as_object().cloned().unwrap();
        RequestValidator::validate_partial(&patch, &rules()).unwrap();
    }

    #[test]
    fn legacy_document_decodes_to_one_membership() {
        let a = Uuid::new_v4();
        let now = Utc::now();
        let doc = Document {
            id: Uuid::new_v4(),
            body: json!({ "user_id": Uuid::new_v4(), "nis": "12345", "class_id": a })
                .as_object()
                .cloned()
                .unwrap(),
            created_at: now,
            updated_at: now,
        };
        let student = Student::from_document(&doc).unwrap();
        assert_eq!(student.class_ids, vec![a]);
        assert!(student.active);
    }
}

//! Request validation from per-field rule tables, checked on the raw JSON body
//! before typed deserialization.

use crate::error::AppError;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::{Map, Value};

/// Constraints on one top-level body field. Unset constraints are not checked.
#[derive(Clone, Debug, Default)]
pub struct ValidationRule {
    pub required: bool,
    /// `email`, `uuid` or `date`.
    pub format: Option<&'static str>,
    pub max_length: Option<usize>,
    pub min_length: Option<usize>,
    pub pattern: Option<&'static str>,
    pub allowed: Option<&'static [&'static str]>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn new() -> Self {
        ValidationRule::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn format(mut self, format: &'static str) -> Self {
        self.format = Some(format);
        self
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn minimum(mut self, min: f64) -> Self {
        self.minimum = Some(min);
        self
    }
}

/// Field name to rule, checked in order.
pub type Rules = Vec<(&'static str, ValidationRule)>;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-field rules. All required fields must be present.
    pub fn validate(body: &Map<String, Value>, rules: &[(&'static str, ValidationRule)]) -> Result<(), AppError> {
        for (field, rule) in rules {
            let val = body.get(*field);
            if rule.required && val.map_or(true, is_blank) {
                return Err(AppError::Validation(format!("{} is required", field)));
            }
            if let Some(v) = val {
                validate_field(field, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required fields may be
    /// omitted but not cleared.
    pub fn validate_partial(body: &Map<String, Value>, rules: &[(&'static str, ValidationRule)]) -> Result<(), AppError> {
        for (field, rule) in rules {
            let Some(v) = body.get(*field) else {
                continue;
            };
            if rule.required && is_blank(v) {
                return Err(AppError::Validation(format!("{} cannot be empty", field)));
            }
            validate_field(field, v, rule)?;
        }
        Ok(())
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn validate_field(field: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = rule.format {
        validate_format(field, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let len = s.trim().chars().count();
        if let Some(max) = rule.max_length {
            if len > max {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    field, max
                )));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    field, min
                )));
            }
        }
        if let Some(pattern) = rule.pattern {
            let re = Regex::new(pattern).map_err(|_| AppError::Validation(format!("invalid pattern for {}", field)))?;
            if !re.is_match(s) {
                return Err(AppError::Validation(format!("{} does not match required pattern", field)));
            }
        }
    }
    if let Some(allowed) = rule.allowed {
        if !v.as_str().is_some_and(|s| allowed.contains(&s)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {}",
                field,
                allowed.join(", ")
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", field, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", field, max)));
            }
        }
    }
    Ok(())
}

fn validate_format(field: &str, v: &Value, format: &str) -> Result<(), AppError> {
    let Some(s) = v.as_str() else {
        return Err(AppError::Validation(format!("{} must be a string", field)));
    };
    let ok = match format {
        "email" => {
            let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
                .map_err(|_| AppError::Validation(format!("invalid pattern for {}", field)))?;
            re.is_match(s.trim())
        }
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{} must be a valid {}", field, format)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> Rules {
        vec![
            ("name", ValidationRule::new().required().length(3, 10)),
            ("email", ValidationRule::new().format("email")),
            ("kind", ValidationRule::new().allowed(&["text", "video"])),
            ("order", ValidationRule::new().minimum(0.0)),
        ]
    }

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn required_fields_must_be_present_and_non_blank() {
        let err = RequestValidator::validate(&body(json!({ "name": "  " })), &rules()).unwrap_err();
        assert_eq!(err.to_string(), "validation: name is required");
        RequestValidator::validate(&body(json!({ "name": "Algebra" })), &rules()).unwrap();
    }

    #[test]
    fn partial_skips_missing_but_checks_present_fields() {
        RequestValidator::validate_partial(&body(json!({ "kind": "video" })), &rules()).unwrap();
        assert!(RequestValidator::validate_partial(&body(json!({ "kind": "audio" })), &rules()).is_err());
        assert!(RequestValidator::validate_partial(&body(json!({ "name": null })), &rules()).is_err());
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        RequestValidator::validate(&body(json!({ "name": "ÄÖÜäöüß" })), &rules()).unwrap();
        assert!(RequestValidator::validate(&body(json!({ "name": "Geography 101" })), &rules()).is_err());
    }

    #[test]
    fn formats_and_bounds() {
        assert!(RequestValidator::validate(&body(json!({ "name": "abc", "email": "nope" })), &rules()).is_err());
        RequestValidator::validate(&body(json!({ "name": "abc", "email": "a@b.id" })), &rules()).unwrap();
        assert!(RequestValidator::validate(&body(json!({ "name": "abc", "order": -1 })), &rules()).is_err());

        let date = vec![("birth_date", ValidationRule::new().format("date"))];
        RequestValidator::validate(&body(json!({ "birth_date": "2010-04-01" })), &date).unwrap();
        assert!(RequestValidator::validate(&body(json!({ "birth_date": "01/04/2010" })), &date).is_err());
    }
}

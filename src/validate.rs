use chrono::{DateTime, NaiveDate};
use serde_json::{json, Value};

use crate::error::ValidationError;
use crate::models::{ProfessorDraft, ProfessorInput};

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_start_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|at| at.date_naive()))
        .map_err(|_| ValidationError::InvalidStartDate)
}

fn object_or_empty(value: Option<Value>) -> Value {
    match value {
        Some(Value::Null) | None => json!({}),
        Some(value) => value,
    }
}

impl ProfessorInput {
    /// Checks the required fields and fills the JSON column defaults.
    pub fn into_draft(self) -> Result<ProfessorDraft, ValidationError> {
        let (Some(name), Some(nuptk), Some(position), Some(start_date)) = (
            non_blank(self.name),
            non_blank(self.nuptk),
            non_blank(self.position),
            non_blank(self.start_date),
        ) else {
            return Err(ValidationError::MissingFields);
        };

        Ok(ProfessorDraft {
            name,
            photo_url: non_blank(self.photo_url),
            nuptk,
            position,
            start_date: parse_start_date(&start_date)?,
            verified: self.verified.unwrap_or(false),
            faculty: non_blank(self.faculty),
            homebase: non_blank(self.homebase),
            academic_profile: object_or_empty(self.academic_profile),
            rank: object_or_empty(self.rank),
            certification: object_or_empty(self.certification),
            sinta_profile: self.sinta_profile.filter(|value| !value.is_null()),
        })
    }
}

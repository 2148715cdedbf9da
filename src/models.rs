use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shape::StatBuckets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearCount {
    pub year: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawStatRow {
    pub category: String,
    pub metric: String,
    pub value: Option<String>,
}

/// A JSON-bearing column exactly as the driver handed it over.
#[derive(Debug, Clone, PartialEq)]
pub enum RawJson {
    Null,
    Structured(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfessorRow {
    pub id: i64,
    pub name: String,
    pub photo_url: Option<String>,
    pub nuptk: String,
    pub position: String,
    pub start_date: Option<NaiveDate>,
    pub verified: bool,
    pub faculty: Option<String>,
    pub homebase: Option<String>,
    pub academic_profile: RawJson,
    pub rank: RawJson,
    pub certification: RawJson,
    pub sinta_profile: RawJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Professor {
    pub id: i64,
    pub name: String,
    pub photo_url: Option<String>,
    pub nuptk: String,
    pub position: String,
    pub start_date: Option<NaiveDate>,
    pub verified: bool,
    pub faculty: Option<String>,
    pub homebase: Option<String>,
    pub academic_profile: Option<Value>,
    pub rank: Option<Value>,
    pub certification: Option<Value>,
    pub sinta_profile: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeWarning {
    pub professor_id: i64,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentsSection {
    pub by_year: Vec<YearCount>,
    pub by_prodi: Vec<NamedCount>,
    pub by_level: Vec<NamedCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessorsSection {
    pub by_education: Vec<NamedCount>,
    pub by_position: Vec<NamedCount>,
    pub by_status: Vec<NamedCount>,
    pub profiles: Vec<Professor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    pub students: StudentsSection,
    pub professors: ProfessorsSection,
    pub stats: StatBuckets,
    pub last_updated: String,
    /// The stored metadata value, `None` when the store has never recorded one.
    pub last_updated_recorded: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ShapeWarning>,
}

/// `{success, data | error | message}` wrapper used by the professor routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ShapeWarning>,
}

impl<T> ApiEnvelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            warnings: Vec::new(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
            warnings: Vec::new(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<ShapeWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Professor create/update body as sent by the admin panel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfessorInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(alias = "photoUrl", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nuptk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(alias = "startDate", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homebase: Option<String>,
    #[serde(alias = "academicProfile", skip_serializing_if = "Option::is_none")]
    pub academic_profile: Option<Value>,
    #[serde(alias = "rank_info", skip_serializing_if = "Option::is_none")]
    pub rank: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certification: Option<Value>,
    #[serde(alias = "sintaProfile", skip_serializing_if = "Option::is_none")]
    pub sinta_profile: Option<Value>,
}

/// A validated professor ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfessorDraft {
    pub name: String,
    pub photo_url: Option<String>,
    pub nuptk: String,
    pub position: String,
    pub start_date: NaiveDate,
    pub verified: bool,
    pub faculty: Option<String>,
    pub homebase: Option<String>,
    pub academic_profile: Value,
    pub rank: Value,
    pub certification: Value,
    pub sinta_profile: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedPhoto {
    pub filename: String,
    pub url: String,
    pub size: usize,
    pub mimetype: String,
}

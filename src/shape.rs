//! Turns raw store result sets into the `/api/all-data` payload.
//!
//! Everything here is a pure single-pass transform; the fan-out in `db`
//! guarantees all inputs are present before shaping starts.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::models::{
    AggregateResponse, Professor, ProfessorRow, ProfessorsSection, RawJson, RawStatRow,
    ShapeWarning, StudentsSection,
};
use crate::store::Snapshot;

/// Categories that are always present in `stats`, even with no rows.
pub const KNOWN_CATEGORIES: [&str; 4] = ["professors", "students", "graduation", "applicants"];

/// `stats[category][metric] = value`, kept in first-encounter order
/// (`serde_json` is built with `preserve_order`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatBuckets(Map<String, Value>);

impl StatBuckets {
    pub fn with_known_categories() -> Self {
        let mut buckets = Self::default();
        for category in KNOWN_CATEGORIES {
            buckets.0.insert(category.to_string(), Value::Object(Map::new()));
        }
        buckets
    }

    /// Sets a metric; an existing metric keeps its position.
    pub fn insert(&mut self, category: &str, metric: &str, value: Option<f64>) {
        let slot = self
            .0
            .entry(category)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metrics) = slot {
            metrics.insert(metric.to_string(), stat_value(value));
        }
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn category(&self, category: &str) -> Option<&Map<String, Value>> {
        self.0.get(category)?.as_object()
    }

    pub fn get(&self, category: &str, metric: &str) -> Option<f64> {
        self.category(category)?.get(metric)?.as_f64()
    }
}

/// Whole numbers are written without a fraction, `NaN`-like values as `null`.
fn stat_value(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => Value::from(v as i64),
        Some(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        None => Value::Null,
    }
}

/// Groups flat `(category, metric, value)` rows into nested buckets.
pub fn bucket_stats(rows: &[RawStatRow]) -> StatBuckets {
    let mut buckets = StatBuckets::with_known_categories();
    for row in rows {
        let value = row.value.as_deref().and_then(parse_float);
        buckets.insert(&row.category, &row.metric, value);
    }
    buckets
}

/// Parses the longest numeric prefix of `input`, the way `parseFloat` does.
///
/// Returns `None` when nothing numeric leads the string or the result is not
/// finite.
pub fn parse_float(input: &str) -> Option<f64> {
    let trimmed = input.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    if trimmed[end..].starts_with("Infinity") {
        return None;
    }

    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let fraction_start = end + 1;
        let mut cursor = fraction_start;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        mantissa_digits += cursor - fraction_start;
        if mantissa_digits > 0 {
            end = cursor;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut cursor = end + 1;
        if cursor < bytes.len() && matches!(bytes[cursor], b'+' | b'-') {
            cursor += 1;
        }
        let exponent_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_digit() {
            cursor += 1;
        }
        if cursor > exponent_start {
            end = cursor;
        }
    }

    trimmed[..end]
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Outcome of decoding one JSON-bearing professor column.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonField {
    Absent,
    Value(Value),
    Malformed(String),
}

pub fn decode_json_field(raw: &RawJson) -> JsonField {
    let value = match raw {
        RawJson::Null => return JsonField::Absent,
        RawJson::Structured(Value::String(text)) | RawJson::Text(text) => {
            match serde_json::from_str::<Value>(text) {
                Ok(value) => value,
                Err(err) => return JsonField::Malformed(err.to_string()),
            }
        }
        RawJson::Structured(value) => value.clone(),
    };

    if value.is_null() {
        JsonField::Absent
    } else {
        JsonField::Value(value)
    }
}

/// Renames and decodes one professor row.
///
/// A malformed column becomes `null` in the output and produces a warning;
/// the rest of the record is still returned.
pub fn shape_professor(row: ProfessorRow) -> (Professor, Vec<ShapeWarning>) {
    let mut warnings = Vec::new();
    let id = row.id;
    let mut decode = |field: &str, raw: &RawJson| match decode_json_field(raw) {
        JsonField::Absent => None,
        JsonField::Value(value) => Some(value),
        JsonField::Malformed(message) => {
            tracing::warn!(professor_id = id, field, error = %message, "malformed JSON column");
            warnings.push(ShapeWarning {
                professor_id: id,
                field: field.to_string(),
                message,
            });
            None
        }
    };

    let academic_profile = decode("academicProfile", &row.academic_profile);
    let rank = decode("rank", &row.rank);
    let certification = decode("certification", &row.certification);
    let sinta_profile = decode("sintaProfile", &row.sinta_profile);

    let professor = Professor {
        id,
        name: row.name,
        photo_url: row.photo_url,
        nuptk: row.nuptk,
        position: row.position,
        start_date: row.start_date,
        verified: row.verified,
        faculty: row.faculty,
        homebase: row.homebase,
        academic_profile,
        rank,
        certification,
        sinta_profile,
    };
    (professor, warnings)
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Assembles the aggregate payload. Series keep the order the store returned.
pub fn shape_aggregate(snapshot: Snapshot, now: DateTime<Utc>) -> AggregateResponse {
    let mut warnings = Vec::new();
    let mut profiles = Vec::with_capacity(snapshot.professors.len());
    for row in snapshot.professors {
        let (professor, mut row_warnings) = shape_professor(row);
        profiles.push(professor);
        warnings.append(&mut row_warnings);
    }

    let recorded = snapshot.last_updated.filter(|value| !value.is_empty());
    let last_updated = recorded
        .clone()
        .unwrap_or_else(|| format_timestamp(now));

    AggregateResponse {
        students: StudentsSection {
            by_year: snapshot.students_by_year,
            by_prodi: snapshot.students_by_prodi,
            by_level: snapshot.students_by_level,
        },
        professors: ProfessorsSection {
            by_education: snapshot.professors_by_education,
            by_position: snapshot.professors_by_position,
            by_status: snapshot.professors_by_status,
            profiles,
        },
        stats: bucket_stats(&snapshot.general_stats),
        last_updated,
        last_updated_recorded: recorded,
        warnings,
    }
}

use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Column, PgPool, Row, TypeInfo};

use crate::models::{NamedCount, ProfessorDraft, ProfessorRow, RawJson, RawStatRow, YearCount};
use crate::shape::format_timestamp;
use crate::store::{PortalStore, Snapshot, StoreError};

const PROFESSOR_COLUMNS: &str = "id, name, photo_url, nuptk, position, start_date, verified, \
     faculty, homebase, academic_profile, rank_info AS rank, certification, sinta_profile";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Name of the UNIQUE constraint on `professors.nuptk`.
const NUPTK_CONSTRAINT: &str = "professors_nuptk_key";

fn is_nuptk_conflict(constraint: Option<&str>) -> bool {
    constraint == Some(NUPTK_CONSTRAINT)
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && is_nuptk_conflict(db_err.constraint()) {
            return StoreError::DuplicateNuptk;
        }
    }
    StoreError::Database(err)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonColumnKind {
    Structured,
    Text,
}

fn json_column_kind(type_name: &str) -> JsonColumnKind {
    if type_name.eq_ignore_ascii_case("JSON") || type_name.eq_ignore_ascii_case("JSONB") {
        JsonColumnKind::Structured
    } else {
        JsonColumnKind::Text
    }
}

/// Reads a JSON-bearing column according to its declared type.
fn raw_json(row: &PgRow, column: &str) -> Result<RawJson, sqlx::Error> {
    let raw = match json_column_kind(row.try_column(column)?.type_info().name()) {
        JsonColumnKind::Structured => row
            .try_get::<Option<Value>, _>(column)?
            .map_or(RawJson::Null, RawJson::Structured),
        JsonColumnKind::Text => row
            .try_get::<Option<String>, _>(column)?
            .map_or(RawJson::Null, RawJson::Text),
    };
    Ok(raw)
}

fn professor_from_row(row: &PgRow) -> Result<ProfessorRow, sqlx::Error> {
    Ok(ProfessorRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        photo_url: row.try_get("photo_url")?,
        nuptk: row.try_get("nuptk")?,
        position: row.try_get("position")?,
        start_date: row.try_get::<Option<NaiveDate>, _>("start_date")?,
        verified: row.try_get::<Option<bool>, _>("verified")?.unwrap_or(false),
        faculty: row.try_get("faculty")?,
        homebase: row.try_get("homebase")?,
        academic_profile: raw_json(row, "academic_profile")?,
        rank: raw_json(row, "rank")?,
        certification: raw_json(row, "certification")?,
        sinta_profile: raw_json(row, "sinta_profile")?,
    })
}

async fn fetch_year_counts(pool: &PgPool) -> Result<Vec<YearCount>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "year"::TEXT AS "year", "count"::BIGINT AS "count"
           FROM students_by_year ORDER BY "year" DESC"#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(YearCount {
                year: row.try_get("year")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

async fn fetch_named_counts(
    pool: &PgPool,
    table: &'static str,
) -> Result<Vec<NamedCount>, sqlx::Error> {
    let query = format!(r#"SELECT "name", "value"::BIGINT AS "value" FROM {table}"#);
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            Ok(NamedCount {
                name: row.try_get("name")?,
                value: row.try_get("value")?,
            })
        })
        .collect()
}

async fn fetch_professors(pool: &PgPool) -> Result<Vec<ProfessorRow>, sqlx::Error> {
    let query = format!("SELECT {PROFESSOR_COLUMNS} FROM professors ORDER BY id");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(professor_from_row).collect()
}

async fn fetch_general_stats(pool: &PgPool) -> Result<Vec<RawStatRow>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT "category", "metric", "value" FROM general_stats"#)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(RawStatRow {
                category: row.try_get("category")?,
                metric: row.try_get("metric")?,
                value: row.try_get("value")?,
            })
        })
        .collect()
}

async fn fetch_last_updated(pool: &PgPool) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT "value" FROM metadata WHERE "key" = 'lastUpdated'"#)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => row.try_get("value"),
        None => Ok(None),
    }
}

#[async_trait]
impl PortalStore for PgStore {
    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let pool = &self.pool;
        let started = Instant::now();

        let (
            students_by_year,
            students_by_prodi,
            students_by_level,
            professors_by_education,
            professors_by_position,
            professors_by_status,
            professors,
            general_stats,
            last_updated,
        ) = tokio::try_join!(
            fetch_year_counts(pool),
            fetch_named_counts(pool, "students_by_prodi"),
            fetch_named_counts(pool, "students_by_level"),
            fetch_named_counts(pool, "professors_by_education"),
            fetch_named_counts(pool, "professors_by_position"),
            fetch_named_counts(pool, "professors_by_status"),
            fetch_professors(pool),
            fetch_general_stats(pool),
            fetch_last_updated(pool),
        )?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            professors = professors.len(),
            stats = general_stats.len(),
            "aggregate snapshot fetched"
        );

        Ok(Snapshot {
            students_by_year,
            students_by_prodi,
            students_by_level,
            professors_by_education,
            professors_by_position,
            professors_by_status,
            professors,
            general_stats,
            last_updated,
        })
    }

    async fn professor(&self, id: i64) -> Result<Option<ProfessorRow>, StoreError> {
        let query = format!("SELECT {PROFESSOR_COLUMNS} FROM professors WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(professor_from_row).transpose()?)
    }

    async fn insert_professor(&self, draft: &ProfessorDraft) -> Result<ProfessorRow, StoreError> {
        let query = format!(
            r#"
            INSERT INTO professors
            (name, photo_url, nuptk, position, start_date, verified, faculty, homebase,
             academic_profile, rank_info, certification, sinta_profile)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {PROFESSOR_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(&draft.name)
            .bind(&draft.photo_url)
            .bind(&draft.nuptk)
            .bind(&draft.position)
            .bind(draft.start_date)
            .bind(draft.verified)
            .bind(&draft.faculty)
            .bind(&draft.homebase)
            .bind(Json(&draft.academic_profile))
            .bind(Json(&draft.rank))
            .bind(Json(&draft.certification))
            .bind(draft.sinta_profile.as_ref().map(Json))
            .fetch_one(&self.pool)
            .await
            .map_err(map_write_error)?;

        let professor = professor_from_row(&row)?;
        tracing::info!(id = professor.id, nuptk = %professor.nuptk, "professor created");
        Ok(professor)
    }

    async fn update_professor(
        &self,
        id: i64,
        draft: &ProfessorDraft,
    ) -> Result<Option<ProfessorRow>, StoreError> {
        let query = format!(
            r#"
            UPDATE professors
            SET name = $2, photo_url = $3, nuptk = $4, position = $5, start_date = $6,
                verified = $7, faculty = $8, homebase = $9
            WHERE id = $1
            RETURNING {PROFESSOR_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&draft.name)
            .bind(&draft.photo_url)
            .bind(&draft.nuptk)
            .bind(&draft.position)
            .bind(draft.start_date)
            .bind(draft.verified)
            .bind(&draft.faculty)
            .bind(&draft.homebase)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_write_error)?;

        match row {
            Some(row) => {
                tracing::info!(id, "professor updated");
                Ok(Some(professor_from_row(&row)?))
            }
            None => Ok(None),
        }
    }

    async fn delete_professor(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM professors WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(id, "professor deleted");
        }
        Ok(deleted)
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let years = [("2024", 412), ("2023", 388), ("2022", 365), ("2021", 341)];
    for (year, count) in years {
        sqlx::query(
            r#"
            INSERT INTO students_by_year ("year", "count") VALUES ($1, $2)
            ON CONFLICT ("year") DO UPDATE SET "count" = EXCLUDED."count"
            "#,
        )
        .bind(year)
        .bind(count as i64)
        .execute(pool)
        .await?;
    }

    let named: [(&str, &[(&str, i64)]); 5] = [
        (
            "students_by_prodi",
            &[("Informatika", 820), ("Sistem Informasi", 540), ("Teknik Komputer", 146)],
        ),
        ("students_by_level", &[("S1", 1340), ("S2", 166)]),
        ("professors_by_education", &[("S2", 31), ("S3", 12)]),
        (
            "professors_by_position",
            &[("Asisten Ahli", 14), ("Lektor", 19), ("Lektor Kepala", 8), ("Guru Besar", 2)],
        ),
        ("professors_by_status", &[("Tetap", 38), ("Kontrak", 5)]),
    ];
    for (table, rows) in named {
        let query = format!(
            r#"INSERT INTO {table} ("name", "value") VALUES ($1, $2)
               ON CONFLICT ("name") DO UPDATE SET "value" = EXCLUDED."value""#
        );
        for (name, value) in rows {
            sqlx::query(&query)
                .bind(*name)
                .bind(*value)
                .execute(pool)
                .await?;
        }
    }

    let stats = [
        ("professors", "total", "43"),
        ("professors", "s3Percentage", "27.9"),
        ("students", "total", "1506"),
        ("students", "yearlyIncreasePercentage", "6.2"),
        ("graduation", "total", "298"),
        ("graduation", "yearlyDecreasePercentage", "1.4"),
        ("applicants", "total", "2210"),
        ("applicants", "yearlyDecreasePercentage", "3.1"),
    ];
    for (category, metric, value) in stats {
        upsert_stat(pool, category, metric, value).await?;
    }

    let professors = [
        (
            "Dr. Sari Wulandari, M.Kom.",
            "3341765666230123",
            "Lektor Kepala",
            NaiveDate::from_ymd_opt(2009, 3, 1).context("invalid date")?,
            json!({"fieldOfScience": "Ilmu Komputer", "knowledgeTree": "Teknik", "branch": "Informatika"}),
            json!({"title": "Lektor Kepala", "startDate": "2019-04-01"}),
            Some(json!({"id": "6001234", "url": "https://sinta.kemdikbud.go.id/authors/profile/6001234"})),
        ),
        (
            "Budi Santoso, M.T.",
            "4455667788990011",
            "Lektor",
            NaiveDate::from_ymd_opt(2014, 9, 1).context("invalid date")?,
            json!({"fieldOfScience": "Teknik Elektro", "knowledgeTree": "Teknik", "branch": "Teknik Komputer"}),
            json!({"title": "Lektor", "startDate": "2018-10-01"}),
            None,
        ),
    ];
    for (name, nuptk, position, start_date, academic_profile, rank, sinta_profile) in professors {
        sqlx::query(
            r#"
            INSERT INTO professors
            (name, nuptk, position, start_date, verified, faculty, homebase,
             academic_profile, rank_info, certification, sinta_profile)
            VALUES ($1, $2, $3, $4, TRUE, 'Fakultas Teknologi Informasi', 'Informatika',
                    $5, $6, '{}'::JSONB, $7)
            ON CONFLICT (nuptk) DO UPDATE
            SET name = EXCLUDED.name, position = EXCLUDED.position
            "#,
        )
        .bind(name)
        .bind(nuptk)
        .bind(position)
        .bind(start_date)
        .bind(Json(academic_profile))
        .bind(Json(rank))
        .bind(sinta_profile.map(Json))
        .execute(pool)
        .await?;
    }

    touch_last_updated(pool).await?;
    Ok(())
}

async fn upsert_stat<'e, E>(executor: E, category: &str, metric: &str, value: &str) -> anyhow::Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO general_stats ("category", "metric", "value") VALUES ($1, $2, $3)
        ON CONFLICT ("category", "metric") DO UPDATE SET "value" = EXCLUDED."value"
        "#,
    )
    .bind(category)
    .bind(metric)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

async fn touch_last_updated<'e, E>(executor: E) -> anyhow::Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO metadata ("key", "value") VALUES ('lastUpdated', $1)
        ON CONFLICT ("key") DO UPDATE SET "value" = EXCLUDED."value"
        "#,
    )
    .bind(format_timestamp(Utc::now()))
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct StatCsvRow {
    category: String,
    metric: String,
    value: String,
}

/// Upserts `category,metric,value` rows and stamps `lastUpdated`, atomically.
pub async fn import_stats_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;
    let mut imported = 0usize;

    for (index, result) in reader.deserialize::<StatCsvRow>().enumerate() {
        let row = result?;
        let (category, metric) = (row.category.trim(), row.metric.trim());
        if category.is_empty() || metric.is_empty() {
            tracing::warn!(line = index + 2, "skipping stat row without category or metric");
            continue;
        }
        upsert_stat(&mut *tx, category, metric, row.value.trim()).await?;
        imported += 1;
    }

    touch_last_updated(&mut *tx).await?;
    tx.commit().await?;
    Ok(imported)
}

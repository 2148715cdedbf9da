use async_trait::async_trait;

use crate::models::{NamedCount, ProfessorDraft, ProfessorRow, RawStatRow, YearCount};

/// Every result set the aggregate endpoint needs, fetched together.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub students_by_year: Vec<YearCount>,
    pub students_by_prodi: Vec<NamedCount>,
    pub students_by_level: Vec<NamedCount>,
    pub professors_by_education: Vec<NamedCount>,
    pub professors_by_position: Vec<NamedCount>,
    pub professors_by_status: Vec<NamedCount>,
    pub professors: Vec<ProfessorRow>,
    pub general_stats: Vec<RawStatRow>,
    pub last_updated: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("NUPTK already exists")]
    DuplicateNuptk,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PortalStore: Send + Sync {
    /// Runs all aggregate reads; any single failure fails the whole call.
    async fn snapshot(&self) -> Result<Snapshot, StoreError>;

    async fn professor(&self, id: i64) -> Result<Option<ProfessorRow>, StoreError>;

    async fn insert_professor(&self, draft: &ProfessorDraft) -> Result<ProfessorRow, StoreError>;

    /// Replaces the scalar columns. `None` when no row has this id.
    async fn update_professor(
        &self,
        id: i64,
        draft: &ProfessorDraft,
    ) -> Result<Option<ProfessorRow>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_professor(&self, id: i64) -> Result<bool, StoreError>;
}

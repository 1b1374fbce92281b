//! Import repository: CRUD operations for the `import_jobs` table.

use std::path::PathBuf;

use rusqlite::{params, Row};

use super::{decode_optional_timestamp, decode_timestamp, encode_timestamp, Database, DatabaseError};
use crate::model::{FileFormat, ImportCounts, ImportJob, ImportMetadata, ImportStatus};

/// Raw `import_jobs` row before domain decoding.
struct ImportRow {
    id: String,
    original_filename: String,
    stored_filename: String,
    file_path: String,
    file_type: String,
    status: String,
    total_records: i64,
    processed_records: i64,
    successful_records: i64,
    failed_records: i64,
    error_message: Option<String>,
    metadata: String,
    user_id: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl ImportRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            original_filename: row.get("original_filename")?,
            stored_filename: row.get("stored_filename")?,
            file_path: row.get("file_path")?,
            file_type: row.get("file_type")?,
            status: row.get("status")?,
            total_records: row.get("total_records")?,
            processed_records: row.get("processed_records")?,
            successful_records: row.get("successful_records")?,
            failed_records: row.get("failed_records")?,
            error_message: row.get("error_message")?,
            metadata: row.get("metadata")?,
            user_id: row.get("user_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<ImportJob, DatabaseError> {
        let format = FileFormat::parse(&self.file_type).ok_or(DatabaseError::InvalidData {
            column: "file_type",
            value: self.file_type.clone(),
        })?;
        let status = ImportStatus::parse(&self.status).ok_or(DatabaseError::InvalidData {
            column: "status",
            value: self.status.clone(),
        })?;
        let metadata: ImportMetadata = serde_json::from_str(&self.metadata)?;

        Ok(ImportJob {
            id: self.id,
            original_filename: self.original_filename,
            stored_filename: self.stored_filename,
            file_path: PathBuf::from(self.file_path),
            format,
            status,
            counts: ImportCounts {
                total: self.total_records.max(0) as u64,
                processed: self.processed_records.max(0) as u64,
                successful: self.successful_records.max(0) as u64,
                failed: self.failed_records.max(0) as u64,
            },
            error_message: self.error_message,
            metadata,
            user_id: self.user_id,
            created_at: decode_timestamp("created_at", &self.created_at)?,
            updated_at: decode_timestamp("updated_at", &self.updated_at)?,
            started_at: decode_optional_timestamp("started_at", self.started_at)?,
            completed_at: decode_optional_timestamp("completed_at", self.completed_at)?,
        })
    }
}

/// Query filter parameters for import listing.
#[derive(Debug, Default, Clone)]
pub struct ImportFilter {
    pub status: Option<ImportStatus>,
    pub format: Option<FileFormat>,
    pub user_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new import job.
pub fn insert(db: &Database, job: &ImportJob) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&job.metadata)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO import_jobs (id, original_filename, stored_filename, file_path, file_type,
             status, total_records, processed_records, successful_records, failed_records,
             error_message, metadata, user_id, created_at, updated_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                job.id,
                job.original_filename,
                job.stored_filename,
                job.file_path.to_string_lossy(),
                job.format.as_str(),
                job.status.as_str(),
                job.counts.total as i64,
                job.counts.processed as i64,
                job.counts.successful as i64,
                job.counts.failed as i64,
                job.error_message,
                metadata,
                job.user_id,
                encode_timestamp(&job.created_at),
                encode_timestamp(&job.updated_at),
                job.started_at.as_ref().map(encode_timestamp),
                job.completed_at.as_ref().map(encode_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Persists status, counters, error and timestamps. Identity columns are left untouched.
pub fn update(db: &Database, job: &ImportJob) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&job.metadata)?;
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE import_jobs SET status=?2, total_records=?3, processed_records=?4,
             successful_records=?5, failed_records=?6, error_message=?7, metadata=?8,
             updated_at=?9, started_at=?10, completed_at=?11
             WHERE id=?1",
            params![
                job.id,
                job.status.as_str(),
                job.counts.total as i64,
                job.counts.processed as i64,
                job.counts.successful as i64,
                job.counts.failed as i64,
                job.error_message,
                metadata,
                encode_timestamp(&job.updated_at),
                job.started_at.as_ref().map(encode_timestamp),
                job.completed_at.as_ref().map(encode_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds an import by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ImportJob>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM import_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ImportRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(ImportRow::into_job).transpose()
}

/// Queries imports with filters, newest first, returning (jobs, total_count).
pub fn query(
    db: &Database,
    filter: &ImportFilter,
) -> Result<(Vec<ImportJob>, u64), DatabaseError> {
    let (rows, total) = db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(format) = filter.format {
            conditions.push(format!("file_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(format.as_str()));
        }
        if let Some(ref user_id) = filter.user_id {
            conditions.push(format!("user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(user_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM import_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = i64::try_from(filter.limit.unwrap_or(15)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM import_jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ImportRow> = stmt
            .query_map(params_ref.as_slice(), ImportRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })?;

    let jobs = rows
        .into_iter()
        .map(ImportRow::into_job)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((jobs, total))
}

/// Counts imports with the given status.
pub fn count_by_status(db: &Database, status: ImportStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM import_jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes an import. Its contracts go with it (`ON DELETE CASCADE`).
/// Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM import_jobs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}

//! Postgres-backed [`StateStore`]. Lecture ids are compared as text so the
//! store works whether the id columns are `uuid` or `text`.

use super::{StateError, StateResult, StateStore};
use crate::config::is_valid_table_identifier;
use crate::constants::tables;
use crate::models::{ErrorDetails, LectureStatus, LectureStatusRecord};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn step_result_exists(
        &self,
        result_table: &str,
        lecture_id: &str,
        slide_number: i32,
    ) -> StateResult<bool> {
        if !is_valid_table_identifier(result_table) {
            return Err(StateError::InvalidIdentifier {
                table: result_table.to_string(),
            });
        }
        let sql = format!(
            "SELECT 1 FROM {result_table} WHERE lecture_id::text = $1 AND slide_number = $2 LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(lecture_id)
            .bind(slide_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::query("step_result_exists", e))?;

        debug!(
            table = result_table,
            lecture_id,
            slide_number,
            found = row.is_some(),
            "Checked step result"
        );
        Ok(row.is_some())
    }

    async fn mark_failed(&self, lecture_id: &str, details: &ErrorDetails) -> StateResult<u64> {
        let sql = format!(
            "UPDATE {} SET status = $1, error_details = $2 WHERE id::text = $3",
            tables::LECTURES
        );
        let result = sqlx::query(&sql)
            .bind(LectureStatus::Failed.as_str())
            .bind(Json(details.to_json()))
            .bind(lecture_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StateError::query("mark_failed", e))?;
        Ok(result.rows_affected())
    }

    async fn lecture_status(&self, lecture_id: &str) -> StateResult<Option<LectureStatusRecord>> {
        let sql = format!(
            "SELECT status::text AS status, error_details::jsonb AS error_details FROM {} WHERE id::text = $1",
            tables::LECTURES
        );
        let Some(row) = sqlx::query(&sql)
            .bind(lecture_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StateError::query("lecture_status", e))?
        else {
            return Ok(None);
        };

        let status: String = row
            .try_get("status")
            .map_err(|e| StateError::decode(lecture_id, "status", e))?;
        let status = status
            .parse::<LectureStatus>()
            .map_err(|e| StateError::decode(lecture_id, "status", e))?;
        let details: Option<Json<serde_json::Value>> = row
            .try_get("error_details")
            .map_err(|e| StateError::decode(lecture_id, "error_details", e))?;
        let error_details = details
            .map(|Json(value)| serde_json::from_value::<ErrorDetails>(value))
            .transpose()
            .map_err(|e| StateError::decode(lecture_id, "error_details", e))?;

        Ok(Some(LectureStatusRecord {
            lecture_id: lecture_id.to_string(),
            status,
            error_details,
        }))
    }
}

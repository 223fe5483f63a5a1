use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{into_row_error, parse_datetime, parse_segment_kind, to_i64, to_u32, to_usize},
        models::{NewWorkLog, WorkLog},
    },
    ledger::WorkLogStore,
};

fn row_to_work_log(row: &Row) -> Result<WorkLog, rusqlite::Error> {
    let segment_index: i64 = row.get("segment_index")?;
    let segment_type: String = row.get("segment_type")?;
    let planned_minutes: i64 = row.get("planned_minutes")?;
    let actual_seconds: i64 = row.get("actual_seconds")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;
    let created_at: String = row.get("created_at")?;

    let parsed = (|| -> Result<WorkLog> {
        Ok(WorkLog {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            plan_id: row.get("plan_id")?,
            day_id: row.get("day_id")?,
            segment_index: to_usize(segment_index, "segment_index")?,
            segment_type: parse_segment_kind(&segment_type)?,
            planned_minutes: to_u32(planned_minutes, "planned_minutes")?,
            actual_seconds: to_u32(actual_seconds, "actual_seconds")?,
            started_at: parse_datetime(&started_at, "started_at")?,
            ended_at: parse_datetime(&ended_at, "ended_at")?,
            created_at: parse_datetime(&created_at, "created_at")?,
        })
    })();
    parsed.map_err(into_row_error)
}

impl Database {
    /// Returns `false` when the segment was already logged for that day.
    pub async fn insert_work_log(&self, entry: &NewWorkLog) -> Result<bool> {
        if entry.actual_seconds < 0 {
            bail!(
                "actual_seconds must not be negative (segment {} of day {}: {})",
                entry.segment_index,
                entry.day_id,
                entry.actual_seconds
            );
        }

        let record = entry.clone();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO work_logs (
                    id, user_id, plan_id, day_id, segment_index, segment_type,
                    planned_minutes, actual_seconds, started_at, ended_at, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(day_id, segment_index) DO NOTHING",
                params![
                    format!("wl_{}", uuid::Uuid::new_v4()),
                    record.user_id,
                    record.plan_id,
                    record.day_id,
                    to_i64(record.segment_index as u64)?,
                    record.segment_type.as_str(),
                    i64::from(record.planned_minutes),
                    record.actual_seconds,
                    record.started_at.to_rfc3339(),
                    record.ended_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    pub async fn logged_segment_indices(&self, day_id: &str) -> Result<Vec<usize>> {
        let day_id = day_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT segment_index FROM work_logs
                 WHERE day_id = ?1
                 ORDER BY segment_index",
            )?;
            let indices = stmt
                .query_map(params![day_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            indices
                .into_iter()
                .map(|index| to_usize(index, "segment_index"))
                .collect()
        })
        .await
    }

    pub async fn list_work_logs(&self, day_id: &str) -> Result<Vec<WorkLog>> {
        let day_id = day_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, plan_id, day_id, segment_index, segment_type,
                        planned_minutes, actual_seconds, started_at, ended_at, created_at
                 FROM work_logs
                 WHERE day_id = ?1
                 ORDER BY segment_index",
            )?;
            let logs = stmt
                .query_map(params![day_id], row_to_work_log)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(logs)
        })
        .await
    }
}

#[async_trait]
impl WorkLogStore for Database {
    async fn logged_indices(&self, day_id: &str) -> Result<Vec<usize>> {
        self.logged_segment_indices(day_id).await
    }

    async fn append(&self, entry: &NewWorkLog) -> Result<bool> {
        let inserted = self.insert_work_log(entry).await?;
        if !inserted {
            log::info!(
                "Segment {} of day {} already logged; keeping existing entry",
                entry.segment_index,
                entry.day_id
            );
        }
        Ok(inserted)
    }
}

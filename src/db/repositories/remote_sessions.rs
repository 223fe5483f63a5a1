use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            into_row_error, parse_date, parse_datetime, parse_optional_datetime,
            parse_remote_status, parse_segment_kind, to_i64, to_u32, to_usize,
        },
    },
    sync::{RemoteSessionRecord, RemoteSessionState},
};

fn row_to_remote_session(row: &Row) -> Result<RemoteSessionRecord, rusqlite::Error> {
    let date: String = row.get("date")?;
    let segment_index: i64 = row.get("segment_index")?;
    let segment_type: String = row.get("segment_type")?;
    let planned_minutes: i64 = row.get("segment_planned_minutes")?;
    let status: String = row.get("status")?;
    let started_at: Option<String> = row.get("started_at")?;
    let paused_at: Option<String> = row.get("paused_at")?;
    let accumulated_seconds: i64 = row.get("accumulated_seconds")?;
    let last_updated_at: String = row.get("last_updated_at")?;

    let parsed = (|| -> Result<RemoteSessionRecord> {
        let state = RemoteSessionState {
            plan_id: row.get("plan_id")?,
            day_id: row.get("day_id")?,
            date: parse_date(&date, "date")?,
            segment_index: to_usize(segment_index, "segment_index")?,
            segment_type: parse_segment_kind(&segment_type)?,
            segment_planned_minutes: to_u32(planned_minutes, "segment_planned_minutes")?,
            status: parse_remote_status(&status)?,
            started_at: parse_optional_datetime(started_at, "started_at")?,
            paused_at: parse_optional_datetime(paused_at, "paused_at")?,
            accumulated_seconds: to_u32(accumulated_seconds, "accumulated_seconds")?,
            device_id: row.get("device_id")?,
        };
        Ok(RemoteSessionRecord::stamped(
            state,
            parse_datetime(&last_updated_at, "last_updated_at")?,
        ))
    })();
    parsed.map_err(into_row_error)
}

impl Database {
    /// Replaces the user's session record wholesale.
    pub async fn upsert_remote_session(
        &self,
        user_id: &str,
        state: &RemoteSessionState,
        last_updated_at: DateTime<Utc>,
    ) -> Result<RemoteSessionRecord> {
        let user_id = user_id.to_string();
        let record = RemoteSessionRecord::stamped(state.clone(), last_updated_at);
        let row = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO remote_sessions (
                    user_id, plan_id, day_id, date, segment_index, segment_type,
                    segment_planned_minutes, status, started_at, paused_at,
                    accumulated_seconds, last_updated_at, device_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(user_id) DO UPDATE SET
                    plan_id = excluded.plan_id,
                    day_id = excluded.day_id,
                    date = excluded.date,
                    segment_index = excluded.segment_index,
                    segment_type = excluded.segment_type,
                    segment_planned_minutes = excluded.segment_planned_minutes,
                    status = excluded.status,
                    started_at = excluded.started_at,
                    paused_at = excluded.paused_at,
                    accumulated_seconds = excluded.accumulated_seconds,
                    last_updated_at = excluded.last_updated_at,
                    device_id = excluded.device_id",
                params![
                    user_id,
                    row.state.plan_id,
                    row.state.day_id,
                    row.state.date.format("%Y-%m-%d").to_string(),
                    to_i64(row.state.segment_index as u64)?,
                    row.state.segment_type.as_str(),
                    i64::from(row.state.segment_planned_minutes),
                    row.state.status.as_str(),
                    row.state.started_at.map(|dt| dt.to_rfc3339()),
                    row.state.paused_at.map(|dt| dt.to_rfc3339()),
                    i64::from(row.state.accumulated_seconds),
                    row.last_updated_at.to_rfc3339(),
                    row.state.device_id,
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(record)
    }

    pub async fn get_remote_session(&self, user_id: &str) -> Result<Option<RemoteSessionRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, plan_id, day_id, date, segment_index, segment_type,
                        segment_planned_minutes, status, started_at, paused_at,
                        accumulated_seconds, last_updated_at, device_id
                 FROM remote_sessions
                 WHERE user_id = ?1",
            )?;
            let record = stmt
                .query_row(params![user_id], row_to_remote_session)
                .optional()?;
            Ok(record)
        })
        .await
    }

    pub async fn delete_remote_session(&self, user_id: &str) -> Result<()> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM remote_sessions WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{DayContext, Segment, SequencerSnapshot},
        sync::RemoteStatus,
    };
    use chrono::{NaiveDate, TimeZone};

    fn state(seconds_remaining: u32, is_running: bool, now: DateTime<Utc>) -> RemoteSessionState {
        let context = DayContext {
            user_id: "u1".into(),
            plan_id: "plan".into(),
            day_id: "day-1".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            is_final_day: false,
        };
        let segments = [Segment::work(25)];
        let mut snapshot = SequencerSnapshot::initial(&segments);
        snapshot.seconds_remaining = seconds_remaining;
        snapshot.is_running = is_running;
        RemoteSessionState::from_snapshot(&context, "device-a", &segments[0], &snapshot, now)
    }

    #[tokio::test]
    async fn upsert_replaces_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("focus.sqlite3")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

        assert!(db.get_remote_session("u1").await.unwrap().is_none());

        let running = db
            .upsert_remote_session("u1", &state(1_500, true, t0), t0)
            .await
            .unwrap();
        assert_eq!(db.get_remote_session("u1").await.unwrap(), Some(running));

        let later = t0 + chrono::Duration::seconds(600);
        let paused = db
            .upsert_remote_session("u1", &state(900, false, later), later)
            .await
            .unwrap();
        let stored = db.get_remote_session("u1").await.unwrap().unwrap();
        assert_eq!(stored, paused);
        assert_eq!(stored.state.status, RemoteStatus::Paused);
        assert_eq!(stored.state.started_at, None);
        assert_eq!(stored.state.accumulated_seconds, 600);

        db.delete_remote_session("u1").await.unwrap();
        assert!(db.get_remote_session("u1").await.unwrap().is_none());
    }
}

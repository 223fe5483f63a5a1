use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{connection::Database, helpers::parse_datetime},
    ledger::CompletionSink,
    models::DayContext,
};

impl Database {
    /// Idempotent: a day keeps its first completion time.
    pub async fn mark_day_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()> {
        let context = context.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO day_completions (day_id, plan_id, user_id, date, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(day_id) DO NOTHING",
                params![
                    context.day_id,
                    context.plan_id,
                    context.user_id,
                    context.date.format("%Y-%m-%d").to_string(),
                    at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_plan_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()> {
        let context = context.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO plan_completions (plan_id, user_id, completed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(plan_id) DO NOTHING",
                params![context.plan_id, context.user_id, at.to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn day_completed_at(&self, day_id: &str) -> Result<Option<DateTime<Utc>>> {
        let day_id = day_id.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT completed_at FROM day_completions WHERE day_id = ?1",
                    params![day_id],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|value| parse_datetime(&value, "completed_at"))
                .transpose()
        })
        .await
    }

    pub async fn plan_completed_at(&self, plan_id: &str) -> Result<Option<DateTime<Utc>>> {
        let plan_id = plan_id.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT completed_at FROM plan_completions WHERE plan_id = ?1",
                    params![plan_id],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|value| parse_datetime(&value, "completed_at"))
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl CompletionSink for Database {
    async fn day_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()> {
        self.mark_day_completed(context, at).await
    }

    async fn plan_completed(&self, context: &DayContext, at: DateTime<Utc>) -> Result<()> {
        self.mark_plan_completed(context, at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn context() -> DayContext {
        DayContext {
            user_id: "u1".into(),
            plan_id: "plan".into(),
            day_id: "day-9".into(),
            date: NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            is_final_day: true,
        }
    }

    #[tokio::test]
    async fn first_completion_time_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("focus.sqlite3")).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 3, 9, 18, 0, 0).unwrap();

        assert_eq!(db.day_completed_at("day-9").await.unwrap(), None);
        db.mark_day_completed(&context(), first).await.unwrap();
        db.mark_day_completed(&context(), first + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(db.day_completed_at("day-9").await.unwrap(), Some(first));

        db.plan_completed(&context(), first).await.unwrap();
        assert_eq!(db.plan_completed_at("plan").await.unwrap(), Some(first));
    }
}

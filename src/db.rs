use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use tracing::warn;

use crate::error::StoreError;
use crate::mission::{MissionId, MissionRecord, MissionState};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_missions (
                player_id TEXT NOT NULL,
                mission_id INTEGER NOT NULL,
                state INTEGER NOT NULL DEFAULT 0,
                current_set_index INTEGER NOT NULL DEFAULT 0,
                objective_counts TEXT NOT NULL DEFAULT '[]',
                started_at TEXT,
                completed_at TEXT,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(player_id, mission_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Add the attempt column to tables created before it existed
        let _ = sqlx::query("ALTER TABLE player_missions ADD COLUMN attempt INTEGER NOT NULL DEFAULT 0")
            .execute(pool)
            .await;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_experience (
                player_id TEXT PRIMARY KEY,
                experience INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Upsert every record for a player in one transaction
    pub async fn save_mission_records(&self, player_id: &str, records: &[MissionRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_records(&mut tx, player_id, records).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Load a player's records, skipping rows that can't be interpreted
    pub async fn load_mission_records(&self, player_id: &str) -> Result<Vec<MissionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT mission_id, state, current_set_index, objective_counts, started_at, completed_at, attempt
             FROM player_missions WHERE player_id = ? ORDER BY mission_id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            let mission: i64 = r.get("mission_id");
            let Ok(mission_id) = u32::try_from(mission) else {
                warn!("Skipping saved mission with invalid id {}", mission);
                continue;
            };

            let ordinal: i64 = r.get("state");
            let Some(state) = u8::try_from(ordinal).ok().and_then(MissionState::from_ordinal) else {
                warn!("Skipping mission {} with invalid state {}", mission, ordinal);
                continue;
            };

            let counts: String = r.get("objective_counts");
            let objective_counts: Vec<u32> =
                serde_json::from_str(&counts).map_err(|source| StoreError::Counts { mission, source })?;

            // Out-of-range indices are clamped when the mission is rebuilt
            let set_index: i64 = r.get("current_set_index");
            let attempt: i64 = r.get("attempt");

            records.push(MissionRecord {
                mission_id: MissionId(mission_id),
                state,
                current_set_index: u32::try_from(set_index.max(0)).unwrap_or(u32::MAX),
                objective_counts,
                started_at: parse_timestamp(r.get("started_at")),
                completed_at: parse_timestamp(r.get("completed_at")),
                attempt: u32::try_from(attempt.max(0)).unwrap_or(u32::MAX),
            });
        }

        Ok(records)
    }

    /// Persist a player's records and any experience earned since the last save
    ///
    /// Both writes share one transaction: on error nothing is stored and the
    /// caller still owns the unsaved experience.
    pub async fn save_player(
        &self,
        player_id: &str,
        records: &[MissionRecord],
        unsaved_experience: u32,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_records(&mut tx, player_id, records).await?;
        if unsaved_experience > 0 {
            upsert_experience(&mut tx, player_id, unsaved_experience).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_experience(&self, player_id: &str, amount: u32) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_experience(&mut conn, player_id, amount).await?;
        drop(conn);

        self.experience(player_id).await
    }

    pub async fn experience(&self, player_id: &str) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT experience FROM player_experience WHERE player_id = ?")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|r| r.get::<i64, _>("experience"))
            .map(|xp| u64::try_from(xp).unwrap_or(0))
            .unwrap_or(0))
    }
}

async fn upsert_records(
    conn: &mut SqliteConnection,
    player_id: &str,
    records: &[MissionRecord],
) -> Result<(), StoreError> {
    for record in records {
        let counts = serde_json::to_string(&record.objective_counts).map_err(|source| StoreError::Counts {
            mission: i64::from(record.mission_id.0),
            source,
        })?;

        sqlx::query(
            r#"INSERT INTO player_missions
                (player_id, mission_id, state, current_set_index, objective_counts, started_at, completed_at, attempt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(player_id, mission_id) DO UPDATE SET
                state = excluded.state,
                current_set_index = excluded.current_set_index,
                objective_counts = excluded.objective_counts,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                attempt = excluded.attempt,
                updated_at = CURRENT_TIMESTAMP"#,
        )
        .bind(player_id)
        .bind(i64::from(record.mission_id.0))
        .bind(i64::from(record.state.ordinal()))
        .bind(i64::from(record.current_set_index))
        .bind(counts)
        .bind(record.started_at.map(|t| t.to_rfc3339()))
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(record.attempt))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_experience(conn: &mut SqliteConnection, player_id: &str, amount: u32) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO player_experience (player_id, experience) VALUES (?, ?)
        ON CONFLICT(player_id) DO UPDATE SET experience = experience + excluded.experience"#,
    )
    .bind(player_id)
    .bind(i64::from(amount))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(&value) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!("Ignoring invalid timestamp '{}': {}", value, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> Database {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("missions.db").display());
        Database::new(&url).await.unwrap()
    }

    fn record(id: u32, state: MissionState, set: u32, counts: Vec<u32>) -> MissionRecord {
        MissionRecord {
            mission_id: MissionId(id),
            state,
            current_set_index: set,
            objective_counts: counts,
            started_at: None,
            completed_at: None,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_records() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;

        let started = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let mut active = record(2, MissionState::Active, 1, vec![1, 40, 0]);
        active.started_at = Some(started);

        db.save_mission_records("p1", &[record(1, MissionState::Completed, 3, vec![1, 5, 1]), active.clone()])
            .await
            .unwrap();
        db.save_mission_records("p2", &[record(1, MissionState::Unlocked, 0, vec![0, 0, 0])])
            .await
            .unwrap();

        let loaded = db.load_mission_records("p1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1], active);

        // Saving again updates in place
        active.objective_counts = vec![1, 200, 1];
        db.save_mission_records("p1", &[active.clone()]).await.unwrap();
        let loaded = db.load_mission_records("p1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].objective_counts, vec![1, 200, 1]);

        assert!(db.load_mission_records("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_state_is_skipped() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.save_mission_records("p1", &[record(1, MissionState::Active, 0, vec![0])])
            .await
            .unwrap();

        sqlx::query("UPDATE player_missions SET state = 42 WHERE player_id = 'p1'")
            .execute(&db.pool)
            .await
            .unwrap();
        assert!(db.load_mission_records("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_experience_accumulates() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        assert_eq!(db.experience("p1").await.unwrap(), 0);
        assert_eq!(db.add_experience("p1", 25).await.unwrap(), 25);
        assert_eq!(db.add_experience("p1", 75).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_save_player_skips_zero_experience() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.save_player("p1", &[record(1, MissionState::Unlocked, 0, vec![0])], 0)
            .await
            .unwrap();
        assert_eq!(db.experience("p1").await.unwrap(), 0);

        db.save_player("p1", &[record(1, MissionState::Completed, 1, vec![1])], 30)
            .await
            .unwrap();
        assert_eq!(db.experience("p1").await.unwrap(), 30);
        assert_eq!(db.load_mission_records("p1").await.unwrap()[0].state, MissionState::Completed);
    }

    #[tokio::test]
    async fn test_failed_save_player_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        sqlx::query("DROP TABLE player_experience").execute(&db.pool).await.unwrap();

        let result = db
            .save_player("p1", &[record(1, MissionState::Completed, 1, vec![1])], 30)
            .await;
        assert!(result.is_err());
        assert!(db.load_mission_records("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_is_persisted() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let mut restarted = record(2, MissionState::Active, 0, vec![0, 0, 0]);
        restarted.attempt = 3;
        db.save_mission_records("p1", &[restarted.clone()]).await.unwrap();
        assert_eq!(db.load_mission_records("p1").await.unwrap(), vec![restarted]);
    }
}

//! Durable episodic unit storage using SQLite

use crate::error::{MemoryError, Result};
use crate::storage_traits::{StoreStats, UnitStore};
use crate::types::{EpisodeStatus, EpisodicUnit, ScoredEpisode, UserId};
use crate::vector_search::rank_units;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const UNIT_COLUMNS: &str = "episode_id, user_id, summary, embedding, created_at, ttl_ns, visits, status, topic, importance";

/// SQLite-backed `UnitStore`
#[derive(Clone)]
pub struct SqliteUnitStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteUnitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUnitStore")
            .field("pool", &"<SqlitePool>")
            .finish()
    }
}

impl SqliteUnitStore {
    /// Open (or create) `episodes.db` under `data_dir` and run migrations
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("episodes.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and run migrations on it
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt()
        .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn row_to_unit(row: &SqliteRow) -> Result<EpisodicUnit> {
    let embedding: Vec<u8> = row.try_get("embedding")?;
    let status: String = row.try_get("status")?;
    let visits: i64 = row.try_get("visits")?;
    let importance: Option<f64> = row.try_get("importance")?;

    Ok(EpisodicUnit {
        episode_id: row.try_get("episode_id")?,
        user_id: row.try_get("user_id")?,
        summary: row.try_get("summary")?,
        embedding: bincode::deserialize(&embedding)?,
        created_at: row.try_get("created_at")?,
        ttl: DateTime::from_timestamp_nanos(row.try_get("ttl_ns")?),
        visits: u32::try_from(visits).unwrap_or(u32::MAX),
        status: status.parse()?,
        topic: row.try_get("topic")?,
        importance: importance.map(|i| i as f32),
    })
}

#[async_trait]
impl UnitStore for SqliteUnitStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn add(&self, unit: &EpisodicUnit) -> Result<()> {
        let embedding = bincode::serialize(&unit.embedding)?;

        let result = sqlx::query(
            r#"
            INSERT INTO episodic_units (
                episode_id, user_id, summary, embedding, created_at,
                ttl_ns, visits, status, topic, importance
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&unit.episode_id)
        .bind(&unit.user_id)
        .bind(&unit.summary)
        .bind(embedding)
        .bind(unit.created_at)
        .bind(to_nanos(unit.ttl))
        .bind(i64::from(unit.visits))
        .bind(unit.status.as_str())
        .bind(&unit.topic)
        .bind(unit.importance.map(f64::from))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(MemoryError::DuplicateEpisode(unit.episode_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, user_id: &str, episode_id: &str) -> Result<Option<EpisodicUnit>> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM episodic_units WHERE user_id = ? AND episode_id = ?"
        ))
        .bind(user_id)
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn update(&self, unit: &EpisodicUnit) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE episodic_units
            SET ttl_ns = ?, visits = ?, status = ?, topic = ?, importance = ?
            WHERE user_id = ? AND episode_id = ?
            "#,
        )
        .bind(to_nanos(unit.ttl))
        .bind(i64::from(unit.visits))
        .bind(unit.status.as_str())
        .bind(&unit.topic)
        .bind(unit.importance.map(f64::from))
        .bind(&unit.user_id)
        .bind(&unit.episode_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFound(unit.episode_id.clone()));
        }
        Ok(())
    }

    async fn query(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEpisode>> {
        let sql = format!(
            "SELECT {UNIT_COLUMNS} FROM episodic_units WHERE user_id = ? AND ttl_ns > ? ORDER BY seq"
        );
        let mut rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(to_nanos(now))
            .fetch(&self.pool);

        let mut candidates = Vec::new();
        while let Some(row) = rows.try_next().await? {
            candidates.push(row_to_unit(&row)?);
        }

        Ok(rank_units(&candidates, query_embedding, top_k, now))
    }

    async fn expired_active(&self, now: DateTime<Utc>) -> Result<Vec<EpisodicUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM episodic_units WHERE status = ? AND ttl_ns <= ? ORDER BY seq"
        ))
        .bind(EpisodeStatus::Active.as_str())
        .bind(to_nanos(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_unit).collect()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM episodic_units WHERE ttl_ns <= ?")
            .bind(to_nanos(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn delete_expired_for(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM episodic_units WHERE user_id = ? AND ttl_ns <= ?")
            .bind(user_id)
            .bind(to_nanos(now))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn users(&self) -> Result<Vec<UserId>> {
        let users = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM episodic_units ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn list_user(&self, user_id: &str) -> Result<Vec<EpisodicUnit>> {
        let rows = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM episodic_units WHERE user_id = ? ORDER BY seq"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_unit).collect()
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0) AS active,
                COALESCE(SUM(CASE WHEN status = 'dormant' THEN 1 ELSE 0 END), 0) AS dormant,
                COALESCE(SUM(CASE WHEN ttl_ns <= ? THEN 1 ELSE 0 END), 0) AS expired,
                COUNT(DISTINCT user_id) AS users
            FROM episodic_units
            "#,
        )
        .bind(to_nanos(now))
        .fetch_one(&self.pool)
        .await?;

        let count = |name: &str| -> Result<usize> {
            let n: i64 = row.try_get(name)?;
            Ok(n.max(0) as usize)
        };

        Ok(StoreStats {
            total_units: count("total")?,
            active_units: count("active")?,
            dormant_units: count("dormant")?,
            expired_units: count("expired")?,
            users: count("users")?,
        })
    }
}

//! SQLite storage for finalized rounds and pre-lock pool snapshots

use crate::types::{RoundData, Snapshot, SnapshotType, StoreStats, StoredRound, Wei};
use alloy::primitives::U256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Write/check operations the watcher needs from a store
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Insert or update a round keyed by epoch.
    /// Returns false when the stored row already held identical data.
    async fn upsert_round(&self, round: &RoundData) -> Result<bool>;

    /// Insert or replace the snapshot keyed by `(epoch, snapshot_type)`
    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn has_snapshot(&self, epoch: u64, snapshot_type: SnapshotType) -> Result<bool>;
}

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) a database file
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Private in-memory database. Single connection so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rounds (
                epoch INTEGER PRIMARY KEY,
                start_ts INTEGER NOT NULL,
                lock_ts INTEGER NOT NULL,
                close_ts INTEGER NOT NULL,
                lock_price TEXT NOT NULL,
                close_price TEXT NOT NULL,
                total_amount_wei TEXT NOT NULL,
                bull_amount_wei TEXT NOT NULL,
                bear_amount_wei TEXT NOT NULL,
                oracle_called INTEGER NOT NULL,
                reward_base_cal_wei TEXT NOT NULL,
                reward_amount_wei TEXT NOT NULL,
                winner TEXT NOT NULL,
                winner_multiple REAL,
                inserted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                epoch INTEGER NOT NULL,
                snapshot_type TEXT NOT NULL,
                taken_at INTEGER NOT NULL,
                total_amount_wei TEXT NOT NULL,
                bull_amount_wei TEXT NOT NULL,
                bear_amount_wei TEXT NOT NULL,
                implied_up_multiple REAL,
                implied_down_multiple REAL,
                PRIMARY KEY (epoch, snapshot_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_epoch ON snapshots(epoch)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rounds_winner ON rounds(winner)")
            .execute(&self.pool)
            .await?;

        info!("Database initialized");
        Ok(())
    }

    /// Get a stored round by epoch
    pub async fn get_round(&self, epoch: u64) -> Result<Option<StoredRound>> {
        let row = sqlx::query("SELECT * FROM rounds WHERE epoch = ?")
            .bind(epoch as i64)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_round(&r)?)),
            None => Ok(None),
        }
    }

    /// All snapshots for an epoch, furthest from lock first
    pub async fn get_snapshots(&self, epoch: u64) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query("SELECT * FROM snapshots WHERE epoch = ? ORDER BY taken_at ASC")
            .bind(epoch as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_snapshot).collect()
    }

    /// Highest stored round epoch
    pub async fn latest_round_epoch(&self) -> Result<Option<u64>> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(epoch) FROM rounds")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.map(|e| e as u64))
    }

    /// Row counts for both tables
    pub async fn stats(&self) -> Result<StoreStats> {
        let rounds: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rounds")
            .fetch_one(&self.pool)
            .await?;

        let resolved: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rounds WHERE winner != 'UNKNOWN'")
            .fetch_one(&self.pool)
            .await?;

        let snapshots: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT snapshot_type, COUNT(*) FROM snapshots GROUP BY snapshot_type ORDER BY snapshot_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            rounds: rounds.0,
            resolved_rounds: resolved.0,
            snapshots: snapshots.0,
            snapshots_by_type: by_type,
            latest_epoch: self.latest_round_epoch().await?,
        })
    }
}

#[async_trait]
impl RoundStore for Database {
    async fn upsert_round(&self, round: &RoundData) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let winner = round.winner();

        // The WHERE clause turns an identical replay into a no-op so updated_at is untouched
        let result = sqlx::query(
            r#"
            INSERT INTO rounds (
                epoch, start_ts, lock_ts, close_ts, lock_price, close_price,
                total_amount_wei, bull_amount_wei, bear_amount_wei, oracle_called,
                reward_base_cal_wei, reward_amount_wei, winner, winner_multiple,
                inserted_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(epoch) DO UPDATE SET
                start_ts = excluded.start_ts,
                lock_ts = excluded.lock_ts,
                close_ts = excluded.close_ts,
                lock_price = excluded.lock_price,
                close_price = excluded.close_price,
                total_amount_wei = excluded.total_amount_wei,
                bull_amount_wei = excluded.bull_amount_wei,
                bear_amount_wei = excluded.bear_amount_wei,
                oracle_called = excluded.oracle_called,
                reward_base_cal_wei = excluded.reward_base_cal_wei,
                reward_amount_wei = excluded.reward_amount_wei,
                winner = excluded.winner,
                winner_multiple = excluded.winner_multiple,
                updated_at = excluded.updated_at
            WHERE rounds.start_ts IS NOT excluded.start_ts
                OR rounds.lock_ts IS NOT excluded.lock_ts
                OR rounds.close_ts IS NOT excluded.close_ts
                OR rounds.lock_price IS NOT excluded.lock_price
                OR rounds.close_price IS NOT excluded.close_price
                OR rounds.total_amount_wei IS NOT excluded.total_amount_wei
                OR rounds.bull_amount_wei IS NOT excluded.bull_amount_wei
                OR rounds.bear_amount_wei IS NOT excluded.bear_amount_wei
                OR rounds.oracle_called IS NOT excluded.oracle_called
                OR rounds.reward_base_cal_wei IS NOT excluded.reward_base_cal_wei
                OR rounds.reward_amount_wei IS NOT excluded.reward_amount_wei
                OR rounds.winner IS NOT excluded.winner
                OR rounds.winner_multiple IS NOT excluded.winner_multiple
            "#,
        )
        .bind(round.epoch as i64)
        .bind(round.start_timestamp)
        .bind(round.lock_timestamp)
        .bind(round.close_timestamp)
        .bind(round.lock_price.to_string())
        .bind(round.close_price.to_string())
        .bind(round.total_amount.to_string())
        .bind(round.bull_amount.to_string())
        .bind(round.bear_amount.to_string())
        .bind(round.oracle_called)
        .bind(round.reward_base_cal_amount.to_string())
        .bind(round.reward_amount.to_string())
        .bind(winner.as_str())
        .bind(round.winner_multiple())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert round {}", round.epoch))?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (
                epoch, snapshot_type, taken_at, total_amount_wei, bull_amount_wei,
                bear_amount_wei, implied_up_multiple, implied_down_multiple
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(epoch, snapshot_type) DO UPDATE SET
                taken_at = excluded.taken_at,
                total_amount_wei = excluded.total_amount_wei,
                bull_amount_wei = excluded.bull_amount_wei,
                bear_amount_wei = excluded.bear_amount_wei,
                implied_up_multiple = excluded.implied_up_multiple,
                implied_down_multiple = excluded.implied_down_multiple
            "#,
        )
        .bind(snapshot.epoch as i64)
        .bind(snapshot.snapshot_type.as_str())
        .bind(snapshot.taken_at)
        .bind(snapshot.total_amount.to_string())
        .bind(snapshot.bull_amount.to_string())
        .bind(snapshot.bear_amount.to_string())
        .bind(snapshot.implied_up_multiple)
        .bind(snapshot.implied_down_multiple)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to upsert {} snapshot for round {}",
                snapshot.snapshot_type, snapshot.epoch
            )
        })?;
        Ok(())
    }

    async fn has_snapshot(&self, epoch: u64, snapshot_type: SnapshotType) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM snapshots WHERE epoch = ? AND snapshot_type = ? LIMIT 1")
                .bind(epoch as i64)
                .bind(snapshot_type.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

fn parse_wei(value: &str) -> Result<Wei> {
    U256::from_str_radix(value, 10).map_err(|e| anyhow::anyhow!("Invalid wei amount {}: {}", value, e))
}

fn row_to_round(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRound> {
    let epoch: i64 = row.get("epoch");
    let lock_price: String = row.get("lock_price");
    let close_price: String = row.get("close_price");
    let winner: String = row.get("winner");

    let round = RoundData {
        epoch: epoch as u64,
        start_timestamp: row.get("start_ts"),
        lock_timestamp: row.get("lock_ts"),
        close_timestamp: row.get("close_ts"),
        lock_price: lock_price.parse().context("Invalid lock_price")?,
        close_price: close_price.parse().context("Invalid close_price")?,
        total_amount: parse_wei(row.get("total_amount_wei"))?,
        bull_amount: parse_wei(row.get("bull_amount_wei"))?,
        bear_amount: parse_wei(row.get("bear_amount_wei"))?,
        reward_base_cal_amount: parse_wei(row.get("reward_base_cal_wei"))?,
        reward_amount: parse_wei(row.get("reward_amount_wei"))?,
        oracle_called: row.get("oracle_called"),
    };

    Ok(StoredRound {
        round,
        winner: winner.parse()?,
        winner_multiple: row.get("winner_multiple"),
        inserted_at: row.get("inserted_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<Snapshot> {
    let epoch: i64 = row.get("epoch");
    let snapshot_type: String = row.get("snapshot_type");

    Ok(Snapshot {
        epoch: epoch as u64,
        snapshot_type: snapshot_type.parse()?,
        taken_at: row.get("taken_at"),
        total_amount: parse_wei(row.get("total_amount_wei"))?,
        bull_amount: parse_wei(row.get("bull_amount_wei"))?,
        bear_amount: parse_wei(row.get("bear_amount_wei"))?,
        implied_up_multiple: row.get("implied_up_multiple"),
        implied_down_multiple: row.get("implied_down_multiple"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ether, Winner};

    fn round(epoch: u64) -> RoundData {
        RoundData {
            epoch,
            start_timestamp: 1_700_000_000,
            lock_timestamp: 1_700_000_300,
            close_timestamp: 1_700_000_600,
            lock_price: 30_000_00000000,
            close_price: 30_100_00000000,
            total_amount: ether(10),
            bull_amount: ether(6),
            bear_amount: ether(4),
            reward_base_cal_amount: ether(6),
            reward_amount: U256::from(97u64) * U256::from(10u64).pow(U256::from(17u64)),
            oracle_called: true,
        }
    }

    fn snapshot(epoch: u64, snapshot_type: SnapshotType, bull: u64) -> Snapshot {
        Snapshot {
            epoch,
            snapshot_type,
            taken_at: 1_700_000_280,
            total_amount: ether(bull + 4),
            bull_amount: ether(bull),
            bear_amount: ether(4),
            implied_up_multiple: Some((bull + 4) as f64 / bull as f64),
            implied_down_multiple: None,
        }
    }

    #[tokio::test]
    async fn test_round_roundtrip_with_derived_fields() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.upsert_round(&round(100)).await.unwrap());

        let stored = db.get_round(100).await.unwrap().unwrap();
        assert_eq!(stored.round, round(100));
        assert_eq!(stored.winner, Winner::Up);
        assert!((stored.winner_multiple.unwrap() - 1.6167).abs() < 0.001);
        assert!(db.get_round(101).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_round_identical_replay_is_noop() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_round(&round(100)).await.unwrap();
        let first = db.get_round(100).await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(!db.upsert_round(&round(100)).await.unwrap());

        let second = db.get_round(100).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(db.stats().await.unwrap().rounds, 1);
    }

    #[tokio::test]
    async fn test_upsert_round_updates_changed_data() {
        let db = Database::in_memory().await.unwrap();
        let mut pending = round(100);
        pending.oracle_called = false;
        db.upsert_round(&pending).await.unwrap();
        let before = db.get_round(100).await.unwrap().unwrap();
        assert_eq!(before.winner, Winner::Unknown);
        assert_eq!(before.winner_multiple, None);

        assert!(db.upsert_round(&round(100)).await.unwrap());
        let after = db.get_round(100).await.unwrap().unwrap();
        assert_eq!(after.winner, Winner::Up);
        assert_eq!(after.inserted_at, before.inserted_at);
    }

    #[tokio::test]
    async fn test_wei_above_i64_preserved() {
        let db = Database::in_memory().await.unwrap();
        let mut big = round(7);
        big.total_amount = U256::from(u128::MAX) * U256::from(3u64);
        db.upsert_round(&big).await.unwrap();
        let stored = db.get_round(7).await.unwrap().unwrap();
        assert_eq!(stored.round.total_amount, big.total_amount);
    }

    #[tokio::test]
    async fn test_snapshot_key_keeps_latest_only() {
        let db = Database::in_memory().await.unwrap();
        assert!(!db.has_snapshot(100, SnapshotType::TMinus8s).await.unwrap());

        db.upsert_snapshot(&snapshot(100, SnapshotType::TMinus8s, 2)).await.unwrap();
        db.upsert_snapshot(&snapshot(100, SnapshotType::TMinus8s, 5)).await.unwrap();

        let stored = db.get_snapshots(100).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bull_amount, ether(5));
        assert!(db.has_snapshot(100, SnapshotType::TMinus8s).await.unwrap());
        assert!(!db.has_snapshot(100, SnapshotType::TMinus4s).await.unwrap());
        assert!(!db.has_snapshot(101, SnapshotType::TMinus8s).await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_nullable_multiples() {
        let db = Database::in_memory().await.unwrap();
        let snap = snapshot(9, SnapshotType::TMinus20s, 1);
        db.upsert_snapshot(&snap).await.unwrap();
        let stored = db.get_snapshots(9).await.unwrap();
        assert_eq!(stored[0], snap);
        assert_eq!(stored[0].implied_down_multiple, None);
    }

    #[tokio::test]
    async fn test_stats() {
        let db = Database::in_memory().await.unwrap();
        let mut unresolved = round(101);
        unresolved.oracle_called = false;
        db.upsert_round(&round(100)).await.unwrap();
        db.upsert_round(&unresolved).await.unwrap();
        db.upsert_snapshot(&snapshot(101, SnapshotType::TMinus20s, 1)).await.unwrap();
        db.upsert_snapshot(&snapshot(101, SnapshotType::TMinus4s, 1)).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.resolved_rounds, 1);
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.latest_epoch, Some(101));
        assert_eq!(stats.snapshots_by_type.len(), 2);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).await.unwrap();
            db.upsert_snapshot(&snapshot(100, SnapshotType::TMinus20s, 3)).await.unwrap();
        }

        let db = Database::new(path).await.unwrap();
        assert!(db.has_snapshot(100, SnapshotType::TMinus20s).await.unwrap());
    }
}

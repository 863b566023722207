//! Snapshot persistence
//!
//! State is saved as one JSON document. Writes go to a sibling temporary
//! file that is then renamed over the target, so a crash mid-write leaves
//! the previous snapshot intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::ledger::{Stats, Trade};
use crate::position::Position;

/// Everything needed to resume a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub stats: Stats,
    /// Open positions, oldest first
    pub positions: Vec<Position>,
    /// Most recent trades, oldest first
    #[serde(default)]
    pub trades: Vec<Trade>,
}

/// JSON snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read the snapshot, `None` if no file exists yet
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {}, starting fresh", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::PersistenceFailure(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let snapshot = serde_json::from_str::<Snapshot>(&content).map_err(|e| {
            Error::PersistenceFailure(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;

        debug!(
            "Loaded snapshot from {}: {} positions, {} trades",
            self.path.display(),
            snapshot.positions.len(),
            snapshot.trades.len()
        );
        Ok(Some(snapshot))
    }

    /// Write the snapshot via temp file and rename
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Error::PersistenceFailure(format!("Failed to serialize snapshot: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::PersistenceFailure(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await.map_err(|e| {
            Error::PersistenceFailure(format!("Failed to write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            Error::PersistenceFailure(format!(
                "Failed to move snapshot into {}: {}",
                self.path.display(),
                e
            ))
        })?;

        debug!(
            "Saved snapshot to {} ({} positions, {} trades)",
            self.path.display(),
            snapshot.positions.len(),
            snapshot.trades.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::observation;
    use crate::ledger::Ledger;
    use crate::position::ExitReason;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    fn sample_snapshot() -> Snapshot {
        let now = Utc::now();
        let mut stats = Stats::new(10.0, now);
        let held = Position::open(&observation("held", 0.002), 1.0, 0.0025, 85, now);

        let sold = Position::open(&observation("sold", 0.5), 1.0, 0.0025, 70, now);
        let trade = Trade::from_close(sold, 0.4, 0.002, ExitReason::StopLoss, now);
        stats.total_trades = 1;
        stats.losses = 1;
        stats.best_trade = Some(trade.clone());
        stats.worst_trade = Some(trade.clone());

        Snapshot {
            saved_at: now,
            stats,
            positions: vec![held],
            trades: vec![trade],
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let loaded = assert_ok!(store.load().await);
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("state.json"));
        let snapshot = sample_snapshot();

        assert_ok!(store.save(&snapshot).await);
        assert!(!store.temp_path().exists());

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_floats_survive_exactly() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(42);

        let mut ledger = Ledger::new(1_000.0, now);
        let mut held = Vec::new();
        for i in 0..200 {
            let buy = 10f64.powf(rng.gen_range(-8.0..-2.0));
            let position = Position::open(&observation(&format!("p{}", i), buy), 1.0, 0.0025, 70, now);
            ledger.record_open(&position);
            if i % 20 == 0 {
                held.push(position);
                continue;
            }
            let sell = buy * rng.gen_range(0.5..2.0);
            let fee = position.quantity * sell * 0.0025;
            ledger.record_close(Trade::from_close(position, sell, fee, ExitReason::TakeProfit, now));
        }

        let snapshot = Snapshot {
            saved_at: now,
            stats: ledger.stats().clone(),
            positions: held,
            trades: ledger.trades().to_vec(),
        };
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.trades.len(), 190);
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let mut snapshot = sample_snapshot();
        store.save(&snapshot).await.unwrap();

        snapshot.positions.clear();
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.positions.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure(_)));
    }
}

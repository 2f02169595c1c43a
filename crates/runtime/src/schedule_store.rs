//! File-backed persistence for the scheduler (C3), mirrored on
//! `soma_memory::MemoryEventLog`'s atomic-rename discipline: writes land in
//! a `.tmp` sibling, get flushed and `sync_all`'d, then `rename`d over the
//! real path so a crash mid-write never leaves a corrupt store behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::scheduler::ScheduleEntry;

pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted snapshot, or an empty list if the store has
    /// never been written.
    pub async fn load(&self) -> Result<Vec<ScheduleEntry>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("reading schedule store"),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).context("parsing schedule store")
    }

    /// Overwrites the store with `entries`, atomically.
    pub async fn save(&self, entries: &[ScheduleEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.context("creating schedule store directory")?;
        }

        let rendered = serde_json::to_vec_pretty(entries).context("serializing schedule store")?;
        let tmp_path = self.path.with_extension("json.tmp");

        let write_result = async {
            let mut file = fs::File::create(&tmp_path).await.context("creating schedule store temp file")?;
            file.write_all(&rendered).await.context("writing schedule store temp file")?;
            file.flush().await.context("flushing schedule store temp file")?;
            file.sync_all().await.context("syncing schedule store temp file")?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path).await.context("renaming schedule store temp file into place")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerLimits, ScheduleOptions};
    use chrono::Utc;

    #[tokio::test]
    async fn missing_store_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedules.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedules.json"));

        let mut scheduler = Scheduler::new(SchedulerLimits::default());
        let now = Utc::now();
        scheduler
            .schedule("core", ScheduleOptions { next_fire_at: now, recurrence: None, timezone: None, local_time: None, data: serde_json::json!({"k": "v"}) }, now)
            .unwrap();

        let snapshot = scheduler.snapshot();
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].data, serde_json::json!({"k": "v"}));
    }

    #[tokio::test]
    async fn save_overwrites_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("schedules.json"));
        let now = Utc::now();

        let mut scheduler = Scheduler::new(SchedulerLimits::default());
        scheduler.schedule("core", ScheduleOptions { next_fire_at: now, recurrence: None, timezone: None, local_time: None, data: serde_json::Value::Null }, now).unwrap();
        store.save(&scheduler.snapshot()).await.unwrap();

        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}

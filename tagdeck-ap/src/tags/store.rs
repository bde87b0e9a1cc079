//! Persistent tag assignments with read-after-write verification
//!
//! Every assignment written through the store is read back and compared.
//! Successful assignments and removals kick off a background rewrite of the
//! backup file; resume-point updates do not.

use super::backup::{restore_from_file, write_backup, RestoreSummary};
use super::{is_valid_tag_id, ResumePoint, TagRecord};
use crate::error::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagdeck_common::db::{KvStore, TAGS_NAMESPACE};
use tagdeck_common::PlayMode;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TagStore {
    kv: KvStore,
    backup_path: PathBuf,
    /// Serializes backup rewrites
    backup_lock: Arc<Mutex<()>>,
}

impl TagStore {
    pub fn new(db: Pool<Sqlite>, backup_path: impl Into<PathBuf>) -> Self {
        Self {
            kv: KvStore::new(db, TAGS_NAMESPACE),
            backup_path: backup_path.into(),
            backup_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Decoded record for `id`
    ///
    /// A stored record that no longer decodes is reported and treated as
    /// unassigned.
    pub async fn lookup(&self, id: &str) -> Result<Option<TagRecord>> {
        let Some(raw) = self.kv.get(id).await? else {
            return Ok(None);
        };
        match TagRecord::decode(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable assignment of tag {}: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Assign a music source to `id`
    ///
    /// An empty source is stored as `"0"`. `play_mode` must name a real mode.
    pub async fn assign(&self, id: &str, file_or_url: &str, play_mode: u8) -> Result<TagRecord> {
        check_id(id)?;
        let play_mode = PlayMode::from_code(play_mode)
            .filter(|mode| *mode != PlayMode::NoPlaylist)
            .ok_or_else(|| Error::Validation(format!("invalid play mode {}", play_mode)))?;

        let source = if file_or_url.is_empty() { "0" } else { file_or_url };
        let record = TagRecord::music(source, play_mode);
        self.write(id, &record).await?;
        info!("Tag {} assigned to {} (mode {})", id, source, play_mode);
        Ok(record)
    }

    /// Assign a module action to `id`
    pub async fn assign_module(&self, id: &str, mod_id: u8) -> Result<TagRecord> {
        check_id(id)?;
        if mod_id == 0 {
            return Err(Error::Validation("module id must be positive".into()));
        }
        let record = TagRecord::Module { mod_id };
        self.write(id, &record).await?;
        info!("Tag {} assigned to module {}", id, mod_id);
        Ok(record)
    }

    async fn write(&self, id: &str, record: &TagRecord) -> Result<()> {
        self.kv.put_verified(id, &record.encode()).await?;
        self.spawn_backup();
        Ok(())
    }

    /// Remove the assignment of `id`; returns whether one existed
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let existed = self.kv.remove(id).await?;
        if existed {
            info!("Tag {} removed", id);
            self.spawn_backup();
        }
        Ok(existed)
    }

    /// Erase every assignment
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.kv.clear().await?;
        info!("Erased {} tag assignments", removed);
        Ok(removed)
    }

    /// Numeric tag ids in ascending order
    pub async fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .kv
            .keys()
            .await?
            .into_iter()
            .filter(|k| is_valid_tag_id(k))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Every decodable assignment in ascending id order
    pub async fn entries(&self) -> Result<Vec<(String, TagRecord)>> {
        let mut entries = Vec::new();
        for (id, raw) in self.kv.entries().await? {
            if !is_valid_tag_id(&id) {
                continue;
            }
            match TagRecord::decode(&raw) {
                Ok(record) => entries.push((id, record)),
                Err(e) => debug!("Skipping tag {}: {}", id, e),
            }
        }
        Ok(entries)
    }

    /// Raw `(id, stored value)` pairs with numeric ids, for the backup file
    pub async fn raw_entries(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .kv
            .entries()
            .await?
            .into_iter()
            .filter(|(id, _)| is_valid_tag_id(id))
            .collect())
    }

    /// Store a raw record as found in a backup file
    pub(crate) async fn put_raw(&self, id: &str, raw: &str) -> Result<()> {
        self.kv.put(id, raw).await?;
        Ok(())
    }

    /// Persist where playback of a tag stood
    pub async fn save_resume_point(&self, point: &ResumePoint) -> Result<()> {
        if !is_valid_tag_id(&point.tag) {
            debug!("No tag behind current playback, resume point not saved");
            return Ok(());
        }
        let record = point.to_record();
        self.kv.put_verified(&point.tag, &record.encode()).await?;
        debug!(
            "Resume point for tag {}: track {} at {} bytes",
            point.tag, point.track_index, point.position
        );
        Ok(())
    }

    /// Rewrite the backup file now
    pub async fn backup(&self) -> Result<usize> {
        let _lock = self.backup_lock.lock().await;
        let entries = self.raw_entries().await?;
        write_backup(&self.backup_path, &entries).await?;
        Ok(entries.len())
    }

    /// Rewrite the backup file in the background
    pub fn spawn_backup(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            match store.backup().await {
                Ok(count) => debug!("Backup of {} tags written to {}", count, store.backup_path.display()),
                Err(e) => error!("Writing tag backup failed: {}", e),
            }
        });
    }

    /// Import a backup file, then delete it
    pub async fn restore(&self, path: &Path) -> Result<RestoreSummary> {
        let summary = restore_from_file(self, path).await;
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove {}: {}", path.display(), e);
        }
        summary
    }
}

fn check_id(id: &str) -> Result<()> {
    if is_valid_tag_id(id) {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid tag id '{}'", id)))
    }
}

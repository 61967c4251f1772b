use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use super::model::{AccountProfile, EvidenceRecord, NewEvidence};
use super::RecordStore;
use crate::error::{AppError, AppResult};

const USERS_FILE: &str = "users.json";
const EVIDENCES_FILE: &str = "evidences.json";

#[derive(Default)]
struct Tables {
    users: Vec<AccountProfile>,
    evidences: Vec<EvidenceRecord>,
}

/// In-memory tables with optional JSON snapshots under a data root.
///
/// Each insert rewrites the affected table file in full. Snapshot writes go to a
/// temporary file first and are renamed into place.
#[derive(Clone)]
pub struct MemoryStore {
    root: Option<PathBuf>,
    tables: Arc<RwLock<Tables>>,
    /// Serialises snapshot writes so an older table image never overwrites a newer one.
    persist: Arc<Mutex<()>>,
    /// Last assigned upload time; new rows always sort strictly after it.
    last_upload: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::in_memory() }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() { return Ok(Vec::new()); }
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.is_empty() { return Ok(Vec::new()); }
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(rows)?;
    std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            tables: Arc::new(RwLock::new(Tables::default())),
            persist: Arc::new(Mutex::new(())),
            last_upload: Arc::new(Mutex::new(None)),
        }
    }

    /// Open (or create) a persisted store under `root`, loading any existing snapshots.
    pub fn open(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create or access data root: {}", root.display()))?;
        let users: Vec<AccountProfile> = read_table(&root.join(USERS_FILE))?;
        let evidences: Vec<EvidenceRecord> = read_table(&root.join(EVIDENCES_FILE))?;
        let last = evidences.iter().map(|e| e.upload_time).max();
        debug!(users = users.len(), evidences = evidences.len(), root = %root.display(), "store.open");
        Ok(Self {
            root: Some(root),
            tables: Arc::new(RwLock::new(Tables { users, evidences })),
            persist: Arc::new(Mutex::new(())),
            last_upload: Arc::new(Mutex::new(last)),
        })
    }

    fn next_upload_time(&self) -> DateTime<Utc> {
        let mut last = self.last_upload.lock();
        let now = Utc::now();
        let t = match *last {
            Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
            _ => now,
        };
        *last = Some(t);
        t
    }

    fn persist_users(&self) -> AppResult<()> {
        let Some(root) = &self.root else { return Ok(()); };
        let _g = self.persist.lock();
        let rows = self.tables.read().users.clone();
        write_table(&root.join(USERS_FILE), &rows).map_err(|e| {
            error!("users snapshot failed: {e:#}");
            AppError::io("store_unavailable", "Could not save account record")
        })
    }

    fn persist_evidences(&self) -> AppResult<()> {
        let Some(root) = &self.root else { return Ok(()); };
        let _g = self.persist.lock();
        let rows = self.tables.read().evidences.clone();
        write_table(&root.join(EVIDENCES_FILE), &rows).map_err(|e| {
            error!("evidences snapshot failed: {e:#}");
            AppError::io("store_unavailable", "Could not save evidence record")
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_profile(&self, profile: AccountProfile) -> AppResult<AccountProfile> {
        {
            let mut t = self.tables.write();
            if t.users.iter().any(|u| u.id == profile.id) {
                return Err(AppError::conflict("duplicate_key", "duplicate key value violates unique constraint \"users_pkey\""));
            }
            t.users.push(profile.clone());
        }
        if let Err(e) = self.persist_users() {
            // Not on disk means not inserted
            self.tables.write().users.retain(|u| u.id != profile.id);
            return Err(e);
        }
        debug!(user_id = %profile.id, role = profile.role.as_str(), "store.insert_profile");
        Ok(profile)
    }

    async fn profile_by_id(&self, id: &str) -> AppResult<Option<AccountProfile>> {
        Ok(self.tables.read().users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_evidence(&self, evidence: NewEvidence) -> AppResult<EvidenceRecord> {
        let record = EvidenceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: evidence.user_id,
            file_name: evidence.file_name,
            file_type: evidence.file_type,
            cid: evidence.cid,
            criticality: evidence.criticality,
            upload_time: self.next_upload_time(),
        };
        self.tables.write().evidences.push(record.clone());
        if let Err(e) = self.persist_evidences() {
            self.tables.write().evidences.retain(|r| r.id != record.id);
            return Err(e);
        }
        debug!(user_id = %record.user_id, cid = %record.cid, "store.insert_evidence");
        Ok(record)
    }

    async fn evidences_for(&self, user_id: &str) -> AppResult<Vec<EvidenceRecord>> {
        let mut rows: Vec<EvidenceRecord> = self
            .tables
            .read()
            .evidences
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.upload_time.cmp(&a.upload_time));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Criticality, Role};
    use tempfile::tempdir;

    fn profile(id: &str) -> AccountProfile {
        AccountProfile {
            id: id.into(),
            name: "Asha Rao".into(),
            email: "asha@example.org".into(),
            role: Role::Veteran,
            service_number: None,
            ppo_number: Some("PPO-1182".into()),
            sponsor_service_number: None,
            created_at: Utc::now(),
        }
    }

    fn evidence(user: &str, name: &str) -> NewEvidence {
        NewEvidence {
            user_id: user.into(),
            file_name: name.into(),
            file_type: "text/plain".into(),
            cid: "CID000000001".into(),
            criticality: Criticality::Low,
        }
    }

    #[tokio::test]
    async fn duplicate_profile_is_conflict() {
        let store = MemoryStore::in_memory();
        store.insert_profile(profile("u1")).await.unwrap();
        let err = store.insert_profile(profile("u1")).await.unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert!(store.profile_by_id("u1").await.unwrap().is_some());
        assert!(store.profile_by_id("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evidences_filtered_by_owner_and_ordered() {
        let store = MemoryStore::in_memory();
        for name in ["a.txt", "b.txt", "c.txt"] {
            store.insert_evidence(evidence("u1", name)).await.unwrap();
        }
        store.insert_evidence(evidence("u2", "other.txt")).await.unwrap();

        let desc = store.evidences_for("u1").await.unwrap();
        let names: Vec<&str> = desc.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["c.txt", "b.txt", "a.txt"]);
        assert!(desc.windows(2).all(|w| w[0].upload_time > w[1].upload_time));
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_no_row_behind() {
        let tmp = tempdir().unwrap();
        let store = MemoryStore::open(tmp.path()).unwrap();
        store.insert_evidence(evidence("u1", "kept.txt")).await.unwrap();

        // A directory where the temp snapshot goes makes every write fail
        std::fs::create_dir(tmp.path().join("evidences.json.tmp")).unwrap();
        std::fs::create_dir(tmp.path().join("users.json.tmp")).unwrap();

        let err = store.insert_evidence(evidence("u1", "report.pdf")).await.unwrap_err();
        assert_eq!(err.message(), "Could not save evidence record");
        let rows = store.evidences_for("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file_name, "kept.txt");

        assert!(store.insert_profile(profile("u1")).await.is_err());
        assert!(store.profile_by_id("u1").await.unwrap().is_none());

        // Once the path is writable the same id inserts cleanly
        std::fs::remove_dir(tmp.path().join("users.json.tmp")).unwrap();
        assert!(store.insert_profile(profile("u1")).await.is_ok());
    }

    #[tokio::test]
    async fn snapshots_survive_reopen() {
        let tmp = tempdir().unwrap();
        {
            let store = MemoryStore::open(tmp.path()).unwrap();
            store.insert_profile(profile("u1")).await.unwrap();
            store.insert_evidence(evidence("u1", "report.pdf")).await.unwrap();
        }
        let reopened = MemoryStore::open(tmp.path()).unwrap();
        let p = reopened.profile_by_id("u1").await.unwrap().expect("profile persisted");
        assert_eq!(p.ppo_number.as_deref(), Some("PPO-1182"));
        let rows = reopened.evidences_for("u1").await.unwrap();
        assert_eq!(rows.len(), 1);

        // New rows after reopen still sort after the loaded ones
        reopened.insert_evidence(evidence("u1", "later.txt")).await.unwrap();
        let rows = reopened.evidences_for("u1").await.unwrap();
        assert_eq!(rows[0].file_name, "later.txt");
    }
}

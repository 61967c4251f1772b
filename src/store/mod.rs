//!
//! sentry_portal record store
//! --------------------------
//! The portal keeps two tables: `users` (one profile per identity subject) and
//! `evidences` (evidence file metadata). Callers talk to the `RecordStore` trait;
//! `MemoryStore` is the bundled implementation, optionally snapshotting each table
//! to JSON under a data root so a restart keeps accounts and evidence.

use async_trait::async_trait;

use crate::error::AppResult;

mod memory;
pub mod model;

pub use memory::MemoryStore;
pub use model::{AccountProfile, Criticality, EvidenceRecord, NewEvidence, Role};

/// Row-level access to the `users` and `evidences` tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a profile row. A second row for the same id is a conflict.
    async fn insert_profile(&self, profile: AccountProfile) -> AppResult<AccountProfile>;

    /// Select a single profile by primary key.
    async fn profile_by_id(&self, id: &str) -> AppResult<Option<AccountProfile>>;

    /// Insert an evidence row and return it with its assigned id and upload time.
    async fn insert_evidence(&self, evidence: NewEvidence) -> AppResult<EvidenceRecord>;

    /// All evidence rows owned by `user_id`, newest `upload_time` first.
    async fn evidences_for(&self, user_id: &str) -> AppResult<Vec<EvidenceRecord>>;
}

//!
//! Evidence registry
//! -----------------
//! Records metadata for evidence files chosen by an authenticated account and
//! lists an account's records newest-first. Only the file name, declared media
//! type and a generated content id are kept; file bytes never reach the portal.
//!
//! The content id and the criticality label are placeholders: the id is a random
//! `CID` + 9 base-36 token and the label is drawn uniformly from low/medium/high,
//! independent of the file.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{AppError, AppResult};
use crate::flight::SingleFlight;
use crate::notice::Notice;
use crate::store::{Criticality, EvidenceRecord, NewEvidence, RecordStore};

pub const UNKNOWN_MEDIA_TYPE: &str = "unknown";
pub const CID_PREFIX: &str = "CID";
pub const CID_TOKEN_LEN: usize = 9;
/// File-picker hint sent to the client. Not enforced: any file name is recorded.
pub const ACCEPT_HINT: &str = ".txt,.pdf,.docx,.jpg,.jpeg,.png,.mp4,.mp3,.eml";

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A file as described by the client's file picker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedFile {
    #[serde(alias = "file_name")]
    pub name: String,
    /// Browser-supplied type string; empty or absent becomes `"unknown"`.
    #[serde(default, alias = "file_type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

pub fn generate_cid() -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..CID_TOKEN_LEN).map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char).collect();
    format!("{CID_PREFIX}{token}")
}

pub fn random_criticality() -> Criticality {
    let i = rand::thread_rng().gen_range(0..Criticality::ALL.len());
    Criticality::ALL[i]
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record: EvidenceRecord,
    /// Listing after the post-upload refresh (the cached one when the refresh failed).
    pub evidences: Vec<EvidenceRecord>,
    pub notice: Notice,
    /// Set when the refresh after a successful insert failed.
    pub refresh_notice: Option<Notice>,
}

pub struct EvidenceRegistry {
    store: Arc<dyn RecordStore>,
    max_upload_bytes: u64,
    uploads: SingleFlight,
    /// Last good listing per account, kept when a later fetch fails.
    listings: Mutex<HashMap<String, Vec<EvidenceRecord>>>,
}

impl EvidenceRegistry {
    pub fn new(store: Arc<dyn RecordStore>, max_upload_bytes: u64) -> Self {
        Self { store, max_upload_bytes, uploads: SingleFlight::new(), listings: Mutex::new(HashMap::new()) }
    }

    pub fn is_busy(&self, account_id: &str) -> bool { self.uploads.is_active(account_id) }

    /// Drop the cached listing for an account that no longer has a session.
    pub fn forget(&self, account_id: &str) {
        self.listings.lock().remove(account_id);
    }

    pub fn cached(&self, account_id: &str) -> Vec<EvidenceRecord> {
        self.listings.lock().get(account_id).cloned().unwrap_or_default()
    }

    /// Newest-first listing for `account_id`. On failure the cached listing is left untouched.
    pub async fn fetch_evidences(&self, account_id: &str) -> AppResult<Vec<EvidenceRecord>> {
        match self.store.evidences_for(account_id).await {
            Ok(rows) => {
                self.listings.lock().insert(account_id.to_string(), rows.clone());
                Ok(rows)
            }
            Err(e) => {
                error!(account = account_id, "evidence fetch failed: {e}");
                Err(AppError::io("evidence_fetch_failed", "Failed to fetch evidences"))
            }
        }
    }

    fn check_file(&self, file: &SelectedFile) -> AppResult<()> {
        if file.name.trim().is_empty() {
            return Err(AppError::user("no_file", "Please choose a file to upload."));
        }
        if let Some(size) = file.size {
            if size > self.max_upload_bytes {
                let mb = self.max_upload_bytes / (1024 * 1024);
                return Err(AppError::user("file_too_large", format!("Maximum file size: {mb}MB")));
            }
        }
        Ok(())
    }

    /// Record one selected file for `account_id`, then refresh the listing.
    /// A second submit for the same account while one is outstanding is refused.
    pub async fn submit(&self, account_id: &str, file: Option<SelectedFile>) -> AppResult<UploadOutcome> {
        let Some(file) = file else {
            return Err(AppError::user("no_file", "Please choose a file to upload."));
        };
        self.check_file(&file)?;
        let Some(_busy) = self.uploads.try_begin(account_id) else {
            return Err(AppError::conflict("upload_in_progress", "An upload is already in progress."));
        };

        let file_type = file
            .media_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_MEDIA_TYPE)
            .to_string();
        let new = NewEvidence {
            user_id: account_id.to_string(),
            file_name: file.name.clone(),
            file_type,
            cid: generate_cid(),
            criticality: random_criticality(),
        };
        let record = self.store.insert_evidence(new).await?;
        info!(account = account_id, cid = %record.cid, criticality = record.criticality.as_str(), "evidence.recorded");

        let (evidences, refresh_notice) = match self.fetch_evidences(account_id).await {
            Ok(rows) => (rows, None),
            Err(e) => (self.cached(account_id), Some(e.notice("Error"))),
        };
        Ok(UploadOutcome {
            record,
            evidences,
            notice: Notice::info("Success", "Evidence uploaded successfully"),
            refresh_notice,
        })
    }
}

/// Notice title for a failed upload.
pub fn failure_title(err: &AppError) -> &'static str {
    match err {
        AppError::Internal { .. } => "Upload Error",
        _ => "Upload Failed",
    }
}

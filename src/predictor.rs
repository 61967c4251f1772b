//! Mock attack predictor.
//!
//! Placeholder only: outcomes are drawn at random after an artificial delay and
//! say nothing about the account's evidence. Each portal session keeps its own
//! newest-first log of results, dropped on logout.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::flight::SingleFlight;
use crate::notice::Notice;
use crate::store::Criticality;

pub const ATTACK_MESSAGES: [&str; 6] = [
    "Potential phishing attempt detected",
    "Suspicious network activity identified",
    "Malware signature found in evidence",
    "Social engineering pattern detected",
    "Data exfiltration attempt identified",
    "Unauthorized access pattern detected",
];

pub const CLEAR_MESSAGES: [&str; 5] = [
    "No threats detected in current analysis",
    "Evidence appears clean and secure",
    "No malicious patterns identified",
    "System analysis shows normal behavior",
    "No security concerns found",
];

const ID_CHARS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Found,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PredictionResult {
    pub id: String,
    pub status: PredictionStatus,
    /// Present exactly when `status` is `Found`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl PredictionResult {
    pub fn notice(&self) -> Notice {
        match (self.status, self.criticality) {
            (PredictionStatus::Found, Some(Criticality::High)) => {
                Notice::destructive("High Risk Attack Detected!", "Admin has been notified of this critical threat.")
            }
            (PredictionStatus::Found, level) => {
                let label = level.map(|c| c.label()).unwrap_or("UNKNOWN");
                Notice::destructive("Attack Detected", format!("{label} risk threat identified."))
            }
            (PredictionStatus::NotFound, _) => Notice::info("Analysis Complete", "No threats detected in current analysis."),
        }
    }
}

fn prediction_id(rng: &mut impl Rng) -> String {
    (0..ID_LEN).map(|_| ID_CHARS[rng.gen_range(0..ID_CHARS.len())] as char).collect()
}

/// Draw one outcome. Kept synchronous so the thread-local rng never crosses an await.
fn draw_outcome() -> PredictionResult {
    let mut rng = rand::thread_rng();
    let id = prediction_id(&mut rng);
    if rng.gen_bool(0.5) {
        let criticality = Criticality::ALL[rng.gen_range(0..Criticality::ALL.len())];
        let details = ATTACK_MESSAGES[rng.gen_range(0..ATTACK_MESSAGES.len())];
        PredictionResult { id, status: PredictionStatus::Found, criticality: Some(criticality), details: details.to_string(), timestamp: Utc::now() }
    } else {
        let details = CLEAR_MESSAGES[rng.gen_range(0..CLEAR_MESSAGES.len())];
        PredictionResult { id, status: PredictionStatus::NotFound, criticality: None, details: details.to_string(), timestamp: Utc::now() }
    }
}

pub struct MockPredictor {
    min_delay_ms: u64,
    max_delay_ms: u64,
    running: SingleFlight,
    logs: RwLock<HashMap<String, Vec<PredictionResult>>>,
}

impl MockPredictor {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        let (lo, hi) = if min_delay_ms <= max_delay_ms { (min_delay_ms, max_delay_ms) } else { (max_delay_ms, min_delay_ms) };
        Self { min_delay_ms: lo, max_delay_ms: hi, running: SingleFlight::new(), logs: RwLock::new(HashMap::new()) }
    }

    pub fn is_busy(&self, session_id: &str) -> bool { self.running.is_active(session_id) }

    fn delay(&self) -> Duration {
        let ms = if self.max_delay_ms == 0 { 0 } else { rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms) };
        Duration::from_millis(ms)
    }

    /// Run one mock prediction for `session_id` and prepend it to that session's log.
    pub async fn predict(&self, session_id: &str) -> AppResult<(PredictionResult, Notice)> {
        let Some(_busy) = self.running.try_begin(session_id) else {
            return Err(AppError::conflict("prediction_in_progress", "A prediction is already in progress."));
        };
        let wait = self.delay();
        debug!(session = session_id, delay_ms = wait.as_millis() as u64, "predict.start");
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        let result = draw_outcome();
        self.logs.write().entry(session_id.to_string()).or_default().insert(0, result.clone());
        info!(
            session = session_id,
            status = ?result.status,
            criticality = result.criticality.map(|c| c.as_str()).unwrap_or("-"),
            "predict.done"
        );
        let notice = result.notice();
        Ok((result, notice))
    }

    /// Newest-first results for the session.
    pub fn results(&self, session_id: &str) -> Vec<PredictionResult> {
        self.logs.read().get(session_id).cloned().unwrap_or_default()
    }

    pub fn forget(&self, session_id: &str) {
        self.logs.write().remove(session_id);
    }
}

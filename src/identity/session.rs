use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;
use tracing::debug;

use super::subject::Subject;
use crate::error::{AppError, AppResult};

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub token: SessionToken,
    pub subject: Subject,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

#[derive(Default)]
struct SessionTables {
    by_token: HashMap<SessionToken, Session>,
}

fn gen_id() -> AppResult<String> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| AppError::internal("rng_unavailable", &e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Issues and tracks bearer sessions. Cloning shares the same tables.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    tables: Arc<RwLock<SessionTables>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, tables: Arc::new(RwLock::new(SessionTables::default())) }
    }

    pub fn issue(&self, subject: Subject) -> AppResult<Session> {
        let now = Instant::now();
        let sess = Session {
            session_id: gen_id()?,
            token: gen_id()?,
            subject,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        let pruned = {
            let mut t = self.tables.write();
            let before = t.by_token.len();
            // Sessions nobody looks up again would otherwise stay forever
            t.by_token.retain(|_, s| s.expires_at > now);
            let pruned = before - t.by_token.len();
            t.by_token.insert(sess.token.clone(), sess.clone());
            pruned
        };
        debug!(subject = %sess.subject.id, sid = %sess.session_id, ttl_secs = self.ttl.as_secs(), pruned, "session.issue");
        Ok(sess)
    }

    /// Live session for `token`; expired entries are dropped on sight.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let now = Instant::now();
        {
            let t = self.tables.read();
            match t.by_token.get(token) {
                Some(s) if s.expires_at > now => return Some(s.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.revoke(token);
        None
    }

    /// Remove a single session. Returns it when it existed.
    pub fn revoke(&self, token: &str) -> Option<Session> {
        self.tables.write().by_token.remove(token)
    }
}

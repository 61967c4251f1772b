use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use super::credentials::{verify_password, PasswordHasher};
use super::events::{SessionEvent, SessionEvents};
use super::session::{Session, SessionManager};
use super::subject::Subject;
use crate::error::{AppError, AppResult};
use crate::store::{AccountProfile, RecordStore, Role};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Arbitrary profile metadata; the local provider materialises it as a `users` row.
    pub metadata: serde_json::Value,
}

/// Identity provider seam: session lookup, change notifications, sign-up/in/out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_session(&self, token: &str) -> AppResult<Option<Session>>;
    async fn sign_up(&self, req: SignUpRequest) -> AppResult<Session>;
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session>;
    async fn sign_out(&self, token: &str) -> AppResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

#[derive(Debug, Clone)]
struct Account {
    subject: Subject,
    password_hash: String,
}

/// Profile columns the provider reads out of sign-up metadata.
#[derive(Debug, Deserialize)]
struct ProfileMetadata {
    name: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    service_number: Option<String>,
    #[serde(default)]
    ppo_number: Option<String>,
    #[serde(default)]
    sponsor_service_number: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    }
}

/// In-process identity provider backed by Argon2 hashes and a `SessionManager`.
pub struct LocalIdentityProvider {
    sessions: SessionManager,
    events: SessionEvents,
    hasher: PasswordHasher,
    accounts: RwLock<HashMap<String, Account>>,
    store: Arc<dyn RecordStore>,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn RecordStore>, session_ttl: Duration) -> Self {
        Self {
            sessions: SessionManager::new(session_ttl),
            events: SessionEvents::default(),
            hasher: PasswordHasher::default(),
            accounts: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    async fn hash_blocking(&self, password: String) -> AppResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::internal("hash_task_failed", e.to_string()))?
    }

    fn start_session(&self, subject: Subject) -> AppResult<Session> {
        let session = self.sessions.issue(subject)?;
        self.events.publish(SessionEvent::SignedIn {
            session_id: session.session_id.clone(),
            subject_id: session.subject.id.clone(),
        });
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn get_session(&self, token: &str) -> AppResult<Option<Session>> {
        Ok(self.sessions.validate(token))
    }

    async fn sign_up(&self, req: SignUpRequest) -> AppResult<Session> {
        let email = normalize_email(&req.email);
        if !looks_like_email(&email) {
            return Err(AppError::provider("validation_failed", "Unable to validate email address: invalid format"));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::provider("weak_password", format!("Password should be at least {MIN_PASSWORD_LEN} characters.")));
        }
        if self.accounts.read().contains_key(&email) {
            warn!(email = %email, "auth.sign_up rejected: already registered");
            return Err(AppError::provider("user_already_exists", "User already registered"));
        }
        let meta: ProfileMetadata = serde_json::from_value(req.metadata.clone())
            .map_err(|e| {
                warn!("auth.sign_up metadata rejected: {e}");
                AppError::provider("unexpected_failure", "Database error saving new user")
            })?;

        let password_hash = self.hash_blocking(req.password).await?;
        let subject = Subject { id: uuid::Uuid::new_v4().to_string(), email: email.clone(), metadata: req.metadata };
        {
            // Re-check under the write lock: another sign-up may have raced the hash
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&email) {
                return Err(AppError::provider("user_already_exists", "User already registered"));
            }
            accounts.insert(email.clone(), Account { subject: subject.clone(), password_hash });
        }

        let profile = AccountProfile {
            id: subject.id.clone(),
            name: meta.name,
            email: email.clone(),
            role: meta.role,
            service_number: meta.service_number,
            ppo_number: meta.ppo_number,
            sponsor_service_number: meta.sponsor_service_number,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_profile(profile).await {
            self.accounts.write().remove(&email);
            warn!(email = %email, "auth.sign_up profile insert failed: {e}");
            return Err(AppError::provider("unexpected_failure", "Database error saving new user"));
        }

        let session = self.start_session(subject)?;
        info!(subject = %session.subject.id, sid = %session.session_id, "auth.sign_up");
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = normalize_email(email);
        let account = self.accounts.read().get(&email).cloned();
        let Some(account) = account else {
            warn!(email = %email, "auth.sign_in unknown account");
            return Err(AppError::provider("invalid_credentials", "Invalid login credentials"));
        };
        let hash = account.password_hash.clone();
        let pw = password.to_string();
        let ok = tokio::task::spawn_blocking(move || verify_password(&hash, &pw))
            .await
            .map_err(|e| AppError::internal("verify_task_failed", e.to_string()))?;
        if !ok {
            warn!(email = %email, "auth.sign_in bad password");
            return Err(AppError::provider("invalid_credentials", "Invalid login credentials"));
        }
        let session = self.start_session(account.subject)?;
        info!(subject = %session.subject.id, sid = %session.session_id, "auth.sign_in");
        Ok(session)
    }

    async fn sign_out(&self, token: &str) -> AppResult<()> {
        // An expired session is removed here too, but reported as missing
        let live = self.sessions.revoke(token).filter(|s| s.expires_at > Instant::now());
        let Some(session) = live else {
            return Err(AppError::auth("session_not_found", "Auth session missing!"));
        };
        self.events.publish(SessionEvent::SignedOut {
            session_id: session.session_id.clone(),
            subject_id: session.subject.id.clone(),
        });
        info!(subject = %session.subject.id, sid = %session.session_id, "auth.sign_out");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

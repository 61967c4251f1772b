//!
//! Session gate
//! ------------
//! Every protected view starts here. `SessionContext` is the shared, injected
//! "current session" context: it asks the identity provider for the session behind
//! a token and, when there is one, fetches exactly one `users` row for the subject.
//! A missing or failed profile fetch yields `profile: None`; callers must not
//! assume a profile exists.
//!
//! `ProfileWatch` keeps a view's state current for as long as the view lives: it
//! listens for session-change notifications and re-runs the same resolve step on
//! each one. Each event takes a new generation number and only the newest
//! generation may publish, so a sign-out always wins over a profile fetch that was
//! still in flight when it arrived.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::identity::{IdentityProvider, Session, SessionEvent, Subject};
use crate::store::{AccountProfile, RecordStore};

pub const LOGIN_PATH: &str = "/login";

/// What a view does when there is no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    /// Public views (landing, sign-in) render their unauthenticated form.
    Stay,
    /// Protected views send the user to sign-in.
    RedirectToLogin,
}

impl OnMissing {
    fn redirect(self) -> Option<&'static str> {
        match self {
            OnMissing::Stay => None,
            OnMissing::RedirectToLogin => Some(LOGIN_PATH),
        }
    }
}

#[derive(Debug, Clone)]
pub enum GateResult {
    Unauthenticated { redirect: Option<&'static str> },
    Authenticated { session: Session, profile: Option<AccountProfile> },
}

impl GateResult {
    pub fn view(&self) -> ViewState {
        match self {
            GateResult::Unauthenticated { redirect } => ViewState { subject: None, profile: None, redirect: *redirect },
            GateResult::Authenticated { session, profile } => ViewState {
                subject: Some(session.subject.clone()),
                profile: profile.clone(),
                redirect: None,
            },
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            GateResult::Authenticated { session, .. } => Some(session),
            GateResult::Unauthenticated { .. } => None,
        }
    }
}

/// Serializable view state pushed to watchers.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ViewState {
    pub subject: Option<Subject>,
    pub profile: Option<AccountProfile>,
    pub redirect: Option<&'static str>,
}

impl ViewState {
    pub fn is_authenticated(&self) -> bool { self.subject.is_some() }
}

#[derive(Clone)]
pub struct SessionContext {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn RecordStore>,
}

impl SessionContext {
    pub fn new(identity: Arc<dyn IdentityProvider>, store: Arc<dyn RecordStore>) -> Self {
        Self { identity, store }
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> { &self.identity }
    pub fn store(&self) -> &Arc<dyn RecordStore> { &self.store }

    /// Profile row for a subject. Errors are logged and reported as "no profile".
    pub async fn fetch_profile(&self, subject_id: &str) -> Option<AccountProfile> {
        match self.store.profile_by_id(subject_id).await {
            Ok(Some(p)) => Some(p),
            Ok(None) => {
                warn!(subject = subject_id, "gate: no users row for subject");
                None
            }
            Err(e) => {
                warn!(subject = subject_id, "gate: profile fetch failed: {e}");
                None
            }
        }
    }

    pub async fn resolve(&self, token: Option<&str>, on_missing: OnMissing) -> GateResult {
        let Some(token) = token else { return GateResult::Unauthenticated { redirect: on_missing.redirect() }; };
        let session = match self.identity.get_session(token).await {
            Ok(Some(s)) => s,
            Ok(None) => return GateResult::Unauthenticated { redirect: on_missing.redirect() },
            Err(e) => {
                warn!("gate: session lookup failed: {e}");
                return GateResult::Unauthenticated { redirect: on_missing.redirect() };
            }
        };
        let profile = self.fetch_profile(&session.subject.id).await;
        debug!(subject = %session.subject.id, has_profile = profile.is_some(), "gate.resolve");
        GateResult::Authenticated { session, profile }
    }

    /// Resolve once and keep the result current until the returned watch is dropped.
    pub async fn watch(&self, token: Option<String>, on_missing: OnMissing) -> ProfileWatch {
        // Subscribe before the first resolve so no event between the two is lost
        let events = self.identity.subscribe();
        let first = self.resolve(token.as_deref(), on_missing).await;
        let ids = first.session().map(|s| (s.session_id.clone(), s.subject.id.clone()));
        let (tx, rx) = watch::channel(first.view());
        let task = match (token, ids) {
            (Some(token), Some((session_id, subject_id))) => {
                let listener = WatchListener {
                    ctx: self.clone(),
                    token,
                    session_id,
                    subject_id,
                    on_missing,
                    tx: Arc::new(tx),
                    generation: Arc::new(Mutex::new(0)),
                };
                Some(tokio::spawn(listener.run(events)))
            }
            // Nothing to follow: this view's token names no live session
            _ => None,
        };
        ProfileWatch { rx, task }
    }
}

struct WatchListener {
    ctx: SessionContext,
    token: String,
    session_id: String,
    subject_id: String,
    on_missing: OnMissing,
    tx: Arc<watch::Sender<ViewState>>,
    generation: Arc<Mutex<u64>>,
}

impl WatchListener {
    fn concerns_me(&self, ev: &SessionEvent) -> bool {
        ev.session_id() == self.session_id || ev.subject_id() == self.subject_id
    }

    fn next_generation(&self) -> u64 {
        let mut g = self.generation.lock();
        *g += 1;
        *g
    }

    fn refetch(&self, generation: u64) {
        let ctx = self.ctx.clone();
        let token = self.token.clone();
        let on_missing = self.on_missing;
        let tx = self.tx.clone();
        let latest = self.generation.clone();
        tokio::spawn(async move {
            let state = ctx.resolve(Some(&token), on_missing).await.view();
            let g = latest.lock();
            if *g == generation {
                tx.send_replace(state);
            } else {
                debug!(generation, latest = *g, "gate.watch: stale fetch discarded");
            }
        });
    }

    async fn run(self, mut events: broadcast::Receiver<SessionEvent>) {
        loop {
            match events.recv().await {
                Ok(ev) if self.concerns_me(&ev) => {
                    let generation = self.next_generation();
                    match &ev {
                        SessionEvent::SignedOut { session_id, .. } if *session_id == self.session_id => {
                            // Clear right away; an in-flight fetch now holds a stale generation
                            let g = self.generation.lock();
                            if *g == generation {
                                self.tx.send_replace(ViewState { subject: None, profile: None, redirect: Some(LOGIN_PATH) });
                            }
                        }
                        _ => self.refetch(generation),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "gate.watch lagged; refetching");
                    let generation = self.next_generation();
                    self.refetch(generation);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Live view state for one view. Dropping it unsubscribes.
pub struct ProfileWatch {
    rx: watch::Receiver<ViewState>,
    task: Option<JoinHandle<()>>,
}

impl ProfileWatch {
    pub fn current(&self) -> ViewState { self.rx.borrow().clone() }

    /// Wait for the next published state. `None` once the listener is gone.
    pub async fn changed(&mut self) -> Option<ViewState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn is_following(&self) -> bool { self.task.is_some() }
}

impl Drop for ProfileWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() { task.abort(); }
    }
}

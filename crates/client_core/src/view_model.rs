//! Session tracker and bookmark list controller.
//!
//! Remote failures never escape this module: a failed identity lookup reads
//! as "signed out", a failed fetch as an empty list, and insert/delete
//! failures are only logged.

use std::sync::Arc;

use shared::{
    domain::{BookmarkId, OAuthProvider},
    protocol::{AuthChangeEvent, AuthChangeKind, Bookmark, Identity, NewBookmark},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{validate_bookmark_url, BackendResult, ValidationError},
    AuthBackend, BookmarkTable,
};

const VIEW_EVENT_CAPACITY: usize = 256;

/// Everything a renderer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub identity: Option<Identity>,
    pub title: String,
    pub url: String,
    pub bookmarks: Vec<Bookmark>,
}

impl ViewState {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum ViewEvent {
    StateChanged(ViewState),
    /// Blocking user-facing message; the view state is left untouched.
    Alert(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Title or url was empty.
    Skipped,
    Rejected(ValidationError),
    SignedOut,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { count: usize },
    /// A later fetch or an auth change overtook this one.
    Discarded,
}

struct ViewModelState {
    view: ViewState,
    next_fetch_generation: u64,
    applied_fetch_generation: u64,
    auth_epoch: u64,
}

pub struct BookmarkViewModel {
    auth: Arc<dyn AuthBackend>,
    table: Arc<dyn BookmarkTable>,
    inner: Mutex<ViewModelState>,
    events: broadcast::Sender<ViewEvent>,
}

impl BookmarkViewModel {
    pub fn new(auth: Arc<dyn AuthBackend>, table: Arc<dyn BookmarkTable>) -> Arc<Self> {
        let (events, _) = broadcast::channel(VIEW_EVENT_CAPACITY);
        Arc::new(Self {
            auth,
            table,
            inner: Mutex::new(ViewModelState {
                view: ViewState::default(),
                next_fetch_generation: 0,
                applied_fetch_generation: 0,
                auth_epoch: 0,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ViewState {
        self.inner.lock().await.view.clone()
    }

    /// Loads the current identity, refreshes the list when signed in, and
    /// follows auth changes until the returned tracker is dropped.
    pub async fn start(self: &Arc<Self>) -> SessionTracker {
        // Subscribe before the lookup so a change racing it is not lost.
        let mut changes = self.auth.subscribe_auth_changes();

        let identity = match self.auth.current_user().await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(error = %err, "session: current user lookup failed; treating as signed out");
                None
            }
        };
        let missed = drain_missed_changes(&mut changes, identity.as_ref());
        let signed_in = identity.is_some();
        self.replace_identity(identity).await;
        if signed_in {
            self.fetch().await;
        }
        if let Some(event) = missed {
            self.handle_auth_change(event).await;
        }

        let view_model = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => view_model.handle_auth_change(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session: auth change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("session: auth change stream closed");
        });

        SessionTracker { task: Some(task) }
    }

    pub async fn handle_auth_change(&self, event: AuthChangeEvent) {
        let identity = event.identity().cloned();
        info!(
            kind = ?event.kind,
            signed_in = identity.is_some(),
            "session: auth state changed"
        );
        let signed_in = identity.is_some();
        self.replace_identity(identity).await;
        if signed_in {
            self.fetch().await;
        }
    }

    async fn replace_identity(&self, identity: Option<Identity>) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.auth_epoch += 1;
            if identity.is_none() {
                guard.view.bookmarks.clear();
            }
            guard.view.identity = identity;
            guard.view.clone()
        };
        let _ = self.events.send(ViewEvent::StateChanged(snapshot));
    }

    /// Replaces the list with whatever the backend returns now.
    ///
    /// Results are applied only if no later-started fetch has been applied
    /// and the identity has not changed since this fetch started.
    pub async fn fetch(&self) -> FetchOutcome {
        let (generation, auth_epoch) = {
            let mut guard = self.inner.lock().await;
            guard.next_fetch_generation += 1;
            (guard.next_fetch_generation, guard.auth_epoch)
        };

        let bookmarks = match self.table.select_all().await {
            Ok(Some(rows)) => rows,
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(error = %err, generation, "bookmarks: fetch failed; showing empty list");
                Vec::new()
            }
        };

        let snapshot = {
            let mut guard = self.inner.lock().await;
            if guard.auth_epoch != auth_epoch || generation <= guard.applied_fetch_generation {
                debug!(
                    generation,
                    applied = guard.applied_fetch_generation,
                    "bookmarks: discarding stale fetch result"
                );
                return FetchOutcome::Discarded;
            }
            guard.applied_fetch_generation = generation;
            guard.view.bookmarks = bookmarks;
            guard.view.clone()
        };

        let count = snapshot.bookmarks.len();
        info!(bookmark_count = count, generation, "bookmarks: list refreshed");
        let _ = self.events.send(ViewEvent::StateChanged(snapshot));
        FetchOutcome::Applied { count }
    }

    pub async fn set_title(&self, title: impl Into<String>) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.view.title = title.into();
            guard.view.clone()
        };
        let _ = self.events.send(ViewEvent::StateChanged(snapshot));
    }

    pub async fn set_url(&self, url: impl Into<String>) {
        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.view.url = url.into();
            guard.view.clone()
        };
        let _ = self.events.send(ViewEvent::StateChanged(snapshot));
    }

    /// Fills both input fields and submits them.
    pub async fn add(&self, title: impl Into<String>, url: impl Into<String>) -> AddOutcome {
        {
            let mut guard = self.inner.lock().await;
            guard.view.title = title.into();
            guard.view.url = url.into();
        }
        self.add_bookmark().await
    }

    /// Submits the current title/url inputs.
    pub async fn add_bookmark(&self) -> AddOutcome {
        let (title, url, identity) = {
            let guard = self.inner.lock().await;
            (
                guard.view.title.clone(),
                guard.view.url.clone(),
                guard.view.identity.clone(),
            )
        };

        if title.is_empty() || url.is_empty() {
            return AddOutcome::Skipped;
        }

        if let Err(err) = validate_bookmark_url(&url) {
            let _ = self.events.send(ViewEvent::Alert(err.to_string()));
            return AddOutcome::Rejected(err);
        }

        let Some(identity) = identity else {
            warn!("bookmarks: add requested while signed out; ignoring");
            return AddOutcome::SignedOut;
        };

        let row = NewBookmark {
            title,
            url,
            user_id: identity.id,
        };
        if let Err(err) = self.table.insert(row).await {
            warn!(error = %err, user_id = %identity.id, "bookmarks: insert failed");
        }

        let snapshot = {
            let mut guard = self.inner.lock().await;
            guard.view.title.clear();
            guard.view.url.clear();
            guard.view.clone()
        };
        let _ = self.events.send(ViewEvent::StateChanged(snapshot));

        self.fetch().await;
        AddOutcome::Submitted
    }

    pub async fn delete(&self, id: BookmarkId) {
        if let Err(err) = self.table.delete(id).await {
            warn!(error = %err, bookmark_id = %id, "bookmarks: delete failed");
        }
        self.fetch().await;
    }

    pub async fn sign_in(&self, provider: OAuthProvider) -> BackendResult<Url> {
        let url = self.auth.sign_in_with_oauth(provider).await?;
        info!(%provider, "session: oauth sign-in started");
        Ok(url)
    }

    /// The list is cleared by the resulting auth change, not here.
    pub async fn sign_out(&self) -> BackendResult<()> {
        self.auth.sign_out().await
    }
}

/// Consumes changes queued while the startup lookup ran and returns the last
/// one that still matters. A token refresh for the identity just loaded is
/// the lookup's own doing and is dropped.
fn drain_missed_changes(
    changes: &mut broadcast::Receiver<AuthChangeEvent>,
    loaded: Option<&Identity>,
) -> Option<AuthChangeEvent> {
    let mut missed = None;
    loop {
        match changes.try_recv() {
            Ok(event) => {
                let echo =
                    event.kind == AuthChangeKind::TokenRefreshed && event.identity() == loaded;
                if !echo {
                    missed = Some(event);
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "session: auth change stream lagged during startup");
            }
            Err(_) => return missed,
        }
    }
}

/// Auth change subscription; aborts the listener on drop.
pub struct SessionTracker {
    task: Option<JoinHandle<()>>,
}

impl SessionTracker {
    pub fn unsubscribe(mut self) {
        self.abort();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
#[path = "tests/view_model_tests.rs"]
mod tests;

//! Bookmark client core: backend seams, the Supabase HTTP backend and the
//! view-model that mirrors session and bookmark state for a renderer.

use async_trait::async_trait;
use shared::{
    domain::{BookmarkId, OAuthProvider},
    protocol::{AuthChangeEvent, Bookmark, Identity, NewBookmark},
};
use tokio::sync::broadcast;
use url::Url;

pub mod config;
pub mod error;
pub mod session_store;
pub mod supabase;
pub mod view_model;

pub use error::{validate_bookmark_url, BackendError, BackendResult, ValidationError};
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use supabase::SupabaseClient;
pub use view_model::{
    AddOutcome, BookmarkViewModel, FetchOutcome, SessionTracker, ViewEvent, ViewState,
};

/// Auth half of the hosted backend.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Identity of the persisted session, if any.
    async fn current_user(&self) -> BackendResult<Option<Identity>>;
    /// Fires on sign-in, sign-out and token refresh.
    fn subscribe_auth_changes(&self) -> broadcast::Receiver<AuthChangeEvent>;
    /// Returns the provider authorize URL the user must open; completion
    /// happens out of process.
    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> BackendResult<Url>;
    async fn sign_out(&self) -> BackendResult<()>;
}

/// The `bookmarks` table, scoped to the caller by the backend's row policy.
#[async_trait]
pub trait BookmarkTable: Send + Sync {
    /// All visible rows, newest first. `None` when the backend answers null.
    async fn select_all(&self) -> BackendResult<Option<Vec<Bookmark>>>;
    async fn insert(&self, row: NewBookmark) -> BackendResult<()>;
    async fn delete(&self, id: BookmarkId) -> BackendResult<()>;
}

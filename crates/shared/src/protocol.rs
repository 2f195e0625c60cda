use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BookmarkId, UserId};

/// Authenticated user as reported by the auth service. Only the fields the
/// client renders are kept; everything else in the payload is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// A row of the `bookmarks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub title: String,
    pub url: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the `bookmarks` table; id and created_at are assigned
/// by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Sessions expiring within `leeway_secs` count as expired so a token is
    /// never sent right as it lapses.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_sub(leeway_secs) <= now.timestamp(),
            None => false,
        }
    }
}

/// Token grant response from the auth service (`/token`).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

impl TokenResponse {
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| {
                self.expires_in
                    .map(|secs| now.timestamp().saturating_add(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChangeEvent {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

impl AuthChangeEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthChangeKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthChangeKind::SignedOut,
            session: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|session| &session.user)
    }
}

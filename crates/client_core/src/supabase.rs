//! HTTP client for a Supabase-style backend: the auth API under `/auth/v1`
//! and the data API under `/rest/v1`.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use shared::{
    domain::{BookmarkId, OAuthProvider},
    error::ApiError,
    protocol::{
        AuthChangeEvent, AuthChangeKind, Bookmark, Identity, NewBookmark, Session, TokenResponse,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::Settings,
    error::{BackendError, BackendResult},
    session_store::SessionStore,
    AuthBackend, BookmarkTable,
};

pub const BOOKMARKS_TABLE: &str = "bookmarks";
const AUTH_EVENT_CAPACITY: usize = 64;

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

pub struct SupabaseClient {
    http: Client,
    base_url: String,
    anon_key: String,
    redirect_url: Option<String>,
    refresh_leeway_secs: i64,
    store: Arc<dyn SessionStore>,
    session: Mutex<Option<Session>>,
    /// Held for the whole refresh round trip so a refresh token is spent once.
    refresh_lock: Mutex<()>,
    auth_events: broadcast::Sender<AuthChangeEvent>,
}

impl SupabaseClient {
    pub fn new(settings: &Settings, store: Arc<dyn SessionStore>) -> BackendResult<Self> {
        // Validates the base url once so later joins cannot fail on it.
        Url::parse(&settings.supabase_url)?;
        let session = store.load()?;
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self {
            http: Client::new(),
            base_url: settings.supabase_url.trim_end_matches('/').to_string(),
            anon_key: settings.supabase_anon_key.clone(),
            redirect_url: settings.redirect_url.clone(),
            refresh_leeway_secs: settings.refresh_leeway_secs,
            store,
            session: Mutex::new(session),
            refresh_lock: Mutex::new(()),
            auth_events,
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn with_headers(&self, request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(&self.anon_key))
    }

    fn emit(&self, event: AuthChangeEvent) {
        let _ = self.auth_events.send(event);
    }

    /// The stored session, refreshed first when it is about to expire.
    pub async fn active_session(&self) -> BackendResult<Option<Session>> {
        let current = self.session.lock().await.clone();
        match current {
            Some(session) if session.is_expired(Utc::now(), self.refresh_leeway_secs) => {
                let _refreshing = self.refresh_lock.lock().await;
                // Another caller may have refreshed while this one waited.
                let latest = self.session.lock().await.clone();
                match latest {
                    Some(latest) if latest.is_expired(Utc::now(), self.refresh_leeway_secs) => {
                        self.refresh_session(&latest).await.map(Some)
                    }
                    other => Ok(other),
                }
            }
            other => Ok(other),
        }
    }

    async fn access_token(&self) -> BackendResult<Option<String>> {
        Ok(self
            .active_session()
            .await?
            .map(|session| session.access_token))
    }

    /// Exchanges the session's refresh token; callers hold `refresh_lock`.
    async fn refresh_session(&self, session: &Session) -> BackendResult<Session> {
        let response = self
            .with_headers(self.http.post(self.auth_url("token")), None)
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshTokenRequest {
                refresh_token: &session.refresh_token,
            })
            .send()
            .await;

        let refreshed = match response {
            Ok(response) => match check_status(response).await {
                Ok(response) => response
                    .json::<TokenResponse>()
                    .await
                    .map_err(BackendError::from),
                Err(err) => Err(err),
            },
            Err(err) => Err(BackendError::from(err)),
        };

        match refreshed {
            Ok(token) => {
                let session = token.into_session(Utc::now());
                *self.session.lock().await = Some(session.clone());
                if let Err(err) = self.store.save(&session) {
                    warn!(error = %err, "session: failed to persist refreshed session");
                }
                info!(user_id = %session.user.id, "session: access token refreshed");
                self.emit(AuthChangeEvent {
                    kind: AuthChangeKind::TokenRefreshed,
                    session: Some(session.clone()),
                });
                Ok(session)
            }
            Err(err) => {
                let dropped = {
                    let mut current = self.session.lock().await;
                    let still_current = current
                        .as_ref()
                        .is_some_and(|held| held.refresh_token == session.refresh_token);
                    if still_current {
                        current.take();
                    }
                    still_current
                };
                if dropped {
                    warn!(error = %err, "session: refresh failed; dropping session");
                    if let Err(clear_err) = self.store.clear() {
                        warn!(error = %clear_err, "session: failed to remove stored session");
                    }
                    self.emit(AuthChangeEvent::signed_out());
                } else {
                    warn!(error = %err, "session: refresh failed for a session already replaced");
                }
                Err(err)
            }
        }
    }

    async fn fetch_user(&self, access_token: &str) -> BackendResult<Identity> {
        let response = self
            .with_headers(self.http.get(self.auth_url("user")), Some(access_token))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Finishes an OAuth sign-in from the URL the provider redirected to.
    pub async fn complete_oauth(&self, callback_url: &str) -> BackendResult<Session> {
        let params = parse_callback_params(callback_url)?;
        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| error.clone());
            return Err(BackendError::OAuthCallback(description));
        }

        let access_token = params
            .get("access_token")
            .cloned()
            .ok_or_else(|| BackendError::OAuthCallback("missing access_token".into()))?;
        let refresh_token = params
            .get("refresh_token")
            .cloned()
            .ok_or_else(|| BackendError::OAuthCallback("missing refresh_token".into()))?;
        let now = Utc::now().timestamp();
        let expires_at = params
            .get("expires_at")
            .and_then(|v| v.parse::<i64>().ok())
            .or_else(|| {
                params
                    .get("expires_in")
                    .and_then(|v| v.parse::<i64>().ok())
                    .map(|secs| now.saturating_add(secs))
            });
        let token_type = params
            .get("token_type")
            .cloned()
            .unwrap_or_else(|| "bearer".to_string());

        let user = self.fetch_user(&access_token).await?;
        let session = Session {
            access_token,
            refresh_token,
            token_type,
            expires_at,
            user,
        };

        self.store.save(&session)?;
        *self.session.lock().await = Some(session.clone());
        info!(user_id = %session.user.id, "session: oauth sign-in completed");
        self.emit(AuthChangeEvent::signed_in(session.clone()));
        Ok(session)
    }
}

/// Tokens come back in the fragment; errors may come back in the query.
fn parse_callback_params(callback_url: &str) -> BackendResult<HashMap<String, String>> {
    let url = Url::parse(callback_url.trim())?;
    let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
    }
    Ok(params)
}

async fn check_status(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        error: ApiError::from_response_body(status.as_u16(), &body),
    })
}

#[async_trait]
impl AuthBackend for SupabaseClient {
    async fn current_user(&self) -> BackendResult<Option<Identity>> {
        let Some(access_token) = self.access_token().await? else {
            return Ok(None);
        };
        self.fetch_user(&access_token).await.map(Some)
    }

    fn subscribe_auth_changes(&self) -> broadcast::Receiver<AuthChangeEvent> {
        self.auth_events.subscribe()
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> BackendResult<Url> {
        let mut url = Url::parse(&self.auth_url("authorize"))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider.as_str());
            if let Some(redirect_url) = &self.redirect_url {
                query.append_pair("redirect_to", redirect_url);
            }
        }
        Ok(url)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            let result = self
                .with_headers(
                    self.http.post(self.auth_url("logout")),
                    Some(&session.access_token),
                )
                .send()
                .await;
            match result {
                Ok(response) => {
                    if let Err(err) = check_status(response).await {
                        warn!(error = %err, "session: remote sign-out rejected");
                    }
                }
                Err(err) => warn!(error = %err, "session: remote sign-out failed"),
            }
            info!(user_id = %session.user.id, "session: signed out");
        }
        let cleared = self.store.clear();
        self.emit(AuthChangeEvent::signed_out());
        cleared?;
        Ok(())
    }
}

#[async_trait]
impl BookmarkTable for SupabaseClient {
    async fn select_all(&self) -> BackendResult<Option<Vec<Bookmark>>> {
        let access_token = self.access_token().await?;
        let response = self
            .with_headers(
                self.http.get(self.table_url(BOOKMARKS_TABLE)),
                access_token.as_deref(),
            )
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn insert(&self, row: NewBookmark) -> BackendResult<()> {
        let access_token = self.access_token().await?;
        let response = self
            .with_headers(
                self.http.post(self.table_url(BOOKMARKS_TABLE)),
                access_token.as_deref(),
            )
            .header("Prefer", "return=minimal")
            .json(&[row])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, id: BookmarkId) -> BackendResult<()> {
        let access_token = self.access_token().await?;
        let response = self
            .with_headers(
                self.http.delete(self.table_url(BOOKMARKS_TABLE)),
                access_token.as_deref(),
            )
            .query(&[("id", format!("eq.{id}"))])
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/supabase_tests.rs"]
mod tests;

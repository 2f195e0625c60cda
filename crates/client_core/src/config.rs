use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::OAuthProvider;

pub const DEFAULT_SETTINGS_FILE: &str = "bookmarks.toml";
const SESSION_FILE_NAME: &str = "session.json";
const APP_DIR_NAME: &str = "bookmarks";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redirect_url: Option<String>,
    pub oauth_provider: OAuthProvider,
    pub session_path: PathBuf,
    /// Seconds before expiry at which the access token is refreshed.
    pub refresh_leeway_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            supabase_url: "http://127.0.0.1:54321".into(),
            supabase_anon_key: String::new(),
            redirect_url: None,
            oauth_provider: OAuthProvider::Google,
            session_path: default_session_path(),
            refresh_leeway_secs: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    redirect_url: Option<String>,
    oauth_provider: Option<String>,
    session_path: Option<PathBuf>,
    refresh_leeway_secs: Option<i64>,
}

pub fn default_session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(SESSION_FILE_NAME)
}

/// Defaults, then the settings file (if present), then the environment.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let explicit = path.is_some();
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
    match fs::read_to_string(path) {
        Ok(raw) => apply_file_settings(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?,
        Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.supabase_url = normalize_base_url(&settings.supabase_url);
    Ok(settings)
}

fn apply_file_settings(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.supabase_url {
        settings.supabase_url = v;
    }
    if let Some(v) = file_cfg.supabase_anon_key {
        settings.supabase_anon_key = v;
    }
    if let Some(v) = file_cfg.redirect_url {
        settings.redirect_url = Some(v);
    }
    if let Some(v) = file_cfg.oauth_provider {
        settings.oauth_provider = v.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = file_cfg.session_path {
        settings.session_path = v;
    }
    if let Some(v) = file_cfg.refresh_leeway_secs {
        settings.refresh_leeway_secs = v;
    }
    Ok(())
}

/// `APP__*` names win over the plain ones when both are set.
fn apply_env_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let get = |plain: &str, prefixed: &str| lookup(prefixed).or_else(|| lookup(plain));

    if let Some(v) = get("SUPABASE_URL", "APP__SUPABASE_URL") {
        settings.supabase_url = v;
    }
    if let Some(v) = get("SUPABASE_ANON_KEY", "APP__SUPABASE_ANON_KEY") {
        settings.supabase_anon_key = v;
    }
    if let Some(v) = get("BOOKMARKS_REDIRECT_URL", "APP__REDIRECT_URL") {
        settings.redirect_url = Some(v);
    }
    if let Some(v) = get("BOOKMARKS_OAUTH_PROVIDER", "APP__OAUTH_PROVIDER") {
        settings.oauth_provider = v.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(v) = get("BOOKMARKS_SESSION_PATH", "APP__SESSION_PATH") {
        settings.session_path = PathBuf::from(v);
    }
    if let Some(v) = get("BOOKMARKS_REFRESH_LEEWAY_SECS", "APP__REFRESH_LEEWAY_SECS") {
        match v.parse::<i64>() {
            Ok(parsed) if parsed >= 0 => settings.refresh_leeway_secs = parsed,
            _ => bail!("refresh leeway must be a non-negative integer, got '{v}'"),
        }
    }
    Ok(())
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

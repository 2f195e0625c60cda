use std::{
    fs, io,
    path::PathBuf,
    sync::Mutex,
};

use shared::protocol::Session;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session file {path} is not accessible: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where the backend client keeps its session between runs.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, SessionStoreError>;
    fn save(&self, session: &Session) -> Result<(), SessionStoreError>;
    fn clear(&self) -> Result<(), SessionStoreError>;
}

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "session: ignoring unreadable session file"
                );
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
            }
        }
        let raw = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, raw).map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;

//! # Credentials
//!
//! The access credential is appended to the socket URL and is read again on
//! every connection attempt, so a token rotated by another process is picked
//! up without restarting the client.
//!
//! ## Contained Modules:
//!
//! - **`refresh`** (feature `refresh`): exchanges a refresh token for a new
//!   access token over HTTP after the server rejects the current one.

/// HTTP refresh-token exchange.
#[cfg(feature = "refresh")]
pub mod refresh;

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

#[cfg(feature = "refresh")]
pub use refresh::RefreshClient;

/// Where the access credential is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Connect without a credential.
    None,
    Static(String),
    /// A file holding the token; surrounding whitespace is ignored.
    File(PathBuf),
    /// An environment variable, read on every attempt.
    Env(String),
}

pub struct CredentialStore {
    source: CredentialSource,
    // Refreshed token for sources that cannot be written back.
    replaced: Mutex<Option<String>>,
    #[cfg(feature = "refresh")]
    refresher: Option<RefreshClient>,
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl CredentialStore {
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            replaced: Mutex::new(None),
            #[cfg(feature = "refresh")]
            refresher: None,
        }
    }

    /// Attaches an HTTP refresh client used by [`CredentialStore::refresh`].
    #[cfg(feature = "refresh")]
    pub fn with_refresh(mut self, client: RefreshClient) -> Self {
        self.refresher = Some(client);
        self
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// The credential to use for the next attempt.
    pub fn current(&self) -> Option<String> {
        if let Some(token) = self.replaced.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Some(token);
        }
        match &self.source {
            CredentialSource::None => None,
            CredentialSource::Static(token) => non_empty(token),
            CredentialSource::File(path) => match fs::read_to_string(path) {
                Ok(raw) => non_empty(&raw),
                Err(e) => {
                    if e.kind() != ErrorKind::NotFound {
                        log::warn!("Cannot read credential file {}: {}", path.display(), e);
                    }
                    None
                }
            },
            CredentialSource::Env(var) => std::env::var(var).ok().and_then(|v| non_empty(&v)),
        }
    }

    /// Called after the server rejected the credential. Exchanges the refresh
    /// token when a refresh client is attached, otherwise just re-reads the
    /// source. Returns the credential for the next attempt.
    pub async fn refresh(&self) -> Result<Option<String>> {
        if let Some(token) = self.exchange().await? {
            self.store(&token)?;
            return Ok(Some(token));
        }
        Ok(self.current())
    }

    #[cfg(feature = "refresh")]
    async fn exchange(&self) -> Result<Option<String>> {
        match &self.refresher {
            Some(client) => client.exchange().await.map(Some),
            None => Ok(None),
        }
    }

    #[cfg(not(feature = "refresh"))]
    async fn exchange(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn store(&self, token: &str) -> Result<()> {
        match &self.source {
            CredentialSource::File(path) => {
                fs::write(path, token)?;
                *self.replaced.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
            _ => {
                *self.replaced.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
            }
        }
        Ok(())
    }

    /// Forgets the credential: refreshed tokens are dropped and a credential
    /// file is deleted.
    pub fn purge(&self) -> Result<()> {
        *self.replaced.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if let CredentialSource::File(path) = &self.source {
            match fs::remove_file(path) {
                Ok(()) => log::info!("Credential file {} removed", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

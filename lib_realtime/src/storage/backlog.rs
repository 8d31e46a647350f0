use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::core::queue::OutboundMessage;
use crate::error::Result;

/// Storage key of the persisted backlog.
pub const BACKLOG_KEY: &str = "ws_message_queue";

/// Where the outbound backlog lives between runs.
pub trait BacklogStore: Send + Sync {
    /// The stored backlog; empty when nothing was saved.
    fn load(&self) -> Result<Vec<OutboundMessage>>;
    /// Replaces the stored backlog.
    fn save(&self, messages: &[OutboundMessage]) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// `<dir>/ws_message_queue.json`, written through a temp file and renamed so
/// a crash never leaves a truncated backlog.
#[derive(Debug, Clone)]
pub struct FileBacklogStore {
    path: PathBuf,
}

impl FileBacklogStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{BACKLOG_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BacklogStore for FileBacklogStore {
    fn load(&self) -> Result<Vec<OutboundMessage>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                // A corrupt backlog must not block startup.
                log::warn!("Discarding unreadable backlog {}: {}", self.path.display(), e);
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, messages: &[OutboundMessage]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(messages)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, for tests and for clients that opt out of disk writes.
#[derive(Debug, Default)]
pub struct MemoryBacklogStore {
    slot: Mutex<Option<String>>,
}

impl MemoryBacklogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored JSON, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl BacklogStore for MemoryBacklogStore {
    fn load(&self) -> Result<Vec<OutboundMessage>> {
        match self.raw() {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, messages: &[OutboundMessage]) -> Result<()> {
        let raw = serde_json::to_string(messages)?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

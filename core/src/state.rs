//! Cross-phase persisted state.
//!
//! The launch and cleanup invocations share no memory; the only values that
//! cross the process boundary are a few strings written here. Absent keys are
//! always a valid state — cleanup degrades to a no-op per missing resource.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

/// Key for the opaque SSM session identifier.
pub const STATE_SESSION_ID: &str = "session-id";
/// Key for the region the session was started in.
pub const STATE_REGION: &str = "aws-region";
/// Key for the pid of the detached plugin process.
pub const STATE_PLUGIN_PID: &str = "plugin-pid";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write state to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Narrow key-value port shared by both phases.
pub trait StateChannel: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StateError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StateError>;
}

/// Flat JSON object persisted at a fixed path.
pub struct FileStateChannel {
    path: PathBuf,
}

impl FileStateChannel {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A missing file is an empty store, not an error.
    fn load(&self) -> Result<BTreeMap<String, String>, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|err| StateError::Malformed {
            path: self.path.clone(),
            source: err,
        })
    }
}

impl StateChannel for FileStateChannel {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        let serialized =
            serde_json::to_string_pretty(&entries).map_err(|err| StateError::Write {
                path: self.path.clone(),
                source: io::Error::other(err),
            })?;
        // Write-then-rename so a crash mid-write cannot corrupt existing state.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialized)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|err| StateError::Write {
                path: self.path.clone(),
                source: err,
            })
    }
}

/// In-memory test double.
#[derive(Default)]
pub struct MemoryStateChannel {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStateChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StateChannel for MemoryStateChannel {
    fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

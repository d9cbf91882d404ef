//! Persistent storage slot for the session token
//!
//! A small key→string store shared by the sign-in flow and the validity
//! monitor. Writes through `set`/`remove` publish a `Local` event so the
//! monitor reacts immediately. `FileStorage` additionally watches its file
//! and publishes `External` events when another process changes it.

use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Key holding the bearer token
pub const TOKEN_KEY: &str = "token";

/// Key holding the cached user profile
pub const USER_KEY: &str = "user";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Where a storage mutation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOrigin {
    /// Written through this storage handle
    Local,
    /// Written by another process sharing the same backing store
    External,
}

/// Notification that the slot changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed, when known
    pub key: Option<String>,
    pub origin: StorageOrigin,
}

/// Key→string store with change notifications
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store a value and publish a `Local` event
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Returns whether it existed; a missing key is not an error.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Receive change events from now on
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

fn publish(events: &broadcast::Sender<StorageEvent>, key: Option<&str>, origin: StorageOrigin) {
    // No subscribers is fine
    let _ = events.send(StorageEvent {
        key: key.map(str::to_string),
        origin,
    });
}

/// Process-local storage
#[derive(Debug)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: DashMap::new(),
            events,
        }
    }

    /// Write without publishing an event, as an out-of-band mutation would.
    /// Only the monitor's poll notices these.
    pub fn set_unobserved(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        publish(&self.events, Some(key), StorageOrigin::Local);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            publish(&self.events, Some(key), StorageOrigin::Local);
        }
        Ok(existed)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

/// Storage backed by a JSON object on disk
///
/// Every read goes to the file so changes made by other processes are seen
/// immediately. Writes replace the file atomically (write temp, rename).
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles and remembers the last contents
    /// this handle wrote, so the watcher can tell our writes from others'.
    last_written: Arc<Mutex<Option<String>>>,
    events: broadcast::Sender<StorageEvent>,
    _watcher: Option<RecommendedWatcher>,
}

impl FileStorage {
    /// Open storage at `path` and watch it for external changes
    ///
    /// The file need not exist yet; its parent directory must. The path is
    /// made absolute so it matches what the watcher reports.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path: PathBuf = path.into();
        let mut storage = Self::unwatched(absolute(&path)?);
        storage._watcher = Some(storage.start_watcher()?);
        info!("Watching token storage at {:?}", storage.path);
        Ok(storage)
    }

    /// Open storage without a file watcher (no `External` events)
    pub fn unwatched(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        // Current contents count as seen, so only later changes are external
        let seen = std::fs::read_to_string(&path).ok();
        Self {
            path,
            last_written: Arc::new(Mutex::new(seen)),
            events,
            _watcher: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_watcher(&self) -> Result<RecommendedWatcher, StorageError> {
        let path = self.path.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let last_written = self.last_written.clone();
        let events = self.events.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) || !event
                        .paths
                        .iter()
                        .any(|p| file_name.is_some() && p.file_name() == file_name.as_deref())
                    {
                        return;
                    }

                    let current = std::fs::read_to_string(&path).ok();
                    let mut last = last_written.lock().unwrap_or_else(PoisonError::into_inner);
                    if *last == current {
                        return;
                    }
                    *last = current;
                    drop(last);

                    debug!("Token storage changed externally: {:?}", event.kind);
                    publish(&events, None, StorageOrigin::External);
                }
                Err(e) => error!("Token storage watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        // Watch the directory: atomic renames replace the file's inode
        watcher.watch(parent_dir(&self.path), RecursiveMode::NonRecursive)?;

        Ok(watcher)
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(
        &self,
        entries: &BTreeMap<String, String>,
        last: &mut Option<String>,
    ) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &contents)?;
        std::fs::rename(&tmp, &self.path)?;
        *last = Some(contents);
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Resolve the parent directory and re-attach the file name
fn absolute(path: &Path) -> Result<PathBuf, StorageError> {
    let dir = std::fs::canonicalize(parent_dir(path))?;
    match path.file_name() {
        Some(name) => Ok(dir.join(name)),
        None => Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("storage path {:?} has no file name", path),
        ))),
    }
}

impl TokenStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut last = self
            .last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries, &mut last)?;
        drop(last);

        publish(&self.events, Some(key), StorageOrigin::Local);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut last = self
            .last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write_entries(&entries, &mut last)?;
        drop(last);

        publish(&self.events, Some(key), StorageOrigin::Local);
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

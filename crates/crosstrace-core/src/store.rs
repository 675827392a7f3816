//! Durable key/value storage for identity and experiment state.
//!
//! The reconciler and the experiment engine never talk to the host
//! environment directly; they hold an injected [`IdentityStore`] capability.
//! The store is a dumb key/value map with per-entry expiry — all merge
//! policy lives in the callers.
//!
//! Every operation is total. A store that cannot reach its backing medium
//! degrades to a no-op (detected once at construction, cached) and reports
//! `is_available() == false` so callers can pick their documented fallback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Durable key/value store with per-entry expiry.
///
/// Implementations must be total: failures degrade to no-ops (with a
/// `tracing` event), never panics or errors.
pub trait IdentityStore {
    /// Load the value stored under `key`, if present and not expired.
    fn load(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for at most `ttl`.
    fn save(&self, key: &str, value: &str, ttl: Duration);

    /// Remove the entry under `key`, if any.
    fn remove(&self, key: &str);

    /// Whether the backing medium is usable. Checked by callers that need
    /// a deterministic fallback when nothing can be persisted.
    fn is_available(&self) -> bool {
        true
    }
}

/// Shared handle to a store. The library runs inside one single-threaded
/// event loop, so `Rc` is the right ownership model here.
pub type SharedStore = Rc<dyn IdentityStore>;

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store backed by a map. State does not survive the process;
/// used in tests and by embedders that bring their own persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    /// `None` means the deadline overflowed the clock; treat as unbounded.
    expires_at: Option<Instant>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the common `Rc<dyn IdentityStore>` shape.
    #[must_use]
    pub fn shared() -> SharedStore {
        Rc::new(Self::new())
    }
}

impl IdentityStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        let entries = self.entries.borrow();
        let entry = entries.get(key)?;
        match entry.expires_at {
            Some(deadline) if deadline <= Instant::now() => None,
            _ => Some(entry.value.clone()),
        }
    }

    fn save(&self, key: &str, value: &str, ttl: Duration) {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.borrow_mut().insert(key.to_string(), entry);
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// JSON-file-backed store: one file holding `key -> {value, expires_at}`.
///
/// Availability is probed once at construction: the parent directory must
/// be creatable and the file openable for writing. An unavailable store
/// silently no-ops, matching a browser context with cookies disabled.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl FileStore {
    /// Open (or create) the store file at `path`, probing writability.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let available = Self::probe(&path);
        if !available {
            warn!(path = %path.display(), "identity store unavailable, persistence disabled");
        }
        Self { path, available }
    }

    /// Shared handle variant of [`FileStore::open`].
    #[must_use]
    pub fn open_shared(path: impl Into<PathBuf>) -> SharedStore {
        Rc::new(Self::open(path))
    }

    fn probe(path: &Path) -> bool {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .is_ok()
    }

    fn read_entries(&self) -> HashMap<String, FileEntry> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return HashMap::new(),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "failed to read identity store");
                }
                return HashMap::new();
            }
        };
        match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "identity store corrupt, starting empty");
                HashMap::new()
            }
        }
    }

    fn write_entries(&self, entries: &HashMap<String, FileEntry>) {
        let json = match serde_json::to_string(entries) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize identity store");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, json) {
            warn!(path = %self.path.display(), error = %err, "failed to write identity store");
        }
    }
}

impl IdentityStore for FileStore {
    fn load(&self, key: &str) -> Option<String> {
        if !self.available {
            return None;
        }
        let entry = self.read_entries().remove(key)?;
        if entry.expires_at <= Utc::now() {
            return None;
        }
        Some(entry.value)
    }

    fn save(&self, key: &str, value: &str, ttl: Duration) {
        if !self.available {
            return;
        }
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.read_entries();
        // Expired entries are pruned on write rather than on read.
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            FileEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.write_entries(&entries);
    }

    fn remove(&self, key: &str) {
        if !self.available {
            return;
        }
        let mut entries = self.read_entries();
        if entries.remove(key).is_some() {
            self.write_entries(&entries);
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

// =============================================================================
// NullStore
// =============================================================================

/// A store that is never available: models a host environment with no
/// durable storage at all. Every operation is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl NullStore {
    /// Shared handle to a [`NullStore`].
    #[must_use]
    pub fn shared() -> SharedStore {
        Rc::new(Self)
    }
}

impl IdentityStore for NullStore {
    fn load(&self, _key: &str) -> Option<String> {
        None
    }

    fn save(&self, _key: &str, _value: &str, _ttl: Duration) {}

    fn remove(&self, _key: &str) {}

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k"), None);

        store.save("k", "v", TTL);
        assert_eq!(store.load("k").as_deref(), Some("v"));

        store.remove("k");
        assert_eq!(store.load("k"), None);
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.save("k", "first", TTL);
        store.save("k", "second", TTL);
        assert_eq!(store.load("k").as_deref(), Some("second"));
    }

    #[test]
    fn memory_store_expires() {
        let store = MemoryStore::new();
        store.save("k", "v", Duration::ZERO);
        assert_eq!(store.load("k"), None);
    }

    #[test]
    fn memory_store_is_available() {
        assert!(MemoryStore::new().is_available());
    }

    #[test]
    fn file_store_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let store = FileStore::open(&path);
        assert!(store.is_available());
        store.save("k", "v", TTL);

        // A fresh instance over the same file sees the entry.
        let reopened = FileStore::open(&path);
        assert_eq!(reopened.load("k").as_deref(), Some("v"));

        reopened.remove("k");
        assert_eq!(FileStore::open(&path).load("k"), None);
    }

    #[test]
    fn file_store_expires_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let store = FileStore::open(&path);
        store.save("short", "v", Duration::ZERO);
        store.save("long", "v", TTL);

        assert_eq!(store.load("short"), None);
        assert_eq!(store.load("long").as_deref(), Some("v"));
    }

    #[test]
    fn file_store_prunes_expired_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let store = FileStore::open(&path);
        store.save("gone", "v", Duration::ZERO);
        store.save("kept", "v", TTL);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("gone"));
        assert!(raw.contains("kept"));
    }

    #[test]
    fn file_store_survives_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileStore::open(&path);
        assert_eq!(store.load("k"), None);
        store.save("k", "v", TTL);
        assert_eq!(store.load("k").as_deref(), Some("v"));
    }

    #[test]
    fn file_store_unavailable_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not dir").unwrap();

        let store = FileStore::open(blocker.join("identity.json"));
        assert!(!store.is_available());

        // Fully degraded: every operation is a no-op.
        store.save("k", "v", TTL);
        assert_eq!(store.load("k"), None);
        store.remove("k");
    }

    #[test]
    fn null_store_is_inert() {
        let store = NullStore;
        assert!(!store.is_available());
        store.save("k", "v", TTL);
        assert_eq!(store.load("k"), None);
        store.remove("k");
    }
}

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use study_core::model::{SessionId, SessionSnapshot};

/// Key/value persistence of assessment-session snapshots.
///
/// All operations are synchronous and fire-and-forget: storage failures are
/// logged and swallowed, never surfaced to the caller. Concurrent sessions
/// use disjoint keys and never interfere.
pub trait SnapshotStore: Send + Sync {
    /// Write the snapshot under its session id, replacing any prior entry.
    fn save(&self, snapshot: &SessionSnapshot);

    /// Return the last saved snapshot for the session, if any.
    fn load(&self, session_id: &SessionId) -> Option<SessionSnapshot>;

    /// Remove the entry for the session. No-op when absent.
    fn clear(&self, session_id: &SessionId);
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

/// In-memory snapshot store for tests and prototyping.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    entries: Mutex<HashMap<SessionId, SessionSnapshot>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, snapshot: &SessionSnapshot) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!(session = %snapshot.session_id, "snapshot store lock poisoned; dropping save");
            return;
        };
        let _ = entries.insert(snapshot.session_id.clone(), snapshot.clone());
    }

    fn load(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let Ok(entries) = self.entries.lock() else {
            warn!(session = %session_id, "snapshot store lock poisoned; loading nothing");
            return None;
        };
        entries.get(session_id).cloned()
    }

    fn clear(&self, session_id: &SessionId) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!(session = %session_id, "snapshot store lock poisoned; dropping clear");
            return;
        };
        let _ = entries.remove(session_id);
    }
}

//
// ─── JSON FILE BACKEND ─────────────────────────────────────────────────────────
//

/// File-backed snapshot store: one JSON document per session id under a base
/// directory. Unreadable or corrupt files load as `None`.
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        // Session ids come from the server; keep file names shell-safe.
        let sanitized: String = session_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn save(&self, snapshot: &SessionSnapshot) {
        if let Err(err) = fs::create_dir_all(&self.dir) {
            warn!(session = %snapshot.session_id, %err, "cannot create snapshot directory");
            return;
        }
        let bytes = match serde_json::to_vec(snapshot) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(session = %snapshot.session_id, %err, "cannot serialize snapshot");
                return;
            }
        };
        if let Err(err) = fs::write(self.path_for(&snapshot.session_id), bytes) {
            warn!(session = %snapshot.session_id, %err, "cannot write snapshot");
        }
    }

    fn load(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        let path = self.path_for(session_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(session = %session_id, %err, "cannot read snapshot");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                debug!(session = %session_id, %err, "ignoring corrupt snapshot");
                None
            }
        }
    }

    fn clear(&self, session_id: &SessionId) {
        if let Err(err) = fs::remove_file(self.path_for(session_id)) {
            if err.kind() != ErrorKind::NotFound {
                warn!(session = %session_id, %err, "cannot remove snapshot");
            }
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

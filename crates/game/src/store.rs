use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use crate::error::GameError;
use crate::session::GameSession;

/// Keyed session storage with per-session atomic updates.
///
/// `update` runs the closure on a copy of the stored session and writes the
/// copy back only if the closure succeeds, all under one lock. Sessions past
/// their TTL read as missing and are dropped by `sweep_expired`.
pub trait SessionStore {
    fn create(&self, session: GameSession) -> Result<(), GameError>;

    fn get(&self, id: &str) -> Result<Option<GameSession>, GameError>;

    fn update<T, F>(&self, id: &str, f: F) -> Result<T, GameError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, GameError>;

    /// Every live session.
    fn list(&self) -> Result<Vec<GameSession>, GameError>;

    /// Remove sessions that expired before `now`; returns how many went.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, GameError>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, GameError> {
    mutex
        .lock()
        .map_err(|_| GameError::Store("session lock poisoned".into()))
}

/// In-process store, for tests and single-process hosts.
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, GameSession>>,
    ttl: chrono::Duration,
}

impl MemoryStore {
    pub fn new(ttl: chrono::Duration) -> Self {
        MemoryStore {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl SessionStore for MemoryStore {
    fn create(&self, session: GameSession) -> Result<(), GameError> {
        let mut sessions = lock(&self.sessions)?;
        if sessions.contains_key(&session.id) {
            return Err(GameError::Store(format!("session {} already exists", session.id)));
        }
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<GameSession>, GameError> {
        let sessions = lock(&self.sessions)?;
        Ok(sessions
            .get(id)
            .filter(|s| !s.is_expired(Utc::now(), self.ttl))
            .cloned())
    }

    fn update<T, F>(&self, id: &str, f: F) -> Result<T, GameError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, GameError>,
    {
        let mut sessions = lock(&self.sessions)?;
        let stored = sessions
            .get_mut(id)
            .filter(|s| !s.is_expired(Utc::now(), self.ttl))
            .ok_or_else(|| GameError::SessionNotFound(id.to_string()))?;
        let mut draft = stored.clone();
        let out = f(&mut draft)?;
        *stored = draft;
        Ok(out)
    }

    fn list(&self) -> Result<Vec<GameSession>, GameError> {
        let now = Utc::now();
        let sessions = lock(&self.sessions)?;
        Ok(sessions
            .values()
            .filter(|s| !s.is_expired(now, self.ttl))
            .cloned()
            .collect())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, GameError> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.ttl));
        Ok(before - sessions.len())
    }
}

/// One JSON document per session under a directory.
///
/// Writes go to a temporary file in the same directory and are renamed
/// into place, so readers never observe a half-written session. Updates are
/// serialized within the process.
pub struct FileStore {
    dir: PathBuf,
    ttl: chrono::Duration,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: &Path, ttl: chrono::Duration) -> Result<Self, GameError> {
        fs::create_dir_all(dir)?;
        Ok(FileStore {
            dir: dir.to_path_buf(),
            ttl,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Result<PathBuf, GameError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(GameError::SessionNotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn read(&self, path: &Path) -> Result<Option<GameSession>, GameError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, session: &GameSession) -> Result<(), GameError> {
        let path = self.path(&session.id)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, session)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| GameError::Io(e.error))?;
        Ok(())
    }

    /// Sessions on disk, skipping files that do not parse.
    fn scan(&self) -> Result<Vec<(PathBuf, GameSession)>, GameError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path) {
                Ok(Some(session)) => out.push((path, session)),
                Ok(None) => {}
                Err(e) => log::warn!("skipping unreadable session file {}: {e}", path.display()),
            }
        }
        Ok(out)
    }
}

impl SessionStore for FileStore {
    fn create(&self, session: GameSession) -> Result<(), GameError> {
        let _guard = lock(&self.write_lock)?;
        if self.path(&session.id)?.exists() {
            return Err(GameError::Store(format!("session {} already exists", session.id)));
        }
        self.write(&session)
    }

    fn get(&self, id: &str) -> Result<Option<GameSession>, GameError> {
        let path = self.path(id)?;
        Ok(self
            .read(&path)?
            .filter(|s| !s.is_expired(Utc::now(), self.ttl)))
    }

    fn update<T, F>(&self, id: &str, f: F) -> Result<T, GameError>
    where
        F: FnOnce(&mut GameSession) -> Result<T, GameError>,
    {
        let _guard = lock(&self.write_lock)?;
        let mut draft = self
            .get(id)?
            .ok_or_else(|| GameError::SessionNotFound(id.to_string()))?;
        let out = f(&mut draft)?;
        self.write(&draft)?;
        Ok(out)
    }

    fn list(&self) -> Result<Vec<GameSession>, GameError> {
        let now = Utc::now();
        Ok(self
            .scan()?
            .into_iter()
            .map(|(_, s)| s)
            .filter(|s| !s.is_expired(now, self.ttl))
            .collect())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, GameError> {
        let _guard = lock(&self.write_lock)?;
        let mut removed = 0;
        for (path, session) in self.scan()? {
            if session.is_expired(now, self.ttl) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

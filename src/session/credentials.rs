//! Credential pair storage
//!
//! This module holds the live access/refresh credential pair and persists it
//! so that a session survives a process restart.
//!
//! [`CredentialStore`] is the in-process owner of the pair. Every read sees
//! either the previous pair or the next one, never a mix, because the pair
//! is replaced as a single value under a write lock. Persistence is
//! delegated to a [`CredentialBackend`]:
//!
//! - [`KeyringBackend`] -- OS native credential store (Keychain on macOS,
//!   Secret Service on Linux, Windows Credential Manager on Windows).
//! - [`FileBackend`] -- a JSON file written atomically via rename.
//! - [`MemoryBackend`] -- no persistence; used in tests and ephemeral runs.
//!
//! The store also keeps a *generation* counter that advances every time the
//! session changes hands: a login installs a new session, a logout or
//! terminal failure clears it. Refreshes capture the generation before their
//! round trip and only install or clear anything if it has not moved.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkdeskError};

// ---------------------------------------------------------------------------
// CredentialPair
// ---------------------------------------------------------------------------

/// The access/refresh credential pair issued by the service.
///
/// Serialized with the service's wire names (`token`, `refreshToken`) so the
/// login and refresh responses deserialize straight into it.
///
/// # Examples
///
/// ```
/// use workdesk::session::credentials::CredentialPair;
///
/// let pair: CredentialPair =
///     serde_json::from_str(r#"{"token":"a1","refreshToken":"r1"}"#).unwrap();
/// assert_eq!(pair.access_token, "a1");
/// assert_eq!(pair.refresh_token, "r1");
///
/// // Tokens never leak through Debug output.
/// assert!(!format!("{:?}", pair).contains("a1"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Short-lived bearer credential attached to every call.
    #[serde(rename = "token")]
    pub access_token: String,

    /// Longer-lived credential used only for the refresh exchange.
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

impl CredentialPair {
    /// Creates a pair from its two halves.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Persistent storage for the credential pair.
///
/// Implementations only need to be individually atomic; the
/// [`CredentialStore`] serializes all writes.
pub trait CredentialBackend: Send + Sync + fmt::Debug {
    /// Loads the persisted pair, `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage fails or holds data that
    /// cannot be decoded.
    fn load(&self) -> Result<Option<CredentialPair>>;

    /// Persists `pair`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage rejects the write.
    fn save(&self, pair: &CredentialPair) -> Result<()>;

    /// Removes the persisted pair. A no-op when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying storage rejects the delete.
    fn delete(&self) -> Result<()>;
}

/// OS keyring backend.
///
/// The pair is stored as JSON under the service name `workdesk-session` and
/// an account name. [`Config::keyring_account`](crate::config::Config::keyring_account)
/// picks the API host unless one is configured.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    /// Keyring service name under which the pair is stored.
    pub const SERVICE: &'static str = "workdesk-session";

    /// Creates a backend for the given account name.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(Self::SERVICE, &self.account)
            .map_err(|e| WorkdeskError::Keyring(e).into())
    }
}

impl CredentialBackend for KeyringBackend {
    fn load(&self) -> Result<Option<CredentialPair>> {
        match self.entry()?.get_password() {
            Ok(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(WorkdeskError::Keyring(e).into()),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        let json_str = serde_json::to_string(pair)?;
        self.entry()?
            .set_password(&json_str)
            .map_err(WorkdeskError::Keyring)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(WorkdeskError::Keyring(e).into()),
        }
    }
}

/// JSON file backend.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write never leaves a truncated pair behind. On
/// Unix the file is created with mode `0600`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Creates a backend storing the pair at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Result<Option<CredentialPair>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let pair = serde_json::from_str(&contents).map_err(|e| {
                    WorkdeskError::CredentialStore(format!(
                        "corrupt credential file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                Ok(Some(pair))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WorkdeskError::Io(e).into()),
        }
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        std::fs::write(&temp, serde_json::to_vec(pair)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkdeskError::Io(e).into()),
        }
    }
}

/// Volatile backend; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<CredentialPair>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Result<Option<CredentialPair>> {
        self.slot
            .lock()
            .map(|slot| slot.clone())
            .map_err(|_| WorkdeskError::CredentialStore("memory slot poisoned".to_string()).into())
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| WorkdeskError::CredentialStore("memory slot poisoned".to_string()))?;
        *slot = Some(pair.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| WorkdeskError::CredentialStore("memory slot poisoned".to_string()))?;
        *slot = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoreState {
    pair: Option<CredentialPair>,
    generation: u64,
}

/// Outcome of [`CredentialStore::replace_if_current`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The pair was installed (or was already identical).
    Replaced,
    /// The session was cleared or replaced by a login after the generation
    /// was observed; nothing was written.
    Superseded,
}

/// Owner of the live credential pair.
///
/// All operations are atomic with respect to each other: the in-memory pair
/// and the backend are updated while holding the write lock, and readers
/// only ever clone a complete pair.
///
/// # Examples
///
/// ```
/// use workdesk::session::credentials::{CredentialPair, CredentialStore};
///
/// let store = CredentialStore::in_memory();
/// assert!(store.read().is_none());
///
/// store.replace(CredentialPair::new("access", "refresh")).unwrap();
/// assert_eq!(store.read().unwrap().access_token, "access");
///
/// store.clear().unwrap();
/// assert!(store.read().is_none());
/// ```
#[derive(Debug)]
pub struct CredentialStore {
    state: RwLock<StoreState>,
    backend: Arc<dyn CredentialBackend>,
}

impl CredentialStore {
    /// Opens a store over `backend`, loading any persisted pair.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be read.
    pub fn open(backend: Arc<dyn CredentialBackend>) -> Result<Self> {
        let pair = backend.load()?;
        if pair.is_some() {
            tracing::debug!("Restored persisted credential pair");
        }
        Ok(Self {
            state: RwLock::new(StoreState {
                pair,
                generation: 0,
            }),
            backend,
        })
    }

    /// Creates an empty store with a [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Returns a copy of the current pair.
    pub fn read(&self) -> Option<CredentialPair> {
        self.snapshot().0
    }

    /// Returns the current pair together with the current generation.
    pub fn snapshot(&self) -> (Option<CredentialPair>, u64) {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (state.pair.clone(), state.generation)
    }

    /// Installs `pair` as the live credential pair.
    ///
    /// Replacing with an identical pair is a no-op and does not touch the
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to persist the pair. The
    /// in-memory pair is installed regardless so the running session keeps
    /// working.
    pub fn replace(&self, pair: CredentialPair) -> Result<()> {
        let mut state = self.write_state();
        Self::install(&mut state, self.backend.as_ref(), pair)
    }

    /// Installs `pair` as a new session and advances the generation.
    ///
    /// Work started against the previous session (a refresh in flight) can
    /// no longer install or clear anything.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to persist the pair. The
    /// in-memory pair is installed regardless.
    pub fn start_session(&self, pair: CredentialPair) -> Result<()> {
        let mut state = self.write_state();
        state.generation += 1;
        Self::install(&mut state, self.backend.as_ref(), pair)
    }

    /// Installs `pair` only if the session has not changed hands since
    /// `generation` was observed via [`snapshot`](Self::snapshot).
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to persist the pair.
    pub fn replace_if_current(&self, pair: CredentialPair, generation: u64) -> Result<ReplaceOutcome> {
        let mut state = self.write_state();
        if state.generation != generation {
            return Ok(ReplaceOutcome::Superseded);
        }
        Self::install(&mut state, self.backend.as_ref(), pair)?;
        Ok(ReplaceOutcome::Replaced)
    }

    /// Removes the pair and advances the generation.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to delete the persisted pair.
    /// The in-memory pair is cleared regardless.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write_state();
        state.pair = None;
        state.generation += 1;
        self.backend.delete()
    }

    /// Clears the pair only if the session has not changed hands since
    /// `generation` was observed.
    ///
    /// Returns `true` if the pair was cleared.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to delete the persisted pair.
    pub fn clear_if_current(&self, generation: u64) -> Result<bool> {
        let mut state = self.write_state();
        if state.generation != generation {
            return Ok(false);
        }
        state.pair = None;
        state.generation += 1;
        self.backend.delete()?;
        Ok(true)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn install(
        state: &mut StoreState,
        backend: &dyn CredentialBackend,
        pair: CredentialPair,
    ) -> Result<()> {
        if state.pair.as_ref() == Some(&pair) {
            return Ok(());
        }
        let persisted = backend.save(&pair);
        state.pair = Some(pair);
        persisted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts writes and can be told to fail.
    #[derive(Debug, Default)]
    struct CountingBackend {
        saves: AtomicUsize,
        fail: bool,
    }

    impl CredentialBackend for CountingBackend {
        fn load(&self) -> Result<Option<CredentialPair>> {
            Ok(None)
        }

        fn save(&self, _pair: &CredentialPair) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WorkdeskError::CredentialStore("disk full".to_string()).into());
            }
            Ok(())
        }

        fn delete(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_replace_is_idempotent_for_identical_pair() {
        let backend = Arc::new(CountingBackend::default());
        let store = CredentialStore::open(backend.clone()).unwrap();

        store.replace(CredentialPair::new("a", "r")).unwrap();
        store.replace(CredentialPair::new("a", "r")).unwrap();
        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);

        store.replace(CredentialPair::new("b", "r")).unwrap();
        assert_eq!(backend.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replace_installs_pair_even_when_persistence_fails() {
        let backend = Arc::new(CountingBackend {
            saves: AtomicUsize::new(0),
            fail: true,
        });
        let store = CredentialStore::open(backend).unwrap();

        assert!(store.replace(CredentialPair::new("a", "r")).is_err());
        assert_eq!(store.read(), Some(CredentialPair::new("a", "r")));
    }

    #[test]
    fn test_clear_advances_generation() {
        let store = CredentialStore::in_memory();
        store.replace(CredentialPair::new("a", "r")).unwrap();
        let (_, before) = store.snapshot();
        store.clear().unwrap();
        let (pair, after) = store.snapshot();
        assert!(pair.is_none());
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_replace_if_current_refuses_after_clear() {
        let store = CredentialStore::in_memory();
        store.replace(CredentialPair::new("a", "r")).unwrap();
        let (_, generation) = store.snapshot();

        store.clear().unwrap();

        let outcome = store
            .replace_if_current(CredentialPair::new("b", "r2"), generation)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Superseded);
        assert!(store.read().is_none());
    }

    #[test]
    fn test_replace_if_current_installs_when_generation_matches() {
        let store = CredentialStore::in_memory();
        let (_, generation) = store.snapshot();
        let outcome = store
            .replace_if_current(CredentialPair::new("b", "r2"), generation)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Replaced);
        assert_eq!(store.read().unwrap().access_token, "b");
    }

    #[test]
    fn test_start_session_supersedes_pending_work() {
        let store = CredentialStore::in_memory();
        store.replace(CredentialPair::new("old", "old-r")).unwrap();
        let (_, generation) = store.snapshot();

        store.start_session(CredentialPair::new("new", "new-r")).unwrap();

        let outcome = store
            .replace_if_current(CredentialPair::new("late", "late-r"), generation)
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome::Superseded);
        assert!(!store.clear_if_current(generation).unwrap());
        assert_eq!(store.read(), Some(CredentialPair::new("new", "new-r")));
    }

    #[test]
    fn test_clear_if_current_clears_matching_generation() {
        let store = CredentialStore::in_memory();
        store.replace(CredentialPair::new("a", "r")).unwrap();
        let (_, generation) = store.snapshot();

        assert!(store.clear_if_current(generation).unwrap());
        assert!(store.read().is_none());
        assert_eq!(store.snapshot().1, generation + 1);
    }

    #[test]
    fn test_open_restores_persisted_pair() {
        let backend = Arc::new(MemoryBackend::new());
        backend.save(&CredentialPair::new("saved", "saved-r")).unwrap();

        let store = CredentialStore::open(backend).unwrap();
        assert_eq!(store.read().unwrap().access_token, "saved");
    }

    #[test]
    fn test_file_backend_roundtrip_and_delete() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("session.json"));

        assert!(backend.load().unwrap().is_none());
        backend.save(&CredentialPair::new("a", "r")).unwrap();
        assert_eq!(backend.load().unwrap(), Some(CredentialPair::new("a", "r")));
        assert!(!backend.temp_path().exists());

        backend.delete().unwrap();
        assert!(backend.load().unwrap().is_none());
        // Deleting twice is a no-op.
        backend.delete().unwrap();
    }

    #[test]
    fn test_file_backend_reports_corrupt_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileBackend::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("corrupt credential file"));
    }

    #[test]
    fn test_pair_serializes_with_wire_names() {
        let json = serde_json::to_value(CredentialPair::new("a", "r")).unwrap();
        assert_eq!(json, serde_json::json!({"token": "a", "refreshToken": "r"}));
    }

    #[test]
    #[ignore = "requires system keyring"]
    fn test_keyring_backend_roundtrip() {
        let backend = KeyringBackend::new("workdesk-test-account");
        backend.save(&CredentialPair::new("a", "r")).expect("save");
        assert_eq!(
            backend.load().expect("load"),
            Some(CredentialPair::new("a", "r"))
        );
        backend.delete().expect("delete");
        assert!(backend.load().expect("load after delete").is_none());
    }
}

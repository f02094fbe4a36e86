//! API key lookup and storage.
//!
//! The key is looked up in the process environment, then the OS credential
//! store, then a local `KEY=value` dotfile. A key entered at runtime can be
//! kept for the session only or written to one of the persistent backends.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config_loader::Settings;
use crate::error::{Result, TtsError};

pub const KEYRING_SERVICE: &str = "universal-tts";

/// A secret API key. Never printed, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for blank input.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let mut raw = raw.into();
        let trimmed = raw.trim().to_string();
        raw.zeroize();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    CredentialStore,
    EnvFile,
    Session,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment variable",
            Self::CredentialStore => "system credential manager",
            Self::EnvFile => ".env file",
            Self::Session => "current session only",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyDestination {
    /// OS credential manager
    #[value(name = "keyring")]
    CredentialStore,
    /// Local dotfile, readable by the owner only
    #[value(name = "env-file")]
    EnvFile,
    /// Kept in memory until the process exits
    Session,
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: ApiKey,
    pub source: KeySource,
}

/// Outcome of removing the key from every backend.
#[derive(Debug, Default, Clone)]
pub struct DeletionReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Seam for the platform credential manager.
pub trait CredentialStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn get(&self) -> Result<Option<ApiKey>>;

    fn set(&self, key: &ApiKey) -> Result<()>;

    /// Returns `Ok(false)` when nothing was stored.
    fn delete(&self) -> Result<bool>;
}

/// Used when the binary is built without a credential manager backend.
pub struct UnavailableStore;

impl CredentialStore for UnavailableStore {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn get(&self) -> Result<Option<ApiKey>> {
        Ok(None)
    }

    fn set(&self, _key: &ApiKey) -> Result<()> {
        Err(TtsError::CredentialStore(
            "system credential manager is not available in this build".to_string(),
        ))
    }

    fn delete(&self) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(feature = "os-keyring")]
pub struct KeyringStore {
    service: String,
    user: String,
}

#[cfg(feature = "os-keyring")]
impl KeyringStore {
    pub fn new(service: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string());
        Self {
            service: service.to_string(),
            user,
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| TtsError::CredentialStore(e.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl CredentialStore for KeyringStore {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn is_available(&self) -> bool {
        self.entry().is_ok()
    }

    fn get(&self) -> Result<Option<ApiKey>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(ApiKey::new(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(TtsError::CredentialStore(e.to_string())),
        }
    }

    fn set(&self, key: &ApiKey) -> Result<()> {
        self.entry()?
            .set_password(key.expose())
            .map_err(|e| TtsError::CredentialStore(e.to_string()))
    }

    fn delete(&self) -> Result<bool> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(TtsError::CredentialStore(e.to_string())),
        }
    }
}

/// The credential manager backend compiled into this build.
pub fn default_store() -> Box<dyn CredentialStore> {
    #[cfg(feature = "os-keyring")]
    {
        Box::new(KeyringStore::new(KEYRING_SERVICE))
    }
    #[cfg(not(feature = "os-keyring"))]
    {
        Box::new(UnavailableStore)
    }
}

/// A `KEY=value` dotfile holding a single variable of interest.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
    var: String,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>, var: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            var: var.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `line` assigns the variable, read the same way dotenv does:
    /// leading whitespace and an `export ` prefix are allowed.
    fn assigns(&self, line: &str) -> bool {
        let line = line.trim_start();
        let line = match line.strip_prefix("export") {
            Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
            _ => line,
        };
        line.split_once('=')
            .map(|(name, _)| name.trim_end() == self.var)
            .unwrap_or(false)
    }

    pub fn read(&self) -> Result<Option<ApiKey>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let entries = dotenvy::from_path_iter(&self.path)
            .map_err(|e| TtsError::CredentialStore(format!("{}: {}", self.path.display(), e)))?;
        for entry in entries {
            let (name, value) = entry.map_err(|e| {
                TtsError::CredentialStore(format!("{}: {}", self.path.display(), e))
            })?;
            if name == self.var {
                return Ok(ApiKey::new(value));
            }
        }
        Ok(None)
    }

    /// Replaces the existing assignment or appends one, keeping every other line.
    pub fn write(&self, key: &ApiKey) -> Result<()> {
        let mut lines: Vec<String> = if self.path.exists() {
            fs::read_to_string(&self.path)
                .map_err(|e| TtsError::io(&self.path, e))?
                .lines()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        let assignment = format!("{}={}", self.var, key.expose());
        match lines.iter().position(|line| self.assigns(line)) {
            Some(index) => {
                lines[index] = assignment;
                let mut seen = 0;
                lines.retain(|line| {
                    if !self.assigns(line) {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => lines.push(assignment),
        }

        let mut contents = lines.join("\n");
        contents.push('\n');
        let result = fs::write(&self.path, &contents).map_err(|e| TtsError::io(&self.path, e));
        contents.zeroize();
        lines.zeroize();
        result?;

        match restrict_permissions(&self.path) {
            Ok(()) => debug!("Applied owner-only permissions to {}", self.path.display()),
            Err(e) => warn!(
                "Could not set restrictive permissions on {}: {}",
                self.path.display(),
                e
            ),
        }
        Ok(())
    }

    /// Drops every assignment of the variable. Returns whether anything was removed.
    pub fn remove(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let original = fs::read_to_string(&self.path).map_err(|e| TtsError::io(&self.path, e))?;
        let kept: Vec<&str> = original
            .lines()
            .filter(|line| !self.assigns(line))
            .collect();
        if kept.len() == original.lines().count() {
            return Ok(false);
        }

        let mut contents = kept.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        fs::write(&self.path, contents).map_err(|e| TtsError::io(&self.path, e))?;
        Ok(true)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "owner-only permissions are only applied on Unix",
    ))
}

pub struct CredentialManager {
    env_var: String,
    store: Box<dyn CredentialStore>,
    env_file: EnvFile,
    session: Mutex<Option<ApiKey>>,
    // Set after a delete so a key still exported by the parent shell is ignored.
    ignore_env: AtomicBool,
}

impl CredentialManager {
    pub fn new(
        env_var: impl Into<String>,
        env_file: impl Into<PathBuf>,
        store: Box<dyn CredentialStore>,
    ) -> Self {
        let env_var = env_var.into();
        Self {
            env_file: EnvFile::new(env_file, env_var.clone()),
            env_var,
            store,
            session: Mutex::new(None),
            ignore_env: AtomicBool::new(false),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.api_key_env.clone(),
            settings.env_file.clone(),
            default_store(),
        )
    }

    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    pub fn is_store_available(&self) -> bool {
        self.store.is_available()
    }

    /// First key found, in order: runtime session, environment, credential
    /// store, dotfile.
    pub fn resolve(&self) -> Option<ResolvedKey> {
        if let Some(key) = self.session_key() {
            debug!("Using API key entered for this session");
            return Some(ResolvedKey {
                key,
                source: KeySource::Session,
            });
        }

        if !self.ignore_env.load(Ordering::SeqCst) {
            if let Some(key) = std::env::var(&self.env_var).ok().and_then(ApiKey::new) {
                info!("API key found in environment variable {}", self.env_var);
                return Some(ResolvedKey {
                    key,
                    source: KeySource::Environment,
                });
            }
        }

        if self.store.is_available() {
            match self.store.get() {
                Ok(Some(key)) => {
                    info!("API key found in system credential manager");
                    return Some(ResolvedKey {
                        key,
                        source: KeySource::CredentialStore,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Error accessing system credentials: {}", e),
            }
        }

        match self.env_file.read() {
            Ok(Some(key)) => {
                info!("API key found in {}", self.env_file.path().display());
                return Some(ResolvedKey {
                    key,
                    source: KeySource::EnvFile,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read {}: {}", self.env_file.path().display(), e),
        }

        info!("No API key found in any storage");
        None
    }

    pub fn status(&self) -> Option<KeySource> {
        self.resolve().map(|resolved| resolved.source)
    }

    /// Makes `key` active for this process and persists it to `destination`.
    pub fn save(&self, key: ApiKey, destination: KeyDestination) -> Result<KeySource> {
        let source = match destination {
            KeyDestination::CredentialStore => {
                self.store.set(&key)?;
                info!("API key saved to system credential manager");
                KeySource::CredentialStore
            }
            KeyDestination::EnvFile => {
                self.env_file.write(&key)?;
                info!("API key saved to {}", self.env_file.path().display());
                KeySource::EnvFile
            }
            KeyDestination::Session => {
                info!("API key updated for this session only");
                KeySource::Session
            }
        };

        *self.session_slot() = Some(key);
        self.ignore_env.store(false, Ordering::SeqCst);
        Ok(source)
    }

    /// Removes the key from every backend it can reach. A backend with
    /// nothing stored is not a failure.
    pub fn delete_all(&self) -> DeletionReport {
        let mut report = DeletionReport::default();

        if self.session_slot().take().is_some() {
            info!("API key removed from current session");
            report
                .removed
                .push("Removed from current session".to_string());
        }

        if std::env::var(&self.env_var)
            .ok()
            .and_then(ApiKey::new)
            .is_some()
        {
            self.ignore_env.store(true, Ordering::SeqCst);
            info!("Ignoring {} for the rest of this session", self.env_var);
            report.removed.push(format!(
                "Ignoring {} for this session (unset it in your shell to remove it)",
                self.env_var
            ));
        }

        if self.store.is_available() {
            match self.store.delete() {
                Ok(true) => {
                    info!("API key removed from system credential manager");
                    report
                        .removed
                        .push("Removed from system credential manager".to_string());
                }
                Ok(false) => info!("No API key stored in system credential manager"),
                Err(e) => {
                    warn!("Failed to remove API key from credential manager: {}", e);
                    report
                        .failed
                        .push(format!("Failed to remove from credential manager: {}", e));
                }
            }
        }

        match self.env_file.remove() {
            Ok(true) => {
                info!("API key removed from {}", self.env_file.path().display());
                report
                    .removed
                    .push(format!("Removed from {}", self.env_file.path().display()));
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Error removing API key from dotfile: {}", e);
                report.failed.push(format!(
                    "Failed to remove from {}: {}",
                    self.env_file.path().display(),
                    e
                ));
            }
        }

        report
    }

    fn session_key(&self) -> Option<ApiKey> {
        self.session_slot().clone()
    }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<ApiKey>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    /// In-memory stand-in for the OS credential manager.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        value: Mutex<Option<ApiKey>>,
    }

    impl CredentialStore for MemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn is_available(&self) -> bool {
            true
        }

        fn get(&self) -> Result<Option<ApiKey>> {
            Ok(self.value.lock().unwrap().clone())
        }

        fn set(&self, key: &ApiKey) -> Result<()> {
            *self.value.lock().unwrap() = Some(key.clone());
            Ok(())
        }

        fn delete(&self) -> Result<bool> {
            Ok(self.value.lock().unwrap().take().is_some())
        }
    }

    const VAR: &str = "UTTS_TEST_CREDENTIAL";

    fn manager(dir: &Path, store: Box<dyn CredentialStore>) -> CredentialManager {
        CredentialManager::new(VAR, dir.join(".env"), store)
    }

    #[test]
    fn blank_keys_are_rejected() {
        assert!(ApiKey::new("   ").is_none());
        assert_eq!(ApiKey::new(" sk-abc \n").unwrap().expose(), "sk-abc");
    }

    #[test]
    fn debug_never_shows_the_secret() {
        let key = ApiKey::new("sk-very-secret").unwrap();
        assert!(!format!("{:?}", key).contains("secret"));
    }

    #[test]
    #[serial]
    fn environment_wins_over_dotfile() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), format!("{}=from-file\n", VAR)).unwrap();
        std::env::set_var(VAR, "from-env");

        let resolved = manager(dir.path(), Box::new(UnavailableStore))
            .resolve()
            .unwrap();
        std::env::remove_var(VAR);

        assert_eq!(resolved.source, KeySource::Environment);
        assert_eq!(resolved.key.expose(), "from-env");
    }

    #[test]
    #[serial]
    fn store_wins_over_dotfile() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), format!("{}=from-file\n", VAR)).unwrap();
        let store = MemoryStore::default();
        store.set(&ApiKey::new("from-store").unwrap()).unwrap();

        let resolved = manager(dir.path(), Box::new(store)).resolve().unwrap();
        assert_eq!(resolved.source, KeySource::CredentialStore);
        assert_eq!(resolved.key.expose(), "from-store");
    }

    #[test]
    #[serial]
    fn dotfile_is_the_last_resort() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(".env"),
            format!("OTHER=1\n{}=from-file\n", VAR),
        )
        .unwrap();

        let resolved = manager(dir.path(), Box::new(UnavailableStore))
            .resolve()
            .unwrap();
        assert_eq!(resolved.source, KeySource::EnvFile);
        assert_eq!(resolved.key.expose(), "from-file");
    }

    #[test]
    #[serial]
    fn nothing_configured() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        assert!(manager(dir.path(), Box::new(UnavailableStore))
            .resolve()
            .is_none());
    }

    #[test]
    fn env_file_write_replaces_existing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, format!("FIRST=1\n{}=old\nLAST=2\n", VAR)).unwrap();

        let file = EnvFile::new(&path, VAR);
        file.write(&ApiKey::new("new").unwrap()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("FIRST=1\n{}=new\nLAST=2\n", VAR));
    }

    #[test]
    fn env_file_handles_exported_assignments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, format!("FIRST=1\nexport {}=old\n  {} = older\n", VAR, VAR)).unwrap();
        let file = EnvFile::new(&path, VAR);

        file.write(&ApiKey::new("new").unwrap()).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("FIRST=1\n{}=new\n", VAR));
        assert_eq!(file.read().unwrap().unwrap().expose(), "new");

        fs::write(&path, format!("export {}=old\nLAST=2\n", VAR)).unwrap();
        assert!(file.remove().unwrap());
        assert!(file.read().unwrap().is_none());
        assert_eq!(fs::read_to_string(&path).unwrap(), "LAST=2\n");
    }

    #[test]
    fn assignment_matching_is_exact() {
        let file = EnvFile::new(".env", "KEY");
        assert!(file.assigns("KEY=1"));
        assert!(file.assigns("export KEY=1"));
        assert!(file.assigns("\texport\tKEY =1"));
        assert!(!file.assigns("KEY_2=1"));
        assert!(!file.assigns("exportKEY=1"));
        assert!(!file.assigns("# KEY=1"));
    }

    #[test]
    fn env_file_write_appends_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "FIRST=1\n").unwrap();

        EnvFile::new(&path, VAR)
            .write(&ApiKey::new("abc").unwrap())
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("FIRST=1\n{}=abc\n", VAR));
    }

    #[cfg(unix)]
    #[test]
    fn env_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join(".env");
        EnvFile::new(&path, VAR)
            .write(&ApiKey::new("abc").unwrap())
            .unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    #[serial]
    fn session_key_takes_effect_immediately() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), Box::new(UnavailableStore));

        let source = manager
            .save(ApiKey::new("typed-in").unwrap(), KeyDestination::Session)
            .unwrap();
        assert_eq!(source, KeySource::Session);
        assert_eq!(manager.resolve().unwrap().key.expose(), "typed-in");
        assert!(!dir.path().join(".env").exists());
    }

    #[test]
    fn saving_to_missing_store_fails() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), Box::new(UnavailableStore));
        let err = manager
            .save(ApiKey::new("k").unwrap(), KeyDestination::CredentialStore)
            .unwrap_err();
        assert!(matches!(err, TtsError::CredentialStore(_)));
    }

    #[test]
    #[serial]
    fn delete_all_reaches_every_backend() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        let store = MemoryStore::default();
        store.set(&ApiKey::new("stored").unwrap()).unwrap();
        let manager = manager(dir.path(), Box::new(store));
        manager
            .save(ApiKey::new("filed").unwrap(), KeyDestination::EnvFile)
            .unwrap();

        let report = manager.delete_all();
        assert!(report.failed.is_empty());
        assert_eq!(report.removed.len(), 3);
        assert!(manager.resolve().is_none());
    }

    #[test]
    #[serial]
    fn delete_with_nothing_stored_is_quiet() {
        std::env::remove_var(VAR);
        let dir = tempdir().unwrap();
        let report = manager(dir.path(), Box::new(MemoryStore::default())).delete_all();
        assert!(report.removed.is_empty());
        assert!(report.failed.is_empty());
    }

    #[test]
    #[serial]
    fn delete_suppresses_inherited_environment() {
        let dir = tempdir().unwrap();
        std::env::set_var(VAR, "exported");
        let manager = manager(dir.path(), Box::new(UnavailableStore));

        manager.delete_all();
        let after = manager.resolve();
        std::env::remove_var(VAR);

        assert!(after.is_none());
    }

    #[test]
    #[serial]
    fn blank_environment_variable_is_not_reported() {
        let dir = tempdir().unwrap();
        std::env::set_var(VAR, "  ");
        let report = manager(dir.path(), Box::new(UnavailableStore)).delete_all();
        std::env::remove_var(VAR);

        assert!(report.removed.is_empty());
    }
}

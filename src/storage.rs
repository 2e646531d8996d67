//! Persistent key-value storage.
//!
//! The resolution flow keeps a handful of small string values around between
//! runs: the preferred platform, the loop suppression record and debug
//! breadcrumbs. They are addressed by [`Key`] through the [`Storage`] port,
//! so tests and embedders can supply their own backend.
//!
//! Operations are atomic per key only. There are no transactions.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// Slots the link handler persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    PreferredPlatform,
    LastReceivedLink,
    LastRecognizedLink,
    LastRedirectDestination,
    LastResolutionSource,
    LastApiResponse,
    LastApiError,
    InitialLaunchUrl,
    TestMode,
}

impl Key {
    /// Name of the key as persisted.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreferredPlatform => "preferredMusicPlatform",
            Self::LastReceivedLink => "lastReceivedLink",
            Self::LastRecognizedLink => "lastOdesliLink",
            Self::LastRedirectDestination => "lastRedirectedUrl",
            Self::LastResolutionSource => "lastProcessedOdesliUrl",
            Self::LastApiResponse => "lastApiResponse",
            Self::LastApiError => "lastApiError",
            Self::InitialLaunchUrl => "initialOpenURL",
            Self::TestMode => "testMode",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: Key) -> Result<Option<String>>;

    async fn set(&self, key: Key, value: &str) -> Result<()>;

    async fn remove(&self, key: Key) -> Result<()>;

    async fn multi_remove(&self, keys: &[Key]) -> Result<()> {
        for key in keys {
            self.remove(*key).await?;
        }
        Ok(())
    }
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<Key, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: Key) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(&key).cloned())
    }

    async fn set(&self, key: Key, value: &str) -> Result<()> {
        self.values.lock().await.insert(key, value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: Key) -> Result<()> {
        self.values.lock().await.remove(&key);
        Ok(())
    }

    async fn multi_remove(&self, keys: &[Key]) -> Result<()> {
        let mut values = self.values.lock().await;
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }
}

/// Storage backed by a TOML file of string values.
///
/// The whole file is read and rewritten on every operation. That is fine for
/// the handful of short values kept here, and means edits made by hand
/// between runs are picked up.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,

    // Serializes read-modify-write cycles of this process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Prevent out-of-memory conditions: the state file should be small.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        self.read(Some(Self::MAX_FILE_SIZE)).await
    }

    /// Reads the file, refusing files larger than `limit`.
    async fn read(&self, limit: Option<u64>) -> Result<BTreeMap<String, String>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        if limit.is_some_and(|limit| metadata.len() > limit) {
            return Err(Error::resource_exhausted(format!(
                "{} is larger than {} bytes",
                self.path.display(),
                Self::MAX_FILE_SIZE
            )));
        }

        let contents = tokio::fs::read_to_string(&self.path).await?;
        toml::from_str(&contents).map_err(Into::into)
    }

    async fn store(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let contents = toml::to_string(values)?;
        if u64::try_from(contents.len()).unwrap_or(u64::MAX) > Self::MAX_FILE_SIZE {
            return Err(Error::resource_exhausted(format!(
                "state would grow to {} bytes, more than {}",
                contents.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        // Write to a sibling file first so a crash never leaves a truncated
        // state file behind.
        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        tokio::fs::write(&temporary, contents).await?;
        tokio::fs::rename(&temporary, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: Key) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        Ok(values.remove(key.as_str()))
    }

    /// Fails without touching the file when the value would push it past
    /// the size limit.
    async fn set(&self, key: Key, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.as_str().to_owned(), value.to_owned());
        self.store(&values).await
    }

    async fn remove(&self, key: Key) -> Result<()> {
        self.multi_remove(&[key]).await
    }

    /// Removing always works on a file that is too large or unparsable, so
    /// clearing data recovers from a bad state file. An unparsable file is
    /// replaced by an empty one.
    async fn multi_remove(&self, keys: &[Key]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = match self.read(None).await {
            Ok(values) => values,
            Err(e) if e.kind == ErrorKind::DataLoss => {
                warn!("discarding unreadable {}: {e}", self.path.display());
                return self.store(&BTreeMap::new()).await;
            }
            Err(e) => return Err(e),
        };

        let before = values.len();
        for key in keys {
            values.remove(key.as_str());
        }

        if values.len() == before {
            return Ok(());
        }
        self.store(&values).await
    }
}

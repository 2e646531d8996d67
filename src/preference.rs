//! The user's preferred streaming platform.
//!
//! A single platform key is persisted. Interested parties can
//! [`subscribe`](Preferences::subscribe) to changes instead of re-reading
//! storage.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    error::{Error, Result},
    platform,
    storage::{Key, Storage},
};

pub struct Preferences {
    storage: Arc<dyn Storage>,
    changes: watch::Sender<Option<String>>,
}

impl Preferences {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (changes, _) = watch::channel(None);
        Self { storage, changes }
    }

    /// Returns the preferred platform key, if any.
    ///
    /// Read failures are logged and reported as no preference.
    pub async fn get(&self) -> Option<String> {
        let platform = match self.storage.get(Key::PreferredPlatform).await {
            Ok(platform) => platform,
            Err(e) => {
                error!("could not read preferred platform: {e}");
                return None;
            }
        };
        debug!("preferred platform: {platform:?}");

        self.changes.send_if_modified(|current| {
            if *current == platform {
                false
            } else {
                current.clone_from(&platform);
                true
            }
        });

        platform
    }

    /// Persists `key` as the preferred platform.
    ///
    /// Switching to another platform also forgets the last resolution, so
    /// reopening the same link resolves it for the new platform.
    ///
    /// Storage backends have been seen to drop writes silently, so the value
    /// is read back after writing and written once more on a mismatch. This
    /// is a workaround for those backends, not a consistency guarantee: the
    /// outcome of the second attempt is only logged.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `key` is not a known platform or the first write
    /// fails.
    pub async fn set(&self, key: &str) -> Result<()> {
        if platform::lookup(key).is_none() {
            return Err(Error::invalid_argument(format!("unknown platform: {key}")));
        }

        let previous = self.storage.get(Key::PreferredPlatform).await.ok().flatten();

        info!("setting preferred platform to {key}");
        if let Err(e) = self.storage.set(Key::PreferredPlatform, key).await {
            error!("could not write preferred platform: {e}");
            return Err(e);
        }

        let saved = self.storage.get(Key::PreferredPlatform).await.ok().flatten();
        if saved.as_deref() != Some(key) {
            error!("preferred platform verification failed: expected {key}, got {saved:?}");

            if let Err(e) = self.storage.set(Key::PreferredPlatform, key).await {
                warn!("second write of preferred platform failed: {e}");
            }
            let second = self.storage.get(Key::PreferredPlatform).await.ok().flatten();
            debug!("second verification: {second:?}");
        }

        if previous.as_deref() != Some(key) {
            self.forget_last_resolution().await;
        }

        self.changes.send_replace(Some(key.to_owned()));
        Ok(())
    }

    /// The remembered destination belongs to the previous platform.
    async fn forget_last_resolution(&self) {
        let keys = [Key::LastResolutionSource, Key::LastRedirectDestination];
        if let Err(e) = self.storage.multi_remove(&keys).await {
            warn!("could not forget last resolution: {e}");
        }
    }

    /// Forgets the preferred platform.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the storage backend fails.
    pub async fn clear(&self) -> Result<()> {
        self.storage.remove(Key::PreferredPlatform).await?;
        self.changes.send_replace(None);
        Ok(())
    }

    /// Subscribes to changes of the preferred platform.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.changes.subscribe()
    }
}

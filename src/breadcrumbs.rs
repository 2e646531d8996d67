//! Diagnostic breadcrumbs.
//!
//! Breadcrumbs record the last link received, the last API response and so
//! on, so a failed redirect can be diagnosed after the fact. Recording is
//! best effort: a failing write is logged and otherwise ignored, so
//! diagnostics never break a redirect.

use std::{fmt, sync::Arc};

use crate::{
    error::Result,
    storage::{Key, Storage},
};

/// Slots shown by [`Breadcrumbs::snapshot`].
pub const SLOTS: [Key; 6] = [
    Key::LastReceivedLink,
    Key::InitialLaunchUrl,
    Key::LastRecognizedLink,
    Key::LastRedirectDestination,
    Key::LastApiResponse,
    Key::LastApiError,
];

/// Longest value recorded, in bytes. API responses are cut off after this.
pub const MAX_VALUE_LEN: usize = 16 * 1024;

#[derive(Clone)]
pub struct Breadcrumbs {
    storage: Arc<dyn Storage>,
}

/// Breadcrumb values at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: Vec<(Key, Option<String>)>,
}

impl Snapshot {
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&str> {
        self.entries
            .iter()
            .find(|(slot, _)| *slot == key)
            .and_then(|(_, value)| value.as_deref())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}: {}", value.as_deref().unwrap_or("-"))?;
        }
        Ok(())
    }
}

impl Breadcrumbs {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Writes a breadcrumb, ignoring failures.
    ///
    /// Values longer than [`MAX_VALUE_LEN`] are truncated.
    pub async fn record(&self, key: Key, value: &str) {
        let value = truncate(value, MAX_VALUE_LEN);
        if let Err(e) = self.storage.set(key, value).await {
            warn!("could not record {key}: {e}");
        }
    }

    /// Reads all breadcrumbs. Slots that cannot be read show as empty.
    pub async fn snapshot(&self) -> Snapshot {
        let mut entries = Vec::with_capacity(SLOTS.len());
        for key in SLOTS {
            let value = match self.storage.get(key).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("could not read {key}: {e}");
                    None
                }
            };
            entries.push((key, value));
        }

        Snapshot { entries }
    }

    /// Removes all breadcrumbs together with the loop suppression record.
    ///
    /// The preferred platform is left alone.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the storage backend fails.
    pub async fn clear_all(&self) -> Result<()> {
        let mut keys = SLOTS.to_vec();
        keys.extend([Key::LastResolutionSource, Key::TestMode]);

        self.storage.multi_remove(&keys).await?;
        info!("cleared debug data");

        Ok(())
    }
}

fn truncate(value: &str, max_len: usize) -> &str {
    if value.len() <= max_len {
        return value;
    }

    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    debug!("truncating breadcrumb of {} bytes", value.len());
    &value[..end]
}

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info, instrument, warn};

mod format;
mod matcher;

pub use format::Format;

use matcher::Replacer;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("dictionary file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("error reading dictionary file: {0}")]
    Read(#[from] io::Error),

    #[error("dictionary {} has a non valid format", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("{format} parse error: {message}")]
    Parse { format: Format, message: String },

    #[error("{0} dictionary must be a mapping of keys to values")]
    NotAMapping(Format),

    #[error("nested value for key `{0}` is not supported")]
    NestedValue(String),

    #[error("error building matcher: {0}")]
    Matcher(#[from] aho_corasick::BuildError),
}

/// Immutable snapshot of the mapping together with its compiled matcher.
#[derive(Debug)]
struct Dictionary {
    entries: BTreeMap<String, String>,
    replacer: Option<Replacer>,
}

impl Dictionary {
    fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            replacer: None,
        }
    }

    fn build(entries: BTreeMap<String, String>) -> Result<Self, LoadError> {
        let replacer = if entries.is_empty() {
            None
        } else {
            Some(Replacer::new(&entries)?)
        };
        Ok(Self { entries, replacer })
    }
}

/// Result of [`DictionaryStore::maybe_refresh`].
#[derive(Debug)]
pub enum Refresh {
    /// The deadline is not reached, or another caller is already reloading.
    NotDue,
    /// The file was merged; holds the resulting number of entries.
    Loaded(usize),
    /// The reload failed and the previous mapping stays in use.
    Retained(LoadError),
}

/// Owns the substring to replacement mapping loaded from `path`.
///
/// Readers get a shared snapshot; a reload builds the merged mapping aside
/// and publishes it only if it loaded and compiled completely.
#[derive(Debug)]
pub struct DictionaryStore {
    path: PathBuf,
    refresh_interval: Duration,
    current: RwLock<Arc<Dictionary>>,
    /// `None` when the interval is too large to schedule another reload.
    next_refresh: Mutex<Option<Instant>>,
}

impl DictionaryStore {
    /// Creates the store and performs the mandatory initial load.
    pub fn open(path: impl Into<PathBuf>, refresh_interval: Duration) -> Result<Self, LoadError> {
        Self::open_at(path.into(), refresh_interval, Instant::now())
    }

    fn open_at(path: PathBuf, refresh_interval: Duration, now: Instant) -> Result<Self, LoadError> {
        let next_refresh = now.checked_add(refresh_interval);
        if next_refresh.is_none() {
            warn!(
                kind = "refresh interval out of range",
                msg = "dictionary will not be refreshed"
            );
        }
        let store = Self {
            path,
            refresh_interval,
            current: RwLock::new(Arc::new(Dictionary::empty())),
            next_refresh: Mutex::new(next_refresh),
        };
        store.load()?;
        debug!(msg = "initial dictionary", dictionary = ?store.current.read().entries);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the dictionary file and merges its entries into the current
    /// mapping. Keys missing from the file are kept.
    ///
    /// On failure the mapping is left untouched and the error is returned;
    /// [`open`](Self::open) treats it as fatal, [`maybe_refresh`](Self::maybe_refresh)
    /// logs it and keeps serving the previous mapping.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<usize, LoadError> {
        let entries = self.try_load()?;
        info!(status = "loaded", entries);
        Ok(entries)
    }

    fn try_load(&self) -> Result<usize, LoadError> {
        let format = Format::from_path(&self.path)
            .ok_or_else(|| LoadError::UnsupportedFormat(self.path.clone()))?;
        let content = std::fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(self.path.clone()),
            _ => LoadError::Read(err),
        })?;
        let loaded = format.parse(&content)?;

        // Readers keep going while the merged matcher is built.
        let current = self.current.upgradable_read();
        let mut merged = current.entries.clone();
        merged.extend(loaded);
        let len = merged.len();
        if merged != current.entries {
            let dictionary = Dictionary::build(merged)?;
            *RwLockUpgradableReadGuard::upgrade(current) = Arc::new(dictionary);
        }
        Ok(len)
    }

    /// Reloads the dictionary if `now` has reached the refresh deadline, then
    /// schedules the next one, whether the reload worked or not.
    ///
    /// Concurrent callers get [`Refresh::NotDue`] while another one reloads.
    pub fn maybe_refresh(&self, now: Instant) -> Refresh {
        let Some(mut next_refresh) = self.next_refresh.try_lock() else {
            return Refresh::NotDue;
        };
        match *next_refresh {
            Some(deadline) if now >= deadline => {}
            _ => return Refresh::NotDue,
        }

        info!(msg = "refreshing dictionary file");
        let refresh = match self.load() {
            Ok(entries) => Refresh::Loaded(entries),
            Err(err) => {
                warn!(
                    kind = "dictionary load",
                    msg = "continuing with old dictionary",
                    path = %self.path.display(),
                    %err
                );
                Refresh::Retained(err)
            }
        };
        *next_refresh = now.checked_add(self.refresh_interval);
        refresh
    }

    /// Replaces every occurrence of every key in `text` in a single scan.
    ///
    /// Returns the rewritten text and whether any key was found.
    pub fn lookup(&self, text: &str) -> (String, bool) {
        let dictionary = self.snapshot();
        match &dictionary.replacer {
            Some(replacer) => replacer.replace_all(text),
            None => (text.to_string(), false),
        }
    }

    /// Copy of the current mapping.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.snapshot().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Dictionary> {
        self.current.read().clone()
    }
}

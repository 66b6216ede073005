use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, instrument, trace};

use crate::config::{Config, ConfigError};
use crate::dictionary::{DictionaryStore, LoadError};
use crate::event::{source_text, Event, EventError};

/// Errors preventing the filter from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("error loading dictionary file {}: {source}", .path.display())]
    InitialLoad {
        path: std::path::PathBuf,
        source: LoadError,
    },
}

/// Errors affecting a single event, never surfaced past [`ScrubFilter::process`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("error converting field value to text: {0}")]
    Stringify(#[from] serde_json::Error),

    #[error("error tagging event: {0}")]
    Tag(#[from] EventError),
}

/// What [`ScrubFilter::process`] did to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The event has no such field.
    Skipped,
    /// No dictionary key was found in the field.
    Unmatched,
    /// The field was rewritten.
    Matched,
    /// Processing failed; the event was left as it was.
    Failed,
}

#[derive(Debug)]
pub struct ScrubFilter {
    field: String,
    add_tag: Vec<String>,
    store: DictionaryStore,
}

impl ScrubFilter {
    /// Validates the configuration and performs the initial dictionary load.
    #[instrument(skip_all)]
    pub fn configure(config: &Config) -> Result<Self, StartupError> {
        config.validate()?;
        let store = DictionaryStore::open(&config.dictionary_path, *config.refresh_interval)
            .map_err(|source| StartupError::InitialLoad {
                path: config.dictionary_path.clone(),
                source,
            })?;

        info!(
            status = "configured",
            field = config.field,
            dictionary_path = %store.path().display(),
            entries = store.len(),
        );
        Ok(Self {
            field: config.field.clone(),
            add_tag: config.add_tag.clone(),
            store,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Applies the dictionary to the configured field of `event`.
    ///
    /// Failures are logged and reported as [`Outcome::Failed`] with the event
    /// untouched.
    pub fn process<E: Event + ?Sized>(&self, event: &mut E) -> Outcome {
        self.process_at(event, Instant::now())
    }

    fn process_at<E: Event + ?Sized>(&self, event: &mut E, now: Instant) -> Outcome {
        match self.try_process(event, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    during = "attempting to translate from dictionary",
                    field = self.field,
                    %err
                );
                Outcome::Failed
            }
        }
    }

    fn try_process<E: Event + ?Sized>(
        &self,
        event: &mut E,
        now: Instant,
    ) -> Result<Outcome, ProcessError> {
        let Some(value) = event.get(&self.field) else {
            return Ok(Outcome::Skipped);
        };
        let source = source_text(value)?;

        self.store.maybe_refresh(now);

        let (translation, matched) = self.store.lookup(&source);
        trace!(source, translation, matched);
        if !matched {
            return Ok(Outcome::Unmatched);
        }

        let previous = event.get(&self.field).cloned();
        event.set(&self.field, Value::String(translation));
        if let Err(err) = self.filter_matched(event) {
            if let Some(previous) = previous {
                event.set(&self.field, previous);
            }
            return Err(err);
        }
        Ok(Outcome::Matched)
    }

    fn filter_matched<E: Event + ?Sized>(&self, event: &mut E) -> Result<(), ProcessError> {
        for tag in &self.add_tag {
            event.add_tag(tag)?;
        }
        Ok(())
    }
}

pub mod config;
pub mod dictionary;
pub mod event;
pub mod filter;
pub mod pipeline;

pub use config::{Config, ConfigError};
pub use dictionary::{DictionaryStore, LoadError, Refresh};
pub use event::{Event, EventError};
pub use filter::{Outcome, ProcessError, ScrubFilter, StartupError};

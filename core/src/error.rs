//! Error types shared across the engine.
//!
//! Resource problems (missing word lists, storage trouble) are recovered
//! close to where they occur and logged; the variants here cover the cases
//! callers can meaningfully react to.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A cache was requested with a capacity of zero entries.
    #[error("cache capacity must be non-zero: {name}")]
    InvalidCacheCapacity { name: String },

    /// A cache with this name is already registered.
    #[error("cache already registered: {name}")]
    DuplicateCache { name: String },

    /// A persistent store rejected or failed an operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// The vocabulary store has no room left for new entries.
    #[error("storage is full")]
    StorageFull,

    /// No word list could be found for the requested language.
    #[error("no word list for language: {language}")]
    WordListMissing { language: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Building or reading a compiled word list index failed.
    #[error("word list index error: {0}")]
    WordIndex(#[from] fst::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<redb::Error> for Error {
    fn from(err: redb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

//! softboard-core
//!
//! Input-to-suggestion pipeline shared by soft-keyboard frontends: debounced
//! keystroke processing, static dictionary plus learned-vocabulary lookup,
//! swipe candidate arbitration and memory-pressure-aware caching.
//!
//! This crate provides production-ready implementations using FST for word
//! lists, bincode for record serialization, and redb for the learned
//! vocabulary store only.
//!
//! Public API:
//! - `InputProcessor` - Debounced keystroke/word processing with stale-result rejection
//! - `DictionaryService` - Word membership and ranked spelling suggestions
//! - `UserDictionary` - Learned vocabulary with persistent store and mirror cache
//! - `SwipeArbiter` - Near-tie disambiguation for swipe-decoded candidates
//! - `CacheManager` - Named LRU caches with tiered memory-pressure trimming
//! - `NextWordModel` - Learned word-to-word transitions for bigram context
//! - `Config` - Engine tunables and feature thresholds
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Core modules
pub mod error;
pub use error::{Error, Result};

pub mod cache;
pub use cache::{
    CacheHandle, CacheManager, CacheStats, MemorySignal, MemoryStatus, MemoryStatusSource,
    PressureLevel,
};

pub mod settings;
pub use settings::{KeyboardSettings, SettingsHandle, SettingsPublisher};

pub mod userdict;
pub use userdict::{
    LearnedWord, MemoryVocabularyStore, RedbVocabularyStore, UserDictionary, VocabularyStore,
    WordSource,
};

pub mod dictionary;
pub use dictionary::{
    DictionaryService, DictionarySource, FstDictionarySource, SpellingSuggestion,
    StaticDictionarySource, SuggestionSource, TextDictionarySource,
};

pub mod predictor;
pub use predictor::NextWordModel;

pub mod processor;
pub use processor::{
    InputProcessor, ProcessingResult, Script, SuggestionSink, SuggestionUpdate, WordState,
};

pub mod swipe;
pub use swipe::{
    ArbitrationResult, CandidateResult, KeyPosition, SwipeArbiter, SwipePath, SwipePoint,
    WinReason,
};

/// Engine-wide configuration.
///
/// These are host-independent tunables. Per-user toggles that change at
/// runtime (spell check on/off, suggestion count, ...) live in
/// [`KeyboardSettings`] and flow through a [`SettingsHandle`] instead.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Input Processing
    /// Debounce window for keystroke processing, in milliseconds
    pub debounce_ms: u64,
    /// Minimum grapheme count before an invalid word gets suggestions
    pub min_suggestion_graphemes: usize,
    /// Hard upper bound on ranked suggestions, regardless of user settings
    pub max_suggestions: usize,

    // Learned Vocabulary
    /// Words longer than this (in chars) are never learned
    pub max_word_length: usize,
    /// Consecutive storage failures before lookups short-circuit
    pub breaker_failure_threshold: u32,
    /// How long lookups stay short-circuited after the breaker opens (ms)
    pub breaker_cooldown_ms: u64,
    /// Learned entries with frequency below this are removed by the
    /// storage-full cleanup sweep
    pub cleanup_frequency_floor: u64,

    // Cache Sizes (entries)
    /// Per-word processing results, keyed by normalized buffer
    pub word_result_cache_size: usize,
    /// Dictionary membership verdicts
    pub dictionary_word_cache_size: usize,
    /// Ranked suggestion lists, keyed by normalized prefix
    pub suggestion_cache_size: usize,
    /// In-memory mirror of the learned vocabulary for the active language
    pub vocabulary_mirror_size: usize,

    // Memory Pressure
    /// Interval between memory status polls (ms)
    pub memory_poll_interval_ms: u64,
    /// Available/total fraction below which pressure is Moderate
    pub low_memory_fraction: f64,
    /// Available/total fraction below which pressure is Critical
    pub critical_memory_fraction: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Input processing - a keystroke burst coalesces into one pass
            debounce_ms: 250,
            min_suggestion_graphemes: 2,
            max_suggestions: 8,
            // Learned vocabulary
            max_word_length: 48,
            breaker_failure_threshold: 5,
            breaker_cooldown_ms: 30_000,
            cleanup_frequency_floor: 2,
            // Cache sizes - small, phones keep us honest
            word_result_cache_size: 256,
            dictionary_word_cache_size: 2048,
            suggestion_cache_size: 512,
            vocabulary_mirror_size: 10_000,
            // Memory pressure polling
            memory_poll_interval_ms: 30_000,
            low_memory_fraction: 0.15,
            critical_memory_fraction: 0.05,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Memory poll interval as a [`Duration`].
    pub fn memory_poll_interval(&self) -> Duration {
        Duration::from_millis(self.memory_poll_interval_ms)
    }

    /// Breaker cooldown as a [`Duration`].
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.max_suggestions == 0 {
            return Err(Error::Config("max_suggestions must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.low_memory_fraction)
            || !(0.0..=1.0).contains(&self.critical_memory_fraction)
        {
            return Err(Error::Config(
                "memory fractions must be within 0.0..=1.0".into(),
            ));
        }
        if self.critical_memory_fraction > self.low_memory_fraction {
            return Err(Error::Config(
                "critical_memory_fraction must not exceed low_memory_fraction".into(),
            ));
        }
        Ok(())
    }
}

/// Utility helpers.
pub mod utils {
    /// Punctuation ignored when matching contractions and hyphenated words.
    pub const WORD_PUNCTUATION: [char; 4] = ['\'', '\u{2019}', '-', '\u{2010}'];

    /// Joins language and word in compound cache keys. A unit separator
    /// cannot appear in normalized words.
    pub const KEY_SEPARATOR: char = '\u{1f}';

    /// Normalize input strings: NFC, trimmed, case-folded.
    ///
    /// All lookup keys in the engine (dictionary membership, learned
    /// vocabulary, caches) go through this.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().trim().to_lowercase()
    }

    /// Remove apostrophes and hyphens so "dont" can match "don't".
    pub fn strip_word_punctuation(s: &str) -> String {
        s.chars().filter(|c| !WORD_PUNCTUATION.contains(c)).collect()
    }

    /// Number of user-perceived characters in a string.
    pub fn grapheme_count(s: &str) -> usize {
        use unicode_segmentation::UnicodeSegmentation;
        s.graphemes(true).count()
    }

    /// True when every char is a digit, or a digit separator between digits.
    pub fn is_numeric_word(s: &str) -> bool {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ':' | '/'))
            && s.chars().any(|c| c.is_ascii_digit())
    }
}

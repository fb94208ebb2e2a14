//! Learned vocabulary for softboard-core.
//!
//! Responsibilities implemented here:
//! - `LearnedWord`: the persisted record for one learned word.
//! - `VocabularyStore`: async storage port with in-memory and redb backends.
//! - `UserDictionary`: the accessor the rest of the engine talks to. It keeps
//!   a mirror cache of the active language for synchronous membership checks
//!   and shields the interactive path from a failing store with a circuit
//!   breaker.
//!
//! Store keys are always `(language, normalized)`; the display casing lives
//! inside the record. A single store holds every language, the mirror only
//! ever holds one.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheHandle, CacheManager, VOCABULARY_CACHE};
use crate::error::{Error, Result};
use crate::settings::SettingsHandle;
use crate::utils;

/// How a learned word first entered the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordSource {
    Typed,
    Swiped,
    Selected,
}

/// One persisted vocabulary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedWord {
    /// Display form as the user committed it (trimmed, casing kept).
    pub word: String,
    /// NFC, case-folded lookup key.
    pub normalized: String,
    pub language: String,
    pub frequency: u64,
    pub source: WordSource,
    pub char_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl LearnedWord {
    pub fn new(word: &str, language: &str, source: WordSource) -> Self {
        let word = word.trim().to_string();
        let now = Utc::now();
        Self {
            normalized: utils::normalize(&word),
            char_count: word.chars().count(),
            word,
            language: language.to_string(),
            frequency: 1,
            source,
            created_at: now,
            last_used_at: now,
        }
    }

    /// Bump the counters for a word seen again. The original source sticks.
    pub fn relearn(&mut self) {
        self.frequency = self.frequency.saturating_add(1);
        self.last_used_at = Utc::now();
    }
}

/// Storage port for learned words. Implementations must be safe to call from
/// concurrent tasks; all calls stay off the interactive path.
#[async_trait]
pub trait VocabularyStore: Send + Sync {
    async fn upsert(&self, word: &LearnedWord) -> Result<()>;
    async fn get(&self, language: &str, normalized: &str) -> Result<Option<LearnedWord>>;
    async fn remove(&self, language: &str, normalized: &str) -> Result<bool>;
    /// One verdict per requested key, in request order.
    async fn contains_batch(&self, language: &str, normalized: &[String]) -> Result<Vec<bool>>;
    /// Words whose normalized form starts with `prefix`, most frequent first.
    async fn prefix_search(
        &self,
        language: &str,
        prefix: &str,
        max: usize,
    ) -> Result<Vec<LearnedWord>>;
    async fn most_frequent(&self, language: &str, max: usize) -> Result<Vec<LearnedWord>>;
    async fn words_for_language(&self, language: &str) -> Result<Vec<LearnedWord>>;
    /// Drop entries with frequency strictly below `below`. Returns the count
    /// removed.
    async fn remove_low_frequency(&self, language: &str, below: u64) -> Result<usize>;
}

fn sort_by_frequency(words: &mut Vec<LearnedWord>, max: usize) {
    words.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.word.cmp(&b.word)));
    words.truncate(max);
}

/// A thread-safe in-memory vocabulary store.
///
/// Used in tests and by hosts that do not want persistence. The optional
/// capacity bound makes it return [`Error::StorageFull`] for new words once
/// full, which exercises the same cleanup path a full disk would.
#[derive(Debug, Default)]
pub struct MemoryVocabularyStore {
    words: RwLock<std::collections::HashMap<(String, String), LearnedWord>>,
    capacity: Option<usize>,
}

impl MemoryVocabularyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that holds at most `capacity` records.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            words: RwLock::new(std::collections::HashMap::new()),
            capacity: Some(capacity),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, std::collections::HashMap<(String, String), LearnedWord>> {
        self.words.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, std::collections::HashMap<(String, String), LearnedWord>> {
        self.words.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VocabularyStore for MemoryVocabularyStore {
    async fn upsert(&self, word: &LearnedWord) -> Result<()> {
        let key = (word.language.clone(), word.normalized.clone());
        let mut words = self.write();
        if let Some(cap) = self.capacity {
            if !words.contains_key(&key) && words.len() >= cap {
                return Err(Error::StorageFull);
            }
        }
        words.insert(key, word.clone());
        Ok(())
    }

    async fn get(&self, language: &str, normalized: &str) -> Result<Option<LearnedWord>> {
        let key = (language.to_string(), normalized.to_string());
        Ok(self.read().get(&key).cloned())
    }

    async fn remove(&self, language: &str, normalized: &str) -> Result<bool> {
        let key = (language.to_string(), normalized.to_string());
        Ok(self.write().remove(&key).is_some())
    }

    async fn contains_batch(&self, language: &str, normalized: &[String]) -> Result<Vec<bool>> {
        let words = self.read();
        Ok(normalized
            .iter()
            .map(|n| words.contains_key(&(language.to_string(), n.clone())))
            .collect())
    }

    async fn prefix_search(
        &self,
        language: &str,
        prefix: &str,
        max: usize,
    ) -> Result<Vec<LearnedWord>> {
        let mut out: Vec<LearnedWord> = self
            .read()
            .values()
            .filter(|w| w.language == language && w.normalized.starts_with(prefix))
            .cloned()
            .collect();
        sort_by_frequency(&mut out, max);
        Ok(out)
    }

    async fn most_frequent(&self, language: &str, max: usize) -> Result<Vec<LearnedWord>> {
        let mut out: Vec<LearnedWord> = self
            .read()
            .values()
            .filter(|w| w.language == language)
            .cloned()
            .collect();
        sort_by_frequency(&mut out, max);
        Ok(out)
    }

    async fn words_for_language(&self, language: &str) -> Result<Vec<LearnedWord>> {
        Ok(self
            .read()
            .values()
            .filter(|w| w.language == language)
            .cloned()
            .collect())
    }

    async fn remove_low_frequency(&self, language: &str, below: u64) -> Result<usize> {
        let mut words = self.write();
        let before = words.len();
        words.retain(|(lang, _), w| lang != language || w.frequency >= below);
        Ok(before - words.len())
    }
}

const WORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("learned_words");

/// Store keys sort per language: the separator ranks below every printable
/// character, so language ranges stay contiguous.
fn record_key(language: &str, normalized: &str) -> String {
    format!("{language}{}{normalized}", utils::KEY_SEPARATOR)
}

fn decode_record(bytes: &[u8]) -> Option<LearnedWord> {
    match bincode::deserialize(bytes) {
        Ok(word) => Some(word),
        Err(err) => {
            warn!(%err, "skipping corrupt vocabulary record");
            None
        }
    }
}

/// Redb-backed vocabulary store.
///
/// Every operation runs inside `spawn_blocking` so a slow disk never stalls
/// the async executor. Writes are single atomic transactions.
pub struct RedbVocabularyStore {
    db: Arc<redb::Database>,
}

impl RedbVocabularyStore {
    /// Create or open a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let db = Self::open_inner(path.as_ref()).map_err(Error::from)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn open_inner(path: &Path) -> std::result::Result<redb::Database, redb::Error> {
        let db = redb::Database::create(path)?;
        // Create the table up front so read transactions always find it.
        let txn = db.begin_write()?;
        {
            txn.open_table(WORDS_TABLE)?;
        }
        txn.commit()?;
        Ok(db)
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&redb::Database) -> std::result::Result<T, redb::Error> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        match tokio::task::spawn_blocking(move || f(&db)).await {
            Ok(result) => result.map_err(Error::from),
            Err(err) => Err(Error::Storage(format!("storage task failed: {err}"))),
        }
    }

    fn scan_prefix(
        db: &redb::Database,
        start: &str,
    ) -> std::result::Result<Vec<LearnedWord>, redb::Error> {
        let txn = db.begin_read()?;
        let table = txn.open_table(WORDS_TABLE)?;
        let mut out = Vec::new();
        for item in table.range::<&str>(start..)? {
            let (key, value) = item?;
            if !key.value().starts_with(start) {
                break;
            }
            if let Some(word) = decode_record(value.value()) {
                out.push(word);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl VocabularyStore for RedbVocabularyStore {
    async fn upsert(&self, word: &LearnedWord) -> Result<()> {
        let key = record_key(&word.language, &word.normalized);
        let bytes = bincode::serialize(word)?;
        self.with_db(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(WORDS_TABLE)?;
                table.insert(key.as_str(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get(&self, language: &str, normalized: &str) -> Result<Option<LearnedWord>> {
        let key = record_key(language, normalized);
        self.with_db(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(WORDS_TABLE)?;
            let record = match table.get(key.as_str())? {
                Some(guard) => decode_record(guard.value()),
                None => None,
            };
            Ok(record)
        })
        .await
    }

    async fn remove(&self, language: &str, normalized: &str) -> Result<bool> {
        let key = record_key(language, normalized);
        self.with_db(move |db| {
            let txn = db.begin_write()?;
            let removed;
            {
                let mut table = txn.open_table(WORDS_TABLE)?;
                removed = table.remove(key.as_str())?.is_some();
            }
            txn.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn contains_batch(&self, language: &str, normalized: &[String]) -> Result<Vec<bool>> {
        let keys: Vec<String> = normalized
            .iter()
            .map(|n| record_key(language, n))
            .collect();
        self.with_db(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(WORDS_TABLE)?;
            let mut out = Vec::with_capacity(keys.len());
            for key in &keys {
                out.push(table.get(key.as_str())?.is_some());
            }
            Ok(out)
        })
        .await
    }

    async fn prefix_search(
        &self,
        language: &str,
        prefix: &str,
        max: usize,
    ) -> Result<Vec<LearnedWord>> {
        let start = record_key(language, prefix);
        let mut out = self
            .with_db(move |db| Self::scan_prefix(db, &start))
            .await?;
        sort_by_frequency(&mut out, max);
        Ok(out)
    }

    async fn most_frequent(&self, language: &str, max: usize) -> Result<Vec<LearnedWord>> {
        let start = record_key(language, "");
        let mut out = self
            .with_db(move |db| Self::scan_prefix(db, &start))
            .await?;
        sort_by_frequency(&mut out, max);
        Ok(out)
    }

    async fn words_for_language(&self, language: &str) -> Result<Vec<LearnedWord>> {
        let start = record_key(language, "");
        self.with_db(move |db| Self::scan_prefix(db, &start)).await
    }

    async fn remove_low_frequency(&self, language: &str, below: u64) -> Result<usize> {
        let start = record_key(language, "");
        self.with_db(move |db| {
            let txn = db.begin_write()?;
            let removed;
            {
                let mut table = txn.open_table(WORDS_TABLE)?;
                let mut doomed = Vec::new();
                {
                    for item in table.range::<&str>(start.as_str()..)? {
                        let (key, value) = item?;
                        if !key.value().starts_with(start.as_str()) {
                            break;
                        }
                        match decode_record(value.value()) {
                            Some(word) if word.frequency >= below => {}
                            // Low-frequency and corrupt records both go.
                            _ => doomed.push(key.value().to_string()),
                        }
                    }
                }
                for key in &doomed {
                    table.remove(key.as_str())?;
                }
                removed = doomed.len();
            }
            txn.commit()?;
            Ok(removed)
        })
        .await
    }
}

/// Trips after consecutive storage failures so lookups stop hammering a
/// store that is clearly down. Learns keep trying; the first success closes
/// the breaker again.
struct CircuitBreaker {
    failures: AtomicU32,
    open_until: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            open_until: Mutex::new(None),
            threshold,
            cooldown,
        }
    }

    fn lock_open_until(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.open_until.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_open(&self) -> bool {
        let mut open_until = self.lock_open_until();
        match *open_until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                *open_until = None;
                self.failures.store(0, Ordering::Relaxed);
                debug!("vocabulary storage breaker closed after cooldown");
                false
            }
            None => false,
        }
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            let mut open_until = self.lock_open_until();
            if open_until.is_none() {
                *open_until = Some(Instant::now() + self.cooldown);
                warn!(
                    failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "vocabulary storage failing, lookups short-circuited"
                );
            }
        }
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        if self.lock_open_until().take().is_some() {
            debug!("vocabulary storage breaker closed after successful operation");
        }
    }
}

/// Scan width used when a lookup tier needs more rows than it will return.
const TIER_SCAN_LIMIT: usize = 64;

/// Index `normalized` under its stripped form when the two differ.
fn index_contraction(
    contractions: &mut std::collections::BTreeMap<String, Vec<String>>,
    normalized: &str,
) {
    let stripped = utils::strip_word_punctuation(normalized);
    if stripped == normalized || stripped.is_empty() {
        return;
    }
    let forms = contractions.entry(stripped).or_default();
    if !forms.iter().any(|form| form == normalized) {
        forms.push(normalized.to_string());
    }
}

/// The accessor the engine uses for learned words.
pub struct UserDictionary {
    store: Arc<dyn VocabularyStore>,
    settings: SettingsHandle,
    /// normalized -> frequency for the active language only.
    mirror: CacheHandle<String, u64>,
    /// stripped form -> learned forms that carry punctuation, active
    /// language only ("dont" -> ["don't"]). Rebuilt with the mirror and
    /// patched on learn and remove; sorted so stripped-prefix lookups can
    /// walk a range instead of scanning the store.
    contractions: Mutex<std::collections::BTreeMap<String, Vec<String>>>,
    language: RwLock<String>,
    breaker: CircuitBreaker,
    max_word_length: usize,
    cleanup_floor: u64,
}

impl UserDictionary {
    pub fn new(
        store: Arc<dyn VocabularyStore>,
        settings: SettingsHandle,
        caches: &CacheManager,
        config: &crate::Config,
    ) -> Result<Self> {
        let mirror = caches.create_cache(VOCABULARY_CACHE, config.vocabulary_mirror_size, None)?;
        Ok(Self {
            store,
            settings,
            mirror,
            contractions: Mutex::new(std::collections::BTreeMap::new()),
            language: RwLock::new(String::from("en")),
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_cooldown(),
            ),
            max_word_length: config.max_word_length,
            cleanup_floor: config.cleanup_frequency_floor,
        })
    }

    /// Point the mirror at `language` and rebuild it from the store,
    /// together with the contraction index. Call once at startup and again
    /// on every language switch.
    pub async fn initialize_cache(&self, language: &str) -> Result<()> {
        {
            let mut active = self.language.write().unwrap_or_else(|e| e.into_inner());
            *active = language.to_string();
        }
        self.mirror.clear();
        self.lock_contractions().clear();

        match self.store.words_for_language(language).await {
            Ok(words) => {
                self.breaker.record_success();
                let count = words.len();
                let mut contractions = self.lock_contractions();
                for word in words {
                    index_contraction(&mut contractions, &word.normalized);
                    self.mirror.insert(word.normalized, word.frequency);
                }
                drop(contractions);
                debug!(language, count, "vocabulary mirror rebuilt");
                Ok(())
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(language, %err, "vocabulary mirror rebuild failed, starting empty");
                Ok(())
            }
        }
    }

    /// Make `language` the active vocabulary. The mirror is rebuilt
    /// wholesale; nothing is patched across the switch window.
    pub async fn switch_language(&self, language: &str) -> Result<()> {
        self.initialize_cache(language).await
    }

    pub fn active_language(&self) -> String {
        self.language
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_contractions(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::BTreeMap<String, Vec<String>>> {
        self.contractions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unindex_contraction(&self, normalized: &str) {
        let stripped = utils::strip_word_punctuation(normalized);
        if stripped == normalized {
            return;
        }
        let mut contractions = self.lock_contractions();
        if let Some(forms) = contractions.get_mut(&stripped) {
            forms.retain(|form| form != normalized);
            if forms.is_empty() {
                contractions.remove(&stripped);
            }
        }
    }

    /// Synchronous membership check against the mirror. Refreshes the word's
    /// recency so hot words survive pressure trims.
    pub fn is_learned(&self, word: &str) -> bool {
        let normalized = utils::normalize(word);
        !normalized.is_empty() && self.mirror.get(&normalized).is_some()
    }

    /// Learned frequency from the mirror, if present.
    pub fn learned_frequency(&self, word: &str) -> Option<u64> {
        self.mirror.get(&utils::normalize(word))
    }

    /// True while the circuit breaker keeps lookups short-circuited.
    pub fn is_degraded(&self) -> bool {
        self.breaker.is_open()
    }

    /// Learn `word` or bump its frequency. Returns the stored record, or
    /// `Ok(None)` when the word is not learnable (settings off, blank,
    /// numeric, over-long) or the store failed.
    pub async fn learn(&self, word: &str, source: WordSource) -> Result<Option<LearnedWord>> {
        if !self.settings.current().learn_new_words {
            return Ok(None);
        }
        let normalized = utils::normalize(word);
        if normalized.is_empty()
            || utils::is_numeric_word(&normalized)
            || normalized.chars().count() > self.max_word_length
        {
            debug!(word, "skipping unlearnable input");
            return Ok(None);
        }
        let language = self.active_language();

        let existing = match self.store.get(&language, &normalized).await {
            Ok(existing) => existing,
            Err(err) => {
                self.breaker.record_failure();
                warn!(%err, "vocabulary lookup before learn failed");
                return Ok(None);
            }
        };

        let mut record = match existing {
            Some(mut word) => {
                word.relearn();
                word
            }
            None => LearnedWord::new(word, &language, source),
        };

        if let Err(err) = self.persist(&mut record, &language).await {
            self.breaker.record_failure();
            warn!(%err, word = %record.word, "failed to persist learned word");
            return Ok(None);
        }

        self.breaker.record_success();
        self.mirror.insert(record.normalized.clone(), record.frequency);
        index_contraction(&mut self.lock_contractions(), &record.normalized);
        debug!(word = %record.word, frequency = record.frequency, "learned word");
        Ok(Some(record))
    }

    async fn persist(&self, record: &mut LearnedWord, language: &str) -> Result<()> {
        match self.store.upsert(record).await {
            Err(Error::StorageFull) => {
                let swept = self
                    .store
                    .remove_low_frequency(language, self.cleanup_floor)
                    .await?;
                info!(swept, "vocabulary storage full, removed low-frequency words");
                self.store.upsert(record).await
            }
            other => other,
        }
    }

    /// Forget a word. Storage errors are logged and reported as `false`.
    pub async fn remove(&self, word: &str) -> Result<bool> {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return Ok(false);
        }
        let language = self.active_language();
        match self.store.remove(&language, &normalized).await {
            Ok(removed) => {
                self.breaker.record_success();
                self.mirror.remove(&normalized);
                self.unindex_contraction(&normalized);
                Ok(removed)
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(%err, word, "failed to remove learned word");
                Ok(false)
            }
        }
    }

    /// Learned words similar to `prefix`, best first: the exact match, then
    /// prefix matches by frequency, then punctuation-insensitive matches
    /// ("dont" surfaces "don't", never the other way around).
    pub async fn similar_words(&self, prefix: &str, max: usize) -> Vec<(String, u64)> {
        if max == 0 {
            return Vec::new();
        }
        if self.breaker.is_open() {
            debug!("similar_words short-circuited, storage breaker open");
            return Vec::new();
        }
        let normalized = utils::normalize(prefix);
        if normalized.is_empty() {
            return Vec::new();
        }
        let language = self.active_language();

        let mut out: Vec<(String, u64)> = Vec::new();
        let mut seen: AHashSet<String> = AHashSet::new();

        // Tier 1: exact match.
        match self.store.get(&language, &normalized).await {
            Ok(Some(word)) => {
                seen.insert(word.normalized.clone());
                out.push((word.word, word.frequency));
            }
            Ok(None) => {}
            Err(err) => {
                self.breaker.record_failure();
                warn!(%err, "similar_words exact lookup failed");
                return out;
            }
        }

        // Tier 2: prefix matches, most frequent first.
        if out.len() < max {
            match self
                .store
                .prefix_search(&language, &normalized, TIER_SCAN_LIMIT)
                .await
            {
                Ok(words) => {
                    for word in words {
                        if out.len() >= max {
                            break;
                        }
                        if seen.insert(word.normalized.clone()) {
                            out.push((word.word, word.frequency));
                        }
                    }
                }
                Err(err) => {
                    self.breaker.record_failure();
                    warn!(%err, "similar_words prefix lookup failed");
                    return out;
                }
            }
        }

        // Tier 3: punctuation-stripped matches from the contraction index.
        // Only learned forms that carry punctuation are indexed, so a plain
        // form never outranks what the user actually typed. The index walk
        // starts at the exact stripped form; an exact contraction is never
        // squeezed out by how crowded the vocabulary is.
        if out.len() < max {
            let stripped = utils::strip_word_punctuation(&normalized);
            let forms: Vec<String> = if stripped.is_empty() {
                Vec::new()
            } else {
                let contractions = self.lock_contractions();
                contractions
                    .range::<str, _>(stripped.as_str()..)
                    .take_while(|(key, _)| key.starts_with(&stripped))
                    .flat_map(|(_, words)| words.iter().cloned())
                    .take(TIER_SCAN_LIMIT)
                    .collect()
            };

            let mut matches: Vec<LearnedWord> = Vec::new();
            for form in forms {
                if form == normalized || seen.contains(&form) {
                    continue;
                }
                match self.store.get(&language, &form).await {
                    Ok(Some(word)) => matches.push(word),
                    // The index can outlive a record the cleanup sweep drops.
                    Ok(None) => {}
                    Err(err) => {
                        self.breaker.record_failure();
                        warn!(%err, "similar_words stripped lookup failed");
                        return out;
                    }
                }
            }
            sort_by_frequency(&mut matches, max.saturating_sub(out.len()));
            for word in matches {
                if seen.insert(word.normalized.clone()) {
                    out.push((word.word, word.frequency));
                }
            }
        }

        self.breaker.record_success();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::KeyboardSettings;
    use crate::Config;
    use std::sync::atomic::AtomicUsize;

    fn dictionary_with(store: Arc<dyn VocabularyStore>, config: &Config) -> UserDictionary {
        let caches = CacheManager::new(config);
        UserDictionary::new(
            store,
            SettingsHandle::fixed(KeyboardSettings::default()),
            &caches,
            config,
        )
        .unwrap()
    }

    /// Counts every store call; optionally fails the first `fail_first` of them.
    struct FlakyStore {
        inner: MemoryVocabularyStore,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FlakyStore {
        fn new(fail_first: usize) -> Self {
            Self {
                inner: MemoryVocabularyStore::new(),
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }

        fn tick(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            if n < self.fail_first {
                Err(Error::Storage("injected".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl VocabularyStore for FlakyStore {
        async fn upsert(&self, word: &LearnedWord) -> Result<()> {
            self.tick()?;
            self.inner.upsert(word).await
        }
        async fn get(&self, language: &str, normalized: &str) -> Result<Option<LearnedWord>> {
            self.tick()?;
            self.inner.get(language, normalized).await
        }
        async fn remove(&self, language: &str, normalized: &str) -> Result<bool> {
            self.tick()?;
            self.inner.remove(language, normalized).await
        }
        async fn contains_batch(
            &self,
            language: &str,
            normalized: &[String],
        ) -> Result<Vec<bool>> {
            self.tick()?;
            self.inner.contains_batch(language, normalized).await
        }
        async fn prefix_search(
            &self,
            language: &str,
            prefix: &str,
            max: usize,
        ) -> Result<Vec<LearnedWord>> {
            self.tick()?;
            self.inner.prefix_search(language, prefix, max).await
        }
        async fn most_frequent(&self, language: &str, max: usize) -> Result<Vec<LearnedWord>> {
            self.tick()?;
            self.inner.most_frequent(language, max).await
        }
        async fn words_for_language(&self, language: &str) -> Result<Vec<LearnedWord>> {
            self.tick()?;
            self.inner.words_for_language(language).await
        }
        async fn remove_low_frequency(&self, language: &str, below: u64) -> Result<usize> {
            self.tick()?;
            self.inner.remove_low_frequency(language, below).await
        }
    }

    #[tokio::test]
    async fn test_learn_and_membership() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        let learned = dict.learn("Hello", WordSource::Typed).await.unwrap();
        let record = learned.unwrap();
        assert_eq!(record.word, "Hello");
        assert_eq!(record.normalized, "hello");
        assert_eq!(record.frequency, 1);

        assert!(dict.is_learned("hello"));
        assert!(dict.is_learned("HELLO"));
        assert!(dict.is_learned("  hello "));
        assert!(!dict.is_learned("world"));
    }

    #[tokio::test]
    async fn test_relearn_increments_and_keeps_source() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        dict.learn("hello", WordSource::Typed).await.unwrap();
        let again = dict
            .learn("hello", WordSource::Swiped)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.frequency, 2);
        assert_eq!(again.source, WordSource::Typed);
        assert_eq!(dict.learned_frequency("hello"), Some(2));
    }

    #[tokio::test]
    async fn test_learn_rejects_invalid_input_without_store_calls() {
        let store = Arc::new(FlakyStore::new(0));
        let dict = dictionary_with(store.clone(), &Config::default());

        assert!(dict.learn("   ", WordSource::Typed).await.unwrap().is_none());
        assert!(dict.learn("12345", WordSource::Typed).await.unwrap().is_none());
        let too_long = "x".repeat(Config::default().max_word_length + 1);
        assert!(dict
            .learn(&too_long, WordSource::Typed)
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_learn_respects_settings_toggle() {
        let config = Config::default();
        let caches = CacheManager::new(&config);
        let dict = UserDictionary::new(
            Arc::new(MemoryVocabularyStore::new()),
            SettingsHandle::fixed(KeyboardSettings {
                learn_new_words: false,
                ..KeyboardSettings::default()
            }),
            &caches,
            &config,
        )
        .unwrap();

        assert!(dict.learn("hello", WordSource::Typed).await.unwrap().is_none());
        assert!(!dict.is_learned("hello"));
    }

    #[tokio::test]
    async fn test_remove_clears_mirror() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        dict.learn("goodbye", WordSource::Typed).await.unwrap();
        assert!(dict.is_learned("goodbye"));

        assert!(dict.remove("goodbye").await.unwrap());
        assert!(!dict.is_learned("goodbye"));
        assert!(!dict.remove("goodbye").await.unwrap());
    }

    #[tokio::test]
    async fn test_similar_words_tier_order() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        dict.learn("do", WordSource::Typed).await.unwrap();
        for _ in 0..3 {
            dict.learn("dog", WordSource::Typed).await.unwrap();
        }
        dict.learn("door", WordSource::Typed).await.unwrap();
        dict.learn("cat", WordSource::Typed).await.unwrap();

        let similar = dict.similar_words("do", 10).await;
        let words: Vec<&str> = similar.iter().map(|(w, _)| w.as_str()).collect();
        // Exact match leads even though "dog" is more frequent.
        assert_eq!(words, ["do", "dog", "door"]);

        let capped = dict.similar_words("do", 2).await;
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].0, "do");
    }

    #[tokio::test]
    async fn test_similar_words_contraction_direction() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        dict.learn("don't", WordSource::Typed).await.unwrap();
        dict.learn("dont", WordSource::Typed).await.unwrap();

        // Plain input surfaces the punctuated form.
        let for_plain = dict.similar_words("dont", 10).await;
        let words: Vec<&str> = for_plain.iter().map(|(w, _)| w.as_str()).collect();
        assert!(words.contains(&"don't"));

        // Punctuated input does not surface the plain form.
        let for_punctuated = dict.similar_words("don't", 10).await;
        let words: Vec<&str> = for_punctuated.iter().map(|(w, _)| w.as_str()).collect();
        assert!(words.contains(&"don't"));
        assert!(!words.contains(&"dont"));
    }

    #[tokio::test]
    async fn test_contraction_survives_crowded_vocabulary() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());

        dict.learn("don't", WordSource::Typed).await.unwrap();
        // 64 same-initial words, all more frequent than the contraction.
        for i in 0..64 {
            let word = format!("daily{i:02}");
            dict.learn(&word, WordSource::Typed).await.unwrap();
            dict.learn(&word, WordSource::Typed).await.unwrap();
        }

        let similar = dict.similar_words("dont", 5).await;
        let words: Vec<&str> = similar.iter().map(|(w, _)| w.as_str()).collect();
        assert!(words.contains(&"don't"), "got {words:?}");
    }

    #[tokio::test]
    async fn test_similar_words_surfaces_punctuation_leading_forms() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());
        dict.learn("'tis", WordSource::Typed).await.unwrap();

        let similar = dict.similar_words("tis", 5).await;
        let words: Vec<&str> = similar.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, ["'tis"]);
    }

    #[tokio::test]
    async fn test_similar_words_extends_stripped_prefixes() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());
        dict.learn("co-worker", WordSource::Typed).await.unwrap();

        // The hyphen interrupts the plain prefix; the stripped form carries.
        let similar = dict.similar_words("cowo", 5).await;
        let words: Vec<&str> = similar.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, ["co-worker"]);
    }

    #[tokio::test]
    async fn test_removed_contraction_stops_surfacing() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());
        dict.learn("don't", WordSource::Typed).await.unwrap();
        assert!(!dict.similar_words("dont", 5).await.is_empty());

        dict.remove("don't").await.unwrap();
        assert!(dict.similar_words("dont", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_contraction_index_rebuilt_on_language_switch() {
        let dict = dictionary_with(Arc::new(MemoryVocabularyStore::new()), &Config::default());
        dict.learn("don't", WordSource::Typed).await.unwrap();

        dict.initialize_cache("de").await.unwrap();
        assert!(dict.similar_words("dont", 5).await.is_empty());

        dict.initialize_cache("en").await.unwrap();
        let similar = dict.similar_words("dont", 5).await;
        assert_eq!(similar[0].0, "don't");
    }

    #[tokio::test]
    async fn test_breaker_opens_and_short_circuits() {
        let mut config = Config::default();
        config.breaker_failure_threshold = 3;
        config.breaker_cooldown_ms = 60_000;
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let dict = dictionary_with(store.clone(), &config);

        for _ in 0..3 {
            assert!(dict.similar_words("he", 5).await.is_empty());
        }
        assert_eq!(store.calls(), 3);
        assert!(dict.is_degraded());

        // Open breaker: no further store traffic.
        assert!(dict.similar_words("he", 5).await.is_empty());
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_breaker_cooldown_reopens_lookups() {
        let mut config = Config::default();
        config.breaker_failure_threshold = 2;
        config.breaker_cooldown_ms = 0;
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let dict = dictionary_with(store.clone(), &config);

        dict.similar_words("he", 5).await;
        dict.similar_words("he", 5).await;
        assert_eq!(store.calls(), 2);

        // Zero cooldown: the breaker closes immediately on the next check.
        dict.similar_words("he", 5).await;
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_breaker_resets_on_success() {
        let mut config = Config::default();
        config.breaker_failure_threshold = 3;
        config.breaker_cooldown_ms = 60_000;
        // Two failures, then healthy.
        let store = Arc::new(FlakyStore::new(2));
        let dict = dictionary_with(store.clone(), &config);

        assert!(dict.similar_words("he", 5).await.is_empty());
        assert!(dict.similar_words("he", 5).await.is_empty());
        assert!(!dict.is_degraded());

        // Success resets the consecutive count; lookups keep flowing.
        dict.learn("hello", WordSource::Typed).await.unwrap();
        let similar = dict.similar_words("he", 5).await;
        assert_eq!(similar.len(), 1);
        assert!(!dict.is_degraded());
    }

    #[tokio::test]
    async fn test_storage_full_triggers_cleanup_sweep() {
        let mut config = Config::default();
        config.cleanup_frequency_floor = 2;
        let store = Arc::new(MemoryVocabularyStore::bounded(2));
        let dict = dictionary_with(store.clone(), &config);

        for _ in 0..3 {
            dict.learn("alpha", WordSource::Typed).await.unwrap();
        }
        dict.learn("beta", WordSource::Typed).await.unwrap();

        // Store full; the sweep drops "beta" (frequency 1) to make room.
        let learned = dict.learn("gamma", WordSource::Typed).await.unwrap();
        assert!(learned.is_some());
        assert!(dict.is_learned("gamma"));
        assert!(store.get("en", "beta").await.unwrap().is_none());
        assert_eq!(store.get("en", "alpha").await.unwrap().unwrap().frequency, 3);
    }

    #[tokio::test]
    async fn test_initialize_cache_switches_language() {
        let store = Arc::new(MemoryVocabularyStore::new());
        store
            .upsert(&LearnedWord::new("hallo", "de", WordSource::Typed))
            .await
            .unwrap();
        let dict = dictionary_with(store.clone(), &Config::default());

        dict.learn("hello", WordSource::Typed).await.unwrap();
        assert!(dict.is_learned("hello"));

        dict.initialize_cache("de").await.unwrap();
        assert_eq!(dict.active_language(), "de");
        assert!(!dict.is_learned("hello"));
        assert!(dict.is_learned("hallo"));

        dict.initialize_cache("en").await.unwrap();
        assert!(dict.is_learned("hello"));
    }

    #[tokio::test]
    async fn test_redb_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbVocabularyStore::open(dir.path().join("vocab.redb")).unwrap();

        let mut hello = LearnedWord::new("Hello", "en", WordSource::Typed);
        store.upsert(&hello).await.unwrap();
        hello.relearn();
        store.upsert(&hello).await.unwrap();
        store
            .upsert(&LearnedWord::new("help", "en", WordSource::Swiped))
            .await
            .unwrap();
        store
            .upsert(&LearnedWord::new("hallo", "de", WordSource::Typed))
            .await
            .unwrap();

        let got = store.get("en", "hello").await.unwrap().unwrap();
        assert_eq!(got.word, "Hello");
        assert_eq!(got.frequency, 2);
        assert!(store.get("en", "hallo").await.unwrap().is_none());

        let matches = store.prefix_search("en", "he", 10).await.unwrap();
        let words: Vec<&str> = matches.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(words, ["Hello", "help"]);

        let verdicts = store
            .contains_batch("en", &["hello".into(), "absent".into()])
            .await
            .unwrap();
        assert_eq!(verdicts, [true, false]);

        let top = store.most_frequent("en", 1).await.unwrap();
        assert_eq!(top[0].normalized, "hello");

        assert_eq!(store.remove_low_frequency("en", 2).await.unwrap(), 1);
        assert!(store.get("en", "help").await.unwrap().is_none());

        assert!(store.remove("en", "hello").await.unwrap());
        assert!(!store.remove("en", "hello").await.unwrap());
        assert_eq!(store.words_for_language("de").await.unwrap().len(), 1);
    }
}

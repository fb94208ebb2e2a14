//! Static word lists plus learned-word blending.
//!
//! Word lists map a normalized word to a raw corpus frequency. Lookups use
//! an FST index built at load time, so membership and prefix scans stay
//! allocation-light. Learned words always outrank static entries: their
//! confidence floor sits above the static ceiling.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use ahash::{AHashMap, AHashSet};
use fst::automaton::Str;
use fst::{Automaton, IntoStreamer, Map, MapBuilder, Streamer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheHandle, CacheManager, SUGGESTION_CACHE, WORD_CACHE};
use crate::error::{Error, Result};
use crate::userdict::UserDictionary;
use crate::utils;

/// Confidence band for learned words. The floor sits above the static
/// ceiling so a learned word always outranks a static one.
const LEARNED_FLOOR: f64 = 0.85;
const LEARNED_CEIL: f64 = 0.98;
/// Confidence band for static dictionary words.
const STATIC_FLOOR: f64 = 0.30;
const STATIC_CEIL: f64 = 0.80;
/// Guaranteed confidence for punctuation-insensitive exact matches, e.g.
/// "dont" -> "don't".
const CONTRACTION_CONFIDENCE: f64 = 0.95;

/// Where a suggestion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Learned,
    Dictionary,
}

/// One ranked spelling suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellingSuggestion {
    pub word: String,
    /// Within `0.0..=1.0`; learned words occupy the top band.
    pub confidence: f64,
    pub source: SuggestionSource,
    /// Render the stored casing instead of applying auto-capitalization.
    pub preserve_case: bool,
    /// Position in the final ranked list, 0-based.
    pub rank: usize,
}

/// Produces the `(word, frequency)` pairs for a language. Loaders run on a
/// blocking thread; implementations may do file I/O freely.
pub trait DictionarySource: Send + Sync {
    fn load(&self, language: &str) -> Result<Vec<(String, u64)>>;
}

/// Reads `{dir}/{language}.txt`, one `word frequency` pair per line.
/// `#` starts a comment; malformed lines are skipped.
pub struct TextDictionarySource {
    dir: PathBuf,
}

impl TextDictionarySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl DictionarySource for TextDictionarySource {
    fn load(&self, language: &str) -> Result<Vec<(String, u64)>> {
        let path = self.dir.join(format!("{language}.txt"));
        if !path.exists() {
            return Err(Error::WordListMissing {
                language: language.to_string(),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next().and_then(|f| f.parse::<u64>().ok())) {
                (Some(word), Some(frequency)) => entries.push((word.to_string(), frequency)),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(language, skipped, "skipped malformed word list lines");
        }
        Ok(entries)
    }
}

/// Reads a compiled `{dir}/{language}.fst` produced by `compile_wordlist`.
pub struct FstDictionarySource {
    dir: PathBuf,
}

impl FstDictionarySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl DictionarySource for FstDictionarySource {
    fn load(&self, language: &str) -> Result<Vec<(String, u64)>> {
        let path = self.dir.join(format!("{language}.fst"));
        if !path.exists() {
            return Err(Error::WordListMissing {
                language: language.to_string(),
            });
        }
        let bytes = std::fs::read(&path)?;
        let map = Map::new(bytes)?;
        let mut entries = Vec::with_capacity(map.len());
        let mut stream = map.stream();
        while let Some((key, frequency)) = stream.next() {
            match std::str::from_utf8(key) {
                Ok(word) => entries.push((word.to_string(), frequency)),
                Err(_) => warn!(language, "skipping non-UTF-8 word list key"),
            }
        }
        Ok(entries)
    }
}

/// In-memory source for embedded word lists and tests.
#[derive(Default)]
pub struct StaticDictionarySource {
    languages: AHashMap<String, Vec<(String, u64)>>,
}

impl StaticDictionarySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language<S: Into<String>>(mut self, language: S, entries: Vec<(&str, u64)>) -> Self {
        self.languages.insert(
            language.into(),
            entries.into_iter().map(|(w, f)| (w.to_string(), f)).collect(),
        );
        self
    }
}

impl DictionarySource for StaticDictionarySource {
    fn load(&self, language: &str) -> Result<Vec<(String, u64)>> {
        match self.languages.get(language) {
            Some(entries) => Ok(entries.clone()),
            None => Err(Error::WordListMissing {
                language: language.to_string(),
            }),
        }
    }
}

/// One loaded language: FST index plus the contraction side table.
struct WordList {
    index: Map<Vec<u8>>,
    max_frequency: u64,
    /// stripped form -> words that carry punctuation ("dont" -> ["don't"]).
    contractions: AHashMap<String, Vec<String>>,
}

impl WordList {
    fn empty() -> Self {
        Self {
            index: MapBuilder::memory().into_map(),
            max_frequency: 0,
            contractions: AHashMap::new(),
        }
    }

    fn build(entries: Vec<(String, u64)>) -> Result<Self> {
        // FST construction needs sorted unique keys; keep the max frequency
        // for duplicates.
        let mut dedup: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
        for (word, frequency) in entries {
            let word = utils::normalize(&word);
            if word.is_empty() {
                continue;
            }
            let slot = dedup.entry(word).or_insert(0);
            *slot = (*slot).max(frequency);
        }

        let mut builder = MapBuilder::memory();
        let mut max_frequency = 0u64;
        let mut contractions: AHashMap<String, Vec<String>> = AHashMap::new();
        for (word, frequency) in &dedup {
            builder.insert(word, *frequency)?;
            max_frequency = max_frequency.max(*frequency);
            let stripped = utils::strip_word_punctuation(word);
            if stripped != *word && !stripped.is_empty() {
                contractions.entry(stripped).or_default().push(word.clone());
            }
        }

        Ok(Self {
            index: builder.into_map(),
            max_frequency,
            contractions,
        })
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn contains(&self, normalized: &str) -> bool {
        self.index.contains_key(normalized)
    }

    fn frequency(&self, normalized: &str) -> Option<u64> {
        self.index.get(normalized)
    }

    /// Prefix matches, most frequent first. The automaton bounds the walk
    /// to the prefix range; a fixed-size heap holds the running best `max`,
    /// so the whole range is considered whatever its size.
    fn prefix_matches(&self, prefix: &str, max: usize) -> Vec<(String, u64)> {
        if max == 0 {
            return Vec::new();
        }
        let matcher = Str::new(prefix).starts_with();
        let mut stream = self.index.search(matcher).into_stream();
        let mut top: BinaryHeap<PrefixMatch> = BinaryHeap::with_capacity(max + 1);
        while let Some((key, frequency)) = stream.next() {
            if top.len() == max {
                match top.peek() {
                    Some(worst) if frequency < worst.frequency => continue,
                    _ => {}
                }
            }
            if let Ok(word) = std::str::from_utf8(key) {
                top.push(PrefixMatch {
                    word: word.to_string(),
                    frequency,
                });
                if top.len() > max {
                    top.pop();
                }
            }
        }
        let mut out: Vec<(String, u64)> = top
            .into_iter()
            .map(|entry| (entry.word, entry.frequency))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    fn contraction_matches(&self, stripped: &str) -> &[String] {
        self.contractions
            .get(stripped)
            .map(|words| words.as_slice())
            .unwrap_or(&[])
    }
}

/// Heap entry for prefix selection, ordered with the worst match greatest
/// so it sits at the root: lower frequency loses, then the later word.
struct PrefixMatch {
    word: String,
    frequency: u64,
}

impl PartialEq for PrefixMatch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrefixMatch {}

impl PartialOrd for PrefixMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrefixMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .frequency
            .cmp(&self.frequency)
            .then_with(|| self.word.cmp(&other.word))
    }
}

/// Word membership and ranked suggestions for the active language, blending
/// the static word list with the learned vocabulary.
pub struct DictionaryService {
    source: Arc<dyn DictionarySource>,
    userdict: Arc<UserDictionary>,
    lists: RwLock<AHashMap<String, Arc<WordList>>>,
    language: RwLock<String>,
    blacklist: RwLock<AHashSet<String>>,
    word_cache: CacheHandle<String, bool>,
    suggestion_cache: CacheHandle<String, Vec<SpellingSuggestion>>,
    missing_logged: Mutex<AHashSet<String>>,
    max_suggestions: usize,
}

impl DictionaryService {
    pub fn new(
        source: Arc<dyn DictionarySource>,
        userdict: Arc<UserDictionary>,
        caches: &CacheManager,
        config: &crate::Config,
    ) -> Result<Self> {
        let word_cache = caches.create_cache(WORD_CACHE, config.dictionary_word_cache_size, None)?;
        let suggestion_cache =
            caches.create_cache(SUGGESTION_CACHE, config.suggestion_cache_size, None)?;
        Ok(Self {
            source,
            userdict,
            lists: RwLock::new(AHashMap::new()),
            language: RwLock::new(String::from("en")),
            blacklist: RwLock::new(AHashSet::new()),
            word_cache,
            suggestion_cache,
            missing_logged: Mutex::new(AHashSet::new()),
            max_suggestions: config.max_suggestions,
        })
    }

    pub fn active_language(&self) -> String {
        self.language
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Load (or reload) the word list for `language` on a blocking thread.
    /// A missing or broken list is recovered as an empty one; typing must
    /// keep working without a dictionary.
    pub async fn load_language(&self, language: &str) -> Result<()> {
        let source = Arc::clone(&self.source);
        let lang = language.to_string();
        let loaded = tokio::task::spawn_blocking(move || {
            let entries = source.load(&lang)?;
            WordList::build(entries)
        })
        .await;

        let list = match loaded {
            Ok(Ok(list)) => {
                info!(language, words = list.len(), "word list loaded");
                list
            }
            Ok(Err(Error::WordListMissing { .. })) => {
                self.log_missing_once(language);
                WordList::empty()
            }
            Ok(Err(err)) => {
                warn!(language, %err, "word list load failed, starting empty");
                WordList::empty()
            }
            Err(err) => {
                warn!(language, %err, "word list load task failed, starting empty");
                WordList::empty()
            }
        };

        self.lists
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(language.to_string(), Arc::new(list));
        self.invalidate_caches();
        Ok(())
    }

    /// Make `language` the active one, loading its list if needed. Cached
    /// verdicts and suggestion lists do not survive the switch.
    pub async fn switch_language(&self, language: &str) -> Result<()> {
        let loaded = self
            .lists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(language);
        if !loaded {
            self.load_language(language).await?;
        }
        {
            let mut active = self.language.write().unwrap_or_else(|e| e.into_inner());
            *active = language.to_string();
        }
        self.invalidate_caches();
        Ok(())
    }

    /// Synchronous membership check: learned words count, blacklisted words
    /// still count. Verdicts are cached per language.
    pub fn is_in_dictionary(&self, word: &str) -> bool {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return false;
        }
        let language = self.active_language();
        let key = cache_key(&language, &normalized);
        if let Some(verdict) = self.word_cache.get(&key) {
            return verdict;
        }

        let verdict = self.userdict.is_learned(&normalized)
            || match self.active_list() {
                Some(list) => list.contains(&normalized),
                None => {
                    self.log_missing_once(&language);
                    false
                }
            };
        self.word_cache.insert(key, verdict);
        verdict
    }

    /// Raw frequency of `word` in the active static list.
    pub fn word_frequency(&self, word: &str) -> Option<u64> {
        let normalized = utils::normalize(word);
        self.active_list()?.frequency(&normalized)
    }

    /// Static prefix completions, most frequent first, blacklist applied.
    pub fn completions(&self, prefix: &str, max: usize) -> Vec<(String, u64)> {
        let normalized = utils::normalize(prefix);
        if normalized.is_empty() {
            return Vec::new();
        }
        let list = match self.active_list() {
            Some(list) => list,
            None => return Vec::new(),
        };
        let blacklist = self.blacklist.read().unwrap_or_else(|e| e.into_inner());
        list.prefix_matches(&normalized, max.saturating_add(blacklist.len()))
            .into_iter()
            .filter(|(word, _)| !blacklist.contains(word))
            .take(max)
            .collect()
    }

    /// Ranked suggestions for a prefix: learned words first, then static
    /// matches, with punctuation-insensitive exact matches guaranteed a
    /// high-confidence slot.
    pub async fn suggestions_with_confidence(&self, prefix: &str) -> Vec<SpellingSuggestion> {
        let normalized = utils::normalize(prefix);
        if normalized.is_empty() {
            return Vec::new();
        }
        let language = self.active_language();
        let key = cache_key(&language, &normalized);
        if let Some(cached) = self.suggestion_cache.get(&key) {
            return cached;
        }

        let learned = self
            .userdict
            .similar_words(&normalized, self.max_suggestions)
            .await;

        let mut out: Vec<SpellingSuggestion> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let blacklist = self.blacklist.read().unwrap_or_else(|e| e.into_inner());

        let max_learned = learned.iter().map(|(_, f)| *f).max().unwrap_or(0);
        for (word, frequency) in learned {
            let normalized_word = utils::normalize(&word);
            if blacklist.contains(&normalized_word) {
                continue;
            }
            let suggestion = SpellingSuggestion {
                preserve_case: word != normalized_word,
                confidence: learned_confidence(frequency, max_learned),
                word,
                source: SuggestionSource::Learned,
                rank: 0,
            };
            upsert(&mut out, &mut index, normalized_word, suggestion);
        }

        if let Some(list) = self.active_list() {
            // Guaranteed contraction slot, e.g. "dont" -> "don't".
            let stripped = utils::strip_word_punctuation(&normalized);
            if !stripped.is_empty() {
                for word in list.contraction_matches(&stripped) {
                    if *word == normalized || blacklist.contains(word) {
                        continue;
                    }
                    let suggestion = SpellingSuggestion {
                        word: word.clone(),
                        confidence: CONTRACTION_CONFIDENCE,
                        source: SuggestionSource::Dictionary,
                        preserve_case: false,
                        rank: 0,
                    };
                    upsert(&mut out, &mut index, word.clone(), suggestion);
                }
            }

            for (word, frequency) in
                list.prefix_matches(&normalized, self.max_suggestions.saturating_mul(2))
            {
                if blacklist.contains(&word) {
                    continue;
                }
                let suggestion = SpellingSuggestion {
                    confidence: static_confidence(frequency, list.max_frequency),
                    word: word.clone(),
                    source: SuggestionSource::Dictionary,
                    preserve_case: false,
                    rank: 0,
                };
                upsert(&mut out, &mut index, word, suggestion);
            }
        } else {
            self.log_missing_once(&language);
        }
        drop(blacklist);

        out.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| source_rank(a.source).cmp(&source_rank(b.source)))
                .then_with(|| a.word.cmp(&b.word))
        });
        out.truncate(self.max_suggestions);
        for (rank, suggestion) in out.iter_mut().enumerate() {
            suggestion.rank = rank;
        }

        trace!(prefix = %normalized, returned = out.len(), "built suggestion list");
        self.suggestion_cache.insert(key, out.clone());
        out
    }

    /// Suggestion words alone, capped at `max`.
    pub async fn suggestions(&self, prefix: &str, max: usize) -> Vec<String> {
        self.suggestions_with_confidence(prefix)
            .await
            .into_iter()
            .take(max)
            .map(|s| s.word)
            .collect()
    }

    /// Hide a word from suggestion output. Membership is unaffected: the
    /// user chose not to see it, not to have it marked misspelled.
    pub fn blacklist_word(&self, word: &str) {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return;
        }
        self.blacklist
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(normalized.clone());
        debug!(word = %normalized, "blacklisted word");
        self.invalidate_word(&normalized);
    }

    /// Allow a blacklisted word to appear again. Returns whether it was
    /// blacklisted.
    pub fn unblacklist_word(&self, word: &str) -> bool {
        let normalized = utils::normalize(word);
        let removed = self
            .blacklist
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&normalized);
        if removed {
            self.invalidate_word(&normalized);
        }
        removed
    }

    pub fn is_blacklisted(&self, word: &str) -> bool {
        self.blacklist
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&utils::normalize(word))
    }

    /// Drop cached state that mentions `word`: its membership verdict and
    /// every suggestion list keyed by one of its prefixes. Called after
    /// learning, removal, or blacklist changes.
    pub fn invalidate_word(&self, word: &str) {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return;
        }
        let language = self.active_language();
        self.word_cache.remove(&cache_key(&language, &normalized));

        let stripped = utils::strip_word_punctuation(&normalized);
        for form in [normalized.as_str(), stripped.as_str()] {
            for (i, _) in form.char_indices() {
                if i > 0 {
                    self.suggestion_cache.remove(&cache_key(&language, &form[..i]));
                }
            }
            if !form.is_empty() {
                self.suggestion_cache.remove(&cache_key(&language, form));
            }
        }
    }

    fn active_list(&self) -> Option<Arc<WordList>> {
        let language = self.active_language();
        self.lists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&language)
            .cloned()
    }

    fn invalidate_caches(&self) {
        self.word_cache.clear();
        self.suggestion_cache.clear();
    }

    fn log_missing_once(&self, language: &str) {
        let mut logged = self
            .missing_logged
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if logged.insert(language.to_string()) {
            warn!(language, "no word list available, falling back to learned words");
        }
    }
}

fn cache_key(language: &str, normalized: &str) -> String {
    format!("{language}{}{normalized}", utils::KEY_SEPARATOR)
}

fn source_rank(source: SuggestionSource) -> u8 {
    match source {
        SuggestionSource::Learned => 0,
        SuggestionSource::Dictionary => 1,
    }
}

/// Insert or raise: a word already present keeps its entry but takes the
/// higher confidence.
fn upsert(
    out: &mut Vec<SpellingSuggestion>,
    index: &mut AHashMap<String, usize>,
    normalized: String,
    suggestion: SpellingSuggestion,
) {
    match index.get(&normalized) {
        Some(&i) => {
            if suggestion.confidence > out[i].confidence {
                out[i].confidence = suggestion.confidence;
            }
        }
        None => {
            index.insert(normalized, out.len());
            out.push(suggestion);
        }
    }
}

fn learned_confidence(frequency: u64, max_frequency: u64) -> f64 {
    if max_frequency == 0 {
        return LEARNED_FLOOR;
    }
    let rel = frequency as f64 / max_frequency as f64;
    LEARNED_FLOOR + (LEARNED_CEIL - LEARNED_FLOOR) * rel.min(1.0)
}

fn static_confidence(frequency: u64, max_frequency: u64) -> f64 {
    if max_frequency == 0 {
        return STATIC_FLOOR;
    }
    let rel = ((1 + frequency) as f64).ln() / ((1 + max_frequency) as f64).ln();
    STATIC_FLOOR + (STATIC_CEIL - STATIC_FLOOR) * rel.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{KeyboardSettings, SettingsHandle};
    use crate::userdict::{MemoryVocabularyStore, WordSource};
    use crate::Config;

    fn english_source() -> Arc<StaticDictionarySource> {
        Arc::new(StaticDictionarySource::new().with_language(
            "en",
            vec![
                ("hello", 5000),
                ("help", 3000),
                ("held", 900),
                ("world", 4000),
                ("don't", 800),
                ("co-worker", 200),
            ],
        ))
    }

    struct Fixture {
        caches: CacheManager,
        userdict: Arc<UserDictionary>,
        dictionary: DictionaryService,
    }

    async fn fixture() -> Fixture {
        let config = Config::default();
        let caches = CacheManager::new(&config);
        let userdict = Arc::new(
            UserDictionary::new(
                Arc::new(MemoryVocabularyStore::new()),
                SettingsHandle::fixed(KeyboardSettings::default()),
                &caches,
                &config,
            )
            .unwrap(),
        );
        let dictionary =
            DictionaryService::new(english_source(), Arc::clone(&userdict), &caches, &config)
                .unwrap();
        dictionary.switch_language("en").await.unwrap();
        Fixture {
            caches,
            userdict,
            dictionary,
        }
    }

    #[tokio::test]
    async fn test_membership_is_case_insensitive() {
        let fx = fixture().await;
        assert!(fx.dictionary.is_in_dictionary("hello"));
        assert!(fx.dictionary.is_in_dictionary("Hello"));
        assert!(fx.dictionary.is_in_dictionary(" HELLO "));
        assert!(!fx.dictionary.is_in_dictionary("helllo"));
        assert!(!fx.dictionary.is_in_dictionary(""));
    }

    #[tokio::test]
    async fn test_learned_words_count_as_members() {
        let fx = fixture().await;
        assert!(!fx.dictionary.is_in_dictionary("zorble"));
        fx.userdict.learn("zorble", WordSource::Typed).await.unwrap();
        fx.dictionary.invalidate_word("zorble");
        assert!(fx.dictionary.is_in_dictionary("zorble"));
    }

    #[tokio::test]
    async fn test_missing_language_recovers_empty() {
        let fx = fixture().await;
        fx.dictionary.switch_language("xx").await.unwrap();
        assert!(!fx.dictionary.is_in_dictionary("hello"));
        assert!(fx
            .dictionary
            .suggestions_with_confidence("hel")
            .await
            .is_empty());

        // Learned words still work without a static list.
        fx.userdict.initialize_cache("xx").await.unwrap();
        fx.userdict.learn("zip", WordSource::Typed).await.unwrap();
        assert!(fx.dictionary.is_in_dictionary("zip"));
    }

    #[tokio::test]
    async fn test_suggestions_rank_learned_above_static() {
        let fx = fixture().await;
        fx.userdict
            .learn("hellooo", WordSource::Typed)
            .await
            .unwrap();

        let suggestions = fx.dictionary.suggestions_with_confidence("hel").await;
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].word, "hellooo");
        assert_eq!(suggestions[0].source, SuggestionSource::Learned);
        assert!(suggestions[0].confidence >= LEARNED_FLOOR);

        let hello = suggestions.iter().find(|s| s.word == "hello").unwrap();
        assert_eq!(hello.source, SuggestionSource::Dictionary);
        assert!(hello.confidence <= STATIC_CEIL);
        assert!(suggestions[0].confidence > hello.confidence);

        // Ranks are the final positions.
        for (i, s) in suggestions.iter().enumerate() {
            assert_eq!(s.rank, i);
            assert!(s.confidence > 0.0 && s.confidence <= 1.0);
        }
    }

    #[tokio::test]
    async fn test_static_suggestions_order_by_frequency() {
        let fx = fixture().await;
        let words = fx.dictionary.suggestions("hel", 10).await;
        assert_eq!(words, ["hello", "help", "held"]);

        let capped = fx.dictionary.suggestions("hel", 2).await;
        assert_eq!(capped, ["hello", "help"]);
    }

    #[tokio::test]
    async fn test_contraction_guaranteed_for_plain_input() {
        let fx = fixture().await;
        let suggestions = fx.dictionary.suggestions_with_confidence("dont").await;
        let dont = suggestions.iter().find(|s| s.word == "don't").unwrap();
        assert!(dont.confidence >= CONTRACTION_CONFIDENCE);
        // Low raw frequency, still ranked first.
        assert_eq!(suggestions[0].word, "don't");

        let for_coworker = fx.dictionary.suggestions_with_confidence("coworker").await;
        assert_eq!(for_coworker[0].word, "co-worker");
    }

    #[tokio::test]
    async fn test_blacklist_hides_and_restores_suggestions() {
        let fx = fixture().await;
        let before = fx.dictionary.suggestions("hel", 10).await;
        assert!(before.contains(&"hello".to_string()));

        fx.dictionary.blacklist_word("hello");
        assert!(fx.dictionary.is_blacklisted("HELLO"));
        let hidden = fx.dictionary.suggestions("hel", 10).await;
        assert!(!hidden.contains(&"hello".to_string()));
        // Membership is unaffected.
        assert!(fx.dictionary.is_in_dictionary("hello"));

        assert!(fx.dictionary.unblacklist_word("hello"));
        let restored = fx.dictionary.suggestions("hel", 10).await;
        assert_eq!(restored, before);
        assert!(!fx.dictionary.unblacklist_word("hello"));
    }

    #[tokio::test]
    async fn test_suggestion_cache_serves_repeat_lookups() {
        let fx = fixture().await;
        let first = fx.dictionary.suggestions_with_confidence("hel").await;
        let second = fx.dictionary.suggestions_with_confidence("hel").await;
        assert_eq!(first, second);

        let stats = fx.caches.stats();
        let suggestion_stats = stats.iter().find(|s| s.name == SUGGESTION_CACHE).unwrap();
        assert!(suggestion_stats.hits >= 1);
    }

    #[tokio::test]
    async fn test_invalidate_word_refreshes_prefix_suggestions() {
        let fx = fixture().await;
        let before = fx.dictionary.suggestions("hell", 10).await;
        assert!(!before.contains(&"hellish".to_string()));

        fx.userdict
            .learn("hellish", WordSource::Typed)
            .await
            .unwrap();
        fx.dictionary.invalidate_word("hellish");

        let after = fx.dictionary.suggestions("hell", 10).await;
        assert!(after.contains(&"hellish".to_string()));
    }

    #[test]
    fn test_prefix_matches_rank_across_large_ranges() {
        // Over a thousand rare words sort ahead of the frequent one.
        let mut entries: Vec<(String, u64)> =
            (0..1100).map(|i| (format!("com{i:04}"), 1)).collect();
        entries.push(("could".to_string(), 999_999));
        let list = WordList::build(entries).unwrap();

        let matches = list.prefix_matches("co", 8);
        assert_eq!(matches.len(), 8);
        assert_eq!(matches[0], ("could".to_string(), 999_999));
        // Frequency ties keep the lexicographically earliest words.
        let tail: Vec<&str> = matches[1..].iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(
            tail,
            ["com0000", "com0001", "com0002", "com0003", "com0004", "com0005", "com0006"]
        );
    }

    #[tokio::test]
    async fn test_completions_and_frequency() {
        let fx = fixture().await;
        let completions = fx.dictionary.completions("hel", 5);
        assert_eq!(completions[0], ("hello".to_string(), 5000));
        assert_eq!(completions[1], ("help".to_string(), 3000));
        assert_eq!(fx.dictionary.word_frequency("HELLO"), Some(5000));
        assert_eq!(fx.dictionary.word_frequency("absent"), None);

        fx.dictionary.blacklist_word("hello");
        let filtered = fx.dictionary.completions("hel", 5);
        assert!(!filtered.iter().any(|(w, _)| w == "hello"));
    }

    #[test]
    fn test_text_source_parses_word_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("en.txt"),
            "# frequency list\nhello 5000\nworld 4000\nmalformed\nbad notanumber\n",
        )
        .unwrap();

        let source = TextDictionarySource::new(dir.path());
        let mut entries = source.load("en").unwrap();
        entries.sort();
        assert_eq!(
            entries,
            [("hello".to_string(), 5000), ("world".to_string(), 4000)]
        );
        assert!(matches!(
            source.load("de"),
            Err(Error::WordListMissing { .. })
        ));
    }

    #[test]
    fn test_fst_source_reads_compiled_lists() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = MapBuilder::memory();
        builder.insert("apple", 10).unwrap();
        builder.insert("banana", 20).unwrap();
        let bytes = builder.into_inner().unwrap();
        std::fs::write(dir.path().join("en.fst"), bytes).unwrap();

        let source = FstDictionarySource::new(dir.path());
        let entries = source.load("en").unwrap();
        assert_eq!(
            entries,
            [("apple".to_string(), 10), ("banana".to_string(), 20)]
        );
    }
}

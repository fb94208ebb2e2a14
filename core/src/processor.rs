//! Keystroke-driven evaluation pipeline.
//!
//! Characters arrive faster than suggestions are worth computing, so each
//! keystroke arms a debounce timer and cancels the previous one. Every
//! request carries a sequence token; results are dropped unless their token
//! still matches the session when the work finishes. Hosts receive ranked
//! suggestions through a [`SuggestionSink`].

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::{CacheHandle, CacheManager, RESULT_CACHE};
use crate::dictionary::{DictionaryService, SpellingSuggestion};
use crate::error::Result;
use crate::predictor::NextWordModel;
use crate::settings::{KeyboardSettings, SettingsHandle};
use crate::userdict::{UserDictionary, WordSource};
use crate::utils;

/// Writing system of the word under the cursor, from its first alphabetic
/// character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Han,
    Hangul,
    Other,
}

impl Script {
    pub fn detect(text: &str) -> Self {
        for ch in text.chars() {
            if !ch.is_alphabetic() {
                continue;
            }
            return match ch {
                'a'..='z' | 'A'..='Z' | '\u{00c0}'..='\u{024f}' => Script::Latin,
                '\u{0370}'..='\u{03ff}' => Script::Greek,
                '\u{0400}'..='\u{04ff}' => Script::Cyrillic,
                '\u{0590}'..='\u{05ff}' => Script::Hebrew,
                '\u{0600}'..='\u{06ff}' => Script::Arabic,
                '\u{4e00}'..='\u{9fff}' => Script::Han,
                '\u{ac00}'..='\u{d7af}' => Script::Hangul,
                _ => Script::Other,
            };
        }
        Script::Other
    }
}

/// Everything the host needs to render the word under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct WordState {
    /// The buffer as typed.
    pub buffer: String,
    pub normalized: String,
    /// Whether the word passes spell check (or spell check is off).
    pub is_valid: bool,
    /// Whether the host should underline the word.
    pub highlight: bool,
    pub suggestions: Vec<SpellingSuggestion>,
    pub grapheme_count: usize,
    pub from_swipe: bool,
    pub script: Script,
}

/// Outcome of one evaluation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult {
    Success(WordState),
    /// A newer keystroke arrived before this one finished.
    Superseded,
    Error(String),
}

/// Pushed to the host whenever the suggestion strip should change.
#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionUpdate {
    Ranked(Vec<SpellingSuggestion>),
    Clear,
}

/// Host-side receiver for suggestion strip updates.
pub trait SuggestionSink: Send + Sync {
    fn publish(&self, update: SuggestionUpdate);
}

struct SessionState {
    /// Monotonic token; results from older tokens are stale.
    token: u64,
    buffer: String,
    last_committed: Option<String>,
    pending: Option<CancellationToken>,
}

impl SessionState {
    fn supersede(&mut self) -> u64 {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        self.token += 1;
        self.token
    }
}

/// A cached evaluation tagged with the settings it baked in. Entries are
/// only served while those settings are still current; a write racing the
/// settings watcher can park a stale entry but never resurface it.
#[derive(Clone)]
struct CachedEvaluation {
    settings: KeyboardSettings,
    state: WordState,
}

/// Debounced keystroke evaluator. One per input session; shared behind an
/// [`Arc`] so spawned evaluations can outlive the caller's borrow.
pub struct InputProcessor {
    dictionary: Arc<DictionaryService>,
    userdict: Arc<UserDictionary>,
    predictor: Arc<RwLock<NextWordModel>>,
    sink: Arc<dyn SuggestionSink>,
    settings: SettingsHandle,
    result_cache: CacheHandle<String, CachedEvaluation>,
    session: Mutex<SessionState>,
    debounce: Duration,
    min_suggestion_graphemes: usize,
}

impl InputProcessor {
    pub fn new(
        dictionary: Arc<DictionaryService>,
        userdict: Arc<UserDictionary>,
        sink: Arc<dyn SuggestionSink>,
        settings: SettingsHandle,
        caches: &CacheManager,
        config: &crate::Config,
    ) -> Result<Self> {
        let result_cache = caches.create_cache(RESULT_CACHE, config.word_result_cache_size, None)?;
        Ok(Self {
            dictionary,
            userdict,
            predictor: Arc::new(RwLock::new(NextWordModel::default())),
            sink,
            settings,
            result_cache,
            session: Mutex::new(SessionState {
                token: 0,
                buffer: String::new(),
                last_committed: None,
                pending: None,
            }),
            debounce: config.debounce(),
            min_suggestion_graphemes: config.min_suggestion_graphemes,
        })
    }

    /// Register a keystroke and arm the debounce timer. `buffer` is the
    /// host's snapshot of the word before the keystroke; evaluation runs
    /// against `buffer + ch`. Registration is synchronous, so a later
    /// keystroke always supersedes an earlier one no matter how the spawned
    /// work is scheduled.
    pub fn submit_character(
        self: &Arc<Self>,
        ch: char,
        buffer: &str,
        source: WordSource,
    ) -> JoinHandle<ProcessingResult> {
        let mut composed = String::with_capacity(buffer.len() + ch.len_utf8());
        composed.push_str(buffer);
        composed.push(ch);

        let (token, cancel) = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            let token = session.supersede();
            session.buffer = composed.clone();
            let cancel = CancellationToken::new();
            session.pending = Some(cancel.clone());
            (token, cancel)
        };
        let from_swipe = matches!(source, WordSource::Swiped);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.debounced_evaluate(token, composed, from_swipe, cancel)
                .await
        })
    }

    /// [`Self::submit_character`], awaited.
    pub async fn process_character(
        self: &Arc<Self>,
        ch: char,
        buffer: &str,
        source: WordSource,
    ) -> ProcessingResult {
        match self.submit_character(ch, buffer, source).await {
            Ok(result) => result,
            Err(err) => ProcessingResult::Error(err.to_string()),
        }
    }

    /// Evaluate a complete word right away, superseding any pending
    /// keystroke work. Swipe and backspace recomputes come through here.
    pub async fn process_word(&self, word: &str, source: WordSource) -> ProcessingResult {
        let token = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            let token = session.supersede();
            session.buffer = word.to_string();
            token
        };
        let state = self
            .evaluate(word, matches!(source, WordSource::Swiped))
            .await;
        if !self.is_current(token, word) {
            return ProcessingResult::Superseded;
        }
        self.publish(&state);
        ProcessingResult::Success(state)
    }

    async fn debounced_evaluate(
        &self,
        token: u64,
        buffer: String,
        from_swipe: bool,
        cancel: CancellationToken,
    ) -> ProcessingResult {
        tokio::select! {
            _ = cancel.cancelled() => return ProcessingResult::Superseded,
            _ = tokio::time::sleep(self.debounce) => {}
        }
        if !self.is_current(token, &buffer) {
            return ProcessingResult::Superseded;
        }
        let state = self.evaluate(&buffer, from_swipe).await;
        // The session may have moved on while suggestions were computed.
        if !self.is_current(token, &buffer) {
            debug!(token, "discarding stale evaluation");
            return ProcessingResult::Superseded;
        }
        self.publish(&state);
        ProcessingResult::Success(state)
    }

    async fn evaluate(&self, buffer: &str, from_swipe: bool) -> WordState {
        let normalized = utils::normalize(buffer);
        let settings = self.settings.current();

        if normalized.is_empty() {
            return WordState {
                buffer: buffer.to_string(),
                normalized,
                is_valid: true,
                highlight: false,
                suggestions: Vec::new(),
                grapheme_count: 0,
                from_swipe,
                script: Script::Other,
            };
        }

        let key = self.result_key(&normalized);
        if let Some(cached) = self.result_cache.get(&key) {
            if cached.settings == settings {
                let mut state = cached.state;
                state.from_swipe = from_swipe;
                return state;
            }
        }

        let grapheme_count = utils::grapheme_count(&normalized);
        let script = Script::detect(&normalized);
        let skip = utils::is_numeric_word(&normalized) || is_web_fragment(&normalized);

        let member = !skip && self.dictionary.is_in_dictionary(&normalized);
        let is_valid = skip || !settings.spell_check_enabled || member;
        let highlight = !is_valid && grapheme_count >= self.min_suggestion_graphemes;

        let mut suggestions = Vec::new();
        if settings.show_suggestions
            && settings.spell_check_enabled
            && !member
            && !skip
            && grapheme_count >= self.min_suggestion_graphemes
        {
            suggestions = self.dictionary.suggestions_with_confidence(&normalized).await;
            suggestions.truncate(settings.suggestion_count);
        }

        trace!(
            word = %normalized,
            member,
            suggestions = suggestions.len(),
            "evaluated buffer"
        );
        let state = WordState {
            buffer: buffer.to_string(),
            normalized,
            is_valid,
            highlight,
            suggestions,
            grapheme_count,
            from_swipe,
            script,
        };
        let mut cached = state.clone();
        cached.from_swipe = false;
        self.result_cache.insert(
            key,
            CachedEvaluation {
                settings,
                state: cached,
            },
        );
        state
    }

    /// Spell check verdict without touching the session.
    pub fn validate(&self, word: &str) -> bool {
        let normalized = utils::normalize(word);
        normalized.is_empty()
            || utils::is_numeric_word(&normalized)
            || is_web_fragment(&normalized)
            || self.dictionary.is_in_dictionary(&normalized)
    }

    /// Ranked suggestions for an explicit host request, e.g. tapping an
    /// already committed word.
    pub async fn get_suggestions(&self, word: &str) -> Vec<SpellingSuggestion> {
        let count = self.settings.current().suggestion_count;
        let mut suggestions = self.dictionary.suggestions_with_confidence(word).await;
        suggestions.truncate(count);
        suggestions
    }

    /// Finish the word under the cursor: learn it, feed the next-word
    /// model, and reset the buffer.
    pub async fn commit(&self, word: &str, source: WordSource) -> Result<()> {
        if self.userdict.learn(word, source).await?.is_some() {
            self.dictionary.invalidate_word(word);
            self.invalidate_results_for(word);
        }

        let normalized = utils::normalize(word);
        let previous = {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            session.supersede();
            session.buffer.clear();
            session.last_committed.replace(normalized.clone())
        };
        if let Some(previous) = previous {
            self.predictor
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .record_transition(&previous, &normalized);
        }
        self.sink.publish(SuggestionUpdate::Clear);
        Ok(())
    }

    /// Hide `word` from future suggestion lists.
    pub fn blacklist_word(&self, word: &str) {
        self.dictionary.blacklist_word(word);
        self.invalidate_results_for(word);
    }

    /// Allow a blacklisted word to appear again.
    pub fn unblacklist_word(&self, word: &str) -> bool {
        let removed = self.dictionary.unblacklist_word(word);
        if removed {
            self.invalidate_results_for(word);
        }
        removed
    }

    /// Forget a learned word and drop everything computed from it.
    pub async fn remove_learned(&self, word: &str) -> Result<bool> {
        let removed = self.userdict.remove(word).await?;
        if removed {
            self.dictionary.invalidate_word(word);
            self.invalidate_results_for(word);
        }
        Ok(removed)
    }

    /// Words likely to follow the last committed one.
    pub fn predict_next(&self, max: usize) -> Vec<String> {
        let previous = {
            let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            session.last_committed.clone()
        };
        let previous = match previous {
            Some(previous) => previous,
            None => return Vec::new(),
        };
        self.predictor
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .predict(&previous, max)
            .into_iter()
            .map(|(word, _)| word)
            .collect()
    }

    /// Shared handle to the next-word model, for gesture arbitration.
    pub fn next_word_model(&self) -> Arc<RwLock<NextWordModel>> {
        Arc::clone(&self.predictor)
    }

    /// Abandon the current word and clear the suggestion strip.
    pub fn end_session(&self) {
        {
            let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            session.supersede();
            session.buffer.clear();
            session.last_committed = None;
        }
        self.sink.publish(SuggestionUpdate::Clear);
    }

    /// Switch dictionary and learned vocabulary to `language`, dropping
    /// per-language cached results and the current word.
    pub async fn switch_language(&self, language: &str) -> Result<()> {
        self.dictionary.switch_language(language).await?;
        self.userdict.switch_language(language).await?;
        self.result_cache.clear();
        self.end_session();
        debug!(language, "input processor switched language");
        Ok(())
    }

    /// React to settings changes for as long as the publisher lives. The
    /// settings tag on each cached evaluation already gates what is served;
    /// the clear here drops entries that can no longer match.
    pub fn spawn_settings_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut settings = this.settings.clone();
            while settings.changed().await {
                this.result_cache.clear();
                debug!("settings changed, dropped cached evaluations");
            }
        })
    }

    /// The word under the cursor as typed so far.
    pub fn current_word(&self) -> String {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .buffer
            .clone()
    }

    /// Both the token and the buffer snapshot must still match; a result
    /// computed against a superseded buffer is never applied.
    fn is_current(&self, token: u64, buffer: &str) -> bool {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.token == token && session.buffer == buffer
    }

    fn publish(&self, state: &WordState) {
        if state.suggestions.is_empty() {
            self.sink.publish(SuggestionUpdate::Clear);
        } else {
            self.sink
                .publish(SuggestionUpdate::Ranked(state.suggestions.clone()));
        }
    }

    fn result_key(&self, normalized: &str) -> String {
        format!(
            "{}{}{normalized}",
            self.dictionary.active_language(),
            utils::KEY_SEPARATOR
        )
    }

    /// Drop cached evaluations whose suggestion lists could mention `word`:
    /// every prefix of it (and of its punctuation-stripped form), plus the
    /// word itself.
    fn invalidate_results_for(&self, word: &str) {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return;
        }
        let stripped = utils::strip_word_punctuation(&normalized);
        for form in [normalized.as_str(), stripped.as_str()] {
            for (i, _) in form.char_indices() {
                if i > 0 {
                    self.result_cache.remove(&self.result_key(&form[..i]));
                }
            }
            if !form.is_empty() {
                self.result_cache.remove(&self.result_key(form));
            }
        }
    }
}

/// Words typed inside URLs or addresses are not spell checked.
fn is_web_fragment(normalized: &str) -> bool {
    normalized.contains('@') || normalized.contains("://") || normalized.starts_with("www.")
}

// core/tests/swipe_arbitration.rs
//
// End-to-end tests for swipe candidate arbitration against a live
// dictionary, blacklist, and a bigram model fed by committed words.
//
// Tests cover:
// - Wide score gaps leaving the decoder's ranking alone
// - The near-tie threshold firing at 0.03 but not at 0.10
// - Committed words steering near-ties through bigram context
// - Blacklisted words vanishing from results until restored
// - Low-confidence results gaining prefix completions, bounded by
//   what the gesture path could plausibly spell

use std::sync::Arc;

use softboard_core::{
    CacheManager, CandidateResult, Config, DictionaryService, InputProcessor, KeyPosition,
    KeyboardSettings, MemoryVocabularyStore, SettingsHandle, StaticDictionarySource,
    SuggestionSink, SuggestionUpdate, SwipeArbiter, SwipePath, SwipePoint, UserDictionary,
    WinReason, WordSource,
};

struct NullSink;

impl SuggestionSink for NullSink {
    fn publish(&self, _update: SuggestionUpdate) {}
}

struct Stack {
    dictionary: Arc<DictionaryService>,
    processor: Arc<InputProcessor>,
    arbiter: SwipeArbiter,
}

async fn stack() -> Stack {
    let config = Config::default();
    let caches = CacheManager::new(&config);
    let settings = SettingsHandle::fixed(KeyboardSettings::default());
    let store = Arc::new(MemoryVocabularyStore::new());
    let userdict =
        Arc::new(UserDictionary::new(store, settings.clone(), &caches, &config).unwrap());
    let source = Arc::new(StaticDictionarySource::new().with_language(
        "en",
        vec![
            ("hello", 5000),
            ("help", 3000),
            ("held", 900),
            ("hallo", 100),
            ("world", 4000),
        ],
    ));
    let dictionary =
        Arc::new(DictionaryService::new(source, Arc::clone(&userdict), &caches, &config).unwrap());
    dictionary.switch_language("en").await.unwrap();
    let processor = Arc::new(
        InputProcessor::new(
            Arc::clone(&dictionary),
            Arc::clone(&userdict),
            Arc::new(NullSink),
            settings,
            &caches,
            &config,
        )
        .unwrap(),
    );
    let arbiter = SwipeArbiter::new(Arc::clone(&dictionary), processor.next_word_model());
    Stack {
        dictionary,
        processor,
        arbiter,
    }
}

fn qwerty() -> Vec<KeyPosition> {
    let rows = [("qwertyuiop", 0.0, 0.0), ("asdfghjkl", 0.5, 1.0), ("zxcvbnm", 1.5, 2.0)];
    let mut keys = Vec::new();
    for (letters, offset, y) in rows {
        for (i, ch) in letters.chars().enumerate() {
            keys.push(KeyPosition::new(ch, offset + i as f64, y));
        }
    }
    keys
}

fn straight(length: f64) -> SwipePath {
    SwipePath::new(
        vec![SwipePoint::new(0.0, 0.0), SwipePoint::new(length, 0.0)],
        qwerty(),
    )
}

fn cand(word: &str, frequency: f64, combined: f64, coverage: f64) -> CandidateResult {
    CandidateResult {
        word: word.to_string(),
        spatial_score: combined,
        frequency_score: frequency,
        combined_score: combined,
        path_coverage: coverage,
    }
}

fn words(result: &softboard_core::ArbitrationResult) -> Vec<&str> {
    result.candidates.iter().map(|c| c.word.as_str()).collect()
}

#[tokio::test]
async fn test_wide_gap_preserves_decoder_ranking() {
    let s = stack().await;
    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.5, 0.95, 0.5), cand("help", 0.5, 0.80, 0.5)],
        &straight(6.0),
        None,
    );
    assert!(!result.arbitrated);
    assert_eq!(result.win_reason, WinReason::Spatial);
    assert_eq!(words(&result), ["hello", "help"]);
}

#[tokio::test]
async fn test_three_hundredths_gap_fires_tiebreaker() {
    let s = stack().await;
    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.5, 0.90, 0.5), cand("help", 0.5, 0.87, 0.5)],
        &straight(6.0),
        None,
    );
    assert!(result.arbitrated);
    assert_eq!(words(&result), ["hello", "help"]);
    assert!(result.candidates[0].combined_score > result.candidates[1].combined_score);
}

#[tokio::test]
async fn test_ten_hundredths_gap_does_not_fire() {
    let s = stack().await;
    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.5, 0.90, 0.5), cand("help", 0.5, 0.80, 0.5)],
        &straight(6.0),
        None,
    );
    assert!(!result.arbitrated);
}

#[tokio::test]
async fn test_committed_words_feed_bigram_context() {
    let s = stack().await;
    s.processor.commit("say", WordSource::Typed).await.unwrap();
    s.processor.commit("hello", WordSource::Typed).await.unwrap();

    // The decoder slightly prefers "hallo", but after "say" the model
    // has only ever seen "hello".
    let result = s.arbiter.arbitrate(
        vec![cand("hallo", 0.5, 0.90, 0.5), cand("hello", 0.5, 0.88, 0.5)],
        &straight(6.0),
        Some("say"),
    );
    assert!(result.arbitrated);
    assert_eq!(result.win_reason, WinReason::Bigram);
    assert_eq!(words(&result), ["hello", "hallo"]);
    assert!(result.candidates[0].combined_score > result.candidates[1].combined_score);
}

#[tokio::test]
async fn test_blacklisted_word_is_excluded_until_restored() {
    let s = stack().await;
    s.dictionary.blacklist_word("hello");

    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.9, 0.90, 0.5), cand("help", 0.3, 0.88, 0.5)],
        &straight(6.0),
        None,
    );
    assert!(!result.arbitrated);
    assert_eq!(words(&result), ["help"]);

    assert!(s.dictionary.unblacklist_word("hello"));
    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.9, 0.90, 0.5), cand("help", 0.3, 0.88, 0.5)],
        &straight(6.0),
        None,
    );
    assert!(result.arbitrated);
    assert_eq!(words(&result), ["hello", "help"]);
}

#[tokio::test]
async fn test_low_confidence_top_gains_completions_on_long_path() {
    let s = stack().await;
    let result = s.arbiter.arbitrate(
        vec![cand("hel", 0.2, 0.45, 0.4), cand("hep", 0.1, 0.30, 0.3)],
        &straight(6.0),
        None,
    );
    assert!(!result.arbitrated);
    // Every list word extending "hel" qualifies, ranked below the
    // decoder's own candidates in frequency order.
    assert_eq!(words(&result), ["hel", "hep", "hello", "help", "held"]);
    for completion in &result.candidates[2..] {
        assert!(completion.combined_score < 0.30);
        assert_eq!(completion.spatial_score, 0.0);
    }
}

#[tokio::test]
async fn test_path_length_bounds_completion_length() {
    let s = stack().await;
    let candidates = vec![cand("hel", 0.2, 0.45, 0.4), cand("hep", 0.1, 0.30, 0.3)];

    // A half-key swipe cannot plausibly spell more than three letters.
    let result = s
        .arbiter
        .arbitrate(candidates.clone(), &straight(0.5), None);
    assert_eq!(words(&result), ["hel", "hep"]);

    // Two keys of travel admit four letters: "help" and "held" fit,
    // five-letter "hello" does not.
    let result = s
        .arbiter
        .arbitrate(candidates.clone(), &straight(2.0), None);
    assert_eq!(words(&result), ["hel", "hep", "help", "held"]);

    let result = s.arbiter.arbitrate(candidates, &straight(6.0), None);
    assert_eq!(words(&result), ["hel", "hep", "hello", "help", "held"]);
}

#[tokio::test]
async fn test_single_low_confidence_survivor_is_returned_as_is() {
    let s = stack().await;
    let result = s
        .arbiter
        .arbitrate(vec![cand("hel", 0.2, 0.45, 0.4)], &straight(6.0), None);
    assert!(!result.arbitrated);
    assert_eq!(words(&result), ["hel"]);
}

#[tokio::test]
async fn test_confident_results_are_not_padded() {
    let s = stack().await;
    let result = s.arbiter.arbitrate(
        vec![cand("hello", 0.9, 0.95, 0.8), cand("help", 0.5, 0.70, 0.5)],
        &straight(6.0),
        None,
    );
    assert_eq!(words(&result), ["hello", "help"]);
}

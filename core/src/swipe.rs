//! Near-tie arbitration for swipe-decoded word candidates.
//!
//! The gesture decoder itself is an external collaborator; it hands over
//! candidates already scored on spatial fit and frequency. This module only
//! re-examines the top two when their combined scores sit within a
//! similarity threshold, using three signals: how well the gesture's
//! direction changes line up with the candidate's letters, how much of the
//! path the candidate explains, and raw frequency. The closer the tie, the
//! less the geometry is trusted.

use std::sync::{Arc, RwLock};

use ahash::AHashSet;
use tracing::debug;

use crate::dictionary::DictionaryService;
use crate::predictor::NextWordModel;
use crate::utils;

/// Score gap at or below which the top two candidates count as near-tied.
const SIMILARITY_THRESHOLD: f64 = 0.05;
/// Gaps below this fraction of the threshold are razor-thin: geometry is
/// likely noise at that margin, so frequency dominates.
const RAZOR_THIN_FRACTION: f64 = 0.40;
/// Tiebreak weights (frequency, inflection alignment, path coverage).
const RAZOR_THIN_WEIGHTS: (f64, f64, f64) = (0.80, 0.05, 0.05);
const NEAR_TIE_WEIGHTS: (f64, f64, f64) = (0.40, 0.35, 0.25);
/// Maximum bonus for the decoder's own leader, reached as the gap
/// approaches the similarity threshold.
const LEADER_BONUS_CAP: f64 = 0.08;
/// Adjustments when exactly one of the near-tied pair is bigram-predicted.
const BIGRAM_BOOST: f64 = 0.15;
const BIGRAM_PENALTY: f64 = 0.05;
/// How many predicted next words form the bigram context set.
const BIGRAM_CONTEXT: usize = 8;
/// The winner's combined score must exceed the loser's by at least this.
const ORDERING_EPSILON: f64 = 0.001;
/// Candidates kept after blacklist filtering and sorting.
const MAX_CANDIDATES: usize = 10;
/// Below this top score the list is padded with prefix completions.
const COMPLETION_CONFIDENCE: f64 = 0.60;
const MAX_COMPLETIONS: usize = 3;

/// Direction changes sharper than this count as intentional.
const MIN_TURN_DEGREES: f64 = 45.0;
/// Path vertices closer together than this fraction of the total path
/// length are jitter, not movement.
const MIN_SEGMENT_FRACTION: f64 = 0.05;

/// One sampled gesture coordinate, in key-grid units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwipePoint {
    pub x: f64,
    pub y: f64,
}

impl SwipePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A key's center and size on the active layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPosition {
    pub ch: char,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl KeyPosition {
    /// A unit-sized key centered at `(x, y)`.
    pub fn new(ch: char, x: f64, y: f64) -> Self {
        Self {
            ch,
            x,
            y,
            width: 1.0,
            height: 1.0,
        }
    }
}

/// The gesture as sampled by the host, plus the layout it was drawn on.
#[derive(Debug, Clone)]
pub struct SwipePath {
    pub points: Vec<SwipePoint>,
    pub keys: Vec<KeyPosition>,
}

impl SwipePath {
    pub fn new(points: Vec<SwipePoint>, keys: Vec<KeyPosition>) -> Self {
        Self { points, keys }
    }

    /// Total polyline length.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| distance(w[0].x, w[0].y, w[1].x, w[1].y))
            .sum()
    }

    /// Intentional direction changes: vertices of the jitter-filtered
    /// polyline where the heading turns by at least [`MIN_TURN_DEGREES`].
    pub fn inflections(&self) -> Vec<(f64, f64)> {
        let total = self.length();
        if total <= f64::EPSILON || self.points.len() < 3 {
            return Vec::new();
        }
        let min_segment = total * MIN_SEGMENT_FRACTION;

        let mut vertices: Vec<(f64, f64)> = vec![(self.points[0].x, self.points[0].y)];
        for point in &self.points[1..] {
            let (lx, ly) = vertices[vertices.len() - 1];
            if distance(lx, ly, point.x, point.y) >= min_segment {
                vertices.push((point.x, point.y));
            }
        }

        let mut out = Vec::new();
        for w in vertices.windows(3) {
            if turn_degrees(w[0], w[1], w[2]) >= MIN_TURN_DEGREES {
                out.push(w[1]);
            }
        }
        out
    }

    /// Rough upper bound on how many letters the gesture could have
    /// visited, from its length in mean key widths.
    pub fn plausible_letter_count(&self) -> usize {
        let mean_width = if self.keys.is_empty() {
            1.0
        } else {
            self.keys.iter().map(|k| k.width).sum::<f64>() / self.keys.len() as f64
        };
        if mean_width <= f64::EPSILON {
            return 2;
        }
        (self.length() / mean_width).ceil() as usize + 2
    }

    /// The key whose center is closest to `(x, y)`.
    pub fn nearest_key(&self, x: f64, y: f64) -> Option<char> {
        self.keys
            .iter()
            .min_by(|a, b| {
                let da = (a.x - x).powi(2) + (a.y - y).powi(2);
                let db = (b.x - x).powi(2) + (b.y - y).powi(2);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|key| key.ch)
    }
}

/// One decoder candidate. All scores are within `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateResult {
    pub word: String,
    pub spatial_score: f64,
    pub frequency_score: f64,
    pub combined_score: f64,
    /// Fraction of the gesture path this candidate explains.
    pub path_coverage: f64,
}

/// The signal that decided a near-tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinReason {
    Spatial,
    Frequency,
    Bigram,
    LeaderBonus,
}

/// Final ordering plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationResult {
    pub candidates: Vec<CandidateResult>,
    /// Whether the near-tie tiebreaker ran at all.
    pub arbitrated: bool,
    pub win_reason: WinReason,
}

/// Resolves near-ties between the decoder's top two candidates and pads
/// low-confidence results with dictionary completions.
pub struct SwipeArbiter {
    dictionary: Arc<DictionaryService>,
    model: Arc<RwLock<NextWordModel>>,
}

impl SwipeArbiter {
    pub fn new(dictionary: Arc<DictionaryService>, model: Arc<RwLock<NextWordModel>>) -> Self {
        Self { dictionary, model }
    }

    /// Order `candidates` for presentation. `previous_word` is the last
    /// committed word, if any; it supplies the bigram context.
    pub fn arbitrate(
        &self,
        candidates: Vec<CandidateResult>,
        path: &SwipePath,
        previous_word: Option<&str>,
    ) -> ArbitrationResult {
        let mut survivors: Vec<CandidateResult> = candidates
            .into_iter()
            .filter(|c| !self.dictionary.is_blacklisted(&c.word))
            .collect();
        survivors.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        survivors.truncate(MAX_CANDIDATES);

        if survivors.len() < 2 {
            return ArbitrationResult {
                candidates: survivors,
                arbitrated: false,
                win_reason: WinReason::Spatial,
            };
        }

        let gap = survivors[0].combined_score - survivors[1].combined_score;
        let (arbitrated, win_reason) = if gap <= SIMILARITY_THRESHOLD {
            let (challenger_wins, reason) =
                self.disambiguate(&survivors[0], &survivors[1], gap, path, previous_word);
            if challenger_wins {
                survivors.swap(0, 1);
            }
            // Downstream consumers sort by combined score; the decision
            // must survive that.
            let floor = survivors[1].combined_score + ORDERING_EPSILON;
            if survivors[0].combined_score < floor {
                survivors[0].combined_score = floor;
            }
            debug!(
                winner = %survivors[0].word,
                runner_up = %survivors[1].word,
                ?reason,
                gap,
                "arbitrated near-tie"
            );
            (true, reason)
        } else {
            (false, WinReason::Spatial)
        };

        self.extend_with_completions(&mut survivors, path);

        ArbitrationResult {
            candidates: survivors,
            arbitrated,
            win_reason,
        }
    }

    /// Tiebreak the top two. Returns whether the challenger overtakes the
    /// leader, and the signal that was decisive.
    fn disambiguate(
        &self,
        leader: &CandidateResult,
        challenger: &CandidateResult,
        gap: f64,
        path: &SwipePath,
        previous_word: Option<&str>,
    ) -> (bool, WinReason) {
        let razor_thin = gap < SIMILARITY_THRESHOLD * RAZOR_THIN_FRACTION;
        let (w_frequency, w_inflection, w_coverage) = if razor_thin {
            RAZOR_THIN_WEIGHTS
        } else {
            NEAR_TIE_WEIGHTS
        };

        let inflections = path.inflections();
        let base = |candidate: &CandidateResult| {
            w_frequency * candidate.frequency_score
                + w_inflection * alignment_score(&candidate.word, &inflections, path)
                + w_coverage * candidate.path_coverage
        };

        let bonus = LEADER_BONUS_CAP * (gap / SIMILARITY_THRESHOLD).clamp(0.0, 1.0);

        let predicted = previous_word.map(|prev| {
            self.model
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .predicted_set(prev, BIGRAM_CONTEXT)
        });
        let in_context = |candidate: &CandidateResult| {
            predicted
                .as_ref()
                .map(|set| set.contains(&utils::normalize(&candidate.word)))
                .unwrap_or(false)
        };
        let (bigram_leader, bigram_challenger) = match (in_context(leader), in_context(challenger))
        {
            (true, false) => (BIGRAM_BOOST, -BIGRAM_PENALTY),
            (false, true) => (-BIGRAM_PENALTY, BIGRAM_BOOST),
            _ => (0.0, 0.0),
        };

        let total_leader = base(leader) + bonus + bigram_leader;
        let total_challenger = base(challenger) + bigram_challenger;
        let challenger_wins = total_challenger > total_leader;

        // Which signal was decisive: remove each in priority order and see
        // whether the outcome flips.
        let flips = |leader_total: f64, challenger_total: f64| {
            (challenger_total > leader_total) != challenger_wins
        };
        let reason = if (bigram_leader != 0.0 || bigram_challenger != 0.0)
            && flips(total_leader - bigram_leader, total_challenger - bigram_challenger)
        {
            WinReason::Bigram
        } else if flips(
            total_leader - w_frequency * leader.frequency_score,
            total_challenger - w_frequency * challenger.frequency_score,
        ) {
            WinReason::Frequency
        } else if bonus > 0.0 && flips(total_leader - bonus, total_challenger) {
            WinReason::LeaderBonus
        } else {
            WinReason::Spatial
        };

        (challenger_wins, reason)
    }

    /// When even the best candidate is shaky, offer longer dictionary words
    /// it prefixes, as low-ranked alternatives.
    fn extend_with_completions(&self, survivors: &mut Vec<CandidateResult>, path: &SwipePath) {
        let (top_score, top_chars, own_frequency, prefix) = match survivors.first() {
            Some(top) => (
                top.combined_score,
                utils::grapheme_count(&utils::normalize(&top.word)),
                self.dictionary.word_frequency(&top.word).unwrap_or(0),
                top.word.clone(),
            ),
            None => return,
        };
        if top_score >= COMPLETION_CONFIDENCE || top_chars < 2 {
            return;
        }
        // A completion the gesture could not plausibly have meant is worse
        // than none: the drawn path bounds how many letters fit.
        let max_chars = (top_chars + 2)
            .max((top_chars as f64 * 1.5).ceil() as usize)
            .min(path.plausible_letter_count());

        let existing: AHashSet<String> = survivors
            .iter()
            .map(|c| utils::normalize(&c.word))
            .collect();
        let completions = self
            .dictionary
            .completions(&prefix, MAX_COMPLETIONS + existing.len() + 1);
        let max_frequency = completions
            .iter()
            .map(|(_, f)| *f)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut floor = survivors
            .last()
            .map(|c| c.combined_score)
            .unwrap_or_default();
        let mut appended = 0usize;
        for (word, frequency) in completions {
            if appended == MAX_COMPLETIONS || survivors.len() >= MAX_CANDIDATES {
                break;
            }
            if existing.contains(&word) || frequency <= own_frequency {
                continue;
            }
            let chars = utils::grapheme_count(&word);
            if chars <= top_chars || chars > max_chars {
                continue;
            }
            floor = (floor - ORDERING_EPSILON).max(0.0);
            survivors.push(CandidateResult {
                word,
                spatial_score: 0.0,
                frequency_score: frequency as f64 / max_frequency as f64,
                combined_score: floor,
                path_coverage: 0.0,
            });
            appended += 1;
        }
    }
}

/// Fraction of inflection points whose nearest key is one of the
/// candidate's letters. No inflections means the signal is neutral.
fn alignment_score(word: &str, inflections: &[(f64, f64)], path: &SwipePath) -> f64 {
    if inflections.is_empty() {
        return 1.0;
    }
    let letters: AHashSet<char> = utils::strip_word_punctuation(&utils::normalize(word))
        .chars()
        .collect();
    let matched = inflections
        .iter()
        .filter(|(x, y)| {
            path.nearest_key(*x, *y)
                .map(|key| letters.contains(&key))
                .unwrap_or(false)
        })
        .count();
    matched as f64 / inflections.len() as f64
}

fn distance(x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
}

/// Angle in degrees between the headings `a -> b` and `b -> c`.
fn turn_degrees(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    let v1 = (b.0 - a.0, b.1 - a.1);
    let v2 = (c.0 - b.0, c.1 - b.1);
    let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if n1 <= f64::EPSILON || n2 <= f64::EPSILON {
        return 0.0;
    }
    let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

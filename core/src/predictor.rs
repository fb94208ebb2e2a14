// core/src/predictor.rs
//
// Word-level transition model for next-word prediction.
// Stores P(next | prev) observed from committed text, used to bias
// suggestion ranking and swipe arbitration toward the sentence context.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ahash::AHashSet;

use crate::error::Result;
use crate::utils;

/// Entry in a word's transition distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub word: String,
    pub count: u64,
}

/// Learned word-to-word transitions.
/// Maps prev -> list of (next, count) pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextWordModel {
    /// Transition data: prev -> [(next, count), ...]
    data: HashMap<String, Vec<TransitionEntry>>,
    /// Total observation count per prev (for normalization)
    totals: HashMap<String, u64>,
}

impl NextWordModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed transition from committed text.
    /// Inputs are normalized; blank words are ignored.
    pub fn record_transition(&mut self, prev: &str, next: &str) {
        let prev = utils::normalize(prev);
        let next = utils::normalize(next);
        if prev.is_empty() || next.is_empty() {
            return;
        }

        let entries = self.data.entry(prev.clone()).or_default();
        match entries.iter_mut().find(|e| e.word == next) {
            Some(entry) => entry.count += 1,
            None => entries.push(TransitionEntry {
                word: next,
                count: 1,
            }),
        }
        *self.totals.entry(prev).or_insert(0) += 1;
    }

    /// Get the probability P(next | prev).
    /// Returns 0.0 if the transition was never observed.
    pub fn probability(&self, prev: &str, next: &str) -> f64 {
        let prev = utils::normalize(prev);
        let next = utils::normalize(next);
        if let Some(entries) = self.data.get(&prev) {
            if let Some(entry) = entries.iter().find(|e| e.word == next) {
                if let Some(&total) = self.totals.get(&prev) {
                    if total > 0 {
                        return entry.count as f64 / total as f64;
                    }
                }
            }
        }
        0.0
    }

    /// Most likely continuations of `prev`, best first, with probabilities.
    pub fn predict(&self, prev: &str, max: usize) -> Vec<(String, f64)> {
        let prev = utils::normalize(prev);
        let total = match self.totals.get(&prev) {
            Some(&t) if t > 0 => t as f64,
            _ => return Vec::new(),
        };
        let mut ranked: Vec<(String, f64)> = match self.data.get(&prev) {
            Some(entries) => entries
                .iter()
                .map(|e| (e.word.clone(), e.count as f64 / total))
                .collect(),
            None => return Vec::new(),
        };
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(max);
        ranked
    }

    /// The continuation words alone, for membership tests during arbitration.
    pub fn predicted_set(&self, prev: &str, max: usize) -> AHashSet<String> {
        self.predict(prev, max).into_iter().map(|(w, _)| w).collect()
    }

    /// Load from bincode file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model = bincode::deserialize_from(reader)?;
        Ok(model)
    }

    /// Save to bincode file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Get number of unique prev entries
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get total number of distinct transition pairs
    pub fn total_transitions(&self) -> usize {
        self.data.values().map(|v| v.len()).sum()
    }
}

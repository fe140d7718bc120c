//! Token estimation with a model-aware tokenizer and a content-hash
//! cache.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use tiktoken_rs::CoreBPE;

/// Approximate characters per token for the fallback path.
const CHARS_PER_TOKEN: usize = 4;

/// Deterministic token estimator.
///
/// Uses the model's BPE encoding when `tiktoken` knows the model, and a
/// chars/4 approximation otherwise. Estimates are cached by content
/// hash with LRU eviction, so repeated budgeting of the same sections
/// does not re-tokenize.
pub struct TokenEstimator {
    bpe: Option<CoreBPE>,
    cache: Mutex<LruCache>,
}

impl TokenEstimator {
    pub fn new(model: &str, cache_capacity: usize) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model).ok();
        if bpe.is_none() {
            tracing::warn!(
                model = %model,
                "no known tokenizer for model; falling back to chars/{CHARS_PER_TOKEN}"
            );
        }
        Self {
            bpe,
            cache: Mutex::new(LruCache::new(cache_capacity)),
        }
    }

    /// Estimate the token count of `text`.
    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let key = content_hash(text);
        if let Some(cached) = self.cache.lock().get(key) {
            return cached;
        }

        let count = match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.len().div_ceil(CHARS_PER_TOKEN),
        };

        self.cache.lock().put(key, count);
        count
    }

    /// Sum of estimates over many texts.
    pub fn estimate_all<'a, I: IntoIterator<Item = &'a str>>(&self, texts: I) -> usize {
        texts.into_iter().map(|t| self.estimate(t)).sum()
    }
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LRU cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generation-stamped LRU: hits bump the generation, eviction removes
/// the entry with the smallest generation. O(1) hit, O(n) eviction,
/// which only runs when the cache is full.
struct LruCache {
    entries: HashMap<u64, (usize, u64)>,
    capacity: usize,
    generation: u64,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            generation: 0,
        }
    }

    fn get(&mut self, key: u64) -> Option<usize> {
        self.generation += 1;
        let generation = self.generation;
        self.entries.get_mut(&key).map(|entry| {
            entry.1 = generation;
            entry.0
        })
    }

    fn put(&mut self, key: u64, value: usize) {
        self.generation += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(&oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, generation))| *generation)
                .map(|(k, _)| k)
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, self.generation));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_falls_back_to_chars() {
        let est = TokenEstimator::new("definitely-not-a-model", 16);
        assert_eq!(est.estimate("abcdefgh"), 2);
        assert_eq!(est.estimate("abcdefghi"), 3);
        assert_eq!(est.estimate(""), 0);
    }

    #[test]
    fn known_model_tokenizes() {
        let est = TokenEstimator::new("gpt-4o", 16);
        let n = est.estimate("The quick brown fox jumps over the lazy dog.");
        assert!(n >= 5 && n <= 20, "unexpected token count {n}");
    }

    #[test]
    fn repeated_estimates_are_stable() {
        let est = TokenEstimator::new("gpt-4o", 16);
        let a = est.estimate("hello world");
        let b = est.estimate("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);
        // Touch key 1 so key 2 is the LRU.
        assert_eq!(cache.get(1), Some(10));
        cache.put(3, 30);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.get(1), Some(10));
        assert_eq!(cache.get(3), Some(30));
    }

    #[test]
    fn lru_rewrite_of_existing_key_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(1, 11);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1), Some(11));
        assert_eq!(cache.get(2), Some(20));
    }
}

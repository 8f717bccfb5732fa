//! Tag Index
//!
//! Secondary index from tag to the keys carrying it, used for bulk
//! invalidation. A reverse map from key to tags keeps removal cheap.
//!
//! Lock order is always key map first, then tag map.

use std::collections::{BTreeSet, HashSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Bidirectional tag <-> key index
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: DashMap<String, HashSet<String>>,
    by_key: DashMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tag set of `key`
    pub fn replace(&self, key: &str, tags: &BTreeSet<String>) {
        if tags.is_empty() {
            self.remove_key(key);
            return;
        }

        let mut current = self.by_key.entry(key.to_string()).or_default();
        for stale in current.difference(tags) {
            self.unlink(stale, key);
        }
        for tag in tags.difference(&current) {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        *current = tags.clone();
    }

    /// Drop `key` from every tag it belongs to
    pub fn remove_key(&self, key: &str) -> bool {
        match self.by_key.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                for tag in entry.get() {
                    self.unlink(tag, key);
                }
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    fn unlink(&self, tag: &str, key: &str) {
        if let Some(mut keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
        }
        self.by_tag.remove_if(tag, |_, keys| keys.is_empty());
    }

    /// Union of the keys carrying any of `tags`
    pub fn keys_for<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for tag in tags {
            if let Some(members) = self.by_tag.get(tag.as_ref()) {
                keys.extend(members.iter().cloned());
            }
        }
        keys
    }

    /// Tags currently recorded for `key`
    pub fn tags_of(&self, key: &str) -> BTreeSet<String> {
        self.by_key
            .get(key)
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }

    /// Every tagged key
    pub fn keys(&self) -> Vec<String> {
        self.by_key.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of distinct tags
    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    /// Number of tagged keys
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn clear(&self) {
        self.by_key.clear();
        self.by_tag.clear();
    }
}

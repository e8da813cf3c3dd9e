use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Emoji reactions on a single message, keyed by emoji.
///
/// Each emoji maps to the set of usernames currently reacting with it. The
/// map never holds an emoji whose user set is empty: the last user toggling
/// off removes the key entirely, so "no reactions" and "emoji with zero
/// users" are the same state. Serializes as a plain JSON object, e.g.
/// `{"👍": ["alice", "bob"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionSet(BTreeMap<String, BTreeSet<String>>);

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips `username`'s reaction under `emoji`: absent becomes present,
    /// present becomes absent. Returns `true` when the reaction was added.
    pub fn toggle(&mut self, emoji: &str, username: &str) -> bool {
        let users = self.0.entry(emoji.to_string()).or_default();
        let added = if users.contains(username) {
            users.remove(username);
            false
        } else {
            users.insert(username.to_string());
            true
        };
        if users.is_empty() {
            self.0.remove(emoji);
        }
        added
    }

    /// Usernames currently reacting with `emoji`, if anyone is.
    pub fn users_for(&self, emoji: &str) -> Option<&BTreeSet<String>> {
        self.0.get(emoji)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

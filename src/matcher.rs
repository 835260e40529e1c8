// src/matcher.rs
//! Multi-pattern keyword matching over a `{label -> phrases}` dictionary.
//!
//! All phrases are compiled into a single Aho-Corasick automaton, so
//! `extract` is one linear pass over the input no matter how many labels the
//! dictionary holds. Matching is case-insensitive (both phrases and text are
//! lowercased) and a hit only counts when it sits on word boundaries. Among
//! the hits that do, the leftmost-longest non-overlapping ones are kept, so a
//! longer phrase cut mid-word falls back to a shorter one at the same spot.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::MatcherError;

#[derive(Debug, Clone)]
pub struct KeywordMatcher<L> {
    automaton: Option<AhoCorasick>,
    /// pattern index -> labels sharing that phrase
    labels: Vec<Vec<L>>,
}

impl<L: Clone + Ord> KeywordMatcher<L> {
    pub fn build<'a, I, P>(dictionary: I) -> Result<Self, MatcherError>
    where
        I: IntoIterator<Item = (&'a L, P)>,
        L: 'a,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let mut phrase_index: HashMap<String, usize> = HashMap::new();
        let mut phrases: Vec<String> = Vec::new();
        let mut labels: Vec<Vec<L>> = Vec::new();

        for (label, label_phrases) in dictionary {
            for phrase in label_phrases {
                let phrase = phrase.as_ref().trim().to_lowercase();
                if phrase.is_empty() {
                    continue;
                }
                let idx = *phrase_index.entry(phrase.clone()).or_insert_with(|| {
                    phrases.push(phrase);
                    labels.push(Vec::new());
                    labels.len() - 1
                });
                if !labels[idx].contains(label) {
                    labels[idx].push(label.clone());
                }
            }
        }

        if phrases.is_empty() {
            return Ok(Self::empty());
        }

        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&phrases)?;

        Ok(Self {
            automaton: Some(automaton),
            labels,
        })
    }

    /// Matcher over an empty dictionary: `extract` always yields nothing.
    pub fn empty() -> Self {
        Self {
            automaton: None,
            labels: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.automaton.is_none()
    }

    /// Number of distinct phrases compiled into the automaton.
    pub fn phrase_count(&self) -> usize {
        self.labels.len()
    }

    pub fn extract(&self, text: &str) -> BTreeSet<L> {
        let mut out = BTreeSet::new();
        let Some(ac) = &self.automaton else {
            return out;
        };

        let haystack = text.to_lowercase();
        let mut hits: Vec<(usize, usize, usize)> = ac
            .find_overlapping_iter(&haystack)
            .filter(|m| on_word_boundary(&haystack, m.start(), m.end()))
            .map(|m| (m.start(), m.end(), m.pattern().as_usize()))
            .collect();
        hits.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut next_free = 0;
        for (start, end, pattern) in hits {
            if start < next_free {
                continue;
            }
            next_free = end;
            for label in &self.labels[pattern] {
                out.insert(label.clone());
            }
        }
        out
    }
}

impl KeywordMatcher<String> {
    /// Convenience for `BTreeMap<String, Vec<String>>` dictionaries.
    pub fn from_rules(rules: &BTreeMap<String, Vec<String>>) -> Result<Self, MatcherError> {
        Self::build(rules.iter())
    }
}

fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

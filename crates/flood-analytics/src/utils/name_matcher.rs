//! Two-phase lookup of known names inside a normalized question.
//!
//! Phase one is an exact whole-word match, longest name first. Phase two slides over the
//! question's word n-grams and scores them against every known name with normalized
//! Damerau-Levenshtein similarity; only the best candidate at or above the threshold is accepted.

use crate::utils::text_utils::TextUtils;

/// Words that never start or end a tolerant candidate.
const STOP_WORDS: &[&str] = &[
    "a", "about", "again", "all", "also", "an", "and", "any", "approved", "are", "at", "average",
    "avg", "between", "biggest", "budget", "by", "can", "contract", "contractor", "contractors",
    "control", "cost", "count", "did", "display", "do", "does", "each", "find", "flood", "for", "from",
    "get", "give", "got", "has", "have", "highest", "how", "i", "in", "instead", "is", "it", "its", "largest",
    "last", "list", "many", "me", "mean", "more", "much", "next", "now", "number", "of", "on",
    "only", "or", "overall", "please", "project", "projects", "search", "see", "show", "sum",
    "switch", "tell", "that", "the", "there", "these", "this", "those", "through", "thru", "to", "top",
    "total", "until", "want", "what", "whats", "where", "which", "who", "with", "year", "you",
];

/// Place words allowed inside a candidate but never sufficient on their own.
const GENERIC_WORDS: &[&str] = &["city", "municipality", "province", "region", "of"];

/// Words dropped from contractor names to get their distinctive part.
const CORPORATE_SUFFIXES: &[&str] = &[
    "and", "builders", "builder", "co", "company", "construction", "constructions", "contractor",
    "contractors", "corp", "corporation", "dev", "development", "ent", "enterprise", "enterprises",
    "general", "inc", "incorporated", "industries", "ltd", "services", "supply", "the", "trading",
];

/// Shortest gram or alias considered by the tolerant phase, in bytes.
const MIN_TOLERANT_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    /// Canonical value as it appears in the dataset
    pub value: String,
    /// Byte offset of the matched span in the normalized text
    pub start: usize,
    pub len: usize,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct NameEntry {
    canonical: String,
    key: String,
    key_words: usize,
    alias: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NameMatcher {
    entries: Vec<NameEntry>,
    max_words: usize,
}

impl NameMatcher {
    /// Matcher over location names. Keys are built with [`TextUtils::normalize_name`].
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(values, false)
    }

    /// Matcher over contractor names; each name also gets an alias with corporate words removed.
    pub fn for_contractors<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(values, true)
    }

    fn build<I, S>(values: I, with_alias: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<NameEntry> = Vec::new();
        for value in values {
            let canonical = value.as_ref().trim();
            let key = if with_alias {
                TextUtils::normalize(canonical)
            } else {
                TextUtils::normalize_name(canonical)
            };
            if key.is_empty() || entries.iter().any(|e| e.key == key) {
                continue;
            }
            let alias = if with_alias { distinctive_part(&key) } else { None };
            entries.push(NameEntry {
                canonical: canonical.to_string(),
                key_words: key.split(' ').count(),
                key,
                alias,
            });
        }

        // Longest first so "quezon city" wins over "quezon"
        entries.sort_by(|a, b| b.key.len().cmp(&a.key.len()));
        let max_words = entries.iter().map(|e| e.key_words).max().unwrap_or(0);

        Self { entries, max_words }
    }

    /// Exact whole-word match on normalized text, longest known name first.
    pub fn exact(&self, text: &str) -> Option<NameMatch> {
        self.entries.iter().find_map(|entry| {
            TextUtils::find_phrase(text, &entry.key).map(|start| NameMatch {
                value: entry.canonical.clone(),
                start,
                len: entry.key.len(),
                score: 1.0,
            })
        })
    }

    /// Best similarity match between any question n-gram and any known name (or alias).
    /// Returns `None` unless the best score reaches `threshold`.
    pub fn tolerant(&self, text: &str, threshold: f64) -> Option<NameMatch> {
        if self.entries.is_empty() {
            return None;
        }

        let grams = candidate_grams(text, self.max_words + 1);
        let mut best: Option<NameMatch> = None;

        for (start, end, words) in grams {
            let gram = &text[start..end];
            for entry in &self.entries {
                let mut score = 0.0_f64;
                if words.abs_diff(entry.key_words) <= 1 {
                    score = similarity(gram, &entry.key, threshold);
                }
                if let Some(alias) = &entry.alias {
                    if words.abs_diff(alias.split(' ').count()) <= 1 {
                        score = score.max(similarity(gram, alias, threshold));
                    }
                }
                if score >= threshold && best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(NameMatch {
                        value: entry.canonical.clone(),
                        start,
                        len: end - start,
                        score,
                    });
                }
            }
        }

        best
    }
}

/// Similarity in [0, 1]; skips the edit-distance computation when lengths alone rule it out.
fn similarity(a: &str, b: &str, threshold: f64) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    let ceiling = 1.0 - a.len().abs_diff(b.len()) as f64 / longest as f64;
    if ceiling < threshold {
        return 0.0;
    }
    strsim::normalized_damerau_levenshtein(a, b)
}

/// Contractor name without corporate suffix words, if something distinctive remains.
fn distinctive_part(key: &str) -> Option<String> {
    let kept: Vec<&str> = key
        .split(' ')
        .filter(|w| !CORPORATE_SUFFIXES.contains(w))
        .collect();
    let alias = kept.join(" ");
    if alias.len() < MIN_TOLERANT_LEN || alias == key {
        None
    } else {
        Some(alias)
    }
}

/// Word n-grams of the normalized text as (start, end, word_count). Grams never cross a
/// consumed span, never start or end on a stop word and never consist only of place words.
fn candidate_grams(text: &str, max_words: usize) -> Vec<(usize, usize, usize)> {
    let mut tokens: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for word in text.split(' ') {
        tokens.push((offset, word));
        offset += word.len() + 1;
    }

    let usable = |w: &str| !w.contains('|') && !w.is_empty();
    let boundary_ok =
        |w: &str| !STOP_WORDS.contains(&w) && !GENERIC_WORDS.contains(&w) && !w.chars().any(|c| c.is_ascii_digit());

    let mut grams = Vec::new();
    for i in 0..tokens.len() {
        if !usable(tokens[i].1) || !boundary_ok(tokens[i].1) {
            continue;
        }
        for j in i..tokens.len().min(i + max_words.max(1)) {
            let word = tokens[j].1;
            if !usable(word) {
                break;
            }
            // A trailing place word is fine ("quezn city"), a trailing stop word is not
            if STOP_WORDS.contains(&word) || word.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            let start = tokens[i].0;
            let end = tokens[j].0 + word.len();
            if end - start >= MIN_TOLERANT_LEN {
                grams.push((start, end, j - i + 1));
            }
        }
    }
    grams
}

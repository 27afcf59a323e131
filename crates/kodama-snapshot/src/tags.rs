//! Tag normalization.

use std::collections::{BTreeMap, HashSet};

/// Longest tag kept after normalization.
pub const MAX_TAG_LEN: usize = 50;

/// Normalize one tag: lowercase, trimmed, whitespace runs become `-`, only
/// `[a-z0-9-_/]` kept, at most fifty characters.
pub fn normalize_tag(tag: &str) -> String {
    let lowered = tag.trim().to_lowercase();
    let dashed = lowered.split_whitespace().collect::<Vec<_>>().join("-");
    dashed
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '/'))
        .take(MAX_TAG_LEN)
        .collect()
}

/// Normalize a list of tags, dropping empties and duplicates. Order is kept.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| normalize_tag(tag.as_ref()))
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Split comma or whitespace separated user input into normalized tags.
pub fn parse_tags(input: &str) -> Vec<String> {
    normalize_tags(input.split(|c: char| c == ',' || c.is_whitespace()))
}

/// How often each tag is used across `tag_lists`, most used first.
pub fn tag_counts<'a, I>(tag_lists: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a [String]>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tags in tag_lists {
        for tag in tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted
}

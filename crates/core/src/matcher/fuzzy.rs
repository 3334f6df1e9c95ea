use std::collections::BTreeSet;

use rapidfuzz::fuzz;

/// Weight applied to the token-set score, so an exact token-sort match
/// always outranks a subset match.
const TOKEN_SET_WEIGHT: f64 = 0.95;

/// Best match for a candidate title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleMatch<'a> {
    /// Position of the matched title in the input sequence.
    pub index: usize,
    /// The matched title, as given.
    pub title: &'a str,
    /// Similarity score, 0-100.
    pub score: u8,
}

/// Split on non-word characters, lower-case, and return the tokens sorted.
///
/// Word characters are Unicode letters and digits, so kana, kanji and
/// accented titles stay whole.
pub fn normalize_tokens(s: &str) -> Vec<String> {
    let mut tokens: Vec<String> = s
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    tokens.sort();
    tokens
}

/// Indel similarity of the sorted token strings, 0-100.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let left = normalize_tokens(a);
    let right = normalize_tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0;
    }
    ratio(&left.join(" "), &right.join(" "))
}

/// Token-set similarity, 0-100.
///
/// Compares the shared tokens against each side's full token set, so extra
/// tokens on one side (an episode number, a trailing tag) cost little.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let left: BTreeSet<String> = normalize_tokens(a).into_iter().collect();
    let right: BTreeSet<String> = normalize_tokens(b).into_iter().collect();
    if left.is_empty() || right.is_empty() {
        return 0;
    }

    let join = |set: Vec<&String>| {
        set.into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    };

    let sect = join(left.intersection(&right).collect());
    let only_left = join(left.difference(&right).collect());
    let only_right = join(right.difference(&left).collect());

    let combined_left = format!("{} {}", sect, only_left).trim().to_string();
    let combined_right = format!("{} {}", sect, only_right).trim().to_string();

    let mut best = ratio(&combined_left, &combined_right);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_left))
            .max(ratio(&sect, &combined_right));
    }
    best
}

/// Pick the best-scoring title for `candidate`.
///
/// Each title is scored as the larger of its token-sort ratio and its
/// weighted token-set ratio. Ties keep the first title seen. Returns `None`
/// only when `titles` is empty; callers must apply their own cutoff.
pub fn match_title<'a, I>(candidate: &str, titles: I) -> Option<TitleMatch<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<TitleMatch<'a>> = None;

    for (index, title) in titles.into_iter().enumerate() {
        let sort = token_sort_ratio(candidate, title);
        let set = (token_set_ratio(candidate, title) as f64 * TOKEN_SET_WEIGHT).round() as u8;
        let score = sort.max(set);

        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(TitleMatch {
                index,
                title,
                score,
            });
        }
    }

    best
}

fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    (fuzz::ratio(a.chars(), b.chars()) * 100.0).round() as u8
}

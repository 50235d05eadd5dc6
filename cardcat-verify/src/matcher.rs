//! Normalizer / Matcher
//!
//! Pure string utilities every other component builds on: text
//! normalization, Levenshtein similarity, parallel-name alias resolution and
//! card-number canonicalization.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Player names must reach this similarity to count as the same player
pub const PLAYER_MATCH_THRESHOLD: f64 = 0.85;

/// Parallel names at or above this similarity are treated as misspellings
pub const VARIATION_MATCH_THRESHOLD: f64 = 0.70;

/// Known spellings of parallel/variation names, keyed lowercase
///
/// Some keys carry punctuation (`b&w`, `1/1`) and are matched against the
/// trimmed original rather than the normalized form.
static PARALLEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("xfractor", "x-fractor"),
        ("x fractor", "x-fractor"),
        ("x-fractor", "x-fractor"),
        ("super fractor", "superfractor"),
        ("refr", "refractor"),
        ("ref", "refractor"),
        ("rr", "rated rookie"),
        ("rc", "rookie"),
        ("sp", "short print"),
        ("ssp", "super short print"),
        ("1/1", "one of one"),
        ("1 of 1", "one of one"),
        ("auto", "autograph"),
        ("b&w", "black and white"),
        ("black & white", "black and white"),
        ("red white & blue", "red white and blue"),
        ("rwb", "red white and blue"),
        ("holo", "holo prizm"),
        ("silver prizm", "silver"),
        ("prizm silver", "silver"),
    ])
});

/// Lowercase, keep word characters, whitespace and `/`, collapse whitespace
///
/// Returns an empty string for empty or whitespace-only input.
pub fn normalize(s: &str) -> String {
    let kept: String = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '/' || c.is_whitespace())
        .collect();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical card number: "#088" → "88", "007" → "7", "000" → "0"
///
/// Leading `#`, zeros and interior padding between them are all stripped in
/// one pass so the function is idempotent.
pub fn normalize_card_number(s: &str) -> String {
    let stripped = s
        .trim()
        .trim_start_matches(|c: char| c == '#' || c == '0' || c.is_whitespace())
        .trim_end();

    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// Normalize a parallel name and resolve it through the alias table
pub fn normalize_parallel_name(s: &str) -> String {
    let normalized = normalize(s);

    if let Some(alias) = PARALLEL_ALIASES.get(normalized.as_str()) {
        return (*alias).to_string();
    }

    let original = s.trim().to_lowercase();
    if let Some(alias) = PARALLEL_ALIASES.get(original.as_str()) {
        return (*alias).to_string();
    }

    normalized
}

/// Edit-distance similarity in [0, 1]
///
/// 0.0 when either side is blank, 1.0 when the normalized strings are equal,
/// otherwise `1 - levenshtein / max_len` over the normalized strings.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }

    let norm_a = normalize(a);
    let norm_b = normalize(b);

    if norm_a == norm_b {
        return 1.0;
    }

    let max_len = norm_a.chars().count().max(norm_b.chars().count());
    if max_len == 0 {
        return 0.0;
    }

    let distance = strsim::levenshtein(&norm_a, &norm_b);
    1.0 - distance as f64 / max_len as f64
}

/// A candidate picked by [`best_match`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch<'a> {
    pub value: &'a str,
    pub index: usize,
    pub score: f64,
}

/// Highest-similarity candidate; earlier candidates win ties
pub fn best_match<'a, I>(query: &str, candidates: I) -> Option<ScoredMatch<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<ScoredMatch<'a>> = None;

    for (index, candidate) in candidates.into_iter().enumerate() {
        let score = similarity(query, candidate);
        let better = match &best {
            Some(current) => score > current.score,
            None => true,
        };
        if better {
            best = Some(ScoredMatch {
                value: candidate,
                index,
                score,
            });
        }
    }

    best
}

/// Render a similarity score as a whole percentage ("83%")
pub fn percent(score: f64) -> String {
    format!("{:.0}%", score * 100.0)
}

//! Claim tokenization and similarity
//!
//! Claims are compared as token sets: Latin/alphanumeric words (lowercased)
//! and CJK characters, each CJK character standing alone since word
//! boundaries are not written in those scripts.

use std::collections::BTreeSet;

/// Whether a character belongs to the CJK ranges tokenized per-character
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}' // CJK Extension A
        | '\u{3040}'..='\u{309F}' // Hiragana
        | '\u{30A0}'..='\u{30FF}' // Katakana
        | '\u{AC00}'..='\u{D7AF}' // Hangul Syllables
    )
}

/// Tokenize a claim into a set of comparison tokens
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.insert(std::mem::take(&mut word));
            }
            tokens.insert(c.to_string());
        } else if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                word.push(lower);
            }
        } else if !word.is_empty() {
            tokens.insert(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.insert(word);
    }

    tokens
}

/// Jaccard similarity of two token sets; empty-union pairs score 0
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Mean pairwise Jaccard similarity across a set of claims.
///
/// Returns None with fewer than two claims; the caller models insufficient
/// data as the neutral 0.5, not zero.
pub fn mean_pairwise_similarity(claims: &[&str]) -> Option<f64> {
    if claims.len() < 2 {
        return None;
    }

    let token_sets: Vec<BTreeSet<String>> = claims.iter().map(|c| tokenize(c)).collect();

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            total += jaccard(&token_sets[i], &token_sets[j]);
            pairs += 1;
        }
    }

    Some(total / pairs as f64)
}

/// Mean Jaccard similarity across the cross product of two claim sets.
///
/// Used for user-pair consensus: every claim of one side against every claim
/// of the other. None when either side is empty.
pub fn cross_similarity(left: &[&str], right: &[&str]) -> Option<f64> {
    if left.is_empty() || right.is_empty() {
        return None;
    }

    let left_sets: Vec<BTreeSet<String>> = left.iter().map(|c| tokenize(c)).collect();
    let right_sets: Vec<BTreeSet<String>> = right.iter().map(|c| tokenize(c)).collect();

    let mut total = 0.0;
    for l in &left_sets {
        for r in &right_sets {
            total += jaccard(l, r);
        }
    }

    Some(total / (left_sets.len() * right_sets.len()) as f64)
}

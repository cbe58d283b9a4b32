//! Word-overlap similarity between a post and a canonical sharing message

/// Minimum percentage of shared words for a post to count as a re-share
pub const SHARE_SIMILARITY_THRESHOLD: u32 = 60;

/// Percentage of `canonical` words that literally appear anywhere in
/// `candidate`, order-independent and case-insensitive
pub fn text_similarity(canonical: &str, candidate: &str) -> u32 {
    let canonical_words: Vec<String> = canonical
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if canonical_words.is_empty() {
        return 0;
    }

    let candidate_words: Vec<String> = candidate
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    let shared = canonical_words
        .iter()
        .filter(|word| candidate_words.iter().any(|c| c == *word))
        .count();

    (shared * 100 / canonical_words.len()) as u32
}

/// Whether `candidate` reads as a re-share of `canonical`
pub fn is_share(canonical: &str, candidate: &str) -> bool {
    text_similarity(canonical, candidate) >= SHARE_SIMILARITY_THRESHOLD
}

/// The words of `candidate` that do not appear in `canonical`, in their
/// original order, space-joined and trimmed. Recovers user-authored text
/// appended to a pre-filled sharing message.
pub fn extract_attached_text(canonical: &str, candidate: &str) -> String {
    let canonical_words: Vec<String> = canonical
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();

    candidate
        .split_whitespace()
        .filter(|word| {
            let lowered = word.to_lowercase();
            !canonical_words.iter().any(|c| *c == lowered)
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

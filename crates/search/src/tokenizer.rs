//! Tokenizer for the full-text index.

/// Tokenize text into searchable terms: lowercase, split on non-alphanumeric
/// characters, filter tokens shorter than 2 characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(String::from)
        .collect()
}

/// Tokenize and deduplicate, preserving first-occurrence order.
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

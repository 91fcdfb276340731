//! Text normalization boundary.
//!
//! The index core is agnostic to stemming and tokenization rules; it only
//! requires that whatever normalizer populated an index at insert time is
//! queried with matching assumptions at search time. The default
//! [`WordTokenizer`] mirrors SQLite's unicode61 tokenizer closely enough for
//! plain word queries: `\w+` runs, lowercased.

use regex::Regex;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

/// Produces the normalized token sequence of a document.
///
/// The sequence is finite and restartable: calling [`tokens`](Self::tokens)
/// again with the same input yields the same tokens in the same order.
pub trait Normalizer: Send + Sync {
    /// Tokens of `text` in document order.
    fn tokens<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = String> + 'a>;
}

/// Default normalizer: unicode word runs, optionally lowercased.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pub lowercase: bool,
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self { lowercase: true }
    }
}

impl Normalizer for WordTokenizer {
    fn tokens<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        Box::new(WORD.find_iter(text).map(move |m| {
            if self.lowercase {
                m.as_str().to_lowercase()
            } else {
                m.as_str().to_string()
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_lowercase() {
        let t = WordTokenizer::default();
        let tokens: Vec<String> = t.tokens("The Fat, Rats!").collect();
        assert_eq!(tokens, vec!["the", "fat", "rats"]);
    }

    #[test]
    fn test_tokens_preserve_case() {
        let t = WordTokenizer { lowercase: false };
        let tokens: Vec<String> = t.tokens("One hundred one").collect();
        assert_eq!(tokens, vec!["One", "hundred", "one"]);
    }

    #[test]
    fn test_tokens_unicode() {
        let t = WordTokenizer::default();
        let tokens: Vec<String> = t.tokens("111 Щось за contents").collect();
        assert_eq!(tokens, vec!["111", "щось", "за", "contents"]);
    }

    #[test]
    fn test_tokens_restartable() {
        let t = WordTokenizer::default();
        let first: Vec<String> = t.tokens("one two").collect();
        let second: Vec<String> = t.tokens("one two").collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_tokens_empty() {
        let t = WordTokenizer::default();
        assert_eq!(t.tokens("  ...  ").count(), 0);
    }
}

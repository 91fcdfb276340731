//! Match-expression strategies.
//!
//! A strategy turns a free-text search string into an FTS5 match expression.
//! The expression grammar is the engine's, so the default strategy quotes
//! every token — embedded quotes are doubled, which keeps match-syntax
//! metacharacters from escaping the phrase.

use crate::error::{FtsError, Result};
use crate::normalize::Normalizer;

/// Turns a search string into an engine match expression.
pub trait MatchStrategy: Send + Sync {
    fn expression(&self, text: &str, normalizer: &dyn Normalizer) -> String;
}

/// Default strategy: normalized tokens, each quoted, AND-joined.
///
/// `plain("The Fat Rats")` → `"the" AND "fat" AND "rats"`, or with `prefix`
/// enabled `"the"* AND "fat"* AND "rats"*`.
#[derive(Debug, Clone, Default)]
pub struct PlainStrategy {
    pub prefix: bool,
}

impl MatchStrategy for PlainStrategy {
    fn expression(&self, text: &str, normalizer: &dyn Normalizer) -> String {
        let suffix = if self.prefix { "*" } else { "" };
        normalizer
            .tokens(text)
            .map(|token| format!("\"{}\"{suffix}", token.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Pass-through strategy for callers composing their own expressions
/// (e.g. `one* two*`). No quoting is applied.
#[derive(Debug, Clone, Default)]
pub struct VerbatimStrategy;

impl MatchStrategy for VerbatimStrategy {
    fn expression(&self, text: &str, _normalizer: &dyn Normalizer) -> String {
        text.to_string()
    }
}

/// Resolve a strategy by name.
pub fn by_name(name: &str) -> Result<Box<dyn MatchStrategy>> {
    match name {
        "plain" => Ok(Box::new(PlainStrategy { prefix: false })),
        "plain-prefix" => Ok(Box::new(PlainStrategy { prefix: true })),
        "verbatim" => Ok(Box::new(VerbatimStrategy)),
        other => Err(FtsError::validation(format!(
            "unknown match strategy \"{other}\""
        ))),
    }
}

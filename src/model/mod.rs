//! Identifier model and code generation
//!
//! Codes are sequences of alphabet symbols. A symbol is usually one ASCII
//! character, but emoji alphabets use multi-byte (and sometimes multi-char)
//! symbols, so symbols are kept as strings throughout.

pub mod alphabet;
mod generator;
mod identifier;

pub use generator::{Candidate, CodeGenerator};
pub use identifier::{CategoryCounts, IdentifierModel, ModelKey, PositionStats};

use serde::{Deserialize, Serialize};

/// Coarse character class used as a second, smoother frequency signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharCategory {
    Lower,
    Upper,
    Digit,
    Other,
}

impl CharCategory {
    pub const ALL: [CharCategory; 4] = [
        CharCategory::Lower,
        CharCategory::Upper,
        CharCategory::Digit,
        CharCategory::Other,
    ];

    /// Category of a symbol; anything that is not a single char is `Other`
    pub fn of(symbol: &str) -> Self {
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_digit() => CharCategory::Digit,
            (Some(c), None) if c.is_lowercase() => CharCategory::Lower,
            (Some(c), None) if c.is_uppercase() => CharCategory::Upper,
            _ => CharCategory::Other,
        }
    }
}

impl std::fmt::Display for CharCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CharCategory::Lower => write!(f, "lower"),
            CharCategory::Upper => write!(f, "upper"),
            CharCategory::Digit => write!(f, "digit"),
            CharCategory::Other => write!(f, "other"),
        }
    }
}

/// Split a plain code into single-char symbols
pub fn split_symbols(code: &str) -> Vec<String> {
    code.chars().map(String::from).collect()
}

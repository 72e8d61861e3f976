//! Alphabets and static per-service alphabet rules
//!
//! Rules are not learned. They encode what is known about a service's
//! identifier allocator (e.g. lowercase-only codes) and restrict whatever
//! alphabet the config asked for.

use crate::types::{AlphabetPreset, AlphabetSpec, DomainConfig};

/// Alphabet used when a domain does not configure one
pub const DEFAULT_PRESET: AlphabetPreset = AlphabetPreset::Alphanumeric;

/// Host suffix -> the only symbols that service ever allocates
const HOST_RULES: &[(&str, AlphabetPreset)] = &[
    ("prnt.sc", AlphabetPreset::Lowernum),
    ("gyazo.com", AlphabetPreset::Hex),
    ("youtu.be", AlphabetPreset::Alphanumeric),
];

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const HEX_LETTERS: &str = "abcdef";

/// Symbols of a preset, in a stable order
///
/// The emoji preset is the full Unicode emoji table, so a symbol may span
/// several code points (ZWJ sequences, flags, keycaps).
pub fn preset_symbols(preset: AlphabetPreset) -> Vec<String> {
    let chars: Box<dyn Iterator<Item = char>> = match preset {
        AlphabetPreset::Lowercase => Box::new(LOWER.chars()),
        AlphabetPreset::Lowernum => Box::new(LOWER.chars().chain(DIGITS.chars())),
        AlphabetPreset::Alphanumeric => {
            Box::new(LOWER.chars().chain(UPPER.chars()).chain(DIGITS.chars()))
        }
        AlphabetPreset::Digits => Box::new(DIGITS.chars()),
        AlphabetPreset::Hex => Box::new(DIGITS.chars().chain(HEX_LETTERS.chars())),
        AlphabetPreset::Emoji => {
            return dedup(emojis::iter().map(|e| e.as_str().to_string()).collect())
        }
    };
    chars.map(String::from).collect()
}

/// Symbols described by a config alphabet, deduplicated in first-seen order
pub fn spec_symbols(spec: &AlphabetSpec) -> Vec<String> {
    let raw = match spec {
        AlphabetSpec::Preset(preset) => preset_symbols(*preset),
        AlphabetSpec::Custom { custom } => custom.chars().map(String::from).collect(),
        AlphabetSpec::Symbols { symbols } => symbols.clone(),
    };
    dedup(raw)
}

/// Static rule for a host, if any
pub fn host_rule(host: &str) -> Option<AlphabetPreset> {
    let host = host.to_lowercase();
    HOST_RULES
        .iter()
        .find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{}", suffix)))
        .map(|(_, preset)| *preset)
}

/// Effective alphabet for a domain: configured (or default) alphabet,
/// restricted by the host rule when one applies.
///
/// If the restriction leaves nothing, the rule's own alphabet is used.
pub fn resolve(domain: &DomainConfig) -> Vec<String> {
    let configured = domain
        .alphabet
        .as_ref()
        .map(spec_symbols)
        .unwrap_or_else(|| preset_symbols(DEFAULT_PRESET));

    let Some(rule) = host_rule(&domain.host()) else {
        return configured;
    };

    let allowed = preset_symbols(rule);
    let restricted: Vec<String> = configured
        .into_iter()
        .filter(|symbol| allowed.contains(symbol))
        .collect();

    if restricted.is_empty() {
        tracing::debug!(
            domain = %domain.name,
            rule = %rule,
            "Configured alphabet disjoint from host rule, using rule alphabet"
        );
        allowed
    } else {
        restricted
    }
}

fn dedup(symbols: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    symbols
        .into_iter()
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

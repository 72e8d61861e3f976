//! Learned per-position frequency tables

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::CharCategory;

/// Key of one frequency table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub domain: String,
    pub length: usize,
}

impl ModelKey {
    pub fn new(domain: impl Into<String>, length: usize) -> Self {
        Self {
            domain: domain.into(),
            length,
        }
    }
}

/// Per-category counters for one position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCounts {
    pub lower: u64,
    pub upper: u64,
    pub digit: u64,
    pub other: u64,
}

impl CategoryCounts {
    pub fn get(&self, category: CharCategory) -> u64 {
        match category {
            CharCategory::Lower => self.lower,
            CharCategory::Upper => self.upper,
            CharCategory::Digit => self.digit,
            CharCategory::Other => self.other,
        }
    }

    pub fn increment(&mut self, category: CharCategory) {
        let slot = match category {
            CharCategory::Lower => &mut self.lower,
            CharCategory::Upper => &mut self.upper,
            CharCategory::Digit => &mut self.digit,
            CharCategory::Other => &mut self.other,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        CharCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// Counters for one character position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStats {
    /// Exact symbol counts
    #[serde(default)]
    pub symbols: BTreeMap<String, u64>,
    #[serde(default)]
    pub categories: CategoryCounts,
}

impl PositionStats {
    pub fn count(&self, symbol: &str) -> u64 {
        self.symbols.get(symbol).copied().unwrap_or(0)
    }

    fn observe(&mut self, symbol: &str) {
        let count = self.symbols.entry(symbol.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.categories.increment(CharCategory::of(symbol));
    }

    fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.categories.total() == 0
    }
}

/// Frequency tables keyed by (domain, code length).
///
/// Only confirmed hits are recorded, so the tables describe what the target
/// service's allocator actually hands out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierModel {
    tables: HashMap<ModelKey, Vec<PositionStats>>,
}

impl IdentifierModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed code given as symbols
    pub fn record<S: AsRef<str>>(&mut self, domain: &str, symbols: &[S]) {
        if symbols.is_empty() {
            return;
        }

        let length = symbols.len();
        let table = self
            .tables
            .entry(ModelKey::new(domain, length))
            .or_insert_with(|| vec![PositionStats::default(); length]);

        for (position, symbol) in symbols.iter().enumerate() {
            table[position].observe(symbol.as_ref());
        }
    }

    /// Record a confirmed code made of single-char symbols
    pub fn record_code(&mut self, domain: &str, code: &str) {
        self.record(domain, &super::split_symbols(code));
    }

    /// Position table for (domain, length), if anything was ever recorded
    pub fn positions(&self, domain: &str, length: usize) -> Option<&[PositionStats]> {
        self.tables
            .get(&ModelKey::new(domain, length))
            .map(|table| table.as_slice())
    }

    pub fn position(&self, domain: &str, length: usize, position: usize) -> Option<&PositionStats> {
        self.positions(domain, length)?.get(position)
    }

    /// Number of hits recorded for (domain, length)
    pub fn observations(&self, domain: &str, length: usize) -> u64 {
        self.position(domain, length, 0)
            .map(|stats| stats.categories.total())
            .unwrap_or(0)
    }

    /// Install a table wholesale, e.g. from a persisted snapshot.
    ///
    /// Tables whose position count disagrees with `length` are rejected.
    pub fn insert_table(&mut self, key: ModelKey, positions: Vec<PositionStats>) -> bool {
        if key.length == 0 || positions.len() != key.length {
            return false;
        }
        self.tables.insert(key, positions);
        true
    }

    /// Drop tables for domains that are no longer configured and tables with no data
    pub fn retain_domains(&mut self, domains: &HashSet<&str>) {
        self.tables.retain(|key, table| {
            domains.contains(key.domain.as_str()) && table.iter().any(|p| !p.is_empty())
        });
    }

    /// Tables in a stable order
    pub fn tables(&self) -> Vec<(&ModelKey, &[PositionStats])> {
        let mut tables: Vec<_> = self
            .tables
            .iter()
            .map(|(key, table)| (key, table.as_slice()))
            .collect();
        tables.sort_by(|a, b| a.0.cmp(b.0));
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_positions() {
        let mut model = IdentifierModel::new();
        model.record_code("d1", "AABB");
        model.record_code("d1", "ABAB");

        let positions = model.positions("d1", 4).unwrap();
        assert_eq!(positions.len(), 4);
        assert_eq!(positions[0].symbols.len(), 1);
        assert_eq!(positions[0].count("A"), 2);
        assert_eq!(positions[1].count("A"), 1);
        assert_eq!(positions[1].count("B"), 1);
        assert_eq!(positions[0].categories.upper, 2);
        assert_eq!(model.observations("d1", 4), 2);
    }

    #[test]
    fn test_lengths_are_separate_tables() {
        let mut model = IdentifierModel::new();
        model.record_code("d1", "abc");
        model.record_code("d1", "abcd");
        assert_eq!(model.len(), 2);
        assert_eq!(model.positions("d1", 3).unwrap().len(), 3);
        assert!(model.positions("d1", 5).is_none());
        assert!(model.positions("d2", 3).is_none());
    }

    #[test]
    fn test_multi_char_symbols() {
        let mut model = IdentifierModel::new();
        model.record("emoji", &["😀", "🙃"]);
        let stats = model.position("emoji", 2, 1).unwrap();
        assert_eq!(stats.count("🙃"), 1);
        assert_eq!(stats.categories.other, 1);
    }

    #[test]
    fn test_insert_table_rejects_wrong_length() {
        let mut model = IdentifierModel::new();
        assert!(!model.insert_table(ModelKey::new("d", 3), vec![PositionStats::default(); 2]));
        assert!(model.insert_table(ModelKey::new("d", 2), vec![PositionStats::default(); 2]));
    }

    #[test]
    fn test_retain_domains() {
        let mut model = IdentifierModel::new();
        model.record_code("keep", "ab");
        model.record_code("drop", "ab");
        model.insert_table(ModelKey::new("keep", 5), vec![PositionStats::default(); 5]);

        let keep: HashSet<&str> = ["keep"].into_iter().collect();
        model.retain_domains(&keep);
        assert_eq!(model.len(), 1);
        assert!(model.positions("keep", 2).is_some());
    }
}

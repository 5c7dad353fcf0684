//! Ordered, identity-unique collection of error records
//!
//! A run accumulates every recorded failure here. Two records with the same
//! composite key both stay (the same field failing two rules); only adding
//! the very same record twice is a no-op.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::OnceLock;

use serde_json::{Map, Value};

use crate::errors::{ErrorCategory, ErrorCode, ErrorRecord, Severity};

#[derive(Debug, Clone, Default)]
pub struct ErrorCollection {
    records: Vec<ErrorRecord>,
    ids: HashSet<u64>,
    has_fatal: bool,
    key_index: OnceLock<HashMap<String, Vec<usize>>>,
}

/// Counts produced by [`ErrorCollection::summary`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub fatal_count: usize,
}

impl ErrorCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; returns false if this exact record is already present
    pub fn add(&mut self, record: ErrorRecord) -> bool {
        if !self.ids.insert(record.id()) {
            return false;
        }
        self.has_fatal |= record.is_fatal();
        self.records.push(record);
        self.key_index = OnceLock::new();
        true
    }

    /// Add every record from an iterator
    pub fn extend<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = ErrorRecord>,
    {
        for record in records {
            self.add(record);
        }
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.ids.clear();
        self.has_fatal = false;
        self.key_index = OnceLock::new();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.records.is_empty()
    }

    /// O(1); tracked on insertion
    pub fn has_fatal(&self) -> bool {
        self.has_fatal
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ErrorRecord> {
        self.records.iter()
    }

    /// Records in insertion order
    pub fn all(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn first(&self) -> Option<&ErrorRecord> {
        self.records.first()
    }

    fn index(&self) -> &HashMap<String, Vec<usize>> {
        self.key_index.get_or_init(|| {
            let mut index: HashMap<String, Vec<usize>> = HashMap::new();
            for (pos, record) in self.records.iter().enumerate() {
                index.entry(record.key().to_string()).or_default().push(pos);
            }
            index
        })
    }

    /// First record with the given composite key
    pub fn get(&self, key: &str) -> Option<&ErrorRecord> {
        self.index()
            .get(key)
            .and_then(|positions| positions.first())
            .map(|&pos| &self.records[pos])
    }

    /// Every record with the given composite key, in insertion order
    pub fn all_with_key(&self, key: &str) -> Vec<&ErrorRecord> {
        self.index()
            .get(key)
            .map(|positions| positions.iter().map(|&pos| &self.records[pos]).collect())
            .unwrap_or_default()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.index().contains_key(key)
    }

    /// Records whose field path equals `path` exactly
    pub fn at_path<S: AsRef<str>>(&self, path: &[S]) -> Vec<&ErrorRecord> {
        self.filter(|r| {
            r.path().len() == path.len()
                && r.path().iter().zip(path).all(|(a, b)| a == b.as_ref())
        })
    }

    pub fn with_symbol(&self, symbol: &str) -> Vec<&ErrorRecord> {
        self.filter(|r| r.symbol() == symbol)
    }

    pub fn by_category(&self, category: ErrorCategory) -> Vec<&ErrorRecord> {
        self.filter(|r| r.category() == category)
    }

    /// Records whose runtime path starts with `prefix`
    pub fn in_runtime_path<S: AsRef<str>>(&self, prefix: &[S]) -> Vec<&ErrorRecord> {
        self.filter(|r| {
            r.runtime_path().len() >= prefix.len()
                && r
                    .runtime_path()
                    .iter()
                    .zip(prefix)
                    .all(|(a, b)| a == b.as_ref())
        })
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<&ErrorRecord>
    where
        F: Fn(&ErrorRecord) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Group by joined field path (`root` for empty paths)
    pub fn group_by_path(&self) -> BTreeMap<String, Vec<&ErrorRecord>> {
        let mut groups: BTreeMap<String, Vec<&ErrorRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.path_label()).or_default().push(record);
        }
        groups
    }

    pub fn group_by_category(&self) -> BTreeMap<ErrorCategory, Vec<&ErrorRecord>> {
        let mut groups: BTreeMap<ErrorCategory, Vec<&ErrorRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.category()).or_default().push(record);
        }
        groups
    }

    pub fn group_by_severity(&self) -> BTreeMap<Severity, Vec<&ErrorRecord>> {
        let mut groups: BTreeMap<Severity, Vec<&ErrorRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.severity()).or_default().push(record);
        }
        groups
    }

    /// Numbered, multi-line rendering for terminals and logs
    ///
    /// ```
    /// use cmdflow_core::{ErrorCollection, ErrorRecord};
    ///
    /// let mut errors = ErrorCollection::new();
    /// errors.add(ErrorRecord::data("missing", "is required").with_path(["email"]));
    /// assert_eq!(errors.to_human_readable(), "1. email: is required");
    /// ```
    pub fn to_human_readable(&self) -> String {
        let mut out = String::new();
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "{}. {}: {}", i + 1, record.path_label(), record.message());
            if !record.context().is_empty() {
                let context = record
                    .context()
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(out, "\n   Context: {}", context);
            }
            if let Some(suggestion) = record.suggestion() {
                let _ = write!(out, "\n   Suggestion: {}", suggestion);
            }
        }
        out
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut summary = ErrorSummary {
            total: self.records.len(),
            ..ErrorSummary::default()
        };
        for record in &self.records {
            *summary.by_category.entry(record.category()).or_insert(0) += 1;
            *summary.by_severity.entry(record.severity()).or_insert(0) += 1;
            if record.is_fatal() {
                summary.fatal_count += 1;
            }
        }
        summary
    }

    /// JSON object keyed by composite key; repeated keys map to arrays
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for record in &self.records {
            let value = record.to_value();
            match map.get_mut(record.key()) {
                None => {
                    map.insert(record.key().to_string(), value);
                }
                Some(Value::Array(existing)) => existing.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }
        Value::Object(map)
    }
}

impl<'a> IntoIterator for &'a ErrorCollection {
    type Item = &'a ErrorRecord;
    type IntoIter = std::slice::Iter<'a, ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for ErrorCollection {
    type Item = ErrorRecord;
    type IntoIter = std::vec::IntoIter<ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl FromIterator<ErrorRecord> for ErrorCollection {
    fn from_iter<I: IntoIterator<Item = ErrorRecord>>(iter: I) -> Self {
        let mut collection = Self::new();
        collection.extend(iter);
        collection
    }
}

impl std::fmt::Display for ErrorCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_human_readable())
    }
}

impl ErrorCode for ErrorCollection {
    fn error_kind(&self) -> String {
        self.first()
            .map(|r| r.error_kind())
            .unwrap_or_else(|| "none".to_string())
    }

    fn error_code(&self) -> String {
        self.first()
            .map(|r| r.error_code())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_record_added_twice_is_kept_once() {
        let mut errors = ErrorCollection::new();
        let err = ErrorRecord::data("missing", "required");
        assert!(errors.add(err.clone()));
        assert!(!errors.add(err));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_equal_keys_both_kept() {
        let mut errors = ErrorCollection::new();
        errors.add(ErrorRecord::data("invalid", "too short").with_path(["name"]));
        errors.add(ErrorRecord::data("invalid", "bad chars").with_path(["name"]));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.all_with_key("data.name.invalid").len(), 2);
        assert_eq!(
            errors.get("data.name.invalid").map(|e| e.message()),
            Some("too short")
        );
    }

    #[test]
    fn test_index_invalidated_on_add() {
        let mut errors = ErrorCollection::new();
        errors.add(ErrorRecord::runtime("timeout", "slow"));
        assert!(!errors.has_key("data.root.missing"));
        errors.add(ErrorRecord::data("missing", "gone"));
        assert!(errors.has_key("data.root.missing"));
    }

    #[test]
    fn test_has_fatal_tracked_incrementally() {
        let mut errors = ErrorCollection::new();
        errors.add(ErrorRecord::data("x", "m"));
        assert!(!errors.has_fatal());
        errors.add(ErrorRecord::system("disk", "full"));
        assert!(errors.has_fatal());
        errors.clear();
        assert!(!errors.has_fatal());
        assert!(!errors.has_errors());
    }

    #[test]
    fn test_to_value_groups_duplicate_keys() {
        let mut errors = ErrorCollection::new();
        errors.add(ErrorRecord::data("invalid", "a"));
        errors.add(ErrorRecord::data("invalid", "b"));
        errors.add(ErrorRecord::runtime("timeout", "c"));
        let value = errors.to_value();
        assert_eq!(value["data.root.invalid"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["runtime.root.timeout"]["message"], "c");
    }

    #[test]
    fn test_error_code_of_empty_collection() {
        let errors = ErrorCollection::new();
        assert_eq!(errors.error_kind(), "none");
        assert_eq!(errors.error_code(), "");
    }
}

// ABOUTME: Scalar values and ordered rows moved between source and destination
// ABOUTME: A closed variant set so type inference and literal rendering are exhaustive

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

/// Format used when a whole-second timestamp is rendered as text or as a SQL literal.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Same, for timestamps carrying a fraction of a second (DATETIME(6) precision).
pub const TIMESTAMP_MICROS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// Format used when a date is rendered as text or as a SQL literal.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single column value.
///
/// `Symbol` carries enum-like short text (status codes, kinds, ...). It is
/// stored like `Text` but lazily-created tables give it a fixed-width column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Symbol(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, used for counts.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Text(s) | Value::Symbol(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) | Value::Symbol(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
        }
    }
}

/// Render a timestamp, keeping microseconds only when there are any.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.nanosecond() == 0 {
        ts.format(TIMESTAMP_FORMAT).to_string()
    } else {
        ts.format(TIMESTAMP_MICROS_FORMAT).to_string()
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered mapping from column name to value.
///
/// Column order is the order in which the store returned the columns (or
/// the order the caller inserted them), which keeps generated INSERT column
/// lists and lazily-created schemas deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Set a column, replacing an existing value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Builder-style [`Row::insert`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Drop every column not present in `known`.
    ///
    /// Returns the names of the dropped columns.
    pub fn retain_columns(&mut self, known: &[String]) -> Vec<String> {
        let mut dropped = Vec::new();
        self.fields.retain(|(name, _)| {
            let keep = known.iter().any(|k| k == name);
            if !keep {
                dropped.push(name.clone());
            }
            keep
        });
        dropped
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_order_and_replaces() {
        let mut row = Row::new();
        row.insert("id", 1);
        row.insert("name", "alice");
        row.insert("id", 2);

        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(row.get("id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_retain_columns_reports_dropped() {
        let mut row = Row::new()
            .with("id", 1)
            .with("extra", "x")
            .with("name", "bob");

        let dropped = row.retain_columns(&["id".to_string(), "name".to_string()]);

        assert_eq!(dropped, vec!["extra".to_string()]);
        assert!(!row.contains("extra"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_display_formats() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2024-03-01 12:30:05");
        let precise = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(12, 30, 5, 500_000)
            .unwrap();
        assert_eq!(
            Value::Timestamp(precise).to_string(),
            "2024-03-01 12:30:05.500000"
        );
        assert_eq!(
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).to_string(),
            "2024-03-01"
        );
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(Value::from(none), Value::Null);
        assert_eq!(Value::from(Some(5i64)), Value::Integer(5));
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::Text("42".into()).as_i64(), Some(42));
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::Null.as_i64(), None);
    }
}

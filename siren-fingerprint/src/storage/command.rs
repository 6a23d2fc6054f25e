//! Executable commands and their result cursors

use super::{QueryCollection, StorageError};

/// A single column value decoded from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl ColumnValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(v) => Some(*v),
            // Row stores keep unsigned ids in signed BIGINT columns
            ColumnValue::UInt(v) => Some(*v as i64),
            ColumnValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            ColumnValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ColumnValue::UInt(v) => Some(*v),
            ColumnValue::Int(v) => Some(*v as u64),
            ColumnValue::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
            ColumnValue::Text(s) => {
                let s = s.trim();
                s.parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<i64>().ok().map(|v| v as u64))
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float(v) => Some(*v),
            ColumnValue::Int(v) => Some(*v as f64),
            ColumnValue::UInt(v) => Some(*v as f64),
            ColumnValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(v) => Some(*v),
            ColumnValue::Int(v) => Some(*v != 0),
            ColumnValue::UInt(v) => Some(*v != 0),
            ColumnValue::Text(s) => match s.trim() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            ColumnValue::Null => None,
            ColumnValue::Bool(v) => Some(v.to_string()),
            ColumnValue::Int(v) => Some(v.to_string()),
            ColumnValue::UInt(v) => Some(v.to_string()),
            ColumnValue::Float(v) => Some(v.to_string()),
            ColumnValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&serde_json::Value> for ColumnValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ColumnValue::Null,
            serde_json::Value::Bool(b) => ColumnValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    ColumnValue::Int(v)
                } else if let Some(v) = n.as_u64() {
                    ColumnValue::UInt(v)
                } else {
                    ColumnValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => ColumnValue::Text(s.clone()),
            other => ColumnValue::Text(other.to_string()),
        }
    }
}

/// A query (or homogeneous batch) bound to a connection.
///
/// `execute` runs it; `fetch_next` then walks the result rows. The first
/// `fetch_next` positions the cursor on the first row.
pub trait Command: Send {
    fn queries(&self) -> &QueryCollection;

    fn is_batch(&self) -> bool {
        self.queries().is_batch()
    }

    fn execute(&mut self) -> Result<(), StorageError>;

    /// Advance to the next row. Returns false when no row remains.
    fn fetch_next(&mut self) -> bool;

    /// Number of result rows
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Value of `name` in the current row.
    fn column(&self, name: &str) -> Option<ColumnValue>;

    fn as_i32(&self, name: &str) -> Option<i32> {
        self.column(name)?
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
    }

    fn as_i64(&self, name: &str) -> Option<i64> {
        self.column(name)?.as_i64()
    }

    fn as_u64(&self, name: &str) -> Option<u64> {
        self.column(name)?.as_u64()
    }

    fn as_usize(&self, name: &str) -> Option<usize> {
        self.column(name)?
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
    }

    fn as_f64(&self, name: &str) -> Option<f64> {
        self.column(name)?.as_f64()
    }

    fn as_bool(&self, name: &str) -> Option<bool> {
        self.column(name)?.as_bool()
    }

    fn as_string(&self, name: &str) -> Option<String> {
        self.column(name)?.as_string()
    }
}

/// Result rows plus a forward-only cursor.
#[derive(Debug, Clone)]
pub struct RowBuffer<T> {
    rows: Vec<T>,
    cursor: Option<usize>,
}

impl<T> RowBuffer<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            cursor: None,
        }
    }

    pub fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = T>) {
        self.rows.extend(rows);
    }

    pub fn fetch_next(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.rows.len() {
            self.cursor = Some(next);
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<&T> {
        self.cursor.and_then(|c| self.rows.get(c))
    }

    /// Move the cursor back before the first row.
    pub fn rewind(&mut self) {
        self.cursor = None;
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<T> Default for RowBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_buffer_cursor() {
        let mut rows = RowBuffer::new();
        assert!(!rows.fetch_next());

        rows.extend([1, 2]);
        assert_eq!(rows.current(), None);
        assert!(rows.fetch_next());
        assert_eq!(rows.current(), Some(&1));
        assert!(rows.fetch_next());
        assert_eq!(rows.current(), Some(&2));
        assert!(!rows.fetch_next());
        assert_eq!(rows.current(), Some(&2));

        rows.rewind();
        assert!(rows.fetch_next());
        assert_eq!(rows.current(), Some(&1));
    }

    #[test]
    fn test_column_conversions() {
        assert_eq!(ColumnValue::Int(-1).as_u64(), Some(u64::MAX));
        assert_eq!(ColumnValue::UInt(u64::MAX).as_i64(), Some(-1));
        assert_eq!(ColumnValue::Text("42".into()).as_u64(), Some(42));
        assert_eq!(ColumnValue::Text("t".into()).as_bool(), Some(true));
        assert_eq!(ColumnValue::Float(2.5).as_i64(), None);
        assert_eq!(ColumnValue::Null.as_string(), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(ColumnValue::from(&json!(7)), ColumnValue::Int(7));
        assert_eq!(ColumnValue::from(&json!(u64::MAX)), ColumnValue::UInt(u64::MAX));
        assert_eq!(ColumnValue::from(&json!("abc")), ColumnValue::Text("abc".into()));
        assert_eq!(ColumnValue::from(&json!(true)), ColumnValue::Bool(true));
    }
}

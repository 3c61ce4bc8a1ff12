//! Row buffers.

use crate::value::{Value, ValueArray};

/// A single output or intermediate row: an ordered sequence of values sized
/// to `expressionCount` during execution, and trimmed to `distinctColumnCount`
/// (and ultimately `visibleColumnCount`) before it reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row(values)
    }

    pub fn with_len(len: usize) -> Self {
        Row(vec![Value::Null; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> &Value {
        &self.0[index]
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.0[index] = value;
    }

    /// Truncates the row to its first `count` columns, as done before a row
    /// is handed to DISTINCT deduplication or to the caller.
    pub fn truncate(&mut self, count: usize) {
        self.0.truncate(count);
    }

    /// Returns the row's values as a composite key, e.g. for DISTINCT
    /// deduplication over `distinctColumnCount` columns.
    pub fn as_key(&self) -> ValueArray {
        self.0.clone()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row(values)
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;
    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

//! Restart state attached to job and step executions.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{JobExecutionId, StepExecutionId};

/// Key/value snapshot used to resume a job or step where it left off.
///
/// Values are stored as JSON, so anything put into the context must be
/// serializable. The context tracks whether it changed since the last
/// [`ExecutionContext::clear_dirty_flag`] so callers can skip redundant writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, JsonValue>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, JsonValue>) -> Self {
        Self {
            entries,
            dirty: false,
        }
    }

    /// Serialize `value` and store it under `key`.
    pub fn put<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> DomainResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| DomainError::serialization(format!("context value: {e}")))?;
        self.put_value(key, value);
        Ok(())
    }

    pub fn put_value(&mut self, key: impl Into<String>, value: JsonValue) {
        let key = key.into();
        if self.entries.get(&key) != Some(&value) {
            self.dirty = true;
            self.entries.insert(key, value);
        }
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put_value(key, JsonValue::String(value.into()));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put_value(key, JsonValue::from(value));
    }

    /// Deserialize the value under `key`, `Ok(None)` when absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> DomainResult<Option<T>> {
        match self.entries.get(key) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| DomainError::serialization(format!("context key '{key}': {e}"))),
            None => Ok(None),
        }
    }

    pub fn get_value(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(JsonValue::as_str)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(JsonValue::as_i64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &BTreeMap<String, JsonValue> {
        &self.entries
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty_flag(&mut self) {
        self.dirty = false;
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

/// Kind of entity a context belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Job,
    Step,
}

/// Owner of a stored context: a job execution or a step execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContextOwner {
    Job(JobExecutionId),
    Step(StepExecutionId),
}

impl ContextOwner {
    pub fn kind(&self) -> OwnerKind {
        match self {
            ContextOwner::Job(_) => OwnerKind::Job,
            ContextOwner::Step(_) => OwnerKind::Step,
        }
    }

    pub fn raw_id(&self) -> u64 {
        match self {
            ContextOwner::Job(id) => id.get(),
            ContextOwner::Step(id) => id.get(),
        }
    }
}

impl core::fmt::Display for ContextOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ContextOwner::Job(id) => write!(f, "job:{id}"),
            ContextOwner::Step(id) => write!(f, "step:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        file: String,
        line: u64,
    }

    #[test]
    fn typed_values_round_trip_through_json() {
        let mut ctx = ExecutionContext::new();
        ctx.put("cursor", &Cursor { file: "a.csv".into(), line: 12 }).unwrap();

        let cursor: Option<Cursor> = ctx.get("cursor").unwrap();
        assert_eq!(cursor, Some(Cursor { file: "a.csv".into(), line: 12 }));
        assert_eq!(ctx.get::<Cursor>("absent").unwrap(), None);
    }

    #[test]
    fn type_mismatch_is_a_serialization_error() {
        let mut ctx = ExecutionContext::new();
        ctx.put_string("cursor", "not a cursor");
        assert!(matches!(ctx.get::<Cursor>("cursor"), Err(DomainError::Serialization(_))));
    }

    #[test]
    fn dirty_flag_tracks_changes_only() {
        let mut ctx = ExecutionContext::new();
        assert!(!ctx.is_dirty());

        ctx.put_long("count", 1);
        assert!(ctx.is_dirty());
        ctx.clear_dirty_flag();

        ctx.put_long("count", 1);
        assert!(!ctx.is_dirty(), "same value must not mark the context dirty");

        ctx.remove("count");
        assert!(ctx.is_dirty());
    }

    #[test]
    fn owner_display_and_kind() {
        let owner = ContextOwner::Step(StepExecutionId::new(3));
        assert_eq!(owner.kind(), OwnerKind::Step);
        assert_eq!(owner.raw_id(), 3);
        assert_eq!(owner.to_string(), "step:3");
    }
}

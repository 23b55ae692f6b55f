//! Field diff tracking.
//!
//! Every entity keeps its "current" field values (authoritative snapshot plus
//! unsaved local edits) next to the last values known to be persisted. A save
//! only sends the minimal changed-field set computed here.

use serde_json::Value;
use std::collections::BTreeSet;

use super::FieldMap;

/// Current versus persisted field values for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldTracker {
    /// Values as the user currently sees them
    current: FieldMap,

    /// Values last confirmed by the remote store
    persisted: FieldMap,

    /// Fields set locally and not yet echoed back by the remote store
    dirty: BTreeSet<String>,
}

impl FieldTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.current.get(field)
    }

    /// All current values.
    pub fn current(&self) -> &FieldMap {
        &self.current
    }

    /// Set a field locally and mark it dirty.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        self.current.insert(field.clone(), value);
        self.dirty.insert(field);
    }

    /// Check if a field was set locally and not yet confirmed.
    pub fn is_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    /// Compute the fields to send on save.
    ///
    /// For an unpersisted entity every current field is part of the diff;
    /// otherwise only dirty fields whose value differs from the persisted one.
    pub fn diff(&self, persisted: bool) -> FieldMap {
        if !persisted {
            return self.current.clone();
        }

        self.dirty
            .iter()
            .filter_map(|field| {
                let current = self.current.get(field)?;
                if self.persisted.get(field) == Some(current) {
                    None
                } else {
                    Some((field.clone(), current.clone()))
                }
            })
            .collect()
    }

    /// Fold an authoritative payload into the tracker.
    ///
    /// Payload values overwrite both current and persisted values and clear
    /// their dirty flags. Fields the payload does not carry keep their local
    /// edits and stay in the diff.
    pub fn commit(&mut self, payload: &FieldMap) {
        for (field, value) in payload {
            self.current.insert(field.clone(), value.clone());
            self.persisted.insert(field.clone(), value.clone());
            self.dirty.remove(field);
        }
    }

    /// Record `sent` as stored remotely.
    ///
    /// Fields already settled by a payload commit are skipped. A field edited
    /// again after it was sent keeps its dirty flag, so the newer value goes
    /// out with the next save.
    pub fn confirm(&mut self, sent: &FieldMap) {
        for (field, value) in sent {
            if !self.dirty.contains(field) {
                continue;
            }
            self.persisted.insert(field.clone(), value.clone());
            if self.current.get(field) == Some(value) {
                self.dirty.remove(field);
            }
        }
    }
}

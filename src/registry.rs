//! Identity registry.
//!
//! The registry guarantees at most one live [`Entity`] per `(kind, id)`.
//! Every raw record that enters the mirror, whether a top-level response or a
//! related record nested inside one, is turned into an entity here, so two
//! payloads naming the same record always yield the same handle.
//!
//! Backlog kinds (product, project, iteration) share one identifier space.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::entity::{ApplyMode, Entity, EntityRef};
use crate::models::{EntityId, EntityKind};
use crate::{Error, Result};

/// Resolves raw records to canonical entity handles.
pub trait Registry: Send + Sync {
    /// Return the canonical entity for the record, creating it if needed, and
    /// merge the record's data into it.
    fn resolve_or_create(&self, kind: EntityKind, record: &Value) -> Result<EntityRef>;

    /// Look up an already-known entity without creating one.
    fn get_existing(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRef>;

    /// Register an entity that just received its identifier.
    ///
    /// Fails with `DuplicateIdentity` if a different entity already holds it.
    fn register(&self, entity: &EntityRef) -> Result<()>;

    /// Forget `entity` if it is the one registered under its identifier.
    ///
    /// Returns false if it was not registered.
    fn unregister(&self, entity: &EntityRef) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    namespace: &'static str,
    id: EntityId,
}

impl RegistryKey {
    fn new(kind: EntityKind, id: EntityId) -> Self {
        let namespace = if kind.is_backlog() {
            "backlog"
        } else {
            kind.as_str()
        };
        Self { namespace, id }
    }
}

/// Process-local registry backed by a hash map.
#[derive(Default)]
pub struct InMemoryRegistry {
    entities: RwLock<HashMap<RegistryKey, EntityRef>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known entities.
    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All known entities of one kind, sorted by identifier.
    pub fn entities_of(&self, kind: EntityKind) -> Vec<EntityRef> {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<EntityRef> = entities
            .values()
            .filter(|entity| entity.kind() == kind)
            .cloned()
            .collect();
        matching.sort_by_key(|entity| entity.id());
        matching
    }

    /// Return the handle for `(kind, id)`, inserting a fresh entity if absent.
    fn get_or_insert(&self, kind: EntityKind, id: EntityId) -> EntityRef {
        let key = RegistryKey::new(kind, id.clone());
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        entities
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!("registering {} {}", kind, id);
                Entity::with_id(kind, id)
            })
            .clone()
    }
}

impl Registry for InMemoryRegistry {
    fn resolve_or_create(&self, kind: EntityKind, record: &Value) -> Result<EntityRef> {
        let id = record
            .get("id")
            .and_then(EntityId::from_value)
            .ok_or_else(|| Error::InvalidRecord(format!("{} record without an id", kind)))?;

        let entity = self.get_or_insert(kind, id);
        // The map lock is released before nested records are resolved.
        entity.set_data(record, self, ApplyMode::Merge)?;
        Ok(entity)
    }

    fn get_existing(&self, kind: EntityKind, id: &EntityId) -> Option<EntityRef> {
        let key = RegistryKey::new(kind, id.clone());
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    fn register(&self, entity: &EntityRef) -> Result<()> {
        let id = entity.id().ok_or_else(|| {
            Error::NotPersisted(format!("cannot register {} without an id", entity.kind()))
        })?;
        let key = RegistryKey::new(entity.kind(), id.clone());
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        match entities.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, entity) => Ok(()),
            Some(_) => Err(Error::DuplicateIdentity(format!("{} {}", entity.kind(), id))),
            None => {
                entities.insert(key, entity.clone());
                Ok(())
            }
        }
    }

    fn unregister(&self, entity: &EntityRef) -> bool {
        let Some(id) = entity.id() else {
            return false;
        };
        let key = RegistryKey::new(entity.kind(), id);
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        match entities.get(&key) {
            Some(existing) if Arc::ptr_eq(existing, entity) => {
                entities.remove(&key);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelationSlot;
    use serde_json::json;

    #[test]
    fn test_same_record_same_handle() {
        let registry = InMemoryRegistry::new();
        let a = registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 42, "name": "A"}))
            .unwrap();
        let b = registry
            .resolve_or_create(EntityKind::Story, &json!({"id": "42", "name": "B"}))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.get("name"), Some(json!("B")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_record_without_id_is_rejected() {
        let registry = InMemoryRegistry::new();
        let result = registry.resolve_or_create(EntityKind::Task, &json!({"name": "orphan"}));
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_backlog_kinds_share_namespace() {
        let registry = InMemoryRegistry::new();
        let project = registry
            .resolve_or_create(EntityKind::Project, &json!({"id": 9}))
            .unwrap();
        let found = registry
            .get_existing(EntityKind::Iteration, &EntityId::new("9"))
            .unwrap();
        assert!(Arc::ptr_eq(&project, &found));
        assert_eq!(found.kind(), EntityKind::Project);
    }

    #[test]
    fn test_nested_records_are_deduplicated() {
        let registry = InMemoryRegistry::new();
        let story = registry
            .resolve_or_create(
                EntityKind::Story,
                &json!({
                    "id": 1,
                    "responsibles": [{"id": 7}],
                    "tasks": [{"id": 3, "responsibles": [{"id": 7}]}]
                }),
            )
            .unwrap();

        let user = &story.related(RelationSlot::User)[0];
        let task = &story.related(RelationSlot::Task)[0];
        assert!(Arc::ptr_eq(user, &task.related(RelationSlot::User)[0]));
    }

    #[test]
    fn test_register_new_identity() {
        let registry = InMemoryRegistry::new();
        let story = Entity::new(EntityKind::Story);
        story.assign_id(EntityId::new("100"));

        registry.register(&story).unwrap();
        registry.register(&story).unwrap();
        let found = registry
            .get_existing(EntityKind::Story, &EntityId::new("100"))
            .unwrap();
        assert!(Arc::ptr_eq(&story, &found));
    }

    #[test]
    fn test_register_conflict() {
        let registry = InMemoryRegistry::new();
        registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 100}))
            .unwrap();
        let other = Entity::with_id(EntityKind::Story, EntityId::new("100"));

        assert!(matches!(
            registry.register(&other),
            Err(Error::DuplicateIdentity(_))
        ));
    }

    #[test]
    fn test_unregister_only_removes_same_handle() {
        let registry = InMemoryRegistry::new();
        let story = registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 100}))
            .unwrap();
        let impostor = Entity::with_id(EntityKind::Story, EntityId::new("100"));

        assert!(!registry.unregister(&impostor));
        assert!(registry.unregister(&story));
        assert!(registry.get_existing(EntityKind::Story, &EntityId::new("100")).is_none());
        assert!(!registry.unregister(&story));
    }

    #[test]
    fn test_register_requires_id() {
        let registry = InMemoryRegistry::new();
        let story = Entity::new(EntityKind::Story);
        assert!(matches!(
            registry.register(&story),
            Err(Error::NotPersisted(_))
        ));
    }

    #[test]
    fn test_entities_of_kind() {
        let registry = InMemoryRegistry::new();
        registry
            .resolve_or_create(EntityKind::Story, &json!({"id": "b", "tasks": [{"id": 1}]}))
            .unwrap();
        registry
            .resolve_or_create(EntityKind::Story, &json!({"id": "a"}))
            .unwrap();

        let stories = registry.entities_of(EntityKind::Story);
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].id(), Some(EntityId::new("a")));
        assert_eq!(registry.entities_of(EntityKind::Task).len(), 1);
    }
}

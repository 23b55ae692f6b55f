//! The local mirror of one remote record.
//!
//! An [`Entity`] composes a field diff tracker, typed relation slots,
//! read-only metrics, a listener set and a request clock. Entities are shared
//! through [`EntityRef`] handles; identity (`Arc::ptr_eq`) is what relation
//! slots compare, and the [`Registry`] guarantees one handle per remote record.
//!
//! Interior state sits behind a lock that is never held across a remote call
//! or while listeners run.

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::events::{Event, ListenerId, Listeners, NotifyReport};
use crate::models::{
    Container, EntityId, EntityKind, FieldMap, FieldTracker, Metrics, RelationSlot, Relations,
};
use crate::registry::Registry;
use crate::{Error, Result};

/// Shared handle to an entity.
pub type EntityRef = Arc<Entity>;

/// Payload keys holding related record lists, with the kind of their elements.
const RELATION_LISTS: &[(&str, EntityKind)] = &[
    ("tasks", EntityKind::Task),
    ("responsibles", EntityKind::User),
    ("children", EntityKind::Story),
    ("labels", EntityKind::Label),
    ("hourEntries", EntityKind::StoryHourEntry),
];

/// How an authoritative record is folded into an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Only relations present in the record are touched.
    Merge,
    /// Container and parent are reset before the record is applied, so a
    /// record without them leaves the entity without them.
    Replace,
    /// Like `Merge`, but the container is reset first. The parent is kept.
    Relocate,
}

/// Monotonic ticket handed out when a request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct RequestClock {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RequestClock {
    fn issue(&self) -> RequestTicket {
        RequestTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Record a response as applied unless a newer one already was.
    fn accept(&self, ticket: RequestTicket) -> bool {
        let previous = self.applied.fetch_max(ticket.0, Ordering::SeqCst);
        previous < ticket.0
    }
}

#[derive(Debug, Default)]
struct EntityState {
    id: Option<EntityId>,
    fields: FieldTracker,
    relations: Relations,
    metrics: Metrics,
    /// Staged responsible users, flushed with the next save
    responsibles: Option<Vec<EntityRef>>,
}

/// Local mirror of one server-side record.
pub struct Entity {
    kind: EntityKind,
    state: RwLock<EntityState>,
    listeners: Listeners,
    clock: RequestClock,
}

impl Entity {
    /// Create an unpersisted placeholder (for "create new" flows).
    pub fn new(kind: EntityKind) -> EntityRef {
        Arc::new(Self {
            kind,
            state: RwLock::new(EntityState::default()),
            listeners: Listeners::new(),
            clock: RequestClock::default(),
        })
    }

    /// Create an entity that already has a remote identifier.
    pub fn with_id(kind: EntityKind, id: EntityId) -> EntityRef {
        let entity = Self::new(kind);
        entity.write().id = Some(id);
        entity
    }

    fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Remote identifier, `None` until first successful creation.
    pub fn id(&self) -> Option<EntityId> {
        self.read().id.clone()
    }

    pub fn is_persisted(&self) -> bool {
        self.read().id.is_some()
    }

    /// Short human description used in feedback messages.
    pub fn describe(&self) -> String {
        let state = self.read();
        let name = state
            .fields
            .get("name")
            .and_then(Value::as_str)
            .map(|n| format!(" \"{}\"", n))
            .unwrap_or_default();
        match &state.id {
            Some(id) => format!("{} {}{}", self.kind, id, name),
            None => format!("new {}{}", self.kind, name),
        }
    }

    // ---------------------------------------------------------------------
    // Fields
    // ---------------------------------------------------------------------

    /// Current value of a field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.read().fields.get(field).cloned()
    }

    /// Set a field locally, marking it dirty.
    pub fn set(&self, field: &str, value: impl Into<Value>) {
        self.write().fields.set(field, value.into());
    }

    pub fn is_dirty(&self, field: &str) -> bool {
        self.read().fields.is_dirty(field)
    }

    /// Snapshot of all current field values.
    pub fn current_data(&self) -> FieldMap {
        self.read().fields.current().clone()
    }

    /// Fields to send on the next save.
    pub fn diff(&self) -> FieldMap {
        let state = self.read();
        state.fields.diff(state.id.is_some())
    }

    /// Fold an authoritative field payload into the tracker.
    pub fn commit(&self, payload: &FieldMap) {
        self.write().fields.commit(payload);
    }

    /// Mark fields sent in a successful save as persisted.
    pub(crate) fn confirm_saved(&self, sent: &FieldMap) {
        self.write().fields.confirm(sent);
    }

    /// True if a save would send anything.
    pub fn has_pending_changes(&self) -> bool {
        let state = self.read();
        state.responsibles.is_some() || !state.fields.diff(state.id.is_some()).is_empty()
    }

    pub fn metrics(&self) -> Metrics {
        self.read().metrics.clone()
    }

    /// Replace metrics wholesale.
    pub fn set_metrics(&self, metrics: Metrics) {
        self.write().metrics = metrics;
    }

    // ---------------------------------------------------------------------
    // Responsibles (composite field)
    // ---------------------------------------------------------------------

    /// Stage a new responsible-user list for the next save.
    pub fn stage_responsibles(&self, users: Vec<EntityRef>) {
        self.write().responsibles = Some(users);
    }

    pub fn staged_responsibles(&self) -> Option<Vec<EntityRef>> {
        self.read().responsibles.clone()
    }

    /// Identifiers of the staged users, as sent with the next save.
    pub fn staged_responsible_ids(&self) -> Option<Vec<EntityId>> {
        self.read()
            .responsibles
            .as_ref()
            .map(|users| users.iter().filter_map(|user| user.id()).collect())
    }

    pub(crate) fn clear_staged_responsibles(&self) {
        self.write().responsibles = None;
    }

    // ---------------------------------------------------------------------
    // Relations
    // ---------------------------------------------------------------------

    /// Snapshot of all relation slots.
    pub fn relations(&self) -> Relations {
        self.read().relations.clone()
    }

    pub fn container(&self) -> Container {
        self.read().relations.container().clone()
    }

    /// The logical container, whether it is a backlog or a project.
    pub fn container_entity(&self) -> Option<EntityRef> {
        self.read().relations.container().entity().cloned()
    }

    /// The project grouping above this entity, if any.
    ///
    /// For a leaf story that is its project container; for a story in an
    /// iteration it is the project that iteration belongs to.
    pub fn grouping(&self) -> Option<EntityRef> {
        match self.container() {
            Container::Project(project) => Some(project),
            Container::Backlog(backlog) => backlog.relations().project().cloned(),
            Container::None => None,
        }
    }

    pub fn parent(&self) -> Option<EntityRef> {
        self.read().relations.parent().cloned()
    }

    pub fn set_parent(&self, parent: Option<EntityRef>) {
        self.write().relations.set_parent(parent);
    }

    /// Entities held by one relation slot, in order.
    pub fn related(&self, slot: RelationSlot) -> Vec<EntityRef> {
        self.read().relations.collection(slot)
    }

    pub fn has_relation(&self, slot: RelationSlot, target: &EntityRef) -> bool {
        self.read().relations.contains(slot, target)
    }

    /// Fold a related entity into the slot configured for its kind.
    pub fn add_relation(&self, target: &EntityRef) -> bool {
        self.write().relations.add(target.clone())
    }

    /// Remove a related entity (identity comparison).
    pub fn remove_relation(&self, target: &EntityRef) -> bool {
        self.write().relations.remove(target)
    }

    pub fn set_container(&self, container: Container) {
        self.write().relations.set_container(container);
    }

    /// Replace the collection slot for `kind` from raw server records,
    /// resolving every element through the registry.
    pub fn update_relations(
        &self,
        kind: EntityKind,
        records: &[Value],
        registry: &dyn Registry,
    ) -> Result<()> {
        let resolved = resolve_all(kind, records, registry)?;
        self.write().relations.replace(kind.relation_slot(), resolved);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Record application
    // ---------------------------------------------------------------------

    /// Apply an authoritative record: identifier, copied fields, relations
    /// present in the record and metrics.
    ///
    /// Related records are resolved through the registry before this
    /// entity's lock is taken.
    pub fn set_data(&self, record: &Value, registry: &dyn Registry, mode: ApplyMode) -> Result<()> {
        let obj = record.as_object().ok_or_else(|| {
            Error::InvalidRecord(format!("{} record is not an object", self.kind))
        })?;

        let id = obj.get("id").and_then(EntityId::from_value);

        let mut collections = Vec::new();
        for (key, kind) in RELATION_LISTS {
            if let Some(value) = obj.get(*key) {
                if value.is_null() {
                    continue;
                }
                let list = value.as_array().ok_or_else(|| {
                    Error::InvalidRecord(format!("'{}' is not a list", key))
                })?;
                collections.push((kind.relation_slot(), resolve_all(*kind, list, registry)?));
            }
        }

        let parent = match obj.get("parent") {
            Some(raw) if !raw.is_null() => {
                Some(registry.resolve_or_create(EntityKind::Story, raw)?)
            }
            _ => None,
        };

        let container = match obj.get("backlog") {
            Some(raw) if !raw.is_null() => {
                let kind = container_kind(raw, registry)?;
                let entity = registry.resolve_or_create(kind, raw)?;
                Some(Container::from_entity(entity).ok_or_else(|| {
                    Error::InvalidRecord(format!("{} cannot contain stories", kind))
                })?)
            }
            _ => None,
        };

        let copied: FieldMap = self
            .kind
            .copied_fields()
            .iter()
            .filter_map(|field| obj.get(*field).map(|v| (field.to_string(), v.clone())))
            .collect();

        let metrics = obj.get("metrics").map(Metrics::from_value);

        let mut state = self.write();
        if let Some(id) = id {
            state.id = Some(id);
        }
        match mode {
            ApplyMode::Merge => {}
            ApplyMode::Replace => {
                state.relations.clear_container();
                state.relations.set_parent(None);
            }
            ApplyMode::Relocate => state.relations.clear_container(),
        }
        for (slot, items) in collections {
            state.relations.replace(slot, items);
        }
        if let Some(parent) = parent {
            state.relations.set_parent(Some(parent));
        }
        if let Some(container) = container {
            state.relations.set_container(container);
        }
        state.fields.commit(&copied);
        if let Some(metrics) = metrics {
            state.metrics = metrics;
        }
        Ok(())
    }

    pub(crate) fn assign_id(&self, id: EntityId) {
        self.write().id = Some(id);
    }

    /// Drop an identifier assigned by a creation that could not complete.
    pub(crate) fn forget_id(&self) {
        self.write().id = None;
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver an event to this entity's listeners.
    pub fn notify(&self, event: &Event) -> NotifyReport {
        self.listeners.notify(event)
    }

    // ---------------------------------------------------------------------
    // Request ordering
    // ---------------------------------------------------------------------

    /// Issue a ticket for a request about to be sent.
    pub fn issue_ticket(&self) -> RequestTicket {
        self.clock.issue()
    }

    /// Returns false if a response to a newer request was already applied.
    pub fn accept_response(&self, ticket: RequestTicket) -> bool {
        self.clock.accept(ticket)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_read() {
            Ok(state) => match &state.id {
                Some(id) => write!(f, "{}#{}", self.kind, id),
                None => write!(f, "{}#new", self.kind),
            },
            Err(_) => write!(f, "{}#?", self.kind),
        }
    }
}

fn resolve_all(kind: EntityKind, records: &[Value], registry: &dyn Registry) -> Result<Vec<EntityRef>> {
    records
        .iter()
        .map(|raw| registry.resolve_or_create(kind, raw))
        .collect()
}

/// Determine which backlog kind a raw container record describes.
///
/// An explicit `type` wins; otherwise an already-known backlog with that id
/// keeps its kind; unknown containers default to iterations.
fn container_kind(raw: &Value, registry: &dyn Registry) -> Result<EntityKind> {
    if let Some(kind) = raw.get("type").and_then(Value::as_str) {
        let kind: EntityKind = kind.parse().map_err(Error::InvalidRecord)?;
        if !kind.is_backlog() {
            return Err(Error::InvalidRecord(format!("{} cannot contain stories", kind)));
        }
        return Ok(kind);
    }
    let existing = raw
        .get("id")
        .and_then(EntityId::from_value)
        .and_then(|id| registry.get_existing(EntityKind::Iteration, &id));
    Ok(existing.map(|e| e.kind()).unwrap_or(EntityKind::Iteration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use serde_json::json;

    #[test]
    fn test_new_entity_is_unpersisted() {
        let story = Entity::new(EntityKind::Story);
        assert!(!story.is_persisted());
        assert_eq!(story.id(), None);
        assert_eq!(format!("{:?}", story), "story#new");
    }

    #[test]
    fn test_unpersisted_diff_contains_everything() {
        let story = Entity::new(EntityKind::Story);
        story.set("name", "Login flow");
        story.set("storyPoints", 3);

        assert_eq!(story.diff().len(), 2);
        assert!(story.has_pending_changes());
    }

    #[test]
    fn test_set_data_copies_declared_fields_only() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("42"));
        story
            .set_data(
                &json!({"id": 42, "name": "Login flow", "storyPoints": 3, "secret": "x"}),
                &registry,
                ApplyMode::Merge,
            )
            .unwrap();

        assert_eq!(story.get("name"), Some(json!("Login flow")));
        assert_eq!(story.get("secret"), None);
        assert!(story.diff().is_empty());
    }

    #[test]
    fn test_set_data_populates_relations_through_registry() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("42"));
        story
            .set_data(
                &json!({
                    "id": 42,
                    "tasks": [{"id": 1, "name": "Design"}, {"id": 2, "name": "Build"}],
                    "responsibles": [{"id": 7, "fullName": "Ada"}],
                    "backlog": {"id": 5, "type": "iteration", "name": "Sprint 5"},
                    "metrics": {"effortLeft": 90}
                }),
                &registry,
                ApplyMode::Merge,
            )
            .unwrap();

        assert_eq!(story.related(RelationSlot::Task).len(), 2);
        assert_eq!(story.related(RelationSlot::User).len(), 1);
        let backlog = story.container_entity().unwrap();
        assert_eq!(backlog.kind(), EntityKind::Iteration);
        assert!(Arc::ptr_eq(
            &backlog,
            &registry.get_existing(EntityKind::Iteration, &EntityId::new("5")).unwrap()
        ));
        assert_eq!(story.metrics().effort_left(), Some(90));
    }

    #[test]
    fn test_set_data_project_container() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        story
            .set_data(
                &json!({"id": 1, "backlog": {"id": 9, "type": "project"}}),
                &registry,
                ApplyMode::Merge,
            )
            .unwrap();

        assert!(story.container().is_project());
        assert!(story.relations().backlog().is_none());
    }

    #[test]
    fn test_set_data_rejects_non_backlog_container() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        let result = story.set_data(
            &json!({"id": 1, "backlog": {"id": 9, "type": "task"}}),
            &registry,
            ApplyMode::Merge,
        );
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn test_replace_mode_clears_container_and_parent() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        story
            .set_data(
                &json!({"id": 1, "parent": {"id": 2}, "backlog": {"id": 3, "type": "iteration"}}),
                &registry,
                ApplyMode::Merge,
            )
            .unwrap();
        assert!(story.parent().is_some());

        story
            .set_data(&json!({"id": 1, "name": "Orphan"}), &registry, ApplyMode::Replace)
            .unwrap();
        assert!(story.parent().is_none());
        assert!(story.container().is_none());
    }

    #[test]
    fn test_merge_mode_keeps_absent_relations() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        story
            .set_data(
                &json!({"id": 1, "labels": [{"id": 4, "name": "ux"}]}),
                &registry,
                ApplyMode::Merge,
            )
            .unwrap();
        story
            .set_data(&json!({"id": 1, "name": "Renamed"}), &registry, ApplyMode::Merge)
            .unwrap();

        assert_eq!(story.related(RelationSlot::Label).len(), 1);
    }

    #[test]
    fn test_relocate_mode_resets_container_but_keeps_parent() {
        let registry = InMemoryRegistry::new();
        let story = registry
            .resolve_or_create(
                EntityKind::Story,
                &json!({"id": 1, "backlog": {"id": 5}, "parent": {"id": 40}}),
            )
            .unwrap();

        story
            .set_data(&json!({"id": 1, "name": "Moved"}), &registry, ApplyMode::Relocate)
            .unwrap();

        assert!(story.container().is_none());
        assert_eq!(story.parent().unwrap().id(), Some(EntityId::new("40")));
    }

    #[test]
    fn test_failed_set_data_leaves_entity_untouched() {
        let registry = InMemoryRegistry::new();
        let story = registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 1, "name": "Login", "backlog": {"id": 5}}))
            .unwrap();

        let result = story.set_data(
            &json!({"id": 1, "name": "Changed", "backlog": {"id": "T", "type": "task"}}),
            &registry,
            ApplyMode::Relocate,
        );

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert_eq!(story.container_entity().unwrap().id(), Some(EntityId::new("5")));
        assert_eq!(story.get("name"), Some(json!("Login")));
    }

    #[test]
    fn test_update_relations_replaces_slot_wholesale() {
        let registry = InMemoryRegistry::new();
        let backlog = Entity::with_id(EntityKind::Iteration, EntityId::new("5"));
        backlog
            .update_relations(EntityKind::Story, &[json!({"id": 1}), json!({"id": 2})], &registry)
            .unwrap();

        backlog
            .update_relations(
                EntityKind::Story,
                &[json!({"id": 2}), json!({"id": 3}), json!({"id": 2})],
                &registry,
            )
            .unwrap();

        let ids: Vec<_> = backlog
            .related(RelationSlot::Story)
            .iter()
            .filter_map(|s| s.id())
            .collect();
        assert_eq!(ids, vec![EntityId::new("2"), EntityId::new("3")]);
        assert!(Arc::ptr_eq(
            &backlog.related(RelationSlot::Story)[0],
            &registry.get_existing(EntityKind::Story, &EntityId::new("2")).unwrap()
        ));
    }

    #[test]
    fn test_update_relations_rejects_record_without_id() {
        let registry = InMemoryRegistry::new();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        story
            .update_relations(EntityKind::Task, &[json!({"id": 10})], &registry)
            .unwrap();

        let result = story.update_relations(EntityKind::Task, &[json!({"name": "?"})], &registry);

        assert!(result.is_err());
        assert_eq!(story.related(RelationSlot::Task).len(), 1);
    }

    #[test]
    fn test_nested_reference_keeps_unsaved_edit() {
        let registry = InMemoryRegistry::new();
        let child = registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 5, "storyPoints": 3}))
            .unwrap();
        child.set("storyPoints", 8);

        registry
            .resolve_or_create(EntityKind::Story, &json!({"id": 1, "children": [{"id": 5}]}))
            .unwrap();

        assert_eq!(child.diff().get("storyPoints"), Some(&json!(8)));
        assert!(child.has_pending_changes());
    }

    #[test]
    fn test_grouping_through_iteration() {
        let registry = InMemoryRegistry::new();
        let iteration = registry
            .resolve_or_create(
                EntityKind::Iteration,
                &json!({"id": 5, "backlog": {"id": 9, "type": "project"}}),
            )
            .unwrap();
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        story.add_relation(&iteration);

        let grouping = story.grouping().unwrap();
        assert_eq!(grouping.kind(), EntityKind::Project);
        assert_eq!(grouping.id(), Some(EntityId::new("9")));
    }

    #[test]
    fn test_request_clock_rejects_older_tickets() {
        let story = Entity::with_id(EntityKind::Story, EntityId::new("1"));
        let first = story.issue_ticket();
        let second = story.issue_ticket();

        assert!(second > first);
        assert!(story.accept_response(second));
        assert!(!story.accept_response(first));
    }

    #[test]
    fn test_describe() {
        let story = Entity::with_id(EntityKind::Story, EntityId::new("42"));
        story.set("name", "Login flow");
        assert_eq!(story.describe(), "story 42 \"Login flow\"");
        assert_eq!(Entity::new(EntityKind::Task).describe(), "new task");
    }
}

//! Typed story facade.
//!
//! [`Story`] wraps a story [`EntityRef`] and exposes the per-field getter and
//! setter pairs, relation getters and metric getters that views bind to.
//! Setters only touch local state; nothing is sent until the entity is saved.

use serde_json::Value;
use std::ops::Deref;

use crate::entity::{Entity, EntityRef};
use crate::events::{Event, NotifyReport};
use crate::models::{Container, EntityId, EntityKind, Metrics, RelationSlot, StoryState};
use crate::registry::Registry;
use crate::{Error, Result};

/// A story entity with typed accessors.
#[derive(Debug, Clone)]
pub struct Story(EntityRef);

impl Story {
    /// Wrap an entity, rejecting non-story kinds.
    pub fn new(entity: EntityRef) -> Result<Self> {
        if entity.kind() != EntityKind::Story {
            return Err(Error::Validation(format!(
                "expected a story, got a {}",
                entity.kind()
            )));
        }
        Ok(Self(entity))
    }

    /// A fresh, unpersisted story.
    pub fn placeholder() -> Self {
        Self(Entity::new(EntityKind::Story))
    }

    pub fn entity(&self) -> &EntityRef {
        &self.0
    }

    pub fn into_entity(self) -> EntityRef {
        self.0
    }

    // ---------------------------------------------------------------------
    // Fields
    // ---------------------------------------------------------------------

    pub fn name(&self) -> String {
        self.text("name")
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.0.set("name", name.into());
    }

    pub fn description(&self) -> String {
        self.text("description")
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.0.set("description", description.into());
    }

    /// Workflow state; unknown or missing values read as not started.
    pub fn state(&self) -> StoryState {
        self.0
            .get("state")
            .as_ref()
            .and_then(Value::as_str)
            .and_then(StoryState::parse)
            .unwrap_or_default()
    }

    pub fn set_state(&self, state: StoryState) {
        self.0.set("state", state.as_str());
    }

    pub fn story_points(&self) -> Option<i64> {
        self.0.get("storyPoints").as_ref().and_then(Value::as_i64)
    }

    /// Set story points; `None` clears the estimate.
    pub fn set_story_points(&self, points: Option<i64>) {
        match points {
            Some(points) => self.0.set("storyPoints", points),
            None => self.0.set("storyPoints", Value::Null),
        }
    }

    /// Position among siblings as last reported by the remote store.
    pub fn rank(&self) -> Option<i64> {
        self.0.get("rank").as_ref().and_then(Value::as_i64)
    }

    fn text(&self, field: &str) -> String {
        self.0
            .get(field)
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Relations
    // ---------------------------------------------------------------------

    pub fn tasks(&self) -> Vec<EntityRef> {
        self.0.related(RelationSlot::Task)
    }

    pub fn labels(&self) -> Vec<EntityRef> {
        self.0.related(RelationSlot::Label)
    }

    pub fn hour_entries(&self) -> Vec<EntityRef> {
        self.0.related(RelationSlot::HourEntry)
    }

    /// Child stories.
    pub fn children(&self) -> Vec<Story> {
        self.0
            .related(RelationSlot::Story)
            .into_iter()
            .map(Story)
            .collect()
    }

    pub fn parent_story(&self) -> Option<Story> {
        self.0.parent().map(Story)
    }

    /// Name of the parent story, empty when there is none.
    pub fn parent_story_name(&self) -> String {
        self.parent_story().map(|p| p.name()).unwrap_or_default()
    }

    /// Responsible users: the staged list while a change is pending,
    /// otherwise the persisted relation.
    pub fn responsibles(&self) -> Vec<EntityRef> {
        self.0
            .staged_responsibles()
            .unwrap_or_else(|| self.0.related(RelationSlot::User))
    }

    /// Stage a new responsible-user list.
    ///
    /// `user_records` are folded into the registry first so every id in
    /// `user_ids` can be resolved; the list is sent with the next save.
    pub fn set_responsibles(
        &self,
        user_ids: &[EntityId],
        user_records: &[Value],
        registry: &dyn Registry,
    ) -> Result<()> {
        for record in user_records {
            registry.resolve_or_create(EntityKind::User, record)?;
        }
        let users = user_ids
            .iter()
            .map(|id| {
                registry
                    .get_existing(EntityKind::User, id)
                    .ok_or_else(|| Error::NotFound(format!("user {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        self.0.stage_responsibles(users);
        Ok(())
    }

    /// Attach a task and announce it.
    pub fn add_task(&self, task: &EntityRef) -> Result<NotifyReport> {
        if task.kind() != EntityKind::Task {
            return Err(Error::Validation(format!(
                "expected a task, got a {}",
                task.kind()
            )));
        }
        self.0.add_relation(task);
        Ok(self.0.notify(&Event::RelationUpdated {
            entity: self.0.clone(),
            relation: RelationSlot::Task,
        }))
    }

    // ---------------------------------------------------------------------
    // Container
    // ---------------------------------------------------------------------

    pub fn container(&self) -> Container {
        self.0.container()
    }

    /// The logical container: the backlog, or the project when the story
    /// hangs directly under one.
    pub fn backlog(&self) -> Option<EntityRef> {
        self.0.container_entity()
    }

    /// Place the story under a backlog or project (local only).
    pub fn set_backlog(&self, backlog: &EntityRef) -> Result<()> {
        let container = Container::from_entity(backlog.clone()).ok_or_else(|| {
            Error::Validation(format!("a {} cannot contain stories", backlog.kind()))
        })?;
        self.0.set_container(container);
        Ok(())
    }

    /// Place the story under a backlog known to the registry.
    pub fn set_backlog_by_id(&self, registry: &dyn Registry, id: &EntityId) -> Result<()> {
        let backlog = registry
            .get_existing(EntityKind::Iteration, id)
            .ok_or_else(|| Error::NotFound(format!("backlog {}", id)))?;
        self.set_backlog(&backlog)
    }

    // ---------------------------------------------------------------------
    // Metrics
    // ---------------------------------------------------------------------

    pub fn metrics(&self) -> Metrics {
        self.0.metrics()
    }

    pub fn total_effort_spent(&self) -> Option<i64> {
        self.0.metrics().effort_spent()
    }

    pub fn total_effort_left(&self) -> Option<i64> {
        self.0.metrics().effort_left()
    }

    pub fn total_original_estimate(&self) -> Option<i64> {
        self.0.metrics().original_estimate()
    }
}

impl Deref for Story {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn loaded_story(registry: &InMemoryRegistry) -> Story {
        let entity = registry
            .resolve_or_create(
                EntityKind::Story,
                &json!({
                    "id": 42,
                    "name": "Login flow",
                    "description": "OAuth",
                    "state": "STARTED",
                    "storyPoints": 3,
                    "rank": 7,
                    "parent": {"id": 40, "name": "Accounts"},
                    "responsibles": [{"id": 1, "fullName": "Ada"}],
                    "metrics": {"effortSpent": 30, "effortLeft": 90, "originalEstimate": 120}
                }),
            )
            .unwrap();
        Story::new(entity).unwrap()
    }

    #[test]
    fn test_rejects_non_story() {
        let task = Entity::new(EntityKind::Task);
        assert!(Story::new(task).is_err());
    }

    #[test]
    fn test_typed_getters() {
        let registry = InMemoryRegistry::new();
        let story = loaded_story(&registry);

        assert_eq!(story.name(), "Login flow");
        assert_eq!(story.description(), "OAuth");
        assert_eq!(story.state(), StoryState::Started);
        assert_eq!(story.story_points(), Some(3));
        assert_eq!(story.rank(), Some(7));
        assert_eq!(story.parent_story_name(), "Accounts");
        assert_eq!(story.total_effort_spent(), Some(30));
        assert_eq!(story.total_effort_left(), Some(90));
        assert_eq!(story.total_original_estimate(), Some(120));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let story = Story::placeholder();
        assert_eq!(story.name(), "");
        assert_eq!(story.state(), StoryState::NotStarted);
        assert_eq!(story.story_points(), None);
        assert_eq!(story.parent_story_name(), "");
    }

    #[test]
    fn test_setters_mark_diff() {
        let registry = InMemoryRegistry::new();
        let story = loaded_story(&registry);
        story.set_state(StoryState::Done);
        story.set_story_points(None);

        let diff = story.diff();
        assert_eq!(diff.get("state"), Some(&json!("DONE")));
        assert_eq!(diff.get("storyPoints"), Some(&Value::Null));
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn test_staged_responsibles_shadow_relation() {
        let registry = InMemoryRegistry::new();
        let story = loaded_story(&registry);
        assert_eq!(story.responsibles().len(), 1);

        story
            .set_responsibles(
                &[EntityId::new("2"), EntityId::new("3")],
                &[json!({"id": 2, "fullName": "Grace"}), json!({"id": 3})],
                &registry,
            )
            .unwrap();

        assert_eq!(story.responsibles().len(), 2);
        assert_eq!(story.related(RelationSlot::User).len(), 1);
        assert!(story.has_pending_changes());
        assert_eq!(
            story.staged_responsible_ids(),
            Some(vec![EntityId::new("2"), EntityId::new("3")])
        );
    }

    #[test]
    fn test_set_responsibles_unknown_user() {
        let registry = InMemoryRegistry::new();
        let story = loaded_story(&registry);
        let result = story.set_responsibles(&[EntityId::new("99")], &[], &registry);
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(story.staged_responsibles().is_none());
    }

    #[test]
    fn test_add_task_fires_relation_updated() {
        let story = Story::placeholder();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        story.subscribe(move |event| {
            if let Event::RelationUpdated { relation, .. } = event {
                assert_eq!(*relation, RelationSlot::Task);
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        let task = Entity::with_id(EntityKind::Task, EntityId::new("t1"));
        story.add_task(&task).unwrap();
        story.add_task(&task).unwrap();

        assert_eq!(story.tasks().len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_set_backlog_by_id() {
        let registry = InMemoryRegistry::new();
        registry
            .resolve_or_create(EntityKind::Project, &json!({"id": 9}))
            .unwrap();
        let story = Story::placeholder();

        story.set_backlog_by_id(&registry, &EntityId::new("9")).unwrap();
        assert!(story.container().is_project());
        assert_eq!(story.backlog().unwrap().id(), Some(EntityId::new("9")));

        let missing = story.set_backlog_by_id(&registry, &EntityId::new("404"));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_backlog_rejects_task() {
        let story = Story::placeholder();
        let task = Entity::with_id(EntityKind::Task, EntityId::new("t1"));
        assert!(matches!(story.set_backlog(&task), Err(Error::Validation(_))));
    }
}

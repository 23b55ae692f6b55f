//! Data models for the backlog mirror.
//!
//! This module defines the vocabulary shared by every other layer:
//! - `EntityKind` - the closed set of remote record types
//! - `EntityId` - opaque remote identifier
//! - `RelationSlot` - the named relation a kind folds into
//! - `Direction` - over/under for re-ranking
//! - `StoryState` - story workflow states
//! - `Metrics` - server-computed, read-only summary values

pub mod fields;
pub mod relations;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub use fields::FieldTracker;
pub use relations::{Container, Relations};

/// Field name to value mapping used for `currentData`, diffs and payloads.
pub type FieldMap = serde_json::Map<String, Value>;

/// Opaque identifier assigned by the remote store.
///
/// The remote side sends identifiers either as numbers or strings; both are
/// normalized to their string form so `42` and `"42"` name the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract an identifier from a JSON value (number or non-empty string).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Ok(Self(n.to_string())),
            RawId::Text(s) => Ok(Self(s)),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Remote record types known to the mirror.
///
/// This is the single dispatch point for relation population: adding a kind
/// here forces every `match` below to account for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Top-level backlog owning projects
    Product,
    /// Backlog grouping iterations; also holds "leaf" stories directly
    Project,
    /// Time-boxed backlog
    Iteration,
    /// Backlog item
    Story,
    /// Work item under a story
    Task,
    /// Responsible user
    User,
    /// Free-form story label
    Label,
    /// Time logged against a story
    StoryHourEntry,
}

impl EntityKind {
    /// Get all entity kinds.
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Product,
            EntityKind::Project,
            EntityKind::Iteration,
            EntityKind::Story,
            EntityKind::Task,
            EntityKind::User,
            EntityKind::Label,
            EntityKind::StoryHourEntry,
        ]
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Project => "project",
            EntityKind::Iteration => "iteration",
            EntityKind::Story => "story",
            EntityKind::Task => "task",
            EntityKind::User => "user",
            EntityKind::Label => "label",
            EntityKind::StoryHourEntry => "story_hour_entry",
        }
    }

    /// The relation slot a related entity of this kind is folded into.
    pub fn relation_slot(&self) -> RelationSlot {
        match self {
            EntityKind::Product | EntityKind::Iteration => RelationSlot::Backlog,
            EntityKind::Project => RelationSlot::Project,
            EntityKind::Story => RelationSlot::Story,
            EntityKind::Task => RelationSlot::Task,
            EntityKind::User => RelationSlot::User,
            EntityKind::Label => RelationSlot::Label,
            EntityKind::StoryHourEntry => RelationSlot::HourEntry,
        }
    }

    /// Returns true for kinds that can contain stories.
    ///
    /// Backlog kinds share one identifier space on the remote side.
    pub fn is_backlog(&self) -> bool {
        matches!(
            self,
            EntityKind::Product | EntityKind::Project | EntityKind::Iteration
        )
    }

    /// Returns true if the kind cannot be created without a container.
    pub fn requires_container(&self) -> bool {
        matches!(self, EntityKind::Story)
    }

    /// Payload fields copied into `currentData` for this kind.
    pub fn copied_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Product | EntityKind::Project | EntityKind::Iteration => {
                &["name", "description", "startDate", "endDate"]
            }
            EntityKind::Story => &["name", "description", "state", "storyPoints", "rank"],
            EntityKind::Task => &["name", "description", "state", "effortLeft", "originalEstimate", "rank"],
            EntityKind::User => &["fullName", "initials", "loginName"],
            EntityKind::Label => &["displayName", "name"],
            EntityKind::StoryHourEntry => &["date", "description", "minutesSpent"],
        }
    }

    /// Name used in endpoint paths (`ajax/storeStory.action`).
    pub fn endpoint_name(&self) -> &'static str {
        match self {
            EntityKind::Product => "Product",
            EntityKind::Project => "Project",
            EntityKind::Iteration => "Iteration",
            EntityKind::Story => "Story",
            EntityKind::Task => "Task",
            EntityKind::User => "User",
            EntityKind::Label => "Label",
            EntityKind::StoryHourEntry => "StoryHourEntry",
        }
    }

    /// Prefix for serialized field parameters (`story.name`).
    pub fn field_prefix(&self) -> &'static str {
        match self {
            EntityKind::Product | EntityKind::Project | EntityKind::Iteration => "backlog",
            EntityKind::Story => "story",
            EntityKind::Task => "task",
            EntityKind::User => "user",
            EntityKind::Label => "label",
            EntityKind::StoryHourEntry => "hourEntry",
        }
    }

    /// Parameter name carrying an identifier of this kind (`storyId`).
    pub fn id_param(&self) -> String {
        format!("{}Id", self.field_prefix())
    }

    /// Human-readable label used in user-visible messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            EntityKind::Product => "Product",
            EntityKind::Project => "Project",
            EntityKind::Iteration => "Iteration",
            EntityKind::Story => "Story",
            EntityKind::Task => "Task",
            EntityKind::User => "User",
            EntityKind::Label => "Label",
            EntityKind::StoryHourEntry => "Hour entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EntityKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown entity kind: {}", s))
    }
}

/// Named relation slot on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationSlot {
    /// Single container: product or iteration
    Backlog,
    /// Single container: project (leaf stories)
    Project,
    /// Optional parent story
    Parent,
    Task,
    HourEntry,
    User,
    /// Child stories
    Story,
    Label,
}

impl RelationSlot {
    /// Get all collection-valued slots.
    pub fn collections() -> &'static [RelationSlot] {
        &[
            RelationSlot::Task,
            RelationSlot::HourEntry,
            RelationSlot::User,
            RelationSlot::Story,
            RelationSlot::Label,
        ]
    }

    /// Returns true if the slot holds an ordered collection.
    pub fn is_collection(&self) -> bool {
        !matches!(
            self,
            RelationSlot::Backlog | RelationSlot::Project | RelationSlot::Parent
        )
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationSlot::Backlog => "backlog",
            RelationSlot::Project => "project",
            RelationSlot::Parent => "parent",
            RelationSlot::Task => "task",
            RelationSlot::HourEntry => "hourEntry",
            RelationSlot::User => "user",
            RelationSlot::Story => "story",
            RelationSlot::Label => "label",
        }
    }
}

impl fmt::Display for RelationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Placement relative to the target sibling when re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Immediately above the target
    Over,
    /// Immediately below the target
    Under,
}

impl Direction {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Over => "over",
            Direction::Under => "under",
        }
    }

    /// Suffix used in rank endpoint paths.
    pub fn endpoint_suffix(&self) -> &'static str {
        match self {
            Direction::Over => "Over",
            Direction::Under => "Under",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "over" | "above" => Ok(Direction::Over),
            "under" | "below" => Ok(Direction::Under),
            _ => Err(format!("Invalid direction: {} (expected over/under)", s)),
        }
    }
}

/// Story workflow state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryState {
    #[default]
    NotStarted,
    Started,
    Pending,
    Blocked,
    Implemented,
    Done,
}

impl StoryState {
    /// Get the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryState::NotStarted => "NOT_STARTED",
            StoryState::Started => "STARTED",
            StoryState::Pending => "PENDING",
            StoryState::Blocked => "BLOCKED",
            StoryState::Implemented => "IMPLEMENTED",
            StoryState::Done => "DONE",
        }
    }

    /// Parse from the wire representation, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NOT_STARTED" => Some(StoryState::NotStarted),
            "STARTED" => Some(StoryState::Started),
            "PENDING" => Some(StoryState::Pending),
            "BLOCKED" => Some(StoryState::Blocked),
            "IMPLEMENTED" => Some(StoryState::Implemented),
            "DONE" => Some(StoryState::Done),
            _ => None,
        }
    }
}

impl fmt::Display for StoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-computed summary values (effort, points).
///
/// Replaced wholesale on refresh and never part of a save diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(FieldMap);

impl Metrics {
    /// Build metrics from a payload value; non-objects yield empty metrics.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(map.clone()),
            _ => Self::default(),
        }
    }

    /// Get a raw metric value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Check if no metrics are known.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total effort spent on the story's tasks, in minutes.
    pub fn effort_spent(&self) -> Option<i64> {
        self.get("effortSpent").and_then(Value::as_i64)
    }

    /// Total effort left on the story's tasks, in minutes.
    pub fn effort_left(&self) -> Option<i64> {
        self.get("effortLeft").and_then(Value::as_i64)
    }

    /// Total original estimate of the story's tasks, in minutes.
    pub fn original_estimate(&self) -> Option<i64> {
        self.get("originalEstimate").and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_id_from_number_and_string_agree() {
        let from_number: EntityId = serde_json::from_value(json!(42)).unwrap();
        let from_string: EntityId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.as_str(), "42");
    }

    #[test]
    fn test_entity_id_from_value_rejects_empty() {
        assert_eq!(EntityId::from_value(&json!("")), None);
        assert_eq!(EntityId::from_value(&json!(null)), None);
        assert_eq!(EntityId::from_value(&json!("C2")), Some(EntityId::new("C2")));
    }

    #[test]
    fn test_relation_slot_dispatch_table() {
        assert_eq!(EntityKind::Product.relation_slot(), RelationSlot::Backlog);
        assert_eq!(EntityKind::Iteration.relation_slot(), RelationSlot::Backlog);
        assert_eq!(EntityKind::Project.relation_slot(), RelationSlot::Project);
        assert_eq!(EntityKind::User.relation_slot(), RelationSlot::User);
        assert_eq!(EntityKind::Label.relation_slot(), RelationSlot::Label);
        assert_eq!(EntityKind::Task.relation_slot(), RelationSlot::Task);
        assert_eq!(EntityKind::StoryHourEntry.relation_slot(), RelationSlot::HourEntry);
        assert_eq!(EntityKind::Story.relation_slot(), RelationSlot::Story);
    }

    #[test]
    fn test_entity_kind_from_str_roundtrip() {
        for kind in EntityKind::all() {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), *kind);
        }
        assert!("epic".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_id_param_names() {
        assert_eq!(EntityKind::Story.id_param(), "storyId");
        assert_eq!(EntityKind::Iteration.id_param(), "backlogId");
        assert_eq!(EntityKind::Project.id_param(), "backlogId");
    }

    #[test]
    fn test_collection_slots() {
        for slot in RelationSlot::collections() {
            assert!(slot.is_collection());
        }
        assert!(!RelationSlot::Backlog.is_collection());
        assert!(!RelationSlot::Parent.is_collection());
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("under".parse::<Direction>().unwrap(), Direction::Under);
        assert_eq!("OVER".parse::<Direction>().unwrap(), Direction::Over);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_story_state_parse() {
        assert_eq!(StoryState::parse("done"), Some(StoryState::Done));
        assert_eq!(StoryState::parse("NOT_STARTED"), Some(StoryState::NotStarted));
        assert_eq!(StoryState::parse("shipped"), None);
    }

    #[test]
    fn test_metrics_accessors() {
        let metrics = Metrics::from_value(&json!({
            "effortSpent": 120,
            "effortLeft": 60,
            "originalEstimate": 240
        }));
        assert_eq!(metrics.effort_spent(), Some(120));
        assert_eq!(metrics.effort_left(), Some(60));
        assert_eq!(metrics.original_estimate(), Some(240));
        assert!(Metrics::from_value(&json!(null)).is_empty());
    }
}

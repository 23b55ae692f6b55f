//! Command implementations for the bsync CLI.
//!
//! Each command returns a result type that can be rendered as JSON or for
//! humans. Commands that talk to the remote store take a [`Session`], which
//! is transport-agnostic so the same code runs against HTTP or a scripted
//! transport.

use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

use crate::config::{self, ResolvedConfig, SyncConfig};
use crate::entity::EntityRef;
use crate::feedback::FeedbackLog;
use crate::models::{Direction, EntityId, EntityKind, FieldMap, Metrics};
use crate::registry::{InMemoryRegistry, Registry};
use crate::story::Story;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::transport::Transport;
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Engine plus the registry and feedback log it writes to.
pub struct Session {
    pub engine: SyncEngine,
    pub registry: Arc<InMemoryRegistry>,
    pub feedback: Arc<FeedbackLog>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: &ResolvedConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let feedback = Arc::new(FeedbackLog::new(config.feedback_history.value));
        let engine = SyncEngine::new(transport, registry.clone(), feedback.clone())
            .with_config(config.engine_config());
        Self {
            engine,
            registry,
            feedback,
        }
    }

    async fn load_story(&self, id: &str) -> Result<Story> {
        let entity = self.engine.load(EntityKind::Story, &EntityId::new(id)).await?;
        Story::new(entity)
    }

    /// Resolve a backlog, fetching it only if it is not already known.
    async fn backlog(&self, id: &str, kind: &str) -> Result<EntityRef> {
        let kind: EntityKind = kind.parse().map_err(Error::Validation)?;
        if !kind.is_backlog() {
            return Err(Error::Validation(format!("a {} cannot contain stories", kind)));
        }
        let id = EntityId::new(id);
        match self.registry.get_existing(kind, &id) {
            Some(existing) => Ok(existing),
            None => self.engine.load(kind, &id).await,
        }
    }

    fn last_message(&self) -> String {
        self.feedback
            .latest()
            .map(|f| f.message)
            .unwrap_or_default()
    }
}

// ============================================================================
// Result types
// ============================================================================

/// Reference to a related entity for display.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub kind: EntityKind,
    pub id: Option<EntityId>,
    pub name: String,
}

impl EntitySummary {
    pub fn from_entity(entity: &EntityRef) -> Self {
        let name = ["name", "fullName", "displayName", "loginName"]
            .iter()
            .find_map(|field| entity.get(field).and_then(|v| v.as_str().map(str::to_string)))
            .unwrap_or_default();
        Self {
            kind: entity.kind(),
            id: entity.id(),
            name,
        }
    }

    fn label(&self) -> String {
        let id = self.id.as_ref().map(|id| id.to_string()).unwrap_or_default();
        if self.name.is_empty() {
            format!("{} {}", self.kind, id)
        } else {
            format!("{} {} \"{}\"", self.kind, id, self.name)
        }
    }
}

/// Story snapshot as shown by `bsync show`.
#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub id: Option<EntityId>,
    pub name: String,
    pub state: String,
    pub story_points: Option<i64>,
    pub rank: Option<i64>,
    pub container: Option<EntitySummary>,
    pub parent: Option<EntitySummary>,
    pub responsibles: Vec<EntitySummary>,
    pub tasks: Vec<EntitySummary>,
    pub labels: Vec<EntitySummary>,
    pub metrics: Metrics,
}

impl StorySummary {
    pub fn from_story(story: &Story) -> Self {
        let summarize = |items: Vec<EntityRef>| -> Vec<EntitySummary> {
            items.iter().map(EntitySummary::from_entity).collect()
        };
        Self {
            id: story.id(),
            name: story.name(),
            state: story.state().to_string(),
            story_points: story.story_points(),
            rank: story.rank(),
            container: story.backlog().as_ref().map(EntitySummary::from_entity),
            parent: story.parent().as_ref().map(EntitySummary::from_entity),
            responsibles: summarize(story.responsibles()),
            tasks: summarize(story.tasks()),
            labels: summarize(story.labels()),
            metrics: story.metrics(),
        }
    }
}

impl Output for StorySummary {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        let id = self.id.as_ref().map(|id| id.to_string()).unwrap_or_default();
        let points = self
            .story_points
            .map(|p| format!(", {} pts", p))
            .unwrap_or_default();
        lines.push(format!("story {} \"{}\" [{}]{}", id, self.name, self.state, points));
        if let Some(ref container) = self.container {
            lines.push(format!("  container: {}", container.label()));
        }
        if let Some(ref parent) = self.parent {
            lines.push(format!("  parent: {}", parent.label()));
        }
        if !self.responsibles.is_empty() {
            let names: Vec<String> = self.responsibles.iter().map(|u| u.name.clone()).collect();
            lines.push(format!("  responsibles: {}", names.join(", ")));
        }
        if !self.tasks.is_empty() {
            lines.push(format!("  tasks: {}", self.tasks.len()));
            for task in &self.tasks {
                lines.push(format!("    - {}", task.label()));
            }
        }
        if !self.labels.is_empty() {
            let names: Vec<String> = self.labels.iter().map(|l| l.name.clone()).collect();
            lines.push(format!("  labels: {}", names.join(", ")));
        }
        if !self.metrics.is_empty() {
            lines.push(format!("  effort: {}", format_effort(&self.metrics)));
        }
        lines.join("\n")
    }
}

fn format_effort(metrics: &Metrics) -> String {
    let part = |label: &str, value: Option<i64>| {
        value
            .map(|v| format!("{} {}h{:02}m", label, v / 60, v % 60))
            .unwrap_or_else(|| format!("{} -", label))
    };
    [
        part("spent", metrics.effort_spent()),
        part("left", metrics.effort_left()),
        part("estimate", metrics.original_estimate()),
    ]
    .join(", ")
}

/// Result of `bsync metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResult {
    pub id: EntityId,
    pub effort_spent: Option<i64>,
    pub effort_left: Option<i64>,
    pub original_estimate: Option<i64>,
}

impl Output for MetricsResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let metrics = Metrics::from_value(&json!({
            "effortSpent": self.effort_spent,
            "effortLeft": self.effort_left,
            "originalEstimate": self.original_estimate,
        }));
        format!("story {}: {}", self.id, format_effort(&metrics))
    }
}

/// Result of a mutating command.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub operation: String,
    pub id: EntityId,
    /// "applied" or "stale"
    pub outcome: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story: Option<StorySummary>,
}

impl OperationResult {
    fn new(operation: &str, id: EntityId, outcome: SyncOutcome, message: String) -> Self {
        Self {
            operation: operation.to_string(),
            id,
            outcome: match outcome {
                SyncOutcome::Applied => "applied".to_string(),
                SyncOutcome::Stale => "stale".to_string(),
            },
            message,
            story: None,
        }
    }
}

impl Output for OperationResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut out = if self.message.is_empty() {
            format!("{} story {}: {}", self.operation, self.id, self.outcome)
        } else {
            self.message.clone()
        };
        if let Some(ref story) = self.story {
            out.push('\n');
            out.push_str(&story.to_human());
        }
        out
    }
}

/// One configuration value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue {
    pub key: String,
    pub value: String,
    pub source: String,
}

impl Output for ConfigValue {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("{} = {} ({})", self.key, self.value, self.source)
    }
}

/// Result of `bsync config list`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigList {
    pub entries: Vec<ConfigValue>,
}

impl Output for ConfigList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.to_human())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of `bsync config path`.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPath {
    pub path: String,
    pub exists: bool,
}

impl Output for ConfigPath {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.exists {
            self.path.clone()
        } else {
            format!("{} (not created yet)", self.path)
        }
    }
}

// ============================================================================
// Remote commands
// ============================================================================

/// Fetch and summarize a story.
pub async fn show(session: &Session, id: &str) -> Result<StorySummary> {
    let story = session.load_story(id).await?;
    Ok(StorySummary::from_story(&story))
}

/// Refresh a story's metrics.
pub async fn metrics(session: &Session, id: &str) -> Result<MetricsResult> {
    let story = session.load_story(id).await?;
    session.engine.reload_metrics(story.entity()).await?;
    Ok(MetricsResult {
        id: EntityId::new(id),
        effort_spent: story.total_effort_spent(),
        effort_left: story.total_effort_left(),
        original_estimate: story.total_original_estimate(),
    })
}

/// Rank a story over or under a sibling, optionally into another backlog.
pub async fn rank(
    session: &Session,
    id: &str,
    direction: Direction,
    target: &str,
    backlog: Option<(&str, &str)>,
) -> Result<OperationResult> {
    let story = session.load_story(id).await?;
    let sibling = session.load_story(target).await?;
    let container = match backlog {
        Some((backlog_id, kind)) => Some(session.backlog(backlog_id, kind).await?),
        None => None,
    };

    let outcome = session
        .engine
        .rank(story.entity(), direction, sibling.entity(), container.as_ref())
        .await?;
    let mut result =
        OperationResult::new("rank", EntityId::new(id), outcome, session.last_message());
    result.story = Some(StorySummary::from_story(&story));
    Ok(result)
}

/// Move a story into another backlog.
pub async fn move_story(
    session: &Session,
    id: &str,
    backlog: &str,
    backlog_kind: &str,
) -> Result<OperationResult> {
    let story = session.load_story(id).await?;
    let destination = session.backlog(backlog, backlog_kind).await?;

    let outcome = session.engine.move_to(story.entity(), &destination).await?;
    let mut result =
        OperationResult::new("move", EntityId::new(id), outcome, session.last_message());
    result.story = Some(StorySummary::from_story(&story));
    Ok(result)
}

/// Delete a story. `params` are `key=value` pairs passed through verbatim.
pub async fn delete(session: &Session, id: &str, params: &[String]) -> Result<OperationResult> {
    let extra = parse_params(params)?;
    let entity = session
        .registry
        .resolve_or_create(EntityKind::Story, &json!({ "id": id }))?;

    session.engine.remove(&entity, extra).await?;
    Ok(OperationResult::new(
        "delete",
        EntityId::new(id),
        SyncOutcome::Applied,
        session.last_message(),
    ))
}

fn parse_params(params: &[String]) -> Result<FieldMap> {
    let mut extra = FieldMap::new();
    for param in params {
        let (key, value) = param.split_once('=').ok_or_else(|| {
            Error::Validation(format!("parameter '{}' must look like key=value", param))
        })?;
        if key.is_empty() {
            return Err(Error::Validation(format!("parameter '{}' has no key", param)));
        }
        extra.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(extra)
}

// ============================================================================
// Config commands
// ============================================================================

/// Get one resolved configuration value.
pub fn config_get(resolved: &ResolvedConfig, key: &str) -> Result<ConfigValue> {
    resolved
        .entries()
        .into_iter()
        .find(|(name, _, _)| *name == key)
        .map(|(key, value, source)| ConfigValue {
            key: key.to_string(),
            value,
            source,
        })
        .ok_or_else(|| {
            Error::Config(format!(
                "Unknown config key '{}'. Valid keys: {}",
                key,
                config::CONFIG_KEYS.join(", ")
            ))
        })
}

/// List all resolved configuration values.
pub fn config_list(resolved: &ResolvedConfig) -> ConfigList {
    ConfigList {
        entries: resolved
            .entries()
            .into_iter()
            .map(|(key, value, source)| ConfigValue {
                key: key.to_string(),
                value,
                source,
            })
            .collect(),
    }
}

/// Set one value in config.kdl.
pub fn config_set(path: &Path, key: &str, value: &str) -> Result<ConfigValue> {
    let mut file_config: SyncConfig = config::read_config(path)?;
    file_config.set_key(key, value).map_err(Error::Config)?;
    config::write_config(path, &file_config)?;
    Ok(ConfigValue {
        key: key.to_string(),
        value: value.to_string(),
        source: format!("file:{}", path.display()),
    })
}

/// Report where config.kdl lives.
pub fn config_path(path: &Path) -> ConfigPath {
    ConfigPath {
        path: path.display().to_string(),
        exists: path.exists(),
    }
}

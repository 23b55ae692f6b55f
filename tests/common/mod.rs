//! Common test utilities for backlog-sync integration tests.
//!
//! `Fixture` wires a `SyncEngine` to a scripted transport so tests can queue
//! replies and inspect requests. `TestEnv` runs the `bsync` binary against an
//! isolated config file.

#![allow(dead_code)]

use assert_cmd::Command;
use backlog_sync::events::EventKind;
use backlog_sync::sync::EngineConfig;
use backlog_sync::transport::ScriptedTransport;
use backlog_sync::{
    EntityId, EntityKind, EntityRef, FeedbackLog, InMemoryRegistry, Registry, SyncEngine,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
pub use tempfile::TempDir;

/// Engine plus the collaborators tests inspect.
pub struct Fixture {
    pub transport: Arc<ScriptedTransport>,
    pub registry: Arc<InMemoryRegistry>,
    pub feedback: Arc<FeedbackLog>,
    pub engine: Arc<SyncEngine>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let feedback = Arc::new(FeedbackLog::default());
        let engine = Arc::new(
            SyncEngine::new(transport.clone(), registry.clone(), feedback.clone())
                .with_config(config),
        );
        Self {
            transport,
            registry,
            feedback,
            engine,
        }
    }

    /// Register an entity from a record, as if it had been loaded.
    pub fn entity(&self, kind: EntityKind, record: Value) -> EntityRef {
        self.registry.resolve_or_create(kind, &record).unwrap()
    }

    /// Register a story from `record` and list it under `container`.
    pub fn story_in(&self, container: &EntityRef, record: Value) -> EntityRef {
        let story = self.entity(EntityKind::Story, record);
        container.add_relation(&story);
        story
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRef> {
        self.registry.get_existing(kind, &EntityId::new(id))
    }
}

/// Events seen by an entity's listener: kind plus the source's id.
pub type EventLog = Arc<Mutex<Vec<(EventKind, Option<EntityId>)>>>;

/// Subscribe a recording listener to `entity`.
pub fn record_events(entity: &EntityRef) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    entity.subscribe(move |event| {
        sink.lock()
            .unwrap()
            .push((event.kind(), event.source().id()));
        Ok(())
    });
    log
}

/// Event kinds recorded so far.
pub fn kinds(log: &EventLog) -> Vec<EventKind> {
    log.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
}

/// Yield until the transport has seen `count` requests.
pub async fn wait_for_requests(transport: &ScriptedTransport, count: usize) {
    while transport.request_count() < count {
        tokio::task::yield_now().await;
    }
}

/// Isolated environment for running the `bsync` binary.
pub struct TestEnv {
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("config.kdl")
    }

    /// A `bsync` command using this environment's config file and no
    /// base URL from the caller's environment.
    pub fn bsync(&self) -> Command {
        let mut cmd = Command::cargo_bin("bsync").unwrap();
        cmd.env("BSYNC_CONFIG", self.config_path());
        cmd.env_remove("BSYNC_BASE_URL");
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

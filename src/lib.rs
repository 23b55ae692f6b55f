//! backlog-sync - A client-side mirror of server-held backlog entities.
//!
//! This library keeps a local graph of stories, their containers (backlogs and
//! projects), tasks, responsible users and labels consistent with a remote
//! authoritative store:
//! - [`models`] - entity kinds, field diff tracking, typed relation slots
//! - [`entity`] - the shared `Entity` handle and record application
//! - [`sync`] - load/save/remove lifecycle plus the rank and move protocols
//! - [`events`] - change events and isolated listener dispatch
//! - [`transport`] - the remote call boundary (HTTP and scripted)

pub mod cli;
pub mod commands;
pub mod config;
pub mod entity;
pub mod events;
pub mod feedback;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod story;
pub mod sync;
pub mod transport;

pub use entity::{Entity, EntityRef};
pub use events::{Event, ListenerId, NotifyReport};
pub use feedback::{Feedback, FeedbackLevel, FeedbackLog, FeedbackSink, TracingFeedback};
pub use models::{Direction, EntityId, EntityKind, RelationSlot};
pub use registry::{InMemoryRegistry, Registry};
pub use story::Story;
pub use sync::{SaveOutcome, SyncEngine, SyncOutcome};
pub use transport::Transport;

/// Library-level error type for backlog-sync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Another entity is already registered as {0}")]
    DuplicateIdentity(String),

    #[error("Entity has not been created remotely yet: {0}")]
    NotPersisted(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for backlog-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

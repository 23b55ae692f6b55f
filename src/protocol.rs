//! Request and reply messages exchanged with the remote store.
//!
//! Each lifecycle or protocol operation issues exactly one [`Request`] and
//! receives exactly one [`Reply`] (or an error). Messages are JSON-encodable
//! with a `type` field for discrimination, and also know how to render
//! themselves as the remote store's form endpoints.
//!
//! ## Requests
//! - `store`: create (no id) or update (id + changed fields)
//! - `retrieve` / `retrieve_metrics`: refresh by identifier
//! - `delete`: delete by identifier with optional extra parameters
//! - `rank`: reposition over/under a sibling, optionally in another container
//! - `move`: re-parent into another container
//! - `retrieve_ranks`: ranked children of a container

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Direction, EntityId, EntityKind, FieldMap};
use crate::{Error, Result};

/// Parameter carrying a container identifier.
const CONTAINER_PARAM: &str = "backlogId";

/// A single remote call.
///
/// # Examples
///
/// ```json
/// {"type": "store", "kind": "story", "id": "42", "fields": {"name": "Login flow"}}
/// {"type": "rank", "kind": "story", "id": "42", "target_id": "7", "direction": "under"}
/// {"type": "delete", "kind": "story", "id": "7"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Create (when `id` is absent) or update an entity.
    Store {
        kind: EntityKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<EntityId>,
        /// Changed fields (all fields on create)
        fields: FieldMap,
        /// Replacement responsible-user list, if changed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        responsibles: Option<Vec<EntityId>>,
        /// Container identifier, sent on create
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_id: Option<EntityId>,
    },

    /// Fetch the full record.
    Retrieve { kind: EntityKind, id: EntityId },

    /// Fetch the record with freshly computed metrics.
    RetrieveMetrics { kind: EntityKind, id: EntityId },

    /// Delete by identifier.
    Delete {
        kind: EntityKind,
        id: EntityId,
        #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
        extra: FieldMap,
    },

    /// Reposition next to a sibling.
    Rank {
        kind: EntityKind,
        id: EntityId,
        target_id: EntityId,
        direction: Direction,
        /// Destination container, only when it differs from the current one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_id: Option<EntityId>,
    },

    /// Move into another container.
    Move {
        kind: EntityKind,
        id: EntityId,
        container_id: EntityId,
    },

    /// Ranked children of a container, in server order.
    RetrieveRanks {
        container_kind: EntityKind,
        container_id: EntityId,
    },
}

impl Request {
    /// Short operation name used in logs and feedback.
    pub fn operation(&self) -> &'static str {
        match self {
            Request::Store { id: None, .. } => "create",
            Request::Store { .. } => "store",
            Request::Retrieve { .. } => "retrieve",
            Request::RetrieveMetrics { .. } => "retrieve_metrics",
            Request::Delete { .. } => "delete",
            Request::Rank { .. } => "rank",
            Request::Move { .. } => "move",
            Request::RetrieveRanks { .. } => "retrieve_ranks",
        }
    }

    /// Relative endpoint path on the remote store.
    pub fn endpoint(&self) -> String {
        match self {
            Request::Store { kind, id: None, .. } => {
                format!("ajax/create{}.action", kind.endpoint_name())
            }
            Request::Store { kind, .. } => format!("ajax/store{}.action", kind.endpoint_name()),
            Request::Retrieve { kind, .. } => {
                format!("ajax/retrieve{}.action", kind.endpoint_name())
            }
            Request::RetrieveMetrics { kind, .. } => {
                format!("ajax/retrieve{}Metrics.action", kind.endpoint_name())
            }
            Request::Delete { kind, .. } => format!("ajax/delete{}.action", kind.endpoint_name()),
            Request::Rank {
                kind, direction, ..
            } => format!(
                "ajax/rank{}{}.action",
                kind.endpoint_name(),
                direction.endpoint_suffix()
            ),
            Request::Move { kind, .. } => format!("ajax/move{}.action", kind.endpoint_name()),
            Request::RetrieveRanks { .. } => "ajax/retrieveRankedStories.action".to_string(),
        }
    }

    /// Returns true if the reply is a plain acknowledgement.
    pub fn expects_ack(&self) -> bool {
        matches!(self, Request::Delete { .. })
    }

    /// Returns true if the reply is a list of records.
    pub fn expects_list(&self) -> bool {
        matches!(self, Request::RetrieveRanks { .. })
    }

    /// Form-encoded parameters for the request, in a stable order.
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match self {
            Request::Store {
                kind,
                id,
                fields,
                responsibles,
                container_id,
            } => {
                if let Some(id) = id {
                    params.push((kind.id_param(), id.to_string()));
                }
                for (field, value) in fields {
                    params.push((format!("{}.{}", kind.field_prefix(), field), form_value(value)));
                }
                if let Some(container_id) = container_id {
                    params.push((CONTAINER_PARAM.to_string(), container_id.to_string()));
                }
                if let Some(users) = responsibles {
                    for user in users {
                        params.push(("userIds".to_string(), user.to_string()));
                    }
                    params.push(("usersChanged".to_string(), "true".to_string()));
                }
            }
            Request::Retrieve { kind, id } | Request::RetrieveMetrics { kind, id } => {
                params.push((kind.id_param(), id.to_string()));
            }
            Request::Delete { kind, id, extra } => {
                params.push((kind.id_param(), id.to_string()));
                for (key, value) in extra {
                    params.push((key.clone(), form_value(value)));
                }
            }
            Request::Rank {
                kind,
                id,
                target_id,
                container_id,
                ..
            } => {
                params.push((kind.id_param(), id.to_string()));
                params.push((
                    format!("target{}Id", kind.endpoint_name()),
                    target_id.to_string(),
                ));
                if let Some(container_id) = container_id {
                    params.push((CONTAINER_PARAM.to_string(), container_id.to_string()));
                }
            }
            Request::Move {
                kind,
                id,
                container_id,
            } => {
                params.push((kind.id_param(), id.to_string()));
                params.push((CONTAINER_PARAM.to_string(), container_id.to_string()));
            }
            Request::RetrieveRanks { container_id, .. } => {
                params.push((CONTAINER_PARAM.to_string(), container_id.to_string()));
            }
        }
        params
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The remote store's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Reply {
    /// Full canonical record
    Record(Value),
    /// Ordered list of records
    Records(Vec<Value>),
    /// Acknowledgement without a body
    Ack,
}

impl Reply {
    /// Extract the single record, rejecting other shapes.
    pub fn into_record(self, operation: &str) -> Result<Value> {
        match self {
            Reply::Record(value) if value.is_object() => Ok(value),
            other => Err(Error::InvalidRecord(format!(
                "{} expected a record, got {}",
                operation,
                other.shape()
            ))),
        }
    }

    /// Extract the record list, rejecting other shapes.
    pub fn into_records(self, operation: &str) -> Result<Vec<Value>> {
        match self {
            Reply::Records(values) => Ok(values),
            Reply::Record(Value::Array(values)) => Ok(values),
            other => Err(Error::InvalidRecord(format!(
                "{} expected a record list, got {}",
                operation,
                other.shape()
            ))),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Reply::Record(_) => "a record",
            Reply::Records(_) => "a record list",
            Reply::Ack => "an acknowledgement",
        }
    }
}

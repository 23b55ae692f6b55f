//! Load, refresh, save and remove.

use serde_json::Value;

use super::{SaveOutcome, SyncEngine, SyncOutcome};
use crate::entity::{ApplyMode, EntityRef};
use crate::events::Event;
use crate::models::{EntityId, EntityKind, FieldMap, Metrics};
use crate::protocol::Request;
use crate::{Error, Result};

impl SyncEngine {
    /// Fetch an entity by identifier and register it.
    ///
    /// A known entity is refreshed in place. No event fires.
    pub async fn load(&self, kind: EntityKind, id: &EntityId) -> Result<EntityRef> {
        if let Some(existing) = self.registry.get_existing(kind, id) {
            self.reload(&existing).await?;
            return Ok(existing);
        }

        let context = format!("{} {}", kind, id);
        let request = Request::Retrieve {
            kind,
            id: id.clone(),
        };
        let operation = request.operation();
        let record = self
            .call(&context, request)
            .await?
            .into_record(operation)
            .map_err(|e| self.report_failure(&context, e))?;

        self.registry
            .resolve_or_create(kind, &record)
            .map_err(|e| self.report_failure(&context, e))
    }

    /// Refresh an entity from its authoritative record. No event fires.
    pub async fn reload(&self, entity: &EntityRef) -> Result<SyncOutcome> {
        let id = self.require_id(entity, "reload")?;
        let context = entity.describe();
        let request = Request::Retrieve {
            kind: entity.kind(),
            id,
        };
        let operation = request.operation();

        let ticket = entity.issue_ticket();
        let record = self
            .call(&context, request)
            .await?
            .into_record(operation)
            .map_err(|e| self.report_failure(&context, e))?;

        if !self.admit(entity, ticket, operation) {
            return Ok(SyncOutcome::Stale);
        }
        entity
            .set_data(&record, self.registry.as_ref(), ApplyMode::Merge)
            .map_err(|e| self.report_failure(&context, e))?;
        Ok(SyncOutcome::Applied)
    }

    /// Refresh server-computed metrics and fire an edit event.
    ///
    /// The reply is either a full record carrying `metrics`, or the metrics
    /// object itself.
    pub async fn reload_metrics(&self, entity: &EntityRef) -> Result<SyncOutcome> {
        let id = self.require_id(entity, "reload metrics of")?;
        let context = entity.describe();
        let request = Request::RetrieveMetrics {
            kind: entity.kind(),
            id,
        };
        let operation = request.operation();

        let ticket = entity.issue_ticket();
        let record = self
            .call(&context, request)
            .await?
            .into_record(operation)
            .map_err(|e| self.report_failure(&context, e))?;

        if !self.admit(entity, ticket, operation) {
            return Ok(SyncOutcome::Stale);
        }
        if record.get("metrics").is_some() {
            entity
                .set_data(&record, self.registry.as_ref(), ApplyMode::Merge)
                .map_err(|e| self.report_failure(&context, e))?;
        } else {
            entity.set_metrics(Metrics::from_value(&record));
        }

        self.notify(
            entity,
            Event::Edited {
                entity: entity.clone(),
            },
        );
        Ok(SyncOutcome::Applied)
    }

    /// Persist local changes.
    ///
    /// An unpersisted entity is created together with its container
    /// identifier; a persisted one sends only its changed fields. Staged
    /// responsibles travel in the same request. Returns
    /// [`SaveOutcome::Unchanged`] without any remote call when there is
    /// nothing to send.
    pub async fn save(&self, entity: &EntityRef) -> Result<SaveOutcome> {
        let kind = entity.kind();
        let context = entity.describe();
        let fields = entity.diff();
        let responsibles = entity.staged_responsible_ids();

        if fields.is_empty() && responsibles.is_none() {
            tracing::debug!("{}: nothing to save", context);
            return Ok(SaveOutcome::Unchanged);
        }

        let id = entity.id();
        let creating = id.is_none();
        let container = entity.container_entity();
        let container_id = if creating {
            let container_id = container.as_ref().and_then(|c| c.id());
            if container_id.is_none() && kind.requires_container() {
                return Err(self.report_failure(
                    &context,
                    Error::Validation("Please select a parent backlog".to_string()),
                ));
            }
            container_id
        } else {
            None
        };

        let request = Request::Store {
            kind,
            id,
            fields: fields.clone(),
            responsibles,
            container_id,
        };
        let operation = request.operation();

        let ticket = entity.issue_ticket();
        let record = self
            .call(&context, request)
            .await?
            .into_record(operation)
            .map_err(|e| self.report_failure(&context, e))?;

        if !self.admit(entity, ticket, operation) {
            return Ok(SaveOutcome::Stale);
        }

        if creating {
            self.apply_created(entity, &record, &fields, container, &context)
        } else {
            entity
                .set_data(&record, self.registry.as_ref(), ApplyMode::Merge)
                .map_err(|e| self.report_failure(&context, e))?;
            entity.confirm_saved(&fields);
            entity.clear_staged_responsibles();
            self.report_success(&entity.describe(), format!("{} saved", kind.display_name()));
            self.notify(
                entity,
                Event::Edited {
                    entity: entity.clone(),
                },
            );
            Ok(SaveOutcome::Updated)
        }
    }

    /// Fold a creation response in: assign and register the identifier,
    /// attach to the container, fire the creation events.
    ///
    /// If the identifier cannot be registered or the record cannot be
    /// applied, the entity is left unsaved and unregistered.
    fn apply_created(
        &self,
        entity: &EntityRef,
        record: &Value,
        sent: &FieldMap,
        container: Option<EntityRef>,
        context: &str,
    ) -> Result<SaveOutcome> {
        let kind = entity.kind();
        let id = record
            .get("id")
            .and_then(EntityId::from_value)
            .ok_or_else(|| {
                self.report_failure(
                    context,
                    Error::InvalidRecord(format!("created {} has no id", kind)),
                )
            })?;

        // Registered before the record is applied so nested references to
        // the new identifier resolve to this entity.
        entity.assign_id(id.clone());
        let applied = self.registry.register(entity).and_then(|()| {
            entity.set_data(record, self.registry.as_ref(), ApplyMode::Merge)
        });
        if let Err(err) = applied {
            self.registry.unregister(entity);
            entity.forget_id();
            return Err(self.report_failure(context, err));
        }
        entity.confirm_saved(sent);
        entity.clear_staged_responsibles();

        // The authoritative container wins over the one chosen locally.
        let container = entity.container_entity().or(container);
        if let Some(container) = &container {
            container.add_relation(entity);
        }

        self.report_success(&entity.describe(), format!("{} created", kind.display_name()));
        self.notify(
            entity,
            Event::Created {
                entity: entity.clone(),
            },
        );
        if let Some(container) = container {
            self.notify(
                &container,
                Event::RelationUpdated {
                    entity: container.clone(),
                    relation: kind.relation_slot(),
                },
            );
        }
        Ok(SaveOutcome::Created(id))
    }

    /// Delete an entity remotely.
    ///
    /// The graph is not touched: detaching the entity from whatever list
    /// shows it is up to the caller once this returns `Ok`.
    pub async fn remove(&self, entity: &EntityRef, extra: FieldMap) -> Result<()> {
        let id = self.require_id(entity, "delete")?;
        let context = entity.describe();
        let request = Request::Delete {
            kind: entity.kind(),
            id,
            extra,
        };

        self.call(&context, request).await?;
        self.report_success(&context, format!("{} deleted", entity.kind().display_name()));
        Ok(())
    }
}

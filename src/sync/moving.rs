//! Move protocol: re-parent an entity into another container.

use super::{SyncEngine, SyncOutcome, same_entity};
use crate::entity::{ApplyMode, EntityRef};
use crate::events::Event;
use crate::protocol::Request;
use crate::{Error, Result};

impl SyncEngine {
    /// Move `entity` into `destination`.
    ///
    /// The authoritative record replaces the container and is merged
    /// otherwise. Afterwards the entity is detached from its old grouping (if
    /// that changed) and from its old container (if that changed), attached
    /// to the new container, and an edit event fires on the entity. The old grouping then refreshes its ranking; a failed
    /// refresh is reported but does not fail the move.
    pub async fn move_to(&self, entity: &EntityRef, destination: &EntityRef) -> Result<SyncOutcome> {
        let id = self.require_id(entity, "move")?;
        let context = entity.describe();
        if !destination.kind().is_backlog() {
            return Err(self.report_failure(
                &context,
                Error::Validation(format!("a {} cannot contain stories", destination.kind())),
            ));
        }
        let container_id = destination.id().ok_or_else(|| {
            self.report_failure(
                &context,
                Error::NotPersisted(format!("destination {} was never saved", destination.describe())),
            )
        })?;

        let old_container = entity.container_entity();
        let old_grouping = entity.grouping();

        let request = Request::Move {
            kind: entity.kind(),
            id,
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
            return Ok(SyncOutcome::Stale);
        }
        entity
            .set_data(&record, self.registry.as_ref(), ApplyMode::Relocate)
            .map_err(|e| self.report_failure(&context, e))?;

        let new_container = entity.container_entity();
        let new_grouping = entity.grouping();

        let regrouped = !same_entity(&old_grouping, &new_grouping);
        if regrouped {
            if let Some(grouping) = &old_grouping {
                grouping.remove_relation(entity);
            }
        }
        if !same_entity(&old_container, &new_container) {
            if let Some(old) = &old_container {
                old.remove_relation(entity);
            }
            if let Some(new) = &new_container {
                new.add_relation(entity);
            }
        }

        self.notify(
            entity,
            Event::Edited {
                entity: entity.clone(),
            },
        );
        self.report_success(
            &entity.describe(),
            format!(
                "{} moved to {}",
                entity.kind().display_name(),
                destination.describe()
            ),
        );

        if regrouped {
            if let Some(grouping) = &old_grouping {
                if let Err(err) = self.reload_ranks(grouping).await {
                    tracing::warn!("ranking refresh of {:?} failed: {}", grouping, err);
                }
            }
        }
        Ok(SyncOutcome::Applied)
    }
}

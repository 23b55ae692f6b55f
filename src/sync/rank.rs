//! Rank/reorder protocol and ordering-index refresh.

use std::sync::Arc;

use super::{SyncEngine, SyncOutcome, same_entity};
use crate::entity::{ApplyMode, EntityRef};
use crate::events::Event;
use crate::models::{Container, Direction, EntityKind, RelationSlot};
use crate::protocol::Request;
use crate::{Error, Result};

impl SyncEngine {
    /// Reposition `entity` immediately over or under `target`.
    ///
    /// `container` names the destination; it is only sent when it differs
    /// from the entity's current container. The reply is the entity's full
    /// authoritative record and replaces its container and parent outright.
    ///
    /// Rank-changed events go to the project when the entity now lives
    /// directly under one; otherwise to the old container and, if different,
    /// the new one.
    pub async fn rank(
        &self,
        entity: &EntityRef,
        direction: Direction,
        target: &EntityRef,
        container: Option<&EntityRef>,
    ) -> Result<SyncOutcome> {
        let id = self.require_id(entity, "rank")?;
        let context = entity.describe();
        let target_id = target.id().ok_or_else(|| {
            self.report_failure(
                &context,
                Error::NotPersisted(format!("rank target {} was never saved", target.describe())),
            )
        })?;

        let old_container = entity.container_entity();
        let destination = container.filter(|c| {
            !old_container
                .as_ref()
                .is_some_and(|old| Arc::ptr_eq(old, *c))
        });
        let container_id = match destination {
            Some(c) => Some(c.id().ok_or_else(|| {
                self.report_failure(
                    &context,
                    Error::NotPersisted(format!("destination {} was never saved", c.describe())),
                )
            })?),
            None => None,
        };

        let request = Request::Rank {
            kind: entity.kind(),
            id,
            target_id,
            direction,
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
            .set_data(&record, self.registry.as_ref(), ApplyMode::Replace)
            .map_err(|e| self.report_failure(&context, e))?;

        let new_container = entity.container_entity();
        let moved = !same_entity(&old_container, &new_container);
        if moved {
            if let Some(old) = &old_container {
                old.remove_relation(entity);
            }
            if let Some(new) = &new_container {
                new.add_relation(entity);
            }
        }

        let slot = entity.kind().relation_slot();
        match entity.container() {
            Container::Project(project) => {
                self.notify(&project, rank_changed(&project, slot));
            }
            _ => {
                if let Some(old) = &old_container {
                    self.notify(old, rank_changed(old, slot));
                }
                if moved {
                    if let Some(new) = &new_container {
                        self.notify(new, rank_changed(new, slot));
                    }
                }
            }
        }

        self.report_success(
            &entity.describe(),
            format!("{} ranked {} {}", entity.kind().display_name(), direction, target.describe()),
        );
        Ok(SyncOutcome::Applied)
    }

    /// Rank `entity` immediately above `target`.
    pub async fn rank_over(
        &self,
        entity: &EntityRef,
        target: &EntityRef,
        container: Option<&EntityRef>,
    ) -> Result<SyncOutcome> {
        self.rank(entity, Direction::Over, target, container).await
    }

    /// Rank `entity` immediately below `target`.
    pub async fn rank_under(
        &self,
        entity: &EntityRef,
        target: &EntityRef,
        container: Option<&EntityRef>,
    ) -> Result<SyncOutcome> {
        self.rank(entity, Direction::Under, target, container).await
    }

    /// Refetch a container's ranked stories and replace its story collection
    /// in server order.
    pub async fn reload_ranks(&self, container: &EntityRef) -> Result<SyncOutcome> {
        let context = container.describe();
        if !container.kind().is_backlog() {
            return Err(self.report_failure(
                &context,
                Error::Validation(format!("{} has no ranked stories", container.kind())),
            ));
        }
        let container_id = self.require_id(container, "reload ranks of")?;
        let request = Request::RetrieveRanks {
            container_kind: container.kind(),
            container_id,
        };
        let operation = request.operation();

        let ticket = container.issue_ticket();
        let records = self
            .call(&context, request)
            .await?
            .into_records(operation)
            .map_err(|e| self.report_failure(&context, e))?;

        if !self.admit(container, ticket, operation) {
            return Ok(SyncOutcome::Stale);
        }
        container
            .update_relations(EntityKind::Story, &records, self.registry.as_ref())
            .map_err(|e| self.report_failure(&context, e))?;
        tracing::debug!("{}: {} ranked stories", context, records.len());

        self.notify(container, rank_changed(container, RelationSlot::Story));
        Ok(SyncOutcome::Applied)
    }
}

fn rank_changed(container: &EntityRef, child: RelationSlot) -> Event {
    Event::RankChanged {
        container: container.clone(),
        child,
    }
}

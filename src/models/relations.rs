//! Typed relation slots.
//!
//! Relations are folded in by dispatching on the related entity's kind
//! (`EntityKind::relation_slot`). Single-valued slots are overwritten,
//! collection slots append unless the same entity (by identity) is already
//! present.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{EntityKind, RelationSlot};
use crate::entity::EntityRef;

/// The logical container of an entity.
///
/// A story lives either under a backlog-like node (product, iteration) or
/// directly under a project, never both.
#[derive(Clone, Default)]
pub enum Container {
    #[default]
    None,
    Backlog(EntityRef),
    Project(EntityRef),
}

impl Container {
    /// Wrap an entity in the variant its kind belongs to.
    ///
    /// Returns `None` for kinds that cannot contain stories.
    pub fn from_entity(entity: EntityRef) -> Option<Self> {
        match entity.kind() {
            EntityKind::Project => Some(Container::Project(entity)),
            EntityKind::Product | EntityKind::Iteration => Some(Container::Backlog(entity)),
            _ => None,
        }
    }

    /// The container entity, whichever variant holds it.
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            Container::None => None,
            Container::Backlog(entity) | Container::Project(entity) => Some(entity),
        }
    }

    /// Returns true if the container resolves through a project relation.
    pub fn is_project(&self) -> bool {
        matches!(self, Container::Project(_))
    }

    /// Returns true if no container is resolved.
    pub fn is_none(&self) -> bool {
        matches!(self, Container::None)
    }

    /// Identity comparison against an entity.
    pub fn holds(&self, entity: &EntityRef) -> bool {
        self.entity().is_some_and(|held| Arc::ptr_eq(held, entity))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::None => write!(f, "None"),
            Container::Backlog(entity) => write!(f, "Backlog({:?})", entity),
            Container::Project(entity) => write!(f, "Project({:?})", entity),
        }
    }
}

/// All relation slots of one entity.
#[derive(Debug, Clone, Default)]
pub struct Relations {
    container: Container,
    parent: Option<EntityRef>,
    collections: BTreeMap<RelationSlot, Vec<EntityRef>>,
}

impl Relations {
    /// Create empty relations.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// The backlog slot (product or iteration), if that is the container.
    pub fn backlog(&self) -> Option<&EntityRef> {
        match &self.container {
            Container::Backlog(entity) => Some(entity),
            _ => None,
        }
    }

    /// The project slot, if that is the container.
    pub fn project(&self) -> Option<&EntityRef> {
        match &self.container {
            Container::Project(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<&EntityRef> {
        self.parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Option<EntityRef>) {
        self.parent = parent;
    }

    pub fn set_container(&mut self, container: Container) {
        self.container = container;
    }

    pub fn clear_container(&mut self) {
        self.container = Container::None;
    }

    /// Entities held by a collection slot, in order.
    ///
    /// Single-valued slots yield zero or one element.
    pub fn collection(&self, slot: RelationSlot) -> Vec<EntityRef> {
        match slot {
            RelationSlot::Backlog => self.backlog().cloned().into_iter().collect(),
            RelationSlot::Project => self.project().cloned().into_iter().collect(),
            RelationSlot::Parent => self.parent.clone().into_iter().collect(),
            _ => self.collections.get(&slot).cloned().unwrap_or_default(),
        }
    }

    /// Check if a slot holds the given entity (identity comparison).
    pub fn contains(&self, slot: RelationSlot, target: &EntityRef) -> bool {
        match slot {
            RelationSlot::Backlog => self.backlog().is_some_and(|e| Arc::ptr_eq(e, target)),
            RelationSlot::Project => self.project().is_some_and(|e| Arc::ptr_eq(e, target)),
            RelationSlot::Parent => self.parent.as_ref().is_some_and(|e| Arc::ptr_eq(e, target)),
            _ => self
                .collections
                .get(&slot)
                .is_some_and(|items| items.iter().any(|e| Arc::ptr_eq(e, target))),
        }
    }

    /// Fold a related entity into the slot configured for its kind.
    ///
    /// Returns true if the relations changed.
    pub fn add(&mut self, target: EntityRef) -> bool {
        let slot = target.kind().relation_slot();
        match slot {
            RelationSlot::Backlog | RelationSlot::Project => {
                if self.container.holds(&target) {
                    return false;
                }
                match Container::from_entity(target) {
                    Some(container) => {
                        self.container = container;
                        true
                    }
                    None => false,
                }
            }
            RelationSlot::Parent => {
                let changed = !self.contains(slot, &target);
                self.parent = Some(target);
                changed
            }
            _ => {
                let items = self.collections.entry(slot).or_default();
                if items.iter().any(|e| Arc::ptr_eq(e, &target)) {
                    false
                } else {
                    items.push(target);
                    true
                }
            }
        }
    }

    /// Remove a related entity from the slot configured for its kind.
    ///
    /// Collection slots lose one occurrence; single-valued slots are cleared
    /// only if they currently hold that exact entity. A story is also cleared
    /// from the parent slot. Returns true if anything was removed.
    pub fn remove(&mut self, target: &EntityRef) -> bool {
        let slot = target.kind().relation_slot();
        let mut removed = false;

        match slot {
            RelationSlot::Backlog | RelationSlot::Project => {
                if self.container.holds(target) {
                    self.container = Container::None;
                    removed = true;
                }
            }
            _ => {
                if let Some(items) = self.collections.get_mut(&slot) {
                    if let Some(index) = items.iter().position(|e| Arc::ptr_eq(e, target)) {
                        items.remove(index);
                        removed = true;
                    }
                }
            }
        }

        if target.kind() == EntityKind::Story
            && self.parent.as_ref().is_some_and(|p| Arc::ptr_eq(p, target))
        {
            self.parent = None;
            removed = true;
        }

        removed
    }

    /// Replace a collection slot wholesale, keeping the first occurrence of
    /// each entity.
    pub fn replace(&mut self, slot: RelationSlot, items: Vec<EntityRef>) {
        let mut unique: Vec<EntityRef> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|e| Arc::ptr_eq(e, &item)) {
                unique.push(item);
            }
        }
        self.collections.insert(slot, unique);
    }
}

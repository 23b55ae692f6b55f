//! Change events and listener dispatch.
//!
//! Every mutating operation informs observers (table views, parent
//! containers, dashboards) through typed events. Dispatch is synchronous and
//! in subscription order, but each listener runs in isolation: a listener
//! that returns an error or panics is recorded in the [`NotifyReport`] and the
//! remaining listeners still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Result;
use crate::entity::EntityRef;
use crate::models::RelationSlot;

/// A change notification.
#[derive(Debug, Clone)]
pub enum Event {
    /// The entity was created remotely for the first time.
    Created { entity: EntityRef },
    /// Generic field or relation change.
    Edited { entity: EntityRef },
    /// One relation slot of the entity changed (e.g. a task was added).
    RelationUpdated {
        entity: EntityRef,
        relation: RelationSlot,
    },
    /// The ordering of one child collection of a container changed.
    RankChanged {
        container: EntityRef,
        child: RelationSlot,
    },
}

/// Discriminant of an [`Event`], handy for filtering and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Edited,
    RelationUpdated,
    RankChanged,
}

impl EventKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Edited => "edited",
            EventKind::RelationUpdated => "relation_updated",
            EventKind::RankChanged => "rank_changed",
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Created { .. } => EventKind::Created,
            Event::Edited { .. } => EventKind::Edited,
            Event::RelationUpdated { .. } => EventKind::RelationUpdated,
            Event::RankChanged { .. } => EventKind::RankChanged,
        }
    }

    /// The entity the event is about.
    pub fn source(&self) -> &EntityRef {
        match self {
            Event::Created { entity }
            | Event::Edited { entity }
            | Event::RelationUpdated { entity, .. } => entity,
            Event::RankChanged { container, .. } => container,
        }
    }
}

/// Observer callback.
pub type Listener = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A listener that failed while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub listener: ListenerId,
    pub message: String,
}

/// Outcome of one notify pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Listeners that handled the event successfully
    pub delivered: usize,
    /// Listeners that returned an error or panicked
    pub failures: Vec<ListenerFailure>,
}

impl NotifyReport {
    /// Returns true if every listener handled the event.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered listener set owned by one entity.
#[derive(Default)]
pub struct Listeners {
    entries: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener at the end of the dispatch order.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() < before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every current listener.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe while handling the event without deadlocking.
    pub fn notify(&self, event: &Event) -> NotifyReport {
        let snapshot: Vec<(ListenerId, Listener)> = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.clone()
        };

        let mut report = NotifyReport::default();
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(
                        "listener {:?} failed on {} event: {}",
                        id,
                        event.kind().as_str(),
                        err
                    );
                    report.failures.push(ListenerFailure {
                        listener: id,
                        message: err.to_string(),
                    });
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        "listener {:?} panicked on {} event: {}",
                        id,
                        event.kind().as_str(),
                        message
                    );
                    report.failures.push(ListenerFailure {
                        listener: id,
                        message,
                    });
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::entity::Entity;
    use crate::models::{EntityId, EntityKind};
    use std::sync::atomic::AtomicUsize;

    fn story() -> EntityRef {
        Entity::with_id(EntityKind::Story, EntityId::new("1"))
    }

    #[test]
    fn test_notify_in_subscription_order() {
        let listeners = Listeners::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            listeners.subscribe(move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }

        let report = listeners.notify(&Event::Edited { entity: story() });
        assert_eq!(report.delivered, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let listeners = Listeners::new();
        let id = listeners.subscribe(|_| Ok(()));

        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_failing_listener_does_not_suppress_others() {
        let listeners = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        listeners.subscribe(|_| Err(Error::Validation("broken view".to_string())));
        let counter = calls.clone();
        listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = listeners.notify(&Event::Edited { entity: story() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("broken view"));
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        listeners.subscribe(|_| panic!("boom"));
        let counter = calls.clone();
        listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = listeners.notify(&Event::Created { entity: story() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!report.is_clean());
        assert_eq!(report.failures[0].message, "boom");
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let listeners = Arc::new(Listeners::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let inner = listeners.clone();
        let own_id = slot.clone();
        let id = listeners.subscribe(move |_| {
            if let Some(id) = *own_id.lock().unwrap() {
                inner.unsubscribe(id);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);

        listeners.notify(&Event::Edited { entity: story() });
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_event_source_and_kind() {
        let entity = story();
        let event = Event::RankChanged {
            container: entity.clone(),
            child: RelationSlot::Story,
        };
        assert_eq!(event.kind(), EventKind::RankChanged);
        assert!(Arc::ptr_eq(event.source(), &entity));
    }
}

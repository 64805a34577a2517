//! Registry of active connections.
//!
//! Connections live in a slot arena behind a single mutex. Membership is
//! tied to lifecycle: a connection enters the arena as it becomes `Active`
//! and leaves it as it becomes `Closing`, both under the lock, so a
//! broadcast pass never sees a connection that is mid-teardown.

use crate::connection::{Connection, ConnectionId, ConnectionState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection is already registered.
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    /// Only `Connecting` connections can be registered.
    #[error("Connection cannot be registered in state {0:?}")]
    InvalidState(ConnectionState),
}

#[derive(Default)]
struct Slot {
    generation: u64,
    occupant: Option<Arc<Connection>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Slots {
    fn get(&self, id: ConnectionId) -> Option<&Arc<Connection>> {
        self.slots
            .get(id.slot() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.occupant.as_ref())
    }

    fn insert(&mut self, conn: Arc<Connection>) -> ConnectionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.generation += 1;
        slot.occupant = Some(conn);
        self.len += 1;
        ConnectionId::new(index, slot.generation)
    }

    fn remove(&mut self, id: ConnectionId) -> Option<Arc<Connection>> {
        let slot = self
            .slots
            .get_mut(id.slot() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let conn = slot.occupant.take()?;
        self.free.push(id.slot());
        self.len -= 1;
        Some(conn)
    }
}

/// Concurrency-safe set of active connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Slots>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection and make it `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if the connection is
    /// already a member and [`RegistryError::InvalidState`] if it is not
    /// `Connecting`.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<ConnectionId, RegistryError> {
        let mut slots = self.lock();

        if let Some(id) = conn.id() {
            if slots.get(id).is_some() {
                return Err(RegistryError::AlreadyRegistered(id));
            }
        }
        if !conn.transition(ConnectionState::Connecting, ConnectionState::Active) {
            return Err(RegistryError::InvalidState(conn.state()));
        }

        let id = slots.insert(Arc::clone(conn));
        conn.assign_id(id);

        debug!(connection = %id, active = slots.len, "Connection registered");
        Ok(id)
    }

    /// Remove a connection and move it to `Closing`.
    ///
    /// Removing an absent or stale id is a no-op that returns `None`.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut slots = self.lock();
        let Some(conn) = slots.remove(id) else {
            trace!(connection = %id, "Unregister of absent connection ignored");
            return None;
        };
        conn.transition(ConnectionState::Active, ConnectionState::Closing);

        debug!(connection = %id, active = slots.len, "Connection unregistered");
        Some(conn)
    }

    /// Call `f` once for every registered connection.
    ///
    /// The registry lock is held for the whole pass, so `f` sees one
    /// consistent membership snapshot. `f` must not block and must not
    /// call back into the registry.
    pub fn for_each_active<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        let slots = self.lock();
        for conn in slots.slots.iter().filter_map(|slot| slot.occupant.as_ref()) {
            f(conn);
        }
    }

    /// Look up a registered connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().get(id).cloned()
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().get(id).is_some()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connecting() -> Arc<Connection> {
        Connection::new(4, None).0
    }

    #[test]
    fn test_register_unregister() {
        let registry = ConnectionRegistry::new();
        let conn = connecting();

        let id = registry.register(&conn).unwrap();
        assert_eq!(conn.id(), Some(id));
        assert_eq!(conn.state(), ConnectionState::Active);
        assert!(registry.contains(id));
        assert_eq!(registry.len(), 1);

        let removed = registry.unregister(id).unwrap();
        assert!(Arc::ptr_eq(&removed, &conn));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = ConnectionRegistry::new();
        let conn = connecting();
        let id = registry.register(&conn).unwrap();

        assert_eq!(
            registry.register(&conn),
            Err(RegistryError::AlreadyRegistered(id))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_closing_fails() {
        let registry = ConnectionRegistry::new();
        let conn = connecting();
        let id = registry.register(&conn).unwrap();
        registry.unregister(id);

        assert_eq!(
            registry.register(&conn),
            Err(RegistryError::InvalidState(ConnectionState::Closing))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = connecting();
        let id = registry.register(&conn).unwrap();

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.unregister(id).is_none());
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_id_does_not_alias_reused_slot() {
        let registry = ConnectionRegistry::new();
        let first = connecting();
        let old_id = registry.register(&first).unwrap();
        registry.unregister(old_id);

        let second = connecting();
        let new_id = registry.register(&second).unwrap();
        assert_eq!(new_id.slot(), old_id.slot());
        assert_ne!(new_id.generation(), old_id.generation());

        // The stale id neither finds nor removes the new occupant.
        assert!(registry.get(old_id).is_none());
        assert!(registry.unregister(old_id).is_none());
        assert!(registry.contains(new_id));
        assert_eq!(second.state(), ConnectionState::Active);
    }

    #[test]
    fn test_for_each_active_sees_members_only() {
        let registry = ConnectionRegistry::new();
        let ids: Vec<_> = (0..5)
            .map(|_| registry.register(&connecting()).unwrap())
            .collect();
        registry.unregister(ids[1]);
        registry.unregister(ids[3]);

        let mut seen = Vec::new();
        registry.for_each_active(|conn| {
            assert_eq!(conn.state(), ConnectionState::Active);
            seen.push(conn.id().unwrap());
        });
        seen.sort();
        assert_eq!(seen, vec![ids[0], ids[2], ids[4]]);
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let conn = connecting();
                        let id = registry.register(&conn).unwrap();
                        registry.for_each_active(|c| {
                            assert_eq!(c.state(), ConnectionState::Active);
                        });
                        assert!(registry.unregister(id).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}

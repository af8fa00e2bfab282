use std::collections::HashMap;

use uuid::Uuid;

/// Optimistic operations awaiting the server, keyed by a client-generated
/// correlation id. Each entry leaves the table exactly once: resolved when
/// the server confirms it, rolled back when it fails.
#[derive(Debug)]
pub struct PendingOps<P> {
    entries: HashMap<Uuid, P>,
}

impl<P> Default for PendingOps<P> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<P> PendingOps<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `payload` under a fresh correlation id.
    pub fn begin(&mut self, payload: P) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(id, payload);
        id
    }

    /// Like [`begin`](Self::begin), for payloads that embed their own id.
    pub fn begin_with(&mut self, make: impl FnOnce(Uuid) -> P) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(id, make(id));
        id
    }

    pub fn get(&self, id: Uuid) -> Option<&P> {
        self.entries.get(&id)
    }

    pub fn resolve(&mut self, id: Uuid) -> Option<P> {
        self.entries.remove(&id)
    }

    pub fn rollback(&mut self, id: Uuid) -> Option<P> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    /// The first pending entry matching `pred`.
    pub fn find(&self, pred: impl Fn(&P) -> bool) -> Option<(Uuid, &P)> {
        self.entries
            .iter()
            .find(|(_, p)| pred(p))
            .map(|(id, p)| (*id, p))
    }

    pub fn values(&self) -> impl Iterator<Item = &P> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! The public document facade: a thin wrapper over the block store.

use std::collections::BTreeMap;

use crate::common::{ClientId, Clock};
use crate::error::Result;
use crate::events::{Event, EventLog};
use crate::store::BlockStore;

/// Construction options for a [`Doc`].
#[derive(Debug, Clone, Default)]
pub struct DocOptions {
    /// Fixed client id. Randomly generated when unset. Must be non-zero;
    /// client 0 is reserved for the sentinel origin.
    pub client_id: Option<ClientId>,

    /// Record an [`Event`] with a full store snapshot for every operation.
    /// Costly; meant for debugging and replay tooling.
    pub capture_events: bool,
}

/// A collaborative plain-text document.
///
/// Every replica edits its own `Doc` and exchanges opaque update messages
/// with the others; once every replica has seen every update, all replicas
/// render the same text, regardless of delivery order or duplication.
///
/// A `Doc` is not internally synchronised. Drive it from one thread, or
/// serialise access externally.
#[derive(Debug, Clone)]
pub struct Doc {
    store: BlockStore,
}

fn random_client_id() -> ClientId {
    loop {
        let id: ClientId = rand::random();
        if id != 0 {
            return id;
        }
    }
}

impl Doc {
    /// A new empty document with a random client id.
    pub fn new() -> Self {
        Self::new_with_options(DocOptions::default())
    }

    /// A new empty document with a caller-chosen client id. Useful for tests
    /// which depend on the ordering of concurrent edits.
    ///
    /// Panics if `client` is 0.
    pub fn with_client_id(client: ClientId) -> Self {
        Self::new_with_options(DocOptions {
            client_id: Some(client),
            ..Default::default()
        })
    }

    pub fn new_with_options(options: DocOptions) -> Self {
        let client = match options.client_id {
            Some(id) => {
                assert_ne!(id, 0, "client id 0 is reserved");
                id
            }
            None => random_client_id(),
        };
        let mut store = BlockStore::new(client);
        if options.capture_events {
            store.events = Some(EventLog::new());
        }
        Doc { store }
    }

    /// This replica's client id.
    pub fn client_id(&self) -> ClientId {
        self.store.client()
    }

    /// Insert `text` at character position `position`. Positions past the
    /// end are clamped to the end.
    pub fn insert(&mut self, position: u64, text: &str) -> Result<()> {
        self.store.insert(position, text)
    }

    /// Delete `length` characters starting at `position`. Fails with
    /// [`Error::OutOfRange`](crate::Error::OutOfRange) when `length` exceeds
    /// the current document length.
    pub fn delete(&mut self, position: u64, length: u64) -> Result<()> {
        self.store.delete(position, length)
    }

    /// The document's visible text.
    pub fn content(&self) -> String {
        self.store.content()
    }

    /// Visible length in characters.
    pub fn len(&self) -> u64 {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Apply an update message produced by another replica's
    /// [`encode_state_as_update`](Doc::encode_state_as_update). Blocks whose
    /// dependencies haven't arrived yet are parked and retried on later
    /// calls; applying the same update repeatedly is a no-op.
    pub fn apply_update(&mut self, bytes: &[u8]) -> Result<()> {
        self.store.apply_update(bytes)
    }

    /// Serialise this replica's full state (blocks, tombstones and delete
    /// set) as an update message.
    pub fn encode_state_as_update(&self) -> Result<Vec<u8>> {
        self.store.encode_state_as_update()
    }

    /// Next expected clock per known client.
    pub fn encode_state_vector(&self) -> BTreeMap<ClientId, Clock> {
        self.store.encode_state_vector()
    }

    /// Events captured so far. Empty unless the document was created with
    /// [`DocOptions::capture_events`].
    pub fn events(&self) -> &[Event] {
        self.store.events.as_ref().map_or(&[], |log| log.events())
    }

    /// Validate internal invariants, panicking on failure. Only exported for
    /// integration testing; do not depend on it as part of the API.
    #[doc(hidden)]
    pub fn dbg_check(&self) {
        self.store.dbg_check();
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_client_ids_are_nonzero_and_distinct() {
        let a = Doc::new();
        let b = Doc::new();
        assert_ne!(a.client_id(), 0);
        assert_ne!(b.client_id(), 0);
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn basic_editing() {
        let mut doc = Doc::with_client_id(1);
        doc.insert(0, "Hello").unwrap();
        doc.insert(5, " World").unwrap();
        assert_eq!(doc.content(), "Hello World");
        assert_eq!(doc.len(), 11);
        doc.delete(5, 6).unwrap();
        assert_eq!(doc.content(), "Hello");
        assert!(!doc.is_empty());
    }

    #[test]
    #[should_panic(expected = "client id 0 is reserved")]
    fn zero_client_id_rejected() {
        let _ = Doc::with_client_id(0);
    }
}

//! A conflict-free replicated plain-text document.
//!
//! Each replica owns a [`Doc`], edits it locally by character position, and
//! exchanges opaque update messages with other replicas. Updates can arrive
//! in any order, any number of times; once every replica has received every
//! update, all of them render the same text. There is no coordinator and no
//! transport - moving the bytes is the caller's job.
//!
//! Internally the document is a sequence of *blocks*: runs of characters
//! inserted together, split as later edits land inside them and tombstoned
//! (never removed) when deleted. Concurrent insertions at the same spot are
//! ordered by the YATA rules, anchored on the neighbouring character ids
//! each block was created between.
//!
//! ```
//! use blocktext::Doc;
//!
//! let mut alice = Doc::new();
//! let mut bob = Doc::new();
//!
//! alice.insert(0, "Hello World")?;
//! bob.apply_update(&alice.encode_state_as_update()?)?;
//! assert_eq!(bob.content(), "Hello World");
//! # Ok::<(), blocktext::Error>(())
//! ```

mod block;
mod check;
mod common;
mod deleteset;
mod doc;
mod encoding;
mod error;
mod events;
mod marker;
mod store;
mod update;

pub use common::{BlockId, ClientId, Clock, ORIGIN_NONE};
pub use doc::{Doc, DocOptions};
pub use error::{Error, Result};
pub use events::{BlockSnapshot, Event, EventType};

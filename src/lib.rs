//! # Message DB client
//!
//! Client for an append-only message store partitioned into categories and
//! entity streams, plus a checkpointed polling consumer built on top of it.
//!
//! ## Core Concepts
//!
//! - **Messages**: Typed facts with JSON data and metadata, positioned both
//!   within their stream and across the store
//! - **Streams**: `category-entityId` names one entity; a bare category name
//!   reads every entity stream of that category
//! - **Optimistic concurrency**: Writes may carry an expected version and are
//!   rejected with a structured conflict when the stream has moved on
//! - **Subscriptions**: Background pollers that dispatch by message type and
//!   periodically checkpoint their position
//!
//! ## Example
//!
//! ```ignore
//! use messagedb::{Handlers, Message, MessageDb, MemoryStore};
//!
//! let db = MessageDb::new(MemoryStore::new());
//!
//! // Write with an expected version
//! let mut opened = Message::new("account-123", "Opened").with_expected_version(-1);
//! db.write(&mut opened)?;
//!
//! // Read the whole category
//! let messages = db.read_all("account")?;
//!
//! // Consume it continuously
//! let handle = db
//!     .create_subscription("account", "projector", Handlers::new().on("Opened", |m, _| {
//!         println!("opened {}", m.stream_name);
//!     }))?
//!     .subscribe()?;
//! ```

pub mod client;
pub mod error;
pub mod store;
pub mod stream_name;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use client::{MessageDb, READ_ALL_PAGE_SIZE};
pub use error::{MessageDbError, Result};
pub use store::{Connection, MemoryStore, Transaction, WriteMessage};
pub use subscriptions::{
    Dispatch, Handler, Handlers, Subscription, SubscriptionConfig, SubscriptionHandle,
    SubscriptionState, Unsubscriber, CHECKPOINT_TYPE, POSITION_KEY,
};
pub use types::*;

//! Checkpointed polling subscriptions.
//!
//! A subscription turns the pull-based store into a continuous consumer:
//! - Resumes from the last checkpoint in `subscriberPosition-<subscriberId>`
//! - Polls the stream or category on a fixed interval on its own thread
//! - Dispatches each message to the handler registered for its type
//! - Writes a `Read` checkpoint every `position_update_interval` dispatches
//!
//! Subscribing to a category checkpoints global positions. Subscribing to an
//! entity stream checkpoints stream positions and starts delivering at stream
//! position 1.
//!
//! Delivery is at-least-once: after a restart, up to one checkpoint interval
//! of already-handled messages may be dispatched again.
//!
//! # Example
//!
//! ```ignore
//! let db = MessageDb::new(MemoryStore::new());
//!
//! let handlers = Handlers::new().on("Deposited", |message, _| {
//!     println!("deposit at {}", message.global_position);
//! });
//! let handle = db.create_subscription("account", "balances", handlers)?.subscribe()?;
//!
//! // Later
//! handle.unsubscribe();
//! handle.join()?;
//! ```

mod poller;
mod types;

pub use poller::{Subscription, CHECKPOINT_TYPE, POSITION_KEY};
pub use types::{
    Dispatch, Handler, Handlers, SubscriptionConfig, SubscriptionHandle, SubscriptionState,
    Unsubscriber,
};

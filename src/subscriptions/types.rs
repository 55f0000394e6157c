//! Subscription types: configuration, handlers and the running handle.

use crate::error::{MessageDbError, Result};
use crate::types::Message;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// Polling configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Time between ticks.
    /// Default: 100ms
    pub tick_interval: Duration,

    /// Max messages read per tick.
    /// Default: 100
    pub messages_per_tick: usize,

    /// Dispatched messages between checkpoint writes.
    /// Default: 99
    pub position_update_interval: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            messages_per_tick: 100,
            position_update_interval: 99,
        }
    }
}

impl SubscriptionConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_messages_per_tick(mut self, count: usize) -> Self {
        self.messages_per_tick = count;
        self
    }

    pub fn with_position_update_interval(mut self, count: u64) -> Self {
        self.position_update_interval = count;
        self
    }
}

/// Lifecycle of a subscription. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Polling,
    Stopped,
}

/// Callback invoked for each message whose type it is registered for.
pub type Handler = Box<dyn FnMut(&Message, &Dispatch<'_>) + Send>;

/// Message type to handler mapping.
#[derive(Default)]
pub struct Handlers {
    handlers: HashMap<String, Handler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type, replacing any previous one.
    pub fn on<F>(mut self, message_type: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&Message, &Dispatch<'_>) + Send + 'static,
    {
        self.handlers.insert(message_type.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get_mut(&mut self, message_type: &str) -> Option<&mut Handler> {
        self.handlers.get_mut(message_type)
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Context handed to a handler alongside the message.
pub struct Dispatch<'a> {
    pub(crate) subscriber_id: &'a str,
    pub(crate) unsubscriber: &'a Unsubscriber,
}

impl Dispatch<'_> {
    pub fn subscriber_id(&self) -> &str {
        self.subscriber_id
    }

    /// Stop the subscription once the current tick finishes.
    pub fn unsubscribe(&self) {
        self.unsubscriber.unsubscribe();
    }
}

/// Cloneable stop signal for a running subscription.
#[derive(Clone)]
pub struct Unsubscriber {
    subscriber_id: Arc<str>,
    stopped: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl Unsubscriber {
    pub(crate) fn new(subscriber_id: &str) -> (Self, Receiver<()>) {
        let (wake, woken) = crossbeam_channel::bounded(1);
        let unsubscriber = Self {
            subscriber_id: Arc::from(subscriber_id),
            stopped: Arc::new(AtomicBool::new(false)),
            wake,
        };
        (unsubscriber, woken)
    }

    /// Request a cooperative stop. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(subscriber = %self.subscriber_id, "unsubscribing");
            let _ = self.wake.try_send(());
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Handle to a polling subscription.
///
/// Dropping the handle requests a stop but does not wait for the polling
/// task; call [`join`](Self::join) to wait and observe its result.
pub struct SubscriptionHandle {
    pub(crate) subscriber_id: String,
    pub(crate) state: Arc<RwLock<SubscriptionState>>,
    pub(crate) unsubscriber: Unsubscriber,
    pub(crate) errors: Receiver<MessageDbError>,
    pub(crate) task: Option<JoinHandle<Result<()>>>,
}

impl SubscriptionHandle {
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.read()
    }

    pub fn unsubscribe(&self) {
        self.unsubscriber.unsubscribe();
    }

    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    /// The failure that stopped polling, if one has been reported.
    pub fn try_recv_error(&self) -> std::result::Result<MessageDbError, TryRecvError> {
        self.errors.try_recv()
    }

    /// Wait up to `timeout` for the failure that stops polling. A panicking
    /// handler is reported as [`MessageDbError::TaskPanicked`].
    pub fn recv_error_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<MessageDbError, RecvTimeoutError> {
        self.errors.recv_timeout(timeout)
    }

    /// Wait for the polling task to finish.
    ///
    /// Returns `Ok(())` after an unsubscribe and the tick failure otherwise.
    /// Blocks until one of those happens.
    pub fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.join().unwrap_or(Err(MessageDbError::TaskPanicked)),
            None => Ok(()),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.unsubscriber.unsubscribe();
        }
    }
}

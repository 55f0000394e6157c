//! Checkpointed polling consumer.

use crate::client::MessageDb;
use crate::error::{MessageDbError, Result};
use crate::store::Connection;
use crate::stream_name;
use crate::types::{Message, Payload};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

use super::types::{
    Dispatch, Handlers, SubscriptionConfig, SubscriptionHandle, SubscriptionState, Unsubscriber,
};

/// Type of checkpoint messages.
pub const CHECKPOINT_TYPE: &str = "Read";

/// Data key holding the checkpointed position.
pub const POSITION_KEY: &str = "position";

/// An idle subscription. Call [`subscribe`](Self::subscribe) to start polling.
///
/// The cursor lives in the read path's position space: global positions for
/// a category, stream positions for an entity stream. Each tick reads from
/// cursor + 1 and a fresh subscription's cursor is 0, so an entity-stream
/// subscription never sees the message at stream position 0.
pub struct Subscription<C> {
    db: MessageDb<C>,
    stream_name: String,
    subscriber_id: String,
    handlers: Handlers,
    config: SubscriptionConfig,
}

impl<C: Connection> Subscription<C> {
    pub(crate) fn new(
        db: MessageDb<C>,
        stream_name: String,
        subscriber_id: String,
        handlers: Handlers,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        if stream_name.is_empty() {
            return Err(MessageDbError::StreamNameRequired);
        }
        if subscriber_id.is_empty() {
            return Err(MessageDbError::SubscriberIdRequired);
        }
        Ok(Self {
            db,
            stream_name,
            subscriber_id,
            handlers,
            config,
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }
}

impl<C: Connection + 'static> Subscription<C> {
    /// Load the last checkpoint and start polling on a background thread.
    ///
    /// Returns once polling has started. Failures while polling stop the
    /// subscription and are reported through the returned handle.
    pub fn subscribe(self) -> Result<SubscriptionHandle> {
        info!(stream = %self.stream_name, subscriber = %self.subscriber_id, "subscribing");

        let (errors_tx, errors) = unbounded();
        let mut poller = Poller::new(self, errors_tx);
        poller.load_position()?;

        let state = Arc::clone(&poller.state);
        *state.write() = SubscriptionState::Polling;
        let unsubscriber = poller.unsubscriber.clone();

        let subscriber_id = poller.subscriber_id.clone();
        let task = thread::Builder::new()
            .name(format!("subscription-{subscriber_id}"))
            .spawn(move || poller.run())?;

        Ok(SubscriptionHandle {
            subscriber_id,
            state,
            unsubscriber,
            errors,
            task: Some(task),
        })
    }
}

/// Sets the shared state to `Stopped` when the polling task exits. A panic
/// unwinding through the task is also reported on the error channel.
struct StoppedOnExit {
    state: Arc<RwLock<SubscriptionState>>,
    errors: Sender<MessageDbError>,
}

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        *self.state.write() = SubscriptionState::Stopped;
        if thread::panicking() {
            error!("subscription task panicked");
            let _ = self.errors.send(MessageDbError::TaskPanicked);
        }
    }
}

/// State owned by the polling task.
struct Poller<C> {
    db: MessageDb<C>,
    stream_name: String,
    subscriber_id: String,
    position_stream: String,
    handlers: Handlers,
    config: SubscriptionConfig,
    /// Category subscriptions track global positions, entity-stream
    /// subscriptions track stream positions.
    by_category: bool,
    current_position: i64,
    since_checkpoint: u64,
    state: Arc<RwLock<SubscriptionState>>,
    unsubscriber: Unsubscriber,
    woken: Receiver<()>,
    errors: Sender<MessageDbError>,
}

impl<C: Connection> Poller<C> {
    fn new(subscription: Subscription<C>, errors: Sender<MessageDbError>) -> Self {
        let Subscription {
            db,
            stream_name,
            subscriber_id,
            handlers,
            config,
        } = subscription;

        let (unsubscriber, woken) = Unsubscriber::new(&subscriber_id);

        Self {
            position_stream: stream_name::position_stream_name(&subscriber_id),
            by_category: stream_name::is_category(&stream_name),
            db,
            stream_name,
            subscriber_id,
            handlers,
            config,
            current_position: 0,
            since_checkpoint: 0,
            state: Arc::new(RwLock::new(SubscriptionState::Idle)),
            unsubscriber,
            woken,
            errors,
        }
    }

    /// Resume from the last checkpoint, or from the start if there is none.
    fn load_position(&mut self) -> Result<()> {
        let checkpoint = self.db.read_last(&self.position_stream)?;
        if let Some(position) = checkpoint.as_ref().and_then(checkpoint_position) {
            self.current_position = position;
        }
        debug!(
            subscriber = %self.subscriber_id,
            position = self.current_position,
            "loaded position"
        );
        Ok(())
    }

    fn run(mut self) -> Result<()> {
        let _stopped = StoppedOnExit {
            state: Arc::clone(&self.state),
            errors: self.errors.clone(),
        };
        let ticker = tick(self.config.tick_interval);
        let woken = self.woken.clone();

        loop {
            select! {
                recv(woken) -> _ => break,
                recv(ticker) -> _ => {
                    if self.is_unsubscribed() {
                        break;
                    }
                    if let Err(err) = self.tick() {
                        error!(subscriber = %self.subscriber_id, error = %err, "stopping subscription");
                        self.stop_with(&err);
                        return Err(err);
                    }
                }
            }
        }

        info!(subscriber = %self.subscriber_id, "subscription stopped");
        Ok(())
    }

    fn is_unsubscribed(&self) -> bool {
        self.unsubscriber.is_unsubscribed()
    }

    fn stop_with(&self, err: &MessageDbError) {
        *self.state.write() = SubscriptionState::Stopped;
        let _ = self.errors.send(err.clone());
    }

    /// Read the next batch and dispatch it.
    fn tick(&mut self) -> Result<()> {
        let batch = self.db.read(
            &self.stream_name,
            self.current_position + 1,
            self.config.messages_per_tick,
        )?;
        if !batch.is_empty() {
            debug!(subscriber = %self.subscriber_id, count = batch.len(), "processing batch");
        }
        self.process_batch(&batch)
    }

    fn process_batch(&mut self, batch: &[Message]) -> Result<()> {
        let unsubscriber = &self.unsubscriber;
        for message in batch {
            let position = message.read_cursor(self.by_category);
            match self.handlers.get_mut(&message.message_type) {
                Some(handler) => {
                    handler(
                        message,
                        &Dispatch {
                            subscriber_id: &self.subscriber_id,
                            unsubscriber,
                        },
                    );
                    self.current_position = position;
                    self.since_checkpoint += 1;
                    if self.since_checkpoint >= self.config.position_update_interval {
                        write_position(&self.db, &self.position_stream, position)?;
                        self.since_checkpoint = 0;
                    }
                }
                None => self.current_position = position,
            }
        }
        Ok(())
    }
}

/// Persist a checkpoint. Positions below 1 mean no real progress was made.
fn write_position<C: Connection>(
    db: &MessageDb<C>,
    position_stream: &str,
    position: i64,
) -> Result<()> {
    if position < 1 {
        return Err(MessageDbError::InvalidPosition(position));
    }

    let mut data = Payload::new();
    data.insert(POSITION_KEY.to_string(), json!(position));
    let mut checkpoint = Message::new(position_stream, CHECKPOINT_TYPE).with_data(data);
    db.write(&mut checkpoint)?;

    debug!(stream = %position_stream, position, "wrote checkpoint");
    Ok(())
}

fn checkpoint_position(message: &Message) -> Option<i64> {
    let value = message.data.get(POSITION_KEY)?;
    value.as_i64().or_else(|| value.as_f64().map(|p| p as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;

    fn write_messages(db: &MessageDb<MemoryStore>, messages: &[(&str, &str)]) {
        for (stream, message_type) in messages {
            db.write(&mut Message::new(*stream, *message_type)).unwrap();
        }
    }

    fn poller(
        db: &MessageDb<MemoryStore>,
        stream: &str,
        handlers: Handlers,
        config: SubscriptionConfig,
    ) -> Poller<MemoryStore> {
        let subscription =
            Subscription::new(db.clone(), stream.to_string(), "test".to_string(), handlers, config)
                .unwrap();
        let mut poller = Poller::new(subscription, unbounded().0);
        poller.load_position().unwrap();
        poller
    }

    fn checkpoints(db: &MessageDb<MemoryStore>) -> Vec<i64> {
        db.read_all("subscriberPosition-test")
            .unwrap()
            .iter()
            .map(|m| checkpoint_position(m).unwrap())
            .collect()
    }

    #[test]
    fn test_dispatches_only_registered_types() {
        let db = MessageDb::new(MemoryStore::new());
        write_messages(
            &db,
            &[("stream-1", "type"), ("stream-1", "other"), ("stream-2", "type")],
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handlers = Handlers::new().on("type", move |m: &Message, _: &Dispatch<'_>| {
            recorded.lock().push(m.global_position)
        });

        let mut poller = poller(&db, "stream", handlers, SubscriptionConfig::default());
        poller.tick().unwrap();

        assert_eq!(*seen.lock(), vec![1, 3]);
        assert_eq!(poller.current_position, 3);
        assert_eq!(poller.since_checkpoint, 2);
    }

    #[test]
    fn test_checkpoint_every_interval() {
        let db = MessageDb::new(MemoryStore::new());
        for i in 0..198 {
            db.write(&mut Message::new(format!("stream-{}", i % 3), "type"))
                .unwrap();
        }

        let handlers = Handlers::new().on("type", |_, _| {});
        let mut poller = poller(&db, "stream", handlers, SubscriptionConfig::default());

        poller.tick().unwrap();
        assert_eq!(checkpoints(&db), vec![99]);
        poller.tick().unwrap();
        assert_eq!(checkpoints(&db), vec![99, 198]);
        assert_eq!(poller.since_checkpoint, 0);
    }

    #[test]
    fn test_skipped_messages_do_not_count_towards_checkpoint() {
        let db = MessageDb::new(MemoryStore::new());
        write_messages(
            &db,
            &[("stream-1", "other"), ("stream-1", "type"), ("stream-1", "other")],
        );

        let handlers = Handlers::new().on("type", |_, _| {});
        let config = SubscriptionConfig::default().with_position_update_interval(2);
        let mut poller = poller(&db, "stream", handlers, config);

        poller.tick().unwrap();
        assert!(checkpoints(&db).is_empty());
        assert_eq!(poller.since_checkpoint, 1);
        assert_eq!(poller.current_position, 3);
    }

    #[test]
    fn test_resumes_from_checkpoint() {
        let db = MessageDb::new(MemoryStore::new());
        write_position(&db, "subscriberPosition-test", 42).unwrap();

        let poller = poller(&db, "stream", Handlers::new(), SubscriptionConfig::default());
        assert_eq!(poller.current_position, 42);
    }

    #[test]
    fn test_checkpoint_without_position_starts_at_zero() {
        let db = MessageDb::new(MemoryStore::new());
        db.write(&mut Message::new("subscriberPosition-test", CHECKPOINT_TYPE))
            .unwrap();

        let poller = poller(&db, "stream", Handlers::new(), SubscriptionConfig::default());
        assert_eq!(poller.current_position, 0);
    }

    #[test]
    fn test_invalid_checkpoint_position() {
        let db = MessageDb::new(MemoryStore::new());
        assert_eq!(
            write_position(&db, "subscriberPosition-test", 0),
            Err(MessageDbError::InvalidPosition(0))
        );
        assert!(checkpoints(&db).is_empty());
    }

    #[test]
    fn test_handler_can_unsubscribe() {
        let db = MessageDb::new(MemoryStore::new());
        write_messages(&db, &[("stream-1", "type"), ("stream-1", "type")]);

        let handlers = Handlers::new().on("type", |_, dispatch| dispatch.unsubscribe());
        let mut poller = poller(&db, "stream", handlers, SubscriptionConfig::default());

        poller.tick().unwrap();
        assert!(poller.is_unsubscribed());
        // The in-flight tick still completes.
        assert_eq!(poller.current_position, 2);
    }

    #[test]
    fn test_construction_requires_names() {
        let db = MessageDb::new(MemoryStore::new());
        let result = Subscription::new(
            db.clone(),
            "stream".into(),
            String::new(),
            Handlers::new(),
            SubscriptionConfig::default(),
        );
        assert!(matches!(result, Err(MessageDbError::SubscriberIdRequired)));

        let result = Subscription::new(
            db,
            String::new(),
            "test".into(),
            Handlers::new(),
            SubscriptionConfig::default(),
        );
        assert!(matches!(result, Err(MessageDbError::StreamNameRequired)));
    }
}

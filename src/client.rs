//! Read and write operations against the message store.

use crate::error::{MessageDbError, Result};
use crate::store::{Connection, WriteMessage};
use crate::stream_name;
use crate::subscriptions::{Handlers, Subscription, SubscriptionConfig};
use crate::types::{encode_payload, Message, MessageRow};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::warn;
use uuid::Uuid;

/// Page size used by [`MessageDb::read_all`].
pub const READ_ALL_PAGE_SIZE: usize = 1000;

/// Tail of the store's optimistic-concurrency error text.
static VERSION_CONFLICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*Wrong.*Stream Version: (\d+)\)$").unwrap());

/// Client for the message store.
///
/// Holds nothing but a shared connection handle, so clones are cheap and can
/// be used from several subscriptions at once.
pub struct MessageDb<C> {
    connection: Arc<C>,
}

impl<C> Clone for MessageDb<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C: Connection> MessageDb<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Read a batch of messages, oldest first.
    ///
    /// Entity streams (`category-id`) are read through the stream path and
    /// `position` is a stream position; category names read every entity
    /// stream of the category and `position` is a global position.
    pub fn read(&self, stream_name: &str, position: i64, batch_size: usize) -> Result<Vec<Message>> {
        let rows = if stream_name::is_category(stream_name) {
            self.connection
                .get_category_messages(stream_name, position, batch_size)?
        } else {
            self.connection
                .get_stream_messages(stream_name, position, batch_size)?
        };
        rows.into_iter().map(Message::try_from).collect()
    }

    /// Read a whole stream or category by paging through [`read`](Self::read).
    ///
    /// A page shorter than [`READ_ALL_PAGE_SIZE`] ends the scan. There is no
    /// snapshot: messages written below the already-read watermark during the
    /// scan are not seen.
    pub fn read_all(&self, stream_name: &str) -> Result<Vec<Message>> {
        let by_category = stream_name::is_category(stream_name);
        let mut messages = Vec::new();
        let mut position = 0;

        loop {
            let page = self.read(stream_name, position, READ_ALL_PAGE_SIZE)?;
            let page_len = page.len();

            if let Some(last) = page.last() {
                position = last.read_cursor(by_category) + 1;
            }
            messages.extend(page);

            if page_len < READ_ALL_PAGE_SIZE {
                return Ok(messages);
            }
        }
    }

    /// The most recent message of a stream, or `None` when it is empty.
    pub fn read_last(&self, stream_name: &str) -> Result<Option<Message>> {
        self.connection
            .get_last_stream_message(stream_name)?
            .map(Message::try_from)
            .transpose()
    }

    /// Position of the last message in a stream, `None` for an empty stream.
    pub fn stream_version(&self, stream_name: &str) -> Result<Option<i64>> {
        Ok(self
            .connection
            .get_last_stream_message(stream_name)?
            .map(|row: MessageRow| row.position))
    }

    /// Write a message, returning the position it was assigned.
    ///
    /// Assigns an id when the message has none. A write rejected because the
    /// stream is not at `expected_version` fails with
    /// [`MessageDbError::VersionConflict`].
    pub fn write(&self, message: &mut Message) -> Result<i64> {
        if message.stream_name.is_empty() {
            return Err(MessageDbError::StreamNameRequired);
        }
        if message.message_type.is_empty() {
            return Err(MessageDbError::TypeRequired);
        }

        let id = *message.id.get_or_insert_with(Uuid::new_v4);
        let data = encode_payload(&message.data)?;
        let metadata = encode_payload(&message.metadata)?;

        let mut tx = self.connection.begin()?;
        let written = tx.write_message(WriteMessage {
            id,
            stream_name: &message.stream_name,
            message_type: &message.message_type,
            data: data.as_deref(),
            metadata: metadata.as_deref(),
            expected_version: message.expected_version,
        });

        match written {
            Ok(position) => {
                tx.commit()?;
                Ok(position)
            }
            Err(err) => {
                tx.rollback()?;
                Err(classify_write_error(err, message))
            }
        }
    }

    /// Create an idle subscription with the default polling configuration.
    pub fn create_subscription(
        &self,
        stream_name: impl Into<String>,
        subscriber_id: impl Into<String>,
        handlers: Handlers,
    ) -> Result<Subscription<C>> {
        self.create_subscription_with_config(
            stream_name,
            subscriber_id,
            handlers,
            SubscriptionConfig::default(),
        )
    }

    pub fn create_subscription_with_config(
        &self,
        stream_name: impl Into<String>,
        subscriber_id: impl Into<String>,
        handlers: Handlers,
        config: SubscriptionConfig,
    ) -> Result<Subscription<C>> {
        Subscription::new(self.clone(), stream_name.into(), subscriber_id.into(), handlers, config)
    }
}

/// Turn the store's textual version-conflict failure into a structured one.
/// Every other failure is returned unchanged.
fn classify_write_error(err: MessageDbError, message: &Message) -> MessageDbError {
    let actual_version = match &err {
        MessageDbError::Store(text) => parse_actual_version(text),
        _ => None,
    };
    let Some(actual_version) = actual_version else {
        return err;
    };

    warn!(
        stream = %message.stream_name,
        expected = ?message.expected_version,
        actual = actual_version,
        "version conflict"
    );

    MessageDbError::VersionConflict {
        stream_name: message.stream_name.clone(),
        actual_version,
        expected_version: message.expected_version,
    }
}

fn parse_actual_version(text: &str) -> Option<i64> {
    VERSION_CONFLICT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

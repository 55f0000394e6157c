//! Store interface consumed by the client.
//!
//! The message store itself is external. The client only needs its four
//! primitives:
//! - `get_category_messages(category, position, batch_size)`
//! - `get_stream_messages(stream_name, position, batch_size)`
//! - `get_last_stream_message(stream_name)`
//! - `write_message(id, stream_name, type, data, metadata, expected_version)`
//!
//! Backends report failures as [`MessageDbError::Store`] carrying the
//! store's own error text; the client classifies version conflicts from it.
//!
//! [`MessageDbError::Store`]: crate::error::MessageDbError::Store

pub mod memory;

use crate::error::Result;
use crate::types::MessageRow;
use std::sync::Arc;
use uuid::Uuid;

pub use memory::MemoryStore;

/// Arguments of the store's `write_message` primitive.
#[derive(Clone, Debug)]
pub struct WriteMessage<'a> {
    pub id: Uuid,
    pub stream_name: &'a str,
    pub message_type: &'a str,
    pub data: Option<&'a str>,
    pub metadata: Option<&'a str>,
    pub expected_version: Option<i64>,
}

/// Handle to the message store.
pub trait Connection: Send + Sync {
    /// Messages from every stream of `category` with global position at or
    /// after `position`, oldest first.
    fn get_category_messages(
        &self,
        category: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>>;

    /// Messages of exactly `stream_name` with position at or after
    /// `position`, oldest first.
    fn get_stream_messages(
        &self,
        stream_name: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>>;

    fn get_last_stream_message(&self, stream_name: &str) -> Result<Option<MessageRow>>;

    /// Start a write transaction.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// A write transaction. Dropping it without committing discards its writes.
pub trait Transaction {
    /// Write one message, returning the position it was assigned in its stream.
    fn write_message(&mut self, message: WriteMessage<'_>) -> Result<i64>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn get_category_messages(
        &self,
        category: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        (**self).get_category_messages(category, position, batch_size)
    }

    fn get_stream_messages(
        &self,
        stream_name: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        (**self).get_stream_messages(stream_name, position, batch_size)
    }

    fn get_last_stream_message(&self, stream_name: &str) -> Result<Option<MessageRow>> {
        (**self).get_last_stream_message(stream_name)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        (**self).begin()
    }
}

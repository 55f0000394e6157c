//! In-process message store.
//!
//! Implements the store primitives with the same observable contract as the
//! external store: per-stream positions start at 0, global positions start
//! at 1, and optimistic-concurrency failures are reported as text.

use crate::error::{MessageDbError, Result};
use crate::store::{Connection, Transaction, WriteMessage};
use crate::stream_name;
use crate::types::{MessageRow, Timestamp};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    /// All messages, ordered by global position.
    messages: Vec<MessageRow>,

    /// Stream name to indices into `messages`.
    streams: HashMap<String, Vec<usize>>,

    ids: HashSet<Uuid>,
}

impl Inner {
    fn stream_version(&self, stream_name: &str) -> Option<i64> {
        self.streams
            .get(stream_name)
            .and_then(|indices| indices.last())
            .map(|&i| self.messages[i].position)
    }

    fn push(&mut self, row: MessageRow) {
        let index = self.messages.len();
        self.ids.insert(row.id);
        self.streams
            .entry(row.stream_name.clone())
            .or_default()
            .push(index);
        self.messages.push(row);
    }
}

/// Message store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed messages.
    pub fn message_count(&self) -> usize {
        self.inner.read().messages.len()
    }
}

impl Connection for MemoryStore {
    fn get_category_messages(
        &self,
        category: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.global_position >= position)
            .filter(|m| stream_name::category(&m.stream_name) == category)
            .take(batch_size)
            .cloned()
            .collect())
    }

    fn get_stream_messages(
        &self,
        stream_name: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        let inner = self.inner.read();
        let Some(indices) = inner.streams.get(stream_name) else {
            return Ok(Vec::new());
        };
        Ok(indices
            .iter()
            .map(|&i| &inner.messages[i])
            .filter(|m| m.position >= position)
            .take(batch_size)
            .cloned()
            .collect())
    }

    fn get_last_stream_message(&self, stream_name: &str) -> Result<Option<MessageRow>> {
        let inner = self.inner.read();
        Ok(inner
            .streams
            .get(stream_name)
            .and_then(|indices| indices.last())
            .map(|&i| inner.messages[i].clone()))
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.write(),
            pending: Vec::new(),
        }))
    }
}

/// Write transaction holding the store's write lock until it ends.
struct MemoryTransaction<'a> {
    inner: RwLockWriteGuard<'a, Inner>,
    pending: Vec<MessageRow>,
}

impl MemoryTransaction<'_> {
    fn stream_version(&self, stream_name: &str) -> Option<i64> {
        self.pending
            .iter()
            .rev()
            .find(|m| m.stream_name == stream_name)
            .map(|m| m.position)
            .or_else(|| self.inner.stream_version(stream_name))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn write_message(&mut self, message: WriteMessage<'_>) -> Result<i64> {
        if self.inner.ids.contains(&message.id) || self.pending.iter().any(|m| m.id == message.id) {
            return Err(MessageDbError::Store(format!(
                "duplicate key value violates unique constraint \"messages_id\": Key (id)=({}) already exists.",
                message.id
            )));
        }

        let version = self.stream_version(message.stream_name);
        if let Some(expected) = message.expected_version {
            let actual = version.unwrap_or(-1);
            if expected != actual {
                return Err(MessageDbError::Store(format!(
                    "Wrong expected version: {} (Stream: {}, Stream Version: {})",
                    expected, message.stream_name, actual
                )));
            }
        }

        let position = version.map_or(0, |v| v + 1);
        let global_position = (self.inner.messages.len() + self.pending.len()) as i64 + 1;

        self.pending.push(MessageRow {
            id: message.id,
            stream_name: message.stream_name.to_string(),
            message_type: message.message_type.to_string(),
            position,
            global_position,
            data: message.data.map(str::to_string),
            metadata: message.metadata.map(str::to_string),
            time: Timestamp::now(),
        });

        Ok(position)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        for row in std::mem::take(&mut self.pending) {
            self.inner.push(row);
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

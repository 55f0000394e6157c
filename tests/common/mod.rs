//! Recording, fault-injecting connection shared by the integration tests.

#![allow(dead_code)]

use messagedb::{
    Connection, MemoryStore, MessageDbError, MessageRow, Result, Transaction, WriteMessage,
};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One call made against the store.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Category {
        name: String,
        position: i64,
        batch_size: usize,
        returned: usize,
    },
    Stream {
        name: String,
        position: i64,
        batch_size: usize,
        returned: usize,
    },
    Last {
        name: String,
    },
    Begin,
    Write {
        stream_name: String,
        message_type: String,
        data: Option<String>,
        metadata: Option<String>,
        expected_version: Option<i64>,
    },
    Commit,
    Rollback,
}

/// Wraps a [`MemoryStore`], recording every call and optionally failing
/// reads or writes with a given store error text.
#[derive(Default)]
pub struct RecordingConnection {
    store: MemoryStore,
    calls: Mutex<Vec<Call>>,
    read_error: Mutex<Option<String>>,
    write_error: Mutex<Option<String>>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_reads_with(&self, text: &str) {
        *self.read_error.lock() = Some(text.to_string());
    }

    pub fn fail_writes_with(&self, text: &str) {
        *self.write_error.lock() = Some(text.to_string());
    }

    pub fn category_reads(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Category { .. }))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check_read(&self) -> Result<()> {
        match &*self.read_error.lock() {
            Some(text) => Err(MessageDbError::Store(text.clone())),
            None => Ok(()),
        }
    }
}

impl Connection for RecordingConnection {
    fn get_category_messages(
        &self,
        category: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        self.check_read()?;
        let rows = self.store.get_category_messages(category, position, batch_size)?;
        self.record(Call::Category {
            name: category.to_string(),
            position,
            batch_size,
            returned: rows.len(),
        });
        Ok(rows)
    }

    fn get_stream_messages(
        &self,
        stream_name: &str,
        position: i64,
        batch_size: usize,
    ) -> Result<Vec<MessageRow>> {
        self.check_read()?;
        let rows = self.store.get_stream_messages(stream_name, position, batch_size)?;
        self.record(Call::Stream {
            name: stream_name.to_string(),
            position,
            batch_size,
            returned: rows.len(),
        });
        Ok(rows)
    }

    fn get_last_stream_message(&self, stream_name: &str) -> Result<Option<MessageRow>> {
        self.check_read()?;
        self.record(Call::Last {
            name: stream_name.to_string(),
        });
        self.store.get_last_stream_message(stream_name)
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        self.record(Call::Begin);
        Ok(Box::new(RecordingTransaction {
            connection: self,
            inner: self.store.begin()?,
        }))
    }
}

struct RecordingTransaction<'a> {
    connection: &'a RecordingConnection,
    inner: Box<dyn Transaction + 'a>,
}

impl Transaction for RecordingTransaction<'_> {
    fn write_message(&mut self, message: WriteMessage<'_>) -> Result<i64> {
        self.connection.record(Call::Write {
            stream_name: message.stream_name.to_string(),
            message_type: message.message_type.to_string(),
            data: message.data.map(str::to_string),
            metadata: message.metadata.map(str::to_string),
            expected_version: message.expected_version,
        });
        if let Some(text) = self.connection.write_error.lock().clone() {
            return Err(MessageDbError::Store(text));
        }
        self.inner.write_message(message)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.connection.record(Call::Commit);
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        self.connection.record(Call::Rollback);
        self.inner.rollback()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

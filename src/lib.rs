//! High-throughput structured binary logging.
//!
//! Writers serialize events into per-writer lock-free byte queues; a
//! [`Session`] drains the queues and emits a self-describing binary stream
//! with metadata always ahead of the events referencing it; an
//! [`EventStream`] decodes that stream offline. Formatting never happens on
//! the logging thread.

pub mod channel;
pub mod clock;
pub mod codec;
pub mod entries;
pub mod error;
pub mod event_stream;
pub mod session;
pub mod session_writer;
pub mod spsc_queue;

pub use channel::Channel;
pub use entries::{ClockSync, EventSource, Severity, WriterProp};
pub use error::{Error, Result};
pub use event_stream::{Event, EventStream};
pub use session::{default_session, ConsumeResult, Session};
pub use session_writer::SessionWriter;
pub use spsc_queue::ByteQueue;

use std::io::{self, Write};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::channel::Channel;
use crate::clock::clock_sync;
use crate::codec::{write_size_prefixed_tagged, Encode};
use crate::entries::{EventSource, Severity, WriterProp, CLOCK_SYNC_TAG, EVENT_SOURCE_TAG, WRITER_PROP_TAG};

/// Describes the work done by one consume or metadata-replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeResult {
    /// Bytes written to the output stream by this call.
    pub bytes_consumed: usize,
    /// Bytes written to the output stream over the lifetime of the session.
    pub total_bytes_consumed: usize,
    /// Channels polled for log data.
    pub channels_polled: usize,
    /// Channels removed because they were closed and empty.
    pub channels_removed: usize,
}

/// A concurrently writable, single-consumer log stream broker.
///
/// The session owns the data channels and the event-source metadata. Writers
/// register sources and push serialized events through their channels; the
/// consumer calls [`consume`](Session::consume) to move everything into an
/// output stream, with metadata ordered ahead of any event referencing it.
pub struct Session {
    state: Mutex<State>,
    /// Advisory filter level; writers are encouraged, not required, to skip
    /// events below it.
    min_severity: AtomicU16,
}

struct State {
    channels: Vec<Arc<Channel>>,
    /// Append-only; indices below `num_consumed_sources` are already in the
    /// output stream.
    sources: Vec<EventSource>,
    num_consumed_sources: usize,
    next_source_id: u64,
    total_consumed_bytes: usize,
    /// Staging area so the sink always receives whole special entries.
    scratch: Vec<u8>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                channels: Vec::new(),
                sources: Vec::new(),
                num_consumed_sources: 0,
                next_source_id: 1,
                total_consumed_bytes: 0,
                scratch: Vec::new(),
            }),
            min_severity: AtomicU16::new(Severity::Trace as u16),
        }
    }

    /// Creates a channel with a queue of `queue_capacity` bytes.
    ///
    /// The session keeps ownership: the channel is disposed by the next
    /// `consume` pass that finds it closed and empty. The returned handle is
    /// the producer's reference; it stays valid for the producer but goes
    /// stale once the session drops the channel.
    pub fn create_channel(&self, queue_capacity: usize, writer_prop: WriterProp) -> Arc<Channel> {
        let channel = Arc::new(Channel::new(queue_capacity, writer_prop));
        self.state.lock().channels.push(Arc::clone(&channel));
        channel
    }

    /// Thread-safe way to set the writer id of `channel`.
    pub fn set_channel_writer_id(&self, channel: &Channel, id: u64) {
        channel.writer_prop().id = id;
    }

    /// Thread-safe way to set the writer name of `channel`.
    pub fn set_channel_writer_name(&self, channel: &Channel, name: &str) {
        channel.writer_prop().name = name.to_owned();
    }

    /// Registers `source` and returns the id assigned to it.
    ///
    /// Ids start at 1 and never repeat. Any event added after this call
    /// returns is guaranteed to be consumed after the source entry.
    pub fn add_event_source(&self, mut source: EventSource) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_source_id;
        source.id = id;
        state.sources.push(source);
        state.next_source_id += 1;
        id
    }

    /// Severity below which writers should not add events. Advisory only.
    pub fn min_severity(&self) -> Severity {
        // only ever stores Severity discriminants, so the conversion holds
        Severity::try_from(self.min_severity.load(Ordering::Acquire))
            .unwrap_or(Severity::Trace)
    }

    pub fn set_min_severity(&self, severity: Severity) {
        self.min_severity.store(severity as u16, Ordering::Release);
    }

    /// Moves metadata and data from the session to `out`.
    ///
    /// The first pass ever emits a ClockSync. Then every not-yet-consumed
    /// EventSource goes out, then each channel is polled once: non-empty
    /// queues are drained behind a WriterProp entry whose `batch_size` equals
    /// the event bytes that follow. Closed and empty channels are removed.
    ///
    /// Events from different channels may interleave at batch granularity;
    /// events from one channel always keep their order.
    pub fn consume<W: Write>(&self, out: &mut W) -> io::Result<ConsumeResult> {
        // This lock:
        //  - ensures only a single consumer runs at a time
        //  - ensures safe access to the channel list and the source table
        //  - blocks add_event_source for the whole pass
        //
        // The last point is load-bearing. Without it, this interleaving
        // becomes possible:
        //  - consumer finishes the source loop below
        //  - writer A registers source S
        //  - writer B observes S registered and enqueues an event using it
        //  - consumer drains B's queue
        // and the stream now holds an event whose source the reader has
        // never seen. Holding the lock across both the registration and the
        // whole pass closes the window.
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut result = ConsumeResult::default();

        // a clock sync opens the stream
        if state.total_consumed_bytes == 0 {
            result.bytes_consumed +=
                write_special(&mut state.scratch, CLOCK_SYNC_TAG, &clock_sync(), out)?;
        }

        // sources go out before any event that may reference them
        while state.num_consumed_sources < state.sources.len() {
            let idx = state.num_consumed_sources;
            result.bytes_consumed +=
                write_special(&mut state.scratch, EVENT_SOURCE_TAG, &state.sources[idx], out)?;
            state.num_consumed_sources += 1;
        }

        // poll each channel once
        let mut idx = 0;
        while idx < state.channels.len() {
            let channel = Arc::clone(&state.channels[idx]);

            // Sampling closed *before* the read matters. The other order
            // admits: consumer finds the queue empty, the producer pushes
            // its last records and closes, the consumer sees closed and
            // removes the channel - losing those records. Closed observed
            // before an empty read means nothing can be published after.
            let was_closed = channel.is_closed();

            let batch = channel.queue().begin_read();
            if !batch.is_empty() {
                let prop = {
                    let mut prop = channel.writer_prop();
                    prop.batch_size = batch.len() as u64;
                    prop.clone()
                };
                result.bytes_consumed +=
                    write_special(&mut state.scratch, WRITER_PROP_TAG, &prop, out)?;

                // queue data is already framed record by record
                out.write_all(batch.first())?;
                out.write_all(batch.second())?;
                result.bytes_consumed += batch.len();
            }
            batch.release();

            if was_closed {
                // empty and closed: nothing can ever arrive, dispose
                state.channels.remove(idx);
                result.channels_removed += 1;
            } else {
                idx += 1;
            }
            result.channels_polled += 1;
        }

        state.total_consumed_bytes += result.bytes_consumed;
        result.total_bytes_consumed = state.total_consumed_bytes;

        Ok(result)
    }

    /// Re-emits already consumed metadata: a fresh ClockSync followed by
    /// every source `consume` has emitted so far, in id order.
    ///
    /// Useful when `out` changes at runtime (log rotation): replaying the
    /// metadata makes the new output self-contained. Sources not yet
    /// consumed are not emitted, and channels are not touched.
    pub fn reconsume_metadata<W: Write>(&self, out: &mut W) -> io::Result<ConsumeResult> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut result = ConsumeResult::default();

        result.bytes_consumed +=
            write_special(&mut state.scratch, CLOCK_SYNC_TAG, &clock_sync(), out)?;

        for idx in 0..state.num_consumed_sources {
            result.bytes_consumed +=
                write_special(&mut state.scratch, EVENT_SOURCE_TAG, &state.sources[idx], out)?;
        }

        state.total_consumed_bytes += result.bytes_consumed;
        result.total_bytes_consumed = state.total_consumed_bytes;

        Ok(result)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Stages one special entry in `scratch`, then hands it to the sink in a
/// single write so downstream never sees a partial entry.
fn write_special<T: Encode, W: Write>(
    scratch: &mut Vec<u8>,
    tag: u64,
    entry: &T,
    out: &mut W,
) -> io::Result<usize> {
    scratch.clear();
    let size = write_size_prefixed_tagged(tag, entry, scratch)?;
    out.write_all(scratch)?;
    Ok(size)
}

lazy_static! {
    static ref DEFAULT_SESSION: Arc<Session> = Arc::new(Session::new());
}

/// The process-wide session, for programs that need only one.
pub fn default_session() -> Arc<Session> {
    Arc::clone(&DEFAULT_SESSION)
}

use std::io::{self, Write};
use std::sync::Arc;

use crate::channel::Channel;
use crate::codec::Encode;
use crate::entries::{WriterProp, SPECIAL_BIT};
use crate::session::Session;

/// Producer-side handle: owns one channel of a session and serializes
/// complete event records into it.
///
/// One writer per thread is the intended shape; a writer is `Send` but its
/// methods take `&mut self`, keeping the channel single-producer. Dropping
/// the writer closes the channel; whatever is still queued gets drained by
/// the next consume pass, after which the session disposes of the channel.
pub struct SessionWriter {
    session: Arc<Session>,
    channel: Arc<Channel>,
}

impl SessionWriter {
    pub fn new(session: Arc<Session>, queue_capacity: usize) -> Self {
        Self::with_name(session, queue_capacity, 0, "")
    }

    pub fn with_name(session: Arc<Session>, queue_capacity: usize, id: u64, name: &str) -> Self {
        let channel = session.create_channel(
            queue_capacity,
            WriterProp {
                id,
                name: name.to_owned(),
                batch_size: 0,
            },
        );
        Self { session, channel }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn set_id(&mut self, id: u64) {
        self.session.set_channel_writer_id(&self.channel, id);
    }

    pub fn set_name(&mut self, name: &str) {
        self.session.set_channel_writer_name(&self.channel, name);
    }

    /// Serializes one event record into the channel's queue.
    ///
    /// Returns `false` when the queue cannot hold the record; the event is
    /// dropped and the channel stays usable. Callers wanting a different
    /// policy (block, or close and reopen a larger channel) build it on top
    /// of this return value.
    ///
    /// `source_id` must come from `Session::add_event_source`, called before
    /// this - that ordering is what lets the consumer put the source entry
    /// ahead of the event in the stream.
    pub fn add_event<A: Encode + ?Sized>(
        &mut self,
        source_id: u64,
        clock_value: u64,
        args: &A,
    ) -> bool {
        debug_assert_eq!(source_id & SPECIAL_BIT, 0, "source ids fit in 63 bits");

        let payload_size = 8 + 8 + args.serialized_size();
        let record_size = 4 + payload_size;

        let Some(mut grant) = self.channel.queue().begin_write(record_size) else {
            return false;
        };

        let filled = {
            let mut cursor: &mut [u8] = &mut grant;
            write_record(payload_size as u32, source_id, clock_value, args, &mut cursor).is_ok()
        };
        if filled {
            grant.commit(record_size);
        }
        filled
    }
}

impl Drop for SessionWriter {
    fn drop(&mut self) {
        self.channel.close();
    }
}

fn write_record<A: Encode + ?Sized>(
    size: u32,
    source_id: u64,
    clock_value: u64,
    args: &A,
    out: &mut impl Write,
) -> io::Result<()> {
    size.encode(out)?;
    source_id.encode(out)?;
    clock_value.encode(out)?;
    args.encode(out)
}

/// Registers the call site as an event source on first use, then adds one
/// event - but only when `severity` passes the session's advisory filter.
/// Arguments are not evaluated for filtered-out events.
///
/// Evaluates to the `add_event` result (`true` when the event was queued or
/// filtered, `false` when the queue was full).
///
/// ```
/// # use binstream::{log_event, Session, SessionWriter, Severity};
/// # use std::sync::Arc;
/// let session = Arc::new(Session::new());
/// let mut writer = SessionWriter::new(Arc::clone(&session), 4096);
/// log_event!(writer, Severity::Info, "net", "peer {} sent {} bytes", "10.0.0.1", 512u64);
/// ```
#[macro_export]
macro_rules! log_event {
    ($writer:expr, $severity:expr, $category:expr, $format:expr $(, $arg:expr)* $(,)?) => {{
        let writer = &mut $writer;
        let severity = $severity;
        if severity >= writer.session().min_severity() {
            let args = ($($arg,)*);
            static SOURCE_ID: ::std::sync::OnceLock<u64> = ::std::sync::OnceLock::new();
            let source_id = *SOURCE_ID.get_or_init(|| {
                writer.session().add_event_source($crate::entries::EventSource {
                    id: 0,
                    severity,
                    category: ::std::string::String::from($category),
                    function: ::std::string::String::from(::std::module_path!()),
                    file: ::std::string::String::from(::std::file!()),
                    line: u64::from(::std::line!()),
                    format_string: ::std::string::String::from($format),
                    argument_tags: $crate::session_writer::type_tag_of(&args),
                })
            });
            writer.add_event(source_id, $crate::clock::ticks_now(), &args)
        } else {
            true
        }
    }};
}

/// Tag string of a value's type, for `argument_tags`. Used by [`log_event!`].
#[doc(hidden)]
pub fn type_tag_of<T: Encode>(_: &T) -> String {
    T::type_tag().into_owned()
}

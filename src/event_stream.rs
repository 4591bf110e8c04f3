use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};

use crate::codec::Decode;
use crate::entries::{
    ClockSync, EventSource, WriterProp, CLOCK_SYNC_TAG, EVENT_SOURCE_TAG, SPECIAL_BIT,
    WRITER_PROP_TAG,
};
use crate::error::{Error, Result};

const DEFAULT_MAX_RECORD_SIZE: u64 = 1 << 30;

/// One decoded log event.
///
/// `arguments` is the raw serialized argument payload; the source's
/// `argument_tags` string describes how to interpret it.
#[derive(Debug)]
pub struct Event<'a> {
    pub source: &'a EventSource,
    pub clock_value: u64,
    pub arguments: &'a [u8],
}

/// Decodes a binary log stream one event at a time, transparently absorbing
/// the metadata entries interleaved with the events.
///
/// The stream keeps the event-source table plus the current writer and
/// clock-sync context. A malformed record never poisons later decoding:
/// state is only updated after a record deserialized completely, and every
/// error leaves the input positioned so that the next call can continue.
pub struct EventStream {
    sources: HashMap<u64, EventSource>,
    writer_prop: WriterProp,
    clock_sync: ClockSync,
    /// Scratch holding the record currently being decoded.
    buffer: Vec<u8>,
    max_record_size: u64,
}

impl EventStream {
    pub fn new() -> Self {
        Self::with_max_record_size(DEFAULT_MAX_RECORD_SIZE)
    }

    /// Caps the size any single record may announce, bounding the scratch
    /// buffer on corrupt input. Oversized records are skipped and reported.
    pub fn with_max_record_size(limit: u64) -> Self {
        Self {
            sources: HashMap::new(),
            writer_prop: WriterProp::default(),
            clock_sync: ClockSync::default(),
            buffer: Vec::new(),
            max_record_size: limit,
        }
    }

    /// The writer description governing the most recently decoded events,
    /// i.e. the last WriterProp entry seen.
    pub fn writer_prop(&self) -> &WriterProp {
        &self.writer_prop
    }

    /// The most recent clock sync; translates event clock values.
    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    /// Source table accumulated so far, keyed by id.
    pub fn sources(&self) -> &HashMap<u64, EventSource> {
        &self.sources
    }

    /// Decodes records until an event comes up and returns it; `Ok(None)` on
    /// clean end of input.
    ///
    /// Known special entries update the reader's context, unknown ones are
    /// skipped for forward compatibility. On an error the offending record
    /// has either been consumed (decode failures, unknown source ids,
    /// oversized records) or the input was rewound to the record boundary
    /// (truncation), so calling again resumes with the next record.
    pub fn next_event<R: Read + Seek>(&mut self, input: &mut R) -> Result<Option<Event<'_>>> {
        let (source_id, clock_value, args_at) = loop {
            let Some(()) = self.next_record(input)? else {
                return Ok(None);
            };

            let mut cursor = self.buffer.as_slice();
            let tag = u64::decode(&mut cursor).ok_or(Error::Decode("record"))?;

            if tag & SPECIAL_BIT != 0 {
                match tag {
                    EVENT_SOURCE_TAG => {
                        let source =
                            EventSource::decode(&mut cursor).ok_or(Error::Decode("EventSource"))?;
                        self.sources.insert(source.id, source);
                    }
                    WRITER_PROP_TAG => {
                        // decoded into a temporary: on failure the current
                        // writer prop stays intact
                        self.writer_prop =
                            WriterProp::decode(&mut cursor).ok_or(Error::Decode("WriterProp"))?;
                    }
                    CLOCK_SYNC_TAG => {
                        self.clock_sync =
                            ClockSync::decode(&mut cursor).ok_or(Error::Decode("ClockSync"))?;
                    }
                    // ignore unknown special entries, to be forward compatible
                    _ => {}
                }
            } else {
                if !self.sources.contains_key(&tag) {
                    return Err(Error::UnknownSource(tag));
                }
                let clock_value = u64::decode(&mut cursor).ok_or(Error::Decode("event"))?;
                break (tag, clock_value, self.buffer.len() - cursor.len());
            }
        };

        let source = self
            .sources
            .get(&source_id)
            .ok_or(Error::UnknownSource(source_id))?;

        Ok(Some(Event {
            source,
            clock_value,
            arguments: &self.buffer[args_at..],
        }))
    }

    /// Reads the next size-prefixed record into the scratch buffer.
    /// `Ok(None)` means clean EOF at a record boundary.
    fn next_record<R: Read + Seek>(&mut self, input: &mut R) -> Result<Option<()>> {
        let mut size_bytes = [0u8; 4];
        let got = read_full(input, &mut size_bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < size_bytes.len() {
            rewind(input, got)?;
            return Err(Error::ShortRead {
                got,
                expected: size_bytes.len(),
            });
        }

        let size = u64::from(u32::from_le_bytes(size_bytes));
        if size > self.max_record_size {
            // skip the body so the caller can keep going
            input.seek(SeekFrom::Current(size as i64))?;
            return Err(Error::OversizedRecord {
                size,
                limit: self.max_record_size,
            });
        }

        self.buffer.resize(size as usize, 0);
        let got = read_full(input, &mut self.buffer)?;
        if got < self.buffer.len() {
            rewind(input, size_bytes.len() + got)?;
            return Err(Error::ShortRead {
                got,
                expected: self.buffer.len(),
            });
        }

        Ok(Some(()))
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads until `buf` is full or the input is exhausted; returns the number
/// of bytes read. Unlike `read_exact`, a short read is reported by count,
/// not by an error with the buffer in an unspecified state.
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match input.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

fn rewind<R: Seek>(input: &mut R, n: usize) -> io::Result<()> {
    input.seek(SeekFrom::Current(-(n as i64)))?;
    Ok(())
}

use std::borrow::Cow;
use std::io::{self, Write};

use crate::codec::{Decode, Encode};

/// Tag bit that marks a record as a special (metadata) entry.
/// Tags without it are event-source ids, which are therefore < 2^63.
pub const SPECIAL_BIT: u64 = 1 << 63;

pub const EVENT_SOURCE_TAG: u64 = u64::MAX;
pub const WRITER_PROP_TAG: u64 = u64::MAX - 1;
pub const CLOCK_SYNC_TAG: u64 = u64::MAX - 2;

/// Event severity, ordered from most to least verbose.
///
/// Discriminants are spaced so intermediate levels can be added later
/// without renumbering the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Severity {
    Trace = 32,
    Debug = 64,
    Info = 96,
    Warning = 128,
    Error = 160,
    Critical = 192,
    /// Filter level that suppresses everything; never attached to an event.
    NoLogs = 255,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

impl TryFrom<u16> for Severity {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            32 => Ok(Severity::Trace),
            64 => Ok(Severity::Debug),
            96 => Ok(Severity::Info),
            128 => Ok(Severity::Warning),
            160 => Ok(Severity::Error),
            192 => Ok(Severity::Critical),
            255 => Ok(Severity::NoLogs),
            other => Err(other),
        }
    }
}

impl Encode for Severity {
    fn serialized_size(&self) -> usize {
        2
    }

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        (*self as u16).encode(out)
    }

    fn type_tag() -> Cow<'static, str> {
        <u16 as Encode>::type_tag()
    }
}

impl Decode for Severity {
    fn decode(input: &mut &[u8]) -> Option<Self> {
        Severity::try_from(u16::decode(input)?).ok()
    }
}

/// Immutable description of one logging site.
///
/// Created by the producer, stamped with an id by the session, then embedded
/// in the stream ahead of every event that references it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSource {
    /// Assigned by `Session::add_event_source`, starting at 1.
    pub id: u64,
    pub severity: Severity,
    pub category: String,
    pub function: String,
    pub file: String,
    pub line: u64,
    pub format_string: String,
    /// Compact type-tag string describing the argument payload; opaque here.
    pub argument_tags: String,
}

impl Encode for EventSource {
    fn serialized_size(&self) -> usize {
        self.id.serialized_size()
            + self.severity.serialized_size()
            + self.category.serialized_size()
            + self.function.serialized_size()
            + self.file.serialized_size()
            + self.line.serialized_size()
            + self.format_string.serialized_size()
            + self.argument_tags.serialized_size()
    }

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.id.encode(out)?;
        self.severity.encode(out)?;
        self.category.encode(out)?;
        self.function.encode(out)?;
        self.file.encode(out)?;
        self.line.encode(out)?;
        self.format_string.encode(out)?;
        self.argument_tags.encode(out)
    }

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("{EventSource`id'L`severity'S`category'[c`function'[c`file'[c`line'L`formatString'[c`argumentTags'[c}")
    }
}

impl Decode for EventSource {
    fn decode(input: &mut &[u8]) -> Option<Self> {
        Some(EventSource {
            id: u64::decode(input)?,
            severity: Severity::decode(input)?,
            category: String::decode(input)?,
            function: String::decode(input)?,
            file: String::decode(input)?,
            line: u64::decode(input)?,
            format_string: String::decode(input)?,
            argument_tags: String::decode(input)?,
        })
    }
}

/// Mutable description of one producer, emitted ahead of each batch its
/// channel contributes to the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterProp {
    pub id: u64,
    pub name: String,
    /// Number of event bytes immediately following this entry in the stream.
    /// Written by the consumer during a drain.
    pub batch_size: u64,
}

impl Encode for WriterProp {
    fn serialized_size(&self) -> usize {
        self.id.serialized_size() + self.name.serialized_size() + self.batch_size.serialized_size()
    }

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.id.encode(out)?;
        self.name.encode(out)?;
        self.batch_size.encode(out)
    }

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("{WriterProp`id'L`name'[c`batchSize'L}")
    }
}

impl Decode for WriterProp {
    fn decode(input: &mut &[u8]) -> Option<Self> {
        Some(WriterProp {
            id: u64::decode(input)?,
            name: String::decode(input)?,
            batch_size: u64::decode(input)?,
        })
    }
}

/// Correlates the producer tick clock with the wall clock, letting readers
/// translate event `clock_value`s into wall time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockSync {
    /// Tick clock reading at the sample point.
    pub clock_value: u64,
    /// Ticks per second of the clock behind `clock_value`.
    pub clock_frequency: u64,
    /// Wall clock at the same sample point, in nanoseconds since the epoch.
    pub ns_since_epoch: u64,
    /// Local timezone offset from UTC in seconds.
    pub tz_offset: i32,
    pub tz_name: String,
}

impl Encode for ClockSync {
    fn serialized_size(&self) -> usize {
        self.clock_value.serialized_size()
            + self.clock_frequency.serialized_size()
            + self.ns_since_epoch.serialized_size()
            + self.tz_offset.serialized_size()
            + self.tz_name.serialized_size()
    }

    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.clock_value.encode(out)?;
        self.clock_frequency.encode(out)?;
        self.ns_since_epoch.encode(out)?;
        self.tz_offset.encode(out)?;
        self.tz_name.encode(out)
    }

    fn type_tag() -> Cow<'static, str> {
        Cow::Borrowed("{ClockSync`clockValue'L`clockFrequency'L`nsSinceEpoch'L`tzOffset'i`tzName'[c}")
    }
}

impl Decode for ClockSync {
    fn decode(input: &mut &[u8]) -> Option<Self> {
        Some(ClockSync {
            clock_value: u64::decode(input)?,
            clock_frequency: u64::decode(input)?,
            ns_since_epoch: u64::decode(input)?,
            tz_offset: i32::decode(input)?,
            tz_name: String::decode(input)?,
        })
    }
}

use thiserror::Error;

/// Errors surfaced while decoding an event stream.
///
/// End of input is not an error: `EventStream::next_event` returns `Ok(None)`
/// on a clean record boundary. Queue-full on the producer side is not an
/// error either, it is the `false` return of `SessionWriter::add_event`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A size prefix or record body was truncated. The input has been
    /// rewound to the start of the offending record.
    #[error("truncated record: got {got} bytes, expected {expected}")]
    ShortRead { got: usize, expected: usize },

    /// An event referenced a source id that no EventSource entry announced.
    /// The record has been consumed; decoding can continue.
    #[error("event has invalid source id: {0}")]
    UnknownSource(u64),

    /// A known special entry failed to deserialize. The previously decoded
    /// entry of that kind is left untouched.
    #[error("malformed {0} entry")]
    Decode(&'static str),

    /// A record announced a size above the reader's cap. The record has been
    /// skipped; decoding can continue.
    #[error("record of {size} bytes exceeds the {limit} byte limit")]
    OversizedRecord { size: u64, limit: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

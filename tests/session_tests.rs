use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::thread;

use binstream::codec::Decode;
use binstream::entries::{CLOCK_SYNC_TAG, EVENT_SOURCE_TAG};
use binstream::{EventSource, EventStream, Session, SessionWriter, Severity, WriterProp};

fn test_source(category: &str, argument_tags: &str) -> EventSource {
    EventSource {
        id: 0,
        severity: Severity::Info,
        category: category.into(),
        function: "test".into(),
        file: "session_tests.rs".into(),
        line: 0,
        format_string: "{}".into(),
        argument_tags: argument_tags.into(),
    }
}

/// Splits a raw stream into `(tag, payload)` records.
fn scan_records(bytes: &[u8]) -> Vec<(u64, Vec<u8>)> {
    let mut records = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let size = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
        let tag = u64::from_le_bytes(rest[4..12].try_into().unwrap());
        records.push((tag, rest[12..4 + size].to_vec()));
        rest = &rest[4 + size..];
    }
    records
}

#[test]
fn stream_opens_with_a_clock_sync() {
    let session = Session::new();
    session.add_event_source(test_source("boot", ""));

    let mut bytes = Vec::new();
    session.consume(&mut bytes).unwrap();

    let records = scan_records(&bytes);
    assert_eq!(records[0].0, CLOCK_SYNC_TAG);
    assert_eq!(records[1].0, EVENT_SOURCE_TAG);
    assert_eq!(records.len(), 2);
}

#[test]
fn batches_attribute_events_to_their_writers() {
    const EVENTS_PER_WRITER: u64 = 10;

    let session = Arc::new(Session::new());
    let mut alpha = SessionWriter::with_name(Arc::clone(&session), 4096, 1, "alpha");
    let mut beta = SessionWriter::with_name(Arc::clone(&session), 4096, 2, "beta");

    let source = session.add_event_source(test_source("multi", "(L)"));

    for i in 0..EVENTS_PER_WRITER {
        assert!(alpha.add_event(source, i, &(i,)));
        assert!(beta.add_event(source, i, &(i + 100,)));
    }

    let mut bytes = Vec::new();
    let result = session.consume(&mut bytes).unwrap();
    assert_eq!(result.channels_polled, 2);

    // one event record: size || tag || clock || one u64 argument
    let event_bytes = (4 + 8 + 8 + 8) * EVENTS_PER_WRITER;

    let mut input = Cursor::new(bytes);
    let mut stream = EventStream::new();
    let mut per_writer: std::collections::HashMap<u64, Vec<u64>> = Default::default();

    while let Some(event) = stream.next_event(&mut input).unwrap() {
        let mut args = event.arguments;
        let (value,) = <(u64,)>::decode(&mut args).unwrap();

        let prop = stream.writer_prop();
        assert_eq!(prop.batch_size, event_bytes);
        per_writer.entry(prop.id).or_default().push(value);
    }

    assert_eq!(per_writer.len(), 2);
    assert_eq!(per_writer[&1], (0..EVENTS_PER_WRITER).collect::<Vec<_>>());
    assert_eq!(
        per_writer[&2],
        (100..100 + EVENTS_PER_WRITER).collect::<Vec<_>>()
    );
}

#[test]
fn metadata_replay_repeats_consumed_sources_only() {
    let session = Session::new();
    for category in ["a", "b", "c"] {
        session.add_event_source(test_source(category, ""));
    }

    let mut first = Vec::new();
    let consumed = session.consume(&mut first).unwrap();

    // registered after the consume pass: must not appear in the replay
    session.add_event_source(test_source("late", ""));

    let mut replay = Vec::new();
    let replayed = session.reconsume_metadata(&mut replay).unwrap();
    assert_eq!(
        replayed.total_bytes_consumed,
        consumed.total_bytes_consumed + replayed.bytes_consumed
    );
    assert_eq!(replayed.channels_polled, 0);

    let records = scan_records(&replay);
    assert_eq!(records[0].0, CLOCK_SYNC_TAG);
    assert_eq!(records.len(), 4);

    for (index, (tag, payload)) in records[1..].iter().enumerate() {
        assert_eq!(*tag, EVENT_SOURCE_TAG);
        let source = EventSource::decode(&mut payload.as_slice()).unwrap();
        assert_eq!(source.id, index as u64 + 1, "sources replay in id order");
    }

    // a later consume emits only the source the replay skipped
    let mut third = Vec::new();
    session.consume(&mut third).unwrap();
    let records = scan_records(&third);
    assert_eq!(records.len(), 1);
    let source = EventSource::decode(&mut records[0].1.as_slice()).unwrap();
    assert_eq!(source.category, "late");
}

#[test]
fn replayed_stream_is_self_contained() {
    let session = Arc::new(Session::new());
    let mut writer = SessionWriter::new(Arc::clone(&session), 1024);
    let source = session.add_event_source(test_source("rotated", ""));

    // first log file
    let mut first = Vec::new();
    writer.add_event(source, 1, &());
    session.consume(&mut first).unwrap();

    // rotate: the new file starts with replayed metadata, then new data
    let mut second = Vec::new();
    session.reconsume_metadata(&mut second).unwrap();
    writer.add_event(source, 2, &());
    session.consume(&mut second).unwrap();

    let mut stream = EventStream::new();
    let mut input = Cursor::new(second);
    let event = stream.next_event(&mut input).unwrap().expect("event");
    assert_eq!(event.source.category, "rotated");
    assert_eq!(event.clock_value, 2);
    assert!(stream.next_event(&mut input).unwrap().is_none());
}

#[test]
fn closed_channel_is_drained_then_removed() {
    let session = Arc::new(Session::new());
    let mut writer = SessionWriter::new(Arc::clone(&session), 1024);
    let source = session.add_event_source(test_source("reclaim", ""));

    for clock in 0..3 {
        assert!(writer.add_event(source, clock, &()));
    }
    drop(writer); // closes the channel with three events still queued

    let mut bytes = Vec::new();
    let result = session.consume(&mut bytes).unwrap();
    assert_eq!(result.channels_polled, 1);
    assert_eq!(result.channels_removed, 1, "drained and closed in one pass");

    let mut input = Cursor::new(bytes);
    let mut stream = EventStream::new();
    let mut clocks = Vec::new();
    while let Some(event) = stream.next_event(&mut input).unwrap() {
        clocks.push(event.clock_value);
    }
    assert_eq!(clocks, vec![0, 1, 2], "no event is lost to the close");

    let mut rest = Vec::new();
    let result = session.consume(&mut rest).unwrap();
    assert_eq!(result.channels_polled, 0);
}

#[test]
fn source_ids_stay_unique_under_contention() {
    let session = Arc::new(Session::new());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let session = Arc::clone(&session);
        handles.push(thread::spawn(move || {
            (0..250)
                .map(|_| session.add_event_source(test_source("contended", "")))
                .collect::<Vec<u64>>()
        }));
    }

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    ids.sort_unstable();

    let expected: Vec<u64> = (1..=1000).collect();
    assert_eq!(ids, expected, "ids are dense, start at 1, never repeat");
}

#[test]
fn per_channel_order_survives_concurrent_consume() {
    const EVENTS: u64 = 20_000;

    let session = Arc::new(Session::new());
    let source = session.add_event_source(test_source("ordered", "(L)"));

    let producer_session = Arc::clone(&session);
    let producer = thread::spawn(move || {
        let mut writer = SessionWriter::new(producer_session, 512);
        for i in 0..EVENTS {
            while !writer.add_event(source, i, &(i,)) {
                thread::yield_now(); // queue full: wait for the consumer
            }
        }
    });

    let mut bytes = Vec::new();
    while !producer.is_finished() {
        session.consume(&mut bytes).unwrap();
        thread::yield_now();
    }
    producer.join().unwrap();
    session.consume(&mut bytes).unwrap();

    // the closed channel is gone by now, whichever pass drained it last
    let mut rest = Vec::new();
    assert_eq!(session.consume(&mut rest).unwrap().channels_polled, 0);

    let mut input = Cursor::new(bytes);
    let mut stream = EventStream::new();
    let mut expected = 0u64;
    while let Some(event) = stream.next_event(&mut input).unwrap() {
        let mut args = event.arguments;
        let (value,) = <(u64,)>::decode(&mut args).unwrap();
        assert_eq!(value, expected, "single-channel events keep write order");
        expected += 1;
    }
    assert_eq!(expected, EVENTS);
}

#[test]
fn stream_roundtrips_through_a_file() {
    let session = Arc::new(Session::new());
    let mut writer = SessionWriter::with_name(Arc::clone(&session), 2048, 9, "file-writer");
    let source = session.add_event_source(test_source("disk", "([c)"));

    for word in ["alpha", "beta", "gamma"] {
        assert!(writer.add_event(source, 0, &(String::from(word),)));
    }

    let mut file = tempfile::tempfile().unwrap();
    session.consume(&mut file).unwrap();
    file.flush().unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();

    let mut stream = EventStream::new();
    let mut words = Vec::new();
    while let Some(event) = stream.next_event(&mut file).unwrap() {
        let mut args = event.arguments;
        let (word,) = <(String,)>::decode(&mut args).unwrap();
        words.push(word);
    }

    assert_eq!(words, vec!["alpha", "beta", "gamma"]);
    assert_eq!(stream.writer_prop().id, 9);
    assert_eq!(stream.writer_prop().name, "file-writer");
    assert!(stream.clock_sync().clock_frequency > 0);
}

#[test]
fn writer_prop_updates_are_visible_to_the_next_batch() {
    let session = Arc::new(Session::new());
    let mut writer = SessionWriter::new(Arc::clone(&session), 1024);
    let source = session.add_event_source(test_source("rename", ""));

    writer.add_event(source, 0, &());
    let mut bytes = Vec::new();
    session.consume(&mut bytes).unwrap();

    writer.set_id(42);
    writer.set_name("renamed");
    writer.add_event(source, 1, &());
    session.consume(&mut bytes).unwrap();

    let mut input = Cursor::new(bytes);
    let mut stream = EventStream::new();

    assert!(stream.next_event(&mut input).unwrap().is_some());
    assert_eq!(stream.writer_prop().id, 0);

    assert!(stream.next_event(&mut input).unwrap().is_some());
    assert_eq!(stream.writer_prop().id, 42);
    assert_eq!(stream.writer_prop().name, "renamed");
}

#[test]
fn empty_channels_contribute_no_writer_prop() {
    let session = Arc::new(Session::new());
    let idle = SessionWriter::with_name(Arc::clone(&session), 256, 5, "idle");

    let mut bytes = Vec::new();
    let result = session.consume(&mut bytes).unwrap();
    assert_eq!(result.channels_polled, 1);

    let records = scan_records(&bytes);
    assert_eq!(records.len(), 1, "only the clock sync");
    assert_eq!(records[0].0, CLOCK_SYNC_TAG);

    // the writer prop template is untouched
    assert_eq!(
        idle.channel().writer_prop_snapshot(),
        WriterProp {
            id: 5,
            name: "idle".into(),
            batch_size: 0
        }
    );
}

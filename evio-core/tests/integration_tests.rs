//! End-to-end tests over real files on disk.
//!
//! Recordings are synthesized, written with the crate's own writers, and
//! read back through the full detection / decoding / filtering pipeline.

use evio_core::formats::aedat;
use evio_core::{
    Array, Decoder, DvsEvent, EventIterator, FileType, SaveOptions, Stream, StreamError,
    TransposeAction,
};
use std::path::Path;

const DIMENSIONS: (u16, u16) = (1280, 720);

fn synthetic_events(count: usize) -> Vec<DvsEvent> {
    (0..count as u64)
        .map(|i| {
            DvsEvent::new(
                i * 3,
                ((i * 7) % DIMENSIONS.0 as u64) as u16,
                ((i * 11) % DIMENSIONS.1 as u64) as u16,
                i % 2 == 0,
            )
        })
        .collect()
}

fn keep_absolute() -> SaveOptions {
    SaveOptions {
        zero_t0: false,
        ..SaveOptions::default()
    }
}

#[test]
fn test_round_trip_through_every_container() {
    let directory = tempfile::tempdir().unwrap();
    let events = synthetic_events(10_000);
    let source = Array::new(events.clone(), DIMENSIONS);
    for name in ["events.dat", "events.raw", "events.es", "events.aedat4"] {
        let path = directory.path().join(name);
        source.save(&path, keep_absolute()).unwrap();
        let decoder = Decoder::open(&path).unwrap();
        assert_eq!(decoder.dimensions(), DIMENSIONS, "{}", name);
        assert_eq!(decoder.to_array().unwrap(), events, "{}", name);
    }
}

#[test]
fn test_event_slice_spans_batches() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("large.dat");
    let events = synthetic_events(500_000);
    Array::new(events.clone(), DIMENSIONS)
        .save(&path, keep_absolute())
        .unwrap();
    let sliced = Decoder::open(&path)
        .unwrap()
        .event_slice(100_000, 300_000)
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(sliced.len(), 200_000);
    assert_eq!(sliced.first(), events.get(100_000));
    assert_eq!(sliced.last(), events.get(299_999));
}

#[test]
fn test_decoded_streams_are_monotonic_and_within_range() {
    let directory = tempfile::tempdir().unwrap();
    let source = Array::new(synthetic_events(50_000), DIMENSIONS);
    for name in ["events.dat", "events.raw", "events.es", "events.aedat4"] {
        let path = directory.path().join(name);
        source.save(&path, keep_absolute()).unwrap();
        let decoder = Decoder::open(&path).unwrap();
        let (start, end) = decoder.time_range_us().unwrap();
        let mut iterator = decoder.iterate().unwrap();
        let mut previous = 0u64;
        while let Some(batch) = iterator.next().unwrap() {
            assert!(!batch.is_empty(), "{}", name);
            for event in batch {
                assert!(event.t >= previous, "{}", name);
                assert!(event.t >= start && event.t < end, "{}", name);
                assert!(event.x < DIMENSIONS.0 && event.y < DIMENSIONS.1, "{}", name);
                previous = event.t;
            }
        }
    }
}

#[test]
fn test_magic_detection_overrides_the_extension() {
    let directory = tempfile::tempdir().unwrap();
    // An AEDAT 4.0 file hiding behind a .dat extension.
    let path = directory.path().join("mislabeled.dat");
    Array::new(synthetic_events(100), DIMENSIONS)
        .save(
            &path,
            SaveOptions {
                zero_t0: false,
                file_type: Some(FileType::Aedat),
                ..SaveOptions::default()
            },
        )
        .unwrap();
    assert_eq!(FileType::guess(&path).unwrap(), FileType::Aedat);
    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.file_type(), FileType::Aedat);
    assert_eq!(decoder.to_array().unwrap().len(), 100);
}

#[test]
fn test_extension_fallback_for_magic_less_formats() {
    let directory = tempfile::tempdir().unwrap();
    let source = Array::new(synthetic_events(100), DIMENSIONS);
    let dat = directory.path().join("events.dat");
    source.save(&dat, keep_absolute()).unwrap();
    assert_eq!(FileType::guess(&dat).unwrap(), FileType::Dat);
    let raw = directory.path().join("events.raw");
    source.save(&raw, keep_absolute()).unwrap();
    assert_eq!(FileType::guess(&raw).unwrap(), FileType::Evt);

    let unknown = directory.path().join("events.xyz");
    std::fs::write(&unknown, b"not an event file").unwrap();
    assert!(matches!(
        FileType::guess(&unknown),
        Err(StreamError::UnknownFileType(_))
    ));
}

#[test]
fn test_zeroing_rebases_the_output() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("zeroed.es");
    let events = vec![
        DvsEvent::new(2_000_000, 10, 20, true),
        DvsEvent::new(2_000_500, 11, 21, false),
    ];
    let t0 = Array::new(events, DIMENSIONS)
        .save(&path, SaveOptions::default())
        .unwrap();
    assert_eq!(t0, "00:00:02.000000");
    assert_eq!(
        Decoder::open(&path).unwrap().to_array().unwrap(),
        vec![
            DvsEvent::new(0, 10, 20, true),
            DvsEvent::new(500, 11, 21, false),
        ]
    );
}

#[test]
fn test_filter_pipeline_to_file_and_back() {
    let directory = tempfile::tempdir().unwrap();
    let input = directory.path().join("input.aedat4");
    let output = directory.path().join("output.raw");
    Array::new(synthetic_events(20_000), DIMENSIONS)
        .save(&input, keep_absolute())
        .unwrap();

    let filtered = Decoder::open(&input)
        .unwrap()
        .time_slice("00:00:00.010000", "00:00:00.040000", false)
        .unwrap()
        .crop(0, 640, 0, 360)
        .unwrap()
        .transpose(TransposeAction::Rotate180);
    assert_eq!(filtered.dimensions(), (640, 360));
    let expected = filtered.to_array().unwrap();
    assert!(!expected.is_empty());
    filtered.save(&output, keep_absolute()).unwrap();

    let reloaded = Decoder::open(&output).unwrap();
    assert_eq!(reloaded.dimensions(), (640, 360));
    assert_eq!(reloaded.to_array().unwrap(), expected);
}

#[test]
fn test_conversion_chain_preserves_events() {
    let directory = tempfile::tempdir().unwrap();
    let events = synthetic_events(5_000);
    let stations = [
        directory.path().join("stage.dat"),
        directory.path().join("stage.aedat4"),
        directory.path().join("stage.es"),
        directory.path().join("stage.raw"),
    ];
    Array::new(events.clone(), DIMENSIONS)
        .save(&stations[0], keep_absolute())
        .unwrap();
    for window in stations.windows(2) {
        Decoder::open(&window[0])
            .unwrap()
            .save(&window[1], keep_absolute())
            .unwrap();
    }
    let final_events = Decoder::open(stations.last().unwrap())
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(final_events, events);
}

#[test]
fn test_abandoned_iterations_release_their_files() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("abandoned.es");
    Array::new(synthetic_events(1_000), DIMENSIONS)
        .save(&path, keep_absolute())
        .unwrap();
    let decoder = Decoder::open(&path).unwrap();
    let mut iterator = decoder.iterate().unwrap();
    assert!(iterator.next().unwrap().is_some());
    iterator.close();
    assert!(iterator.is_closed());
    assert!(iterator.next().unwrap().is_none());
    // A closed pass does not prevent further passes.
    assert_eq!(decoder.to_array().unwrap().len(), 1_000);
}

#[test]
fn test_track_filtering_in_multi_track_files() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("tracks.aedat4");
    let wanted = synthetic_events(100);
    let noise: Vec<DvsEvent> = synthetic_events(50)
        .into_iter()
        .map(|event| DvsEvent::new(event.t + 7, event.x, event.y, !event.on))
        .collect();
    write_two_track_file(&path, &wanted, &noise);
    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.dimensions(), DIMENSIONS);
    assert_eq!(decoder.to_array().unwrap(), wanted);
}

fn write_two_track_file(path: &Path, events: &[DvsEvent], other: &[DvsEvent]) {
    use std::io::Write;
    let description = format!(
        concat!(
            "<dv version=\"2.0\"><node name=\"outInfo\">",
            "<node name=\"0\"><attr key=\"typeIdentifier\">EVTS</attr>",
            "<node name=\"info\"><attr key=\"sizeX\">{}</attr>",
            "<attr key=\"sizeY\">{}</attr></node></node>",
            "<node name=\"1\"><attr key=\"typeIdentifier\">EVTS</attr>",
            "<node name=\"info\"><attr key=\"sizeX\">{}</attr>",
            "<attr key=\"sizeY\">{}</attr></node></node>",
            "</node></dv>"
        ),
        DIMENSIONS.0, DIMENSIONS.1, DIMENSIONS.0, DIMENSIONS.1
    );
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(aedat::MAGIC).unwrap();
    file.write_all(&aedat::build_io_header(aedat::Compression::Lz4, &description))
        .unwrap();
    for (track_id, batch) in [(1u32, other), (0u32, events)] {
        let content = aedat::build_event_packet(batch);
        file.write_all(&aedat::frame_packet(track_id, &content, aedat::Compression::Lz4).unwrap())
            .unwrap();
    }
}

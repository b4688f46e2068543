//! The lazy stream contract and the in-memory array source.
//!
//! A [`Stream`] describes an ordered sequence of event batches together with
//! its sensor dimensions and time range. Iteration is pull-based: each call
//! to [`Stream::iterate`] starts an independent pass over a fresh resource,
//! and each [`EventIterator::next`] call produces one non-empty batch.
//!
//! Two signals mark the end of iteration. Down the pipeline, `next`
//! returning `Ok(None)` tells the consumer that the producer is exhausted
//! (and has already released its resources). Up the pipeline, a consumer
//! that stops pulling early must call [`EventIterator::close`], which every
//! filter forwards to its parent.

use crate::filter::{Crop, EventSlice, Map, Mask, MaskArray, TimeSlice, Transpose, TransposeAction};
use crate::formats::FormatError;
use crate::output::{self, OutputError, SaveOptions};
use crate::timestamp::{timestamp_to_timecode, Time, TimecodeError};
use crate::types::DvsEvent;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while constructing or iterating streams.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Timecode(#[from] TimecodeError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("unsupported file {0:?}")]
    UnknownFileType(PathBuf),

    #[error("the stream {path:?} has the unsupported type \"{kind}\"")]
    UnsupportedEventKind { path: PathBuf, kind: String },

    #[error("{path:?} contains no event tracks")]
    NoEventTrack { path: PathBuf },

    #[error("track {id} not found (the available ids are {available:?})")]
    TrackNotFound { id: u32, available: Vec<u32> },

    #[error("track {id} does not contain events (its type is \"{kind}\")")]
    TrackNotEvents { id: u32, kind: String },

    #[error("invalid filter bounds: {0}")]
    InvalidBounds(String),
}

/// One pass over a stream.
///
/// Implementations must never surface an empty batch: `next` retries
/// internally until it has content or the sequence ends. Once `next` has
/// returned `Ok(None)`, the iterator has released its resources and every
/// further call returns `Ok(None)`.
pub trait EventIterator {
    /// Produces the next non-empty batch, or `None` at the end of the
    /// sequence.
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError>;

    /// Releases owned resources (file handles, parent iterators).
    ///
    /// Idempotent. Called automatically when `next` signals the end of the
    /// sequence, and directly by owners that abandon iteration early.
    fn close(&mut self);
}

/// An ordered, replayable sequence of event batches.
///
/// Streams are immutable once constructed: dimensions never change, the
/// time range is computed at most once, and every call to `iterate` starts
/// a clean pass that shares no mutable state with previous passes.
pub trait Stream {
    /// The iterator type produced by [`Stream::iterate`].
    type Iter: EventIterator;

    /// Stream dimensions in pixels: width (left-right direction) and height
    /// (top-bottom direction).
    fn dimensions(&self) -> (u16, u16);

    /// Timestamps of the stream's start and end, in microseconds.
    ///
    /// Start is always smaller than or equal to the first event's timestamp
    /// and end is always strictly larger than the last event's timestamp.
    /// For instance, if the stream contains 3 events with timestamps
    /// `[2, 71, 828]`, the time range may be `(2, 829)`. It may also be
    /// wider, for instance `(0, 1000)`. Empty streams report `(0, 1)`.
    fn time_range_us(&self) -> Result<(u64, u64), StreamError>;

    /// Timecodes of the stream's start and end.
    fn time_range(&self) -> Result<(String, String), StreamError> {
        let (start, end) = self.time_range_us()?;
        Ok((timestamp_to_timecode(start), timestamp_to_timecode(end)))
    }

    /// Begins a new, independent pass over the stream.
    fn iterate(&self) -> Result<Self::Iter, StreamError>;

    /// Applies a batch-to-batch transform. Batches that come out empty are
    /// dropped before they reach the consumer.
    fn map<F>(self, function: F) -> Map<Self, F>
    where
        Self: Sized,
        F: Fn(Vec<DvsEvent>) -> Vec<DvsEvent> + Clone,
    {
        Map::new(self, function)
    }

    /// Drops all ON (polarity `true`) events.
    fn remove_on_events(self) -> Map<Self, fn(Vec<DvsEvent>) -> Vec<DvsEvent>>
    where
        Self: Sized,
    {
        let function: fn(Vec<DvsEvent>) -> Vec<DvsEvent> =
            |events| events.into_iter().filter(|event| !event.on).collect();
        Map::new(self, function)
    }

    /// Drops all OFF (polarity `false`) events.
    fn remove_off_events(self) -> Map<Self, fn(Vec<DvsEvent>) -> Vec<DvsEvent>>
    where
        Self: Sized,
    {
        let function: fn(Vec<DvsEvent>) -> Vec<DvsEvent> =
            |events| events.into_iter().filter(|event| event.on).collect();
        Map::new(self, function)
    }

    /// Keeps events with timestamps in `[start, end)`.
    ///
    /// If `zero`, surviving timestamps are rebased so that `start` maps
    /// to zero.
    fn time_slice(
        self,
        start: impl Into<Time>,
        end: impl Into<Time>,
        zero: bool,
    ) -> Result<TimeSlice<Self>, StreamError>
    where
        Self: Sized,
    {
        TimeSlice::new(self, start, end, zero)
    }

    /// Keeps events at positions `[start, end)` of the flattened record
    /// sequence.
    fn event_slice(self, start: usize, end: usize) -> Result<EventSlice<Self>, StreamError>
    where
        Self: Sized,
    {
        EventSlice::new(self, start, end)
    }

    /// Keeps events in the spatial window `left ≤ x < right`,
    /// `top ≤ y < bottom`, shifted to the window's origin.
    fn crop(
        self,
        left: u16,
        right: u16,
        top: u16,
        bottom: u16,
    ) -> Result<Crop<Self>, StreamError>
    where
        Self: Sized,
    {
        Crop::new(self, left, right, top, bottom)
    }

    /// Keeps events whose pixel is set in the mask.
    fn mask(self, array: MaskArray) -> Result<Mask<Self>, StreamError>
    where
        Self: Sized,
    {
        Mask::new(self, array)
    }

    /// Applies a geometric transposition (mirror, rotation, or diagonal
    /// flip).
    fn transpose(self, action: TransposeAction) -> Transpose<Self>
    where
        Self: Sized,
    {
        Transpose::new(self, action)
    }

    /// Materializes the stream into a single buffer.
    fn to_array(&self) -> Result<Vec<DvsEvent>, StreamError> {
        let mut events = Vec::new();
        let mut iterator = self.iterate()?;
        while let Some(batch) = iterator.next()? {
            events.extend_from_slice(&batch);
        }
        Ok(events)
    }

    /// Writes the stream to an event file (supports .aedat4, .es, .raw,
    /// and .dat).
    ///
    /// Returns the original `t0` as a timecode when timestamps were
    /// zero-based on write, and `"00:00:00.000000"` otherwise.
    fn save(&self, path: impl AsRef<Path>, options: SaveOptions) -> Result<String, OutputError>
    where
        Self: Sized,
    {
        output::save(self, path, options)
    }
}

/// Computes a stream's time range by fully consuming a dedicated iterator.
///
/// The iterator is exhausted (and therefore closed) before this returns.
pub(crate) fn scan_time_range<I: EventIterator>(
    mut iterator: I,
) -> Result<(u64, u64), StreamError> {
    let mut range: Option<(u64, u64)> = None;
    while let Some(events) = iterator.next()? {
        if let (Some(first), Some(last)) = (events.first(), events.last()) {
            range = Some(match range {
                None => (first.t, last.t),
                Some((begin, _)) => (begin, last.t),
            });
        }
    }
    Ok(match range {
        None => (0, 1),
        Some((begin, end)) => (begin, end + 1),
    })
}

/// A stream backed by an in-memory buffer.
///
/// Events must be ordered by non-decreasing timestamp. Each pass operates
/// on a private copy of the buffer, so filters downstream are free to
/// mutate batches in place without affecting other passes.
#[derive(Debug, Clone)]
pub struct Array {
    events: Vec<DvsEvent>,
    dimensions: (u16, u16),
}

impl Array {
    /// Creates a stream over `events` with the given sensor dimensions.
    pub fn new(events: Vec<DvsEvent>, dimensions: (u16, u16)) -> Self {
        debug_assert!(events.windows(2).all(|pair| pair[0].t <= pair[1].t));
        Self { events, dimensions }
    }

    /// The number of events in the backing buffer.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the backing buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Stream for Array {
    type Iter = ArrayIterator;

    fn dimensions(&self) -> (u16, u16) {
        self.dimensions
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => Ok((first.t, last.t + 1)),
            _ => Ok((0, 1)),
        }
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(ArrayIterator {
            events: self.events.clone(),
            consumed: false,
        })
    }
}

/// Single-batch iterator over a private copy of an [`Array`]'s buffer.
#[derive(Debug)]
pub struct ArrayIterator {
    events: Vec<DvsEvent>,
    consumed: bool,
}

impl EventIterator for ArrayIterator {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        if self.events.is_empty() {
            return Ok(None);
        }
        Ok(Some(std::mem::take(&mut self.events)))
    }

    fn close(&mut self) {
        self.consumed = true;
        self.events.clear();
    }
}

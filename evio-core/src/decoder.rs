//! The unifying file decoder.
//!
//! [`Decoder`] opens any supported event file and exposes it as a
//! [`Stream`] of canonical DVS events, hiding the per-format quirks:
//!
//! - AEDAT 4.0 files may carry several tracks; only one events track is
//!   decoded, chosen explicitly or defaulting to the first one.
//! - DAT records carry a 4-bit payload; it is clamped to a polarity.
//! - Event Stream files use a bottom-up y axis; rows are flipped to the
//!   top-down convention. ATIS exposure measurements are dropped.
//! - EVT files interleave CD events with external triggers; trigger
//!   packets are skipped.

use crate::file_type::FileType;
use crate::formats::{aedat, dat, es, evt, FormatError, Version};
use crate::stream::{scan_time_range, EventIterator, Stream, StreamError};
use crate::timestamp::{parse_timestamp, Time};
use crate::types::DvsEvent;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

/// Decoder construction options.
#[derive(Debug, Clone)]
pub struct Options {
    /// AEDAT track to decode; defaults to the first events track.
    pub track_id: Option<u32>,
    /// Sensor size to assume when the file does not declare one.
    pub dimensions_fallback: Option<(u16, u16)>,
    /// Format version to assume when the file does not declare one.
    pub version_fallback: Option<Version>,
    /// Offset added to every decoded timestamp.
    pub t0: Time,
    /// Bypasses file type detection.
    pub file_type: Option<FileType>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            track_id: None,
            dimensions_fallback: None,
            version_fallback: None,
            t0: Time::Seconds(0),
            file_type: None,
        }
    }
}

/// A lazy stream backed by an event file.
///
/// Construction opens the file once to validate it and resolve its
/// dimensions; each [`Stream::iterate`] call then re-opens it for an
/// independent pass.
#[derive(Debug)]
pub struct Decoder {
    path: PathBuf,
    file_type: FileType,
    dimensions: (u16, u16),
    /// Resolved AEDAT track, unused for the other formats.
    track_id: Option<u32>,
    dimensions_fallback: Option<(u16, u16)>,
    version_fallback: Option<Version>,
    t0: u64,
    time_range: OnceCell<(u64, u64)>,
}

impl Decoder {
    /// Opens an event file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        Self::open_with(path, Options::default())
    }

    /// Opens an event file.
    pub fn open_with(path: impl AsRef<Path>, options: Options) -> Result<Self, StreamError> {
        let path = path.as_ref().to_owned();
        let file_type = match options.file_type {
            Some(file_type) => file_type,
            None => FileType::guess(&path)?,
        };
        let t0 = parse_timestamp(options.t0)?;
        let mut track_id = None;
        let dimensions = match file_type {
            FileType::Aedat => {
                let probe = aedat::Decoder::new(&path)?;
                let track = match options.track_id {
                    Some(id) => {
                        let track = probe
                            .tracks()
                            .iter()
                            .find(|track| track.id == id)
                            .copied()
                            .ok_or_else(|| StreamError::TrackNotFound {
                                id,
                                available: probe.tracks().iter().map(|track| track.id).collect(),
                            })?;
                        if track.kind != aedat::TrackKind::Events {
                            return Err(StreamError::TrackNotEvents {
                                id,
                                kind: track.kind.to_string(),
                            });
                        }
                        track
                    }
                    None => probe
                        .tracks()
                        .iter()
                        .find(|track| track.kind == aedat::TrackKind::Events)
                        .copied()
                        .ok_or_else(|| StreamError::NoEventTrack { path: path.clone() })?,
                };
                track_id = Some(track.id);
                track
                    .dimensions
                    .or(options.dimensions_fallback)
                    .ok_or_else(|| FormatError::MissingDimensions { path: path.clone() })?
            }
            FileType::Dat => {
                let probe = dat::Decoder::new(
                    &path,
                    options.dimensions_fallback,
                    options.version_fallback.unwrap_or(Version::Dat2),
                )?;
                if probe.event_kind() != dat::EventKind::Cd {
                    return Err(StreamError::UnsupportedEventKind {
                        path,
                        kind: probe.event_kind().to_string(),
                    });
                }
                probe.dimensions()
            }
            FileType::Es => {
                let probe = es::Decoder::new(&path, t0)?;
                if !matches!(probe.kind(), es::Kind::Dvs | es::Kind::Atis) {
                    return Err(StreamError::UnsupportedEventKind {
                        path,
                        kind: probe.kind().to_string(),
                    });
                }
                probe
                    .dimensions()
                    .ok_or_else(|| FormatError::MissingDimensions { path: path.clone() })?
            }
            FileType::Evt => {
                let probe = evt::Decoder::new(
                    &path,
                    options.dimensions_fallback,
                    options.version_fallback.unwrap_or(Version::Evt3),
                )?;
                probe.dimensions()
            }
        };
        Ok(Self {
            path,
            file_type,
            dimensions,
            track_id,
            dimensions_fallback: options.dimensions_fallback,
            version_fallback: options.version_fallback,
            t0,
            time_range: OnceCell::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }
}

impl Stream for Decoder {
    type Iter = DecoderIterator;

    fn dimensions(&self) -> (u16, u16) {
        self.dimensions
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        if let Some(&range) = self.time_range.get() {
            return Ok(range);
        }
        let range = scan_time_range(self.iterate()?)?;
        Ok(*self.time_range.get_or_init(|| range))
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        let inner = match self.file_type {
            FileType::Aedat => Inner::Aedat {
                decoder: aedat::Decoder::new(&self.path)?,
                // Resolved during construction.
                track_id: self.track_id.unwrap_or(0),
            },
            FileType::Dat => Inner::Dat(dat::Decoder::new(
                &self.path,
                self.dimensions_fallback,
                self.version_fallback.unwrap_or(Version::Dat2),
            )?),
            FileType::Es => Inner::Es {
                decoder: es::Decoder::new(&self.path, self.t0)?,
                height: self.dimensions.1,
            },
            FileType::Evt => Inner::Evt(evt::Decoder::new(
                &self.path,
                self.dimensions_fallback,
                self.version_fallback.unwrap_or(Version::Evt3),
            )?),
        };
        Ok(DecoderIterator {
            inner: Some(inner),
            offset: self.t0,
        })
    }
}

#[derive(Debug)]
enum Inner {
    Aedat {
        decoder: aedat::Decoder,
        track_id: u32,
    },
    Dat(dat::Decoder),
    Es {
        decoder: es::Decoder,
        height: u16,
    },
    Evt(evt::Decoder),
}

/// One pass over a [`Decoder`].
#[derive(Debug)]
pub struct DecoderIterator {
    /// `None` once the pass has ended and the file handle is released.
    inner: Option<Inner>,
    offset: u64,
}

impl DecoderIterator {
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Produces the next normalized batch from the format decoder.
    fn next_batch(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Ok(None),
        };
        match inner {
            Inner::Aedat { decoder, track_id } => {
                let batch = decoder.next(*track_id)?;
                let offset = self.offset;
                Ok(batch.map(|mut events| {
                    if offset > 0 {
                        for event in &mut events {
                            event.t += offset;
                        }
                    }
                    events
                }))
            }
            Inner::Dat(decoder) => {
                let batch = decoder.next()?;
                let offset = self.offset;
                Ok(batch.map(|records| {
                    records
                        .into_iter()
                        .map(|record| {
                            DvsEvent::new(
                                record.t + offset,
                                record.x,
                                record.y,
                                record.payload != 0,
                            )
                        })
                        .collect()
                }))
            }
            Inner::Es { decoder, height } => {
                let height = *height;
                match decoder.next()? {
                    None => Ok(None),
                    Some(es::Packet::Dvs(mut events)) => {
                        for event in &mut events {
                            event.y = height - 1 - event.y;
                        }
                        Ok(Some(events))
                    }
                    Some(es::Packet::Atis(events)) => Ok(Some(
                        events
                            .into_iter()
                            .filter(|event| !event.exposure)
                            .map(|event| {
                                DvsEvent::new(
                                    event.t,
                                    event.x,
                                    height - 1 - event.y,
                                    event.polarity,
                                )
                            })
                            .collect(),
                    )),
                }
            }
            Inner::Evt(decoder) => match decoder.next()? {
                None => Ok(None),
                Some(evt::Packet::Events(mut events)) => {
                    if self.offset > 0 {
                        for event in &mut events {
                            event.t += self.offset;
                        }
                    }
                    Ok(Some(events))
                }
                // External triggers are not part of the stream.
                Some(evt::Packet::Triggers(_)) => Ok(Some(Vec::new())),
            },
        }
    }
}

impl EventIterator for DecoderIterator {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        loop {
            match self.next_batch()? {
                None => {
                    self.close();
                    return Ok(None);
                }
                Some(events) if events.is_empty() => continue,
                Some(events) => return Ok(Some(events)),
            }
        }
    }

    fn close(&mut self) {
        self.inner = None;
    }
}

//! Event Stream (.es) codec.
//!
//! An Event Stream file starts with the ASCII magic `Event Stream`, three
//! version bytes, and a type byte. DVS and ATIS streams then carry the
//! sensor width and height as two little-endian `u16`s, followed by
//! delta-coded events. Timestamps are relative: each event advances the
//! running time by a small delta stored in its first byte, and single-byte
//! overflow markers advance it by the maximum delta.

use crate::formats::FormatError;
use crate::types::DvsEvent;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

pub const MAGIC: &[u8] = b"Event Stream";

/// Supported major version.
pub const MAJOR_VERSION: u8 = 2;

/// Stream type, from the byte following the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Generic,
    Dvs,
    Atis,
    Color,
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kind::Generic => write!(f, "generic"),
            Kind::Dvs => write!(f, "dvs"),
            Kind::Atis => write!(f, "atis"),
            Kind::Color => write!(f, "color"),
        }
    }
}

/// An ATIS event, which carries an exposure flag alongside the polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtisEvent {
    /// Timestamp in microseconds
    pub t: u64,
    pub x: u16,
    pub y: u16,
    /// `true` if this is an exposure measurement, not a contrast change
    pub exposure: bool,
    pub polarity: bool,
}

/// A packet of decoded Event Stream events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Dvs(Vec<DvsEvent>),
    Atis(Vec<AtisEvent>),
}

// A DVS event is 5 bytes; an overflow marker is 1 byte.
const DVS_EVENT_SIZE: usize = 5;
const DVS_OVERFLOW_DELTA: u64 = 0xFE >> 1;
const ATIS_EVENT_SIZE: usize = 5;
const ATIS_OVERFLOW_DELTA: u64 = 0x3F;

/// Read buffer size in bytes.
const READ_CHUNK: usize = 1 << 20;

/// Streaming Event Stream decoder.
#[derive(Debug)]
pub struct Decoder {
    path: PathBuf,
    reader: BufReader<File>,
    kind: Kind,
    version: [u8; 3],
    dimensions: Option<(u16, u16)>,
    t: u64,
    buffer: Vec<u8>,
    carry: Vec<u8>,
}

impl Decoder {
    /// Opens an Event Stream file and parses its header.
    ///
    /// `t0` is added to every decoded timestamp.
    pub fn new(path: impl AsRef<Path>, t0: u64) -> Result<Self, FormatError> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; MAGIC.len()];
        reader
            .read_exact(&mut magic)
            .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
        if magic != MAGIC {
            return Err(FormatError::InvalidData {
                path,
                reason: "bad Event Stream magic".to_owned(),
            });
        }
        let mut version = [0u8; 3];
        reader
            .read_exact(&mut version)
            .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
        if version[0] != MAJOR_VERSION {
            return Err(FormatError::UnsupportedVersion {
                path,
                version: format!("{}.{}.{}", version[0], version[1], version[2]),
            });
        }
        let kind = match reader
            .read_u8()
            .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?
        {
            0 => Kind::Generic,
            1 => Kind::Dvs,
            2 => Kind::Atis,
            4 => Kind::Color,
            other => {
                return Err(FormatError::InvalidData {
                    path,
                    reason: format!("unknown Event Stream type {}", other),
                })
            }
        };
        let dimensions = if kind == Kind::Generic {
            None
        } else {
            let width = reader
                .read_u16::<LittleEndian>()
                .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
            let height = reader
                .read_u16::<LittleEndian>()
                .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
            Some((width, height))
        };
        Ok(Self {
            path,
            reader,
            kind,
            version,
            dimensions,
            t: t0,
            buffer: vec![0u8; READ_CHUNK],
            carry: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn version(&self) -> [u8; 3] {
        self.version
    }

    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.dimensions
    }

    /// Decodes the next packet, or `None` at the end of the file.
    ///
    /// Only DVS and ATIS streams can be decoded.
    pub fn next(&mut self) -> Result<Option<Packet>, FormatError> {
        if !matches!(self.kind, Kind::Dvs | Kind::Atis) {
            return Err(FormatError::InvalidData {
                path: self.path.clone(),
                reason: format!("cannot decode events from a {} stream", self.kind),
            });
        }
        loop {
            let mut filled = self.carry.len();
            self.buffer[..filled].copy_from_slice(&self.carry);
            self.carry.clear();
            let previous = filled;
            while filled < self.buffer.len() {
                let count = self.reader.read(&mut self.buffer[filled..])?;
                if count == 0 {
                    break;
                }
                filled += count;
            }
            if filled == 0 {
                return Ok(None);
            }
            if filled == previous && previous > 0 {
                // The file ends in the middle of an event.
                return Err(FormatError::UnexpectedEof {
                    path: self.path.clone(),
                });
            }
            let packet = match self.kind {
                Kind::Dvs => Packet::Dvs(self.decode_dvs(filled)?),
                _ => Packet::Atis(self.decode_atis(filled)?),
            };
            match &packet {
                Packet::Dvs(events) if events.is_empty() => continue,
                Packet::Atis(events) if events.is_empty() => continue,
                _ => return Ok(Some(packet)),
            }
        }
    }

    fn check_bounds(&self, x: u16, y: u16) -> Result<(), FormatError> {
        if let Some((width, height)) = self.dimensions {
            if x >= width || y >= height {
                return Err(FormatError::InvalidData {
                    path: self.path.clone(),
                    reason: format!(
                        "event at ({}, {}) outside the {}x{} sensor",
                        x, y, width, height
                    ),
                });
            }
        }
        Ok(())
    }

    fn decode_dvs(&mut self, filled: usize) -> Result<Vec<DvsEvent>, FormatError> {
        let data = &self.buffer[..filled];
        let mut events = Vec::with_capacity(filled / DVS_EVENT_SIZE);
        let mut index = 0;
        while index < data.len() {
            let byte = data[index];
            if byte == 0xFF || byte == 0xFE {
                self.t += DVS_OVERFLOW_DELTA;
                index += 1;
                continue;
            }
            if index + DVS_EVENT_SIZE > data.len() {
                break;
            }
            self.t += (byte >> 1) as u64;
            let x = u16::from_le_bytes([data[index + 1], data[index + 2]]);
            let y = u16::from_le_bytes([data[index + 3], data[index + 4]]);
            self.check_bounds(x, y)?;
            events.push(DvsEvent::new(self.t, x, y, byte & 0x1 == 1));
            index += DVS_EVENT_SIZE;
        }
        self.carry.extend_from_slice(&data[index..]);
        Ok(events)
    }

    fn decode_atis(&mut self, filled: usize) -> Result<Vec<AtisEvent>, FormatError> {
        let data = &self.buffer[..filled];
        let mut events = Vec::with_capacity(filled / ATIS_EVENT_SIZE);
        let mut index = 0;
        while index < data.len() {
            let byte = data[index];
            if byte >> 2 == 0x3F {
                self.t += ATIS_OVERFLOW_DELTA;
                index += 1;
                continue;
            }
            if index + ATIS_EVENT_SIZE > data.len() {
                break;
            }
            self.t += (byte >> 2) as u64;
            let x = u16::from_le_bytes([data[index + 1], data[index + 2]]);
            let y = u16::from_le_bytes([data[index + 3], data[index + 4]]);
            self.check_bounds(x, y)?;
            events.push(AtisEvent {
                t: self.t,
                x,
                y,
                exposure: (byte >> 1) & 0x1 == 1,
                polarity: byte & 0x1 == 1,
            });
            index += ATIS_EVENT_SIZE;
        }
        self.carry.extend_from_slice(&data[index..]);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_header(file: &mut File, kind: u8, dimensions: Option<(u16, u16)>) {
        file.write_all(MAGIC).unwrap();
        file.write_all(&[MAJOR_VERSION, 0, 0]).unwrap();
        file.write_all(&[kind]).unwrap();
        if let Some((width, height)) = dimensions {
            file.write_all(&width.to_le_bytes()).unwrap();
            file.write_all(&height.to_le_bytes()).unwrap();
        }
    }

    fn dvs_event(delta: u8, x: u16, y: u16, on: bool) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes[0] = (delta << 1) | on as u8;
        bytes[1..3].copy_from_slice(&x.to_le_bytes());
        bytes[3..5].copy_from_slice(&y.to_le_bytes());
        bytes
    }

    #[test]
    fn test_decode_dvs_stream() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("events.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 1, Some((320, 240)));
        file.write_all(&dvs_event(10, 5, 7, true)).unwrap();
        file.write_all(&dvs_event(3, 100, 200, false)).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        assert_eq!(decoder.kind(), Kind::Dvs);
        assert_eq!(decoder.dimensions(), Some((320, 240)));
        let packet = decoder.next().unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Dvs(vec![
                DvsEvent::new(10, 5, 7, true),
                DvsEvent::new(13, 100, 200, false),
            ])
        );
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn test_overflow_markers_advance_time() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("overflow.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 1, Some((320, 240)));
        file.write_all(&[0xFF, 0xFF]).unwrap();
        file.write_all(&dvs_event(1, 0, 0, true)).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        let packet = decoder.next().unwrap().unwrap();
        assert_eq!(packet, Packet::Dvs(vec![DvsEvent::new(255, 0, 0, true)]));
    }

    #[test]
    fn test_decode_atis_stream() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("atis.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 2, Some((304, 240)));
        // delta=5, exposure=1, polarity=0
        let mut event = [0u8; 5];
        event[0] = (5 << 2) | (1 << 1);
        event[1..3].copy_from_slice(&9u16.to_le_bytes());
        event[3..5].copy_from_slice(&11u16.to_le_bytes());
        file.write_all(&event).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        assert_eq!(decoder.kind(), Kind::Atis);
        let packet = decoder.next().unwrap().unwrap();
        assert_eq!(
            packet,
            Packet::Atis(vec![AtisEvent {
                t: 5,
                x: 9,
                y: 11,
                exposure: true,
                polarity: false,
            }])
        );
    }

    #[test]
    fn test_t0_offsets_timestamps() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("offset.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 1, Some((320, 240)));
        file.write_all(&dvs_event(10, 1, 2, true)).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 1000).unwrap();
        let packet = decoder.next().unwrap().unwrap();
        assert_eq!(packet, Packet::Dvs(vec![DvsEvent::new(1010, 1, 2, true)]));
    }

    #[test]
    fn test_generic_stream_cannot_be_decoded() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("generic.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 0, None);
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        assert_eq!(decoder.kind(), Kind::Generic);
        assert_eq!(decoder.dimensions(), None);
        assert!(decoder.next().is_err());
    }

    #[test]
    fn test_out_of_bounds_coordinate_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("oob.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 1, Some((320, 240)));
        file.write_all(&dvs_event(10, 5, 240, true)).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        assert!(matches!(
            decoder.next(),
            Err(FormatError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_truncated_event_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("truncated.es");
        let mut file = File::create(&path).unwrap();
        write_header(&mut file, 1, Some((320, 240)));
        file.write_all(&[0x02, 0x01]).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, 0).unwrap();
        assert!(matches!(
            decoder.next(),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("bad.es");
        std::fs::write(&path, b"Not An Event Stream At All").unwrap();
        assert!(matches!(
            Decoder::new(&path, 0),
            Err(FormatError::InvalidData { .. })
        ));
    }
}

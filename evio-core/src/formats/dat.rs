//! Prophesee DAT codec.
//!
//! DAT files carry a `%`-prefixed text header, an optional two-byte binary
//! prelude naming the event type and record size, then fixed-size records.
//! DAT2 records are 8 bytes: a 32-bit timestamp followed by a 32-bit word
//! packing x (bits 0-13), y (bits 14-27) and a 4-bit payload (bits 28-31).
//! For CD events the payload's lowest bit is the polarity.

use crate::formats::{self, FormatError, Version};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// A raw DAT record with its 4-bit payload left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatEvent {
    /// Timestamp in microseconds
    pub t: u64,
    pub x: u16,
    pub y: u16,
    /// 4-bit payload; for CD events bit 0 is the polarity
    pub payload: u8,
}

/// Record stream kind, from the binary prelude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Cd,
    Trigger,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Cd => write!(f, "cd"),
            EventKind::Trigger => write!(f, "trigger"),
        }
    }
}

const RECORD_SIZE: usize = 8;

/// Read buffer size in bytes, a multiple of the record size.
const READ_CHUNK: usize = RECORD_SIZE * 131072;

/// Streaming DAT decoder.
#[derive(Debug)]
pub struct Decoder {
    path: PathBuf,
    reader: BufReader<File>,
    version: Version,
    dimensions: (u16, u16),
    event_kind: EventKind,
    t0: u64,
    /// Number of wraps of the 32-bit on-wire timestamp field.
    overflows: u64,
    previous_t: u32,
    buffer: Vec<u8>,
}

impl Decoder {
    /// Opens a DAT file and parses its text header and binary prelude.
    pub fn new(
        path: impl AsRef<Path>,
        dimensions_fallback: Option<(u16, u16)>,
        version_fallback: Version,
    ) -> Result<Self, FormatError> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let header = formats::parse_text_header(&mut reader)?;
        let version = match header.version.as_deref() {
            Some("1") | Some("1.0") => Version::Dat1,
            Some("2") | Some("2.0") => Version::Dat2,
            Some(other) => {
                return Err(FormatError::UnsupportedVersion {
                    path,
                    version: other.to_owned(),
                })
            }
            None => version_fallback,
        };
        if !matches!(version, Version::Dat1 | Version::Dat2) {
            return Err(FormatError::UnsupportedVersion {
                path,
                version: version.to_string(),
            });
        }
        let dimensions = match header.dimensions().or(dimensions_fallback) {
            Some(dimensions) => dimensions,
            None => return Err(FormatError::MissingDimensions { path }),
        };
        // DAT2 carries a binary prelude: [event_type, event_size].
        let event_kind = if version == Version::Dat2 {
            let mut prelude = [0u8; 2];
            reader
                .read_exact(&mut prelude)
                .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
            if prelude[1] as usize != RECORD_SIZE {
                return Err(FormatError::InvalidData {
                    path,
                    reason: format!("unexpected DAT record size {}", prelude[1]),
                });
            }
            match prelude[0] {
                0x00 | 0x0C => EventKind::Cd,
                0x0E => EventKind::Trigger,
                other => {
                    return Err(FormatError::InvalidData {
                        path,
                        reason: format!("unknown DAT event type 0x{:02X}", other),
                    })
                }
            }
        } else {
            EventKind::Cd
        };
        Ok(Self {
            path,
            reader,
            version,
            dimensions,
            event_kind,
            t0: header.t0.unwrap_or(0),
            overflows: 0,
            previous_t: 0,
            buffer: vec![0u8; READ_CHUNK],
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn dimensions(&self) -> (u16, u16) {
        self.dimensions
    }

    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    /// Time offset from the header, already applied to yielded timestamps.
    pub fn t0(&self) -> u64 {
        self.t0
    }

    /// Decodes the next batch of records, or `None` at the end of the file.
    pub fn next(&mut self) -> Result<Option<Vec<DatEvent>>, FormatError> {
        let mut filled = 0;
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
        // The buffer holds a whole number of records, so a remainder can
        // only come from a file that ends in the middle of one.
        if filled % RECORD_SIZE != 0 {
            return Err(FormatError::UnexpectedEof {
                path: self.path.clone(),
            });
        }
        let mut events = Vec::with_capacity(filled / RECORD_SIZE);
        for record in self.buffer[..filled].chunks_exact(RECORD_SIZE) {
            let t = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let data = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            // The on-wire timestamp is monotonic modulo 2^32.
            if t < self.previous_t {
                self.overflows += 1;
            }
            self.previous_t = t;
            events.push(DatEvent {
                t: self.t0 + (self.overflows << 32) + t as u64,
                x: (data & 0x3FFF) as u16,
                y: ((data >> 14) & 0x3FFF) as u16,
                payload: ((data >> 28) & 0xF) as u8,
            });
        }
        Ok(Some(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(t: u32, x: u16, y: u16, payload: u8) -> [u8; 8] {
        let data = (x as u32) | ((y as u32) << 14) | ((payload as u32) << 28);
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&t.to_le_bytes());
        bytes[4..].copy_from_slice(&data.to_le_bytes());
        bytes
    }

    fn write_dat(path: &Path, header: &[u8], prelude: Option<[u8; 2]>, records: &[[u8; 8]]) {
        let mut file = File::create(path).unwrap();
        file.write_all(header).unwrap();
        if let Some(prelude) = prelude {
            file.write_all(&prelude).unwrap();
        }
        for bytes in records {
            file.write_all(bytes).unwrap();
        }
    }

    #[test]
    fn test_decode_dat2_records() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("events.dat");
        write_dat(
            &path,
            b"% Version 2\n% Width 640\n% Height 480\n% end\n",
            Some([0x0C, 8]),
            &[record(10, 5, 7, 1), record(20, 600, 400, 0)],
        );
        let mut decoder = Decoder::new(&path, None, Version::Dat2).unwrap();
        assert_eq!(decoder.dimensions(), (640, 480));
        assert_eq!(decoder.event_kind(), EventKind::Cd);
        let events = decoder.next().unwrap().unwrap();
        assert_eq!(
            events,
            vec![
                DatEvent {
                    t: 10,
                    x: 5,
                    y: 7,
                    payload: 1
                },
                DatEvent {
                    t: 20,
                    x: 600,
                    y: 400,
                    payload: 0
                },
            ]
        );
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn test_timestamp_overflow_is_unwrapped() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("overflow.dat");
        write_dat(
            &path,
            b"% Version 2\n% Width 640\n% Height 480\n% end\n",
            Some([0x00, 8]),
            &[record(u32::MAX - 1, 0, 0, 0), record(3, 0, 0, 0)],
        );
        let mut decoder = Decoder::new(&path, None, Version::Dat2).unwrap();
        let events = decoder.next().unwrap().unwrap();
        assert_eq!(events[0].t, u32::MAX as u64 - 1);
        assert_eq!(events[1].t, (1u64 << 32) + 3);
    }

    #[test]
    fn test_trigger_kind_is_reported() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("triggers.dat");
        write_dat(
            &path,
            b"% Version 2\n% Width 640\n% Height 480\n% end\n",
            Some([0x0E, 8]),
            &[record(1, 0, 0, 1)],
        );
        let decoder = Decoder::new(&path, None, Version::Dat2).unwrap();
        assert_eq!(decoder.event_kind(), EventKind::Trigger);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("truncated.dat");
        write_dat(
            &path,
            b"% Version 2\n% Width 640\n% Height 480\n% end\n",
            Some([0x0C, 8]),
            &[record(10, 5, 7, 1)],
        );
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 0x02, 0x03]).unwrap();
        drop(file);
        let mut decoder = Decoder::new(&path, None, Version::Dat2).unwrap();
        assert!(matches!(
            decoder.next(),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_dat1_has_no_prelude() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("legacy.dat");
        write_dat(
            &path,
            b"% Version 1\n% Width 304\n% Height 240\n% end\n",
            None,
            &[record(42, 1, 2, 1)],
        );
        let mut decoder = Decoder::new(&path, None, Version::Dat2).unwrap();
        assert_eq!(decoder.version(), Version::Dat1);
        let events = decoder.next().unwrap().unwrap();
        assert_eq!(events[0].t, 42);
    }

    #[test]
    fn test_missing_dimensions_is_an_error() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("bare.dat");
        write_dat(&path, b"", Some([0x0C, 8]), &[]);
        assert!(matches!(
            Decoder::new(&path, None, Version::Dat2),
            Err(FormatError::MissingDimensions { .. })
        ));
        assert!(Decoder::new(&path, Some((640, 480)), Version::Dat2).is_ok());
    }
}

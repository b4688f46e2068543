//! AEDAT 4.0 container codec.
//!
//! An AEDAT 4.0 file starts with the ASCII magic `#!AER-DAT4.0\r\n`,
//! followed by a size-prefixed flatbuffer holding the compression mode and
//! an XML description of the recording's tracks, then a sequence of
//! packets. Each packet is framed by its track ID and byte size and holds
//! a (possibly LZ4-compressed) size-prefixed flatbuffer of event structs.
//!
//! Only the handful of flatbuffer shapes AEDAT 4.0 actually uses are
//! needed, so the tables are read with a small bounds-checked walker
//! instead of generated code.

use crate::formats::FormatError;
use crate::types::DvsEvent;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const MAGIC: &[u8] = b"#!AER-DAT4.0\r\n";

/// Packet compression mode, from the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
}

impl Compression {
    fn from_wire(value: i32, path: &Path) -> Result<Self, FormatError> {
        match value {
            0 => Ok(Compression::None),
            1 | 2 => Ok(Compression::Lz4),
            3 | 4 => Err(FormatError::UnsupportedCompression {
                path: path.to_owned(),
                compression: "zstd".to_owned(),
            }),
            other => Err(FormatError::InvalidData {
                path: path.to_owned(),
                reason: format!("unknown compression mode {}", other),
            }),
        }
    }

    fn to_wire(self) -> i32 {
        match self {
            Compression::None => 0,
            Compression::Lz4 => 1,
        }
    }
}

/// What a track carries, from its 4-character type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Events,
    Frame,
    Imu,
    Triggers,
    Unknown,
}

impl TrackKind {
    fn from_identifier(identifier: &str) -> Self {
        match identifier {
            "EVTS" => TrackKind::Events,
            "FRME" => TrackKind::Frame,
            "IMUS" => TrackKind::Imu,
            "TRIG" => TrackKind::Triggers,
            _ => TrackKind::Unknown,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Events => write!(f, "events"),
            TrackKind::Frame => write!(f, "frame"),
            TrackKind::Imu => write!(f, "imu"),
            TrackKind::Triggers => write!(f, "triggers"),
            TrackKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A track declared in the file's XML description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub dimensions: Option<(u16, u16)>,
}

// ---------------------------------------------------------------------------
// Flatbuffer walking

fn read_u16_at(data: &[u8], position: usize) -> Option<u16> {
    let bytes = data.get(position..position + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32_at(data: &[u8], position: usize) -> Option<u32> {
    let bytes = data.get(position..position + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A flatbuffer table, addressed through its vtable.
struct FlatTable<'a> {
    data: &'a [u8],
    position: usize,
    vtable: usize,
    vtable_length: u16,
}

impl<'a> FlatTable<'a> {
    /// Walks to the root table of a flatbuffer without a size prefix.
    fn root(data: &'a [u8]) -> Option<Self> {
        let position = read_u32_at(data, 0)? as usize;
        let soffset = read_u32_at(data, position)? as i32;
        let vtable = (position as i64 - soffset as i64).try_into().ok()?;
        let vtable_length = read_u16_at(data, vtable)?;
        Some(Self {
            data,
            position,
            vtable,
            vtable_length,
        })
    }

    /// Position of a field's value, or `None` if the field is absent.
    fn field_position(&self, index: usize) -> Option<usize> {
        let slot = 4 + 2 * index;
        if slot + 2 > self.vtable_length as usize {
            return None;
        }
        let offset = read_u16_at(self.data, self.vtable + slot)?;
        if offset == 0 {
            return None;
        }
        Some(self.position + offset as usize)
    }

    fn i32_field(&self, index: usize, default: i32) -> Option<i32> {
        match self.field_position(index) {
            Some(position) => Some(read_u32_at(self.data, position)? as i32),
            None => Some(default),
        }
    }

    fn string_field(&self, index: usize) -> Option<Option<&'a str>> {
        let position = match self.field_position(index) {
            Some(position) => position,
            None => return Some(None),
        };
        let string_position = position + read_u32_at(self.data, position)? as usize;
        let length = read_u32_at(self.data, string_position)? as usize;
        let bytes = self
            .data
            .get(string_position + 4..string_position + 4 + length)?;
        Some(Some(std::str::from_utf8(bytes).ok()?))
    }

    /// Position of the first element and element count of a vector field.
    fn vector_field(&self, index: usize) -> Option<Option<(usize, usize)>> {
        let position = match self.field_position(index) {
            Some(position) => position,
            None => return Some(None),
        };
        let vector_position = position + read_u32_at(self.data, position)? as usize;
        let count = read_u32_at(self.data, vector_position)? as usize;
        Some(Some((vector_position + 4, count)))
    }
}

// Event structs are 16 bytes: i64 t, u16 x, u16 y, u8 polarity, padding.
const EVENT_STRUCT_SIZE: usize = 16;

fn parse_event_packet(data: &[u8], path: &Path) -> Result<Vec<DvsEvent>, FormatError> {
    let invalid = |reason: &str| FormatError::InvalidData {
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    // The packet content carries its own size prefix.
    let data = data.get(4..).ok_or_else(|| invalid("truncated packet"))?;
    let table = FlatTable::root(data).ok_or_else(|| invalid("truncated packet table"))?;
    let (start, count) = match table
        .vector_field(0)
        .ok_or_else(|| invalid("truncated packet table"))?
    {
        Some(vector) => vector,
        None => return Ok(Vec::new()),
    };
    let mut events = Vec::with_capacity(count);
    for index in 0..count {
        let position = start + index * EVENT_STRUCT_SIZE;
        let bytes = data
            .get(position..position + EVENT_STRUCT_SIZE)
            .ok_or_else(|| invalid("truncated event vector"))?;
        let t = i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        events.push(DvsEvent::new(
            t.max(0) as u64,
            u16::from_le_bytes([bytes[8], bytes[9]]),
            u16::from_le_bytes([bytes[10], bytes[11]]),
            bytes[12] != 0,
        ));
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Track description parsing

fn track_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"<node name="(\d+)""#).unwrap())
}

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"<attr key="typeIdentifier"[^>]*>([0-9A-Z_]{4})</attr>"#).unwrap()
    })
}

fn size_x_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"<attr key="sizeX"[^>]*>(\d+)</attr>"#).unwrap())
}

fn size_y_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"<attr key="sizeY"[^>]*>(\d+)</attr>"#).unwrap())
}

/// Extracts the track list from the header's XML description.
fn parse_description(description: &str) -> Vec<Track> {
    let starts: Vec<(usize, u32)> = track_regex()
        .captures_iter(description)
        .filter_map(|captures| {
            let id = captures.get(1)?.as_str().parse().ok()?;
            Some((captures.get(0)?.start(), id))
        })
        .collect();
    let mut tracks = Vec::with_capacity(starts.len());
    for (index, &(start, id)) in starts.iter().enumerate() {
        let end = starts
            .get(index + 1)
            .map_or(description.len(), |&(next, _)| next);
        let block = &description[start..end];
        let kind = identifier_regex()
            .captures(block)
            .map_or(TrackKind::Unknown, |captures| {
                TrackKind::from_identifier(&captures[1])
            });
        let width = size_x_regex()
            .captures(block)
            .and_then(|captures| captures[1].parse().ok());
        let height = size_y_regex()
            .captures(block)
            .and_then(|captures| captures[1].parse().ok());
        tracks.push(Track {
            id,
            kind,
            dimensions: width.zip(height),
        });
    }
    tracks
}

// ---------------------------------------------------------------------------
// Decoder

/// Streaming AEDAT 4.0 decoder.
#[derive(Debug)]
pub struct Decoder {
    path: PathBuf,
    reader: BufReader<File>,
    compression: Compression,
    tracks: Vec<Track>,
}

impl Decoder {
    /// Opens an AEDAT 4.0 file and parses its header and track list.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, FormatError> {
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
                reason: "bad AEDAT 4.0 magic".to_owned(),
            });
        }
        let header_size = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
        let mut header = vec![0u8; header_size as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| FormatError::UnexpectedEof { path: path.clone() })?;
        let invalid = |path: &Path, reason: &str| FormatError::InvalidData {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        let table =
            FlatTable::root(&header).ok_or_else(|| invalid(&path, "truncated file header"))?;
        let compression_value = table
            .i32_field(0, 0)
            .ok_or_else(|| invalid(&path, "truncated file header"))?;
        let compression = Compression::from_wire(compression_value, &path)?;
        let description = table
            .string_field(2)
            .ok_or_else(|| invalid(&path, "truncated file header"))?
            .unwrap_or("");
        let tracks = parse_description(description);
        Ok(Self {
            path,
            reader,
            compression,
            tracks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Decodes the next event packet of `track_id`, skipping packets that
    /// belong to other tracks. Returns `None` at the end of the file.
    pub fn next(&mut self, track_id: u32) -> Result<Option<Vec<DvsEvent>>, FormatError> {
        loop {
            if self.reader.fill_buf()?.is_empty() {
                return Ok(None);
            }
            let packet_track = self.reader.read_i32::<LittleEndian>().map_err(|_| {
                FormatError::UnexpectedEof {
                    path: self.path.clone(),
                }
            })?;
            let size = self.reader.read_i32::<LittleEndian>().map_err(|_| {
                FormatError::UnexpectedEof {
                    path: self.path.clone(),
                }
            })?;
            if size < 0 {
                return Err(FormatError::InvalidData {
                    path: self.path.clone(),
                    reason: format!("negative packet size {}", size),
                });
            }
            if packet_track < 0 || packet_track as u32 != track_id {
                // Not ours, skip the content without decompressing it.
                std::io::copy(
                    &mut (&mut self.reader).take(size as u64),
                    &mut std::io::sink(),
                )?;
                continue;
            }
            let mut content = vec![0u8; size as usize];
            self.reader.read_exact(&mut content).map_err(|_| {
                FormatError::UnexpectedEof {
                    path: self.path.clone(),
                }
            })?;
            let content = match self.compression {
                Compression::None => content,
                Compression::Lz4 => {
                    let mut decoder = lz4::Decoder::new(&content[..])?;
                    let mut decompressed = Vec::new();
                    decoder.read_to_end(&mut decompressed)?;
                    decompressed
                }
            };
            return parse_event_packet(&content, &self.path).map(Some);
        }
    }
}

// ---------------------------------------------------------------------------
// Writing

/// Renders the XML description for a file with a single events track.
pub fn events_track_description(dimensions: (u16, u16)) -> String {
    format!(
        concat!(
            "<dv version=\"2.0\">",
            "<node name=\"outInfo\" path=\"/mainloop/Recorder/\">",
            "<node name=\"0\" path=\"/mainloop/Recorder/outInfo/0/\">",
            "<attr key=\"typeIdentifier\" type=\"string\">EVTS</attr>",
            "<node name=\"info\" path=\"/mainloop/Recorder/outInfo/0/info/\">",
            "<attr key=\"sizeX\" type=\"int\">{}</attr>",
            "<attr key=\"sizeY\" type=\"int\">{}</attr>",
            "</node></node></node></dv>"
        ),
        dimensions.0, dimensions.1
    )
}

/// Builds the size-prefixed header flatbuffer, ready to write after the
/// magic.
pub fn build_io_header(compression: Compression, description: &str) -> Vec<u8> {
    // Layout: root offset, vtable (three fields), table (compression i32,
    // data table position i64, description string offset), string.
    let mut body = Vec::with_capacity(48 + description.len());
    body.write_u32::<LittleEndian>(16).unwrap(); // root table position
    for value in [10u16, 20, 4, 8, 16] {
        body.write_u16::<LittleEndian>(value).unwrap(); // vtable
    }
    body.extend_from_slice(&[0, 0]); // padding to the table
    body.write_u32::<LittleEndian>(12).unwrap(); // vtable offset
    body.write_u32::<LittleEndian>(compression.to_wire() as u32)
        .unwrap();
    body.write_i64::<LittleEndian>(-1).unwrap(); // no data table
    body.write_u32::<LittleEndian>(4).unwrap(); // string follows the table
    body.write_u32::<LittleEndian>(description.len() as u32)
        .unwrap();
    body.extend_from_slice(description.as_bytes());
    body.push(0);
    let mut buffer = Vec::with_capacity(body.len() + 4);
    buffer
        .write_u32::<LittleEndian>(body.len() as u32)
        .unwrap();
    buffer.extend_from_slice(&body);
    buffer
}

/// Builds a size-prefixed event packet flatbuffer, before compression and
/// framing.
pub fn build_event_packet(events: &[DvsEvent]) -> Vec<u8> {
    let mut body = Vec::with_capacity(24 + events.len() * EVENT_STRUCT_SIZE);
    body.write_u32::<LittleEndian>(12).unwrap(); // root table position
    for value in [6u16, 8, 4] {
        body.write_u16::<LittleEndian>(value).unwrap(); // vtable
    }
    body.extend_from_slice(&[0, 0]); // padding to the table
    body.write_u32::<LittleEndian>(8).unwrap(); // vtable offset
    body.write_u32::<LittleEndian>(4).unwrap(); // vector follows the table
    body.write_u32::<LittleEndian>(events.len() as u32).unwrap();
    for event in events {
        body.write_i64::<LittleEndian>(event.t as i64).unwrap();
        body.write_u16::<LittleEndian>(event.x).unwrap();
        body.write_u16::<LittleEndian>(event.y).unwrap();
        body.push(event.on as u8);
        body.extend_from_slice(&[0, 0, 0]);
    }
    let mut buffer = Vec::with_capacity(body.len() + 4);
    buffer
        .write_u32::<LittleEndian>(body.len() as u32)
        .unwrap();
    buffer.extend_from_slice(&body);
    buffer
}

/// Compresses and frames a packet for `track_id`.
pub fn frame_packet(
    track_id: u32,
    content: &[u8],
    compression: Compression,
) -> std::io::Result<Vec<u8>> {
    let content = match compression {
        Compression::None => content.to_vec(),
        Compression::Lz4 => {
            let mut encoder = lz4::EncoderBuilder::new().level(1).build(Vec::new())?;
            encoder.write_all(content)?;
            let (compressed, result) = encoder.finish();
            result?;
            compressed
        }
    };
    let mut framed = Vec::with_capacity(content.len() + 8);
    framed.write_i32::<LittleEndian>(track_id as i32)?;
    framed.write_i32::<LittleEndian>(content.len() as i32)?;
    framed.extend_from_slice(&content);
    Ok(framed)
}

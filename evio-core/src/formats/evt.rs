//! Prophesee EVT raw codec (EVT 2.0 and EVT 3.0).
//!
//! EVT files carry an optional `%`-prefixed text header followed by a
//! stream of little-endian words: 16-bit words for EVT 3.0, 32-bit words
//! for EVT 2.0. Decoding EVT 3.0 is stateful: timestamp, row, base column,
//! and polarity are tracked across words according to the vectorized
//! encoding.
//!
//! The codec yields packets of either CD events or external trigger
//! events; the discovery wrapper upstream keeps only the event packets.

use crate::formats::{self, FormatError, Version};
use crate::types::DvsEvent;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// An external trigger event (edge detected on a trigger signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Timestamp in microseconds
    pub t: u64,
    /// Trigger channel ID
    pub id: u8,
    /// `true` for a rising edge
    pub rising: bool,
}

/// A raw packet decoded from an EVT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Events(Vec<DvsEvent>),
    Triggers(Vec<TriggerEvent>),
}

// EVT 3.0 word types (4-bit field in the MSB).
const EVT3_ADDR_Y: u8 = 0x0;
const EVT3_ADDR_X: u8 = 0x2;
const EVT3_VECT_BASE_X: u8 = 0x3;
const EVT3_VECT_12: u8 = 0x4;
const EVT3_VECT_8: u8 = 0x5;
const EVT3_TIME_LOW: u8 = 0x6;
const EVT3_TIME_HIGH: u8 = 0x8;
const EVT3_EXT_TRIGGER: u8 = 0xA;

// EVT 2.0 word types (4-bit field in the MSB of a 32-bit word).
const EVT2_CD_OFF: u8 = 0x0;
const EVT2_CD_ON: u8 = 0x1;
const EVT2_TIME_HIGH: u8 = 0x8;
const EVT2_EXT_TRIGGER: u8 = 0xA;

// EVT 3.0 timestamp loop handling.
const MAX_TIMESTAMP_BASE: u64 = ((1u64 << 12) - 1) << 12; // 16773120us
const TIME_LOOP: u64 = MAX_TIMESTAMP_BASE + (1 << 12); // 16777216us
const LOOP_THRESHOLD: u64 = 10 << 12;

/// Read buffer size in bytes.
const READ_CHUNK: usize = 1 << 20;

#[inline]
fn evt3_type(word: u16) -> u8 {
    ((word >> 12) & 0xF) as u8
}

#[inline]
fn evt3_payload_12(word: u16) -> u16 {
    word & 0x0FFF
}

#[inline]
fn evt3_coordinate(word: u16) -> u16 {
    word & 0x07FF // bits 10:0
}

#[inline]
fn evt3_polarity(word: u16) -> bool {
    (word >> 11) & 0x1 == 1
}

/// Streaming EVT decoder.
#[derive(Debug)]
pub struct Decoder {
    path: PathBuf,
    reader: BufReader<File>,
    version: Version,
    dimensions: (u16, u16),
    t0: u64,
    buffer: Vec<u8>,
    pending: Option<Packet>,

    // EVT 3.0 state
    time_base: u64,
    current_time: u64,
    n_time_high_loops: u64,
    first_time_base_set: bool,
    current_y: u16,
    current_base_x: u16,
    current_polarity: bool,

    // EVT 2.0 state
    time_high: u64,
}

impl Decoder {
    /// Opens an EVT file and parses its text header.
    ///
    /// `dimensions_fallback` and `version_fallback` are used only when the
    /// header does not carry the corresponding information; a file whose
    /// geometry cannot be resolved at all is rejected.
    pub fn new(
        path: impl AsRef<Path>,
        dimensions_fallback: Option<(u16, u16)>,
        version_fallback: Version,
    ) -> Result<Self, FormatError> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let header = formats::parse_text_header(&mut reader)?;
        let version = match header.evt.as_deref() {
            Some("3.0") => Version::Evt3,
            Some("2.0") => Version::Evt2,
            Some("2.1") => Version::Evt21,
            Some(other) => {
                return Err(FormatError::UnsupportedVersion {
                    path,
                    version: other.to_owned(),
                })
            }
            None => match header.format.as_deref() {
                Some("EVT3") => Version::Evt3,
                Some("EVT2") => Version::Evt2,
                Some("EVT2.1") | Some("EVT21") => Version::Evt21,
                Some(other) => {
                    return Err(FormatError::UnsupportedVersion {
                        path,
                        version: other.to_owned(),
                    })
                }
                None => version_fallback,
            },
        };
        if !matches!(version, Version::Evt2 | Version::Evt3) {
            return Err(FormatError::UnsupportedVersion {
                path,
                version: version.to_string(),
            });
        }
        let dimensions = match header.dimensions().or(dimensions_fallback) {
            Some(dimensions) => dimensions,
            None => return Err(FormatError::MissingDimensions { path }),
        };
        Ok(Self {
            path,
            reader,
            version,
            dimensions,
            t0: header.t0.unwrap_or(0),
            buffer: vec![0u8; READ_CHUNK],
            pending: None,
            time_base: 0,
            current_time: 0,
            n_time_high_loops: 0,
            first_time_base_set: false,
            current_y: 0,
            current_base_x: 0,
            current_polarity: false,
            time_high: 0,
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

    /// Time offset from the header, already applied to yielded timestamps.
    pub fn t0(&self) -> u64 {
        self.t0
    }

    /// Decodes the next raw packet, or `None` at the end of the file.
    pub fn next(&mut self) -> Result<Option<Packet>, FormatError> {
        if let Some(packet) = self.pending.take() {
            return Ok(Some(packet));
        }
        loop {
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
            let mut events = Vec::new();
            let mut triggers = Vec::new();
            match self.version {
                Version::Evt3 => {
                    let words: Vec<u16> = self.buffer[..filled]
                        .chunks_exact(2)
                        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                        .collect();
                    self.decode_evt3(&words, &mut events, &mut triggers);
                }
                _ => {
                    let words: Vec<u32> = self.buffer[..filled]
                        .chunks_exact(4)
                        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                        .collect();
                    self.decode_evt2(&words, &mut events, &mut triggers);
                }
            }
            if !events.is_empty() {
                if !triggers.is_empty() {
                    self.pending = Some(Packet::Triggers(triggers));
                }
                return Ok(Some(Packet::Events(events)));
            }
            if !triggers.is_empty() {
                return Ok(Some(Packet::Triggers(triggers)));
            }
        }
    }

    /// EVT 3.0 word-stream state machine.
    fn decode_evt3(
        &mut self,
        words: &[u16],
        events: &mut Vec<DvsEvent>,
        triggers: &mut Vec<TriggerEvent>,
    ) {
        let mut iter = words.iter();

        // Skip until the first TIME_HIGH so that the time base is known.
        if !self.first_time_base_set {
            for &word in iter.by_ref() {
                if evt3_type(word) == EVT3_TIME_HIGH {
                    self.time_base = (evt3_payload_12(word) as u64) << 12;
                    self.current_time = self.time_base;
                    self.first_time_base_set = true;
                    break;
                }
            }
        }

        for &word in iter {
            match evt3_type(word) {
                EVT3_ADDR_X => {
                    events.push(DvsEvent::new(
                        self.t0 + self.current_time,
                        evt3_coordinate(word),
                        self.current_y,
                        evt3_polarity(word),
                    ));
                }

                EVT3_VECT_12 => {
                    let valid = evt3_payload_12(word) as u32;
                    self.emit_vector(valid, 12, events);
                }

                EVT3_VECT_8 => {
                    let valid = (word & 0x00FF) as u32;
                    self.emit_vector(valid, 8, events);
                }

                EVT3_ADDR_Y => {
                    self.current_y = evt3_coordinate(word);
                }

                EVT3_VECT_BASE_X => {
                    self.current_base_x = evt3_coordinate(word);
                    self.current_polarity = evt3_polarity(word);
                }

                EVT3_TIME_HIGH => {
                    self.advance_time_base(word);
                }

                EVT3_TIME_LOW => {
                    self.current_time = self.time_base + evt3_payload_12(word) as u64;
                }

                EVT3_EXT_TRIGGER => {
                    triggers.push(TriggerEvent {
                        t: self.t0 + self.current_time,
                        id: ((word >> 8) & 0x0F) as u8,
                        rising: word & 0x1 == 1,
                    });
                }

                // CONTINUED_4 / OTHERS / CONTINUED_12 and reserved types
                // carry no CD data and are skipped.
                _ => {}
            }
        }
    }

    /// Processes a TIME_HIGH word, detecting 24-bit timestamp loops.
    #[inline]
    fn advance_time_base(&mut self, word: u16) {
        let mut new_time_base =
            ((evt3_payload_12(word) as u64) << 12) + self.n_time_high_loops * TIME_LOOP;
        if self.time_base > new_time_base
            && self.time_base - new_time_base >= MAX_TIMESTAMP_BASE - LOOP_THRESHOLD
        {
            new_time_base += TIME_LOOP;
            self.n_time_high_loops += 1;
        }
        self.time_base = new_time_base;
        self.current_time = self.time_base;
    }

    /// Emits CD events for the set bits of a VECT_12 or VECT_8 word.
    #[inline]
    fn emit_vector(&mut self, mut valid: u32, count: u16, events: &mut Vec<DvsEvent>) {
        let end_x = self.current_base_x + count;
        for x in self.current_base_x..end_x {
            if valid & 0x1 != 0 {
                events.push(DvsEvent::new(
                    self.t0 + self.current_time,
                    x,
                    self.current_y,
                    self.current_polarity,
                ));
            }
            valid >>= 1;
        }
        self.current_base_x = end_x;
    }

    /// EVT 2.0 32-bit word decoding.
    fn decode_evt2(
        &mut self,
        words: &[u32],
        events: &mut Vec<DvsEvent>,
        triggers: &mut Vec<TriggerEvent>,
    ) {
        for &word in words {
            let word_type = ((word >> 28) & 0xF) as u8;
            match word_type {
                EVT2_CD_OFF | EVT2_CD_ON => {
                    let t = self.time_high + ((word >> 22) & 0x3F) as u64;
                    events.push(DvsEvent::new(
                        self.t0 + t,
                        ((word >> 11) & 0x7FF) as u16,
                        (word & 0x7FF) as u16,
                        word_type == EVT2_CD_ON,
                    ));
                }
                EVT2_TIME_HIGH => {
                    self.time_high = ((word & 0x0FFF_FFFF) as u64) << 6;
                }
                EVT2_EXT_TRIGGER => {
                    triggers.push(TriggerEvent {
                        t: self.t0 + self.time_high + ((word >> 22) & 0x3F) as u64,
                        id: ((word >> 8) & 0x1F) as u8,
                        rising: word & 0x1 == 1,
                    });
                }
                _ => {}
            }
        }
    }
}

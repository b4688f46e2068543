//! Byte-level codecs for the supported container formats.
//!
//! Each codec owns its file handle, resolves header metadata eagerly at
//! construction, and yields raw per-format packets from `next`. The
//! normalization to canonical events lives in [`crate::decoder`]; nothing
//! in this module flips axes, clamps polarities, or filters tracks.

pub mod aedat;
pub mod dat;
pub mod es;
pub mod evt;

use std::fmt;
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the format codecs.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path:?}: invalid data: {reason}")]
    InvalidData { path: PathBuf, reason: String },

    #[error("{path:?}: unexpected end of file")]
    UnexpectedEof { path: PathBuf },

    #[error("{path:?}: unsupported version \"{version}\"")]
    UnsupportedVersion { path: PathBuf, version: String },

    #[error("{path:?}: unsupported compression \"{compression}\"")]
    UnsupportedCompression { path: PathBuf, compression: String },

    #[error("{path:?}: the header does not specify the sensor size and no fallback was provided")]
    MissingDimensions { path: PathBuf },
}

/// Format version discriminator for the header-less Prophesee formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Dat1,
    Dat2,
    Evt2,
    Evt21,
    Evt3,
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Dat1 => write!(formatter, "dat1"),
            Version::Dat2 => write!(formatter, "dat2"),
            Version::Evt2 => write!(formatter, "evt2"),
            Version::Evt21 => write!(formatter, "evt2.1"),
            Version::Evt3 => write!(formatter, "evt3"),
        }
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dat1" => Ok(Version::Dat1),
            "dat2" => Ok(Version::Dat2),
            "evt2" => Ok(Version::Evt2),
            "evt2.1" => Ok(Version::Evt21),
            "evt3" => Ok(Version::Evt3),
            _ => Err(format!("unknown version \"{}\"", value)),
        }
    }
}

/// Metadata collected from a `%`-prefixed text header (DAT and EVT files).
#[derive(Debug, Default)]
pub(crate) struct TextHeader {
    pub width: Option<u16>,
    pub height: Option<u16>,
    /// From a "% format EVT3" style line
    pub format: Option<String>,
    /// From a "% evt 3.0" style line
    pub evt: Option<String>,
    /// From a "% version 2" style line
    pub version: Option<String>,
    /// From a "% t0 123456" style line, in microseconds
    pub t0: Option<u64>,
}

impl TextHeader {
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some((width, height)),
            _ => None,
        }
    }
}

/// Consumes the text header lines at the start of `reader`, if any.
///
/// Header lines start with '%'; a "% end" line or the first non-'%' byte
/// terminates the header, leaving the reader at the first data byte.
pub(crate) fn parse_text_header<R: BufRead>(reader: &mut R) -> std::io::Result<TextHeader> {
    let mut header = TextHeader::default();
    loop {
        let peeked = reader.fill_buf()?;
        if peeked.is_empty() || peeked[0] != b'%' {
            break;
        }
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.starts_with("% end") {
            break;
        }
        parse_text_header_line(&mut header, &line);
    }
    Ok(header)
}

fn parse_text_header_line(header: &mut TextHeader, line: &str) {
    let line = line.trim_end();
    if let Some(format) = line.strip_prefix("% format ") {
        // "% format EVT3;width=1280;height=720"
        let mut parts = format.split(';');
        if let Some(name) = parts.next() {
            header.format = Some(name.trim().to_owned());
        }
        for part in parts {
            if let Some(index) = part.find('=') {
                let name = &part[..index];
                let value = &part[index + 1..];
                match name {
                    "width" => header.width = value.parse().ok(),
                    "height" => header.height = value.parse().ok(),
                    _ => {}
                }
            }
        }
    } else if let Some(geometry) = line.strip_prefix("% geometry ") {
        // "% geometry 1280x720"
        if let Some(index) = geometry.find('x') {
            if let (Ok(width), Ok(height)) =
                (geometry[..index].parse(), geometry[index + 1..].parse())
            {
                header.width = Some(width);
                header.height = Some(height);
            }
        }
    } else if let Some(value) = line.strip_prefix("% evt ") {
        header.evt = Some(value.trim().to_owned());
    } else if let Some(value) = line.strip_prefix("% version ") {
        header.version = Some(value.trim().to_owned());
    } else if let Some(value) = line.strip_prefix("% t0 ") {
        header.t0 = value.trim().parse().ok();
    } else if let Some(value) = line.strip_prefix("% Width ") {
        header.width = value.trim().parse().ok();
    } else if let Some(value) = line.strip_prefix("% Height ") {
        header.height = value.trim().parse().ok();
    } else if let Some(value) = line.strip_prefix("% Version ") {
        header.version = Some(value.trim().to_owned());
    }
}

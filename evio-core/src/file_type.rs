//! Recording file-type detection.
//!
//! Each supported container format is recognized either by a fixed magic
//! byte sequence or, for the header-less Prophesee formats, by its file
//! extension.

use crate::stream::StreamError;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// The four supported recording container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// AEDAT 4 container (multiple logical tracks, lz4/zstd packets)
    Aedat,
    /// Prophesee DAT (fixed-size records with a 4-bit payload field)
    Dat,
    /// Event Stream (delta-coded DVS or ATIS events)
    Es,
    /// Prophesee EVT raw (EVT 2.0 / EVT 3.0 word streams)
    Evt,
}

impl FileType {
    /// All supported file types, in detection order.
    pub const ALL: [FileType; 4] = [FileType::Aedat, FileType::Dat, FileType::Es, FileType::Evt];

    /// The magic byte sequence at the start of files of this type, if the
    /// format has one.
    pub fn magic(self) -> Option<&'static [u8]> {
        match self {
            FileType::Aedat => Some(b"#!AER-DAT4.0\r\n"),
            FileType::Dat => None,
            FileType::Es => Some(b"Event Stream"),
            FileType::Evt => None,
        }
    }

    /// File extensions (with leading dot) accepted for this type.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            FileType::Aedat => &[".aedat", ".aedat4"],
            FileType::Dat => &[".dat"],
            FileType::Es => &[".es"],
            FileType::Evt => &[".evt", ".raw"],
        }
    }

    /// Determines the type of the file at `path`.
    ///
    /// Reads the longest known magic prefix and matches it byte-for-byte
    /// against each format's signature. If no signature matches (or the
    /// file cannot be read), falls back to the extension. Fails with
    /// [`StreamError::UnknownFileType`] if neither matches.
    pub fn guess(path: impl AsRef<Path>) -> Result<FileType, StreamError> {
        let path = path.as_ref();
        let longest_magic = Self::ALL
            .iter()
            .filter_map(|file_type| file_type.magic())
            .map(|magic| magic.len())
            .max()
            .unwrap_or(0);
        if let Ok(mut file) = File::open(path) {
            let mut buffer = vec![0u8; longest_magic];
            let mut read = 0;
            // A short file may still carry a full (shorter) magic.
            while read < buffer.len() {
                match file.read(&mut buffer[read..]) {
                    Ok(0) => break,
                    Ok(count) => read += count,
                    Err(_) => break,
                }
            }
            for file_type in Self::ALL {
                if let Some(magic) = file_type.magic() {
                    if read >= magic.len() && &buffer[..magic.len()] == magic {
                        return Ok(file_type);
                    }
                }
            }
        }
        if let Some(extension) = path.extension().and_then(|extension| extension.to_str()) {
            let extension = format!(".{}", extension);
            for file_type in Self::ALL {
                if file_type.extensions().contains(&extension.as_str()) {
                    return Ok(file_type);
                }
            }
        }
        Err(StreamError::UnknownFileType(path.to_owned()))
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Aedat => write!(formatter, "aedat"),
            FileType::Dat => write!(formatter, "dat"),
            FileType::Es => write!(formatter, "es"),
            FileType::Evt => write!(formatter, "evt"),
        }
    }
}

//! Event file writers.
//!
//! [`save`] encodes a stream into any of the supported containers, picking
//! the format from the target's extension. Writers mirror the decoders'
//! normalization: Event Stream rows are flipped back to the bottom-up
//! convention on the way out, and AEDAT packets are framed and compressed
//! per the header's compression mode.

use crate::file_type::FileType;
use crate::formats::{aedat, es, Version};
use crate::stream::{EventIterator, Stream, StreamError};
use crate::timestamp::timestamp_to_timecode;
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while writing event files.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("cannot determine the output format of {0:?}")]
    UnknownFileType(PathBuf),

    #[error("{file_type} files cannot be written as {version}")]
    UnsupportedVersion {
        file_type: FileType,
        version: Version,
    },
}

/// Options for [`save`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// On-wire version for .dat and .evt/.raw targets; defaults to the
    /// newest supported version.
    pub version: Option<Version>,
    /// Rebases timestamps so that the output starts at zero.
    pub zero_t0: bool,
    /// Packet compression for .aedat4 targets.
    pub compression: aedat::Compression,
    /// Bypasses extension-based format selection.
    pub file_type: Option<FileType>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            version: None,
            zero_t0: true,
            compression: aedat::Compression::Lz4,
            file_type: None,
        }
    }
}

/// Picks an output format from a path's extension.
fn output_file_type(path: &Path) -> Result<FileType, OutputError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    for file_type in FileType::ALL {
        if file_type
            .extensions()
            .iter()
            .any(|extension| name.ends_with(extension))
        {
            return Ok(file_type);
        }
    }
    Err(OutputError::UnknownFileType(path.to_owned()))
}

/// Writes `stream` to `path`, choosing the container from the extension
/// (or `options.file_type`). A `.csv` extension produces a text table
/// instead of a binary container.
///
/// Returns the timecode of the original stream start when timestamps were
/// rebased, and `00:00:00.000000` otherwise.
pub fn save<S: Stream>(
    stream: &S,
    path: impl AsRef<Path>,
    options: SaveOptions,
) -> Result<String, OutputError> {
    let path = path.as_ref();
    let t0 = if options.zero_t0 {
        stream.time_range_us()?.0
    } else {
        0
    };
    let is_csv = path
        .extension()
        .map_or(false, |extension| extension.eq_ignore_ascii_case("csv"));
    if is_csv {
        write_csv(stream, path, t0)?;
        return Ok(timestamp_to_timecode(t0));
    }
    let file_type = match options.file_type {
        Some(file_type) => file_type,
        None => output_file_type(path)?,
    };
    let writer = BufWriter::new(File::create(path)?);
    match file_type {
        FileType::Aedat => write_aedat(stream, writer, t0, options.compression)?,
        FileType::Dat => {
            match options.version.unwrap_or(Version::Dat2) {
                Version::Dat2 => {}
                version => {
                    return Err(OutputError::UnsupportedVersion { file_type, version });
                }
            }
            write_dat(stream, writer, t0)?;
        }
        FileType::Es => write_es(stream, writer, t0)?,
        FileType::Evt => match options.version.unwrap_or(Version::Evt3) {
            Version::Evt3 => write_evt3(stream, writer, t0)?,
            Version::Evt2 => write_evt2(stream, writer, t0)?,
            version => {
                return Err(OutputError::UnsupportedVersion { file_type, version });
            }
        },
    }
    Ok(timestamp_to_timecode(t0))
}

fn write_csv<S: Stream>(stream: &S, path: &Path, t0: u64) -> Result<(), OutputError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "t,x,y,on")?;
    let mut iterator = stream.iterate()?;
    while let Some(events) = iterator.next()? {
        for event in events {
            writeln!(
                writer,
                "{},{},{},{}",
                event.t - t0,
                event.x,
                event.y,
                event.on as u8
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_dat<S: Stream>(
    stream: &S,
    mut writer: impl Write,
    t0: u64,
) -> Result<(), OutputError> {
    let (width, height) = stream.dimensions();
    write!(
        writer,
        "% Version 2\n% Width {}\n% Height {}\n% end\n",
        width, height
    )?;
    writer.write_all(&[0x0C, 8])?;
    let mut iterator = stream.iterate()?;
    while let Some(events) = iterator.next()? {
        for event in events {
            writer.write_u32::<LittleEndian>((event.t - t0) as u32)?;
            let data =
                (event.x as u32) | ((event.y as u32) << 14) | ((event.on as u32) << 28);
            writer.write_u32::<LittleEndian>(data)?;
        }
    }
    writer.flush()?;
    Ok(())
}

// EVT 3.0 word composition.
const EVT3_ADDR_Y: u16 = 0x0000;
const EVT3_ADDR_X: u16 = 0x2000;
const EVT3_TIME_LOW: u16 = 0x6000;
const EVT3_TIME_HIGH: u16 = 0x8000;

fn write_evt3<S: Stream>(
    stream: &S,
    mut writer: impl Write,
    t0: u64,
) -> Result<(), OutputError> {
    let (width, height) = stream.dimensions();
    write!(
        writer,
        "% evt 3.0\n% format EVT3;width={};height={}\n% geometry {}x{}\n% end\n",
        width, height, width, height
    )?;
    let mut time_high: Option<u64> = None;
    let mut time_low: Option<u64> = None;
    let mut row: Option<u16> = None;
    let mut iterator = stream.iterate()?;
    while let Some(events) = iterator.next()? {
        for event in events {
            let t = event.t - t0;
            if time_high != Some(t >> 12) {
                writer
                    .write_u16::<LittleEndian>(EVT3_TIME_HIGH | ((t >> 12) & 0xFFF) as u16)?;
                time_high = Some(t >> 12);
                time_low = None;
            }
            if time_low != Some(t & 0xFFF) {
                writer.write_u16::<LittleEndian>(EVT3_TIME_LOW | (t & 0xFFF) as u16)?;
                time_low = Some(t & 0xFFF);
            }
            if row != Some(event.y) {
                writer.write_u16::<LittleEndian>(EVT3_ADDR_Y | event.y)?;
                row = Some(event.y);
            }
            writer
                .write_u16::<LittleEndian>(EVT3_ADDR_X | ((event.on as u16) << 11) | event.x)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_evt2<S: Stream>(
    stream: &S,
    mut writer: impl Write,
    t0: u64,
) -> Result<(), OutputError> {
    let (width, height) = stream.dimensions();
    write!(
        writer,
        "% evt 2.0\n% format EVT2;width={};height={}\n% geometry {}x{}\n% end\n",
        width, height, width, height
    )?;
    let mut time_high: Option<u64> = None;
    let mut iterator = stream.iterate()?;
    while let Some(events) = iterator.next()? {
        for event in events {
            let t = event.t - t0;
            if time_high != Some(t >> 6) {
                writer.write_u32::<LittleEndian>(
                    (0x8 << 28) | ((t >> 6) & 0x0FFF_FFFF) as u32,
                )?;
                time_high = Some(t >> 6);
            }
            let word = ((event.on as u32) << 28)
                | (((t & 0x3F) as u32) << 22)
                | ((event.x as u32) << 11)
                | event.y as u32;
            writer.write_u32::<LittleEndian>(word)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_es<S: Stream>(stream: &S, mut writer: impl Write, t0: u64) -> Result<(), OutputError> {
    let (width, height) = stream.dimensions();
    writer.write_all(es::MAGIC)?;
    writer.write_all(&[es::MAJOR_VERSION, 0, 0, 1])?;
    writer.write_u16::<LittleEndian>(width)?;
    writer.write_u16::<LittleEndian>(height)?;
    let mut previous = 0u64;
    let mut iterator = stream.iterate()?;
    while let Some(events) = iterator.next()? {
        for event in events {
            let t = event.t - t0;
            let mut delta = t - previous;
            previous = t;
            while delta > 126 {
                writer.write_all(&[0xFF])?;
                delta -= 127;
            }
            writer.write_all(&[((delta as u8) << 1) | event.on as u8])?;
            writer.write_u16::<LittleEndian>(event.x)?;
            // Rows are stored bottom-up on the wire.
            writer.write_u16::<LittleEndian>(height - 1 - event.y)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_aedat<S: Stream>(
    stream: &S,
    mut writer: impl Write,
    t0: u64,
    compression: aedat::Compression,
) -> Result<(), OutputError> {
    writer.write_all(aedat::MAGIC)?;
    let description = aedat::events_track_description(stream.dimensions());
    writer.write_all(&aedat::build_io_header(compression, &description))?;
    let mut iterator = stream.iterate()?;
    while let Some(mut events) = iterator.next()? {
        if t0 > 0 {
            for event in &mut events {
                event.t -= t0;
            }
        }
        let content = aedat::build_event_packet(&events);
        writer.write_all(&aedat::frame_packet(0, &content, compression)?)?;
    }
    writer.flush()?;
    Ok(())
}

//! Event file conversion CLI application.
//!
//! Converts between event-camera recording formats (AEDAT 4.0, DAT,
//! Event Stream, EVT raw) with optional slicing and spatial filtering,
//! or prints a summary of a recording.

use anyhow::{Context, Result};
use clap::Parser;
use evio_core::formats::aedat::Compression;
use evio_core::{Array, Decoder, Options, SaveOptions, Stream, TransposeAction, Version};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

/// Event camera recording converter.
///
/// Reads .aedat4, .dat, .es and .raw recordings and writes them to any of
/// those formats (or .csv). Without an output path, prints a summary of
/// the recording instead.
#[derive(Parser, Debug)]
#[command(name = "evio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input event file path (.aedat4, .dat, .es, .raw)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file path (.aedat4, .dat, .es, .raw, .csv)
    ///
    /// The output format is determined by the file extension. When
    /// omitted, a summary of the input is printed instead.
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Keep only events at or after this timecode (HH:MM:SS.ffffff or
    /// seconds)
    #[arg(long, value_name = "TIMECODE")]
    start: Option<String>,

    /// Keep only events strictly before this timecode
    #[arg(long, value_name = "TIMECODE")]
    end: Option<String>,

    /// Keep only events at positions [START, END) of the record sequence
    ///
    /// Format: START..END, for instance 100000..300000.
    #[arg(long, value_name = "RANGE")]
    events: Option<String>,

    /// Keep only events in a spatial window, re-anchored to its origin
    ///
    /// Format: LEFT,RIGHT,TOP,BOTTOM in pixels.
    #[arg(long, value_name = "WINDOW")]
    crop: Option<String>,

    /// Apply a geometric transposition
    ///
    /// One of: flip_left_right, flip_bottom_top,
    /// rotate_90_counterclockwise, rotate_180,
    /// rotate_270_counterclockwise, flip_up_diagonal, flip_down_diagonal.
    #[arg(long, value_name = "ACTION")]
    transpose: Option<String>,

    /// Drop all ON events
    #[arg(long)]
    remove_on: bool,

    /// Drop all OFF events
    #[arg(long)]
    remove_off: bool,

    /// AEDAT track to decode (defaults to the first events track)
    #[arg(long, value_name = "ID")]
    track: Option<u32>,

    /// Sensor size to assume when the input declares none
    ///
    /// Format: WIDTHxHEIGHT, for instance 1280x720.
    #[arg(long, value_name = "SIZE")]
    dimensions: Option<String>,

    /// On-wire version for .dat and .raw outputs (dat2, evt2, evt3)
    #[arg(long, value_name = "VERSION")]
    format_version: Option<String>,

    /// Keep absolute timestamps instead of rebasing the output to zero
    #[arg(long)]
    no_zero_t0: bool,

    /// Write AEDAT packets without LZ4 compression
    #[arg(long)]
    uncompressed: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn parse_dimensions(value: &str) -> Result<(u16, u16)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .context("Invalid size. Use WIDTHxHEIGHT, for instance 1280x720")?;
    Ok((
        width.trim().parse().context("Invalid width")?,
        height.trim().parse().context("Invalid height")?,
    ))
}

fn parse_event_range(value: &str) -> Result<(usize, usize)> {
    let (start, end) = value
        .split_once("..")
        .context("Invalid range. Use START..END, for instance 100000..300000")?;
    Ok((
        start.trim().parse().context("Invalid range start")?,
        end.trim().parse().context("Invalid range end")?,
    ))
}

fn parse_crop(value: &str) -> Result<(u16, u16, u16, u16)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        anyhow::bail!("Invalid window. Use LEFT,RIGHT,TOP,BOTTOM");
    }
    Ok((
        parts[0].parse().context("Invalid left bound")?,
        parts[1].parse().context("Invalid right bound")?,
        parts[2].parse().context("Invalid top bound")?,
        parts[3].parse().context("Invalid bottom bound")?,
    ))
}

/// Runs one pass over a stream and buffers the result, so that optional
/// filters with different concrete types can be chained.
fn materialize<S: Stream>(stream: S) -> Result<Array> {
    let dimensions = stream.dimensions();
    let events = stream.to_array().context("Failed to read events")?;
    Ok(Array::new(events, dimensions))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb
    };

    let start_time = Instant::now();

    progress.set_message(format!(
        "Opening {:?}...",
        args.input.file_name().unwrap_or_default()
    ));

    let options = Options {
        track_id: args.track,
        dimensions_fallback: args
            .dimensions
            .as_deref()
            .map(parse_dimensions)
            .transpose()?,
        version_fallback: None,
        ..Options::default()
    };
    let decoder = Decoder::open_with(&args.input, options).context("Failed to open input")?;
    let file_type = decoder.file_type();

    let output = match &args.output {
        Some(output) => output,
        None => {
            // Summary mode.
            let (start, end) = decoder.time_range().context("Failed to scan input")?;
            let events = decoder.to_array().context("Failed to read events")?;
            let (width, height) = decoder.dimensions();
            progress.finish_and_clear();
            println!("Input:       {:?}", args.input);
            println!("Format:      {}", file_type);
            println!("Sensor:      {}x{}", width, height);
            println!("Events:      {}", events.len());
            println!("Time range:  {} .. {}", start, end);
            return Ok(());
        }
    };

    progress.set_message("Reading events...");
    let mut stream = materialize(decoder)?;

    if args.start.is_some() || args.end.is_some() {
        let (range_start, range_end) = stream.time_range().context("Failed to scan input")?;
        let start = args.start.clone().unwrap_or(range_start);
        let end = args.end.clone().unwrap_or(range_end);
        stream = materialize(
            stream
                .time_slice(start, end, false)
                .context("Invalid time slice")?,
        )?;
    }
    if let Some(range) = &args.events {
        let (start, end) = parse_event_range(range)?;
        stream = materialize(stream.event_slice(start, end).context("Invalid event slice")?)?;
    }
    if let Some(window) = &args.crop {
        let (left, right, top, bottom) = parse_crop(window)?;
        stream = materialize(
            stream
                .crop(left, right, top, bottom)
                .context("Invalid crop window")?,
        )?;
    }
    if let Some(action) = &args.transpose {
        let action = TransposeAction::from_str(action)
            .map_err(|error| anyhow::anyhow!("{}", error))?;
        stream = materialize(stream.transpose(action))?;
    }
    if args.remove_on {
        stream = materialize(stream.remove_on_events())?;
    }
    if args.remove_off {
        stream = materialize(stream.remove_off_events())?;
    }

    let count = stream.len();
    progress.set_message(format!(
        "Writing {} events to {:?}...",
        count,
        output.file_name().unwrap_or_default()
    ));

    let version = args
        .format_version
        .as_deref()
        .map(Version::from_str)
        .transpose()
        .map_err(|error| anyhow::anyhow!("{}", error))?;
    let t0 = stream
        .save(
            output,
            SaveOptions {
                version,
                zero_t0: !args.no_zero_t0,
                compression: if args.uncompressed {
                    Compression::None
                } else {
                    Compression::Lz4
                },
                file_type: None,
            },
        )
        .context("Failed to write output")?;

    let total_duration = start_time.elapsed();
    let (width, height) = stream.dimensions();

    progress.finish_with_message(format!(
        "Done! Wrote {} events in {:.2}s (sensor: {}x{})",
        count,
        total_duration.as_secs_f64(),
        width,
        height
    ));

    if !args.quiet {
        let events_per_sec = count as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", output);
        eprintln!("  Events:       {}", count);
        eprintln!("  Sensor:       {}x{}", width, height);
        eprintln!("  Original t0:  {}", t0);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} events/s", events_per_sec);
    }

    Ok(())
}

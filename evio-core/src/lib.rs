//! A unifying, lazy streaming layer over event-camera recordings.
//!
//! Event cameras ship their recordings in a zoo of containers: AEDAT 4.0,
//! Prophesee DAT and EVT raw files, and Event Stream. This crate decodes
//! all of them into one canonical record, the [`DvsEvent`], and exposes
//! recordings as replayable [`Stream`]s that can be sliced, cropped,
//! masked, transposed, and written back to any of the supported formats.
//!
//! ```
//! use evio_core::{Array, DvsEvent, Stream};
//!
//! let stream = Array::new(
//!     vec![
//!         DvsEvent::new(2, 10, 20, true),
//!         DvsEvent::new(71, 11, 20, false),
//!         DvsEvent::new(828, 12, 21, true),
//!     ],
//!     (640, 480),
//! );
//! let cropped = stream.crop(10, 20, 20, 30).unwrap();
//! assert_eq!(cropped.dimensions(), (10, 10));
//! assert_eq!(cropped.to_array().unwrap().len(), 3);
//! ```
//!
//! Files are opened with [`Decoder`], which guesses the container from
//! the content's magic bytes, falling back to the extension.

pub mod decoder;
pub mod file_type;
pub mod filter;
pub mod formats;
pub mod output;
pub mod stream;
pub mod timestamp;
pub mod types;

pub use decoder::{Decoder, Options};
pub use file_type::FileType;
pub use filter::{Crop, EventSlice, Map, Mask, MaskArray, TimeSlice, Transpose, TransposeAction};
pub use formats::{FormatError, Version};
pub use output::{OutputError, SaveOptions};
pub use stream::{Array, EventIterator, Stream, StreamError};
pub use timestamp::{
    parse_timestamp, timestamp_to_seconds, timestamp_to_timecode, Time, TimecodeError,
};
pub use types::DvsEvent;

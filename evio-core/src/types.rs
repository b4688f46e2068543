//! Canonical event record shared by every stream component.
//!
//! All supported container formats are normalized to this layout before
//! they reach filters or consumers.

/// A decoded DVS (change detection) event.
///
/// Timestamps are absolute microseconds since the start of the recording.
/// The `on` flag encodes the polarity: `true` for an increase in brightness,
/// `false` for a decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DvsEvent {
    /// Timestamp in microseconds
    pub t: u64,
    /// X coordinate of the pixel (left-right direction)
    pub x: u16,
    /// Y coordinate of the pixel (top-bottom direction)
    pub y: u16,
    /// Event polarity: `true` = ON (increase in brightness)
    pub on: bool,
}

impl DvsEvent {
    /// Creates a new DVS event.
    #[inline]
    pub fn new(t: u64, x: u16, y: u16, on: bool) -> Self {
        Self { t, x, y, on }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = DvsEvent::new(12345, 100, 200, true);
        assert_eq!(event.t, 12345);
        assert_eq!(event.x, 100);
        assert_eq!(event.y, 200);
        assert!(event.on);
    }
}

//! Composable stream filters.
//!
//! Each filter owns exactly one parent stream and re-exposes the
//! [`Stream`] contract; each filter iterator owns exactly one parent
//! iterator. Filters that terminate before exhausting their parent
//! (time and event slices) close the parent iterator so that resources
//! are released deterministically.
//!
//! Several filters mutate batch fields in place. This is safe because
//! every pass owns a private copy of its batches, established at the true
//! source (see [`crate::stream::Array`]).

use crate::stream::{EventIterator, Stream, StreamError};
use crate::timestamp::{parse_timestamp, Time};
use crate::types::DvsEvent;
use std::str::FromStr;

/// Applies a batch-to-batch transform function.
#[derive(Debug, Clone)]
pub struct Map<P, F> {
    parent: P,
    function: F,
}

impl<P, F> Map<P, F>
where
    P: Stream,
    F: Fn(Vec<DvsEvent>) -> Vec<DvsEvent> + Clone,
{
    pub fn new(parent: P, function: F) -> Self {
        Self { parent, function }
    }
}

impl<P, F> Stream for Map<P, F>
where
    P: Stream,
    F: Fn(Vec<DvsEvent>) -> Vec<DvsEvent> + Clone,
{
    type Iter = MapIterator<P::Iter, F>;

    fn dimensions(&self) -> (u16, u16) {
        self.parent.dimensions()
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        self.parent.time_range_us()
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(MapIterator {
            parent: self.parent.iterate()?,
            function: self.function.clone(),
        })
    }
}

pub struct MapIterator<I, F> {
    parent: I,
    function: F,
}

impl<I, F> EventIterator for MapIterator<I, F>
where
    I: EventIterator,
    F: Fn(Vec<DvsEvent>) -> Vec<DvsEvent>,
{
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        while let Some(events) = self.parent.next()? {
            let events = (self.function)(events);
            if !events.is_empty() {
                return Ok(Some(events));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

/// Keeps events with timestamps in `[start, end)`.
#[derive(Debug, Clone)]
pub struct TimeSlice<P> {
    parent: P,
    start: u64,
    end: u64,
    zero: bool,
}

impl<P: Stream> TimeSlice<P> {
    pub fn new(
        parent: P,
        start: impl Into<Time>,
        end: impl Into<Time>,
        zero: bool,
    ) -> Result<Self, StreamError> {
        let start = parse_timestamp(start)?;
        let end = parse_timestamp(end)?;
        if start >= end {
            return Err(StreamError::InvalidBounds(format!(
                "start ({}) must be strictly smaller than end ({})",
                start, end
            )));
        }
        Ok(Self {
            parent,
            start,
            end,
            zero,
        })
    }
}

impl<P: Stream> Stream for TimeSlice<P> {
    type Iter = TimeSliceIterator<P::Iter>;

    fn dimensions(&self) -> (u16, u16) {
        self.parent.dimensions()
    }

    /// Derived analytically from the parent's range intersected with
    /// `[start, end)`, without scanning data.
    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        let (parent_start, parent_end) = self.parent.time_range_us()?;
        let start = self.start.max(parent_start);
        let end = self.end.min(parent_end);
        if end <= start {
            // The window and the parent's range are disjoint.
            return Ok((0, 1));
        }
        if self.zero {
            Ok((start - self.start, end - self.start))
        } else {
            Ok((start, end))
        }
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(TimeSliceIterator {
            parent: self.parent.iterate()?,
            start: self.start,
            end: self.end,
            zero: self.zero,
        })
    }
}

pub struct TimeSliceIterator<I> {
    parent: I,
    start: u64,
    end: u64,
    zero: bool,
}

impl<I: EventIterator> EventIterator for TimeSliceIterator<I> {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        while let Some(mut events) = self.parent.next()? {
            let (first, last) = match (events.first(), events.last()) {
                (Some(first), Some(last)) => (first.t, last.t),
                _ => continue,
            };
            if last < self.start {
                continue;
            }
            if first >= self.end {
                // The parent still holds events past the window: stop early
                // and release it.
                self.parent.close();
                return Ok(None);
            }
            events.retain(|event| event.t >= self.start && event.t < self.end);
            if events.is_empty() {
                continue;
            }
            if self.zero {
                for event in &mut events {
                    event.t -= self.start;
                }
            }
            return Ok(Some(events));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

/// Keeps events at positions `[start, end)` of the flattened sequence.
#[derive(Debug, Clone)]
pub struct EventSlice<P> {
    parent: P,
    start: usize,
    end: usize,
}

impl<P: Stream> EventSlice<P> {
    pub fn new(parent: P, start: usize, end: usize) -> Result<Self, StreamError> {
        if start >= end {
            return Err(StreamError::InvalidBounds(format!(
                "start ({}) must be strictly smaller than end ({})",
                start, end
            )));
        }
        Ok(Self { parent, start, end })
    }
}

impl<P: Stream> Stream for EventSlice<P> {
    type Iter = EventSliceIterator<P::Iter>;

    fn dimensions(&self) -> (u16, u16) {
        self.parent.dimensions()
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        self.parent.time_range_us()
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(EventSliceIterator {
            parent: self.parent.iterate()?,
            start: self.start,
            end: self.end,
            index: 0,
        })
    }
}

pub struct EventSliceIterator<I> {
    parent: I,
    start: usize,
    end: usize,
    index: usize,
}

impl<I: EventIterator> EventIterator for EventSliceIterator<I> {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        while let Some(mut events) = self.parent.next()? {
            let length = events.len();
            if self.index + length <= self.start {
                self.index += length;
                continue;
            }
            if self.index >= self.end {
                self.parent.close();
                return Ok(None);
            }
            let from = self.start.saturating_sub(self.index);
            let to = (self.end - self.index).min(length);
            self.index += length;
            let events: Vec<DvsEvent> = events.drain(from..to).collect();
            if events.is_empty() {
                continue;
            }
            return Ok(Some(events));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

/// Keeps events in a spatial window and shifts them to its origin.
#[derive(Debug, Clone)]
pub struct Crop<P> {
    parent: P,
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

impl<P: Stream> Crop<P> {
    pub fn new(parent: P, left: u16, right: u16, top: u16, bottom: u16) -> Result<Self, StreamError> {
        let (width, height) = parent.dimensions();
        if left >= right {
            return Err(StreamError::InvalidBounds(format!(
                "left ({}) must be strictly smaller than right ({})",
                left, right
            )));
        }
        if right > width {
            return Err(StreamError::InvalidBounds(format!(
                "right ({}) exceeds the parent width ({})",
                right, width
            )));
        }
        if top >= bottom {
            return Err(StreamError::InvalidBounds(format!(
                "top ({}) must be strictly smaller than bottom ({})",
                top, bottom
            )));
        }
        if bottom > height {
            return Err(StreamError::InvalidBounds(format!(
                "bottom ({}) exceeds the parent height ({})",
                bottom, height
            )));
        }
        Ok(Self {
            parent,
            left,
            right,
            top,
            bottom,
        })
    }
}

impl<P: Stream> Stream for Crop<P> {
    type Iter = CropIterator<P::Iter>;

    fn dimensions(&self) -> (u16, u16) {
        (self.right - self.left, self.bottom - self.top)
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        self.parent.time_range_us()
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(CropIterator {
            parent: self.parent.iterate()?,
            left: self.left,
            right: self.right,
            top: self.top,
            bottom: self.bottom,
        })
    }
}

pub struct CropIterator<I> {
    parent: I,
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

impl<I: EventIterator> EventIterator for CropIterator<I> {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        while let Some(mut events) = self.parent.next()? {
            events.retain(|event| {
                event.x >= self.left
                    && event.x < self.right
                    && event.y >= self.top
                    && event.y < self.bottom
            });
            if events.is_empty() {
                continue;
            }
            for event in &mut events {
                event.x -= self.left;
                event.y -= self.top;
            }
            return Ok(Some(events));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

/// A boolean pixel grid, shaped exactly like the sensor it masks.
///
/// Row-major: entry `(x, y)` lives at index `y * width + x`.
#[derive(Debug, Clone)]
pub struct MaskArray {
    dimensions: (u16, u16),
    data: Vec<bool>,
}

impl MaskArray {
    /// Creates a mask from row-major data; `data.len()` must equal
    /// `width * height`.
    pub fn new(dimensions: (u16, u16), data: Vec<bool>) -> Result<Self, StreamError> {
        let expected = dimensions.0 as usize * dimensions.1 as usize;
        if data.len() != expected {
            return Err(StreamError::InvalidBounds(format!(
                "mask data must hold {} entries for a {}x{} sensor (got {})",
                expected, dimensions.0, dimensions.1, data.len()
            )));
        }
        Ok(Self { dimensions, data })
    }

    /// Creates a mask by evaluating `function` at every `(x, y)`.
    pub fn from_fn(dimensions: (u16, u16), mut function: impl FnMut(u16, u16) -> bool) -> Self {
        let mut data = Vec::with_capacity(dimensions.0 as usize * dimensions.1 as usize);
        for y in 0..dimensions.1 {
            for x in 0..dimensions.0 {
                data.push(function(x, y));
            }
        }
        Self { dimensions, data }
    }

    /// Width and height of the mask in pixels.
    pub fn dimensions(&self) -> (u16, u16) {
        self.dimensions
    }

    fn contains(&self, x: u16, y: u16) -> bool {
        let index = y as usize * self.dimensions.0 as usize + x as usize;
        self.data.get(index).copied().unwrap_or(false)
    }
}

/// Keeps events whose pixel is set in a boolean grid.
#[derive(Debug, Clone)]
pub struct Mask<P> {
    parent: P,
    array: MaskArray,
}

impl<P: Stream> Mask<P> {
    pub fn new(parent: P, array: MaskArray) -> Result<Self, StreamError> {
        let dimensions = parent.dimensions();
        if array.dimensions() != dimensions {
            return Err(StreamError::InvalidBounds(format!(
                "mask must be {}x{} (got {}x{})",
                dimensions.0,
                dimensions.1,
                array.dimensions().0,
                array.dimensions().1
            )));
        }
        Ok(Self { parent, array })
    }
}

impl<P: Stream> Stream for Mask<P> {
    type Iter = MaskIterator<P::Iter>;

    fn dimensions(&self) -> (u16, u16) {
        self.parent.dimensions()
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        self.parent.time_range_us()
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(MaskIterator {
            parent: self.parent.iterate()?,
            array: self.array.clone(),
        })
    }
}

pub struct MaskIterator<I> {
    parent: I,
    array: MaskArray,
}

impl<I: EventIterator> EventIterator for MaskIterator<I> {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        while let Some(mut events) = self.parent.next()? {
            events.retain(|event| self.array.contains(event.x, event.y));
            if events.is_empty() {
                continue;
            }
            return Ok(Some(events));
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

/// The seven fixed geometric transpositions.
///
/// Coordinate remaps are expressed in terms of the parent's dimensions
/// `(w, h)`; rotations and diagonal flips swap the reported dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransposeAction {
    /// `x' = w - 1 - x`
    FlipLeftRight,
    /// `y' = h - 1 - y`
    FlipBottomTop,
    /// `(x', y') = (h - 1 - y, x)`
    Rotate90Counterclockwise,
    /// `(x', y') = (w - 1 - x, h - 1 - y)`
    Rotate180,
    /// `(x', y') = (y, w - 1 - x)`
    Rotate270Counterclockwise,
    /// `(x', y') = (y, x)`
    FlipUpDiagonal,
    /// `(x', y') = (h - 1 - y, w - 1 - x)`
    FlipDownDiagonal,
}

impl TransposeAction {
    /// Whether the action swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        !matches!(
            self,
            TransposeAction::FlipLeftRight
                | TransposeAction::FlipBottomTop
                | TransposeAction::Rotate180
        )
    }

    /// Remaps `(x, y)` in terms of the parent dimensions `(width, height)`.
    #[inline]
    pub fn remap(self, x: u16, y: u16, dimensions: (u16, u16)) -> (u16, u16) {
        let (width, height) = dimensions;
        match self {
            TransposeAction::FlipLeftRight => (width - 1 - x, y),
            TransposeAction::FlipBottomTop => (x, height - 1 - y),
            TransposeAction::Rotate90Counterclockwise => (height - 1 - y, x),
            TransposeAction::Rotate180 => (width - 1 - x, height - 1 - y),
            TransposeAction::Rotate270Counterclockwise => (y, width - 1 - x),
            TransposeAction::FlipUpDiagonal => (y, x),
            TransposeAction::FlipDownDiagonal => (height - 1 - y, width - 1 - x),
        }
    }
}

impl FromStr for TransposeAction {
    type Err = StreamError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "flip_left_right" => Ok(TransposeAction::FlipLeftRight),
            "flip_bottom_top" => Ok(TransposeAction::FlipBottomTop),
            "rotate_90_counterclockwise" => Ok(TransposeAction::Rotate90Counterclockwise),
            "rotate_180" => Ok(TransposeAction::Rotate180),
            "rotate_270_counterclockwise" => Ok(TransposeAction::Rotate270Counterclockwise),
            "flip_up_diagonal" => Ok(TransposeAction::FlipUpDiagonal),
            "flip_down_diagonal" => Ok(TransposeAction::FlipDownDiagonal),
            _ => Err(StreamError::InvalidBounds(format!(
                "unknown transpose action \"{}\"",
                value
            ))),
        }
    }
}

/// Relabels coordinates according to a [`TransposeAction`]. Does not
/// reorder records.
#[derive(Debug, Clone)]
pub struct Transpose<P> {
    parent: P,
    action: TransposeAction,
}

impl<P: Stream> Transpose<P> {
    pub fn new(parent: P, action: TransposeAction) -> Self {
        Self { parent, action }
    }
}

impl<P: Stream> Stream for Transpose<P> {
    type Iter = TransposeIterator<P::Iter>;

    fn dimensions(&self) -> (u16, u16) {
        let (width, height) = self.parent.dimensions();
        if self.action.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
        self.parent.time_range_us()
    }

    fn iterate(&self) -> Result<Self::Iter, StreamError> {
        Ok(TransposeIterator {
            parent: self.parent.iterate()?,
            action: self.action,
            dimensions: self.parent.dimensions(),
        })
    }
}

pub struct TransposeIterator<I> {
    parent: I,
    action: TransposeAction,
    /// The parent's dimensions; remap formulas are expressed against them.
    dimensions: (u16, u16),
}

impl<I: EventIterator> EventIterator for TransposeIterator<I> {
    fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
        match self.parent.next()? {
            None => Ok(None),
            Some(mut events) => {
                for event in &mut events {
                    let (x, y) = self.action.remap(event.x, event.y, self.dimensions);
                    event.x = x;
                    event.y = y;
                }
                Ok(Some(events))
            }
        }
    }

    fn close(&mut self) {
        self.parent.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Array;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Test stream that yields one event per batch and records whether its
    /// iterator was closed.
    struct Probe {
        events: Vec<DvsEvent>,
        closed: Rc<Cell<bool>>,
    }

    struct ProbeIterator {
        batches: VecDeque<Vec<DvsEvent>>,
        closed: Rc<Cell<bool>>,
    }

    impl Stream for Probe {
        type Iter = ProbeIterator;

        fn dimensions(&self) -> (u16, u16) {
            (640, 480)
        }

        fn time_range_us(&self) -> Result<(u64, u64), StreamError> {
            match (self.events.first(), self.events.last()) {
                (Some(first), Some(last)) => Ok((first.t, last.t + 1)),
                _ => Ok((0, 1)),
            }
        }

        fn iterate(&self) -> Result<Self::Iter, StreamError> {
            Ok(ProbeIterator {
                batches: self.events.iter().map(|event| vec![*event]).collect(),
                closed: self.closed.clone(),
            })
        }
    }

    impl EventIterator for ProbeIterator {
        fn next(&mut self) -> Result<Option<Vec<DvsEvent>>, StreamError> {
            match self.batches.pop_front() {
                Some(batch) => Ok(Some(batch)),
                None => {
                    self.closed.set(true);
                    Ok(None)
                }
            }
        }

        fn close(&mut self) {
            self.batches.clear();
            self.closed.set(true);
        }
    }

    fn sample() -> Array {
        Array::new(
            vec![
                DvsEvent::new(2, 10, 20, true),
                DvsEvent::new(71, 11, 21, false),
                DvsEvent::new(828, 12, 22, true),
            ],
            (640, 480),
        )
    }

    #[test]
    fn test_map_drops_empty_batches() {
        let stream = sample().remove_off_events();
        let events = stream.to_array().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.on));
    }

    #[test]
    fn test_time_slice_example() {
        let stream = sample()
            .time_slice("00:00:00.000010", "00:00:00.000800", false)
            .unwrap();
        assert_eq!(
            stream.time_range().unwrap(),
            (
                "00:00:00.000010".to_owned(),
                "00:00:00.000800".to_owned()
            )
        );
        let events = stream.to_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, 71);
    }

    #[test]
    fn test_time_slice_zero_rebases() {
        let stream = sample()
            .time_slice("00:00:00.000010", "00:00:00.000800", true)
            .unwrap();
        assert_eq!(
            stream.time_range().unwrap(),
            (
                "00:00:00.000000".to_owned(),
                "00:00:00.000790".to_owned()
            )
        );
        let events = stream.to_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t, 61);
    }

    #[test]
    fn test_time_slice_rejects_inverted_bounds() {
        assert!(sample().time_slice(1u64, 1u64, false).is_err());
    }

    #[test]
    fn test_time_slice_closes_parent_on_early_stop() {
        let closed = Rc::new(Cell::new(false));
        let probe = Probe {
            events: vec![
                DvsEvent::new(1, 0, 0, true),
                DvsEvent::new(2, 0, 0, true),
                DvsEvent::new(100, 0, 0, true),
            ],
            closed: closed.clone(),
        };
        let stream = probe.time_slice("0", "00:00:00.000010", false).unwrap();
        let mut iterator = stream.iterate().unwrap();
        assert_eq!(iterator.next().unwrap().unwrap()[0].t, 1);
        assert_eq!(iterator.next().unwrap().unwrap()[0].t, 2);
        // The batch at t=100 starts past the window: the filter must stop
        // and close the parent even though it is not exhausted.
        assert!(iterator.next().unwrap().is_none());
        assert!(closed.get());
    }

    #[test]
    fn test_abandoned_iterator_propagates_close() {
        let closed = Rc::new(Cell::new(false));
        let probe = Probe {
            events: vec![
                DvsEvent::new(1, 0, 0, true),
                DvsEvent::new(2, 0, 0, true),
            ],
            closed: closed.clone(),
        };
        let stream = probe.map(|events| events);
        let mut iterator = stream.iterate().unwrap();
        assert!(iterator.next().unwrap().is_some());
        iterator.close();
        assert!(closed.get());
    }

    #[test]
    fn test_event_slice_positions() {
        let events: Vec<DvsEvent> = (0..100)
            .map(|index| DvsEvent::new(index as u64, index as u16, 0, true))
            .collect();
        let stream = Array::new(events, (640, 480))
            .event_slice(10, 30)
            .unwrap();
        let sliced = stream.to_array().unwrap();
        assert_eq!(sliced.len(), 20);
        assert_eq!(sliced[0].t, 10);
        assert_eq!(sliced[19].t, 29);
    }

    #[test]
    fn test_event_slice_across_batches() {
        let closed = Rc::new(Cell::new(false));
        let probe = Probe {
            events: (0..10u64).map(|t| DvsEvent::new(t, 0, 0, true)).collect(),
            closed: closed.clone(),
        };
        let stream = probe.event_slice(3, 6).unwrap();
        let sliced = stream.to_array().unwrap();
        assert_eq!(
            sliced.iter().map(|event| event.t).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert!(closed.get());
    }

    #[test]
    fn test_event_slice_rejects_inverted_bounds() {
        assert!(sample().event_slice(5, 5).is_err());
    }

    #[test]
    fn test_crop_window_and_shift() {
        let events: Vec<DvsEvent> = (0..40)
            .map(|index| DvsEvent::new(index as u64, index as u16, (index / 2) as u16, true))
            .collect();
        let original = Array::new(events.clone(), (640, 480));
        let cropped = Array::new(events, (640, 480))
            .crop(10, 20, 5, 15)
            .unwrap();
        assert_eq!(cropped.dimensions(), (10, 10));
        let restored = cropped
            .map(|mut events| {
                for event in &mut events {
                    event.x += 10;
                    event.y += 5;
                }
                events
            })
            .to_array()
            .unwrap();
        let expected: Vec<DvsEvent> = original
            .to_array()
            .unwrap()
            .into_iter()
            .filter(|event| {
                event.x >= 10 && event.x < 20 && event.y >= 5 && event.y < 15
            })
            .collect();
        assert!(!expected.is_empty());
        assert_eq!(restored, expected);
    }

    #[test]
    fn test_crop_rejects_out_of_bounds() {
        assert!(sample().crop(0, 700, 0, 10).is_err());
        assert!(sample().crop(10, 10, 0, 10).is_err());
        assert!(sample().crop(0, 10, 20, 500).is_err());
    }

    #[test]
    fn test_mask_keeps_selected_pixels() {
        let mask = MaskArray::from_fn((640, 480), |x, _| x == 11);
        let stream = sample().mask(mask).unwrap();
        let events = stream.to_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].x, 11);
    }

    #[test]
    fn test_mask_rejects_wrong_shape() {
        let mask = MaskArray::from_fn((10, 10), |_, _| true);
        assert!(sample().mask(mask).is_err());
    }

    #[test]
    fn test_mask_array_rejects_wrong_length() {
        assert!(MaskArray::new((10, 10), vec![true; 99]).is_err());
    }

    #[test]
    fn test_rotate_180_is_an_involution() {
        let original = sample().to_array().unwrap();
        let twice = sample()
            .transpose(TransposeAction::Rotate180)
            .transpose(TransposeAction::Rotate180)
            .to_array()
            .unwrap();
        assert_eq!(twice, original);
    }

    #[test]
    fn test_flip_left_right_is_an_involution() {
        let original = sample().to_array().unwrap();
        let twice = sample()
            .transpose(TransposeAction::FlipLeftRight)
            .transpose(TransposeAction::FlipLeftRight)
            .to_array()
            .unwrap();
        assert_eq!(twice, original);
    }

    #[test]
    fn test_rotation_directions() {
        let dimensions = (4u16, 4u16);
        assert_eq!(
            TransposeAction::Rotate90Counterclockwise.remap(2, 0, dimensions),
            (3, 2)
        );
        assert_eq!(
            TransposeAction::Rotate270Counterclockwise.remap(3, 2, dimensions),
            (2, 0)
        );
        // Widescreen parent: the remapped point lands in the swapped geometry.
        assert_eq!(
            TransposeAction::Rotate90Counterclockwise.remap(5, 1, (6, 4)),
            (2, 5)
        );
        assert_eq!(
            TransposeAction::Rotate270Counterclockwise.remap(5, 1, (6, 4)),
            (1, 0)
        );
    }

    #[test]
    fn test_rotate_90_then_270_is_identity() {
        let original = sample().to_array().unwrap();
        let back = sample()
            .transpose(TransposeAction::Rotate90Counterclockwise)
            .transpose(TransposeAction::Rotate270Counterclockwise)
            .to_array()
            .unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let rotated = sample().transpose(TransposeAction::Rotate90Counterclockwise);
        assert_eq!(rotated.dimensions(), (480, 640));
        let mirrored = sample().transpose(TransposeAction::FlipBottomTop);
        assert_eq!(mirrored.dimensions(), (640, 480));
    }

    #[test]
    fn test_rotate_90_remap_stays_in_bounds() {
        let rotated = sample().transpose(TransposeAction::Rotate90Counterclockwise);
        let (width, height) = rotated.dimensions();
        for event in rotated.to_array().unwrap() {
            assert!(event.x < width);
            assert!(event.y < height);
        }
    }

    #[test]
    fn test_filters_preserve_time_order() {
        let events: Vec<DvsEvent> = (0..1000u64)
            .map(|index| DvsEvent::new(index / 3, (index % 640) as u16, 0, index % 2 == 0))
            .collect();
        let stream = Array::new(events, (640, 480))
            .crop(0, 320, 0, 480)
            .unwrap()
            .transpose(TransposeAction::FlipLeftRight);
        let mut previous = 0u64;
        let mut iterator = stream.iterate().unwrap();
        while let Some(batch) = iterator.next().unwrap() {
            assert!(!batch.is_empty());
            for event in batch {
                assert!(event.t >= previous);
                previous = event.t;
            }
        }
    }
}

use time::OffsetDateTime;

use super::Segment;

/// An ordered, non-empty list of segments plus an optional source filename and the
/// timestamp captured when the waveform was constructed.
///
/// Waveforms are immutable in shape after load (segment count is fixed) but every
/// field is user-mutable before save; there is no destructor beyond releasing the
/// sample buffers.
#[derive(Debug, Clone)]
pub struct Waveform {
    segments: Vec<Segment>,
    filename: Option<String>,
    timestamp: OffsetDateTime,
}

impl Waveform {
    /// Builds a waveform from its segments, stamping it with the current time.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is empty; every waveform has at least one segment.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self::with_timestamp(segments, OffsetDateTime::now_utc())
    }

    /// Builds a waveform with an explicit timestamp, e.g. one just read off a loaded
    /// file's `DATE`/`DateTime` tag.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is empty.
    pub fn with_timestamp(segments: Vec<Segment>, timestamp: OffsetDateTime) -> Self {
        assert!(!segments.is_empty(), "a waveform must have at least one segment");
        Self { segments, filename: None, timestamp }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always `false`: a waveform has at least one segment by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: OffsetDateTime) {
        self.timestamp = timestamp;
    }

    /// Whether this is a multi-segment (`MWV`) waveform.
    pub fn is_multi_segment(&self) -> bool {
        self.segments.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use num_complex::Complex64;

    use super::*;
    use crate::model::{Metadata, Segment};

    #[test]
    fn segment_access_is_indexed_by_usize_and_out_of_range_is_none() {
        let waveform =
            Waveform::new(vec![Segment::new(vec![Complex64::new(0.0, 0.0)], Metadata::empty())]);
        assert!(waveform.segment(0).is_some());
        assert!(waveform.segment(1).is_none());
    }

    #[test]
    fn single_segment_waveform_is_never_multi_segment() {
        let waveform =
            Waveform::new(vec![Segment::new(vec![Complex64::new(0.0, 0.0)], Metadata::empty())]);
        assert!(!waveform.is_multi_segment());
        assert!(!waveform.is_empty());
    }
}

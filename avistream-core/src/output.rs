//! Where demuxed tracks and samples go.

use std::collections::BTreeMap;

use crate::seek_map::SeekOutcome;
use crate::track::TrackFormat;

/// Timing and placement of one finished sample.
///
/// `offset` counts the bytes written through `sample_data` after this sample's
/// last byte. It is non-zero only when a reordering consumer releases a queued
/// sample after later payload was already delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMeta {
    pub time_us: u64,
    pub keyframe: bool,
    pub size: u32,
    pub offset: u32,
}

pub trait DemuxOutput {
    fn track_format(&mut self, format: &TrackFormat);

    /// Called once, after the last `track_format`.
    fn end_tracks(&mut self);

    fn seek_map(&mut self, outcome: SeekOutcome);

    fn sample_data(&mut self, track_id: u32, data: &[u8]);

    fn sample_metadata(&mut self, track_id: u32, meta: SampleMeta);
}

// ============================================================================
// Recording sink
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordedTrack {
    pub format: Option<TrackFormat>,
    pub data: Vec<u8>,
    pub samples: Vec<SampleMeta>,
    // End of each sample within `data`, fixed when its metadata arrives.
    sample_ends: Vec<usize>,
}

impl RecordedTrack {
    pub fn sample_bytes(&self, i: usize) -> Option<&[u8]> {
        let end = *self.sample_ends.get(i)?;
        let start = end.checked_sub(self.samples[i].size as usize)?;
        self.data.get(start..end)
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Collects everything the demuxer emits, keyed by track id.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    pub tracks: BTreeMap<u32, RecordedTrack>,
    pub track_order: Vec<u32>,
    pub tracks_ended: usize,
    pub seek_outcome: Option<SeekOutcome>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, id: u32) -> Option<&RecordedTrack> {
        self.tracks.get(&id)
    }

    pub fn clear_samples(&mut self) {
        for track in self.tracks.values_mut() {
            track.data.clear();
            track.samples.clear();
            track.sample_ends.clear();
        }
    }
}

impl DemuxOutput for RecordingOutput {
    fn track_format(&mut self, format: &TrackFormat) {
        self.track_order.push(format.id);
        self.tracks.entry(format.id).or_default().format = Some(format.clone());
    }

    fn end_tracks(&mut self) {
        self.tracks_ended += 1;
    }

    fn seek_map(&mut self, outcome: SeekOutcome) {
        self.seek_outcome = Some(outcome);
    }

    fn sample_data(&mut self, track_id: u32, data: &[u8]) {
        self.tracks
            .entry(track_id)
            .or_default()
            .data
            .extend_from_slice(data);
    }

    fn sample_metadata(&mut self, track_id: u32, meta: SampleMeta) {
        let track = self.tracks.entry(track_id).or_default();
        let end = track.data.len().saturating_sub(meta.offset as usize);
        track.sample_ends.push(end);
        track.samples.push(meta);
    }
}

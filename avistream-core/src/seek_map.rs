// SEEK MAP - anchors from the video track, resume points for every track
//
// Built once after all chunk indexes are filled. Building consumes the
// indexes: every track's ChunkIndex is released afterwards.

use std::sync::Arc;

use serde::Serialize;

use crate::chunk_index::{ChunkIndex, KeyFrames};
use crate::clock::ChunkClock;
use crate::config::DemuxConfig;
use crate::error::Result;
use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeekPoint {
    pub time_us: u64,
    pub position: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeekPoints {
    pub first: SeekPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<SeekPoint>,
}

#[derive(Debug, Clone)]
pub enum SeekOutcome {
    Seekable(Arc<SeekMap>),
    Unseekable { duration_us: u64 },
}

impl SeekOutcome {
    pub fn is_seekable(&self) -> bool {
        matches!(self, SeekOutcome::Seekable(_))
    }

    pub fn duration_us(&self) -> u64 {
        match self {
            SeekOutcome::Seekable(map) => map.duration_us(),
            SeekOutcome::Unseekable { duration_us } => *duration_us,
        }
    }
}

#[derive(Debug)]
pub struct SeekMap {
    backbone_id: u32,
    /// Backbone timing, as its consumer stamps samples
    clock: ChunkClock,
    /// Anchor chunk header positions, strictly increasing
    positions: Vec<u64>,
    /// Backbone chunk index of each anchor
    backbone_indexes: Vec<usize>,
    /// (track id, resume chunk index per anchor), in track order
    track_indexes: Vec<(u32, Vec<usize>)>,
}

impl SeekMap {
    pub fn backbone_id(&self) -> u32 {
        self.backbone_id
    }

    pub fn duration_us(&self) -> u64 {
        self.clock.duration_us()
    }

    pub fn us_per_chunk(&self) -> u64 {
        self.clock.us_per_chunk()
    }

    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    pub fn anchor_count(&self) -> usize {
        self.positions.len()
    }

    fn seek_point(&self, anchor: usize) -> SeekPoint {
        SeekPoint {
            time_us: self.clock.us_at(self.backbone_indexes[anchor] as u64),
            position: self.positions[anchor],
        }
    }

    /// The anchor at or before `time_us` and the one after it, if any.
    pub fn seek_points(&self, time_us: u64) -> SeekPoints {
        let after = self
            .backbone_indexes
            .partition_point(|&i| self.clock.us_at(i as u64) <= time_us);
        let first = self.seek_point(after.saturating_sub(1));
        if first.time_us == time_us {
            return SeekPoints { first, second: None };
        }
        let next = after.max(1);
        SeekPoints {
            first,
            second: (next < self.positions.len()).then(|| self.seek_point(next)),
        }
    }

    fn anchor_at(&self, position: u64) -> Option<usize> {
        match self.positions.binary_search(&position) {
            Ok(anchor) => Some(anchor),
            Err(0) => None,
            Err(insert) => Some(insert - 1),
        }
    }

    /// Chunk header position of the anchor at or before `position`, or 0
    /// before the first anchor.
    pub fn anchor_position(&self, position: u64) -> u64 {
        self.anchor_at(position).map_or(0, |a| self.positions[a])
    }

    /// Resume chunk index of every track for the anchor at or before
    /// `position`, as (track id, chunk index). Before the first anchor every
    /// track starts from 0.
    pub fn indexes_at(&self, position: u64) -> Vec<(u32, usize)> {
        let anchor = self.anchor_at(position);
        self.track_indexes
            .iter()
            .map(|(id, indexes)| {
                let index = anchor.and_then(|a| indexes.get(a).copied()).unwrap_or(0);
                (*id, index)
            })
            .collect()
    }
}

/// Build the seek table from filled chunk indexes, fix up clock timings and
/// release the indexes.
pub fn build_seek_map(
    tracks: &mut [Track],
    container_duration_us: u64,
    config: &DemuxConfig,
) -> Result<SeekOutcome> {
    let outcome = anchor_tracks(tracks, container_duration_us, config)?;
    let video_duration_us = match &outcome {
        SeekOutcome::Seekable(map) => map.duration_us(),
        SeekOutcome::Unseekable { duration_us } => *duration_us,
    };
    fix_timings(tracks, video_duration_us, config.audio_duration_tolerance);
    for track in tracks.iter_mut() {
        track.chunk_index.release();
    }
    Ok(outcome)
}

fn anchor_tracks(
    tracks: &mut [Track],
    container_duration_us: u64,
    config: &DemuxConfig,
) -> Result<SeekOutcome> {
    let unseekable = SeekOutcome::Unseekable {
        duration_us: container_duration_us,
    };
    let Some(backbone_slot) = tracks.iter().position(|t| t.is_video()) else {
        tracing::warn!("No video track found, file is unseekable");
        return Ok(unseekable);
    };

    let backbone = &mut tracks[backbone_slot];
    let index = &backbone.chunk_index;
    if index.chunk_count() == 0 {
        tracing::warn!("Video track {} has no indexed chunks", backbone.id);
        return Ok(unseekable);
    }
    if !index.is_monotonic() {
        tracing::warn!(
            "Video track {} index positions are out of order, file is unseekable",
            backbone.id
        );
        return Ok(unseekable);
    }

    let mut duration_us = backbone.consumer.clock().duration_us();
    if duration_us == 0 {
        duration_us = container_duration_us;
    }
    let key_frames = index.get_key_frame_subset()?;
    let anchors = match &key_frames {
        KeyFrames::All => {
            index.get_sampled_subset(duration_us, config.synthetic_keyframe_interval_secs)?
        }
        KeyFrames::Listed(keys) => keys.clone(),
    };
    if anchors.is_empty() {
        tracing::warn!("Video track {} has no key frames, file is unseekable", backbone.id);
        return Ok(unseekable);
    }
    let positions = index.get_index_positions(&anchors)?;
    let chunk_count = index.chunk_count() as u64;
    let backbone_id = backbone.id;
    backbone.consumer.set_key_frames(key_frames);

    let mut track_indexes = Vec::with_capacity(tracks.len());
    for (slot, track) in tracks.iter().enumerate() {
        let indexes = if slot == backbone_slot {
            anchors.clone()
        } else {
            resume_indexes(&track.chunk_index, &positions)?
        };
        track_indexes.push((track.id, indexes));
    }

    let map = SeekMap {
        backbone_id,
        clock: ChunkClock::new(duration_us, chunk_count),
        positions,
        backbone_indexes: anchors,
        track_indexes,
    };
    tracing::info!(
        "Seek map: video track {} chunks={} anchors={} us={}",
        backbone_id,
        chunk_count,
        map.anchor_count(),
        duration_us
    );
    Ok(SeekOutcome::Seekable(Arc::new(map)))
}

/// Clock index of the first chunk of a track the walker meets after resuming
/// at each anchor: the chunk at or before the anchor, stepped past it when it
/// starts earlier.
fn resume_indexes(index: &ChunkIndex, anchors: &[u64]) -> Result<Vec<usize>> {
    if index.chunk_count() == 0 {
        return Ok(vec![0; anchors.len()]);
    }
    let before = index.get_indices(anchors)?;
    let starts = index.get_index_positions(&before)?;
    Ok(before
        .iter()
        .zip(starts)
        .zip(anchors)
        .map(|((&i, start), &anchor)| if start < anchor { i + 1 } else { i })
        .collect())
}

/// Align clocks with what the index actually holds.
///
/// Audio tracks whose declared duration strays from the video duration by
/// more than `tolerance` (relative) take the video duration instead.
pub fn fix_timings(tracks: &mut [Track], video_duration_us: u64, tolerance: f64) {
    for track in tracks.iter_mut() {
        let chunks = track.chunk_index.chunk_count() as u64;
        if track.is_audio() {
            let clock = track.consumer.clock_mut();
            let audio_us = clock.duration_us();
            tracing::info!(
                "Audio #{} chunks: {} us={} size={}",
                track.id,
                chunks,
                audio_us,
                track.chunk_index.total_size()
            );
            if video_duration_us > 0 {
                let drift = (audio_us as f64 - video_duration_us as f64).abs()
                    / video_duration_us as f64;
                if drift > tolerance {
                    tracing::warn!(
                        "Audio #{} duration is off by {:.1}%, using video duration",
                        track.id,
                        drift * 100.0
                    );
                    clock.set_duration(video_duration_us);
                }
            }
            if chunks > 0 {
                clock.set_chunks(chunks);
            }
            if !track.chunk_index.is_all_key_frames() {
                tracing::warn!(
                    "Audio #{} is not all key frames chunks={} keyFrames={}",
                    track.id,
                    chunks,
                    track.chunk_index.key_frame_count()
                );
            }
        } else if chunks > 0 {
            track.consumer.clock_mut().set_chunks(chunks);
        }
    }
}

//! Demuxer tunables.
//!
//! Defaults match what real-world AVI files need; a JSON file can override
//! any subset of them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AviError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Sanity ceiling for a resident header box (avih, strh, strf, ...)
    pub max_box_size: u32,
    /// Ceiling for one OpenDML leaf index chunk
    pub max_index_chunk_size: u32,
    /// Forward gaps up to this many bytes are skipped in place instead of
    /// asking the caller to reposition
    pub min_reload_distance: u64,
    /// Seconds between synthetic seek anchors when every video chunk is a key frame
    pub synthetic_keyframe_interval_secs: u32,
    /// Relative audio/video duration mismatch that triggers an audio clock fix
    pub audio_duration_tolerance: f64,
    /// Largest single payload read handed to a track
    pub read_buffer_size: usize,
    /// idx1 records decoded per driver call
    pub flat_index_batch_records: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            max_box_size: 64 * 1024,
            max_index_chunk_size: 16 * 1024 * 1024,
            min_reload_distance: 256 * 1024,
            synthetic_keyframe_interval_secs: 3,
            audio_duration_tolerance: 0.05,
            read_buffer_size: 64 * 1024,
            flat_index_batch_records: 4096,
        }
    }
}

impl DemuxConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AviError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_box_size == 0 || self.max_index_chunk_size == 0 {
            return Err(AviError::Config("box size limits must be non-zero".into()));
        }
        if self.read_buffer_size == 0 || self.flat_index_batch_records == 0 {
            return Err(AviError::Config("buffer sizes must be non-zero".into()));
        }
        if self.synthetic_keyframe_interval_secs == 0 {
            return Err(AviError::Config(
                "synthetic_keyframe_interval_secs must be non-zero".into(),
            ));
        }
        if !(self.audio_duration_tolerance >= 0.0) {
            return Err(AviError::Config(format!(
                "audio_duration_tolerance must be >= 0, got {}",
                self.audio_duration_tolerance
            )));
        }
        Ok(())
    }
}

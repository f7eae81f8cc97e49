//! # avistream Core
//!
//! Incremental RIFF/AVI demuxer. Walks a source a bounded step at a time,
//! builds per-track chunk indexes and a seek map, and hands chunk payloads
//! to a [`DemuxOutput`].

// ============================================================================
// Container Structure
// ============================================================================
pub mod fourcc;
pub mod boxes;
pub mod track;

// ============================================================================
// Indexing
// ============================================================================
pub mod chunk_index;
pub mod seek_map;

// ============================================================================
// Sample Timing
// ============================================================================
pub mod clock;
pub mod consumer;

// ============================================================================
// Walker / IO
// ============================================================================
pub mod demuxer;
pub mod source;
pub mod output;

// ============================================================================
// Support
// ============================================================================
pub mod config;
pub mod error;

#[cfg(test)]
mod testutil;

pub use chunk_index::{ChunkIndex, KeyFrames};
pub use config::DemuxConfig;
pub use consumer::{default_probe, CodingType, FrameTypeProbe, Mp4vProbe, ProbeFactory};
pub use demuxer::{drive, sniff, AviDemuxer, ReadResult};
pub use error::{AviError, Result};
pub use fourcc::CodecType;
pub use output::{DemuxOutput, RecordedTrack, RecordingOutput, SampleMeta};
pub use seek_map::{SeekMap, SeekOutcome, SeekPoint, SeekPoints};
pub use source::{ByteSource, MemorySource, ReaderSource, Reposition};
pub use track::{MediaKind, TrackFormat};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CHUNK CONSUMER - moves one track's chunk payloads into the output
//
// A consumer is armed with the position and size of a chunk, then resumed
// until the payload is drained. Completing a chunk emits its sample metadata
// and ticks the track clock.

use std::fmt;

use crate::chunk_index::KeyFrames;
use crate::clock::ChunkClock;
use crate::error::{AviError, Result};
use crate::fourcc::CodecType;
use crate::output::{DemuxOutput, SampleMeta};
use crate::source::ByteSource;

/// Leading payload bytes handed to a probe.
const PROBE_HEAD_LEN: usize = 128;

// ============================================================================
// Frame type probes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    Intra,
    Predicted,
    Bidirectional,
    Unknown,
}

/// Classifies a chunk from its leading bytes.
pub trait FrameTypeProbe: Send {
    fn probe(&mut self, head: &[u8]) -> CodingType;
}

/// Picks a probe for a video codec. `None` means constant-rate timing.
pub type ProbeFactory = fn(CodecType) -> Option<Box<dyn FrameTypeProbe>>;

pub fn default_probe(codec: CodecType) -> Option<Box<dyn FrameTypeProbe>> {
    match codec {
        CodecType::MPEG4 => Some(Box::new(Mp4vProbe::default())),
        _ => None,
    }
}

/// MPEG-4 part 2 VOP coding type.
///
/// Stays silent (`Unknown`) until a visual object sequence header announces a
/// profile that allows B-frames.
#[derive(Debug, Default)]
pub struct Mp4vProbe {
    b_frames: bool,
}

impl Mp4vProbe {
    const SEQUENCE_START_CODE: u8 = 0xB0;
    const VOP_START_CODE: u8 = 0xB6;
    const SIMPLE_PROFILE_MASK: u8 = 0x0F;

    pub fn b_frames(&self) -> bool {
        self.b_frames
    }
}

impl FrameTypeProbe for Mp4vProbe {
    fn probe(&mut self, head: &[u8]) -> CodingType {
        let mut i = 0;
        while i + 4 < head.len() {
            if head[i] != 0 || head[i + 1] != 0 || head[i + 2] != 1 {
                i += 1;
                continue;
            }
            let code = head[i + 3];
            let next = head[i + 4];
            if code == Self::SEQUENCE_START_CODE {
                self.b_frames = next & Self::SIMPLE_PROFILE_MASK != next;
            } else if code == Self::VOP_START_CODE && self.b_frames {
                return match (next & 0xC0) >> 6 {
                    0 => CodingType::Intra,
                    1 => CodingType::Predicted,
                    2 => CodingType::Bidirectional,
                    _ => CodingType::Unknown,
                };
            }
            i += 4;
        }
        CodingType::Unknown
    }
}

// ============================================================================
// Consumer
// ============================================================================

enum ConsumerKind {
    Constant,
    Reordering(Reorderer),
}

struct Reorderer {
    probe: Box<dyn FrameTypeProbe>,
    /// Sizes of withheld samples, in decode order
    queue: Vec<u32>,
    head: Vec<u8>,
}

impl Reorderer {
    fn capture(&mut self, data: &[u8]) {
        let room = PROBE_HEAD_LEN.saturating_sub(self.head.len());
        let take = room.min(data.len());
        self.head.extend_from_slice(&data[..take]);
    }
}

pub struct ChunkConsumer {
    track_id: u32,
    clock: ChunkClock,
    key_frames: KeyFrames,
    kind: ConsumerKind,
    read_end: u64,
    read_size: u32,
    remaining: u32,
}

impl fmt::Debug for ChunkConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkConsumer")
            .field("track_id", &self.track_id)
            .field("clock", &self.clock)
            .field("reordering", &self.is_reordering())
            .field("position", &self.position())
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl ChunkConsumer {
    pub fn constant(track_id: u32, clock: ChunkClock) -> Self {
        Self::with_kind(track_id, clock, ConsumerKind::Constant)
    }

    pub fn reordering(track_id: u32, clock: ChunkClock, probe: Box<dyn FrameTypeProbe>) -> Self {
        Self::with_kind(
            track_id,
            clock,
            ConsumerKind::Reordering(Reorderer {
                probe,
                queue: Vec::with_capacity(4),
                head: Vec::with_capacity(PROBE_HEAD_LEN),
            }),
        )
    }

    fn with_kind(track_id: u32, clock: ChunkClock, kind: ConsumerKind) -> Self {
        Self {
            track_id,
            clock,
            key_frames: KeyFrames::All,
            kind,
            read_end: 0,
            read_size: 0,
            remaining: 0,
        }
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn clock(&self) -> &ChunkClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut ChunkClock {
        &mut self.clock
    }

    pub fn key_frames(&self) -> &KeyFrames {
        &self.key_frames
    }

    pub fn set_key_frames(&mut self, key_frames: KeyFrames) {
        self.key_frames = key_frames;
    }

    pub fn is_reordering(&self) -> bool {
        matches!(self.kind, ConsumerKind::Reordering(_))
    }

    /// Arm for a chunk whose payload starts at `position`.
    pub fn set_pending(&mut self, position: u64, size: u32) {
        self.read_end = position + size as u64;
        self.read_size = size;
        self.remaining = size;
        if let ConsumerKind::Reordering(reorderer) = &mut self.kind {
            reorderer.head.clear();
        }
    }

    /// Next payload byte this consumer expects.
    pub fn position(&self) -> u64 {
        self.read_end - self.remaining as u64
    }

    /// Pull at most one read's worth of payload. True when the chunk is done.
    pub fn resume<S, O>(&mut self, source: &mut S, output: &mut O, scratch: &mut [u8]) -> Result<bool>
    where
        S: ByteSource + ?Sized,
        O: DemuxOutput + ?Sized,
    {
        if self.remaining > 0 {
            let want = (self.remaining as usize).min(scratch.len());
            let n = source.read(&mut scratch[..want])?;
            if n == 0 {
                return Err(AviError::UnexpectedEndOfInput(source.position()));
            }
            let data = &scratch[..n];
            output.sample_data(self.track_id, data);
            if let ConsumerKind::Reordering(reorderer) = &mut self.kind {
                reorderer.capture(data);
            }
            self.remaining -= n as u32;
        }
        if self.remaining > 0 {
            return Ok(false);
        }
        self.complete(output);
        Ok(true)
    }

    fn complete<O: DemuxOutput + ?Sized>(&mut self, output: &mut O) {
        let size = self.read_size;
        if size == 0 {
            self.clock.advance();
            return;
        }
        let coding = match &mut self.kind {
            ConsumerKind::Constant => CodingType::Unknown,
            ConsumerKind::Reordering(reorderer) => {
                let coding = reorderer.probe.probe(&reorderer.head);
                reorderer.head.clear();
                coding
            }
        };
        match (&mut self.kind, coding) {
            (ConsumerKind::Reordering(reorderer), CodingType::Predicted) => {
                flush_queue(&mut reorderer.queue, &mut self.clock, self.track_id, output, size);
                reorderer.queue.push(size);
            }
            (ConsumerKind::Reordering(reorderer), CodingType::Bidirectional) => {
                reorderer.queue.push(size);
            }
            (kind, _) => {
                if let ConsumerKind::Reordering(reorderer) = kind {
                    flush_queue(&mut reorderer.queue, &mut self.clock, self.track_id, output, size);
                }
                let index = self.clock.index();
                output.sample_metadata(
                    self.track_id,
                    SampleMeta {
                        time_us: self.clock.time_us(),
                        keyframe: self.key_frames.is_key_frame(index as usize),
                        size,
                        offset: 0,
                    },
                );
                self.clock.advance();
            }
        }
    }

    /// Release anything still withheld. Called at end of input.
    pub fn finish<O: DemuxOutput + ?Sized>(&mut self, output: &mut O) {
        if let ConsumerKind::Reordering(reorderer) = &mut self.kind {
            flush_queue(&mut reorderer.queue, &mut self.clock, self.track_id, output, 0);
        }
    }

    /// Forget the armed chunk and any withheld samples. Called on seek.
    pub fn reset(&mut self) {
        self.read_end = 0;
        self.read_size = 0;
        self.remaining = 0;
        if let ConsumerKind::Reordering(reorderer) = &mut self.kind {
            reorderer.queue.clear();
            reorderer.head.clear();
        }
    }
}

/// Emit withheld samples in presentation order.
///
/// The first queued sample is the forward reference and displays after the
/// bidirectional ones queued behind it. `trailing` is the payload already
/// written after the queue.
fn flush_queue<O: DemuxOutput + ?Sized>(
    queue: &mut Vec<u32>,
    clock: &mut ChunkClock,
    track_id: u32,
    output: &mut O,
    trailing: u32,
) {
    let n = queue.len();
    if n == 0 {
        return;
    }
    let mut offsets = vec![trailing; n];
    for k in (0..n - 1).rev() {
        offsets[k] = offsets[k + 1] + queue[k + 1];
    }
    let base = clock.index();
    let display_order = (1..n).chain(std::iter::once(0));
    for k in display_order {
        let display = if k == 0 { n - 1 } else { k - 1 };
        output.sample_metadata(
            track_id,
            SampleMeta {
                time_us: clock.us_at(base + display as u64),
                keyframe: false,
                size: queue[k],
                offset: offsets[k],
            },
        );
    }
    clock.advance_by(n as u64);
    queue.clear();
}

// BOX MODEL - typed views of the RIFF header tree
//
// Resident boxes are small fixed records (avih, strh, strf, strn, indx, dmlh)
// read whole into memory. Everything else is skipped by length.

use bytes::{Buf, Bytes};

use crate::error::{AviError, Result};
use crate::fourcc::*;
use crate::track::MediaKind;

pub const AVIF_HASINDEX: u32 = 0x10;
pub const AVIIF_KEYFRAME: u32 = 0x10;

/// Bit 31 of an OpenDML leaf entry size marks a delta frame.
const LEAF_DELTA_FRAME: u32 = 0x8000_0000;

const AVI_INDEX_OF_INDEXES: u8 = 0;
const AVI_INDEX_OF_CHUNKS: u8 = 1;

pub const FLAT_INDEX_RECORD_SIZE: usize = 16;

pub fn is_resident(tag: u32) -> bool {
    matches!(tag, AVIH | STRH | STRF | STRN | INDX | DMLH)
}

/// Decode a resident box. Fails with `BoxTooShort` when the payload cannot
/// hold the fixed record.
pub fn parse_resident(tag: u32, payload: Bytes) -> Result<Option<BoxNode>> {
    let node = match tag {
        AVIH => BoxNode::AviHeader(AviHeader::parse(payload)?),
        STRH => BoxNode::StreamHeader(StreamHeader::parse(payload)?),
        STRF => BoxNode::StreamFormat(StreamFormat::parse(payload)?),
        STRN => BoxNode::StreamName(StreamName::parse(payload)),
        INDX => BoxNode::SuperIndex(SuperIndex::parse(payload)?),
        DMLH => BoxNode::ExtendedHeader(ExtendedHeader::parse(payload)?),
        _ => return Ok(None),
    };
    Ok(Some(node))
}

fn require(tag: u32, payload: &Bytes, min: usize) -> Result<()> {
    if payload.len() < min {
        return Err(AviError::box_too_short(tag, payload.len(), min));
    }
    Ok(())
}

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, Clone)]
pub enum BoxNode {
    List(ListBox),
    AviHeader(AviHeader),
    StreamHeader(StreamHeader),
    StreamFormat(StreamFormat),
    StreamName(StreamName),
    SuperIndex(SuperIndex),
    ExtendedHeader(ExtendedHeader),
}

#[derive(Debug, Clone)]
pub struct ListBox {
    list_type: u32,
    children: Vec<BoxNode>,
}

impl ListBox {
    pub fn new(list_type: u32) -> Self {
        Self {
            list_type,
            children: Vec::new(),
        }
    }

    pub fn list_type(&self) -> u32 {
        self.list_type
    }

    pub fn children(&self) -> &[BoxNode] {
        &self.children
    }

    pub fn push(&mut self, child: BoxNode) {
        self.children.push(child);
    }

    fn first<'a, T>(&'a self, pick: impl Fn(&'a BoxNode) -> Option<&'a T>) -> Option<&'a T> {
        self.children.iter().find_map(pick)
    }

    /// Child lists of the given type, in file order.
    pub fn lists(&self, list_type: u32) -> impl Iterator<Item = &ListBox> {
        self.children.iter().filter_map(move |child| match child {
            BoxNode::List(list) if list.list_type == list_type => Some(list),
            _ => None,
        })
    }

    pub fn avi_header(&self) -> Option<&AviHeader> {
        self.first(|child| match child {
            BoxNode::AviHeader(b) => Some(b),
            _ => None,
        })
    }

    pub fn stream_header(&self) -> Option<&StreamHeader> {
        self.first(|child| match child {
            BoxNode::StreamHeader(b) => Some(b),
            _ => None,
        })
    }

    pub fn stream_format(&self) -> Option<&StreamFormat> {
        self.first(|child| match child {
            BoxNode::StreamFormat(b) => Some(b),
            _ => None,
        })
    }

    pub fn stream_name(&self) -> Option<&StreamName> {
        self.first(|child| match child {
            BoxNode::StreamName(b) => Some(b),
            _ => None,
        })
    }

    pub fn super_index(&self) -> Option<&SuperIndex> {
        self.first(|child| match child {
            BoxNode::SuperIndex(b) => Some(b),
            _ => None,
        })
    }

    pub fn extended_header(&self) -> Option<&ExtendedHeader> {
        self.first(|child| match child {
            BoxNode::ExtendedHeader(b) => Some(b),
            _ => None,
        })
    }
}

// ============================================================================
// avih
// ============================================================================

#[derive(Debug, Clone)]
pub struct AviHeader {
    pub us_per_frame: u32,
    pub max_bytes_per_sec: u32,
    pub flags: u32,
    pub total_frames: u32,
    pub initial_frames: u32,
    pub streams: u32,
    pub suggested_buffer_size: u32,
    pub width: u32,
    pub height: u32,
}

impl AviHeader {
    const MIN_SIZE: usize = 40;

    fn parse(payload: Bytes) -> Result<Self> {
        require(AVIH, &payload, Self::MIN_SIZE)?;
        let mut buf = payload;
        let us_per_frame = buf.get_u32_le();
        let max_bytes_per_sec = buf.get_u32_le();
        buf.advance(4); // padding granularity
        Ok(Self {
            us_per_frame,
            max_bytes_per_sec,
            flags: buf.get_u32_le(),
            total_frames: buf.get_u32_le(),
            initial_frames: buf.get_u32_le(),
            streams: buf.get_u32_le(),
            suggested_buffer_size: buf.get_u32_le(),
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
        })
    }

    pub fn has_index(&self) -> bool {
        self.flags & AVIF_HASINDEX != 0
    }

    pub fn duration_us(&self, total_frames: u32) -> u64 {
        total_frames as u64 * self.us_per_frame as u64
    }
}

// ============================================================================
// strh
// ============================================================================

#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub stream_type: u32,
    pub handler: u32,
    pub flags: u32,
    pub priority: u16,
    pub language: u16,
    pub initial_frames: u32,
    pub scale: u32,
    pub rate: u32,
    pub start: u32,
    pub length: u32,
    pub suggested_buffer_size: u32,
    pub quality: u32,
    pub sample_size: u32,
}

impl StreamHeader {
    const MIN_SIZE: usize = 48;

    fn parse(payload: Bytes) -> Result<Self> {
        require(STRH, &payload, Self::MIN_SIZE)?;
        let mut buf = payload;
        Ok(Self {
            stream_type: buf.get_u32_le(),
            handler: buf.get_u32_le(),
            flags: buf.get_u32_le(),
            priority: buf.get_u16_le(),
            language: buf.get_u16_le(),
            initial_frames: buf.get_u32_le(),
            scale: buf.get_u32_le(),
            rate: buf.get_u32_le(),
            start: buf.get_u32_le(),
            length: buf.get_u32_le(),
            suggested_buffer_size: buf.get_u32_le(),
            quality: buf.get_u32_le(),
            sample_size: buf.get_u32_le(),
        })
    }

    pub fn kind(&self) -> Option<MediaKind> {
        match self.stream_type {
            VIDS => Some(MediaKind::Video),
            AUDS => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn duration_us(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        let us = self.length as u128 * self.scale as u128 * 1_000_000 / self.rate as u128;
        us as u64
    }

    pub fn frame_rate(&self) -> Option<f64> {
        if self.scale == 0 || self.rate == 0 {
            None
        } else {
            Some(self.rate as f64 / self.scale as f64)
        }
    }
}

// ============================================================================
// strf
// ============================================================================

#[derive(Debug, Clone)]
pub struct StreamFormat {
    payload: Bytes,
}

/// BITMAPINFOHEADER fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    /// Negative heights (top-down bitmaps) are reported as their magnitude
    pub height: u32,
    pub bit_count: u16,
    pub compression: u32,
}

/// WAVEFORMATEX fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub codec_data: Bytes,
}

impl StreamFormat {
    const MIN_SIZE: usize = 16;
    const VIDEO_SIZE: usize = 20;
    const WAVEFORMATEX_SIZE: usize = 18;

    fn parse(payload: Bytes) -> Result<Self> {
        require(STRF, &payload, Self::MIN_SIZE)?;
        Ok(Self { payload })
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn video(&self) -> Option<VideoFormat> {
        if self.payload.len() < Self::VIDEO_SIZE {
            return None;
        }
        let mut buf = self.payload.slice(4..);
        let width = buf.get_i32_le();
        let height = buf.get_i32_le();
        buf.advance(2); // planes
        Some(VideoFormat {
            width: width.unsigned_abs(),
            height: height.unsigned_abs(),
            bit_count: buf.get_u16_le(),
            compression: buf.get_u32_le(),
        })
    }

    pub fn audio(&self) -> AudioFormat {
        let mut buf = self.payload.clone();
        let format_tag = buf.get_u16_le();
        let channels = buf.get_u16_le();
        let sample_rate = buf.get_u32_le();
        let avg_bytes_per_sec = buf.get_u32_le();
        let block_align = buf.get_u16_le();
        let bits_per_sample = buf.get_u16_le();
        let codec_data = if buf.remaining() >= 2 {
            let cb_size = buf.get_u16_le() as usize;
            let end = (Self::WAVEFORMATEX_SIZE + cb_size).min(self.payload.len());
            self.payload.slice(Self::WAVEFORMATEX_SIZE..end)
        } else {
            Bytes::new()
        };
        AudioFormat {
            format_tag,
            channels,
            sample_rate,
            avg_bytes_per_sec,
            block_align,
            bits_per_sample,
            codec_data,
        }
    }
}

// ============================================================================
// strn
// ============================================================================

#[derive(Debug, Clone)]
pub struct StreamName {
    name: String,
}

impl StreamName {
    fn parse(payload: Bytes) -> Self {
        let end = payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        Self {
            name: String::from_utf8_lossy(&payload[..end]).into_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// indx / ix## (OpenDML)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperIndexEntry {
    pub offset: u64,
    pub size: u32,
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub struct SuperIndex {
    pub longs_per_entry: u16,
    pub sub_type: u8,
    pub index_type: u8,
    pub chunk_id: u32,
    pub entries: Vec<SuperIndexEntry>,
}

impl SuperIndex {
    const HEADER_SIZE: usize = 24;
    const ENTRY_SIZE: usize = 16;

    fn parse(payload: Bytes) -> Result<Self> {
        require(INDX, &payload, Self::HEADER_SIZE)?;
        let mut buf = payload;
        let longs_per_entry = buf.get_u16_le();
        let sub_type = buf.get_u8();
        let index_type = buf.get_u8();
        let entries_in_use = buf.get_u32_le() as usize;
        let chunk_id = buf.get_u32_le();
        buf.advance(12); // reserved
        let available = buf.remaining() / Self::ENTRY_SIZE;
        if entries_in_use > available {
            tracing::warn!(
                "indx claims {} entries, only {} present",
                entries_in_use,
                available
            );
        }
        let entries = (0..entries_in_use.min(available))
            .map(|_| SuperIndexEntry {
                offset: buf.get_u64_le(),
                size: buf.get_u32_le(),
                duration: buf.get_u32_le(),
            })
            .collect();
        Ok(Self {
            longs_per_entry,
            sub_type,
            index_type,
            chunk_id,
            entries,
        })
    }

    pub fn is_index_of_indexes(&self) -> bool {
        self.index_type == AVI_INDEX_OF_INDEXES
    }

    /// File positions of the leaf chunks this index points at.
    pub fn positions(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.offset).collect()
    }
}

/// One ix## standard index chunk, entries resolved to chunk header positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafIndex {
    pub chunk_id: u32,
    /// (position, size, key frame)
    pub entries: Vec<(u64, u32, bool)>,
}

impl LeafIndex {
    const HEADER_SIZE: usize = 24;

    pub fn parse(payload: Bytes) -> Result<Self> {
        if payload.len() < Self::HEADER_SIZE {
            return Err(AviError::InvalidIndex(format!(
                "leaf index of {} bytes",
                payload.len()
            )));
        }
        let mut buf = payload;
        buf.advance(2); // longs per entry
        let sub_type = buf.get_u8();
        if sub_type != 0 {
            return Err(AviError::InvalidIndex(format!(
                "expected index sub type 0, got {}",
                sub_type
            )));
        }
        let index_type = buf.get_u8();
        if index_type != AVI_INDEX_OF_CHUNKS {
            return Err(AviError::InvalidIndex(format!(
                "expected index type {}, got {}",
                AVI_INDEX_OF_CHUNKS, index_type
            )));
        }
        let entries_in_use = buf.get_u32_le() as usize;
        let chunk_id = buf.get_u32_le();
        // Offsets point past the chunk header; step back so positions match idx1
        let base = buf.get_u64_le().saturating_sub(8);
        buf.advance(4); // reserved

        let available = buf.remaining() / 8;
        if entries_in_use > available {
            tracing::warn!(
                "leaf index for {} claims {} entries, only {} present",
                fourcc_to_string(chunk_id),
                entries_in_use,
                available
            );
        }
        let entries = (0..entries_in_use.min(available))
            .map(|_| {
                let offset = buf.get_u32_le() as u64;
                let size = buf.get_u32_le();
                (
                    base + offset,
                    size & !LEAF_DELTA_FRAME,
                    size & LEAF_DELTA_FRAME == 0,
                )
            })
            .collect();
        Ok(Self { chunk_id, entries })
    }
}

// ============================================================================
// dmlh
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExtendedHeader {
    /// Frames across every RIFF segment
    pub total_frames: u32,
}

impl ExtendedHeader {
    fn parse(payload: Bytes) -> Result<Self> {
        require(DMLH, &payload, 4)?;
        let mut buf = payload;
        Ok(Self {
            total_frames: buf.get_u32_le(),
        })
    }
}

// ============================================================================
// idx1
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatIndexRecord {
    pub chunk_id: u32,
    pub flags: u32,
    pub offset: u32,
    pub size: u32,
}

impl FlatIndexRecord {
    pub fn is_key_frame(&self) -> bool {
        self.flags & AVIIF_KEYFRAME != 0
    }
}

/// Whole records in `data`; a trailing partial record is ignored.
pub fn flat_index_records(mut data: &[u8]) -> impl Iterator<Item = FlatIndexRecord> + '_ {
    std::iter::from_fn(move || {
        if data.remaining() < FLAT_INDEX_RECORD_SIZE {
            return None;
        }
        Some(FlatIndexRecord {
            chunk_id: data.get_u32_le(),
            flags: data.get_u32_le(),
            offset: data.get_u32_le(),
            size: data.get_u32_le(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn strh(kind: u32, scale: u32, rate: u32, length: u32) -> Bytes {
        let mut b = Vec::new();
        b.put_u32_le(kind);
        b.put_u32_le(u32::from_le_bytes(*b"XVID"));
        b.put_u32_le(0); // flags
        b.put_u16_le(0);
        b.put_u16_le(0);
        b.put_u32_le(0); // initial frames
        b.put_u32_le(scale);
        b.put_u32_le(rate);
        b.put_u32_le(0); // start
        b.put_u32_le(length);
        b.put_u32_le(4096);
        b.put_u32_le(0);
        b.put_u32_le(0);
        b.put_bytes(0, 8); // rcFrame
        Bytes::from(b)
    }

    #[test]
    fn stream_header_duration_and_rate() {
        let node = parse_resident(STRH, strh(VIDS, 1001, 30000, 300)).expect("strh");
        let Some(BoxNode::StreamHeader(header)) = node else {
            panic!("expected strh");
        };
        assert_eq!(header.kind(), Some(MediaKind::Video));
        assert_eq!(header.duration_us(), 10_010_000);
        let rate = header.frame_rate().expect("rate");
        assert!((rate - 29.97).abs() < 0.001);
        assert_eq!(header.suggested_buffer_size, 4096);
    }

    #[test]
    fn short_box_is_reported() {
        let err = parse_resident(STRH, Bytes::from_static(&[0u8; 20])).unwrap_err();
        assert!(matches!(err, AviError::BoxTooShort { size: 20, min: 48, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unknown_tag_is_not_resident() {
        assert!(!is_resident(JUNK));
        assert!(parse_resident(JUNK, Bytes::new()).expect("junk").is_none());
    }

    #[test]
    fn video_format_top_down_height() {
        let mut b = Vec::new();
        b.put_u32_le(40);
        b.put_i32_le(640);
        b.put_i32_le(-480);
        b.put_u16_le(1);
        b.put_u16_le(24);
        b.put_u32_le(u32::from_le_bytes(*b"MJPG"));
        b.put_bytes(0, 20);
        let format = StreamFormat::parse(Bytes::from(b)).expect("strf");
        let video = format.video().expect("video");
        assert_eq!((video.width, video.height, video.bit_count), (640, 480, 24));
        assert_eq!(identify_video_codec(video.compression), CodecType::MJPEG);
    }

    #[test]
    fn audio_format_codec_data() {
        let mut b = Vec::new();
        b.put_u16_le(0x00FF);
        b.put_u16_le(2);
        b.put_u32_le(48000);
        b.put_u32_le(24000);
        b.put_u16_le(1);
        b.put_u16_le(16);
        b.put_u16_le(2);
        b.put_slice(&[0x11, 0x90]);
        let audio = StreamFormat::parse(Bytes::from(b)).expect("strf").audio();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(&audio.codec_data[..], &[0x11, 0x90]);

        // Plain WAVEFORMAT without cbSize
        let mut b = Vec::new();
        b.put_u16_le(1);
        b.put_u16_le(1);
        b.put_u32_le(8000);
        b.put_u32_le(16000);
        b.put_u16_le(2);
        b.put_u16_le(16);
        let audio = StreamFormat::parse(Bytes::from(b)).expect("strf").audio();
        assert!(audio.codec_data.is_empty());
    }

    #[test]
    fn stream_name_trailing_nul_optional() {
        assert_eq!(StreamName::parse(Bytes::from_static(b"Commentary\0")).name(), "Commentary");
        assert_eq!(StreamName::parse(Bytes::from_static(b"Main")).name(), "Main");
    }

    #[test]
    fn super_index_entries() {
        let mut b = Vec::new();
        b.put_u16_le(4);
        b.put_u8(0);
        b.put_u8(0);
        b.put_u32_le(2);
        b.put_u32_le(u32::from_le_bytes(*b"00dc"));
        b.put_bytes(0, 12);
        for (offset, size) in [(0x1000u64, 0x200u32), (0x8000, 0x200)] {
            b.put_u64_le(offset);
            b.put_u32_le(size);
            b.put_u32_le(25);
        }
        let index = SuperIndex::parse(Bytes::from(b)).expect("indx");
        assert!(index.is_index_of_indexes());
        assert_eq!(index.positions(), vec![0x1000, 0x8000]);
    }

    #[test]
    fn leaf_index_positions_and_keys() {
        let mut b = Vec::new();
        b.put_u16_le(2);
        b.put_u8(0);
        b.put_u8(1);
        b.put_u32_le(2);
        b.put_u32_le(u32::from_le_bytes(*b"00dc"));
        b.put_u64_le(1000);
        b.put_u32_le(0);
        b.put_u32_le(8);
        b.put_u32_le(500);
        b.put_u32_le(516);
        b.put_u32_le(300 | LEAF_DELTA_FRAME);
        let leaf = LeafIndex::parse(Bytes::from(b)).expect("leaf");
        assert_eq!(leaf.entries, vec![(1000, 500, true), (1508, 300, false)]);
    }

    #[test]
    fn leaf_index_rejects_wrong_type() {
        let mut b = vec![0u8; 24];
        b[3] = 0; // index of indexes, not chunks
        let err = LeafIndex::parse(Bytes::from(b)).unwrap_err();
        assert!(matches!(err, AviError::InvalidIndex(_)));
    }

    #[test]
    fn flat_records_ignore_partial_tail() {
        let mut b = Vec::new();
        b.put_u32_le(u32::from_le_bytes(*b"00dc"));
        b.put_u32_le(AVIIF_KEYFRAME);
        b.put_u32_le(4);
        b.put_u32_le(100);
        b.put_bytes(0, 10);
        let records: Vec<_> = flat_index_records(&b).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_key_frame());
        assert_eq!(records[0].size, 100);
    }

    #[test]
    fn lists_find_children() {
        let mut strl = ListBox::new(STRL);
        strl.push(parse_resident(STRH, strh(AUDS, 1, 44100, 44100)).expect("strh").expect("node"));
        strl.push(BoxNode::StreamName(StreamName::parse(Bytes::from_static(b"en"))));
        let mut hdrl = ListBox::new(HDRL);
        hdrl.push(BoxNode::List(strl));
        hdrl.push(BoxNode::List(ListBox::new(ODML)));

        assert_eq!(hdrl.lists(STRL).count(), 1);
        let strl = hdrl.lists(STRL).next().expect("strl");
        assert_eq!(strl.stream_header().and_then(|h| h.kind()), Some(MediaKind::Audio));
        assert_eq!(strl.stream_name().map(|n| n.name()), Some("en"));
        assert!(strl.stream_format().is_none());
        assert!(hdrl.avi_header().is_none());
    }
}

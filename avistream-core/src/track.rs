// TRACKS - one per usable strl list
//
// A track owns its chunk index and consumer. Its public description is the
// serializable `TrackFormat`.

use serde::Serialize;

use crate::boxes::{ListBox, SuperIndex};
use crate::chunk_index::ChunkIndex;
use crate::clock::ChunkClock;
use crate::consumer::{ChunkConsumer, ProbeFactory};
use crate::fourcc::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackFormat {
    pub id: u32,
    pub kind: MediaKind,
    pub codec: CodecType,
    pub fourcc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u16>,
    /// Bits per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_bitrate: Option<u32>,
    /// Suggested buffer size from the stream header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub init_data: Vec<u8>,
    /// Estimate from the stream header
    pub duration_us: u64,
}

#[derive(Debug)]
pub struct Track {
    pub id: u32,
    pub chunk_id: u32,
    /// Uncompressed variant some muxers use for key frames
    pub chunk_id_alt: Option<u32>,
    pub format: TrackFormat,
    pub chunk_index: ChunkIndex,
    pub consumer: ChunkConsumer,
    pub super_index: Option<SuperIndex>,
}

impl Track {
    pub fn kind(&self) -> MediaKind {
        self.format.kind
    }

    pub fn is_video(&self) -> bool {
        self.format.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.format.kind == MediaKind::Audio
    }

    pub fn handles_chunk_id(&self, chunk_id: u32) -> bool {
        self.chunk_id == chunk_id || self.chunk_id_alt == Some(chunk_id)
    }
}

/// Build a track from one `strl` list. `id` is the list's ordinal in `hdrl`.
///
/// Returns `None` (with a warning) when the list lacks a header or format, or
/// describes a stream that is neither video nor audio.
pub fn build_track(strl: &ListBox, id: u32, probes: ProbeFactory) -> Option<Track> {
    let Some(header) = strl.stream_header() else {
        tracing::warn!("Stream {}: missing strh, dropping", id);
        return None;
    };
    let Some(stream_format) = strl.stream_format() else {
        tracing::warn!("Stream {}: missing strf, dropping", id);
        return None;
    };
    let Some(kind) = header.kind() else {
        tracing::debug!(
            "Stream {}: ignoring {} stream",
            id,
            fourcc_to_string(header.stream_type)
        );
        return None;
    };

    let duration_us = header.duration_us();
    let clock = ChunkClock::new(duration_us, header.length as u64);
    let mut format = TrackFormat {
        id,
        kind,
        codec: CodecType::Unknown,
        fourcc: String::new(),
        width: None,
        height: None,
        frame_rate: None,
        channels: None,
        sample_rate: None,
        bits_per_sample: None,
        average_bitrate: None,
        max_input_size: (header.suggested_buffer_size != 0).then_some(header.suggested_buffer_size),
        label: strl.stream_name().map(|n| n.name().to_string()),
        init_data: Vec::new(),
        duration_us,
    };

    let (chunk_id, chunk_id_alt, consumer) = match kind {
        MediaKind::Video => {
            let Some(video) = stream_format.video() else {
                tracing::warn!("Stream {}: strf too short for BITMAPINFOHEADER", id);
                return None;
            };
            let mut codec = identify_video_codec(video.compression);
            let mut fourcc = video.compression;
            if codec == CodecType::Unknown {
                codec = identify_video_codec(header.handler);
                if codec != CodecType::Unknown {
                    fourcc = header.handler;
                }
            }
            if codec == CodecType::Unknown {
                tracing::warn!("Stream {}: unknown FourCC {}", id, fourcc_to_string(fourcc));
            }
            format.codec = codec;
            format.fourcc = fourcc_to_string(fourcc);
            format.width = Some(video.width);
            format.height = Some(video.height);
            format.frame_rate = header.frame_rate();
            format.bits_per_sample = Some(video.bit_count);

            let consumer = match probes(codec) {
                Some(probe) => ChunkConsumer::reordering(id, clock, probe),
                None => ChunkConsumer::constant(id, clock),
            };
            (
                chunk_id(id, TYPE_VIDEO),
                Some(chunk_id(id, TYPE_VIDEO_RAW)),
                consumer,
            )
        }
        MediaKind::Audio => {
            let audio = stream_format.audio();
            format.codec = identify_audio_codec(audio.format_tag);
            format.fourcc = format!("0x{:04X}", audio.format_tag);
            format.channels = Some(audio.channels);
            format.sample_rate = Some(audio.sample_rate);
            format.bits_per_sample = (audio.bits_per_sample != 0).then_some(audio.bits_per_sample);
            format.average_bitrate =
                (audio.avg_bytes_per_sec != 0).then(|| audio.avg_bytes_per_sec.saturating_mul(8));
            format.init_data = audio.codec_data.to_vec();
            (
                chunk_id(id, TYPE_AUDIO),
                None,
                ChunkConsumer::constant(id, clock),
            )
        }
    };

    let super_index = strl.super_index().and_then(|index| {
        if index.is_index_of_indexes() {
            Some(index.clone())
        } else {
            tracing::warn!(
                "Stream {}: indx type {} is not an index of indexes, ignoring",
                id,
                index.index_type
            );
            None
        }
    });

    Some(Track {
        id,
        chunk_id,
        chunk_id_alt,
        format,
        chunk_index: ChunkIndex::new(),
        consumer,
        super_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{parse_resident, BoxNode};
    use crate::consumer::default_probe;
    use bytes::{BufMut, Bytes};

    fn strh(kind: u32, handler: u32, scale: u32, rate: u32, length: u32) -> BoxNode {
        let mut b = Vec::new();
        b.put_u32_le(kind);
        b.put_u32_le(handler);
        b.put_bytes(0, 12);
        b.put_u32_le(scale);
        b.put_u32_le(rate);
        b.put_u32_le(0);
        b.put_u32_le(length);
        b.put_u32_le(0);
        b.put_u32_le(0);
        b.put_u32_le(0);
        parse_resident(STRH, Bytes::from(b)).expect("strh").expect("node")
    }

    fn video_strf(compression: &[u8; 4]) -> BoxNode {
        let mut b = Vec::new();
        b.put_u32_le(40);
        b.put_i32_le(320);
        b.put_i32_le(240);
        b.put_u16_le(1);
        b.put_u16_le(12);
        b.put_slice(compression);
        b.put_bytes(0, 20);
        parse_resident(STRF, Bytes::from(b)).expect("strf").expect("node")
    }

    fn audio_strf() -> BoxNode {
        let mut b = Vec::new();
        b.put_u16_le(0x0055);
        b.put_u16_le(2);
        b.put_u32_le(44100);
        b.put_u32_le(16000);
        b.put_u16_le(1);
        b.put_u16_le(0);
        b.put_u16_le(0);
        parse_resident(STRF, Bytes::from(b)).expect("strf").expect("node")
    }

    fn strl(children: Vec<BoxNode>) -> ListBox {
        let mut list = ListBox::new(STRL);
        for child in children {
            list.push(child);
        }
        list
    }

    #[test]
    fn builds_video_track() {
        let list = strl(vec![strh(VIDS, 0, 1, 25, 250), video_strf(b"XVID")]);
        let track = build_track(&list, 0, default_probe).expect("track");
        assert!(track.is_video());
        assert!(track.handles_chunk_id(u32::from_le_bytes(*b"00dc")));
        assert!(track.handles_chunk_id(u32::from_le_bytes(*b"00db")));
        assert!(!track.handles_chunk_id(u32::from_le_bytes(*b"01dc")));
        assert_eq!(track.format.codec, CodecType::MPEG4);
        assert_eq!(track.format.width, Some(320));
        assert_eq!(track.format.duration_us, 10_000_000);
        assert_eq!(track.format.frame_rate, Some(25.0));
        assert!(track.consumer.is_reordering());
    }

    #[test]
    fn handler_fourcc_fills_in_unknown_compression() {
        let handler = u32::from_le_bytes(*b"H264");
        let list = strl(vec![strh(VIDS, handler, 1, 25, 25), video_strf(b"\0\0\0\0")]);
        let track = build_track(&list, 2, default_probe).expect("track");
        assert_eq!(track.format.codec, CodecType::H264);
        assert_eq!(track.format.fourcc, "H264");
        assert!(!track.consumer.is_reordering());
        assert_eq!(track.chunk_id, u32::from_le_bytes(*b"02dc"));
    }

    #[test]
    fn builds_audio_track() {
        let list = strl(vec![strh(AUDS, 0, 1, 1000, 5000), audio_strf()]);
        let track = build_track(&list, 1, default_probe).expect("track");
        assert!(track.is_audio());
        assert_eq!(track.chunk_id, u32::from_le_bytes(*b"01wb"));
        assert_eq!(track.chunk_id_alt, None);
        assert_eq!(track.format.codec, CodecType::MP3);
        assert_eq!(track.format.average_bitrate, Some(128_000));
        assert_eq!(track.format.duration_us, 5_000_000);
    }

    #[test]
    fn drops_incomplete_or_foreign_streams() {
        assert!(build_track(&strl(vec![video_strf(b"XVID")]), 0, default_probe).is_none());
        assert!(build_track(&strl(vec![strh(VIDS, 0, 1, 25, 1)]), 0, default_probe).is_none());
        let text = u32::from_le_bytes(*b"txts");
        let list = strl(vec![strh(text, 0, 1, 25, 1), audio_strf()]);
        assert!(build_track(&list, 0, default_probe).is_none());
    }

    #[test]
    fn format_serializes_without_empty_fields() {
        let list = strl(vec![strh(AUDS, 0, 1, 1000, 5000), audio_strf()]);
        let track = build_track(&list, 1, default_probe).expect("track");
        let json = serde_json::to_value(&track.format).expect("json");
        assert_eq!(json["kind"], "audio");
        assert_eq!(json["codec"], "MP3");
        assert!(json.get("width").is_none());
        assert!(json.get("init_data").is_none());
    }
}

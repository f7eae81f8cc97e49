// FOURCC - RIFF tags and AVI chunk ids
//
// Every tag is compared as the little-endian u32 of its four ASCII bytes,
// which is how they sit on disk.

use serde::{Deserialize, Serialize};

// ============================================================================
// RIFF/AVI Constants
// ============================================================================

pub const RIFF: u32 = 0x46464952; // "RIFF"
pub const AVI_: u32 = 0x20495641; // "AVI "
pub const AVIX: u32 = 0x58495641; // "AVIX" - OpenDML continuation
pub const AVI_MASK: u32 = 0x00FFFFFF;
pub const AVI_PREFIX: u32 = 0x00495641; // "AVI" in the low three bytes
pub const LIST: u32 = 0x5453494C; // "LIST"
pub const HDRL: u32 = 0x6C726468; // "hdrl" - header list
pub const STRL: u32 = 0x6C727473; // "strl" - stream list
pub const ODML: u32 = 0x6C6D646F; // "odml" - OpenDML list
pub const MOVI: u32 = 0x69766F6D; // "movi" - movie data
pub const REC_: u32 = 0x20636572; // "rec " - interleave group
pub const IDX1: u32 = 0x31786469; // "idx1" - legacy index
pub const JUNK: u32 = 0x4B4E554A; // "JUNK"

// Resident boxes
pub const AVIH: u32 = 0x68697661; // "avih"
pub const STRH: u32 = 0x68727473; // "strh"
pub const STRF: u32 = 0x66727473; // "strf"
pub const STRN: u32 = 0x6E727473; // "strn"
pub const INDX: u32 = 0x78646E69; // "indx"
pub const DMLH: u32 = 0x686C6D64; // "dmlh"

// Stream types
pub const VIDS: u32 = 0x73646976; // "vids"
pub const AUDS: u32 = 0x73647561; // "auds"

// Chunk type suffixes, in the high two bytes of a chunk id
pub const TYPE_VIDEO: u32 = ((b'd' as u32) << 16) | ((b'c' as u32) << 24); // "##dc"
pub const TYPE_VIDEO_RAW: u32 = ((b'd' as u32) << 16) | ((b'b' as u32) << 24); // "##db"
pub const TYPE_AUDIO: u32 = ((b'w' as u32) << 16) | ((b'b' as u32) << 24); // "##wb"

// Video codecs (FourCC)
const XVID: u32 = 0x44495658;
const DIVX: u32 = 0x58564944;
const DX50: u32 = 0x30355844;
const FMP4: u32 = 0x34504D46;
const MP4V: u32 = 0x5634504D;
const H264: u32 = 0x34363248;
const AVC1: u32 = 0x31435641;
const X264: u32 = 0x34363258;
const MJPG: u32 = 0x47504A4D;
const I420: u32 = 0x30323449; // Raw YUV
const YV12: u32 = 0x32315659;
const CVID: u32 = 0x44495643; // Cinepak
const IV50: u32 = 0x30355649; // Intel Indeo 5

// Audio format tags (WAVEFORMATEX)
const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_MPEG: u16 = 0x0050;
const WAVE_FORMAT_MPEGLAYER3: u16 = 0x0055;
const WAVE_FORMAT_AAC: u16 = 0x00FF;
const WAVE_FORMAT_DOLBY_AC3: u16 = 0x2000;
const WAVE_FORMAT_DTS: u16 = 0x2001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecType {
    // Video
    H264,
    MPEG4, // DivX/Xvid
    MJPEG,
    RawYUV,
    Cinepak,
    Indeo,
    // Audio
    PCM,
    MP3,
    MPEGAudio, // layer 1/2
    AC3,
    AAC,
    DTS,
    // Unknown
    Unknown,
}

// ============================================================================
// Chunk ids
// ============================================================================

/// Two ASCII digits for `id` in the low half of a chunk id ("00", "01", ...).
pub fn chunk_id_lower(id: u32) -> u32 {
    let tens = (id / 10) % 10;
    let ones = id % 10;
    (b'0' as u32 + tens) | ((b'0' as u32 + ones) << 8)
}

pub fn chunk_id(stream_id: u32, chunk_type: u32) -> u32 {
    chunk_id_lower(stream_id) | chunk_type
}

pub fn fourcc_to_string(fourcc: u32) -> String {
    let bytes = fourcc.to_le_bytes();
    bytes
        .iter()
        .filter(|&&b| b.is_ascii_graphic() || b == b' ')
        .map(|&b| b as char)
        .collect()
}

fn to_ascii_uppercase(fourcc: u32) -> u32 {
    let bytes = fourcc.to_le_bytes();
    u32::from_le_bytes([
        bytes[0].to_ascii_uppercase(),
        bytes[1].to_ascii_uppercase(),
        bytes[2].to_ascii_uppercase(),
        bytes[3].to_ascii_uppercase(),
    ])
}

// ============================================================================
// Codec identification
// ============================================================================

pub fn identify_video_codec(fourcc: u32) -> CodecType {
    match to_ascii_uppercase(fourcc) {
        H264 | AVC1 | X264 => CodecType::H264,
        XVID | DIVX | DX50 | FMP4 | MP4V => CodecType::MPEG4,
        MJPG => CodecType::MJPEG,
        I420 | YV12 => CodecType::RawYUV,
        CVID => CodecType::Cinepak,
        IV50 => CodecType::Indeo,
        _ => {
            let s = fourcc_to_string(fourcc).to_uppercase();
            if s.contains("264") || s.contains("AVC") {
                CodecType::H264
            } else if s.contains("XVID") || s.contains("DIVX") || s.contains("MP4") {
                CodecType::MPEG4
            } else {
                CodecType::Unknown
            }
        }
    }
}

pub fn identify_audio_codec(format_tag: u16) -> CodecType {
    match format_tag {
        WAVE_FORMAT_PCM => CodecType::PCM,
        WAVE_FORMAT_MPEGLAYER3 => CodecType::MP3,
        WAVE_FORMAT_MPEG => CodecType::MPEGAudio,
        WAVE_FORMAT_DOLBY_AC3 => CodecType::AC3,
        WAVE_FORMAT_AAC => CodecType::AAC,
        WAVE_FORMAT_DTS => CodecType::DTS,
        _ => CodecType::Unknown,
    }
}

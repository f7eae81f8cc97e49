//! Error types for the AVI demuxer.

use thiserror::Error;

use crate::fourcc::fourcc_to_string;

pub type Result<T> = std::result::Result<T, AviError>;

#[derive(Debug, Error)]
pub enum AviError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Expected RIFF, found {0:?}")]
    NotRiff(String),
    #[error("Expected AVI RIFF type, found {0:?}")]
    NotAvi(String),
    #[error("Box too big: {tag} {size} (max {max})")]
    BoxTooLarge { tag: String, size: u64, max: u64 },
    #[error("Box too short: {tag} {size} (need {min})")]
    BoxTooShort { tag: String, size: usize, min: usize },
    #[error("Expected avih in header list")]
    MissingAviHeader,
    #[error("No hdrl list before end of RIFF")]
    MissingHeaderList,
    #[error("ChunkIndex released")]
    ReleasedIndex,
    #[error("Invalid index: {0}")]
    InvalidIndex(String),
    #[error("Unexpected end of input at {0}")]
    UnexpectedEndOfInput(u64),
    #[error("Demuxer used before init()")]
    NotInitialized,
    #[error("Config error: {0}")]
    Config(String),
}

impl AviError {
    pub fn box_too_large(tag: u32, size: u64, max: u64) -> Self {
        AviError::BoxTooLarge {
            tag: fourcc_to_string(tag),
            size,
            max,
        }
    }

    pub fn box_too_short(tag: u32, size: usize, min: usize) -> Self {
        AviError::BoxTooShort {
            tag: fourcc_to_string(tag),
            size,
            min,
        }
    }

    /// Recoverable errors drop the offending box or index. The rest abort the parse.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AviError::BoxTooShort { .. } | AviError::InvalidIndex(_)
        )
    }
}

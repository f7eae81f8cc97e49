//! Byte sources the demuxer pulls from.
//!
//! The demuxer only ever moves forward through a source. When it needs a
//! different position it returns `ReadResult::Reposition` and the caller moves
//! the source (see [`Reposition`]).

use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::{AviError, Result};

pub trait ByteSource {
    /// Absolute position of the next byte `read` returns.
    fn position(&self) -> u64;

    /// Total length, when known.
    fn length(&self) -> Option<u64>;

    /// Read up to `buf.len()` bytes. May return fewer; 0 means end of input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(AviError::UnexpectedEndOfInput(self.position()));
            }
            filled += n;
        }
        Ok(())
    }

    fn skip(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = [0u8; 4096];
        while n > 0 {
            let want = n.min(scratch.len() as u64) as usize;
            let read = self.read(&mut scratch[..want])?;
            if read == 0 {
                return Err(AviError::UnexpectedEndOfInput(self.position()));
            }
            n -= read as u64;
        }
        Ok(())
    }
}

/// Sources the caller can move when the demuxer asks for it.
pub trait Reposition {
    fn reposition(&mut self, position: u64) -> io::Result<()>;
}

// ============================================================================
// Read + Seek wrapper
// ============================================================================

pub struct ReaderSource<R: Read + Seek> {
    reader: R,
    position: u64,
    length: Option<u64>,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            position: 0,
            length: Some(length),
        })
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        self.length
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.position + n;
        if let Some(length) = self.length {
            if target > length {
                return Err(AviError::UnexpectedEndOfInput(length));
            }
        }
        self.reader.seek(SeekFrom::Start(target))?;
        self.position = target;
        Ok(())
    }
}

impl<R: Read + Seek> Reposition for ReaderSource<R> {
    fn reposition(&mut self, position: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }
}

// ============================================================================
// In-memory source
// ============================================================================

/// Whole file in memory, optionally handing out at most `max_read` bytes per
/// `read` call to mimic a source that only has part of the data buffered.
pub struct MemorySource {
    data: Bytes,
    position: u64,
    max_read: usize,
    repositions: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            max_read: usize::MAX,
            repositions: 0,
        }
    }

    pub fn with_max_read(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    /// Number of times the caller moved this source.
    pub fn repositions(&self) -> usize {
        self.repositions
    }
}

impl ByteSource for MemorySource {
    fn position(&self) -> u64 {
        self.position
    }

    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.position.min(self.data.len() as u64) as usize;
        let available = self.data.len() - start;
        let n = buf.len().min(available).min(self.max_read);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

/// Like `io::Cursor`, positions past the end are allowed and read nothing.
impl Reposition for MemorySource {
    fn reposition(&mut self, position: u64) -> io::Result<()> {
        self.position = position;
        self.repositions += 1;
        Ok(())
    }
}

/// Maps a track's chunk index to presentation time, assuming every chunk
/// covers `duration_us / chunks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkClock {
    duration_us: u64,
    chunks: u64,
    index: u64,
}

impl ChunkClock {
    pub fn new(duration_us: u64, chunks: u64) -> Self {
        Self {
            duration_us,
            chunks,
            index: 0,
        }
    }

    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn set_duration(&mut self, duration_us: u64) {
        self.duration_us = duration_us;
    }

    pub fn set_chunks(&mut self, chunks: u64) {
        self.chunks = chunks;
    }

    pub fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }

    pub fn advance_by(&mut self, n: u64) {
        self.index += n;
    }

    /// Time of chunk `index`. Zero while the chunk count is unknown.
    pub fn us_at(&self, index: u64) -> u64 {
        if self.chunks == 0 {
            return 0;
        }
        (self.duration_us as u128 * index as u128 / self.chunks as u128) as u64
    }

    pub fn time_us(&self) -> u64 {
        self.us_at(self.index)
    }

    pub fn us_per_chunk(&self) -> u64 {
        if self.chunks == 0 {
            0
        } else {
            self.duration_us / self.chunks
        }
    }
}

// CHUNK INDEX - per-track ledger of chunk positions
//
// Filled while an index box (or the movie data itself) is read, queried once
// by the seek map builder, then released.

use crate::error::{AviError, Result};

const INITIAL_CAPACITY: usize = 8;

/// Key frames of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFrames {
    All,
    /// Sorted chunk indices
    Listed(Vec<usize>),
}

impl KeyFrames {
    pub fn is_key_frame(&self, index: usize) -> bool {
        match self {
            KeyFrames::All => true,
            KeyFrames::Listed(keys) => keys.binary_search(&index).is_ok(),
        }
    }
}

#[derive(Debug)]
enum IndexState {
    Indexing {
        positions: Vec<u64>,
        sizes: Vec<u32>,
        keys: Vec<bool>,
    },
    Released,
}

#[derive(Debug)]
pub struct ChunkIndex {
    state: IndexState,
    chunks: usize,
    key_frame_count: usize,
    total_size: u64,
    monotonic: bool,
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self {
            state: IndexState::Indexing {
                positions: Vec::with_capacity(INITIAL_CAPACITY),
                sizes: Vec::with_capacity(INITIAL_CAPACITY),
                keys: Vec::with_capacity(INITIAL_CAPACITY),
            },
            chunks: 0,
            key_frame_count: 0,
            total_size: 0,
            monotonic: true,
        }
    }

    /// Append a chunk at absolute file `position`.
    pub fn add(&mut self, position: u64, size: u32, key: bool) -> Result<()> {
        let IndexState::Indexing {
            positions,
            sizes,
            keys,
        } = &mut self.state
        else {
            return Err(AviError::ReleasedIndex);
        };
        if positions.len() == positions.capacity() {
            // Grow by a quarter
            let extra = (positions.len() / 4).max(1);
            positions.reserve_exact(extra);
            sizes.reserve_exact(extra);
            keys.reserve_exact(extra);
        }
        if let Some(&last) = positions.last() {
            if position <= last {
                self.monotonic = false;
            }
        }
        positions.push(position);
        sizes.push(size);
        keys.push(key);
        self.chunks += 1;
        self.total_size += size as u64;
        if key {
            self.key_frame_count += 1;
        }
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn key_frame_count(&self) -> usize {
        self.key_frame_count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_all_key_frames(&self) -> bool {
        self.key_frame_count == self.chunks
    }

    /// False once a chunk was added at or before its predecessor.
    pub fn is_monotonic(&self) -> bool {
        self.monotonic
    }

    pub fn is_released(&self) -> bool {
        matches!(self.state, IndexState::Released)
    }

    /// Drop the per-chunk arrays. Counts stay available.
    pub fn release(&mut self) {
        self.state = IndexState::Released;
    }

    fn arrays(&self) -> Result<(&[u64], &[u32], &[bool])> {
        match &self.state {
            IndexState::Indexing {
                positions,
                sizes,
                keys,
            } => Ok((positions, sizes, keys)),
            IndexState::Released => Err(AviError::ReleasedIndex),
        }
    }

    pub fn position(&self, index: usize) -> Result<Option<u64>> {
        let (positions, _, _) = self.arrays()?;
        Ok(positions.get(index).copied())
    }

    pub fn size(&self, index: usize) -> Result<Option<u32>> {
        let (_, sizes, _) = self.arrays()?;
        Ok(sizes.get(index).copied())
    }

    pub fn get_key_frame_subset(&self) -> Result<KeyFrames> {
        let (_, _, keys) = self.arrays()?;
        if self.is_all_key_frames() {
            return Ok(KeyFrames::All);
        }
        let listed = keys
            .iter()
            .enumerate()
            .filter(|&(_, &key)| key)
            .map(|(i, _)| i)
            .collect();
        Ok(KeyFrames::Listed(listed))
    }

    /// Evenly spaced pseudo key frames, one every `secs_between` seconds of a
    /// clock that advances `duration_us / chunk_count` per chunk.
    pub fn get_sampled_subset(&self, duration_us: u64, secs_between: u32) -> Result<Vec<usize>> {
        self.arrays()?;
        if self.chunks == 0 {
            return Ok(Vec::new());
        }
        let chunk_us = duration_us / self.chunks as u64;
        let step_us = secs_between as u64 * 1_000_000;
        let mut subset = Vec::new();
        let mut clock_us = 0u64;
        let mut next_us = 0u64;
        for i in 0..self.chunks {
            if clock_us >= next_us {
                subset.push(i);
                next_us += step_us;
            }
            clock_us += chunk_us;
        }
        Ok(subset)
    }

    /// For each of the sorted `references`, the last chunk starting at or
    /// before it. A reference before the first chunk maps to 0.
    pub fn get_indices(&self, references: &[u64]) -> Result<Vec<usize>> {
        let (positions, _, _) = self.arrays()?;
        let mut indices = Vec::with_capacity(references.len());
        let mut cursor = 0usize;
        for &reference in references {
            while cursor + 1 < positions.len() && positions[cursor + 1] <= reference {
                cursor += 1;
            }
            indices.push(cursor);
        }
        Ok(indices)
    }

    pub fn get_index_positions(&self, indices: &[usize]) -> Result<Vec<u64>> {
        let (positions, _, _) = self.arrays()?;
        indices
            .iter()
            .map(|&i| {
                positions.get(i).copied().ok_or_else(|| {
                    AviError::InvalidIndex(format!("chunk {} of {}", i, positions.len()))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_at(positions: &[u64]) -> ChunkIndex {
        let mut index = ChunkIndex::new();
        for &p in positions {
            index.add(p, 100, true).expect("add");
        }
        index
    }

    #[test]
    fn indices_at_or_before() {
        let index = index_at(&[12, 19, 33, 47]);
        let indices = index
            .get_indices(&[10, 20, 30, 40, 50, 60, 70])
            .expect("indices");
        assert_eq!(indices, vec![0, 1, 1, 2, 3, 3, 3]);
    }

    #[test]
    fn track_ending_early_maps_to_last_chunk() {
        let index = index_at(&[6, 12, 19, 33, 47, 61, 75]);
        let indices = index
            .get_indices(&[10, 20, 30, 40, 50, 60, 70, 200])
            .expect("indices");
        assert_eq!(*indices.last().expect("last"), 6);
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn sampled_subset_every_two_seconds() {
        let positions: Vec<u64> = (0..240).map(|i| i * 3).collect();
        let index = index_at(&positions);
        let subset = index.get_sampled_subset(10_000_000, 2).expect("subset");
        assert_eq!(subset, vec![0, 49, 97, 145, 193]);
    }

    #[test]
    fn key_frame_subset() {
        let mut index = ChunkIndex::new();
        for i in 0..10u64 {
            index.add(i * 10, 4, i % 4 == 0).expect("add");
        }
        assert_eq!(index.key_frame_count(), 3);
        assert_eq!(
            index.get_key_frame_subset().expect("keys"),
            KeyFrames::Listed(vec![0, 4, 8])
        );
        assert_eq!(index_at(&[1, 2]).get_key_frame_subset().expect("keys"), KeyFrames::All);
    }

    #[test]
    fn growth_keeps_positions() {
        let positions: Vec<u64> = (0..100).map(|i| 1000 + i * 7).collect();
        let index = index_at(&positions);
        let all: Vec<usize> = (0..100).collect();
        assert_eq!(index.get_index_positions(&all).expect("positions"), positions);
        assert_eq!(index.total_size(), 100 * 100);
        assert!(index.is_monotonic());
    }

    #[test]
    fn detects_non_monotonic() {
        let index = index_at(&[10, 30, 20]);
        assert!(!index.is_monotonic());
    }

    #[test]
    fn released_rejects_queries() {
        let mut index = index_at(&[10, 20]);
        index.release();
        assert!(index.is_released());
        assert!(matches!(index.get_indices(&[10]), Err(AviError::ReleasedIndex)));
        assert!(matches!(index.add(30, 1, true), Err(AviError::ReleasedIndex)));
        assert!(matches!(index.get_key_frame_subset(), Err(AviError::ReleasedIndex)));
        assert_eq!(index.chunk_count(), 2);
        assert!(index.is_all_key_frames());
    }

    #[test]
    fn out_of_range_position_lookup() {
        let index = index_at(&[10]);
        assert!(index.get_index_positions(&[3]).is_err());
    }
}

// AVI DEMUXER - resumable RIFF/AVI walker
//
// Every `read` call runs one step of the reader on top of an explicit stack.
// Readers never recurse into the source: a child box is walked by pushing a
// new reader over its extent, clamped to the parent's end.
//
// Life of a file:
//   1. structure pass: RIFF segments, hdrl (tracks), movi extents, idx1
//   2. index pass: OpenDML leaf indexes, when every track has one
//   3. movie pass: chunk payloads handed to track consumers

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::boxes::{self, LeafIndex, ListBox, FLAT_INDEX_RECORD_SIZE};
use crate::chunk_index::ChunkIndex;
use crate::config::DemuxConfig;
use crate::consumer::{default_probe, ProbeFactory};
use crate::error::{AviError, Result};
use crate::fourcc::*;
use crate::output::DemuxOutput;
use crate::seek_map::{build_seek_map, SeekMap, SeekOutcome};
use crate::source::{ByteSource, Reposition};
use crate::track::{build_track, Track};

const CHUNK_HEADER_SIZE: u64 = 8;
const LIST_HEADER_SIZE: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    Continue,
    /// Move the source to this absolute position, then call `read` again
    Reposition(u64),
    EndOfInput,
}

fn align(position: u64) -> u64 {
    position + (position & 1)
}

/// True when the source starts with a `RIFF....AVI ` header. Leaves the
/// source where it found it.
pub fn sniff<S: ByteSource + Reposition + ?Sized>(source: &mut S) -> Result<bool> {
    let start = source.position();
    let mut header = [0u8; LIST_HEADER_SIZE as usize];
    let mut filled = 0;
    while filled < header.len() {
        let n = source.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    source.reposition(start)?;
    if filled < header.len() {
        return Ok(false);
    }
    let mut buf = &header[..];
    let riff = buf.get_u32_le();
    buf.advance(4);
    Ok(riff == RIFF && buf.get_u32_le() == AVI_)
}

/// Run `demuxer` to the end of input over a source that can move itself.
pub fn drive<O, S>(demuxer: &mut AviDemuxer<O>, source: &mut S) -> Result<()>
where
    O: DemuxOutput,
    S: ByteSource + Reposition + ?Sized,
{
    loop {
        match demuxer.read(source)? {
            ReadResult::Continue => {}
            ReadResult::Reposition(position) => source.reposition(position)?,
            ReadResult::EndOfInput => return Ok(()),
        }
    }
}

// ============================================================================
// Readers
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Extent {
    end: u64,
    position: u64,
}

impl Extent {
    fn new(start: u64, end: u64) -> Self {
        Self {
            end,
            position: start,
        }
    }

    fn has_header(&self, header: u64) -> bool {
        self.position + header <= self.end
    }

    /// Skip a child whose payload starts at `payload` and declares `size`.
    fn skip_child(&mut self, payload: u64, size: u32) {
        self.position = align(payload + size as u64).min(self.end);
    }

    /// End of a child payload, clamped to this extent.
    fn child_end(&self, payload: u64, size: u32) -> u64 {
        (payload + size as u64).min(self.end)
    }
}

/// `LIST movi` payload. Chunks are walked in file order.
#[derive(Debug, Clone, Copy)]
struct MovieReader {
    start: u64,
    extent: Extent,
}

impl MovieReader {
    /// Resume at `position`. False when the position lies past this list.
    fn set_position(&mut self, position: u64) -> bool {
        if position > self.extent.end {
            return false;
        }
        self.extent.position = position.max(self.start);
        true
    }
}

#[derive(Debug)]
enum Reader {
    /// Whole source, one RIFF segment after another
    Root { position: u64, segments: u32 },
    /// Payload of one RIFF segment
    Segment { extent: Extent, riff_type: u32, movi_offset: u64 },
    /// A LIST inside hdrl, collecting its resident children
    List { extent: Extent, list: ListBox },
    Movie(usize),
    Track(usize),
    FlatIndex(FlatIndexReader),
    LeafIndex(VecDeque<u64>),
}

#[derive(Debug)]
struct FlatIndexReader {
    extent: Extent,
    movi_offset: u64,
    base: Option<u64>,
    records: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Structure,
    Movie,
    Done,
}

// ============================================================================
// Demuxer
// ============================================================================

pub struct AviDemuxer<O: DemuxOutput> {
    config: DemuxConfig,
    probes: ProbeFactory,
    output: Option<O>,
    stack: Vec<Reader>,
    movies: Vec<MovieReader>,
    tracks: Vec<Track>,
    tracks_ended: bool,
    seek_map: Option<Arc<SeekMap>>,
    seek_map_sent: bool,
    /// No usable index: record chunks while walking the movie data
    walk_indexing: bool,
    /// avih carries AVIF_HASINDEX
    declares_index: bool,
    duration_us: u64,
    phase: Phase,
    scratch: Vec<u8>,
}

impl<O: DemuxOutput> AviDemuxer<O> {
    pub fn new(config: DemuxConfig) -> Self {
        let scratch = vec![0u8; config.read_buffer_size];
        Self {
            config,
            probes: default_probe,
            output: None,
            stack: Vec::with_capacity(8),
            movies: Vec::new(),
            tracks: Vec::new(),
            tracks_ended: false,
            seek_map: None,
            seek_map_sent: false,
            walk_indexing: false,
            declares_index: false,
            duration_us: 0,
            phase: Phase::Structure,
            scratch,
        }
    }

    /// Replace the frame type probes chosen per video codec.
    pub fn with_probes(mut self, probes: ProbeFactory) -> Self {
        self.probes = probes;
        self
    }

    /// Attach the output and start over from the beginning of the source.
    pub fn init(&mut self, output: O) {
        self.output = Some(output);
        self.stack.clear();
        self.movies.clear();
        self.tracks.clear();
        self.tracks_ended = false;
        self.seek_map = None;
        self.seek_map_sent = false;
        self.walk_indexing = false;
        self.declares_index = false;
        self.duration_us = 0;
        self.phase = Phase::Structure;
        self.stack.push(Reader::Root {
            position: 0,
            segments: 0,
        });
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    pub fn output_mut(&mut self) -> Option<&mut O> {
        self.output.as_mut()
    }

    pub fn into_output(self) -> Option<O> {
        self.output
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn seek_map(&self) -> Option<&Arc<SeekMap>> {
        self.seek_map.as_ref()
    }

    /// Container duration from avih (or dmlh) frame counts.
    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    fn track_slot(&self, chunk_id: u32) -> Option<usize> {
        self.tracks.iter().position(|t| t.handles_chunk_id(chunk_id))
    }

    fn reader_position(&self, reader: &Reader) -> u64 {
        match reader {
            Reader::Root { position, .. } => *position,
            Reader::Segment { extent, .. } | Reader::List { extent, .. } => extent.position,
            Reader::Movie(i) => self.movies[*i].extent.position,
            Reader::Track(slot) => self.tracks[*slot].consumer.position(),
            Reader::FlatIndex(reader) => reader.extent.position,
            Reader::LeafIndex(queue) => queue.front().copied().unwrap_or(0),
        }
    }

    /// Run one step.
    pub fn read<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<ReadResult> {
        if self.output.is_none() {
            return Err(AviError::NotInitialized);
        }
        let Some(top) = self.stack.last() else {
            self.finish_input();
            return Ok(ReadResult::EndOfInput);
        };

        let wanted = self.reader_position(top);
        let current = source.position();
        if wanted != current {
            let gap = wanted.wrapping_sub(current);
            let in_source = source.length().map_or(true, |len| wanted <= len);
            if wanted > current && gap <= self.config.min_reload_distance && in_source {
                source.skip(gap)?;
                return Ok(ReadResult::Continue);
            }
            tracing::debug!("Reposition from {} to {} for {:?}", current, wanted, top);
            return Ok(ReadResult::Reposition(wanted));
        }

        let Some(reader) = self.stack.pop() else {
            return Ok(ReadResult::Continue);
        };
        match reader {
            Reader::Root { position, segments } => self.read_root(source, position, segments)?,
            Reader::Segment {
                extent,
                riff_type,
                movi_offset,
            } => self.read_segment(source, extent, riff_type, movi_offset)?,
            Reader::List { extent, list } => self.read_list(source, extent, list)?,
            Reader::Movie(i) => self.read_movie(source, i)?,
            Reader::Track(slot) => self.read_track(source, slot)?,
            Reader::FlatIndex(reader) => self.read_flat_index(source, reader)?,
            Reader::LeafIndex(queue) => self.read_leaf_index(source, queue)?,
        }
        Ok(ReadResult::Continue)
    }

    /// Resume movie data from the seek map anchor at or before `position`
    /// (a chunk header position), or from the start when it is before the
    /// first anchor. Without a seek map every seek restarts from the start.
    pub fn seek(&mut self, position: u64, time_us: u64) {
        if self.phase == Phase::Structure || !self.seek_map_sent {
            tracing::debug!("Ignoring seek to {} before indexing is done", position);
            return;
        }
        let resume_at = self
            .seek_map
            .as_ref()
            .map_or(0, |map| map.anchor_position(position));
        tracing::debug!(
            "Seek to position {} ({} us) resumes at {}",
            position,
            time_us,
            resume_at
        );
        if self.walk_indexing {
            // Only unseekable files walk-index, so this is a restart
            for track in &mut self.tracks {
                track.chunk_index = ChunkIndex::new();
            }
        }
        self.resume_movies(resume_at);
    }

    fn resume_movies(&mut self, position: u64) {
        self.stack.clear();
        self.queue_movies(position);
        for track in &mut self.tracks {
            track.consumer.reset();
        }
        if position == 0 {
            for track in &mut self.tracks {
                track.consumer.clock_mut().set_index(0);
            }
        } else if let Some(map) = &self.seek_map {
            for (id, index) in map.indexes_at(position) {
                if let Some(track) = self.tracks.iter_mut().find(|t| t.id == id) {
                    track.consumer.clock_mut().set_index(index as u64);
                }
            }
        }
        self.phase = Phase::Movie;
    }

    fn queue_movies(&mut self, position: u64) {
        // First movie on top
        for i in (0..self.movies.len()).rev() {
            if self.movies[i].set_position(position) {
                self.stack.push(Reader::Movie(i));
            }
        }
    }

    fn output_mut_checked(&mut self) -> Result<&mut O> {
        self.output.as_mut().ok_or(AviError::NotInitialized)
    }

    fn send_seek_outcome(&mut self, outcome: SeekOutcome) -> Result<()> {
        if let SeekOutcome::Seekable(map) = &outcome {
            self.seek_map = Some(Arc::clone(map));
        }
        self.seek_map_sent = true;
        self.output_mut_checked()?.seek_map(outcome);
        Ok(())
    }

    fn finish_input(&mut self) {
        if self.phase == Phase::Done {
            return;
        }
        self.phase = Phase::Done;
        self.walk_indexing = false;
        if let Some(output) = self.output.as_mut() {
            for track in &mut self.tracks {
                track.consumer.finish(output);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Structure pass
    // ------------------------------------------------------------------------

    fn read_root<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        position: u64,
        segments: u32,
    ) -> Result<()> {
        let length = source.length();
        if segments > 0 && length.is_some_and(|len| position + LIST_HEADER_SIZE > len) {
            if let Some(len) = length.filter(|&len| position < len) {
                tracing::warn!("Ignoring {} trailing bytes", len - position);
            }
            return self.end_structure();
        }

        let mut header = [0u8; LIST_HEADER_SIZE as usize];
        match source.read_exact(&mut header) {
            Ok(()) => {}
            Err(AviError::UnexpectedEndOfInput(_)) if segments > 0 => {
                return self.end_structure();
            }
            Err(e) => return Err(e),
        }
        let mut buf = &header[..];
        let tag = buf.get_u32_le();
        let size = buf.get_u32_le();
        let riff_type = buf.get_u32_le();
        if tag != RIFF {
            if segments == 0 {
                return Err(AviError::NotRiff(fourcc_to_string(tag)));
            }
            tracing::warn!("Expected RIFF segment, found {}", fourcc_to_string(tag));
            return self.end_structure();
        }
        if riff_type & AVI_MASK != AVI_PREFIX {
            if segments == 0 {
                return Err(AviError::NotAvi(fourcc_to_string(riff_type)));
            }
            tracing::warn!("Expected AVIX segment, found {}", fourcc_to_string(riff_type));
            return self.end_structure();
        }

        let payload = position + LIST_HEADER_SIZE;
        let declared_end = position + CHUNK_HEADER_SIZE + size as u64;
        let end = match length {
            Some(len) if declared_end > len => {
                tracing::warn!(
                    "RIFF {} declares {} bytes, source has {}",
                    fourcc_to_string(riff_type),
                    size,
                    len - position
                );
                len
            }
            _ => declared_end,
        };
        tracing::debug!(
            "RIFF {} segment at {} size {}",
            fourcc_to_string(riff_type),
            position,
            size
        );
        self.stack.push(Reader::Root {
            position: align(declared_end).min(length.unwrap_or(u64::MAX)),
            segments: segments + 1,
        });
        self.stack.push(Reader::Segment {
            extent: Extent::new(payload, end),
            riff_type,
            movi_offset: 0,
        });
        Ok(())
    }

    fn read_segment<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut extent: Extent,
        riff_type: u32,
        mut movi_offset: u64,
    ) -> Result<()> {
        if !extent.has_header(CHUNK_HEADER_SIZE) {
            return Ok(());
        }
        let position = extent.position;
        let (tag, size) = read_chunk_header(source)?;
        let payload = position + CHUNK_HEADER_SIZE;

        if tag == LIST && size >= 4 && extent.has_header(LIST_HEADER_SIZE) {
            let list_type = read_u32(source)?;
            let list_start = position + LIST_HEADER_SIZE;
            let list_end = extent.child_end(payload, size);
            extent.skip_child(payload, size);
            match list_type {
                HDRL => {
                    self.stack.push(Reader::Segment {
                        extent,
                        riff_type,
                        movi_offset,
                    });
                    self.stack.push(Reader::List {
                        extent: Extent::new(list_start, list_end),
                        list: ListBox::new(HDRL),
                    });
                    return Ok(());
                }
                MOVI => {
                    movi_offset = position + CHUNK_HEADER_SIZE;
                    self.movies.push(MovieReader {
                        start: list_start,
                        extent: Extent::new(list_start, list_end),
                    });
                    let indexed_by_leaves =
                        !self.tracks.is_empty() && self.tracks.iter().all(|t| t.super_index.is_some());
                    if riff_type == AVIX || indexed_by_leaves {
                        // Nothing after movi in this segment is needed
                        return Ok(());
                    }
                }
                _ => {}
            }
        } else if tag == IDX1 && self.tracks_ended && !self.seek_map_sent {
            let index_end = extent.child_end(payload, size);
            extent.skip_child(payload, size);
            self.stack.push(Reader::Segment {
                extent,
                riff_type,
                movi_offset,
            });
            self.stack.push(Reader::FlatIndex(FlatIndexReader {
                extent: Extent::new(payload, index_end),
                movi_offset,
                base: None,
                records: 0,
            }));
            return Ok(());
        } else {
            extent.skip_child(payload, size);
        }

        self.stack.push(Reader::Segment {
            extent,
            riff_type,
            movi_offset,
        });
        Ok(())
    }

    fn read_list<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut extent: Extent,
        mut list: ListBox,
    ) -> Result<()> {
        if !extent.has_header(CHUNK_HEADER_SIZE) {
            return self.close_list(list);
        }
        let position = extent.position;
        let (tag, size) = read_chunk_header(source)?;
        let payload = position + CHUNK_HEADER_SIZE;

        if tag == LIST && size >= 4 && extent.has_header(LIST_HEADER_SIZE) {
            let list_type = read_u32(source)?;
            let child_end = extent.child_end(payload, size);
            extent.skip_child(payload, size);
            self.stack.push(Reader::List { extent, list });
            self.stack.push(Reader::List {
                extent: Extent::new(position + LIST_HEADER_SIZE, child_end),
                list: ListBox::new(list_type),
            });
            return Ok(());
        }

        if boxes::is_resident(tag) {
            if size > self.config.max_box_size {
                return Err(AviError::box_too_large(
                    tag,
                    size as u64,
                    self.config.max_box_size as u64,
                ));
            }
            let available = (extent.child_end(payload, size) - payload) as usize;
            let mut data = vec![0u8; available];
            source.read_exact(&mut data)?;
            match boxes::parse_resident(tag, Bytes::from(data)) {
                Ok(Some(node)) => list.push(node),
                Ok(None) => {}
                Err(e) if !e.is_fatal() => tracing::warn!("Dropping box: {}", e),
                Err(e) => return Err(e),
            }
        }
        extent.skip_child(payload, size);
        self.stack.push(Reader::List { extent, list });
        Ok(())
    }

    fn close_list(&mut self, list: ListBox) -> Result<()> {
        if let Some(Reader::List { list: parent, .. }) = self.stack.last_mut() {
            parent.push(boxes::BoxNode::List(list));
            return Ok(());
        }
        if list.list_type() == HDRL {
            self.build_tracks(&list)?;
        }
        Ok(())
    }

    fn build_tracks(&mut self, hdrl: &ListBox) -> Result<()> {
        if self.tracks_ended {
            tracing::warn!("Ignoring extra hdrl list");
            return Ok(());
        }
        let avih = hdrl.avi_header().ok_or(AviError::MissingAviHeader)?;
        let mut total_frames = avih.total_frames;
        for odml in hdrl.lists(ODML) {
            if let Some(extended) = odml.extended_header() {
                total_frames = extended.total_frames;
            }
        }
        self.duration_us = avih.duration_us(total_frames);
        self.declares_index = avih.has_index();

        for (ordinal, strl) in hdrl.lists(STRL).enumerate() {
            if let Some(track) = build_track(strl, ordinal as u32, self.probes) {
                tracing::info!(
                    "Track {}: {:?} {:?} {}",
                    track.id,
                    track.kind(),
                    track.format.codec,
                    track.format.fourcc
                );
                self.tracks.push(track);
            }
        }

        let output = self.output.as_mut().ok_or(AviError::NotInitialized)?;
        for track in &self.tracks {
            output.track_format(&track.format);
        }
        output.end_tracks();
        self.tracks_ended = true;
        Ok(())
    }

    /// Every RIFF segment has been walked.
    fn end_structure(&mut self) -> Result<()> {
        if !self.tracks_ended {
            return Err(AviError::MissingHeaderList);
        }
        self.resume_movies(0);
        if self.seek_map_sent {
            return Ok(());
        }

        let leaves = self.leaf_index_positions();
        if !leaves.is_empty() {
            self.stack.push(Reader::LeafIndex(leaves));
            return Ok(());
        }
        if self.declares_index {
            tracing::warn!("Header declares an index but none was found, file is unseekable");
        } else {
            tracing::warn!("No index found, file is unseekable");
        }
        self.walk_indexing = true;
        let duration_us = self.duration_us;
        self.send_seek_outcome(SeekOutcome::Unseekable { duration_us })
    }

    fn leaf_index_positions(&self) -> VecDeque<u64> {
        let with_index = self.tracks.iter().filter(|t| t.super_index.is_some()).count();
        if with_index == 0 {
            return VecDeque::new();
        }
        if with_index != self.tracks.len() {
            tracing::warn!(
                "Only {} of {} tracks have an indx box, ignoring OpenDML indexes",
                with_index,
                self.tracks.len()
            );
            return VecDeque::new();
        }
        let mut positions: Vec<u64> = self
            .tracks
            .iter()
            .filter_map(|t| t.super_index.as_ref())
            .flat_map(|index| index.positions())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions.into()
    }

    // ------------------------------------------------------------------------
    // Index pass
    // ------------------------------------------------------------------------

    fn read_flat_index<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut reader: FlatIndexReader,
    ) -> Result<()> {
        let record_size = FLAT_INDEX_RECORD_SIZE as u64;
        if reader.records == 0 && !reader.extent.has_header(record_size) {
            tracing::warn!("Index too short, file is unseekable");
            self.walk_indexing = true;
            let duration_us = self.duration_us;
            return self.send_seek_outcome(SeekOutcome::Unseekable { duration_us });
        }

        let left = ((reader.extent.end - reader.extent.position) / record_size) as usize;
        let batch = left.min(self.config.flat_index_batch_records);
        let mut data = vec![0u8; batch * FLAT_INDEX_RECORD_SIZE];
        source.read_exact(&mut data)?;
        for record in boxes::flat_index_records(&data) {
            let base = *reader.base.get_or_insert_with(|| {
                if (record.offset as u64) < reader.movi_offset {
                    reader.movi_offset
                } else {
                    0
                }
            });
            if let Some(slot) = self.track_slot(record.chunk_id) {
                self.tracks[slot].chunk_index.add(
                    base + record.offset as u64,
                    record.size,
                    record.is_key_frame(),
                )?;
            }
        }
        reader.records += batch;
        reader.extent.position += (batch * FLAT_INDEX_RECORD_SIZE) as u64;

        if reader.extent.has_header(record_size) {
            self.stack.push(Reader::FlatIndex(reader));
            return Ok(());
        }
        tracing::debug!("idx1: {} records, base {:?}", reader.records, reader.base);
        self.finish_index()
    }

    fn read_leaf_index<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut queue: VecDeque<u64>,
    ) -> Result<()> {
        let Some(position) = queue.pop_front() else {
            return self.finish_index();
        };
        if let Some(leaf) = self.load_leaf_index(source, position)? {
            match self.track_slot(leaf.chunk_id) {
                Some(slot) => {
                    let index = &mut self.tracks[slot].chunk_index;
                    for (chunk_position, chunk_size, key) in leaf.entries {
                        index.add(chunk_position, chunk_size, key)?;
                    }
                }
                None => tracing::warn!(
                    "No track for leaf index {}",
                    fourcc_to_string(leaf.chunk_id)
                ),
            }
        }

        if queue.is_empty() {
            return self.finish_index();
        }
        self.stack.push(Reader::LeafIndex(queue));
        Ok(())
    }

    /// Unreadable leaves are skipped so one bad chunk does not cost the seek map.
    fn load_leaf_index<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        position: u64,
    ) -> Result<Option<LeafIndex>> {
        let (tag, size) = match read_chunk_header(source) {
            Ok(header) => header,
            Err(AviError::UnexpectedEndOfInput(_)) => {
                tracing::warn!("Leaf index at {} is past the end of input", position);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if size > self.config.max_index_chunk_size {
            tracing::warn!(
                "Skipping {} index chunk at {}: {} bytes",
                fourcc_to_string(tag),
                position,
                size
            );
            return Ok(None);
        }
        let mut data = vec![0u8; size as usize];
        match source.read_exact(&mut data) {
            Ok(()) => {}
            Err(AviError::UnexpectedEndOfInput(at)) => {
                tracing::warn!("Leaf index at {} truncated at {}", position, at);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        match LeafIndex::parse(Bytes::from(data)) {
            Ok(leaf) => Ok(Some(leaf)),
            Err(e) => {
                tracing::warn!("Skipping leaf index at {}: {}", position, e);
                Ok(None)
            }
        }
    }

    fn finish_index(&mut self) -> Result<()> {
        let outcome = build_seek_map(&mut self.tracks, self.duration_us, &self.config)?;
        self.send_seek_outcome(outcome)
    }

    // ------------------------------------------------------------------------
    // Movie pass
    // ------------------------------------------------------------------------

    fn read_movie<S: ByteSource + ?Sized>(&mut self, source: &mut S, i: usize) -> Result<()> {
        let mut movie = self.movies[i];
        let extent = &mut movie.extent;
        if !extent.has_header(CHUNK_HEADER_SIZE) {
            return Ok(());
        }
        let position = extent.position;
        let (tag, size) = match read_chunk_header(source) {
            Ok(header) => header,
            Err(AviError::UnexpectedEndOfInput(at)) => {
                tracing::warn!("Movie data truncated at {}", at);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let payload = position + CHUNK_HEADER_SIZE;

        if tag == LIST {
            let list_type = match read_u32(source) {
                Ok(list_type) => list_type,
                Err(AviError::UnexpectedEndOfInput(at)) => {
                    tracing::warn!("Movie data truncated at {}", at);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if list_type == REC_ {
                // Step inside; its chunks belong to this movie reader
                extent.position = position + LIST_HEADER_SIZE;
            } else {
                extent.skip_child(payload, size);
            }
        } else if let Some(slot) = self.track_slot(tag) {
            let payload_end = payload + size as u64;
            if payload_end > extent.end || source.length().is_some_and(|len| payload_end > len) {
                tracing::warn!(
                    "Chunk {} at {} runs past the end of the movie data",
                    fourcc_to_string(tag),
                    position
                );
                return Ok(());
            }
            let track = &mut self.tracks[slot];
            if self.walk_indexing {
                track.chunk_index.add(position, size, true)?;
            }
            track.consumer.set_pending(payload, size);
            extent.skip_child(payload, size);
            self.movies[i] = movie;
            self.stack.push(Reader::Movie(i));
            self.stack.push(Reader::Track(slot));
            return Ok(());
        } else {
            extent.skip_child(payload, size);
        }

        self.movies[i] = movie;
        self.stack.push(Reader::Movie(i));
        Ok(())
    }

    fn read_track<S: ByteSource + ?Sized>(&mut self, source: &mut S, slot: usize) -> Result<()> {
        let output = self.output.as_mut().ok_or(AviError::NotInitialized)?;
        let done = self.tracks[slot]
            .consumer
            .resume(source, output, &mut self.scratch)?;
        if !done {
            self.stack.push(Reader::Track(slot));
        }
        Ok(())
    }
}

fn read_chunk_header<S: ByteSource + ?Sized>(source: &mut S) -> Result<(u32, u32)> {
    let mut header = [0u8; CHUNK_HEADER_SIZE as usize];
    source.read_exact(&mut header)?;
    let mut buf = &header[..];
    Ok((buf.get_u32_le(), buf.get_u32_le()))
}

fn read_u32<S: ByteSource + ?Sized>(source: &mut S) -> Result<u32> {
    let mut bytes = [0u8; 4];
    source.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

// Synthetic AVI files for walker tests.

use bytes::BufMut;

pub(crate) fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub(crate) fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    out.put_slice(tag);
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    if payload.len() % 2 == 1 {
        out.put_u8(0);
    }
    out
}

fn wrap(outer: &[u8; 4], kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let body = children.concat();
    let mut out = Vec::with_capacity(body.len() + 12);
    out.put_slice(outer);
    out.put_u32_le(body.len() as u32 + 4);
    out.put_slice(kind);
    out.put_slice(&body);
    out
}

pub(crate) fn list(list_type: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    wrap(b"LIST", list_type, children)
}

pub(crate) fn riff(riff_type: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    wrap(b"RIFF", riff_type, children)
}

pub(crate) fn avih(us_per_frame: u32, flags: u32, total_frames: u32, streams: u32) -> Vec<u8> {
    let mut b = Vec::with_capacity(56);
    b.put_u32_le(us_per_frame);
    b.put_u32_le(0); // max bytes per second
    b.put_u32_le(0); // padding granularity
    b.put_u32_le(flags);
    b.put_u32_le(total_frames);
    b.put_u32_le(0); // initial frames
    b.put_u32_le(streams);
    b.put_u32_le(0); // suggested buffer size
    b.put_u32_le(320);
    b.put_u32_le(240);
    b.put_bytes(0, 16);
    chunk(b"avih", &b)
}

pub(crate) fn strh(kind: &[u8; 4], handler: &[u8; 4], scale: u32, rate: u32, length: u32) -> Vec<u8> {
    let mut b = Vec::with_capacity(56);
    b.put_slice(kind);
    b.put_slice(handler);
    b.put_u32_le(0); // flags
    b.put_u16_le(0); // priority
    b.put_u16_le(0); // language
    b.put_u32_le(0); // initial frames
    b.put_u32_le(scale);
    b.put_u32_le(rate);
    b.put_u32_le(0); // start
    b.put_u32_le(length);
    b.put_u32_le(4096); // suggested buffer size
    b.put_u32_le(0); // quality
    b.put_u32_le(0); // sample size
    b.put_bytes(0, 8); // frame rectangle
    chunk(b"strh", &b)
}

pub(crate) fn video_strf(compression: &[u8; 4]) -> Vec<u8> {
    let mut b = Vec::with_capacity(40);
    b.put_u32_le(40);
    b.put_i32_le(320);
    b.put_i32_le(-240);
    b.put_u16_le(1);
    b.put_u16_le(24);
    b.put_slice(compression);
    b.put_bytes(0, 20);
    chunk(b"strf", &b)
}

pub(crate) fn audio_strf(format_tag: u16) -> Vec<u8> {
    let mut b = Vec::with_capacity(18);
    b.put_u16_le(format_tag);
    b.put_u16_le(2);
    b.put_u32_le(48_000);
    b.put_u32_le(24_000);
    b.put_u16_le(4);
    b.put_u16_le(16);
    b.put_u16_le(0);
    chunk(b"strf", &b)
}

/// `indx` pointing at one leaf per `(position, size)`.
pub(crate) fn super_index(chunk_id: &[u8; 4], leaves: &[(u64, u32)]) -> Vec<u8> {
    let mut b = Vec::with_capacity(24 + leaves.len() * 16);
    b.put_u16_le(4);
    b.put_u8(0);
    b.put_u8(0); // index of indexes
    b.put_u32_le(leaves.len() as u32);
    b.put_slice(chunk_id);
    b.put_bytes(0, 12);
    for &(position, size) in leaves {
        b.put_u64_le(position);
        b.put_u32_le(size);
        b.put_u32_le(0);
    }
    chunk(b"indx", &b)
}

/// Chunk layout inside a `movi` list. `offset` is the chunk header position
/// counted from the first byte after the `movi` fourcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MovieChunk {
    pub tag: u32,
    pub offset: u32,
    pub size: u32,
    pub key: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Movie {
    body: Vec<u8>,
    pub chunks: Vec<MovieChunk>,
}

impl Movie {
    pub fn chunk(&mut self, tag: &[u8; 4], payload: &[u8], key: bool) -> &mut Self {
        self.chunks.push(MovieChunk {
            tag: fourcc(tag),
            offset: self.body.len() as u32,
            size: payload.len() as u32,
            key,
        });
        self.body.extend(chunk(tag, payload));
        self
    }

    pub fn junk(&mut self, size: usize) -> &mut Self {
        self.body.extend(chunk(b"JUNK", &vec![0u8; size]));
        self
    }

    /// `LIST rec ` around the given chunks.
    pub fn rec(&mut self, chunks: &[(&[u8; 4], Vec<u8>, bool)]) -> &mut Self {
        let mut inner = Vec::new();
        for (tag, payload, key) in chunks {
            self.chunks.push(MovieChunk {
                tag: fourcc(tag),
                offset: (self.body.len() + 12 + inner.len()) as u32,
                size: payload.len() as u32,
                key: *key,
            });
            inner.extend(chunk(tag, payload));
        }
        self.body.extend(list(b"rec ", &[inner]));
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn body_len(&self) -> u32 {
        self.body.len() as u32
    }

    pub fn list(&self) -> Vec<u8> {
        list(b"movi", &[self.body.clone()])
    }

    /// `idx1` whose record offsets are `base + chunk offset`.
    pub fn idx1(&self, base: u32) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.chunks.len() * 16);
        for c in &self.chunks {
            b.put_u32_le(c.tag);
            b.put_u32_le(if c.key { 0x10 } else { 0 });
            b.put_u32_le(base + c.offset);
            b.put_u32_le(c.size);
        }
        chunk(b"idx1", &b)
    }

    /// Standard `ix##` index of the chunks tagged `tag`, resolved against a
    /// `movi` list whose header sits at `movi_position`.
    pub fn leaf_index(&self, tag: &[u8; 4], movi_position: u64) -> Vec<u8> {
        let base = movi_position + 12;
        let entries: Vec<&MovieChunk> = self.chunks.iter().filter(|c| c.tag == fourcc(tag)).collect();
        let mut b = Vec::with_capacity(24 + entries.len() * 8);
        b.put_u16_le(2);
        b.put_u8(0);
        b.put_u8(1); // index of chunks
        b.put_u32_le(entries.len() as u32);
        b.put_slice(tag);
        b.put_u64_le(base);
        b.put_u32_le(0);
        for c in entries {
            // Offsets point at the payload
            b.put_u32_le(c.offset + 8);
            b.put_u32_le(if c.key { c.size } else { c.size | 0x8000_0000 });
        }
        chunk(&ix_tag(tag), &b)
    }
}

fn ix_tag(tag: &[u8; 4]) -> [u8; 4] {
    [b'i', b'x', tag[0], tag[1]]
}

pub(crate) fn video_payload(frame: usize) -> Vec<u8> {
    vec![frame as u8; 100 + frame % 7]
}

pub(crate) fn audio_payload(block: usize) -> Vec<u8> {
    vec![0x80 | block as u8; 64]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlatIndex {
    Relative,
    Absolute,
    Truncated,
    Missing,
}

/// A single-segment AVI ready for a source.
pub(crate) struct TestFile {
    pub bytes: Vec<u8>,
    /// Position of the `LIST movi` header
    pub movi_position: u64,
    pub chunks: Vec<MovieChunk>,
}

impl TestFile {
    /// Chunk header position of the `n`th chunk tagged `tag`.
    pub fn position_of(&self, tag: &[u8; 4], n: usize) -> u64 {
        let c = self
            .chunks
            .iter()
            .filter(|c| c.tag == fourcc(tag))
            .nth(n)
            .expect("chunk");
        self.movi_position + 12 + c.offset as u64
    }
}

pub(crate) const FRAMES: usize = 50;
pub(crate) const AUDIO_BLOCKS: usize = 10;
pub(crate) const US_PER_FRAME: u32 = 40_000;

/// Two seconds of 25 fps video (key every 10 frames) and 5 audio blocks a
/// second. `audio_length` is the declared audio length in blocks.
pub(crate) fn header_list(video_codec: &[u8; 4], audio_length: u32) -> Vec<u8> {
    list(
        b"hdrl",
        &[
            avih(US_PER_FRAME, 0x10, FRAMES as u32, 2),
            list(
                b"strl",
                &[strh(b"vids", video_codec, 1, 25, FRAMES as u32), video_strf(video_codec)],
            ),
            list(
                b"strl",
                &[
                    strh(b"auds", b"\0\0\0\0", 1, 5, audio_length),
                    audio_strf(0x0001),
                    chunk(b"strn", b"English\0"),
                ],
            ),
        ],
    )
}

/// [`header_list`] with an `indx` on both streams, each naming one leaf.
pub(crate) fn indexed_header_list(leaf: (u64, u32)) -> Vec<u8> {
    list(
        b"hdrl",
        &[
            avih(US_PER_FRAME, 0x10, FRAMES as u32, 2),
            list(
                b"strl",
                &[
                    strh(b"vids", b"MJPG", 1, 25, FRAMES as u32),
                    video_strf(b"MJPG"),
                    super_index(b"00dc", &[leaf]),
                ],
            ),
            list(
                b"strl",
                &[
                    strh(b"auds", b"\0\0\0\0", 1, 5, AUDIO_BLOCKS as u32),
                    audio_strf(0x0001),
                    super_index(b"01wb", &[leaf]),
                ],
            ),
        ],
    )
}

pub(crate) fn interleaved_movie(use_rec: bool) -> Movie {
    let mut movie = Movie::default();
    for frame in 0..FRAMES {
        let key = frame % 10 == 0;
        if use_rec && frame % 5 == 0 {
            movie.rec(&[
                (b"00dc", video_payload(frame), key),
                (b"01wb", audio_payload(frame / 5), true),
            ]);
            continue;
        }
        movie.chunk(b"00dc", &video_payload(frame), key);
        if frame % 5 == 0 {
            movie.chunk(b"01wb", &audio_payload(frame / 5), true);
        }
        if frame % 16 == 3 {
            movie.junk(5);
        }
    }
    movie
}

pub(crate) fn interleaved_file(index: FlatIndex, use_rec: bool) -> TestFile {
    build_file(header_list(b"MJPG", AUDIO_BLOCKS as u32), interleaved_movie(use_rec), index)
}

pub(crate) fn build_file(hdrl: Vec<u8>, movie: Movie, index: FlatIndex) -> TestFile {
    let pad = chunk(b"JUNK", &[0u8; 30]);
    let movi_position = (12 + hdrl.len() + pad.len()) as u64;
    let mut children = vec![hdrl, pad, movie.list()];
    match index {
        FlatIndex::Relative => children.push(movie.idx1(4)),
        FlatIndex::Absolute => children.push(movie.idx1(movi_position as u32 + 12)),
        FlatIndex::Truncated => children.push(chunk(b"idx1", &[0u8; 8])),
        FlatIndex::Missing => {}
    }
    TestFile {
        bytes: riff(b"AVI ", &children),
        movi_position,
        chunks: movie.chunks,
    }
}

/// Two RIFF segments (`AVI ` then `AVIX`) indexed only by OpenDML leaves.
/// Frames 30 and up live in the `AVIX` segment.
pub(crate) struct OpenDmlFile {
    pub bytes: Vec<u8>,
    pub video_positions: Vec<u64>,
}

pub(crate) fn open_dml_file() -> OpenDmlFile {
    const TAGS: [&[u8; 4]; 2] = [b"00dc", b"01wb"];
    fn hdrl(leaves: &[[(u64, u32); 2]; 2]) -> Vec<u8> {
        list(
            b"hdrl",
            &[
                avih(US_PER_FRAME, 0x10, 30, 2),
                list(
                    b"strl",
                    &[
                        strh(b"vids", b"MJPG", 1, 25, FRAMES as u32),
                        video_strf(b"MJPG"),
                        super_index(TAGS[0], &leaves[0]),
                    ],
                ),
                list(
                    b"strl",
                    &[
                        strh(b"auds", b"\0\0\0\0", 1, 5, AUDIO_BLOCKS as u32),
                        audio_strf(0x0001),
                        super_index(TAGS[1], &leaves[1]),
                    ],
                ),
                list(b"odml", &[chunk(b"dmlh", &(FRAMES as u32).to_le_bytes())]),
            ],
        )
    }

    let mut movies = [Movie::default(), Movie::default()];
    for frame in 0..FRAMES {
        let movie = &mut movies[usize::from(frame >= 30)];
        movie.chunk(b"00dc", &video_payload(frame), frame % 10 == 0);
        if frame % 5 == 0 {
            movie.chunk(b"01wb", &audio_payload(frame / 5), true);
        }
    }
    // Same size as the final header list
    let header_len = hdrl(&[[(0, 0); 2]; 2]).len() as u64;
    let first_movi = 12 + header_len;

    let mut leaves = [[(0u64, 0u32); 2]; 2];
    let mut movi_positions = [first_movi, 0];
    for segment in 0..2 {
        if segment == 1 {
            // RIFF AVI header + hdrl + LIST movi + idx1, then the AVIX header
            let first_len = 12 + header_len + movies[0].list().len() as u64;
            let idx1_len = movies[0].idx1(4).len() as u64;
            movi_positions[1] = first_len + idx1_len + 12;
        }
        let position = movi_positions[segment];
        for (track, tag) in TAGS.iter().enumerate() {
            let leaf = movies[segment].leaf_index(tag, position);
            leaves[track][segment] = (position + 12 + movies[segment].body_len() as u64, leaf.len() as u32);
            movies[segment].raw(&leaf);
        }
    }

    let mut video_positions = Vec::with_capacity(FRAMES);
    for (segment, movie) in movies.iter().enumerate() {
        for c in movie.chunks.iter().filter(|c| c.tag == fourcc(b"00dc")) {
            video_positions.push(movi_positions[segment] + 12 + c.offset as u64);
        }
    }

    // idx1 in the first segment duplicates the leaves and must not be read
    let mut bytes = riff(b"AVI ", &[hdrl(&leaves), movies[0].list(), movies[0].idx1(4)]);
    bytes.extend(riff(b"AVIX", &[movies[1].list()]));
    OpenDmlFile {
        bytes,
        video_positions,
    }
}

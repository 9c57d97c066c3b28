//! The packet index: random access into the movie-data region.

use crate::chunk::{Chunk, ChunkError, ChunkReader};
use crate::demux::MovieRegion;
use crate::fourcc::{FourCc, LIST, REC_};

/// Keyframe bit in an index entry's flags word.
pub const INDEX_FLAG_KEYFRAME: u32 = 0x0000_0010;
/// List bit: the entry describes a grouping record, not a data chunk.
pub const INDEX_FLAG_LIST: u32 = 0x0000_0001;

/// One packet descriptor. `offset` always addresses a chunk header (never
/// payload interior) and is absolute after load-time normalization.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub tag: FourCc,
    pub stream: Option<u16>,
    pub offset: u64,
    pub size: u32,
    pub keyframe: bool,
    /// Grouping boundary (`rec ` list), where audio resync starts.
    pub group: bool,
}

impl IndexEntry {
    /// Absolute offset just past the chunk this entry describes. For group
    /// entries the size spans every child chunk.
    pub fn end(&self) -> u64 {
        self.offset + 8 + u64::from(self.size) + u64::from(self.size & 1)
    }

    /// Does this group entry contain the chunk at `offset`?
    pub fn contains(&self, offset: u64) -> bool {
        self.group && offset > self.offset && offset < self.end()
    }
}

/// Ordered packet descriptors, ascending by file position. Input order is
/// preserved: keyframe search depends on file order, not timestamp order.
pub struct IndexTable {
    entries: Vec<IndexEntry>,
    /// True when read wholesale from an index chunk; false for an in-memory
    /// index grown opportunistically during forward playback.
    complete: bool,
}

impl IndexTable {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            complete: false,
        }
    }

    /// One linear scan over the index chunk. Offsets are normalized to
    /// absolute file positions here, never per-seek: some writers store them
    /// relative to the movie-data region, detected by comparing the first
    /// entry against the known movie-data start.
    pub fn parse<R: std::io::Read + std::io::Seek>(
        reader: &mut ChunkReader<R>,
        chunk: &Chunk,
        movie: &MovieRegion,
    ) -> Result<Self, ChunkError> {
        let count = chunk.size / 16;
        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let tag = reader.read_tag()?;
            let flags = reader.read_u32()?;
            let offset = u64::from(reader.read_u32()?);
            let size = reader.read_u32()?;

            let group = tag == LIST || tag == REC_ || flags & INDEX_FLAG_LIST != 0;
            entries.push(IndexEntry {
                tag,
                stream: tag.stream_index(),
                offset,
                size,
                keyframe: flags & INDEX_FLAG_KEYFRAME != 0,
                group,
            });
        }
        reader.seek_to(chunk.end().min(reader.len()))?;

        if let Some(first) = entries.first() {
            if first.offset < movie.start {
                let base = movie.base;
                tracing::debug!(base, "index offsets are movi-relative, normalizing");
                for entry in &mut entries {
                    entry.offset += base;
                }
            }
        }

        Ok(Self {
            entries,
            complete: true,
        })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Grow the in-memory index while decoding forward through an index-less
    /// file. Replays (after a rewind) must not duplicate entries, so only
    /// strictly ascending offsets are accepted.
    pub fn record(&mut self, entry: IndexEntry) {
        if self.complete {
            return;
        }
        if let Some(last) = self.entries.last() {
            if entry.offset <= last.offset {
                return;
            }
        }
        self.entries.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn idx1_bytes(entries: &[(FourCc, u32, u32, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"idx1");
        out.extend_from_slice(&((entries.len() * 16) as u32).to_le_bytes());
        for &(tag, flags, offset, size) in entries {
            out.extend_from_slice(&tag.0);
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out
    }

    fn parse(data: Vec<u8>, movie: MovieRegion) -> IndexTable {
        let mut reader = ChunkReader::new(Cursor::new(data)).unwrap();
        let chunk = reader.next_chunk().unwrap();
        IndexTable::parse(&mut reader, &chunk, &movie).unwrap()
    }

    fn movie_at(base: u64) -> MovieRegion {
        MovieRegion {
            base,
            start: base + 4,
            end: base + 4096,
        }
    }

    #[test]
    fn test_absolute_offsets_kept() {
        let movie = movie_at(0x100);
        let table = parse(
            idx1_bytes(&[(FourCc(*b"00dc"), INDEX_FLAG_KEYFRAME, 0x104, 8)]),
            movie,
        );
        assert_eq!(table.entries()[0].offset, 0x104);
        assert!(table.entries()[0].keyframe);
        assert!(table.is_complete());
    }

    #[test]
    fn test_relative_offsets_normalized_once() {
        let movie = movie_at(0x100);
        // First chunk sits right after the movi form type: relative offset 4.
        let table = parse(
            idx1_bytes(&[
                (FourCc(*b"00dc"), INDEX_FLAG_KEYFRAME, 4, 8),
                (FourCc(*b"01wb"), 0, 20, 8),
            ]),
            movie,
        );
        assert_eq!(table.entries()[0].offset, 0x104);
        assert_eq!(table.entries()[1].offset, 0x114);
    }

    #[test]
    fn test_group_entries_flagged() {
        let movie = movie_at(0x100);
        let table = parse(
            idx1_bytes(&[
                (REC_, INDEX_FLAG_LIST, 0x104, 36),
                (FourCc(*b"00dc"), INDEX_FLAG_KEYFRAME, 0x110, 8),
            ]),
            movie,
        );
        assert!(table.entries()[0].group);
        assert_eq!(table.entries()[0].stream, None);
        assert!(table.entries()[0].contains(0x110));
        assert!(!table.entries()[1].group);
        assert_eq!(table.entries()[1].stream, Some(0));
    }

    #[test]
    fn test_zero_entries_tolerated() {
        let table = parse(idx1_bytes(&[]), movie_at(0x100));
        assert!(table.is_empty());
        assert!(table.is_complete());
    }

    #[test]
    fn test_opportunistic_record_dedupes_on_replay() {
        let mut table = IndexTable::empty();
        let entry = |offset| IndexEntry {
            tag: FourCc(*b"00dc"),
            stream: Some(0),
            offset,
            size: 8,
            keyframe: false,
            group: false,
        };
        table.record(entry(0x104));
        table.record(entry(0x114));
        table.record(entry(0x104)); // replayed after rewind
        assert_eq!(table.len(), 2);
        assert!(!table.is_complete());
    }
}

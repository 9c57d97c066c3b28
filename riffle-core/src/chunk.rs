//! Sequential cursor over the chunked byte stream.
//!
//! Every record is framed as a 4-byte tag plus a u32 little-endian size,
//! followed by exactly `size` payload bytes and one pad byte when the size
//! is odd. List records (`RIFF`, `LIST`) carry a form-type tag as the first
//! four bytes of their payload. The reader must land back on a word
//! boundary after every chunk or all subsequent tags are misread.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use thiserror::Error;

use crate::fourcc::{FourCc, LIST, RIFF};

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("stream truncated inside a chunk")]
    Truncated,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One tag + size framed record. `offset` addresses the chunk header (the
/// first tag byte), never the payload interior.
#[derive(Debug, Clone, Copy)]
pub struct Chunk {
    pub tag: FourCc,
    pub size: u32,
    pub offset: u64,
}

impl Chunk {
    pub fn is_list(&self) -> bool {
        self.tag == LIST || self.tag == RIFF
    }

    /// Payload size padded up to the next word boundary.
    pub fn padded_size(&self) -> u64 {
        u64::from(self.size) + u64::from(self.size & 1)
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_start(&self) -> u64 {
        self.offset + 8
    }

    /// Absolute offset just past the chunk, pad byte included.
    pub fn end(&self) -> u64 {
        self.payload_start() + self.padded_size()
    }
}

pub struct ChunkReader<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> ChunkReader<R> {
    pub fn new(mut inner: R) -> Result<Self, ChunkError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len })
    }

    /// Total stream length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&mut self) -> Result<u64, ChunkError> {
        Ok(self.inner.stream_position()?)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<(), ChunkError> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read the next chunk header at the cursor. Fails with `Truncated` when
    /// fewer than eight bytes remain.
    pub fn next_chunk(&mut self) -> Result<Chunk, ChunkError> {
        let offset = self.position()?;
        if self.len.saturating_sub(offset) < 8 {
            return Err(ChunkError::Truncated);
        }
        let tag = self.read_tag()?;
        let size = self.read_u32()?;
        Ok(Chunk { tag, size, offset })
    }

    /// Read the form-type tag of a list chunk whose header was just consumed.
    pub fn enter_list(&mut self) -> Result<FourCc, ChunkError> {
        self.read_tag()
    }

    /// Consume a chunk's payload, pad byte included, and return it.
    pub fn read_payload(&mut self, chunk: &Chunk) -> Result<Vec<u8>, ChunkError> {
        if chunk.payload_start() + u64::from(chunk.size) > self.len {
            return Err(ChunkError::Truncated);
        }
        let mut buf = vec![0u8; chunk.size as usize];
        self.read_exact(&mut buf)?;
        self.align()?;
        Ok(buf)
    }

    /// Skip past a chunk without reading its payload.
    pub fn skip_chunk(&mut self, chunk: &Chunk) -> Result<(), ChunkError> {
        self.seek_to(chunk.end().min(self.len))
    }

    pub fn read_tag(&mut self) -> Result<FourCc, ChunkError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(FourCc(buf))
    }

    pub fn read_u16(&mut self) -> Result<u16, ChunkError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, ChunkError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ChunkError> {
        self.inner.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => ChunkError::Truncated,
            _ => ChunkError::Io(e),
        })
    }

    /// Re-synchronize to a word boundary after a payload read. A pad byte
    /// past end-of-file is tolerated (common in truncated captures).
    fn align(&mut self) -> Result<(), ChunkError> {
        let pos = self.position()?;
        if pos & 1 == 1 {
            self.seek_to((pos + 1).min(self.len))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk_bytes(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_even_and_odd_chunks_stay_aligned() {
        let mut data = chunk_bytes(b"aaaa", &[1, 2, 3]); // odd: pad byte follows
        data.extend(chunk_bytes(b"bbbb", &[4, 5, 6, 7]));

        let mut reader = ChunkReader::new(Cursor::new(data)).unwrap();

        let first = reader.next_chunk().unwrap();
        assert_eq!(first.tag, FourCc(*b"aaaa"));
        assert_eq!(first.size, 3);
        assert_eq!(reader.read_payload(&first).unwrap(), vec![1, 2, 3]);

        // The pad byte must have been consumed: the next tag parses cleanly.
        let second = reader.next_chunk().unwrap();
        assert_eq!(second.tag, FourCc(*b"bbbb"));
        assert_eq!(reader.read_payload(&second).unwrap(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = ChunkReader::new(Cursor::new(vec![0u8; 5])).unwrap();
        assert!(matches!(reader.next_chunk(), Err(ChunkError::Truncated)));
    }

    #[test]
    fn test_truncated_payload() {
        let mut data = chunk_bytes(b"aaaa", &[0u8; 16]);
        data.truncate(12); // header + 4 payload bytes of 16
        let mut reader = ChunkReader::new(Cursor::new(data)).unwrap();
        let chunk = reader.next_chunk().unwrap();
        assert!(matches!(
            reader.read_payload(&chunk),
            Err(ChunkError::Truncated)
        ));
    }

    #[test]
    fn test_skip_chunk_clamps_to_eof() {
        // Final odd-sized chunk without its pad byte on disk.
        let mut data = chunk_bytes(b"aaaa", &[9]);
        data.pop();
        let len = data.len() as u64;
        let mut reader = ChunkReader::new(Cursor::new(data)).unwrap();
        let chunk = reader.next_chunk().unwrap();
        reader.skip_chunk(&chunk).unwrap();
        assert_eq!(reader.position().unwrap(), len);
    }
}

//! FourCC tags and the chunk naming scheme of the container.
//!
//! Tags are four bytes read in file order. Movie-data chunks encode their
//! target stream in the first two bytes as ASCII decimal digits ("00dc" is
//! video data for stream 0, "01wb" audio data for stream 1); the last two
//! bytes say what the payload is.

use std::fmt;

use serde::{Serialize, Serializer};

/// A four-byte chunk tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

// ============================================================================
// Known Tags
// ============================================================================

pub const RIFF: FourCc = FourCc(*b"RIFF");
pub const LIST: FourCc = FourCc(*b"LIST");

pub const AVI_: FourCc = FourCc(*b"AVI ");
pub const HDRL: FourCc = FourCc(*b"hdrl");
pub const AVIH: FourCc = FourCc(*b"avih");
pub const STRL: FourCc = FourCc(*b"strl");
pub const STRH: FourCc = FourCc(*b"strh");
pub const STRF: FourCc = FourCc(*b"strf");
pub const STRN: FourCc = FourCc(*b"strn");
pub const MOVI: FourCc = FourCc(*b"movi");
pub const REC_: FourCc = FourCc(*b"rec ");
pub const IDX1: FourCc = FourCc(*b"idx1");

// Stream types (strh.fcc_type)
pub const VIDS: FourCc = FourCc(*b"vids");
pub const AUDS: FourCc = FourCc(*b"auds");

/// BITMAPINFOHEADER compression value for uncompressed frames (BI_RGB = 0).
pub const BI_RGB: FourCc = FourCc([0, 0, 0, 0]);

/// What a movie-data chunk carries, derived from its tag suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkContent {
    /// `##dc` / `##db`, one video frame (compressed or not).
    VideoFrame,
    /// `##pc`, cumulative palette change.
    PaletteChange,
    /// `##wb`, audio data.
    AudioData,
    /// Anything else.
    Unknown,
}

impl FourCc {
    /// Stream index encoded in the two leading ASCII digits of a data tag.
    pub fn stream_index(self) -> Option<u16> {
        let [a, b, ..] = self.0;
        if a.is_ascii_digit() && b.is_ascii_digit() {
            Some(u16::from(a - b'0') * 10 + u16::from(b - b'0'))
        } else {
            None
        }
    }

    /// Classify a movie-data chunk by its tag suffix.
    pub fn content(self) -> ChunkContent {
        if self.stream_index().is_none() {
            return ChunkContent::Unknown;
        }
        match &self.0[2..4] {
            b"dc" | b"db" => ChunkContent::VideoFrame,
            b"pc" => ChunkContent::PaletteChange,
            b"wb" => ChunkContent::AudioData,
            _ => ChunkContent::Unknown,
        }
    }

    /// Data tag for a given stream index and suffix, e.g. `(0, b"dc")` -> `00dc`.
    pub fn for_stream(stream: u16, suffix: &[u8; 2]) -> Self {
        FourCc([
            b'0' + (stream / 10 % 10) as u8,
            b'0' + (stream % 10) as u8,
            suffix[0],
            suffix[1],
        ])
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl Serialize for FourCc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_index_parsing() {
        assert_eq!(FourCc(*b"00dc").stream_index(), Some(0));
        assert_eq!(FourCc(*b"01wb").stream_index(), Some(1));
        assert_eq!(FourCc(*b"12pc").stream_index(), Some(12));
        assert_eq!(FourCc(*b"strh").stream_index(), None);
        assert_eq!(LIST.stream_index(), None);
    }

    #[test]
    fn test_content_classification() {
        assert_eq!(FourCc(*b"00dc").content(), ChunkContent::VideoFrame);
        assert_eq!(FourCc(*b"00db").content(), ChunkContent::VideoFrame);
        assert_eq!(FourCc(*b"00pc").content(), ChunkContent::PaletteChange);
        assert_eq!(FourCc(*b"01wb").content(), ChunkContent::AudioData);
        assert_eq!(FourCc(*b"00xx").content(), ChunkContent::Unknown);
        assert_eq!(FourCc(*b"avih").content(), ChunkContent::Unknown);
    }

    #[test]
    fn test_for_stream_round_trip() {
        let tag = FourCc::for_stream(7, b"wb");
        assert_eq!(tag, FourCc(*b"07wb"));
        assert_eq!(tag.stream_index(), Some(7));
        assert_eq!(tag.content(), ChunkContent::AudioData);
    }

    #[test]
    fn test_display() {
        assert_eq!(FourCc(*b"rec ").to_string(), "rec ");
        assert_eq!(BI_RGB.to_string(), "\\x00\\x00\\x00\\x00");
    }
}

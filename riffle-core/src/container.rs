//! The public movie facade: load, play forward, probe.

use std::io::{Read, Seek};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::chunk::{ChunkError, ChunkReader};
use crate::codec::{CodecFactory, DefaultCodecs};
use crate::demux::{DemuxEvent, Demuxer, MovieRegion};
use crate::fourcc::{FourCc, AVI_, HDRL, IDX1, LIST, MOVI, RIFF};
use crate::header::{self, ContainerHeader, Rational, StreamDescriptor};
use crate::index::IndexTable;
use crate::samples::SampleQueue;
use crate::track::{FrameBuffer, StreamEntry, StreamRegistry};

/// Fatal parse-time failures. No partial movie is ever returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("not a RIFF container")]
    NotRiff,
    #[error("unrecognized container form type")]
    NotAvi,
    #[error("missing or garbled header list")]
    MissingHeader,
    #[error("container has no movie-data region")]
    NoMovieData,
    #[error("container has no video stream")]
    NoVideoStream,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(FourCc),
    #[error("stream truncated while loading")]
    Truncated,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChunkError> for LoadError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Truncated => LoadError::Truncated,
            ChunkError::Io(e) => LoadError::Io(e),
        }
    }
}

/// Seek failures. The recommended fallback is `rewind()`.
#[derive(Debug, Error)]
pub enum SeekError {
    #[error("no keyframe precedes the target frame")]
    NoKeyframe,
    #[error("seek target is outside the movie")]
    OutOfRange,
    #[error("container has no usable index")]
    NoIndex,
    #[error("stream truncated during seek")]
    Truncated,
    #[error("I/O error during seek: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChunkError> for SeekError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Truncated => SeekError::Truncated,
            ChunkError::Io(e) => SeekError::Io(e),
        }
    }
}

/// Serializable probe summary, the whole-file view a front end wants.
#[derive(Debug, Clone, Serialize)]
pub struct MovieInfo {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_rate: Rational,
    pub total_frames: u32,
    pub has_index: bool,
    pub streams: Vec<StreamDescriptor>,
}

/// A loaded movie. Owns the byte stream for its whole lifetime; renderers
/// and mixers see internal state only through the narrow read accessors.
pub struct Movie<R: Read + Seek> {
    pub(crate) reader: ChunkReader<R>,
    pub(crate) header: ContainerHeader,
    pub(crate) registry: StreamRegistry,
    pub(crate) index: IndexTable,
    pub(crate) demuxer: Demuxer,
}

impl<R: Read + Seek> std::fmt::Debug for Movie<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Movie")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> Movie<R> {
    /// Load with the built-in codec set.
    pub fn load(reader: R) -> Result<Self, LoadError> {
        Self::load_with_codecs(reader, &DefaultCodecs)
    }

    /// Load, resolving stream codecs through the given factory.
    pub fn load_with_codecs(reader: R, codecs: &dyn CodecFactory) -> Result<Self, LoadError> {
        let mut reader = ChunkReader::new(reader)?;

        let root = reader.next_chunk()?;
        if root.tag != RIFF {
            return Err(LoadError::NotRiff);
        }
        if reader.enter_list()? != AVI_ {
            return Err(LoadError::NotAvi);
        }

        let mut parsed = None;
        let mut region: Option<MovieRegion> = None;
        let mut index = IndexTable::empty();

        let end = root.end().min(reader.len());
        while reader.position()? + 8 <= end {
            let chunk = reader.next_chunk()?;
            if chunk.tag == LIST {
                let form = reader.enter_list()?;
                if form == HDRL {
                    parsed = Some(header::parse_hdrl(&mut reader, &chunk)?);
                } else if form == MOVI {
                    let base = chunk.payload_start();
                    region = Some(MovieRegion {
                        base,
                        start: base + 4,
                        end: (base + u64::from(chunk.size)).min(reader.len()),
                    });
                    reader.seek_to(chunk.end().min(reader.len()))?;
                } else {
                    reader.seek_to(chunk.end().min(reader.len()))?;
                }
            } else if chunk.tag == IDX1 {
                match &region {
                    Some(region) => index = IndexTable::parse(&mut reader, &chunk, region)?,
                    None => {
                        tracing::warn!("index chunk before movie data, ignoring");
                        reader.skip_chunk(&chunk)?;
                    }
                }
            } else {
                reader.skip_chunk(&chunk)?;
            }
        }

        let parsed = parsed.ok_or(LoadError::MissingHeader)?;
        let region = region.ok_or(LoadError::NoMovieData)?;
        let registry = StreamRegistry::build(&parsed.header, parsed.streams, codecs)?;

        tracing::debug!(
            frames = parsed.header.total_frames,
            streams = registry.len(),
            indexed = index.len(),
            "movie loaded"
        );

        reader.seek_to(region.start)?;
        Ok(Self {
            reader,
            header: parsed.header,
            registry,
            index,
            demuxer: Demuxer::new(region),
        })
    }

    /// Decode forward until the video track produces its next frame.
    /// Returns `None` once the movie has ended (duplicates still count as
    /// frames; a truncated file ends cleanly rather than erroring).
    pub fn decode_next_frame(&mut self) -> Option<&FrameBuffer> {
        if self.registry.video().map_or(true, |v| v.is_finished()) {
            return None;
        }
        loop {
            match self
                .demuxer
                .read_next_packet(&mut self.reader, &mut self.registry, &mut self.index)
            {
                DemuxEvent::VideoFrame => break,
                DemuxEvent::Ended => return None,
                _ => continue,
            }
        }
        self.registry.video().map(|v| v.frame())
    }

    /// Restart playback from the first frame, discarding all decode state.
    pub fn rewind(&mut self) -> Result<(), SeekError> {
        self.reader.seek_to(self.demuxer.region().start)?;
        self.registry.rewind_all();
        self.demuxer.resume();
        Ok(())
    }

    pub fn is_at_end(&self) -> bool {
        self.demuxer.is_ended() || self.registry.video().map_or(true, |v| v.is_finished())
    }

    /// Total running time in seconds.
    pub fn duration(&self) -> f64 {
        self.header.frame_rate.time_for_frame(self.header.total_frames)
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn streams(&self) -> &[StreamEntry] {
        self.registry.entries()
    }

    /// Frames decoded so far; the last decoded frame is `current_frame - 1`.
    pub fn current_frame(&self) -> u32 {
        self.registry.video().map_or(0, |v| v.current_frame())
    }

    /// The most recently decoded frame.
    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.registry.video().map(|v| v.frame())
    }

    pub fn palette(&self) -> Option<&[u8; 768]> {
        self.registry.video().map(|v| v.palette())
    }

    /// Renderer poll: has the palette changed since the last call?
    pub fn take_palette_dirty(&mut self) -> bool {
        self.registry
            .video_mut()
            .map_or(false, |v| v.take_palette_dirty())
    }

    /// Consumer handle for the decoded-audio FIFO, if the movie has audio.
    pub fn audio_queue(&self) -> Option<Arc<SampleQueue>> {
        self.registry.audio().map(|a| a.queue())
    }

    pub fn audio_sample_rate(&self) -> Option<u32> {
        self.registry.audio().map(|a| a.sample_rate())
    }

    pub fn audio_channels(&self) -> Option<u16> {
        self.registry.audio().map(|a| a.channels())
    }

    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    pub fn info(&self) -> MovieInfo {
        MovieInfo {
            duration_secs: self.duration(),
            width: self.header.width,
            height: self.header.height,
            fps: self.header.frame_rate.as_f64(),
            frame_rate: self.header.frame_rate,
            total_frames: self.header.total_frames,
            has_index: self.index.is_complete(),
            streams: self
                .registry
                .entries()
                .iter()
                .map(|e| e.descriptor.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MovieBuilder;
    use std::io::Cursor;

    #[test]
    fn test_load_rejects_bad_magic() {
        let err = Movie::load(Cursor::new(b"JUNKJUNKJUNKJUNK".to_vec())).unwrap_err();
        assert!(matches!(err, LoadError::NotRiff));
    }

    #[test]
    fn test_load_rejects_wrong_form_type() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&12u32.to_le_bytes());
        data.extend_from_slice(b"WAVEdata");
        let err = Movie::load(Cursor::new(data)).unwrap_err();
        assert!(matches!(err, LoadError::NotAvi));
    }

    #[test]
    fn test_header_fields_survive_parse() {
        let movie = MovieBuilder::new(4, 2, 15, 15)
            .keyframe_interval(2)
            .build_movie();
        assert_eq!(movie.header().total_frames, 15);
        assert_eq!(movie.header().frame_rate, Rational { num: 15, den: 1 });
        assert_eq!(movie.header().width, 4);
        assert_eq!(movie.header().height, 2);
        assert!((movie.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_playback_produces_exactly_total_frames() {
        let mut movie = MovieBuilder::new(4, 4, 15, 30)
            .keyframe_interval(5)
            .duplicate_frame(7) // empty packet: still counts as a frame
            .build_movie();

        let mut frames = 0;
        while movie.decode_next_frame().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 30);
        assert!(movie.is_at_end());
        assert!(movie.decode_next_frame().is_none());
    }

    #[test]
    fn test_frame_content_advances() {
        let mut movie = MovieBuilder::new(2, 2, 10, 3).build_movie();
        let first = movie.decode_next_frame().unwrap().data.clone();
        let second = movie.decode_next_frame().unwrap().data.clone();
        assert_eq!(first, vec![0; 4]);
        assert_eq!(second, vec![1; 4]);
        assert_eq!(movie.current_frame(), 2);
    }

    #[test]
    fn test_truncated_movie_ends_cleanly() {
        let mut data = MovieBuilder::new(4, 4, 10, 20).build_bytes();
        data.truncate(data.len() / 2);

        let mut movie = Movie::load(Cursor::new(data)).unwrap();
        let mut frames = 0;
        while movie.decode_next_frame().is_some() {
            frames += 1;
        }
        assert!(frames < 20);
        assert!(movie.is_at_end());
        // Fail-soft: all tracks report finished, no error surfaced.
        for entry in movie.streams() {
            if let Some(track) = &entry.track {
                assert!(track.is_finished());
            }
        }
    }

    #[test]
    fn test_rewind_restarts_playback() {
        let mut movie = MovieBuilder::new(2, 2, 10, 5).build_movie();
        while movie.decode_next_frame().is_some() {}
        assert!(movie.is_at_end());

        movie.rewind().unwrap();
        assert!(!movie.is_at_end());
        assert_eq!(movie.current_frame(), 0);
        let first = movie.decode_next_frame().unwrap();
        assert_eq!(first.data, vec![0; 4]);
    }

    #[test]
    fn test_audio_reaches_fifo_during_playback() {
        let mut movie = MovieBuilder::new(2, 2, 10, 5)
            .audio(22_050, 1)
            .build_movie();
        let queue = movie.audio_queue().unwrap();
        while movie.decode_next_frame().is_some() {}
        // One frame's worth of samples per group, five groups.
        assert_eq!(queue.len(), 5 * 2_205);
    }

    #[test]
    fn test_opportunistic_index_grows_without_idx1() {
        let mut movie = MovieBuilder::new(2, 2, 10, 5)
            .audio(22_050, 1)
            .without_index()
            .build_movie();
        assert!(movie.index().is_empty());
        while movie.decode_next_frame().is_some() {}
        assert!(!movie.index().is_complete());
        // Groups, frames and audio chunks all get recorded.
        assert!(movie.index().len() >= 10);

        // A second pass after rewind must not duplicate entries.
        let recorded = movie.index().len();
        movie.rewind().unwrap();
        while movie.decode_next_frame().is_some() {}
        assert_eq!(movie.index().len(), recorded);
    }

    #[test]
    fn test_info_summary() {
        let movie = MovieBuilder::new(8, 6, 15, 90)
            .audio(22_050, 1)
            .build_movie();
        let info = movie.info();
        assert_eq!(info.total_frames, 90);
        assert_eq!(info.width, 8);
        assert!(info.has_index);
        assert_eq!(info.streams.len(), 2);
        // The summary serializes; front ends print it as JSON.
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"total_frames\":90"));
    }
}

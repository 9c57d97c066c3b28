//! Forward playback through the movie-data region.

use std::io::{Read, Seek};

use crate::chunk::ChunkReader;
use crate::fourcc::{ChunkContent, LIST, REC_};
use crate::index::{IndexEntry, IndexTable};
use crate::track::{StreamRegistry, Track};

/// Byte extent of the movie-data list. `base` is the position of the form
/// type FourCC (relative index offsets are measured from here), `start` the
/// first data chunk, `end` one past the last.
#[derive(Debug, Clone, Copy)]
pub struct MovieRegion {
    pub base: u64,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    Playing,
    Ended,
}

/// What one `read_next_packet` call delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxEvent {
    /// A frame packet reached the video track (the frame counter advanced).
    VideoFrame,
    PaletteChange,
    Audio,
    /// Entered a grouping record; its children follow on subsequent calls.
    GroupStart,
    /// Chunk consumed but routed nowhere (unknown tag, unsupported stream).
    Skipped,
    Ended,
}

pub struct Demuxer {
    region: MovieRegion,
    state: DemuxState,
    seen_video: bool,
}

impl Demuxer {
    pub fn new(region: MovieRegion) -> Self {
        Self {
            region,
            state: DemuxState::Playing,
            seen_video: false,
        }
    }

    pub fn region(&self) -> &MovieRegion {
        &self.region
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == DemuxState::Ended
    }

    /// Re-enter `Playing` after a rewind or seek repositioned the cursor.
    pub(crate) fn resume(&mut self) {
        self.state = DemuxState::Playing;
    }

    /// Force `Ended` without reading further (seek-to-end).
    pub(crate) fn force_end(&mut self) {
        self.state = DemuxState::Ended;
    }

    /// Pull one chunk from the movie-data region and route it to its track.
    ///
    /// Running off the end of the region, including a chunk that cannot be
    /// fully read from a truncated file, ends playback cleanly: every track
    /// is marked finished and `Ended` is returned, now and on every later
    /// call. No error escapes to the caller from here.
    pub fn read_next_packet<R: Read + Seek>(
        &mut self,
        reader: &mut ChunkReader<R>,
        registry: &mut StreamRegistry,
        index: &mut IndexTable,
    ) -> DemuxEvent {
        if self.state == DemuxState::Ended {
            return DemuxEvent::Ended;
        }

        let pos = match reader.position() {
            Ok(pos) => pos,
            Err(_) => return self.finish(registry),
        };
        if pos + 8 > self.region.end {
            return self.finish(registry);
        }
        let chunk = match reader.next_chunk() {
            Ok(chunk) => chunk,
            Err(_) => return self.finish(registry),
        };

        if chunk.tag == LIST {
            let form = match reader.enter_list() {
                Ok(form) => form,
                Err(_) => return self.finish(registry),
            };
            if form == REC_ {
                index.record(IndexEntry {
                    tag: REC_,
                    stream: None,
                    offset: chunk.offset,
                    size: chunk.size,
                    keyframe: false,
                    group: true,
                });
                // Children are ordinary chunks; the next calls route them.
                return DemuxEvent::GroupStart;
            }
            tracing::debug!(%form, "skipping non-record list in movie data");
            if reader.seek_to(chunk.end().min(reader.len())).is_err() {
                return self.finish(registry);
            }
            return DemuxEvent::Skipped;
        }

        let content = chunk.tag.content();
        if content == ChunkContent::Unknown {
            if reader.skip_chunk(&chunk).is_err() {
                return self.finish(registry);
            }
            return DemuxEvent::Skipped;
        }

        let payload = match reader.read_payload(&chunk) {
            Ok(payload) => payload,
            Err(_) => return self.finish(registry),
        };
        let Some(stream) = chunk.tag.stream_index() else {
            return DemuxEvent::Skipped;
        };

        let keyframe = content == ChunkContent::VideoFrame && !self.seen_video;
        if content == ChunkContent::VideoFrame {
            self.seen_video = true;
        }
        index.record(IndexEntry {
            tag: chunk.tag,
            stream: Some(stream),
            offset: chunk.offset,
            size: chunk.size,
            keyframe,
            group: false,
        });

        match (content, registry.track_mut(stream)) {
            (ChunkContent::VideoFrame, Some(Track::Video(video))) => {
                video.decode_packet(&payload);
                DemuxEvent::VideoFrame
            }
            (ChunkContent::PaletteChange, Some(Track::Video(video))) => {
                video.apply_palette(&payload);
                DemuxEvent::PaletteChange
            }
            (ChunkContent::AudioData, Some(Track::Audio(audio))) => {
                audio.queue_packet(&payload);
                DemuxEvent::Audio
            }
            _ => {
                tracing::debug!(stream, tag = %chunk.tag, "packet for unroutable stream skipped");
                DemuxEvent::Skipped
            }
        }
    }

    fn finish(&mut self, registry: &mut StreamRegistry) -> DemuxEvent {
        if self.state != DemuxState::Ended {
            tracing::debug!("movie data exhausted, ending all tracks");
            self.state = DemuxState::Ended;
            registry.finish_all();
        }
        DemuxEvent::Ended
    }
}

//! Playback tracks and the stream registry.
//!
//! A track owns all mutable decode state for one stream. Video state is
//! differential (frames decode relative to the previous one), so a seek or
//! rewind discards and rebuilds it wholesale instead of patching it.

use std::sync::Arc;

use crate::codec::{AudioDecoder, CodecFactory, PixelFormat, VideoDecoder};
use crate::container::LoadError;
use crate::header::{ContainerHeader, ParsedStream, StreamDescriptor};
use crate::samples::SampleQueue;

/// A decoded video frame owned by its track. Renderers borrow it read-only.
#[derive(Debug)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

// ============================================================================
// Video
// ============================================================================

pub struct VideoTrack {
    decoder: Box<dyn VideoDecoder>,
    frame: FrameBuffer,
    current_frame: u32,
    total_frames: u32,
    palette: [u8; 768],
    initial_palette: [u8; 768],
    palette_dirty: bool,
}

impl VideoTrack {
    pub fn new(
        decoder: Box<dyn VideoDecoder>,
        width: u32,
        height: u32,
        total_frames: u32,
        initial_palette: Option<&[u8; 768]>,
    ) -> Self {
        let initial_palette = initial_palette.copied().unwrap_or_else(grey_ramp);
        let format = decoder.pixel_format();
        let size = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            decoder,
            frame: FrameBuffer {
                data: vec![0u8; size],
                width,
                height,
                format,
            },
            current_frame: 0,
            total_frames,
            palette: initial_palette,
            initial_palette,
            palette_dirty: true,
        }
    }

    /// Decode one frame packet. An empty payload is a legal "duplicate the
    /// previous frame" instruction; a rejected packet is demoted to the same
    /// thing so playback never hard-stops mid-stream. The frame counter
    /// advances either way.
    pub fn decode_packet(&mut self, data: &[u8]) {
        if !data.is_empty() {
            if let Err(err) = self.decoder.decode(data, &mut self.frame.data) {
                tracing::warn!(
                    frame = self.current_frame,
                    %err,
                    "video packet rejected, duplicating previous frame"
                );
            }
        }
        self.current_frame += 1;
    }

    /// Merge a cumulative palette-change payload: `first`, `count` (0 means
    /// 256), a flags word, then `count` RGB+flags entries.
    pub fn apply_palette(&mut self, data: &[u8]) {
        if data.len() < 4 {
            tracing::warn!(len = data.len(), "short palette chunk ignored");
            return;
        }
        let first = data[0] as usize;
        let count = if data[1] == 0 { 256 } else { data[1] as usize };
        let entries = &data[4..];

        let count = count.min(256 - first).min(entries.len() / 4);
        for i in 0..count {
            let entry = &entries[i * 4..i * 4 + 4];
            let slot = (first + i) * 3;
            self.palette[slot] = entry[0];
            self.palette[slot + 1] = entry[1];
            self.palette[slot + 2] = entry[2];
        }
        self.palette_dirty = true;
    }

    /// Restore the load-time palette. Palette state is cumulative, so seeks
    /// rebuild it from here by replaying the chunk history.
    pub fn reset_palette(&mut self) {
        self.palette = self.initial_palette;
        self.palette_dirty = true;
    }

    /// Renderer poll: true once per palette change, then cleared.
    pub fn take_palette_dirty(&mut self) -> bool {
        std::mem::take(&mut self.palette_dirty)
    }

    pub fn palette(&self) -> &[u8; 768] {
        &self.palette
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.frame.format
    }

    /// Frames decoded so far; equivalently, the next frame index to decode.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub(crate) fn set_current_frame(&mut self, frame: u32) {
        self.current_frame = frame;
    }

    pub fn is_finished(&self) -> bool {
        self.current_frame >= self.total_frames
    }

    pub fn finish(&mut self) {
        self.current_frame = self.total_frames;
    }

    pub fn rewind(&mut self) {
        self.current_frame = 0;
        self.frame.data.fill(0);
        self.decoder.reset();
        self.reset_palette();
    }
}

fn grey_ramp() -> [u8; 768] {
    let mut pal = [0u8; 768];
    for i in 0..256 {
        pal[i * 3] = i as u8;
        pal[i * 3 + 1] = i as u8;
        pal[i * 3 + 2] = i as u8;
    }
    pal
}

// ============================================================================
// Audio
// ============================================================================

pub struct AudioTrack {
    decoder: Box<dyn AudioDecoder>,
    queue: Arc<SampleQueue>,
    sample_rate: u32,
    channels: u16,
    ended: bool,
    /// Samples still owed to a `skip_samples` call that outran the FIFO.
    /// Consumed from the next packets before they reach the queue.
    pending_skip: u64,
}

impl AudioTrack {
    pub fn new(decoder: Box<dyn AudioDecoder>, sample_rate: u32, channels: u16) -> Self {
        Self {
            decoder,
            queue: Arc::new(SampleQueue::new()),
            sample_rate,
            channels,
            ended: false,
            pending_skip: 0,
        }
    }

    /// Decode one audio packet and append the PCM to the FIFO. A rejected
    /// packet is dropped with a warning; playback continues.
    pub fn queue_packet(&mut self, data: &[u8]) {
        let mut out = Vec::new();
        match self.decoder.decode(data, &mut out) {
            Ok(()) => {
                if self.pending_skip > 0 {
                    let drop = (self.pending_skip as usize).min(out.len());
                    out.drain(..drop);
                    self.pending_skip -= drop as u64;
                }
                if !out.is_empty() {
                    self.queue.push_samples(&out);
                }
            }
            Err(err) => tracing::warn!(%err, "audio packet rejected"),
        }
    }

    /// Discard `n` already-decoded samples from the FIFO head without
    /// audible playback (seek resync). A remainder beyond what is queued is
    /// taken out of the next packets instead, so the head lands on the exact
    /// requested sample no matter how the packets are sliced.
    pub fn skip_samples(&mut self, n: u64) -> u64 {
        let skipped = self.queue.skip(n);
        self.pending_skip += n - skipped;
        skipped
    }

    /// Empty the FIFO and recreate decode state. Cross-packet codec history
    /// must not leak across this.
    pub fn reset_queue(&mut self) {
        self.queue.clear();
        self.decoder.reset();
        self.ended = false;
        self.pending_skip = 0;
    }

    /// Handle for the consumer side of the FIFO.
    pub fn queue(&self) -> Arc<SampleQueue> {
        Arc::clone(&self.queue)
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    pub fn lookahead_packets(&self) -> usize {
        self.decoder.lookahead_packets()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_finished(&self) -> bool {
        self.ended
    }

    pub fn finish(&mut self) {
        self.ended = true;
    }

    pub fn rewind(&mut self) {
        self.reset_queue();
    }
}

// ============================================================================
// Track
// ============================================================================

/// Codec-agnostic playback unit. Closed set: one level of polymorphism is
/// all this format family needs.
pub enum Track {
    Video(VideoTrack),
    Audio(AudioTrack),
}

impl Track {
    pub fn is_finished(&self) -> bool {
        match self {
            Track::Video(v) => v.is_finished(),
            Track::Audio(a) => a.is_finished(),
        }
    }

    pub fn finish(&mut self) {
        match self {
            Track::Video(v) => v.finish(),
            Track::Audio(a) => a.finish(),
        }
    }

    pub fn rewind(&mut self) {
        match self {
            Track::Video(v) => v.rewind(),
            Track::Audio(a) => a.rewind(),
        }
    }

    pub fn as_video(&self) -> Option<&VideoTrack> {
        match self {
            Track::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_video_mut(&mut self) -> Option<&mut VideoTrack> {
        match self {
            Track::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioTrack> {
        match self {
            Track::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut AudioTrack> {
        match self {
            Track::Audio(a) => Some(a),
            _ => None,
        }
    }
}

// ============================================================================
// Stream Registry
// ============================================================================

pub struct StreamEntry {
    pub descriptor: StreamDescriptor,
    /// None for streams we register but cannot decode; their packets are
    /// skipped during playback.
    pub track: Option<Track>,
}

/// Maps the small integer stream index embedded in data-chunk tags to its
/// descriptor and track. Built once while parsing the header list.
pub struct StreamRegistry {
    entries: Vec<StreamEntry>,
}

impl StreamRegistry {
    pub fn build(
        header: &ContainerHeader,
        streams: Vec<ParsedStream>,
        codecs: &dyn CodecFactory,
    ) -> Result<Self, LoadError> {
        let mut entries = Vec::with_capacity(streams.len());
        let mut have_video = false;

        for (index, stream) in streams.into_iter().enumerate() {
            let track = match &stream.descriptor {
                StreamDescriptor::Video(desc) => {
                    if have_video {
                        // Synchronizing more than one video track is out of
                        // scope; keep the descriptor, skip the packets.
                        tracing::warn!(stream = index, "ignoring secondary video stream");
                        None
                    } else {
                        have_video = true;
                        let decoder = codecs.video(desc)?;
                        let total = if header.total_frames > 0 {
                            header.total_frames
                        } else {
                            stream.timing.length
                        };
                        let (width, height) = if desc.width > 0 && desc.height > 0 {
                            (desc.width, desc.height)
                        } else {
                            (header.width, header.height)
                        };
                        Some(Track::Video(VideoTrack::new(
                            decoder,
                            width,
                            height,
                            total,
                            stream.initial_palette.as_deref(),
                        )))
                    }
                }
                StreamDescriptor::Audio(desc) => match codecs.audio(desc) {
                    Ok(decoder) => Some(Track::Audio(AudioTrack::new(
                        decoder,
                        desc.sample_rate,
                        desc.channels,
                    ))),
                    Err(err) => {
                        tracing::warn!(stream = index, %err, "audio stream not decodable, skipping");
                        None
                    }
                },
                StreamDescriptor::Unsupported { .. } => None,
            };
            entries.push(StreamEntry {
                descriptor: stream.descriptor,
                track,
            });
        }

        if !have_video {
            return Err(LoadError::NoVideoStream);
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[StreamEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn track_mut(&mut self, stream: u16) -> Option<&mut Track> {
        self.entries
            .get_mut(stream as usize)
            .and_then(|e| e.track.as_mut())
    }

    /// Index of the (single) decodable video stream.
    pub fn video_stream(&self) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| matches!(e.track, Some(Track::Video(_))))
            .map(|i| i as u16)
    }

    /// Index of the first decodable audio stream.
    pub fn audio_stream(&self) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| matches!(e.track, Some(Track::Audio(_))))
            .map(|i| i as u16)
    }

    pub fn video(&self) -> Option<&VideoTrack> {
        self.entries
            .iter()
            .find_map(|e| e.track.as_ref().and_then(Track::as_video))
    }

    pub fn video_mut(&mut self) -> Option<&mut VideoTrack> {
        self.entries
            .iter_mut()
            .find_map(|e| e.track.as_mut().and_then(Track::as_video_mut))
    }

    pub fn audio(&self) -> Option<&AudioTrack> {
        self.entries
            .iter()
            .find_map(|e| e.track.as_ref().and_then(Track::as_audio))
    }

    pub fn audio_mut(&mut self) -> Option<&mut AudioTrack> {
        self.entries
            .iter_mut()
            .find_map(|e| e.track.as_mut().and_then(Track::as_audio_mut))
    }

    /// Mark every track finished (fail-soft end of a truncated file).
    pub fn finish_all(&mut self) {
        for entry in &mut self.entries {
            if let Some(track) = &mut entry.track {
                track.finish();
            }
        }
    }

    pub fn rewind_all(&mut self) {
        for entry in &mut self.entries {
            if let Some(track) = &mut entry.track {
                track.rewind();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, RawVideo};

    fn video_track(width: u32, height: u32, total: u32) -> VideoTrack {
        VideoTrack::new(Box::new(RawVideo), width, height, total, None)
    }

    #[test]
    fn test_empty_packet_duplicates_previous_frame() {
        let mut track = video_track(2, 2, 10);
        track.decode_packet(&[5, 5, 5, 5]);
        assert_eq!(track.current_frame(), 1);
        assert_eq!(track.frame().data, vec![5, 5, 5, 5]);

        track.decode_packet(&[]);
        assert_eq!(track.current_frame(), 2);
        assert_eq!(track.frame().data, vec![5, 5, 5, 5]);
    }

    #[test]
    fn test_rejected_packet_keeps_previous_frame() {
        let mut track = video_track(2, 2, 10);
        track.decode_packet(&[9, 9, 9, 9]);
        track.decode_packet(&[1]); // too short for the raw codec
        assert_eq!(track.current_frame(), 2);
        assert_eq!(track.frame().data, vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_palette_merge_is_cumulative() {
        let mut track = video_track(1, 1, 1);
        // first=0 count=1: slot 0 -> (10, 20, 30)
        track.apply_palette(&[0, 1, 0, 0, 10, 20, 30, 0]);
        // first=2 count=1: slot 2 -> (1, 2, 3); slot 0 untouched
        track.apply_palette(&[2, 1, 0, 0, 1, 2, 3, 0]);

        let pal = track.palette();
        assert_eq!(&pal[0..3], &[10, 20, 30]);
        assert_eq!(&pal[6..9], &[1, 2, 3]);
        assert!(track.take_palette_dirty());
        assert!(!track.take_palette_dirty());
    }

    #[test]
    fn test_palette_reset_restores_load_time_state() {
        let mut initial = [0u8; 768];
        initial[0] = 77;
        let mut track = VideoTrack::new(Box::new(RawVideo), 1, 1, 1, Some(&initial));
        track.apply_palette(&[0, 1, 0, 0, 1, 1, 1, 0]);
        track.reset_palette();
        assert_eq!(track.palette()[0], 77);
    }

    #[test]
    fn test_finish_and_rewind() {
        let mut track = video_track(1, 1, 3);
        track.decode_packet(&[1]);
        assert!(!track.is_finished());
        track.finish();
        assert!(track.is_finished());
        track.rewind();
        assert_eq!(track.current_frame(), 0);
        assert!(!track.is_finished());
    }

    struct FailingAudio;

    impl crate::codec::AudioDecoder for FailingAudio {
        fn decode(&mut self, _data: &[u8], _out: &mut Vec<i16>) -> Result<(), CodecError> {
            Err(CodecError::Malformed("always".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_rejected_audio_packet_queues_nothing() {
        let mut track = AudioTrack::new(Box::new(FailingAudio), 22_050, 1);
        track.queue_packet(&[1, 2, 3]);
        assert_eq!(track.queued_samples(), 0);
    }

    #[test]
    fn test_audio_queue_and_skip() {
        let mut track = AudioTrack::new(Box::new(crate::codec::RawPcm::new(16)), 22_050, 1);
        track.queue_packet(&[1, 0, 2, 0, 3, 0]);
        assert_eq!(track.queued_samples(), 3);
        assert_eq!(track.skip_samples(2), 2);

        let queue = track.queue();
        let mut out = [0i16; 1];
        queue.read_buffer(&mut out);
        assert_eq!(out[0], 3);

        track.reset_queue();
        assert_eq!(track.queued_samples(), 0);
    }

    #[test]
    fn test_skip_deficit_applies_to_future_packets() {
        let mut track = AudioTrack::new(Box::new(crate::codec::RawPcm::new(16)), 22_050, 1);
        track.queue_packet(&[1, 0, 2, 0]);
        // Two queued, ask for five: three are owed by the next packets.
        assert_eq!(track.skip_samples(5), 2);
        track.queue_packet(&[3, 0, 4, 0, 5, 0, 6, 0]);
        assert_eq!(track.queued_samples(), 1);

        let mut out = [0i16; 1];
        track.queue().read_buffer(&mut out);
        assert_eq!(out[0], 6);
    }
}

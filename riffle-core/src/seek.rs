//! Frame-accurate seeking.
//!
//! Video codecs in this family are differential, so the engine never jumps
//! straight to the target frame: it replays from the nearest prior keyframe,
//! decoding and discarding, until codec state matches what forward playback
//! would have produced. Audio is resynchronized to the exact sample implied
//! by the requested time, with a warm-up window for codecs that carry
//! encoder pipeline delay.

use std::io::{Read, Seek};

use crate::chunk::{ChunkError, ChunkReader};
use crate::container::{Movie, SeekError};
use crate::fourcc::ChunkContent;

impl<R: Read + Seek> Movie<R> {
    /// Seek to `seconds`. On success the next `decode_next_frame` call
    /// produces exactly the frame shown at that time, and the audio FIFO
    /// head lands on sample `floor(seconds * sample_rate)`.
    ///
    /// Seeking is idempotent and may interrupt a previous seek at any point;
    /// all track state is rebuilt unconditionally.
    pub fn seek(&mut self, seconds: f64) -> Result<(), SeekError> {
        let duration = self.duration();
        if !seconds.is_finite() || seconds < 0.0 || seconds > duration {
            return Err(SeekError::OutOfRange);
        }
        let target = self.header.frame_rate.frame_for_time(seconds);
        if target >= self.header.total_frames {
            return self.seek_to_end();
        }
        if self.index.is_empty() {
            return Err(SeekError::NoIndex);
        }
        let Some(video_stream) = self.registry.video_stream() else {
            return Err(SeekError::NoIndex);
        };

        tracing::debug!(seconds, target, "seeking");

        // Palette state is cumulative: rebuild it from the load-time palette
        // by replaying chunk history, never from wherever decoding stopped.
        if let Some(video) = self.registry.video_mut() {
            video.reset_palette();
        }

        // One linear scan tracking the most recent keyframe, the most recent
        // grouping boundary, and applying every palette chunk on the way.
        // The first video entry counts as a keyframe whether or not it is
        // flagged as one.
        let mut last_keyframe: Option<usize> = None;
        let mut frames_before_keyframe = 0u32;
        let mut last_group: Option<usize> = None;
        let mut frames_seen = 0u32;
        let mut target_pos: Option<usize> = None;

        let mut pos = 0usize;
        while pos < self.index.len() {
            let entry = self.index.entries()[pos];
            if entry.group {
                last_group = Some(pos);
            } else if entry.stream == Some(video_stream) {
                match entry.tag.content() {
                    ChunkContent::VideoFrame => {
                        if frames_seen == target {
                            target_pos = Some(pos);
                            break;
                        }
                        if entry.keyframe || frames_seen == 0 {
                            last_keyframe = Some(pos);
                            frames_before_keyframe = frames_seen;
                        }
                        frames_seen += 1;
                    }
                    ChunkContent::PaletteChange => {
                        let payload = read_payload_at(&mut self.reader, entry.offset)?;
                        if let Some(video) = self.registry.video_mut() {
                            video.apply_palette(&payload);
                        }
                    }
                    _ => {}
                }
            }
            pos += 1;
        }

        let Some(target_pos) = target_pos else {
            // A grown-in-memory index simply does not reach this far yet.
            return Err(if self.index.is_complete() {
                SeekError::OutOfRange
            } else {
                SeekError::NoIndex
            });
        };

        // Resume point: the grouping record containing the target frame, or
        // the frame's own chunk when the file does not group packets.
        let target_offset = self.index.entries()[target_pos].offset;
        let cursor_pos = match last_group {
            Some(group) if self.index.entries()[group].contains(target_offset) => group,
            _ => target_pos,
        };

        // Decode-and-discard from the keyframe to rebuild codec state.
        // Palette entries were already applied by the scan. A target that is
        // itself a keyframe needs no replay at all.
        let (replay_from, replay_start_frame) = if self.index.entries()[target_pos].keyframe {
            (target_pos, target)
        } else {
            match last_keyframe {
                Some(pos) => (pos, frames_before_keyframe),
                None if target == 0 => (target_pos, 0),
                None => return Err(SeekError::NoKeyframe),
            }
        };
        if let Some(video) = self.registry.video_mut() {
            video.set_current_frame(replay_start_frame);
        }
        for pos in replay_from..target_pos {
            let entry = self.index.entries()[pos];
            if entry.stream != Some(video_stream)
                || entry.tag.content() != ChunkContent::VideoFrame
            {
                continue;
            }
            let payload = read_payload_at(&mut self.reader, entry.offset)?;
            if let Some(video) = self.registry.video_mut() {
                video.decode_packet(&payload);
            }
        }
        // The frame counter now sits at `target`: the next ordinary packet
        // read decodes the target frame itself.

        self.resync_audio(seconds, target, cursor_pos)?;

        self.reader.seek_to(self.index.entries()[cursor_pos].offset)?;
        self.demuxer.resume();
        Ok(())
    }

    /// Requested time at or past the last frame: no decode work, just clamp
    /// every track to its finished state.
    fn seek_to_end(&mut self) -> Result<(), SeekError> {
        let end = self.demuxer.region().end.min(self.reader.len());
        self.reader.seek_to(end)?;
        if let Some(audio) = self.registry.audio_mut() {
            audio.reset_queue();
        }
        self.registry.finish_all();
        self.demuxer.force_end();
        Ok(())
    }

    /// Rebuild the audio FIFO for a resume at index position `cursor_pos`.
    ///
    /// The last `lookahead` audio packets before the resume point are
    /// decoded purely to warm the codec up; everything they produce predates
    /// the resume point and is skipped, along with the sub-group remainder
    /// up to the requested time. Skips are counted against samples actually
    /// produced rather than nominal packet sizes, so the oversized primer
    /// payload some codecs emit on their first packet cancels out.
    fn resync_audio(
        &mut self,
        seconds: f64,
        target: u32,
        cursor_pos: usize,
    ) -> Result<(), SeekError> {
        let Some(audio_stream) = self.registry.audio_stream() else {
            return Ok(());
        };
        let lookahead = self
            .registry
            .audio()
            .map(|a| a.lookahead_packets())
            .unwrap_or(0);

        // Audio packets preceding the resume point, in file order. The
        // warm-up window never indexes before the first packet.
        let before: Vec<u64> = self.index.entries()[..cursor_pos]
            .iter()
            .filter(|e| {
                e.stream == Some(audio_stream) && e.tag.content() == ChunkContent::AudioData
            })
            .map(|e| e.offset)
            .collect();
        let window_start = before.len().saturating_sub(lookahead);

        let mut payloads = Vec::with_capacity(before.len() - window_start);
        for &offset in &before[window_start..] {
            payloads.push(read_payload_at(&mut self.reader, offset)?);
        }

        if let Some(audio) = self.registry.audio_mut() {
            audio.reset_queue();
            for payload in &payloads {
                audio.queue_packet(payload);
            }
            let warmed = audio.queued_samples() as u64;
            let rate = audio.sample_rate();
            let channels = u64::from(audio.channels());
            let target_sample = (seconds * f64::from(rate)).floor() as u64;
            let boundary = self.header.frame_rate.samples_before_frame(target, rate);
            let skip = warmed + target_sample.saturating_sub(boundary) * channels;
            if skip > 0 {
                audio.skip_samples(skip);
            }
        }
        Ok(())
    }
}

fn read_payload_at<R: Read + Seek>(
    reader: &mut ChunkReader<R>,
    offset: u64,
) -> Result<Vec<u8>, ChunkError> {
    reader.seek_to(offset)?;
    let chunk = reader.next_chunk()?;
    reader.read_payload(&chunk)
}

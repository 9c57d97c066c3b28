//! Test fixtures: synthesize bit-exact containers in memory.

use std::io::Cursor;

use crate::codec::{
    AudioDecoder, CodecError, CodecFactory, RawPcm, RawVideo, VideoDecoder, WAVE_FORMAT_PCM,
};
use crate::container::{LoadError, Movie};
use crate::header::{AudioDescriptor, VideoDescriptor};
use crate::fourcc::{FourCc, BI_RGB};

/// Compression tag for the differential test codec below.
pub const DLTA: FourCc = FourCc(*b"DLTA");

/// A deliberately stateful video codec: keyframe packets (`0x01` + pixels)
/// replace the accumulator, delta packets (`0x02` + addends) mutate it.
/// Seeking straight to a delta frame without replaying from the keyframe
/// produces visibly wrong output, which is exactly what the seek tests need.
pub struct DeltaVideo {
    accum: Vec<u8>,
}

impl DeltaVideo {
    pub fn new() -> Self {
        Self { accum: Vec::new() }
    }
}

impl VideoDecoder for DeltaVideo {
    fn decode(&mut self, data: &[u8], frame: &mut [u8]) -> Result<(), CodecError> {
        if data.len() < frame.len() + 1 {
            return Err(CodecError::ShortPacket {
                got: data.len(),
                need: frame.len() + 1,
            });
        }
        if self.accum.len() != frame.len() {
            self.accum = vec![0u8; frame.len()];
        }
        match data[0] {
            1 => self.accum.copy_from_slice(&data[1..=frame.len()]),
            2 => {
                for (acc, delta) in self.accum.iter_mut().zip(&data[1..]) {
                    *acc = acc.wrapping_add(*delta);
                }
            }
            other => return Err(CodecError::Malformed(format!("bad packet kind {other}"))),
        }
        frame.copy_from_slice(&self.accum);
        Ok(())
    }

    fn reset(&mut self) {
        self.accum.fill(0);
    }

    fn name(&self) -> &'static str {
        "delta-test"
    }
}

/// PCM with a declared encoder pipeline delay, for lookahead resync tests.
pub struct LookaheadPcm {
    inner: RawPcm,
    lookahead: usize,
}

impl AudioDecoder for LookaheadPcm {
    fn decode(&mut self, data: &[u8], out: &mut Vec<i16>) -> Result<(), CodecError> {
        self.inner.decode(data, out)
    }

    fn lookahead_packets(&self) -> usize {
        self.lookahead
    }

    fn name(&self) -> &'static str {
        "pcm-lookahead"
    }
}

/// Factory covering the built-in codecs plus the test codecs above.
pub struct TestCodecs {
    pub audio_lookahead: usize,
}

impl CodecFactory for TestCodecs {
    fn video(&self, desc: &VideoDescriptor) -> Result<Box<dyn VideoDecoder>, LoadError> {
        match desc.compression {
            BI_RGB => Ok(Box::new(RawVideo)),
            DLTA => Ok(Box::new(DeltaVideo::new())),
            other => Err(LoadError::UnsupportedCodec(other)),
        }
    }

    fn audio(&self, desc: &AudioDescriptor) -> Result<Box<dyn AudioDecoder>, LoadError> {
        match desc.format_tag {
            WAVE_FORMAT_PCM => Ok(Box::new(LookaheadPcm {
                inner: RawPcm::new(desc.bits_per_sample),
                lookahead: self.audio_lookahead,
            })),
            _ => Err(LoadError::UnsupportedCodec(FourCc(*b"????"))),
        }
    }
}

// ============================================================================
// Container Builder
// ============================================================================

/// Synthesizes a complete, valid container: header list, per-frame `rec `
/// groups of palette/video/audio chunks, and an index. Video frame `k` is
/// filled with the byte `k`; audio sample `i` has the value `i & 0x7fff`,
/// so tests can identify any frame or sample by content alone.
#[derive(Clone)]
pub struct MovieBuilder {
    width: u32,
    height: u32,
    fps: u32,
    total_frames: u32,
    kf_interval: u32,
    audio: Option<(u32, u16)>,
    with_index: bool,
    absolute_index: bool,
    groups: bool,
    delta_video: bool,
    audio_lookahead: usize,
    duplicates: Vec<u32>,
    palette_deltas: Vec<(u32, Vec<u8>)>,
}

impl MovieBuilder {
    pub fn new(width: u32, height: u32, fps: u32, total_frames: u32) -> Self {
        Self {
            width,
            height,
            fps,
            total_frames,
            kf_interval: 1,
            audio: None,
            with_index: true,
            absolute_index: false,
            groups: true,
            delta_video: false,
            audio_lookahead: 0,
            duplicates: Vec::new(),
            palette_deltas: Vec::new(),
        }
    }

    pub fn keyframe_interval(mut self, frames: u32) -> Self {
        self.kf_interval = frames.max(1);
        self
    }

    pub fn audio(mut self, sample_rate: u32, channels: u16) -> Self {
        assert_eq!(sample_rate % self.fps, 0, "builder needs whole samples per frame");
        self.audio = Some((sample_rate, channels));
        self
    }

    pub fn audio_lookahead(mut self, packets: usize) -> Self {
        self.audio_lookahead = packets;
        self
    }

    pub fn without_index(mut self) -> Self {
        self.with_index = false;
        self
    }

    pub fn absolute_index(mut self) -> Self {
        self.absolute_index = true;
        self
    }

    pub fn without_groups(mut self) -> Self {
        self.groups = false;
        self
    }

    pub fn delta_video(mut self) -> Self {
        self.delta_video = true;
        self
    }

    /// Emit an empty frame packet for `frame` (duplicate-previous-frame).
    pub fn duplicate_frame(mut self, frame: u32) -> Self {
        self.duplicates.push(frame);
        self
    }

    /// Emit a palette-change chunk just before `frame`'s video packet.
    pub fn palette_delta(mut self, frame: u32, first: u8, entries: &[[u8; 3]]) -> Self {
        let mut payload = vec![first, entries.len() as u8, 0, 0];
        for rgb in entries {
            payload.extend_from_slice(rgb);
            payload.push(0);
        }
        self.palette_deltas.push((frame, payload));
        self
    }

    pub fn build_movie(&self) -> Movie<Cursor<Vec<u8>>> {
        let cursor = Cursor::new(self.build_bytes());
        if self.delta_video || self.audio_lookahead > 0 {
            Movie::load_with_codecs(
                cursor,
                &TestCodecs {
                    audio_lookahead: self.audio_lookahead,
                },
            )
            .expect("builder output must load")
        } else {
            Movie::load(cursor).expect("builder output must load")
        }
    }

    pub fn build_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&[0; 4]); // patched below
        out.extend_from_slice(b"AVI ");

        out.extend_from_slice(&self.build_hdrl());

        // The movi list; index offsets are measured from the form type.
        let (movi_body, mut index_entries) = self.build_movi_body();
        let movi_base = out.len() as u64 + 8;
        out.extend_from_slice(&list(b"movi", &movi_body));

        if self.with_index {
            if self.absolute_index {
                for entry in &mut index_entries {
                    entry.offset += movi_base as u32;
                }
            }
            let mut idx = Vec::with_capacity(index_entries.len() * 16);
            for entry in &index_entries {
                idx.extend_from_slice(&entry.tag.0);
                idx.extend_from_slice(&entry.flags.to_le_bytes());
                idx.extend_from_slice(&entry.offset.to_le_bytes());
                idx.extend_from_slice(&entry.size.to_le_bytes());
            }
            out.extend_from_slice(&chunk(b"idx1", &idx));
        }

        let riff_size = (out.len() - 8) as u32;
        out[4..8].copy_from_slice(&riff_size.to_le_bytes());
        out
    }

    fn frame_size(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn samples_per_frame(&self) -> usize {
        self.audio
            .map(|(rate, _)| (rate / self.fps) as usize)
            .unwrap_or(0)
    }

    fn build_hdrl(&self) -> Vec<u8> {
        let mut avih = Vec::new();
        push_u32(&mut avih, 1_000_000 / self.fps); // us_per_frame
        push_u32(&mut avih, 0); // max_bytes_per_sec
        push_u32(&mut avih, 0); // padding_granularity
        push_u32(&mut avih, 0); // flags
        push_u32(&mut avih, self.total_frames);
        push_u32(&mut avih, 0); // initial_frames
        push_u32(&mut avih, 1 + u32::from(self.audio.is_some()));
        push_u32(&mut avih, 0); // suggested_buffer_size
        push_u32(&mut avih, self.width);
        push_u32(&mut avih, self.height);
        avih.extend_from_slice(&[0; 16]); // reserved

        let compression = if self.delta_video { DLTA } else { BI_RGB };
        let video_strl = list(
            b"strl",
            &[
                chunk(b"strh", &self.strh(b"vids", 1, self.fps, self.total_frames)),
                chunk(b"strf", &self.video_strf(compression)),
            ]
            .concat(),
        );

        let mut body = [chunk(b"avih", &avih), video_strl].concat();

        if let Some((rate, channels)) = self.audio {
            let audio_strl = list(
                b"strl",
                &[
                    chunk(b"strh", &self.strh(b"auds", 1, rate, 0)),
                    chunk(b"strf", &audio_strf(rate, channels)),
                ]
                .concat(),
            );
            body.extend_from_slice(&audio_strl);
        }

        list(b"hdrl", &body)
    }

    fn strh(&self, fcc_type: &[u8; 4], scale: u32, rate: u32, length: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(fcc_type);
        out.extend_from_slice(&[0; 4]); // handler
        push_u32(&mut out, 0); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // priority
        out.extend_from_slice(&0u16.to_le_bytes()); // language
        push_u32(&mut out, 0); // initial_frames
        push_u32(&mut out, scale);
        push_u32(&mut out, rate);
        push_u32(&mut out, 0); // start
        push_u32(&mut out, length);
        push_u32(&mut out, 0); // suggested_buffer_size
        push_u32(&mut out, 0); // quality
        push_u32(&mut out, 0); // sample_size
        out.extend_from_slice(&[0; 8]); // destination rectangle
        out
    }

    fn video_strf(&self, compression: FourCc) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, 40); // bih_size
        push_u32(&mut out, self.width);
        push_u32(&mut out, self.height);
        out.extend_from_slice(&1u16.to_le_bytes()); // planes
        out.extend_from_slice(&8u16.to_le_bytes()); // bit_count
        out.extend_from_slice(&compression.0);
        push_u32(&mut out, self.frame_size() as u32);
        push_u32(&mut out, 0); // xppm
        push_u32(&mut out, 0); // yppm
        push_u32(&mut out, 0); // colors_used
        push_u32(&mut out, 0); // colors_important
        out
    }

    fn video_payload(&self, frame: u32) -> Vec<u8> {
        if self.duplicates.contains(&frame) {
            return Vec::new();
        }
        let fill = frame as u8;
        if self.delta_video {
            if frame % self.kf_interval == 0 {
                let mut payload = vec![1u8];
                payload.extend(std::iter::repeat(fill).take(self.frame_size()));
                payload
            } else {
                // Each delta adds one to every pixel of the previous frame.
                let mut payload = vec![2u8];
                payload.extend(std::iter::repeat(1u8).take(self.frame_size()));
                payload
            }
        } else {
            vec![fill; self.frame_size()]
        }
    }

    fn audio_payload(&self, frame: u32) -> Vec<u8> {
        let (_, channels) = self.audio.expect("audio stream configured");
        let spf = self.samples_per_frame();
        let mut out = Vec::with_capacity(spf * channels as usize * 2);
        for i in 0..spf {
            let sample = ((frame as u64 * spf as u64 + i as u64) & 0x7fff) as i16;
            for _ in 0..channels {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out
    }

    /// Movie-data body plus index entries with movi-relative offsets.
    fn build_movi_body(&self) -> (Vec<u8>, Vec<RawIndexEntry>) {
        let mut body = Vec::new();
        let mut entries = Vec::new();

        for frame in 0..self.total_frames {
            let mut children = Vec::new();
            let mut child_entries: Vec<RawIndexEntry> = Vec::new();

            for (_, payload) in self.palette_deltas.iter().filter(|(f, _)| *f == frame) {
                append_child(&mut children, &mut child_entries, *b"00pc", 0, payload);
            }
            let keyframe = if frame % self.kf_interval == 0 {
                crate::index::INDEX_FLAG_KEYFRAME
            } else {
                0
            };
            append_child(
                &mut children,
                &mut child_entries,
                *b"00dc",
                keyframe,
                &self.video_payload(frame),
            );
            if self.audio.is_some() {
                append_child(
                    &mut children,
                    &mut child_entries,
                    *b"01wb",
                    0,
                    &self.audio_payload(frame),
                );
            }

            if self.groups {
                let rec_offset = 4 + body.len() as u32;
                entries.push(RawIndexEntry {
                    tag: crate::fourcc::REC_,
                    flags: crate::index::INDEX_FLAG_LIST,
                    offset: rec_offset,
                    size: 4 + children.len() as u32,
                });
                for child in child_entries {
                    entries.push(RawIndexEntry {
                        offset: rec_offset + 12 + child.offset,
                        ..child
                    });
                }
                body.extend_from_slice(&list(b"rec ", &children));
            } else {
                let base = 4 + body.len() as u32;
                for child in child_entries {
                    entries.push(RawIndexEntry {
                        offset: base + child.offset,
                        ..child
                    });
                }
                body.extend_from_slice(&children);
            }
        }

        (body, entries)
    }
}

#[derive(Clone, Copy)]
struct RawIndexEntry {
    tag: FourCc,
    flags: u32,
    offset: u32,
    size: u32,
}

fn append_child(
    children: &mut Vec<u8>,
    entries: &mut Vec<RawIndexEntry>,
    tag: [u8; 4],
    flags: u32,
    payload: &[u8],
) {
    entries.push(RawIndexEntry {
        tag: FourCc(tag),
        flags,
        offset: children.len() as u32,
        size: payload.len() as u32,
    });
    children.extend_from_slice(&chunk(&tag, payload));
}

fn audio_strf(rate: u32, channels: u16) -> Vec<u8> {
    let block_align = channels * 2;
    let mut out = Vec::new();
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    push_u32(&mut out, rate);
    push_u32(&mut out, rate * u32::from(block_align));
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes()); // bits_per_sample
    out
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len() + 1);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn list(form: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(form);
    payload.extend_from_slice(body);
    chunk(b"LIST", &payload)
}

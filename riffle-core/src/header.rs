//! Header-list parsing: container header, stream descriptors, timing.

use serde::Serialize;

use crate::chunk::{Chunk, ChunkReader};
use crate::container::LoadError;
use crate::fourcc::{FourCc, AUDS, AVIH, LIST, STRF, STRH, STRL, STRN, VIDS};

/// Frames per second as an exact ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Video frame index shown at `seconds`: `floor(t * fps)`.
    pub fn frame_for_time(&self, seconds: f64) -> u32 {
        let frame = (seconds * self.as_f64()).floor();
        if frame < 0.0 {
            0
        } else {
            frame as u32
        }
    }

    /// Start time of `frame` in seconds.
    pub fn time_for_frame(&self, frame: u32) -> f64 {
        f64::from(frame) * f64::from(self.den) / f64::from(self.num)
    }

    /// Number of audio sample frames elapsed at the start of video `frame`,
    /// computed in integer math: `floor(frame * den * rate / num)`.
    pub fn samples_before_frame(&self, frame: u32, sample_rate: u32) -> u64 {
        u64::from(frame) * u64::from(self.den) * u64::from(sample_rate) / u64::from(self.num)
    }
}

/// Container-wide metadata. Immutable after parse.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerHeader {
    pub frame_rate: Rational,
    pub total_frames: u32,
    pub width: u32,
    pub height: u32,
    pub stream_count: u32,
    /// Informational; the authoritative rate is `frame_rate`.
    pub us_per_frame: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoDescriptor {
    pub codec: FourCc,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u16,
    pub compression: FourCc,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioDescriptor {
    pub format_tag: u16,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub name: Option<String>,
}

/// Per-stream metadata. Immutable after parse; one per `strl` list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamDescriptor {
    Video(VideoDescriptor),
    Audio(AudioDescriptor),
    Unsupported { fcc_type: FourCc },
}

/// Raw `strh` timing fields a descriptor does not carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamTiming {
    pub scale: u32,
    pub rate: u32,
    pub length: u32,
}

#[derive(Debug)]
pub struct ParsedStream {
    pub descriptor: StreamDescriptor,
    pub timing: StreamTiming,
    /// Load-time palette from the `strf` RGBQUAD table, when present.
    pub initial_palette: Option<Box<[u8; 768]>>,
}

#[derive(Debug)]
pub struct ParsedHeader {
    pub header: ContainerHeader,
    pub streams: Vec<ParsedStream>,
}

// ============================================================================
// hdrl Parsing
// ============================================================================

/// Parse the `hdrl` list whose header (and form type) was just consumed.
pub fn parse_hdrl<R: std::io::Read + std::io::Seek>(
    reader: &mut ChunkReader<R>,
    list: &Chunk,
) -> Result<ParsedHeader, LoadError> {
    let end = list.end().min(reader.len());

    let mut main: Option<MainHeader> = None;
    let mut streams = Vec::new();

    while reader.position()? + 8 <= end {
        let chunk = reader.next_chunk()?;
        if chunk.tag == AVIH {
            main = Some(parse_avih(reader, &chunk)?);
        } else if chunk.tag == LIST {
            let form = reader.enter_list()?;
            if form == STRL {
                streams.push(parse_strl(reader, &chunk, streams.len())?);
            } else {
                reader.seek_to(chunk.end().min(reader.len()))?;
            }
        } else {
            reader.skip_chunk(&chunk)?;
        }
    }
    // Land exactly on the list boundary even if trailing junk cut the loop
    // short; the caller keeps walking chunks from here.
    reader.seek_to(end)?;

    let main = main.ok_or(LoadError::MissingHeader)?;

    if main.streams as usize != streams.len() {
        tracing::warn!(
            declared = main.streams,
            found = streams.len(),
            "stream count mismatch between main header and stream lists"
        );
    }

    // The authoritative frame rate is the video stream's rate/scale rational.
    let frame_rate = streams
        .iter()
        .find(|s| matches!(s.descriptor, StreamDescriptor::Video(_)))
        .map(|s| Rational {
            num: s.timing.rate.max(1),
            den: s.timing.scale.max(1),
        })
        .unwrap_or(Rational { num: 1, den: 1 });

    Ok(ParsedHeader {
        header: ContainerHeader {
            frame_rate,
            total_frames: main.total_frames,
            width: main.width,
            height: main.height,
            stream_count: streams.len() as u32,
            us_per_frame: main.us_per_frame,
        },
        streams,
    })
}

#[derive(Debug, Clone, Copy)]
struct MainHeader {
    us_per_frame: u32,
    total_frames: u32,
    streams: u32,
    width: u32,
    height: u32,
}

fn parse_avih<R: std::io::Read + std::io::Seek>(
    reader: &mut ChunkReader<R>,
    chunk: &Chunk,
) -> Result<MainHeader, LoadError> {
    let us_per_frame = reader.read_u32()?;
    let _max_bytes_per_sec = reader.read_u32()?;
    let _padding_granularity = reader.read_u32()?;
    let _flags = reader.read_u32()?;
    let total_frames = reader.read_u32()?;
    let _initial_frames = reader.read_u32()?;
    let streams = reader.read_u32()?;
    let _suggested_buffer_size = reader.read_u32()?;
    let width = reader.read_u32()?;
    let height = reader.read_u32()?;
    // Four reserved words follow; sizes vary between writers, so skip by
    // chunk bounds rather than a fixed count.
    reader.seek_to(chunk.end().min(reader.len()))?;

    Ok(MainHeader {
        us_per_frame,
        total_frames,
        streams,
        width,
        height,
    })
}

fn parse_strl<R: std::io::Read + std::io::Seek>(
    reader: &mut ChunkReader<R>,
    list: &Chunk,
    stream_index: usize,
) -> Result<ParsedStream, LoadError> {
    let end = list.end().min(reader.len());

    let mut fcc_type = FourCc([0; 4]);
    let mut handler = FourCc([0; 4]);
    let mut timing = StreamTiming::default();
    let mut name: Option<String> = None;
    let mut video: Option<VideoDescriptor> = None;
    let mut audio: Option<AudioDescriptor> = None;
    let mut initial_palette: Option<Box<[u8; 768]>> = None;

    while reader.position()? + 8 <= end {
        let chunk = reader.next_chunk()?;
        if chunk.tag == STRH {
            fcc_type = reader.read_tag()?;
            handler = reader.read_tag()?;
            let _flags = reader.read_u32()?;
            let _priority = reader.read_u16()?;
            let _language = reader.read_u16()?;
            let _initial_frames = reader.read_u32()?;
            timing.scale = reader.read_u32()?;
            timing.rate = reader.read_u32()?;
            let _start = reader.read_u32()?;
            timing.length = reader.read_u32()?;
            reader.seek_to(chunk.end().min(reader.len()))?;
        } else if chunk.tag == STRF {
            if fcc_type == VIDS {
                let (desc, palette) = parse_video_format(reader, &chunk, handler)?;
                video = Some(desc);
                initial_palette = palette;
            } else if fcc_type == AUDS {
                audio = Some(parse_audio_format(reader, &chunk)?);
            } else {
                reader.skip_chunk(&chunk)?;
            }
        } else if chunk.tag == STRN {
            let raw = reader.read_payload(&chunk)?;
            let trimmed = match raw.iter().position(|&b| b == 0) {
                Some(pos) => &raw[..pos],
                None => &raw[..],
            };
            name = String::from_utf8(trimmed.to_vec()).ok();
        } else {
            reader.skip_chunk(&chunk)?;
        }
    }
    reader.seek_to(end)?;

    let descriptor = if let Some(mut desc) = video {
        desc.name = name;
        StreamDescriptor::Video(desc)
    } else if let Some(mut desc) = audio {
        desc.name = name;
        StreamDescriptor::Audio(desc)
    } else {
        tracing::debug!(stream = stream_index, %fcc_type, "unsupported stream type");
        StreamDescriptor::Unsupported { fcc_type }
    };

    Ok(ParsedStream {
        descriptor,
        timing,
        initial_palette,
    })
}

/// BITMAPINFOHEADER, optionally followed by an RGBQUAD palette.
fn parse_video_format<R: std::io::Read + std::io::Seek>(
    reader: &mut ChunkReader<R>,
    chunk: &Chunk,
    handler: FourCc,
) -> Result<(VideoDescriptor, Option<Box<[u8; 768]>>), LoadError> {
    let _bih_size = reader.read_u32()?;
    let width = reader.read_u32()?;
    let height = reader.read_u32()? as i32;
    let _planes = reader.read_u16()?;
    let bit_depth = reader.read_u16()?;
    let compression = reader.read_tag()?;
    let _image_size = reader.read_u32()?;
    let _xppm = reader.read_u32()?;
    let _yppm = reader.read_u32()?;
    let colors_used = reader.read_u32()?;
    let _colors_important = reader.read_u32()?;

    let mut palette = None;
    if bit_depth <= 8 {
        let declared = if colors_used == 0 { 256 } else { colors_used as usize };
        let available = ((chunk.end().min(reader.len()))
            .saturating_sub(reader.position()?)
            / 4) as usize;
        let count = declared.min(available).min(256);
        if count > 0 {
            let mut pal = Box::new([0u8; 768]);
            for i in 0..count {
                // RGBQUAD is stored blue, green, red, reserved.
                let mut quad = [0u8; 4];
                reader.read_exact(&mut quad)?;
                pal[i * 3] = quad[2];
                pal[i * 3 + 1] = quad[1];
                pal[i * 3 + 2] = quad[0];
            }
            palette = Some(pal);
        }
    }
    reader.seek_to(chunk.end().min(reader.len()))?;

    Ok((
        VideoDescriptor {
            codec: handler,
            width,
            height: height.unsigned_abs(),
            bit_depth,
            compression,
            name: None,
        },
        palette,
    ))
}

/// WAVEFORMATEX prefix; anything past `bits_per_sample` is codec extra data.
fn parse_audio_format<R: std::io::Read + std::io::Seek>(
    reader: &mut ChunkReader<R>,
    chunk: &Chunk,
) -> Result<AudioDescriptor, LoadError> {
    let format_tag = reader.read_u16()?;
    let channels = reader.read_u16()?;
    let sample_rate = reader.read_u32()?;
    let _avg_bytes_per_sec = reader.read_u32()?;
    let block_align = reader.read_u16()?;
    let bits_per_sample = reader.read_u16()?;
    reader.seek_to(chunk.end().min(reader.len()))?;

    Ok(AudioDescriptor {
        format_tag,
        sample_rate,
        channels,
        bits_per_sample,
        block_align,
        name: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_frame_math() {
        let fps = Rational { num: 15, den: 1 };
        assert_eq!(fps.frame_for_time(0.0), 0);
        assert_eq!(fps.frame_for_time(3.0), 45);
        assert_eq!(fps.frame_for_time(2.999), 44);
        assert!((fps.time_for_frame(45) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rational_ntsc_rate() {
        let fps = Rational {
            num: 30_000,
            den: 1_001,
        };
        // One frame shy of a second boundary must not round up.
        assert_eq!(fps.frame_for_time(fps.time_for_frame(29) + 1e-6), 29);
    }

    #[test]
    fn test_samples_before_frame() {
        let fps = Rational { num: 15, den: 1 };
        assert_eq!(fps.samples_before_frame(45, 22_050), 66_150);
        assert_eq!(fps.samples_before_frame(0, 22_050), 0);
    }
}

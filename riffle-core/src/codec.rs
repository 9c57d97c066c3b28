//! Codec collaborator traits and the built-in raw codecs.
//!
//! The demuxer never touches pixels or sample math itself; it hands packet
//! payloads to these traits. Real codecs (RLE flavors, ADPCM families,
//! vendor FourCC codecs) live outside this crate and are injected through
//! [`CodecFactory`]. The built-ins cover the uncompressed cases so the crate
//! is usable end-to-end on its own.

use thiserror::Error;

use crate::container::LoadError;
use crate::fourcc::{FourCc, BI_RGB};
use crate::header::{AudioDescriptor, VideoDescriptor};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("packet too short: {got} bytes, need {need}")]
    ShortPacket { got: usize, need: usize },
    #[error("codec rejected packet: {0}")]
    Malformed(String),
}

/// Pixel format of a decoded frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PixelFormat {
    /// Palette-indexed, one byte per pixel.
    Pal8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Pal8 => 1,
        }
    }
}

/// Decodes one video packet into the caller-owned frame buffer.
///
/// Most codecs in this family are differential: `decode` mutates internal
/// state relative to the previous call, which is why seeking replays from a
/// keyframe instead of decoding backwards.
pub trait VideoDecoder {
    fn decode(&mut self, data: &[u8], frame: &mut [u8]) -> Result<(), CodecError>;

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Pal8
    }

    /// Drop all cross-frame state.
    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Decodes one audio packet, appending interleaved PCM to `out`.
pub trait AudioDecoder {
    fn decode(&mut self, data: &[u8], out: &mut Vec<i16>) -> Result<(), CodecError>;

    /// Encoder pipeline delay in packets. During a seek the engine replays
    /// this many packets before the resume point to warm the decoder up.
    fn lookahead_packets(&self) -> usize {
        0
    }

    /// Drop cross-packet history (predictor state and the like).
    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

// ============================================================================
// Built-in Codecs
// ============================================================================

/// Uncompressed palette-indexed frames (BI_RGB, 8-bit). An exact-size copy;
/// frames are stored top-down with no row padding.
pub struct RawVideo;

impl VideoDecoder for RawVideo {
    fn decode(&mut self, data: &[u8], frame: &mut [u8]) -> Result<(), CodecError> {
        if data.len() < frame.len() {
            return Err(CodecError::ShortPacket {
                got: data.len(),
                need: frame.len(),
            });
        }
        frame.copy_from_slice(&data[..frame.len()]);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "raw8"
    }
}

/// Uncompressed PCM: unsigned 8-bit or signed little-endian 16-bit.
pub struct RawPcm {
    bits_per_sample: u16,
}

impl RawPcm {
    pub fn new(bits_per_sample: u16) -> Self {
        Self { bits_per_sample }
    }
}

impl AudioDecoder for RawPcm {
    fn decode(&mut self, data: &[u8], out: &mut Vec<i16>) -> Result<(), CodecError> {
        match self.bits_per_sample {
            8 => {
                out.extend(data.iter().map(|&b| (i16::from(b) - 128) << 8));
            }
            16 => {
                out.extend(
                    data.chunks_exact(2)
                        .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
                );
            }
            other => {
                return Err(CodecError::Malformed(format!(
                    "unsupported PCM width: {other} bits"
                )))
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pcm"
    }
}

// ============================================================================
// Factory
// ============================================================================

/// WAVEFORMATEX tag for plain PCM.
pub const WAVE_FORMAT_PCM: u16 = 0x0001;

/// Resolves stream descriptors to decoder instances. Implement this to plug
/// external codecs in via `Movie::load_with_codecs`.
pub trait CodecFactory {
    fn video(&self, desc: &VideoDescriptor) -> Result<Box<dyn VideoDecoder>, LoadError>;
    fn audio(&self, desc: &AudioDescriptor) -> Result<Box<dyn AudioDecoder>, LoadError>;
}

/// The built-in codec set: uncompressed video and PCM audio only.
pub struct DefaultCodecs;

impl CodecFactory for DefaultCodecs {
    fn video(&self, desc: &VideoDescriptor) -> Result<Box<dyn VideoDecoder>, LoadError> {
        match desc.compression {
            BI_RGB => Ok(Box::new(RawVideo)),
            other => Err(LoadError::UnsupportedCodec(other)),
        }
    }

    fn audio(&self, desc: &AudioDescriptor) -> Result<Box<dyn AudioDecoder>, LoadError> {
        match desc.format_tag {
            WAVE_FORMAT_PCM => Ok(Box::new(RawPcm::new(desc.bits_per_sample))),
            other => Err(LoadError::UnsupportedCodec(FourCc([
                (other & 0xff) as u8,
                (other >> 8) as u8,
                0,
                0,
            ]))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_video_copies_frame() {
        let mut frame = vec![0u8; 4];
        RawVideo.decode(&[1, 2, 3, 4, 99], &mut frame).unwrap();
        assert_eq!(frame, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_raw_video_rejects_short_packet() {
        let mut frame = vec![0u8; 4];
        let err = RawVideo.decode(&[1, 2], &mut frame).unwrap_err();
        assert!(matches!(err, CodecError::ShortPacket { got: 2, need: 4 }));
    }

    #[test]
    fn test_pcm_16_bit() {
        let mut out = Vec::new();
        RawPcm::new(16)
            .decode(&[0x01, 0x00, 0xff, 0xff], &mut out)
            .unwrap();
        assert_eq!(out, vec![1, -1]);
    }

    #[test]
    fn test_pcm_8_bit_centering() {
        let mut out = Vec::new();
        RawPcm::new(8).decode(&[128, 255, 0], &mut out).unwrap();
        assert_eq!(out[0], 0);
        assert!(out[1] > 0 && out[2] < 0);
    }
}

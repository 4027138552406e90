//! Audio transcoding between the carrier leg and the engine leg.
//!
//! The carrier always speaks μ-law at 8 kHz in 20 ms frames. The engine is
//! configured per deployment through [`AudioMode`]:
//!
//! - [`AudioMode::Passthrough`]: the engine accepts and emits `g711_ulaw`, so
//!   payload bytes cross the bridge untouched. This is the preferred mode.
//! - [`AudioMode::Transcode`]: the engine speaks little-endian PCM16 at a
//!   higher rate; every frame is companded and resampled.
//!
//! The mode is a configuration decision made before the call starts, never
//! inferred from the first frame.

pub mod mulaw;
pub mod resample;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Carrier sample rate (Hz).
pub const CARRIER_SAMPLE_RATE: u32 = 8_000;

/// Frame duration on both legs.
pub const FRAME_MS: u32 = 20;

/// Bytes in one 20 ms μ-law carrier frame.
pub const CARRIER_FRAME_BYTES: usize = (CARRIER_SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// How engine-side audio is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioMode {
    /// Engine uses μ-law 8 kHz, identical to the carrier.
    #[default]
    Passthrough,
    /// Engine uses PCM16LE at `engine_rate` Hz (an integer multiple of 8 kHz).
    Transcode { engine_rate: u32 },
}

impl AudioMode {
    /// Wire name of the engine audio format for the session-init message.
    pub fn engine_format(self) -> &'static str {
        match self {
            Self::Passthrough => "g711_ulaw",
            Self::Transcode { .. } => "pcm16",
        }
    }

    /// Engine samples per carrier sample, if the ratio is a positive integer.
    pub fn rate_factor(self) -> Option<usize> {
        match self {
            Self::Passthrough => Some(1),
            Self::Transcode { engine_rate } => {
                if engine_rate >= CARRIER_SAMPLE_RATE && engine_rate % CARRIER_SAMPLE_RATE == 0 {
                    Some((engine_rate / CARRIER_SAMPLE_RATE) as usize)
                } else {
                    None
                }
            }
        }
    }

    /// Bytes in one 20 ms engine frame.
    pub fn engine_frame_bytes(self) -> usize {
        match self {
            Self::Passthrough => CARRIER_FRAME_BYTES,
            Self::Transcode { engine_rate } => (engine_rate * FRAME_MS / 1000) as usize * 2,
        }
    }
}

/// Converter for one configured [`AudioMode`], owned by one session.
///
/// The caller direction is stateless: every carrier frame is converted on
/// its own. The engine direction keeps the downsampler's window and any odd
/// trailing byte between chunks, so arbitrary delta sizes neither stretch
/// nor shorten playback.
#[derive(Debug, Clone)]
pub struct Transcoder {
    mode: AudioMode,
    factor: usize,
    downsampler: resample::Downsampler,
    /// First byte of a PCM16 sample split across engine chunks.
    carry_byte: Option<u8>,
}

impl Transcoder {
    /// Build a transcoder; fails if the engine rate is not an integer
    /// multiple of the carrier rate.
    pub fn new(mode: AudioMode) -> anyhow::Result<Self> {
        let factor = mode.rate_factor().ok_or_else(|| {
            anyhow::anyhow!(
                "engine audio rate must be a positive multiple of {CARRIER_SAMPLE_RATE} Hz: {mode:?}"
            )
        })?;
        Ok(Self {
            mode,
            factor,
            downsampler: resample::Downsampler::new(factor),
            carry_byte: None,
        })
    }

    pub fn mode(&self) -> AudioMode {
        self.mode
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.mode, AudioMode::Passthrough)
    }

    /// Carrier μ-law bytes → engine bytes.
    pub fn to_engine_format(&self, carrier: &[u8]) -> Vec<u8> {
        if self.is_passthrough() {
            return carrier.to_vec();
        }
        let linear = mulaw::decode(carrier);
        let upsampled = resample::upsample(&linear, self.factor);
        pcm16_to_bytes(&upsampled)
    }

    /// Engine bytes → carrier μ-law bytes, continuing the current response.
    pub fn to_carrier_format(&mut self, engine: &[u8]) -> Vec<u8> {
        if self.is_passthrough() {
            return engine.to_vec();
        }
        let mut bytes = Vec::with_capacity(engine.len() + 1);
        bytes.extend(self.carry_byte.take());
        bytes.extend_from_slice(engine);
        if bytes.len() % 2 != 0 {
            self.carry_byte = bytes.pop();
        }
        let linear = bytes_to_pcm16(&bytes);
        let downsampled = self.downsampler.push(&linear);
        mulaw::encode(&downsampled)
    }

    /// End of a response: carrier bytes still held back for the
    /// downsampling window. A dangling half sample is discarded.
    pub fn finish_carrier(&mut self) -> Vec<u8> {
        if self.carry_byte.take().is_some() {
            tracing::debug!("Dropping trailing odd byte of engine PCM16 stream");
        }
        mulaw::encode(&self.downsampler.flush())
    }

    /// Playback was interrupted: forget held-back engine audio.
    pub fn reset_carrier(&mut self) {
        self.carry_byte = None;
        self.downsampler.reset();
    }

    /// Bytes in one frame on the engine leg.
    pub fn engine_frame_bytes(&self) -> usize {
        self.mode.engine_frame_bytes()
    }
}

/// Split `buffer` into full `frame_size` frames plus one trailing partial
/// frame. Nothing is padded and nothing is dropped.
pub fn rechunk(buffer: &[u8], frame_size: usize) -> Vec<&[u8]> {
    if frame_size == 0 {
        return vec![buffer];
    }
    buffer.chunks(frame_size).collect()
}

fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

//! G.711 μ-law companding (8-bit logarithmic ↔ 16-bit linear).

/// Bias added before segment search, per G.711.
const BIAS: i32 = 0x84;

/// Largest magnitude that survives biasing without overflowing 15 bits.
const CLIP: i32 = 32_635;

/// μ-law code for digital silence.
pub const SILENCE: u8 = 0xFF;

/// Decode one μ-law code to a linear 16-bit sample.
pub fn decode_sample(code: u8) -> i16 {
    let code = !code;
    let sign = code & 0x80;
    let exponent = (code >> 4) & 0x07;
    let mantissa = i32::from(code & 0x0F);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    let sample = if sign != 0 { -magnitude } else { magnitude };
    // Max magnitude is 32124, always within i16.
    sample as i16
}

/// Encode one linear 16-bit sample to μ-law.
pub fn encode_sample(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0x00
    };

    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode a μ-law buffer to linear samples.
pub fn decode(codes: &[u8]) -> Vec<i16> {
    codes.iter().map(|&c| decode_sample(c)).collect()
}

/// Encode linear samples to a μ-law buffer.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

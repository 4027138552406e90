//! Integer-ratio sample-rate conversion between the carrier rate and the
//! engine rate.
//!
//! Upsampling linearly interpolates toward the next input sample; past the
//! last sample it continues the slope of the final pair. Downsampling
//! averages the run of high-rate samples centred on each aligned position.
//! Where that run would reach outside the signal the aligned sample is taken
//! as is, since upsampling put every original sample there. This is a cheap
//! low-pass, not a polyphase filter; voice-band energy sits well below either
//! Nyquist limit.

/// Expand `samples` by `factor`: output length is `samples.len() * factor`
/// and every input sample reappears at index `i * factor`.
pub fn upsample(samples: &[i16], factor: usize) -> Vec<i16> {
    if factor <= 1 {
        return samples.to_vec();
    }

    let span = factor as i32;
    let mut out = Vec::with_capacity(samples.len() * factor);
    for (i, &current) in samples.iter().enumerate() {
        let current = i32::from(current);
        let next = match samples.get(i + 1) {
            Some(&next) => i32::from(next),
            None if i > 0 => 2 * current - i32::from(samples[i - 1]),
            None => current,
        };
        for step in 0..span {
            let value = (current * (span - step) + next * step) / span;
            out.push(value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16);
        }
    }
    out
}

/// Reduce `samples` by `factor` in one go: output length is
/// `ceil(len / factor)`.
pub fn downsample(samples: &[i16], factor: usize) -> Vec<i16> {
    let mut downsampler = Downsampler::new(factor);
    let mut out = downsampler.push(samples);
    out.extend(downsampler.flush());
    out
}

/// Streaming downsampler for audio that arrives in arbitrary chunks.
///
/// Output sample `k` sits at input position `k * factor` of the whole
/// stream and is the rounded mean of `[k*factor - factor/2, k*factor +
/// factor/2]`. A position is emitted once its window is complete, so chunk
/// boundaries never add or lose samples.
#[derive(Debug, Clone)]
pub struct Downsampler {
    factor: usize,
    /// Unconsumed tail of the stream, starting at the next window.
    pending: Vec<i16>,
    /// Index of the next aligned position within `pending`.
    next_centre: usize,
}

impl Downsampler {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            pending: Vec::new(),
            next_centre: 0,
        }
    }

    /// Feed the next chunk; returns every output sample now complete.
    pub fn push(&mut self, samples: &[i16]) -> Vec<i16> {
        if self.factor == 1 {
            return samples.to_vec();
        }

        let half = self.factor / 2;
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(samples);

        let mut out = Vec::with_capacity(buf.len() / self.factor + 1);
        let mut centre = self.next_centre;
        while centre + half < buf.len() {
            out.push(window_mean(&buf, centre, half));
            centre += self.factor;
        }

        let keep_from = centre.saturating_sub(half).min(buf.len());
        self.next_centre = centre - keep_from;
        self.pending = buf.split_off(keep_from);
        out
    }

    /// Emit the positions still waiting for their right-hand neighbours and
    /// start over.
    pub fn flush(&mut self) -> Vec<i16> {
        let mut out = Vec::new();
        let mut centre = self.next_centre;
        while centre < self.pending.len() {
            out.push(self.pending[centre]);
            centre += self.factor;
        }
        self.reset();
        out
    }

    /// Discard buffered input.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_centre = 0;
    }
}

fn window_mean(samples: &[i16], centre: usize, half: usize) -> i16 {
    if centre < half || centre + half >= samples.len() {
        return samples[centre];
    }
    let window = &samples[centre - half..=centre + half];
    let sum: i64 = window.iter().map(|&s| i64::from(s)).sum();
    let count = window.len() as i64;
    // Round half away from zero.
    let mean = if sum >= 0 {
        (sum + count / 2) / count
    } else {
        (sum - count / 2) / count
    };
    mean as i16
}

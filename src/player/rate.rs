//! Sample rate conversion with rubato.
//!
//! The output device rarely runs at the file's rate (44.1 kHz files on a
//! 48 kHz device is the common case), so decoded audio is converted before
//! it reaches the output stream.

use rubato::{FftFixedIn, Resampler};

const CHUNK_FRAMES: usize = 1024;

/// Interleaved-in, interleaved-out rate converter.
pub struct RateConverter {
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Per-channel samples waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Passes audio through untouched when the rates match or rubato can't
    /// handle the pair.
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Self {
        let channels = usize::from(channels.max(1));
        let inner = if input_rate == output_rate {
            None
        } else {
            match FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            ) {
                Ok(resampler) => {
                    tracing::info!(input_rate, output_rate, channels, "Resampling enabled");
                    Some(resampler)
                }
                Err(e) => {
                    tracing::warn!(
                        input_rate,
                        output_rate,
                        error = %e,
                        "Resampler unavailable, playing at source rate"
                    );
                    None
                }
            }
        };

        Self {
            inner,
            input_rate,
            output_rate,
            channels,
            pending: vec![Vec::new(); channels],
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Convert interleaved samples. May return fewer frames than a full
    /// conversion would while samples wait for a complete chunk.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return input.to_vec();
        };

        for (i, &sample) in input.iter().enumerate() {
            self.pending[i % self.channels].push(sample);
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_FRAMES).collect())
                .collect();
            match inner.process(&chunk, None) {
                Ok(converted) => interleave_into(&converted, usize::MAX, &mut output),
                Err(e) => tracing::warn!(error = %e, "Resampling failed, dropping chunk"),
            }
        }
        output
    }

    /// Drain whatever is still buffered, padding the last chunk with silence.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(inner) = self.inner.as_mut() else {
            return Vec::new();
        };
        let remaining = self.pending[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut padded = std::mem::take(channel);
                padded.resize(CHUNK_FRAMES, 0.0);
                padded
            })
            .collect();

        let expected =
            (remaining as f64 * self.output_rate as f64 / self.input_rate as f64).ceil() as usize;
        let mut output = Vec::new();
        match inner.process(&chunk, None) {
            Ok(converted) => interleave_into(&converted, expected, &mut output),
            Err(e) => tracing::warn!(error = %e, "Resampling flush failed"),
        }
        output
    }

    /// Forget buffered audio, e.g. after a seek.
    pub fn reset(&mut self) {
        self.pending.iter_mut().for_each(Vec::clear);
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}

fn interleave_into(planes: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let frames = planes.first().map_or(0, Vec::len).min(max_frames);
    output.reserve(frames * planes.len());
    for frame in 0..frames {
        output.extend(planes.iter().map(|plane| plane[frame]));
    }
}

/// Map interleaved audio from one channel count to another.
///
/// Mono is duplicated to every output channel; extra source channels are
/// dropped; missing ones repeat the last source channel.
pub fn remap_channels(input: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }
    let mut output = Vec::with_capacity(input.len() / from * to);
    for frame in input.chunks_exact(from) {
        output.extend((0..to).map(|ch| frame[ch.min(from - 1)]));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut converter = RateConverter::new(48_000, 48_000, 2);
        assert!(!converter.is_active());
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(converter.process(&input), input);
        assert!(converter.flush().is_empty());
    }

    #[test]
    fn test_converts_between_rates() {
        let mut converter = RateConverter::new(44_100, 48_000, 2);
        assert!(converter.is_active());
        assert!((converter.ratio() - 48_000.0 / 44_100.0).abs() < 1e-4);

        let input = vec![0.0; CHUNK_FRAMES * 2 * 4];
        let mut output = converter.process(&input);
        output.extend(converter.flush());
        assert_eq!(output.len() % 2, 0);
        assert!(output.len() > input.len());
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut converter = RateConverter::new(44_100, 48_000, 1);
        converter.process(&[0.5; 100]);
        converter.reset();
        assert!(converter.flush().is_empty());
    }

    #[test]
    fn test_remap_channels() {
        assert_eq!(remap_channels(&[0.5, -0.5], 1, 2), vec![0.5, 0.5, -0.5, -0.5]);
        assert_eq!(remap_channels(&[0.1, 0.2, 0.3, 0.4], 2, 1), vec![0.1, 0.3]);
        assert_eq!(remap_channels(&[0.1, 0.2], 2, 2), vec![0.1, 0.2]);
    }
}

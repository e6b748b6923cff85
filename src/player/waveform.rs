//! Waveform resampling for the bar visualizer.
//!
//! A raw capture is a variable-length buffer of signed 8-bit samples. The
//! visualizer wants a fixed number of bars, so the capture is split into
//! `resolution` contiguous groups and each bar is the truncated mean of the
//! absolute sample values in its group.

/// Upper bound of a bar magnitude.
pub const MAX_MAGNITUDE: u32 = 127;

/// One raw waveform buffer as delivered by the capture facility.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaveformCapture {
    /// Signed 8-bit waveform samples
    pub samples: Vec<i8>,
    /// Nominal capture size the samples were requested with
    pub capture_size: usize,
}

impl WaveformCapture {
    pub fn new(samples: Vec<i8>, capture_size: usize) -> Self {
        Self {
            samples,
            capture_size,
        }
    }

    /// Resample this capture into `resolution` bars.
    pub fn resample(&self, resolution: usize) -> VisualizerFrame {
        resample(&self.samples, self.capture_size, resolution)
    }
}

/// Fixed-resolution bar magnitudes, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VisualizerFrame(Vec<u32>);

impl VisualizerFrame {
    /// A frame of `resolution` zero bars.
    pub fn silent(resolution: usize) -> Self {
        Self(vec![0; resolution])
    }

    pub fn bars(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Highest bar in the frame.
    pub fn peak(&self) -> u32 {
        self.0.iter().copied().max().unwrap_or(0)
    }
}

impl From<Vec<u32>> for VisualizerFrame {
    fn from(bars: Vec<u32>) -> Self {
        Self(bars)
    }
}

/// Resample a raw capture into `resolution` bars.
///
/// Groups are `capture_size / resolution` samples wide. A group that runs
/// past the end of `raw` is truncated to the available samples; a group with
/// no samples yields 0. A zero `capture_size` yields a silent frame.
pub fn resample(raw: &[i8], capture_size: usize, resolution: usize) -> VisualizerFrame {
    if capture_size == 0 {
        return VisualizerFrame::silent(resolution);
    }
    let Some(group) = capture_size.checked_div(resolution) else {
        return VisualizerFrame::default();
    };

    let bars = (0..resolution)
        .map(|i| {
            let start = (i * group).min(raw.len());
            let end = ((i + 1) * group).min(raw.len());
            mean_magnitude(&raw[start..end])
        })
        .collect();
    VisualizerFrame(bars)
}

/// Full-scale reference frame: every bar is `resolution * 4`.
pub fn max_processed(resolution: usize) -> VisualizerFrame {
    let ceiling = u32::try_from(resolution.saturating_mul(4)).unwrap_or(u32::MAX);
    VisualizerFrame(vec![ceiling; resolution])
}

fn mean_magnitude(group: &[i8]) -> u32 {
    if group.is_empty() {
        return 0;
    }
    let sum: u64 = group.iter().map(|s| u64::from(s.unsigned_abs())).sum();
    // |-128| is 128; a group made only of -128 still reports full scale.
    let mean = sum / group.len() as u64;
    mean.min(u64::from(MAX_MAGNITUDE)) as u32
}

//! File decoding with symphonia.
//!
//! Handles MP3, FLAC, OGG Vorbis, WAV and AAC. Output is interleaved `f32`
//! at the file's native rate; rate conversion happens in the output stage.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::engine::EngineError;

/// A decoded block of interleaved samples.
#[derive(Debug, Clone)]
pub struct DecodedBlock {
    pub samples: Vec<f32>,
    /// Start of the block within the track
    pub timestamp_ms: u64,
}

/// Decoder for a single audio file.
pub struct TrackDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    time_base: Option<TimeBase>,
}

fn time_to_ms(time: Time) -> u64 {
    time.seconds * 1000 + (time.frac * 1000.0).round() as u64
}

impl TrackDecoder {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path)
            .map_err(|e| EngineError::Source(format!("{}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| EngineError::Decode("Unknown sample rate".to_string()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
        let time_base = params.time_base;

        let duration_ms = match (params.n_frames, time_base) {
            (Some(frames), Some(tb)) => time_to_ms(tb.calc_time(frames)),
            (Some(frames), None) => frames * 1000 / u64::from(sample_rate),
            (None, _) => 0,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            sample_rate,
            channels,
            duration_ms,
            "Opened decoder"
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration_ms,
            time_base,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total duration, 0 if the container doesn't say.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Seek to an absolute position. Returns where the reader actually landed.
    pub fn seek_ms(&mut self, position_ms: u64) -> Result<u64, EngineError> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);
        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Decode(format!("Seek failed: {}", e)))?;
        self.decoder.reset();

        Ok(self
            .time_base
            .map(|tb| time_to_ms(tb.calc_time(seeked.actual_ts)))
            .unwrap_or(position_ms))
    }

    /// Decode the next block. `Ok(None)` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<DecodedBlock>, EngineError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let timestamp_ms = self
                .time_base
                .map(|tb| time_to_ms(tb.calc_time(packet.ts())))
                .unwrap_or(0);

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frame, skip it
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buffer.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedBlock {
                samples: buffer.samples().to_vec(),
                timestamp_ms,
            }));
        }
    }
}

use std::{io::Cursor, time::Duration};

use hound::{SampleFormat, WavReader};

use crate::{Result, VisualiserError};

/// PCM audio ready for playback, stored planar at the context sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl DecodedBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        let len = channels.first().map(Vec::len).unwrap_or(0);
        if channels.is_empty() || channels.iter().any(|channel| channel.len() != len) {
            return Err(VisualiserError::Decode(
                "decoded buffer needs at least one channel and equal channel lengths".into(),
            ));
        }
        Ok(Self { sample_rate, channels })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn length(&self) -> usize {
        self.channels[0].len()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.length() as f64 / self.sample_rate.max(1) as f64)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Average of all channels at `frame`.
    pub fn mono_sample(&self, frame: usize) -> f32 {
        let sum: f32 = self.channels.iter().map(|channel| channel[frame]).sum();
        sum / self.channels.len() as f32
    }
}

/// Decodes a RIFF/WAVE byte buffer and resamples it to `target_sample_rate`.
pub fn decode_audio_data(bytes: &[u8], target_sample_rate: u32) -> Result<DecodedBuffer> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channel_count = spec.channels as usize;
    if channel_count == 0 {
        return Err(VisualiserError::Decode("invalid channel count".into()));
    }

    // The header's sample count is untrusted; never reserve more than the
    // bytes on hand could hold.
    let bytes_per_sample = usize::from(spec.bits_per_sample.div_ceil(8).max(1));
    let capacity = (reader.len() as usize).min(bytes.len() / bytes_per_sample);
    let mut interleaved = Vec::with_capacity(capacity);
    match spec.sample_format {
        SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                interleaved.push(sample?);
            }
        }
        SampleFormat::Int => {
            let bits = spec.bits_per_sample as i32;
            let max = ((1i64 << (bits - 1)) - 1) as f32;
            if bits <= 16 {
                for sample in reader.samples::<i16>() {
                    interleaved.push(sample? as f32 / max);
                }
            } else {
                for sample in reader.samples::<i32>() {
                    interleaved.push(sample? as f32 / max);
                }
            }
        }
    }

    let frames = interleaved.len() / channel_count;
    if frames == 0 {
        return Err(VisualiserError::Decode("audio contains no frames".into()));
    }

    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }

    if spec.sample_rate != target_sample_rate {
        tracing::debug!(
            from = spec.sample_rate,
            to = target_sample_rate,
            "resampling decoded audio"
        );
        for channel in &mut channels {
            *channel = resample_linear(channel, spec.sample_rate, target_sample_rate);
        }
    }

    DecodedBuffer::new(target_sample_rate, channels)
}

fn resample_linear(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if input.len() < 2 || from == 0 || to == 0 {
        return input.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let out_len = ((input.len() as f64) / ratio).ceil().max(1.0) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|index| {
            let position = index as f64 * ratio;
            let left = (position.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let frac = (position - left as f64) as f32;
            input[left] + (input[right] - input[left]) * frac
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encodes a mono 16-bit WAV in memory.
    pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_pcm_at_native_rate() {
        let bytes = wav_bytes(&[0.0, 0.5, -0.5, 1.0], 8_000);
        let buffer = decode_audio_data(&bytes, 8_000).unwrap();

        assert_eq!(buffer.number_of_channels(), 1);
        assert_eq!(buffer.length(), 4);
        assert!((buffer.mono_sample(1) - 0.5).abs() < 1e-3);
        assert!((buffer.mono_sample(3) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn resamples_to_context_rate() {
        let bytes = wav_bytes(&vec![0.25; 100], 22_050);
        let buffer = decode_audio_data(&bytes, 44_100).unwrap();

        assert_eq!(buffer.sample_rate(), 44_100);
        assert_eq!(buffer.length(), 200);
        assert!((buffer.duration().as_secs_f64() - 100.0 / 22_050.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_garbage() {
        let err = decode_audio_data(b"definitely not a wav file", 44_100).unwrap_err();
        assert!(matches!(err, VisualiserError::Decode(_)));
    }

    #[test]
    fn oversized_data_header_fails_without_reserving_it() {
        let mut bytes = wav_bytes(&[0.1; 8], 44_100);
        let data = bytes.windows(4).position(|chunk| chunk == b"data").unwrap();
        bytes[data + 4..data + 8].copy_from_slice(&0xFFFF_FFC0u32.to_le_bytes());

        let err = decode_audio_data(&bytes, 44_100).unwrap_err();
        assert!(matches!(err, VisualiserError::Decode(_)));
    }

    #[test]
    fn rejects_empty_audio() {
        let bytes = wav_bytes(&[], 44_100);
        assert!(decode_audio_data(&bytes, 44_100).is_err());
    }

    #[test]
    fn buffer_requires_matching_channels() {
        assert!(DecodedBuffer::new(44_100, vec![vec![0.0; 3], vec![0.0; 2]]).is_err());
        assert!(DecodedBuffer::new(44_100, Vec::new()).is_err());
    }
}

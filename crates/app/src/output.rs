use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use radial_visualiser_core::{DrawSurface, Result, Visualiser, VisualiserError};

/// Default output device together with the stream layout it prefers.
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl OutputDevice {
    pub fn open_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| unsupported("no audio output device found"))?;
        let supported = device
            .default_output_config()
            .map_err(|err| unsupported(format!("failed to query output config: {err}")))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(unsupported(format!(
                "output sample format {:?} is not supported",
                supported.sample_format()
            )));
        }

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate = supported.sample_rate().0,
            channels = supported.channels(),
            "using output device"
        );
        Ok(Self {
            device,
            config: supported.into(),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Starts a stream whose callback renders the visualiser's graph. The
    /// stream stops when the returned handle is dropped.
    pub fn start<S>(&self, visualiser: Arc<Mutex<Visualiser<S>>>) -> Result<cpal::Stream>
    where
        S: DrawSurface + Send + 'static,
    {
        let channels = self.config.channels as usize;
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let rendered = match visualiser.try_lock() {
                        Ok(mut visualiser) => visualiser.render(data, channels).is_ok(),
                        Err(_) => false,
                    };
                    if !rendered {
                        data.fill(0.0);
                    }
                },
                |err| tracing::error!(error = %err, "audio stream error"),
                None,
            )
            .map_err(|err| unsupported(format!("failed to build output stream: {err}")))?;
        stream
            .play()
            .map_err(|err| unsupported(format!("failed to start output stream: {err}")))?;
        Ok(stream)
    }
}

fn unsupported(message: impl Into<String>) -> VisualiserError {
    VisualiserError::UnsupportedEnvironment(message.into())
}

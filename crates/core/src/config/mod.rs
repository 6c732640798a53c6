use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{render::surface::ColorStop, Result, Rgba, VisualiserError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub layout: LayoutConfig,
    pub gradient: GradientSpec,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.layout.validate()?;
        self.gradient.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Frames per block callback.
    pub block_size: usize,
    pub fft_size: usize,
    /// 0 disables smoothing, 1 freezes the spectrum.
    pub smoothing: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 2048,
            fft_size: 512,
            smoothing: 0.3,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        crate::engine::validate_block_size(self.block_size)?;
        crate::analysis::AnalyserSettings::new(self.fft_size, self.smoothing).validate()
    }

    /// Wall-clock duration of a single block callback.
    pub fn block_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// How the ring radius is derived from the surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingRadius {
    Fixed(f32),
    /// `floor(height / 3)`.
    ThirdOfHeight,
}

/// Which count divides the spectrum length when picking bins for bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrideMode {
    BarCount,
    MaxBars,
}

/// Geometry of the radial bar ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Size of the surface the app creates. Rendering always centres on the
    /// surface actually drawn to.
    pub width: f32,
    pub height: f32,
    pub bar_width: f32,
    /// Minimum visible bar height, added to every amplitude.
    pub bar_height: f32,
    pub bar_spacing: f32,
    /// Amplitude divisor; larger values give shorter bars.
    pub scale: f32,
    pub radius: RingRadius,
    pub stride: StrideMode,
    /// Flat colour used instead of the gradient when present.
    pub bar_color: Option<Rgba>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
            bar_width: 2.0,
            bar_height: 2.0,
            bar_spacing: 5.0,
            scale: 12.0,
            radius: RingRadius::Fixed(70.0),
            stride: StrideMode::BarCount,
            bar_color: None,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(VisualiserError::invalid_config("surface size must be positive"));
        }
        if !(self.bar_width > 0.0) || self.bar_spacing < 0.0 {
            return Err(VisualiserError::invalid_config(
                "bar width must be positive and spacing non-negative",
            ));
        }
        if self.bar_height < 0.0 {
            return Err(VisualiserError::invalid_config("base bar height must not be negative"));
        }
        if !(self.scale > 0.0) {
            return Err(VisualiserError::invalid_config("amplitude scale must be positive"));
        }
        if let RingRadius::Fixed(radius) = self.radius {
            if !(radius >= 0.0) {
                return Err(VisualiserError::invalid_config("ring radius must not be negative"));
            }
        }
        Ok(())
    }
}

/// Linear gradient applied to every bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientSpec {
    pub from: [f32; 2],
    pub to: [f32; 2],
    pub stops: Vec<ColorStop>,
}

impl Default for GradientSpec {
    fn default() -> Self {
        Self {
            from: [0.0, 0.0],
            to: [0.0, 300.0],
            stops: vec![
                ColorStop::new(1.0, Rgba::opaque(0x00, 0x00, 0x00)),
                ColorStop::new(0.75, Rgba::opaque(0xff, 0x00, 0x00)),
                ColorStop::new(0.25, Rgba::opaque(0xff, 0xff, 0x00)),
                ColorStop::new(0.0, Rgba::opaque(0xff, 0xff, 0xff)),
            ],
        }
    }
}

impl GradientSpec {
    /// Offsets must lie in [0, 1] and be strictly monotonic in either direction.
    pub fn validate(&self) -> Result<()> {
        if self.stops.is_empty() {
            return Err(VisualiserError::invalid_config("gradient needs at least one stop"));
        }
        if let Some(stop) = self.stops.iter().find(|stop| !(0.0..=1.0).contains(&stop.offset)) {
            return Err(VisualiserError::invalid_config(format!(
                "gradient stop offset {} is outside [0, 1]",
                stop.offset
            )));
        }

        let increasing = self.stops.windows(2).all(|pair| pair[0].offset < pair[1].offset);
        let decreasing = self.stops.windows(2).all(|pair| pair[0].offset > pair[1].offset);
        if increasing || decreasing {
            Ok(())
        } else {
            Err(VisualiserError::invalid_config(
                "gradient stop offsets must be strictly increasing or decreasing",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_merges_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r##"{{ "layout": {{ "bar_width": 3.0, "radius": "third_of_height", "bar_color": "#00ff00" }} }}"##
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.layout.bar_width, 3.0);
        assert_eq!(config.layout.bar_spacing, 5.0);
        assert_eq!(config.layout.radius, RingRadius::ThirdOfHeight);
        assert_eq!(config.layout.bar_color, Some(Rgba::opaque(0, 255, 0)));
        assert_eq!(config.audio.fft_size, 512);
    }

    #[test]
    fn rejects_non_monotonic_gradient() {
        let spec = GradientSpec {
            stops: vec![
                ColorStop::new(0.0, Rgba::BLACK),
                ColorStop::new(0.8, Rgba::WHITE),
                ColorStop::new(0.5, Rgba::BLACK),
            ],
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_invalid_audio_settings() {
        let audio = AudioConfig {
            fft_size: 500,
            ..Default::default()
        };
        assert!(audio.validate().is_err());

        let audio = AudioConfig {
            smoothing: 1.5,
            ..Default::default()
        };
        assert!(audio.validate().is_err());
    }

    #[test]
    fn block_budget_matches_cadence() {
        let audio = AudioConfig {
            sample_rate: 44_100,
            block_size: 1024,
            ..Default::default()
        };
        let millis = audio.block_budget().as_secs_f64() * 1000.0;
        assert!((millis - 23.2).abs() < 0.1);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, VisualiserError};

/// 8-bit RGBA colour, serialised as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);
    pub const WHITE: Rgba = Rgba::opaque(255, 255, 255);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#rrggbb` or `#rrggbbaa`.
    pub fn parse_hex(text: &str) -> Result<Self> {
        let digits = text
            .strip_prefix('#')
            .ok_or_else(|| VisualiserError::invalid_config(format!("colour `{text}` must start with `#`")))?;
        if !matches!(digits.len(), 6 | 8) || !digits.is_ascii() {
            return Err(VisualiserError::invalid_config(format!(
                "colour `{text}` must have 6 or 8 hex digits"
            )));
        }

        let channel = |index: usize| {
            u8::from_str_radix(&digits[index * 2..index * 2 + 2], 16)
                .map_err(|_| VisualiserError::invalid_config(format!("colour `{text}` is not hex")))
        };

        Ok(Self {
            r: channel(0)?,
            g: channel(1)?,
            b: channel(2)?,
            a: if digits.len() == 8 { channel(3)? } else { 255 },
        })
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)?;
        if self.a != 255 {
            write!(f, "{:02x}", self.a)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Rgba {
    type Error = VisualiserError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse_hex(&value)
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

/// One colour stop of a linear gradient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub offset: f32,
    pub color: Rgba,
}

impl ColorStop {
    pub fn new(offset: f32, color: Rgba) -> Self {
        Self { offset, color }
    }
}

/// Linear gradient between two points, with stops kept in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGradient {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub stops: Vec<ColorStop>,
}

impl LinearGradient {
    pub fn add_color_stop(&mut self, offset: f32, color: Rgba) {
        self.stops.push(ColorStop::new(offset, color));
    }
}

/// Style applied by [`DrawSurface::fill_rect`].
#[derive(Debug, Clone, PartialEq)]
pub enum FillStyle {
    Solid(Rgba),
    Gradient(LinearGradient),
}

/// The 2D drawing primitives the renderer depends on. Coordinates follow the
/// canvas convention: origin top-left, y pointing down, angles in radians.
pub trait DrawSurface {
    fn width(&self) -> f32;
    fn height(&self) -> f32;
    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn set_fill_style(&mut self, style: &FillStyle);
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, x: f32, y: f32);
    fn rotate(&mut self, angle: f32);
    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32);

    fn create_linear_gradient(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> LinearGradient {
        LinearGradient {
            x0,
            y0,
            x1,
            y1,
            stops: Vec::new(),
        }
    }
}

/// A primitive call captured by [`CommandRecorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    ClearRect { x: f32, y: f32, width: f32, height: f32 },
    SetFillStyle(FillStyle),
    Save,
    Restore,
    Translate { x: f32, y: f32 },
    Rotate(f32),
    FillRect { x: f32, y: f32, width: f32, height: f32 },
}

/// Surface that records every primitive call in order.
#[derive(Debug, Clone)]
pub struct CommandRecorder {
    width: f32,
    height: f32,
    commands: Vec<DrawCommand>,
}

impl CommandRecorder {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Commands issued since the most recent `clear_rect`, i.e. the last frame.
    pub fn last_frame(&self) -> &[DrawCommand] {
        let start = self
            .commands
            .iter()
            .rposition(|command| matches!(command, DrawCommand::ClearRect { .. }))
            .unwrap_or(0);
        &self.commands[start..]
    }

    pub fn fill_rects(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands
            .iter()
            .filter(|command| matches!(command, DrawCommand::FillRect { .. }))
    }
}

impl DrawSurface for CommandRecorder {
    fn width(&self) -> f32 {
        self.width
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn clear_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(DrawCommand::ClearRect { x, y, width, height });
    }

    fn set_fill_style(&mut self, style: &FillStyle) {
        self.commands.push(DrawCommand::SetFillStyle(style.clone()));
    }

    fn save(&mut self) {
        self.commands.push(DrawCommand::Save);
    }

    fn restore(&mut self) {
        self.commands.push(DrawCommand::Restore);
    }

    fn translate(&mut self, x: f32, y: f32) {
        self.commands.push(DrawCommand::Translate { x, y });
    }

    fn rotate(&mut self, angle: f32) {
        self.commands.push(DrawCommand::Rotate(angle));
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.commands.push(DrawCommand::FillRect { x, y, width, height });
    }
}

/// Allocation-free surface that only keeps counters. Useful where nothing is
/// displayed but the pipeline should still run end to end.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    width: f32,
    height: f32,
    depth: usize,
    pub frames: u64,
    pub bars_in_last_frame: usize,
    pub tallest_in_last_frame: f32,
    pub max_depth: usize,
}

impl FrameStats {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Number of `save` calls not yet matched by `restore`.
    pub fn open_saves(&self) -> usize {
        self.depth
    }
}

impl DrawSurface for FrameStats {
    fn width(&self) -> f32 {
        self.width
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn clear_rect(&mut self, _x: f32, _y: f32, _width: f32, _height: f32) {
        self.frames += 1;
        self.bars_in_last_frame = 0;
        self.tallest_in_last_frame = 0.0;
    }

    fn set_fill_style(&mut self, _style: &FillStyle) {}

    fn save(&mut self) {
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn restore(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn translate(&mut self, _x: f32, _y: f32) {}

    fn rotate(&mut self, _angle: f32) {}

    fn fill_rect(&mut self, _x: f32, _y: f32, _width: f32, height: f32) {
        self.bars_in_last_frame += 1;
        self.tallest_in_last_frame = self.tallest_in_last_frame.max(height.abs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_hex_colours() {
        let red = Rgba::parse_hex("#ff0000").unwrap();
        assert_eq!(red, Rgba::opaque(255, 0, 0));
        assert_eq!(red.to_string(), "#ff0000");

        let translucent = Rgba::parse_hex("#00ff0080").unwrap();
        assert_eq!(translucent.a, 0x80);
        assert_eq!(translucent.to_string(), "#00ff0080");
    }

    #[test]
    fn rejects_malformed_colours() {
        assert!(Rgba::parse_hex("ff0000").is_err());
        assert!(Rgba::parse_hex("#ff00").is_err());
        assert!(Rgba::parse_hex("#gg0000").is_err());
    }

    #[test]
    fn last_frame_starts_at_latest_clear() {
        let mut surface = CommandRecorder::new(10.0, 10.0);
        surface.clear_rect(0.0, 0.0, 10.0, 10.0);
        surface.fill_rect(0.0, 0.0, 1.0, 1.0);
        surface.clear_rect(0.0, 0.0, 10.0, 10.0);
        surface.fill_rect(1.0, 1.0, 2.0, 2.0);

        let frame = surface.last_frame();
        assert_eq!(frame.len(), 2);
        assert!(matches!(frame[0], DrawCommand::ClearRect { .. }));
    }

    #[test]
    fn frame_stats_tracks_save_depth() {
        let mut stats = FrameStats::new(100.0, 100.0);
        stats.clear_rect(0.0, 0.0, 100.0, 100.0);
        stats.save();
        stats.fill_rect(0.0, 0.0, 2.0, 9.0);
        stats.restore();

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.bars_in_last_frame, 1);
        assert_eq!(stats.open_saves(), 0);
        assert_eq!(stats.max_depth, 1);
        assert_eq!(stats.tallest_in_last_frame, 9.0);
    }
}

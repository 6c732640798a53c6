//! Radial bar layout: maps a frequency snapshot onto bars rotated around a
//! ring, drawn through the [`DrawSurface`] primitives.

pub mod surface;

use std::f32::consts::TAU;

pub use surface::{ColorStop, CommandRecorder, DrawCommand, DrawSurface, FillStyle, FrameStats, LinearGradient, Rgba};

use crate::{
    config::{GradientSpec, LayoutConfig, RingRadius, StrideMode},
    FrequencySnapshot,
};

/// Share of the ring left empty.
pub const GAP_FRACTION: f32 = 0.25;
/// Rotational bias, in degrees, before subtracting the bar width.
const BASE_OFFSET_DEGREES: f32 = 3.0 * 45.0;

/// Quantities derived from a layout for a given surface size and snapshot
/// length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingGeometry {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
    pub max_bars: usize,
    pub bar_count: usize,
    pub bin_stride: usize,
    pub angle_step: f32,
    pub base_offset: f32,
}

impl RingGeometry {
    pub fn compute(layout: &LayoutConfig, width: f32, height: f32, snapshot_len: usize) -> Self {
        let radius = match layout.radius {
            RingRadius::Fixed(radius) => radius,
            RingRadius::ThirdOfHeight => (height / 3.0).floor(),
        };

        let pitch = layout.bar_width + layout.bar_spacing;
        let max_bars = if pitch > 0.0 {
            (TAU * radius / pitch).floor().max(0.0) as usize
        } else {
            0
        };
        let bar_count = max_bars - (max_bars as f32 * GAP_FRACTION).floor() as usize;

        let divisor = match layout.stride {
            StrideMode::BarCount => bar_count,
            StrideMode::MaxBars => max_bars,
        };
        let bin_stride = if divisor == 0 { 0 } else { snapshot_len / divisor };

        Self {
            center_x: width / 2.0,
            center_y: height / 2.0,
            radius,
            max_bars,
            bar_count,
            bin_stride,
            angle_step: if max_bars == 0 { 0.0 } else { TAU / max_bars as f32 },
            base_offset: (BASE_OFFSET_DEGREES - layout.bar_width).to_radians(),
        }
    }

    pub fn bar_angle(&self, index: usize) -> f32 {
        index as f32 * self.angle_step - self.base_offset
    }

    /// Snapshot index read by bar `index`. A zero stride pins every bar to
    /// bin 0.
    pub fn bin_for_bar(&self, index: usize, snapshot_len: usize) -> usize {
        (index * self.bin_stride).min(snapshot_len.saturating_sub(1))
    }
}

pub fn bar_height(amplitude: u8, layout: &LayoutConfig) -> f32 {
    amplitude as f32 / layout.scale + layout.bar_height
}

/// Draws the ring for one snapshot. Holds the fill computed once at
/// construction and never mutates anything but the target surface.
#[derive(Debug, Clone)]
pub struct RadialRenderer {
    layout: LayoutConfig,
    fill: FillStyle,
}

impl RadialRenderer {
    pub fn new<S: DrawSurface + ?Sized>(layout: LayoutConfig, gradient: &GradientSpec, surface: &S) -> Self {
        let fill = match layout.bar_color {
            Some(color) => FillStyle::Solid(color),
            None => {
                let [x0, y0] = gradient.from;
                let [x1, y1] = gradient.to;
                let mut linear = surface.create_linear_gradient(x0, y0, x1, y1);
                for stop in &gradient.stops {
                    linear.add_color_stop(stop.offset, stop.color);
                }
                FillStyle::Gradient(linear)
            }
        };
        Self { layout, fill }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn fill(&self) -> &FillStyle {
        &self.fill
    }

    pub fn geometry(&self, width: f32, height: f32, snapshot_len: usize) -> RingGeometry {
        RingGeometry::compute(&self.layout, width, height, snapshot_len)
    }

    /// Issues the draw calls for every visible bar, centred on `surface`.
    /// Returns the number of bars drawn.
    pub fn render<S: DrawSurface + ?Sized>(&self, snapshot: &FrequencySnapshot, surface: &mut S) -> usize {
        let bins = snapshot.bins();
        let geometry = self.geometry(surface.width(), surface.height(), bins.len());
        let layout = &self.layout;

        surface.set_fill_style(&self.fill);
        for index in 0..geometry.bar_count {
            let amplitude = if bins.is_empty() {
                0
            } else {
                bins[geometry.bin_for_bar(index, bins.len())]
            };
            let height = bar_height(amplitude, layout);

            surface.save();
            surface.translate(
                geometry.center_x + layout.bar_spacing,
                geometry.center_y + layout.bar_spacing,
            );
            surface.rotate(geometry.bar_angle(index));
            surface.fill_rect(0.0, geometry.radius, layout.bar_width, height);
            surface.restore();
        }

        geometry.bar_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> LayoutConfig {
        LayoutConfig {
            radius: RingRadius::Fixed(70.0),
            bar_width: 2.0,
            bar_spacing: 5.0,
            ..Default::default()
        }
    }

    fn heights(surface: &CommandRecorder) -> Vec<f32> {
        surface
            .fill_rects()
            .map(|command| match command {
                DrawCommand::FillRect { height, .. } => *height,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn bar_count_reserves_a_quarter_gap() {
        let geometry = RingGeometry::compute(&layout(), 800.0, 600.0, 256);
        assert_eq!(geometry.max_bars, 62);
        assert_eq!(geometry.bar_count, 47);
        assert_eq!(geometry.bin_stride, 256 / 47);
    }

    #[test]
    fn bar_count_formula_holds_across_layouts() {
        for radius in [0.0, 10.0, 70.0, 133.0, 400.0] {
            for (width, spacing) in [(1.0, 1.0), (2.0, 5.0), (4.0, 0.5)] {
                let layout = LayoutConfig {
                    radius: RingRadius::Fixed(radius),
                    bar_width: width,
                    bar_spacing: spacing,
                    ..Default::default()
                };
                let geometry = RingGeometry::compute(&layout, 800.0, 600.0, 256);
                let max_bars = (TAU * radius / (width + spacing)).floor() as usize;
                assert_eq!(geometry.max_bars, max_bars);
                assert_eq!(geometry.bar_count, max_bars - (max_bars as f32 * 0.25).floor() as usize);
            }
        }
    }

    #[test]
    fn radius_can_follow_surface_height() {
        let layout = LayoutConfig {
            radius: RingRadius::ThirdOfHeight,
            ..Default::default()
        };
        assert_eq!(RingGeometry::compute(&layout, 800.0, 601.0, 256).radius, 200.0);
    }

    #[test]
    fn angles_are_evenly_spaced_and_increasing() {
        let geometry = RingGeometry::compute(&layout(), 800.0, 600.0, 256);
        let step = TAU / geometry.max_bars as f32;
        for index in 1..geometry.bar_count {
            let delta = geometry.bar_angle(index) - geometry.bar_angle(index - 1);
            assert!(delta > 0.0);
            assert!((delta - step).abs() < 1e-5);
        }
        assert!((geometry.bar_angle(0) + (133.0f32).to_radians()).abs() < 1e-6);
    }

    #[test]
    fn silent_snapshot_draws_minimum_heights() {
        let layout = layout();
        let mut surface = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout.clone(), &GradientSpec::default(), &surface);

        let drawn = renderer.render(&FrequencySnapshot::zeroed(256), &mut surface);

        assert_eq!(drawn, 47);
        let heights = heights(&surface);
        assert_eq!(heights.len(), 47);
        assert!(heights.iter().all(|&height| height == layout.bar_height));
    }

    #[test]
    fn heights_track_amplitude() {
        let layout = layout();
        let mut bins = vec![0u8; 256];
        bins[0] = 240;
        let mut surface = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout.clone(), &GradientSpec::default(), &surface);

        renderer.render(&FrequencySnapshot::from_bins(bins), &mut surface);

        let heights = heights(&surface);
        assert_eq!(heights[0], 240.0 / 12.0 + layout.bar_height);
        assert_eq!(heights[1], layout.bar_height);
    }

    #[test]
    fn rendering_is_idempotent() {
        let snapshot = FrequencySnapshot::from_bins((0..=255).collect());
        let mut first = CommandRecorder::new(800.0, 600.0);
        let mut second = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout(), &GradientSpec::default(), &first);

        renderer.render(&snapshot, &mut first);
        renderer.render(&snapshot, &mut second);

        assert_eq!(first.commands(), second.commands());
    }

    #[test]
    fn transforms_are_scoped_per_bar() {
        let mut surface = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout(), &GradientSpec::default(), &surface);
        renderer.render(&FrequencySnapshot::zeroed(256), &mut surface);

        let commands = surface.commands();
        assert!(matches!(commands[0], DrawCommand::SetFillStyle(FillStyle::Gradient(_))));
        for bar in commands[1..].chunks(5) {
            assert_eq!(bar[0], DrawCommand::Save);
            assert_eq!(bar[1], DrawCommand::Translate { x: 405.0, y: 305.0 });
            assert!(matches!(bar[2], DrawCommand::Rotate(_)));
            assert!(matches!(bar[3], DrawCommand::FillRect { y, .. } if y == 70.0));
            assert_eq!(bar[4], DrawCommand::Restore);
        }
    }

    #[test]
    fn ring_is_centred_on_the_surface_not_the_layout() {
        let layout = LayoutConfig {
            radius: RingRadius::ThirdOfHeight,
            ..layout()
        };
        assert_eq!((layout.width, layout.height), (800.0, 600.0));
        let mut surface = CommandRecorder::new(1000.0, 450.0);
        let renderer = RadialRenderer::new(layout, &GradientSpec::default(), &surface);

        renderer.render(&FrequencySnapshot::zeroed(256), &mut surface);

        let commands = surface.commands();
        assert_eq!(commands[2], DrawCommand::Translate { x: 505.0, y: 230.0 });
        assert!(matches!(commands[4], DrawCommand::FillRect { y, .. } if y == 150.0));
    }

    #[test]
    fn more_bars_than_bins_reads_bin_zero() {
        let mut bins = vec![0u8; 16];
        bins[0] = 120;
        let mut surface = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout(), &GradientSpec::default(), &surface);

        assert_eq!(renderer.geometry(800.0, 600.0, 16).bin_stride, 0);
        let drawn = renderer.render(&FrequencySnapshot::from_bins(bins), &mut surface);

        assert_eq!(drawn, 47);
        assert!(heights(&surface).iter().all(|&height| height == 120.0 / 12.0 + 2.0));
    }

    #[test]
    fn empty_snapshot_and_zero_radius_do_not_fault() {
        let mut surface = CommandRecorder::new(800.0, 600.0);
        let renderer = RadialRenderer::new(layout(), &GradientSpec::default(), &surface);
        assert_eq!(renderer.render(&FrequencySnapshot::zeroed(0), &mut surface), 47);

        let flat = LayoutConfig {
            radius: RingRadius::Fixed(0.0),
            ..layout()
        };
        let renderer = RadialRenderer::new(flat, &GradientSpec::default(), &surface);
        assert_eq!(renderer.render(&FrequencySnapshot::zeroed(256), &mut surface), 0);
    }

    #[test]
    fn solid_colour_overrides_gradient() {
        let surface = CommandRecorder::new(800.0, 600.0);
        let layout = LayoutConfig {
            bar_color: Some(Rgba::WHITE),
            ..layout()
        };
        let renderer = RadialRenderer::new(layout, &GradientSpec::default(), &surface);
        assert_eq!(renderer.fill(), &FillStyle::Solid(Rgba::WHITE));
    }
}

//! Core library for the Radial Visualiser.
//!
//! Audio is decoded into a small in-process engine, wired as
//! source → analyser → block processor → destination. Every time the
//! processor has a full block it pulls the analyser's byte spectrum and the
//! [`RadialRenderer`] redraws a ring of rotated bars on a [`DrawSurface`].

pub mod analysis;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod playback;
pub mod render;
pub mod timeline;
pub mod visualiser;

pub use analysis::{AnalyserNode, AnalyserSettings, FrequencySnapshot};
pub use config::{AppConfig, AudioConfig, GradientSpec, LayoutConfig, RingRadius, StrideMode};
pub use decode::{decode_audio_data, DecodedBuffer};
pub use engine::{AudioContext, BlockHandler, BlockScope, ContextOptions, NodeId};
pub use error::{Result, VisualiserError};
pub use fetch::{AudioFetcher, FileFetcher, MemoryFetcher, SourceDescriptor};
pub use graph::ProcessingGraph;
pub use playback::{PlaybackController, PlaybackEvent, PlaybackNotifier, PlaybackState};
pub use render::{
    ColorStop, CommandRecorder, DrawCommand, DrawSurface, FillStyle, FrameStats, LinearGradient,
    RadialRenderer, RingGeometry, Rgba,
};
pub use timeline::{FrameScheduler, SchedulerStats, SharedSurface};
pub use visualiser::Visualiser;

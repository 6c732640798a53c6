use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use crate::{
    fetch::{AudioFetcher, SourceDescriptor},
    graph::ProcessingGraph,
    playback::{PlaybackController, PlaybackEvent, PlaybackState},
    timeline::{FrameScheduler, SchedulerStats, SharedSurface},
    AppConfig, DrawSurface, RadialRenderer, Result, VisualiserError,
};

/// One audio source, one graph, one surface.
pub struct Visualiser<S> {
    config: AppConfig,
    surface: SharedSurface<S>,
    graph: Option<ProcessingGraph>,
    playback: PlaybackController,
    stats: Arc<SchedulerStats>,
}

impl<S> Visualiser<S>
where
    S: DrawSurface + Send + 'static,
{
    pub fn new(config: AppConfig, surface: S) -> Result<Self> {
        Self::with_shared_surface(config, Arc::new(Mutex::new(surface)))
    }

    /// Builds the processing graph drawing onto a surface the caller keeps a
    /// handle to.
    pub fn with_shared_surface(config: AppConfig, surface: SharedSurface<S>) -> Result<Self> {
        config.validate()?;

        let renderer = {
            let guard = surface
                .lock()
                .map_err(|_| VisualiserError::invalid_state("drawing surface has been poisoned"))?;
            RadialRenderer::new(config.layout.clone(), &config.gradient, &*guard)
        };

        let playback = PlaybackController::new();
        let scheduler = FrameScheduler::new(
            Arc::clone(&surface),
            renderer,
            playback.notifier(),
            config.audio.block_budget(),
        );
        let stats = scheduler.stats();
        let graph = ProcessingGraph::build(&config.audio, Box::new(scheduler))?;

        Ok(Self {
            config,
            surface,
            graph: Some(graph),
            playback,
            stats,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn surface(&self) -> SharedSurface<S> {
        Arc::clone(&self.surface)
    }

    pub fn state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn subscribe(&self) -> Result<Receiver<PlaybackEvent>> {
        self.playback.subscribe()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Frames drawn so far.
    pub fn frames_rendered(&self) -> u64 {
        self.stats.frames()
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }

    pub fn is_torn_down(&self) -> bool {
        self.graph.is_none()
    }

    /// Fetches and decodes `descriptor`; see [`PlaybackController::load`].
    pub fn load(&mut self, descriptor: SourceDescriptor, fetcher: &dyn AudioFetcher) -> Result<PlaybackState> {
        self.graph()?;
        let sample_rate = self.sample_rate();
        self.playback.load(descriptor, fetcher, sample_rate)
    }

    pub fn play(&mut self) -> Result<()> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| VisualiserError::invalid_state("visualiser has been torn down"))?;
        self.playback.play(graph)
    }

    pub fn stop(&mut self) -> Result<()> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| VisualiserError::invalid_state("visualiser has been torn down"))?;
        self.playback.stop(graph)
    }

    /// Pulls interleaved audio from the graph. Block callbacks, and therefore
    /// frames, happen inside this call.
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> Result<()> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| VisualiserError::invalid_state("visualiser has been torn down"))?;
        graph.render(output, channels)
    }

    /// Disconnects every node. No block callback fires once this returns.
    /// Playback still running is ended first, so subscribers see `Ended`.
    pub fn teardown(&mut self) {
        if let Some(graph) = self.graph.take() {
            shut_down(graph, &mut self.playback);
        }
    }

    fn graph(&self) -> Result<&ProcessingGraph> {
        self.graph
            .as_ref()
            .ok_or_else(|| VisualiserError::invalid_state("visualiser has been torn down"))
    }
}

impl<S> Drop for Visualiser<S> {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.take() {
            shut_down(graph, &mut self.playback);
        }
    }
}

fn shut_down(mut graph: ProcessingGraph, playback: &mut PlaybackController) {
    if playback.state() == PlaybackState::Playing {
        if let Err(err) = playback.stop(&mut graph) {
            tracing::warn!(error = %err, "could not stop source before teardown");
        }
        // The completion callback is dropped with the graph, so end here if
        // stopping did not.
        if playback.state() == PlaybackState::Playing {
            playback.notifier().mark_ended();
        }
    }
    graph.teardown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode::tests::wav_bytes, fetch::MemoryFetcher, CommandRecorder};

    fn fetcher() -> MemoryFetcher {
        let tone: Vec<f32> = (0..8_192)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("tone.wav", wav_bytes(&tone, 44_100));
        fetcher
    }

    #[test]
    fn play_before_decode_is_rejected() {
        let mut visualiser = Visualiser::new(AppConfig::default(), CommandRecorder::new(800.0, 600.0)).unwrap();
        assert!(matches!(visualiser.play(), Err(VisualiserError::InvalidState(_))));
        assert_eq!(visualiser.state(), PlaybackState::Unloaded);
    }

    #[test]
    fn stop_ends_playback_early() {
        let mut visualiser = Visualiser::new(AppConfig::default(), CommandRecorder::new(800.0, 600.0)).unwrap();
        visualiser
            .load(SourceDescriptor::new("tone.wav"), &fetcher())
            .unwrap();
        visualiser.play().unwrap();
        visualiser.stop().unwrap();
        assert_eq!(visualiser.state(), PlaybackState::Ended);
    }

    #[test]
    fn teardown_rejects_further_use() {
        let mut visualiser = Visualiser::new(AppConfig::default(), CommandRecorder::new(800.0, 600.0)).unwrap();
        visualiser.teardown();

        assert!(visualiser.is_torn_down());
        let mut out = vec![0.0; 128];
        assert!(visualiser.render(&mut out, 1).is_err());
        assert!(visualiser.load(SourceDescriptor::new("tone.wav"), &fetcher()).is_err());
    }

    #[test]
    fn teardown_mid_playback_reports_ended() {
        let mut visualiser = Visualiser::new(AppConfig::default(), CommandRecorder::new(800.0, 600.0)).unwrap();
        let events = visualiser.subscribe().unwrap();
        visualiser
            .load(SourceDescriptor::new("tone.wav"), &fetcher())
            .unwrap();
        visualiser.play().unwrap();

        visualiser.teardown();

        assert_eq!(visualiser.state(), PlaybackState::Ended);
        let states: Vec<_> = events.try_iter().map(|event| event.to).collect();
        assert_eq!(
            states,
            [
                PlaybackState::Loading,
                PlaybackState::Decoded,
                PlaybackState::Playing,
                PlaybackState::Ended
            ]
        );
    }

    #[test]
    fn dropping_mid_playback_notifies_subscribers() {
        let events = {
            let mut visualiser =
                Visualiser::new(AppConfig::default(), CommandRecorder::new(800.0, 600.0)).unwrap();
            let events = visualiser.subscribe().unwrap();
            visualiser
                .load(SourceDescriptor::new("tone.wav"), &fetcher())
                .unwrap();
            visualiser.play().unwrap();
            events
        };

        assert_eq!(events.try_iter().last().map(|event| event.to), Some(PlaybackState::Ended));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = AppConfig::default();
        config.layout.bar_width = 0.0;
        let result = Visualiser::new(config, CommandRecorder::new(800.0, 600.0));
        assert!(matches!(result, Err(VisualiserError::InvalidConfig(_))));
    }
}

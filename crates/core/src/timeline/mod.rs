use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crate::{
    engine::{BlockHandler, BlockScope},
    playback::PlaybackNotifier,
    DrawSurface, RadialRenderer,
};

/// Surface shared between the caller and the block callback.
pub type SharedSurface<S> = Arc<Mutex<S>>;

/// Counters published by a [`FrameScheduler`], readable from any thread.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    frames: AtomicU64,
    overruns: AtomicU64,
    last_block_micros: AtomicU64,
}

impl SchedulerStats {
    /// Frames drawn while playing.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Callbacks that took longer than the block they were serving.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Context time at the end of the last drawn block.
    pub fn last_block_time(&self) -> Duration {
        Duration::from_micros(self.last_block_micros.load(Ordering::Relaxed))
    }
}

/// Block callback that redraws the ring from the freshest spectrum.
pub struct FrameScheduler<S> {
    surface: SharedSurface<S>,
    renderer: RadialRenderer,
    playback: PlaybackNotifier,
    stats: Arc<SchedulerStats>,
    budget: Duration,
}

impl<S: DrawSurface> FrameScheduler<S> {
    pub fn new(
        surface: SharedSurface<S>,
        renderer: RadialRenderer,
        playback: PlaybackNotifier,
        budget: Duration,
    ) -> Self {
        Self {
            surface,
            renderer,
            playback,
            stats: Arc::new(SchedulerStats::default()),
            budget,
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Pulls the snapshot, clears the surface and redraws every bar.
    pub fn tick(&mut self, scope: &mut BlockScope<'_>) {
        if !self.playback.is_playing() {
            return;
        }
        let started = Instant::now();

        let Some(snapshot) = scope.magnitudes() else {
            return;
        };
        let Ok(mut surface) = self.surface.lock() else {
            return;
        };

        let (width, height) = (surface.width(), surface.height());
        surface.clear_rect(0.0, 0.0, width, height);
        self.renderer.render(snapshot, &mut *surface);
        drop(surface);

        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_block_micros
            .store((scope.playback_time() * 1e6) as u64, Ordering::Relaxed);
        if started.elapsed() > self.budget {
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<S: DrawSurface + Send> BlockHandler for FrameScheduler<S> {
    fn on_block(&mut self, scope: &mut BlockScope<'_>) {
        self.tick(scope);
    }
}

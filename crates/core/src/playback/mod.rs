use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    decode::decode_audio_data,
    fetch::{AudioFetcher, SourceDescriptor},
    graph::ProcessingGraph,
    DecodedBuffer, Result, VisualiserError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Unloaded,
    Loading,
    Decoded,
    Playing,
    Ended,
    Failed,
}

impl PlaybackState {
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Unloaded | Ended | Failed, Loading)
                | (Loading, Decoded)
                | (Loading | Decoded, Failed)
                | (Decoded, Playing)
                | (Playing, Ended)
        )
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub from: PlaybackState,
    pub to: PlaybackState,
    /// Failure description when `to` is [`PlaybackState::Failed`].
    pub error: Option<String>,
}

/// Shared state cell plus the subscribers interested in its transitions.
/// Cloned into the source's completion callback so `Ended` is pushed from the
/// audio side rather than polled.
#[derive(Clone, Debug)]
pub struct PlaybackNotifier {
    state: Arc<Mutex<PlaybackState>>,
    subscribers: Arc<Mutex<Vec<Sender<PlaybackEvent>>>>,
    playing: Arc<AtomicBool>,
}

impl Default for PlaybackNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackNotifier {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlaybackState::Unloaded)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.lock_state().map(|state| *state).unwrap_or(PlaybackState::Failed)
    }

    /// Lock-free check used on the block callback path.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Result<Receiver<PlaybackEvent>> {
        let (tx, rx) = unbounded();
        self.lock_subscribers()?.push(tx);
        Ok(rx)
    }

    /// Moves to `next` when the transition is legal, then notifies subscribers.
    pub fn transition(&self, next: PlaybackState, error: Option<String>) -> Result<PlaybackState> {
        let from = {
            let mut state = self.lock_state()?;
            let from = *state;
            if !from.can_transition_to(next) {
                return Err(VisualiserError::invalid_state(format!(
                    "cannot move from {from:?} to {next:?}"
                )));
            }
            *state = next;
            self.playing.store(next == PlaybackState::Playing, Ordering::Release);
            from
        };

        tracing::info!(?from, to = ?next, "playback state changed");
        let event = PlaybackEvent { from, to: next, error };
        self.lock_subscribers()?
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        Ok(next)
    }

    pub(crate) fn mark_ended(&self) {
        if let Err(err) = self.transition(PlaybackState::Ended, None) {
            tracing::warn!(error = %err, "ignoring completion outside playback");
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PlaybackState>> {
        self.state
            .lock()
            .map_err(|_| VisualiserError::invalid_state("playback state has been poisoned"))
    }

    fn lock_subscribers(&self) -> Result<MutexGuard<'_, Vec<Sender<PlaybackEvent>>>> {
        self.subscribers
            .lock()
            .map_err(|_| VisualiserError::invalid_state("playback subscribers have been poisoned"))
    }
}

/// Drives a single source through load, decode and playback.
#[derive(Debug, Default)]
pub struct PlaybackController {
    notifier: PlaybackNotifier,
    buffer: Option<Arc<DecodedBuffer>>,
    source: Option<SourceDescriptor>,
}

impl PlaybackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.notifier.state()
    }

    pub fn notifier(&self) -> PlaybackNotifier {
        self.notifier.clone()
    }

    pub fn subscribe(&self) -> Result<Receiver<PlaybackEvent>> {
        self.notifier.subscribe()
    }

    pub fn buffer(&self) -> Option<&Arc<DecodedBuffer>> {
        self.buffer.as_ref()
    }

    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.source.as_ref()
    }

    /// Fetches and decodes `descriptor`. Fetch and decode failures end in
    /// [`PlaybackState::Failed`] and are reported through the event channel,
    /// not as an `Err`; `Err` means the load could not begin at all.
    pub fn load(
        &mut self,
        descriptor: SourceDescriptor,
        fetcher: &dyn AudioFetcher,
        sample_rate: u32,
    ) -> Result<PlaybackState> {
        self.begin_load(descriptor.clone())?;
        let fetched = fetcher.fetch(&descriptor);
        self.complete_load(fetched, sample_rate)
    }

    /// Enters `Loading` for a fetch the caller performs itself.
    pub fn begin_load(&mut self, descriptor: SourceDescriptor) -> Result<()> {
        self.notifier.transition(PlaybackState::Loading, None)?;
        tracing::info!(source = %descriptor, "loading audio");
        self.buffer = None;
        self.source = Some(descriptor);
        Ok(())
    }

    /// Finishes a load started with [`Self::begin_load`].
    pub fn complete_load(&mut self, fetched: Result<Vec<u8>>, sample_rate: u32) -> Result<PlaybackState> {
        if self.state() != PlaybackState::Loading {
            return Err(VisualiserError::invalid_state("no load in progress"));
        }

        match fetched.and_then(|bytes| decode_audio_data(&bytes, sample_rate)) {
            Ok(buffer) => {
                tracing::info!(
                    channels = buffer.number_of_channels(),
                    frames = buffer.length(),
                    seconds = buffer.duration().as_secs_f64(),
                    "audio decoded"
                );
                self.buffer = Some(Arc::new(buffer));
                self.notifier.transition(PlaybackState::Decoded, None)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Starts the decoded buffer on `graph`. Only valid from `Decoded`.
    pub fn play(&mut self, graph: &mut ProcessingGraph) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Decoded {
            return Err(VisualiserError::invalid_state(format!("cannot play while {state:?}")));
        }
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| VisualiserError::invalid_state("decoded buffer is missing"))?;

        let notifier = self.notifier.clone();
        if let Err(err) = graph.start_source(buffer, Box::new(move || notifier.mark_ended())) {
            self.fail(VisualiserError::invalid_state(err.to_string()))?;
            return Err(err);
        }
        self.notifier.transition(PlaybackState::Playing, None)?;
        Ok(())
    }

    /// Stops playback early; the completion callback moves the state to `Ended`.
    pub fn stop(&mut self, graph: &mut ProcessingGraph) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Playing {
            return Err(VisualiserError::invalid_state(format!("cannot stop while {state:?}")));
        }
        graph.stop_source()
    }

    fn fail(&mut self, err: VisualiserError) -> Result<PlaybackState> {
        match &err {
            VisualiserError::Fetch { .. } => tracing::warn!(error = %err, "audio fetch failed"),
            _ => tracing::error!(error = %err, "audio load failed"),
        }
        self.buffer = None;
        self.notifier.transition(PlaybackState::Failed, Some(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode::tests::wav_bytes, fetch::MemoryFetcher};

    #[test]
    fn transition_table() {
        use PlaybackState::*;
        assert!(Unloaded.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Decoded));
        assert!(Loading.can_transition_to(Failed));
        assert!(Decoded.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Ended));
        assert!(Ended.can_transition_to(Loading));

        assert!(!Unloaded.can_transition_to(Playing));
        assert!(!Failed.can_transition_to(Playing));
        assert!(!Playing.can_transition_to(Failed));
        assert!(!Playing.can_transition_to(Loading));
    }

    #[test]
    fn successful_load_reports_loading_then_decoded() {
        let mut controller = PlaybackController::new();
        let events = controller.subscribe().unwrap();
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("clip", wav_bytes(&[0.1; 64], 44_100));

        let state = controller
            .load(SourceDescriptor::new("clip"), &fetcher, 44_100)
            .unwrap();

        assert_eq!(state, PlaybackState::Decoded);
        let seen: Vec<_> = events.try_iter().map(|event| event.to).collect();
        assert_eq!(seen, vec![PlaybackState::Loading, PlaybackState::Decoded]);
        assert_eq!(controller.buffer().unwrap().length(), 64);
    }

    #[test]
    fn fetch_failure_is_reported_as_failed() {
        let mut controller = PlaybackController::new();
        let events = controller.subscribe().unwrap();

        let state = controller
            .load(SourceDescriptor::new("missing"), &MemoryFetcher::new(), 44_100)
            .unwrap();

        assert_eq!(state, PlaybackState::Failed);
        let failed = events.try_iter().last().unwrap();
        assert_eq!(failed.to, PlaybackState::Failed);
        assert!(failed.error.unwrap().contains("missing"));
    }

    #[test]
    fn cannot_load_twice_concurrently() {
        let mut controller = PlaybackController::new();
        controller.begin_load(SourceDescriptor::new("a")).unwrap();
        assert!(controller.begin_load(SourceDescriptor::new("b")).is_err());
    }

    #[test]
    fn complete_requires_pending_load() {
        let mut controller = PlaybackController::new();
        assert!(controller.complete_load(Ok(Vec::new()), 44_100).is_err());
        assert_eq!(controller.state(), PlaybackState::Unloaded);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let notifier = PlaybackNotifier::new();
        drop(notifier.subscribe().unwrap());
        let live = notifier.subscribe().unwrap();

        notifier.transition(PlaybackState::Loading, None).unwrap();
        assert_eq!(live.try_recv().unwrap().to, PlaybackState::Loading);
        assert_eq!(notifier.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn completion_outside_playback_leaves_state_alone() {
        let notifier = PlaybackNotifier::new();
        let events = notifier.subscribe().unwrap();

        notifier.mark_ended();

        assert_eq!(notifier.state(), PlaybackState::Unloaded);
        assert!(events.try_recv().is_err());
    }
}

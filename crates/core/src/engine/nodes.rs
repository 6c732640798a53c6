use std::sync::Arc;

use crate::{AnalyserNode, DecodedBuffer, FrequencySnapshot, Result, VisualiserError};

pub const MIN_BLOCK_SIZE: usize = 256;
pub const MAX_BLOCK_SIZE: usize = 16_384;

/// Callback invoked by a block processor every time a full block of audio has
/// passed through it.
pub trait BlockHandler: Send {
    fn on_block(&mut self, scope: &mut BlockScope<'_>);
}

impl<F> BlockHandler for F
where
    F: FnMut(&mut BlockScope<'_>) + Send,
{
    fn on_block(&mut self, scope: &mut BlockScope<'_>) {
        self(scope)
    }
}

/// Context handed to a [`BlockHandler`] for the duration of one invocation.
pub struct BlockScope<'a> {
    analyser: Option<&'a mut AnalyserNode>,
    input: &'a [f32],
    block_index: u64,
    playback_time: f64,
}

impl<'a> BlockScope<'a> {
    pub fn new(
        analyser: Option<&'a mut AnalyserNode>,
        input: &'a [f32],
        block_index: u64,
        playback_time: f64,
    ) -> Self {
        Self {
            analyser,
            input,
            block_index,
            playback_time,
        }
    }

    /// Refreshes and returns the upstream analyser's magnitudes, or `None` when
    /// no analyser feeds this processor.
    pub fn magnitudes(&mut self) -> Option<&FrequencySnapshot> {
        let analyser = self.analyser.as_deref_mut()?;
        if let Err(err) = analyser.refresh() {
            tracing::warn!(error = %err, "spectrum refresh failed, reusing previous snapshot");
        }
        Some(analyser.snapshot())
    }

    pub fn input(&self) -> &[f32] {
        self.input
    }

    /// Zero-based count of blocks delivered before this one.
    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    /// Context time, in seconds, at the end of the block.
    pub fn playback_time(&self) -> f64 {
        self.playback_time
    }
}

pub fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size.is_power_of_two() && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        Ok(())
    } else {
        Err(VisualiserError::invalid_config(format!(
            "block size {block_size} must be a power of two in {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}"
        )))
    }
}

pub(crate) struct BlockProcessorNode {
    block_size: usize,
    pending: Vec<f32>,
    filled: usize,
    pub(crate) handler: Option<Box<dyn BlockHandler>>,
    pub(crate) blocks_delivered: u64,
}

impl BlockProcessorNode {
    pub(crate) fn new(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self {
            block_size,
            pending: vec![0.0; block_size],
            filled: 0,
            handler: None,
            blocks_delivered: 0,
        })
    }

    /// Appends a render quantum. Returns `true` once a full block is pending.
    pub(crate) fn accumulate(&mut self, samples: &[f32]) -> bool {
        let take = samples.len().min(self.block_size - self.filled);
        self.pending[self.filled..self.filled + take].copy_from_slice(&samples[..take]);
        self.filled += take;
        self.filled == self.block_size
    }

    /// Moves the full block out so the handler can read it while the node
    /// itself stays borrowable. Pair with [`Self::restore_pending`].
    pub(crate) fn take_pending(&mut self) -> Vec<f32> {
        self.filled = 0;
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn restore_pending(&mut self, pending: Vec<f32>) {
        self.pending = pending;
        self.blocks_delivered += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceState {
    Unscheduled,
    Playing,
    Finished,
}

pub(crate) struct BufferSourceNode {
    buffer: Option<Arc<DecodedBuffer>>,
    cursor: usize,
    pub(crate) state: SourceState,
    pub(crate) on_ended: Option<Box<dyn FnMut() + Send>>,
}

impl BufferSourceNode {
    pub(crate) fn new() -> Self {
        Self {
            buffer: None,
            cursor: 0,
            state: SourceState::Unscheduled,
            on_ended: None,
        }
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.buffer.is_none() && self.state == SourceState::Unscheduled
    }

    pub(crate) fn set_buffer(&mut self, buffer: Arc<DecodedBuffer>) -> Result<()> {
        if self.buffer.is_some() {
            return Err(VisualiserError::invalid_state("source buffer can only be set once"));
        }
        self.buffer = Some(buffer);
        Ok(())
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            return Err(VisualiserError::invalid_state("cannot start a source without a buffer"));
        }
        if self.state != SourceState::Unscheduled {
            return Err(VisualiserError::invalid_state("a source can only be started once"));
        }
        self.state = SourceState::Playing;
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        match self.state {
            SourceState::Unscheduled => Err(VisualiserError::invalid_state("source was never started")),
            SourceState::Playing => {
                self.finish();
                Ok(())
            }
            SourceState::Finished => Ok(()),
        }
    }

    pub(crate) fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if self.state != SourceState::Playing {
            return;
        }
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };

        let remaining = buffer.length().saturating_sub(self.cursor);
        let frames = remaining.min(out.len());
        for (offset, sample) in out[..frames].iter_mut().enumerate() {
            *sample = buffer.mono_sample(self.cursor + offset);
        }
        self.cursor += frames;

        if self.cursor >= buffer.length() {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.state = SourceState::Finished;
        if let Some(mut on_ended) = self.on_ended.take() {
            on_ended();
        }
    }
}

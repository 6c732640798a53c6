//! Fixed processing topology:
//!
//! ```text
//! source ──► analyser ──► block processor ──► destination
//!    └────────────────────────────────────────► destination
//! ```

use std::sync::Arc;

use crate::{
    engine::{AudioContext, BlockHandler, ContextOptions, NodeId},
    AnalyserNode, AnalyserSettings, AudioConfig, DecodedBuffer, Result, VisualiserError,
};

/// Owns the audio context and every node wired into it. Dropping or tearing
/// the graph down closes the context, after which no callback fires.
#[derive(Debug)]
pub struct ProcessingGraph {
    context: AudioContext,
    source: NodeId,
    analyser: NodeId,
    processor: NodeId,
}

impl ProcessingGraph {
    /// Creates the context and wires the topology in dependency order: the
    /// processor is connected to the destination before it is armed, and the
    /// analyser sits between the source and the processor. Any failure after
    /// the context exists undoes the connections made so far.
    pub fn build(config: &AudioConfig, handler: Box<dyn BlockHandler>) -> Result<Self> {
        let mut context = AudioContext::new(ContextOptions {
            sample_rate: config.sample_rate,
        })?;
        let mut wiring = Wiring::default();

        match wire(&mut context, &mut wiring, config, handler) {
            Ok((source, analyser, processor)) => {
                tracing::info!(
                    sample_rate = config.sample_rate,
                    block_size = config.block_size,
                    fft_size = config.fft_size,
                    "processing graph ready"
                );
                Ok(Self {
                    context,
                    source,
                    analyser,
                    processor,
                })
            }
            Err(err) => {
                wiring.rollback(&mut context);
                context.close();
                tracing::error!(error = %err, "graph wiring failed");
                Err(match err {
                    VisualiserError::GraphWiring(_) => err,
                    other => VisualiserError::wiring(other.to_string()),
                })
            }
        }
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    pub fn blocks_delivered(&self) -> u64 {
        self.context.blocks_delivered(self.processor)
    }

    pub fn analyser_mut(&mut self) -> Result<&mut AnalyserNode> {
        self.context.analyser_mut(self.analyser)
    }

    /// Attaches `buffer` and starts it. A source node plays once, so a graph
    /// that already played swaps in a fresh source wired the same way.
    pub fn start_source(
        &mut self,
        buffer: Arc<DecodedBuffer>,
        on_ended: Box<dyn FnMut() + Send>,
    ) -> Result<()> {
        if buffer.sample_rate() != self.sample_rate() {
            return Err(VisualiserError::invalid_state(format!(
                "buffer sample rate {} does not match the graph's {}",
                buffer.sample_rate(),
                self.sample_rate()
            )));
        }
        if !self.context.is_unused_source(self.source) {
            self.replace_source()?;
        }
        self.context.set_buffer(self.source, buffer)?;
        self.context.set_on_ended(self.source, on_ended)?;
        self.context.start(self.source)
    }

    pub fn stop_source(&mut self) -> Result<()> {
        self.context.stop(self.source)
    }

    pub fn is_playing(&self) -> bool {
        self.context.is_playing(self.source)
    }

    /// Renders interleaved audio, driving block callbacks along the way.
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> Result<()> {
        self.context.render(output, channels)
    }

    /// Disconnects every node and closes the context.
    pub fn teardown(mut self) {
        self.context.close();
        tracing::info!("processing graph torn down");
    }

    fn replace_source(&mut self) -> Result<()> {
        let destination = self.context.destination();
        let source = self.context.create_buffer_source()?;
        let mut wiring = Wiring::default();
        let wired = wiring
            .connect(&mut self.context, source, self.analyser)
            .and_then(|()| wiring.connect(&mut self.context, source, destination));
        if let Err(err) = wired {
            wiring.rollback(&mut self.context);
            return Err(err);
        }

        self.context.disconnect(self.source);
        self.source = source;
        tracing::debug!("replaced spent buffer source");
        Ok(())
    }
}

fn wire(
    context: &mut AudioContext,
    wiring: &mut Wiring,
    config: &AudioConfig,
    handler: Box<dyn BlockHandler>,
) -> Result<(NodeId, NodeId, NodeId)> {
    let destination = context.destination();

    let processor = context
        .create_block_processor(config.block_size)
        .map_err(|err| VisualiserError::wiring(format!("creating block processor: {err}")))?;
    wiring.connect(context, processor, destination)?;
    context.arm(processor, handler)?;
    wiring.armed = Some(processor);

    let analyser = context
        .create_analyser(AnalyserSettings::new(config.fft_size, config.smoothing))
        .map_err(|err| VisualiserError::wiring(format!("creating analyser: {err}")))?;
    let source = context
        .create_buffer_source()
        .map_err(|err| VisualiserError::wiring(format!("creating buffer source: {err}")))?;

    wiring.connect(context, source, analyser)?;
    wiring.connect(context, analyser, processor)?;
    wiring.connect(context, source, destination)?;

    Ok((source, analyser, processor))
}

/// Connections made during a build, so a failure can undo exactly those.
#[derive(Debug, Default)]
struct Wiring {
    edges: Vec<(NodeId, NodeId)>,
    armed: Option<NodeId>,
}

impl Wiring {
    fn connect(&mut self, context: &mut AudioContext, from: NodeId, to: NodeId) -> Result<()> {
        context.connect(from, to)?;
        self.edges.push((from, to));
        Ok(())
    }

    fn rollback(&mut self, context: &mut AudioContext) {
        if let Some(processor) = self.armed.take() {
            context.disarm(processor);
        }
        for (from, to) in self.edges.drain(..).rev() {
            context.disconnect_edge(from, to);
        }
    }
}

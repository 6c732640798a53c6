//! In-process audio engine providing the node graph the visualiser is wired
//! on: a destination, buffer sources, analysers and block processors, rendered
//! in fixed render quanta in topological order.

mod nodes;

use std::{fmt, sync::Arc};

pub use nodes::{validate_block_size, BlockHandler, BlockScope, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

use nodes::{BlockProcessorNode, BufferSourceNode, SourceState};

use crate::{AnalyserNode, AnalyserSettings, DecodedBuffer, Result, VisualiserError};

/// Frames rendered per internal processing step.
pub const RENDER_QUANTUM: usize = 128;
pub const MIN_SAMPLE_RATE: u32 = 3_000;
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Opaque handle to a node owned by an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Destination,
    BufferSource,
    Analyser,
    BlockProcessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub sample_rate: u32,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { sample_rate: 44_100 }
    }
}

enum Node {
    Destination,
    BufferSource(BufferSourceNode),
    Analyser(AnalyserNode),
    BlockProcessor(BlockProcessorNode),
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::Destination => NodeKind::Destination,
            Node::BufferSource(_) => NodeKind::BufferSource,
            Node::Analyser(_) => NodeKind::Analyser,
            Node::BlockProcessor(_) => NodeKind::BlockProcessor,
        }
    }
}

struct NodeSlot {
    node: Node,
    output: Vec<f32>,
}

pub struct AudioContext {
    sample_rate: u32,
    state: ContextState,
    nodes: Vec<NodeSlot>,
    edges: Vec<(NodeId, NodeId)>,
    order: Vec<NodeId>,
    mix: Vec<f32>,
    current_frame: u64,
    /// Read position inside the destination's last rendered quantum.
    drained: usize,
}

impl AudioContext {
    pub fn new(options: ContextOptions) -> Result<Self> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&options.sample_rate) {
            return Err(VisualiserError::UnsupportedEnvironment(format!(
                "sample rate {} Hz is outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE} Hz",
                options.sample_rate
            )));
        }

        let mut context = Self {
            sample_rate: options.sample_rate,
            state: ContextState::Running,
            nodes: Vec::new(),
            edges: Vec::new(),
            order: Vec::new(),
            mix: vec![0.0; RENDER_QUANTUM],
            current_frame: 0,
            drained: RENDER_QUANTUM,
        };
        context.insert(Node::Destination);
        tracing::debug!(sample_rate = options.sample_rate, "audio context created");
        Ok(context)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.current_frame as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id.0).map(|slot| slot.node.kind())
    }

    pub fn create_buffer_source(&mut self) -> Result<NodeId> {
        self.ensure_running()?;
        Ok(self.insert(Node::BufferSource(BufferSourceNode::new())))
    }

    pub fn create_analyser(&mut self, settings: AnalyserSettings) -> Result<NodeId> {
        self.ensure_running()?;
        let analyser = AnalyserNode::new(settings)?;
        Ok(self.insert(Node::Analyser(analyser)))
    }

    pub fn create_block_processor(&mut self, block_size: usize) -> Result<NodeId> {
        self.ensure_running()?;
        let processor = BlockProcessorNode::new(block_size)?;
        Ok(self.insert(Node::BlockProcessor(processor)))
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if self.state == ContextState::Closed {
            return Err(VisualiserError::wiring("cannot connect nodes of a closed context"));
        }
        let from_kind = self
            .node_kind(from)
            .ok_or_else(|| VisualiserError::wiring(format!("unknown node {from:?}")))?;
        let to_kind = self
            .node_kind(to)
            .ok_or_else(|| VisualiserError::wiring(format!("unknown node {to:?}")))?;

        if from_kind == NodeKind::Destination {
            return Err(VisualiserError::wiring("the destination has no outputs"));
        }
        if to_kind == NodeKind::BufferSource {
            return Err(VisualiserError::wiring("buffer sources have no inputs"));
        }
        if from == to || self.reaches(to, from) {
            return Err(VisualiserError::wiring(format!(
                "connecting {from:?} to {to:?} would create a cycle"
            )));
        }
        if self.is_connected(from, to) {
            return Ok(());
        }

        self.edges.push((from, to));
        self.rebuild_order();
        tracing::debug!(?from_kind, ?to_kind, "connected nodes");
        Ok(())
    }

    /// Removes a single edge. Returns whether it existed.
    pub fn disconnect_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let before = self.edges.len();
        self.edges.retain(|&edge| edge != (from, to));
        let removed = self.edges.len() != before;
        if removed {
            self.rebuild_order();
        }
        removed
    }

    /// Removes every edge touching `node`.
    pub fn disconnect(&mut self, node: NodeId) {
        self.edges.retain(|&(from, to)| from != node && to != node);
        self.rebuild_order();
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Attaches the block callback. The processor must already feed the
    /// destination, otherwise it would never be invoked.
    pub fn arm(&mut self, processor: NodeId, handler: Box<dyn BlockHandler>) -> Result<()> {
        self.ensure_running()?;
        let destination = self.destination();
        if !self.is_connected(processor, destination) {
            return Err(VisualiserError::wiring(
                "block processor must be connected to the destination before it is armed",
            ));
        }
        match self.nodes.get_mut(processor.0).map(|slot| &mut slot.node) {
            Some(Node::BlockProcessor(node)) => {
                node.handler = Some(handler);
                Ok(())
            }
            _ => Err(VisualiserError::wiring(format!("{processor:?} is not a block processor"))),
        }
    }

    pub fn disarm(&mut self, processor: NodeId) {
        if let Some(Node::BlockProcessor(node)) = self.nodes.get_mut(processor.0).map(|slot| &mut slot.node) {
            node.handler = None;
        }
    }

    pub fn blocks_delivered(&self, processor: NodeId) -> u64 {
        match self.nodes.get(processor.0).map(|slot| &slot.node) {
            Some(Node::BlockProcessor(node)) => node.blocks_delivered,
            _ => 0,
        }
    }

    pub fn set_buffer(&mut self, source: NodeId, buffer: Arc<DecodedBuffer>) -> Result<()> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(VisualiserError::invalid_state(format!(
                "buffer sample rate {} does not match context rate {}",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }
        self.source_mut(source)?.set_buffer(buffer)
    }

    /// Registers the callback fired once when the source finishes.
    pub fn set_on_ended(&mut self, source: NodeId, on_ended: Box<dyn FnMut() + Send>) -> Result<()> {
        self.source_mut(source)?.on_ended = Some(on_ended);
        Ok(())
    }

    pub fn start(&mut self, source: NodeId) -> Result<()> {
        self.ensure_running()?;
        self.source_mut(source)?.start()
    }

    pub fn stop(&mut self, source: NodeId) -> Result<()> {
        self.source_mut(source)?.stop()
    }

    /// Whether a source can still take a buffer and be started.
    pub fn is_unused_source(&self, source: NodeId) -> bool {
        matches!(
            self.nodes.get(source.0).map(|slot| &slot.node),
            Some(Node::BufferSource(node)) if node.is_unused()
        )
    }

    pub fn is_playing(&self, source: NodeId) -> bool {
        matches!(
            self.nodes.get(source.0).map(|slot| &slot.node),
            Some(Node::BufferSource(node)) if node.state == SourceState::Playing
        )
    }

    pub fn analyser_mut(&mut self, id: NodeId) -> Result<&mut AnalyserNode> {
        match self.nodes.get_mut(id.0).map(|slot| &mut slot.node) {
            Some(Node::Analyser(node)) => Ok(node),
            _ => Err(VisualiserError::invalid_state(format!("{id:?} is not an analyser"))),
        }
    }

    /// Renders audio into `output`, interleaved over `channels`, processing
    /// as many render quanta as needed.
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> Result<()> {
        let channels = channels.max(1);
        for frame in output.chunks_mut(channels) {
            if self.drained == RENDER_QUANTUM {
                self.render_quantum()?;
                self.drained = 0;
            }
            let sample = self.nodes[0].output[self.drained];
            frame.fill(sample);
            self.drained += 1;
        }
        Ok(())
    }

    /// Processes a single render quantum through the whole graph.
    pub fn render_quantum(&mut self) -> Result<()> {
        self.ensure_running()?;
        let destination = self.destination();
        let end_time = (self.current_frame + RENDER_QUANTUM as u64) as f64 / self.sample_rate as f64;

        for position in 0..self.order.len() {
            let id = self.order[position];

            self.mix.fill(0.0);
            for &(from, to) in &self.edges {
                if to == id {
                    for (mixed, sample) in self.mix.iter_mut().zip(&self.nodes[from.0].output) {
                        *mixed += *sample;
                    }
                }
            }

            let NodeSlot { node, output } = &mut self.nodes[id.0];
            match node {
                Node::Destination => output.copy_from_slice(&self.mix),
                Node::BufferSource(source) => source.render(output),
                Node::Analyser(analyser) => {
                    analyser.push_samples(&self.mix);
                    output.copy_from_slice(&self.mix);
                }
                Node::BlockProcessor(processor) => {
                    output.fill(0.0);
                    if !self.edges.contains(&(id, destination)) || !processor.accumulate(&self.mix) {
                        continue;
                    }
                    let pending = processor.take_pending();
                    let handler = processor.handler.take();
                    let block_index = processor.blocks_delivered;

                    let handler = handler.map(|mut handler| {
                        let analyser = self.upstream_analyser(id);
                        let mut scope = BlockScope::new(analyser, &pending, block_index, end_time);
                        handler.on_block(&mut scope);
                        handler
                    });

                    if let Node::BlockProcessor(processor) = &mut self.nodes[id.0].node {
                        processor.handler = handler;
                        processor.restore_pending(pending);
                    }
                }
            }
        }

        self.current_frame += RENDER_QUANTUM as u64;
        Ok(())
    }

    /// Tears the graph down: drops every callback and edge. Nothing fires after
    /// this returns.
    pub fn close(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        self.state = ContextState::Closed;
        self.edges.clear();
        for slot in &mut self.nodes {
            match &mut slot.node {
                Node::BlockProcessor(node) => node.handler = None,
                Node::BufferSource(node) => node.on_ended = None,
                _ => {}
            }
        }
        self.rebuild_order();
        tracing::debug!("audio context closed");
    }

    fn upstream_analyser(&mut self, id: NodeId) -> Option<&mut AnalyserNode> {
        let upstream = self
            .edges
            .iter()
            .find(|&&(from, to)| to == id && matches!(self.nodes[from.0].node, Node::Analyser(_)))
            .map(|&(from, _)| from)?;
        match &mut self.nodes[upstream.0].node {
            Node::Analyser(analyser) => Some(analyser),
            _ => None,
        }
    }

    fn source_mut(&mut self, id: NodeId) -> Result<&mut BufferSourceNode> {
        match self.nodes.get_mut(id.0).map(|slot| &mut slot.node) {
            Some(Node::BufferSource(node)) => Ok(node),
            _ => Err(VisualiserError::invalid_state(format!("{id:?} is not a buffer source"))),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(VisualiserError::invalid_state("audio context is closed")),
        }
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeSlot {
            node,
            output: vec![0.0; RENDER_QUANTUM],
        });
        self.rebuild_order();
        id
    }

    /// Whether `to` is reachable from `from` following edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if std::mem::replace(&mut seen[current.0], true) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|&&(edge_from, _)| edge_from == current)
                    .map(|&(_, edge_to)| edge_to),
            );
        }
        false
    }

    fn rebuild_order(&mut self) {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for &(_, to) in &self.edges {
            in_degree[to.0] += 1;
        }

        let mut ready: Vec<NodeId> = (0..self.nodes.len())
            .rev()
            .filter(|&index| in_degree[index] == 0)
            .map(NodeId)
            .collect();
        self.order.clear();

        while let Some(id) = ready.pop() {
            self.order.push(id);
            for &(from, to) in &self.edges {
                if from == id {
                    in_degree[to.0] -= 1;
                    if in_degree[to.0] == 0 {
                        ready.push(to);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("state", &self.state)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges)
            .field("current_frame", &self.current_frame)
            .finish()
    }
}

use super::{Destination, NodeId, SynthBackend, SynthError, Waveform};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainPoint {
    pub time: f64,
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Oscillator {
        waveform: Waveform,
        frequency: f32,
        output: Option<Destination>,
        started_at: Option<f64>,
        stop_at: Option<f64>,
    },
    Gain {
        /// Automation points sorted by time; the first is the initial value
        points: Vec<GainPoint>,
        output: Option<Destination>,
    },
}

/// Backend-side node graph with its own clock.
///
/// Holds everything needed to answer liveness questions and to render the
/// session offline. Nodes are never removed; ids index into `nodes`.
#[derive(Debug, Default)]
pub struct NodeGraph {
    now: f64,
    nodes: Vec<Node>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the backend clock. Time never runs backwards.
    pub fn set_time(&mut self, now: f64) {
        self.now = self.now.max(now);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SynthError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(SynthError::UnknownNode(id))
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    /// Oscillators that have started and are not yet stopped at the current time.
    pub fn live_oscillators(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| match node {
                Node::Oscillator {
                    started_at: Some(_),
                    stop_at,
                    ..
                } => stop_at.map_or(true, |t| t > self.now),
                _ => false,
            })
            .count()
    }

    pub fn is_sounding(&self, id: NodeId) -> bool {
        matches!(
            self.node(id),
            Some(Node::Oscillator { started_at: Some(_), stop_at, .. })
                if stop_at.map_or(true, |t| t > self.now)
        )
    }

    /// Gain value at `time` following the recorded automation.
    pub fn gain_at(&self, id: NodeId, time: f64) -> Option<f32> {
        match self.node(id)? {
            Node::Gain { points, .. } => Some(evaluate(points, time)),
            _ => None,
        }
    }

    /// End of the last scheduled event, the natural length of the session.
    pub fn last_event_time(&self) -> f64 {
        self.nodes
            .iter()
            .map(|node| match node {
                Node::Oscillator {
                    started_at, stop_at, ..
                } => stop_at.or(*started_at).unwrap_or(0.0),
                Node::Gain { points, .. } => points.last().map_or(0.0, |p| p.time),
            })
            .fold(self.now, f64::max)
    }
}

/// Piecewise automation: exponential between positive points, linear otherwise.
pub fn evaluate(points: &[GainPoint], time: f64) -> f32 {
    let Some(first) = points.first() else {
        return 0.0;
    };
    if time <= first.time {
        return first.value;
    }
    let next = points.partition_point(|p| p.time <= time);
    let prev = &points[next - 1];
    let Some(target) = points.get(next) else {
        return prev.value;
    };

    let span = target.time - prev.time;
    if span <= 0.0 {
        return target.value;
    }
    let t = ((time - prev.time) / span) as f32;
    if prev.value > 0.0 && target.value > 0.0 {
        prev.value * (target.value / prev.value).powf(t)
    } else {
        prev.value + (target.value - prev.value) * t
    }
}

impl SynthBackend for NodeGraph {
    fn current_time(&self) -> f64 {
        self.now
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f32) -> Result<NodeId, SynthError> {
        Ok(self.push(Node::Oscillator {
            waveform,
            frequency,
            output: None,
            started_at: None,
            stop_at: None,
        }))
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, SynthError> {
        let now = self.now;
        Ok(self.push(Node::Gain {
            points: vec![GainPoint {
                time: now,
                value: initial.max(0.0),
            }],
            output: None,
        }))
    }

    fn connect(&mut self, source: NodeId, destination: Destination) -> Result<(), SynthError> {
        if let Destination::Node(target) = destination {
            match self.node(target) {
                Some(Node::Gain { .. }) => {}
                Some(_) => return Err(SynthError::WrongKind(target, "gain")),
                None => return Err(SynthError::UnknownNode(target)),
            }
        }
        match self.node_mut(source)? {
            Node::Oscillator { output, .. } | Node::Gain { output, .. } => {
                *output = Some(destination);
            }
        }
        Ok(())
    }

    fn start(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        let time = self.now + in_secs.max(0.0);
        match self.node_mut(oscillator)? {
            Node::Oscillator { started_at, .. } => {
                started_at.get_or_insert(time);
                Ok(())
            }
            Node::Gain { .. } => Err(SynthError::WrongKind(oscillator, "oscillator")),
        }
    }

    fn ramp_gain(&mut self, gain: NodeId, target: f32, in_secs: f64) -> Result<(), SynthError> {
        let time = self.now + in_secs.max(0.0);
        match self.node_mut(gain)? {
            Node::Gain { points, .. } => {
                let at = points.partition_point(|p| p.time <= time);
                points.insert(
                    at,
                    GainPoint {
                        time,
                        value: target.max(0.0),
                    },
                );
                Ok(())
            }
            Node::Oscillator { .. } => Err(SynthError::WrongKind(gain, "gain")),
        }
    }

    fn hold_gain(&mut self, gain: NodeId) -> Result<(), SynthError> {
        let now = self.now;
        match self.node_mut(gain)? {
            Node::Gain { points, .. } => {
                let value = evaluate(points, now);
                points.retain(|p| p.time <= now);
                points.push(GainPoint { time: now, value });
                Ok(())
            }
            Node::Oscillator { .. } => Err(SynthError::WrongKind(gain, "gain")),
        }
    }

    fn stop(&mut self, oscillator: NodeId, in_secs: f64) -> Result<(), SynthError> {
        let time = self.now + in_secs.max(0.0);
        match self.node_mut(oscillator)? {
            Node::Oscillator { stop_at, .. } => {
                *stop_at = Some(stop_at.map_or(time, |t| t.min(time)));
                Ok(())
            }
            Node::Gain { .. } => Err(SynthError::WrongKind(oscillator, "oscillator")),
        }
    }
}

use std::sync::Arc;

use bevy::{app::App, prelude::Entity};
use binaura_core::{BuildError, Clock, MapFn, SignalSource};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use synapses::{Connection, Lowpass};
use tracing::info;
use transcoder::{eval_points, solve_decoders, Ensemble, EnsembleSpec};

use crate::{ExecOrder, InputAccum, Output, Probe, ProbeKind, Simulation, SimulationPlugin, Stage};

/// Identifies an ensemble or stage added to a [`NetworkBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeHandle(usize);

impl ProbeHandle {
    pub(crate) fn index(&self) -> usize {
        self.0
    }
}

enum BuildNode {
    Ensemble(EnsembleSpec),
    Source {
        label: String,
        source: Box<dyn SignalSource>,
        size_out: usize,
    },
    Transform {
        label: String,
        function: MapFn,
        size_in: usize,
        size_out: usize,
    },
    Sink {
        label: String,
        size_in: usize,
    },
}

impl BuildNode {
    fn label(&self) -> &str {
        match self {
            BuildNode::Ensemble(spec) => &spec.label,
            BuildNode::Source { label, .. } => label,
            BuildNode::Transform { label, .. } => label,
            BuildNode::Sink { label, .. } => label,
        }
    }

    /// Dimensionality of the value this node carries downstream. For an
    /// ensemble that is the represented (decoded) dimensionality, not the
    /// neuron count.
    fn value_out(&self) -> usize {
        match self {
            BuildNode::Ensemble(spec) => spec.dimensions,
            BuildNode::Source { size_out, .. } => *size_out,
            BuildNode::Transform { size_out, .. } => *size_out,
            BuildNode::Sink { size_in, .. } => *size_in,
        }
    }

    /// Dimensionality this node accepts, if it accepts input at all.
    fn value_in(&self) -> Option<usize> {
        match self {
            BuildNode::Ensemble(spec) => Some(spec.dimensions),
            BuildNode::Source { .. } => None,
            BuildNode::Transform { size_in, .. } => Some(*size_in),
            BuildNode::Sink { size_in, .. } => Some(*size_in),
        }
    }
}

struct ConnSpec {
    source: NodeHandle,
    target: NodeHandle,
    synapse: f64,
    function: Option<MapFn>,
}

struct ProbeSpec {
    target: NodeHandle,
    kind: Option<ProbeKind>,
    synapse: Option<f64>,
}

/// Assembles the whole network graph, then hands an immutable topology to the
/// simulator. All validation and decoder fitting happens here, before the
/// first tick; the run loop itself cannot fail.
pub struct NetworkBuilder {
    dt: f64,
    seed: u64,
    n_eval_points: usize,
    nodes: Vec<BuildNode>,
    connections: Vec<ConnSpec>,
    probes: Vec<ProbeSpec>,
}

impl NetworkBuilder {
    pub fn new(dt: f64, seed: u64) -> Self {
        NetworkBuilder {
            dt,
            seed,
            n_eval_points: 500,
            nodes: Vec::new(),
            connections: Vec::new(),
            probes: Vec::new(),
        }
    }

    /// Number of representative inputs used for every decoder fit.
    pub fn eval_point_count(&mut self, count: usize) {
        self.n_eval_points = count.max(2);
    }

    pub fn ensemble(&mut self, spec: EnsembleSpec) -> NodeHandle {
        self.push(BuildNode::Ensemble(spec))
    }

    pub fn source(
        &mut self,
        label: &str,
        size_out: usize,
        source: impl SignalSource + 'static,
    ) -> NodeHandle {
        self.push(BuildNode::Source {
            label: label.to_string(),
            source: Box::new(source),
            size_out,
        })
    }

    pub fn transform(
        &mut self,
        label: &str,
        size_in: usize,
        size_out: usize,
        function: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> NodeHandle {
        self.push(BuildNode::Transform {
            label: label.to_string(),
            function: Arc::new(function),
            size_in,
            size_out,
        })
    }

    pub fn sink(&mut self, label: &str, size_in: usize) -> NodeHandle {
        self.push(BuildNode::Sink {
            label: label.to_string(),
            size_in,
        })
    }

    /// Route `source` into `target` through an exponential synapse with time
    /// constant `synapse` seconds (`0.0` for no filtering).
    pub fn connect(&mut self, source: NodeHandle, target: NodeHandle, synapse: f64) {
        self.connections.push(ConnSpec {
            source,
            target,
            synapse,
            function: None,
        });
    }

    /// Like [`connect`](Self::connect), applying `function` to the
    /// transmitted value. For spiking sources the function is folded into the
    /// decoder fit; for stages it is applied directly.
    pub fn connect_fn(
        &mut self,
        source: NodeHandle,
        target: NodeHandle,
        synapse: f64,
        function: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) {
        self.connections.push(ConnSpec {
            source,
            target,
            synapse,
            function: Some(Arc::new(function)),
        });
    }

    /// Record `target` every tick: the decoded estimate for ensembles, the
    /// output value for stages, optionally smoothed by a synapse.
    pub fn probe(&mut self, target: NodeHandle, synapse: Option<f64>) -> ProbeHandle {
        self.probes.push(ProbeSpec {
            target,
            kind: None,
            synapse,
        });
        ProbeHandle(self.probes.len() - 1)
    }

    /// Record the raw spike indicator vector of an ensemble.
    pub fn probe_spikes(&mut self, target: NodeHandle) -> ProbeHandle {
        self.probes.push(ProbeSpec {
            target,
            kind: Some(ProbeKind::Spikes),
            synapse: None,
        });
        ProbeHandle(self.probes.len() - 1)
    }

    fn push(&mut self, node: BuildNode) -> NodeHandle {
        self.nodes.push(node);
        NodeHandle(self.nodes.len() - 1)
    }

    fn node(&self, handle: NodeHandle) -> Result<&BuildNode, BuildError> {
        self.nodes
            .get(handle.0)
            .ok_or(BuildError::UnknownHandle(handle.0))
    }

    pub fn build(self) -> Result<Simulation, BuildError> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        // construct every ensemble up front, in declaration order, so the
        // seed fully determines tuning curves and decoders
        let mut ensembles: Vec<Option<Ensemble>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            ensembles.push(match node {
                BuildNode::Ensemble(spec) => Some(Ensemble::build(spec, &mut rng)?),
                _ => None,
            });
        }

        // fit decoders and validate every connection before anything spawns
        struct BuiltConn {
            label: String,
            source: usize,
            target: usize,
            synapse: f64,
            decoders: Option<Array2<f64>>,
            function: Option<MapFn>,
            size: usize,
        }

        let mut built_conns = Vec::with_capacity(self.connections.len());
        for spec in &self.connections {
            let source = self.node(spec.source)?;
            let target = self.node(spec.target)?;
            let label = format!("{}->{}", source.label(), target.label());

            let (decoders, function, size) = match &ensembles[spec.source.0] {
                Some(ensemble) => {
                    let points = eval_points(
                        ensemble.dimensions,
                        ensemble.radius,
                        self.n_eval_points,
                        &mut rng,
                    );
                    let decoders = solve_decoders(ensemble, spec.function.as_ref(), &points)?;
                    let size = decoders.ncols();
                    (Some(decoders), None, size)
                }
                None => {
                    let size = match &spec.function {
                        Some(function) => function(&vec![0.0; source.value_out()]).len(),
                        None => source.value_out(),
                    };
                    (None, spec.function.clone(), size)
                }
            };

            let expected = target.value_in().unwrap_or(0);
            if target.value_in().is_none() || expected != size {
                return Err(BuildError::DimensionMismatch {
                    connection: label,
                    expected,
                    found: size,
                });
            }

            built_conns.push(BuiltConn {
                label,
                source: spec.source.0,
                target: spec.target.0,
                synapse: spec.synapse,
                decoders,
                function,
                size,
            });
        }

        // resolve probe kinds and fit identity decoders where needed
        struct BuiltProbe {
            label: String,
            target: usize,
            kind: ProbeKind,
            decoders: Option<Array2<f64>>,
            filter: Option<Lowpass>,
        }

        let mut built_probes = Vec::with_capacity(self.probes.len());
        for spec in &self.probes {
            let target = self.node(spec.target)?;
            let label = target.label().to_string();
            let (kind, decoders, dimensions) = match (&ensembles[spec.target.0], spec.kind) {
                (Some(ensemble), Some(ProbeKind::Spikes)) => {
                    (ProbeKind::Spikes, None, ensemble.n_neurons())
                }
                (Some(ensemble), _) => {
                    let points = eval_points(
                        ensemble.dimensions,
                        ensemble.radius,
                        self.n_eval_points,
                        &mut rng,
                    );
                    let decoders = solve_decoders(ensemble, None, &points)?;
                    (ProbeKind::Decoded, Some(decoders), ensemble.dimensions)
                }
                (None, Some(ProbeKind::Spikes)) => {
                    return Err(BuildError::InvalidProbe(
                        label,
                        "spike probes only attach to ensembles".to_string(),
                    ));
                }
                (None, _) => (ProbeKind::Output, None, target.value_out()),
            };

            built_probes.push(BuiltProbe {
                label,
                target: spec.target.0,
                kind,
                decoders,
                filter: spec
                    .synapse
                    .map(|tau| Lowpass::new(tau, dimensions)),
            });
        }

        // assemble the world: one entity per node, connection and probe
        let mut app = App::new();
        app.add_plugins(SimulationPlugin);
        app.insert_resource(Clock::new(self.dt));

        let world = app.world_mut();
        let mut order = ExecOrder::default();
        let mut node_entities = Vec::with_capacity(self.nodes.len());

        for (node, ensemble) in self.nodes.into_iter().zip(ensembles) {
            let entity = match node {
                BuildNode::Ensemble(spec) => {
                    let ensemble = ensemble.expect("ensemble was built above");
                    let entity = world
                        .spawn((
                            ensemble,
                            InputAccum(vec![0.0; spec.dimensions]),
                            Output(vec![0.0; spec.n_neurons]),
                        ))
                        .id();
                    order.ensembles.push(entity);
                    entity
                }
                BuildNode::Source {
                    source, size_out, ..
                } => {
                    let entity = world
                        .spawn((
                            Stage::Source(source),
                            InputAccum(Vec::new()),
                            Output(vec![0.0; size_out]),
                        ))
                        .id();
                    order.sources.push(entity);
                    entity
                }
                BuildNode::Transform {
                    function,
                    size_in,
                    size_out,
                    ..
                } => {
                    let entity = world
                        .spawn((
                            Stage::Transform(function),
                            InputAccum(vec![0.0; size_in]),
                            Output(vec![0.0; size_out]),
                        ))
                        .id();
                    order.stages.push(entity);
                    entity
                }
                BuildNode::Sink { size_in, .. } => {
                    let entity = world
                        .spawn((
                            Stage::Sink,
                            InputAccum(vec![0.0; size_in]),
                            Output(vec![0.0; size_in]),
                        ))
                        .id();
                    order.stages.push(entity);
                    entity
                }
            };
            node_entities.push(entity);
        }

        let mut n_feeds = (0usize, 0usize);
        for conn in built_conns {
            let feeds_ensemble = order.ensembles.contains(&node_entities[conn.target]);
            let entity = world
                .spawn(Connection {
                    label: conn.label,
                    source: node_entities[conn.source],
                    target: node_entities[conn.target],
                    decoders: conn.decoders,
                    function: conn.function,
                    filter: Lowpass::new(conn.synapse, conn.size),
                })
                .id();
            if feeds_ensemble {
                order.ensemble_feeds.push(entity);
                n_feeds.0 += 1;
            } else {
                order.stage_feeds.push(entity);
                n_feeds.1 += 1;
            }
        }

        let mut probe_entities = Vec::with_capacity(built_probes.len());
        for probe in built_probes {
            let entity = world
                .spawn(Probe {
                    label: probe.label,
                    target: node_entities[probe.target],
                    kind: probe.kind,
                    decoders: probe.decoders,
                    filter: probe.filter,
                    history: Vec::new(),
                })
                .id();
            order.probes.push(entity);
            probe_entities.push(entity);
        }

        info!(
            ensembles = order.ensembles.len(),
            stages = order.sources.len() + order.stages.len(),
            ensemble_feeds = n_feeds.0,
            stage_feeds = n_feeds.1,
            probes = order.probes.len(),
            dt = self.dt,
            "network built"
        );

        app.insert_resource(order);
        Ok(Simulation::new(app, self.dt, probe_entities))
    }
}

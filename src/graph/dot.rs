//! Graphviz export of a compiled graph.

use std::{fmt, io};

use petgraph::{
	dot::Dot,
	graph::{DiGraph, NodeIndex},
	visit::EdgeRef,
};

use crate::{
	device::QueueType,
	graph::{builder::Topology, compile::CompiledGraph, dependency::HazardKind, virtual_resource::ResourceSource},
	Error,
	Result,
};

enum Node {
	Stage { name: String, queue: QueueType, position: usize },
	Resource { name: String, source: &'static str },
}

impl fmt::Display for Node {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Node::Stage { name, queue, position } => write!(f, "{}: {} ({})", position, name, queue),
			Node::Resource { name, source } => write!(f, "{} ({})", name, source),
		}
	}
}

enum Edge {
	Read,
	Write,
	Hazard { kind: HazardKind, cross_queue: bool },
}

impl fmt::Display for Edge {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Edge::Read => f.write_str("read"),
			Edge::Write => f.write_str("write"),
			Edge::Hazard { kind, .. } => write!(f, "{}", kind),
		}
	}
}

fn build(topology: &Topology, compiled: &CompiledGraph) -> DiGraph<Node, Edge> {
	let mut graph = DiGraph::new();

	let stages: Vec<NodeIndex> = topology
		.stages
		.iter()
		.map(|(id, stage)| {
			graph.add_node(Node::Stage {
				name: stage.name.clone(),
				queue: stage.queue,
				position: compiled.positions[id.index()],
			})
		})
		.collect();
	let resources: Vec<NodeIndex> = topology
		.resources
		.iter()
		.map(|(_, res)| {
			let source = match res.source {
				ResourceSource::Create => "transient",
				ResourceSource::Import(_) => "imported",
				ResourceSource::Persistent(_) => "persistent",
			};
			graph.add_node(Node::Resource {
				name: res.name.clone(),
				source,
			})
		})
		.collect();

	for (_, usage) in topology.usages.iter() {
		let (stage, resource) = (stages[usage.stage], resources[usage.resource]);
		let direction = usage.kind.direction();
		if direction.reads() {
			graph.add_edge(resource, stage, Edge::Read);
		}
		if direction.writes() {
			graph.add_edge(stage, resource, Edge::Write);
		}
	}

	for hazard in compiled.deps.hazards() {
		graph.add_edge(
			stages[hazard.producer],
			stages[hazard.consumer],
			Edge::Hazard {
				kind: hazard.kind,
				cross_queue: hazard.cross_queue,
			},
		);
	}

	graph
}

pub(crate) fn write(out: &mut impl io::Write, topology: &Topology, compiled: &CompiledGraph) -> Result<()> {
	let graph = build(topology, compiled);
	let dot = Dot::with_attr_getters(
		&graph,
		&[],
		&|_, edge| match edge.weight() {
			Edge::Read | Edge::Write => String::new(),
			Edge::Hazard { cross_queue: true, .. } => "style = dashed, color = red".to_string(),
			Edge::Hazard { cross_queue: false, .. } => "style = dashed".to_string(),
		},
		&|_, (_, node)| match node {
			Node::Stage { .. } => "shape = box".to_string(),
			Node::Resource { .. } => "shape = ellipse".to_string(),
		},
	);
	write!(out, "{}", dot).map_err(|err| Error::Message(format!("failed to write graph: {}", err)))
}

//! Hazard detection and stage ordering.
//!
//! Every pair of usages of a resource is checked in registration order: if they come from different stages, touch
//! overlapping subresources, and at least one of them writes, the earlier stage must run before the later one.
//! Overlapping usages within one stage must agree on the image layout.

use std::{
	cmp::Reverse,
	collections::BinaryHeap,
	fmt,
};

use petgraph::{
	algo::tarjan_scc,
	graph::{DiGraph, NodeIndex},
	Direction,
};
use tracing::{span, Level};

use crate::{
	graph::{
		builder::Topology,
		validation::{Message, Validator},
		virtual_resource::UsageKind,
	},
	resource::ResourceDesc,
	Error,
	Result,
};

#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum HazardKind {
	ReadAfterWrite,
	WriteAfterRead,
	WriteAfterWrite,
}

impl fmt::Display for HazardKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			HazardKind::ReadAfterWrite => "read-after-write",
			HazardKind::WriteAfterRead => "write-after-read",
			HazardKind::WriteAfterWrite => "write-after-write",
		})
	}
}

/// `consumer` must wait for `producer` because of `resource`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Hazard {
	pub producer: usize,
	pub consumer: usize,
	pub resource: usize,
	pub kind: HazardKind,
	pub cross_queue: bool,
}

/// Stages as nodes, with an edge for every pair of stages with at least one hazard between them.
pub(crate) struct DependencyGraph {
	graph: DiGraph<usize, Vec<usize>>,
	hazards: Vec<Hazard>,
}

impl DependencyGraph {
	pub fn analyze(topology: &Topology, validator: &Validator) -> Result<Self> {
		let span = span!(Level::TRACE, "analyze dependencies");
		let _e = span.enter();

		let mut graph: DiGraph<usize, Vec<usize>> = DiGraph::with_capacity(topology.stages.len(), 0);
		for (id, _) in topology.stages.iter() {
			graph.add_node(id.index());
		}

		let mut hazards = Vec::new();
		for (res_id, res) in topology.resources.iter() {
			for (i, &first) in res.usages.iter().enumerate() {
				let a = topology.usage(first);
				for &second in &res.usages[i + 1..] {
					let b = topology.usage(second);
					if !a.range.intersects(&b.range) {
						continue;
					}

					if a.stage == b.stage {
						let stage = topology.stage(a.stage);
						let layouts = match (a.kind, b.kind, res.desc) {
							(UsageKind::Image(x), UsageKind::Image(y), ResourceDesc::Image(desc)) => {
								Some((x.access(desc.format).layout, y.access(desc.format).layout))
							},
							_ => None,
						};
						if let Some((x, y)) = layouts {
							if x != y {
								return Err(Error::invalid(format!(
									"stage `{}` uses `{}` in both {:?} and {:?}",
									stage.name, res.name, x, y
								)));
							}
						}
						if a.writes() || b.writes() {
							validator.emit(
								Message::warning(format!("stage `{}` both reads and writes `{}`", stage.name, res.name))
									.stage(a.stage, &stage.name)
									.resource(res_id.index(), &res.name),
							);
						}
						continue;
					}

					let kind = match (a.writes(), b.writes()) {
						(false, false) => continue,
						(true, false) => HazardKind::ReadAfterWrite,
						(false, true) => HazardKind::WriteAfterRead,
						(true, true) => HazardKind::WriteAfterWrite,
					};

					let hazard = Hazard {
						producer: a.stage,
						consumer: b.stage,
						resource: res_id.index(),
						kind,
						cross_queue: topology.stage(a.stage).queue != topology.stage(b.stage).queue,
					};
					let (from, to) = (NodeIndex::new(a.stage), NodeIndex::new(b.stage));
					let index = hazards.len();
					match graph.find_edge(from, to) {
						Some(edge) => graph[edge].push(index),
						None => {
							graph.add_edge(from, to, vec![index]);
						},
					}
					hazards.push(hazard);
				}
			}
		}

		for hazard in hazards.iter() {
			let (p, c) = (topology.stage(hazard.producer), topology.stage(hazard.consumer));
			let res = topology.resource(hazard.resource);
			validator.emit(
				Message::verbose(format!(
					"{} on `{}` between `{}` and `{}`",
					hazard.kind, res.name, p.name, c.name
				))
				.stage(hazard.producer, &p.name)
				.stage(hazard.consumer, &c.name)
				.resource(hazard.resource, &res.name),
			);
		}

		Ok(Self { graph, hazards })
	}

	pub fn hazards(&self) -> &[Hazard] { &self.hazards }

	pub fn graph(&self) -> &DiGraph<usize, Vec<usize>> { &self.graph }

	/// Orders stages so that every producer runs before its consumers.
	///
	/// Among the stages that are ready, the one declared first runs first, except that stages presenting an image
	/// are held back as long as anything else can run.
	pub fn order(&self, topology: &Topology) -> Result<Vec<usize>> {
		let count = self.graph.node_count();
		let mut in_degree: Vec<usize> = (0..count)
			.map(|i| {
				self.graph
					.neighbors_directed(NodeIndex::new(i), Direction::Incoming)
					.count()
			})
			.collect();

		let mut ready: BinaryHeap<_> = (0..count)
			.filter(|&i| in_degree[i] == 0)
			.map(|i| Reverse((topology.presents(i), i)))
			.collect();

		let mut order = Vec::with_capacity(count);
		while let Some(Reverse((_, stage))) = ready.pop() {
			order.push(stage);
			for next in self.graph.neighbors_directed(NodeIndex::new(stage), Direction::Outgoing) {
				let next = next.index();
				in_degree[next] -= 1;
				if in_degree[next] == 0 {
					ready.push(Reverse((topology.presents(next), next)));
				}
			}
		}

		if order.len() == count {
			return Ok(order);
		}

		let mut stuck: Vec<_> = tarjan_scc(&self.graph)
			.into_iter()
			.filter(|scc| scc.len() > 1)
			.flatten()
			.map(|n| n.index())
			.collect();
		stuck.sort_unstable();
		Err(Error::Cycle {
			stages: stuck.into_iter().map(|s| topology.stage(s).name.clone()).collect(),
		})
	}
}

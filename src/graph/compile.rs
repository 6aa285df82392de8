use tracing::{debug, span, Level};

use crate::{
	device::Queues,
	graph::{
		builder::Topology,
		dependency::DependencyGraph,
		resource::AliasPlan,
		schedule::{schedule, Schedule},
		sync::{Synchronization, Synchronizer},
		validation::Message,
		Context,
		FxHashSet,
	},
	Error,
	Result,
};

/// Everything derived from a topology that stays valid while the topology does.
pub(crate) struct CompiledGraph {
	pub fingerprint: u64,
	/// Bumped on every compile, so frame slots know when their transients are stale.
	pub version: u64,
	pub order: Vec<usize>,
	/// The position of every stage in `order`.
	pub positions: Vec<usize>,
	pub deps: DependencyGraph,
	pub aliasing: AliasPlan,
	pub families: Queues<u32>,
	pub sync: Synchronization,
	pub schedule: Schedule,
	/// The first and last stage to use every resource, in execution order.
	pub spans: Vec<Option<(usize, usize)>>,
}

pub(crate) fn compile(topology: &Topology, ctx: &Context, version: u64) -> Result<CompiledGraph> {
	let span = span!(Level::TRACE, "compile graph");
	let _e = span.enter();

	let deps = DependencyGraph::analyze(topology, &ctx.validator)?;
	let order = match deps.order(topology) {
		Ok(order) => order,
		Err(err) => {
			if let Error::Cycle { stages } = &err {
				let mut message = Message::error(format!("dependency cycle between {}", stages.join(", ")));
				for (id, stage) in topology.stages.iter().filter(|(_, s)| stages.contains(&s.name)) {
					message = message.stage(id.index(), &stage.name);
				}
				ctx.validator.emit(message);
			}
			return Err(err);
		},
	};

	let mut positions = vec![0; order.len()];
	for (position, &stage) in order.iter().enumerate() {
		positions[stage] = position;
	}

	let aliasing = {
		let span = span!(Level::TRACE, "alias resources");
		let _e = span.enter();
		AliasPlan::new(topology, &positions, ctx.desc.alias_transients, &ctx.validator)
	};

	let device = ctx.device();
	let families = Queues::new(|q| device.queue_family(q));
	let sync = Synchronizer::new(topology, &positions, families, &ctx.validator).sync(&aliasing);

	let schedule = {
		let span = span!(Level::TRACE, "schedule");
		let _e = span.enter();
		schedule(
			&order,
			|s| topology.stage(s).queue,
			|s| topology.stage(s).commands_queue,
			&sync.links,
		)
	};

	let spans = topology
		.resources
		.iter()
		.map(|(_, res)| {
			let mut stages = res.usages.iter().map(|&u| topology.usage(u).stage);
			let first = stages.clone().min_by_key(|&s| positions[s])?;
			let last = stages.max_by_key(|&s| positions[s])?;
			Some((first, last))
		})
		.collect();

	debug!(
		stages = order.len(),
		transients = aliasing.transients.len(),
		barriers = sync.barrier_count(),
		batches = schedule.batches.len(),
		"compiled graph"
	);
	ctx.validator.emit(Message::verbose(format!(
		"compiled {} stages into {} batches with {} barriers and {} transients",
		order.len(),
		schedule.batches.len(),
		sync.barrier_count(),
		aliasing.transients.len()
	)));

	Ok(CompiledGraph {
		fingerprint: topology.fingerprint(),
		version,
		order,
		positions,
		deps,
		aliasing,
		families,
		sync,
		schedule,
		spans,
	})
}

//! Barrier synthesis.
//!
//! Resources are walked in execution order, one physical resource at a time, tracking the state of every
//! subresource range separately. Consecutive reads on one queue with the same layout share a single barrier.

use std::iter::Peekable;

use ash::vk::{
	AccessFlags2,
	Buffer,
	BufferMemoryBarrier2,
	Format,
	Image,
	ImageLayout,
	ImageMemoryBarrier2,
	PipelineStageFlags2,
	QUEUE_FAMILY_IGNORED,
	WHOLE_SIZE,
};
use tracing::{span, Level};

use crate::{
	device::{QueueType, Queues},
	graph::{
		builder::Topology,
		resource::AliasPlan,
		validation::{Message, Validator},
		virtual_resource::{Import, ResourceSource, UsageKind},
	},
	resource::{image_aspect_mask, Access, ImageRange, ResourceDesc},
};

/// What is known about a range of a resource at some point of the frame.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct ResourceState {
	/// The queue that owns it.
	pub queue: Option<QueueType>,
	pub layout: ImageLayout,
	/// The last write.
	pub write: Access,
	/// Reads on the owning queue that `write` is already visible to.
	pub reads: Access,
	/// Ownership was released to a queue, transitioning to a layout.
	pub released: Option<(QueueType, ImageLayout)>,
}

impl ResourceState {
	pub const UNDEFINED: Self = Self {
		queue: None,
		layout: ImageLayout::UNDEFINED,
		write: Access::NONE,
		reads: Access::NONE,
		released: None,
	};

	pub fn from_import(import: &Import) -> Self {
		let state = import.state();
		let writes = state.access.access.intersects(WRITES);
		// Transitions must wait for the semaphore wait to happen.
		let waited = import
			.wait()
			.map_or(Access::NONE, |w| Access::new(w.stage, AccessFlags2::NONE));
		Self {
			queue: import.queue(),
			layout: state.layout,
			write: if writes { state.access } else { Access::NONE },
			reads: if writes { waited } else { state.access.merge(waited) },
			released: None,
		}
	}

	pub fn src(&self) -> Access { self.write.merge(self.reads) }
}

const WRITES: AccessFlags2 = AccessFlags2::from_raw(
	AccessFlags2::SHADER_WRITE.as_raw()
		| AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
		| AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
		| AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
		| AccessFlags2::TRANSFER_WRITE.as_raw()
		| AccessFlags2::HOST_WRITE.as_raw()
		| AccessFlags2::MEMORY_WRITE.as_raw(),
);

/// Whatever happened before the graph got the resource.
const UNKNOWN_WRITE: Access = Access {
	stage: PipelineStageFlags2::ALL_COMMANDS,
	access: AccessFlags2::MEMORY_WRITE,
};

/// The first scope of an acquire: everything after the semaphore wait it is paired with.
const ACQUIRE_SRC: Access = Access {
	stage: PipelineStageFlags2::ALL_COMMANDS,
	access: AccessFlags2::NONE,
};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BarrierKind {
	Local,
	/// Releases queue ownership, or flushes before a semaphore signal.
	Release,
	Acquire,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct Barrier {
	pub resource: usize,
	pub range: ImageRange,
	pub src: Access,
	pub dst: Access,
	pub old_layout: ImageLayout,
	pub new_layout: ImageLayout,
	/// Ownership moves from the first queue's family to the second's.
	pub transfer: Option<(QueueType, QueueType)>,
	pub kind: BarrierKind,
}

impl Barrier {
	fn families(&self, families: &Queues<u32>) -> (u32, u32) {
		match self.transfer {
			Some((from, to)) if families[from] != families[to] => (families[from], families[to]),
			_ => (QUEUE_FAMILY_IGNORED, QUEUE_FAMILY_IGNORED),
		}
	}

	pub fn to_image(&self, image: Image, format: Format, families: &Queues<u32>) -> ImageMemoryBarrier2 {
		let (src_family, dst_family) = self.families(families);
		ImageMemoryBarrier2::builder()
			.image(image)
			.subresource_range(self.range.to_vk(image_aspect_mask(format)))
			.src_stage_mask(self.src.stage)
			.src_access_mask(self.src.access)
			.old_layout(self.old_layout)
			.dst_stage_mask(self.dst.stage)
			.dst_access_mask(self.dst.access)
			.new_layout(self.new_layout)
			.src_queue_family_index(src_family)
			.dst_queue_family_index(dst_family)
			.build()
	}

	pub fn to_buffer(&self, buffer: Buffer, families: &Queues<u32>) -> BufferMemoryBarrier2 {
		let (src_family, dst_family) = self.families(families);
		BufferMemoryBarrier2::builder()
			.buffer(buffer)
			.offset(0)
			.size(WHOLE_SIZE)
			.src_stage_mask(self.src.stage)
			.src_access_mask(self.src.access)
			.dst_stage_mask(self.dst.stage)
			.dst_access_mask(self.dst.access)
			.src_queue_family_index(src_family)
			.dst_queue_family_index(dst_family)
			.build()
	}
}

/// Barriers recorded around a single stage.
#[derive(Clone, Default, Debug)]
pub(crate) struct StageSync {
	pub acquire: Vec<Barrier>,
	pub pre: Vec<Barrier>,
	pub post: Vec<Barrier>,
}

impl StageSync {
	pub fn len(&self) -> usize { self.acquire.len() + self.pre.len() + self.post.len() }
}

/// The first use of an imported or persistent resource, whose prior state is only known when the frame runs.
#[derive(Copy, Clone, Debug)]
pub(crate) struct FirstUse {
	pub resource: usize,
	pub stage: usize,
	pub queue: QueueType,
	pub range: ImageRange,
	pub dst: Access,
	pub layout: ImageLayout,
	pub write: bool,
}

impl FirstUse {
	/// Barriers from `before` to this use. `released` is whether a previous owner in another queue family is
	/// trusted to have released ownership to this queue.
	///
	/// Returns `false` alongside the barriers if the contents had to be discarded.
	pub fn resolve(
		&self, before: &[(ImageRange, ResourceState)], families: &Queues<u32>, image: bool, released: bool,
	) -> (Vec<Barrier>, bool) {
		let mut out = Vec::new();
		let mut kept = true;
		for (range, state) in before {
			let Some(range) = range.intersection(&self.range) else { continue };
			let barrier = |src, old_layout, new_layout, transfer, kind| Barrier {
				resource: self.resource,
				range,
				src,
				dst: self.dst,
				old_layout,
				new_layout,
				transfer,
				kind,
			};
			let foreign = state.queue.filter(|&q| families[q] != families[self.queue]);

			match (state.released, foreign) {
				(Some((to, layout)), _) if to == self.queue => {
					let from = state.queue.unwrap_or(to);
					out.push(barrier(
						ACQUIRE_SRC,
						state.layout,
						layout,
						Some((from, to)),
						BarrierKind::Acquire,
					));
					if image && layout != self.layout {
						out.push(barrier(self.dst, layout, self.layout, None, BarrierKind::Local));
					}
				},
				(_, Some(from)) if released => {
					let new = if image { self.layout } else { ImageLayout::UNDEFINED };
					out.push(barrier(
						ACQUIRE_SRC,
						state.layout,
						new,
						Some((from, self.queue)),
						BarrierKind::Acquire,
					));
				},
				(_, Some(_)) => {
					kept = false;
					let new = if image { self.layout } else { ImageLayout::UNDEFINED };
					out.push(barrier(Access::NONE, ImageLayout::UNDEFINED, new, None, BarrierKind::Local));
				},
				(_, None) => {
					let layout_change = image && state.layout != self.layout;
					let src = if self.write || layout_change {
						state.src()
					} else {
						state.write
					};
					if layout_change || !src.is_none() {
						let new = if image { self.layout } else { ImageLayout::UNDEFINED };
						out.push(barrier(src, state.layout, new, None, BarrierKind::Local));
					}
				},
			}
		}
		(out, kept)
	}
}

/// What a persistent resource is left as by a frame.
#[derive(Clone, Debug)]
pub(crate) struct FinalState {
	pub resource: usize,
	pub pieces: Vec<(ImageRange, ResourceState)>,
	/// The state of a range after a stage, in execution order, for frames that were only partly submitted.
	pub steps: Vec<(usize, ImageRange, ResourceState)>,
}

/// `consumer` waits on a semaphore signalled after `producer`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) struct QueueLink {
	pub producer: usize,
	pub consumer: usize,
	pub resource: usize,
}

pub(crate) struct Synchronization {
	pub stages: Vec<StageSync>,
	pub first_uses: Vec<FirstUse>,
	pub finals: Vec<FinalState>,
	pub links: Vec<QueueLink>,
}

impl Synchronization {
	pub fn barrier_count(&self) -> usize { self.stages.iter().map(StageSync::len).sum() }
}

/// All usages of a resource by a stage, on one range.
#[derive(Copy, Clone, Debug)]
struct Usage {
	stage: usize,
	queue: QueueType,
	range: ImageRange,
	access: Access,
	layout: ImageLayout,
	write: bool,
}

/// Usages that are synchronized together, at the first of their stages.
#[derive(Clone, Debug)]
struct Run {
	stages: Vec<usize>,
	queue: QueueType,
	range: ImageRange,
	access: Access,
	layout: ImageLayout,
	write: bool,
}

impl Run {
	fn first(&self) -> usize { self.stages[0] }

	fn last(&self) -> usize { self.stages[self.stages.len() - 1] }
}

struct MergeReads<T: Iterator> {
	iter: Peekable<T>,
}

impl<T: Iterator<Item = Usage>> MergeReads<T> {
	fn new(iter: T) -> Self { Self { iter: iter.peekable() } }
}

impl<T: Iterator<Item = Usage>> Iterator for MergeReads<T> {
	type Item = Run;

	fn next(&mut self) -> Option<Self::Item> {
		let usage = self.iter.next()?;
		let mut run = Run {
			stages: vec![usage.stage],
			queue: usage.queue,
			range: usage.range,
			access: usage.access,
			layout: usage.layout,
			write: usage.write,
		};
		if run.write {
			return Some(run);
		}

		while let Some(next) = self.iter.peek() {
			if next.write || next.queue != run.queue || next.layout != run.layout || next.range != run.range {
				break;
			}
			run.access = run.access.merge(next.access);
			run.stages.push(next.stage);
			self.iter.next();
		}
		Some(run)
	}
}

#[derive(Copy, Clone, Debug)]
struct Track {
	state: ResourceState,
	/// The last stage to touch the range on each queue since the last write.
	stages: Queues<Option<usize>>,
	/// Nothing is known before the frame runs.
	external: bool,
	/// The previous contents belong to another resource sharing the memory.
	discard: bool,
}

impl Track {
	fn fresh() -> Self {
		Self {
			state: ResourceState::UNDEFINED,
			stages: Queues::default(),
			external: false,
			discard: false,
		}
	}

	fn external() -> Self {
		Self {
			external: true,
			..Self::fresh()
		}
	}
}

pub(crate) struct Synchronizer<'a> {
	topology: &'a Topology,
	positions: &'a [usize],
	families: Queues<u32>,
	validator: &'a Validator,
	steps: Vec<(usize, ImageRange, ResourceState)>,
	out: Synchronization,
}

impl<'a> Synchronizer<'a> {
	pub fn new(topology: &'a Topology, positions: &'a [usize], families: Queues<u32>, validator: &'a Validator) -> Self {
		Self {
			topology,
			positions,
			families,
			validator,
			steps: Vec::new(),
			out: Synchronization {
				stages: vec![StageSync::default(); topology.stages.len()],
				first_uses: Vec::new(),
				finals: Vec::new(),
				links: Vec::new(),
			},
		}
	}

	pub fn sync(mut self, plan: &AliasPlan) -> Synchronization {
		let span = span!(Level::TRACE, "synchronize");
		let _e = span.enter();

		for transient in plan.transients.iter() {
			let mut pieces = vec![(transient.desc.full_range(), Track::fresh())];
			for (i, &resource) in transient.resources.iter().enumerate() {
				if i > 0 {
					for (_, track) in pieces.iter_mut() {
						track.discard = true;
					}
				}
				self.resource(resource, &mut pieces);
			}
		}

		for (id, res) in self.topology.resources.iter() {
			if let ResourceSource::Import(_) | ResourceSource::Persistent(_) = res.source {
				let mut pieces = vec![(res.desc.full_range(), Track::external())];
				self.resource(id.index(), &mut pieces);
			}
		}

		self.out
	}

	fn usages(&self, resource: usize) -> Vec<Usage> {
		let res = self.topology.resource(resource);
		let mut usages: Vec<Usage> = Vec::new();
		for &u in res.usages.iter() {
			let usage = self.topology.usage(u);
			let (access, layout) = match (usage.kind, res.desc) {
				(UsageKind::Image(image), ResourceDesc::Image(desc)) => {
					let access = image.access(desc.format);
					(access.access, access.layout)
				},
				(UsageKind::Buffer(buffer), ResourceDesc::Buffer(_)) => (buffer.access(), ImageLayout::UNDEFINED),
				_ => continue,
			};

			match usages
				.iter_mut()
				.find(|x| x.stage == usage.stage && x.range == usage.range)
			{
				Some(existing) => {
					existing.access = existing.access.merge(access);
					existing.write |= usage.writes();
				},
				None => usages.push(Usage {
					stage: usage.stage,
					queue: self.topology.stage(usage.stage).queue,
					range: usage.range,
					access,
					layout,
					write: usage.writes(),
				}),
			}
		}
		usages.sort_by_key(|u| self.positions[u.stage]);
		usages
	}

	fn resource(&mut self, resource: usize, pieces: &mut Vec<(ImageRange, Track)>) {
		self.steps.clear();
		let usages = self.usages(resource);
		for run in MergeReads::new(usages.into_iter()) {
			if run.stages.len() > 1 {
				let res = self.topology.resource(resource);
				let mut message = Message::performance(format!(
					"redundant barrier elided: {} stages read `{}` after one barrier",
					run.stages.len(),
					res.name
				))
				.resource(resource, &res.name);
				for &stage in run.stages.iter() {
					message = message.stage(stage, &self.topology.stage(stage).name);
				}
				self.validator.emit(message);
			}

			let mut next = Vec::with_capacity(pieces.len() + 4);
			for (range, track) in pieces.drain(..) {
				let Some(cut) = range.intersection(&run.range) else {
					next.push((range, track));
					continue;
				};
				for rest in range.subtract(&cut) {
					next.push((rest, track));
				}
				let track = self.transition(resource, cut, track, &run);
				next.push((cut, track));
			}
			*pieces = next;
		}

		self.finish(resource, pieces);
	}

	fn transition(&mut self, resource: usize, range: ImageRange, track: Track, run: &Run) -> Track {
		let image = self.topology.resource(resource).desc.is_image();
		let queue = run.queue;
		let new_layout = run.layout;

		let mut stages = track.stages;
		let mut state = track.state;
		if track.external {
			self.out.first_uses.push(FirstUse {
				resource,
				stage: run.first(),
				queue,
				range,
				dst: run.access,
				layout: new_layout,
				write: run.write,
			});
			state.write = if run.write { run.access } else { UNKNOWN_WRITE };
			state.reads = if run.write { Access::NONE } else { run.access };
		} else {
			let old_layout = if track.discard {
				ImageLayout::UNDEFINED
			} else {
				state.layout
			};
			let layout_change = image && (track.discard || old_layout != new_layout);

			match state.queue {
				Some(owner) if owner != queue => {
					let transfer = self.families[owner] != self.families[queue];
					let hazard = transfer || run.write || layout_change || !state.write.is_none();
					if hazard {
						if let Some(producer) = stages[owner] {
							self.cross_queue(resource, range, &state, owner, producer, run, transfer);
						}
						if transfer && !run.write && state.write.is_none() {
							let res = self.topology.resource(resource);
							self.validator.emit(
								Message::performance(format!(
									"ownership of `{}` moves between queue families only to be read",
									res.name
								))
								.resource(resource, &res.name),
							);
						}
					}
					state.reads = Access::NONE;
				},
				_ => {
					let src = if run.write || layout_change {
						state.src()
					} else if !state.write.is_none() && !state.reads.covers(&run.access) {
						state.write
					} else {
						Access::NONE
					};

					if layout_change || !src.is_none() {
						self.out.stages[run.first()].pre.push(Barrier {
							resource,
							range,
							src,
							dst: run.access,
							old_layout,
							new_layout,
							transfer: None,
							kind: BarrierKind::Local,
						});
					} else if !run.write && !state.write.is_none() {
						let res = self.topology.resource(resource);
						self.validator.emit(
							Message::verbose(format!("redundant barrier elided: `{}` is already visible", res.name))
								.resource(resource, &res.name)
								.stage(run.first(), &self.topology.stage(run.first()).name),
						);
					}

					if state.queue.is_none() && !run.write && !track.discard {
						let res = self.topology.resource(resource);
						self.validator.emit(
							Message::warning(format!("`{}` is read before anything writes it", res.name))
								.resource(resource, &res.name),
						);
					}
				},
			}

			// Readers on other queues of the same family only need to finish first.
			if run.write || layout_change {
				for other in QueueType::ALL {
					if other == queue || Some(other) == state.queue {
						continue;
					}
					if let Some(reader) = stages[other] {
						self.link(reader, run.first(), resource);
					}
				}
			}
		}

		state.queue = Some(queue);
		state.layout = new_layout;
		state.released = None;
		if run.write {
			state.write = run.access;
			state.reads = Access::NONE;
			stages = Queues::default();
		} else {
			state.reads = state.reads.merge(run.access);
		}
		stages[queue] = Some(run.last());
		self.steps.push((run.first(), range, state));

		Track {
			state,
			stages,
			external: false,
			discard: false,
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn cross_queue(
		&mut self, resource: usize, range: ImageRange, state: &ResourceState, owner: QueueType, producer: usize,
		run: &Run, transfer: bool,
	) {
		let moved = Some((owner, run.queue));
		if transfer {
			self.steps.push((
				producer,
				range,
				ResourceState {
					layout: run.layout,
					released: Some((run.queue, run.layout)),
					..*state
				},
			));
		}
		self.out.stages[producer].post.push(Barrier {
			resource,
			range,
			src: state.src(),
			dst: Access::NONE,
			old_layout: state.layout,
			new_layout: if transfer { run.layout } else { state.layout },
			transfer: moved,
			kind: BarrierKind::Release,
		});
		self.out.stages[run.first()].acquire.push(Barrier {
			resource,
			range,
			src: ACQUIRE_SRC,
			dst: run.access,
			old_layout: state.layout,
			new_layout: run.layout,
			transfer: moved,
			kind: BarrierKind::Acquire,
		});
		self.link(producer, run.first(), resource);

		let topology = self.topology;
		let res = topology.resource(resource);
		self.validator.emit(
			Message::verbose(format!(
				"{} `{}` from {} to {}",
				if transfer { "transferring" } else { "handing over" },
				res.name,
				owner,
				run.queue
			))
			.resource(resource, &res.name)
			.stage(producer, &topology.stage(producer).name)
			.stage(run.first(), &topology.stage(run.first()).name),
		);
	}

	fn link(&mut self, producer: usize, consumer: usize, resource: usize) {
		let link = QueueLink {
			producer,
			consumer,
			resource,
		};
		if !self.out.links.contains(&link) {
			self.out.links.push(link);
		}
	}

	/// Hands the resource over to whatever comes after the frame.
	fn finish(&mut self, resource: usize, pieces: &mut [(ImageRange, Track)]) {
		let topology = self.topology;
		let res = topology.resource(resource);
		let image = res.desc.is_image();
		let present = match res.source {
			ResourceSource::Import(import) => import.present().is_some(),
			_ => false,
		};

		for (range, track) in pieces.iter_mut() {
			let range = *range;
			let state = &mut track.state;
			let (Some(owner), false) = (state.queue, track.external) else { continue };
			let Some(last) = track.stages[owner] else { continue };

			if present {
				self.out.stages[last].post.push(Barrier {
					resource,
					range,
					src: state.src(),
					dst: Access::NONE,
					old_layout: state.layout,
					new_layout: ImageLayout::PRESENT_SRC_KHR,
					transfer: None,
					kind: BarrierKind::Local,
				});
				state.layout = ImageLayout::PRESENT_SRC_KHR;
			} else if let Some(export) = res.export {
				let target = export.queue.unwrap_or(owner);
				let transfer = self.families[owner] != self.families[target];
				let new_layout = if image { export.state.layout } else { ImageLayout::UNDEFINED };
				if transfer || new_layout != state.layout || !state.write.is_none() {
					self.out.stages[last].post.push(Barrier {
						resource,
						range,
						src: state.src(),
						dst: if transfer { Access::NONE } else { export.state.access },
						old_layout: state.layout,
						new_layout,
						transfer: transfer.then_some((owner, target)),
						kind: if transfer { BarrierKind::Release } else { BarrierKind::Local },
					});
				}
				state.layout = new_layout;
			}

			if let ResourceSource::Persistent(_) = res.source {
				let next = self
					.out
					.first_uses
					.iter()
					.find(|f| f.resource == resource && f.range.intersects(&range))
					.map(|f| (f.queue, f.layout));
				if let Some((queue, layout)) = next {
					if self.families[owner] != self.families[queue] {
						self.out.stages[last].post.push(Barrier {
							resource,
							range,
							src: state.src(),
							dst: Access::NONE,
							old_layout: state.layout,
							new_layout: layout,
							transfer: Some((owner, queue)),
							kind: BarrierKind::Release,
						});
						state.released = Some((queue, layout));
					}
				}
			}
		}

		if let ResourceSource::Persistent(_) = res.source {
			let pieces = pieces
				.iter()
				.filter(|(_, t)| !t.external)
				.map(|(r, t)| (*r, t.state))
				.collect::<Vec<_>>();
			if !pieces.is_empty() {
				self.out.finals.push(FinalState {
					resource,
					pieces,
					steps: std::mem::take(&mut self.steps),
				});
			}
		}
	}
}

/// Overwrites the ranges of `pieces` covered by `update`.
pub(crate) fn apply_pieces(pieces: &mut Vec<(ImageRange, ResourceState)>, update: &[(ImageRange, ResourceState)]) {
	for &(range, state) in update {
		let mut next = Vec::with_capacity(pieces.len() + 4);
		for &(old, old_state) in pieces.iter() {
			match old.intersection(&range) {
				Some(cut) => next.extend(old.subtract(&cut).into_iter().map(|r| (r, old_state))),
				None => next.push((old, old_state)),
			}
		}
		next.push((range, state));
		*pieces = next;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn usage(stage: usize, access: Access, layout: ImageLayout, write: bool) -> Usage {
		Usage {
			stage,
			queue: QueueType::Graphics,
			range: ImageRange::levels(0, 1, 1),
			access,
			layout,
			write,
		}
	}

	#[test]
	fn reads_merge_until_a_write() {
		let read = Access::new(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_SAMPLED_READ);
		let compute = Access::new(PipelineStageFlags2::COMPUTE_SHADER, AccessFlags2::SHADER_SAMPLED_READ);
		let write = Access::new(
			PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
			AccessFlags2::COLOR_ATTACHMENT_WRITE,
		);
		let ro = ImageLayout::SHADER_READ_ONLY_OPTIMAL;
		let runs: Vec<_> = MergeReads::new(
			[
				usage(0, write, ImageLayout::COLOR_ATTACHMENT_OPTIMAL, true),
				usage(1, read, ro, false),
				usage(2, compute, ro, false),
				usage(3, write, ImageLayout::COLOR_ATTACHMENT_OPTIMAL, true),
			]
			.into_iter(),
		)
		.collect();

		assert_eq!(runs.len(), 3);
		assert_eq!(runs[1].stages, vec![1, 2]);
		assert_eq!(runs[1].access, read.merge(compute));
	}

	#[test]
	fn reads_in_other_layouts_do_not_merge() {
		let read = Access::new(PipelineStageFlags2::TRANSFER, AccessFlags2::TRANSFER_READ);
		let runs = MergeReads::new(
			[
				usage(0, read, ImageLayout::TRANSFER_SRC_OPTIMAL, false),
				usage(1, read, ImageLayout::GENERAL, false),
			]
			.into_iter(),
		)
		.count();
		assert_eq!(runs, 2);
	}

	#[test]
	fn released_persistent_is_acquired() {
		let families = Queues {
			graphics: 0,
			compute: 1,
			transfer: 2,
		};
		let range = ImageRange::levels(0, 1, 1);
		let state = ResourceState {
			queue: Some(QueueType::Compute),
			layout: ImageLayout::GENERAL,
			write: Access::new(PipelineStageFlags2::COMPUTE_SHADER, AccessFlags2::SHADER_STORAGE_WRITE),
			reads: Access::NONE,
			released: Some((QueueType::Graphics, ImageLayout::SHADER_READ_ONLY_OPTIMAL)),
		};
		let first = FirstUse {
			resource: 0,
			stage: 0,
			queue: QueueType::Graphics,
			range,
			dst: Access::new(PipelineStageFlags2::FRAGMENT_SHADER, AccessFlags2::SHADER_SAMPLED_READ),
			layout: ImageLayout::SHADER_READ_ONLY_OPTIMAL,
			write: false,
		};

		let (barriers, kept) = first.resolve(&[(range, state)], &families, true, false);
		assert!(kept);
		assert_eq!(barriers.len(), 1);
		assert_eq!(barriers[0].kind, BarrierKind::Acquire);
		assert_eq!(barriers[0].old_layout, ImageLayout::GENERAL);
		assert_eq!(barriers[0].transfer, Some((QueueType::Compute, QueueType::Graphics)));
		let vk = barriers[0].to_image(Image::null(), Format::R8G8B8A8_UNORM, &families);
		assert_eq!((vk.src_queue_family_index, vk.dst_queue_family_index), (1, 0));
	}

	#[test]
	fn unreleased_foreign_contents_are_discarded() {
		let families = Queues {
			graphics: 0,
			compute: 1,
			transfer: 2,
		};
		let range = ImageRange::WHOLE_BUFFER;
		let state = ResourceState {
			queue: Some(QueueType::Transfer),
			..ResourceState::UNDEFINED
		};
		let first = FirstUse {
			resource: 0,
			stage: 0,
			queue: QueueType::Graphics,
			range,
			dst: Access::new(PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT, AccessFlags2::VERTEX_ATTRIBUTE_READ),
			layout: ImageLayout::UNDEFINED,
			write: false,
		};

		let (barriers, kept) = first.resolve(&[(range, state)], &families, false, false);
		assert!(!kept);
		assert_eq!(barriers[0].src, Access::NONE);
	}

	#[test]
	fn pieces_are_overwritten() {
		let mut pieces = vec![(ImageRange::levels(0, 4, 1), ResourceState::UNDEFINED)];
		let general = ResourceState {
			layout: ImageLayout::GENERAL,
			..ResourceState::UNDEFINED
		};
		apply_pieces(&mut pieces, &[(ImageRange::levels(1, 1, 1), general)]);

		assert_eq!(pieces.len(), 3);
		let total: u32 = pieces.iter().map(|(r, _)| r.level_count).sum();
		assert_eq!(total, 4);
		assert!(pieces
			.iter()
			.any(|&(r, s)| r == ImageRange::levels(1, 1, 1) && s.layout == ImageLayout::GENERAL));
	}
}

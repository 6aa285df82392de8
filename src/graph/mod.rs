use std::{cell::Cell, fs::File, hash::BuildHasherDefault, io, path::Path, sync::Arc};

use ash::vk::{
	CommandBuffer,
	DebugUtilsMessageSeverityFlagsEXT,
	DebugUtilsMessageTypeFlagsEXT,
	Extent3D,
	ImageBlit,
	ImageLayout,
	ImageResolve,
	Offset3D,
	PipelineStageFlags2,
	Semaphore,
};
use hashbrown::{HashMap, HashSet};
use rustc_hash::FxHasher;
use slotmap::SlotMap;
use tracing::{span, trace, Level};

pub use crate::graph::{
	builder::{GraphBuilder, GroupId, ResourceId, StageBuilder, StageId, UsageToken},
	context::{PrepareContext, StageContext},
	frame_data::FrameState,
	pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineDesc, ShaderDesc},
	resource::{PersistentId, PersistentResource},
	validation::{Message, ObjectKind, ObjectRef, ValidationCallback},
	virtual_resource::{
		BufferUsage,
		BufferUsageType,
		Direction,
		ExportInfo,
		ImageUsage,
		ImageUsageType,
		ImportedBuffer,
		ImportedImage,
		Present,
		Shader,
	},
};
use crate::{
	device::{Device, PresentRequest, QueueType, Queues, SemaphoreSubmit, Submission},
	graph::{
		builder::{validate_image_desc, Callbacks, Topology, TransferOp},
		compile::{compile, CompiledGraph},
		context::{ExtraSync, FrameResources, Phase},
		frame_data::{FrameData, TimelineSemaphore},
		pipeline::PipelineCache,
		resource::{create_physical, destroy_physical},
		sync::{apply_pieces, Barrier, ResourceState},
		validation::Validator,
		virtual_resource::ResourceSource,
	},
	resource::{image_aspect_mask, BufferDesc, ImageAccess, ImageDesc, PhysicalHandle, ResourceDesc},
	Error,
	Result,
};

pub mod builder;
mod compile;
pub mod context;
mod dependency;
mod dot;
mod frame_data;
pub mod pipeline;
pub mod resource;
mod schedule;
mod sync;
#[cfg(test)]
mod test;
pub mod validation;
pub mod virtual_resource;

pub type FxBuildHasher = BuildHasherDefault<FxHasher>;
pub type FxHashMap<K, V> = HashMap<K, V, FxBuildHasher>;
pub type FxHashSet<T> = HashSet<T, FxBuildHasher>;

#[derive(Copy, Clone, Debug)]
pub struct ContextDesc {
	/// How many frames the CPU may record ahead of the GPU. At least 1.
	pub frames_in_flight: usize,
	/// Nanoseconds to wait for a frame slot before giving up with [`Error::Timeout`].
	pub wait_timeout: u64,
	/// Let transients whose lifetimes do not overlap share memory.
	pub alias_transients: bool,
}

impl Default for ContextDesc {
	fn default() -> Self {
		Self {
			frames_in_flight: 2,
			wait_timeout: u64::MAX,
			alias_transients: true,
		}
	}
}

/// State shared by every graph running on a device: queue timelines, persistent resources, pipelines, and the
/// validation callback.
pub struct Context {
	device: Arc<dyn Device>,
	pub(crate) desc: ContextDesc,
	timelines: Queues<TimelineSemaphore>,
	persistent: SlotMap<PersistentId, PersistentResource>,
	pipelines: PipelineCache,
	pub(crate) validator: Validator,
	generation: Cell<u32>,
}

impl Context {
	pub fn new(device: Arc<dyn Device>, desc: ContextDesc) -> Result<Self> {
		if desc.frames_in_flight == 0 {
			return Err(Error::invalid("at least one frame must be in flight"));
		}

		let timelines = Queues::try_new(|_| TimelineSemaphore::new(device.as_ref()))?;
		Ok(Self {
			device,
			desc,
			timelines,
			persistent: SlotMap::with_key(),
			pipelines: PipelineCache::default(),
			validator: Validator::default(),
			generation: Cell::new(0),
		})
	}

	pub fn device(&self) -> &dyn Device { self.device.as_ref() }

	pub fn desc(&self) -> &ContextDesc { &self.desc }

	pub(crate) fn next_generation(&self) -> u32 {
		let generation = self.generation.get();
		self.generation.set(generation.wrapping_add(1));
		generation
	}

	pub fn persistent(&self, id: PersistentId) -> Result<&PersistentResource> {
		self.persistent.get(id).ok_or(Error::StaleHandle)
	}

	/// Create an image that outlives builds, for use with [`GraphBuilder::reference`].
	pub fn create_image(&mut self, name: impl Into<String>, desc: ImageDesc) -> Result<PersistentId> {
		validate_image_desc(&desc)?;
		self.create_persistent(name.into(), ResourceDesc::Image(desc))
	}

	pub fn create_buffer(&mut self, name: impl Into<String>, desc: BufferDesc) -> Result<PersistentId> {
		if desc.size == 0 {
			return Err(Error::invalid("buffers cannot be empty"));
		}
		self.create_persistent(name.into(), ResourceDesc::Buffer(desc))
	}

	fn create_persistent(&mut self, name: String, desc: ResourceDesc) -> Result<PersistentId> {
		trace!(name = %name, "create persistent resource");
		let handle = create_physical(self.device.as_ref(), &name, &desc)?;
		Ok(self.persistent.insert(PersistentResource::new(name, desc, handle)))
	}

	/// Waits for the last submission that used the resource, and destroys it.
	pub fn destroy_resource(&mut self, id: PersistentId) -> Result<()> {
		let waits: Vec<_> = self
			.persistent(id)?
			.sync
			.iter()
			.filter(|&(_, &value)| value > 0)
			.map(|(queue, &value)| (self.timelines[queue].semaphore(), value))
			.collect();
		if !waits.is_empty() {
			self.device.wait_semaphores(&waits, self.desc.wait_timeout)?;
		}

		let res = self.persistent.remove(id).ok_or(Error::StaleHandle)?;
		unsafe { destroy_physical(self.device.as_ref(), res.handle) }
		Ok(())
	}

	/// Route validation messages matching both masks to `callback` instead of `tracing`.
	pub fn set_validation_callback(
		&mut self, severity: DebugUtilsMessageSeverityFlagsEXT, category: DebugUtilsMessageTypeFlagsEXT,
		callback: impl FnMut(&Message) + 'static,
	) {
		self.validator.set(severity, category, Box::new(callback));
	}

	pub fn clear_validation_callback(&mut self) { self.validator.clear(); }

	/// Blocks until every submission made through this context is done.
	pub fn wait_idle(&self) -> Result<()> {
		let waits: Vec<_> = self
			.timelines
			.iter()
			.filter(|(_, t)| t.value() > 0)
			.map(|(_, t)| (t.semaphore(), t.value()))
			.collect();
		if waits.is_empty() {
			return Ok(());
		}
		self.device.wait_semaphores(&waits, self.desc.wait_timeout)
	}

	/// Every graph must have been destroyed first.
	pub fn destroy(mut self) -> Result<()> {
		self.wait_idle()?;

		let device = self.device.clone();
		self.pipelines.destroy(device.as_ref());
		for (_, res) in self.persistent.drain() {
			unsafe { destroy_physical(device.as_ref(), res.handle) }
		}
		self.timelines.map(|t| t.destroy(device.as_ref()));
		Ok(())
	}
}

/// The lifecycle of a compiled plan.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GraphState {
	/// No plan compiled.
	Unbuilt,
	/// Compiled, but never executed.
	Built,
	Idle,
}

/// A resource handed back by the last executed frame.
///
/// Transient handles stay valid until the frame slot that produced them is reused.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ExportedResource {
	pub handle: PhysicalHandle,
	pub desc: ResourceDesc,
	pub state: ImageAccess,
	/// The queue that owns the resource after the frame.
	pub queue: QueueType,
}

pub type BuildCallback<U> = Box<dyn FnMut(&mut GraphBuilder<U>, &mut U) -> Result<()>>;

/// A render graph, rebuilt from its build callback every frame and recompiled whenever its topology changes.
pub struct RenderGraph<U> {
	name: String,
	build: BuildCallback<U>,
	user: U,
	state: GraphState,
	compiled: Option<CompiledGraph>,
	topology: Option<Topology>,
	frames: Vec<FrameData>,
	frame_index: u64,
	last_slot: Option<usize>,
	version: u64,
	exports: FxHashMap<String, ExportedResource>,
}

impl<U> RenderGraph<U> {
	pub fn new(
		ctx: &Context, name: impl Into<String>, user: U,
		build: impl FnMut(&mut GraphBuilder<U>, &mut U) -> Result<()> + 'static,
	) -> Self {
		Self {
			name: name.into(),
			build: Box::new(build),
			user,
			state: GraphState::Unbuilt,
			compiled: None,
			topology: None,
			frames: (0..ctx.desc.frames_in_flight).map(|_| FrameData::new()).collect(),
			frame_index: 0,
			last_slot: None,
			version: 0,
			exports: FxHashMap::default(),
		}
	}

	pub fn name(&self) -> &str { &self.name }

	pub fn state(&self) -> GraphState { self.state }

	pub fn user(&self) -> &U { &self.user }

	pub fn user_mut(&mut self) -> &mut U { &mut self.user }

	/// How many frames have been executed.
	pub fn frame_index(&self) -> u64 { self.frame_index }

	/// Force the next [`execute`](Self::execute) to recompile.
	pub fn rebuild(&mut self) {
		self.compiled = None;
		self.state = GraphState::Unbuilt;
	}

	/// Build, compile if the topology changed, and pump one frame.
	///
	/// Blocks if the next frame slot is still in flight.
	pub fn execute(&mut self, ctx: &mut Context) -> Result<()> {
		let span = span!(Level::TRACE, "execute graph", name = %self.name);
		let _e = span.enter();

		let (topology, callbacks) = self.run_build(ctx)?;
		self.ensure_compiled(&topology, ctx)?;
		let Some(compiled) = self.compiled.as_ref() else {
			return Err(Error::invalid("graph has no compiled plan"));
		};
		let topology = &*self.topology.insert(topology);

		let slot = (self.frame_index % self.frames.len() as u64) as usize;
		let frame = &mut self.frames[slot];
		let result = pump(
			ctx,
			compiled,
			topology,
			callbacks,
			frame,
			&mut self.user,
			self.frame_index,
			slot,
		);
		if result.is_err() {
			frame.abandon();
		}

		self.exports = result?;
		self.state = GraphState::Idle;
		self.last_slot = Some(slot);
		self.frame_index += 1;
		Ok(())
	}

	fn run_build(&mut self, ctx: &Context) -> Result<(Topology, Callbacks<U>)> {
		let span = span!(Level::TRACE, "build graph");
		let _e = span.enter();

		let mut builder = GraphBuilder::new(ctx);
		if let Err(err) = (self.build)(&mut builder, &mut self.user) {
			ctx.validator
				.emit(Message::error(format!("building `{}` failed: {}", self.name, err)));
			return Err(err);
		}
		Ok(builder.finish())
	}

	fn ensure_compiled(&mut self, topology: &Topology, ctx: &Context) -> Result<()> {
		let fingerprint = topology.fingerprint();
		if self.compiled.as_ref().map_or(false, |c| c.fingerprint == fingerprint) {
			return Ok(());
		}

		self.version += 1;
		let compiled = compile(topology, ctx, self.version)?;
		self.compiled = Some(compiled);
		self.state = GraphState::Built;
		Ok(())
	}

	/// The state of the frame slot `stage` last ran in.
	pub fn stage_frame_state(&self, stage: &str) -> Option<FrameState> {
		let topology = self.topology.as_ref()?;
		topology.stages.iter().find(|(_, s)| s.name == stage)?;
		Some(self.frames[self.last_slot?].state())
	}

	/// A resource exported by the last frame, by name.
	pub fn exported(&self, name: &str) -> Option<&ExportedResource> { self.exports.get(name) }

	/// Blocks until no frame is in flight.
	pub fn wait_idle(&mut self, ctx: &Context) -> Result<()> {
		for frame in self.frames.iter_mut() {
			frame.wait(ctx.device(), ctx.desc.wait_timeout)?;
		}
		Ok(())
	}

	/// Write the compiled plan as a Graphviz digraph.
	pub fn write_dot(&self, out: &mut impl io::Write) -> Result<()> {
		match (&self.topology, &self.compiled) {
			(Some(topology), Some(compiled)) => dot::write(out, topology, compiled),
			_ => Err(Error::invalid(format!("`{}` has not been compiled", self.name))),
		}
	}

	pub fn export_dot(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		let mut file = File::create(path)
			.map_err(|err| Error::Message(format!("failed to create `{}`: {}", path.display(), err)))?;
		self.write_dot(&mut file)
	}

	pub fn destroy(self, ctx: &Context) -> Result<()> {
		for frame in self.frames {
			frame.destroy(ctx.device(), ctx.desc.wait_timeout)?;
		}
		Ok(())
	}
}

#[allow(clippy::too_many_arguments)]
fn pump<U>(
	ctx: &mut Context, compiled: &CompiledGraph, topology: &Topology, callbacks: Callbacks<U>, frame: &mut FrameData,
	user: &mut U, frame_index: u64, slot: usize,
) -> Result<FxHashMap<String, ExportedResource>> {
	let device = ctx.device.clone();
	let device = device.as_ref();
	let schedule = &compiled.schedule;

	frame.reset(device, ctx.desc.wait_timeout)?;
	if !frame.transients.is_current(compiled.version) {
		frame.views.destroy(device);
	}
	frame.transients.ensure(device, &compiled.aliasing, compiled.version)?;

	let handles = topology
		.resources
		.iter()
		.map(|(id, res)| {
			Ok(match res.source {
				ResourceSource::Create => compiled.aliasing.slots[id.index()].and_then(|t| frame.transients.get(t)),
				ResourceSource::Import(import) => Some(import.physical()),
				ResourceSource::Persistent(p) => Some(ctx.persistent(p)?.handle),
			})
		})
		.collect::<Result<Vec<_>>>()?;
	let first_uses = first_use_barriers(ctx, compiled, topology)?;
	let cmds = schedule
		.batches
		.iter()
		.map(|batch| {
			batch
				.lists
				.iter()
				.map(|&(pool, _)| frame.cmd_buf(device, pool))
				.collect::<Result<Vec<_>>>()
		})
		.collect::<Result<Vec<_>>>()?;

	let mut extras = vec![ExtraSync::default(); topology.stages.len()];
	{
		let mut resources = FrameResources {
			device,
			topology,
			handles: &handles,
			views: &mut frame.views,
			pipelines: &mut ctx.pipelines,
			frame_index,
			slot,
		};
		run_callbacks(
			&mut resources,
			compiled,
			callbacks,
			&cmds,
			&first_uses,
			&mut extras,
			user,
			&ctx.validator,
		)?;
	}

	let span = span!(Level::TRACE, "submit");
	let _e = span.enter();

	let mut waits = vec![Vec::new(); schedule.batches.len()];
	let mut signals = vec![Vec::new(); schedule.batches.len()];
	for (id, res) in topology.resources.iter() {
		let Some((first, last)) = compiled.spans[id.index()] else { continue };
		let (first, last) = (schedule.stage_batch[first], schedule.stage_batch[last]);
		match res.source {
			ResourceSource::Import(import) => {
				waits[first].extend(import.wait());
				signals[last].extend(import.signal());
			},
			ResourceSource::Persistent(p) => {
				let queue = schedule.batches[first].queue;
				for (other, &value) in ctx.persistent(p)?.sync.iter() {
					if other != queue && value > 0 {
						waits[first].push(SemaphoreSubmit {
							semaphore: ctx.timelines[other].semaphore(),
							value,
							stage: PipelineStageFlags2::ALL_COMMANDS,
						});
					}
				}
			},
			ResourceSource::Create => {},
		}
		if let Some(export) = res.export {
			signals[last].extend(export.signal);
		}
	}
	for (stage, extra) in extras.into_iter().enumerate() {
		let batch = schedule.stage_batch[stage];
		waits[batch].extend(extra.waits);
		signals[batch].extend(extra.signals);
	}

	let mut done: Vec<(Semaphore, u64)> = Vec::with_capacity(schedule.batches.len());
	for (i, batch) in schedule.batches.iter().enumerate() {
		let mut batch_waits: Vec<_> = batch
			.waits
			.iter()
			.map(|&w| {
				let (semaphore, value) = done[w];
				SemaphoreSubmit {
					semaphore,
					value,
					stage: PipelineStageFlags2::ALL_COMMANDS,
				}
			})
			.collect();
		batch_waits.extend(waits[i].iter().copied());
		let batch_waits = merge_waits(batch_waits);

		let (semaphore, value) = ctx.timelines[batch.queue].next();
		let mut batch_signals = vec![SemaphoreSubmit {
			semaphore,
			value,
			stage: PipelineStageFlags2::ALL_COMMANDS,
		}];
		batch_signals.extend(signals[i].iter().copied());

		trace!(queue = %batch.queue, stages = batch.stages.len(), value, "submit batch");
		let submitted = unsafe {
			device.submit(
				batch.queue,
				&Submission {
					command_buffers: &cmds[i],
					waits: &batch_waits,
					signals: &batch_signals,
				},
			)
		};
		if let Err(err) = submitted {
			frame.submitted(latest(&done));
			retire_persistent(ctx, compiled, topology, &done)?;
			return Err(err);
		}
		ctx.timelines[batch.queue].signalled(value);
		done.push((semaphore, value));
	}
	frame.submitted(latest(&done));
	retire_persistent(ctx, compiled, topology, &done)?;

	for (id, res) in topology.resources.iter() {
		let ResourceSource::Import(import) = res.source else { continue };
		let Some(present) = import.present() else { continue };
		let Some((_, last)) = compiled.spans[id.index()] else {
			ctx.validator.emit(
				Message::warning(format!("`{}` is presented without being used", res.name))
					.resource(id.index(), &res.name),
			);
			continue;
		};

		let batch = schedule.stage_batch[last];
		let waits = match import.signal() {
			Some(signal) => vec![signal],
			None => {
				let (semaphore, value) = done[batch];
				vec![SemaphoreSubmit {
					semaphore,
					value,
					stage: PipelineStageFlags2::ALL_COMMANDS,
				}]
			},
		};
		trace!(image_index = present.image_index, "present");
		unsafe {
			device.present(
				schedule.batches[batch].queue,
				&PresentRequest {
					swapchain: present.swapchain,
					image_index: present.image_index,
					waits,
				},
			)?;
		}
	}

	let mut exports = FxHashMap::default();
	for (id, res) in topology.resources.iter() {
		let (Some(export), Some(handle), Some((_, last))) = (res.export, handles[id.index()], compiled.spans[id.index()])
		else {
			continue;
		};
		exports.insert(
			res.name.clone(),
			ExportedResource {
				handle,
				desc: res.desc,
				state: export.state,
				queue: export.queue.unwrap_or(topology.stage(last).queue),
			},
		);
	}
	Ok(exports)
}

/// Moves persistent resources to the state the submitted batches leave them in.
///
/// `done` holds the timeline signal of every batch submitted so far, in submission order.
fn retire_persistent(
	ctx: &mut Context, compiled: &CompiledGraph, topology: &Topology, done: &[(Semaphore, u64)],
) -> Result<()> {
	let schedule = &compiled.schedule;
	let submitted = |stage: usize| schedule.stage_batch[stage] < done.len();

	for fin in compiled.sync.finals.iter() {
		let res = topology.resource(fin.resource);
		let ResourceSource::Persistent(p) = res.source else { continue };
		let persistent = ctx.persistent.get_mut(p).ok_or(Error::StaleHandle)?;
		if res.usages.iter().all(|&u| submitted(topology.usage(u).stage)) {
			apply_pieces(&mut persistent.pieces, &fin.pieces);
		} else {
			for &(stage, range, state) in fin.steps.iter() {
				if submitted(stage) {
					apply_pieces(&mut persistent.pieces, &[(range, state)]);
				}
			}
		}
	}

	for (_, res) in topology.resources.iter() {
		let ResourceSource::Persistent(p) = res.source else { continue };
		let persistent = ctx.persistent.get_mut(p).ok_or(Error::StaleHandle)?;
		for &u in res.usages.iter() {
			let batch = schedule.stage_batch[topology.usage(u).stage];
			if let Some(&(_, value)) = done.get(batch) {
				let queue = schedule.batches[batch].queue;
				persistent.sync[queue] = persistent.sync[queue].max(value);
			}
		}
	}
	Ok(())
}

/// Barriers from whatever state imported and persistent resources were left in, per stage.
fn first_use_barriers(ctx: &Context, compiled: &CompiledGraph, topology: &Topology) -> Result<Vec<Vec<Barrier>>> {
	let mut out = vec![Vec::new(); topology.stages.len()];
	for first in compiled.sync.first_uses.iter() {
		let res = topology.resource(first.resource);
		let (before, released) = match res.source {
			ResourceSource::Import(import) => (
				vec![(res.desc.full_range(), ResourceState::from_import(&import))],
				true,
			),
			ResourceSource::Persistent(p) => (ctx.persistent(p)?.pieces.clone(), false),
			ResourceSource::Create => continue,
		};

		let (barriers, kept) = first.resolve(&before, &compiled.families, res.desc.is_image(), released);
		if !kept {
			let stage = &topology.stage(first.stage).name;
			ctx.validator.emit(
				Message::warning(format!(
					"`{}` was left in another queue family without being released, its contents are discarded",
					res.name
				))
				.resource(first.resource, &res.name)
				.stage(first.stage, stage),
			);
		}
		out[first.stage].extend(barriers);
	}
	Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn run_callbacks<U>(
	resources: &mut FrameResources, compiled: &CompiledGraph, callbacks: Callbacks<U>, cmds: &[Vec<CommandBuffer>],
	first_uses: &[Vec<Barrier>], extras: &mut [ExtraSync], user: &mut U, validator: &Validator,
) -> Result<()> {
	let topology = resources.topology;
	let Callbacks { groups, mut stages } = callbacks;
	let failed = |stage: usize, phase: Phase, err: Error| {
		let name = &topology.stage(stage).name;
		validator.emit(Message::error(format!("stage `{}` failed in {:?}: {}", name, phase, err)).stage(stage, name));
		err
	};

	for (group, prepare) in groups.into_iter().enumerate() {
		let Some(prepare) = prepare else { continue };
		let mut ctx = PrepareContext {
			resources: &mut *resources,
			group,
		};
		prepare(&mut ctx, user).map_err(|err| {
			let name = &topology.groups.as_slice()[group].name;
			validator.emit(Message::error(format!("group `{}` failed to prepare: {}", name, err)).group(group, name));
			err
		})?;
	}

	for &stage in compiled.order.iter() {
		let Some(prepare) = stages[stage].prepare.take() else { continue };
		let mut ctx = StageContext {
			resources: &mut *resources,
			stage,
			phase: Phase::Prepare,
			cmd: None,
			extra: &mut extras[stage],
		};
		prepare(&mut ctx, user).map_err(|err| failed(stage, Phase::Prepare, err))?;
	}

	for (batch, cmds) in compiled.schedule.batches.iter().zip(cmds) {
		for ((_, list), &cmd) in batch.lists.iter().zip(cmds) {
			unsafe { resources.device.begin_command_buffer(cmd)? }
			for &stage in list {
				let span = span!(Level::TRACE, "run stage", name = %topology.stage(stage).name);
				let _e = span.enter();

				let sync = &compiled.sync.stages[stage];
				unsafe {
					record_barriers(
						resources,
						&compiled.families,
						cmd,
						sync.acquire.iter().chain(first_uses[stage].iter()).chain(sync.pre.iter()),
					)?;
				}
				match topology.stage(stage).op {
					Some(op) => unsafe { record_op(resources, cmd, op)? },
					None => {
						if let Some(record) = stages[stage].record.take() {
							let mut ctx = StageContext {
								resources: &mut *resources,
								stage,
								phase: Phase::Record,
								cmd: Some(cmd),
								extra: &mut extras[stage],
							};
							record(&mut ctx, user).map_err(|err| failed(stage, Phase::Record, err))?;
						}
					},
				}
				unsafe { record_barriers(resources, &compiled.families, cmd, sync.post.iter())? }
			}
			unsafe { resources.device.end_command_buffer(cmd)? }
		}
	}

	for &stage in compiled.order.iter() {
		let Some(submit) = stages[stage].submit.take() else { continue };
		let mut ctx = StageContext {
			resources: &mut *resources,
			stage,
			phase: Phase::Submit,
			cmd: None,
			extra: &mut extras[stage],
		};
		submit(&mut ctx, user).map_err(|err| failed(stage, Phase::Submit, err))?;
	}

	Ok(())
}

unsafe fn record_barriers<'b>(
	resources: &FrameResources, families: &Queues<u32>, cmd: CommandBuffer, barriers: impl Iterator<Item = &'b Barrier>,
) -> Result<()> {
	let mut images = Vec::new();
	let mut buffers = Vec::new();
	for barrier in barriers {
		let res = resources.topology.resource(barrier.resource);
		match (resources.handles[barrier.resource], res.desc) {
			(Some(PhysicalHandle::Image(image)), ResourceDesc::Image(desc)) => {
				images.push(barrier.to_image(image, desc.format, families))
			},
			(Some(PhysicalHandle::Buffer(buffer)), ResourceDesc::Buffer(_)) => {
				buffers.push(barrier.to_buffer(buffer, families))
			},
			_ => return Err(Error::invalid(format!("`{}` has no physical resource", res.name))),
		}
	}

	if !images.is_empty() || !buffers.is_empty() {
		resources.device.cmd_pipeline_barrier(cmd, &[], &buffers, &images);
	}
	Ok(())
}

unsafe fn record_op(resources: &FrameResources, cmd: CommandBuffer, op: TransferOp) -> Result<()> {
	let topology = resources.topology;
	let image = |usage: usize| {
		let usage = topology.usage(usage);
		match topology.resource(usage.resource).desc {
			ResourceDesc::Image(desc) => Ok((resources.image(usage)?, desc, usage.range)),
			ResourceDesc::Buffer(_) => Err(Error::invalid("transfer ops only work on images")),
		}
	};

	match op {
		TransferOp::Blit { src, dst, filter } => {
			let (src, src_desc, src_range) = image(src)?;
			let (dst, dst_desc, dst_range) = image(dst)?;
			let region = ImageBlit {
				src_subresource: src_range.to_layers(image_aspect_mask(src_desc.format)),
				src_offsets: [Offset3D::default(), far_corner(src_desc.level_extent(src_range.base_level))],
				dst_subresource: dst_range.to_layers(image_aspect_mask(dst_desc.format)),
				dst_offsets: [Offset3D::default(), far_corner(dst_desc.level_extent(dst_range.base_level))],
			};
			resources.device.cmd_blit_image(
				cmd,
				src,
				ImageLayout::TRANSFER_SRC_OPTIMAL,
				dst,
				ImageLayout::TRANSFER_DST_OPTIMAL,
				&[region],
				filter,
			);
		},
		TransferOp::Resolve { src, dst } => {
			let (src, src_desc, src_range) = image(src)?;
			let (dst, dst_desc, dst_range) = image(dst)?;
			let region = ImageResolve {
				src_subresource: src_range.to_layers(image_aspect_mask(src_desc.format)),
				src_offset: Offset3D::default(),
				dst_subresource: dst_range.to_layers(image_aspect_mask(dst_desc.format)),
				dst_offset: Offset3D::default(),
				extent: src_desc.size,
			};
			resources.device.cmd_resolve_image(
				cmd,
				src,
				ImageLayout::TRANSFER_SRC_OPTIMAL,
				dst,
				ImageLayout::TRANSFER_DST_OPTIMAL,
				&[region],
			);
		},
	}
	Ok(())
}

fn far_corner(extent: Extent3D) -> Offset3D {
	Offset3D {
		x: extent.width as i32,
		y: extent.height as i32,
		z: extent.depth as i32,
	}
}

/// Folds waits on the same semaphore into one.
fn merge_waits(waits: Vec<SemaphoreSubmit>) -> Vec<SemaphoreSubmit> {
	let mut out: Vec<SemaphoreSubmit> = Vec::with_capacity(waits.len());
	for wait in waits {
		match out.iter_mut().find(|w| w.semaphore == wait.semaphore) {
			Some(existing) => {
				existing.value = existing.value.max(wait.value);
				existing.stage |= wait.stage;
			},
			None => out.push(wait),
		}
	}
	out
}

/// The highest value signalled on every semaphore.
fn latest(done: &[(Semaphore, u64)]) -> Vec<(Semaphore, u64)> {
	let mut out: Vec<(Semaphore, u64)> = Vec::new();
	for &(semaphore, value) in done {
		match out.iter_mut().find(|(s, _)| *s == semaphore) {
			Some((_, existing)) => *existing = (*existing).max(value),
			None => out.push((semaphore, value)),
		}
	}
	out
}

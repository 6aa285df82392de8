use std::hash::{Hash, Hasher};

use ash::vk::{Filter, SampleCountFlags};
use rustc_hash::FxHasher;
use tracing::trace;

use crate::{
	arena::{Arena, Id},
	device::QueueType,
	graph::{
		context::{PrepareContext, StageContext},
		resource::PersistentId,
		virtual_resource::{
			BufferUsage,
			ExportInfo,
			Import,
			ImportedBuffer,
			ImportedImage,
			ImageUsage,
			ImageUsageType,
			ResourceSource,
			UsageKind,
		},
		Context,
	},
	resource::{BufferDesc, ImageDesc, ImageRange, ResourceDesc},
	Error,
	Result,
};

pub type GroupId = Id<GroupData>;
pub type StageId = Id<StageData>;
pub type ResourceId = Id<ResourceData>;
/// Resolves to the concrete resource behind a usage inside the stage's callbacks.
pub type UsageToken = Id<UsageData>;

pub(crate) type StageCallback<U> = Box<dyn FnOnce(&mut StageContext, &mut U) -> Result<()>>;
pub(crate) type GroupCallback<U> = Box<dyn FnOnce(&mut PrepareContext, &mut U) -> Result<()>>;

pub struct GroupData {
	pub(crate) name: String,
}

pub struct StageData {
	pub(crate) name: String,
	pub(crate) queue: QueueType,
	pub(crate) commands_queue: QueueType,
	pub(crate) group: Option<usize>,
	pub(crate) metadata: u64,
	pub(crate) usages: Vec<usize>,
	pub(crate) op: Option<TransferOp>,
}

pub struct ResourceData {
	pub(crate) name: String,
	pub(crate) desc: ResourceDesc,
	pub(crate) source: ResourceSource,
	pub(crate) usages: Vec<usize>,
	pub(crate) export: Option<ExportInfo>,
}

pub struct UsageData {
	pub(crate) stage: usize,
	pub(crate) resource: usize,
	pub(crate) kind: UsageKind,
	pub(crate) range: ImageRange,
}

impl UsageData {
	pub(crate) fn writes(&self) -> bool { self.kind.direction().writes() }
}

/// A transfer a stage records by itself, without a record callback.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub(crate) enum TransferOp {
	Blit { src: usize, dst: usize, filter: Filter },
	Resolve { src: usize, dst: usize },
}

pub(crate) struct StageCallbacks<U> {
	pub prepare: Option<StageCallback<U>>,
	pub record: Option<StageCallback<U>>,
	pub submit: Option<StageCallback<U>>,
}

impl<U> Default for StageCallbacks<U> {
	fn default() -> Self {
		Self {
			prepare: None,
			record: None,
			submit: None,
		}
	}
}

/// Everything a build declared, minus the callbacks.
pub(crate) struct Topology {
	pub groups: Arena<GroupData>,
	pub stages: Arena<StageData>,
	pub resources: Arena<ResourceData>,
	pub usages: Arena<UsageData>,
}

pub(crate) struct Callbacks<U> {
	pub groups: Vec<Option<GroupCallback<U>>>,
	pub stages: Vec<StageCallbacks<U>>,
}

impl Topology {
	pub fn stage(&self, index: usize) -> &StageData { &self.stages.as_slice()[index] }

	pub fn resource(&self, index: usize) -> &ResourceData { &self.resources.as_slice()[index] }

	pub fn usage(&self, index: usize) -> &UsageData { &self.usages.as_slice()[index] }

	/// Whether the stage touches an image that gets presented.
	pub fn presents(&self, stage: usize) -> bool {
		self.stage(stage).usages.iter().any(|&u| {
			matches!(
				self.resource(self.usage(u).resource).source,
				ResourceSource::Import(import) if import.present().is_some()
			)
		})
	}

	/// Hashes everything that shapes the compiled plan.
	///
	/// Import handles and semaphores are left out: they are re-bound every frame.
	pub fn fingerprint(&self) -> u64 {
		let mut h = FxHasher::default();

		self.groups.len().hash(&mut h);
		for (_, group) in self.groups.iter() {
			group.name.hash(&mut h);
		}

		self.stages.len().hash(&mut h);
		for (_, stage) in self.stages.iter() {
			stage.name.hash(&mut h);
			stage.queue.hash(&mut h);
			stage.commands_queue.hash(&mut h);
			stage.group.hash(&mut h);
			stage.usages.hash(&mut h);
			stage.op.hash(&mut h);
		}

		self.resources.len().hash(&mut h);
		for (_, res) in self.resources.iter() {
			res.name.hash(&mut h);
			res.desc.hash(&mut h);
			match res.source {
				ResourceSource::Create => 0u8.hash(&mut h),
				ResourceSource::Import(import) => {
					1u8.hash(&mut h);
					import.state().hash(&mut h);
					import.queue().hash(&mut h);
					import.wait().is_some().hash(&mut h);
					import.signal().is_some().hash(&mut h);
					import.present().is_some().hash(&mut h);
				},
				ResourceSource::Persistent(id) => {
					2u8.hash(&mut h);
					id.hash(&mut h);
				},
			}
			if let Some(export) = res.export {
				export.state.hash(&mut h);
				export.queue.hash(&mut h);
				export.signal.is_some().hash(&mut h);
			}
		}

		self.usages.len().hash(&mut h);
		for (_, usage) in self.usages.iter() {
			usage.stage.hash(&mut h);
			usage.resource.hash(&mut h);
			usage.kind.hash(&mut h);
			usage.range.hash(&mut h);
		}

		h.finish()
	}
}

/// Records the stages and resources of a frame.
///
/// Every handle it returns is only valid until the next build.
pub struct GraphBuilder<'c, U> {
	ctx: &'c Context,
	groups: Arena<GroupData>,
	group_callbacks: Vec<Option<GroupCallback<U>>>,
	stages: Arena<StageData>,
	callbacks: Vec<StageCallbacks<U>>,
	resources: Arena<ResourceData>,
	usages: Arena<UsageData>,
}

impl<'c, U> GraphBuilder<'c, U> {
	pub(crate) fn new(ctx: &'c Context) -> Self {
		let generation = ctx.next_generation();
		Self {
			ctx,
			groups: Arena::new(generation),
			group_callbacks: Vec::new(),
			stages: Arena::new(generation),
			callbacks: Vec::new(),
			resources: Arena::new(generation),
			usages: Arena::new(generation),
		}
	}

	pub(crate) fn finish(self) -> (Topology, Callbacks<U>) {
		(
			Topology {
				groups: self.groups,
				stages: self.stages,
				resources: self.resources,
				usages: self.usages,
			},
			Callbacks {
				groups: self.group_callbacks,
				stages: self.callbacks,
			},
		)
	}

	pub fn context(&self) -> &Context { self.ctx }

	/// Create a group whose `prepare` runs once per frame, before the prepare callbacks of its stages.
	pub fn create_group(
		&mut self, name: impl Into<String>, prepare: impl FnOnce(&mut PrepareContext, &mut U) -> Result<()> + 'static,
	) -> GroupId {
		self.group_callbacks.push(Some(Box::new(prepare)));
		self.groups.push(GroupData { name: name.into() })
	}

	pub fn create_stage<'b>(&'b mut self, name: impl Into<String>, queue: QueueType) -> StageBuilder<'b, 'c, U> {
		StageBuilder {
			graph: self,
			data: StageData {
				name: name.into(),
				queue,
				commands_queue: queue,
				group: None,
				metadata: 0,
				usages: Vec::new(),
				op: None,
			},
			group: None,
			callbacks: StageCallbacks::default(),
		}
	}

	/// Create a transient image, owned by the graph for one frame.
	///
	/// The usage flags of every usage are added to `desc.usage`.
	pub fn create_image(&mut self, name: impl Into<String>, desc: ImageDesc) -> Result<ResourceId> {
		validate_image_desc(&desc)?;
		Ok(self.push_resource(name.into(), ResourceDesc::Image(desc), ResourceSource::Create))
	}

	/// Create a transient buffer, owned by the graph for one frame.
	pub fn create_buffer(&mut self, name: impl Into<String>, desc: BufferDesc) -> Result<ResourceId> {
		if desc.size == 0 {
			return Err(Error::invalid("buffers cannot be empty"));
		}
		Ok(self.push_resource(name.into(), ResourceDesc::Buffer(desc), ResourceSource::Create))
	}

	/// Each handle can only be imported once per build.
	pub fn import_image(&mut self, name: impl Into<String>, image: ImportedImage) -> Result<ResourceId> {
		validate_image_desc(&image.desc)?;
		let import = Import::Image(image);
		import.validate()?;
		self.check_unique_import(&import)?;
		Ok(self.push_resource(name.into(), ResourceDesc::Image(image.desc), ResourceSource::Import(import)))
	}

	pub fn import_buffer(&mut self, name: impl Into<String>, buffer: ImportedBuffer) -> Result<ResourceId> {
		let import = Import::Buffer(buffer);
		import.validate()?;
		self.check_unique_import(&import)?;
		Ok(self.push_resource(
			name.into(),
			ResourceDesc::Buffer(buffer.desc),
			ResourceSource::Import(import),
		))
	}

	/// Use a resource created on the [`Context`] in this build.
	///
	/// Referencing the same resource again returns the same id.
	pub fn reference(&mut self, id: PersistentId) -> Result<ResourceId> {
		let res = self.ctx.persistent(id)?;
		let existing = self
			.resources
			.iter()
			.find(|(_, r)| matches!(r.source, ResourceSource::Persistent(p) if p == id));
		if let Some((existing, _)) = existing {
			return Ok(existing);
		}
		let (name, desc) = (res.name.clone(), res.desc);
		Ok(self.push_resource(name, desc, ResourceSource::Persistent(id)))
	}

	pub fn use_image(&mut self, stage: StageId, resource: ResourceId, usage: ImageUsage) -> Result<UsageToken> {
		let desc = match self.resources.get(resource)?.desc {
			ResourceDesc::Image(desc) => desc,
			ResourceDesc::Buffer(_) => return Err(Error::invalid("image usage of a buffer")),
		};
		let whole = desc.full_range();
		let range = match usage.range {
			Some(range) => range
				.resolve(&whole)
				.ok_or_else(|| Error::invalid(format!("{:?} is outside of the image", range)))?,
			None => whole,
		};
		self.push_usage(stage, resource, UsageKind::Image(usage), range)
	}

	pub fn use_buffer(&mut self, stage: StageId, resource: ResourceId, usage: BufferUsage) -> Result<UsageToken> {
		if let ResourceDesc::Image(_) = self.resources.get(resource)?.desc {
			return Err(Error::invalid("buffer usage of an image"));
		}
		self.push_usage(stage, resource, UsageKind::Buffer(usage), ImageRange::WHOLE_BUFFER)
	}

	/// Hand the resource back after the frame, in the state described by `info`.
	pub fn export(&mut self, resource: ResourceId, info: ExportInfo) -> Result<()> {
		let res = self.resources.get(resource)?;
		info.validate(res.desc.is_image())?;
		if res.export.is_some() {
			return Err(Error::invalid(format!("`{}` is already exported", res.name)));
		}
		if let ResourceSource::Import(import) = res.source {
			if import.present().is_some() {
				return Err(Error::invalid(format!("`{}` is presented, and cannot also be exported", res.name)));
			}
		}
		let name = res.name.clone();
		if self
			.resources
			.iter()
			.any(|(_, other)| other.export.is_some() && other.name == name)
		{
			return Err(Error::invalid(format!("another resource is already exported as `{}`", name)));
		}

		self.resources.get_mut(resource)?.export = Some(info);
		Ok(())
	}

	/// A graphics stage that blits `src_range` of `src` into `dst_range` of `dst`.
	///
	/// Both ranges must cover a single mip level and the same number of layers.
	pub fn blit(
		&mut self, name: impl Into<String>, src: ResourceId, src_range: ImageRange, dst: ResourceId,
		dst_range: ImageRange, filter: Filter,
	) -> Result<StageId> {
		if src_range.level_count != 1 || dst_range.level_count != 1 || src_range.layer_count != dst_range.layer_count {
			return Err(Error::invalid("blits copy one mip level of matching layers"));
		}

		let stage = self.create_stage(name, QueueType::Graphics).build()?;
		let src = self.use_image(stage, src, ImageUsage::read(ImageUsageType::TransferSrc).range(src_range))?;
		let dst = self.use_image(stage, dst, ImageUsage::write(ImageUsageType::TransferDst).range(dst_range))?;
		self.stages.get_mut(stage)?.op = Some(TransferOp::Blit {
			src: src.index(),
			dst: dst.index(),
			filter,
		});
		Ok(stage)
	}

	/// A graphics stage that resolves the multisampled `src` into `dst`.
	pub fn resolve(&mut self, name: impl Into<String>, src: ResourceId, dst: ResourceId) -> Result<StageId> {
		let (src_desc, dst_desc) = match (self.resource_desc(src)?, self.resource_desc(dst)?) {
			(ResourceDesc::Image(s), ResourceDesc::Image(d)) => (s, d),
			_ => return Err(Error::invalid("only images can be resolved")),
		};
		if src_desc.samples == SampleCountFlags::TYPE_1 || dst_desc.samples != SampleCountFlags::TYPE_1 {
			return Err(Error::invalid("resolves go from a multisampled image to a single-sampled one"));
		}
		if src_desc.size != dst_desc.size || src_desc.format != dst_desc.format {
			return Err(Error::invalid("resolved images must match in size and format"));
		}

		let range = ImageRange::levels(0, 1, src_desc.layers.min(dst_desc.layers));
		let stage = self.create_stage(name, QueueType::Graphics).build()?;
		let src = self.use_image(stage, src, ImageUsage::read(ImageUsageType::TransferSrc).range(range))?;
		let dst = self.use_image(stage, dst, ImageUsage::write(ImageUsageType::TransferDst).range(range))?;
		self.stages.get_mut(stage)?.op = Some(TransferOp::Resolve {
			src: src.index(),
			dst: dst.index(),
		});
		Ok(stage)
	}

	/// The creation descriptor of a resource, including the usage flags gathered so far.
	pub fn resource_desc(&self, resource: ResourceId) -> Result<ResourceDesc> { Ok(self.resources.get(resource)?.desc) }

	fn check_unique_import(&self, import: &Import) -> Result<()> {
		let handle = import.physical();
		let existing = self
			.resources
			.iter()
			.find(|(_, r)| matches!(r.source, ResourceSource::Import(other) if other.physical() == handle));
		match existing {
			Some((_, other)) => Err(Error::invalid(format!("{:?} is already imported as `{}`", handle, other.name))),
			None => Ok(()),
		}
	}

	fn push_resource(&mut self, name: String, desc: ResourceDesc, source: ResourceSource) -> ResourceId {
		trace!(name = %name, "declare resource");
		self.resources.push(ResourceData {
			name,
			desc,
			source,
			usages: Vec::new(),
			export: None,
		})
	}

	fn push_usage(
		&mut self, stage: StageId, resource: ResourceId, kind: UsageKind, range: ImageRange,
	) -> Result<UsageToken> {
		kind.validate()?;
		self.stages.get(stage)?;

		let res = self.resources.get_mut(resource)?;
		if let ResourceSource::Create = res.source {
			match (&mut res.desc, kind) {
				(ResourceDesc::Image(desc), UsageKind::Image(u)) => desc.usage |= u.ty.flags(),
				(ResourceDesc::Buffer(desc), UsageKind::Buffer(u)) => desc.usage |= u.ty.flags(),
				_ => {},
			}
		}

		let token = self.usages.push(UsageData {
			stage: stage.index(),
			resource: resource.index(),
			kind,
			range,
		});
		self.resources.get_mut(resource)?.usages.push(token.index());
		self.stages.get_mut(stage)?.usages.push(token.index());
		Ok(token)
	}
}

pub(crate) fn validate_image_desc(desc: &ImageDesc) -> Result<()> {
	if desc.levels == 0 || desc.layers == 0 {
		return Err(Error::invalid("images need at least one level and layer"));
	}
	if desc.size.width == 0 || desc.size.height == 0 || desc.size.depth == 0 {
		return Err(Error::invalid("images cannot be empty"));
	}
	Ok(())
}

pub struct StageBuilder<'b, 'c, U> {
	graph: &'b mut GraphBuilder<'c, U>,
	data: StageData,
	group: Option<GroupId>,
	callbacks: StageCallbacks<U>,
}

impl<'b, 'c, U> StageBuilder<'b, 'c, U> {
	/// Record on `queue`'s command pools, while still submitting to the stage's queue.
	pub fn commands_queue(mut self, queue: QueueType) -> Self {
		self.data.commands_queue = queue;
		self
	}

	/// Checked on `build`.
	pub fn group(mut self, group: GroupId) -> Self {
		self.group = Some(group);
		self
	}

	/// An opaque tag handed back to the stage's callbacks.
	pub fn metadata(mut self, metadata: u64) -> Self {
		self.data.metadata = metadata;
		self
	}

	pub fn prepare(mut self, f: impl FnOnce(&mut StageContext, &mut U) -> Result<()> + 'static) -> Self {
		self.callbacks.prepare = Some(Box::new(f));
		self
	}

	pub fn record(mut self, f: impl FnOnce(&mut StageContext, &mut U) -> Result<()> + 'static) -> Self {
		self.callbacks.record = Some(Box::new(f));
		self
	}

	pub fn submit(mut self, f: impl FnOnce(&mut StageContext, &mut U) -> Result<()> + 'static) -> Self {
		self.callbacks.submit = Some(Box::new(f));
		self
	}

	pub fn build(mut self) -> Result<StageId> {
		let graph = self.graph;
		if let Some(group) = self.group {
			graph.groups.get(group)?;
			self.data.group = Some(group.index());
		}
		let device = graph.ctx.device();
		if !device.can_submit(self.data.commands_queue, self.data.queue) {
			return Err(Error::invalid(format!(
				"stage `{}` records on the {} queue but the device cannot submit that to the {} queue",
				self.data.name, self.data.commands_queue, self.data.queue
			)));
		}
		if graph.stages.iter().any(|(_, s)| s.name == self.data.name) {
			return Err(Error::invalid(format!("a stage named `{}` already exists", self.data.name)));
		}

		trace!(name = %self.data.name, queue = %self.data.queue, "declare stage");
		graph.callbacks.push(self.callbacks);
		Ok(graph.stages.push(self.data))
	}
}

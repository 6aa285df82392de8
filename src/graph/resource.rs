use ash::vk::{ImageLayout, ImageView, ImageUsageFlags};
use slotmap::new_key_type;
use tracing::trace;

use crate::{
	device::{Device, QueueType, Queues},
	graph::{
		builder::Topology,
		sync::ResourceState,
		validation::{Message, Validator},
		virtual_resource::{ResourceLifetime, ResourceSource},
		FxHashMap,
	},
	resource::{ImageDesc, ImageRange, ImageViewDesc, PhysicalHandle, ResourceDesc},
	Result,
};

pub(crate) fn create_physical(device: &dyn Device, name: &str, desc: &ResourceDesc) -> Result<PhysicalHandle> {
	Ok(match desc {
		ResourceDesc::Buffer(desc) => PhysicalHandle::Buffer(device.create_buffer(name, desc)?),
		ResourceDesc::Image(desc) => PhysicalHandle::Image(device.create_image(name, desc)?),
	})
}

pub(crate) unsafe fn destroy_physical(device: &dyn Device, handle: PhysicalHandle) {
	match handle {
		PhysicalHandle::Buffer(buffer) => device.destroy_buffer(buffer),
		PhysicalHandle::Image(image) => device.destroy_image(image),
	}
}

new_key_type! {
	/// A resource owned by the [`Context`](crate::graph::Context), valid until it is destroyed.
	pub struct PersistentId;
}

/// A resource owned by the [`Context`](crate::graph::Context) that lives across frames and graphs.
pub struct PersistentResource {
	pub(crate) name: String,
	pub(crate) desc: ResourceDesc,
	pub(crate) handle: PhysicalHandle,
	/// What the last frame that used it left it as, per subresource.
	pub(crate) pieces: Vec<(ImageRange, ResourceState)>,
	/// The timeline values of the last submissions that used it.
	pub(crate) sync: Queues<u64>,
}

impl PersistentResource {
	pub(crate) fn new(name: String, desc: ResourceDesc, handle: PhysicalHandle) -> Self {
		Self {
			name,
			pieces: vec![(desc.full_range(), ResourceState::UNDEFINED)],
			desc,
			handle,
			sync: Queues::default(),
		}
	}

	pub fn name(&self) -> &str { &self.name }

	pub fn desc(&self) -> ResourceDesc { self.desc }

	pub fn handle(&self) -> PhysicalHandle { self.handle }

	/// The layout the whole resource is known to be in, if it is uniform.
	pub fn layout(&self) -> Option<ImageLayout> {
		let first = self.pieces.first()?.1.layout;
		self.pieces.iter().all(|(_, s)| s.layout == first).then_some(first)
	}
}

#[derive(Eq, PartialEq, Hash)]
enum MergeCandidate {
	Buffer(QueueType),
	Image(ImageDesc, QueueType),
}

/// One physical resource backing one or more transients with disjoint lifetimes.
#[derive(Clone, Debug)]
pub(crate) struct TransientDesc {
	pub name: String,
	pub desc: ResourceDesc,
	pub lifetime: ResourceLifetime,
	/// In the order they use the memory.
	pub resources: Vec<usize>,
}

impl TransientDesc {
	/// Returns `true` if the resource was merged.
	fn try_merge(&mut self, resource: usize, lifetime: ResourceLifetime, desc: &ResourceDesc) -> bool {
		if !self.lifetime.independent(lifetime) {
			return false;
		}

		match (&mut self.desc, desc) {
			(ResourceDesc::Buffer(this), ResourceDesc::Buffer(other)) => {
				this.size = this.size.max(other.size);
				this.usage |= other.usage;
			},
			(ResourceDesc::Image(this), ResourceDesc::Image(other)) => this.usage |= other.usage,
			_ => return false,
		}

		self.lifetime = self.lifetime.union(lifetime);
		self.resources.push(resource);
		true
	}
}

/// Which physical transient backs each logical resource.
#[derive(Clone, Debug, Default)]
pub(crate) struct AliasPlan {
	pub slots: Vec<Option<usize>>,
	pub transients: Vec<TransientDesc>,
}

struct ResourceAliaser {
	aliasable: FxHashMap<MergeCandidate, Vec<usize>>,
	plan: AliasPlan,
}

impl ResourceAliaser {
	fn push(&mut self, resource: usize, name: &str, desc: ResourceDesc, lifetime: ResourceLifetime) -> usize {
		let index = self.plan.transients.len();
		self.plan.transients.push(TransientDesc {
			name: name.to_string(),
			desc,
			lifetime,
			resources: vec![resource],
		});
		self.plan.slots[resource] = Some(index);
		index
	}

	fn merge(
		&mut self, merge: MergeCandidate, resource: usize, name: &str, desc: ResourceDesc, lifetime: ResourceLifetime,
		validator: &Validator,
	) {
		let merges = self.aliasable.entry(merge).or_default();
		for &i in merges.iter() {
			let transient = &mut self.plan.transients[i];
			if transient.try_merge(resource, lifetime, &desc) {
				validator.emit(
					Message::performance(format!("`{}` reuses the memory of `{}`", name, transient.name))
						.resource(resource, name),
				);
				self.plan.slots[resource] = Some(i);
				return;
			}
		}

		let index = self.plan.transients.len();
		merges.push(index);
		self.push(resource, name, desc, lifetime);
	}
}

impl AliasPlan {
	/// Assigns every transient a physical resource, sharing memory between transients that are never alive at the
	/// same time on the same queue.
	pub fn new(topology: &Topology, positions: &[usize], alias: bool, validator: &Validator) -> Self {
		let mut aliaser = ResourceAliaser {
			aliasable: FxHashMap::default(),
			plan: AliasPlan {
				slots: vec![None; topology.resources.len()],
				transients: Vec::new(),
			},
		};

		let mut transients = Vec::new();
		for (id, res) in topology.resources.iter() {
			if !matches!(res.source, ResourceSource::Create) {
				continue;
			}
			if res.usages.is_empty() {
				validator.emit(
					Message::warning(format!("`{}` is never used", res.name)).resource(id.index(), &res.name),
				);
				continue;
			}

			let mut stages = res.usages.iter().map(|&u| topology.usage(u).stage);
			let lifetime = stages
				.clone()
				.map(|s| ResourceLifetime::singular(positions[s] as u32))
				.reduce(ResourceLifetime::union)
				.unwrap_or(ResourceLifetime::singular(0));
			let queue = topology.stage(topology.usage(res.usages[0]).stage).queue;
			let single_queue = stages.all(|s| topology.stage(s).queue == queue);
			let candidate = (alias && single_queue && res.export.is_none()).then_some(queue);

			transients.push((id.index(), lifetime, candidate));
		}
		transients.sort_by_key(|&(index, lifetime, _)| (lifetime.start, index));

		for (index, lifetime, candidate) in transients {
			let res = topology.resource(index);
			match (candidate, res.desc) {
				(None, desc) => {
					aliaser.push(index, &res.name, desc, lifetime);
				},
				(Some(queue), desc @ ResourceDesc::Buffer(_)) => {
					aliaser.merge(MergeCandidate::Buffer(queue), index, &res.name, desc, lifetime, validator)
				},
				(Some(queue), ResourceDesc::Image(image)) => {
					let key = ImageDesc {
						usage: ImageUsageFlags::empty(),
						..image
					};
					aliaser.merge(
						MergeCandidate::Image(key, queue),
						index,
						&res.name,
						ResourceDesc::Image(image),
						lifetime,
						validator,
					)
				},
			}
		}

		aliaser.plan
	}
}

/// The physical transients of one frame slot, created on first use and kept until the plan changes.
#[derive(Default)]
pub(crate) struct Transients {
	version: Option<u64>,
	handles: Vec<PhysicalHandle>,
}

impl Transients {
	/// Whether the resources were created for plan `version`.
	pub fn is_current(&self, version: u64) -> bool { self.version == Some(version) }

	pub fn ensure(&mut self, device: &dyn Device, plan: &AliasPlan, version: u64) -> Result<()> {
		if self.is_current(version) {
			return Ok(());
		}

		self.destroy(device);
		for transient in plan.transients.iter() {
			trace!(name = %transient.name, "create transient");
			let handle = create_physical(device, &transient.name, &transient.desc)?;
			self.handles.push(handle);
		}
		self.version = Some(version);
		Ok(())
	}

	pub fn get(&self, transient: usize) -> Option<PhysicalHandle> { self.handles.get(transient).copied() }

	pub fn destroy(&mut self, device: &dyn Device) {
		for handle in self.handles.drain(..) {
			unsafe { destroy_physical(device, handle) }
		}
		self.version = None;
	}
}

/// Image views of one frame slot. Views not requested since the last reset are destroyed on the next.
#[derive(Default)]
pub(crate) struct ViewCache {
	views: FxHashMap<ImageViewDesc, (ImageView, bool)>,
}

impl ViewCache {
	pub fn get(&mut self, device: &dyn Device, desc: ImageViewDesc) -> Result<ImageView> {
		if let Some((view, used)) = self.views.get_mut(&desc) {
			*used = true;
			return Ok(*view);
		}

		let view = device.create_image_view(&desc)?;
		self.views.insert(desc, (view, true));
		Ok(view)
	}

	pub fn reset(&mut self, device: &dyn Device) {
		self.views.retain(|_, (view, used)| {
			if !*used {
				unsafe { device.destroy_image_view(*view) }
			}
			std::mem::replace(used, false)
		});
	}

	pub fn len(&self) -> usize { self.views.len() }

	pub fn destroy(&mut self, device: &dyn Device) {
		for (_, (view, _)) in self.views.drain() {
			unsafe { device.destroy_image_view(view) }
		}
	}
}

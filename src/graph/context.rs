use ash::vk::{Buffer, CommandBuffer, Image, ImageView, ImageViewType, Pipeline};

use crate::{
	device::{Device, QueueType, SemaphoreSubmit},
	graph::{
		builder::{Topology, UsageData, UsageToken},
		pipeline::{PipelineCache, PipelineDesc},
		resource::ViewCache,
	},
	resource::{ImageRange, ImageViewDesc, PhysicalHandle, ResourceDesc},
	Error,
	Result,
};

/// Which callback of a stage is running.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Phase {
	Prepare,
	Record,
	Submit,
}

/// Semaphores a stage asked its batch to wait on or signal.
#[derive(Clone, Default, Debug)]
pub(crate) struct ExtraSync {
	pub waits: Vec<SemaphoreSubmit>,
	pub signals: Vec<SemaphoreSubmit>,
}

/// What callbacks can reach during a frame.
pub(crate) struct FrameResources<'a> {
	pub device: &'a dyn Device,
	pub topology: &'a Topology,
	pub handles: &'a [Option<PhysicalHandle>],
	pub views: &'a mut ViewCache,
	pub pipelines: &'a mut PipelineCache,
	pub frame_index: u64,
	pub slot: usize,
}

impl<'a> FrameResources<'a> {
	fn usage(&self, token: UsageToken) -> Result<&'a UsageData> {
		let topology = self.topology;
		topology.usages.get(token)
	}

	fn handle(&self, usage: &UsageData) -> Result<PhysicalHandle> {
		self.handles.get(usage.resource).copied().flatten().ok_or_else(|| {
			Error::invalid(format!(
				"`{}` has no physical resource",
				self.topology.resource(usage.resource).name
			))
		})
	}

	pub(crate) fn image(&self, usage: &UsageData) -> Result<Image> {
		match self.handle(usage)? {
			PhysicalHandle::Image(image) => Ok(image),
			PhysicalHandle::Buffer(_) => Err(Error::invalid("token refers to a buffer")),
		}
	}

	fn buffer(&self, usage: &UsageData) -> Result<Buffer> {
		match self.handle(usage)? {
			PhysicalHandle::Buffer(buffer) => Ok(buffer),
			PhysicalHandle::Image(_) => Err(Error::invalid("token refers to an image")),
		}
	}

	fn image_view(&mut self, usage: &UsageData, view_type: ImageViewType) -> Result<ImageView> {
		let image = self.image(usage)?;
		let format = match self.topology.resource(usage.resource).desc {
			ResourceDesc::Image(desc) => desc.format,
			ResourceDesc::Buffer(_) => return Err(Error::invalid("token refers to a buffer")),
		};
		self.views.get(
			self.device,
			ImageViewDesc {
				image,
				view_type,
				format,
				range: usage.range,
			},
		)
	}

	fn pipeline(&mut self, desc: &PipelineDesc) -> Result<Pipeline> { self.pipelines.get(self.device, desc) }
}

/// Handed to the callbacks of a stage.
///
/// Tokens only resolve inside the stage that received them from the builder.
pub struct StageContext<'f, 'a> {
	pub(crate) resources: &'f mut FrameResources<'a>,
	pub(crate) stage: usize,
	pub(crate) phase: Phase,
	pub(crate) cmd: Option<CommandBuffer>,
	pub(crate) extra: &'f mut ExtraSync,
}

impl<'f, 'a> StageContext<'f, 'a> {
	pub fn device(&self) -> &dyn Device { self.resources.device }

	/// The command buffer to record into. Only available to `record` callbacks.
	pub fn cmd(&self) -> Result<CommandBuffer> {
		match (self.phase, self.cmd) {
			(Phase::Record, Some(cmd)) => Ok(cmd),
			_ => Err(Error::invalid(format!(
				"stage `{}` asked for a command buffer while in {:?}",
				self.stage_name(),
				self.phase
			))),
		}
	}

	pub fn image(&self, token: UsageToken) -> Result<Image> {
		let usage = self.own(token)?;
		self.resources.image(usage)
	}

	/// The subresources the usage covers.
	pub fn image_range(&self, token: UsageToken) -> Result<ImageRange> {
		let usage = self.own(token)?;
		if !self.resources.topology.resource(usage.resource).desc.is_image() {
			return Err(Error::invalid("token refers to a buffer"));
		}
		Ok(usage.range)
	}

	pub fn buffer(&self, token: UsageToken) -> Result<Buffer> {
		let usage = self.own(token)?;
		self.resources.buffer(usage)
	}

	/// A view of the used subresources, kept alive while it is requested every frame.
	pub fn image_view(&mut self, token: UsageToken, view_type: ImageViewType) -> Result<ImageView> {
		let usage = self.own(token)?;
		self.resources.image_view(usage, view_type)
	}

	pub fn pipeline(&mut self, desc: &PipelineDesc) -> Result<Pipeline> { self.resources.pipeline(desc) }

	/// Make the stage's submission wait on `wait`.
	pub fn wait_semaphore(&mut self, wait: SemaphoreSubmit) { self.extra.waits.push(wait); }

	/// Make the stage's submission signal `signal`.
	pub fn signal_semaphore(&mut self, signal: SemaphoreSubmit) { self.extra.signals.push(signal); }

	/// How many frames the graph has executed before this one.
	pub fn frame_index(&self) -> u64 { self.resources.frame_index }

	/// The frame in flight slot being recorded.
	pub fn slot(&self) -> usize { self.resources.slot }

	pub fn queue(&self) -> QueueType { self.resources.topology.stage(self.stage).queue }

	pub fn stage_name(&self) -> &str { &self.resources.topology.stage(self.stage).name }

	pub fn metadata(&self) -> u64 { self.resources.topology.stage(self.stage).metadata }

	fn own(&self, token: UsageToken) -> Result<&'a UsageData> {
		let usage = self.resources.usage(token)?;
		if usage.stage != self.stage {
			return Err(Error::invalid(format!(
				"stage `{}` used a token of stage `{}`",
				self.stage_name(),
				self.resources.topology.stage(usage.stage).name
			)));
		}
		Ok(usage)
	}
}

/// Handed to the prepare callback of a group. Tokens of any stage resolve.
pub struct PrepareContext<'f, 'a> {
	pub(crate) resources: &'f mut FrameResources<'a>,
	pub(crate) group: usize,
}

impl PrepareContext<'_, '_> {
	pub fn device(&self) -> &dyn Device { self.resources.device }

	pub fn image(&self, token: UsageToken) -> Result<Image> {
		let usage = self.resources.usage(token)?;
		self.resources.image(usage)
	}

	pub fn buffer(&self, token: UsageToken) -> Result<Buffer> {
		let usage = self.resources.usage(token)?;
		self.resources.buffer(usage)
	}

	pub fn image_view(&mut self, token: UsageToken, view_type: ImageViewType) -> Result<ImageView> {
		let usage = self.resources.usage(token)?;
		self.resources.image_view(usage, view_type)
	}

	pub fn pipeline(&mut self, desc: &PipelineDesc) -> Result<Pipeline> { self.resources.pipeline(desc) }

	pub fn frame_index(&self) -> u64 { self.resources.frame_index }

	pub fn slot(&self) -> usize { self.resources.slot }

	pub fn group_name(&self) -> &str { &self.resources.topology.groups.as_slice()[self.group].name }
}

use ash::vk::{
	AccessFlags2,
	Buffer,
	BufferUsageFlags,
	Format,
	Handle,
	Image,
	ImageLayout,
	ImageUsageFlags,
	PipelineStageFlags2,
	SwapchainKHR,
};

use crate::{
	device::{QueueType, SemaphoreSubmit},
	graph::resource::PersistentId,
	resource::{
		attachment_layout,
		sampled_image_layout,
		Access,
		BufferDesc,
		ImageAccess,
		ImageDesc,
		ImageRange,
		PhysicalHandle,
	},
	Error,
	Result,
};

/// A shader stage.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum Shader {
	Vertex,
	TesselationControl,
	TesselationEvaluation,
	Geometry,
	Fragment,
	Compute,
	/// Every graphics shader stage.
	AllGraphics,
}

impl From<Shader> for PipelineStageFlags2 {
	fn from(shader: Shader) -> Self {
		match shader {
			Shader::Vertex => PipelineStageFlags2::VERTEX_SHADER,
			Shader::TesselationControl => PipelineStageFlags2::TESSELLATION_CONTROL_SHADER,
			Shader::TesselationEvaluation => PipelineStageFlags2::TESSELLATION_EVALUATION_SHADER,
			Shader::Geometry => PipelineStageFlags2::GEOMETRY_SHADER,
			Shader::Fragment => PipelineStageFlags2::FRAGMENT_SHADER,
			Shader::Compute => PipelineStageFlags2::COMPUTE_SHADER,
			Shader::AllGraphics => PipelineStageFlags2::PRE_RASTERIZATION_SHADERS | PipelineStageFlags2::FRAGMENT_SHADER,
		}
	}
}

/// Which way a stage touches a resource.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum Direction {
	Read,
	Write,
	ReadWrite,
}

impl Direction {
	pub fn reads(self) -> bool { matches!(self, Direction::Read | Direction::ReadWrite) }

	pub fn writes(self) -> bool { matches!(self, Direction::Write | Direction::ReadWrite) }
}

/// The type of usage of a buffer.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum BufferUsageType {
	TransferSrc,
	TransferDst,
	Uniform(Shader),
	Storage(Shader),
	Index,
	Vertex,
	Indirect,
	Custom(Access),
}

impl BufferUsageType {
	fn allows(self, direction: Direction) -> bool {
		match self {
			BufferUsageType::TransferSrc
			| BufferUsageType::Uniform(_)
			| BufferUsageType::Index
			| BufferUsageType::Vertex
			| BufferUsageType::Indirect => direction == Direction::Read,
			BufferUsageType::TransferDst => direction == Direction::Write,
			BufferUsageType::Storage(_) | BufferUsageType::Custom(_) => true,
		}
	}

	pub fn flags(self) -> BufferUsageFlags {
		match self {
			BufferUsageType::TransferSrc => BufferUsageFlags::TRANSFER_SRC,
			BufferUsageType::TransferDst => BufferUsageFlags::TRANSFER_DST,
			BufferUsageType::Uniform(_) => BufferUsageFlags::UNIFORM_BUFFER,
			BufferUsageType::Storage(_) => BufferUsageFlags::STORAGE_BUFFER,
			BufferUsageType::Index => BufferUsageFlags::INDEX_BUFFER,
			BufferUsageType::Vertex => BufferUsageFlags::VERTEX_BUFFER,
			BufferUsageType::Indirect => BufferUsageFlags::INDIRECT_BUFFER,
			BufferUsageType::Custom(_) => BufferUsageFlags::empty(),
		}
	}
}

/// The usage of a buffer by a stage.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct BufferUsage {
	pub ty: BufferUsageType,
	pub direction: Direction,
}

impl BufferUsage {
	pub fn read(ty: BufferUsageType) -> Self {
		Self {
			ty,
			direction: Direction::Read,
		}
	}

	pub fn write(ty: BufferUsageType) -> Self {
		Self {
			ty,
			direction: Direction::Write,
		}
	}

	pub fn read_write(ty: BufferUsageType) -> Self {
		Self {
			ty,
			direction: Direction::ReadWrite,
		}
	}

	pub fn access(&self) -> Access {
		Access {
			stage: buffer_stage_mask(self.ty),
			access: buffer_access_mask(self.ty, self.direction),
		}
	}
}

/// The type of usage of an image.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum ImageUsageType {
	TransferSrc,
	TransferDst,
	Sampled(Shader),
	Storage(Shader),
	ColorAttachment,
	DepthStencilAttachment,
	Custom(ImageAccess),
}

impl ImageUsageType {
	fn allows(self, direction: Direction) -> bool {
		match self {
			ImageUsageType::TransferSrc | ImageUsageType::Sampled(_) => direction == Direction::Read,
			ImageUsageType::TransferDst => direction == Direction::Write,
			ImageUsageType::Storage(_)
			| ImageUsageType::ColorAttachment
			| ImageUsageType::DepthStencilAttachment
			| ImageUsageType::Custom(_) => true,
		}
	}

	pub fn flags(self) -> ImageUsageFlags {
		match self {
			ImageUsageType::TransferSrc => ImageUsageFlags::TRANSFER_SRC,
			ImageUsageType::TransferDst => ImageUsageFlags::TRANSFER_DST,
			ImageUsageType::Sampled(_) => ImageUsageFlags::SAMPLED,
			ImageUsageType::Storage(_) => ImageUsageFlags::STORAGE,
			ImageUsageType::ColorAttachment => ImageUsageFlags::COLOR_ATTACHMENT,
			ImageUsageType::DepthStencilAttachment => ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
			ImageUsageType::Custom(_) => ImageUsageFlags::empty(),
		}
	}
}

/// The usage of an image by a stage.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct ImageUsage {
	pub ty: ImageUsageType,
	pub direction: Direction,
	/// The used subresources, or the whole image.
	pub range: Option<ImageRange>,
}

impl ImageUsage {
	pub fn read(ty: ImageUsageType) -> Self {
		Self {
			ty,
			direction: Direction::Read,
			range: None,
		}
	}

	pub fn write(ty: ImageUsageType) -> Self {
		Self {
			ty,
			direction: Direction::Write,
			range: None,
		}
	}

	pub fn read_write(ty: ImageUsageType) -> Self {
		Self {
			ty,
			direction: Direction::ReadWrite,
			range: None,
		}
	}

	pub fn range(self, range: ImageRange) -> Self {
		Self {
			range: Some(range),
			..self
		}
	}

	pub fn access(&self, format: Format) -> ImageAccess {
		ImageAccess {
			access: Access {
				stage: image_stage_mask(self.ty, format),
				access: image_access_mask(self.ty, self.direction),
			},
			layout: image_layout(self.ty, format),
		}
	}
}

fn image_stage_mask(ty: ImageUsageType, format: Format) -> PipelineStageFlags2 {
	match ty {
		ImageUsageType::TransferSrc | ImageUsageType::TransferDst => PipelineStageFlags2::TRANSFER,
		ImageUsageType::Sampled(s) | ImageUsageType::Storage(s) => s.into(),
		ImageUsageType::ColorAttachment => PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
		ImageUsageType::DepthStencilAttachment => {
			if crate::resource::is_depth_format(format) {
				PipelineStageFlags2::EARLY_FRAGMENT_TESTS | PipelineStageFlags2::LATE_FRAGMENT_TESTS
			} else {
				PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
			}
		},
		ImageUsageType::Custom(access) => access.access.stage,
	}
}

fn image_access_mask(ty: ImageUsageType, direction: Direction) -> AccessFlags2 {
	let (read, write) = match ty {
		ImageUsageType::TransferSrc => (AccessFlags2::TRANSFER_READ, AccessFlags2::NONE),
		ImageUsageType::TransferDst => (AccessFlags2::NONE, AccessFlags2::TRANSFER_WRITE),
		ImageUsageType::Sampled(_) => (AccessFlags2::SHADER_SAMPLED_READ, AccessFlags2::NONE),
		ImageUsageType::Storage(_) => (AccessFlags2::SHADER_STORAGE_READ, AccessFlags2::SHADER_STORAGE_WRITE),
		ImageUsageType::ColorAttachment => (
			AccessFlags2::COLOR_ATTACHMENT_READ,
			AccessFlags2::COLOR_ATTACHMENT_WRITE,
		),
		ImageUsageType::DepthStencilAttachment => (
			AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
			AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
		),
		ImageUsageType::Custom(access) => return access.access.access,
	};
	split_access(read, write, direction)
}

fn image_layout(ty: ImageUsageType, format: Format) -> ImageLayout {
	match ty {
		ImageUsageType::TransferSrc => ImageLayout::TRANSFER_SRC_OPTIMAL,
		ImageUsageType::TransferDst => ImageLayout::TRANSFER_DST_OPTIMAL,
		ImageUsageType::Sampled(_) => sampled_image_layout(format),
		ImageUsageType::Storage(_) => ImageLayout::GENERAL,
		ImageUsageType::ColorAttachment | ImageUsageType::DepthStencilAttachment => attachment_layout(format),
		ImageUsageType::Custom(access) => access.layout,
	}
}

fn buffer_stage_mask(ty: BufferUsageType) -> PipelineStageFlags2 {
	match ty {
		BufferUsageType::TransferSrc | BufferUsageType::TransferDst => PipelineStageFlags2::TRANSFER,
		BufferUsageType::Uniform(s) | BufferUsageType::Storage(s) => s.into(),
		BufferUsageType::Index => PipelineStageFlags2::INDEX_INPUT,
		BufferUsageType::Vertex => PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
		BufferUsageType::Indirect => PipelineStageFlags2::DRAW_INDIRECT,
		BufferUsageType::Custom(access) => access.stage,
	}
}

fn buffer_access_mask(ty: BufferUsageType, direction: Direction) -> AccessFlags2 {
	let (read, write) = match ty {
		BufferUsageType::TransferSrc => (AccessFlags2::TRANSFER_READ, AccessFlags2::NONE),
		BufferUsageType::TransferDst => (AccessFlags2::NONE, AccessFlags2::TRANSFER_WRITE),
		BufferUsageType::Uniform(_) => (AccessFlags2::UNIFORM_READ, AccessFlags2::NONE),
		BufferUsageType::Storage(_) => (AccessFlags2::SHADER_STORAGE_READ, AccessFlags2::SHADER_STORAGE_WRITE),
		BufferUsageType::Index => (AccessFlags2::INDEX_READ, AccessFlags2::NONE),
		BufferUsageType::Vertex => (AccessFlags2::VERTEX_ATTRIBUTE_READ, AccessFlags2::NONE),
		BufferUsageType::Indirect => (AccessFlags2::INDIRECT_COMMAND_READ, AccessFlags2::NONE),
		BufferUsageType::Custom(access) => return access.access,
	};
	split_access(read, write, direction)
}

fn split_access(read: AccessFlags2, write: AccessFlags2, direction: Direction) -> AccessFlags2 {
	match direction {
		Direction::Read => read,
		Direction::Write => write,
		Direction::ReadWrite => read | write,
	}
}

/// A usage of either kind of resource.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum UsageKind {
	Buffer(BufferUsage),
	Image(ImageUsage),
}

impl UsageKind {
	pub fn direction(&self) -> Direction {
		match self {
			UsageKind::Buffer(u) => u.direction,
			UsageKind::Image(u) => u.direction,
		}
	}

	pub(crate) fn validate(&self) -> Result<()> {
		let ok = match self {
			UsageKind::Buffer(u) => u.ty.allows(u.direction),
			UsageKind::Image(u) => u.ty.allows(u.direction),
		};
		if ok {
			Ok(())
		} else {
			Err(Error::invalid(format!("{:?} cannot be used with {:?}", self, self.direction())))
		}
	}
}

/// A swapchain image to present once the graph is done with it.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct Present {
	pub swapchain: SwapchainKHR,
	pub image_index: u32,
}

/// An image owned outside of the graph.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ImportedImage {
	pub handle: Image,
	pub desc: ImageDesc,
	/// The last access to the image before the graph gets it.
	pub state: ImageAccess,
	/// The queue that last owned the image. If it belongs to another queue family than the first stage using it,
	/// the owner must have released it to that family.
	pub queue: Option<QueueType>,
	/// Waited on by the first submission using the image.
	pub wait: Option<SemaphoreSubmit>,
	/// Signalled by the last submission using the image.
	pub signal: Option<SemaphoreSubmit>,
	pub present: Option<Present>,
}

impl ImportedImage {
	pub fn new(handle: Image, desc: ImageDesc) -> Self {
		Self {
			handle,
			desc,
			state: ImageAccess::default(),
			queue: None,
			wait: None,
			signal: None,
			present: None,
		}
	}

	/// A swapchain image: its previous contents are discarded, and it is presented after the frame.
	pub fn swapchain(
		handle: Image, desc: ImageDesc, swapchain: SwapchainKHR, image_index: u32, acquired: SemaphoreSubmit,
		rendered: SemaphoreSubmit,
	) -> Self {
		Self {
			handle,
			desc,
			state: ImageAccess::default(),
			queue: None,
			wait: Some(acquired),
			signal: Some(rendered),
			present: Some(Present {
				swapchain,
				image_index,
			}),
		}
	}
}

/// A buffer owned outside of the graph.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ImportedBuffer {
	pub handle: Buffer,
	pub desc: BufferDesc,
	pub state: Access,
	pub queue: Option<QueueType>,
	pub wait: Option<SemaphoreSubmit>,
	pub signal: Option<SemaphoreSubmit>,
}

impl ImportedBuffer {
	pub fn new(handle: Buffer, desc: BufferDesc) -> Self {
		Self {
			handle,
			desc,
			state: Access::NONE,
			queue: None,
			wait: None,
			signal: None,
		}
	}
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Import {
	Image(ImportedImage),
	Buffer(ImportedBuffer),
}

impl Import {
	pub fn handle(&self) -> u64 {
		match self {
			Import::Image(i) => i.handle.as_raw(),
			Import::Buffer(b) => b.handle.as_raw(),
		}
	}

	pub fn physical(&self) -> PhysicalHandle {
		match self {
			Import::Image(i) => PhysicalHandle::Image(i.handle),
			Import::Buffer(b) => PhysicalHandle::Buffer(b.handle),
		}
	}

	pub fn state(&self) -> ImageAccess {
		match self {
			Import::Image(i) => i.state,
			Import::Buffer(b) => ImageAccess {
				access: b.state,
				layout: ImageLayout::UNDEFINED,
			},
		}
	}

	pub fn queue(&self) -> Option<QueueType> {
		match self {
			Import::Image(i) => i.queue,
			Import::Buffer(b) => b.queue,
		}
	}

	pub fn wait(&self) -> Option<SemaphoreSubmit> {
		match self {
			Import::Image(i) => i.wait,
			Import::Buffer(b) => b.wait,
		}
	}

	pub fn signal(&self) -> Option<SemaphoreSubmit> {
		match self {
			Import::Image(i) => i.signal,
			Import::Buffer(b) => b.signal,
		}
	}

	pub fn present(&self) -> Option<Present> {
		match self {
			Import::Image(i) => i.present,
			Import::Buffer(_) => None,
		}
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.handle() == 0 {
			return Err(Error::invalid("imported resource has a null handle"));
		}
		for sync in [self.wait(), self.signal()].into_iter().flatten() {
			if sync.semaphore.as_raw() == 0 {
				return Err(Error::invalid("import connection has a null semaphore"));
			}
		}
		if let Some(present) = self.present() {
			if present.swapchain.as_raw() == 0 {
				return Err(Error::invalid("present target has a null swapchain"));
			}
		}
		Ok(())
	}
}

/// How a logical resource is backed.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ResourceSource {
	/// A fresh transient resource, owned by the graph for the duration of a frame.
	Create,
	Import(Import),
	/// A resource created on the [`Context`](crate::graph::Context), kept across frames.
	Persistent(PersistentId),
}

/// The state a resource is handed back in.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ExportInfo {
	/// The layout is ignored for buffers.
	pub state: ImageAccess,
	/// The queue that will use the resource next. Ownership is released to it if it is in another family.
	pub queue: Option<QueueType>,
	/// Signalled once the graph is done with the resource.
	pub signal: Option<SemaphoreSubmit>,
}

impl ExportInfo {
	pub(crate) fn validate(&self, image: bool) -> Result<()> {
		if image && self.state.layout == ImageLayout::UNDEFINED {
			return Err(Error::invalid("exported images need a final layout"));
		}
		if let Some(signal) = self.signal {
			if signal.semaphore.as_raw() == 0 {
				return Err(Error::invalid("export has a null release semaphore"));
			}
		}
		Ok(())
	}
}

/// The first and last position (in execution order) a resource is used at.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct ResourceLifetime {
	pub start: u32,
	pub end: u32,
}

impl ResourceLifetime {
	pub fn singular(pos: u32) -> Self { Self { start: pos, end: pos } }

	pub fn union(self, other: Self) -> Self {
		Self {
			start: self.start.min(other.start),
			end: self.end.max(other.end),
		}
	}

	pub fn independent(self, other: Self) -> bool { self.start > other.end || self.end < other.start }
}

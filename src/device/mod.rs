//! The backend the render graph drives.
//!
//! The graph never talks to a driver itself: everything it needs from the GPU goes through [`Device`], so a
//! Vulkan backend, a validation shim, or a recording fake can sit underneath it.

use std::{
	fmt,
	ops::{Index, IndexMut},
};

use ash::vk::{
	Buffer,
	BufferMemoryBarrier2,
	CommandBuffer,
	CommandPool,
	Filter,
	Image,
	ImageBlit,
	ImageLayout,
	ImageMemoryBarrier2,
	ImageResolve,
	ImageView,
	MemoryBarrier2,
	Pipeline,
	PipelineBindPoint,
	PipelineStageFlags2,
	RenderingInfo,
	Semaphore,
	SwapchainKHR,
};

use crate::{
	graph::pipeline::PipelineDesc,
	resource::{BufferDesc, ImageDesc, ImageViewDesc},
	Result,
};


/// A hardware queue the graph can submit to.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum QueueType {
	/// Also supports presentation.
	Graphics,
	Compute,
	Transfer,
}

impl QueueType {
	pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

	pub fn name(self) -> &'static str {
		match self {
			QueueType::Graphics => "graphics",
			QueueType::Compute => "compute",
			QueueType::Transfer => "transfer",
		}
	}
}

impl fmt::Display for QueueType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// One `T` per queue.
#[derive(Copy, Clone, Default, Hash, PartialEq, Eq, Debug)]
pub struct Queues<T> {
	pub graphics: T,
	pub compute: T,
	pub transfer: T,
}

impl<T> Queues<T> {
	pub fn new(mut f: impl FnMut(QueueType) -> T) -> Self {
		Self {
			graphics: f(QueueType::Graphics),
			compute: f(QueueType::Compute),
			transfer: f(QueueType::Transfer),
		}
	}

	pub fn try_new<E>(mut f: impl FnMut(QueueType) -> Result<T, E>) -> Result<Self, E> {
		Ok(Self {
			graphics: f(QueueType::Graphics)?,
			compute: f(QueueType::Compute)?,
			transfer: f(QueueType::Transfer)?,
		})
	}

	pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Queues<U> {
		Queues {
			graphics: f(self.graphics),
			compute: f(self.compute),
			transfer: f(self.transfer),
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = (QueueType, &T)> {
		[
			(QueueType::Graphics, &self.graphics),
			(QueueType::Compute, &self.compute),
			(QueueType::Transfer, &self.transfer),
		]
		.into_iter()
	}
}

impl<T> Index<QueueType> for Queues<T> {
	type Output = T;

	fn index(&self, queue: QueueType) -> &T {
		match queue {
			QueueType::Graphics => &self.graphics,
			QueueType::Compute => &self.compute,
			QueueType::Transfer => &self.transfer,
		}
	}
}

impl<T> IndexMut<QueueType> for Queues<T> {
	fn index_mut(&mut self, queue: QueueType) -> &mut T {
		match queue {
			QueueType::Graphics => &mut self.graphics,
			QueueType::Compute => &mut self.compute,
			QueueType::Transfer => &mut self.transfer,
		}
	}
}

/// A semaphore operation attached to a submission.
///
/// `value` is ignored for binary semaphores.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct SemaphoreSubmit {
	pub semaphore: Semaphore,
	pub value: u64,
	pub stage: PipelineStageFlags2,
}

impl SemaphoreSubmit {
	pub fn binary(semaphore: Semaphore, stage: PipelineStageFlags2) -> Self {
		Self {
			semaphore,
			value: 0,
			stage,
		}
	}
}

/// A single queue submission.
#[derive(Copy, Clone, Debug)]
pub struct Submission<'a> {
	pub command_buffers: &'a [CommandBuffer],
	pub waits: &'a [SemaphoreSubmit],
	pub signals: &'a [SemaphoreSubmit],
}

/// A swapchain image handed to the presentation engine.
#[derive(Clone, Debug)]
pub struct PresentRequest {
	pub swapchain: SwapchainKHR,
	pub image_index: u32,
	/// Signalled by the submission that last used the image.
	pub waits: Vec<SemaphoreSubmit>,
}

/// Everything the render graph needs from a GPU backend.
///
/// Handles are plain Vulkan handles. Methods that record into a command buffer, submit, or destroy objects are
/// `unsafe` for the same reasons their `ash` counterparts are.
pub trait Device {
	/// The queue family index of `queue`. Queues of the same family need no ownership transfers between them.
	fn queue_family(&self, queue: QueueType) -> u32;

	/// Whether command buffers allocated from `commands`'s pools can be submitted to `submit`.
	fn can_submit(&self, commands: QueueType, submit: QueueType) -> bool {
		self.queue_family(commands) == self.queue_family(submit)
	}

	fn create_image(&self, name: &str, desc: &ImageDesc) -> Result<Image>;

	unsafe fn destroy_image(&self, image: Image);

	fn create_buffer(&self, name: &str, desc: &BufferDesc) -> Result<Buffer>;

	unsafe fn destroy_buffer(&self, buffer: Buffer);

	fn create_image_view(&self, desc: &ImageViewDesc) -> Result<ImageView>;

	unsafe fn destroy_image_view(&self, view: ImageView);

	fn create_pipeline(&self, desc: &PipelineDesc) -> Result<Pipeline>;

	unsafe fn destroy_pipeline(&self, pipeline: Pipeline);

	fn create_command_pool(&self, queue: QueueType) -> Result<CommandPool>;

	/// Recycles every command buffer allocated from `pool`.
	unsafe fn reset_command_pool(&self, pool: CommandPool) -> Result<()>;

	unsafe fn destroy_command_pool(&self, pool: CommandPool);

	fn allocate_command_buffer(&self, pool: CommandPool) -> Result<CommandBuffer>;

	/// Begins one-time-submit recording.
	unsafe fn begin_command_buffer(&self, buf: CommandBuffer) -> Result<()>;

	unsafe fn end_command_buffer(&self, buf: CommandBuffer) -> Result<()>;

	unsafe fn cmd_pipeline_barrier(
		&self, buf: CommandBuffer, memory: &[MemoryBarrier2], buffers: &[BufferMemoryBarrier2],
		images: &[ImageMemoryBarrier2],
	);

	unsafe fn cmd_begin_rendering(&self, buf: CommandBuffer, info: &RenderingInfo);

	unsafe fn cmd_end_rendering(&self, buf: CommandBuffer);

	unsafe fn cmd_bind_pipeline(&self, buf: CommandBuffer, bind_point: PipelineBindPoint, pipeline: Pipeline);

	unsafe fn cmd_draw(
		&self, buf: CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32,
	);

	unsafe fn cmd_dispatch(&self, buf: CommandBuffer, x: u32, y: u32, z: u32);

	unsafe fn cmd_blit_image(
		&self, buf: CommandBuffer, src: Image, src_layout: ImageLayout, dst: Image, dst_layout: ImageLayout,
		regions: &[ImageBlit], filter: Filter,
	);

	unsafe fn cmd_resolve_image(
		&self, buf: CommandBuffer, src: Image, src_layout: ImageLayout, dst: Image, dst_layout: ImageLayout,
		regions: &[ImageResolve],
	);

	/// Creates a timeline semaphore with an initial value of 0.
	fn create_timeline_semaphore(&self) -> Result<Semaphore>;

	unsafe fn destroy_semaphore(&self, semaphore: Semaphore);

	/// Blocks until every timeline semaphore has reached its value, or `timeout` nanoseconds pass.
	fn wait_semaphores(&self, waits: &[(Semaphore, u64)], timeout: u64) -> Result<()>;

	unsafe fn submit(&self, queue: QueueType, submission: &Submission) -> Result<()>;

	unsafe fn present(&self, queue: QueueType, request: &PresentRequest) -> Result<()>;
}

use ash::vk::{CommandBuffer, CommandPool, Semaphore};

use crate::{
	device::{Device, QueueType, Queues},
	graph::resource::{Transients, ViewCache},
	Result,
};

pub struct TimelineSemaphore {
	inner: Semaphore,
	value: u64,
}

impl TimelineSemaphore {
	pub fn new(device: &dyn Device) -> Result<Self> {
		Ok(Self {
			inner: device.create_timeline_semaphore()?,
			value: 0,
		})
	}

	pub fn wait(&self, device: &dyn Device, timeout: u64) -> Result<()> {
		device.wait_semaphores(&[(self.inner, self.value)], timeout)
	}

	/// The value the next signal should set. Taken by [`signalled`](Self::signalled) once the signal is submitted.
	pub fn next(&self) -> (Semaphore, u64) { (self.inner, self.value + 1) }

	pub fn signalled(&mut self, value: u64) { self.value = self.value.max(value); }

	/// The last value submitted for signalling.
	pub fn value(&self) -> u64 { self.value }

	pub fn semaphore(&self) -> Semaphore { self.inner }

	pub fn destroy(self, device: &dyn Device) {
		unsafe { device.destroy_semaphore(self.inner) }
	}
}

/// The state of a frame slot.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FrameState {
	/// Nothing in flight.
	Idle,
	/// Being recorded.
	Pending,
	/// Submitted, possibly still executing.
	Running,
}

/// Everything a frame in flight owns.
pub(crate) struct FrameData {
	state: FrameState,
	/// Timeline values that mark the frame as finished.
	sync: Vec<(Semaphore, u64)>,
	pools: Queues<Option<CommandPool>>,
	bufs: Queues<Vec<CommandBuffer>>,
	buf_cursor: Queues<usize>,
	pub transients: Transients,
	pub views: ViewCache,
}

impl FrameData {
	pub fn new() -> Self {
		Self {
			state: FrameState::Idle,
			sync: Vec::new(),
			pools: Queues::default(),
			bufs: Queues::default(),
			buf_cursor: Queues::default(),
			transients: Transients::default(),
			views: ViewCache::default(),
		}
	}

	pub fn state(&self) -> FrameState { self.state }

	/// Blocks until the GPU is done with the slot.
	pub fn wait(&mut self, device: &dyn Device, timeout: u64) -> Result<()> {
		if self.state == FrameState::Running && !self.sync.is_empty() {
			device.wait_semaphores(&self.sync, timeout)?;
		}
		self.sync.clear();
		self.state = FrameState::Idle;
		Ok(())
	}

	/// Waits for the slot, and recycles its command buffers and stale views.
	pub fn reset(&mut self, device: &dyn Device, timeout: u64) -> Result<()> {
		self.wait(device, timeout)?;

		for queue in QueueType::ALL {
			if let Some(pool) = self.pools[queue] {
				unsafe { device.reset_command_pool(pool)? }
			}
			self.buf_cursor[queue] = 0;
		}
		self.views.reset(device);
		self.state = FrameState::Pending;
		Ok(())
	}

	pub fn cmd_buf(&mut self, device: &dyn Device, queue: QueueType) -> Result<CommandBuffer> {
		let cursor = self.buf_cursor[queue];
		if let Some(&buf) = self.bufs[queue].get(cursor) {
			self.buf_cursor[queue] += 1;
			return Ok(buf);
		}

		let pool = match self.pools[queue] {
			Some(pool) => pool,
			None => {
				let pool = device.create_command_pool(queue)?;
				self.pools[queue] = Some(pool);
				pool
			},
		};
		let buf = device.allocate_command_buffer(pool)?;
		self.bufs[queue].push(buf);
		self.buf_cursor[queue] += 1;
		Ok(buf)
	}

	/// Marks the slot as in flight until every semaphore reaches its value.
	pub fn submitted(&mut self, sync: Vec<(Semaphore, u64)>) {
		self.sync = sync;
		self.state = if self.sync.is_empty() {
			FrameState::Idle
		} else {
			FrameState::Running
		};
	}

	/// Recording failed before anything was submitted.
	pub fn abandon(&mut self) {
		if self.state == FrameState::Pending {
			self.state = FrameState::Idle;
		}
	}

	pub fn destroy(mut self, device: &dyn Device, timeout: u64) -> Result<()> {
		self.wait(device, timeout)?;
		self.views.destroy(device);
		self.transients.destroy(device);
		for queue in QueueType::ALL {
			if let Some(pool) = self.pools[queue].take() {
				unsafe { device.destroy_command_pool(pool) }
			}
		}
		Ok(())
	}
}

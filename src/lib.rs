//! A render graph over explicit, manually synchronized GPU APIs.
//!
//! Client code describes a frame as stages that use logical resources. The graph works out execution order,
//! resource lifetimes and aliasing, pipeline barriers, queue ownership transfers and cross-queue waits, and pumps
//! the compiled plan across a fixed number of frames in flight.

pub use ash;
use ash::vk;

pub mod arena;
pub mod device;
pub mod graph;
pub mod resource;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// Malformed builder input or a capability used outside of its phase.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	/// A handle from a previous build, or from another graph.
	#[error("stale handle")]
	StaleHandle,
	/// The stages form a dependency cycle.
	#[error("dependency cycle between stages {stages:?}")]
	Cycle { stages: Vec<String> },
	#[error("timed out waiting for the GPU")]
	Timeout,
	/// The device is gone and must be recreated.
	#[error("device lost")]
	DeviceLost,
	#[error("vulkan error: {0}")]
	Vulkan(vk::Result),
	#[error("{0}")]
	Message(String),
}

impl Error {
	pub fn is_device_lost(&self) -> bool { matches!(self, Error::DeviceLost) }

	pub(crate) fn invalid(message: impl Into<String>) -> Self { Error::InvalidArgument(message.into()) }
}

impl From<vk::Result> for Error {
	fn from(result: vk::Result) -> Self {
		match result {
			vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
			vk::Result::TIMEOUT => Error::Timeout,
			x => Error::Vulkan(x),
		}
	}
}

use ash::vk::{CullModeFlags, Format, Pipeline, PipelineBindPoint, PrimitiveTopology, SampleCountFlags, ShaderStageFlags};
use tracing::trace;

use crate::{device::Device, graph::FxHashMap, Result};

/// SPIR-V for one shader stage.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct ShaderDesc {
	pub stage: ShaderStageFlags,
	pub code: Vec<u32>,
	pub entry: String,
}

impl ShaderDesc {
	pub fn new(stage: ShaderStageFlags, code: Vec<u32>) -> Self {
		Self {
			stage,
			code,
			entry: "main".to_string(),
		}
	}
}

/// A pipeline for dynamic rendering.
#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct GraphicsPipelineDesc {
	pub shaders: Vec<ShaderDesc>,
	pub color_formats: Vec<Format>,
	pub depth_format: Option<Format>,
	pub topology: PrimitiveTopology,
	pub cull_mode: CullModeFlags,
	pub samples: SampleCountFlags,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub struct ComputePipelineDesc {
	pub shader: ShaderDesc,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug)]
pub enum PipelineDesc {
	Graphics(GraphicsPipelineDesc),
	Compute(ComputePipelineDesc),
}

impl PipelineDesc {
	pub fn bind_point(&self) -> PipelineBindPoint {
		match self {
			PipelineDesc::Graphics(_) => PipelineBindPoint::GRAPHICS,
			PipelineDesc::Compute(_) => PipelineBindPoint::COMPUTE,
		}
	}
}

/// Pipelines live as long as the context, keyed by their full description.
#[derive(Default)]
pub(crate) struct PipelineCache {
	pipelines: FxHashMap<PipelineDesc, Pipeline>,
}

impl PipelineCache {
	pub fn get(&mut self, device: &dyn Device, desc: &PipelineDesc) -> Result<Pipeline> {
		if let Some(&pipeline) = self.pipelines.get(desc) {
			return Ok(pipeline);
		}

		trace!(bind_point = ?desc.bind_point(), "create pipeline");
		let pipeline = device.create_pipeline(desc)?;
		self.pipelines.insert(desc.clone(), pipeline);
		Ok(pipeline)
	}

	pub fn len(&self) -> usize { self.pipelines.len() }

	pub fn destroy(&mut self, device: &dyn Device) {
		for (_, pipeline) in self.pipelines.drain() {
			unsafe { device.destroy_pipeline(pipeline) }
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::test::{Call, RecordingDevice};

	#[test]
	fn pipelines_are_created_once() {
		let device = RecordingDevice::new();
		let mut cache = PipelineCache::default();
		let desc = PipelineDesc::Compute(ComputePipelineDesc {
			shader: ShaderDesc::new(ShaderStageFlags::COMPUTE, vec![0x0723_0203]),
		});

		let a = cache.get(&device, &desc).unwrap();
		let b = cache.get(&device, &desc).unwrap();
		assert_eq!(a, b);
		assert_eq!(cache.len(), 1);
		let created = device
			.calls()
			.iter()
			.filter(|c| matches!(c, Call::CreatePipeline(_)))
			.count();
		assert_eq!(created, 1);

		cache.destroy(&device);
		assert!(device.calls().iter().any(|c| matches!(c, Call::DestroyPipeline(_))));
	}
}

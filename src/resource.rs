use ash::vk::{
	AccessFlags2,
	Buffer,
	BufferUsageFlags,
	Extent3D,
	Format,
	Image,
	ImageAspectFlags,
	ImageCreateFlags,
	ImageLayout,
	ImageSubresourceLayers,
	ImageSubresourceRange,
	ImageType,
	ImageUsageFlags,
	ImageViewType,
	PipelineStageFlags2,
	SampleCountFlags,
	REMAINING_ARRAY_LAYERS,
	REMAINING_MIP_LEVELS,
};

/// A description for a buffer.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct BufferDesc {
	pub size: u64,
	pub usage: BufferUsageFlags,
}

/// A description for an image.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct ImageDesc {
	pub flags: ImageCreateFlags,
	pub format: Format,
	pub size: Extent3D,
	pub levels: u32,
	pub layers: u32,
	pub samples: SampleCountFlags,
	pub usage: ImageUsageFlags,
}

impl ImageDesc {
	/// A single-level, single-layer 2D image.
	pub fn texture_2d(format: Format, width: u32, height: u32, usage: ImageUsageFlags) -> Self {
		Self {
			flags: ImageCreateFlags::empty(),
			format,
			size: Extent3D {
				width,
				height,
				depth: 1,
			},
			levels: 1,
			layers: 1,
			samples: SampleCountFlags::TYPE_1,
			usage,
		}
	}

	pub fn image_type(&self) -> ImageType {
		if self.size.depth > 1 {
			ImageType::TYPE_3D
		} else if self.size.height > 1 {
			ImageType::TYPE_2D
		} else {
			ImageType::TYPE_1D
		}
	}

	/// Every mip level and array layer of the image.
	pub fn full_range(&self) -> ImageRange {
		ImageRange {
			base_level: 0,
			level_count: self.levels,
			base_layer: 0,
			layer_count: self.layers,
		}
	}

	/// The size of mip level `level`.
	pub fn level_extent(&self, level: u32) -> Extent3D {
		Extent3D {
			width: (self.size.width >> level).max(1),
			height: (self.size.height >> level).max(1),
			depth: (self.size.depth >> level).max(1),
		}
	}
}

#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum ResourceDesc {
	Buffer(BufferDesc),
	Image(ImageDesc),
}

impl ResourceDesc {
	pub fn is_image(&self) -> bool { matches!(self, ResourceDesc::Image(_)) }

	/// The whole resource. Buffers are treated as a single level and layer.
	pub fn full_range(&self) -> ImageRange {
		match self {
			ResourceDesc::Buffer(_) => ImageRange::WHOLE_BUFFER,
			ResourceDesc::Image(desc) => desc.full_range(),
		}
	}
}

/// A concrete resource handed to stage callbacks.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub enum PhysicalHandle {
	Buffer(Buffer),
	Image(Image),
}

impl PhysicalHandle {
	pub fn raw(self) -> u64 {
		use ash::vk::Handle;

		match self {
			PhysicalHandle::Buffer(b) => b.as_raw(),
			PhysicalHandle::Image(i) => i.as_raw(),
		}
	}
}

/// A range of mip levels and array layers.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct ImageRange {
	pub base_level: u32,
	pub level_count: u32,
	pub base_layer: u32,
	pub layer_count: u32,
}

impl ImageRange {
	pub const WHOLE_BUFFER: Self = Self {
		base_level: 0,
		level_count: 1,
		base_layer: 0,
		layer_count: 1,
	};

	pub fn levels(base_level: u32, level_count: u32, layers: u32) -> Self {
		Self {
			base_level,
			level_count,
			base_layer: 0,
			layer_count: layers,
		}
	}

	fn level_end(&self) -> u32 { self.base_level.saturating_add(self.level_count) }

	fn layer_end(&self) -> u32 { self.base_layer.saturating_add(self.layer_count) }

	/// Replaces `REMAINING_MIP_LEVELS` and `REMAINING_ARRAY_LAYERS` with what is left of `whole`.
	///
	/// Returns `None` if the range does not fit in `whole`.
	pub fn resolve(self, whole: &Self) -> Option<Self> {
		let level_count = match self.level_count {
			REMAINING_MIP_LEVELS => whole.level_end().checked_sub(self.base_level)?,
			count => count,
		};
		let layer_count = match self.layer_count {
			REMAINING_ARRAY_LAYERS => whole.layer_end().checked_sub(self.base_layer)?,
			count => count,
		};
		let range = Self {
			level_count,
			layer_count,
			..self
		};
		range.base_level.checked_add(range.level_count)?;
		range.base_layer.checked_add(range.layer_count)?;
		(!range.is_empty() && whole.contains(&range)).then_some(range)
	}

	pub fn is_empty(&self) -> bool { self.level_count == 0 || self.layer_count == 0 }

	pub fn contains(&self, other: &Self) -> bool {
		self.base_level <= other.base_level
			&& other.level_end() <= self.level_end()
			&& self.base_layer <= other.base_layer
			&& other.layer_end() <= self.layer_end()
	}

	pub fn intersects(&self, other: &Self) -> bool { self.intersection(other).is_some() }

	pub fn intersection(&self, other: &Self) -> Option<Self> {
		let base_level = self.base_level.max(other.base_level);
		let level_end = self.level_end().min(other.level_end());
		let base_layer = self.base_layer.max(other.base_layer);
		let layer_end = self.layer_end().min(other.layer_end());
		if base_level >= level_end || base_layer >= layer_end {
			return None;
		}

		Some(Self {
			base_level,
			level_count: level_end - base_level,
			base_layer,
			layer_count: layer_end - base_layer,
		})
	}

	/// The parts of `self` not covered by `other`, as at most four disjoint ranges.
	pub fn subtract(&self, other: &Self) -> Vec<Self> {
		let Some(cut) = self.intersection(other) else {
			return vec![*self];
		};

		let mut out = Vec::with_capacity(4);
		// Whole-layer slabs below and above the cut.
		if cut.base_level > self.base_level {
			out.push(Self {
				base_level: self.base_level,
				level_count: cut.base_level - self.base_level,
				..*self
			});
		}
		if cut.level_end() < self.level_end() {
			out.push(Self {
				base_level: cut.level_end(),
				level_count: self.level_end() - cut.level_end(),
				..*self
			});
		}
		// Then the layers on either side of the cut, within the cut's levels.
		if cut.base_layer > self.base_layer {
			out.push(Self {
				base_level: cut.base_level,
				level_count: cut.level_count,
				base_layer: self.base_layer,
				layer_count: cut.base_layer - self.base_layer,
			});
		}
		if cut.layer_end() < self.layer_end() {
			out.push(Self {
				base_level: cut.base_level,
				level_count: cut.level_count,
				base_layer: cut.layer_end(),
				layer_count: self.layer_end() - cut.layer_end(),
			});
		}
		out
	}

	pub fn to_vk(self, aspect_mask: ImageAspectFlags) -> ImageSubresourceRange {
		ImageSubresourceRange {
			aspect_mask,
			base_mip_level: self.base_level,
			level_count: self.level_count,
			base_array_layer: self.base_layer,
			layer_count: self.layer_count,
		}
	}

	/// The layers of the base level, for copy-like commands.
	pub fn to_layers(self, aspect_mask: ImageAspectFlags) -> ImageSubresourceLayers {
		ImageSubresourceLayers {
			aspect_mask,
			mip_level: self.base_level,
			base_array_layer: self.base_layer,
			layer_count: self.layer_count,
		}
	}
}

/// An access of a resource.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Access {
	pub stage: PipelineStageFlags2,
	pub access: AccessFlags2,
}

impl Access {
	pub const NONE: Self = Self {
		stage: PipelineStageFlags2::NONE,
		access: AccessFlags2::NONE,
	};

	pub fn new(stage: PipelineStageFlags2, access: AccessFlags2) -> Self { Self { stage, access } }

	pub fn merge(self, other: Self) -> Self {
		Self {
			stage: self.stage | other.stage,
			access: self.access | other.access,
		}
	}

	pub fn is_none(&self) -> bool { self.stage.is_empty() && self.access.is_empty() }

	/// Whether `other` is already covered by this access.
	pub fn covers(&self, other: &Self) -> bool { self.stage.contains(other.stage) && self.access.contains(other.access) }
}

/// An access of an image.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ImageAccess {
	pub access: Access,
	pub layout: ImageLayout,
}

impl ImageAccess {
	pub fn new(stage: PipelineStageFlags2, access: AccessFlags2, layout: ImageLayout) -> Self {
		Self {
			access: Access { stage, access },
			layout,
		}
	}
}

/// A description for an image view.
#[derive(Copy, Clone, Hash, PartialEq, Eq, Debug)]
pub struct ImageViewDesc {
	pub image: Image,
	pub view_type: ImageViewType,
	pub format: Format,
	pub range: ImageRange,
}

impl ImageViewDesc {
	pub fn subresource_range(&self) -> ImageSubresourceRange { self.range.to_vk(image_aspect_mask(self.format)) }
}

pub fn image_aspect_mask(format: Format) -> ImageAspectFlags {
	match format {
		Format::D16_UNORM | Format::X8_D24_UNORM_PACK32 | Format::D32_SFLOAT => ImageAspectFlags::DEPTH,
		Format::D16_UNORM_S8_UINT | Format::D24_UNORM_S8_UINT | Format::D32_SFLOAT_S8_UINT => {
			ImageAspectFlags::DEPTH | ImageAspectFlags::STENCIL
		},
		Format::S8_UINT => ImageAspectFlags::STENCIL,
		_ => ImageAspectFlags::COLOR,
	}
}

pub fn is_depth_format(format: Format) -> bool { !image_aspect_mask(format).contains(ImageAspectFlags::COLOR) }

pub fn sampled_image_layout(format: Format) -> ImageLayout {
	match format {
		Format::D16_UNORM | Format::X8_D24_UNORM_PACK32 | Format::D32_SFLOAT => ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
		Format::D16_UNORM_S8_UINT | Format::D24_UNORM_S8_UINT | Format::D32_SFLOAT_S8_UINT => {
			ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
		},
		Format::S8_UINT => ImageLayout::STENCIL_READ_ONLY_OPTIMAL,
		_ => ImageLayout::SHADER_READ_ONLY_OPTIMAL,
	}
}

pub fn attachment_layout(format: Format) -> ImageLayout {
	match format {
		Format::D16_UNORM | Format::X8_D24_UNORM_PACK32 | Format::D32_SFLOAT => ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
		Format::D16_UNORM_S8_UINT | Format::D24_UNORM_S8_UINT | Format::D32_SFLOAT_S8_UINT => {
			ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
		},
		Format::S8_UINT => ImageLayout::STENCIL_ATTACHMENT_OPTIMAL,
		_ => ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
	}
}

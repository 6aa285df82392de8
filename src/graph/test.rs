use std::{cell::RefCell, rc::Rc, sync::Arc};

use ash::vk::{
	AccessFlags2,
	Buffer,
	BufferUsageFlags,
	DebugUtilsMessageSeverityFlagsEXT,
	DebugUtilsMessageTypeFlagsEXT,
	Filter,
	Format,
	Handle,
	Image,
	ImageLayout,
	ImageUsageFlags,
	PipelineStageFlags2,
	Semaphore,
	SwapchainKHR,
};

use super::*;
use crate::{
	device::test::{Call, RecordingDevice},
	resource::{BufferDesc, ImageDesc, ImageRange},
};

fn setup(desc: ContextDesc) -> (Arc<RecordingDevice>, Context) {
	let device = Arc::new(RecordingDevice::new());
	let ctx = Context::new(device.clone(), desc).unwrap();
	(device, ctx)
}

fn color() -> ImageDesc { ImageDesc::texture_2d(Format::R8G8B8A8_UNORM, 64, 64, ImageUsageFlags::empty()) }

fn buffer(size: u64) -> BufferDesc {
	BufferDesc {
		size,
		usage: BufferUsageFlags::empty(),
	}
}

fn submits(device: &RecordingDevice) -> usize { device.submits().len() }

/// `producer` writes a color target that `consumer` samples.
fn attachment_then_sample(b: &mut GraphBuilder<Vec<String>>, _: &mut Vec<String>) -> Result<()> {
	let target = b.create_image("target", color())?;
	let consumer = b
		.create_stage("consumer", QueueType::Graphics)
		.record(|ctx, log| {
			log.push(ctx.stage_name().to_string());
			Ok(())
		})
		.build()?;
	let producer = b
		.create_stage("producer", QueueType::Graphics)
		.record(|ctx, log| {
			log.push(ctx.stage_name().to_string());
			Ok(())
		})
		.build()?;
	b.use_image(producer, target, ImageUsage::write(ImageUsageType::ColorAttachment))?;
	b.use_image(consumer, target, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
	Ok(())
}

#[test]
fn producers_run_before_consumers() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);
	assert_eq!(graph.state(), GraphState::Unbuilt);

	graph.execute(&mut ctx).unwrap();
	assert_eq!(graph.user(), &["producer".to_string(), "consumer".to_string()]);
	assert_eq!(graph.state(), GraphState::Idle);
	assert_eq!(submits(&device), 1);
}

#[test]
fn attachment_to_sampled_is_one_barrier() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);
	graph.execute(&mut ctx).unwrap();

	let between: Vec<_> = device
		.barriers()
		.into_iter()
		.filter(|(_, b)| b.old_layout == ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
		.collect();
	assert_eq!(between.len(), 1);
	let (_, barrier) = between[0];
	assert_eq!(barrier.new_layout, ImageLayout::SHADER_READ_ONLY_OPTIMAL);
	assert_eq!(barrier.src_stage, PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
	assert_eq!(barrier.dst_stage, PipelineStageFlags2::FRAGMENT_SHADER);
	assert!(barrier.src_access.contains(AccessFlags2::COLOR_ATTACHMENT_WRITE));
}

#[test]
fn reads_need_no_barriers() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		let vertices = b.import_buffer(
			"vertices",
			ImportedBuffer::new(Buffer::from_raw(900), buffer(256)),
		)?;
		for name in ["opaque", "shadows"] {
			let stage = b.create_stage(name, QueueType::Graphics).build()?;
			b.use_buffer(stage, vertices, BufferUsage::read(BufferUsageType::Vertex))?;
		}
		Ok(())
	});

	graph.execute(&mut ctx).unwrap();
	assert!(device.barriers().is_empty());
	assert_eq!(submits(&device), 1);
}

#[test]
fn unchanged_topology_is_not_recompiled() {
	let (device, mut ctx) = setup(ContextDesc {
		frames_in_flight: 1,
		..Default::default()
	});
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);

	graph.execute(&mut ctx).unwrap();
	let first = device.barriers();
	device.clear();
	graph.execute(&mut ctx).unwrap();

	assert_eq!(device.barriers(), first);
	assert_eq!(graph.version, 1);

	graph.rebuild();
	assert_eq!(graph.state(), GraphState::Unbuilt);
	graph.execute(&mut ctx).unwrap();
	assert_eq!(graph.version, 2);
}

#[test]
fn cycles_fail_without_submitting() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		let x = b.create_buffer("x", buffer(4))?;
		let y = b.create_buffer("y", buffer(4))?;
		let a = b.create_stage("a", QueueType::Graphics).build()?;
		let c = b.create_stage("c", QueueType::Graphics).build()?;
		b.use_buffer(a, x, BufferUsage::write(BufferUsageType::TransferDst))?;
		b.use_buffer(c, x, BufferUsage::read(BufferUsageType::TransferSrc))?;
		b.use_buffer(c, y, BufferUsage::write(BufferUsageType::TransferDst))?;
		b.use_buffer(a, y, BufferUsage::read(BufferUsageType::TransferSrc))?;
		Ok(())
	});

	assert_eq!(
		graph.execute(&mut ctx),
		Err(Error::Cycle {
			stages: vec!["a".to_string(), "c".to_string()]
		})
	);
	assert_eq!(graph.state(), GraphState::Unbuilt);
	assert_eq!(submits(&device), 0);
}

#[test]
fn compute_to_graphics_transfers_ownership() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		let particles = b.create_buffer("particles", buffer(1024))?;
		let simulate = b.create_stage("simulate", QueueType::Compute).build()?;
		let draw = b.create_stage("draw", QueueType::Graphics).build()?;
		b.use_buffer(
			simulate,
			particles,
			BufferUsage::write(BufferUsageType::Storage(Shader::Compute)),
		)?;
		b.use_buffer(draw, particles, BufferUsage::read(BufferUsageType::Vertex))?;
		Ok(())
	});
	graph.execute(&mut ctx).unwrap();

	let transfers: Vec<_> = device
		.barriers()
		.into_iter()
		.filter(|(_, b)| b.is_transfer())
		.collect();
	assert_eq!(transfers.len(), 2);
	let (release, acquire) = (transfers[0], transfers[1]);
	assert_eq!(device.buffer_queue(release.0), Some(QueueType::Compute));
	assert_eq!(device.buffer_queue(acquire.0), Some(QueueType::Graphics));
	for (_, barrier) in [release, acquire] {
		assert_eq!((barrier.src_family, barrier.dst_family), (1, 0));
	}

	let submits = device.submits();
	assert_eq!(submits.len(), 2);
	let (compute, graphics) = (&submits[0], &submits[1]);
	assert_eq!(compute.0, QueueType::Compute);
	assert_eq!(graphics.0, QueueType::Graphics);
	let signal = compute.3[0];
	assert!(graphics
		.2
		.iter()
		.any(|w| w.semaphore == signal.semaphore && w.value == signal.value));
}

#[test]
fn disjoint_transients_share_an_image() {
	fn build(b: &mut GraphBuilder<()>, _: &mut ()) -> Result<()> {
		let a = b.create_image("a", color())?;
		let c = b.create_image("c", color())?;
		let s0 = b.create_stage("s0", QueueType::Graphics).build()?;
		let s1 = b.create_stage("s1", QueueType::Graphics).build()?;
		let s2 = b.create_stage("s2", QueueType::Graphics).build()?;
		b.use_image(s0, a, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		b.use_image(s1, a, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
		b.use_image(s2, c, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		Ok(())
	}
	fn created(device: &RecordingDevice) -> usize {
		device
			.calls()
			.iter()
			.filter(|c| matches!(c, Call::CreateImage(..)))
			.count()
	}

	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "aliased", (), build);
	graph.execute(&mut ctx).unwrap();
	assert_eq!(created(&device), 1);

	let (device, mut ctx) = setup(ContextDesc {
		alias_transients: false,
		..Default::default()
	});
	let mut graph = RenderGraph::new(&ctx, "separate", (), build);
	graph.execute(&mut ctx).unwrap();
	assert_eq!(created(&device), 2);
}

#[test]
fn failed_record_submits_nothing() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let messages = Rc::new(RefCell::new(Vec::new()));
	let sink = messages.clone();
	ctx.set_validation_callback(
		DebugUtilsMessageSeverityFlagsEXT::ERROR,
		DebugUtilsMessageTypeFlagsEXT::VALIDATION,
		move |m| sink.borrow_mut().push(m.clone()),
	);

	let mut graph = RenderGraph::new(&ctx, "main", true, |b, _| {
		let data = b.create_buffer("data", buffer(64))?;
		let stage = b
			.create_stage("broken", QueueType::Compute)
			.record(|_, fail| {
				if *fail {
					Err(Error::Message("out of descriptors".to_string()))
				} else {
					Ok(())
				}
			})
			.build()?;
		b.use_buffer(stage, data, BufferUsage::write(BufferUsageType::Storage(Shader::Compute)))?;
		Ok(())
	});

	assert_eq!(
		graph.execute(&mut ctx),
		Err(Error::Message("out of descriptors".to_string()))
	);
	assert_eq!(submits(&device), 0);
	assert_eq!(graph.frame_index(), 0);
	{
		let messages = messages.borrow();
		assert_eq!(messages.len(), 1);
		assert_eq!(messages[0].objects[0].kind, ObjectKind::Stage);
		assert_eq!(messages[0].objects[0].name, "broken");
	}

	*graph.user_mut() = false;
	graph.execute(&mut ctx).unwrap();
	assert_eq!(submits(&device), 1);
	assert_eq!(graph.frame_index(), 1);
}

#[test]
fn frames_in_flight_bound_the_cpu() {
	for frames_in_flight in [1, 2] {
		let (device, mut ctx) = setup(ContextDesc {
			frames_in_flight,
			..Default::default()
		});
		let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);
		for _ in 0..3 {
			graph.execute(&mut ctx).unwrap();
		}

		let waits = device
			.calls()
			.iter()
			.filter(|c| matches!(c, Call::Wait(_)))
			.count();
		assert_eq!(waits, 3 - frames_in_flight);
	}
}

#[test]
fn stage_state_follows_its_frame() {
	let (_, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);
	assert_eq!(graph.stage_frame_state("producer"), None);

	graph.execute(&mut ctx).unwrap();
	assert_eq!(graph.stage_frame_state("producer"), Some(FrameState::Running));
	assert_eq!(graph.stage_frame_state("missing"), None);

	graph.wait_idle(&ctx).unwrap();
	assert_eq!(graph.stage_frame_state("producer"), Some(FrameState::Idle));
	graph.destroy(&ctx).unwrap();
	ctx.destroy().unwrap();
}

#[derive(Default)]
struct Tokens {
	current: Option<UsageToken>,
	previous: Option<UsageToken>,
}

#[test]
fn tokens_from_previous_builds_are_stale() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Tokens::default(), |b, tokens| {
		let data = b.create_buffer("data", buffer(64))?;
		let stage = b
			.create_stage("compute", QueueType::Compute)
			.record(|ctx, tokens: &mut Tokens| {
				let token = tokens.previous.or(tokens.current).ok_or(Error::StaleHandle)?;
				ctx.buffer(token)?;
				Ok(())
			})
			.build()?;
		let token = b.use_buffer(stage, data, BufferUsage::write(BufferUsageType::Storage(Shader::Compute)))?;
		tokens.previous = tokens.current.replace(token);
		Ok(())
	});

	graph.execute(&mut ctx).unwrap();
	assert_eq!(graph.execute(&mut ctx), Err(Error::StaleHandle));
	assert_eq!(submits(&device), 1);
}

#[test]
fn tokens_belong_to_their_stage() {
	let (_, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Tokens::default(), |b, tokens| {
		let data = b.create_buffer("data", buffer(64))?;
		let first = b.create_stage("first", QueueType::Compute).build()?;
		let second = b
			.create_stage("second", QueueType::Compute)
			.record(|ctx, tokens: &mut Tokens| {
				let token = tokens.current.ok_or(Error::StaleHandle)?;
				ctx.buffer(token)?;
				Ok(())
			})
			.build()?;
		let token = b.use_buffer(first, data, BufferUsage::write(BufferUsageType::Storage(Shader::Compute)))?;
		b.use_buffer(second, data, BufferUsage::read(BufferUsageType::Storage(Shader::Compute)))?;
		tokens.current = Some(token);
		Ok(())
	});

	assert!(matches!(graph.execute(&mut ctx), Err(Error::InvalidArgument(_))));
}

#[test]
fn command_buffers_are_only_handed_to_record() {
	let (_, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		b.create_stage("early", QueueType::Graphics)
			.prepare(|ctx, _| {
				ctx.cmd()?;
				Ok(())
			})
			.build()?;
		Ok(())
	});

	assert!(matches!(graph.execute(&mut ctx), Err(Error::InvalidArgument(_))));
}

#[test]
fn swapchain_images_are_presented_after_rendering() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let acquired = SemaphoreSubmit::binary(Semaphore::from_raw(700), PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
	let rendered = SemaphoreSubmit::binary(Semaphore::from_raw(701), PipelineStageFlags2::ALL_COMMANDS);
	let swapchain = SwapchainKHR::from_raw(702);
	let mut graph = RenderGraph::new(&ctx, "main", (), move |b, _| {
		let image = b.import_image(
			"backbuffer",
			ImportedImage::swapchain(Image::from_raw(703), color(), swapchain, 2, acquired, rendered),
		)?;
		let draw = b.create_stage("draw", QueueType::Graphics).build()?;
		b.use_image(draw, image, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		Ok(())
	});
	graph.execute(&mut ctx).unwrap();

	let calls = device.calls();
	let submit = calls.iter().position(|c| matches!(c, Call::Submit { .. })).unwrap();
	let present = calls.iter().position(|c| matches!(c, Call::Present { .. })).unwrap();
	assert!(submit < present);
	let Call::Submit { waits, signals, .. } = &calls[submit] else { unreachable!() };
	assert!(waits.contains(&acquired));
	assert!(signals.contains(&rendered));
	assert_eq!(
		calls[present],
		Call::Present {
			queue: QueueType::Graphics,
			swapchain,
			image_index: 2,
			waits: vec![rendered],
		}
	);
	assert!(device
		.barriers()
		.iter()
		.any(|(_, b)| b.resource == 703 && b.new_layout == ImageLayout::PRESENT_SRC_KHR));
}

#[test]
fn presented_images_cannot_be_exported() {
	let (_, ctx) = setup(ContextDesc::default());
	let mut b = GraphBuilder::<()>::new(&ctx);
	let semaphore = SemaphoreSubmit::binary(Semaphore::from_raw(1), PipelineStageFlags2::ALL_COMMANDS);
	let image = b
		.import_image(
			"backbuffer",
			ImportedImage::swapchain(
				Image::from_raw(2),
				color(),
				SwapchainKHR::from_raw(3),
				0,
				semaphore,
				semaphore,
			),
		)
		.unwrap();
	let info = ExportInfo {
		state: crate::resource::ImageAccess::new(
			PipelineStageFlags2::FRAGMENT_SHADER,
			AccessFlags2::SHADER_SAMPLED_READ,
			ImageLayout::SHADER_READ_ONLY_OPTIMAL,
		),
		queue: None,
		signal: None,
	};
	assert!(matches!(b.export(image, info), Err(Error::InvalidArgument(_))));
}

#[test]
fn persistent_images_keep_their_layout() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let history = ctx
		.create_image(
			"history",
			ImageDesc::texture_2d(
				Format::R8G8B8A8_UNORM,
				64,
				64,
				ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::SAMPLED,
			),
		)
		.unwrap();
	let mut graph = RenderGraph::new(&ctx, "main", (), move |b, _| {
		let image = b.reference(history)?;
		let write = b.create_stage("write", QueueType::Graphics).build()?;
		let read = b.create_stage("read", QueueType::Graphics).build()?;
		b.use_image(write, image, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		b.use_image(read, image, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
		Ok(())
	});

	graph.execute(&mut ctx).unwrap();
	let persistent = ctx.persistent(history).unwrap();
	assert_eq!(persistent.layout(), Some(ImageLayout::SHADER_READ_ONLY_OPTIMAL));
	let PhysicalHandle::Image(handle) = persistent.handle() else { panic!("not an image") };

	device.clear();
	graph.execute(&mut ctx).unwrap();
	let (_, first) = device
		.barriers()
		.into_iter()
		.find(|(_, b)| b.resource == handle.as_raw())
		.unwrap();
	assert_eq!(first.old_layout, ImageLayout::SHADER_READ_ONLY_OPTIMAL);
	assert_eq!(first.new_layout, ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

	graph.destroy(&ctx).unwrap();
	ctx.destroy_resource(history).unwrap();
	assert_eq!(ctx.persistent(history).err(), Some(Error::StaleHandle));
	assert_eq!(device.live_images(), 0);
}

#[test]
fn exports_are_handed_back() {
	let (_, mut ctx) = setup(ContextDesc::default());
	let state = crate::resource::ImageAccess::new(
		PipelineStageFlags2::FRAGMENT_SHADER,
		AccessFlags2::SHADER_SAMPLED_READ,
		ImageLayout::SHADER_READ_ONLY_OPTIMAL,
	);
	let mut graph = RenderGraph::new(&ctx, "main", (), move |b, _| {
		let image = b.create_image("scene", color())?;
		let draw = b.create_stage("draw", QueueType::Graphics).build()?;
		b.use_image(draw, image, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		b.export(
			image,
			ExportInfo {
				state,
				queue: None,
				signal: None,
			},
		)
	});
	assert!(graph.exported("scene").is_none());

	graph.execute(&mut ctx).unwrap();
	let export = graph.exported("scene").unwrap();
	assert_eq!(export.state, state);
	assert_eq!(export.queue, QueueType::Graphics);
	assert!(matches!(export.handle, PhysicalHandle::Image(_)));
}

#[test]
fn blits_are_recorded_by_the_graph() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		let full = b.create_image("full", color())?;
		let half = b.create_image(
			"half",
			ImageDesc::texture_2d(Format::R8G8B8A8_UNORM, 32, 32, ImageUsageFlags::empty()),
		)?;
		let draw = b.create_stage("draw", QueueType::Graphics).build()?;
		b.use_image(draw, full, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		b.blit("downsample", full, ImageRange::levels(0, 1, 1), half, ImageRange::levels(0, 1, 1), Filter::LINEAR)?;
		let read = b.create_stage("read", QueueType::Graphics).build()?;
		b.use_image(read, half, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
		Ok(())
	});
	graph.execute(&mut ctx).unwrap();

	let blits: Vec<_> = device
		.calls()
		.into_iter()
		.filter_map(|c| match c {
			Call::Blit { src, dst, .. } => Some((src, dst)),
			_ => None,
		})
		.collect();
	assert_eq!(blits.len(), 1);
	assert_ne!(blits[0].0, blits[0].1);
	assert!(device
		.barriers()
		.iter()
		.any(|(_, b)| b.resource == blits[0].0.as_raw() && b.new_layout == ImageLayout::TRANSFER_SRC_OPTIMAL));
}

#[test]
fn dot_export_needs_a_plan() {
	let (_, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);
	let mut out = Vec::new();
	assert!(matches!(graph.write_dot(&mut out), Err(Error::InvalidArgument(_))));

	graph.execute(&mut ctx).unwrap();
	graph.write_dot(&mut out).unwrap();
	let dot = String::from_utf8(out).unwrap();
	assert!(dot.starts_with("digraph"));
	assert!(dot.contains("producer"));
	assert!(dot.contains("consumer"));
	assert!(dot.contains("target"));
}

#[test]
fn contexts_need_a_frame() {
	let device = Arc::new(RecordingDevice::new());
	assert!(matches!(
		Context::new(
			device,
			ContextDesc {
				frames_in_flight: 0,
				..Default::default()
			}
		),
		Err(Error::InvalidArgument(_))
	));
}

#[test]
fn groups_prepare_before_their_stages() {
	fn log(ctx: &mut StageContext, log: &mut Vec<String>, phase: &str) -> Result<()> {
		log.push(format!("{} {}", ctx.stage_name(), phase));
		Ok(())
	}

	let (_, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), |b, _| {
		let group = b.create_group("shadows", |_, log: &mut Vec<String>| {
			log.push("group prepare".to_string());
			Ok(())
		});
		for name in ["cascade0", "cascade1"] {
			b.create_stage(name, QueueType::Graphics)
				.group(group)
				.prepare(|ctx, l| log(ctx, l, "prepare"))
				.record(|ctx, l| log(ctx, l, "record"))
				.submit(|ctx, l| log(ctx, l, "submit"))
				.build()?;
		}
		Ok(())
	});

	graph.execute(&mut ctx).unwrap();
	assert_eq!(
		graph.user(),
		&[
			"group prepare",
			"cascade0 prepare",
			"cascade1 prepare",
			"cascade0 record",
			"cascade1 record",
			"cascade0 submit",
			"cascade1 submit",
		]
	);
}

#[test]
fn disjoint_mips_are_tracked_separately() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", (), |b, _| {
		let mut desc = color();
		desc.levels = 3;
		let image = b.create_image("pyramid", desc)?;
		let base = b.create_stage("base", QueueType::Graphics).build()?;
		let tip = b.create_stage("tip", QueueType::Graphics).build()?;
		let read = b.create_stage("read", QueueType::Graphics).build()?;
		b.use_image(
			base,
			image,
			ImageUsage::write(ImageUsageType::ColorAttachment).range(ImageRange::levels(0, 1, 1)),
		)?;
		b.use_image(
			tip,
			image,
			ImageUsage::write(ImageUsageType::TransferDst).range(ImageRange::levels(2, 1, 1)),
		)?;
		b.use_image(read, image, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
		Ok(())
	});
	graph.execute(&mut ctx).unwrap();

	let barriers = device.barriers();
	let from = |layout: ImageLayout, level: u32| {
		barriers.iter().any(|(_, b)| {
			b.old_layout == layout
				&& b.new_layout == ImageLayout::SHADER_READ_ONLY_OPTIMAL
				&& b.range.map(|r| (r.base_mip_level, r.level_count)) == Some((level, 1))
		})
	};
	assert!(from(ImageLayout::COLOR_ATTACHMENT_OPTIMAL, 0));
	assert!(from(ImageLayout::UNDEFINED, 1));
	assert!(from(ImageLayout::TRANSFER_DST_OPTIMAL, 2));
	assert_eq!(submits(&device), 1);
}

#[test]
fn remaining_levels_cover_the_rest_of_the_image() {
	let (_, ctx) = setup(ContextDesc::default());
	let mut b = GraphBuilder::<()>::new(&ctx);
	let mut desc = color();
	desc.levels = 3;
	let image = b.create_image("pyramid", desc).unwrap();
	let stage = b.create_stage("downsample", QueueType::Graphics).build().unwrap();

	let rest = ImageRange {
		base_level: 1,
		level_count: ash::vk::REMAINING_MIP_LEVELS,
		base_layer: 0,
		layer_count: ash::vk::REMAINING_ARRAY_LAYERS,
	};
	let token = b
		.use_image(stage, image, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)).range(rest))
		.unwrap();
	let too_far = ImageRange {
		base_level: 2,
		level_count: u32::MAX - 1,
		base_layer: 0,
		layer_count: 1,
	};
	assert!(matches!(
		b.use_image(stage, image, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)).range(too_far)),
		Err(Error::InvalidArgument(_))
	));

	let (topology, _) = b.finish();
	assert_eq!(topology.usage(token.index()).range, ImageRange::levels(1, 2, 1));
}

#[test]
fn persistent_resources_are_referenced_once() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let data = ctx.create_buffer("data", buffer(64)).unwrap();
	let PhysicalHandle::Buffer(handle) = ctx.persistent(data).unwrap().handle() else { panic!("not a buffer") };

	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), move |b, _| {
		let a = b.reference(data)?;
		let c = b.reference(data)?;
		assert_eq!(a, c);

		let reader = b
			.create_stage("reader", QueueType::Graphics)
			.record(|ctx, log: &mut Vec<String>| {
				log.push(ctx.stage_name().to_string());
				Ok(())
			})
			.build()?;
		let writer = b
			.create_stage("writer", QueueType::Graphics)
			.record(|ctx, log: &mut Vec<String>| {
				log.push(ctx.stage_name().to_string());
				Ok(())
			})
			.build()?;
		b.use_buffer(writer, a, BufferUsage::write(BufferUsageType::TransferDst))?;
		b.use_buffer(reader, c, BufferUsage::read(BufferUsageType::TransferSrc))?;
		Ok(())
	});
	graph.execute(&mut ctx).unwrap();

	assert_eq!(graph.user(), &["writer".to_string(), "reader".to_string()]);
	assert!(device
		.barriers()
		.iter()
		.any(|(_, b)| b.resource == handle.as_raw() && b.src_access.contains(AccessFlags2::TRANSFER_WRITE)));
}

#[test]
fn handles_are_imported_once() {
	let (_, ctx) = setup(ContextDesc::default());
	let mut b = GraphBuilder::<()>::new(&ctx);
	let vertices = ImportedBuffer::new(Buffer::from_raw(900), buffer(256));
	b.import_buffer("vertices", vertices).unwrap();
	assert!(matches!(
		b.import_buffer("again", vertices),
		Err(Error::InvalidArgument(_))
	));
}

#[test]
fn failed_submissions_leave_the_context_usable() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);

	device.fail_submit(0, ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
	assert_eq!(
		graph.execute(&mut ctx),
		Err(Error::Vulkan(ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
	);
	assert_eq!(submits(&device), 0);
	assert_eq!(graph.frame_index(), 0);
	ctx.wait_idle().unwrap();

	graph.execute(&mut ctx).unwrap();
	assert_eq!(submits(&device), 1);
	assert_eq!(device.submits()[0].3[0].value, 1);
	graph.wait_idle(&ctx).unwrap();
	graph.destroy(&ctx).unwrap();
	ctx.destroy().unwrap();
}

#[test]
fn lost_devices_are_reported() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let mut graph = RenderGraph::new(&ctx, "main", Vec::new(), attachment_then_sample);

	device.fail_submit(0, ash::vk::Result::ERROR_DEVICE_LOST);
	let err = graph.execute(&mut ctx).unwrap_err();
	assert_eq!(err, Error::DeviceLost);
	assert!(err.is_device_lost());
}

#[test]
fn partly_submitted_frames_keep_what_ran() {
	let (device, mut ctx) = setup(ContextDesc::default());
	let history = ctx
		.create_image(
			"history",
			ImageDesc::texture_2d(
				Format::R8G8B8A8_UNORM,
				64,
				64,
				ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::SAMPLED,
			),
		)
		.unwrap();
	let PhysicalHandle::Image(handle) = ctx.persistent(history).unwrap().handle() else { panic!("not an image") };

	// Submitted as compute `simulate`, graphics `draw`, then graphics `shade`.
	let mut graph = RenderGraph::new(&ctx, "main", (), move |b, _| {
		let image = b.reference(history)?;
		let particles = b.create_buffer("particles", buffer(1024))?;
		let draw = b.create_stage("draw", QueueType::Graphics).build()?;
		let simulate = b.create_stage("simulate", QueueType::Compute).build()?;
		let shade = b.create_stage("shade", QueueType::Graphics).build()?;
		b.use_image(draw, image, ImageUsage::write(ImageUsageType::ColorAttachment))?;
		b.use_buffer(
			simulate,
			particles,
			BufferUsage::write(BufferUsageType::Storage(Shader::Compute)),
		)?;
		b.use_buffer(shade, particles, BufferUsage::read(BufferUsageType::Vertex))?;
		b.use_image(shade, image, ImageUsage::read(ImageUsageType::Sampled(Shader::Fragment)))?;
		Ok(())
	});

	device.fail_submit(2, ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
	assert!(graph.execute(&mut ctx).is_err());
	assert_eq!(submits(&device), 2);
	assert_eq!(
		ctx.persistent(history).unwrap().layout(),
		Some(ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
	);

	device.clear();
	graph.execute(&mut ctx).unwrap();
	let (_, first) = device
		.barriers()
		.into_iter()
		.find(|(_, b)| b.resource == handle.as_raw())
		.unwrap();
	assert_eq!(first.old_layout, ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
	ctx.wait_idle().unwrap();
}

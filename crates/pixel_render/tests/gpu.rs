//! Tests that need a Vulkan driver (hardware or a software rasterizer)
//!
//! Run with `cargo test -- --ignored`.

use ash::vk;
use std::sync::Arc;

use pixel_render::config::RendererConfig;
use pixel_render::foundation::{reported_count, Severity};
use pixel_render::render::vulkan::core::{
    Buffer, BufferKind, CommandBuffer, CommandBufferKind, CommandPool, DescriptorPool, GraphicsDescriptorLayouts,
    RenderCore,
};
use pixel_render::render::vulkan::{RenderTarget, Renderer};

fn headless_core() -> Arc<RenderCore> {
    let config = RendererConfig::default().with_validation(false);
    RenderCore::new(&config, &[]).expect("headless render core")
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn read_back(core: &Arc<RenderCore>, gpu: &Buffer) -> Vec<u8> {
    let mut readback = Buffer::new_readback(Arc::clone(core), gpu.size(), "readback").expect("readback buffer");
    readback.copy_from(gpu).expect("copy to readback");
    readback.read().expect("read")
}

#[test]
#[ignore = "requires a Vulkan device"]
fn push_to_gpu_preserves_bytes() {
    let core = headless_core();

    for len in [1usize, 4096, 1000] {
        let data = pattern(len);
        let gpu = Buffer::new(
            Arc::clone(&core),
            BufferKind::Constant,
            len as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "roundtrip",
            Some(&data),
        )
        .expect("constant buffer");

        assert_eq!(read_back(&core, &gpu), data, "size {}", len);
    }
}

#[test]
#[ignore = "requires a Vulkan device"]
fn constant_buffer_without_data_allocates_nothing() {
    let core = headless_core();
    let before = core.allocator().active_buffers();

    let result = Buffer::new(
        Arc::clone(&core),
        BufferKind::Constant,
        64,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        "empty",
        None,
    );

    assert!(result.is_err());
    assert_eq!(core.allocator().active_buffers(), before);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn mutable_buffer_releases_its_allocation() {
    let core = headless_core();
    let before = core.allocator().active_buffers();

    {
        let data = pattern(256);
        let buffer = Buffer::new(
            Arc::clone(&core),
            BufferKind::Mutable,
            256,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            "scenario",
            Some(&data),
        )
        .expect("mutable buffer");
        buffer.flush(256, 0).expect("flush");
        assert_eq!(core.allocator().active_buffers(), before + 1);
    }

    assert_eq!(core.allocator().active_buffers(), before);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn destroy_twice_is_a_noop() {
    let core = headless_core();
    assert!(core.destroy());
    assert!(!core.is_init());
    assert!(!core.destroy());
    assert!(!core.is_init());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn destroy_is_refused_while_resources_hold_the_core() {
    let core = headless_core();
    let buffer = Buffer::new(
        Arc::clone(&core),
        BufferKind::Mutable,
        64,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        "holder",
        None,
    )
    .expect("mutable buffer");

    let warnings = reported_count(Severity::Warning);
    assert!(!core.destroy());
    assert_eq!(reported_count(Severity::Warning), warnings + 1);
    assert!(core.is_init());
    buffer.flush(64, 0).expect("buffer still usable");

    drop(buffer);
    assert!(core.destroy());
    assert!(!core.is_init());
}

#[test]
#[ignore = "requires a Vulkan device"]
fn shared_buffer_stays_in_flight_until_every_user_finishes() {
    let core = headless_core();
    let pool = CommandPool::new(core.device().clone(), core.graphics_family()).expect("command pool");
    let mut buffer = Buffer::new(
        Arc::clone(&core),
        BufferKind::Mutable,
        64,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        "shared",
        None,
    )
    .expect("vertex buffer");

    let mut slot_0 = CommandBuffer::new(Arc::clone(&core), &pool, CommandBufferKind::LongTime).expect("slot 0");
    let mut slot_1 = CommandBuffer::new(Arc::clone(&core), &pool, CommandBufferKind::LongTime).expect("slot 1");
    for cmd in [&mut slot_0, &mut slot_1] {
        cmd.begin_record(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT).expect("begin");
        cmd.bind_vertex_buffer(&buffer);
        cmd.end_record().expect("end");
        cmd.submit(None).expect("submit");
    }
    assert!(buffer.is_in_flight());
    assert!(buffer.write(0, &[7; 16]).is_err());

    slot_0.wait_for_execution().expect("wait slot 0");
    assert!(buffer.is_in_flight(), "slot 1 still references the buffer");
    assert!(buffer.write(0, &[7; 16]).is_err());

    slot_1.wait_for_execution().expect("wait slot 1");
    assert!(!buffer.is_in_flight());
    buffer.write(0, &[7; 16]).expect("write once both slots finished");
}

#[test]
#[ignore = "requires a Vulkan device and compiled shaders"]
fn aborted_frame_leaves_the_renderer_usable() {
    let core = headless_core();
    let config = RendererConfig::default().with_validation(false);
    let layouts = GraphicsDescriptorLayouts::new(&core).expect("layouts");
    let pool = DescriptorPool::new(&core, 16).expect("pool");
    let mut renderer = Renderer::new(
        Arc::clone(&core),
        RenderTarget::Offscreen { width: 8, height: 8 },
        &config,
        Arc::clone(&layouts),
        Arc::clone(&pool),
    )
    .expect("offscreen renderer");

    assert!(renderer.begin_frame().expect("begin"));
    renderer.abort_frame().expect("abort");
    assert!(!renderer.frame_in_progress());
    assert_eq!(renderer.frame_index(), 1);

    assert!(renderer.begin_frame().expect("begin after abort"));
    renderer.end_frame().expect("end");

    let warnings = reported_count(Severity::Warning);
    renderer.abort_frame().expect("abort without a frame");
    assert_eq!(reported_count(Severity::Warning), warnings);

    drop(renderer);
    drop(pool);
    drop(layouts);
    assert!(core.destroy());
}

#[test]
#[ignore = "requires a Vulkan device and compiled shaders"]
fn offscreen_frames_cycle_and_capture() {
    use pixel_render::config::MAX_FRAMES_IN_FLIGHT;
    use pixel_render::graphics::GraphicsSupport;
    use slotmap::SlotMap;

    let core = headless_core();
    let config = RendererConfig::default().with_validation(false).with_clear_color([0.0, 0.0, 0.0, 1.0]);
    let layouts = GraphicsDescriptorLayouts::new(&core).expect("layouts");
    let pool = DescriptorPool::new(&core, 64).expect("pool");

    let mut graphics = GraphicsSupport::new(
        &core,
        RenderTarget::Offscreen { width: 8, height: 4 },
        &config,
        &layouts,
        &pool,
    )
    .expect("offscreen graphics");
    graphics.pixel_put(1, 2, 0x00FF_0000);

    let textures = SlotMap::with_key();
    for frame in 0..MAX_FRAMES_IN_FLIGHT * 2 {
        assert_eq!(graphics.renderer().frame_index(), frame % MAX_FRAMES_IN_FLIGHT);
        graphics.render(&textures).expect("render");
        if frame == 2 {
            // Repeated resize signals collapse into one rebuild
            graphics.renderer_mut().require_framebuffer_resize();
            graphics.renderer_mut().require_framebuffer_resize();
        }
    }

    let pixels = graphics.renderer_mut().capture().expect("capture");
    assert_eq!(pixels.len(), 8 * 4 * 4);
    let at = |x: usize, y: usize| &pixels[(y * 8 + x) * 4..][..4];
    assert_eq!(at(1, 2), [0xFF, 0, 0, 0xFF]);
    assert_eq!(at(0, 0), [0, 0, 0, 0xFF]);

    drop(graphics);
    drop(pool);
    drop(layouts);
    assert!(core.destroy());
}

use std::sync::{Arc, Once};

use aero_gallium::lvp::cmd::{
    BufferImageCopy, ClearValue, Extent3D, ImageAspects, ImageSubresourceLayers, LoadOp,
    Offset3D, PipelineBindPoint, QueryControlFlags, QueryResultFlags, Rect2D,
    RenderingAttachmentInfo, RenderingInfo, StoreOp, Viewport,
};
use aero_gallium::lvp::graphics::GraphicsPipelineState;
use aero_gallium::lvp::objects::{
    ImageCreateInfo, ImageViewCreateInfo, Pipeline, PipelineLayout, QueryPoolType,
    ShaderCreateInfo,
};
use aero_gallium::lvp::{Cmd, CommandBuffer, Device, Executor, ReplayConfig};
use aero_gallium::pipe::state::ShaderStage;
use aero_gallium::pipe::{Format, PipeCall, Screen, TraceContext};
use anyhow::{ensure, Context, Result};
use pretty_assertions::assert_eq;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    });
}

/// Clear, draw under an occlusion query, then read the target back.
#[test]
fn recorded_frame_replays_end_to_end() -> Result<()> {
    init_tracing();
    let screen = Screen::new();
    let device = Device::new(screen.clone());
    let mut ctx = TraceContext::new(screen);
    let executor = Executor::new(device.clone(), ReplayConfig::default());

    let image = device.create_image(&ImageCreateInfo::new_2d(Format::R8G8B8A8Unorm, 8, 8));
    let view = device.create_image_view(&image, &ImageViewCreateInfo::whole(&image));
    let readback = device.create_buffer(8 * 8 * 4);
    let results = device.create_buffer(16);
    let pool = device.create_query_pool(QueryPoolType::Occlusion, 1);
    let vs = device.create_shader(ShaderCreateInfo::new(ShaderStage::Vertex, &[0x0723_0203, 1]));
    let pipeline = Pipeline::graphics(
        Arc::new(PipelineLayout::default()),
        vec![vs],
        GraphicsPipelineState::default(),
    );

    let draw_pass = CommandBuffer::new(vec![Cmd::Draw {
        vertex_count: 6,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    }]);
    let frame = CommandBuffer::new(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        Cmd::SetViewport {
            first: 0,
            viewports: vec![Viewport {
                x: 0.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        },
        Cmd::BeginRendering(Box::new(RenderingInfo {
            render_area: Rect2D::new(0, 0, 8, 8),
            layer_count: 1,
            color_attachments: vec![RenderingAttachmentInfo {
                view: Some(view),
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                clear_value: ClearValue::color_f32([0.0, 1.0, 0.0, 1.0]),
                ..Default::default()
            }],
            ..Default::default()
        })),
        Cmd::BeginQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
            flags: QueryControlFlags::PRECISE,
        },
        Cmd::ExecuteCommands(vec![draw_pass]),
        Cmd::EndQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
        },
        Cmd::EndRendering,
        Cmd::PipelineBarrier,
        Cmd::CopyImageToBuffer {
            src: image.clone(),
            dst: readback.clone(),
            regions: vec![BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: ImageSubresourceLayers {
                    aspects: ImageAspects::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: Offset3D::default(),
                image_extent: Extent3D {
                    width: 8,
                    height: 8,
                    depth: 1,
                },
            }],
        },
        Cmd::CopyQueryPoolResults {
            pool,
            first: 0,
            count: 1,
            dst: results.clone(),
            dst_offset: 0,
            stride: 16,
            flags: QueryResultFlags::RESULT_64 | QueryResultFlags::WAIT,
        },
    ]);

    let report = executor.execute(&mut ctx, &frame);
    ensure!(report.is_ok(), "replay reported errors: {:?}", report.events);
    assert_eq!(report.commands_processed, 11);

    let pixels = readback.resource.read(0, 8 * 8 * 4).context("readback in bounds")?;
    for texel in pixels.chunks_exact(4) {
        assert_eq!(texel, &[0, 255, 0, 255]);
    }
    let samples = results.resource.read(0, 8).context("query result in bounds")?;
    assert_eq!(samples, 6u64.to_le_bytes().to_vec());

    assert_eq!(ctx.draws().len(), 1);
    assert_eq!(ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 1);

    let stats = executor.stats().snapshot();
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.barriers_executed, 1);
    Ok(())
}

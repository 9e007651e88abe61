//! Shared helpers for `aero-lvp` integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use aero_lvp::cmd::{
    ClearValue, Extent3D, ImageAspects, ImageSubresourceLayers, LoadOp, Offset3D, Rect2D,
    RenderingAttachmentInfo, RenderingInfo, StoreOp,
};
use aero_lvp::graphics::GraphicsPipelineState;
use aero_lvp::objects::{
    Image, ImageCreateInfo, ImageView, ImageViewCreateInfo, Pipeline, PipelineLayout,
    ShaderCreateInfo,
};
use aero_lvp::{Cmd, CommandBuffer, Device, ExecutionReport, Executor, ReplayConfig};
use aero_pipe::state::ShaderStage;
use aero_pipe::{Format, PipeContext, Resource, Screen, TextureTarget, TraceContext};

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
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

/// A recording context plus a device on the same screen.
pub struct Harness {
    pub ctx: TraceContext,
    pub device: Arc<Device>,
    pub executor: Executor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReplayConfig::default())
    }

    pub fn with_config(config: ReplayConfig) -> Self {
        init_tracing();
        let screen = Screen::new();
        let device = Device::new(screen.clone());
        Self {
            ctx: TraceContext::new(screen),
            executor: Executor::new(device.clone(), config),
            device,
        }
    }

    pub fn run(&mut self, cmds: Vec<Cmd>) -> ExecutionReport {
        let cb = CommandBuffer::new(cmds);
        self.executor.execute(&mut self.ctx, &cb)
    }

    /// A pipeline with only a vertex shader and no baked state groups.
    pub fn vs_pipeline(&self, state: GraphicsPipelineState) -> Arc<Pipeline> {
        let vs = self
            .device
            .create_shader(ShaderCreateInfo::new(ShaderStage::Vertex, &[0x0723_0203, 1]));
        Pipeline::graphics(Arc::new(PipelineLayout::default()), vec![vs], state)
    }

    pub fn color_target(&self, width: u32, height: u32) -> (Arc<Image>, Arc<ImageView>) {
        self.target(Format::R8G8B8A8Unorm, width, height)
    }

    pub fn target(&self, format: Format, width: u32, height: u32) -> (Arc<Image>, Arc<ImageView>) {
        let image = self
            .device
            .create_image(&ImageCreateInfo::new_2d(format, width, height));
        let view = self
            .device
            .create_image_view(&image, &ImageViewCreateInfo::whole(&image));
        (image, view)
    }

    /// A single-level 2D array image and a view of all its layers.
    pub fn layered_target(
        &self,
        format: Format,
        width: u32,
        height: u32,
        layers: u32,
    ) -> (Arc<Image>, Arc<ImageView>) {
        let image = self.device.create_image(&ImageCreateInfo {
            target: TextureTarget::Texture2DArray,
            array_layers: layers,
            ..ImageCreateInfo::new_2d(format, width, height)
        });
        let view = self
            .device
            .create_image_view(&image, &ImageViewCreateInfo::whole(&image));
        (image, view)
    }

    pub fn screen(&self) -> &Arc<Screen> {
        self.ctx.screen()
    }
}

pub fn clear_attachment(view: &Arc<ImageView>, color: [f32; 4]) -> RenderingAttachmentInfo {
    RenderingAttachmentInfo {
        view: Some(view.clone()),
        load_op: LoadOp::Clear,
        store_op: StoreOp::Store,
        clear_value: ClearValue::color_f32(color),
        ..Default::default()
    }
}

pub fn load_attachment(view: &Arc<ImageView>) -> RenderingAttachmentInfo {
    RenderingAttachmentInfo {
        view: Some(view.clone()),
        load_op: LoadOp::Load,
        store_op: StoreOp::Store,
        ..Default::default()
    }
}

pub fn rendering(area: Rect2D, colors: Vec<RenderingAttachmentInfo>) -> Cmd {
    Cmd::BeginRendering(Box::new(RenderingInfo {
        render_area: area,
        layer_count: 1,
        color_attachments: colors,
        ..Default::default()
    }))
}

pub fn draw(vertex_count: u32) -> Cmd {
    Cmd::Draw {
        vertex_count,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    }
}

pub fn color_layers() -> ImageSubresourceLayers {
    ImageSubresourceLayers {
        aspects: ImageAspects::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn origin() -> Offset3D {
    Offset3D::default()
}

pub fn extent(width: u32, height: u32) -> Extent3D {
    Extent3D {
        width,
        height,
        depth: 1,
    }
}

/// Read texel `(x, y)` of layer 0, level 0, sample 0.
pub fn texel(res: &Resource, x: u32, y: u32) -> Vec<u8> {
    let templ = res.template();
    let off = templ.texel_offset(0, x, y, 0);
    res.read(off, u64::from(templ.format.block_size()))
        .expect("texel in bounds")
}

/// Read texel `(x, y)` of `layer`, level 0, sample 0.
pub fn texel_at(res: &Resource, x: u32, y: u32, layer: u32) -> Vec<u8> {
    let templ = res.template();
    let off = templ.texel_offset(0, x, y, layer);
    res.read(off, u64::from(templ.format.block_size()))
        .expect("texel in bounds")
}

/// Fill every texel of `layer` of a single-sampled image with `value`.
pub fn fill_layer(res: &Resource, layer: u32, value: &[u8]) {
    let templ = *res.template();
    let [width, height, _] = templ.level_extent(0);
    for y in 0..height {
        for x in 0..width {
            assert!(res.write(templ.texel_offset(0, x, y, layer), value));
        }
    }
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

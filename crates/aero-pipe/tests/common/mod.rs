//! Shared helpers for `aero-pipe` integration tests.

use std::sync::{Arc, Once};

use aero_pipe::format::{Format, TextureTarget};
use aero_pipe::resource::{Resource, SurfaceTemplate};
use aero_pipe::{PipeContext, Screen, Surface, TraceContext};

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

/// A fresh screen and recording context.
pub fn trace_context() -> TraceContext {
    init_tracing();
    TraceContext::new(Screen::new())
}

pub fn texture_2d(ctx: &TraceContext, format: Format, width: u32, height: u32) -> Arc<Resource> {
    ctx.screen()
        .texture_create(TextureTarget::Texture2D, format, [width, height, 1], 1, 0)
}

pub fn surface(ctx: &mut TraceContext, texture: &Arc<Resource>) -> Arc<Surface> {
    let templ = SurfaceTemplate {
        format: texture.format(),
        level: 0,
        first_layer: 0,
        last_layer: 0,
    };
    ctx.create_surface(texture, &templ)
        .expect("trace context always creates surfaces")
}

/// Read texel `(x, y)` of layer 0, level 0, sample 0.
#[allow(dead_code)]
pub fn texel(res: &Resource, x: u32, y: u32) -> Vec<u8> {
    let templ = res.template();
    let off = templ.texel_offset(0, x, y, 0);
    res.read(off, u64::from(templ.format.block_size()))
        .expect("texel in bounds")
}

#[allow(dead_code)]
pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

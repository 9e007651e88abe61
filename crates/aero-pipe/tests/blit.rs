mod common;

use aero_pipe::blit::{BlitDisqualifier, BlitFilter};
use aero_pipe::state::{FramebufferState, ScissorState};
use aero_pipe::trace::CsoKind;
use aero_pipe::{
    BlitInfo, BlitMask, BlitPath, BlitSurface, Format, PipeBox, PipeCall, PipeContext,
};
use pretty_assertions::assert_eq;

fn blit_info(src: BlitSurface, dst: BlitSurface, mask: BlitMask) -> BlitInfo {
    BlitInfo {
        dst,
        src,
        mask,
        filter: BlitFilter::Nearest,
        scissor_enable: false,
        scissor: ScissorState::default(),
        num_window_rectangles: 0,
        render_condition_enable: false,
        sample0_only: false,
    }
}

#[test]
fn engine_blit_mirrors_and_swizzles() {
    let mut ctx = common::trace_context();
    let src = common::texture_2d(&ctx, Format::R8G8B8A8Unorm, 2, 1);
    let dst = common::texture_2d(&ctx, Format::B8G8R8A8Unorm, 2, 1);
    src.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let info = blit_info(
        BlitSurface {
            resource: src.clone(),
            level: 0,
            region: PipeBox::new_2d(0, 0, 2, 1),
            format: Format::R8G8B8A8Unorm,
        },
        BlitSurface {
            resource: dst.clone(),
            level: 0,
            region: PipeBox::new_2d(2, 0, -2, 1),
            format: Format::B8G8R8A8Unorm,
        },
        BlitMask::RGBA,
    );
    ctx.blit(&info);

    assert_eq!(ctx.calls()[0], PipeCall::Blit { path: BlitPath::Engine2D });
    assert_eq!(common::texel(&dst, 0, 0), vec![7, 6, 5, 8]);
    assert_eq!(common::texel(&dst, 1, 0), vec![3, 2, 1, 4]);
    assert!(ctx.draws().is_empty());
}

#[test]
fn shader_blit_restores_bound_state() {
    let mut ctx = common::trace_context();
    let target = common::texture_2d(&ctx, Format::R8G8B8A8Unorm, 4, 4);
    let rt = common::surface(&mut ctx, &target);
    let fb = FramebufferState {
        width: 4,
        height: 4,
        layers: 1,
        cbufs: vec![Some(rt)],
        ..FramebufferState::default()
    };
    ctx.set_framebuffer_state(&fb);

    let src = common::texture_2d(&ctx, Format::R8G8B8A8Unorm, 4, 4);
    let dst = common::texture_2d(&ctx, Format::R8G8B8A8Unorm, 4, 4);
    let surface = |res| BlitSurface {
        resource: res,
        level: 0,
        region: PipeBox::new_2d(0, 0, 4, 4),
        format: Format::R8G8B8A8Unorm,
    };
    let info = blit_info(surface(src), surface(dst), BlitMask::R | BlitMask::G);

    ctx.blit(&info);
    ctx.blit(&info);

    assert_eq!(
        ctx.calls().iter().find(|c| matches!(c, PipeCall::Blit { .. })),
        Some(&PipeCall::Blit {
            path: BlitPath::Shader3D(BlitDisqualifier::PartialColorMask)
        })
    );
    assert_eq!(ctx.draws().len(), 2);
    assert_eq!(ctx.draws()[0].count, 3);
    assert_eq!(ctx.framebuffer(), &fb);
    assert_eq!(ctx.bound_shader(aero_pipe::state::ShaderStage::Fragment), None);
    // Programs and baseline states are created once and reused.
    assert_eq!(
        ctx.count(|c| matches!(c, PipeCall::Create(CsoKind::Shader(_)))),
        2
    );
    assert_eq!(ctx.screen().blit_programs().stats().misses, 2);
}

#[test]
fn depth_blit_copies_only_selected_channel() {
    let mut ctx = common::trace_context();
    let src = common::texture_2d(&ctx, Format::Z24UnormS8Uint, 1, 1);
    let dst = common::texture_2d(&ctx, Format::Z24UnormS8Uint, 1, 1);
    src.write(0, &[0x11, 0x22, 0x33, 0x44]);
    dst.write(0, &[0, 0, 0, 0x99]);

    let surface = |res| BlitSurface {
        resource: res,
        level: 0,
        region: PipeBox::new_2d(0, 0, 1, 1),
        format: Format::Z24UnormS8Uint,
    };
    ctx.blit(&blit_info(surface(src), surface(dst.clone()), BlitMask::Z));

    assert_eq!(
        ctx.calls()[0],
        PipeCall::Blit {
            path: BlitPath::Shader3D(BlitDisqualifier::PartialDepthStencilMask)
        }
    );
    assert_eq!(common::texel(&dst, 0, 0), vec![0x11, 0x22, 0x33, 0x99]);
}

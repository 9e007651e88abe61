mod common;

use aero_lvp::cmd::{
    BufferCopy, BufferImageCopy, ClearAttachment, ClearRect, ClearValue, ImageAspects, LoadOp,
    Rect2D, RenderingAttachmentInfo, RenderingFlags, RenderingInfo, ResolveMode, StoreOp,
    WHOLE_SIZE,
};
use aero_lvp::{Cmd, ReplayConfig};
use aero_pipe::blit::BlitDisqualifier;
use aero_pipe::{BlitPath, Format, PipeCall};
use common::{
    clear_attachment, color_layers, draw, extent, fill_layer, load_attachment, origin, rendering,
    texel, texel_at, words, Harness,
};
use pretty_assertions::assert_eq;

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const RED_TEXEL: [u8; 4] = [255, 0, 0, 255];
const GREEN_TEXEL: [u8; 4] = [0, 255, 0, 255];

fn blit_paths(h: &Harness) -> Vec<BlitPath> {
    h.ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            PipeCall::Blit { path } => Some(*path),
            _ => None,
        })
        .collect()
}

fn multiview(view_mask: u32, colors: Vec<RenderingAttachmentInfo>) -> Cmd {
    Cmd::BeginRendering(Box::new(RenderingInfo {
        render_area: Rect2D::new(0, 0, 4, 4),
        view_mask,
        color_attachments: colors,
        ..Default::default()
    }))
}

#[test]
fn full_area_clear_is_one_framebuffer_clear() {
    let mut h = Harness::new();
    let (a, view_a) = h.color_target(4, 4);
    let (b, view_b) = h.color_target(4, 4);
    let report = h.run(vec![
        rendering(
            Rect2D::new(0, 0, 4, 4),
            vec![clear_attachment(&view_a, RED), clear_attachment(&view_b, RED)],
        ),
        draw(3),
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok());
    assert_eq!(h.ctx.draws().len(), 1);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 1);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::ClearRenderTarget { .. })), 0);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Blit { .. })), 0);
    for image in [&a, &b] {
        assert_eq!(texel(&image.resource, 0, 0), vec![255, 0, 0, 255]);
        assert_eq!(texel(&image.resource, 3, 3), vec![255, 0, 0, 255]);
    }
}

#[test]
fn differing_clear_colors_take_the_per_attachment_path() {
    let mut h = Harness::new();
    let (a, view_a) = h.color_target(4, 4);
    let (b, view_b) = h.color_target(4, 4);
    h.run(vec![
        rendering(
            Rect2D::new(0, 0, 4, 4),
            vec![clear_attachment(&view_a, RED), clear_attachment(&view_b, BLUE)],
        ),
        Cmd::EndRendering,
    ]);

    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 0);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::ClearRenderTarget { .. })), 2);
    assert_eq!(texel(&a.resource, 2, 2), vec![255, 0, 0, 255]);
    assert_eq!(texel(&b.resource, 2, 2), vec![0, 0, 255, 255]);
}

#[test]
fn fast_and_slow_clears_produce_the_same_pixels() {
    let mut fast = Harness::new();
    let (fast_image, fast_view) = fast.color_target(4, 4);
    fast.run(vec![
        rendering(Rect2D::new(0, 0, 4, 4), vec![clear_attachment(&fast_view, BLUE)]),
        Cmd::EndRendering,
    ]);

    // Conditional rendering disqualifies the framebuffer clear.
    let mut slow = Harness::new();
    let (slow_image, slow_view) = slow.color_target(4, 4);
    let predicate = slow.device.create_buffer(4);
    slow.run(vec![
        Cmd::BeginConditionalRendering {
            buffer: predicate,
            offset: 0,
            inverted: false,
        },
        rendering(Rect2D::new(0, 0, 4, 4), vec![clear_attachment(&slow_view, BLUE)]),
        Cmd::EndRendering,
        Cmd::EndConditionalRendering,
    ]);

    assert_eq!(fast.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 1);
    assert_eq!(slow.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 0);
    assert!(!slow.ctx.render_condition_active());
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(
                texel(&fast_image.resource, x, y),
                texel(&slow_image.resource, x, y),
                "texel ({x}, {y})"
            );
        }
    }
}

#[test]
fn partial_render_area_clears_only_the_area() {
    let mut h = Harness::new();
    let (image, view) = h.color_target(4, 4);
    h.run(vec![
        rendering(Rect2D::new(0, 0, 2, 2), vec![clear_attachment(&view, RED)]),
        Cmd::EndRendering,
    ]);

    assert_eq!(texel(&image.resource, 1, 1), vec![255, 0, 0, 255]);
    assert_eq!(texel(&image.resource, 3, 3), vec![0, 0, 0, 0]);
}

#[test]
fn multiview_clears_only_the_masked_layers() {
    let mut h = Harness::new();
    let (image, view) = h.layered_target(Format::R8G8B8A8Unorm, 4, 4, 3);
    let report = h.run(vec![
        multiview(0b101, vec![clear_attachment(&view, RED)]),
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 0);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::ClearRenderTarget { .. })), 2);
    assert_eq!(texel_at(&image.resource, 2, 2, 0), RED_TEXEL);
    assert_eq!(texel_at(&image.resource, 2, 2, 1), vec![0, 0, 0, 0]);
    assert_eq!(texel_at(&image.resource, 2, 2, 2), RED_TEXEL);
}

#[test]
fn multiview_resolves_only_the_masked_layers() {
    let mut h = Harness::new();
    let (_, view) = h.layered_target(Format::R8G8B8A8Unorm, 4, 4, 3);
    let (resolve, resolve_view) = h.layered_target(Format::R8G8B8A8Unorm, 4, 4, 3);
    for layer in 0..3 {
        fill_layer(&resolve.resource, layer, &GREEN_TEXEL);
    }
    let report = h.run(vec![
        multiview(
            0b100,
            vec![RenderingAttachmentInfo {
                resolve_mode: ResolveMode::Average,
                resolve_view: Some(resolve_view.clone()),
                ..clear_attachment(&view, RED)
            }],
        ),
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(blit_paths(&h).len(), 1);
    assert_eq!(texel_at(&resolve.resource, 1, 1, 2), RED_TEXEL);
    for layer in 0..2 {
        assert_eq!(texel_at(&resolve.resource, 1, 1, layer), GREEN_TEXEL, "layer {layer}");
    }
}

#[test]
fn forced_multisampling_resolves_the_shadow_first_and_drops_it() {
    let mut h = Harness::new();
    let (image, view) = h.color_target(4, 4);
    let (resolve, resolve_view) = h.color_target(4, 4);
    let live_before = h.screen().counters().snapshot().live_resources();
    let report = h.run(vec![
        Cmd::BeginRendering(Box::new(RenderingInfo {
            render_area: Rect2D::new(0, 0, 4, 4),
            layer_count: 1,
            color_attachments: vec![RenderingAttachmentInfo {
                resolve_mode: ResolveMode::Average,
                resolve_view: Some(resolve_view.clone()),
                ..clear_attachment(&view, RED)
            }],
            multisampled_render_to_single_sampled: Some(4),
            ..Default::default()
        })),
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    // The multisampled shadow is resolved into the attachment, which is then
    // resolved into the application's resolve target.
    let paths = blit_paths(&h);
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0], BlitPath::Shader3D(BlitDisqualifier::SampleCountMismatch));
    assert_ne!(paths[1], BlitPath::Shader3D(BlitDisqualifier::SampleCountMismatch));
    assert_eq!(texel(&image.resource, 3, 3), RED_TEXEL);
    assert_eq!(texel(&resolve.resource, 3, 3), RED_TEXEL);

    let bound = h.ctx.framebuffer().cbufs[0]
        .as_ref()
        .expect("color attachment stays bound");
    assert_eq!(bound.texture().id(), image.resource.id());
    assert_eq!(h.screen().counters().snapshot().live_resources(), live_before);
}

#[test]
fn single_sampled_depth_is_not_resolved() {
    let mut h = Harness::new();
    let (_, depth) = h.target(Format::Z24UnormS8Uint, 4, 4);
    let (_, resolve) = h.target(Format::Z24UnormS8Uint, 4, 4);
    let report = h.run(vec![
        Cmd::BeginRendering(Box::new(RenderingInfo {
            render_area: Rect2D::new(0, 0, 4, 4),
            layer_count: 1,
            depth_attachment: Some(RenderingAttachmentInfo {
                view: Some(depth.clone()),
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
                resolve_mode: ResolveMode::SampleZero,
                resolve_view: Some(resolve.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })),
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert!(blit_paths(&h).is_empty());
}

#[test]
fn clear_attachments_is_clipped_to_the_framebuffer() {
    let mut h = Harness::new();
    let (image, view) = h.color_target(4, 4);
    let report = h.run(vec![
        rendering(Rect2D::new(0, 0, 4, 4), vec![load_attachment(&view)]),
        Cmd::ClearAttachments {
            attachments: vec![ClearAttachment {
                aspects: ImageAspects::COLOR,
                color_attachment: 0,
                value: ClearValue::color_f32(RED),
            }],
            rects: vec![ClearRect {
                rect: Rect2D::new(2, 2, 16, 16),
                base_array_layer: 0,
                layer_count: 1,
            }],
        },
        Cmd::EndRendering,
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    let rect = h.ctx.calls().iter().find_map(|c| match c {
        PipeCall::ClearRenderTarget { rect, .. } => Some(*rect),
        _ => None,
    });
    let rect = rect.expect("clear_attachments clears a render target");
    assert_eq!((rect.x, rect.y, rect.width, rect.height), (2, 2, 2, 2));
    assert_eq!(texel(&image.resource, 3, 3), vec![255, 0, 0, 255]);
    assert_eq!(texel(&image.resource, 1, 1), vec![0, 0, 0, 0]);
}

#[test]
fn poisoning_clears_dont_care_attachments() {
    let dont_care = |view| RenderingAttachmentInfo {
        view: Some(view),
        load_op: LoadOp::DontCare,
        store_op: StoreOp::DontCare,
        ..Default::default()
    };

    let mut plain = Harness::new();
    let (_, view) = plain.color_target(4, 4);
    plain.run(vec![
        rendering(Rect2D::new(0, 0, 4, 4), vec![dont_care(view)]),
        Cmd::EndRendering,
    ]);
    assert_eq!(plain.ctx.count(PipeCall::is_clear), 0);

    let mut poisoned = Harness::with_config(ReplayConfig {
        poison_mem: true,
        ..ReplayConfig::default()
    });
    let (_, view) = poisoned.color_target(4, 4);
    poisoned.run(vec![
        rendering(Rect2D::new(0, 0, 4, 4), vec![dont_care(view)]),
        Cmd::EndRendering,
    ]);
    // Once when loaded, once more after the pass for the discarded store.
    assert_eq!(poisoned.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 1);
    assert_eq!(poisoned.ctx.count(|c| matches!(c, PipeCall::ClearRenderTarget { .. })), 1);
}

#[test]
fn resuming_passes_skip_the_load_clear() {
    let mut h = Harness::new();
    let (_, view) = h.color_target(4, 4);
    let begin = |flags| {
        Cmd::BeginRendering(Box::new(RenderingInfo {
            flags,
            render_area: Rect2D::new(0, 0, 4, 4),
            layer_count: 1,
            color_attachments: vec![clear_attachment(&view, RED)],
            ..Default::default()
        }))
    };
    h.run(vec![
        begin(RenderingFlags::SUSPENDING),
        Cmd::EndRendering,
        begin(RenderingFlags::RESUMING),
        Cmd::EndRendering,
    ]);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Clear { .. })), 1);
}

#[test]
fn buffer_uploads_land_in_the_image() {
    let mut h = Harness::new();
    let (image, _) = h.color_target(2, 2);
    let staging = h.device.create_buffer(16);
    let report = h.run(vec![
        Cmd::UpdateBuffer {
            dst: staging.clone(),
            offset: 0,
            data: words(&[0x0403_0201, 0x0807_0605, 0x0c0b_0a09, 0x100f_0e0d]),
        },
        Cmd::CopyBufferToImage {
            src: staging,
            dst: image.clone(),
            regions: vec![BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: color_layers(),
                image_offset: origin(),
                image_extent: extent(2, 2),
            }],
        },
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(texel(&image.resource, 0, 0), vec![1, 2, 3, 4]);
    assert_eq!(texel(&image.resource, 1, 0), vec![5, 6, 7, 8]);
    assert_eq!(texel(&image.resource, 0, 1), vec![9, 10, 11, 12]);
    assert_eq!(texel(&image.resource, 1, 1), vec![13, 14, 15, 16]);
}

#[test]
fn whole_size_fill_rounds_down_to_words() {
    let mut h = Harness::new();
    let dst = h.device.create_buffer(14);
    let copy = h.device.create_buffer(14);
    h.run(vec![
        Cmd::FillBuffer {
            dst: dst.clone(),
            offset: 4,
            size: WHOLE_SIZE,
            data: 0xaabb_ccdd,
        },
        Cmd::CopyBuffer {
            src: dst.clone(),
            dst: copy.clone(),
            regions: vec![BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 14,
            }],
        },
    ]);

    let filled = dst.resource.read(0, 14).expect("buffer in bounds");
    let mut expected = vec![0u8; 4];
    expected.extend(words(&[0xaabb_ccdd, 0xaabb_ccdd]));
    expected.extend([0, 0]);
    assert_eq!(filled, expected);
    assert_eq!(copy.resource.read(0, 14), Some(expected));
}

//! Dynamic rendering: attachment setup, load-op clears, resolves and
//! in-pass attachment clears.
//!
//! When a pass asks for multisampled rendering into single-sampled
//! attachments, each such attachment is backed by a hidden multisampled
//! shadow image for the duration of the pass and resolved back into the
//! real attachment when the pass ends.

use std::sync::Arc;

use aero_pipe::blit::{BlitFilter, BlitInfo, BlitMask, BlitSurface};
use aero_pipe::state::{FramebufferState, ScissorState};
use aero_pipe::{ClearFlags, ColorUnion, PipeBox, PipeContext, Rect, TextureTarget};
use tracing::trace;

use crate::cmd::{
    ClearAttachment, ClearRect, ClearValue, ImageAspects, LoadOp, Rect2D, RenderingAttachmentInfo,
    RenderingFlags, RenderingInfo, ResolveMode, StoreOp,
};
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::objects::{ImageCreateInfo, ImageView, ImageViewCreateInfo};
use crate::state::RenderAttachment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentKind {
    Color,
    Depth,
    Stencil,
}

fn pipe_rect(area: &Rect2D) -> Rect {
    Rect {
        x: area.offset.x.max(0) as u32,
        y: area.offset.y.max(0) as u32,
        width: area.extent.width,
        height: area.extent.height,
    }
}

/// `rect` clipped to the framebuffer, or `None` when nothing is left.
fn clamp_rect(rect: Rect, fb: &FramebufferState) -> Option<Rect> {
    let x1 = (rect.x + rect.width).min(fb.width);
    let y1 = (rect.y + rect.height).min(fb.height);
    (x1 > rect.x && y1 > rect.y).then(|| Rect {
        x: rect.x,
        y: rect.y,
        width: x1 - rect.x,
        height: y1 - rect.y,
    })
}

/// Layer indices named by a multiview mask.
fn view_layers(mask: u32) -> impl Iterator<Item = u32> {
    (0..32).filter(move |bit| mask & (1 << bit) != 0)
}

fn blit_surface(view: &ImageView, area: &Rect2D, first_layer: u32, layers: u32) -> BlitSurface {
    BlitSurface {
        resource: view.image.resource.clone(),
        level: view.base_level,
        region: PipeBox {
            x: area.offset.x,
            y: area.offset.y,
            z: (view.base_layer + first_layer) as i32,
            width: area.extent.width as i32,
            height: area.extent.height as i32,
            depth: layers.max(1) as i32,
        },
        format: view.format,
    }
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    fn render_att_init(
        &mut self,
        info: Option<&RenderingAttachmentInfo>,
        kind: AttachmentKind,
    ) -> RenderAttachment {
        let Some(info) = info.filter(|info| info.view.is_some()) else {
            return RenderAttachment::default();
        };
        let read_only = match kind {
            AttachmentKind::Color => false,
            AttachmentKind::Depth => info.layout.depth_read_only(),
            AttachmentKind::Stencil => info.layout.stencil_read_only(),
        };
        let resolve_view = info
            .resolve_view
            .clone()
            .filter(|_| info.resolve_mode != ResolveMode::None);
        let mut att = RenderAttachment {
            view: info.view.clone(),
            shadow: None,
            load_op: info.load_op,
            store_op: info.store_op,
            clear_value: info.clear_value,
            resolve_mode: if resolve_view.is_some() {
                info.resolve_mode
            } else {
                ResolveMode::None
            },
            resolve_view,
            read_only,
        };
        if self.config.poison_mem && !read_only && att.load_op == LoadOp::DontCare {
            att.load_op = LoadOp::Clear;
            att.clear_value = self.poison_value(kind);
        }
        att
    }

    fn poison_value(&mut self, kind: AttachmentKind) -> ClearValue {
        match kind {
            AttachmentKind::Color => ClearValue::Color([
                self.next_poison(),
                self.next_poison(),
                self.next_poison(),
                self.next_poison(),
            ]),
            AttachmentKind::Depth | AttachmentKind::Stencil => {
                let bits = self.next_poison();
                ClearValue::DepthStencil {
                    depth: (bits >> 8) as f32 / (u32::MAX >> 8) as f32,
                    stencil: bits & 0xff,
                }
            }
        }
    }

    /// A multisampled image matching `view`, rendered to in its place.
    fn create_shadow(&mut self, view: &ImageView, samples: u32) -> Arc<ImageView> {
        let extent = view.image.resource.template().level_extent(view.base_level);
        let layers = view.layer_count.max(1);
        let image = self.device.create_image(&ImageCreateInfo {
            target: if layers > 1 {
                TextureTarget::Texture2DArray
            } else {
                TextureTarget::Texture2D
            },
            format: view.format,
            extent: [extent[0], extent[1], 1],
            mip_levels: 1,
            array_layers: layers,
            samples,
        });
        let info = ImageViewCreateInfo {
            format: view.format,
            aspects: view.aspects,
            base_level: 0,
            base_layer: 0,
            layer_count: layers,
        };
        self.device.create_image_view(&image, &info)
    }

    /// Copy or resolve the render area of `src` into `dst`. Under multiview
    /// only the layers named by the view mask are touched, one blit each.
    fn blit_views(&mut self, src: &ImageView, dst: &ImageView, mask: BlitMask, sample0_only: bool) {
        let area = self.state.render_area;
        let fb = &self.state.framebuffer;
        let ranges: Vec<(u32, u32)> = if fb.viewmask != 0 {
            view_layers(fb.viewmask).map(|layer| (layer, 1)).collect()
        } else {
            vec![(0, fb.layers)]
        };
        for (first_layer, layers) in ranges {
            let info = BlitInfo {
                dst: blit_surface(dst, &area, first_layer, layers),
                src: blit_surface(src, &area, first_layer, layers),
                mask,
                filter: BlitFilter::Nearest,
                scissor_enable: false,
                scissor: ScissorState::default(),
                num_window_rectangles: 0,
                render_condition_enable: false,
                sample0_only,
            };
            self.ctx.blit(&info);
        }
    }

    fn area_is_partial(&self) -> bool {
        let area = &self.state.render_area;
        area.offset.x != 0
            || area.offset.y != 0
            || area.extent.width != self.state.framebuffer.width
            || area.extent.height != self.state.framebuffer.height
    }

    fn ds_target(&self) -> Option<Arc<ImageView>> {
        self.state.ds_shadow.clone().or_else(|| self.state.ds_view.clone())
    }

    pub(crate) fn handle_begin_rendering(&mut self, info: &RenderingInfo) -> Result<()> {
        let resuming = info.flags.contains(RenderingFlags::RESUMING);
        self.state.suspending = info.flags.contains(RenderingFlags::SUSPENDING);

        let forced = info.multisampled_render_to_single_sampled.unwrap_or(0);
        let forced_mode = if forced > 1 {
            ResolveMode::SampleZero
        } else {
            ResolveMode::None
        };
        self.state.forced_sample_count = if forced > 1 { forced } else { 0 };
        self.state.forced_depth_resolve_mode = forced_mode;
        self.state.forced_stencil_resolve_mode = forced_mode;

        let area = info.render_area;
        self.state.render_area = area;
        let fb = &mut self.state.framebuffer;
        fb.viewmask = info.view_mask;
        fb.width = area.offset.x.max(0) as u32 + area.extent.width;
        fb.height = area.offset.y.max(0) as u32 + area.extent.height;
        fb.layers = if info.view_mask != 0 {
            32 - info.view_mask.leading_zeros()
        } else {
            info.layer_count.max(1)
        };
        let layers = fb.layers;

        let color_att: Vec<_> = info
            .color_attachments
            .iter()
            .map(|att| self.render_att_init(Some(att), AttachmentKind::Color))
            .collect();
        self.state.color_att = color_att;
        self.state.depth_att = self.render_att_init(info.depth_attachment.as_ref(), AttachmentKind::Depth);
        self.state.stencil_att =
            self.render_att_init(info.stencil_attachment.as_ref(), AttachmentKind::Stencil);

        let partial = self.area_is_partial();
        let forced = self.state.forced_sample_count;

        let mut cbufs = Vec::with_capacity(self.state.color_att.len());
        for i in 0..self.state.color_att.len() {
            let Some(view) = self.state.color_att[i].view.clone() else {
                cbufs.push(None);
                continue;
            };
            let mut target = view.clone();
            if forced > 0 && view.image.samples() <= 1 {
                let shadow = self.create_shadow(&view, forced);
                if self.state.color_att[i].load_op == LoadOp::Load || partial {
                    self.blit_views(&view, &shadow, BlitMask::RGBA, false);
                }
                self.state.color_att[i].shadow = Some(shadow.clone());
                target = shadow;
            }
            let surface = target
                .surface(self.ctx, layers)
                .ok_or(ExecutorError::CreateFailed("color attachment surface"))?;
            cbufs.push(Some(surface));
        }
        self.state.framebuffer.cbufs = cbufs;

        let ds_view = self
            .state
            .depth_att
            .view
            .clone()
            .or_else(|| self.state.stencil_att.view.clone());
        self.state.ds_view = ds_view.clone();
        self.state.ds_shadow = None;
        let mut zsbuf = None;
        if let Some(view) = ds_view {
            let mut target = view.clone();
            if forced > 0 && view.image.samples() <= 1 {
                let shadow = self.create_shadow(&view, forced);
                let loads = self.state.depth_att.load_op == LoadOp::Load
                    || self.state.stencil_att.load_op == LoadOp::Load;
                if loads || partial {
                    self.blit_views(&view, &shadow, BlitMask::of_format(view.format), false);
                }
                self.state.ds_shadow = Some(shadow.clone());
                target = shadow;
            }
            let surface = target
                .surface(self.ctx, layers)
                .ok_or(ExecutorError::CreateFailed("depth/stencil attachment surface"))?;
            zsbuf = Some(surface);
        }
        self.state.framebuffer.zsbuf = zsbuf;
        self.ctx.set_framebuffer_state(&self.state.framebuffer);

        if !resuming && self.needs_clear() {
            self.render_clear()?;
        }
        Ok(())
    }

    fn needs_clear(&self) -> bool {
        self.state
            .color_att
            .iter()
            .chain([&self.state.depth_att, &self.state.stencil_att])
            .any(|att| att.view.is_some() && att.load_op == LoadOp::Clear)
    }

    /// Depth/stencil clear flags requested by the load ops, limited to the
    /// aspects the attachment format has.
    fn ds_clear_flags(&self) -> ClearFlags {
        let Some(view) = self.state.ds_view.as_ref() else {
            return ClearFlags::empty();
        };
        let mut flags = ClearFlags::empty();
        if self.state.depth_att.load_op == LoadOp::Clear
            && self.state.depth_att.view.is_some()
            && view.format.has_depth()
        {
            flags |= ClearFlags::DEPTH;
        }
        if self.state.stencil_att.load_op == LoadOp::Clear
            && self.state.stencil_att.view.is_some()
            && view.format.has_stencil()
        {
            flags |= ClearFlags::STENCIL;
        }
        flags
    }

    /// One framebuffer clear covers every attachment, provided the pass
    /// spans the whole framebuffer and all cleared colors agree.
    fn fast_clear(&self) -> Option<(ClearFlags, [u32; 4])> {
        if self.area_is_partial() || self.state.framebuffer.viewmask != 0 || self.state.render_cond {
            return None;
        }
        let mut flags = ClearFlags::empty();
        let mut color = None;
        for (i, att) in self.state.color_att.iter().enumerate() {
            if att.view.is_none() || att.load_op != LoadOp::Clear {
                continue;
            }
            let bits = att.clear_value.color_bits();
            match color {
                Some(c) if c != bits => return None,
                _ => color = Some(bits),
            }
            flags |= ClearFlags::color(i as u32);
        }
        Some((flags | self.ds_clear_flags(), color.unwrap_or_default()))
    }

    fn render_clear(&mut self) -> Result<()> {
        if let Some((flags, color)) = self.fast_clear() {
            let depth = self.state.depth_att.clear_value.depth();
            let stencil = self.state.stencil_att.clear_value.stencil();
            trace!(?flags, "fast render-pass clear");
            self.ctx.clear(
                flags,
                None,
                &ColorUnion::from_u32(color),
                f64::from(depth),
                stencil as u8,
            );
            return Ok(());
        }

        let rect = pipe_rect(&self.state.render_area);
        for i in 0..self.state.color_att.len() {
            let att = &self.state.color_att[i];
            if att.load_op != LoadOp::Clear {
                continue;
            }
            let Some(target) = att.target().cloned() else {
                continue;
            };
            let color = ColorUnion::from_u32(att.clear_value.color_bits());
            self.clear_color_view(&target, &color, rect, false)?;
        }
        let flags = self.ds_clear_flags();
        if !flags.is_empty() {
            if let Some(target) = self.ds_target() {
                let depth = self.state.depth_att.clear_value.depth();
                let stencil = self.state.stencil_att.clear_value.stencil();
                self.clear_ds_view(&target, flags, f64::from(depth), stencil as u8, rect, false)?;
            }
        }
        Ok(())
    }

    /// Clear `rect` of every layer of `view` the pass renders to.
    fn clear_color_view(
        &mut self,
        view: &ImageView,
        color: &ColorUnion,
        rect: Rect,
        render_cond: bool,
    ) -> Result<()> {
        let mask = self.state.framebuffer.viewmask;
        if mask != 0 {
            for layer in view_layers(mask) {
                let surface = view
                    .create_surface(self.ctx, view.base_layer + layer, 1)
                    .ok_or(ExecutorError::CreateFailed("clear surface"))?;
                self.ctx.clear_render_target(&surface, color, rect, render_cond);
                self.ctx.surface_destroy(surface);
            }
        } else {
            let surface = view
                .surface(self.ctx, self.state.framebuffer.layers)
                .ok_or(ExecutorError::CreateFailed("clear surface"))?;
            self.ctx.clear_render_target(&surface, color, rect, render_cond);
        }
        Ok(())
    }

    fn clear_ds_view(
        &mut self,
        view: &ImageView,
        flags: ClearFlags,
        depth: f64,
        stencil: u8,
        rect: Rect,
        render_cond: bool,
    ) -> Result<()> {
        let mask = self.state.framebuffer.viewmask;
        if mask != 0 {
            for layer in view_layers(mask) {
                let surface = view
                    .create_surface(self.ctx, view.base_layer + layer, 1)
                    .ok_or(ExecutorError::CreateFailed("clear surface"))?;
                self.ctx
                    .clear_depth_stencil(&surface, flags, depth, stencil, rect, render_cond);
                self.ctx.surface_destroy(surface);
            }
        } else {
            let surface = view
                .surface(self.ctx, self.state.framebuffer.layers)
                .ok_or(ExecutorError::CreateFailed("clear surface"))?;
            self.ctx
                .clear_depth_stencil(&surface, flags, depth, stencil, rect, render_cond);
        }
        Ok(())
    }

    pub(crate) fn handle_end_rendering(&mut self) {
        if self.state.suspending {
            return;
        }
        if self.state.forced_sample_count > 0 {
            self.resolve_ds(true);
            self.resolve_color(true);
            self.bind_real_attachments();
        }
        self.resolve_ds(false);
        self.resolve_color(false);

        if self.config.poison_mem {
            self.poison_stored_attachments();
        }
    }

    /// Point the framebuffer back at the application's views once the
    /// shadows are resolved, so the shadow images can be dropped.
    fn bind_real_attachments(&mut self) {
        let layers = self.state.framebuffer.layers;
        let mut cbufs = Vec::with_capacity(self.state.color_att.len());
        for att in &self.state.color_att {
            cbufs.push(att.view.as_ref().and_then(|view| view.surface(self.ctx, layers)));
        }
        self.state.framebuffer.cbufs = cbufs;
        self.state.framebuffer.zsbuf = self
            .state
            .ds_view
            .as_ref()
            .and_then(|view| view.surface(self.ctx, layers));
        self.ctx.set_framebuffer_state(&self.state.framebuffer);
    }

    fn resolve_color(&mut self, shadows: bool) {
        for i in 0..self.state.color_att.len() {
            let att = &mut self.state.color_att[i];
            let (src, dst, mode) = if shadows {
                let (Some(shadow), Some(view)) = (att.shadow.take(), att.view.clone()) else {
                    continue;
                };
                (shadow, view, ResolveMode::Average)
            } else {
                if att.resolve_mode == ResolveMode::None {
                    continue;
                }
                let (Some(src), Some(dst)) = (att.target().cloned(), att.resolve_view.clone()) else {
                    continue;
                };
                (src, dst, att.resolve_mode)
            };
            self.blit_views(&src, &dst, BlitMask::RGBA, mode == ResolveMode::SampleZero);
            if shadows {
                src.release_surface(self.ctx);
            }
        }
    }

    fn resolve_ds(&mut self, shadows: bool) {
        let (src, dst, depth_mode, stencil_mode) = if shadows {
            let (Some(src), Some(dst)) = (self.state.ds_shadow.take(), self.state.ds_view.clone())
            else {
                return;
            };
            (
                src,
                dst,
                self.state.forced_depth_resolve_mode,
                self.state.forced_stencil_resolve_mode,
            )
        } else {
            let dst = self
                .state
                .depth_att
                .resolve_view
                .clone()
                .or_else(|| self.state.stencil_att.resolve_view.clone());
            let (Some(src), Some(dst)) = (self.ds_target(), dst) else {
                return;
            };
            if src.image.samples() <= 1 {
                return;
            }
            (
                src,
                dst,
                self.state.depth_att.resolve_mode,
                self.state.stencil_att.resolve_mode,
            )
        };

        let format = src.format;
        if depth_mode != ResolveMode::None && depth_mode == stencil_mode {
            let mask = BlitMask::of_format(format) & BlitMask::ZS;
            self.blit_views(&src, &dst, mask, depth_mode == ResolveMode::SampleZero);
        } else {
            if depth_mode != ResolveMode::None && format.has_depth() {
                self.blit_views(&src, &dst, BlitMask::Z, depth_mode == ResolveMode::SampleZero);
            }
            if stencil_mode != ResolveMode::None && format.has_stencil() {
                self.blit_views(&src, &dst, BlitMask::S, true);
            }
        }
        if shadows {
            src.release_surface(self.ctx);
        }
    }

    /// Overwrite attachments whose contents are not stored with a
    /// recognizable pattern.
    fn poison_stored_attachments(&mut self) {
        let rect = pipe_rect(&self.state.render_area);
        for i in 0..self.state.color_att.len() {
            let att = &self.state.color_att[i];
            if att.store_op != StoreOp::DontCare {
                continue;
            }
            let Some(view) = att.view.clone() else {
                continue;
            };
            let color = ColorUnion::from_u32(self.poison_value(AttachmentKind::Color).color_bits());
            if let Err(err) = self.clear_color_view(&view, &color, rect, false) {
                tracing::warn!(%err, "failed to poison color attachment");
            }
        }
        let Some(view) = self.state.ds_view.clone() else {
            return;
        };
        let mut flags = ClearFlags::empty();
        let depth = &self.state.depth_att;
        if depth.view.is_some() && depth.store_op == StoreOp::DontCare && !depth.read_only {
            flags |= ClearFlags::DEPTH;
        }
        let stencil = &self.state.stencil_att;
        if stencil.view.is_some() && stencil.store_op == StoreOp::DontCare && !stencil.read_only {
            flags |= ClearFlags::STENCIL;
        }
        if flags.is_empty() {
            return;
        }
        let value = self.poison_value(AttachmentKind::Depth);
        if let Err(err) = self.clear_ds_view(
            &view,
            flags,
            f64::from(value.depth()),
            value.stencil() as u8,
            rect,
            false,
        ) {
            tracing::warn!(%err, "failed to poison depth/stencil attachment");
        }
    }

    /// Clear regions of the current attachments from inside the pass.
    pub(crate) fn handle_clear_attachments(
        &mut self,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> Result<()> {
        for clear in attachments {
            let color = clear.aspects.contains(ImageAspects::COLOR);
            let view = if color {
                self.state
                    .color_att
                    .get(clear.color_attachment as usize)
                    .and_then(|att| att.target().cloned())
            } else {
                self.ds_target()
            };
            let Some(view) = view else {
                continue;
            };
            let mut flags = ClearFlags::empty();
            if clear.aspects.contains(ImageAspects::DEPTH) {
                flags |= ClearFlags::DEPTH;
            }
            if clear.aspects.contains(ImageAspects::STENCIL) {
                flags |= ClearFlags::STENCIL;
            }
            for r in rects {
                let Some(rect) = clamp_rect(pipe_rect(&r.rect), &self.state.framebuffer) else {
                    continue;
                };
                let mask = self.state.framebuffer.viewmask;
                let layers: Vec<(u32, u32)> = if mask != 0 {
                    view_layers(mask).map(|layer| (view.base_layer + layer, 1)).collect()
                } else {
                    vec![(view.base_layer + r.base_array_layer, r.layer_count.max(1))]
                };
                for (first_layer, count) in layers {
                    let surface = view
                        .create_surface(self.ctx, first_layer, count)
                        .ok_or(ExecutorError::CreateFailed("clear surface"))?;
                    if color {
                        let value = ColorUnion::from_u32(clear.value.color_bits());
                        self.ctx.clear_render_target(&surface, &value, rect, true);
                    } else {
                        self.ctx.clear_depth_stencil(
                            &surface,
                            flags,
                            f64::from(clear.value.depth()),
                            clear.value.stencil() as u8,
                            rect,
                            true,
                        );
                    }
                    self.ctx.surface_destroy(surface);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiview_masks_name_layers() {
        assert_eq!(view_layers(0b1011).collect::<Vec<_>>(), [0, 1, 3]);
        assert_eq!(view_layers(0).count(), 0);
    }

    #[test]
    fn clear_rects_clip_to_the_framebuffer() {
        let fb = FramebufferState {
            width: 64,
            height: 32,
            ..FramebufferState::default()
        };
        let rect = Rect {
            x: 48,
            y: 16,
            width: 32,
            height: 32,
        };
        let clipped = clamp_rect(rect, &fb).map(|r| (r.x, r.y, r.width, r.height));
        assert_eq!(clipped, Some((48, 16, 16, 16)));
        let outside = Rect { x: 64, ..rect };
        assert!(clamp_rect(outside, &fb).is_none());
    }

    #[test]
    fn negative_area_offsets_clamp_to_zero() {
        let rect = pipe_rect(&Rect2D::new(-4, 3, 10, 20));
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0, 3, 10, 20));
    }
}

//! Copies, blits, resolves, fills and image clears.

use std::sync::Arc;

use aero_pipe::blit::{BlitFilter, BlitInfo, BlitMask, BlitSurface};
use aero_pipe::context::TransferLayout;
use aero_pipe::resource::SurfaceTemplate;
use aero_pipe::state::ScissorState;
use aero_pipe::{
    pipe_buffer_write, ClearFlags, ColorUnion, Format, MapFlags, PipeBox, PipeContext, Rect,
};
use tracing::warn;

use crate::cmd::{
    BufferCopy, BufferImageCopy, ClearValue, Extent3D, Filter, ImageAspects, ImageBlit, ImageCopy,
    ImageResolve, ImageSubresourceLayers, ImageSubresourceRange, Offset3D, WHOLE_SIZE,
};
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::objects::{Buffer, Image};

/// How one aspect of an image texel is laid out in buffer memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AspectLayout {
    /// The whole texel, byte for byte.
    Whole(usize),
    /// Low 24 bits of a packed depth/stencil texel.
    Depth24,
    /// A 32-bit float depth in the first four bytes.
    DepthFloat,
    /// One stencil byte at the given position within the texel.
    Stencil(usize),
}

impl AspectLayout {
    fn new(format: Format, aspects: ImageAspects) -> Self {
        let depth_only = aspects == ImageAspects::DEPTH;
        let stencil_only = aspects == ImageAspects::STENCIL;
        match format {
            Format::Z24UnormS8Uint if depth_only => AspectLayout::Depth24,
            Format::Z24UnormS8Uint if stencil_only => AspectLayout::Stencil(3),
            Format::Z32FloatS8X24Uint if depth_only => AspectLayout::DepthFloat,
            Format::Z32FloatS8X24Uint if stencil_only => AspectLayout::Stencil(4),
            _ => AspectLayout::Whole(format.block_size() as usize),
        }
    }

    /// Bytes per texel in buffer memory.
    fn buffer_size(self) -> usize {
        match self {
            AspectLayout::Whole(size) => size,
            AspectLayout::Depth24 | AspectLayout::DepthFloat => 4,
            AspectLayout::Stencil(_) => 1,
        }
    }

    fn extract(self, texel: &[u8], out: &mut [u8]) {
        match self {
            AspectLayout::Whole(size) => out[..size].copy_from_slice(&texel[..size]),
            AspectLayout::Depth24 => {
                out[..3].copy_from_slice(&texel[..3]);
                out[3] = 0;
            }
            AspectLayout::DepthFloat => out[..4].copy_from_slice(&texel[..4]),
            AspectLayout::Stencil(at) => out[0] = texel[at],
        }
    }

    fn merge(self, src: &[u8], texel: &mut [u8]) {
        match self {
            AspectLayout::Whole(size) => texel[..size].copy_from_slice(&src[..size]),
            AspectLayout::Depth24 => texel[..3].copy_from_slice(&src[..3]),
            AspectLayout::DepthFloat => texel[..4].copy_from_slice(&src[..4]),
            AspectLayout::Stencil(at) => texel[at] = src[0],
        }
    }

    fn is_partial(self) -> bool {
        !matches!(self, AspectLayout::Whole(_))
    }
}

/// Region of `image` addressed by a subresource, an offset and an extent.
/// 3D images address slices through `z`; array images through layers.
fn image_box(image: &Image, sub: &ImageSubresourceLayers, offset: Offset3D, extent: Extent3D) -> PipeBox {
    let layered = !image.resource.target().is_layout_3d();
    PipeBox {
        x: offset.x,
        y: offset.y,
        z: if layered { sub.base_array_layer as i32 } else { offset.z },
        width: extent.width as i32,
        height: extent.height as i32,
        depth: if layered {
            image.layer_count(sub.base_array_layer, sub.layer_count) as i32
        } else {
            extent.depth as i32
        },
    }
}

/// Normalize a pair of blit corners to an origin and a signed size.
fn corners(a: Offset3D, b: Offset3D) -> ([i32; 3], [i32; 3]) {
    ([a.x, a.y, a.z], [b.x - a.x, b.y - a.y, b.z - a.z])
}

fn texture_strides(layout: &TransferLayout) -> (usize, usize) {
    match *layout {
        TransferLayout::Texture {
            stride,
            layer_stride,
            ..
        } => (stride as usize, layer_stride as usize),
        TransferLayout::Buffer { .. } => unreachable!("texture map returned a buffer layout"),
    }
}

/// Row and image pitch of a buffer side of a copy, in bytes.
fn buffer_pitches(region: &BufferImageCopy, texel: usize) -> (usize, usize) {
    let row_length = if region.buffer_row_length == 0 {
        region.image_extent.width
    } else {
        region.buffer_row_length
    };
    let image_height = if region.buffer_image_height == 0 {
        region.image_extent.height
    } else {
        region.buffer_image_height
    };
    let row = row_length as usize * texel;
    (row, row * image_height as usize)
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    pub(crate) fn handle_copy_buffer(&mut self, src: &Arc<Buffer>, dst: &Arc<Buffer>, regions: &[BufferCopy]) {
        for region in regions {
            let src_box = PipeBox::new_1d(region.src_offset as i32, region.size as i32);
            self.ctx.resource_copy_region(
                &dst.resource,
                0,
                region.dst_offset as u32,
                0,
                0,
                &src.resource,
                0,
                &src_box,
            );
        }
    }

    pub(crate) fn handle_copy_image(&mut self, src: &Arc<Image>, dst: &Arc<Image>, regions: &[ImageCopy]) {
        for region in regions {
            let src_box = image_box(src, &region.src_subresource, region.src_offset, region.extent);
            let dst_box = image_box(dst, &region.dst_subresource, region.dst_offset, region.extent);
            self.ctx.resource_copy_region(
                &dst.resource,
                region.dst_subresource.mip_level,
                dst_box.x as u32,
                dst_box.y as u32,
                dst_box.z as u32,
                &src.resource,
                region.src_subresource.mip_level,
                &src_box,
            );
        }
    }

    pub(crate) fn handle_copy_buffer_to_image(
        &mut self,
        src: &Arc<Buffer>,
        dst: &Arc<Image>,
        regions: &[BufferImageCopy],
    ) -> Result<()> {
        for region in regions {
            let sub = &region.image_subresource;
            let aspect = AspectLayout::new(dst.format(), sub.aspects);
            let region_box = image_box(dst, sub, region.image_offset, region.image_extent);
            if region_box.is_empty() {
                continue;
            }
            let (row_pitch, image_pitch) = buffer_pitches(region, aspect.buffer_size());
            let usage = if aspect.is_partial() {
                MapFlags::READ | MapFlags::WRITE
            } else {
                MapFlags::WRITE
            };
            let [w, h, d] = [region_box.width, region_box.height, region_box.depth].map(|v| v as usize);
            let span = image_pitch * (d - 1) + row_pitch * (h - 1) + w * aspect.buffer_size();
            let buffer = self
                .ctx
                .buffer_map(&src.resource, region.buffer_offset, span as u64, MapFlags::READ)?;
            let mut texture = match self.ctx.texture_map(&dst.resource, sub.mip_level, &region_box, usage) {
                Ok(texture) => texture,
                Err(err) => {
                    self.ctx.buffer_unmap(buffer);
                    return Err(err.into());
                }
            };
            let (stride, layer_stride) = texture_strides(&texture.layout);
            let texel = dst.format().block_size() as usize;
            let bsize = aspect.buffer_size();
            for z in 0..d {
                for y in 0..h {
                    for x in 0..w {
                        let from = z * image_pitch + y * row_pitch + x * bsize;
                        let to = z * layer_stride + y * stride + x * texel;
                        aspect.merge(&buffer.data[from..from + bsize], &mut texture.data[to..to + texel]);
                    }
                }
            }
            self.ctx.buffer_unmap(buffer);
            self.ctx.texture_unmap(texture);
        }
        Ok(())
    }

    pub(crate) fn handle_copy_image_to_buffer(
        &mut self,
        src: &Arc<Image>,
        dst: &Arc<Buffer>,
        regions: &[BufferImageCopy],
    ) -> Result<()> {
        for region in regions {
            let sub = &region.image_subresource;
            let aspect = AspectLayout::new(src.format(), sub.aspects);
            let region_box = image_box(src, sub, region.image_offset, region.image_extent);
            if region_box.is_empty() {
                continue;
            }
            let (row_pitch, image_pitch) = buffer_pitches(region, aspect.buffer_size());
            let [w, h, d] = [region_box.width, region_box.height, region_box.depth].map(|v| v as usize);
            let bsize = aspect.buffer_size();
            let span = image_pitch * (d - 1) + row_pitch * (h - 1) + w * bsize;
            let texture = self
                .ctx
                .texture_map(&src.resource, sub.mip_level, &region_box, MapFlags::READ)?;
            // Rows may be padded, so keep whatever the gaps already hold.
            let mut buffer = match self.ctx.buffer_map(
                &dst.resource,
                region.buffer_offset,
                span as u64,
                MapFlags::READ | MapFlags::WRITE,
            ) {
                Ok(buffer) => buffer,
                Err(err) => {
                    self.ctx.texture_unmap(texture);
                    return Err(err.into());
                }
            };
            let (stride, layer_stride) = texture_strides(&texture.layout);
            let texel = src.format().block_size() as usize;
            for z in 0..d {
                for y in 0..h {
                    for x in 0..w {
                        let from = z * layer_stride + y * stride + x * texel;
                        let to = z * image_pitch + y * row_pitch + x * bsize;
                        aspect.extract(&texture.data[from..from + texel], &mut buffer.data[to..to + bsize]);
                    }
                }
            }
            self.ctx.texture_unmap(texture);
            self.ctx.buffer_unmap(buffer);
        }
        Ok(())
    }

    pub(crate) fn handle_blit_image(
        &mut self,
        src: &Arc<Image>,
        dst: &Arc<Image>,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        for region in regions {
            let (mut src_origin, mut src_size) = corners(region.src_offsets[0], region.src_offsets[1]);
            let (mut dst_origin, mut dst_size) = corners(region.dst_offsets[0], region.dst_offsets[1]);
            // Keep the destination positive and carry any mirroring on the
            // source side.
            for axis in 0..3 {
                if dst_size[axis] < 0 {
                    dst_origin[axis] += dst_size[axis];
                    dst_size[axis] = -dst_size[axis];
                    src_origin[axis] += src_size[axis];
                    src_size[axis] = -src_size[axis];
                }
            }
            let src_layered = !src.resource.target().is_layout_3d();
            let dst_layered = !dst.resource.target().is_layout_3d();
            let layers = src.layer_count(
                region.src_subresource.base_array_layer,
                region.src_subresource.layer_count,
            ) as i32;
            let src_region = PipeBox {
                x: src_origin[0],
                y: src_origin[1],
                z: if src_layered {
                    region.src_subresource.base_array_layer as i32
                } else {
                    src_origin[2]
                },
                width: src_size[0],
                height: src_size[1],
                depth: if src_layered { layers } else { src_size[2] },
            };
            let dst_region = PipeBox {
                x: dst_origin[0],
                y: dst_origin[1],
                z: if dst_layered {
                    region.dst_subresource.base_array_layer as i32
                } else {
                    dst_origin[2]
                },
                width: dst_size[0],
                height: dst_size[1],
                depth: if dst_layered { layers } else { dst_size[2] },
            };
            let info = BlitInfo {
                dst: BlitSurface {
                    resource: dst.resource.clone(),
                    level: region.dst_subresource.mip_level,
                    region: dst_region,
                    format: dst.format(),
                },
                src: BlitSurface {
                    resource: src.resource.clone(),
                    level: region.src_subresource.mip_level,
                    region: src_region,
                    format: src.format(),
                },
                mask: BlitMask::of_format(src.format()) & BlitMask::of_format(dst.format()),
                filter: match filter {
                    Filter::Nearest => BlitFilter::Nearest,
                    Filter::Linear => BlitFilter::Linear,
                },
                scissor_enable: false,
                scissor: ScissorState::default(),
                num_window_rectangles: 0,
                render_condition_enable: false,
                sample0_only: false,
            };
            self.ctx.blit(&info);
        }
    }

    pub(crate) fn handle_resolve_image(&mut self, src: &Arc<Image>, dst: &Arc<Image>, regions: &[ImageResolve]) {
        for region in regions {
            let info = BlitInfo {
                dst: BlitSurface {
                    resource: dst.resource.clone(),
                    level: region.dst_subresource.mip_level,
                    region: image_box(dst, &region.dst_subresource, region.dst_offset, region.extent),
                    format: dst.format(),
                },
                src: BlitSurface {
                    resource: src.resource.clone(),
                    level: region.src_subresource.mip_level,
                    region: image_box(src, &region.src_subresource, region.src_offset, region.extent),
                    format: src.format(),
                },
                mask: BlitMask::of_format(src.format()),
                filter: BlitFilter::Nearest,
                scissor_enable: false,
                scissor: ScissorState::default(),
                num_window_rectangles: 0,
                render_condition_enable: false,
                sample0_only: false,
            };
            self.ctx.blit(&info);
        }
    }

    /// Fill with a repeated 32-bit word; a whole-size fill stops at the last
    /// full word of the buffer.
    pub(crate) fn handle_fill_buffer(&mut self, dst: &Arc<Buffer>, offset: u64, size: u64, data: u32) {
        let size = if size == WHOLE_SIZE {
            dst.size.saturating_sub(offset) & !3
        } else {
            size
        };
        if size == 0 {
            return;
        }
        self.ctx
            .clear_buffer(&dst.resource, offset, size, &data.to_le_bytes());
    }

    pub(crate) fn handle_update_buffer(&mut self, dst: &Arc<Buffer>, offset: u64, data: &[u8]) -> Result<()> {
        pipe_buffer_write(self.ctx, &dst.resource, offset, data)?;
        Ok(())
    }

    /// Region covering every layer (or slice) of `level` named by `range`.
    fn range_box(image: &Image, range: &ImageSubresourceRange, level: u32) -> PipeBox {
        let extent = image.resource.template().level_extent(level);
        let layered = !image.resource.target().is_layout_3d();
        PipeBox {
            x: 0,
            y: 0,
            z: if layered { range.base_array_layer as i32 } else { 0 },
            width: extent[0] as i32,
            height: extent[1] as i32,
            depth: if layered {
                image.layer_count(range.base_array_layer, range.layer_count) as i32
            } else {
                extent[2] as i32
            },
        }
    }

    pub(crate) fn handle_clear_color_image(
        &mut self,
        image: &Arc<Image>,
        color: &ClearValue,
        ranges: &[ImageSubresourceRange],
    ) {
        let format = image.format();
        if format.is_depth_or_stencil() {
            warn!(?format, "color clear of a depth/stencil image ignored");
            return;
        }
        let texel = format.pack_color(&ColorUnion::from_u32(color.color_bits()));
        for range in ranges {
            let levels = image.level_count(range.base_mip_level, range.level_count);
            for level in range.base_mip_level..range.base_mip_level + levels {
                let region = Self::range_box(image, range, level);
                self.ctx.clear_texture(&image.resource, level, &region, &texel);
            }
        }
    }

    pub(crate) fn handle_clear_ds_image(
        &mut self,
        image: &Arc<Image>,
        depth: f32,
        stencil: u32,
        ranges: &[ImageSubresourceRange],
    ) -> Result<()> {
        let format = image.format();
        for range in ranges {
            let mut flags = ClearFlags::empty();
            if range.aspects.contains(ImageAspects::DEPTH) && format.has_depth() {
                flags |= ClearFlags::DEPTH;
            }
            if range.aspects.contains(ImageAspects::STENCIL) && format.has_stencil() {
                flags |= ClearFlags::STENCIL;
            }
            if flags.is_empty() {
                continue;
            }
            let levels = image.level_count(range.base_mip_level, range.level_count);
            for level in range.base_mip_level..range.base_mip_level + levels {
                let region = Self::range_box(image, range, level);
                let surface = self
                    .ctx
                    .create_surface(
                        &image.resource,
                        &SurfaceTemplate {
                            format,
                            level,
                            first_layer: region.z as u32,
                            last_layer: (region.z + region.depth.max(1) - 1) as u32,
                        },
                    )
                    .ok_or(ExecutorError::CreateFailed("clear surface"))?;
                let rect = Rect {
                    x: 0,
                    y: 0,
                    width: region.width as u32,
                    height: region.height as u32,
                };
                self.ctx.clear_depth_stencil(
                    &surface,
                    flags,
                    f64::from(depth),
                    stencil as u8,
                    rect,
                    false,
                );
                self.ctx.surface_destroy(surface);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_aspects_of_packed_depth_stencil() {
        let stencil = AspectLayout::new(Format::Z24UnormS8Uint, ImageAspects::STENCIL);
        let mut texel = 0x11_223344u32.to_le_bytes();
        let mut out = [0u8; 1];
        stencil.extract(&texel, &mut out);
        assert_eq!(out, [0x11]);

        stencil.merge(&[0xab], &mut texel);
        assert_eq!(u32::from_le_bytes(texel), 0xab_223344);

        let depth = AspectLayout::new(Format::Z24UnormS8Uint, ImageAspects::DEPTH);
        let mut word = [0xffu8; 4];
        depth.extract(&texel, &mut word);
        assert_eq!(u32::from_le_bytes(word), 0x00_223344);
        assert_eq!(depth.buffer_size(), 4);
    }

    #[test]
    fn color_formats_copy_whole_texels() {
        let layout = AspectLayout::new(Format::R8G8B8A8Unorm, ImageAspects::COLOR);
        assert_eq!(layout, AspectLayout::Whole(4));
        assert!(!layout.is_partial());
    }

    #[test]
    fn packed_buffer_pitches_follow_the_extent() {
        let region = BufferImageCopy {
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
                height: 4,
                depth: 1,
            },
        };
        assert_eq!(buffer_pitches(&region, 4), (32, 128));
        let padded = BufferImageCopy {
            buffer_row_length: 16,
            ..region
        };
        assert_eq!(buffer_pitches(&padded, 4), (64, 256));
    }
}

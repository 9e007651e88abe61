//! Flushing dirty rendering state into the pipe context.

use aero_pipe::state::{ConstantBuffer, ShaderStage, VertexElements};
use aero_pipe::{PipeContext, PrimType};
use tracing::warn;

use crate::execute::Replay;
use crate::state::GsOutput;

/// Alignment of uploaded push-constant blocks.
const PCBUF_ALIGNMENT: u64 = 64;

fn reduces_to_lines(mode: PrimType) -> bool {
    matches!(
        mode,
        PrimType::Lines
            | PrimType::LineStrip
            | PrimType::LinesAdjacency
            | PrimType::LineStripAdjacency
    )
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    /// Push every dirty graphics state group to the context.
    pub(crate) fn emit_state(&mut self) {
        if self.state.any_dirty() {
            self.stats.inc_state_flushes();
        }

        if self.state.shaders[ShaderStage::Fragment.index()].is_none() && !self.state.noop_fs_bound
        {
            let noop = self.device.noop_fs(self.ctx);
            self.binder.bind_shader(self.ctx, ShaderStage::Fragment, noop);
            self.state.noop_fs_bound = true;
        }

        if self.state.blend_dirty {
            let blend = self.state.effective_blend();
            self.binder.set_blend(self.ctx, &blend);
            self.state.blend_dirty = false;
        }

        if self.state.rs_dirty {
            let mut rs = self.state.rs_state;
            if self.state.disable_multisample {
                let lines = match self.state.gs_output {
                    GsOutput::Lines => true,
                    GsOutput::None => reduces_to_lines(self.state.info.mode),
                    GsOutput::Other => false,
                };
                if lines {
                    rs.multisample = false;
                }
            }
            let bias = self.state.depth_bias;
            if bias.enabled {
                rs.offset_units = bias.factors.constant;
                rs.offset_scale = bias.factors.slope;
                rs.offset_clamp = bias.factors.clamp;
                rs.offset_point = true;
                rs.offset_line = true;
                rs.offset_tri = true;
            } else {
                rs.offset_units = 0.0;
                rs.offset_scale = 0.0;
                rs.offset_clamp = 0.0;
                rs.offset_point = false;
                rs.offset_line = false;
                rs.offset_tri = false;
            }
            self.binder.set_rasterizer(self.ctx, &rs);
            self.state.rs_dirty = false;
        }

        if self.state.dsa_dirty {
            let dsa = self.state.dsa_state;
            self.binder.set_depth_stencil_alpha(self.ctx, &dsa);
            self.state.dsa_dirty = false;
        }

        if self.state.sample_mask_dirty {
            self.ctx.set_sample_mask(self.state.sample_mask);
            self.state.sample_mask_dirty = false;
        }

        if self.state.min_samples_dirty {
            self.update_min_samples();
        }

        if self.state.blend_color_dirty {
            self.ctx.set_blend_color(&self.state.blend_color);
            self.state.blend_color_dirty = false;
        }

        if self.state.stencil_ref_dirty {
            self.ctx.set_stencil_ref(self.state.stencil_ref);
            self.state.stencil_ref_dirty = false;
        }

        let count = self.state.velem_count as usize;
        if self.state.ve_dirty {
            let start = self.state.start_vb.min(self.state.num_vb);
            for i in 0..count {
                self.state.velem[i].vertex_buffer_index =
                    self.state.vertex_binding[i].saturating_sub(start);
            }
        }
        if self.state.vb_strides_dirty {
            for i in 0..count {
                let binding = self.state.vertex_binding[i] as usize;
                self.state.velem[i].src_stride = self.state.vb_strides[binding];
            }
            self.state.ve_dirty = true;
            self.state.vb_strides_dirty = false;
        }

        if self.state.vb_dirty {
            if self.state.start_vb < self.state.num_vb {
                let range = self.state.start_vb as usize..self.state.num_vb as usize;
                self.ctx.set_vertex_buffers(&self.state.vb[range]);
            }
            self.state.vb_dirty = false;
        }

        if self.state.ve_dirty {
            let elements = VertexElements {
                elements: self.state.velem[..count].to_vec(),
            };
            self.binder.set_vertex_elements(self.ctx, &elements);
            self.state.ve_dirty = false;
        }

        for stage in ShaderStage::GRAPHICS {
            self.emit_stage_buffers(stage);
        }

        if self.state.vp_dirty {
            let n = self.state.num_viewports as usize;
            self.ctx.set_viewport_states(0, &self.state.viewports[..n]);
            self.state.vp_dirty = false;
        }

        if self.state.scissor_dirty {
            let n = self.state.num_scissors as usize;
            self.ctx.set_scissor_states(0, &self.state.scissors[..n]);
            self.state.scissor_dirty = false;
        }
    }

    /// The compute counterpart of [`Self::emit_state`].
    pub(crate) fn emit_compute_state(&mut self) {
        let i = ShaderStage::Compute.index();
        if self.state.constbuf_dirty[i] || self.state.pcbuf_dirty[i] || self.state.inlines_dirty[i]
        {
            self.stats.inc_state_flushes();
        }
        self.emit_stage_buffers(ShaderStage::Compute);
    }

    fn emit_stage_buffers(&mut self, stage: ShaderStage) {
        let i = stage.index();
        if self.state.constbuf_dirty[i] {
            for idx in 0..self.state.num_const_bufs[i] {
                let cb = &self.state.const_buffer[i][idx as usize];
                self.ctx.set_constant_buffer(stage, idx + 1, Some(cb));
            }
            self.state.constbuf_dirty[i] = false;
        }
        if self.state.pcbuf_dirty[i] {
            self.update_pcbuf(stage);
        }
        if self.state.inlines_dirty[i] {
            self.update_inline(stage);
        }
    }

    /// Upload the visible push-constant bytes and bind them as buffer 0.
    fn update_pcbuf(&mut self, stage: ShaderStage) {
        self.state.pcbuf_dirty[stage.index()] = false;
        let size = self.state.pcbuf_size(stage) as usize;
        if size == 0 {
            return;
        }
        let size = size.min(self.state.push_constants.len());
        let uploaded = self.arena.upload(
            self.device.screen(),
            &self.state.push_constants[..size],
            PCBUF_ALIGNMENT,
        );
        let Some((buffer, offset)) = uploaded else {
            warn!(?stage, size, "push constant upload failed");
            return;
        };
        let cb = ConstantBuffer {
            buffer: Some(buffer),
            buffer_offset: offset,
            buffer_size: size as u32,
            user_buffer: None,
        };
        self.ctx.set_constant_buffer(stage, 0, Some(&cb));
    }

    /// Bind the variant of the stage's shader specialized for the current
    /// push-constant values.
    fn update_inline(&mut self, stage: ShaderStage) {
        let i = stage.index();
        self.state.inlines_dirty[i] = false;
        let Some(shader) = self.state.shaders[i].clone() else {
            return;
        };
        let Some(inline) = shader.inline.as_ref().filter(|inline| inline.mask != 0) else {
            return;
        };
        let push_size = self.state.pcbuf_size(stage) as usize;
        let values: Vec<u32> = inline
            .offsets
            .iter()
            .enumerate()
            .filter(|(slot, _)| inline.mask & (1 << slot) != 0)
            .map(|(_, &offset)| {
                let offset = offset as usize;
                if offset + 4 <= push_size.min(self.state.push_constants.len()) {
                    let b = &self.state.push_constants[offset..offset + 4];
                    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
                } else {
                    0
                }
            })
            .collect();
        let tess_ccw = stage == ShaderStage::TessEval && self.state.tess_ccw;
        let Some(handle) = shader.variant(self.ctx, values, tess_ccw) else {
            warn!(?stage, shader = shader.id, "failed to create inline variant");
            return;
        };
        self.binder.bind_shader(self.ctx, stage, Some(handle));
        if stage == ShaderStage::Fragment {
            self.state.noop_fs_bound = false;
        }
    }

    /// Derive the minimum sample-shading count and keep the framebuffer's
    /// sample count in step with the rasterization sample count.
    pub(crate) fn update_min_samples(&mut self) {
        let rast = self.state.rast_samples;
        let mut min_samples = 1;
        if self.state.sample_shading {
            min_samples = (rast as f32 * self.state.min_sample_shading).ceil() as u32;
            if min_samples > 1 {
                min_samples = rast;
            }
            min_samples = min_samples.max(1);
        }
        if self.state.force_min_sample {
            min_samples = rast.max(1);
        }
        if rast != self.state.framebuffer.samples {
            self.state.framebuffer.samples = rast;
            self.ctx.set_framebuffer_state(&self.state.framebuffer);
        }
        self.state.min_samples = min_samples;
        self.ctx.set_min_samples(min_samples);
        self.state.min_samples_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_topologies_reduce_to_lines() {
        assert!(reduces_to_lines(PrimType::LineStrip));
        assert!(reduces_to_lines(PrimType::LinesAdjacency));
        assert!(!reduces_to_lines(PrimType::Triangles));
        assert!(!reduces_to_lines(PrimType::Points));
    }
}

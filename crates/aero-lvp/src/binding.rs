//! Vertex, index, descriptor and push-constant binding.
//!
//! Descriptor set `n` of a stage is bound as constant buffer `n + 1`;
//! buffer 0 is reserved for push constants.

use std::sync::Arc;

use aero_pipe::state::{ConstantBuffer, ShaderStage, ShaderStages};
use aero_pipe::{PipeContext, Resource};
use tracing::warn;

use crate::cmd::{IndexType, PipelineBindPoint, VertexBinding, WHOLE_SIZE};
use crate::descriptor::{
    descriptor_layouts_equal, write_immutable_samplers, DescriptorData, DescriptorSet,
    DescriptorUpdateTemplate, DescriptorWrite, MAX_SETS,
};
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::objects::{Buffer, PipelineLayout};
use crate::state::{DescriptorBufferBinding, MAX_PUSH_CONSTANTS_SIZE};

/// Stages of `point` that a set visible to `stages` feeds.
fn point_stages(point: PipelineBindPoint, stages: ShaderStages) -> ShaderStages {
    match point {
        PipelineBindPoint::Graphics => stages & ShaderStages::ALL_GRAPHICS,
        PipelineBindPoint::Compute | PipelineBindPoint::ExecGraph => {
            stages & ShaderStages::COMPUTE
        }
    }
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    pub(crate) fn handle_vertex_buffers(&mut self, first: u32, bindings: &[VertexBinding]) {
        for (i, binding) in bindings.iter().enumerate() {
            let idx = first as usize + i;
            let resource = binding
                .buffer
                .as_ref()
                .filter(|_| binding.size != Some(0))
                .map(|buffer| buffer.resource.clone());
            let slot = &mut self.state.vb[idx];
            slot.buffer_offset = binding.offset as u32;
            match (resource, binding.size) {
                (Some(res), Some(size))
                    if size != WHOLE_SIZE && binding.offset + size < res.size() =>
                {
                    // Bound sub-ranges alias the buffer up to their end.
                    let end = (binding.offset + size).min(res.size());
                    slot.buffer = Some(self.device.screen().buffer_wrap(&res, 0, end as u32));
                    self.state.vb_sizes[idx] = Some(size);
                }
                (res, _) => {
                    slot.buffer = res;
                    self.state.vb_sizes[idx] = None;
                }
            }
            if let Some(stride) = binding.stride {
                self.state.vb_strides[idx] = stride;
                self.state.vb_strides_dirty = true;
            }
        }
        let end = first + bindings.len() as u32;
        self.state.start_vb = self.state.start_vb.min(first);
        self.state.num_vb = self.state.num_vb.max(end);
        self.state.vb_dirty = true;
    }

    pub(crate) fn handle_index_buffer(
        &mut self,
        buffer: Option<&Arc<Buffer>>,
        offset: u64,
        size: Option<u64>,
        index_type: IndexType,
    ) {
        match buffer {
            Some(buffer) => {
                self.state.index_size = index_type.size();
                self.state.index_offset = offset;
                self.state.index_buffer_size = match size {
                    Some(size) if size != WHOLE_SIZE => size,
                    _ => buffer.size.saturating_sub(offset),
                };
                self.state.index_buffer = buffer.resource.clone();
            }
            None => {
                let zero = self.device.zero_buffer();
                self.state.index_size = 4;
                self.state.index_offset = 0;
                self.state.index_buffer_size = zero.size();
                self.state.index_buffer = zero.clone();
            }
        }
        self.state.info.restart_index = match index_type {
            IndexType::U8 => 0xff,
            IndexType::U16 => 0xffff,
            IndexType::U32 => 0xffff_ffff,
        };
    }

    /// Record `bo` as the buffer behind constant buffer `idx + 1` of `stage`.
    pub(crate) fn set_stage_buffer(
        &mut self,
        stage: ShaderStage,
        idx: usize,
        bo: &Arc<Resource>,
        offset: u32,
    ) {
        let i = stage.index();
        self.state.const_buffer[i][idx] = ConstantBuffer {
            buffer: Some(bo.clone()),
            buffer_offset: offset,
            buffer_size: (bo.size().saturating_sub(u64::from(offset))) as u32,
            user_buffer: None,
        };
        self.state.constbuf_dirty[i] = true;
        self.state.num_const_bufs[i] = self.state.num_const_bufs[i].max(idx as u32 + 1);
    }

    fn bind_set(&mut self, point: PipelineBindPoint, idx: usize, set: Arc<DescriptorSet>) {
        for stage in point_stages(point, set.layout.shader_stages).stages() {
            self.set_stage_buffer(stage, idx, &set.bo, 0);
        }
        self.state.desc_sets[point.index()][idx] = Some(set);
    }

    /// A private copy of `set` with dynamic offsets folded into its buffer
    /// descriptors.
    fn apply_dynamic_offsets(&mut self, set: &Arc<DescriptorSet>, offsets: &[u32]) -> Arc<DescriptorSet> {
        let copy = DescriptorSet::new(self.device.screen(), &set.layout);
        copy.copy_from(set);
        if !copy.apply_dynamic_offsets(offsets) {
            warn!(set = set.id, "fewer dynamic offsets than dynamic descriptors");
        }
        self.track_set(copy.clone());
        copy
    }

    fn track_set(&mut self, set: Arc<DescriptorSet>) {
        self.push_desc_sets.push(set);
        self.stats.inc_throwaway_sets();
    }

    pub(crate) fn handle_descriptor_sets(
        &mut self,
        stages: ShaderStages,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[Option<Arc<DescriptorSet>>],
        dynamic_offsets: &[u32],
    ) {
        for point in PipelineBindPoint::from_stages(stages) {
            let mut dynamic_index = 0usize;
            for (i, set) in sets.iter().enumerate() {
                let idx = first_set as usize + i;
                if idx >= MAX_SETS {
                    panic!("descriptor set index {idx} out of range");
                }
                // Leaving descriptor-buffer mode for this slot.
                if let Some(bo) = self.state.desc_buffers[idx].clone() {
                    for stage in ShaderStage::ALL {
                        let cb = &self.state.const_buffer[stage.index()][idx];
                        if cb.buffer.as_ref().is_some_and(|b| Arc::ptr_eq(b, &bo)) {
                            self.state.constbuf_dirty[stage.index()] = true;
                        }
                    }
                }
                let (Some(set_layout), Some(set)) = (layout.set_layout(idx), set) else {
                    continue;
                };
                let dynamic_count = set_layout.dynamic_offset_count as usize;
                let set = if dynamic_count > 0 && dynamic_index < dynamic_offsets.len() {
                    self.apply_dynamic_offsets(set, &dynamic_offsets[dynamic_index..])
                } else {
                    set.clone()
                };
                dynamic_index += dynamic_count;
                self.bind_set(point, idx, set);
            }
        }
    }

    pub(crate) fn handle_push_descriptor_set(
        &mut self,
        stages: ShaderStages,
        layout: &PipelineLayout,
        set: u32,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let idx = set as usize;
        let set_layout = layout
            .set_layout(idx)
            .ok_or(ExecutorError::MissingObject("push descriptor set layout"))?
            .clone();
        for point in PipelineBindPoint::from_stages(stages) {
            let fresh = DescriptorSet::new(self.device.screen(), &set_layout);
            if let Some(base) = &self.state.desc_sets[point.index()][idx] {
                fresh.copy_from(base);
            }
            for write in writes {
                fresh.write(write);
            }
            self.track_set(fresh.clone());
            self.bind_set(point, idx, fresh);
        }
        Ok(())
    }

    pub(crate) fn handle_push_descriptor_set_with_template(
        &mut self,
        template: &DescriptorUpdateTemplate,
        layout: &PipelineLayout,
        set: u32,
        data: &[DescriptorData],
    ) -> Result<()> {
        let stages = match template.bind_point {
            PipelineBindPoint::Graphics => ShaderStages::ALL_GRAPHICS,
            PipelineBindPoint::Compute | PipelineBindPoint::ExecGraph => ShaderStages::COMPUTE,
        };
        let writes = template.writes(data);
        self.handle_push_descriptor_set(stages, layout, set, &writes)
    }

    pub(crate) fn handle_bind_descriptor_buffers(&mut self, addresses: &[u64]) -> Result<()> {
        for (i, &address) in addresses.iter().enumerate() {
            let (buffer, offset) = self
                .device
                .buffer_at(address)
                .ok_or(ExecutorError::MissingObject("descriptor buffer"))?;
            let bo = if offset == 0 {
                buffer.resource.clone()
            } else {
                let size = buffer.size - offset;
                self.device
                    .screen()
                    .buffer_wrap(&buffer.resource, offset, size as u32)
            };
            self.state.desc_buffer_addrs[i] = address;
            self.state.desc_buffers[i] = Some(bo);
        }
        Ok(())
    }

    /// Forget descriptor-buffer offsets of sets bound with a layout that is
    /// incompatible with `layout`.
    fn check_db_compat(
        &mut self,
        point: PipelineBindPoint,
        layout: &Arc<PipelineLayout>,
        first_set: usize,
        count: usize,
    ) {
        for j in 0..MAX_SETS {
            if (first_set..first_set + count).contains(&j) {
                continue;
            }
            let binding = &mut self.state.desc_buffer_offsets[point.index()][j];
            let Some(bound) = &binding.layout else {
                continue;
            };
            let compatible = bound.independent_sets == layout.independent_sets
                && bound.set_layouts.len() == layout.set_layouts.len()
                && descriptor_layouts_equal(
                    bound.set_layout(j).map(|l| l.as_ref()),
                    layout.set_layout(j).map(|l| l.as_ref()),
                );
            if !compatible {
                *binding = DescriptorBufferBinding::default();
            }
        }
    }

    pub(crate) fn handle_descriptor_buffer_offsets(
        &mut self,
        stages: ShaderStages,
        layout: &Arc<PipelineLayout>,
        first_set: u32,
        buffer_indices: &[u32],
        offsets: &[u64],
    ) -> Result<()> {
        let first = first_set as usize;
        let count = buffer_indices.len().min(offsets.len());
        for point in PipelineBindPoint::from_stages(stages) {
            self.check_db_compat(point, layout, first, count);
            for i in 0..count {
                let idx = first + i;
                let buffer_index = buffer_indices[i];
                let offset = offsets[i];
                let binding = &mut self.state.desc_buffer_offsets[point.index()][idx];
                binding.layout = Some(layout.clone());
                binding.buffer_index = Some(buffer_index);
                binding.offset = offset;

                let Some(set_layout) = layout.set_layout(idx) else {
                    continue;
                };
                let bo = self.state.desc_buffers[buffer_index as usize]
                    .clone()
                    .ok_or(ExecutorError::MissingObject("descriptor buffer"))?;
                for stage in point_stages(point, set_layout.shader_stages).stages() {
                    self.set_stage_buffer(stage, idx, &bo, offset as u32);
                }
                self.bind_db_samplers(point, idx);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_descriptor_buffer_embedded_samplers(
        &mut self,
        stages: ShaderStages,
        layout: &Arc<PipelineLayout>,
        set: u32,
    ) {
        let idx = set as usize;
        let Some(set_layout) = layout.set_layout(idx).cloned() else {
            return;
        };
        if !set_layout.has_immutable_samplers() {
            return;
        }
        for point in PipelineBindPoint::from_stages(stages) {
            self.check_db_compat(point, layout, idx, 1);
            let binding = &mut self.state.desc_buffer_offsets[point.index()][idx];
            *binding = DescriptorBufferBinding {
                layout: Some(layout.clone()),
                buffer_index: None,
                offset: 0,
                sampler_layout: Some(set_layout.clone()),
            };
            self.bind_db_samplers(point, idx);
        }
    }

    /// Make the immutable samplers of a descriptor-buffer slot visible,
    /// either through the layout's sampler-only store or by patching them
    /// into the bound buffer.
    fn bind_db_samplers(&mut self, point: PipelineBindPoint, idx: usize) {
        let binding = self.state.desc_buffer_offsets[point.index()][idx].clone();
        let Some(sampler_layout) = binding.sampler_layout else {
            return;
        };
        match binding.buffer_index {
            None => {
                let Some(bo) = sampler_layout.immutable_bo.clone() else {
                    return;
                };
                let set = DescriptorSet::from_bo(self.device.screen(), &sampler_layout, bo);
                self.bind_set(point, idx, set);
            }
            Some(buffer_index) => {
                let Some(bo) = self.state.desc_buffers[buffer_index as usize].clone() else {
                    return;
                };
                write_immutable_samplers(&bo, binding.offset, &sampler_layout);
                for stage in point_stages(point, sampler_layout.shader_stages).stages() {
                    self.state.constbuf_dirty[stage.index()] = true;
                }
            }
        }
    }

    pub(crate) fn handle_push_constants(&mut self, stages: ShaderStages, offset: u32, values: &[u8]) {
        let start = offset as usize;
        let end = start + values.len();
        if end > MAX_PUSH_CONSTANTS_SIZE {
            panic!("push constant range {start}..{end} exceeds {MAX_PUSH_CONSTANTS_SIZE} bytes");
        }
        self.state.push_constants[start..end].copy_from_slice(values);
        for stage in ShaderStage::ALL {
            let i = stage.index();
            self.state.pcbuf_dirty[i] = true;
            let inlinable = self.state.shaders[i]
                .as_ref()
                .is_some_and(|shader| shader.can_inline());
            if inlinable && stages.contains(stage.bit()) {
                self.state.inlines_dirty[i] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_points_see_only_their_stages() {
        let all = ShaderStages::VERTEX | ShaderStages::FRAGMENT | ShaderStages::COMPUTE;
        assert_eq!(
            point_stages(PipelineBindPoint::Graphics, all),
            ShaderStages::VERTEX | ShaderStages::FRAGMENT
        );
        assert_eq!(point_stages(PipelineBindPoint::Compute, all), ShaderStages::COMPUTE);
    }
}

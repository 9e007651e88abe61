//! Draws, mesh-task launches and compute dispatches.

use std::sync::Arc;

use aero_pipe::draw::IndexSource;
use aero_pipe::{pipe_buffer_read, DrawIndirectInfo, DrawStartCountBias, GridInfo, PipeContext};

use crate::cmd::{IndirectBuffer, MultiDrawIndexedInfo, MultiDrawInfo};
use crate::execute::{Replay, Result};

pub(crate) fn offset32(offset: u64) -> u32 {
    u32::try_from(offset).unwrap_or_else(|_| panic!("indirect offset {offset:#x} exceeds 32 bits"))
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    fn prepare_non_indexed(&mut self, instance_count: u32, first_instance: u32) {
        let info = &mut self.state.info;
        info.index_size = 0;
        info.index = IndexSource::None;
        info.index_bounds_valid = false;
        info.instance_count = instance_count;
        info.start_instance = first_instance;
        info.view_mask = self.state.framebuffer.viewmask;
    }

    fn prepare_indexed(&mut self, instance_count: u32, first_instance: u32) {
        let info = &mut self.state.info;
        info.index_size = self.state.index_size;
        info.index = IndexSource::Resource(self.state.index_buffer.clone());
        info.index_bounds_valid = false;
        info.min_index = 0;
        info.max_index = !0;
        info.instance_count = instance_count;
        info.start_instance = first_instance;
        info.view_mask = self.state.framebuffer.viewmask;
    }

    /// A sub-draw of the bound index buffer, clamped to the bound range.
    fn index_range(&self, first_index: u32, index_count: u32, vertex_offset: i32) -> DrawStartCountBias {
        let size = u64::from(self.state.index_size.max(1));
        let available = (self.state.index_buffer_size / size).saturating_sub(u64::from(first_index));
        let offset_index = u32::try_from(self.state.index_offset / size).unwrap_or(u32::MAX);
        DrawStartCountBias {
            start: offset_index.saturating_add(first_index),
            count: index_count.min(available.min(u64::from(u32::MAX)) as u32),
            index_bias: vertex_offset,
        }
    }

    pub(crate) fn handle_draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.emit_state();
        self.prepare_non_indexed(instance_count, first_instance);
        self.state.info.increment_draw_id = false;
        self.state.info.index_bias_varies = false;
        let draw = DrawStartCountBias {
            start: first_vertex,
            count: vertex_count,
            index_bias: 0,
        };
        self.ctx.draw_vbo(&self.state.info, 0, None, &[draw]);
        self.stats.inc_draws();
    }

    pub(crate) fn handle_draw_multi(
        &mut self,
        draws: &[MultiDrawInfo],
        instance_count: u32,
        first_instance: u32,
    ) {
        self.emit_state();
        self.prepare_non_indexed(instance_count, first_instance);
        self.state.info.increment_draw_id = true;
        self.state.info.index_bias_varies = false;
        let draws: Vec<_> = draws
            .iter()
            .map(|d| DrawStartCountBias {
                start: d.first_vertex,
                count: d.vertex_count,
                index_bias: 0,
            })
            .collect();
        if !draws.is_empty() {
            self.ctx.draw_vbo(&self.state.info, 0, None, &draws);
            self.stats.inc_draws();
        }
    }

    pub(crate) fn handle_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.emit_state();
        self.prepare_indexed(instance_count, first_instance);
        self.state.info.increment_draw_id = false;
        self.state.info.index_bias_varies = false;
        let draw = self.index_range(first_index, index_count, vertex_offset);
        self.ctx.draw_vbo(&self.state.info, 0, None, &[draw]);
        self.stats.inc_draws();
    }

    pub(crate) fn handle_draw_multi_indexed(
        &mut self,
        draws: &[MultiDrawIndexedInfo],
        instance_count: u32,
        first_instance: u32,
        vertex_offset: Option<i32>,
    ) {
        self.emit_state();
        self.prepare_indexed(instance_count, first_instance);
        self.state.info.increment_draw_id = true;
        self.state.info.index_bias_varies = vertex_offset.is_none();
        let draws: Vec<_> = draws
            .iter()
            .map(|d| {
                let bias = vertex_offset.unwrap_or(d.vertex_offset);
                self.index_range(d.first_index, d.index_count, bias)
            })
            .collect();
        if !draws.is_empty() {
            self.ctx.draw_vbo(&self.state.info, 0, None, &draws);
            self.stats.inc_draws();
        }
    }

    /// Indirect draws read their arguments from `indirect`; an optional
    /// count buffer caps the number of draws at `max_draw_count`.
    pub(crate) fn handle_draw_indirect(
        &mut self,
        indirect: &IndirectBuffer,
        count: Option<&IndirectBuffer>,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    ) -> Result<()> {
        self.emit_state();
        if indexed {
            self.prepare_indexed(self.state.info.instance_count, 0);
            // Indirect records index from the start of the resource, so a
            // bound offset or size needs a wrapper of its own.
            let whole = self.state.index_buffer.size();
            if self.state.index_offset != 0 || self.state.index_buffer_size < whole {
                let size = self
                    .state
                    .index_buffer_size
                    .min(whole - self.state.index_offset.min(whole));
                let wrapper = self.device.screen().buffer_wrap(
                    &self.state.index_buffer,
                    self.state.index_offset,
                    size as u32,
                );
                self.state.info.index = IndexSource::Resource(wrapper);
            }
        } else {
            self.prepare_non_indexed(self.state.info.instance_count, 0);
        }
        self.state.info.increment_draw_id = draw_count > 1 || count.is_some();
        self.state.info.index_bias_varies = false;
        let info = DrawIndirectInfo {
            buffer: Some(indirect.buffer.resource.clone()),
            offset: offset32(indirect.offset),
            stride,
            draw_count,
            indirect_draw_count: count.map(|c| c.buffer.resource.clone()),
            indirect_draw_count_offset: count.map_or(0, |c| offset32(c.offset)),
            count_from_stream_output: None,
        };
        self.ctx.draw_vbo(&self.state.info, 0, Some(&info), &[]);
        if indexed {
            // Drop the wrapper now that the draw has consumed it.
            self.state.info.index = IndexSource::Resource(self.state.index_buffer.clone());
        }
        self.stats.inc_draws();
        Ok(())
    }

    /// Draw the vertices written by transform feedback, reading the byte
    /// count from the counter buffer.
    pub(crate) fn handle_draw_indirect_byte_count(
        &mut self,
        instance_count: u32,
        first_instance: u32,
        counter: &IndirectBuffer,
        counter_offset: u32,
        vertex_stride: u32,
    ) -> Result<()> {
        let bytes = pipe_buffer_read(self.ctx, &counter.buffer.resource, counter.offset, 4)?;
        let written = bytes
            .get(..4)
            .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        self.emit_state();
        self.prepare_non_indexed(instance_count, first_instance);
        self.state.info.increment_draw_id = false;
        self.state.info.index_bias_varies = false;
        let draw = DrawStartCountBias {
            start: 0,
            count: written.saturating_sub(counter_offset) / vertex_stride.max(1),
            index_bias: 0,
        };
        self.ctx.draw_vbo(&self.state.info, 0, None, &[draw]);
        self.stats.inc_draws();
        Ok(())
    }

    pub(crate) fn handle_draw_mesh_tasks(&mut self, groups: [u32; 3]) {
        self.emit_state();
        let grid = GridInfo {
            block: self.state.dispatch_block,
            grid: groups,
            ..GridInfo::default()
        };
        self.ctx.draw_mesh_tasks(0, &grid);
        self.stats.inc_draws();
    }

    pub(crate) fn handle_draw_mesh_tasks_indirect(
        &mut self,
        indirect: &IndirectBuffer,
        count: Option<&IndirectBuffer>,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.emit_state();
        let grid = GridInfo {
            block: self.state.dispatch_block,
            indirect: Some(indirect.buffer.resource.clone()),
            indirect_offset: offset32(indirect.offset),
            indirect_stride: stride,
            draw_count,
            indirect_draw_count: count.map(|c| c.buffer.resource.clone()),
            indirect_draw_count_offset: count.map_or(0, |c| offset32(c.offset)),
            ..GridInfo::default()
        };
        self.ctx.draw_mesh_tasks(0, &grid);
        self.stats.inc_draws();
        Ok(())
    }

    pub(crate) fn handle_dispatch(&mut self, base: [u32; 3], groups: [u32; 3]) {
        self.emit_compute_state();
        let grid = GridInfo {
            block: self.state.dispatch_block,
            grid: groups,
            grid_base: base,
            ..GridInfo::default()
        };
        self.ctx.launch_grid(&grid);
        self.stats.inc_dispatches();
    }

    pub(crate) fn handle_dispatch_indirect(&mut self, indirect: &IndirectBuffer) -> Result<()> {
        self.emit_compute_state();
        let grid = GridInfo {
            block: self.state.dispatch_block,
            indirect: Some(Arc::clone(&indirect.buffer.resource)),
            indirect_offset: offset32(indirect.offset),
            ..GridInfo::default()
        };
        self.ctx.launch_grid(&grid);
        self.stats.inc_dispatches();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_offsets_pass_through() {
        assert_eq!(offset32(0x40), 0x40);
    }

    #[test]
    #[should_panic(expected = "exceeds 32 bits")]
    fn oversized_offsets_are_fatal() {
        offset32(1 << 40);
    }
}

//! Queries, events, transform feedback and conditional rendering.

use std::sync::Arc;

use aero_pipe::context::{QueryResultFlags as PipeQueryFlags, QueryValueType, QUERY_AVAILABILITY_INDEX};
use aero_pipe::state::MAX_SO_BUFFERS;
use aero_pipe::{pipe_buffer_read, pipe_buffer_write, PipeContext, QueryHandle};
use tracing::{debug, warn};

use crate::cmd::{
    PipelineStageFlags, QueryControlFlags, QueryPipelineStatistics, QueryResultFlags, XfbBuffer,
    XfbCounter,
};
use crate::draw::offset32;
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::objects::{Buffer, Event, QueryPool, QueryPoolType};

/// Values a query writes before its availability word.
fn result_count(ty: QueryPoolType) -> u32 {
    match ty {
        QueryPoolType::PipelineStatistics(stats) => stats.bits().count_ones(),
        QueryPoolType::TransformFeedback => 2,
        _ => 1,
    }
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    /// Queries written by one query command: one per view in a multiview
    /// pass, otherwise one.
    fn query_views(&self) -> u32 {
        match self.state.framebuffer.viewmask {
            0 => 1,
            mask => mask.count_ones(),
        }
    }

    fn pool_query(
        &mut self,
        pool: &QueryPool,
        query: u32,
        index: u32,
        precise: bool,
    ) -> Result<QueryHandle> {
        pool.get_or_create(self.ctx, query, index, precise)
            .ok_or(ExecutorError::CreateFailed("query"))
    }

    pub(crate) fn handle_event_set(&mut self, event: &Arc<Event>, stages: PipelineStageFlags, value: bool) {
        if stages.contains(PipelineStageFlags::TOP_OF_PIPE) {
            self.ctx.flush();
        }
        event.set(value);
    }

    /// Events are only ever set by earlier commands or by the host before
    /// submission, so after draining the pipeline an unset event can never
    /// become set.
    pub(crate) fn handle_wait_events(&mut self, events: &[Arc<Event>]) -> Result<()> {
        self.finish_fence();
        for event in events {
            if !event.is_set() {
                return Err(ExecutorError::EventNotSet(event.id));
            }
        }
        Ok(())
    }

    pub(crate) fn handle_begin_query(
        &mut self,
        pool: &Arc<QueryPool>,
        query: u32,
        index: u32,
        flags: QueryControlFlags,
    ) -> Result<()> {
        if let QueryPoolType::PipelineStatistics(stats) = pool.ty {
            if stats.contains(QueryPipelineStatistics::COMPUTE_SHADER_INVOCATIONS) {
                self.emit_compute_state();
            }
        }
        self.emit_state();

        let precise = flags.contains(QueryControlFlags::PRECISE);
        for view in 0..self.query_views() {
            let handle = self.pool_query(pool, query + view, index, precise)?;
            self.ctx.begin_query(handle);
            // Only the first view counts; the others report zero.
            if view > 0 {
                self.ctx.end_query(handle);
            }
        }
        Ok(())
    }

    pub(crate) fn handle_end_query(&mut self, pool: &Arc<QueryPool>, query: u32, _index: u32) -> Result<()> {
        let handle = pool
            .get(query)
            .ok_or(ExecutorError::MissingObject("active query"))?;
        self.ctx.end_query(handle);
        Ok(())
    }

    pub(crate) fn handle_reset_query_pool(&mut self, pool: &Arc<QueryPool>, first: u32, count: u32) {
        pool.reset(self.ctx, first, count);
    }

    pub(crate) fn handle_write_timestamp(
        &mut self,
        pool: &Arc<QueryPool>,
        query: u32,
        stage: PipelineStageFlags,
    ) -> Result<()> {
        if stage != PipelineStageFlags::TOP_OF_PIPE {
            self.ctx.flush();
        }
        for view in 0..self.query_views() {
            let handle = self.pool_query(pool, query + view, 0, false)?;
            self.ctx.end_query(handle);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn handle_copy_query_pool_results(
        &mut self,
        pool: &Arc<QueryPool>,
        first: u32,
        count: u32,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        stride: u64,
        flags: QueryResultFlags,
    ) -> Result<()> {
        let mut pipe_flags = PipeQueryFlags::empty();
        if flags.contains(QueryResultFlags::WAIT) {
            pipe_flags |= PipeQueryFlags::WAIT;
        }
        if flags.contains(QueryResultFlags::PARTIAL) {
            pipe_flags |= PipeQueryFlags::PARTIAL;
        }
        let (value_type, result_size) = if flags.contains(QueryResultFlags::RESULT_64) {
            (QueryValueType::U64, 8)
        } else {
            (QueryValueType::U32, 4)
        };
        let with_availability = flags.contains(QueryResultFlags::WITH_AVAILABILITY);

        for (i, query) in (first..first + count).enumerate() {
            let offset = dst_offset + stride * i as u64;
            let Some(handle) = pool.get(query) else {
                // Never begun: zero the slot so availability reads as unset.
                if with_availability {
                    let len = stride.min(dst.size.saturating_sub(offset));
                    pipe_buffer_write(&mut *self.ctx, &dst.resource, offset, &vec![0; len as usize])?;
                }
                continue;
            };
            let write = |ctx: &mut C, index: i32, at: u64| {
                ctx.get_query_result_resource(
                    handle,
                    pipe_flags,
                    value_type,
                    index,
                    &dst.resource,
                    offset32(at),
                );
            };
            if with_availability {
                let at = offset + u64::from(result_count(pool.ty)) * result_size;
                write(&mut *self.ctx, QUERY_AVAILABILITY_INDEX, at);
            }
            match pool.ty {
                QueryPoolType::PipelineStatistics(stats) => {
                    for (n, bit) in (0..32).filter(|bit| stats.bits() & (1 << bit) != 0).enumerate() {
                        write(&mut *self.ctx, bit, offset + n as u64 * result_size);
                    }
                }
                _ => write(&mut *self.ctx, 0, offset),
            }
        }
        Ok(())
    }

    pub(crate) fn handle_bind_xfb_buffers(&mut self, first: u32, buffers: &[XfbBuffer]) -> Result<()> {
        for (i, binding) in buffers.iter().enumerate() {
            let idx = first as usize + i;
            if idx >= MAX_SO_BUFFERS {
                panic!("transform feedback binding {idx} out of range");
            }
            let size = binding
                .size
                .unwrap_or_else(|| binding.buffer.size.saturating_sub(binding.offset));
            if let Some(old) = self.state.so_targets[idx].take() {
                self.ctx.stream_output_target_destroy(old);
            }
            let target = self
                .ctx
                .create_stream_output_target(
                    &binding.buffer.resource,
                    offset32(binding.offset),
                    offset32(size),
                )
                .ok_or(ExecutorError::CreateFailed("stream output target"))?;
            self.state.so_targets[idx] = Some(target);
        }
        self.state.num_so_targets = first + buffers.len() as u32;
        Ok(())
    }

    /// Start capturing into the bound targets, resuming each at the byte
    /// offset stored in its counter buffer when one is given.
    pub(crate) fn handle_begin_xfb(&mut self, first_counter: u32, counters: &[Option<XfbCounter>]) -> Result<()> {
        let mut offsets = [0u32; MAX_SO_BUFFERS];
        for (i, counter) in counters.iter().enumerate() {
            let Some(counter) = counter else {
                continue;
            };
            let slot = first_counter as usize + i;
            if slot >= MAX_SO_BUFFERS {
                warn!(slot, "transform feedback counter out of range");
                continue;
            }
            let bytes = pipe_buffer_read(self.ctx, &counter.buffer.resource, counter.offset, 4)?;
            offsets[slot] = bytes
                .get(..4)
                .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        }
        self.state.so_offsets = offsets;

        let num = (self.state.num_so_targets as usize).min(MAX_SO_BUFFERS);
        let (targets, offsets): (Vec<_>, Vec<_>) = self.state.so_targets[..num]
            .iter()
            .zip(offsets)
            .filter_map(|(target, offset)| target.clone().map(|t| (t, offset)))
            .unzip();
        debug!(targets = targets.len(), "begin transform feedback");
        self.ctx.set_stream_output_targets(&targets, &offsets);
        Ok(())
    }

    /// Stop capturing, saving each target's fill level to its counter.
    pub(crate) fn handle_end_xfb(&mut self, first_counter: u32, counters: &[Option<XfbCounter>]) -> Result<()> {
        for (i, counter) in counters.iter().enumerate() {
            let Some(counter) = counter else {
                continue;
            };
            let slot = first_counter as usize + i;
            let Some(target) = self.state.so_targets.get(slot).cloned().flatten() else {
                continue;
            };
            let filled = self.ctx.stream_output_target_offset(&target);
            pipe_buffer_write(&mut *self.ctx, &counter.buffer.resource, counter.offset, &filled.to_le_bytes())?;
        }
        self.ctx.set_stream_output_targets(&[], &[]);
        Ok(())
    }

    pub(crate) fn handle_begin_conditional_rendering(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        inverted: bool,
    ) -> Result<()> {
        self.state.render_cond = true;
        self.ctx
            .render_condition_mem(Some(&buffer.resource), offset32(offset), inverted);
        Ok(())
    }

    pub(crate) fn handle_end_conditional_rendering(&mut self) {
        self.state.render_cond = false;
        self.ctx.render_condition_mem(None, 0, false);
    }
}

//! Command-buffer replay.
//!
//! [`Executor`] walks a recorded [`CommandBuffer`] and drives a
//! [`PipeContext`]. State-setting commands only touch the in-memory
//! [`RenderingState`]; draws and dispatches flush whatever is dirty first.
//!
//! A command that fails is reported in the returned [`ExecutionReport`] and
//! skipped. Conditions that can only arise from a malformed recording (an
//! unknown device address inside a token stream, an index out of range of a
//! fixed table) panic.

use std::sync::Arc;

use aero_pipe::validate::StateBinder;
use aero_pipe::{PipeContext, UploadArena};
use tracing::{debug, warn};

use crate::cmd::Cmd;
use crate::config::ReplayConfig;
use crate::descriptor::DescriptorSet;
use crate::error::{ExecutionReport, ExecutorError, ExecutorEvent};
use crate::objects::{CommandBuffer, Device};
use crate::state::RenderingState;
use crate::stats::ReplayStats;

pub(crate) type Result<T> = std::result::Result<T, ExecutorError>;

/// Replays command buffers against a pipe context.
#[derive(Debug)]
pub struct Executor {
    device: Arc<Device>,
    config: ReplayConfig,
    stats: Arc<ReplayStats>,
}

impl Executor {
    pub fn new(device: Arc<Device>, config: ReplayConfig) -> Self {
        Self {
            device,
            config,
            stats: Arc::new(ReplayStats::new()),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ReplayStats> {
        &self.stats
    }

    /// Replay `cmd_buffer` from a fresh rendering state.
    ///
    /// The caller flushes `ctx` once the submission is complete.
    pub fn execute<C: PipeContext + ?Sized>(
        &self,
        ctx: &mut C,
        cmd_buffer: &CommandBuffer,
    ) -> ExecutionReport {
        let mut replay = Replay::new(ctx, &self.device, &self.config, &self.stats);
        replay.run_list(&cmd_buffer.cmds);
        replay.finish()
    }
}

/// State of one submission in flight.
pub(crate) struct Replay<'a, C: PipeContext + ?Sized> {
    pub(crate) ctx: &'a mut C,
    pub(crate) device: &'a Device,
    pub(crate) config: &'a ReplayConfig,
    pub(crate) stats: &'a ReplayStats,
    pub(crate) state: RenderingState,
    pub(crate) binder: StateBinder,
    pub(crate) arena: UploadArena,
    /// Sets created during replay, kept alive until the submission retires.
    pub(crate) push_desc_sets: Vec<Arc<DescriptorSet>>,
    poison_seed: u32,
    depth: u32,
    next_index: usize,
    report: ExecutionReport,
}

impl<'a, C: PipeContext + ?Sized> Replay<'a, C> {
    pub(crate) fn new(
        ctx: &'a mut C,
        device: &'a Device,
        config: &'a ReplayConfig,
        stats: &'a ReplayStats,
    ) -> Self {
        Self {
            ctx,
            device,
            config,
            stats,
            state: RenderingState::new(device.zero_buffer().clone()),
            binder: StateBinder::default(),
            arena: UploadArena::new(config.upload_arena_size),
            push_desc_sets: Vec::new(),
            poison_seed: 0x9e37_79b9,
            depth: 0,
            next_index: 0,
            report: ExecutionReport::default(),
        }
    }

    /// Barriers that open or close a list are dropped along with repeats:
    /// the submitter flushes between submissions.
    pub(crate) fn run_list(&mut self, cmds: &[Cmd]) {
        let mut first = true;
        let mut did_flush = false;
        for (i, cmd) in cmds.iter().enumerate() {
            let at = self.next_index;
            self.next_index += 1;
            self.report.commands_processed += 1;
            self.stats.inc_commands_executed();
            if self.config.print_cmds {
                debug!(at, depth = self.depth, cmd = cmd.name(), "replay");
            }

            if matches!(cmd, Cmd::PipelineBarrier) {
                if first || did_flush || i + 1 == cmds.len() {
                    self.stats.inc_barriers_coalesced();
                } else {
                    self.finish_fence();
                    self.stats.inc_barriers_executed();
                    did_flush = true;
                }
                continue;
            }
            first = false;
            did_flush = false;

            if let Err(err) = self.dispatch(cmd) {
                warn!(at, cmd = cmd.name(), %err, "command failed");
                self.report.events.push(ExecutorEvent::Error {
                    at,
                    message: err.to_string(),
                });
            }
        }
    }

    fn dispatch(&mut self, cmd: &Cmd) -> Result<()> {
        match cmd {
            Cmd::BindPipeline { pipeline, .. } => self.handle_pipeline(pipeline)?,
            Cmd::BindPipelineShaderGroup {
                pipeline, group, ..
            } => self.handle_pipeline_shader_group(pipeline, *group)?,
            Cmd::BindShaders { shaders } => self.handle_shaders(shaders)?,

            Cmd::SetViewport { first, viewports } => self.set_viewports(*first, viewports, false),
            Cmd::SetViewportWithCount(viewports) => self.set_viewports(0, viewports, true),
            Cmd::SetScissor { first, scissors } => self.set_scissors(*first, scissors, false),
            Cmd::SetScissorWithCount(scissors) => self.set_scissors(0, scissors, true),
            Cmd::SetLineWidth(width) => self.set_line_width(*width),
            Cmd::SetDepthBias {
                constant,
                clamp,
                slope,
            } => self.set_depth_bias(*constant, *clamp, *slope),
            Cmd::SetBlendConstants(color) => self.set_blend_constants(*color),
            Cmd::SetDepthBounds { min, max } => self.set_depth_bounds(*min, *max),
            Cmd::SetStencilCompareMask { faces, mask } => {
                self.set_stencil_compare_mask(*faces, *mask)
            }
            Cmd::SetStencilWriteMask { faces, mask } => self.set_stencil_write_mask(*faces, *mask),
            Cmd::SetStencilReference { faces, reference } => {
                self.set_stencil_reference(*faces, *reference)
            }
            Cmd::SetCullMode(mode) => self.set_cull_mode(*mode),
            Cmd::SetFrontFace(face) => self.set_front_face(*face),
            Cmd::SetPrimitiveTopology(topology) => self.set_primitive_topology(*topology),
            Cmd::SetDepthTestEnable(enable) => self.set_depth_test_enable(*enable),
            Cmd::SetDepthWriteEnable(enable) => self.set_depth_write_enable(*enable),
            Cmd::SetDepthCompareOp(op) => self.set_depth_compare_op(*op),
            Cmd::SetDepthBoundsTestEnable(enable) => self.set_depth_bounds_test_enable(*enable),
            Cmd::SetStencilTestEnable(enable) => self.set_stencil_test_enable(*enable),
            Cmd::SetStencilOp {
                faces,
                fail_op,
                pass_op,
                depth_fail_op,
                compare_op,
            } => self.set_stencil_op(*faces, *fail_op, *pass_op, *depth_fail_op, *compare_op),
            Cmd::SetLineStipple { factor, pattern } => self.set_line_stipple(*factor, *pattern),
            Cmd::SetLineStippleEnable(enable) => self.set_line_stipple_enable(*enable),
            Cmd::SetDepthBiasEnable(enable) => self.set_depth_bias_enable(*enable),
            Cmd::SetLogicOp(op) => self.set_logic_op(*op),
            Cmd::SetLogicOpEnable(enable) => self.set_logic_op_enable(*enable),
            Cmd::SetPatchControlPoints(points) => self.set_patch_control_points(*points),
            Cmd::SetPrimitiveRestartEnable(enable) => self.set_primitive_restart_enable(*enable),
            Cmd::SetRasterizerDiscardEnable(enable) => self.set_rasterizer_discard_enable(*enable),
            Cmd::SetColorWriteEnable(enables) => self.set_color_write_enable(enables),
            Cmd::SetPolygonMode(mode) => self.set_polygon_mode(*mode),
            Cmd::SetTessellationDomainOrigin(origin) => self.set_tess_domain_origin(*origin)?,
            Cmd::SetDepthClampEnable(enable) => self.set_depth_clamp_enable(*enable),
            Cmd::SetDepthClipEnable(enable) => self.set_depth_clip_enable(*enable),
            Cmd::SetSampleMask(mask) => self.set_sample_mask(*mask),
            Cmd::SetRasterizationSamples(samples) => self.set_rasterization_samples(*samples),
            Cmd::SetAlphaToCoverageEnable(enable) => self.set_alpha_to_coverage_enable(*enable),
            Cmd::SetAlphaToOneEnable(enable) => self.set_alpha_to_one_enable(*enable),
            Cmd::SetDepthClipNegativeOneToOne(enable) => {
                self.set_depth_clip_negative_one_to_one(*enable)
            }
            Cmd::SetLineRasterizationMode(mode) => self.set_line_rasterization_mode(*mode),
            Cmd::SetProvokingVertexMode(mode) => self.set_provoking_vertex(*mode),
            Cmd::SetColorBlendEnable { first, enables } => {
                self.set_color_blend_enable(*first, enables)
            }
            Cmd::SetColorBlendEquation { first, equations } => {
                self.set_color_blend_equation(*first, equations)
            }
            Cmd::SetColorWriteMask { first, masks } => self.set_color_write_mask(*first, masks),
            Cmd::SetVertexInput {
                bindings,
                attributes,
            } => self.set_vertex_input(bindings, attributes),
            Cmd::SetAttachmentFeedbackLoopEnable(_) | Cmd::SetDeviceMask(_) => {}

            Cmd::BindVertexBuffers { first, bindings } => {
                self.handle_vertex_buffers(*first, bindings)
            }
            Cmd::BindIndexBuffer {
                buffer,
                offset,
                size,
                index_type,
            } => self.handle_index_buffer(buffer.as_ref(), *offset, *size, *index_type),
            Cmd::BindDescriptorSets {
                stages,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            } => self.handle_descriptor_sets(*stages, layout, *first_set, sets, dynamic_offsets),
            Cmd::PushDescriptorSet {
                stages,
                layout,
                set,
                writes,
            } => self.handle_push_descriptor_set(*stages, layout, *set, writes)?,
            Cmd::PushDescriptorSetWithTemplate {
                template,
                layout,
                set,
                data,
            } => self.handle_push_descriptor_set_with_template(template, layout, *set, data)?,
            Cmd::BindDescriptorBuffers { addresses } => {
                self.handle_bind_descriptor_buffers(addresses)?
            }
            Cmd::SetDescriptorBufferOffsets {
                stages,
                layout,
                first_set,
                buffer_indices,
                offsets,
            } => self.handle_descriptor_buffer_offsets(
                *stages,
                layout,
                *first_set,
                buffer_indices,
                offsets,
            )?,
            Cmd::BindDescriptorBufferEmbeddedSamplers { stages, layout, set } => {
                self.handle_descriptor_buffer_embedded_samplers(*stages, layout, *set)
            }
            Cmd::PushConstants {
                stages,
                offset,
                values,
            } => self.handle_push_constants(*stages, *offset, values),

            Cmd::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => self.handle_draw(*vertex_count, *instance_count, *first_vertex, *first_instance),
            Cmd::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => self.handle_draw_indexed(
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            ),
            Cmd::DrawMulti {
                draws,
                instance_count,
                first_instance,
            } => self.handle_draw_multi(draws, *instance_count, *first_instance),
            Cmd::DrawMultiIndexed {
                draws,
                instance_count,
                first_instance,
                vertex_offset,
            } => self.handle_draw_multi_indexed(
                draws,
                *instance_count,
                *first_instance,
                *vertex_offset,
            ),
            Cmd::DrawIndirect {
                indirect,
                draw_count,
                stride,
            } => self.handle_draw_indirect(indirect, None, *draw_count, *stride, false)?,
            Cmd::DrawIndexedIndirect {
                indirect,
                draw_count,
                stride,
            } => self.handle_draw_indirect(indirect, None, *draw_count, *stride, true)?,
            Cmd::DrawIndirectCount {
                indirect,
                count,
                max_draw_count,
                stride,
            } => self.handle_draw_indirect(indirect, Some(count), *max_draw_count, *stride, false)?,
            Cmd::DrawIndexedIndirectCount {
                indirect,
                count,
                max_draw_count,
                stride,
            } => self.handle_draw_indirect(indirect, Some(count), *max_draw_count, *stride, true)?,
            Cmd::DrawIndirectByteCount {
                instance_count,
                first_instance,
                counter,
                counter_offset,
                vertex_stride,
            } => self.handle_draw_indirect_byte_count(
                *instance_count,
                *first_instance,
                counter,
                *counter_offset,
                *vertex_stride,
            )?,
            Cmd::DrawMeshTasks { x, y, z } => self.handle_draw_mesh_tasks([*x, *y, *z]),
            Cmd::DrawMeshTasksIndirect {
                indirect,
                draw_count,
                stride,
            } => self.handle_draw_mesh_tasks_indirect(indirect, None, *draw_count, *stride)?,
            Cmd::DrawMeshTasksIndirectCount {
                indirect,
                count,
                max_draw_count,
                stride,
            } => self.handle_draw_mesh_tasks_indirect(
                indirect,
                Some(count),
                *max_draw_count,
                *stride,
            )?,
            Cmd::Dispatch { x, y, z } => self.handle_dispatch([0; 3], [*x, *y, *z]),
            Cmd::DispatchBase { base, groups } => self.handle_dispatch(*base, *groups),
            Cmd::DispatchIndirect { indirect } => self.handle_dispatch_indirect(indirect)?,

            Cmd::BeginRendering(info) => self.handle_begin_rendering(info)?,
            Cmd::EndRendering => self.handle_end_rendering(),

            Cmd::CopyBuffer { src, dst, regions } => self.handle_copy_buffer(src, dst, regions),
            Cmd::CopyImage { src, dst, regions } => self.handle_copy_image(src, dst, regions),
            Cmd::CopyBufferToImage { src, dst, regions } => {
                self.handle_copy_buffer_to_image(src, dst, regions)?
            }
            Cmd::CopyImageToBuffer { src, dst, regions } => {
                self.handle_copy_image_to_buffer(src, dst, regions)?
            }
            Cmd::BlitImage {
                src,
                dst,
                regions,
                filter,
            } => self.handle_blit_image(src, dst, regions, *filter),
            Cmd::ResolveImage { src, dst, regions } => self.handle_resolve_image(src, dst, regions),
            Cmd::FillBuffer {
                dst,
                offset,
                size,
                data,
            } => self.handle_fill_buffer(dst, *offset, *size, *data),
            Cmd::UpdateBuffer { dst, offset, data } => self.handle_update_buffer(dst, *offset, data)?,
            Cmd::ClearColorImage {
                image,
                color,
                ranges,
            } => self.handle_clear_color_image(image, color, ranges),
            Cmd::ClearDepthStencilImage {
                image,
                depth,
                stencil,
                ranges,
            } => self.handle_clear_ds_image(image, *depth, *stencil, ranges)?,
            Cmd::ClearAttachments { attachments, rects } => {
                self.handle_clear_attachments(attachments, rects)?
            }

            Cmd::PipelineBarrier => unreachable!("barriers are handled by run_list"),
            Cmd::SetEvent { event, stages } => self.handle_event_set(event, *stages, true),
            Cmd::ResetEvent { event, stages } => self.handle_event_set(event, *stages, false),
            Cmd::WaitEvents { events } => self.handle_wait_events(events)?,

            Cmd::BeginQuery {
                pool,
                query,
                index,
                flags,
            } => self.handle_begin_query(pool, *query, *index, *flags)?,
            Cmd::EndQuery { pool, query, index } => self.handle_end_query(pool, *query, *index)?,
            Cmd::ResetQueryPool { pool, first, count } => {
                self.handle_reset_query_pool(pool, *first, *count)
            }
            Cmd::WriteTimestamp { pool, query, stage } => {
                self.handle_write_timestamp(pool, *query, *stage)?
            }
            Cmd::CopyQueryPoolResults {
                pool,
                first,
                count,
                dst,
                dst_offset,
                stride,
                flags,
            } => self.handle_copy_query_pool_results(
                pool,
                *first,
                *count,
                dst,
                *dst_offset,
                *stride,
                *flags,
            )?,

            Cmd::BindTransformFeedbackBuffers { first, buffers } => {
                self.handle_bind_xfb_buffers(*first, buffers)?
            }
            Cmd::BeginTransformFeedback {
                first_counter,
                counters,
            } => self.handle_begin_xfb(*first_counter, counters)?,
            Cmd::EndTransformFeedback {
                first_counter,
                counters,
            } => self.handle_end_xfb(*first_counter, counters)?,

            Cmd::BeginConditionalRendering {
                buffer,
                offset,
                inverted,
            } => self.handle_begin_conditional_rendering(buffer, *offset, *inverted)?,
            Cmd::EndConditionalRendering => self.handle_end_conditional_rendering(),

            Cmd::ExecuteCommands(buffers) => self.handle_execute_commands(buffers)?,
            Cmd::PreprocessGeneratedCommands(info) => self.handle_preprocess_generated(info)?,
            Cmd::ExecuteGeneratedCommands {
                info,
                is_preprocessed,
            } => self.handle_execute_generated(info, *is_preprocessed)?,
        }
        Ok(())
    }

    /// Enter one nesting level of replay, failing past the configured limit.
    pub(crate) fn enter_nested(&mut self) -> Result<()> {
        let depth = self.depth + 1;
        let limit = self.config.max_replay_depth;
        if depth > limit {
            return Err(ExecutorError::ReplayDepthExceeded { depth, limit });
        }
        self.depth = depth;
        Ok(())
    }

    pub(crate) fn leave_nested(&mut self) {
        self.depth -= 1;
    }

    fn handle_execute_commands(&mut self, buffers: &[Arc<CommandBuffer>]) -> Result<()> {
        for buffer in buffers {
            self.enter_nested()?;
            self.run_list(&buffer.cmds);
            self.leave_nested();
        }
        Ok(())
    }

    /// Flush the context and wait for everything submitted so far.
    pub(crate) fn finish_fence(&mut self) {
        let fence = self.ctx.flush();
        if !self.ctx.fence_finish(fence) {
            warn!(fence = fence.0, "fence did not signal");
        }
    }

    /// Deterministic pattern source for poisoned attachments.
    pub(crate) fn next_poison(&mut self) -> u32 {
        let mut x = self.poison_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.poison_seed = x;
        x
    }

    /// Release per-submission resources and hand back the report.
    pub(crate) fn finish(mut self) -> ExecutionReport {
        for slot in self.state.so_targets.iter_mut() {
            if let Some(target) = slot.take() {
                self.ctx.stream_output_target_destroy(target);
            }
        }
        self.state.num_so_targets = 0;

        if !self.push_desc_sets.is_empty() {
            self.finish_fence();
            self.push_desc_sets.clear();
        }
        self.state.desc_buffers = Default::default();
        self.arena.release();
        self.report
    }
}

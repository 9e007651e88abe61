//! Pipeline, shader-group and shader-object binding.

use std::sync::Arc;

use aero_pipe::state::{
    BlendFactor, BlendFunc, BlendState, ColorMask, RtBlendState, ShaderStage, ShaderStages,
};
use aero_pipe::PipeContext;

use crate::cmd::{FrontFace, LineRasterizationMode, PipelineBindPoint, ProvokingVertex};
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::graphics::{DynamicStates as D, GraphicsPipelineState};
use crate::objects::{Pipeline, PipelineLayout, Shader};
use crate::state::{GsOutput, PUSH_COMPUTE, PUSH_GRAPHICS};

/// Blend factors of a min/max equation are ignored by the hardware; they
/// are normalized so equal states compare equal.
pub(crate) fn normalize_blend(rt: &mut RtBlendState) {
    if matches!(rt.rgb_func, BlendFunc::Min | BlendFunc::Max) {
        rt.rgb_src_factor = BlendFactor::One;
        rt.rgb_dst_factor = BlendFactor::One;
    }
    if matches!(rt.alpha_func, BlendFunc::Min | BlendFunc::Max) {
        rt.alpha_src_factor = BlendFactor::One;
        rt.alpha_dst_factor = BlendFactor::One;
    }
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    pub(crate) fn handle_pipeline(&mut self, pipeline: &Arc<Pipeline>) -> Result<()> {
        let layout = &pipeline.layout;
        match pipeline.bind_point {
            PipelineBindPoint::Compute => {
                let shader = pipeline.shaders[ShaderStage::Compute.index()]
                    .clone()
                    .ok_or(ExecutorError::MissingObject("compute shader"))?;
                self.handle_compute_shader(shader, layout.push_constant_size, layout)?;
                self.state.push_size[PUSH_COMPUTE] = layout.push_constant_size;
            }
            PipelineBindPoint::Graphics => {
                self.handle_graphics_pipeline(pipeline)?;
                self.state.push_size[PUSH_GRAPHICS] = layout.push_constant_size;
            }
            PipelineBindPoint::ExecGraph => {
                self.state.exec_graph = Some(pipeline.clone());
                self.state.push_size[PUSH_COMPUTE] = layout.push_constant_size;
            }
        }
        self.state.push_layouts[pipeline.bind_point.index()] = Some(layout.clone());
        Ok(())
    }

    /// Group 0 is the pipeline itself; later groups come from its group list.
    pub(crate) fn handle_pipeline_shader_group(
        &mut self,
        pipeline: &Arc<Pipeline>,
        group: u32,
    ) -> Result<()> {
        let target = match group {
            0 => pipeline.clone(),
            g => pipeline
                .groups
                .get(g as usize - 1)
                .cloned()
                .ok_or(ExecutorError::MissingObject("pipeline shader group"))?,
        };
        self.handle_pipeline(&target)
    }

    /// Bind shader objects. Everything else is taken from dynamic state.
    pub(crate) fn handle_shaders(
        &mut self,
        shaders: &[(ShaderStage, Option<Arc<Shader>>)],
    ) -> Result<()> {
        let mut new_stages = ShaderStages::empty();
        let mut null_stages = ShaderStages::empty();
        for (stage, shader) in shaders {
            let stage = *stage;
            if stage == ShaderStage::Compute {
                match shader {
                    Some(shader) => {
                        let size = shader.push_constant_size;
                        self.handle_compute_shader(shader.clone(), size, &PipelineLayout::default())?;
                        self.state.has_pcbuf[stage.index()] = size > 0;
                        self.state.push_size[PUSH_COMPUTE] = size;
                    }
                    None => {
                        self.state.shaders[stage.index()] = None;
                        self.binder.bind_shader(self.ctx, stage, None);
                    }
                }
                continue;
            }
            match shader {
                Some(shader) => {
                    new_stages |= stage.bit();
                    self.state.shaders[stage.index()] = Some(shader.clone());
                    self.state.push_size[PUSH_GRAPHICS] =
                        self.state.push_size[PUSH_GRAPHICS].max(shader.push_constant_size);
                }
                None => null_stages |= stage.bit(),
            }
        }
        self.unbind_graphics_stages(null_stages);
        self.handle_graphics_stages(new_stages, true)?;
        for stage in new_stages.stages() {
            let i = stage.index();
            let size = self.state.shaders[i]
                .as_ref()
                .map_or(0, |s| s.push_constant_size);
            self.state.has_pcbuf[i] = size > 0;
            if !self.state.has_pcbuf[i] {
                self.state.pcbuf_dirty[i] = false;
            }
        }
        Ok(())
    }

    fn bind_stage(&mut self, stage: ShaderStage, shader: &Shader, tess_ccw: bool) -> Result<()> {
        let handle = shader
            .cso(self.ctx, tess_ccw)
            .ok_or(ExecutorError::CreateFailed("shader state"))?;
        self.binder.bind_shader(self.ctx, stage, Some(handle));
        Ok(())
    }

    /// Bind the shaders already stored for `stages`.
    pub(crate) fn handle_graphics_stages(
        &mut self,
        stages: ShaderStages,
        dynamic_tess_origin: bool,
    ) -> Result<()> {
        for stage in stages.stages() {
            let i = stage.index();
            self.state.has_pcbuf[i] = false;
            let Some(shader) = self.state.shaders[i].clone() else {
                continue;
            };
            let can_inline = shader.can_inline();
            self.state.inlines_dirty[i] = can_inline;
            match stage {
                ShaderStage::Fragment => {
                    self.state.noop_fs_bound = false;
                    if !can_inline {
                        self.bind_stage(stage, &shader, false)?;
                    }
                }
                ShaderStage::Geometry => {
                    self.state.gs_output = if shader.gs_output_lines {
                        GsOutput::Lines
                    } else {
                        GsOutput::Other
                    };
                    if !can_inline {
                        self.bind_stage(stage, &shader, false)?;
                    }
                }
                ShaderStage::TessEval => {
                    if dynamic_tess_origin {
                        self.state.tess_states = [shader.cso(self.ctx, false), shader.cso(self.ctx, true)];
                        if !can_inline {
                            let handle = self.state.tess_states[usize::from(self.state.tess_ccw)]
                                .ok_or(ExecutorError::CreateFailed("shader state"))?;
                            self.binder.bind_shader(self.ctx, stage, Some(handle));
                        }
                    } else {
                        self.state.tess_states = [None; 2];
                        self.state.tess_ccw = false;
                        if !can_inline {
                            self.bind_stage(stage, &shader, false)?;
                        }
                    }
                }
                ShaderStage::Task => {
                    self.state.dispatch_block = shader.workgroup_size;
                    if !can_inline {
                        self.bind_stage(stage, &shader, false)?;
                    }
                }
                ShaderStage::Mesh => {
                    if self.state.shaders[ShaderStage::Task.index()].is_none() {
                        self.state.dispatch_block = shader.workgroup_size;
                    }
                    if !can_inline {
                        self.bind_stage(stage, &shader, false)?;
                    }
                }
                _ => {
                    if !can_inline {
                        self.bind_stage(stage, &shader, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn unbind_graphics_stages(&mut self, stages: ShaderStages) {
        for stage in stages.stages() {
            let i = stage.index();
            self.state.has_pcbuf[i] = false;
            self.state.inlines_dirty[i] = false;
            if self.state.shaders[i].take().is_some() {
                self.binder.bind_shader(self.ctx, stage, None);
            }
            match stage {
                ShaderStage::Fragment => self.state.noop_fs_bound = false,
                ShaderStage::Geometry => self.state.gs_output = GsOutput::None,
                ShaderStage::TessEval => self.state.tess_states = [None; 2],
                _ => {}
            }
        }
    }

    fn handle_graphics_layout(&mut self, stages: ShaderStages, layout: &PipelineLayout) {
        for stage in stages.stages() {
            if !layout.push_constant_stages.contains(stage.bit()) {
                continue;
            }
            let i = stage.index();
            self.state.has_pcbuf[i] = layout.push_constant_size > 0;
            self.state.pcbuf_dirty[i] = self.state.has_pcbuf[i];
        }
    }

    pub(crate) fn handle_compute_shader(
        &mut self,
        shader: Arc<Shader>,
        push_constant_size: u32,
        layout: &PipelineLayout,
    ) -> Result<()> {
        let i = ShaderStage::Compute.index();
        if layout.push_constant_stages.contains(ShaderStages::COMPUTE) {
            self.state.has_pcbuf[i] = push_constant_size > 0;
        }
        if !self.state.has_pcbuf[i] {
            self.state.pcbuf_dirty[i] = false;
        }
        self.state.dispatch_block = shader.workgroup_size;
        let can_inline = shader.can_inline();
        self.state.inlines_dirty[i] = can_inline;
        if !can_inline {
            self.bind_stage(ShaderStage::Compute, &shader, false)?;
        }
        self.state.shaders[i] = Some(shader);
        Ok(())
    }

    fn handle_graphics_pipeline(&mut self, pipeline: &Pipeline) -> Result<()> {
        let g = &pipeline.graphics;
        let stages = pipeline.graphics_stages();

        self.unbind_graphics_stages(ShaderStages::ALL_GRAPHICS & !stages);
        for stage in stages.stages() {
            self.state.shaders[stage.index()] = pipeline.shaders[stage.index()].clone();
        }
        self.handle_graphics_stages(stages, g.is_dynamic(D::TS_DOMAIN_ORIGIN))?;
        self.handle_graphics_layout(stages, &pipeline.layout);

        self.apply_rasterization(g);
        self.apply_depth_stencil(g);
        self.apply_color_blend(g);
        self.apply_multisample(g);
        self.apply_vertex_input(g);
        self.apply_input_assembly(g);
        self.apply_viewports(g);
        Ok(())
    }

    fn apply_rasterization(&mut self, g: &GraphicsPipelineState) {
        let Some(rs) = &g.rs else {
            return;
        };
        let st = &mut self.state;
        if !g.is_dynamic(D::RS_DEPTH_CLAMP_ENABLE) {
            st.rs_state.depth_clamp = rs.depth_clamp_enable;
        }
        if !g.is_dynamic(D::RS_DEPTH_CLIP_ENABLE) {
            st.depth_clamp_sets_clip = rs.depth_clip_enable.is_none();
            let clip = rs.depth_clip_enable.unwrap_or(!st.rs_state.depth_clamp);
            st.rs_state.depth_clip_near = clip;
            st.rs_state.depth_clip_far = clip;
        }
        if !g.is_dynamic(D::RS_RASTERIZER_DISCARD_ENABLE) {
            st.rs_state.rasterizer_discard = rs.rasterizer_discard_enable;
        }
        if !g.is_dynamic(D::RS_LINE_MODE) {
            st.rs_state.line_smooth = rs.line_mode == LineRasterizationMode::RectangularSmooth;
            st.rs_state.line_rectangular = rs.line_mode != LineRasterizationMode::Bresenham;
        }
        if !g.is_dynamic(D::RS_LINE_STIPPLE_ENABLE) {
            st.rs_state.line_stipple_enable = rs.line_stipple_enable;
        }
        if !g.is_dynamic(D::RS_POLYGON_MODE) {
            st.rs_state.fill_front = rs.polygon_mode;
            st.rs_state.fill_back = rs.polygon_mode;
        }
        if !g.is_dynamic(D::RS_PROVOKING_VERTEX) {
            st.rs_state.flatshade_first = rs.provoking_vertex == ProvokingVertex::FirstVertex;
        }
        if !g.is_dynamic(D::RS_LINE_WIDTH) {
            st.rs_state.line_width = rs.line_width;
        }
        if !g.is_dynamic(D::RS_LINE_STIPPLE) {
            st.rs_state.line_stipple_factor = rs.line_stipple_factor.saturating_sub(1);
            st.rs_state.line_stipple_pattern = rs.line_stipple_pattern;
        }
        if !g.is_dynamic(D::RS_DEPTH_BIAS_ENABLE) {
            st.depth_bias.enabled = rs.depth_bias_enable;
        }
        if !g.is_dynamic(D::RS_DEPTH_BIAS_FACTORS) {
            st.depth_bias.factors = rs.depth_bias;
        }
        if !g.is_dynamic(D::RS_CULL_MODE) {
            st.rs_state.cull_face = rs.cull_mode;
        }
        if !g.is_dynamic(D::RS_FRONT_FACE) {
            st.rs_state.front_ccw = rs.front_face == FrontFace::CounterClockwise;
        }
        st.rs_dirty = true;
    }

    fn apply_depth_stencil(&mut self, g: &GraphicsPipelineState) {
        let Some(ds) = &g.ds else {
            return;
        };
        let st = &mut self.state;
        let dsa = &mut st.dsa_state;
        if !g.is_dynamic(D::DS_DEPTH_TEST_ENABLE) {
            dsa.depth_enabled = ds.depth_test_enable;
        }
        if !g.is_dynamic(D::DS_DEPTH_WRITE_ENABLE) {
            dsa.depth_writemask = ds.depth_write_enable;
        }
        if !g.is_dynamic(D::DS_DEPTH_COMPARE_OP) {
            dsa.depth_func = ds.depth_compare_op;
        }
        if !g.is_dynamic(D::DS_DEPTH_BOUNDS_TEST_ENABLE) {
            dsa.depth_bounds_test = ds.depth_bounds_test_enable;
        }
        if !g.is_dynamic(D::DS_DEPTH_BOUNDS_TEST_BOUNDS) {
            dsa.depth_bounds_min = f64::from(ds.min_depth_bounds);
            dsa.depth_bounds_max = f64::from(ds.max_depth_bounds);
        }
        if !g.is_dynamic(D::DS_STENCIL_TEST_ENABLE) {
            dsa.stencil[0].enabled = ds.stencil_test_enable;
            dsa.stencil[1].enabled = ds.stencil_test_enable;
        }
        for (face, op) in [&ds.front, &ds.back].into_iter().enumerate() {
            let stencil = &mut dsa.stencil[face];
            if !g.is_dynamic(D::DS_STENCIL_OP) {
                stencil.func = op.compare_op;
                stencil.fail_op = op.fail_op;
                stencil.zpass_op = op.pass_op;
                stencil.zfail_op = op.depth_fail_op;
            }
            if !g.is_dynamic(D::DS_STENCIL_COMPARE_MASK) {
                stencil.valuemask = op.compare_mask as u8;
            }
            if !g.is_dynamic(D::DS_STENCIL_WRITE_MASK) {
                stencil.writemask = op.write_mask as u8;
            }
        }
        if !g.is_dynamic(D::DS_STENCIL_REFERENCE) {
            st.stencil_ref.ref_value = [ds.front.reference as u8, ds.back.reference as u8];
            st.stencil_ref_dirty = true;
        }
        st.dsa_dirty = true;
    }

    fn apply_color_blend(&mut self, g: &GraphicsPipelineState) {
        let st = &mut self.state;
        let Some(cb) = &g.cb else {
            if g.color_attachment_count == 0 {
                st.blend_state = BlendState::default();
                st.blend_state.rt[0].colormask = ColorMask::RGBA;
                st.blend_dirty = true;
            }
            return;
        };
        let blend = &mut st.blend_state;
        if !g.is_dynamic(D::CB_LOGIC_OP_ENABLE) {
            blend.logicop_enable = cb.logic_op_enable;
        }
        if !g.is_dynamic(D::CB_LOGIC_OP) {
            blend.logicop_func = cb.logic_op;
        }
        if !g.is_dynamic(D::CB_COLOR_WRITE_ENABLES) {
            st.color_write_disables = !cb.color_write_enables;
        }
        if !cb.attachments.is_empty() {
            blend.independent_blend_enable = cb.attachments.len() > 1;
            blend.max_rt = (cb.attachments.len().min(blend.rt.len()) - 1) as u8;
        }
        for (rt, att) in blend.rt.iter_mut().zip(&cb.attachments) {
            if !g.is_dynamic(D::CB_WRITE_MASKS) {
                rt.colormask = att.write_mask;
            }
            if !g.is_dynamic(D::CB_BLEND_ENABLES) {
                rt.blend_enable = att.blend_enable;
            }
            if !att.blend_enable {
                let colormask = rt.colormask;
                let blend_enable = rt.blend_enable;
                *rt = RtBlendState {
                    colormask,
                    blend_enable,
                    ..RtBlendState::default()
                };
            } else if !g.is_dynamic(D::CB_BLEND_EQUATIONS) {
                let eq = &att.equation;
                rt.rgb_func = eq.color_op;
                rt.rgb_src_factor = eq.src_color;
                rt.rgb_dst_factor = eq.dst_color;
                rt.alpha_func = eq.alpha_op;
                rt.alpha_src_factor = eq.src_alpha;
                rt.alpha_dst_factor = eq.dst_alpha;
                normalize_blend(rt);
            }
        }
        st.blend_dirty = true;
        if !g.is_dynamic(D::CB_BLEND_CONSTANTS) {
            st.blend_color.color = cb.blend_constants;
            st.blend_color_dirty = true;
        }
    }

    fn apply_multisample(&mut self, g: &GraphicsPipelineState) {
        let st = &mut self.state;
        st.disable_multisample = g.disable_multisample && !g.is_dynamic(D::RS_LINE_MODE);
        match &g.ms {
            Some(ms) => {
                if !g.is_dynamic(D::MS_SAMPLE_MASK) && st.sample_mask != ms.sample_mask {
                    st.sample_mask = ms.sample_mask;
                    st.sample_mask_dirty = true;
                }
                if !g.is_dynamic(D::MS_ALPHA_TO_COVERAGE_ENABLE) {
                    st.blend_state.alpha_to_coverage = ms.alpha_to_coverage_enable;
                }
                if !g.is_dynamic(D::MS_ALPHA_TO_ONE_ENABLE) {
                    st.blend_state.alpha_to_one = ms.alpha_to_one_enable;
                }
                st.force_min_sample = g.force_min_sample;
                st.sample_shading = ms.sample_shading_enable;
                st.min_sample_shading = ms.min_sample_shading;
                st.blend_dirty = true;
                st.min_samples_dirty = true;
                if !g.is_dynamic(D::MS_RASTERIZATION_SAMPLES) {
                    st.update_samples(ms.rasterization_samples);
                }
            }
            None => {
                if !g.is_dynamic(D::MS_SAMPLE_MASK) && !g.is_dynamic(D::MS_ALPHA_TO_ONE_ENABLE) {
                    st.rs_state.multisample = false;
                }
                st.sample_shading = false;
                st.force_min_sample = false;
                if !g.is_dynamic(D::MS_SAMPLE_MASK) {
                    st.sample_mask_dirty = st.sample_mask != !0;
                    st.sample_mask = !0;
                    st.min_samples_dirty = st.min_samples != 0;
                    st.min_samples = 0;
                }
                st.blend_dirty |= st.blend_state.alpha_to_coverage || st.blend_state.alpha_to_one;
                if !g.is_dynamic(D::MS_ALPHA_TO_COVERAGE_ENABLE) {
                    st.blend_state.alpha_to_coverage = false;
                }
                if !g.is_dynamic(D::MS_ALPHA_TO_ONE_ENABLE) {
                    st.blend_state.alpha_to_one = false;
                }
                st.rs_dirty = true;
            }
        }
    }

    fn apply_vertex_input(&mut self, g: &GraphicsPipelineState) {
        let Some(vi) = &g.vi else {
            return;
        };
        if g.is_dynamic(D::VI) {
            return;
        }
        self.load_vertex_input(&vi.bindings, &vi.attributes, !g.is_dynamic(D::VI_BINDING_STRIDES));
    }

    fn apply_input_assembly(&mut self, g: &GraphicsPipelineState) {
        if let Some(ia) = &g.ia {
            if !g.is_dynamic(D::IA_PRIMITIVE_TOPOLOGY) {
                self.state.info.mode = ia.topology;
                self.state.rs_dirty = true;
            }
            if !g.is_dynamic(D::IA_PRIMITIVE_RESTART_ENABLE) {
                self.state.info.primitive_restart = ia.primitive_restart_enable;
            }
        }
        if let Some(ts) = &g.ts {
            if !g.is_dynamic(D::TS_PATCH_CONTROL_POINTS)
                && self.state.patch_vertices != ts.patch_control_points
            {
                self.state.patch_vertices = ts.patch_control_points;
                self.ctx.set_patch_vertices(ts.patch_control_points as u8);
            }
        }
    }

    fn apply_viewports(&mut self, g: &GraphicsPipelineState) {
        let Some(vp) = &g.vp else {
            return;
        };
        let st = &mut self.state;
        if !g.is_dynamic(D::VP_VIEWPORT_COUNT) {
            st.num_viewports = vp.viewport_count;
            st.vp_dirty = true;
        }
        if !g.is_dynamic(D::VP_SCISSOR_COUNT) {
            st.num_scissors = vp.scissor_count;
            st.scissor_dirty = true;
        }
        if !g.is_dynamic(D::VP_VIEWPORTS) {
            for (i, viewport) in vp.viewports.iter().enumerate() {
                st.set_viewport(i, viewport);
            }
            st.vp_dirty = true;
        }
        if !g.is_dynamic(D::VP_SCISSORS) {
            for (i, scissor) in vp.scissors.iter().enumerate() {
                st.set_scissor(i, scissor);
            }
            st.scissor_dirty = true;
        }
        if !g.is_dynamic(D::VP_DEPTH_CLIP_NEGATIVE_ONE_TO_ONE)
            && st.rs_state.clip_halfz == vp.depth_clip_negative_one_to_one
        {
            st.rs_state.clip_halfz = !vp.depth_clip_negative_one_to_one;
            st.rs_dirty = true;
            for i in 0..st.num_viewports as usize {
                st.set_viewport_depth_xform(i);
            }
            st.vp_dirty = true;
        }
    }
}

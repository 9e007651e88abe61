//! Dynamic-state commands. Each one only updates the rendering state and
//! marks the affected group dirty; nothing reaches the context until the
//! next draw.

use aero_pipe::state::{
    ColorMask, CompareFunc, CullFace, LogicOp, PolygonMode, ShaderStage, StencilOp, VertexElement,
    MAX_VERTEX_ELEMENTS,
};
use aero_pipe::{PipeContext, PrimType};

use crate::cmd::{
    ColorBlendEquation, FrontFace, LineRasterizationMode, ProvokingVertex, Rect2D, StencilFaces,
    TessDomainOrigin, Viewport,
};
use crate::execute::{Replay, Result};
use crate::graphics::{VertexAttributeDescription, VertexBindingDescription, VertexInputRate};
use crate::pipeline::normalize_blend;

/// Stencil faces selected by `faces`, as indices into the front/back pair.
fn face_indices(faces: StencilFaces) -> impl Iterator<Item = usize> {
    [StencilFaces::FRONT, StencilFaces::BACK]
        .into_iter()
        .enumerate()
        .filter(move |(_, f)| faces.contains(*f))
        .map(|(i, _)| i)
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    pub(crate) fn set_viewports(&mut self, first: u32, viewports: &[Viewport], with_count: bool) {
        for (i, vp) in viewports.iter().enumerate() {
            self.state.set_viewport(first as usize + i, vp);
        }
        if with_count {
            self.state.num_viewports = viewports.len() as u32;
        }
        self.state.vp_dirty = true;
    }

    pub(crate) fn set_scissors(&mut self, first: u32, scissors: &[Rect2D], with_count: bool) {
        for (i, rect) in scissors.iter().enumerate() {
            self.state.set_scissor(first as usize + i, rect);
        }
        if with_count {
            self.state.num_scissors = scissors.len() as u32;
        }
        self.state.scissor_dirty = true;
    }

    pub(crate) fn set_line_width(&mut self, width: f32) {
        self.state.rs_state.line_width = width;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) {
        let factors = &mut self.state.depth_bias.factors;
        factors.constant = constant;
        factors.clamp = clamp;
        factors.slope = slope;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_blend_constants(&mut self, color: [f32; 4]) {
        self.state.blend_color.color = color;
        self.state.blend_color_dirty = true;
    }

    pub(crate) fn set_depth_bounds(&mut self, min: f32, max: f32) {
        self.state.dsa_state.depth_bounds_min = f64::from(min);
        self.state.dsa_state.depth_bounds_max = f64::from(max);
        self.state.dsa_dirty = true;
    }

    pub(crate) fn set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u32) {
        for i in face_indices(faces) {
            self.state.dsa_state.stencil[i].valuemask = mask as u8;
        }
        self.state.dsa_dirty = true;
    }

    pub(crate) fn set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u32) {
        for i in face_indices(faces) {
            self.state.dsa_state.stencil[i].writemask = mask as u8;
        }
        self.state.dsa_dirty = true;
    }

    pub(crate) fn set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) {
        for i in face_indices(faces) {
            self.state.stencil_ref.ref_value[i] = reference as u8;
        }
        self.state.stencil_ref_dirty = true;
    }

    pub(crate) fn set_cull_mode(&mut self, mode: CullFace) {
        self.state.rs_state.cull_face = mode;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_front_face(&mut self, face: FrontFace) {
        self.state.rs_state.front_ccw = face == FrontFace::CounterClockwise;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_primitive_topology(&mut self, topology: PrimType) {
        self.state.info.mode = topology;
        // Multisample suppression depends on the reduced primitive.
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_depth_test_enable(&mut self, enable: bool) {
        self.state.dsa_dirty |= self.state.dsa_state.depth_enabled != enable;
        self.state.dsa_state.depth_enabled = enable;
    }

    pub(crate) fn set_depth_write_enable(&mut self, enable: bool) {
        self.state.dsa_dirty |= self.state.dsa_state.depth_writemask != enable;
        self.state.dsa_state.depth_writemask = enable;
    }

    pub(crate) fn set_depth_compare_op(&mut self, op: CompareFunc) {
        self.state.dsa_dirty |= self.state.dsa_state.depth_func != op;
        self.state.dsa_state.depth_func = op;
    }

    pub(crate) fn set_depth_bounds_test_enable(&mut self, enable: bool) {
        self.state.dsa_dirty |= self.state.dsa_state.depth_bounds_test != enable;
        self.state.dsa_state.depth_bounds_test = enable;
    }

    pub(crate) fn set_stencil_test_enable(&mut self, enable: bool) {
        let stencil = &mut self.state.dsa_state.stencil;
        self.state.dsa_dirty |= stencil[0].enabled != enable || stencil[1].enabled != enable;
        stencil[0].enabled = enable;
        stencil[1].enabled = enable;
    }

    pub(crate) fn set_stencil_op(
        &mut self,
        faces: StencilFaces,
        fail_op: StencilOp,
        pass_op: StencilOp,
        depth_fail_op: StencilOp,
        compare_op: CompareFunc,
    ) {
        for i in face_indices(faces) {
            let stencil = &mut self.state.dsa_state.stencil[i];
            stencil.fail_op = fail_op;
            stencil.zpass_op = pass_op;
            stencil.zfail_op = depth_fail_op;
            stencil.func = compare_op;
        }
        self.state.dsa_dirty = true;
    }

    pub(crate) fn set_line_stipple(&mut self, factor: u32, pattern: u16) {
        self.state.rs_state.line_stipple_factor = factor.saturating_sub(1);
        self.state.rs_state.line_stipple_pattern = pattern;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_line_stipple_enable(&mut self, enable: bool) {
        self.state.rs_state.line_stipple_enable = enable;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_depth_bias_enable(&mut self, enable: bool) {
        self.state.rs_dirty |= self.state.depth_bias.enabled != enable;
        self.state.depth_bias.enabled = enable;
    }

    pub(crate) fn set_logic_op(&mut self, op: LogicOp) {
        self.state.blend_state.logicop_func = op;
        self.state.blend_dirty = true;
    }

    pub(crate) fn set_logic_op_enable(&mut self, enable: bool) {
        self.state.blend_state.logicop_enable = enable;
        self.state.blend_dirty = true;
    }

    pub(crate) fn set_patch_control_points(&mut self, points: u32) {
        if self.state.patch_vertices != points {
            self.state.patch_vertices = points;
            self.ctx.set_patch_vertices(points as u8);
        }
    }

    pub(crate) fn set_primitive_restart_enable(&mut self, enable: bool) {
        self.state.info.primitive_restart = enable;
    }

    pub(crate) fn set_rasterizer_discard_enable(&mut self, enable: bool) {
        self.state.rs_dirty |= self.state.rs_state.rasterizer_discard != enable;
        self.state.rs_state.rasterizer_discard = enable;
    }

    pub(crate) fn set_color_write_enable(&mut self, enables: &[bool]) {
        let disables = enables
            .iter()
            .enumerate()
            .filter(|(_, enabled)| !**enabled)
            .fold(0u8, |mask, (i, _)| mask | (1 << i));
        if self.state.color_write_disables != disables {
            self.state.color_write_disables = disables;
            self.state.blend_dirty = true;
        }
    }

    pub(crate) fn set_polygon_mode(&mut self, mode: PolygonMode) {
        let rs = &mut self.state.rs_state;
        if rs.fill_front != mode || rs.fill_back != mode {
            rs.fill_front = mode;
            rs.fill_back = mode;
            self.state.rs_dirty = true;
        }
    }

    /// Switch the tessellation winding, rebinding the evaluation shader
    /// built for it.
    pub(crate) fn set_tess_domain_origin(&mut self, origin: TessDomainOrigin) -> Result<()> {
        let ccw = origin == TessDomainOrigin::LowerLeft;
        self.state.tess_ccw = ccw;
        let stage = ShaderStage::TessEval;
        let inline = self.state.shaders[stage.index()]
            .as_ref()
            .is_some_and(|shader| shader.can_inline());
        if inline {
            self.state.inlines_dirty[stage.index()] = true;
        } else if let Some(handle) = self.state.tess_states[usize::from(ccw)] {
            self.binder.bind_shader(self.ctx, stage, Some(handle));
        }
        Ok(())
    }

    pub(crate) fn set_depth_clamp_enable(&mut self, enable: bool) {
        let rs = &mut self.state.rs_state;
        rs.depth_clamp = enable;
        if self.state.depth_clamp_sets_clip {
            rs.depth_clip_near = !enable;
            rs.depth_clip_far = !enable;
        }
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_depth_clip_enable(&mut self, enable: bool) {
        self.state.rs_state.depth_clip_near = enable;
        self.state.rs_state.depth_clip_far = enable;
        self.state.depth_clamp_sets_clip = false;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_sample_mask(&mut self, mask: u32) {
        self.state.sample_mask = mask;
        self.state.sample_mask_dirty = true;
    }

    pub(crate) fn set_rasterization_samples(&mut self, samples: u32) {
        self.state.update_samples(samples);
    }

    pub(crate) fn set_alpha_to_coverage_enable(&mut self, enable: bool) {
        self.state.blend_state.alpha_to_coverage = enable;
        self.state.blend_dirty = true;
    }

    pub(crate) fn set_alpha_to_one_enable(&mut self, enable: bool) {
        self.state.blend_state.alpha_to_one = enable;
        self.state.blend_dirty = true;
    }

    pub(crate) fn set_depth_clip_negative_one_to_one(&mut self, enable: bool) {
        if self.state.rs_state.clip_halfz != !enable {
            self.state.rs_state.clip_halfz = !enable;
            self.state.rs_dirty = true;
            for i in 0..self.state.num_viewports as usize {
                self.state.set_viewport_depth_xform(i);
            }
            self.state.vp_dirty = true;
        }
    }

    pub(crate) fn set_line_rasterization_mode(&mut self, mode: LineRasterizationMode) {
        let rs = &mut self.state.rs_state;
        rs.line_smooth = mode == LineRasterizationMode::RectangularSmooth;
        rs.line_rectangular = mode != LineRasterizationMode::Bresenham;
        self.state.disable_multisample = matches!(
            mode,
            LineRasterizationMode::Bresenham | LineRasterizationMode::RectangularSmooth
        );
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_provoking_vertex(&mut self, mode: ProvokingVertex) {
        self.state.rs_state.flatshade_first = mode == ProvokingVertex::FirstVertex;
        self.state.rs_dirty = true;
    }

    pub(crate) fn set_color_blend_enable(&mut self, first: u32, enables: &[bool]) {
        for (rt, enable) in self.state.blend_state.rt.iter_mut().skip(first as usize).zip(enables) {
            if rt.blend_enable != *enable {
                rt.blend_enable = *enable;
                self.state.blend_dirty = true;
            }
        }
    }

    pub(crate) fn set_color_blend_equation(&mut self, first: u32, equations: &[ColorBlendEquation]) {
        let rts = self.state.blend_state.rt.iter_mut().skip(first as usize);
        for (rt, eq) in rts.zip(equations) {
            rt.rgb_func = eq.color_op;
            rt.rgb_src_factor = eq.src_color;
            rt.rgb_dst_factor = eq.dst_color;
            rt.alpha_func = eq.alpha_op;
            rt.alpha_src_factor = eq.src_alpha;
            rt.alpha_dst_factor = eq.dst_alpha;
            normalize_blend(rt);
        }
        self.state.blend_dirty = true;
    }

    pub(crate) fn set_color_write_mask(&mut self, first: u32, masks: &[ColorMask]) {
        for (rt, mask) in self.state.blend_state.rt.iter_mut().skip(first as usize).zip(masks) {
            if rt.colormask != *mask {
                rt.colormask = *mask;
                self.state.blend_dirty = true;
            }
        }
    }

    pub(crate) fn set_vertex_input(
        &mut self,
        bindings: &[VertexBindingDescription],
        attributes: &[VertexAttributeDescription],
    ) {
        self.load_vertex_input(bindings, attributes, true);
    }

    /// Rebuild the vertex elements from binding and attribute descriptions.
    /// Strides are only taken over when `with_strides` is set.
    pub(crate) fn load_vertex_input(
        &mut self,
        bindings: &[VertexBindingDescription],
        attributes: &[VertexAttributeDescription],
        with_strides: bool,
    ) {
        let st = &mut self.state;
        st.velem = [VertexElement::default(); MAX_VERTEX_ELEMENTS];
        st.vertex_binding = [0; MAX_VERTEX_ELEMENTS];
        let mut count = 0;
        for attr in attributes {
            let location = attr.location as usize;
            let binding = bindings.iter().find(|b| b.binding == attr.binding);
            let el = &mut st.velem[location];
            el.src_offset = attr.offset;
            el.src_format = attr.format;
            el.instance_divisor = match binding {
                Some(b) if b.input_rate == VertexInputRate::Instance => {
                    if b.divisor == 0 {
                        u32::MAX
                    } else {
                        b.divisor
                    }
                }
                _ => 0,
            };
            st.vertex_binding[location] = attr.binding;
            count = count.max(location as u32 + 1);
        }
        st.velem_count = count;
        if with_strides {
            for b in bindings {
                st.vb_strides[b.binding as usize] = b.stride;
            }
            st.vb_strides_dirty = true;
        }
        st.vb_dirty = true;
        st.ve_dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_faces_map_to_front_back_slots() {
        assert_eq!(face_indices(StencilFaces::FRONT).collect::<Vec<_>>(), [0]);
        assert_eq!(face_indices(StencilFaces::BACK).collect::<Vec<_>>(), [1]);
        assert_eq!(
            face_indices(StencilFaces::FRONT_AND_BACK).collect::<Vec<_>>(),
            [0, 1]
        );
    }
}

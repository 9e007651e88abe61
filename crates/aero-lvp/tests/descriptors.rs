mod common;

use std::sync::Arc;

use aero_lvp::cmd::{PipelineBindPoint, WHOLE_SIZE};
use aero_lvp::descriptor::{
    read_descriptor, DescriptorData, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBinding, DescriptorType, DescriptorUpdateTemplate, DescriptorWrite,
    TemplateEntry, DESCRIPTOR_SIZE,
};
use aero_lvp::graphics::GraphicsPipelineState;
use aero_lvp::objects::{Buffer, PipelineLayout};
use aero_lvp::Cmd;
use aero_pipe::state::{ShaderStage, ShaderStages};
use aero_pipe::Resource;
use common::{draw, Harness};
use pretty_assertions::assert_eq;

fn layout(h: &Harness, ty: DescriptorType) -> Arc<DescriptorSetLayout> {
    DescriptorSetLayout::new(
        h.screen(),
        vec![DescriptorSetLayoutBinding {
            binding: 0,
            ty,
            count: 1,
            stages: ShaderStages::VERTEX,
            immutable_samplers: Vec::new(),
        }],
    )
}

fn pipeline_layout(set: Arc<DescriptorSetLayout>) -> Arc<PipelineLayout> {
    Arc::new(PipelineLayout {
        set_layouts: vec![Some(set)],
        ..PipelineLayout::default()
    })
}

fn buffer_data(buffer: &Arc<Buffer>, offset: u64) -> DescriptorData {
    DescriptorData::Buffer {
        buffer: buffer.clone(),
        offset,
        range: WHOLE_SIZE,
    }
}

/// The backing store bound for descriptor set 0 of the vertex stage.
fn bound_set_bo(h: &Harness) -> (Arc<Resource>, u64) {
    let cb = h
        .ctx
        .constant_buffer(ShaderStage::Vertex, 1)
        .expect("set 0 is bound as constant buffer 1");
    let bo = cb.buffer.clone().expect("descriptor sets are resource-backed");
    (bo, u64::from(cb.buffer_offset))
}

#[test]
fn dynamic_offsets_patch_a_private_copy() {
    let mut h = Harness::new();
    let set_layout = layout(&h, DescriptorType::UniformBufferDynamic);
    let ubo = h.device.create_buffer(1024);
    let set = DescriptorSet::new(h.screen(), &set_layout);
    set.write(&DescriptorWrite {
        binding: 0,
        array_element: 0,
        data: vec![buffer_data(&ubo, 0)],
    });
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());

    let report = h.run(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        Cmd::BindDescriptorSets {
            stages: ShaderStages::VERTEX,
            layout: pipeline_layout(set_layout),
            first_set: 0,
            sets: vec![Some(set.clone())],
            dynamic_offsets: vec![256],
        },
        draw(3),
    ]);
    assert!(report.is_ok());

    let (bo, offset) = bound_set_bo(&h);
    assert_ne!(bo.id(), set.bo.id());
    let bound = read_descriptor(&bo, offset, 0).expect("descriptor in bounds");
    assert_eq!(bound.address, ubo.address + 256);
    assert_eq!(set.descriptor(0).map(|d| d.address), Some(ubo.address));
    assert_eq!(h.executor.stats().snapshot().throwaway_sets, 1);
}

#[test]
fn push_descriptors_build_on_the_bound_set() {
    let mut h = Harness::new();
    let set_layout = DescriptorSetLayout::new(
        h.screen(),
        (0..2)
            .map(|binding| DescriptorSetLayoutBinding {
                binding,
                ty: DescriptorType::StorageBuffer,
                count: 1,
                stages: ShaderStages::VERTEX,
                immutable_samplers: Vec::new(),
            })
            .collect(),
    );
    let layout = pipeline_layout(set_layout.clone());
    let a = h.device.create_buffer(64);
    let b = h.device.create_buffer(64);
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());

    let template = Arc::new(DescriptorUpdateTemplate {
        bind_point: PipelineBindPoint::Graphics,
        entries: vec![TemplateEntry {
            binding: 1,
            array_element: 0,
            count: 1,
            offset: 0,
            stride: 1,
        }],
    });
    let report = h.run(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        Cmd::PushDescriptorSet {
            stages: ShaderStages::VERTEX,
            layout: layout.clone(),
            set: 0,
            writes: vec![DescriptorWrite {
                binding: 0,
                array_element: 0,
                data: vec![buffer_data(&a, 16)],
            }],
        },
        Cmd::PushDescriptorSetWithTemplate {
            template,
            layout,
            set: 0,
            data: vec![buffer_data(&b, 0)],
        },
        draw(3),
    ]);
    assert!(report.is_ok(), "{:?}", report.events);

    let (bo, offset) = bound_set_bo(&h);
    let first = read_descriptor(&bo, offset, 0).expect("descriptor 0");
    let second = read_descriptor(&bo, offset, 1).expect("descriptor 1");
    assert_eq!(first.address, a.address + 16);
    assert_eq!(second.address, b.address);
    assert_eq!(h.executor.stats().snapshot().throwaway_sets, 2);
    // Throwaway sets are retired behind a fence at the end of the submission.
    assert!(matches!(
        h.ctx.calls().last(),
        Some(aero_pipe::PipeCall::FenceFinish(_))
    ));
}

#[test]
fn descriptor_buffers_bind_at_an_offset() {
    let mut h = Harness::new();
    let set_layout = layout(&h, DescriptorType::UniformBuffer);
    let heap = h.device.create_buffer(1024);
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());

    let report = h.run(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        Cmd::BindDescriptorBuffers {
            addresses: vec![heap.address],
        },
        Cmd::SetDescriptorBufferOffsets {
            stages: ShaderStages::VERTEX,
            layout: pipeline_layout(set_layout),
            first_set: 0,
            buffer_indices: vec![0],
            offsets: vec![4 * DESCRIPTOR_SIZE],
        },
        draw(3),
    ]);
    assert!(report.is_ok(), "{:?}", report.events);

    let cb = h
        .ctx
        .constant_buffer(ShaderStage::Vertex, 1)
        .expect("descriptor buffer bound as constant buffer 1");
    assert_eq!(cb.buffer.as_ref().map(|b| b.id()), Some(heap.resource.id()));
    assert_eq!(u64::from(cb.buffer_offset), 4 * DESCRIPTOR_SIZE);
    assert_eq!(u64::from(cb.buffer_size), 1024 - 4 * DESCRIPTOR_SIZE);
}

#[test]
fn unknown_descriptor_buffer_addresses_are_reported() {
    let mut h = Harness::new();
    let report = h.run(vec![Cmd::BindDescriptorBuffers {
        addresses: vec![0xdead_0000_0000],
    }]);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors, vec![(0, "missing descriptor buffer")]);
}

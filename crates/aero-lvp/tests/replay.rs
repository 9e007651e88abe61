mod common;

use std::sync::Arc;

use aero_lvp::cmd::{IndexType, PipelineBindPoint, PipelineStageFlags, Viewport};
use aero_lvp::graphics::GraphicsPipelineState;
use aero_lvp::{Cmd, CommandBuffer, ReplayConfig};
use aero_pipe::PipeCall;
use common::{draw, Harness};
use pretty_assertions::assert_eq;

fn viewport() -> Cmd {
    Cmd::SetViewport {
        first: 0,
        viewports: vec![Viewport {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 64.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }],
    }
}

#[test]
fn draw_flushes_state_once_and_records_a_direct_draw() {
    let mut h = Harness::new();
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());
    let report = h.run(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        viewport(),
        draw(3),
        draw(3),
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(report.commands_processed, 4);

    let draws = h.ctx.draws();
    assert_eq!(draws.len(), 2);
    for d in &draws {
        assert_eq!((d.start, d.count, d.instance_count), (0, 3, 1));
        assert_eq!(d.start_instance, 0);
        assert_eq!(d.index_size, 0);
    }
    assert_eq!(
        h.ctx.count(|c| matches!(c, PipeCall::BufferMap { .. })),
        0,
        "direct draws read nothing back"
    );
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::SetViewports { .. })), 1);

    let stats = h.executor.stats().snapshot();
    assert_eq!(stats.draws, 2);
    assert_eq!(stats.state_flushes, 1);
}

#[test]
fn repeated_submissions_reuse_cached_state_objects() {
    let mut h = Harness::new();
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());
    let cmds = vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        viewport(),
        draw(3),
    ];

    assert!(h.run(cmds.clone()).is_ok());
    assert!(h.ctx.count(PipeCall::is_state_creation) > 0);
    h.ctx.take_calls();

    assert!(h.run(cmds).is_ok());
    assert_eq!(h.ctx.count(PipeCall::is_state_creation), 0);
    assert_eq!(h.ctx.draws().len(), 1);
}

#[test]
fn consecutive_barriers_share_one_flush() {
    let mut h = Harness::new();
    let report = h.run(vec![
        draw(3),
        Cmd::PipelineBarrier,
        Cmd::PipelineBarrier,
        Cmd::PipelineBarrier,
        draw(3),
        Cmd::PipelineBarrier,
    ]);

    assert!(report.is_ok());
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Flush)), 1);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::FenceFinish(_))), 1);
    let stats = h.executor.stats().snapshot();
    assert_eq!(stats.barriers_executed, 1);
    assert_eq!(stats.barriers_coalesced, 3);
}

#[test]
fn barriers_at_the_edges_of_a_list_are_skipped() {
    let mut h = Harness::new();
    let report = h.run(vec![Cmd::PipelineBarrier, draw(3), Cmd::PipelineBarrier]);

    assert!(report.is_ok());
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Flush)), 0);
    assert_eq!(h.ctx.draws().len(), 1);
    let stats = h.executor.stats().snapshot();
    assert_eq!(stats.barriers_executed, 0);
    assert_eq!(stats.barriers_coalesced, 2);
}

#[test]
fn index_ranges_saturate_instead_of_overflowing() {
    let mut h = Harness::new();
    let indices = h.device.create_buffer(32);
    let report = h.run(vec![
        Cmd::BindIndexBuffer {
            buffer: Some(indices),
            offset: 8,
            size: None,
            index_type: IndexType::U32,
        },
        Cmd::DrawIndexed {
            index_count: 3,
            instance_count: 1,
            first_index: u32::MAX,
            vertex_offset: 0,
            first_instance: 0,
        },
        Cmd::DrawIndexed {
            index_count: 2,
            instance_count: 1,
            first_index: 1,
            vertex_offset: 0,
            first_instance: 0,
        },
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    let draws: Vec<_> = h.ctx.draws().iter().map(|d| (d.start, d.count)).collect();
    // Past the end of the 6 bound indices, nothing is left to draw.
    assert_eq!(draws, vec![(3, 2)]);
}

#[test]
fn secondary_buffers_inherit_bound_state() {
    let mut h = Harness::new();
    let pipeline = h.vs_pipeline(GraphicsPipelineState::default());
    let secondary = CommandBuffer::new(vec![draw(6), draw(9)]);
    let report = h.run(vec![
        Cmd::BindPipeline {
            bind_point: PipelineBindPoint::Graphics,
            pipeline,
        },
        viewport(),
        Cmd::ExecuteCommands(vec![secondary.clone(), secondary]),
    ]);

    assert!(report.is_ok());
    assert_eq!(report.commands_processed, 3 + 4);
    let counts: Vec<u32> = h.ctx.draws().iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![6, 9, 6, 9]);
    assert_eq!(h.executor.stats().snapshot().state_flushes, 1);
}

#[test]
fn nesting_past_the_limit_is_reported_and_skipped() {
    let mut h = Harness::with_config(ReplayConfig {
        max_replay_depth: 1,
        ..ReplayConfig::default()
    });
    let inner = CommandBuffer::new(vec![draw(30)]);
    let outer = CommandBuffer::new(vec![draw(3), Cmd::ExecuteCommands(vec![inner])]);
    let report = h.run(vec![Cmd::ExecuteCommands(vec![outer]), draw(4)]);

    assert!(!report.is_ok());
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, 2);
    assert!(
        errors[0].1.contains("depth 2 exceeds the limit of 1"),
        "{}",
        errors[0].1
    );

    let counts: Vec<u32> = h.ctx.draws().iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![3, 4]);
}

#[test]
fn failed_commands_do_not_stop_replay() {
    let mut h = Harness::new();
    let event = h.device.create_event();
    let report = h.run(vec![
        Cmd::WaitEvents {
            events: vec![event.clone()],
        },
        Cmd::SetEvent {
            event: event.clone(),
            stages: PipelineStageFlags::BOTTOM_OF_PIPE,
        },
        Cmd::WaitEvents {
            events: vec![event.clone()],
        },
        draw(3),
    ]);

    let errors: Vec<_> = report.errors().map(|(at, _)| at).collect();
    assert_eq!(errors, vec![0]);
    assert!(event.is_set());
    assert_eq!(h.ctx.draws().len(), 1);
}

#[test]
fn top_of_pipe_event_writes_flush_first() {
    let mut h = Harness::new();
    let event = h.device.create_event();
    h.run(vec![Cmd::SetEvent {
        event: event.clone(),
        stages: PipelineStageFlags::TOP_OF_PIPE,
    }]);
    assert_eq!(h.ctx.calls().first(), Some(&PipeCall::Flush));

    h.ctx.take_calls();
    h.run(vec![Cmd::ResetEvent {
        event: event.clone(),
        stages: PipelineStageFlags::TRANSFER,
    }]);
    assert!(!event.is_set());
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Flush)), 0);
}

#[test]
fn executor_stats_outlive_the_submission() {
    let mut h = Harness::new();
    let stats = Arc::clone(h.executor.stats());
    h.run(vec![draw(3), Cmd::Dispatch { x: 1, y: 1, z: 1 }]);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.commands_executed, 2);
    assert_eq!(snapshot.draws, 1);
    assert_eq!(snapshot.dispatches, 1);
}

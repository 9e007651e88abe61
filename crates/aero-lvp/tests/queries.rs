mod common;

use aero_lvp::cmd::{
    IndirectBuffer, PipelineStageFlags, QueryControlFlags, QueryResultFlags, XfbBuffer, XfbCounter,
};
use aero_lvp::objects::QueryPoolType;
use aero_lvp::Cmd;
use aero_pipe::PipeCall;
use common::{draw, words, Harness};
use pretty_assertions::assert_eq;

fn read_words(buffer: &aero_lvp::objects::Buffer, count: u64) -> Vec<u32> {
    buffer
        .resource
        .read(0, count * 4)
        .expect("buffer in bounds")
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

#[test]
fn precise_occlusion_counts_drawn_vertices() {
    let mut h = Harness::new();
    let pool = h.device.create_query_pool(QueryPoolType::Occlusion, 2);
    let results = h.device.create_buffer(16);
    let report = h.run(vec![
        Cmd::BeginQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
            flags: QueryControlFlags::PRECISE,
        },
        draw(3),
        Cmd::Draw {
            vertex_count: 4,
            instance_count: 2,
            first_vertex: 0,
            first_instance: 0,
        },
        Cmd::EndQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
        },
        Cmd::CopyQueryPoolResults {
            pool,
            first: 0,
            count: 2,
            dst: results.clone(),
            dst_offset: 0,
            stride: 8,
            flags: QueryResultFlags::WAIT | QueryResultFlags::WITH_AVAILABILITY,
        },
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    // Query 1 never began, so its slot reads as unavailable.
    assert_eq!(read_words(&results, 4), vec![11, 1, 0, 0]);
}

#[test]
fn ending_a_query_that_never_began_is_reported() {
    let mut h = Harness::new();
    let pool = h.device.create_query_pool(QueryPoolType::Occlusion, 1);
    let report = h.run(vec![Cmd::EndQuery {
        pool,
        query: 0,
        index: 0,
    }]);
    let errors: Vec<_> = report.errors().collect();
    assert_eq!(errors, vec![(0, "missing active query")]);
}

#[test]
fn reset_destroys_backend_queries() {
    let mut h = Harness::new();
    let pool = h.device.create_query_pool(QueryPoolType::Timestamp, 4);
    h.run(vec![
        Cmd::WriteTimestamp {
            pool: pool.clone(),
            query: 1,
            stage: PipelineStageFlags::BOTTOM_OF_PIPE,
        },
        Cmd::ResetQueryPool {
            pool: pool.clone(),
            first: 0,
            count: 4,
        },
    ]);

    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::CreateQuery(_))), 1);
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::DestroyQuery(_))), 1);
    assert_eq!(pool.get(1), None);
}

#[test]
fn bottom_of_pipe_timestamps_flush_first() {
    let mut h = Harness::new();
    let pool = h.device.create_query_pool(QueryPoolType::Timestamp, 2);
    h.run(vec![
        Cmd::WriteTimestamp {
            pool: pool.clone(),
            query: 0,
            stage: PipelineStageFlags::TOP_OF_PIPE,
        },
        Cmd::WriteTimestamp {
            pool: pool.clone(),
            query: 1,
            stage: PipelineStageFlags::BOTTOM_OF_PIPE,
        },
    ]);

    let kinds: Vec<&str> = h
        .ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            PipeCall::Flush => Some("flush"),
            PipeCall::EndQuery(_) => Some("end"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["end", "flush", "end"]);
}

#[test]
fn statistics_results_are_packed_per_counter() {
    use aero_lvp::cmd::QueryPipelineStatistics as S;

    let mut h = Harness::new();
    let stats = S::INPUT_ASSEMBLY_VERTICES | S::CLIPPING_PRIMITIVES;
    let pool = h
        .device
        .create_query_pool(QueryPoolType::PipelineStatistics(stats), 1);
    let results = h.device.create_buffer(64);
    let report = h.run(vec![
        Cmd::BeginQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
            flags: QueryControlFlags::empty(),
        },
        Cmd::EndQuery {
            pool: pool.clone(),
            query: 0,
            index: 0,
        },
        Cmd::CopyQueryPoolResults {
            pool,
            first: 0,
            count: 1,
            dst: results,
            dst_offset: 0,
            stride: 24,
            flags: QueryResultFlags::RESULT_64 | QueryResultFlags::WITH_AVAILABILITY,
        },
    ]);
    assert!(report.is_ok());

    let indices: Vec<i32> = h
        .ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            PipeCall::GetQueryResult { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(indices, vec![-1, 0, 6]);
}

#[test]
fn transform_feedback_resumes_from_and_saves_counters() {
    let mut h = Harness::new();
    let target = h.device.create_buffer(256);
    let resume = h.device.create_buffer(4);
    let saved = h.device.create_buffer(8);
    assert!(resume.resource.write(0, &words(&[48])));

    let report = h.run(vec![
        Cmd::BindTransformFeedbackBuffers {
            first: 0,
            buffers: vec![XfbBuffer {
                buffer: target.clone(),
                offset: 0,
                size: None,
            }],
        },
        Cmd::BeginTransformFeedback {
            first_counter: 0,
            counters: vec![Some(XfbCounter {
                buffer: resume,
                offset: 0,
            })],
        },
        draw(3),
        Cmd::EndTransformFeedback {
            first_counter: 0,
            counters: vec![Some(XfbCounter {
                buffer: saved.clone(),
                offset: 4,
            })],
        },
        Cmd::DrawIndirectByteCount {
            instance_count: 1,
            first_instance: 0,
            counter: IndirectBuffer::new(&saved, 4),
            counter_offset: 0,
            vertex_stride: 16,
        },
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(read_words(&saved, 2), vec![0, 48]);
    let sets: Vec<usize> = h
        .ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            PipeCall::SetStreamOutputTargets { count } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(sets, vec![1, 0]);
    assert!(h.ctx.stream_output_targets().is_empty());

    let counts: Vec<u32> = h.ctx.draws().iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![3, 3]);
}

#[test]
fn conditional_rendering_is_bracketed() {
    let mut h = Harness::new();
    let predicate = h.device.create_buffer(16);
    h.run(vec![
        Cmd::BeginConditionalRendering {
            buffer: predicate.clone(),
            offset: 8,
            inverted: true,
        },
        draw(3),
        Cmd::EndConditionalRendering,
    ]);

    let conditions: Vec<_> = h
        .ctx
        .calls()
        .iter()
        .filter_map(|c| match c {
            PipeCall::RenderCondition { buffer, offset, inverted } => {
                Some((*buffer, *offset, *inverted))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        conditions,
        vec![(Some(predicate.resource.id()), 8, true), (None, 0, false)]
    );
}

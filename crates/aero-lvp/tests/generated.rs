mod common;

use std::sync::Arc;

use aero_lvp::cmd::IndirectBuffer;
use aero_lvp::generated::{
    GeneratedCommandsInfo, IndirectCommandsLayout, IndirectCommandsToken, IndirectStream,
    IndirectTokenKind, MAX_INDIRECT_STREAMS,
};
use aero_lvp::graphics::GraphicsPipelineState;
use aero_lvp::objects::Buffer;
use aero_lvp::{Cmd, ReplayConfig};
use aero_pipe::PipeCall;
use anyhow::{Context, Result};
use common::{words, Harness};
use pretty_assertions::assert_eq;

/// Per sequence: a state-flags word, then draw arguments
/// `{vertex_count, instance_count, first_vertex, first_instance}`.
const STRIDE: u32 = 20;

fn layout() -> Arc<IndirectCommandsLayout> {
    Arc::new(IndirectCommandsLayout {
        tokens: vec![
            IndirectCommandsToken {
                stream: 0,
                offset: 0,
                kind: IndirectTokenKind::StateFlags { front_face: true },
            },
            IndirectCommandsToken {
                stream: 0,
                offset: 4,
                kind: IndirectTokenKind::Draw,
            },
        ],
        stream_strides: vec![STRIDE],
    })
}

/// A stream whose sequence `i` draws `vertex_counts[i]` vertices.
fn stream(h: &Harness, vertex_counts: &[u32]) -> Arc<Buffer> {
    let buffer = h.device.create_buffer(STRIDE * vertex_counts.len() as u32);
    for (i, &count) in vertex_counts.iter().enumerate() {
        let flags = (i % 2) as u32;
        let seq = words(&[flags, count, 1, 0, 0]);
        assert!(buffer.resource.write(u64::from(STRIDE) * i as u64, &seq));
    }
    buffer
}

fn info(h: &Harness, stream: &Arc<Buffer>, sequences: u32) -> GeneratedCommandsInfo {
    GeneratedCommandsInfo {
        layout: layout(),
        pipeline: h.vs_pipeline(GraphicsPipelineState::default()),
        streams: vec![IndirectStream {
            buffer: stream.clone(),
            offset: 0,
        }],
        sequences_count: sequences,
        preprocess_buffer: h.device.create_buffer(4096),
        preprocess_offset: 0,
        preprocess_size: 4096,
        sequences_count_buffer: None,
        sequences_index_buffer: None,
    }
}

fn draw_counts(h: &Harness) -> Vec<u32> {
    h.ctx.draws().iter().map(|d| d.count).collect()
}

#[test]
fn each_sequence_replays_its_tokens() {
    let mut h = Harness::new();
    let stream = stream(&h, &[3, 6, 9]);
    let info = Arc::new(info(&h, &stream, 3));
    let report = h.run(vec![Cmd::ExecuteGeneratedCommands {
        info,
        is_preprocessed: false,
    }]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(draw_counts(&h), vec![3, 6, 9]);
    // One execute command plus a front face and a draw per sequence.
    assert_eq!(report.commands_processed, 1 + 3 * 2);
    assert_eq!(h.executor.stats().snapshot().generated_sequences, 3);
}

#[test]
fn count_buffer_caps_the_sequence_count() {
    let mut h = Harness::new();
    let stream = stream(&h, &[3, 6, 9]);
    let count = h.device.create_buffer(4);
    assert!(count.resource.write(0, &words(&[2])));
    let info = Arc::new(GeneratedCommandsInfo {
        sequences_count_buffer: Some(IndirectBuffer::new(&count, 0)),
        ..info(&h, &stream, 3)
    });
    h.run(vec![Cmd::ExecuteGeneratedCommands {
        info,
        is_preprocessed: false,
    }]);

    assert_eq!(draw_counts(&h), vec![3, 6]);
}

#[test]
fn too_many_streams_are_rejected() {
    let mut h = Harness::new();
    let stream = stream(&h, &[3]);
    let base = info(&h, &stream, 1);
    let extra = base.streams[0].clone();
    let info = Arc::new(GeneratedCommandsInfo {
        streams: vec![extra; MAX_INDIRECT_STREAMS + 1],
        ..base
    });
    let report = h.run(vec![Cmd::ExecuteGeneratedCommands {
        info,
        is_preprocessed: false,
    }]);

    assert!(!report.is_ok());
    let (_, message) = report.errors().next().expect("one error");
    assert!(message.contains("exceed the limit of 16"), "{message}");
    assert!(h.ctx.draws().is_empty());
}

#[test]
fn index_buffer_reorders_sequences() {
    let mut h = Harness::new();
    let stream = stream(&h, &[3, 6, 9]);
    let order = h.device.create_buffer(8);
    assert!(order.resource.write(0, &words(&[2, 0])));
    let info = Arc::new(GeneratedCommandsInfo {
        sequences_index_buffer: Some(IndirectBuffer::new(&order, 0)),
        ..info(&h, &stream, 2)
    });
    h.run(vec![Cmd::ExecuteGeneratedCommands {
        info,
        is_preprocessed: false,
    }]);

    assert_eq!(draw_counts(&h), vec![9, 3]);
}

#[test]
fn preprocessed_lists_are_not_rebuilt() -> Result<()> {
    let mut h = Harness::new();
    let stream = stream(&h, &[5, 7]);
    let info = Arc::new(info(&h, &stream, 2));
    let report = h.run(vec![
        Cmd::PreprocessGeneratedCommands(info.clone()),
        Cmd::PipelineBarrier,
        Cmd::ExecuteGeneratedCommands {
            info: info.clone(),
            is_preprocessed: true,
        },
    ]);

    assert!(report.is_ok(), "{:?}", report.events);
    assert_eq!(draw_counts(&h), vec![5, 7]);
    assert_eq!(h.executor.stats().snapshot().generated_sequences, 2);

    let header = info
        .preprocess_buffer
        .resource
        .read(0, 8)
        .context("preprocess buffer in bounds")?;
    assert_eq!(&header[4..8], &4u32.to_le_bytes(), "two records per sequence");
    Ok(())
}

#[test]
fn generated_commands_count_toward_the_nesting_limit() {
    let mut h = Harness::with_config(ReplayConfig {
        max_replay_depth: 0,
        ..ReplayConfig::default()
    });
    let stream = stream(&h, &[3]);
    let info = Arc::new(info(&h, &stream, 1));
    let report = h.run(vec![Cmd::ExecuteGeneratedCommands {
        info,
        is_preprocessed: false,
    }]);

    assert!(!report.is_ok());
    assert!(h.ctx.draws().is_empty());
    assert_eq!(h.ctx.count(|c| matches!(c, PipeCall::Draw(_))), 0);
}

#[test]
#[should_panic(expected = "unrecognized device address")]
fn unknown_vertex_buffer_address_is_fatal() {
    let mut h = Harness::new();
    let stream_buffer = h.device.create_buffer(16);
    let mut args = 0xdead_beef_0000u64.to_le_bytes().to_vec();
    args.extend(words(&[64, 16]));
    assert!(stream_buffer.resource.write(0, &args));

    let layout = Arc::new(IndirectCommandsLayout {
        tokens: vec![IndirectCommandsToken {
            stream: 0,
            offset: 0,
            kind: IndirectTokenKind::VertexBuffer {
                binding: 0,
                dynamic_stride: true,
            },
        }],
        stream_strides: vec![16],
    });
    let info = Arc::new(GeneratedCommandsInfo {
        layout,
        ..info(&h, &stream_buffer, 1)
    });
    h.run(vec![Cmd::PreprocessGeneratedCommands(info)]);
}

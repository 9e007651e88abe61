//! Device-generated commands.
//!
//! Preprocessing walks the token layout for each sequence, reads the token
//! arguments out of the GPU-resident streams and appends one binary record
//! per token to the preprocess buffer. Execution decodes that record list
//! back into ordinary [`Cmd`]s and replays them one nesting level down.
//!
//! Record list layout, little endian:
//!
//! ```text
//! ListHeader { magic: u32, count: u32, len: u64 }
//! repeat count times:
//!     RecordHeader { kind: u32, len: u32 }
//!     payload (len bytes)
//! ```

use std::mem::size_of;
use std::sync::Arc;

use aero_pipe::state::ShaderStages;
use aero_pipe::{pipe_buffer_read, pipe_buffer_write, PipeContext};
use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::cmd::{
    Cmd, FrontFace, IndexType, IndirectBuffer, PipelineBindPoint, VertexBinding,
};
use crate::error::ExecutorError;
use crate::execute::{Replay, Result};
use crate::objects::{Buffer, Device, Pipeline};

/// Most sequences one preprocess pass will walk. Larger counts, whether
/// requested directly or read from a count buffer, are clamped to this.
pub const MAX_GENERATED_SEQUENCES: u32 = 1 << 20;

/// Most argument streams a generated-commands submission may supply.
pub const MAX_INDIRECT_STREAMS: usize = 16;

/// Stream offsets are token-relative; sequences are `stride` bytes apart.
#[derive(Clone, Debug, PartialEq)]
pub enum IndirectTokenKind {
    ShaderGroup,
    /// Only the front-face flag is recognized; other state flags are skipped.
    StateFlags { front_face: bool },
    PushConstant {
        stages: ShaderStages,
        offset: u32,
        size: u32,
    },
    /// `index_types` remaps raw stream values to index types before the
    /// standard decoding applies.
    IndexBuffer { index_types: Vec<(u32, IndexType)> },
    VertexBuffer { binding: u32, dynamic_stride: bool },
    Draw,
    DrawIndexed,
    DrawMeshTasks,
    /// Task-shader draws of the older mesh extension, never supported.
    DrawTasks,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndirectCommandsToken {
    pub stream: u32,
    pub offset: u32,
    pub kind: IndirectTokenKind,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndirectCommandsLayout {
    pub tokens: Vec<IndirectCommandsToken>,
    pub stream_strides: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct IndirectStream {
    pub buffer: Arc<Buffer>,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct GeneratedCommandsInfo {
    pub layout: Arc<IndirectCommandsLayout>,
    pub pipeline: Arc<Pipeline>,
    pub streams: Vec<IndirectStream>,
    pub sequences_count: u32,
    pub preprocess_buffer: Arc<Buffer>,
    pub preprocess_offset: u64,
    pub preprocess_size: u64,
    /// Caps the sequence count with a value read from GPU memory.
    pub sequences_count_buffer: Option<IndirectBuffer>,
    /// Replaces sequence `i` with the `i`th u32 of this buffer.
    pub sequences_index_buffer: Option<IndirectBuffer>,
}

// Token arguments as laid out in stream memory.

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BindShaderGroupArgs {
    group_index: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct SetStateFlagsArgs {
    data: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BindIndexBufferArgs {
    buffer_address: u64,
    size: u32,
    index_type: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct BindVertexBufferArgs {
    buffer_address: u64,
    size: u32,
    stride: u32,
}

// Preprocessed record list.

const LIST_MAGIC: u32 = 0x4447_4331;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct ListHeader {
    magic: u32,
    count: u32,
    len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RecordHeader {
    kind: u32,
    len: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
enum RecordKind {
    ShaderGroup = 1,
    FrontFace = 2,
    PushConstants = 3,
    IndexBuffer = 4,
    VertexBuffer = 5,
    Draw = 6,
    DrawIndexed = 7,
    DrawMeshTasks = 8,
}

impl RecordKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => RecordKind::ShaderGroup,
            2 => RecordKind::FrontFace,
            3 => RecordKind::PushConstants,
            4 => RecordKind::IndexBuffer,
            5 => RecordKind::VertexBuffer,
            6 => RecordKind::Draw,
            7 => RecordKind::DrawIndexed,
            8 => RecordKind::DrawMeshTasks,
            _ => panic!("corrupt generated command record kind {raw}"),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct PushConstantsRecord {
    stages: u32,
    offset: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct IndexBufferRecord {
    address: u64,
    index_type: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct VertexBufferRecord {
    address: u64,
    size: u32,
    binding: u32,
    stride: u32,
    has_stride: u32,
}

fn index_type_code(ty: IndexType) -> u32 {
    match ty {
        IndexType::U8 => 1,
        IndexType::U16 => 2,
        IndexType::U32 => 4,
    }
}

fn index_type_from_code(code: u32) -> IndexType {
    match code {
        1 => IndexType::U8,
        2 => IndexType::U16,
        4 => IndexType::U32,
        _ => panic!("corrupt generated index type {code}"),
    }
}

/// Read a `T` from `bytes` at `at`; running off the end is a malformed stream.
fn read_pod<T: Pod>(bytes: &[u8], at: usize) -> T {
    let Some(slice) = bytes.get(at..at + size_of::<T>()) else {
        panic!("token argument at {at:#x} runs past its stream");
    };
    bytemuck::pod_read_unaligned(slice)
}

/// Resolve a device address that a token stream must name validly.
fn resolve(device: &Device, address: u64) -> (Arc<Buffer>, u64) {
    device
        .buffer_at(address)
        .unwrap_or_else(|| panic!("unrecognized device address {address:#x}"))
}

/// Binary record list under construction, bounded by the preprocess size.
struct RecordWriter {
    bytes: Vec<u8>,
    count: u32,
    max_size: usize,
}

impl RecordWriter {
    fn new(max_size: u64) -> Self {
        let max_size = usize::try_from(max_size).unwrap_or(usize::MAX);
        if max_size < size_of::<ListHeader>() {
            panic!("preprocess buffer of {max_size} bytes cannot hold a command list");
        }
        Self {
            bytes: vec![0; size_of::<ListHeader>()],
            count: 0,
            max_size,
        }
    }

    fn push(&mut self, kind: RecordKind, payload: &[&[u8]]) {
        let len: usize = payload.iter().map(|p| p.len()).sum();
        if self.bytes.len() + size_of::<RecordHeader>() + len > self.max_size {
            panic!("generated commands overflow the {} byte preprocess buffer", self.max_size);
        }
        let header = RecordHeader {
            kind: kind as u32,
            len: len as u32,
        };
        self.bytes.extend_from_slice(bytemuck::bytes_of(&header));
        for part in payload {
            self.bytes.extend_from_slice(part);
        }
        self.count += 1;
    }

    fn finish(mut self) -> Vec<u8> {
        let header = ListHeader {
            magic: LIST_MAGIC,
            count: self.count,
            len: self.bytes.len() as u64,
        };
        self.bytes[..size_of::<ListHeader>()].copy_from_slice(bytemuck::bytes_of(&header));
        self.bytes
    }
}

/// Append the records of one sequence.
fn process_sequence(
    device: &Device,
    info: &GeneratedCommandsInfo,
    streams: &[Vec<u8>],
    seq: u32,
    out: &mut RecordWriter,
) {
    let layout = &info.layout;
    for token in &layout.tokens {
        let stream = token.stream as usize;
        let stride = layout.stream_strides.get(stream).copied().unwrap_or(0);
        let offset = stride as usize * seq as usize + token.offset as usize;
        let data = &streams[stream];
        match &token.kind {
            IndirectTokenKind::ShaderGroup => {
                let args: BindShaderGroupArgs = read_pod(data, offset);
                out.push(RecordKind::ShaderGroup, &[bytemuck::bytes_of(&args.group_index)]);
            }
            IndirectTokenKind::StateFlags { front_face } => {
                if !front_face {
                    continue;
                }
                let args: SetStateFlagsArgs = read_pod(data, offset);
                let clockwise = u32::from(args.data & 1 != 0);
                out.push(RecordKind::FrontFace, &[bytemuck::bytes_of(&clockwise)]);
            }
            IndirectTokenKind::PushConstant {
                stages,
                offset: pc_offset,
                size,
            } => {
                let Some(values) = data.get(offset..offset + *size as usize) else {
                    panic!("push constant token at {offset:#x} runs past its stream");
                };
                let record = PushConstantsRecord {
                    stages: stages.bits(),
                    offset: *pc_offset,
                };
                out.push(RecordKind::PushConstants, &[bytemuck::bytes_of(&record), values]);
            }
            IndirectTokenKind::IndexBuffer { index_types } => {
                let args: BindIndexBufferArgs = read_pod(data, offset);
                if args.buffer_address != 0 {
                    resolve(device, args.buffer_address);
                }
                let index_type = index_types
                    .iter()
                    .find(|(raw, _)| *raw == args.index_type)
                    .map(|&(_, ty)| ty)
                    .or_else(|| IndexType::from_raw(args.index_type))
                    .unwrap_or_else(|| panic!("unknown index type {}", args.index_type));
                let record = IndexBufferRecord {
                    address: args.buffer_address,
                    index_type: index_type_code(index_type),
                    _pad: 0,
                };
                out.push(RecordKind::IndexBuffer, &[bytemuck::bytes_of(&record)]);
            }
            IndirectTokenKind::VertexBuffer {
                binding,
                dynamic_stride,
            } => {
                let args: BindVertexBufferArgs = read_pod(data, offset);
                if args.buffer_address != 0 {
                    resolve(device, args.buffer_address);
                }
                let record = VertexBufferRecord {
                    address: args.buffer_address,
                    size: args.size,
                    binding: *binding,
                    stride: args.stride,
                    has_stride: u32::from(*dynamic_stride),
                };
                out.push(RecordKind::VertexBuffer, &[bytemuck::bytes_of(&record)]);
            }
            IndirectTokenKind::Draw | IndirectTokenKind::DrawIndexed | IndirectTokenKind::DrawMeshTasks => {
                let Some(src) = info.streams.get(stream) else {
                    panic!("draw token names missing stream {stream}");
                };
                let address = src.buffer.address + src.offset + offset as u64;
                let kind = match token.kind {
                    IndirectTokenKind::Draw => RecordKind::Draw,
                    IndirectTokenKind::DrawIndexed => RecordKind::DrawIndexed,
                    _ => RecordKind::DrawMeshTasks,
                };
                out.push(kind, &[bytemuck::bytes_of(&address)]);
            }
            IndirectTokenKind::DrawTasks => unreachable!("task-shader draw tokens are unsupported"),
        }
    }
}

/// Rebuild the commands encoded in a preprocessed record list.
fn decode_records(device: &Device, info: &GeneratedCommandsInfo, bytes: &[u8]) -> Vec<Cmd> {
    let header: ListHeader = read_pod(bytes, 0);
    if header.magic != LIST_MAGIC {
        panic!("preprocess buffer holds no generated command list");
    }
    let end = (header.len as usize).min(bytes.len());
    let mut at = size_of::<ListHeader>();
    let mut cmds = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let record: RecordHeader = read_pod(&bytes[..end], at);
        at += size_of::<RecordHeader>();
        let Some(payload) = bytes[..end].get(at..at + record.len as usize) else {
            panic!("generated command record at {at:#x} is truncated");
        };
        at += record.len as usize;

        let cmd = match RecordKind::from_raw(record.kind) {
            RecordKind::ShaderGroup => Cmd::BindPipelineShaderGroup {
                bind_point: PipelineBindPoint::Graphics,
                pipeline: info.pipeline.clone(),
                group: read_pod(payload, 0),
            },
            RecordKind::FrontFace => Cmd::SetFrontFace(if read_pod::<u32>(payload, 0) != 0 {
                FrontFace::Clockwise
            } else {
                FrontFace::CounterClockwise
            }),
            RecordKind::PushConstants => {
                let pc: PushConstantsRecord = read_pod(payload, 0);
                Cmd::PushConstants {
                    stages: ShaderStages::from_bits_truncate(pc.stages),
                    offset: pc.offset,
                    values: payload[size_of::<PushConstantsRecord>()..].to_vec(),
                }
            }
            RecordKind::IndexBuffer => {
                let ib: IndexBufferRecord = read_pod(payload, 0);
                let (buffer, offset) = match ib.address {
                    0 => (None, 0),
                    address => {
                        let (buffer, offset) = resolve(device, address);
                        (Some(buffer), offset)
                    }
                };
                Cmd::BindIndexBuffer {
                    buffer,
                    offset,
                    size: None,
                    index_type: index_type_from_code(ib.index_type),
                }
            }
            RecordKind::VertexBuffer => {
                let vb: VertexBufferRecord = read_pod(payload, 0);
                let (buffer, offset) = match vb.address {
                    0 => (None, 0),
                    address => {
                        let (buffer, offset) = resolve(device, address);
                        (Some(buffer), offset)
                    }
                };
                Cmd::BindVertexBuffers {
                    first: vb.binding,
                    bindings: vec![VertexBinding {
                        buffer,
                        offset,
                        size: Some(u64::from(vb.size)),
                        stride: (vb.has_stride != 0).then_some(vb.stride),
                    }],
                }
            }
            kind @ (RecordKind::Draw | RecordKind::DrawIndexed | RecordKind::DrawMeshTasks) => {
                let (buffer, offset) = resolve(device, read_pod(payload, 0));
                let indirect = IndirectBuffer { buffer, offset };
                match kind {
                    RecordKind::Draw => Cmd::DrawIndirect {
                        indirect,
                        draw_count: 1,
                        stride: 0,
                    },
                    RecordKind::DrawIndexed => Cmd::DrawIndexedIndirect {
                        indirect,
                        draw_count: 1,
                        stride: 0,
                    },
                    _ => Cmd::DrawMeshTasksIndirect {
                        indirect,
                        draw_count: 1,
                        stride: 0,
                    },
                }
            }
        };
        cmds.push(cmd);
    }
    cmds
}

fn sequence_count(requested: u32, from_buffer: Option<u32>) -> u32 {
    from_buffer
        .map_or(requested, |count| requested.min(count))
        .min(MAX_GENERATED_SEQUENCES)
}

fn read_u32<C: PipeContext + ?Sized>(ctx: &mut C, src: &IndirectBuffer) -> Result<u32> {
    let bytes = pipe_buffer_read(ctx, &src.buffer.resource, src.offset, 4)?;
    Ok(read_pod(&bytes, 0))
}

impl<C: PipeContext + ?Sized> Replay<'_, C> {
    pub(crate) fn handle_preprocess_generated(&mut self, info: &Arc<GeneratedCommandsInfo>) -> Result<()> {
        if info.streams.len() > MAX_INDIRECT_STREAMS {
            return Err(ExecutorError::TooManyStreams {
                count: info.streams.len(),
                limit: MAX_INDIRECT_STREAMS,
            });
        }
        let mut streams = Vec::with_capacity(info.streams.len());
        for stream in &info.streams {
            let len = stream.buffer.size.saturating_sub(stream.offset);
            streams.push(pipe_buffer_read(self.ctx, &stream.buffer.resource, stream.offset, len)?);
        }

        let from_buffer = match &info.sequences_count_buffer {
            Some(count) => Some(read_u32(self.ctx, count)?),
            None => None,
        };
        let seq_count = sequence_count(info.sequences_count, from_buffer);
        let seq_index = match &info.sequences_index_buffer {
            Some(index) => Some(pipe_buffer_read(
                self.ctx,
                &index.buffer.resource,
                index.offset,
                u64::from(seq_count) * 4,
            )?),
            None => None,
        };

        let mut out = RecordWriter::new(info.preprocess_size);
        for i in 0..seq_count {
            let seq = match &seq_index {
                Some(index) => read_pod(index, i as usize * 4),
                None => i,
            };
            process_sequence(self.device, info, &streams, seq, &mut out);
        }
        debug!(sequences = seq_count, records = out.count, "preprocessed generated commands");
        let list = out.finish();
        pipe_buffer_write(self.ctx, &info.preprocess_buffer.resource, info.preprocess_offset, &list)?;
        self.stats.add_generated_sequences(u64::from(seq_count));
        Ok(())
    }

    pub(crate) fn handle_execute_generated(
        &mut self,
        info: &Arc<GeneratedCommandsInfo>,
        is_preprocessed: bool,
    ) -> Result<()> {
        if !is_preprocessed {
            self.handle_preprocess_generated(info)?;
        }
        let len = info
            .preprocess_size
            .min(info.preprocess_buffer.size.saturating_sub(info.preprocess_offset));
        let bytes = pipe_buffer_read(self.ctx, &info.preprocess_buffer.resource, info.preprocess_offset, len)?;
        let cmds = decode_records(self.device, info, &bytes);

        self.enter_nested()?;
        self.run_list(&cmds);
        self.leave_nested();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_writer_counts_and_frames_records() {
        let mut out = RecordWriter::new(256);
        out.push(RecordKind::ShaderGroup, &[bytemuck::bytes_of(&3u32)]);
        out.push(RecordKind::FrontFace, &[bytemuck::bytes_of(&1u32)]);
        let list = out.finish();
        let header: ListHeader = read_pod(&list, 0);
        assert_eq!(header.magic, LIST_MAGIC);
        assert_eq!(header.count, 2);
        assert_eq!(header.len as usize, list.len());
        let first: RecordHeader = read_pod(&list, size_of::<ListHeader>());
        assert_eq!(first.kind, RecordKind::ShaderGroup as u32);
        assert_eq!(first.len, 4);
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn overflowing_the_preprocess_buffer_is_fatal() {
        let mut out = RecordWriter::new(24);
        out.push(RecordKind::ShaderGroup, &[&[0u8; 4]]);
        out.push(RecordKind::ShaderGroup, &[&[0u8; 4]]);
    }

    #[test]
    fn sequence_counts_are_capped() {
        assert_eq!(sequence_count(3, None), 3);
        assert_eq!(sequence_count(3, Some(2)), 2);
        assert_eq!(sequence_count(u32::MAX, None), MAX_GENERATED_SEQUENCES);
        assert_eq!(
            sequence_count(u32::MAX, Some(MAX_GENERATED_SEQUENCES + 1)),
            MAX_GENERATED_SEQUENCES
        );
    }

    #[test]
    fn index_type_codes_are_stable() {
        for ty in [IndexType::U8, IndexType::U16, IndexType::U32] {
            assert_eq!(index_type_from_code(index_type_code(ty)), ty);
        }
    }
}

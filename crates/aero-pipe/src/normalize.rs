//! Reduction of logical draws to single direct draws.
//!
//! Backends whose hardware only understands "one range, one instance range"
//! call into this module from their `draw_vbo`:
//!
//! * multi-draws go through [`draw_multi`], which re-enters `draw_vbo` once per
//!   sub-draw. A one-element `draws` slice must be handled by the backend
//!   itself, otherwise the two functions would recurse forever.
//! * indirect draws go through [`draw_indirect`], which reads the argument
//!   records back on the CPU and re-enters `draw_vbo` with direct draws.
//! * negative index biases are split with [`split_negative_index_bias`].

use std::sync::Arc;

use tracing::{debug, trace};

use crate::context::{pipe_buffer_read, PipeContext};
use crate::draw::{indirect_words, DrawIndirectInfo, DrawInfo, DrawStartCountBias};
use crate::error::PipeError;
use crate::resource::Resource;
use crate::state::{VertexBuffer, VertexElement};

/// Issue every sub-draw of a multi-draw as an independent single draw.
///
/// Direct sub-draws with a zero count, or any sub-draw of a zero-instance
/// draw, are skipped without consuming a draw ID. Returns the number of draws
/// issued.
pub fn draw_multi<C: PipeContext + ?Sized>(
    ctx: &mut C,
    info: &DrawInfo,
    drawid_offset: u32,
    indirect: Option<&DrawIndirectInfo>,
    draws: &[DrawStartCountBias],
) -> u32 {
    debug_assert!(
        draws.len() > 1,
        "single draws must not be routed through draw_multi"
    );

    let mut drawid = drawid_offset;
    let mut issued = 0;
    for draw in draws {
        if indirect.is_none() && (draw.count == 0 || info.instance_count == 0) {
            trace!(start = draw.start, count = draw.count, "skipping empty sub-draw");
            continue;
        }
        ctx.draw_vbo(info, drawid, indirect, std::slice::from_ref(draw));
        issued += 1;
        if info.increment_draw_id {
            drawid += 1;
        }
    }
    issued
}

/// Read indirect draw records back and issue them as direct draws.
///
/// Returns the number of draws issued. A failed map returns early with the
/// error and issues nothing further.
///
/// # Panics
///
/// Panics when the draw count comes from a stream-output target, or when the
/// descriptor has no argument buffer. Both are contract violations.
pub fn draw_indirect<C: PipeContext + ?Sized>(
    ctx: &mut C,
    info: &DrawInfo,
    drawid_offset: u32,
    indirect: &DrawIndirectInfo,
) -> Result<u32, PipeError> {
    if indirect.count_from_stream_output.is_some() {
        panic!("stream-output draw counts cannot be expanded on the CPU");
    }
    let Some(args) = indirect.buffer.as_ref() else {
        panic!("indirect draw without an argument buffer");
    };

    let mut draw_count = indirect.draw_count;
    if let Some(count_buf) = &indirect.indirect_draw_count {
        let count = read_u32(ctx, count_buf, u64::from(indirect.indirect_draw_count_offset))?;
        draw_count = draw_count.min(count);
    }
    if draw_count == 0 {
        debug!("indirect draw with zero draw count");
        return Ok(0);
    }

    let indexed = info.is_indexed();
    let words = indirect_words(indexed) as usize;
    let stride_words = match indirect.stride {
        0 => words,
        stride => (stride / 4) as usize,
    };
    let map_words = (draw_count as usize - 1) * stride_words + words;
    let bytes = pipe_buffer_read(ctx, args, u64::from(indirect.offset), (map_words * 4) as u64)?;
    let params: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    let mut single = info.clone();
    let mut cursor = 0usize;
    for i in 0..draw_count {
        let p = &params[cursor..cursor + words];
        let draw = DrawStartCountBias {
            count: p[0],
            start: p[2],
            index_bias: if indexed { p[3] as i32 } else { 0 },
        };
        single.instance_count = p[1];
        single.start_instance = if indexed { p[4] } else { p[3] };
        ctx.draw_vbo(&single, drawid_offset + i, None, std::slice::from_ref(&draw));
        cursor += stride_words;
    }
    Ok(draw_count)
}

fn read_u32<C: PipeContext + ?Sized>(
    ctx: &mut C,
    res: &Arc<Resource>,
    offset: u64,
) -> Result<u32, PipeError> {
    let bytes = pipe_buffer_read(ctx, res, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// A negative index bias split into a vertex-buffer offset (in vertices) and
/// a remainder applied to the raw indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexBiasSplit {
    pub buffer_offset: i32,
    pub index_offset: i32,
}

/// Split `bias` so that as much of it as possible moves into the vertex
/// buffer offsets without any per-vertex stream starting before its buffer.
///
/// `buffer_offset + index_offset == bias` always holds.
pub fn split_negative_index_bias(
    bias: i32,
    elements: &[VertexElement],
    buffers: &[VertexBuffer],
) -> IndexBiasSplit {
    if bias >= 0 {
        return IndexBiasSplit {
            buffer_offset: bias,
            index_offset: 0,
        };
    }

    // Vertices each per-vertex stream can be moved back before reaching byte 0.
    let max_neg_bias = elements
        .iter()
        .filter(|ve| ve.instance_divisor == 0 && ve.src_stride != 0)
        .filter_map(|ve| {
            let vb = buffers.get(ve.vertex_buffer_index as usize)?;
            let bytes = u64::from(vb.buffer_offset) + u64::from(ve.src_offset);
            Some(bytes / u64::from(ve.src_stride))
        })
        .min()
        .unwrap_or(u64::from(i32::MAX as u32));

    let floor = -(max_neg_bias.min(i32::MAX as u64) as i64);
    let buffer_offset = floor.max(i64::from(bias)) as i32;
    IndexBiasSplit {
        buffer_offset,
        index_offset: bias - buffer_offset,
    }
}

/// Apply `index_offset` to a packed index array of `index_size` bytes per
/// index, in place. Primitive-restart indices are preserved.
pub fn rebase_indices(indices: &mut [u8], index_size: u8, index_offset: i32, restart: Option<u32>) {
    let rebase = |v: u32| -> u32 {
        if Some(v) == restart {
            v
        } else {
            v.wrapping_add(index_offset as u32)
        }
    };
    match index_size {
        1 => indices.iter_mut().for_each(|i| *i = rebase(u32::from(*i)) as u8),
        2 => {
            for chunk in indices.chunks_exact_mut(2) {
                let v = rebase(u32::from(u16::from_le_bytes([chunk[0], chunk[1]]))) as u16;
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        4 => {
            for chunk in indices.chunks_exact_mut(4) {
                let v = rebase(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                chunk.copy_from_slice(&v.to_le_bytes());
            }
        }
        other => panic!("invalid index size {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Screen;

    fn element(vb: u32, src_offset: u32, stride: u32) -> VertexElement {
        VertexElement {
            src_offset,
            src_stride: stride,
            vertex_buffer_index: vb,
            ..VertexElement::default()
        }
    }

    #[test]
    fn positive_bias_is_not_split() {
        let split = split_negative_index_bias(7, &[], &[]);
        assert_eq!(
            split,
            IndexBiasSplit {
                buffer_offset: 7,
                index_offset: 0
            }
        );
    }

    #[test]
    fn negative_bias_is_limited_by_tightest_stream() {
        let screen = Screen::new();
        let buf = screen.buffer_create(1024);
        let buffers = vec![VertexBuffer::new(&buf, 64), VertexBuffer::new(&buf, 16)];
        // Stream 0 can move back 64/16 = 4 vertices, stream 1 only (16+4)/8 = 2.
        let elements = vec![element(0, 0, 16), element(1, 4, 8)];

        let split = split_negative_index_bias(-5, &elements, &buffers);
        assert_eq!(split.buffer_offset, -2);
        assert_eq!(split.index_offset, -3);
        assert_eq!(split.buffer_offset + split.index_offset, -5);

        for ve in &elements {
            let vb = &buffers[ve.vertex_buffer_index as usize];
            let effective = i64::from(vb.buffer_offset)
                + i64::from(ve.src_offset)
                + i64::from(split.buffer_offset) * i64::from(ve.src_stride);
            assert!(effective >= 0);
        }
    }

    #[test]
    fn small_negative_bias_fits_entirely_in_buffer_offset() {
        let screen = Screen::new();
        let buf = screen.buffer_create(1024);
        let buffers = vec![VertexBuffer::new(&buf, 160)];
        let elements = vec![element(0, 0, 16)];
        let split = split_negative_index_bias(-3, &elements, &buffers);
        assert_eq!(split.buffer_offset, -3);
        assert_eq!(split.index_offset, 0);
    }

    #[test]
    fn instanced_elements_do_not_limit_the_split() {
        let screen = Screen::new();
        let buf = screen.buffer_create(1024);
        let buffers = vec![VertexBuffer::new(&buf, 0), VertexBuffer::new(&buf, 32)];
        let mut instanced = element(0, 0, 16);
        instanced.instance_divisor = 1;
        let elements = vec![instanced, element(1, 0, 16)];
        let split = split_negative_index_bias(-4, &elements, &buffers);
        assert_eq!(split.buffer_offset, -2);
        assert_eq!(split.index_offset, -2);
    }

    #[test]
    fn rebase_keeps_restart_index() {
        let mut idx: Vec<u8> = [5u16, 0xffff, 9]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        rebase_indices(&mut idx, 2, -3, Some(0xffff));
        let out: Vec<u16> = idx
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(out, vec![2, 0xffff, 6]);
    }
}

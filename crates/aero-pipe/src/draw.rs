use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::resource::{Resource, StreamOutputTarget};

/// `max_index` value meaning "no bound known".
pub const UNBOUNDED_INDEX: u32 = !0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimType {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
    LinesAdjacency,
    LineStripAdjacency,
    TrianglesAdjacency,
    TriangleStripAdjacency,
    Patches,
}

/// Where indices come from for an indexed draw.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum IndexSource {
    #[default]
    None,
    Resource(Arc<Resource>),
    User(Arc<[u8]>),
}

impl IndexSource {
    pub fn resource(&self) -> Option<&Arc<Resource>> {
        match self {
            IndexSource::Resource(res) => Some(res),
            _ => None,
        }
    }
}

/// Per-call draw parameters shared by every sub-draw of a (multi-)draw.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawInfo {
    pub mode: PrimType,
    /// Index size in bytes; `0` for non-indexed draws.
    pub index_size: u8,
    pub index: IndexSource,
    pub instance_count: u32,
    pub start_instance: u32,
    pub primitive_restart: bool,
    pub restart_index: u32,
    pub index_bounds_valid: bool,
    pub min_index: u32,
    pub max_index: u32,
    /// Draw ID advances once per issued sub-draw.
    pub increment_draw_id: bool,
    /// Sub-draws carry distinct index biases.
    pub index_bias_varies: bool,
    pub view_mask: u32,
}

impl DrawInfo {
    pub fn is_indexed(&self) -> bool {
        self.index_size != 0
    }

    /// Whether `max_index` carries a usable bound.
    pub fn has_index_bound(&self) -> bool {
        self.index_bounds_valid && self.max_index != UNBOUNDED_INDEX
    }
}

/// One contiguous vertex or index range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawStartCountBias {
    pub start: u32,
    pub count: u32,
    pub index_bias: i32,
}

/// Arguments sourced from GPU memory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawIndirectInfo {
    pub buffer: Option<Arc<Resource>>,
    pub offset: u32,
    /// Byte stride between argument records; `0` means tightly packed.
    pub stride: u32,
    pub draw_count: u32,
    pub indirect_draw_count: Option<Arc<Resource>>,
    pub indirect_draw_count_offset: u32,
    pub count_from_stream_output: Option<Arc<StreamOutputTarget>>,
}

/// Compute dispatch / mesh-task grid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridInfo {
    pub block: [u32; 3],
    pub grid: [u32; 3],
    pub grid_base: [u32; 3],
    pub indirect: Option<Arc<Resource>>,
    pub indirect_offset: u32,
    pub indirect_stride: u32,
    pub draw_count: u32,
    pub indirect_draw_count: Option<Arc<Resource>>,
    pub indirect_draw_count_offset: u32,
}

/// Packed arguments of a non-indexed indirect draw (4 words).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    pub count: u32,
    pub instance_count: u32,
    pub start: u32,
    pub start_instance: u32,
}

/// Packed arguments of an indexed indirect draw (5 words).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    pub count: u32,
    pub instance_count: u32,
    pub start: u32,
    pub index_bias: i32,
    pub start_instance: u32,
}

/// Packed arguments of an indirect compute dispatch or mesh-task draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DrawIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;
    pub const WORDS: u32 = (Self::SIZE_BYTES / 4) as u32;

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl DrawIndexedIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;
    pub const WORDS: u32 = (Self::SIZE_BYTES / 4) as u32;

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

impl DispatchIndirectArgs {
    pub const SIZE_BYTES: u64 = core::mem::size_of::<Self>() as u64;

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Number of argument words of one indirect record.
#[inline]
pub const fn indirect_words(indexed: bool) -> u32 {
    if indexed {
        DrawIndexedIndirectArgs::WORDS
    } else {
        DrawIndirectArgs::WORDS
    }
}

/// Compute the maximum number of elements in a buffer slice of `size_bytes`, using a fixed stride.
///
/// Returns `0` if `stride_bytes == 0`.
#[inline]
pub fn max_elements_in_buffer(size_bytes: u64, stride_bytes: u64) -> u32 {
    if stride_bytes == 0 {
        return 0;
    }
    let count = size_bytes / stride_bytes;
    count.min(u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_args_layout_is_packed_words() {
        assert_eq!(core::mem::size_of::<DrawIndirectArgs>(), 16);
        assert_eq!(core::mem::align_of::<DrawIndirectArgs>(), 4);

        assert_eq!(core::mem::size_of::<DrawIndexedIndirectArgs>(), 20);
        assert_eq!(core::mem::align_of::<DrawIndexedIndirectArgs>(), 4);

        assert_eq!(indirect_words(false), 4);
        assert_eq!(indirect_words(true), 5);
    }

    #[test]
    fn max_elements_in_buffer_behavior() {
        assert_eq!(max_elements_in_buffer(0, 4), 0);
        assert_eq!(max_elements_in_buffer(16, 4), 4);
        assert_eq!(max_elements_in_buffer(17, 4), 4);
        assert_eq!(max_elements_in_buffer(16, 0), 0);
    }

    #[test]
    fn unbounded_max_index_is_not_a_bound() {
        let info = DrawInfo {
            index_size: 2,
            index_bounds_valid: true,
            max_index: UNBOUNDED_INDEX,
            ..DrawInfo::default()
        };
        assert!(info.is_indexed());
        assert!(!info.has_index_bound());
    }
}

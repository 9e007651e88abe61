use std::fmt;
use std::sync::Arc;

use crate::resource::Resource;
use crate::screen::Screen;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    let add = alignment - 1;
    match value.checked_add(add) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// A linear allocator over a fixed byte range.
///
/// Only offsets are tracked; the bytes live in whatever resource the range
/// belongs to.
#[derive(Clone)]
pub struct BufferArena {
    base: u64,
    capacity: u64,
    cursor: u64,
}

impl BufferArena {
    /// Create an arena that allocates offsets in `[base, base + capacity)`.
    pub fn new(base: u64, capacity: u64) -> Self {
        Self {
            base,
            capacity,
            cursor: base,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = self.base;
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes remaining until the arena is full.
    pub fn remaining(&self) -> u64 {
        self.end().saturating_sub(self.cursor)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn end(&self) -> u64 {
        self.base + self.capacity
    }

    /// Allocate `size` bytes with `alignment`, returning the absolute offset.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let aligned = align_up(self.cursor, alignment.max(1));
        let end = aligned.checked_add(size)?;
        if end > self.end() {
            return None;
        }

        self.cursor = end;
        Some(aligned)
    }
}

impl fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArena")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Scratch uploads for one submission (push constants, inline vertex data).
///
/// Allocations are never freed individually. Full blocks are retired and
/// kept alive until [`UploadArena::reset`], which callers invoke only after
/// the fence covering the submission has signalled.
pub struct UploadArena {
    block_size: u64,
    current: Option<(Arc<Resource>, BufferArena)>,
    retired: Vec<Arc<Resource>>,
}

impl UploadArena {
    pub fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(256),
            current: None,
            retired: Vec::new(),
        }
    }

    /// Copy `data` into scratch memory. Returns the backing buffer and the
    /// byte offset of the copy.
    pub fn upload(
        &mut self,
        screen: &Screen,
        data: &[u8],
        alignment: u64,
    ) -> Option<(Arc<Resource>, u32)> {
        let size = data.len() as u64;
        let fits = self
            .current
            .as_mut()
            .and_then(|(res, arena)| Some((res.clone(), arena.alloc(size, alignment)?)));
        let (res, offset) = match fits {
            Some(hit) => hit,
            None => {
                if let Some((full, _)) = self.current.take() {
                    self.retired.push(full);
                }
                let block = self.block_size.max(align_up(size, 256));
                let res = screen.buffer_create(u32::try_from(block).ok()?);
                let mut arena = BufferArena::new(0, block);
                let offset = arena.alloc(size, alignment)?;
                self.current = Some((res.clone(), arena));
                (res, offset)
            }
        };
        if !res.write(offset, data) {
            return None;
        }
        Some((res, u32::try_from(offset).ok()?))
    }

    /// Blocks retired since the last reset.
    pub fn retired_blocks(&self) -> usize {
        self.retired.len()
    }

    /// Release every block except the current one and rewind it.
    pub fn reset(&mut self) {
        self.retired.clear();
        if let Some((_, arena)) = self.current.as_mut() {
            arena.reset();
        }
    }

    /// Release every block.
    pub fn release(&mut self) {
        self.retired.clear();
        self.current = None;
    }
}

impl fmt::Debug for UploadArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadArena")
            .field("block_size", &self.block_size)
            .field("current", &self.current.as_ref().map(|(r, a)| (r.id(), a.cursor())))
            .field("retired", &self.retired.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(u64::MAX, 256), u64::MAX / 256 * 256);
    }

    #[test]
    fn arena_alloc_respects_alignment_and_capacity() {
        let mut arena = BufferArena::new(0, 64);
        assert_eq!(arena.alloc(1, 1), Some(0));
        assert_eq!(arena.alloc(1, 16), Some(16));
        // 17..64 left; the next 32-aligned slot is 32.
        assert_eq!(arena.alloc(16, 32), Some(32));
        assert!(arena.alloc(33, 1).is_none());
        assert_eq!(arena.remaining(), 16);
    }

    #[test]
    fn upload_arena_retires_full_blocks_until_reset() {
        let screen = Screen::new();
        let mut arena = UploadArena::new(256);

        let (a, off_a) = arena.upload(&screen, &[1; 200], 64).unwrap();
        assert_eq!(off_a, 0);
        let (b, off_b) = arena.upload(&screen, &[2; 200], 64).unwrap();
        assert_eq!(off_b, 0);
        assert_ne!(a.id(), b.id());
        assert_eq!(arena.retired_blocks(), 1);
        assert_eq!(b.read(0, 2).unwrap(), vec![2, 2]);

        drop(a);
        // The retired block stays alive until the arena is reset.
        assert_eq!(screen.counters().snapshot().live_resources(), 2);
        arena.reset();
        assert_eq!(screen.counters().snapshot().live_resources(), 1);

        let (_, off) = arena.upload(&screen, &[3; 8], 64).unwrap();
        assert_eq!(off, 0);
    }
}

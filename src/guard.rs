//! Guard words around memory blocks.
//!
//! Debug builds wrap the memory manager in [`Guarded`], which stores the size
//! class and a mark in front of every block and another mark right after the
//! caller's bytes:
//!
//! ```text
//! +----------+------------+--------------------+----------+---------+
//! | class ix | START_MARK |     user bytes     | END_MARK |  spare  |
//! +----------+------------+--------------------+----------+---------+
//! ^ block                 ^ returned pointer
//! ```
//!
//! Freeing checks both marks and the class index against the size given by the
//! caller. Violations are reported and counted, the block is released anyway.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::error;

use crate::{Allocation, MemoryManager, SizeClass, error::AllocError};

const START_MARK: u32 = 0x6EC9;
const END_MARK: u32 = 0x6EC1;

/// Class index stored for blocks forwarded to the operating system.
const DIRECT: u32 = u32::MAX;

/// Bytes in front of the user pointer.
const HEADER: usize = 2 * size_of::<u32>();

/// Bytes added to every request: class index, start mark, end mark and one
/// spare word which keeps the user pointer aligned.
pub const GUARD_OVERHEAD: usize = 4 * size_of::<u32>();

/// Memory manager decorator checking guard words on free.
#[derive(Debug)]
pub struct Guarded<M> {
    inner: M,
    violations: AtomicUsize,
}

impl<M: MemoryManager> Guarded<M> {
    /// Wraps `inner`. Its size classes should leave room for
    /// [`GUARD_OVERHEAD`], see
    /// [`SegregatedAllocator::guarded`](crate::SegregatedAllocator::guarded).
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            violations: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Number of damaged blocks found so far.
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::Relaxed)
    }

    fn report(&self, block: NonNull<u8>, what: &str) {
        error!("memory block at {block:?}: {what}");
        self.violations.fetch_add(1, Ordering::Relaxed);
    }
}

impl<M: MemoryManager> MemoryManager for Guarded<M> {
    fn allocate(&self, request_bytes: usize) -> Result<Allocation, AllocError> {
        let inner_bytes = request_bytes
            .checked_add(GUARD_OVERHEAD)
            .ok_or(AllocError::OutOfMemory {
                requested: request_bytes,
            })?;

        let block = self.inner.allocate(inner_bytes)?;
        let ix = self
            .inner
            .size_class(inner_bytes)
            .map_or(DIRECT, |class| class.index as u32);

        unsafe {
            let words = block.ptr.cast::<u32>();
            words.write(ix);
            words.add(1).write(START_MARK);

            if ix != DIRECT {
                block
                    .ptr
                    .add(block.bytes - HEADER)
                    .cast::<u32>()
                    .write_unaligned(END_MARK);
            }

            Ok(Allocation {
                ptr: block.ptr.add(HEADER),
                bytes: block.bytes - GUARD_OVERHEAD,
            })
        }
    }

    unsafe fn free(&self, block: *mut u8, bytes: usize) {
        let Some(user) = NonNull::new(block) else {
            return;
        };

        let inner_bytes = bytes.saturating_add(GUARD_OVERHEAD);
        let block = unsafe { user.sub(HEADER) };
        let words = block.cast::<u32>();

        let (ix, start) = unsafe { (words.read(), words.add(1).read()) };
        if start != START_MARK {
            self.report(block, "start mark overwritten");
        }

        match self.inner.size_class(inner_bytes) {
            Some(class) if class.index as u32 == ix => {
                let end = unsafe { block.add(class.size - HEADER).cast::<u32>().read_unaligned() };
                if end != END_MARK {
                    self.report(block, "end mark overwritten");
                }
            }
            Some(class) => self.report(
                block,
                &format!("freed as class {} but allocated as {ix}", class.index),
            ),
            None if ix != DIRECT => {
                self.report(block, &format!("freed as a large block but allocated as {ix}"))
            }
            None => {}
        }

        unsafe { self.inner.free(block.as_ptr(), inner_bytes) }
    }

    fn size_class(&self, bytes: usize) -> Option<SizeClass> {
        let class = self.inner.size_class(bytes.checked_add(GUARD_OVERHEAD)?)?;

        Some(SizeClass {
            index: class.index,
            size: class.size - GUARD_OVERHEAD,
        })
    }

    unsafe fn shutdown(&self) {
        unsafe { self.inner.shutdown() }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        SegregatedAllocator, config::MemoryConfig, size_class::SizeClassTable,
        testing::CountingMemory,
    };

    fn guarded() -> Guarded<SegregatedAllocator<CountingMemory>> {
        let config = MemoryConfig::default().with_block_size_limit(4000);
        SegregatedAllocator::guarded(config, CountingMemory::new()).unwrap()
    }

    #[test]
    fn callers_see_plain_size_classes() {
        let memory = guarded();
        let plain = SizeClassTable::build(&MemoryConfig::default().with_block_size_limit(4000));

        for bytes in [0, 1, 8, 9, 100, 1000, plain.max_block_sz()] {
            let block = memory.allocate(bytes).unwrap();
            assert_eq!(block.bytes, plain.block_size(plain.block_ix(bytes)));
            assert_eq!(block.ptr.as_ptr() as usize % size_of::<usize>(), 0);
        }
    }

    #[test]
    fn clean_block_passes() {
        let memory = guarded();

        let block = memory.allocate(40).unwrap();
        unsafe {
            block.ptr.as_ptr().write_bytes(0xFF, block.bytes);
            memory.free(block.ptr.as_ptr(), 40);
        }

        assert_eq!(memory.violations(), 0);
        assert_eq!(memory.allocate(40).unwrap().ptr, block.ptr);
    }

    #[test]
    fn overrun_is_detected() {
        let memory = guarded();

        let block = memory.allocate(40).unwrap();
        unsafe {
            block.ptr.as_ptr().write_bytes(0, block.bytes + 1);
            memory.free(block.ptr.as_ptr(), 40);
        }

        assert_eq!(memory.violations(), 1);
        // Freed anyway.
        assert_eq!(memory.allocate(40).unwrap().ptr, block.ptr);
    }

    #[test]
    fn underrun_is_detected() {
        let memory = guarded();

        let block = memory.allocate(16).unwrap();
        unsafe {
            block.ptr.as_ptr().sub(1).write(0xAB);
            memory.free(block.ptr.as_ptr(), 16);
        }

        assert_eq!(memory.violations(), 1);
    }

    #[test]
    fn wrong_size_is_detected() {
        let memory = guarded();

        let block = memory.allocate(16).unwrap();
        unsafe { memory.free(block.ptr.as_ptr(), 1000) };

        assert_eq!(memory.violations(), 1);
    }

    #[test]
    fn absurd_size_is_reported() {
        let memory = guarded();

        let block = memory.allocate(16).unwrap();
        unsafe { memory.free(block.ptr.as_ptr(), usize::MAX) };

        assert_eq!(memory.violations(), 1);
    }

    #[test]
    fn large_blocks_check_start_mark() {
        let memory = guarded();
        let bytes = memory.inner().max_block_sz() - GUARD_OVERHEAD + 1;

        let block = memory.allocate(bytes).unwrap();
        assert!(block.bytes >= bytes);
        assert_eq!(memory.inner().stats().chunks, 0);

        unsafe {
            block.ptr.as_ptr().write_bytes(0x5A, block.bytes);
            memory.free(block.ptr.as_ptr(), bytes);
        }

        assert_eq!(memory.violations(), 0);
        assert_eq!(memory.inner().system().outstanding(), 0);
    }

    #[test]
    fn size_class_hides_overhead() {
        let memory = guarded();

        let class = memory.size_class(9).unwrap();
        assert_eq!(class.size, 16);
        assert_eq!(class, SizeClass { index: 1, size: 16 });
    }
}

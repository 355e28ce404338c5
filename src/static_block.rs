//! Static block memory manager.
//!
//! Alternative to the segregated-fit manager for targets without dynamic
//! memory. The application registers a fixed set of buffers up front and every
//! request must match the size of one of them exactly.

use std::{cell::RefCell, ptr::NonNull};

use log::{error, trace};
use parking_lot::ReentrantMutex;

use crate::{
    Allocation, MemoryManager,
    error::AllocError,
    list::{List, node_size},
};

/// Free static blocks, each tagged with its size.
pub struct StaticBlockAllocator {
    blocks: ReentrantMutex<RefCell<List<usize>>>,
}

impl StaticBlockAllocator {
    pub fn new() -> Self {
        Self {
            blocks: ReentrantMutex::new(RefCell::new(List::new())),
        }
    }

    /// Registers `block` as a free block of `block_sz` bytes. `block_alloc`
    /// is the real size of the storage, zero meaning the same as `block_sz`.
    ///
    /// # Safety
    ///
    /// `block` must be valid for reads and writes of the storage size, aligned
    /// to a pointer, and owned by this manager from now on.
    pub unsafe fn add_block(
        &self,
        block: NonNull<u8>,
        block_sz: usize,
        block_alloc: usize,
    ) -> Result<(), AllocError> {
        let storage = if block_alloc == 0 { block_sz } else { block_alloc };
        if storage < node_size::<usize>() {
            error!("static block of {storage} bytes at {block:?} can't be linked");
            return Err(AllocError::StaticBlockTooSmall { size: storage });
        }

        let guard = self.blocks.lock();
        unsafe {
            guard.borrow_mut().push(block_sz, block);
        }
        trace!("static block of {block_sz} bytes added at {block:?}");

        Ok(())
    }

    /// Number of free blocks.
    pub fn available(&self) -> usize {
        self.blocks.lock().borrow().len()
    }
}

impl Default for StaticBlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager for StaticBlockAllocator {
    fn allocate(&self, request_bytes: usize) -> Result<Allocation, AllocError> {
        let block = if request_bytes == 0 {
            None
        } else {
            let guard = self.blocks.lock();
            let mut blocks = guard.borrow_mut();
            blocks.remove_first(|&block_sz| block_sz == request_bytes)
        };

        match block {
            Some(node) => Ok(Allocation {
                ptr: node.cast(),
                bytes: request_bytes,
            }),
            None => {
                error!("no static block of {request_bytes} bytes");
                Err(AllocError::NoStaticBlock {
                    requested: request_bytes,
                })
            }
        }
    }

    /// The block goes back under the size given here, which is not checked
    /// against the size it was registered with.
    unsafe fn free(&self, block: *mut u8, bytes: usize) {
        let Some(block) = NonNull::new(block) else {
            return;
        };

        let guard = self.blocks.lock();
        unsafe {
            guard.borrow_mut().push(bytes, block);
        }
    }
}

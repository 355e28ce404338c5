use std::{cell::RefCell, ptr::NonNull};

use log::error;
use parking_lot::ReentrantMutex;

use crate::{
    Allocation, MemoryManager, SizeClass,
    config::MemoryConfig,
    error::{AllocError, ConfigError},
    guard::{GUARD_OVERHEAD, Guarded},
    kernel::{OsMemory, SystemMemory},
    list::List,
    size_class::SizeClassTable,
};

#[cfg(feature = "resource-monitor")]
use crate::resmon::ResourceMonitor;

/// Mutable state of the memory manager, only touched with the lock held.
///
/// Everything here is threaded through memory obtained from the operating
/// system:
///
/// ```text
///  free_blocks[ix]:  block -> block -> block          (exactly block_sz[ix])
///  slices[ix]:       slice -> slice                   (block_sz[ix] <= bytes_left)
///  chunks:           chunk -> chunk -> chunk          (whole OS allocations)
/// ```
pub(crate) struct MemState {
    /// First in list of free memory blocks of specific size.
    pub free_blocks: Vec<List<()>>,
    /// Unused tails of chunks, by the size class which fits inside them.
    pub slices: Vec<List<usize>>,
    /// Every chunk taken from the operating system, with its granted size.
    #[cfg(feature = "process-cleanup")]
    pub chunks: List<usize>,
    pub chunk_count: usize,
}

impl MemState {
    pub fn new(classes: usize) -> Self {
        Self {
            free_blocks: (0..classes).map(|_| List::new()).collect(),
            slices: (0..classes).map(|_| List::new()).collect(),
            #[cfg(feature = "process-cleanup")]
            chunks: List::new(),
            chunk_count: 0,
        }
    }
}

/// Read-only collaborators of the carving code.
pub(crate) struct Sources<'a, S> {
    pub table: &'a SizeClassTable,
    pub system: &'a S,
    pub chunk_size: usize,
    #[cfg(feature = "resource-monitor")]
    pub monitor: &'a ResourceMonitor,
}

/// Snapshot of the memory manager lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Chunks currently held from the operating system.
    pub chunks: usize,
    /// Blocks waiting on free lists, all size classes.
    pub free_blocks: usize,
    /// Slices waiting to be carved.
    pub slices: usize,
    /// Bytes left in those slices.
    pub slice_bytes: usize,
}

/// Segregated-fit memory manager.
///
/// Requests up to the largest size class are rounded up to a size class and
/// served from that class's free list, or carved out of chunks requested
/// from the operating system. Freed blocks go back to the free list of their
/// class and are never merged. Larger requests are forwarded to the operating
/// system directly.
///
/// The size class table is built when the manager is created and read
/// without locking afterwards. Free lists, slices and chunks are guarded by
/// one reentrant lock held by the manager.
pub struct SegregatedAllocator<S: SystemMemory = OsMemory> {
    config: MemoryConfig,
    table: SizeClassTable,
    system: S,
    state: ReentrantMutex<RefCell<MemState>>,
    #[cfg(feature = "resource-monitor")]
    monitor: ResourceMonitor,
}

impl SegregatedAllocator<OsMemory> {
    /// Memory manager with default configuration on top of the operating
    /// system's page allocator.
    pub fn with_os_memory() -> Self {
        // The default configuration is always valid.
        Self::build(MemoryConfig::default(), OsMemory::new())
    }
}

impl<S: SystemMemory> SegregatedAllocator<S> {
    pub fn new(config: MemoryConfig, system: S) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::build(config, system))
    }

    /// Memory manager whose blocks carry guard words. Every size class is
    /// enlarged by the guard overhead so callers still see the plain classes.
    pub fn guarded(config: MemoryConfig, system: S) -> Result<Guarded<Self>, ConfigError> {
        let config = config.with_class_padding(config.class_padding + GUARD_OVERHEAD);

        Self::new(config, system).map(Guarded::new)
    }

    fn build(config: MemoryConfig, system: S) -> Self {
        let table = SizeClassTable::build(&config);
        let state = MemState::new(table.len());

        Self {
            config,
            table,
            system,
            state: ReentrantMutex::new(RefCell::new(state)),
            #[cfg(feature = "resource-monitor")]
            monitor: ResourceMonitor::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[inline]
    pub fn table(&self) -> &SizeClassTable {
        &self.table
    }

    /// Size of every size class, ascending.
    #[inline]
    pub fn block_sizes(&self) -> &[usize] {
        self.table.sizes()
    }

    /// Largest block handled by the manager.
    #[inline]
    pub fn max_block_sz(&self) -> usize {
        self.table.max_block_sz()
    }

    #[inline]
    pub fn system(&self) -> &S {
        &self.system
    }

    #[cfg(feature = "resource-monitor")]
    #[inline]
    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> MemoryStats {
        let guard = self.state.lock();
        let state = guard.borrow();

        MemoryStats {
            chunks: state.chunk_count,
            free_blocks: state.free_blocks.iter().map(List::len).sum(),
            slices: state.slices.iter().map(List::len).sum(),
            slice_bytes: state.slices.iter().flat_map(List::iter).sum(),
        }
    }

    /// Number of blocks on the free list of size class `ix`, `None` if there
    /// is no such class.
    pub fn free_block_count(&self, ix: usize) -> Option<usize> {
        self.state.lock().borrow().free_blocks.get(ix).map(List::len)
    }

    fn sources(&self) -> Sources<'_, S> {
        Sources {
            table: &self.table,
            system: &self.system,
            chunk_size: self.config.chunk_size,
            #[cfg(feature = "resource-monitor")]
            monitor: &self.monitor,
        }
    }

    /// Too large block for the memory manager, call the operating system
    /// directly.
    fn allocate_direct(&self, request_bytes: usize) -> Result<Allocation, AllocError> {
        match self.system.request_memory(request_bytes) {
            Some(raw) => Ok(Allocation {
                ptr: raw.ptr,
                bytes: raw.bytes,
            }),
            None => {
                error!("out of memory for large block of {request_bytes} bytes");
                Err(AllocError::OutOfMemory {
                    requested: request_bytes,
                })
            }
        }
    }
}

impl<S: SystemMemory> MemoryManager for SegregatedAllocator<S> {
    fn allocate(&self, request_bytes: usize) -> Result<Allocation, AllocError> {
        let Some(ix) = self.table.class_of(request_bytes) else {
            return self.allocate_direct(request_bytes);
        };

        let block = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();

            match state.free_blocks[ix].pop() {
                Some(node) => Ok(node.cast::<u8>()),
                None => state.allocate_slice(ix, &self.sources()),
            }
        };

        match block {
            Ok(ptr) => Ok(Allocation {
                ptr,
                bytes: self.table.block_size(ix),
            }),
            Err(err) => {
                error!("out of memory: {err}");
                Err(err)
            }
        }
    }

    unsafe fn free(&self, block: *mut u8, bytes: usize) {
        let Some(block) = NonNull::new(block) else {
            return;
        };

        let Some(ix) = self.table.class_of(bytes) else {
            unsafe { self.system.return_memory(block, bytes) };
            return;
        };

        let guard = self.state.lock();
        unsafe {
            guard.borrow_mut().free_blocks[ix].push((), block);
        }
    }

    fn size_class(&self, bytes: usize) -> Option<SizeClass> {
        self.table.class_of(bytes).map(|index| SizeClass {
            index,
            size: self.table.block_size(index),
        })
    }

    #[cfg(feature = "process-cleanup")]
    unsafe fn shutdown(&self) {
        let guard = self.state.lock();
        unsafe {
            guard.borrow_mut().release_chunks(&self.sources());
        }
    }
}

#[cfg(feature = "process-cleanup")]
impl<S: SystemMemory> Drop for SegregatedAllocator<S> {
    fn drop(&mut self) {
        // Nothing can reach the chunks once the manager is gone.
        unsafe { self.shutdown() }
    }
}

use log::trace;

use crate::{
    error::AllocError,
    kernel::{RawMemory, SystemMemory},
    list::node_size,
    manager::{MemState, Sources},
};

#[cfg(feature = "process-cleanup")]
use log::debug;

#[cfg(feature = "resource-monitor")]
use crate::resmon::Counter;

/// Overhead at the start of every chunk. With `process-cleanup` each chunk is
/// linked into the chunk list through a `Node<usize>` holding its granted size,
/// so all of them can be returned to the operating system at shutdown.
///
/// ```text
/// +---------------------+ <------+
/// |     next chunk      |        |
/// +---------------------+        | -> Chunk header
/// |    granted bytes    |        |
/// +---------------------+ <------+
/// |  slice / blocks ... |
/// +---------------------+
/// ```
pub(crate) const CHUNK_HEADER_SIZE: usize = if cfg!(feature = "process-cleanup") {
    node_size::<usize>()
} else {
    0
};

impl MemState {
    /// Requests a chunk of at least `request_bytes` usable bytes from the
    /// operating system and registers all of it as one slice.
    ///
    /// Failure is not retried here.
    pub(crate) fn allocate_chunk<S: SystemMemory>(
        &mut self,
        request_bytes: usize,
        src: &Sources<'_, S>,
    ) -> Result<(), AllocError> {
        let requested = request_bytes + CHUNK_HEADER_SIZE;

        let Some(raw) = src.system.request_memory(requested) else {
            return Err(AllocError::MemoryAllocationFailed { requested });
        };
        trace!("acquired chunk of {} bytes at {:?}", raw.bytes, raw.ptr);

        #[cfg(feature = "resource-monitor")]
        {
            src.monitor
                .update(Counter::SystemMemoryAllocation, raw.bytes as isize);
            src.monitor.update(Counter::ChunkCount, 1);
        }

        self.chunk_count += 1;
        let raw = self.register_chunk(raw);

        // The OS may grant more than requested, the slice takes all of it.
        let ix = src.table.slice_ix(raw.bytes);
        unsafe {
            self.slices[ix].push(raw.bytes, raw.ptr);
        }

        Ok(())
    }

    /// Links the chunk into the chunk list and returns the span after the
    /// header.
    #[cfg(feature = "process-cleanup")]
    fn register_chunk(&mut self, raw: RawMemory) -> RawMemory {
        unsafe {
            self.chunks.push(raw.bytes, raw.ptr);

            RawMemory {
                ptr: raw.ptr.add(CHUNK_HEADER_SIZE),
                bytes: raw.bytes - CHUNK_HEADER_SIZE,
            }
        }
    }

    #[cfg(not(feature = "process-cleanup"))]
    fn register_chunk(&mut self, raw: RawMemory) -> RawMemory {
        raw
    }

    /// Returns every chunk to the operating system and forgets all free
    /// blocks and slices, which lived inside them.
    ///
    /// **SAFETY**: no block carved from these chunks may be used afterwards.
    #[cfg(feature = "process-cleanup")]
    pub(crate) unsafe fn release_chunks<S: SystemMemory>(&mut self, src: &Sources<'_, S>) {
        let mut released = 0;

        while let Some(node) = self.chunks.pop() {
            unsafe {
                let bytes = node.as_ref().data;
                src.system.return_memory(node.cast(), bytes);

                #[cfg(feature = "resource-monitor")]
                {
                    src.monitor
                        .update(Counter::SystemMemoryAllocation, -(bytes as isize));
                    src.monitor.update(Counter::ChunkCount, -1);
                }
            }
            released += 1;
        }

        self.free_blocks.iter_mut().for_each(|list| list.clear());
        self.slices.iter_mut().for_each(|list| list.clear());
        self.chunk_count = 0;

        debug!("released {released} chunks");
    }
}

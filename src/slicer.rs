//! Carving blocks out of chunk slices.
//!
//! A slice is the unused tail of a chunk. It is kept in the slice list of the
//! largest size class that fits inside it. Cutting a block out of a slice
//! leaves a smaller slice which is linked again by its new size, unless it is
//! too small to carry a slice header, in which case it is split into blocks of
//! the smallest size class right away.
//!
//! ```text
//!  before:  | slice header, bytes_left = N                              |
//!  after:   | block (block_sz[ix]) | slice header, bytes_left = N - sz   |
//! ```

use std::ptr::NonNull;

use log::trace;

use crate::{
    error::AllocError,
    kernel::SystemMemory,
    list::node_size,
    manager::{MemState, Sources},
    size_class::SizeClassTable,
    utils::round_up,
};

/// Bytes needed to keep a slice on a slice list.
pub(crate) const SLICE_HEADER_SIZE: usize = node_size::<usize>();

/// Steps of [`MemState::allocate_slice`]. Existing slices are tried first, a
/// single new chunk is acquired when none fits, and then the scan is repeated
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CarveState {
    ScanExisting,
    AcquireChunk,
    Exhausted,
}

/// Bytes to request from the operating system for blocks of `bytes`.
///
/// Small blocks get a chunk of about `chunk_size`, rounded to a multiple of
/// the block size. Blocks over a third of `chunk_size` get a chunk of their
/// own.
fn chunk_request(bytes: usize, chunk_size: usize) -> usize {
    let chunk_bytes = if bytes <= chunk_size / 3 {
        round_up(chunk_size, bytes)
    } else {
        bytes
    };

    chunk_bytes.max(SLICE_HEADER_SIZE)
}

impl MemState {
    /// Cuts a block of size class `ix` from the smallest slice which can hold
    /// it, acquiring a new chunk if there is none.
    pub(crate) fn allocate_slice<S: SystemMemory>(
        &mut self,
        ix: usize,
        src: &Sources<'_, S>,
    ) -> Result<NonNull<u8>, AllocError> {
        let bytes = src.table.block_size(ix);
        let mut state = CarveState::ScanExisting;
        let mut retried = false;

        loop {
            state = match state {
                CarveState::ScanExisting => {
                    if let Some(block) = self.carve_existing(ix, src.table) {
                        return Ok(block);
                    }

                    if retried {
                        CarveState::Exhausted
                    } else {
                        CarveState::AcquireChunk
                    }
                }
                CarveState::AcquireChunk => {
                    retried = true;
                    self.allocate_chunk(chunk_request(bytes, src.chunk_size), src)?;

                    CarveState::ScanExisting
                }
                CarveState::Exhausted => {
                    return Err(AllocError::OutOfMemory { requested: bytes });
                }
            };
        }
    }

    fn carve_existing(&mut self, ix: usize, table: &SizeClassTable) -> Option<NonNull<u8>> {
        let bytes = table.block_size(ix);

        let i = (ix..table.len()).find(|&i| !self.slices[i].is_empty())?;
        let slice = self.slices[i].pop()?;

        // A slice in bucket `i` holds at least `block_sz[i] >= bytes`.
        let bytes_left = unsafe { slice.as_ref().data } - bytes;
        let block = slice.cast::<u8>();
        let rest = unsafe { block.add(bytes) };

        let sz0 = table.block_size(0);
        if bytes_left < SLICE_HEADER_SIZE || bytes_left < sz0 {
            self.scatter(rest, bytes_left, sz0);
        } else {
            let j = table.slice_ix(bytes_left);
            unsafe {
                self.slices[j].push(bytes_left, rest);
            }
        }

        Some(block)
    }

    /// Splits a leftover too small for a slice header into free blocks of the
    /// smallest size class. A fragment smaller than one such block is lost.
    fn scatter(&mut self, mut p: NonNull<u8>, mut bytes_left: usize, sz0: usize) {
        while bytes_left >= sz0 {
            unsafe {
                self.free_blocks[0].push((), p);
                p = p.add(sz0);
            }
            bytes_left -= sz0;
        }

        if bytes_left > 0 {
            trace!("{bytes_left} bytes at {p:?} left unused");
        }
    }
}

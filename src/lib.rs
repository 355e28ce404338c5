//! Segregated-fit memory manager.
//!
//! Requests are rounded up to one of a fixed set of size classes, each with
//! its own list of free blocks. Blocks are carved out of chunks obtained from
//! the operating system and, once freed, only ever reused for the same size
//! class:
//!
//! ```text
//!   size classes      free lists
//! +-------------+
//! |      8      | --> block --> block
//! +-------------+
//! |     16      | --> block
//! +-------------+
//! |     24      |
//! +-------------+
//! |     ...     |
//! +-------------+
//! |  max block  | --> block
//! +-------------+
//! ```
//!
//! Requests above the largest class are forwarded to the operating system.
//! For targets without dynamic memory there is [`StaticBlockAllocator`], which
//! serves exact sizes out of buffers registered by the application.

mod chunk;
mod list;
mod slicer;

pub mod config;
pub mod error;
pub mod global;
pub mod guard;
pub mod kernel;
pub mod manager;
pub mod size_class;
pub mod static_block;
pub mod utils;

#[cfg(feature = "resource-monitor")]
pub mod resmon;

#[cfg(test)]
pub(crate) mod testing;

use std::ptr::NonNull;

pub use config::MemoryConfig;
pub use error::{AllocError, ConfigError};
pub use guard::{GUARD_OVERHEAD, Guarded};
pub use kernel::{OsMemory, RawMemory, SystemMemory};
pub use manager::{MemoryStats, SegregatedAllocator};
pub use static_block::StaticBlockAllocator;

#[cfg(feature = "resource-monitor")]
pub use resmon::{Counter, Reading, ResourceMonitor};

/// Block handed out by a [`MemoryManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: NonNull<u8>,
    /// Usable bytes, at least as many as requested.
    pub bytes: usize,
}

/// Size class a byte count maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    pub index: usize,
    /// Bytes of every block in the class.
    pub size: usize,
}

/// General interface for memory managers.
pub trait MemoryManager {
    /// Returns a block of at least `request_bytes` bytes, together with the
    /// number of bytes actually usable.
    fn allocate(&self, request_bytes: usize) -> Result<Allocation, AllocError>;

    /// Gives `block` back. Freeing a null pointer does nothing.
    ///
    /// # Safety
    ///
    /// `block` must come from [`MemoryManager::allocate`] on the same manager
    /// and not be freed already. `bytes` must be either the requested or the
    /// allocated size. The block must not be used afterwards.
    unsafe fn free(&self, block: *mut u8, bytes: usize);

    /// Size class `bytes` would be served from, if the manager uses classes.
    fn size_class(&self, _bytes: usize) -> Option<SizeClass> {
        None
    }

    /// Returns the memory held by the manager to the operating system.
    ///
    /// # Safety
    ///
    /// Every block handed out before becomes invalid.
    unsafe fn shutdown(&self) {}
}

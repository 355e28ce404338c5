//! Process-wide memory manager.
//!
//! One manager is installed per process and every module allocates through
//! the functions here, the way `malloc` and `free` would be used.

use std::sync::OnceLock;

use log::{info, warn};

use crate::{
    Allocation, MemoryManager, SegregatedAllocator, config::MemoryConfig, error::AllocError,
    kernel::OsMemory,
};

type SharedManager = Box<dyn MemoryManager + Send + Sync>;

static MANAGER: OnceLock<SharedManager> = OnceLock::new();

/// Installs `manager` for the whole process. Only the first call succeeds.
pub fn install<M>(manager: M) -> Result<(), AllocError>
where
    M: MemoryManager + Send + Sync + 'static,
{
    MANAGER
        .set(Box::new(manager))
        .map_err(|_| AllocError::AlreadyInitialized)
}

/// Installs the segregated-fit manager on top of the operating system. Debug
/// builds get guard words around every block.
pub fn initialize(config: MemoryConfig) -> Result<(), AllocError> {
    if cfg!(debug_assertions) {
        install(SegregatedAllocator::guarded(config, OsMemory::new())?)?;
    } else {
        install(SegregatedAllocator::new(config, OsMemory::new())?)?;
    }

    info!(
        "memory manager initialized, blocks up to {} bytes",
        config.block_size_limit
    );
    Ok(())
}

pub fn is_initialized() -> bool {
    MANAGER.get().is_some()
}

pub fn allocate(request_bytes: usize) -> Result<Allocation, AllocError> {
    MANAGER
        .get()
        .ok_or(AllocError::NotInitialized)?
        .allocate(request_bytes)
}

/// # Safety
///
/// See [`MemoryManager::free`].
pub unsafe fn free(block: *mut u8, bytes: usize) {
    match MANAGER.get() {
        Some(manager) => unsafe { manager.free(block, bytes) },
        None => warn!("free of {block:?} before the memory manager was initialized"),
    }
}

/// # Safety
///
/// See [`MemoryManager::shutdown`].
pub unsafe fn shutdown() {
    if let Some(manager) = MANAGER.get() {
        unsafe { manager.shutdown() }
    }
}

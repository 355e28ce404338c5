//! Error types for the memory manager

use thiserror::Error;

/// Errors reported by allocation entry points.
///
/// Freeing never fails: contract violations found while freeing are reported
/// through the log and the block is released anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Neither the free lists, the slices nor the operating system could
    /// provide the block.
    #[error("out of memory (requested: {requested} bytes)")]
    OutOfMemory { requested: usize },

    /// The operating system refused to hand out a chunk.
    #[error("operating system memory allocation failed (requested: {requested} bytes)")]
    MemoryAllocationFailed { requested: usize },

    /// No registered static block has exactly the requested size.
    #[error("no static memory block of {requested} bytes available")]
    NoStaticBlock { requested: usize },

    /// A static block cannot hold the link used to chain free static blocks.
    #[error("static memory block of {size} bytes is too small to be linked")]
    StaticBlockTooSmall { size: usize },

    /// A process-wide memory manager has already been installed.
    #[error("memory manager already initialized")]
    AlreadyInitialized,

    /// No process-wide memory manager has been installed yet.
    #[error("memory manager not initialized")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid [`MemoryConfig`](crate::config::MemoryConfig) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("block table length {0} outside 1..=256")]
    BlockTableLen(usize),

    #[error("block size limit {0} is smaller than a pointer")]
    BlockSizeLimit(usize),

    #[error("chunk size must be non-zero")]
    ChunkSize,

    #[error("class padding {0} is not a multiple of the pointer size")]
    ClassPadding(usize),
}

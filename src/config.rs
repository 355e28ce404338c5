//! Memory manager configuration
//!
//! These values set the memory manager operation: largest block size handled
//! by the manager and related block table length, quick find table length for
//! small blocks and base chunk size to request from the operating system.

use crate::{error::ConfigError, utils::POINTER_SIZE};

/// Limit for block size to be handled by the memory manager. The actual limit
/// is the largest generated size class, which is a little lower than this.
/// Larger blocks are forwarded to the operating system.
pub const DEFAULT_BLOCK_SZ_LIMIT: usize = 0x4000_0000;

/// Number of size classes the block table can hold.
pub const DEFAULT_BLOCK_TABLE_LEN: usize = 75;

/// Byte counts below this are mapped to a size class by direct indexing.
pub const DEFAULT_QUICK_FIND_TABLE_LEN: usize = 200;

/// Base chunk size to request from the operating system. The request is
/// rounded to be dividable by the block size for small blocks.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Quick find entries are stored as bytes.
pub const MAX_BLOCK_TABLE_LEN: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Upper limit for generated size classes.
    pub block_size_limit: usize,
    /// Maximum number of size classes.
    pub block_table_len: usize,
    /// Length of the quick find table.
    pub quick_find_len: usize,
    /// Base chunk size requested from the operating system.
    pub chunk_size: usize,
    /// Extra bytes added to every size class, used for guard words.
    pub class_padding: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            block_size_limit: DEFAULT_BLOCK_SZ_LIMIT,
            block_table_len: DEFAULT_BLOCK_TABLE_LEN,
            quick_find_len: DEFAULT_QUICK_FIND_TABLE_LEN,
            chunk_size: DEFAULT_CHUNK_SIZE,
            class_padding: 0,
        }
    }
}

impl MemoryConfig {
    pub fn with_block_size_limit(mut self, limit: usize) -> Self {
        self.block_size_limit = limit;
        self
    }

    pub fn with_block_table_len(mut self, len: usize) -> Self {
        self.block_table_len = len;
        self
    }

    pub fn with_quick_find_len(mut self, len: usize) -> Self {
        self.quick_find_len = len;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_class_padding(mut self, bytes: usize) -> Self {
        self.class_padding = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_table_len == 0 || self.block_table_len > MAX_BLOCK_TABLE_LEN {
            return Err(ConfigError::BlockTableLen(self.block_table_len));
        }
        if self.block_size_limit < POINTER_SIZE {
            return Err(ConfigError::BlockSizeLimit(self.block_size_limit));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        if self.class_padding % POINTER_SIZE != 0 {
            return Err(ConfigError::ClassPadding(self.class_padding));
        }

        Ok(())
    }
}

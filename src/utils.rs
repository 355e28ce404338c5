//! Helper functions shared by the memory manager modules.
//! These don't particularly belong to any concrete part of the allocator.

use std::mem;

/// Native pointer width in bytes. Every size class is a multiple of this.
pub const POINTER_SIZE: usize = mem::size_of::<*mut u8>();

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// This is used to round size-class steps to the pointer width.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Rounds `value` up to a multiple of `multiple`. Unlike [`align`], `multiple`
/// does not need to be a power of two, size classes generally aren't.
pub fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

//! Test doubles.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::kernel::{RawMemory, SystemMemory};

const ALIGN: usize = 16;

/// Operating system stand-in backed by the global allocator. Grants exactly
/// what is requested and counts it, optionally refusing requests once `limit`
/// bytes are outstanding.
#[derive(Debug)]
pub(crate) struct CountingMemory {
    limit: usize,
    requests: AtomicUsize,
    outstanding: AtomicUsize,
}

impl CountingMemory {
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            requests: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Successful requests so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Bytes granted and not returned yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len.max(1), ALIGN).ok()
    }
}

impl SystemMemory for CountingMemory {
    fn request_memory(&self, len: usize) -> Option<RawMemory> {
        let bytes = len.max(1);
        if self.outstanding().saturating_add(bytes) > self.limit {
            return None;
        }

        let ptr = NonNull::new(unsafe { alloc::alloc(Self::layout(bytes)?) })?;
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_add(bytes, Ordering::SeqCst);

        Some(RawMemory { ptr, bytes })
    }

    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
        // Nothing of that size was ever granted.
        let Some(layout) = Self::layout(len) else {
            return;
        };
        self.outstanding.fetch_sub(layout.size(), Ordering::SeqCst);

        unsafe { alloc::dealloc(addr.as_ptr(), layout) }
    }
}

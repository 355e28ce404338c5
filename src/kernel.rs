use std::{ptr::NonNull, sync::OnceLock};

/// Memory handed out by the operating system: where it starts and how many
/// bytes were actually granted, which may be more than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMemory {
    pub ptr: NonNull<u8>,
    pub bytes: usize,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the memory manager, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
///
/// Implementations may be swapped, for example to route every request of a
/// loaded library through the host process.
pub trait SystemMemory {
    /// Request a memory region of at least `len` bytes. Returns the region or
    /// `None` if the underlying syscall fails.
    fn request_memory(&self, len: usize) -> Option<RawMemory>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    ///
    /// # Safety
    ///
    /// `addr` must come from [`SystemMemory::request_memory`] on the same
    /// implementation, `len` must be either the requested or the granted size,
    /// and the memory must not be used afterwards.
    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize);
}

/// Virtual memory page size of the computer. This is usually 4096.
/// Queried once, we don't know the value at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { OsMemory::query_page_size() })
}

/// Anonymous page mappings straight from the operating system. Requests are
/// rounded up to the page size and the granted size reports that rounding.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsMemory;

impl OsMemory {
    pub const fn new() -> Self {
        Self
    }

    /// Bytes the kernel maps for a request of `len`, or `None` if rounding up
    /// to the page size overflows.
    fn granted(len: usize) -> Option<usize> {
        len.max(1).checked_next_multiple_of(page_size())
    }
}

impl SystemMemory for OsMemory {
    fn request_memory(&self, len: usize) -> Option<RawMemory> {
        let bytes = Self::granted(len)?;

        unsafe { Self::map(bytes) }.map(|ptr| RawMemory { ptr, bytes })
    }

    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
        unsafe { Self::unmap(addr, Self::granted(len).unwrap_or(len)) }
    }
}

#[cfg(unix)]
mod unix {
    use super::OsMemory;

    use libc::{mmap, munmap, off_t, size_t};
    use log::error;

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl OsMemory {
        pub(super) unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        pub(super) unsafe fn unmap(addr: NonNull<u8>, len: usize) {
            if unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) } != 0 {
                error!("munmap of {len} bytes at {addr:?} failed");
            }
        }

        pub(super) unsafe fn query_page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};

    use log::error;
    use windows::Win32::System::{Memory, SystemInformation};

    use super::OsMemory;

    impl OsMemory {
        pub(super) unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        pub(super) unsafe fn unmap(addr: NonNull<u8>, _len: usize) {
            let released =
                unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE) };
            if let Err(err) = released {
                error!("VirtualFree at {addr:?} failed: {err}");
            }
        }

        pub(super) unsafe fn query_page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn granted_size_is_page_rounded() {
        let memory = OsMemory::new();

        let raw = memory.request_memory(10).unwrap();
        assert_eq!(raw.bytes, page_size());
        assert_eq!(raw.ptr.as_ptr() as usize % page_size(), 0);

        unsafe {
            // The whole granted span is writable.
            raw.ptr.as_ptr().write_bytes(0xAB, raw.bytes);
            assert_eq!(*raw.ptr.as_ptr().add(raw.bytes - 1), 0xAB);

            memory.return_memory(raw.ptr, 10);
        }
    }

    #[test]
    fn unmappable_size_is_refused() {
        let memory = OsMemory::new();

        assert_eq!(memory.request_memory(usize::MAX), None);
        assert_eq!(memory.request_memory(usize::MAX - page_size() + 2), None);
    }

    #[test]
    fn basic_allocation_mmap() {
        let memory = OsMemory::new();

        unsafe {
            let block1 = memory.request_memory(4).unwrap().ptr.cast::<u32>();
            let block2 = memory.request_memory(4).unwrap().ptr.cast::<u32>();
            assert_ne!(block1, block2);

            *block1.as_ptr() = 2;
            assert_eq!(*block1.as_ptr(), 2);

            *block2.as_ptr() = 45;
            assert_eq!(*block2.as_ptr(), 45);

            memory.return_memory(block1.cast(), 4);
            memory.return_memory(block2.cast(), 4);
        }
    }
}

//! SharedMemoryBlock - a contiguous byte region visible to two contexts.
//!
//! Safe abstraction over mmap and shm_open. A named block is addressed by
//! its shm object name, which doubles as the handle a creator hands to the
//! peer context; an anonymous block is inherited through fork or shared
//! between threads. All unsafe operations are encapsulated here.

use std::ffi::CString;
use std::ptr::NonNull;

use crate::error::{FeedError, FeedResult};

/// Maximum size for a shared memory block (1 GB).
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024 * 1024;

/// A mapped shared memory block.
///
/// Owns the mapping and unmaps it on drop. Named blocks are unlinked by the
/// instance that created them; openers only unmap. Neither side may resize
/// the block after construction.
pub struct SharedMemoryBlock {
    /// Shm object name, `None` for anonymous mappings.
    name: Option<String>,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapping in bytes.
    size: usize,
    /// File descriptor backing the mapping, -1 for anonymous mappings.
    fd: i32,
    /// Whether this instance created the shm object (and unlinks it on drop).
    is_owner: bool,
}

// SAFETY: SharedMemoryBlock can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryBlock {}

// SAFETY: SharedMemoryBlock can be shared between threads; the ring buffer
// layered on top provides the atomic access discipline.
unsafe impl Sync for SharedMemoryBlock {}

impl SharedMemoryBlock {
    /// Create and map a new named shared memory block.
    ///
    /// The name is the handle: pass it to the other execution context so it
    /// can [`open`](Self::open) the same block. Fails if an object with this
    /// name already exists.
    pub fn create(name: &str, size: usize) -> FeedResult<Self> {
        Self::check_size(size).map_err(|reason| FeedError::BlockCreateFailed {
            name: name.to_string(),
            reason,
        })?;
        let c_name = Self::shm_name(name).map_err(|reason| FeedError::BlockCreateFailed {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            let reason = if errno.raw_os_error() == Some(libc::EEXIST) {
                "shared memory object already exists".to_string()
            } else {
                format!("shm_open failed: {}", errno)
            };
            return Err(FeedError::BlockCreateFailed {
                name: name.to_string(),
                reason,
            });
        }

        // SAFETY: fd is a valid file descriptor
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(FeedError::BlockCreateFailed {
                name: name.to_string(),
                reason: format!("ftruncate failed: {}", errno),
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(err) => {
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        };

        // A fresh shm object is already zero-filled; make it explicit so a
        // recycled name observed mid-teardown cannot leak stale counters.
        // SAFETY: ptr is valid for size bytes
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }

        tracing::debug!(name = %name, size = size, "Created shared memory block");

        Ok(Self {
            name: Some(name.to_string()),
            ptr,
            size,
            fd,
            is_owner: true,
        })
    }

    /// Map an existing named shared memory block.
    ///
    /// The block's size is discovered from the object itself, so the handle
    /// (the name) is all a peer context needs.
    pub fn open(name: &str) -> FeedResult<Self> {
        let c_name = Self::shm_name(name).map_err(|reason| FeedError::BlockOpenFailed {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(FeedError::BlockOpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        // SAFETY: fd is a valid file descriptor, stat is a plain out-param
        let size = unsafe {
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) < 0 {
                let errno = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(FeedError::BlockOpenFailed {
                    name: name.to_string(),
                    reason: format!("fstat failed: {}", errno),
                });
            }
            stat.st_size as usize
        };

        if let Err(reason) = Self::check_size(size) {
            unsafe { libc::close(fd) };
            return Err(FeedError::BlockOpenFailed {
                name: name.to_string(),
                reason,
            });
        }

        let ptr = match Self::map(fd, size) {
            Ok(ptr) => ptr,
            Err(err) => {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory block");

        Ok(Self {
            name: Some(name.to_string()),
            ptr,
            size,
            fd,
            is_owner: false,
        })
    }

    /// Map an anonymous shared block.
    ///
    /// Visible to threads of this process and to children related by fork;
    /// it has no name and cannot be opened by an unrelated process.
    pub fn anonymous(size: usize) -> FeedResult<Self> {
        Self::check_size(size).map_err(|reason| FeedError::MapFailed { reason })?;

        // SAFETY: no fd is involved for an anonymous mapping, size is validated
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(FeedError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        let ptr = NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED");

        tracing::debug!(size = size, "Mapped anonymous shared block");

        Ok(Self {
            name: None,
            ptr,
            size,
            fd: -1,
            is_owner: false,
        })
    }

    /// Get the shm object name, if this block has one.
    ///
    /// This is the handle a creator passes to the peer context.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the size of this block in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a raw pointer to the mapped memory.
    ///
    /// # Safety
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn check_size(size: usize) -> Result<(), String> {
        if size == 0 {
            return Err("size cannot be zero".to_string());
        }
        if size > MAX_BLOCK_SIZE {
            return Err(format!(
                "size {} exceeds maximum {}",
                size, MAX_BLOCK_SIZE
            ));
        }
        Ok(())
    }

    fn shm_name(name: &str) -> Result<CString, String> {
        if name.is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if name.contains('/') {
            return Err("name cannot contain '/'".to_string());
        }
        CString::new(format!("/{}", name)).map_err(|e| format!("invalid name: {}", e))
    }

    fn map(fd: i32, size: usize) -> FeedResult<NonNull<u8>> {
        // SAFETY: fd is valid, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(FeedError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }
        Ok(NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED"))
    }
}

impl Drop for SharedMemoryBlock {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = self.name.as_deref().unwrap_or("<anonymous>"),
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory block"
            );
        }

        if self.fd >= 0 {
            // SAFETY: fd was opened during creation
            unsafe { libc::close(self.fd) };
        }

        if self.is_owner {
            if let Some(name) = &self.name {
                if let Ok(c_name) = CString::new(format!("/{}", name)) {
                    // SAFETY: c_name is a valid CString
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                    tracing::debug!(name = %name, "Unlinked shared memory block");
                }
            }
        }
    }
}

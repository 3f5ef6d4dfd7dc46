//! POSIX shared-memory region management.
//!
//! Wraps `shm_open`/`ftruncate`/`mmap`/`munmap`/`shm_unlink` behind a small
//! RAII handle. Grounded on `hdds-team-hdds`'s `transport/shm/segment.rs`
//! (`ShmSegment`), adapted to the create-or-attach race handling the
//! original C connect routine performs: try an exclusive create first, and
//! fall back to opening the now-existing segment on `EEXIST` rather than
//! failing.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::error::{Result, RingError};
use crate::header::RingHeader;

/// A mapped POSIX shared-memory region.
///
/// Unmaps on drop. Never unlinks on drop: the name and the mapping have
/// independent lifetimes, so callers unlink explicitly via [`ShmRegion::unlink`].
pub struct ShmRegion {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the mapped region is shared memory synchronised entirely through
// the atomics in `header`; the pointer itself carries no thread-affinity.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates a new region, or attaches to one that already exists under
    /// `name`. Returns `(region, created)` so the caller can tell whether
    /// header fields need initialising.
    pub fn create_or_attach(name: &str, size: usize) -> Result<(Self, bool)> {
        validate_name(name)?;
        let c_name = to_cstring(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; O_EXCL|O_CREAT
        // is the standard exclusive-create incantation and fails cleanly
        // with EEXIST when the segment is already present.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };

        if fd >= 0 {
            let region = Self::finish_create(fd, name, size)?;
            return Ok((region, true));
        }

        let create_err = io::Error::last_os_error();
        if create_err.raw_os_error() != Some(libc::EEXIST) {
            return Err(RingError::Io(create_err));
        }

        log::debug!("region {name} already exists, attaching");
        let region = Self::open_existing(name)?;
        Ok((region, false))
    }

    /// Attaches to an existing region only. Fails with
    /// [`RingError::NotFound`] if the name does not exist.
    pub fn attach(name: &str) -> Result<Self> {
        validate_name(name)?;
        match Self::open_existing(name) {
            Ok(region) => Ok(region),
            Err(RingError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(RingError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    fn open_existing(name: &str) -> Result<Self> {
        let c_name = to_cstring(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; O_RDWR opens an
        // existing segment without creating one.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(RingError::NotFound);
            }
            return Err(RingError::Io(err));
        }

        let size = match fstat_size(fd) {
            Ok(size) => size,
            Err(e) => {
                // SAFETY: fd is a valid, still-open descriptor from the
                // shm_open call above.
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        // Guard against attaching to a segment that exists but isn't big
        // enough to hold the header yet (a racing creator that has
        // `shm_open`'d but not yet `ftruncate`'d, or a foreign/corrupted
        // segment): mapping fewer bytes than the header needs and then
        // dereferencing a `RingHeader` at the base would read past the
        // mapped extent. Matches `quicksand_connect`'s
        // `sb.st_size < sizeof(quicksand_ringbuffer)` guard.
        if (size as u64) < RingHeader::header_size() {
            // SAFETY: fd is still valid; we are rejecting before mapping.
            unsafe { libc::close(fd) };
            return Err(RingError::Invalid);
        }

        let map_result = map_fd(fd, size);
        // SAFETY: mmap (success or failure) keeps its own reference via the
        // fd table entry; closing fd here does not invalidate a successful
        // mapping and is required to avoid leaking the descriptor.
        unsafe { libc::close(fd) };
        let ptr = map_result?;

        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    fn finish_create(fd: i32, name: &str, size: usize) -> Result<Self> {
        // SAFETY: fd is the valid descriptor returned by the O_CREAT|O_EXCL
        // shm_open call immediately above in the caller.
        let truncate_result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if truncate_result < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is still valid; we are unwinding an error path.
            unsafe {
                libc::close(fd);
                let _ = shm_unlink_raw(name);
            }
            return Err(RingError::Io(err));
        }

        let map_result = map_fd(fd, size);
        // SAFETY: see `open_existing`'s rationale for closing after mmap.
        unsafe { libc::close(fd) };
        let ptr = match map_result {
            Ok(ptr) => ptr,
            Err(e) => {
                let _ = shm_unlink_raw(name);
                return Err(e);
            }
        };

        log::debug!("created region {name} ({size} bytes)");
        Ok(Self {
            ptr,
            size,
            name: name.to_string(),
        })
    }

    /// Removes the named region. Idempotent: a missing name is not an
    /// error.
    pub fn unlink(name: &str) -> Result<()> {
        validate_name(name)?;
        shm_unlink_raw(name)?;
        log::debug!("unlinked region {name}");
        Ok(())
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.size were produced by a successful mmap of
        // exactly this size in `create_or_attach`/`attach`, and this is the
        // only place that unmaps it.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}

fn map_fd(fd: i32, size: usize) -> Result<*mut u8> {
    // SAFETY: fd is a valid, open file descriptor referring to a shared
    // memory object of at least `size` bytes; requesting a kernel-chosen
    // address with MAP_SHARED is always a valid mmap invocation.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(RingError::Io(io::Error::last_os_error()));
    }
    Ok(ptr.cast::<u8>())
}

fn fstat_size(fd: i32) -> Result<usize> {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is valid and `stat` is a correctly sized, writable buffer
    // for `fstat` to populate.
    let ret = unsafe { libc::fstat(fd, &mut stat as *mut libc::stat) };
    if ret < 0 {
        return Err(RingError::Io(io::Error::last_os_error()));
    }
    Ok(stat.st_size as usize)
}

fn shm_unlink_raw(name: &str) -> Result<()> {
    let c_name = to_cstring(name)?;
    // SAFETY: c_name is a valid NUL-terminated string; shm_unlink is
    // defined for any such name, existent or not.
    let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::NotFound {
            return Err(RingError::Io(err));
        }
    }
    Ok(())
}

fn to_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| RingError::Invalid)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(RingError::Invalid);
    }
    Ok(())
}

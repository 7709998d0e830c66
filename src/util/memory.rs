use crate::util::Address;
use libc::{PROT_NONE, PROT_READ, PROT_WRITE};
use std::io::{ErrorKind, Result};

/// Annotation for a reserved range. On Linux it becomes the name of the mapping in
/// `/proc/self/maps`, which is only used for debugging.
pub enum MmapAnnotation<'a> {
    /// The backing memory of the regions of a heap.
    Heap,
    /// A side bitmap, such as the liveness map.
    SideBitmap {
        /// The name of the bitmap.
        name: &'a str,
    },
    /// The mapping is for a test case.
    Test {
        /// The source file.
        file: &'a str,
        /// The line number.
        line: u32,
    },
}

/// Construct an `MmapAnnotation::Test` with the current file name and line number.
#[macro_export]
macro_rules! mmap_anno_test {
    () => {
        &$crate::util::memory::MmapAnnotation::Test {
            file: file!(),
            line: line!(),
        }
    };
}

pub use mmap_anno_test;

impl std::fmt::Display for MmapAnnotation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MmapAnnotation::Heap => write!(f, "mmtk-g1:heap"),
            MmapAnnotation::SideBitmap { name } => write!(f, "mmtk-g1:bitmap:{}", name),
            MmapAnnotation::Test { file, line } => write!(f, "mmtk-g1:test:{}:{}", file, line),
        }
    }
}

/// Reserve `size` bytes of address space without committing any memory. The range is
/// inaccessible until [`commit`] is called on (part of) it.
pub fn reserve(size: usize, annotation: &MmapAnnotation) -> Result<Address> {
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let ptr = unsafe { libc::mmap(std::ptr::null_mut(), size, PROT_NONE, flags, -1, 0) };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    let start = Address::from_mut_ptr(ptr);
    set_vma_name(start, size, annotation);
    Ok(start)
}

/// Make a reserved range readable and writable. Pages that were never touched, or were
/// uncommitted, read as zero.
pub fn commit(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, PROT_READ | PROT_WRITE) },
        0,
    )
}

/// Give the physical pages of a committed range back to the OS and make the range
/// inaccessible again. The address space stays reserved.
pub fn uncommit(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(
        &|| unsafe { libc::madvise(start.to_mut_ptr(), size, libc::MADV_DONTNEED) },
        0,
    )?;
    wrap_libc_call(
        &|| unsafe { libc::mprotect(start.to_mut_ptr(), size, PROT_NONE) },
        0,
    )
}

/// Unmap a range returned by [`reserve`].
pub fn release(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Fill a committed range with zeros.
pub fn zero(start: Address, len: usize) {
    unsafe { std::ptr::write_bytes(start.to_mut_ptr::<u8>(), 0, len) };
}

/// Report a failed mapping and abort the collector.
pub fn handle_mmap_error(error: std::io::Error, addr: Address, bytes: usize) -> ! {
    eprintln!("Failed to mmap {}, size {}", addr, bytes);
    match error.kind() {
        ErrorKind::OutOfMemory => panic!("Out of memory while mapping {} bytes", bytes),
        _ => {
            if error.raw_os_error() == Some(libc::ENOMEM) {
                panic!("Out of memory while mapping {} bytes", bytes);
            }
            panic!("Unexpected mmap failure: {:?}", error)
        }
    }
}

#[cfg(target_os = "linux")]
fn set_vma_name(start: Address, size: usize, annotation: &MmapAnnotation) {
    // `PR_SET_VMA` is new in Linux 5.17. Older kernels return `EINVAL`, and so do names that are
    // too long. The name is only for debugging, so we log the error instead of failing.
    let Ok(anno_cstr) = std::ffi::CString::new(annotation.to_string()) else {
        return;
    };
    let result = wrap_libc_call(
        &|| unsafe {
            libc::prctl(
                libc::PR_SET_VMA,
                libc::PR_SET_VMA_ANON_NAME,
                start.to_ptr::<libc::c_void>(),
                size,
                anno_cstr.as_ptr(),
            )
        },
        0,
    );
    if let Err(e) = result {
        debug!("Error while calling prctl: {}", e);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_vma_name(_start: Address, _size: usize, _annotation: &MmapAnnotation) {}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;

    #[test]
    fn test_reserve_commit_release() {
        let size = 4 * BYTES_IN_PAGE;
        let start = reserve(size, mmap_anno_test!()).unwrap();
        assert!(!start.is_zero());
        assert!(start.is_aligned_to(BYTES_IN_PAGE));

        assert!(commit(start, BYTES_IN_PAGE).is_ok());
        unsafe {
            assert_eq!(start.load::<usize>(), 0);
            start.store(42usize);
            assert_eq!(start.load::<usize>(), 42);
        }
        assert!(release(start, size).is_ok());
    }

    #[test]
    fn test_uncommit_drops_contents() {
        let size = 2 * BYTES_IN_PAGE;
        let start = reserve(size, mmap_anno_test!()).unwrap();
        commit(start, size).unwrap();
        unsafe { (start + BYTES_IN_PAGE).store(7usize) };

        uncommit(start, size).unwrap();
        commit(start, size).unwrap();
        // Recommitted pages are demand-zero again.
        assert_eq!(unsafe { (start + BYTES_IN_PAGE).load::<usize>() }, 0);
        release(start, size).unwrap();
    }

    #[test]
    fn test_zero() {
        let start = reserve(BYTES_IN_PAGE, mmap_anno_test!()).unwrap();
        commit(start, BYTES_IN_PAGE).unwrap();
        unsafe { start.store(usize::MAX) };
        zero(start, BYTES_IN_PAGE);
        assert_eq!(unsafe { start.load::<usize>() }, 0);
        release(start, BYTES_IN_PAGE).unwrap();
    }
}
